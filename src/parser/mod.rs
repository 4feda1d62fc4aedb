//! The CDDL parser.
//!
//! Parsing happens in two passes over the document.  The first pass strips
//! comments and splits the text into rule definitions (`name = ...`,
//! `name /= ...`, `name //= ...`), collecting every defined name.  The second
//! pass parses each rule body into a [`SchemaElement`] tree; because all
//! names are already known, the `foo: bar` key-versus-label question has a
//! deterministic answer even for forward references.
//!
//! Rule bodies are parsed by a hand-written recursive-descent loop that
//! consumes one operator or value at a time, mutating the element under
//! construction.  The dispatch order of the loop encodes the CDDL operator
//! precedence.  Individual tokens (identifiers, numbers, strings) are lexed
//! with nom combinators.

pub mod parse_err;

pub use parse_err::{ErrorKind, ParseError};

use crate::schema::{Kind, Literal, SchemaElement, SymbolTable};
use crate::util::CompileResult;
use log::debug;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char as nom_char, digit0, digit1};
use nom::combinator::{map_res, opt, recognize};
use nom::sequence::{pair, preceded, tuple};
use nom::IResult;
use parse_err::parse_error;
use std::collections::BTreeSet;

/// Parse a complete CDDL document into a symbol table.
///
/// `default_max_qty` is the repetition ceiling used for quantifiers with no
/// explicit upper bound (`*`, `+`, `n**`).
pub fn parse_schema(cddl: &str, default_max_qty: u64) -> CompileResult<SymbolTable> {
    let stripped = strip_comments(cddl);
    let raw_defs = split_definitions(&stripped)?;
    let names: BTreeSet<String> = raw_defs.iter().map(|d| d.name.clone()).collect();

    let mut ids = IdAllocator::default();
    let mut table = SymbolTable::new();
    for def in &raw_defs {
        debug!("parsing rule {}", def.name);
        let mut parser = Parser {
            rest: def.body.as_str(),
            names: &names,
            default_max_qty,
            ids: &mut ids,
        };
        let elem = parser.parse_single()?;
        match def.op {
            AssignOp::Assign => {
                if table.contains(&def.name) {
                    return Err(parse_error(ErrorKind::DuplicateRule, def.name.as_str()).into());
                }
                table.insert(def.name.clone(), elem);
            }
            AssignOp::TypeExtend | AssignOp::GroupExtend => match table.get_mut(&def.name) {
                Some(existing) => {
                    existing.union_push(elem, def.op == AssignOp::GroupExtend)?;
                }
                // A socket extended before (or without) a plain definition.
                None => table.insert(def.name.clone(), elem),
            },
        }
    }

    // Normalize and name the rule roots, then run whole-document checks.
    let mut flat = SymbolTable::new();
    for (name, elem) in table.take() {
        let mut root = elem.flatten_one();
        root.base_name = Some(name.clone());
        root.named_root = true;
        root.set_id_prefix("");
        flat.insert(name, root);
    }
    for (_, elem) in flat.iter() {
        elem.post_validate(&flat)?;
    }
    Ok(flat)
}

/// Hands out unique ids for elements created during one parse run, so
/// identifier prefixes are unique before the real prefixes are assigned.
#[derive(Debug, Default)]
struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    fn fresh(&mut self) -> String {
        self.next += 1;
        format!("temp_{}", self.next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignOp {
    Assign,
    TypeExtend,
    GroupExtend,
}

#[derive(Debug)]
struct RawDef {
    name: String,
    op: AssignOp,
    body: String,
}

// Remove ';' comments, leaving quoted strings alone.
fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                out.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => {
                if c == ';' {
                    while let Some(&next) = chars.peek() {
                        if next == '\n' {
                            break;
                        }
                        chars.next();
                    }
                } else {
                    if c == '"' || c == '\'' {
                        quote = Some(c);
                    }
                    out.push(c);
                }
            }
        }
    }
    out
}

// Bytes consumed by a quoted string, including both quotes.
fn skip_string(s: &str, quote: char) -> Result<usize, ParseError> {
    let mut escaped = false;
    let mut iter = s.char_indices();
    iter.next();
    for (i, c) in iter {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok(i + c.len_utf8());
        }
    }
    Err(parse_error(ErrorKind::Unbalanced, s))
}

// Split the document into definitions.  An assignment boundary is an
// identifier at bracket depth zero followed by `=`, `/=` or `//=` (but not
// `=>`).  Everything between boundaries belongs to the preceding rule body.
fn split_definitions(input: &str) -> Result<Vec<RawDef>, ParseError> {
    let mut defs: Vec<(String, AssignOp, usize)> = Vec::new();
    let mut ends: Vec<usize> = Vec::new();
    let mut depth = 0i32;
    let mut i = 0usize;
    while i < input.len() {
        let c = match input[i..].chars().next() {
            Some(c) => c,
            None => break,
        };
        match c {
            '"' | '\'' => {
                i += skip_string(&input[i..], c)?;
            }
            '[' | '(' | '{' => {
                depth += 1;
                i += 1;
            }
            ']' | ')' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(parse_error(ErrorKind::Unbalanced, &input[i..]));
                }
                i += 1;
            }
            _ if depth == 0 && (c.is_ascii_alphabetic() || c == '_' || c == '$') => {
                let start = i;
                let mut j = i;
                while input[j..].starts_with('$') {
                    j += 1;
                }
                let name_start = j;
                while let Some(cc) = input[j..].chars().next() {
                    if cc.is_ascii_alphanumeric() || cc == '_' || cc == '-' {
                        j += cc.len_utf8();
                    } else {
                        break;
                    }
                }
                if j == name_start {
                    i += 1;
                    continue;
                }
                let mut k = j;
                while let Some(cc) = input[k..].chars().next() {
                    if cc.is_whitespace() {
                        k += cc.len_utf8();
                    } else {
                        break;
                    }
                }
                let (op, op_len) = if input[k..].starts_with("//=") {
                    (AssignOp::GroupExtend, 3)
                } else if input[k..].starts_with("/=") {
                    (AssignOp::TypeExtend, 2)
                } else if input[k..].starts_with('=') && !input[k..].starts_with("=>") {
                    (AssignOp::Assign, 1)
                } else {
                    i = j;
                    continue;
                };
                if !defs.is_empty() {
                    ends.push(start);
                }
                defs.push((input[name_start..j].to_string(), op, k + op_len));
                i = k + op_len;
            }
            _ => {
                i += c.len_utf8();
            }
        }
    }
    if defs.is_empty() {
        return Err(parse_error(ErrorKind::Unparseable, input));
    }
    ends.push(input.len());
    Ok(defs
        .into_iter()
        .zip(ends)
        .map(|((name, op, body_start), body_end)| RawDef {
            name,
            op,
            body: input[body_start..body_end].trim().to_string(),
        })
        .collect())
}

// ---- token lexers ----

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
    ))(input)
}

fn uint_literal(input: &str) -> IResult<&str, u128> {
    alt((
        map_res(
            preceded(tag("0x"), take_while1(|c: char| c.is_ascii_hexdigit())),
            |s: &str| u128::from_str_radix(s, 16),
        ),
        map_res(
            preceded(tag("0b"), take_while1(|c: char| c == '0' || c == '1')),
            |s: &str| u128::from_str_radix(s, 2),
        ),
        map_res(
            preceded(tag("0o"), take_while1(|c: char| c.is_digit(8))),
            |s: &str| u128::from_str_radix(s, 8),
        ),
        map_res(digit1, |s: &str| s.parse::<u128>()),
    ))(input)
}

fn int_literal(input: &str) -> IResult<&str, i128> {
    let (rest, neg) = opt(nom_char('-'))(input)?;
    let (rest, magnitude) = uint_literal(rest)?;
    if magnitude > i128::max_value() as u128 {
        return Err(nom::Err::Error((input, nom::error::ErrorKind::TooLarge)));
    }
    let value = magnitude as i128;
    Ok((rest, if neg.is_some() { -value } else { value }))
}

fn float_literal(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((opt(nom_char('-')), digit0, nom_char('.'), digit1))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

// A number token that continues with `.` + digit is a float literal; `..` is
// a range operator and `.size` etc. are controls.
fn looks_like_float(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);
    let rest = s.trim_start_matches(|c: char| c.is_ascii_digit());
    let mut iter = rest.chars();
    iter.next() == Some('.') && iter.next().map_or(false, |c| c.is_ascii_digit())
}

struct Parser<'p, 'a> {
    rest: &'a str,
    names: &'p BTreeSet<String>,
    default_max_qty: u64,
    ids: &'p mut IdAllocator,
}

impl<'p, 'a> Parser<'p, 'a> {
    fn new_elem(&mut self) -> SchemaElement {
        SchemaElement::new(self.default_max_qty, self.ids.fresh())
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn advance(&mut self, n: usize) {
        self.rest = &self.rest[n..];
    }

    fn eat_char(&mut self, c: char) -> bool {
        if self.rest.starts_with(c) {
            self.advance(c.len_utf8());
            true
        } else {
            false
        }
    }

    fn lex<T>(
        &mut self,
        kind: ErrorKind,
        f: impl Fn(&'a str) -> IResult<&'a str, T>,
    ) -> CompileResult<T> {
        match f(self.rest) {
            Ok((rest, value)) => {
                self.rest = rest;
                Ok(value)
            }
            Err(_) => Err(parse_error(kind, self.rest).into()),
        }
    }

    // The content between quotes, with the quotes consumed.
    fn lex_quoted(&mut self, quote: char) -> CompileResult<&'a str> {
        let whole = self.rest;
        let consumed = skip_string(whole, quote)?;
        let content = &whole[quote.len_utf8()..consumed - quote.len_utf8()];
        self.advance(consumed);
        Ok(content)
    }

    /// Parse one whole rule body; trailing input is an error.
    fn parse_single(&mut self) -> CompileResult<SchemaElement> {
        let elem = self.parse_element(false, false)?;
        self.skip_ws();
        if !self.rest.is_empty() {
            return Err(parse_error(ErrorKind::Unparseable, self.rest).into());
        }
        Ok(elem)
    }

    // Comma-separated elements up to (and consuming) the closing bracket.
    fn parse_sequence(&mut self, closer: char) -> CompileResult<Vec<SchemaElement>> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            if self.eat_char(closer) {
                return Ok(out);
            }
            if self.rest.is_empty() {
                return Err(parse_error(ErrorKind::Unbalanced, self.rest).into());
            }
            out.push(self.parse_element(false, false)?);
            self.skip_ws();
            self.eat_char(',');
        }
    }

    // A `//` branch: a comma-separated run of elements up to the next `//`
    // or the end of the enclosing scope.  Multiple elements wrap in a group.
    fn parse_union_branch(&mut self) -> CompileResult<SchemaElement> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            let r = self.rest;
            if r.is_empty()
                || r.starts_with("//")
                || r.starts_with(']')
                || r.starts_with(')')
                || r.starts_with('}')
            {
                break;
            }
            items.push(self.parse_element(false, true)?);
            self.skip_ws();
            self.eat_char(',');
        }
        match items.len() {
            0 => Err(parse_error(ErrorKind::Unparseable, self.rest).into()),
            1 => Ok(items.swap_remove(0)),
            _ => {
                let mut group = self.new_elem();
                group.set_children(Kind::Group, items)?;
                Ok(group)
            }
        }
    }

    // Parse one element, consuming operators and values until a terminator.
    // `stop_slash` stops at `/` (used for single-slash union branches);
    // `stop_dslash` stops at `//` (used inside `//` branches).
    fn parse_element(
        &mut self,
        stop_slash: bool,
        stop_dslash: bool,
    ) -> CompileResult<SchemaElement> {
        let mut elem = self.new_elem();
        loop {
            self.skip_ws();
            let r = self.rest;
            if r.is_empty()
                || r.starts_with(',')
                || r.starts_with(']')
                || r.starts_with(')')
                || r.starts_with('}')
            {
                break;
            }
            if r.starts_with("//") {
                if stop_slash || stop_dslash {
                    break;
                }
                self.advance(2);
                let branch = self.parse_union_branch()?;
                elem.union_push(branch, true)?;
            } else if r.starts_with('/') {
                if stop_slash {
                    break;
                }
                self.advance(1);
                let branch = self.parse_element(true, true)?;
                elem.union_push(branch, false)?;
            } else if r.starts_with("=>") {
                self.advance(2);
                elem.convert_to_key()?;
            } else if r.starts_with(':') {
                self.advance(1);
                let is_defined = match elem.reference() {
                    Some(name) => self.names.contains(name),
                    None => true,
                };
                elem.convert_to_key_or_label(is_defined)?;
            } else if r.starts_with('[') {
                self.advance(1);
                let children = self.parse_sequence(']')?;
                elem.set_children(Kind::List, children)?;
            } else if r.starts_with('(') {
                self.advance(1);
                let children = self.parse_sequence(')')?;
                elem.set_children(Kind::Group, children)?;
            } else if r.starts_with('{') {
                self.advance(1);
                let children = self.parse_sequence('}')?;
                elem.set_children(Kind::Map, children)?;
            } else if self.try_bounded_quantifier(&mut elem)? {
            } else if r.starts_with('?') {
                self.advance(1);
                elem.set_quantifier(0, Some(1))?;
            } else if r.starts_with('*') {
                self.advance(1);
                elem.set_quantifier(0, None)?;
            } else if r.starts_with('+') {
                self.advance(1);
                elem.set_quantifier(1, None)?;
            } else if r.starts_with("#6.") {
                self.advance(3);
                let tag_num = self.lex(ErrorKind::MalformedTag, uint_literal)?;
                elem.add_tag(tag_num as u64);
            } else if r.starts_with('"') {
                let raw = self.lex_quoted('"')?;
                let text = escape8259::unescape(raw)
                    .map_err(|_| parse_error(ErrorKind::MalformedText, raw))?;
                elem.set_literal(Kind::Tstr, Literal::Text(text))?;
            } else if r.starts_with("h'") {
                self.advance(1);
                let raw = self.lex_quoted('\'')?;
                let no_ws: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = hex::decode(&no_ws)
                    .map_err(|_| parse_error(ErrorKind::MalformedHex, raw))?;
                elem.set_literal(Kind::Bstr, Literal::Bytes(bytes))?;
            } else if r.starts_with("b64'") {
                self.advance(3);
                let raw = self.lex_quoted('\'')?;
                let bytes = base64::decode_config(raw, base64::URL_SAFE)
                    .map_err(|_| parse_error(ErrorKind::MalformedBase64, raw))?;
                elem.set_literal(Kind::Bstr, Literal::Bytes(bytes))?;
            } else if r.starts_with('\'') {
                let raw = self.lex_quoted('\'')?;
                elem.set_literal(Kind::Bstr, Literal::Bytes(raw.as_bytes().to_vec()))?;
            } else if r.starts_with('.') && !looks_like_float(r) {
                self.parse_control(&mut elem)?;
            } else if r.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.') {
                self.parse_number(&mut elem)?;
            } else if r.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '$') {
                while self.rest.starts_with('$') {
                    self.advance(1);
                }
                let name = self.lex(ErrorKind::Unparseable, ident)?;
                apply_name(&mut elem, name)?;
            } else {
                return Err(parse_error(ErrorKind::Unparseable, r).into());
            }
        }
        if elem.kind.is_none() {
            return Err(parse_error(ErrorKind::Unparseable, self.rest).into());
        }
        Ok(elem)
    }

    // `m**n` quantifiers, with either bound optional.
    fn try_bounded_quantifier(&mut self, elem: &mut SchemaElement) -> CompileResult<bool> {
        let s = self.rest;
        let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if !s[digits..].starts_with("**") {
            return Ok(false);
        }
        let min_qty: u64 = if digits == 0 {
            0
        } else {
            s[..digits]
                .parse()
                .map_err(|_| parse_error(ErrorKind::MalformedQuantifier, s))?
        };
        self.advance(digits + 2);
        let s = self.rest;
        let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        let max_qty: Option<u64> = if digits == 0 {
            None
        } else {
            Some(
                s[..digits]
                    .parse()
                    .map_err(|_| parse_error(ErrorKind::MalformedQuantifier, s))?,
            )
        };
        self.advance(digits);
        elem.set_quantifier(min_qty, max_qty)?;
        Ok(true)
    }

    fn parse_number(&mut self, elem: &mut SchemaElement) -> CompileResult<()> {
        if looks_like_float(self.rest) {
            let value = self.lex(ErrorKind::MalformedFloat, float_literal)?;
            return elem.set_literal(Kind::Float, Literal::Float(value));
        }
        let first = self.lex(ErrorKind::MalformedInteger, int_literal)?;
        if self.rest.starts_with("..") {
            self.advance(2);
            let second = self.lex(ErrorKind::MalformedInteger, int_literal)?;
            // The signs of the endpoints pick the integer kind.
            let kind = if first >= 0 {
                Kind::Uint
            } else if second >= 0 {
                Kind::Int
            } else {
                Kind::Nint
            };
            elem.set_range(kind, first, second)
        } else if first < 0 {
            elem.set_literal(Kind::Nint, Literal::Int(first))
        } else {
            elem.set_literal(Kind::Uint, Literal::Int(first))
        }
    }

    // An integer control argument, optionally parenthesized.
    fn control_int(&mut self) -> CompileResult<i128> {
        self.skip_ws();
        let parens = self.eat_char('(');
        self.skip_ws();
        let value = self.lex(ErrorKind::MalformedControl, int_literal)?;
        if parens {
            self.skip_ws();
            if !self.eat_char(')') {
                return Err(parse_error(ErrorKind::Unbalanced, self.rest).into());
            }
        }
        Ok(value)
    }

    fn parse_control(&mut self, elem: &mut SchemaElement) -> CompileResult<()> {
        let r = self.rest;
        if r.starts_with(".size") {
            self.advance(5);
            self.skip_ws();
            let parens = self.eat_char('(');
            self.skip_ws();
            let first = self.lex(ErrorKind::MalformedControl, uint_literal)? as u64;
            if self.rest.starts_with("..") {
                self.advance(2);
                let second = self.lex(ErrorKind::MalformedControl, uint_literal)? as u64;
                elem.set_size_range(Some(first), Some(second))?;
            } else {
                elem.set_size(first)?;
            }
            if parens {
                self.skip_ws();
                if !self.eat_char(')') {
                    return Err(parse_error(ErrorKind::Unbalanced, self.rest).into());
                }
            }
            Ok(())
        } else if r.starts_with(".cborseq") || r.starts_with(".cbor") {
            let cborseq = r.starts_with(".cborseq");
            self.advance(if cborseq { 8 } else { 5 });
            self.skip_ws();
            let name = self.lex(ErrorKind::MalformedControl, ident)?;
            let mut nested = self.new_elem();
            apply_name(&mut nested, name)?;
            elem.set_cbor(nested, cborseq)
        } else if r.starts_with(".ge") {
            self.advance(3);
            let v = self.control_int()?;
            elem.set_min_value(v);
            Ok(())
        } else if r.starts_with(".gt") {
            self.advance(3);
            let v = self.control_int()?;
            elem.set_min_value(v + 1);
            Ok(())
        } else if r.starts_with(".le") {
            self.advance(3);
            let v = self.control_int()?;
            elem.set_max_value(v);
            Ok(())
        } else if r.starts_with(".lt") {
            self.advance(3);
            let v = self.control_int()?;
            elem.set_max_value(v - 1);
            Ok(())
        } else if r.starts_with(".eq") {
            self.advance(3);
            self.skip_ws();
            if self.rest.starts_with('"') {
                let raw = self.lex_quoted('"')?;
                let text = escape8259::unescape(raw)
                    .map_err(|_| parse_error(ErrorKind::MalformedText, raw))?;
                elem.set_exact_text(text)
            } else {
                let v = self.control_int()?;
                elem.set_exact_int(v)
            }
        } else {
            Err(parse_error(ErrorKind::MalformedControl, r).into())
        }
    }
}

// Keywords become primitive kinds; everything else is a rule reference.
fn apply_name(elem: &mut SchemaElement, name: &str) -> CompileResult<()> {
    match name {
        "uint" => elem.set_type(Kind::Uint),
        "nint" => elem.set_type(Kind::Nint),
        "int" => elem.set_type(Kind::Int),
        "float" => elem.set_type(Kind::Float),
        "float16" => elem.set_float_width(2),
        "float32" => elem.set_float_width(4),
        "float64" => elem.set_float_width(8),
        "bstr" => elem.set_type(Kind::Bstr),
        "tstr" => elem.set_type(Kind::Tstr),
        "bool" => elem.set_type(Kind::Bool),
        "true" => elem.set_literal(Kind::Bool, Literal::Bool(true)),
        "false" => elem.set_literal(Kind::Bool, Literal::Bool(false)),
        "nil" => elem.set_type(Kind::Nil),
        "any" => elem.set_type(Kind::Any),
        _ => elem.set_reference(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Kind;

    fn parse(cddl: &str) -> SymbolTable {
        parse_schema(cddl, 3).unwrap()
    }

    #[test]
    fn simple_rule() {
        let table = parse("Thing = uint");
        assert_eq!(table.lookup("Thing").unwrap().kind(), Kind::Uint);
    }

    #[test]
    fn comments_stripped() {
        let table = parse("; a header comment\nThing = uint ; trailing\n");
        assert_eq!(table.lookup("Thing").unwrap().kind(), Kind::Uint);
    }

    #[test]
    fn list_with_children() {
        let table = parse("Pair = [int, tstr]");
        let root = table.lookup("Pair").unwrap();
        assert_eq!(root.kind(), Kind::List);
        let kinds: Vec<Kind> = root.children().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![Kind::Int, Kind::Tstr]);
    }

    #[test]
    fn quantifiers() {
        let table = parse("Q = [? uint, * tstr, + bool, 2**5 nil]");
        let root = table.lookup("Q").unwrap();
        let bounds: Vec<(u64, u64)> = root
            .children()
            .iter()
            .map(|c| (c.min_qty, c.max_qty))
            .collect();
        assert_eq!(bounds, vec![(0, 1), (0, 3), (1, 3), (2, 5)]);
    }

    #[test]
    fn open_ended_bounded_quantifier_uses_ceiling() {
        let table = parse("Q = [2** uint]");
        let child = &table.lookup("Q").unwrap().children()[0];
        assert_eq!(child.min_qty, 2);
        assert_eq!(child.max_qty, 3);
    }

    #[test]
    fn occurrence_minimum_above_maximum_rejected() {
        let err = parse_schema("Q = [5**2 uint]", 3).unwrap_err();
        assert!(format!("{}", err).contains("occurrence"));
        // An open upper bound takes the default ceiling, which must still
        // admit the minimum.
        let err = parse_schema("Q = [4** uint]", 3).unwrap_err();
        assert!(format!("{}", err).contains("occurrence"));
        assert!(parse_schema("Q = [4** uint]", 4).is_ok());
    }

    #[test]
    fn ranges_pick_integer_kind() {
        let table = parse("R = [1..9, -4..4, -9..-1]");
        let kinds: Vec<Kind> = table
            .lookup("R")
            .unwrap()
            .children()
            .iter()
            .map(|c| c.kind())
            .collect();
        assert_eq!(kinds, vec![Kind::Uint, Kind::Int, Kind::Nint]);
    }

    #[test]
    fn hex_literal() {
        let table = parse("H = 0x10");
        let root = table.lookup("H").unwrap();
        assert_eq!(root.kind(), Kind::Uint);
        assert_eq!(root.literal(), Some(&Literal::Int(16)));
    }

    #[test]
    fn float_literal_value() {
        let table = parse("F = 3.25");
        let root = table.lookup("F").unwrap();
        assert_eq!(root.kind(), Kind::Float);
        assert_eq!(root.literal(), Some(&Literal::Float(3.25)));
    }

    #[test]
    fn text_and_byte_literals() {
        let table = parse("T = \"hi\"\nB = h'0102'\nR = 'raw'");
        assert_eq!(
            table.lookup("T").unwrap().literal(),
            Some(&Literal::Text("hi".into()))
        );
        assert_eq!(
            table.lookup("B").unwrap().literal(),
            Some(&Literal::Bytes(vec![1, 2]))
        );
        assert_eq!(
            table.lookup("R").unwrap().literal(),
            Some(&Literal::Bytes(b"raw".to_vec()))
        );
    }

    #[test]
    fn label_vs_key() {
        // `name` is not a defined rule, so it's only a label; `Other` is
        // defined, so it becomes a real key (and a label).
        let table = parse("L = [name: uint]\nK = {Other: tstr}\nOther = uint");
        let label_child = &table.lookup("L").unwrap().children()[0];
        assert_eq!(label_child.label.as_deref(), Some("name"));
        assert!(label_child.key.is_none());
        assert_eq!(label_child.kind(), Kind::Uint);

        let defined_child = &table.lookup("K").unwrap().children()[0];
        assert_eq!(defined_child.label.as_deref(), Some("Other"));
        let key = defined_child.key.as_ref().unwrap();
        assert_eq!(key.kind(), Kind::Other);
        assert_eq!(key.reference(), Some("Other"));
    }

    #[test]
    fn forward_reference_key() {
        // `Later` is defined after use, but the two-pass split still sees it.
        let table = parse("M = {Later: tstr}\nLater = uint");
        let child = &table.lookup("M").unwrap().children()[0];
        assert_eq!(child.key.as_ref().unwrap().reference(), Some("Later"));
    }

    #[test]
    fn arrow_key() {
        let table = parse("M = {uint => tstr}");
        let child = &table.lookup("M").unwrap().children()[0];
        assert_eq!(child.kind(), Kind::Tstr);
        assert_eq!(child.key.as_ref().unwrap().kind(), Kind::Uint);
    }

    #[test]
    fn quantified_key_entry() {
        let table = parse("M = {* uint => tstr}");
        let child = &table.lookup("M").unwrap().children()[0];
        assert_eq!((child.min_qty, child.max_qty), (0, 3));
        // The quantifier stays on the entry, not the key.
        let key = child.key.as_ref().unwrap();
        assert_eq!((key.min_qty, key.max_qty), (1, 1));
    }

    #[test]
    fn slash_union() {
        let table = parse("U = uint / tstr / nil");
        let root = table.lookup("U").unwrap();
        assert_eq!(root.kind(), Kind::Union);
        assert_eq!(root.children().len(), 3);
    }

    #[test]
    fn double_slash_union_groups_commas() {
        let table = parse("U = [a // b, c]\na = uint\nb = tstr\nc = bool");
        let root = table.lookup("U").unwrap();
        let union = &root.children()[0];
        assert_eq!(union.kind(), Kind::Union);
        assert_eq!(union.children().len(), 2);
        assert_eq!(union.children()[1].kind(), Kind::Group);
        assert_eq!(union.children()[1].children().len(), 2);
    }

    #[test]
    fn socket_extension() {
        let table = parse("$msg /= uint\n$msg /= tstr");
        let root = table.lookup("msg").unwrap();
        assert_eq!(root.kind(), Kind::Union);
        assert_eq!(root.children().len(), 2);
    }

    #[test]
    fn duplicate_rule_rejected() {
        let err = parse_schema("A = uint\nA = tstr", 3).unwrap_err();
        assert_eq!(format!("{}", err), "DuplicateRule(A)");
    }

    #[test]
    fn tags() {
        let table = parse("T = #6.32 tstr");
        let root = table.lookup("T").unwrap();
        assert_eq!(root.tags, vec![32]);
        assert_eq!(root.kind(), Kind::Tstr);
    }

    #[test]
    fn size_control() {
        let table = parse("S = uint .size 2\nT = tstr .size (1..5)");
        assert_eq!(table.lookup("S").unwrap().max_value, Some(0xffff));
        let t = table.lookup("T").unwrap();
        assert_eq!(t.min_size, Some(1));
        assert_eq!(t.max_size, Some(5));
    }

    #[test]
    fn value_controls() {
        let table = parse("A = uint .gt 5\nB = uint .le 9");
        assert_eq!(table.lookup("A").unwrap().min_value, Some(6));
        assert_eq!(table.lookup("B").unwrap().max_value, Some(9));
    }

    #[test]
    fn cbor_control() {
        let table = parse("W = bstr .cbor Inner\nInner = uint");
        let root = table.lookup("W").unwrap();
        let cbor = root.cbor.as_ref().unwrap();
        assert_eq!(cbor.reference(), Some("Inner"));
        assert!(!root.cbor_seq);
    }

    #[test]
    fn map_child_without_key_rejected() {
        let err = parse_schema("M = {uint}", 3).unwrap_err();
        assert!(format!("{}", err).contains("key"));
    }

    #[test]
    fn missing_rule_rejected() {
        let err = parse_schema("M = [ghost]", 3).unwrap_err();
        assert_eq!(format!("{}", err), "MissingRule(ghost)");
    }

    #[test]
    fn any_in_union_rejected() {
        let err = parse_schema("U = uint / any", 3).unwrap_err();
        assert!(format!("{}", err).contains("any"));
    }

    #[test]
    fn nonfinal_any_quantity_rejected() {
        let err = parse_schema("L = [* any, uint]", 3).unwrap_err();
        assert!(format!("{}", err).contains("any"));
    }

    #[test]
    fn unparseable() {
        let err = parse_schema("!", 3).unwrap_err();
        assert_eq!(format!("{}", err), "Unparseable(!)");
    }

    #[test]
    fn group_splices_into_list() {
        let table = parse("L = [uint, (tstr, bool)]");
        let root = table.lookup("L").unwrap();
        assert_eq!(root.children().len(), 3);
    }

    #[test]
    fn single_child_group_collapses() {
        let table = parse("L = [? (uint)]");
        let root = table.lookup("L").unwrap();
        assert_eq!(root.children().len(), 1);
        let child = &root.children()[0];
        assert_eq!(child.kind(), Kind::Uint);
        assert_eq!((child.min_qty, child.max_qty), (0, 1));
    }
}
