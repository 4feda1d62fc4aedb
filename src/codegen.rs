//! C code generation for schema-driven CBOR encoders and decoders.
//!
//! Each schema element contributes three kinds of output: a slice of the
//! result struct declaration, an expression that encodes or decodes it, and
//! optionally a standalone function wrapping that expression.  The same
//! conditions that decide whether an element needs its own variable also
//! decide whether it needs its own type and function, so most of this module
//! is those conditions and the C names derived from them.
//!
//! The generated code targets a small runtime library: `uintx32_decode`,
//! `list_start_decode`, `present_encode`, `multi_decode` and friends, with a
//! `cbor_state_t` cursor threaded through every call.

use crate::schema::{Kind, Literal, SchemaElement, SymbolTable};
use crate::util::{CompileError, CompileResult};
use std::fmt::Write as _;

const NEWL_IND: &str = "\n\t";

/// Whether to generate encoding or decoding code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Mode {
    Decode,
    Encode,
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Mode::Decode => "decode",
            Mode::Encode => "encode",
        }
    }

    /// Name of the struct pointer parameter in generated functions.
    pub fn struct_ptr(self) -> &'static str {
        match self {
            Mode::Decode => "result",
            Mode::Encode => "input",
        }
    }
}

// How a union member should treat its discriminating uint during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnionUint {
    // The uint is read as part of trying this member.
    Expect,
    // The uint was read up front; skip it.
    Drop,
}

/// One generated encoder/decoder function.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Xcoder {
    pub body: String,
    pub func_name: String,
    pub type_name: Option<String>,
}

/// One generated type definition.
#[derive(Debug, Clone)]
pub(crate) struct TypeDef {
    pub lines: Vec<String>,
    pub name: String,
}

fn deref_if_not_null(access: &str) -> String {
    if access == "NULL" {
        access.to_string()
    } else {
        format!("&{}", access)
    }
}

fn xcode_args(res: &str) -> String {
    if res == "NULL" {
        "state, NULL".to_string()
    } else {
        format!("state, ({})", res)
    }
}

fn xcode_statement(func: Option<&str>, res: &str) -> String {
    match func {
        None => "1".to_string(),
        Some(f) => format!("({}({}))", f, xcode_args(res)),
    }
}

fn add_semicolon(mut decl: Vec<String>) -> Vec<String> {
    if let Some(last) = decl.last_mut() {
        if !last.ends_with(';') {
            last.push(';');
        }
    }
    decl
}

fn enclose(ingress: &str, declaration: Vec<String>) -> Vec<String> {
    let mut out = vec![format!("{} {{", ingress)];
    out.extend(declaration.into_iter().map(|line| format!("\t{}", line)));
    out.push("}".to_string());
    out
}

fn ternary_if_chain(access: &str, names: &[String], bodies: &[String]) -> String {
    match (names.first(), bodies.first()) {
        (Some(name), Some(body)) => format!(
            "(({} == {}) ? {}{}: {})",
            access,
            name,
            body,
            NEWL_IND,
            ternary_if_chain(access, &names[1..], &bodies[1..])
        ),
        _ => "false".to_string(),
    }
}

// A C string literal for a text or byte string value.
fn c_string_literal(lit: &Literal) -> (String, usize) {
    match lit {
        Literal::Text(s) => (format!("\"{}\"", s.escape_default()), s.len()),
        Literal::Bytes(b) => {
            let mut escaped = String::new();
            for byte in b {
                let _ = write!(escaped, "\\x{:02x}", byte);
            }
            (format!("\"{}\"", escaped), b.len())
        }
        _ => ("NULL".to_string(), 0),
    }
}

fn tmp_str_arg(lit: &Literal) -> String {
    let (quoted, _) = c_string_literal(lit);
    format!(
        "(tmp_str.value = {},{}    tmp_str.len = sizeof({}) - 1, &tmp_str)",
        quoted, "\n", quoted
    )
}

fn tmp_val_arg(value: i128) -> String {
    format!("(tmp_value = {}, &tmp_value)", value)
}

/// The code generator for one schema in one mode.
///
/// Operates on a table prepared by [`prepare`]: access prefixes and skip
/// flags must be in place before any emission method is called.
pub(crate) struct Gen<'g> {
    pub table: &'g SymbolTable,
    pub mode: Mode,
    pub entry_types: &'g [String],
}

/// Set up access prefixes and skip flags on a copy of the schema table,
/// after rejecting reference cycles the generated C types cannot express.
pub(crate) fn prepare(
    table: &SymbolTable,
    mode: Mode,
    entry_types: &[String],
) -> CompileResult<SymbolTable> {
    let snapshot = table.clone();
    let gen = Gen {
        table: &snapshot,
        mode,
        entry_types,
    };
    for (name, _) in snapshot.iter() {
        gen.check_cycles(name, &mut Vec::new())?;
    }
    let mut work = table.clone();
    let prefix = format!("(*{})", mode.struct_ptr());
    for (_, elem) in work.iter_mut() {
        gen.set_access_prefix(elem, &prefix, true);
    }
    Ok(work)
}

impl<'g> Gen<'g> {
    fn resolve(&self, name: &str) -> CompileResult<&'g SchemaElement> {
        self.table.lookup(name)
    }

    // Unlike validation, generated C types cannot contain themselves, so
    // reference cycles are only allowed through a `bstr .cbor` of an entry
    // type, where the payload stays an opaque pointer.
    fn check_cycles(&self, root: &str, visiting: &mut Vec<String>) -> CompileResult<()> {
        if visiting.iter().any(|n| n == root) {
            return Err(CompileError::Generator(format!(
                "self-referencing type {} is only supported through a bstr \
                 .cbor of an entry type",
                root
            )));
        }
        visiting.push(root.to_string());
        let elem = self.resolve(root)?;
        self.check_cycles_elem(elem, visiting)?;
        visiting.pop();
        Ok(())
    }

    fn check_cycles_elem(
        &self,
        elem: &SchemaElement,
        visiting: &mut Vec<String>,
    ) -> CompileResult<()> {
        if let (Kind::Other, Some(name)) = (elem.kind(), elem.reference()) {
            self.check_cycles(name, visiting)?;
        }
        if elem.kind().is_aggregate() {
            for child in elem.children() {
                self.check_cycles_elem(child, visiting)?;
            }
        }
        if let Some(key) = &elem.key {
            self.check_cycles_elem(key, visiting)?;
        }
        if self.cbor_var_condition(elem) {
            if let Some(cbor) = &elem.cbor {
                self.check_cycles_elem(cbor, visiting)?;
            }
        }
        Ok(())
    }

    fn set_access_prefix(&self, elem: &mut SchemaElement, prefix: &str, is_root: bool) {
        elem.access_prefix = Some(prefix.to_string());
        if elem.kind().is_aggregate() {
            let child_prefix = self.var_access(elem);
            let skip = self.skip_condition(elem);
            let children = elem.children_mut();
            for child in children.iter_mut() {
                self.set_access_prefix(child, &child_prefix, false);
            }
            for child in children.iter_mut() {
                self.set_skipped(child, skip);
            }
        } else if is_root && elem.kind() != Kind::Other {
            let skipped = !self.multi_member(elem);
            self.set_skipped(elem, skipped);
        }
        let own_access = self.var_access(elem);
        let emit_cbor = self.cbor_var_condition(elem);
        if let Some(key) = elem.key.as_deref_mut() {
            self.set_access_prefix(key, &own_access, false);
        }
        if emit_cbor {
            if let Some(cbor) = elem.cbor.as_deref_mut() {
                self.set_access_prefix(cbor, &own_access, false);
            }
        }
    }

    fn set_skipped(&self, elem: &mut SchemaElement, skipped: bool) {
        if self.range_check_condition(elem) && self.repeated_single_func_impl_condition(elem) {
            elem.skipped = true;
        } else {
            elem.skipped = skipped;
        }
    }

    // ---- conditions ----

    fn multi_member(&self, elem: &SchemaElement) -> bool {
        elem.multi_var_condition() || self.repeated_multi_var_condition(elem)
    }

    fn key_var_condition(&self, elem: &SchemaElement) -> bool {
        elem.key.is_some()
    }

    fn choice_var_condition(&self, elem: &SchemaElement) -> bool {
        elem.kind() == Kind::Union
    }

    // A `bstr .cbor` payload gets its own variable unless it refers to an
    // entry type, which stays an opaque pointer into the payload buffer.
    fn is_cbor(&self, elem: &SchemaElement) -> bool {
        if self.type_name(elem).is_none() {
            return false;
        }
        match (elem.kind(), elem.reference()) {
            (Kind::Other, Some(name)) => {
                !self.entry_types.iter().any(|e| e == name)
                    && self
                        .resolve(name)
                        .map(|target| self.is_cbor(target))
                        .unwrap_or(false)
            }
            _ => true,
        }
    }

    fn cbor_var_condition(&self, elem: &SchemaElement) -> bool {
        elem.cbor.as_deref().map_or(false, |c| self.is_cbor(c))
    }

    fn self_repeated_multi_var_condition(&self, elem: &SchemaElement) -> bool {
        self.key_var_condition(elem)
            || self.cbor_var_condition(elem)
            || self.choice_var_condition(elem)
    }

    fn multi_val_condition(&self, elem: &SchemaElement) -> bool {
        elem.kind().is_aggregate()
            && (elem.children().len() > 1
                || (elem.children().len() == 1 && self.multi_member(&elem.children()[0])))
    }

    fn repeated_multi_var_condition(&self, elem: &SchemaElement) -> bool {
        self.self_repeated_multi_var_condition(elem) || self.multi_val_condition(elem)
    }

    fn range_check_condition(&self, elem: &SchemaElement) -> bool {
        match elem.kind() {
            Kind::Int | Kind::Nint | Kind::Uint => {
                elem.literal().is_none()
                    && (elem.min_value.is_some() || elem.max_value.is_some())
            }
            Kind::Bstr | Kind::Tstr => {
                elem.literal().is_none()
                    && (elem.min_size.is_some() || elem.max_size.is_some())
            }
            _ => false,
        }
    }

    fn type_def_condition(&self, elem: &SchemaElement) -> bool {
        elem.named_root && self.multi_member(elem) && !elem.is_unambiguous(self.table)
    }

    fn repeated_type_def_condition(&self, elem: &SchemaElement) -> bool {
        self.repeated_multi_var_condition(elem)
            && elem.multi_var_condition()
            && !elem.is_unambiguous_repeated(self.table)
    }

    fn single_func_impl_condition(&self, elem: &SchemaElement) -> bool {
        self.key_var_condition(elem)
            || self.cbor_var_condition(elem)
            || !elem.tags.is_empty()
            || self.type_def_condition(elem)
            || (matches!(elem.kind(), Kind::List | Kind::Map) && !elem.children().is_empty())
    }

    fn repeated_single_func_impl_condition(&self, elem: &SchemaElement) -> bool {
        self.repeated_type_def_condition(elem)
            || (matches!(elem.kind(), Kind::List | Kind::Map) && self.multi_member(elem))
            || (elem.multi_var_condition()
                && (self.self_repeated_multi_var_condition(elem)
                    || self.range_check_condition(elem)))
    }

    fn simple_func_condition(&self, elem: &SchemaElement) -> bool {
        if self.single_func_impl_condition(elem) {
            return true;
        }
        match (elem.kind(), elem.reference()) {
            (Kind::Other, Some(name)) => self
                .resolve(name)
                .map(|t| self.simple_func_condition(t))
                .unwrap_or(false),
            _ => false,
        }
    }

    fn skip_condition(&self, elem: &SchemaElement) -> bool {
        if elem.skipped {
            return true;
        }
        match elem.kind() {
            Kind::List | Kind::Map | Kind::Group => !self.multi_val_condition(elem),
            Kind::Other => {
                !self.repeated_multi_var_condition(elem)
                    && self.single_func_impl_condition(elem)
            }
            _ => false,
        }
    }

    // The fixed uint that identifies this element inside a union, if any.
    fn uint_val(&self, elem: &SchemaElement) -> Option<i128> {
        if let Some(key) = elem.key.as_deref() {
            return self.uint_val(key);
        }
        match elem.kind() {
            Kind::Uint if elem.is_unambiguous(self.table) => match elem.literal() {
                Some(Literal::Int(v)) => Some(*v),
                _ => None,
            },
            Kind::Group if !elem.count_var_condition() => {
                elem.children().first().and_then(|c| self.uint_val(c))
            }
            Kind::Other
                if !elem.count_var_condition() && !self.single_func_impl_condition(elem) =>
            {
                elem.reference()
                    .and_then(|name| self.resolve(name).ok())
                    .and_then(|t| self.uint_val(t))
            }
            _ => None,
        }
    }

    fn is_uint_disambiguated(&self, elem: &SchemaElement) -> bool {
        self.uint_val(elem).is_some()
    }

    fn all_children_uint_disambiguated(&self, elem: &SchemaElement) -> bool {
        let mut seen = Vec::new();
        for child in elem.children() {
            match self.uint_val(child) {
                Some(v) if !seen.contains(&v) => seen.push(v),
                _ => return false,
            }
        }
        true
    }

    // ---- names and access paths ----

    fn var_name(&self, elem: &SchemaElement) -> String {
        format!("_{}", elem.id())
    }

    fn access_prefix<'e>(&self, elem: &'e SchemaElement) -> &'e str {
        // Prefixes are assigned for the whole table before emission starts.
        elem.access_prefix
            .as_deref()
            .expect("access prefix is set before code generation")
    }

    fn var_access(&self, elem: &SchemaElement) -> String {
        if elem.is_unambiguous(self.table) {
            return "NULL".to_string();
        }
        self.access_prefix(elem).to_string()
    }

    fn val_access(&self, elem: &SchemaElement) -> String {
        if elem.is_unambiguous_repeated(self.table) {
            return "NULL".to_string();
        }
        if self.skip_condition(elem) {
            return self.var_access(elem);
        }
        format!("{}.{}", self.access_prefix(elem), self.var_name(elem))
    }

    fn repeated_val_access(&self, elem: &SchemaElement) -> String {
        if elem.is_unambiguous_repeated(self.table) {
            return "NULL".to_string();
        }
        format!("{}.{}", self.access_prefix(elem), self.var_name(elem))
    }

    fn present_var_name(&self, elem: &SchemaElement) -> String {
        format!("{}_present", self.var_name(elem))
    }

    fn present_var_access(&self, elem: &SchemaElement) -> String {
        format!("{}.{}", self.access_prefix(elem), self.present_var_name(elem))
    }

    fn count_var_name(&self, elem: &SchemaElement) -> String {
        format!("{}_count", self.var_name(elem))
    }

    fn count_var_access(&self, elem: &SchemaElement) -> String {
        format!("{}.{}", self.access_prefix(elem), self.count_var_name(elem))
    }

    fn choice_var_name(&self, elem: &SchemaElement) -> String {
        format!("{}_choice", self.var_name(elem))
    }

    fn choice_var_access(&self, elem: &SchemaElement) -> String {
        format!("{}.{}", self.access_prefix(elem), self.choice_var_name(elem))
    }

    fn enum_var_name(&self, elem: &SchemaElement, with_value: bool) -> String {
        if with_value {
            match self.uint_val(elem) {
                Some(v) => format!("{} = {}", self.var_name(elem), v),
                None => self.var_name(elem),
            }
        } else {
            self.var_name(elem)
        }
    }

    pub fn xcode_func_name(&self, elem: &SchemaElement) -> String {
        format!("{}{}", self.mode.label(), self.var_name(elem))
    }

    fn repeated_xcode_func_name(&self, elem: &SchemaElement) -> String {
        format!("{}_repeated{}", self.mode.label(), self.var_name(elem))
    }

    // ---- type names and declarations ----

    fn raw_type_name(&self, elem: &SchemaElement) -> String {
        format!("struct {}", elem.id())
    }

    fn val_type_name(&self, elem: &SchemaElement) -> Option<String> {
        if self.multi_val_condition(elem) {
            return Some(self.raw_type_name(elem));
        }
        match elem.kind() {
            Kind::Int | Kind::Nint => Some("int32_t".to_string()),
            Kind::Uint => Some("uint32_t".to_string()),
            Kind::Float => Some("float_t".to_string()),
            Kind::Bstr | Kind::Tstr => Some("cbor_string_type_t".to_string()),
            Kind::Bool => Some("bool".to_string()),
            Kind::Nil | Kind::Any => None,
            Kind::List | Kind::Map | Kind::Group => {
                elem.children().first().and_then(|c| self.type_name(c))
            }
            Kind::Union => Some(self.raw_type_name(elem)),
            Kind::Other => elem
                .reference()
                .and_then(|name| self.resolve(name).ok())
                .and_then(|t| self.type_name(t)),
        }
    }

    fn repeated_type_name(&self, elem: &SchemaElement) -> Option<String> {
        if self.self_repeated_multi_var_condition(elem) {
            let mut name = self.raw_type_name(elem);
            if self.val_type_name(elem).as_deref() == Some(name.as_str()) {
                name.push('_');
            }
            Some(name)
        } else {
            self.val_type_name(elem)
        }
    }

    pub fn type_name(&self, elem: &SchemaElement) -> Option<String> {
        if elem.multi_var_condition() {
            let mut name = self.raw_type_name(elem);
            if self.val_type_name(elem).as_deref() == Some(name.as_str()) {
                name.push('_');
            }
            if self.repeated_type_name(elem).as_deref() == Some(name.as_str()) {
                name.push('_');
            }
            Some(name)
        } else {
            self.repeated_type_name(elem)
        }
    }

    // Append the variable name (and array size) to a type declaration.
    fn add_var_name(
        &self,
        elem: &SchemaElement,
        mut var_type: Vec<String>,
        full: bool,
        anonymous: bool,
    ) -> Vec<String> {
        if var_type.is_empty() {
            return var_type;
        }
        let ends_in_block = var_type.last().map_or(false, |l| l.ends_with('}'));
        if !anonymous || !ends_in_block {
            let array = if full && elem.max_qty != 1 {
                format!("[{}]", elem.max_qty)
            } else {
                String::new()
            };
            if let Some(last) = var_type.last_mut() {
                let _ = write!(last, " {}{}", self.var_name(elem), array);
            }
        }
        add_semicolon(var_type)
    }

    fn var_type(&self, elem: &SchemaElement) -> Vec<String> {
        if elem.kind() == Kind::Union && !self.multi_val_condition(elem) {
            return self.union_type(elem);
        }
        if !self.multi_val_condition(elem) {
            if let Some(name) = self.val_type_name(elem) {
                return vec![name];
            }
            return Vec::new();
        }
        vec![self.raw_type_name(elem)]
    }

    fn union_type(&self, elem: &SchemaElement) -> Vec<String> {
        let decl = elem
            .children()
            .iter()
            .flat_map(|child| {
                self.add_var_name(child, self.single_var_type(child, true), false, true)
            })
            .collect();
        enclose("union", decl)
    }

    fn present_var(&self, elem: &SchemaElement) -> Vec<String> {
        vec![format!("uint32_t {};", self.present_var_name(elem))]
    }

    fn count_var(&self, elem: &SchemaElement) -> Vec<String> {
        vec![format!("uint32_t {};", self.count_var_name(elem))]
    }

    fn choice_var(&self, elem: &SchemaElement) -> Vec<String> {
        let with_values = self.all_children_uint_disambiguated(elem);
        let members = elem
            .children()
            .iter()
            .map(|c| format!("{},", self.enum_var_name(c, with_values)))
            .collect();
        let mut var = enclose("enum", members);
        if let Some(last) = var.last_mut() {
            let _ = write!(last, " {};", self.choice_var_name(elem));
        }
        var
    }

    fn child_declarations(&self, elem: &SchemaElement) -> Vec<String> {
        elem.children()
            .iter()
            .flat_map(|c| self.full_declaration(c))
            .collect()
    }

    // Declaration of one repetition of this element.
    fn repeated_declaration(&self, elem: &SchemaElement) -> Vec<String> {
        if elem.is_unambiguous_repeated(self.table) {
            return Vec::new();
        }
        let var_type = self.var_type(elem);
        let mut decl =
            self.add_var_name(elem, var_type, false, elem.kind() == Kind::Union);
        if matches!(elem.kind(), Kind::List | Kind::Map | Kind::Group) {
            decl.extend(self.child_declarations(elem));
        }
        if self.key_var_condition(elem) {
            if let Some(key) = elem.key.as_deref() {
                let mut key_var = self.full_declaration(key);
                key_var.extend(decl);
                decl = key_var;
            }
        }
        if self.choice_var_condition(elem) {
            decl.extend(self.choice_var(elem));
        }
        if self.cbor_var_condition(elem) {
            if let Some(cbor) = elem.cbor.as_deref() {
                decl.extend(self.full_declaration(cbor));
            }
        }
        decl
    }

    // Declaration of this element including repetition bookkeeping.
    fn full_declaration(&self, elem: &SchemaElement) -> Vec<String> {
        if elem.is_unambiguous(self.table) {
            return Vec::new();
        }
        let mut decl = if elem.multi_var_condition() {
            if elem.is_unambiguous_repeated(self.table) {
                Vec::new()
            } else {
                let base = match self.repeated_type_name(elem) {
                    Some(name) => vec![name],
                    None => Vec::new(),
                };
                self.add_var_name(elem, base, true, false)
            }
        } else {
            self.repeated_declaration(elem)
        };
        if elem.count_var_condition() {
            decl.extend(self.count_var(elem));
        }
        if elem.present_var_condition() {
            decl.extend(self.present_var(elem));
        }
        decl
    }

    // The element's type as a single nameless declaration, wrapping multiple
    // members in a struct.
    fn single_var_type(&self, elem: &SchemaElement, full: bool) -> Vec<String> {
        if full && self.multi_member(elem) {
            enclose("struct", self.full_declaration(elem))
        } else if !full && self.repeated_multi_var_condition(elem) {
            enclose("struct", self.repeated_declaration(elem))
        } else {
            self.var_type(elem)
        }
    }

    // All type definitions required by this element, dependencies first.
    pub fn type_def(&self, elem: &SchemaElement) -> Vec<TypeDef> {
        let mut out = Vec::new();
        if elem.kind().is_aggregate() {
            for child in elem.children() {
                out.extend(self.type_def(child));
            }
        }
        if self.cbor_var_condition(elem) {
            if let Some(cbor) = elem.cbor.as_deref() {
                out.extend(self.type_def(cbor));
            }
        }
        if self.key_var_condition(elem) {
            if let Some(key) = elem.key.as_deref() {
                out.extend(self.type_def(key));
            }
        }
        if let (Kind::Other, Some(name)) = (elem.kind(), elem.reference()) {
            if let Ok(target) = self.resolve(name) {
                out.extend(self.type_def(target));
            }
        }
        if self.repeated_type_def_condition(elem) {
            if let Some(name) = self.repeated_type_name(elem) {
                out.push(TypeDef {
                    lines: self.single_var_type(elem, false),
                    name,
                });
            }
        }
        if self.type_def_condition(elem) {
            if let Some(name) = self.type_name(elem) {
                out.push(TypeDef {
                    lines: self.single_var_type(elem, true),
                    name,
                });
            }
        }
        out
    }

    // ---- emission ----

    fn single_func_prim_prefix(&self, elem: &SchemaElement) -> CompileResult<&'static str> {
        let prefix = match elem.kind() {
            Kind::Int | Kind::Nint => "intx32",
            Kind::Uint => "uintx32",
            Kind::Float => "float",
            Kind::Bstr => "bstrx",
            Kind::Tstr => "tstrx",
            Kind::Bool => "boolx",
            Kind::Nil => "nilx",
            Kind::Any => "any",
            Kind::Other => {
                let name = elem
                    .reference()
                    .ok_or_else(|| CompileError::Generator("reference without a name".into()))?;
                return self.single_func_prim_prefix(self.resolve(name)?);
            }
            other => {
                return Err(CompileError::Generator(format!(
                    "no primitive function for {}",
                    other
                )))
            }
        };
        Ok(prefix)
    }

    fn single_func_prim_name(
        &self,
        elem: &SchemaElement,
        union_uint: Option<UnionUint>,
    ) -> CompileResult<Option<String>> {
        let prefix = self.single_func_prim_prefix(elem)?;
        let func = match self.mode {
            Mode::Decode => {
                if !elem.is_unambiguous_value(self.table) {
                    format!("{}_decode", prefix)
                } else {
                    match union_uint {
                        None => format!("{}_expect", prefix),
                        Some(UnionUint::Expect) => format!("{}_expect_union", prefix),
                        Some(UnionUint::Drop) => return Ok(None),
                    }
                }
            }
            Mode::Encode => {
                if !elem.is_unambiguous_value(self.table)
                    || matches!(elem.kind(), Kind::Tstr | Kind::Bstr)
                {
                    format!("{}_encode", prefix)
                } else {
                    format!("{}_put", prefix)
                }
            }
        };
        Ok(Some(func))
    }

    // The call to a library function for a primitive element (one that
    // doesn't define its own function).
    fn single_func_prim(
        &self,
        elem: &SchemaElement,
        access: &str,
        union_uint: Option<UnionUint>,
        ptr_result: bool,
    ) -> CompileResult<(Option<String>, String)> {
        if let (Kind::Other, Some(name)) = (elem.kind(), elem.reference()) {
            let target = self.resolve(name)?;
            return self.single_func(target, Some(access), union_uint);
        }
        let func_name = match self.single_func_prim_name(elem, union_uint)? {
            Some(name) => name,
            None => return Ok((None, String::new())),
        };
        let arg = if matches!(elem.kind(), Kind::Nil | Kind::Any) {
            "NULL".to_string()
        } else if !elem.is_unambiguous_value(self.table) {
            deref_if_not_null(access)
        } else {
            match elem.literal() {
                Some(lit @ Literal::Text(_)) | Some(lit @ Literal::Bytes(_)) => tmp_str_arg(lit),
                Some(Literal::Bool(b)) => {
                    format!("{}{}", if ptr_result { "(void *) " } else { "" }, b)
                }
                Some(Literal::Int(v)) => {
                    format!("{}{}", if ptr_result { "(void *) " } else { "" }, v)
                }
                Some(Literal::Float(f)) => {
                    format!("{}{}", if ptr_result { "(void *) " } else { "" }, f)
                }
                None => tmp_val_arg(0),
            }
        };
        Ok((Some(func_name), arg))
    }

    fn single_func(
        &self,
        elem: &SchemaElement,
        access: Option<&str>,
        union_uint: Option<UnionUint>,
    ) -> CompileResult<(Option<String>, String)> {
        if self.single_func_impl_condition(elem) {
            let access = match access {
                Some(a) => a.to_string(),
                None => self.var_access(elem),
            };
            Ok((
                Some(self.xcode_func_name(elem)),
                deref_if_not_null(&access),
            ))
        } else {
            let access = match access {
                Some(a) => a.to_string(),
                None => self.val_access(elem),
            };
            self.single_func_prim(elem, &access, union_uint, false)
        }
    }

    fn repeated_single_func(
        &self,
        elem: &SchemaElement,
        ptr_result: bool,
    ) -> CompileResult<(Option<String>, String)> {
        if self.repeated_single_func_impl_condition(elem) {
            let access = self.repeated_val_access(elem);
            Ok((
                Some(self.repeated_xcode_func_name(elem)),
                deref_if_not_null(&access),
            ))
        } else {
            let access = self.repeated_val_access(elem);
            self.single_func_prim(elem, &access, None, ptr_result)
        }
    }

    fn xcode_single_func_prim(
        &self,
        elem: &SchemaElement,
        union_uint: Option<UnionUint>,
    ) -> CompileResult<String> {
        let access = self.val_access(elem);
        let (func, arg) = self.single_func_prim(elem, &access, union_uint, false)?;
        Ok(xcode_statement(func.as_deref(), &arg))
    }

    // ---- element counting ----

    pub fn num_backups(&self, elem: &SchemaElement) -> u64 {
        let mut total = 0;
        if let Some(key) = elem.key.as_deref() {
            total += self.num_backups(key);
        }
        if self.cbor_var_condition(elem) {
            if let Some(cbor) = elem.cbor.as_deref() {
                total += self.num_backups(cbor);
            }
        }
        if elem.kind().is_aggregate() {
            total += elem
                .children()
                .iter()
                .map(|c| self.num_backups(c))
                .max()
                .unwrap_or(0);
        }
        if let (Kind::Other, Some(name)) = (elem.kind(), elem.reference()) {
            if let Ok(target) = self.resolve(name) {
                total += self.num_backups(target);
            }
        }
        let has_backup = self.cbor_var_condition(elem)
            || matches!(elem.kind(), Kind::List | Kind::Map | Kind::Union);
        if has_backup {
            total += 1;
        }
        total
    }

    // Nesting depth of type references, for ordering definitions.
    pub fn depends_on(&self, elem: &SchemaElement, visiting: &mut Vec<String>) -> u64 {
        let mut depths = vec![1];
        if self.cbor_var_condition(elem) {
            if let Some(cbor) = elem.cbor.as_deref() {
                depths.push(self.depends_on(cbor, visiting));
            }
        }
        if let Some(key) = elem.key.as_deref() {
            depths.push(self.depends_on(key, visiting));
        }
        if let (Kind::Other, Some(name)) = (elem.kind(), elem.reference()) {
            if !visiting.iter().any(|n| n == name) {
                if let Ok(target) = self.resolve(name) {
                    visiting.push(name.to_string());
                    depths.push(1 + self.depends_on(target, visiting));
                    visiting.pop();
                }
            }
        }
        if elem.kind().is_aggregate() {
            for child in elem.children() {
                depths.push(self.depends_on(child, visiting));
            }
        }
        depths.into_iter().max().unwrap_or(1)
    }

    // Minimum and maximum number of top-level items this element occupies.
    pub fn list_counts(&self, elem: &SchemaElement) -> (u64, u64) {
        match elem.kind() {
            Kind::Group => {
                let (mins, maxs) = elem
                    .children()
                    .iter()
                    .map(|c| self.list_counts(c))
                    .fold((0, 0), |(a, b), (c, d)| (a + c, b + d));
                (elem.min_qty * mins, elem.max_qty * maxs)
            }
            Kind::Union => {
                let min = elem
                    .children()
                    .iter()
                    .map(|c| self.list_counts(c).0)
                    .min()
                    .unwrap_or(0);
                let max = elem
                    .children()
                    .iter()
                    .map(|c| self.list_counts(c).1)
                    .max()
                    .unwrap_or(0);
                (elem.min_qty * min, elem.max_qty * max)
            }
            Kind::Other => {
                let inner = elem
                    .reference()
                    .and_then(|name| self.resolve(name).ok())
                    .map(|t| self.list_counts(t))
                    .unwrap_or((1, 1));
                (elem.min_qty * inner.0, elem.max_qty * inner.1)
            }
            // Lists and maps are one item themselves.
            _ => (elem.min_qty, elem.max_qty),
        }
    }

    // ---- xcode bodies ----

    fn xcode_list(&self, elem: &SchemaElement) -> CompileResult<String> {
        let lower = elem.kind().lower();
        let start_func = format!("{}_start_{}", lower, self.mode.label());
        let end_func = format!("{}_end_{}", lower, self.mode.label());
        let max_count: u64 = elem
            .children()
            .iter()
            .map(|c| self.list_counts(c).1)
            .sum();
        let count_arg = match self.mode {
            Mode::Encode => format!(", {}", max_count),
            Mode::Decode => String::new(),
        };
        let start = format!("{}(state{})", start_func, count_arg);
        let end = format!("{}(state{})", end_func, count_arg);
        if elem.children().is_empty() {
            return Ok(format!("({} && {})", start, end));
        }
        let children: CompileResult<Vec<String>> = elem
            .children()
            .iter()
            .map(|c| self.full_xcode(c, None))
            .collect();
        let joined = children?.join(&format!("{}&& ", NEWL_IND));
        Ok(format!(
            "({} && (int_res = ({}), (({}) && int_res)))",
            start, joined, end
        ))
    }

    fn xcode_group(
        &self,
        elem: &SchemaElement,
        union_uint: Option<UnionUint>,
    ) -> CompileResult<String> {
        let mut parts = Vec::new();
        for (i, child) in elem.children().iter().enumerate() {
            let part = if i == 0 {
                self.full_xcode(child, union_uint)?
            } else {
                self.full_xcode(child, None)?
            };
            parts.push(part);
        }
        Ok(format!("({})", parts.join(&format!("{}&& ", NEWL_IND))))
    }

    fn xcode_union(&self, elem: &SchemaElement) -> CompileResult<String> {
        let choice_access = self.choice_var_access(elem);
        match self.mode {
            Mode::Decode => {
                if self.all_children_uint_disambiguated(elem) {
                    let mut lines = Vec::new();
                    for child in elem.children() {
                        lines.push(format!(
                            "(({} == {}) && ({}))",
                            choice_access,
                            self.var_name(child),
                            self.full_xcode(child, Some(UnionUint::Drop))?
                        ));
                    }
                    return Ok(format!(
                        "(((uintx32_decode(state, (uint32_t *)&{}))) && ({}))",
                        choice_access,
                        lines.join(&format!("{}|| ", NEWL_IND))
                    ));
                }
                let mut child_values = Vec::new();
                for child in elem.children() {
                    let union_uint = if self.is_uint_disambiguated(child) {
                        Some(UnionUint::Expect)
                    } else {
                        None
                    };
                    child_values.push(format!(
                        "({} && (({} = {}) || 1))",
                        self.full_xcode(child, union_uint)?,
                        choice_access,
                        self.var_name(child)
                    ));
                }
                // Rewind the cursor between attempts when neighbors consume
                // input through their own functions.
                for i in 1..child_values.len() {
                    let cur = &elem.children()[i];
                    let prev = &elem.children()[i - 1];
                    if !self.is_uint_disambiguated(cur)
                        && (self.simple_func_condition(cur) || self.simple_func_condition(prev))
                    {
                        child_values[i] =
                            format!("(union_elem_code(state) && {})", child_values[i]);
                    }
                }
                Ok(format!(
                    "(union_start_code(state) && (int_res = ({}), union_end_code(state), int_res))",
                    child_values.join(&format!("{}|| ", NEWL_IND))
                ))
            }
            Mode::Encode => {
                let names: Vec<String> =
                    elem.children().iter().map(|c| self.var_name(c)).collect();
                let bodies: CompileResult<Vec<String>> = elem
                    .children()
                    .iter()
                    .map(|c| self.full_xcode(c, None))
                    .collect();
                Ok(ternary_if_chain(&choice_access, &names, &bodies?))
            }
        }
    }

    fn xcode_bstr(&self, elem: &SchemaElement) -> CompileResult<String> {
        if !self.cbor_var_condition(elem) {
            return self.xcode_single_func_prim(elem, None);
        }
        let cbor = elem
            .cbor
            .as_deref()
            .ok_or_else(|| CompileError::Generator("bstr without nested schema".into()))?;
        let val_access = self.val_access(elem);
        let xcode_cbor = format!(
            "((int_res = (bstrx_cbor_start_{mode}(state, &{access}){ind}&& {inner})), \
             bstrx_cbor_end_{mode}(state), int_res)",
            mode = self.mode.label(),
            access = val_access,
            ind = NEWL_IND,
            inner = self.full_xcode(cbor, None)?
        );
        match self.mode {
            Mode::Decode => Ok(xcode_cbor),
            Mode::Encode => Ok(format!(
                "({}.value ? ({}) : ({}))",
                val_access,
                self.xcode_single_func_prim(elem, None)?,
                xcode_cbor
            )),
        }
    }

    fn xcode_tags(&self, elem: &SchemaElement) -> Vec<String> {
        let func = match self.mode {
            Mode::Encode => "tag_encode",
            Mode::Decode => "tag_expect",
        };
        elem.tags
            .iter()
            .map(|tag| format!("{}(state, {})", func, tag))
            .collect()
    }

    fn range_checks(&self, elem: &SchemaElement, access: &str) -> Vec<String> {
        if elem.literal().is_some() {
            return Vec::new();
        }
        let mut checks = Vec::new();
        match elem.kind() {
            Kind::Int | Kind::Uint | Kind::Nint | Kind::Float | Kind::Bool => {
                if let Some(min) = elem.min_value {
                    checks.push(format!("({} >= {})", access, min));
                }
                if let Some(max) = elem.max_value {
                    checks.push(format!("({} <= {})", access, max));
                }
            }
            Kind::Bstr | Kind::Tstr => {
                if let Some(min) = elem.min_size {
                    checks.push(format!("({}.len >= {})", access, min));
                }
                if let Some(max) = elem.max_size {
                    checks.push(format!("({}.len <= {})", access, max));
                }
            }
            Kind::Other => {
                if let Some(target) = elem.reference().and_then(|n| self.resolve(n).ok()) {
                    checks.extend(self.range_checks(target, access));
                }
            }
            _ => {}
        }
        checks
    }

    // Code for one repetition of this element: key, tags, value, checks.
    fn repeated_xcode(
        &self,
        elem: &SchemaElement,
        union_uint: Option<UnionUint>,
    ) -> CompileResult<String> {
        let range_checks = self.range_checks(elem, &self.val_access(elem));
        let body = match elem.kind() {
            Kind::List | Kind::Map => self.xcode_list(elem)?,
            Kind::Group => self.xcode_group(elem, union_uint)?,
            Kind::Union => self.xcode_union(elem)?,
            Kind::Bstr => self.xcode_bstr(elem)?,
            Kind::Uint | Kind::Other => self.xcode_single_func_prim(elem, union_uint)?,
            _ => self.xcode_single_func_prim(elem, None)?,
        };
        let mut parts = Vec::new();
        if let Some(key) = elem.key.as_deref() {
            parts.push(self.full_xcode(key, union_uint)?);
        }
        parts.extend(self.xcode_tags(elem));
        match self.mode {
            Mode::Decode => {
                parts.push(body);
                parts.extend(range_checks);
            }
            Mode::Encode => {
                parts.extend(range_checks);
                parts.push(body);
            }
        }
        Ok(format!("({})", parts.join(&format!("{}&& ", NEWL_IND))))
    }

    fn result_len(&self, elem: &SchemaElement) -> String {
        match self.repeated_type_name(elem) {
            Some(name) if !elem.is_unambiguous_repeated(self.table) => {
                format!("sizeof({})", name)
            }
            _ => "0".to_string(),
        }
    }

    // Full code for this element including its repetition handling.
    fn full_xcode(
        &self,
        elem: &SchemaElement,
        union_uint: Option<UnionUint>,
    ) -> CompileResult<String> {
        if elem.present_var_condition() {
            let (func, arg) = self.repeated_single_func(elem, true)?;
            let func = func
                .ok_or_else(|| CompileError::Generator("no function for optional".into()))?;
            return Ok(format!(
                "present_{}(&({}), (void *){}, {})",
                self.mode.label(),
                self.present_var_access(elem),
                func,
                xcode_args(&arg)
            ));
        }
        if elem.count_var_condition() {
            let (func, arg) = self.repeated_single_func(elem, true)?;
            let func = func
                .ok_or_else(|| CompileError::Generator("no function for repetition".into()))?;
            return Ok(format!(
                "multi_{}({}, {}, &{}, (void *){}, {}, {})",
                self.mode.label(),
                elem.min_qty,
                elem.max_qty,
                self.count_var_access(elem),
                func,
                xcode_args(&arg),
                self.result_len(elem)
            ));
        }
        self.repeated_xcode(elem, union_uint)
    }

    /// The body of the element's own encoder/decoder function.
    pub fn xcode(&self, elem: &SchemaElement) -> CompileResult<String> {
        self.full_xcode(elem, None)
    }

    /// All functions this element and its descendants define, dependencies
    /// first.
    pub fn xcoders(&self, elem: &SchemaElement, out: &mut Vec<Xcoder>) -> CompileResult<()> {
        if elem.kind().is_aggregate() {
            for child in elem.children() {
                self.xcoders(child, out)?;
            }
        }
        if let Some(cbor) = elem.cbor.as_deref() {
            self.xcoders(cbor, out)?;
        }
        if let Some(key) = elem.key.as_deref() {
            self.xcoders(key, out)?;
        }
        if let (Kind::Other, Some(name)) = (elem.kind(), elem.reference()) {
            if !self.entry_types.iter().any(|e| e == name) {
                self.xcoders(self.resolve(name)?, out)?;
            }
        }
        if self.repeated_single_func_impl_condition(elem) {
            out.push(Xcoder {
                body: self.repeated_xcode(elem, None)?,
                func_name: self.repeated_xcode_func_name(elem),
                type_name: self.repeated_type_name(elem),
            });
        }
        if self.single_func_impl_condition(elem) {
            out.push(Xcoder {
                body: self.xcode(elem)?,
                func_name: self.xcode_func_name(elem),
                type_name: self.type_name(elem),
            });
        }
        Ok(())
    }

    /// Signature of the public API function for an entry type.
    pub fn public_func_sig(&self, elem: &SchemaElement) -> CompileResult<String> {
        let type_name = self.type_name(elem).ok_or_else(|| {
            CompileError::Generator(format!(
                "entry type {} has no generated type",
                elem.get_base_name()
            ))
        })?;
        let (payload_const, struct_const) = match self.mode {
            Mode::Decode => ("const ", ""),
            Mode::Encode => ("", "const "),
        };
        Ok(format!(
            "bool cbor_{func}(\n\t\t{pc}uint8_t *payload, uint32_t payload_len,\n\t\t\
             {sc}{ty} *{ptr},\n\t\tuint32_t *payload_len_out)",
            func = self.xcode_func_name(elem),
            pc = payload_const,
            sc = struct_const,
            ty = type_name,
            ptr = self.mode.struct_ptr()
        ))
    }

    /// Signature of the hidden type-consistency test function.
    pub fn type_test_func_sig(&self, elem: &SchemaElement) -> CompileResult<String> {
        let type_name = self.type_name(elem).ok_or_else(|| {
            CompileError::Generator(format!(
                "entry type {} has no generated type",
                elem.get_base_name()
            ))
        })?;
        let struct_const = match self.mode {
            Mode::Decode => "",
            Mode::Encode => "const ",
        };
        Ok(format!(
            "__attribute__((unused)) static bool type_test_{func}(\n\t\t{sc}{ty} *{ptr})",
            func = self.xcode_func_name(elem),
            sc = struct_const,
            ty = type_name,
            ptr = self.mode.struct_ptr()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    fn prep(cddl: &str, mode: Mode, entries: &[String]) -> SymbolTable {
        let table = parse_schema(cddl, 3).unwrap();
        prepare(&table, mode, entries).unwrap()
    }

    #[test]
    fn list_type_gets_struct() {
        let entries = vec!["Pair".to_string()];
        let table = prep("Pair = [int, tstr]", Mode::Decode, &entries);
        let gen = Gen {
            table: &table,
            mode: Mode::Decode,
            entry_types: &entries,
        };
        let pair = table.lookup("Pair").unwrap();
        assert_eq!(gen.type_name(pair).unwrap(), "struct Pair");
        let defs = gen.type_def(pair);
        assert_eq!(defs.last().unwrap().name, "struct Pair");
        let lines = defs.last().unwrap().lines.join("\n");
        assert!(lines.contains("int32_t"));
        assert!(lines.contains("cbor_string_type_t"));
    }

    #[test]
    fn decode_body_uses_list_wrappers() {
        let entries = vec!["Pair".to_string()];
        let table = prep("Pair = [int, tstr]", Mode::Decode, &entries);
        let gen = Gen {
            table: &table,
            mode: Mode::Decode,
            entry_types: &entries,
        };
        let body = gen.xcode(table.lookup("Pair").unwrap()).unwrap();
        assert!(body.contains("list_start_decode(state)"));
        assert!(body.contains("list_end_decode(state)"));
        assert!(body.contains("intx32_decode"));
        assert!(body.contains("tstrx_decode"));
    }

    #[test]
    fn encode_list_carries_count() {
        let entries = vec!["Pair".to_string()];
        let table = prep("Pair = [int, tstr]", Mode::Encode, &entries);
        let gen = Gen {
            table: &table,
            mode: Mode::Encode,
            entry_types: &entries,
        };
        let body = gen.xcode(table.lookup("Pair").unwrap()).unwrap();
        assert!(body.contains("list_start_encode(state, 2)"));
        assert!(body.contains("list_end_encode(state, 2)"));
    }

    #[test]
    fn optional_uses_present_var() {
        let entries = vec!["Opt".to_string()];
        let table = prep("Opt = [? uint]", Mode::Decode, &entries);
        let gen = Gen {
            table: &table,
            mode: Mode::Decode,
            entry_types: &entries,
        };
        let body = gen.xcode(table.lookup("Opt").unwrap()).unwrap();
        assert!(body.contains("present_decode"));
        let defs = gen.type_def(table.lookup("Opt").unwrap());
        let lines = defs.last().unwrap().lines.join("\n");
        assert!(lines.contains("_present;"));
    }

    #[test]
    fn repetition_uses_multi() {
        let entries = vec!["R".to_string()];
        let table = prep("R = [* tstr]", Mode::Decode, &entries);
        let gen = Gen {
            table: &table,
            mode: Mode::Decode,
            entry_types: &entries,
        };
        let body = gen.xcode(table.lookup("R").unwrap()).unwrap();
        assert!(body.contains("multi_decode(0, 3, &"));
        let defs = gen.type_def(table.lookup("R").unwrap());
        let lines = defs.last().unwrap().lines.join("\n");
        assert!(lines.contains("[3]"));
        assert!(lines.contains("_count;"));
    }

    #[test]
    fn self_reference_rejected() {
        let table = parse_schema("A = [A]", 3).unwrap();
        let err = prepare(&table, Mode::Decode, &["A".to_string()]).unwrap_err();
        assert!(matches!(err, CompileError::Generator(_)));
    }

    #[test]
    fn self_reference_through_entry_bstr_allowed() {
        let table = parse_schema("A = [uint, ? bstr .cbor A]", 3).unwrap();
        assert!(prepare(&table, Mode::Decode, &["A".to_string()]).is_ok());
    }

    #[test]
    fn union_choice_enum() {
        let entries = vec!["U".to_string()];
        let table = prep("U = [uint / tstr]", Mode::Decode, &entries);
        let gen = Gen {
            table: &table,
            mode: Mode::Decode,
            entry_types: &entries,
        };
        let defs = gen.type_def(table.lookup("U").unwrap());
        let lines = defs.last().unwrap().lines.join("\n");
        assert!(lines.contains("enum {"));
        assert!(lines.contains("_choice;"));
    }

    #[test]
    fn list_counts_flatten_groups() {
        let table = parse_schema("G = [(uint, uint), tstr]", 3).unwrap();
        let entries = vec!["G".to_string()];
        let prepped = prepare(&table, Mode::Decode, &entries).unwrap();
        let gen = Gen {
            table: &prepped,
            mode: Mode::Decode,
            entry_types: &entries,
        };
        let root = prepped.lookup("G").unwrap();
        // Groups splice, so the list holds three items.
        let total: u64 = root.children().iter().map(|c| gen.list_counts(c).1).sum();
        assert_eq!(total, 3);
    }
}
