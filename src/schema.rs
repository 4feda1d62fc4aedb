//! This module defines the schema element model.
//!
//! A parsed CDDL document becomes a [`SymbolTable`] mapping each rule name to
//! one [`SchemaElement`] tree.  Elements are built up incrementally by the
//! parser through the mutating setters here, then normalized with
//! [`SchemaElement::flatten`] and checked with `post_validate`.
//!
//! References between rules stay symbolic (`Kind::Other` holds the rule
//! name), so mutually recursive schemas can be represented; they are resolved
//! through the table at use time.

use crate::util::{semantic, CompileError, CompileResult};
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use strum_macros::{Display, IntoStaticStr};

/// The CBOR size (in bytes) of an unsigned integer's argument.
pub(crate) fn int_byte_width(num: u128) -> CompileResult<u64> {
    if num <= 23 {
        Ok(0)
    } else if num < 0x100 {
        Ok(1)
    } else if num < 0x1_0000 {
        Ok(2)
    } else if num < 0x1_0000_0000 {
        Ok(4)
    } else if num < 0x1_0000_0000_0000_0000 {
        Ok(8)
    } else {
        Err(semantic("number too large (more than 64 bits)"))
    }
}

/// The basic type of a schema element.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display, IntoStaticStr)]
#[allow(missing_docs)]
pub enum Kind {
    Int,
    Uint,
    Nint,
    Float,
    Bstr,
    Tstr,
    Bool,
    Nil,
    Any,
    List,
    Map,
    Group,
    Union,
    Other,
}

impl Kind {
    /// True for kinds whose payload is a list of child elements.
    pub fn is_aggregate(self) -> bool {
        matches!(self, Kind::List | Kind::Map | Kind::Group | Kind::Union)
    }

    /// Lowercase name, used when deriving identifiers.
    pub(crate) fn lower(self) -> &'static str {
        match self {
            Kind::Int => "int",
            Kind::Uint => "uint",
            Kind::Nint => "nint",
            Kind::Float => "float",
            Kind::Bstr => "bstr",
            Kind::Tstr => "tstr",
            Kind::Bool => "bool",
            Kind::Nil => "nil",
            Kind::Any => "any",
            Kind::List => "list",
            Kind::Map => "map",
            Kind::Group => "group",
            Kind::Union => "union",
            Kind::Other => "other",
        }
    }
}

/// A literal value attached to an element, i.e. `7`, `"birthday"`, or
/// `h'DEADBEEF'`.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Literal {
    Bool(bool),
    Int(i128),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::Text(s) => write!(f, "\"{}\"", s),
            Literal::Bytes(b) => write!(f, "h'{}'", hex::encode(b)),
        }
    }
}

/// The payload of an element, depending on its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No payload (e.g. a bare `uint`).
    None,
    /// A literal value.
    Literal(Literal),
    /// Child elements, for list/map/group/union kinds.
    Children(Vec<SchemaElement>),
    /// The name of another rule, for `Kind::Other`.
    TypeName(String),
}

/// One node of a parsed CDDL rule.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaElement {
    /// The basic type.  `None` only while the parser is mid-element.
    pub kind: Option<Kind>,
    /// Payload (literal, children, or reference), depending on kind.
    pub value: Payload,
    /// Friendly name from CDDL labels, used for identifier derivation.
    pub label: Option<String>,
    /// Minimum number of repetitions.
    pub min_qty: u64,
    /// Maximum number of repetitions.
    pub max_qty: u64,
    /// Exact encoded size in bytes, when known (float width, literal length).
    pub size: Option<u64>,
    /// Minimum size in bytes, from `.size`.
    pub min_size: Option<u64>,
    /// Maximum size in bytes, from `.size`.
    pub max_size: Option<u64>,
    /// Minimum numeric value, from ranges and `.gt`/`.ge`.
    pub min_value: Option<i128>,
    /// Maximum numeric value, from ranges and `.lt`/`.le`.
    pub max_value: Option<i128>,
    /// The map key for this element, if any.
    pub key: Option<Box<SchemaElement>>,
    /// The expected content of a byte string, from `.cbor`/`.cborseq`.
    pub cbor: Option<Box<SchemaElement>>,
    /// True when the byte string holds a CBOR sequence (`.cborseq`).
    pub cbor_seq: bool,
    /// Expected CBOR tags, outermost first.
    pub tags: Vec<u64>,
    /// Explicit base name, set for rule roots and key/cbor slots.
    pub base_name: Option<String>,
    /// Prefix that makes derived identifiers unique.
    pub id_prefix: String,
    /// The ceiling used when a quantifier has no upper bound.
    pub default_max_qty: u64,
    /// True for elements that are the root of a named rule.
    pub(crate) named_root: bool,
    /// C struct access path, set by the code generator.
    pub(crate) access_prefix: Option<String>,
    /// Whether this element shares its parent's variable, set by the code
    /// generator.
    pub(crate) skipped: bool,
}

impl SchemaElement {
    /// Make an empty element.  The parser fills it in with the setters below.
    pub fn new(default_max_qty: u64, id_prefix: String) -> SchemaElement {
        SchemaElement {
            kind: None,
            value: Payload::None,
            label: None,
            min_qty: 1,
            max_qty: 1,
            size: None,
            min_size: None,
            max_size: None,
            min_value: None,
            max_value: None,
            key: None,
            cbor: None,
            cbor_seq: false,
            tags: Vec::new(),
            base_name: None,
            id_prefix,
            default_max_qty,
            named_root: false,
            access_prefix: None,
            skipped: false,
        }
    }

    /// The element's kind.  Panics if called before the parser has assigned
    /// one; every element coming out of a successful parse has a kind.
    pub fn kind(&self) -> Kind {
        self.kind.expect("element kind is set during parsing")
    }

    /// Child elements, or an empty slice for non-aggregate kinds.
    pub fn children(&self) -> &[SchemaElement] {
        match &self.value {
            Payload::Children(c) => c,
            _ => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<SchemaElement> {
        match &mut self.value {
            Payload::Children(c) => c,
            _ => panic!("not an aggregate element"),
        }
    }

    /// The literal payload, if there is one.
    pub fn literal(&self) -> Option<&Literal> {
        match &self.value {
            Payload::Literal(l) => Some(l),
            _ => None,
        }
    }

    /// The referenced rule name, for `Kind::Other` elements.
    pub fn reference(&self) -> Option<&str> {
        match &self.value {
            Payload::TypeName(n) => Some(n),
            _ => None,
        }
    }

    fn claim_kind(&mut self, kind: Kind) -> CompileResult<()> {
        if let Some(existing) = self.kind {
            return Err(semantic(format!(
                "cannot have two values: {}, {}",
                existing, kind
            )));
        }
        self.kind = Some(kind);
        Ok(())
    }

    /// Assign a bare kind with no payload (e.g. `uint`, `tstr`, `any`).
    pub fn set_type(&mut self, kind: Kind) -> CompileResult<()> {
        self.claim_kind(kind)
    }

    /// Assign a kind with a literal payload, deriving the size and value
    /// bounds the literal implies.
    pub fn set_literal(&mut self, kind: Kind, lit: Literal) -> CompileResult<()> {
        self.claim_kind(kind)?;
        match (kind, &lit) {
            (Kind::Tstr, Literal::Text(s)) => {
                let len = s.len() as u64;
                self.set_size_range(Some(len), Some(len))?;
            }
            (Kind::Bstr, Literal::Bytes(b)) => {
                let len = b.len() as u64;
                self.set_size_range(Some(len), Some(len))?;
            }
            (Kind::Uint, Literal::Int(v)) => {
                self.size = Some(int_byte_width(*v as u128)?);
                self.min_value = Some(*v);
                self.max_value = Some(*v);
            }
            (Kind::Nint, Literal::Int(v)) => {
                self.size = Some(int_byte_width(v.unsigned_abs())?);
                self.min_value = Some(*v);
                self.max_value = Some(-1);
            }
            (Kind::Int, Literal::Int(_))
            | (Kind::Float, Literal::Float(_))
            | (Kind::Bool, Literal::Bool(_)) => {}
            _ => return Err(semantic(format!("literal {} not valid for {}", lit, kind))),
        }
        self.value = Payload::Literal(lit);
        Ok(())
    }

    /// Assign an aggregate kind and its children.
    pub fn set_children(&mut self, kind: Kind, children: Vec<SchemaElement>) -> CompileResult<()> {
        self.claim_kind(kind)?;
        self.value = Payload::Children(children);
        Ok(())
    }

    /// Assign `Kind::Other` with the referenced rule name.
    pub fn set_reference(&mut self, name: &str) -> CompileResult<()> {
        self.claim_kind(Kind::Other)?;
        self.value = Payload::TypeName(name.to_string());
        Ok(())
    }

    /// Assign `float` with an explicit width (2, 4, or 8 bytes).
    pub fn set_float_width(&mut self, width: u64) -> CompileResult<()> {
        self.claim_kind(Kind::Float)?;
        self.size = Some(width);
        Ok(())
    }

    /// Assign an integer range like `1..10`.  The kind must be one of the
    /// integer kinds; which one is picked by the parser from the signs.
    pub fn set_range(&mut self, kind: Kind, min_val: i128, max_val: i128) -> CompileResult<()> {
        if !matches!(kind, Kind::Int | Kind::Uint | Kind::Nint) {
            return Err(semantic(format!("only integers (not {}) can have range", kind)));
        }
        if min_val > max_val {
            return Err(semantic(format!(
                "range has larger minimum than maximum (min {}, max {})",
                min_val, max_val
            )));
        }
        if min_val == max_val {
            return self.set_literal(kind, Literal::Int(min_val));
        }
        self.claim_kind(kind)?;
        self.min_value = Some(min_val);
        self.max_value = Some(max_val);
        match kind {
            Kind::Uint => self.set_size_range(
                Some(int_byte_width(min_val as u128)?),
                Some(int_byte_width(max_val as u128)?),
            )?,
            Kind::Nint => self.set_size_range(
                Some(int_byte_width(max_val.unsigned_abs())?),
                Some(int_byte_width(min_val.unsigned_abs())?),
            )?,
            Kind::Int => self.set_size_range(
                None,
                Some(
                    int_byte_width(max_val.unsigned_abs())?
                        .max(int_byte_width(min_val.unsigned_abs())?),
                ),
            )?,
            _ => {}
        }
        Ok(())
    }

    /// Set a friendly label.  Must come before the value.
    pub fn set_label(&mut self, label: &str) -> CompileResult<()> {
        if self.kind.is_some() {
            return Err(semantic(format!("cannot have label after value: {}", label)));
        }
        self.label = Some(label.to_string());
        Ok(())
    }

    /// Set the repetition bounds.  `None` for the maximum means "no explicit
    /// ceiling" and is replaced with `default_max_qty`.
    pub fn set_quantifier(&mut self, min_qty: u64, max_qty: Option<u64>) -> CompileResult<()> {
        if self.kind.is_some() {
            return Err(semantic("cannot have quantifier after value"));
        }
        let max_qty = max_qty.unwrap_or(self.default_max_qty);
        if min_qty > max_qty {
            return Err(semantic(format!(
                "occurrence minimum {} exceeds maximum {}",
                min_qty, max_qty
            )));
        }
        self.min_qty = min_qty;
        self.max_qty = max_qty;
        Ok(())
    }

    /// Apply `.size N`.
    pub fn set_size(&mut self, size: u64) -> CompileResult<()> {
        match self.kind {
            None => Err(semantic(format!("cannot have size before value: {}", size))),
            Some(Kind::Int) | Some(Kind::Uint) | Some(Kind::Nint) => {
                self.set_size_range(None, Some(size))
            }
            Some(Kind::Bstr) | Some(Kind::Tstr) => self.set_size_range(Some(size), Some(size)),
            Some(k) => Err(semantic(format!(".size cannot be applied to {}", k))),
        }
    }

    /// Apply `.size N..M`.
    pub fn set_size_range(
        &mut self,
        min_size: Option<u64>,
        max_size: Option<u64>,
    ) -> CompileResult<()> {
        if let (Some(lo), Some(hi)) = (min_size, max_size) {
            if lo > hi {
                return Err(semantic(format!(
                    "invalid size range (min {}, max {})",
                    lo, hi
                )));
            }
        }
        // A minimum of zero adds no information.
        self.min_size = min_size.filter(|s| *s != 0);
        if self.kind == Some(Kind::Uint) && self.max_value.is_none() {
            if let Some(hi) = max_size {
                if hi > 8 {
                    return Err(semantic(format!("size too large for integer: {}", hi)));
                }
                if hi > 0 {
                    self.max_value = Some(256i128.pow(hi as u32) - 1);
                }
            }
        }
        self.max_size = max_size;
        Ok(())
    }

    /// Apply `.gt`/`.ge` (the parser pre-adjusts for exclusive bounds).
    pub fn set_min_value(&mut self, min_value: i128) {
        self.min_value = Some(min_value);
    }

    /// Apply `.lt`/`.le` (the parser pre-adjusts for exclusive bounds).
    pub fn set_max_value(&mut self, max_value: i128) {
        self.max_value = Some(max_value);
    }

    /// Apply `.eq` with an integer argument.
    pub fn set_exact_int(&mut self, value: i128) -> CompileResult<()> {
        if self.kind.is_none() {
            return Err(semantic(".eq requires a value to apply to"));
        }
        self.min_value = Some(value);
        self.max_value = Some(value);
        self.value = Payload::Literal(Literal::Int(value));
        Ok(())
    }

    /// Apply `.eq` with a text argument.
    pub fn set_exact_text(&mut self, value: String) -> CompileResult<()> {
        if self.kind.is_none() {
            return Err(semantic(".eq requires a value to apply to"));
        }
        self.value = Payload::Literal(Literal::Text(value));
        Ok(())
    }

    /// Apply `.cbor`/`.cborseq`: the byte string holds encoded CBOR matching
    /// `cbor`.
    pub fn set_cbor(&mut self, mut cbor: SchemaElement, cborseq: bool) -> CompileResult<()> {
        if self.kind != Some(Kind::Bstr) {
            return Err(semantic(format!(
                "{} must be used with bstr",
                if cborseq { ".cborseq" } else { ".cbor" }
            )));
        }
        if cborseq {
            cbor.max_qty = self.default_max_qty;
        }
        cbor.base_name = Some("cbor".to_string());
        self.cbor_seq = cborseq;
        self.cbor = Some(Box::new(cbor));
        Ok(())
    }

    /// Attach a map key.
    pub fn set_key(&mut self, mut key: SchemaElement) -> CompileResult<()> {
        if self.key.is_some() {
            return Err(semantic("cannot have two keys"));
        }
        if key.kind == Some(Kind::Group) {
            return Err(semantic("a key cannot be a group"));
        }
        key.base_name = Some("key".to_string());
        self.key = Some(Box::new(key));
        Ok(())
    }

    /// Add an expected CBOR tag (`#6.N`).
    pub fn add_tag(&mut self, tag: u64) {
        self.tags.push(tag);
    }

    // Entry-level attributes move from the old element to the new wrapper
    // when `=>` or union operators re-type an element in place.
    fn hoist_entry_attrs(&mut self, inner: &mut SchemaElement) {
        self.label = inner.label.take();
        self.min_qty = inner.min_qty;
        self.max_qty = inner.max_qty;
        self.base_name = inner.base_name.take();
        inner.min_qty = 1;
        inner.max_qty = 1;
    }

    /// Re-type this element in place: what has been parsed so far becomes the
    /// key of a fresh element (for `=>`).
    pub fn convert_to_key(&mut self) -> CompileResult<()> {
        let fresh = SchemaElement::new(self.default_max_qty, self.id_prefix.clone());
        let mut inner = mem::replace(self, fresh);
        if inner.kind.is_none() {
            return Err(semantic("'=>' without a key value"));
        }
        self.hoist_entry_attrs(&mut inner);
        self.set_key(inner)
    }

    /// Append a branch to this element, converting it into a union first if
    /// it isn't one (for `/` and `//`).
    pub fn union_push(&mut self, branch: SchemaElement, doubleslash: bool) -> CompileResult<()> {
        if self.kind != Some(Kind::Union) {
            let fresh = SchemaElement::new(self.default_max_qty, self.id_prefix.clone());
            let mut inner = mem::replace(self, fresh);
            if !doubleslash {
                self.label = inner.label.take();
                self.key = inner.key.take();
                self.min_qty = inner.min_qty;
                self.max_qty = inner.max_qty;
                self.base_name = inner.base_name.take();
                inner.min_qty = 1;
                inner.max_qty = 1;
            }
            self.set_children(Kind::Union, vec![inner])?;
        }
        self.children_mut().push(branch);
        Ok(())
    }

    /// Resolve the `foo: bar` shorthand: what has been parsed so far becomes
    /// either a key or just a label, depending on whether `foo` names a rule
    /// defined anywhere in the document.
    pub fn convert_to_key_or_label(&mut self, is_defined: bool) -> CompileResult<()> {
        let fresh = SchemaElement::new(self.default_max_qty, self.id_prefix.clone());
        let mut inner = mem::replace(self, fresh);
        if inner.kind.is_none() {
            return Err(semantic("':' without a key value"));
        }
        self.hoist_entry_attrs(&mut inner);
        if let Some(name) = inner.reference().map(str::to_string) {
            if !is_defined {
                self.label = Some(name);
                return Ok(());
            }
            if self.label.is_none() {
                self.label = Some(name);
            }
        }
        self.set_key(inner)
    }

    fn flatten_parts(&mut self) {
        if self.kind.map_or(false, Kind::is_aggregate) {
            let allow_multi = self.kind != Some(Kind::Union);
            if let Payload::Children(children) = mem::replace(&mut self.value, Payload::None) {
                let flat = children
                    .into_iter()
                    .flat_map(|c| c.flatten(allow_multi))
                    .collect();
                self.value = Payload::Children(flat);
            }
        }
        if let Some(key) = self.key.take() {
            self.key = Some(Box::new(key.flatten_one()));
        }
        if let Some(cbor) = self.cbor.take() {
            self.cbor = Some(Box::new(cbor.flatten_one()));
        }
    }

    pub(crate) fn flatten_one(self) -> SchemaElement {
        let mut flat = self.flatten(false);
        // flatten(false) always yields exactly one element
        flat.swap_remove(0)
    }

    /// Normalize the tree: single-child groups and unions collapse into their
    /// child (multiplying quantities, moving labels/keys/tags down), and
    /// inline once-repeated groups splice into their parent when the parent
    /// allows it.  Idempotent.
    pub fn flatten(mut self, allow_multi: bool) -> Vec<SchemaElement> {
        self.flatten_parts();
        if matches!(self.kind, Some(Kind::Group) | Some(Kind::Union)) {
            let single = self.children().len() == 1;
            let nested_keys =
                single && self.key.is_some() && self.children()[0].key.is_some();
            if single && !nested_keys {
                let mut children = match mem::replace(&mut self.value, Payload::None) {
                    Payload::Children(c) => c,
                    _ => unreachable!(),
                };
                let mut child = children.swap_remove(0);
                child.min_qty = child.min_qty.saturating_mul(self.min_qty);
                child.max_qty = child.max_qty.saturating_mul(self.max_qty);
                if child.label.is_none() {
                    child.label = self.label.take();
                }
                if child.key.is_none() {
                    child.key = self.key.take();
                }
                child.tags.extend(self.tags.iter().copied());
                return vec![child];
            }
            if allow_multi && self.kind == Some(Kind::Group) && self.min_qty == 1 && self.max_qty == 1
            {
                return match mem::replace(&mut self.value, Payload::None) {
                    Payload::Children(c) => c,
                    _ => unreachable!(),
                };
            }
        }
        vec![self]
    }

    /// Whether this element carries a map key, possibly through layers of
    /// rule references, groups, and unions.
    pub fn elem_has_key(&self, table: &SymbolTable) -> bool {
        if self.key.is_some() {
            return true;
        }
        match self.kind {
            Some(Kind::Other) => self
                .reference()
                .and_then(|name| table.get(name))
                .map_or(false, |root| root.elem_has_key(table)),
            Some(Kind::Group) | Some(Kind::Union) => {
                !self.children().is_empty()
                    && self.children().iter().all(|c| c.elem_has_key(table))
            }
            _ => false,
        }
    }

    // Detect rules that are nothing but a cycle of references, so later
    // recursive walks can trust the reference chains to terminate.
    fn check_reference_chain(&self, table: &SymbolTable) -> CompileResult<()> {
        let mut visited: Vec<&str> = Vec::new();
        let mut cur = self;
        while cur.kind == Some(Kind::Other) {
            let name = cur.reference().unwrap_or_default();
            if visited.contains(&name) {
                return Err(semantic(format!("circular reference through {}", name)));
            }
            visited.push(name);
            match table.get(name) {
                Some(next) => cur = next,
                None => return Err(CompileError::MissingRule(name.to_string())),
            }
        }
        Ok(())
    }

    /// Validations that need the whole document: map children must have keys,
    /// references must resolve, `any` must not make lists or unions
    /// ambiguous.  Recurses into children, key, and cbor.
    pub fn post_validate(&self, table: &SymbolTable) -> CompileResult<()> {
        match self.kind {
            Some(Kind::Map) => {
                for child in self.children() {
                    if !child.elem_has_key(table) {
                        return Err(semantic(format!(
                            "map entry must have a key: {}",
                            child.field_name()
                        )));
                    }
                }
            }
            Some(Kind::Other) => {
                self.check_reference_chain(table)?;
            }
            Some(Kind::List) => {
                let children = self.children();
                for child in &children[..children.len().saturating_sub(1)] {
                    if child.kind == Some(Kind::Any) && child.min_qty != child.max_qty {
                        return Err(semantic(
                            "ambiguous quantity of 'any' is only supported as the last \
                             element of a list",
                        ));
                    }
                }
            }
            Some(Kind::Union) if self.children().len() > 1 => {
                for child in self.children() {
                    let child_any = child.key.is_none() && child.kind == Some(Kind::Any);
                    let key_any =
                        child.key.as_ref().map_or(false, |k| k.kind == Some(Kind::Any));
                    if child_any || key_any {
                        return Err(semantic(
                            "'any' inside a union would always be triggered",
                        ));
                    }
                }
            }
            _ => {}
        }
        for child in self.children() {
            child.post_validate(table)?;
        }
        if let Some(key) = &self.key {
            key.post_validate(table)?;
        }
        if let Some(cbor) = &self.cbor {
            cbor.post_validate(table)?;
        }
        Ok(())
    }

    fn sanitize(name: &str) -> String {
        name.chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect::<String>()
            .replace('-', "_")
    }

    /// Derive a base name for identifiers, trying progressively weaker
    /// sources: label, key, literal, reference, first child, cbor, kind.
    pub fn generate_base_name(&self) -> String {
        if let Some(label) = &self.label {
            return Self::sanitize(label);
        }
        if let Some(key) = &self.key {
            match key.kind {
                Some(Kind::Tstr) => {
                    if let Some(Literal::Text(s)) = key.literal() {
                        return Self::sanitize(s);
                    }
                }
                Some(Kind::Other) => {
                    if let Some(name) = key.reference() {
                        return Self::sanitize(name);
                    }
                }
                _ => {}
            }
        }
        if self.kind == Some(Kind::Tstr) {
            if let Some(Literal::Text(s)) = self.literal() {
                return Self::sanitize(&format!("{}_tstr", s));
            }
        }
        if matches!(self.kind, Some(Kind::Int) | Some(Kind::Uint)) {
            if let Some(Literal::Int(v)) = self.literal() {
                return Self::sanitize(&format!("{}{}", self.kind().lower(), v));
            }
        }
        if self.kind == Some(Kind::Other) {
            if let Some(name) = self.reference() {
                return Self::sanitize(&format!("_{}", name));
            }
        }
        if matches!(self.kind, Some(Kind::List) | Some(Kind::Group)) {
            if let Some(first) = self.children().first() {
                return Self::sanitize(&format!("_{}", first.get_base_name()));
            }
        }
        if let Some(cbor) = &self.cbor {
            match cbor.kind {
                Some(Kind::Tstr) => {
                    if let Some(Literal::Text(s)) = cbor.literal() {
                        return Self::sanitize(s);
                    }
                }
                Some(Kind::Other) => {
                    if let Some(name) = cbor.reference() {
                        return Self::sanitize(name);
                    }
                }
                _ => {}
            }
        }
        if let Some(key) = &self.key {
            return Self::sanitize(&format!(
                "{}{}",
                key.generate_base_name(),
                self.kind.map_or("", Kind::lower)
            ));
        }
        self.kind.map_or("elem", Kind::lower).to_string()
    }

    /// Base name used for functions, variables, and typedefs.
    pub fn get_base_name(&self) -> String {
        match &self.base_name {
            Some(name) => name.replace('-', "_"),
            None => self.generate_base_name(),
        }
    }

    /// Unique identifier: the prefix chain joined with the base name.
    pub fn id(&self) -> String {
        if self.id_prefix.is_empty() {
            self.get_base_name()
        } else {
            format!("{}_{}", self.id_prefix, self.get_base_name())
        }
    }

    /// Field name used in structured decode output.
    pub fn field_name(&self) -> String {
        self.generate_base_name()
            .trim_matches('_')
            .to_string()
    }

    /// Recursively set the identifier prefixes: children derive theirs from
    /// this element's id.
    pub fn set_id_prefix(&mut self, id_prefix: &str) {
        self.id_prefix = id_prefix.to_string();
        let child_base = self.id();
        if let Payload::Children(children) = &mut self.value {
            for child in children {
                child.set_id_prefix(&child_base);
            }
        }
        if let Some(cbor) = &mut self.cbor {
            cbor.set_id_prefix(&child_base);
        }
        if let Some(key) = &mut self.key {
            key.set_id_prefix(&child_base);
        }
    }

    // ---- derived properties shared by the transcoder and code generator ----

    /// Whether the value is fully implied by the schema (no data needed).
    pub(crate) fn is_unambiguous_value(&self, table: &SymbolTable) -> bool {
        match self.kind {
            Some(Kind::Nil) => true,
            Some(Kind::Int) | Some(Kind::Nint) | Some(Kind::Uint) | Some(Kind::Float)
            | Some(Kind::Bool) | Some(Kind::Tstr) => self.literal().is_some(),
            Some(Kind::Bstr) => {
                self.literal().is_some()
                    || self
                        .cbor
                        .as_ref()
                        .map_or(false, |c| c.is_unambiguous(table))
            }
            Some(Kind::Other) => self
                .reference()
                .and_then(|name| table.get(name))
                .map_or(false, |root| root.is_unambiguous(table)),
            _ => false,
        }
    }

    /// Whether one repetition of this element is fully implied.
    pub(crate) fn is_unambiguous_repeated(&self, table: &SymbolTable) -> bool {
        (self.is_unambiguous_value(table)
            && self
                .key
                .as_ref()
                .map_or(true, |k| k.is_unambiguous_repeated(table)))
            || (matches!(self.kind, Some(Kind::List) | Some(Kind::Group) | Some(Kind::Map))
                && self.children().is_empty())
    }

    /// Whether this element, repetitions included, is fully implied.
    pub(crate) fn is_unambiguous(&self, table: &SymbolTable) -> bool {
        self.is_unambiguous_repeated(table) && self.min_qty == self.max_qty
    }

    /// Whether the element needs a "present" flag (optional, at most one).
    pub(crate) fn present_var_condition(&self) -> bool {
        self.min_qty == 0 && self.max_qty <= 1
    }

    /// Whether the element needs a repetition count.
    pub(crate) fn count_var_condition(&self) -> bool {
        self.max_qty > 1
    }

    /// Whether decoding must go through the repetition machinery.
    pub(crate) fn multi_var_condition(&self) -> bool {
        self.present_var_condition() || self.count_var_condition()
    }

    /// Whether the `.cbor` content is actually decoded inline.  References to
    /// `passthrough` names are left as raw strings (used by the code
    /// generator for entry types).
    pub(crate) fn is_cbor(&self, table: &SymbolTable, passthrough: &[String]) -> bool {
        match self.kind {
            Some(Kind::Nil) | Some(Kind::Any) => false,
            Some(Kind::Other) => self.reference().map_or(false, |name| {
                !passthrough.iter().any(|p| p == name)
                    && table
                        .get(name)
                        .map_or(false, |root| root.is_cbor(table, passthrough))
            }),
            _ => true,
        }
    }

    pub(crate) fn cbor_var_condition(&self, table: &SymbolTable, passthrough: &[String]) -> bool {
        self.cbor
            .as_ref()
            .map_or(false, |c| c.is_cbor(table, passthrough))
    }
}

/// The result of parsing a CDDL document: rule name → rule root element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    types: BTreeMap<String, SchemaElement>,
}

impl SymbolTable {
    pub(crate) fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Look up a rule by name.
    pub fn get(&self, name: &str) -> Option<&SchemaElement> {
        self.types.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut SchemaElement> {
        self.types.get_mut(name)
    }

    /// Look up a rule by name, turning a miss into an error.
    pub fn lookup(&self, name: &str) -> CompileResult<&SchemaElement> {
        self.types
            .get(name)
            .ok_or_else(|| CompileError::MissingRule(name.to_string()))
    }

    /// Whether a rule with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub(crate) fn insert(&mut self, name: String, elem: SchemaElement) {
        self.types.insert(name, elem);
    }

    /// Iterate over rules in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SchemaElement)> {
        self.types.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut SchemaElement)> {
        self.types.iter_mut()
    }

    pub(crate) fn take(self) -> BTreeMap<String, SchemaElement> {
        self.types
    }
}
