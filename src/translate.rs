//! Validate data against a schema and convert it to and from a
//! structured form.
//!
//! Decoding walks the schema and the data in lockstep.  Schema elements
//! whose value is fully determined by the schema itself (fixed literals,
//! `nil`, fixed-content byte strings) are elided from the output, so the
//! structured form carries only the information the schema cannot supply.
//! Encoding is the inverse: elided values are reconstructed from the
//! schema, everything else is looked up by field name.
//!
//! Quantified elements may consume a variable number of data items, so the
//! decoder reads from a rewindable [`Stream`] cursor: speculative matches
//! (optional elements, extra repetitions, union branches) run against a
//! copy of the cursor which is committed only on success.

use crate::schema::{Kind, Literal, SchemaElement, SymbolTable};
use crate::util::{mismatch, CompileError, CompileResult};
use crate::value::Value;
use std::collections::BTreeMap;

/// The structured form of decoded data.
///
/// Maps and groups become records of named fields; quantified elements
/// become repeated lists; values the schema fixes completely are elided
/// and show up as [`Structured::None`].
#[derive(Debug, Clone, PartialEq)]
pub enum Structured {
    /// An elided value, fully determined by the schema.
    None,
    /// A single data value.
    Value(Value),
    /// Named fields, in schema order.
    Record(Vec<(String, Structured)>),
    /// Instances of a quantified element.
    Repeated(Vec<Structured>),
}

impl Structured {
    /// Convenience constructor for a single-value node.
    pub fn value(v: Value) -> Structured {
        Structured::Value(v)
    }

    /// Look up a field of a record by name.
    pub fn field(&self, name: &str) -> Option<&Structured> {
        match self {
            Structured::Record(fields) => {
                fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
            }
            _ => None,
        }
    }
}

// One data item as seen by the decoder.  Map entries travel as pairs so a
// schema element with a key can match both halves at once.
#[derive(Debug, Clone)]
enum Item {
    Plain(Value),
    Entry(Value, Value),
}

impl Item {
    fn describe(&self) -> &'static str {
        match self {
            Item::Plain(v) => v.type_name(),
            Item::Entry(..) => "key-value entry",
        }
    }
}

// A rewindable cursor over data items.  Copying the cursor gives a cheap
// backup point for speculative matching.
#[derive(Clone, Copy)]
struct Stream<'a> {
    items: &'a [Item],
    pos: usize,
}

impl<'a> Stream<'a> {
    fn new(items: &'a [Item]) -> Stream<'a> {
        Stream { items, pos: 0 }
    }

    fn next_item(&mut self) -> CompileResult<&'a Item> {
        let item = self
            .items
            .get(self.pos)
            .ok_or_else(|| mismatch("another data item", "end of input"))?;
        self.pos += 1;
        Ok(item)
    }

    fn expect_empty(&self) -> CompileResult<()> {
        let leftover = self.items.len() - self.pos;
        if leftover > 0 {
            return Err(mismatch(
                "end of input",
                format!("{} unconsumed item(s)", leftover),
            ));
        }
        Ok(())
    }
}

// Decoder intermediate: the result of matching one schema element, before
// field names are attached.
#[derive(Debug)]
enum Raw {
    Plain(Structured),
    Entry {
        key: Option<Structured>,
        val: Structured,
    },
    Rep(Vec<Raw>),
}

/// Validates and transcodes data against one schema.
pub struct Translator<'t> {
    table: &'t SymbolTable,
}

impl<'t> Translator<'t> {
    /// Make a translator over a parsed rule table.
    pub fn new(table: &'t SymbolTable) -> Translator<'t> {
        Translator { table }
    }

    /// Decode `value` against the rule named `name`.
    pub fn decode(&self, name: &str, value: &Value) -> CompileResult<Structured> {
        let elem = self.table.lookup(name)?;
        let items = [Item::Plain(value.clone())];
        let mut stream = Stream::new(&items);
        let raw = self.decode_full(elem, &mut stream)?;
        stream.expect_empty()?;
        raw_into_structured(raw)
    }

    /// Validate `value` against the rule named `name`, discarding the
    /// structured result.
    pub fn validate(&self, name: &str, value: &Value) -> CompileResult<()> {
        self.decode(name, value).map(|_| ())
    }

    /// Encode a structured form back into a data value, the inverse of
    /// [`decode`](Translator::decode).
    pub fn encode(&self, name: &str, data: &Structured) -> CompileResult<Value> {
        let elem = self.table.lookup(name)?;
        let mut out = Vec::new();
        self.encode_child(elem, data, &mut out)?;
        if out.len() != 1 {
            return Err(CompileError::ValueError(format!(
                "expected a single top-level value, got {}",
                out.len()
            )));
        }
        match out.pop() {
            Some(Item::Plain(v)) => Ok(v),
            _ => Err(CompileError::ValueError(
                "top-level rule cannot be a key-value entry".into(),
            )),
        }
    }

    // Follow a chain of rule references to the concrete element.  Alias
    // cycles are rejected when the schema is compiled.
    fn resolve(&self, elem: &SchemaElement) -> CompileResult<&'t SchemaElement> {
        let mut name = elem
            .reference()
            .ok_or_else(|| CompileError::ValueError("not a reference".into()))?;
        loop {
            let target = self.table.lookup(name)?;
            match (target.kind(), target.reference()) {
                (Kind::Other, Some(next)) => name = next,
                _ => return Ok(target),
            }
        }
    }

    // ---- decoding ----

    // Match one element including its quantifier.  Extra instances beyond
    // min_qty are speculative: a mismatch rolls the cursor back and stops.
    fn decode_full(&self, elem: &SchemaElement, stream: &mut Stream) -> CompileResult<Raw> {
        if !elem.multi_var_condition() {
            return self.decode_obj(elem, stream);
        }
        let elided = elem.is_unambiguous_repeated(self.table);
        let mut instances = Vec::new();
        for _ in 0..elem.min_qty {
            let raw = self.decode_obj(elem, stream)?;
            instances.push(if elided { Raw::Plain(Structured::None) } else { raw });
        }
        for _ in elem.min_qty..elem.max_qty {
            let mut probe = *stream;
            match self.decode_obj(elem, &mut probe) {
                Ok(raw) => {
                    *stream = probe;
                    instances.push(if elided { Raw::Plain(Structured::None) } else { raw });
                }
                Err(e) if e.is_mismatch() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Raw::Rep(instances))
    }

    // Match one instance of an element.  May consume zero or more items.
    fn decode_obj(&self, elem: &SchemaElement, stream: &mut Stream) -> CompileResult<Raw> {
        if let Some(key) = &elem.key {
            return match stream.next_item()? {
                Item::Entry(k, v) => {
                    let key_res = self.decode_single(key, k)?;
                    let val_res = self.decode_single(elem, v)?;
                    let key_res = if key.is_unambiguous(self.table) {
                        None
                    } else {
                        Some(key_res)
                    };
                    Ok(Raw::Entry {
                        key: key_res,
                        val: val_res,
                    })
                }
                item => Err(mismatch("key-value entry", item.describe())),
            };
        }
        if !elem.tags.is_empty() {
            // A tag forces single-item handling even for quantified input.
            let mut probe = *stream;
            if let Ok(Item::Plain(value)) = probe.next_item() {
                if matches!(value, Value::Tag(..)) {
                    let res = self.decode_single(elem, value)?;
                    *stream = probe;
                    return Ok(Raw::Plain(res));
                }
            }
        }
        match elem.kind() {
            Kind::Other => {
                let target = self.resolve(elem)?;
                self.decode_full(target, stream)
            }
            Kind::Group => {
                let mut fields = Vec::new();
                for child in elem.children() {
                    let raw = self.decode_full(child, stream)?;
                    self.add_if(child, &mut fields, raw, child.key.is_some(), None)?;
                }
                Ok(Raw::Plain(construct(fields)))
            }
            Kind::Union => self.decode_union(elem, stream),
            _ => match stream.next_item()? {
                Item::Plain(value) => Ok(Raw::Plain(self.decode_single(elem, value)?)),
                item => Err(mismatch(elem.kind().lower(), item.describe())),
            },
        }
    }

    // Try each union branch in order against a fresh copy of the cursor.
    fn decode_union(&self, elem: &SchemaElement, stream: &mut Stream) -> CompileResult<Raw> {
        for child in elem.children() {
            let mut probe = *stream;
            match self.decode_full(child, &mut probe) {
                Ok(raw) => {
                    let mut fields = Vec::new();
                    self.add_if(child, &mut fields, raw, false, None)?;
                    fields.push((
                        "union_choice".to_string(),
                        Structured::Value(Value::Text(child.field_name())),
                    ));
                    *stream = probe;
                    return Ok(Raw::Plain(construct(fields)));
                }
                Err(e) if e.is_mismatch() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(mismatch("any branch of the union", "no matching data"))
    }

    // Match a single data value, repetitions and keys already handled.
    fn decode_single(&self, elem: &SchemaElement, value: &Value) -> CompileResult<Structured> {
        // Every expected tag must be present on the data, outermost first.
        // Any further tags only match `any`.
        let mut value = value;
        for tag in &elem.tags {
            match value {
                Value::Tag(t, inner) if t == tag => value = inner.as_ref(),
                Value::Tag(t, _) => {
                    return Err(mismatch(format!("tag {}", tag), format!("tag {}", t)))
                }
                other => return Err(mismatch(format!("tag {}", tag), other.type_name())),
            }
        }
        if matches!(value, Value::Tag(..)) && elem.kind() != Kind::Any {
            return Err(mismatch(elem.kind().lower(), "tagged value"));
        }
        self.check_type(elem, value)?;
        self.check_value(elem, value)?;
        match elem.kind() {
            Kind::Bstr if elem.cbor_var_condition(self.table, &[]) => {
                let bytes = match value {
                    Value::Bytes(b) => b,
                    other => return Err(mismatch("bytes", other.type_name())),
                };
                self.decode_nested(elem, bytes)
            }
            Kind::Uint
            | Kind::Int
            | Kind::Nint
            | Kind::Float
            | Kind::Tstr
            | Kind::Bstr
            | Kind::Bool
            | Kind::Nil
            | Kind::Any => Ok(Structured::Value(value.clone())),
            Kind::Other => {
                let target = self.resolve(elem)?;
                self.decode_single(target, value)
            }
            Kind::List => {
                let array = match value {
                    Value::Array(a) => a,
                    other => return Err(mismatch("array", other.type_name())),
                };
                let items: Vec<Item> = array.iter().cloned().map(Item::Plain).collect();
                let mut stream = Stream::new(&items);
                let mut fields = Vec::new();
                for child in elem.children() {
                    let raw = self.decode_full(child, &mut stream)?;
                    self.add_if(child, &mut fields, raw, false, None)?;
                }
                stream.expect_empty()?;
                Ok(construct(fields))
            }
            Kind::Map => {
                let map = match value {
                    Value::Map(m) => m,
                    other => return Err(mismatch("map", other.type_name())),
                };
                let mut pool: Vec<(Value, Value)> =
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let mut fields = Vec::new();
                for child in elem.children() {
                    let raw = self.decode_map_full(child, &mut pool)?;
                    self.add_if(child, &mut fields, raw, true, None)?;
                }
                if !pool.is_empty() {
                    return Err(mismatch(
                        "end of map",
                        format!("{} extra entries", pool.len()),
                    ));
                }
                Ok(construct(fields))
            }
            Kind::Union => {
                for child in elem.children() {
                    match self.decode_single(child, value) {
                        Ok(obj) => {
                            let mut fields = Vec::new();
                            self.add_if(child, &mut fields, Raw::Plain(obj), false, None)?;
                            fields.push((
                                "union_choice".to_string(),
                                Structured::Value(Value::Text(child.field_name())),
                            ));
                            return Ok(construct(fields));
                        }
                        Err(e) if e.is_mismatch() => continue,
                        Err(e) => return Err(e),
                    }
                }
                Err(mismatch("any branch of the union", value.type_name()))
            }
            Kind::Group => Err(CompileError::ValueError(
                "group in single-value position".into(),
            )),
        }
    }

    // Match one map member including its quantifier.  Members are found by
    // searching the remaining entries, since map order carries no meaning.
    fn decode_map_full(
        &self,
        elem: &SchemaElement,
        pool: &mut Vec<(Value, Value)>,
    ) -> CompileResult<Raw> {
        if !elem.multi_var_condition() {
            return match self.decode_map_instance(elem, pool)? {
                Some(raw) => Ok(raw),
                None => Err(mismatch(
                    format!("map entry {}", elem.field_name()),
                    "no matching entry",
                )),
            };
        }
        let elided = elem.is_unambiguous_repeated(self.table);
        let mut instances = Vec::new();
        while (instances.len() as u64) < elem.max_qty {
            match self.decode_map_instance(elem, pool)? {
                Some(raw) => {
                    instances.push(if elided { Raw::Plain(Structured::None) } else { raw })
                }
                None => break,
            }
        }
        if (instances.len() as u64) < elem.min_qty {
            return Err(mismatch(
                format!(
                    "at least {} of map entry {}",
                    elem.min_qty,
                    elem.field_name()
                ),
                format!("{}", instances.len()),
            ));
        }
        Ok(Raw::Rep(instances))
    }

    // Match a single instance of a map member, removing the entries it
    // consumes.  Returns None when nothing in the pool matches.
    fn decode_map_instance(
        &self,
        elem: &SchemaElement,
        pool: &mut Vec<(Value, Value)>,
    ) -> CompileResult<Option<Raw>> {
        if let Some(key_elem) = elem.key.as_deref() {
            for i in 0..pool.len() {
                let (k, v) = &pool[i];
                let key_res = match self.decode_single(key_elem, k) {
                    Ok(res) => res,
                    Err(e) if e.is_mismatch() => continue,
                    Err(e) => return Err(e),
                };
                match self.decode_single(elem, v) {
                    Ok(val_res) => {
                        pool.remove(i);
                        let key_res = if key_elem.is_unambiguous(self.table) {
                            None
                        } else {
                            Some(key_res)
                        };
                        return Ok(Some(Raw::Entry {
                            key: key_res,
                            val: val_res,
                        }));
                    }
                    Err(e) if e.is_mismatch() => continue,
                    Err(e) => return Err(e),
                }
            }
            return Ok(None);
        }
        match elem.kind() {
            Kind::Other => {
                let target = self.resolve(elem)?;
                self.decode_map_instance(target, pool)
            }
            Kind::Group => {
                let snapshot = pool.clone();
                let mut fields = Vec::new();
                for child in elem.children() {
                    match self.decode_map_full(child, pool) {
                        Ok(raw) => self.add_if(child, &mut fields, raw, true, None)?,
                        Err(e) if e.is_mismatch() => {
                            *pool = snapshot;
                            return Ok(None);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Some(Raw::Plain(construct(fields))))
            }
            Kind::Union => {
                for branch in elem.children() {
                    let snapshot = pool.clone();
                    match self.decode_map_full(branch, pool) {
                        Ok(raw) => {
                            let mut fields = Vec::new();
                            self.add_if(branch, &mut fields, raw, true, None)?;
                            fields.push((
                                "union_choice".to_string(),
                                Structured::Value(Value::Text(branch.field_name())),
                            ));
                            return Ok(Some(Raw::Plain(construct(fields))));
                        }
                        Err(e) if e.is_mismatch() => {
                            *pool = snapshot;
                            continue;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(None)
            }
            _ => Err(CompileError::ValueError(format!(
                "map member {} has no key",
                elem.field_name()
            ))),
        }
    }

    // Decode the CBOR payload inside a byte string.
    fn decode_nested(&self, elem: &SchemaElement, bytes: &[u8]) -> CompileResult<Structured> {
        let inner = match &elem.cbor {
            Some(inner) => inner,
            None => return Err(CompileError::ValueError("no nested schema".into())),
        };
        let values = if elem.cbor_seq {
            crate::cbor::decode_seq(bytes)?
        } else {
            vec![crate::cbor::decode(bytes)?]
        };
        let items: Vec<Item> = values.into_iter().map(Item::Plain).collect();
        let mut stream = Stream::new(&items);
        let raw = self.decode_full(inner, &mut stream)?;
        stream.expect_empty()?;
        raw_into_structured(raw)
    }

    fn check_type(&self, elem: &SchemaElement, value: &Value) -> CompileResult<()> {
        if self.type_matches(elem, value)? {
            Ok(())
        } else {
            Err(mismatch(elem.kind().lower(), value.type_name()))
        }
    }

    fn type_matches(&self, elem: &SchemaElement, value: &Value) -> CompileResult<bool> {
        let ok = match elem.kind() {
            Kind::Uint => matches!(value, Value::Integer(i) if *i >= 0),
            Kind::Nint => matches!(value, Value::Integer(i) if *i < 0),
            Kind::Int => matches!(value, Value::Integer(_)),
            Kind::Float => matches!(value, Value::Float(_)),
            Kind::Tstr => matches!(value, Value::Text(_)),
            Kind::Bstr => matches!(value, Value::Bytes(_)),
            Kind::Bool => matches!(value, Value::Bool(_)),
            Kind::Nil => matches!(value, Value::Null),
            Kind::Any => true,
            Kind::List => matches!(value, Value::Array(_)),
            Kind::Map => matches!(value, Value::Map(_)),
            Kind::Union => {
                for child in elem.children() {
                    if self.type_matches(child, value)? {
                        return Ok(true);
                    }
                }
                false
            }
            Kind::Group => match elem.children().first() {
                Some(first) => self.type_matches(first, value)?,
                None => true,
            },
            Kind::Other => {
                let target = self.resolve(elem)?;
                self.type_matches(target, value)?
            }
        };
        Ok(ok)
    }

    fn check_value(&self, elem: &SchemaElement, value: &Value) -> CompileResult<()> {
        if let Some(lit) = elem.literal() {
            if !literal_matches(lit, value) {
                return Err(mismatch(format!("{}", lit), format!("{:?}", value)));
            }
        }
        match value {
            Value::Integer(i) => {
                if let Some(min) = elem.min_value {
                    if *i < min {
                        return Err(mismatch(format!(">= {}", min), format!("{}", i)));
                    }
                }
                if let Some(max) = elem.max_value {
                    if *i > max {
                        return Err(mismatch(format!("<= {}", max), format!("{}", i)));
                    }
                }
            }
            Value::Float(f) => {
                if let Some(min) = elem.min_value {
                    if f.0 < min as f64 {
                        return Err(mismatch(format!(">= {}", min), format!("{}", f.0)));
                    }
                }
                if let Some(max) = elem.max_value {
                    if f.0 > max as f64 {
                        return Err(mismatch(format!("<= {}", max), format!("{}", f.0)));
                    }
                }
            }
            Value::Text(s) => self.check_size(elem, s.len())?,
            Value::Bytes(b) => self.check_size(elem, b.len())?,
            _ => {}
        }
        Ok(())
    }

    fn check_size(&self, elem: &SchemaElement, len: usize) -> CompileResult<()> {
        if let Some(min) = elem.min_size {
            if (len as u64) < min {
                return Err(mismatch(
                    format!("length >= {}", min),
                    format!("length {}", len),
                ));
            }
        }
        if let Some(max) = elem.max_size {
            if (len as u64) > max {
                return Err(mismatch(
                    format!("length <= {}", max),
                    format!("length {}", len),
                ));
            }
        }
        Ok(())
    }

    // Attach a decoded result to the enclosing record, eliding values the
    // schema determines and splitting key-value entries into two fields.
    fn add_if(
        &self,
        elem: &SchemaElement,
        fields: &mut Vec<(String, Structured)>,
        raw: Raw,
        expect_key: bool,
        name: Option<String>,
    ) -> CompileResult<()> {
        if expect_key && elem.kind() == Kind::Other && elem.key.is_none() {
            let target = self.resolve(elem)?;
            return self.add_if(target, fields, raw, false, None);
        }
        if elem.is_unambiguous(self.table) {
            return Ok(());
        }
        let obj = match raw {
            Raw::Plain(s) => s,
            Raw::Entry { key, val } => {
                if let (Some(key_obj), Some(key_elem)) = (key, elem.key.as_deref()) {
                    let key_name = format!("{}_key", elem.field_name());
                    self.add_if(
                        key_elem,
                        fields,
                        Raw::Plain(key_obj),
                        false,
                        Some(key_name),
                    )?;
                }
                val
            }
            Raw::Rep(instances) => {
                let mut converted = Vec::with_capacity(instances.len());
                for instance in instances {
                    match instance {
                        Raw::Plain(s) => converted.push(s),
                        entry @ Raw::Entry { .. } => {
                            let mut sub = Vec::new();
                            self.add_if(elem, &mut sub, entry, false, None)?;
                            converted.push(construct(sub));
                        }
                        Raw::Rep(_) => {
                            return Err(CompileError::ValueError(
                                "nested repetition".into(),
                            ));
                        }
                    }
                }
                Structured::Repeated(converted)
            }
        };
        fields.push((name.unwrap_or_else(|| elem.field_name()), obj));
        Ok(())
    }

    // ---- encoding ----

    // The structured data holding this element's content.  A named root's
    // data is the context itself; its derived field name can collide with a
    // child field (`Pair = [int, tstr]` is named after its first child), so
    // it must never be looked up by name.
    fn slot_for<'s>(
        &self,
        elem: &SchemaElement,
        name: &str,
        ctx: &'s Structured,
    ) -> &'s Structured {
        if elem.named_root {
            ctx
        } else {
            ctx.field(name).unwrap_or(ctx)
        }
    }

    // Emit the items for one schema element, honoring its quantifier.
    // `ctx` is the record holding this element's fields.
    fn encode_child(
        &self,
        elem: &SchemaElement,
        ctx: &Structured,
        out: &mut Vec<Item>,
    ) -> CompileResult<()> {
        if elem.is_unambiguous(self.table) {
            for _ in 0..elem.min_qty {
                self.emit_fixed(elem, out)?;
            }
            return Ok(());
        }
        if !elem.multi_var_condition() {
            return self.encode_instance(elem, ctx, out);
        }
        let name = elem.field_name();
        let slot = self.slot_for(elem, &name, ctx);
        let instances: Vec<&Structured> = match slot {
            Structured::Repeated(xs) => xs.iter().collect(),
            Structured::None => Vec::new(),
            other => vec![other],
        };
        let count = instances.len() as u64;
        if count < elem.min_qty || count > elem.max_qty {
            return Err(CompileError::ValueError(format!(
                "{}: {} instance(s), expected {}..{}",
                name, count, elem.min_qty, elem.max_qty
            )));
        }
        for instance in instances {
            self.encode_instance(elem, instance, out)?;
        }
        Ok(())
    }

    // Emit one instance.  `ctx` is either the enclosing record or, for a
    // repeated element, one entry of its repetition list.
    fn encode_instance(
        &self,
        elem: &SchemaElement,
        ctx: &Structured,
        out: &mut Vec<Item>,
    ) -> CompileResult<()> {
        let name = elem.field_name();
        if let Some(key) = elem.key.as_deref() {
            let key_value = if key.is_unambiguous(self.table) {
                self.fixed_value(key)?
            } else {
                let key_name = format!("{}_key", name);
                let key_slot = ctx.field(&key_name).ok_or_else(|| {
                    CompileError::ValueError(format!("missing field {}", key_name))
                })?;
                self.encode_value(key, key_slot)?
            };
            let slot = self.slot_for(elem, &name, ctx);
            let value = self.encode_value(elem, slot)?;
            out.push(Item::Entry(key_value, value));
            return Ok(());
        }
        let slot = self.slot_for(elem, &name, ctx);
        match elem.kind() {
            Kind::Other => {
                let target = self.resolve(elem)?;
                self.encode_instance(target, slot, out)
            }
            Kind::Group => {
                for child in elem.children() {
                    self.encode_child(child, slot, out)?;
                }
                Ok(())
            }
            Kind::Union => {
                let chosen = self.union_choice(elem, slot)?;
                self.encode_child(chosen, slot, out)
            }
            _ => {
                out.push(Item::Plain(self.encode_value(elem, slot)?));
                Ok(())
            }
        }
    }

    // Encode a single value, the inverse of decode_single.
    fn encode_value(&self, elem: &SchemaElement, slot: &Structured) -> CompileResult<Value> {
        let base = match elem.kind() {
            Kind::Nil => Value::Null,
            Kind::Other => {
                // resolve() lands on a table entry; its data is `slot` itself.
                let target = self.resolve(elem)?;
                self.encode_value(target, slot)?
            }
            Kind::Bstr if elem.cbor_var_condition(self.table, &[]) => {
                self.encode_nested(elem, slot)?
            }
            Kind::Uint
            | Kind::Int
            | Kind::Nint
            | Kind::Float
            | Kind::Tstr
            | Kind::Bstr
            | Kind::Bool => match elem.literal() {
                Some(lit) => literal_value(lit),
                None => match slot {
                    Structured::Value(v) => {
                        // The data must satisfy the schema on the way out
                        // too, or the emitted bytes would not validate.
                        self.check_type(elem, v)?;
                        self.check_value(elem, v)?;
                        v.clone()
                    }
                    other => {
                        return Err(CompileError::ValueError(format!(
                            "{}: expected a plain value, got {:?}",
                            elem.field_name(),
                            other
                        )))
                    }
                },
            },
            Kind::Any => match slot {
                Structured::Value(v) => v.clone(),
                other => {
                    return Err(CompileError::ValueError(format!(
                        "{}: expected a plain value, got {:?}",
                        elem.field_name(),
                        other
                    )))
                }
            },
            Kind::List => {
                let mut items = Vec::new();
                for child in elem.children() {
                    self.encode_child(child, slot, &mut items)?;
                }
                let mut array = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Item::Plain(v) => array.push(v),
                        Item::Entry(..) => {
                            return Err(CompileError::ValueError(
                                "key-value entry inside an array".into(),
                            ))
                        }
                    }
                }
                Value::Array(array)
            }
            Kind::Map => {
                let mut items = Vec::new();
                for child in elem.children() {
                    self.encode_child(child, slot, &mut items)?;
                }
                let mut map = BTreeMap::new();
                for item in items {
                    match item {
                        Item::Entry(k, v) => {
                            map.insert(k, v);
                        }
                        Item::Plain(_) => {
                            return Err(CompileError::ValueError(
                                "plain value inside a map".into(),
                            ))
                        }
                    }
                }
                Value::Map(map)
            }
            Kind::Union => {
                let chosen = self.union_choice(elem, slot)?;
                if chosen.is_unambiguous(self.table) {
                    self.fixed_value(chosen)?
                } else {
                    let inner = slot.field(&chosen.field_name()).unwrap_or(slot);
                    self.encode_value(chosen, inner)?
                }
            }
            Kind::Group => {
                return Err(CompileError::ValueError(
                    "group in single-value position".into(),
                ))
            }
        };
        Ok(wrap_tags(elem, base))
    }

    // Serialize the nested schema back into a byte string.
    fn encode_nested(&self, elem: &SchemaElement, slot: &Structured) -> CompileResult<Value> {
        // Raw bytes pass through untouched.
        if let Structured::Value(Value::Bytes(b)) = slot {
            return Ok(Value::Bytes(b.clone()));
        }
        let inner = match &elem.cbor {
            Some(inner) => inner,
            None => return Err(CompileError::ValueError("no nested schema".into())),
        };
        let mut items = Vec::new();
        self.encode_child(inner, slot, &mut items)?;
        let mut bytes = Vec::new();
        for item in items {
            match item {
                Item::Plain(v) => bytes.extend(crate::cbor::encode(&v)?),
                Item::Entry(..) => {
                    return Err(CompileError::ValueError(
                        "key-value entry inside a byte string".into(),
                    ))
                }
            }
        }
        Ok(Value::Bytes(bytes))
    }

    fn union_choice<'e>(
        &self,
        elem: &'e SchemaElement,
        slot: &Structured,
    ) -> CompileResult<&'e SchemaElement> {
        let choice = match slot.field("union_choice") {
            Some(Structured::Value(Value::Text(s))) => s.clone(),
            _ => {
                return Err(CompileError::ValueError(format!(
                    "{}: missing union_choice field",
                    elem.field_name()
                )))
            }
        };
        elem.children()
            .iter()
            .find(|c| c.field_name() == choice)
            .ok_or_else(|| {
                CompileError::ValueError(format!("unknown union_choice {}", choice))
            })
    }

    // Emit an element whose content is fixed by the schema.
    fn emit_fixed(&self, elem: &SchemaElement, out: &mut Vec<Item>) -> CompileResult<()> {
        if let Some(key) = elem.key.as_deref() {
            out.push(Item::Entry(self.fixed_value(key)?, self.fixed_value(elem)?));
            return Ok(());
        }
        if elem.kind() == Kind::Group {
            // An unambiguous group is empty.
            return Ok(());
        }
        out.push(Item::Plain(self.fixed_value(elem)?));
        Ok(())
    }

    // The single value of a schema-determined element.
    fn fixed_value(&self, elem: &SchemaElement) -> CompileResult<Value> {
        let base = match elem.kind() {
            Kind::Nil => Value::Null,
            Kind::Other => {
                let target = self.resolve(elem)?;
                return Ok(wrap_tags(elem, self.fixed_value(target)?));
            }
            Kind::Bstr if elem.cbor.is_some() => {
                let inner = elem.cbor.as_deref().ok_or_else(|| {
                    CompileError::ValueError("no nested schema".into())
                })?;
                Value::Bytes(crate::cbor::encode(&self.fixed_value(inner)?)?)
            }
            Kind::List => Value::Array(Vec::new()),
            Kind::Map => Value::Map(BTreeMap::new()),
            _ => match elem.literal() {
                Some(lit) => literal_value(lit),
                None => {
                    return Err(CompileError::ValueError(format!(
                        "{}: value is not schema-determined",
                        elem.field_name()
                    )))
                }
            },
        };
        Ok(wrap_tags(elem, base))
    }
}

// Collapse a field list into a record, removing redundant nesting the way
// a reader would expect: a lone field's value loses its single-member
// record wrappers, and a one-instance repetition of a record with a
// matching name unwraps to the bare value.
fn construct(fields: Vec<(String, Structured)>) -> Structured {
    if fields.is_empty() {
        return Structured::None;
    }
    let single = fields.len() == 1;
    let fields: Vec<(String, Structured)> = fields
        .into_iter()
        .map(|(name, value)| {
            let value = if single { flatten_obj(value) } else { value };
            let value = flatten_list(&name, value);
            (name, value)
        })
        .collect();
    Structured::Record(fields)
}

fn flatten_obj(obj: Structured) -> Structured {
    match obj {
        Structured::Record(mut fields) if fields.len() == 1 => {
            flatten_obj(fields.swap_remove(0).1)
        }
        other => other,
    }
}

fn flatten_list(name: &str, obj: Structured) -> Structured {
    if let Structured::Repeated(items) = &obj {
        if items.len() == 1 {
            if let Structured::Record(fields) = &items[0] {
                if fields.len() == 1 && fields[0].0 == name {
                    return Structured::Repeated(vec![fields[0].1.clone()]);
                }
            }
        }
    }
    obj
}

fn raw_into_structured(raw: Raw) -> CompileResult<Structured> {
    match raw {
        Raw::Plain(s) => Ok(s),
        Raw::Entry { .. } => Err(CompileError::ValueError(
            "unexpected key-value entry".into(),
        )),
        Raw::Rep(instances) => {
            let mut out = Vec::with_capacity(instances.len());
            for instance in instances {
                out.push(raw_into_structured(instance)?);
            }
            Ok(Structured::Repeated(out))
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Integer(*i),
        Literal::Float(f) => Value::from_float(*f),
        Literal::Text(s) => Value::Text(s.clone()),
        Literal::Bytes(b) => Value::Bytes(b.clone()),
    }
}

fn literal_matches(lit: &Literal, value: &Value) -> bool {
    match (lit, value) {
        (Literal::Bool(a), Value::Bool(b)) => a == b,
        (Literal::Int(a), Value::Integer(b)) => a == b,
        (Literal::Float(a), Value::Float(b)) => *a == b.0,
        (Literal::Text(a), Value::Text(b)) => a == b,
        (Literal::Bytes(a), Value::Bytes(b)) => a == b,
        _ => false,
    }
}

fn wrap_tags(elem: &SchemaElement, mut value: Value) -> Value {
    for tag in elem.tags.iter().rev() {
        value = Value::Tag(*tag, Box::new(value));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    fn translate(cddl: &str) -> SymbolTable {
        parse_schema(cddl, 3).unwrap()
    }

    fn text(s: &str) -> Value {
        Value::Text(s.into())
    }

    #[test]
    fn decode_fixed_list() {
        let table = translate("Pair = [int, tstr]");
        let tr = Translator::new(&table);
        let data = Value::Array(vec![Value::Integer(5), text("hi")]);
        let decoded = tr.decode("Pair", &data).unwrap();
        let expected = Structured::Record(vec![
            ("int".into(), Structured::Value(Value::Integer(5))),
            ("tstr".into(), Structured::Value(text("hi"))),
        ]);
        assert_eq!(decoded, expected);
    }

    #[test]
    fn wrong_arity_rejected() {
        let table = translate("Pair = [int, tstr]");
        let tr = Translator::new(&table);
        let data = Value::Array(vec![Value::Integer(5)]);
        assert!(tr.validate("Pair", &data).is_err());
    }

    #[test]
    fn optional_element() {
        let table = translate("Opt = [? uint]");
        let tr = Translator::new(&table);
        assert!(tr.validate("Opt", &Value::Array(vec![])).is_ok());
        assert!(tr
            .validate("Opt", &Value::Array(vec![Value::Integer(7)]))
            .is_ok());
        assert!(tr
            .validate(
                "Opt",
                &Value::Array(vec![Value::Integer(7), Value::Integer(8)])
            )
            .is_err());
    }

    #[test]
    fn uint_rejects_negative() {
        let table = translate("N = uint");
        let tr = Translator::new(&table);
        assert!(tr.validate("N", &Value::Integer(-1)).is_err());
        assert!(tr.validate("N", &Value::Integer(0)).is_ok());
    }

    #[test]
    fn union_decodes_choice() {
        let table = translate("U = uint / tstr");
        let tr = Translator::new(&table);
        let decoded = tr.decode("U", &text("x")).unwrap();
        assert_eq!(
            decoded.field("union_choice"),
            Some(&Structured::Value(text("tstr")))
        );
    }

    #[test]
    fn literal_elided_and_restored() {
        let table = translate("L = [1, uint]");
        let tr = Translator::new(&table);
        let data = Value::Array(vec![Value::Integer(1), Value::Integer(9)]);
        let decoded = tr.decode("L", &data).unwrap();
        // The fixed leading 1 is elided from the structured form.
        let expected = Structured::Record(vec![(
            "uint".into(),
            Structured::Value(Value::Integer(9)),
        )]);
        assert_eq!(decoded, expected);
        let encoded = tr.encode("L", &decoded).unwrap();
        assert_eq!(encoded, data);
    }

    #[test]
    fn literal_mismatch_rejected() {
        let table = translate("L = [1, uint]");
        let tr = Translator::new(&table);
        let data = Value::Array(vec![Value::Integer(2), Value::Integer(9)]);
        assert!(tr.validate("L", &data).is_err());
    }

    #[test]
    fn map_key_matching() {
        let table = translate("M = {\"name\": tstr, \"id\": uint}");
        let tr = Translator::new(&table);
        let mut map = BTreeMap::new();
        map.insert(text("name"), text("ada"));
        map.insert(text("id"), Value::Integer(1));
        let decoded = tr.decode("M", &Value::Map(map.clone())).unwrap();
        let encoded = tr.encode("M", &decoded).unwrap();
        assert_eq!(encoded, Value::Map(map));
    }

    #[test]
    fn size_range_enforced() {
        let table = translate("S = tstr .size (2..3)");
        let tr = Translator::new(&table);
        assert!(tr.validate("S", &text("a")).is_err());
        assert!(tr.validate("S", &text("ab")).is_ok());
        assert!(tr.validate("S", &text("abcd")).is_err());
    }

    #[test]
    fn round_trip_repeated() {
        let table = translate("R = [* uint]");
        let tr = Translator::new(&table);
        let data = Value::Array(vec![Value::Integer(1), Value::Integer(2)]);
        let decoded = tr.decode("R", &data).unwrap();
        let encoded = tr.encode("R", &decoded).unwrap();
        assert_eq!(encoded, data);
    }

    #[test]
    fn tag_checked() {
        let table = translate("T = #6.32 tstr");
        let tr = Translator::new(&table);
        let good = Value::Tag(32, Box::new(text("u")));
        let bad = Value::Tag(33, Box::new(text("u")));
        assert!(tr.validate("T", &good).is_ok());
        assert!(tr.validate("T", &bad).is_err());
        // Tags are restored on encode.
        let decoded = tr.decode("T", &good).unwrap();
        assert_eq!(tr.encode("T", &decoded).unwrap(), good);
    }

    #[test]
    fn nested_cbor_payload() {
        let table = translate("W = bstr .cbor Inner\nInner = uint");
        let tr = Translator::new(&table);
        // 0x07 is the one-byte encoding of 7.
        let data = Value::Bytes(vec![0x07]);
        let decoded = tr.decode("W", &data).unwrap();
        assert_eq!(decoded, Structured::Value(Value::Integer(7)));
        assert_eq!(tr.encode("W", &decoded).unwrap(), data);
    }
}
