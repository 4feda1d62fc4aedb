//! This module declares a generic Value enum for use with transcoding.

use std::collections::BTreeMap;
use std::fmt;

use float_ord::FloatOrd;

/// `Value` represents all the types of data we can decode or encode.
///
/// Each concrete data format converts to and from this enum; see the
/// [`cbor`] and [`bridge`] modules.
///
/// [`cbor`]: crate::cbor
/// [`bridge`]: crate::bridge
///
#[derive(Clone, Eq, Ord, PartialEq, PartialOrd)]
#[allow(missing_docs)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i128),
    Float(FloatOrd<f64>),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<Value>),
    Map(BTreeMap<Value, Value>),
    Tag(u64, Box<Value>),
}

// FloatOrd doesn't implement Debug, so we have to do all the work by hand.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(x) => x.fmt(f),
            Value::Integer(x) => x.fmt(f),
            Value::Float(x) => x.0.fmt(f),
            Value::Bytes(x) => x.fmt(f),
            Value::Text(x) => x.fmt(f),
            Value::Array(x) => x.fmt(f),
            Value::Map(x) => x.fmt(f),
            Value::Tag(t, x) => write!(f, "{}({:?})", t, x),
        }
    }
}

impl Value {
    // Only exists so callers don't need to use/see float_ord::FloatOrd
    pub(crate) fn from_float<F: Into<f64>>(f: F) -> Value {
        Value::Float(FloatOrd(f.into()))
    }

    /// A short name for the value's type, used in mismatch errors.
    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Tag(..) => "tag",
        }
    }
}
