//! This module implements conversions to and from [`serde_cbor::Value`].
//!
//! Validation and transcoding work on the generic [`Value`] type; this is
//! where CBOR bytes enter and leave that world.

use crate::util::{CompileError, CompileResult};
use crate::value::Value;
use serde::Deserialize;
use serde_cbor::Value as CBOR_Value;

// These conversions seem obvious and pointless, but over time they may
// diverge.  However, CDDL and CBOR were designed to work with one another, so
// it's not surprising that they map almost perfectly.
impl From<&CBOR_Value> for Value {
    fn from(value: &CBOR_Value) -> Value {
        match value {
            CBOR_Value::Null => Value::Null,
            CBOR_Value::Bool(b) => Value::Bool(*b),
            CBOR_Value::Integer(i) => Value::Integer(*i),
            CBOR_Value::Float(f) => Value::from_float(*f),
            CBOR_Value::Bytes(b) => Value::Bytes(b.clone()),
            CBOR_Value::Text(t) => Value::Text(t.clone()),
            CBOR_Value::Array(a) => {
                let array = a.iter().map(Value::from).collect();
                Value::Array(array)
            }
            CBOR_Value::Map(m) => {
                let map = m
                    .iter()
                    .map(|(k, v)| (Value::from(k), Value::from(v)))
                    .collect();
                Value::Map(map)
            }
            CBOR_Value::Tag(t, v) => Value::Tag(*t, Box::new(Value::from(v.as_ref()))),
            _ => panic!("can't handle hidden cbor Value"),
        }
    }
}

// A variant that consumes the CBOR Value.
impl From<CBOR_Value> for Value {
    fn from(value: CBOR_Value) -> Value {
        Value::from(&value)
    }
}

impl From<&Value> for CBOR_Value {
    fn from(value: &Value) -> CBOR_Value {
        match value {
            Value::Null => CBOR_Value::Null,
            Value::Bool(b) => CBOR_Value::Bool(*b),
            Value::Integer(i) => CBOR_Value::Integer(*i),
            Value::Float(f) => CBOR_Value::Float(f.0),
            Value::Bytes(b) => CBOR_Value::Bytes(b.clone()),
            Value::Text(t) => CBOR_Value::Text(t.clone()),
            Value::Array(a) => {
                let array = a.iter().map(CBOR_Value::from).collect();
                CBOR_Value::Array(array)
            }
            Value::Map(m) => {
                let map = m
                    .iter()
                    .map(|(k, v)| (CBOR_Value::from(k), CBOR_Value::from(v)))
                    .collect();
                CBOR_Value::Map(map)
            }
            Value::Tag(t, v) => CBOR_Value::Tag(*t, Box::new(CBOR_Value::from(v.as_ref()))),
        }
    }
}

/// Decode one CBOR value from a byte string.  Trailing bytes are an error.
pub fn decode(bytes: &[u8]) -> CompileResult<Value> {
    let cbor_value: CBOR_Value = serde_cbor::from_slice(bytes)
        .map_err(|e| CompileError::ValueError(format!("cbor parsing failed: {}", e)))?;
    Ok(Value::from(cbor_value))
}

/// Decode a CBOR sequence: zero or more back-to-back values.
pub fn decode_seq(bytes: &[u8]) -> CompileResult<Vec<Value>> {
    let mut deserializer = serde_cbor::Deserializer::from_slice(bytes);
    let mut out = Vec::new();
    loop {
        match CBOR_Value::deserialize(&mut deserializer) {
            Ok(cbor_value) => out.push(Value::from(cbor_value)),
            Err(e) if e.is_eof() => break,
            Err(e) => {
                return Err(CompileError::ValueError(format!(
                    "cbor parsing failed: {}",
                    e
                )))
            }
        }
    }
    Ok(out)
}

/// Encode a value as CBOR bytes.
pub fn encode(value: &Value) -> CompileResult<Vec<u8>> {
    serde_cbor::to_vec(&CBOR_Value::from(value))
        .map_err(|e| CompileError::ValueError(format!("cbor encoding failed: {}", e)))
}

/// Format CBOR bytes as a C `uint8_t` array initialization.
pub fn to_c_array(bytes: &[u8], var_name: &str) -> String {
    let body: Vec<String> = bytes.iter().map(|b| format!("{:#04x}", b)).collect();
    format!("uint8_t {}[] = {{{}}};\n", var_name, body.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_basic() {
        let value = Value::Array(vec![Value::Integer(5), Value::Text("hi".into())]);
        let bytes = encode(&value).unwrap();
        assert_eq!(bytes, vec![0x82, 0x05, 0x62, 0x68, 0x69]);
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn trailing_bytes_rejected() {
        assert!(decode(&[0x05, 0x06]).is_err());
        assert_eq!(
            decode_seq(&[0x05, 0x06]).unwrap(),
            vec![Value::Integer(5), Value::Integer(6)]
        );
        assert_eq!(decode_seq(&[]).unwrap(), Vec::<Value>::new());
    }

    #[test]
    fn c_array_format() {
        assert_eq!(
            to_c_array(&[0x82, 0x05], "data"),
            "uint8_t data[] = {0x82, 0x05};\n"
        );
    }
}
