//! Conversions between [`Value`] and JSON or YAML documents.
//!
//! JSON and YAML cannot represent everything CBOR can, so a few conventions
//! bridge the gap:
//!
//! - A byte string becomes `{"bstr": ...}`, holding either the hex text of
//!   the bytes or, when the bytes are themselves a complete CBOR encoding,
//!   the decoded document.
//! - A tagged value becomes `{"tag": n, "val": ...}`.
//! - A map entry whose key is not text becomes `"keyvalN": {"key": ...,
//!   "val": ...}`, with `N` counting up from zero within each map.
//!
//! The conversions are inverses of each other, so data can round-trip
//! through either text format.

use crate::util::{CompileError, CompileResult};
use crate::value::Value;
use serde_json::Value as JSON_Value;
use std::collections::BTreeMap;
use std::convert::TryFrom;

fn value_error<T: std::fmt::Display>(msg: T) -> CompileError {
    CompileError::ValueError(format!("{}", msg))
}

/// Convert a data value into its JSON bridge form.
pub fn value_to_json(value: &Value) -> CompileResult<JSON_Value> {
    let json = match value {
        Value::Null => JSON_Value::Null,
        Value::Bool(b) => JSON_Value::Bool(*b),
        Value::Integer(i) => {
            if let Ok(n) = i64::try_from(*i) {
                JSON_Value::from(n)
            } else if let Ok(n) = u64::try_from(*i) {
                JSON_Value::from(n)
            } else {
                return Err(value_error(format!("integer out of JSON range: {}", i)));
            }
        }
        Value::Float(f) => serde_json::Number::from_f64(f.0)
            .map(JSON_Value::Number)
            .ok_or_else(|| value_error(format!("float not representable: {}", f.0)))?,
        Value::Text(t) => JSON_Value::String(t.clone()),
        Value::Bytes(b) => {
            // A byte string that is itself valid CBOR is shown decoded.
            let inner = match crate::cbor::decode(b) {
                Ok(decoded) => value_to_json(&decoded)?,
                Err(_) => JSON_Value::String(hex::encode(b)),
            };
            let mut obj = serde_json::Map::new();
            obj.insert("bstr".to_string(), inner);
            JSON_Value::Object(obj)
        }
        Value::Array(a) => {
            let array: CompileResult<Vec<JSON_Value>> = a.iter().map(value_to_json).collect();
            JSON_Value::Array(array?)
        }
        Value::Map(m) => {
            let mut obj = serde_json::Map::new();
            let mut counter = 0usize;
            for (k, v) in m {
                match k {
                    Value::Text(t) => {
                        obj.insert(t.clone(), value_to_json(v)?);
                    }
                    other => {
                        let mut entry = serde_json::Map::new();
                        entry.insert("key".to_string(), value_to_json(other)?);
                        entry.insert("val".to_string(), value_to_json(v)?);
                        obj.insert(format!("keyval{}", counter), JSON_Value::Object(entry));
                        counter += 1;
                    }
                }
            }
            JSON_Value::Object(obj)
        }
        Value::Tag(t, v) => {
            let mut obj = serde_json::Map::new();
            obj.insert("tag".to_string(), JSON_Value::from(*t));
            obj.insert("val".to_string(), value_to_json(v)?);
            JSON_Value::Object(obj)
        }
    };
    Ok(json)
}

/// Convert a JSON bridge form back into a data value.
pub fn json_to_value(json: &JSON_Value) -> CompileResult<Value> {
    let value = match json {
        JSON_Value::Null => Value::Null,
        JSON_Value::Bool(b) => Value::Bool(*b),
        JSON_Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i as i128)
            } else if let Some(u) = n.as_u64() {
                Value::Integer(u as i128)
            } else if let Some(f) = n.as_f64() {
                Value::from_float(f)
            } else {
                return Err(value_error(format!("unusable number: {}", n)));
            }
        }
        JSON_Value::String(s) => Value::Text(s.clone()),
        JSON_Value::Array(a) => {
            let array: CompileResult<Vec<Value>> = a.iter().map(json_to_value).collect();
            Value::Array(array?)
        }
        JSON_Value::Object(obj) => {
            let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
            if keys == ["bstr"] {
                return bstr_from_json(&obj["bstr"]);
            }
            if keys == ["tag", "val"] {
                let tag = obj["tag"]
                    .as_u64()
                    .ok_or_else(|| value_error("tag number must be an unsigned integer"))?;
                return Ok(Value::Tag(tag, Box::new(json_to_value(&obj["val"])?)));
            }
            let mut map = BTreeMap::new();
            for (k, v) in obj {
                if is_keyval(k) {
                    let key = v
                        .get("key")
                        .ok_or_else(|| value_error(format!("{}: missing \"key\"", k)))?;
                    let val = v
                        .get("val")
                        .ok_or_else(|| value_error(format!("{}: missing \"val\"", k)))?;
                    map.insert(json_to_value(key)?, json_to_value(val)?);
                } else {
                    map.insert(Value::Text(k.clone()), json_to_value(v)?);
                }
            }
            Value::Map(map)
        }
    };
    Ok(value)
}

fn bstr_from_json(inner: &JSON_Value) -> CompileResult<Value> {
    match inner {
        // Hex text stands for the raw bytes.
        JSON_Value::String(s) => {
            let bytes = hex::decode(s)
                .map_err(|e| value_error(format!("bad hex in \"bstr\": {}", e)))?;
            Ok(Value::Bytes(bytes))
        }
        // Anything else is a document to be CBOR-encoded.
        other => {
            let decoded = json_to_value(other)?;
            Ok(Value::Bytes(crate::cbor::encode(&decoded)?))
        }
    }
}

fn is_keyval(name: &str) -> bool {
    match name.strip_prefix("keyval") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Parse a JSON document into a data value.
pub fn json_str_to_value(json: &str) -> CompileResult<Value> {
    let parsed: JSON_Value =
        serde_json::from_str(json).map_err(|e| value_error(format!("json parsing failed: {}", e)))?;
    json_to_value(&parsed)
}

/// Render a data value as a JSON document.
pub fn value_to_json_str(value: &Value) -> CompileResult<String> {
    let json = value_to_json(value)?;
    serde_json::to_string_pretty(&json)
        .map_err(|e| value_error(format!("json formatting failed: {}", e)))
}

/// Parse a YAML document into a data value.
pub fn yaml_str_to_value(yaml: &str) -> CompileResult<Value> {
    let parsed: JSON_Value =
        serde_yaml::from_str(yaml).map_err(|e| value_error(format!("yaml parsing failed: {}", e)))?;
    json_to_value(&parsed)
}

/// Render a data value as a YAML document.
pub fn value_to_yaml_str(value: &Value) -> CompileResult<String> {
    let json = value_to_json(value)?;
    serde_yaml::to_string(&json).map_err(|e| value_error(format!("yaml formatting failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_round_trip() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Integer(-42),
            Value::Text("x".into()),
        ] {
            let json = value_to_json(&v).unwrap();
            assert_eq!(json_to_value(&json).unwrap(), v);
        }
    }

    #[test]
    fn bstr_as_hex() {
        // 0xff 0xff is not a valid CBOR encoding, so it stays hex.
        let v = Value::Bytes(vec![0xff, 0xff]);
        let json = value_to_json(&v).unwrap();
        assert_eq!(json, serde_json::json!({"bstr": "ffff"}));
        assert_eq!(json_to_value(&json).unwrap(), v);
    }

    #[test]
    fn bstr_with_embedded_cbor() {
        // 0x05 decodes as the integer 5, so the bridge shows it decoded.
        let v = Value::Bytes(vec![0x05]);
        let json = value_to_json(&v).unwrap();
        assert_eq!(json, serde_json::json!({"bstr": 5}));
        assert_eq!(json_to_value(&json).unwrap(), v);
    }

    #[test]
    fn tag_form() {
        let v = Value::Tag(32, Box::new(Value::Text("u".into())));
        let json = value_to_json(&v).unwrap();
        assert_eq!(json, serde_json::json!({"tag": 32, "val": "u"}));
        assert_eq!(json_to_value(&json).unwrap(), v);
    }

    #[test]
    fn non_text_map_keys() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(Value::Integer(1), Value::Text("a".into()));
        map.insert(Value::Text("k".into()), Value::Integer(2));
        let v = Value::Map(map);
        let json = value_to_json(&v).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"keyval0": {"key": 1, "val": "a"}, "k": 2})
        );
        assert_eq!(json_to_value(&json).unwrap(), v);
    }

    #[test]
    fn yaml_round_trip() {
        let v = Value::Array(vec![Value::Integer(5), Value::Text("hi".into())]);
        let yaml = value_to_yaml_str(&v).unwrap();
        assert_eq!(yaml_str_to_value(&yaml).unwrap(), v);
    }
}
