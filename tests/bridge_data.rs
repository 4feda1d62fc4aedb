use cddl_forge::{compile, DEFAULT_MAX_QTY};
use indoc::indoc;

const PAIR_CDDL: &str = "Pair = [int, tstr]";
const PAIR_CBOR: &[u8] = b"\x82\x05\x62\x68\x69"; // [5, "hi"]

#[test]
fn cbor_to_yaml_and_back() {
    let schema = compile(PAIR_CDDL, DEFAULT_MAX_QTY).unwrap();
    let yaml = schema.cbor_to_yaml("Pair", PAIR_CBOR).unwrap();
    let bytes = schema.yaml_to_cbor("Pair", &yaml).unwrap();
    assert_eq!(bytes, PAIR_CBOR);
}

#[test]
fn cbor_to_json_and_back() {
    let schema = compile(PAIR_CDDL, DEFAULT_MAX_QTY).unwrap();
    let json = schema.cbor_to_json("Pair", PAIR_CBOR).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, serde_json::json!([5, "hi"]));
    let bytes = schema.json_to_cbor("Pair", &json).unwrap();
    assert_eq!(bytes, PAIR_CBOR);
}

#[test]
fn json_input_is_validated() {
    let schema = compile(PAIR_CDDL, DEFAULT_MAX_QTY).unwrap();
    schema.json_to_cbor("Pair", "[5, true]").unwrap_err();
    schema.json_to_cbor("Pair", "[5]").unwrap_err();
}

#[test]
fn yaml_input_accepts_json_documents() {
    // YAML is a superset of JSON, so JSON text parses as YAML too.
    let schema = compile(PAIR_CDDL, DEFAULT_MAX_QTY).unwrap();
    let bytes = schema.yaml_to_cbor("Pair", "[5, \"hi\"]").unwrap();
    assert_eq!(bytes, PAIR_CBOR);
}

#[test]
fn yaml_document_form() {
    let schema = compile(PAIR_CDDL, DEFAULT_MAX_QTY).unwrap();
    let yaml = indoc! {"
        - 5
        - hi
    "};
    let bytes = schema.yaml_to_cbor("Pair", yaml).unwrap();
    assert_eq!(bytes, PAIR_CBOR);
}

#[test]
fn byte_strings_bridge_as_bstr_objects() {
    let cddl = "B = [bstr]";
    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    // [h'ffff']
    let cbor = b"\x81\x42\xff\xff";
    let json = schema.cbor_to_json("B", cbor).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, serde_json::json!([{"bstr": "ffff"}]));
    assert_eq!(schema.json_to_cbor("B", &json).unwrap(), cbor);
}

#[test]
fn non_text_map_keys_bridge_as_keyval() {
    let cddl = "M = {uint => tstr}";
    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    // {5: "hi"}
    let cbor = b"\xa1\x05\x62\x68\x69";
    let json = schema.cbor_to_json("M", cbor).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, serde_json::json!({"keyval0": {"key": 5, "val": "hi"}}));
    assert_eq!(schema.json_to_cbor("M", &json).unwrap(), cbor);
}
