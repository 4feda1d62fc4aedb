use cddl_forge::{compile, validate_cbor_bytes, Structured, Value, DEFAULT_MAX_QTY};
use serde::Serialize;

#[rustfmt::skip] // allow arbitrary indents for readability
pub mod cbor {
    pub const BOOL_TRUE:    &[u8] = b"\xF5";
    pub const NULL:         &[u8] = b"\xF6";

    pub const INT_5:        &[u8] = b"\x05";
    pub const INT_9:        &[u8] = b"\x09";
    pub const INT_24:       &[u8] = b"\x18\x18";
    pub const NINT_1000:    &[u8] = b"\x39\x03\xe7";  // -1000

    pub const TEXT_HI:      &[u8] = b"\x62\x68\x69";  // "hi"

    pub const ARRAY_EMPTY:  &[u8] = b"\x80";              // []
    pub const ARRAY_5:      &[u8] = b"\x81\x05";          // [5]
    pub const ARRAY_5_HI:   &[u8] = b"\x82\x05\x62\x68\x69"; // [5, "hi"]
    pub const ARRAY_5_5:    &[u8] = b"\x82\x05\x05";      // [5, 5]
    pub const ARRAY_5_HI_X: &[u8] = b"\x83\x05\x62\x68\x69\x61\x78"; // [5, "hi", "x"]

    pub const MAP_EMPTY:    &[u8] = b"\xA0";                  // {}
    pub const MAP_5_HI:     &[u8] = b"\xA1\x05\x62\x68\x69";  // {5: "hi"}
    pub const MAP_HI_5:     &[u8] = b"\xA1\x62\x68\x69\x05";  // {"hi": 5}

    pub const TAG32_HI:     &[u8] = b"\xD8\x20\x62\x68\x69"; // 32("hi")
}

#[test]
fn validate_fixed_list() {
    let cddl = "Pair = [int, tstr]";
    validate_cbor_bytes("Pair", cddl, cbor::ARRAY_5_HI).unwrap();
    validate_cbor_bytes("Pair", cddl, cbor::ARRAY_5).unwrap_err();
    validate_cbor_bytes("Pair", cddl, cbor::ARRAY_5_HI_X).unwrap_err();
    validate_cbor_bytes("Pair", cddl, cbor::ARRAY_5_5).unwrap_err();
    validate_cbor_bytes("Pair", cddl, cbor::INT_5).unwrap_err();
}

#[test]
fn decode_fixed_list_to_named_fields() {
    let schema = compile("Pair = [int, tstr]", DEFAULT_MAX_QTY).unwrap();
    let decoded = schema.decode_cbor("Pair", cbor::ARRAY_5_HI).unwrap();
    assert_eq!(
        decoded,
        Structured::Record(vec![
            ("int".to_string(), Structured::Value(Value::Integer(5))),
            (
                "tstr".to_string(),
                Structured::Value(Value::Text("hi".to_string()))
            ),
        ])
    );
    let encoded = schema.encode_cbor("Pair", &decoded).unwrap();
    assert_eq!(encoded, cbor::ARRAY_5_HI);
}

#[test]
fn optional_element() {
    let cddl = "Opt = [uint, ? tstr]";
    validate_cbor_bytes("Opt", cddl, cbor::ARRAY_5).unwrap();
    validate_cbor_bytes("Opt", cddl, cbor::ARRAY_5_HI).unwrap();
    validate_cbor_bytes("Opt", cddl, cbor::ARRAY_EMPTY).unwrap_err();
    validate_cbor_bytes("Opt", cddl, cbor::ARRAY_5_HI_X).unwrap_err();

    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    for bytes in [cbor::ARRAY_5, cbor::ARRAY_5_HI] {
        let decoded = schema.decode_cbor("Opt", bytes).unwrap();
        assert!(decoded.field("uint").is_some());
        assert_eq!(schema.encode_cbor("Opt", &decoded).unwrap(), bytes);
    }
}

#[test]
fn uint_sign_is_checked() {
    let cddl = "N = uint";
    validate_cbor_bytes("N", cddl, cbor::INT_5).unwrap();
    validate_cbor_bytes("N", cddl, cbor::NINT_1000).unwrap_err();
    let cddl = "N = nint";
    validate_cbor_bytes("N", cddl, cbor::NINT_1000).unwrap();
    validate_cbor_bytes("N", cddl, cbor::INT_5).unwrap_err();
}

#[test]
fn map_with_explicit_key() {
    let cddl = "M = {uint => tstr}";
    validate_cbor_bytes("M", cddl, cbor::MAP_5_HI).unwrap();
    validate_cbor_bytes("M", cddl, cbor::MAP_HI_5).unwrap_err();
    validate_cbor_bytes("M", cddl, cbor::MAP_EMPTY).unwrap_err();
    validate_cbor_bytes("M", cddl, cbor::ARRAY_5_HI).unwrap_err();

    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let decoded = schema.decode_cbor("M", cbor::MAP_5_HI).unwrap();
    assert_eq!(schema.encode_cbor("M", &decoded).unwrap(), cbor::MAP_5_HI);
}

#[test]
fn map_with_text_keys() {
    #[derive(Serialize)]
    struct PersonStruct {
        name: String,
        age: u32,
    }
    let input = PersonStruct {
        name: "Bob".to_string(),
        age: 43,
    };
    let bytes = serde_cbor::to_vec(&input).unwrap();
    let cddl = "person = {\"name\" => tstr, \"age\" => uint}";
    validate_cbor_bytes("person", cddl, &bytes).unwrap();

    // Map entries match by key, not position.
    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let decoded = schema.decode_cbor("person", &bytes).unwrap();
    assert_eq!(
        decoded.field("name"),
        Some(&Structured::Value(Value::Text("Bob".to_string())))
    );
    // Maps re-encode in canonical key order, so compare values rather than
    // wire bytes.
    let reencoded = schema.encode_cbor("person", &decoded).unwrap();
    let a: serde_cbor::Value = serde_cbor::from_slice(&reencoded).unwrap();
    let b: serde_cbor::Value = serde_cbor::from_slice(&bytes).unwrap();
    assert_eq!(a, b);
}

#[test]
fn quantified_map_entries() {
    let cddl = "M = {* uint => tstr}";
    validate_cbor_bytes("M", cddl, cbor::MAP_EMPTY).unwrap();
    validate_cbor_bytes("M", cddl, cbor::MAP_5_HI).unwrap();
    validate_cbor_bytes("M", cddl, cbor::MAP_HI_5).unwrap_err();
}

#[test]
fn union_roundtrip() {
    let cddl = "U = [uint / tstr]";
    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    for bytes in [cbor::ARRAY_5, b"\x81\x62\x68\x69".as_slice()] {
        let decoded = schema.decode_cbor("U", bytes).unwrap();
        assert_eq!(schema.encode_cbor("U", &decoded).unwrap(), bytes);
    }
    validate_cbor_bytes("U", cddl, cbor::ARRAY_EMPTY).unwrap_err();
}

#[test]
fn rule_references() {
    let cddl = "Inner = [uint, uint]\nOuter = [tstr, Inner]";
    let bytes = b"\x82\x62\x68\x69\x82\x05\x05";
    validate_cbor_bytes("Outer", cddl, bytes).unwrap();
    validate_cbor_bytes("Outer", cddl, cbor::ARRAY_5_HI).unwrap_err();
}

#[test]
fn tagged_value() {
    let cddl = "T = #6.32 tstr";
    validate_cbor_bytes("T", cddl, cbor::TAG32_HI).unwrap();
    // Untagged, or tagged with the wrong number.
    validate_cbor_bytes("T", cddl, cbor::TEXT_HI).unwrap_err();
    validate_cbor_bytes("T", cddl, b"\xD8\x21\x62\x68\x69").unwrap_err();

    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let decoded = schema.decode_cbor("T", cbor::TAG32_HI).unwrap();
    // The tag is restored by the schema on the way back out.
    assert_eq!(schema.encode_cbor("T", &decoded).unwrap(), cbor::TAG32_HI);
}

#[test]
fn integer_range() {
    let cddl = "R = 1..10";
    validate_cbor_bytes("R", cddl, cbor::INT_5).unwrap();
    validate_cbor_bytes("R", cddl, cbor::INT_9).unwrap();
    validate_cbor_bytes("R", cddl, cbor::INT_24).unwrap_err();
    validate_cbor_bytes("R", cddl, cbor::NINT_1000).unwrap_err();
}

#[test]
fn string_size_control() {
    let cddl = "S = tstr .size (1..2)";
    validate_cbor_bytes("S", cddl, cbor::TEXT_HI).unwrap();
    validate_cbor_bytes("S", cddl, b"\x60").unwrap_err();
    validate_cbor_bytes("S", cddl, b"\x63\x61\x62\x63").unwrap_err();
}

#[test]
fn literal_values_elided_and_restored() {
    let cddl = "L = [9, tstr]";
    let bytes = b"\x82\x09\x62\x68\x69";
    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let decoded = schema.decode_cbor("L", bytes).unwrap();
    // The literal 9 carries no information, so only the tstr survives.
    assert_eq!(
        decoded,
        Structured::Record(vec![(
            "tstr".to_string(),
            Structured::Value(Value::Text("hi".to_string()))
        )])
    );
    assert_eq!(schema.encode_cbor("L", &decoded).unwrap(), bytes);
    validate_cbor_bytes("L", cddl, cbor::ARRAY_5_HI).unwrap_err();
}

#[test]
fn nested_cbor_payload() {
    let cddl = "Wrap = bstr .cbor Inner\nInner = [uint, uint]";
    // 0x43 prefixes a 3-byte string holding the encoding of [5, 5].
    let bytes = b"\x43\x82\x05\x05";
    validate_cbor_bytes("Wrap", cddl, bytes).unwrap();
    // The payload must itself validate.
    validate_cbor_bytes("Wrap", cddl, b"\x45\x82\x05\x62\x68\x69").unwrap_err();

    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let decoded = schema.decode_cbor("Wrap", bytes).unwrap();
    assert_eq!(schema.encode_cbor("Wrap", &decoded).unwrap(), bytes);
}

#[test]
fn cbor_sequence_payload() {
    let cddl = "Seq = bstr .cborseq uint";
    // 0x42 prefixes a 2-byte string holding the values 5 and 6 back to back.
    let bytes = b"\x42\x05\x06";
    validate_cbor_bytes("Seq", cddl, bytes).unwrap();
    // The sequence items must themselves validate.
    validate_cbor_bytes("Seq", cddl, b"\x42\x05\xF5").unwrap_err();

    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let decoded = schema.decode_cbor("Seq", bytes).unwrap();
    assert_eq!(
        decoded,
        Structured::Repeated(vec![
            Structured::Value(Value::Integer(5)),
            Structured::Value(Value::Integer(6)),
        ])
    );
    assert_eq!(schema.encode_cbor("Seq", &decoded).unwrap(), bytes);
}

#[test]
fn encode_rejects_wrong_value_type() {
    let schema = compile("Pair = [uint, tstr]", DEFAULT_MAX_QTY).unwrap();
    let data = Structured::Record(vec![
        ("uint".to_string(), Structured::Value(Value::Integer(5))),
        ("tstr".to_string(), Structured::Value(Value::Integer(6))),
    ]);
    schema.encode_cbor("Pair", &data).unwrap_err();

    // Range and size controls hold on the way out too.
    let schema = compile("R = [1..10]", DEFAULT_MAX_QTY).unwrap();
    let data = Structured::Record(vec![(
        "uint".to_string(),
        Structured::Value(Value::Integer(99)),
    )]);
    schema.encode_cbor("R", &data).unwrap_err();
}

#[test]
fn repeated_elements() {
    let cddl = "R = [* uint]";
    validate_cbor_bytes("R", cddl, cbor::ARRAY_EMPTY).unwrap();
    validate_cbor_bytes("R", cddl, cbor::ARRAY_5_5).unwrap();
    validate_cbor_bytes("R", cddl, cbor::ARRAY_5_HI).unwrap_err();

    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let decoded = schema.decode_cbor("R", cbor::ARRAY_5_5).unwrap();
    assert_eq!(schema.encode_cbor("R", &decoded).unwrap(), cbor::ARRAY_5_5);
}

#[test]
fn group_splices_into_list() {
    let cddl = "G = [(uint, uint), tstr]";
    validate_cbor_bytes("G", cddl, b"\x83\x05\x05\x62\x68\x69").unwrap();
    validate_cbor_bytes("G", cddl, cbor::ARRAY_5_HI).unwrap_err();
}

#[test]
fn socket_extension() {
    let cddl = "U = uint\nU /= tstr";
    validate_cbor_bytes("U", cddl, cbor::INT_5).unwrap();
    validate_cbor_bytes("U", cddl, cbor::TEXT_HI).unwrap();
    validate_cbor_bytes("U", cddl, cbor::BOOL_TRUE).unwrap_err();
}

#[test]
fn nil_and_bool() {
    validate_cbor_bytes("N", "N = nil", cbor::NULL).unwrap();
    validate_cbor_bytes("N", "N = nil", cbor::INT_5).unwrap_err();
    validate_cbor_bytes("B", "B = true", cbor::BOOL_TRUE).unwrap();
    validate_cbor_bytes("B", "B = bool", cbor::BOOL_TRUE).unwrap();
}
