use cddl_forge::{compile, CompileError, Mode, DEFAULT_MAX_QTY};
use indoc::indoc;

fn entries(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn decoder_files_for_simple_schema() {
    let schema = compile("Pair = [int, tstr]", DEFAULT_MAX_QTY).unwrap();
    let code = schema
        .generate(Mode::Decode, &entries(&["Pair"]), "pair_decode.h", "pair_types.h")
        .unwrap();

    // Implementation: one static decoder plus the public wrapper.
    assert!(code.c_file.contains("static bool decode_Pair("));
    assert!(code.c_file.contains("bool cbor_decode_Pair("));
    assert!(code.c_file.contains("list_start_decode(state)"));
    assert!(code.c_file.contains("intx32_decode"));
    assert!(code.c_file.contains("tstrx_decode"));
    assert!(code.c_file.contains("#include \"cbor_decode.h\""));
    assert!(code.c_file.contains("#include \"pair_decode.h\""));

    // Header: guard plus the public signature.
    assert!(code.h_file.contains("#ifndef PAIR_DECODE_H__"));
    assert!(code.h_file.contains("bool cbor_decode_Pair("));
    assert!(code.h_file.contains("#include \"pair_types.h\""));

    // Types: the result struct with both fields.
    assert!(code.types_file.contains("struct Pair {"));
    assert!(code.types_file.contains("int32_t"));
    assert!(code.types_file.contains("cbor_string_type_t"));
}

#[test]
fn encoder_and_decoder_share_type_shape() {
    let schema = compile("Pair = [int, tstr]", DEFAULT_MAX_QTY).unwrap();
    let dec = schema
        .generate(Mode::Decode, &entries(&["Pair"]), "pd.h", "pt.h")
        .unwrap();
    let enc = schema
        .generate(Mode::Encode, &entries(&["Pair"]), "pe.h", "pt.h")
        .unwrap();
    assert!(enc.c_file.contains("static bool encode_Pair("));
    assert!(enc.c_file.contains("list_start_encode(state, 2)"));
    assert!(enc.h_file.contains("const struct Pair *input"));
    assert!(dec.h_file.contains("struct Pair *result"));
}

#[test]
fn optional_and_repeated_members() {
    let cddl = "Rec = [uint, ? tstr, * int]";
    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let code = schema
        .generate(Mode::Decode, &entries(&["Rec"]), "rec.h", "rec_types.h")
        .unwrap();
    assert!(code.c_file.contains("present_decode"));
    assert!(code.c_file.contains("multi_decode(0, 3, &"));
    assert!(code.types_file.contains("_present;"));
    assert!(code.types_file.contains("_count;"));
    assert!(code.types_file.contains("[3]"));
}

#[test]
fn default_max_qty_threads_through() {
    let schema = compile("R = [* uint]", 12).unwrap();
    let code = schema
        .generate(Mode::Decode, &entries(&["R"]), "r.h", "r_types.h")
        .unwrap();
    assert!(code.c_file.contains("#if DEFAULT_MAX_QTY != 12"));
    assert!(code.types_file.contains("#define DEFAULT_MAX_QTY 12"));
    assert!(code.c_file.contains("multi_decode(0, 12, &"));
}

#[test]
fn union_members_get_choice_enum() {
    let cddl = "U = [uint / tstr]";
    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let code = schema
        .generate(Mode::Decode, &entries(&["U"]), "u.h", "u_types.h")
        .unwrap();
    assert!(code.types_file.contains("enum {"));
    assert!(code.types_file.contains("_choice;"));
    assert!(code.c_file.contains("union_start_code(state)"));
}

#[test]
fn multiple_entry_types() {
    let cddl = indoc! {"
        Inner = [uint, uint]
        Outer = [tstr, Inner]
    "};
    let schema = compile(cddl, DEFAULT_MAX_QTY).unwrap();
    let code = schema
        .generate(
            Mode::Decode,
            &entries(&["Inner", "Outer"]),
            "multi.h",
            "multi_types.h",
        )
        .unwrap();
    assert!(code.c_file.contains("bool cbor_decode_Inner("));
    assert!(code.c_file.contains("bool cbor_decode_Outer("));
    // Inner's struct must be defined before Outer's, which embeds it.
    let inner_pos = code.types_file.find("struct Inner {").unwrap();
    let outer_pos = code.types_file.find("struct Outer {").unwrap();
    assert!(inner_pos < outer_pos);
}

#[test]
fn self_reference_rejected() {
    let schema = compile("A = [uint, A]", DEFAULT_MAX_QTY).unwrap();
    let err = schema
        .generate(Mode::Decode, &entries(&["A"]), "a.h", "a_types.h")
        .unwrap_err();
    assert!(matches!(err, CompileError::Generator(_)));
}

#[test]
fn self_reference_through_entry_bstr_allowed() {
    // A node holding the encoded form of further nodes stays an opaque
    // byte string, so the type is finite.
    let schema = compile("Node = [uint, * bstr .cbor Node]", DEFAULT_MAX_QTY).unwrap();
    let code = schema
        .generate(Mode::Decode, &entries(&["Node"]), "node.h", "node_types.h")
        .unwrap();
    assert!(code.c_file.contains("bool cbor_decode_Node("));
}

#[test]
fn unknown_entry_type() {
    let schema = compile("A = uint", DEFAULT_MAX_QTY).unwrap();
    let err = schema
        .generate(Mode::Decode, &entries(&["B"]), "b.h", "b_types.h")
        .unwrap_err();
    assert!(matches!(err, CompileError::MissingRule(_)));
}

#[test]
fn generated_functions_have_bodies_and_tracing() {
    let schema = compile("Pair = [int, tstr]", DEFAULT_MAX_QTY).unwrap();
    let code = schema
        .generate(Mode::Decode, &entries(&["Pair"]), "p.h", "p_types.h")
        .unwrap();
    assert!(code.c_file.contains("bool tmp_result = ("));
    assert!(code.c_file.contains("cbor_trace();"));
    assert!(code.c_file.contains("cbor_print(\"%s\\n\", __func__);"));
}
