use cddl_forge::{compile, validate_cbor_bytes, CompileError, DEFAULT_MAX_QTY};

#[test]
fn syntax_error_from_garbage() {
    let err = compile("A = !", DEFAULT_MAX_QTY).unwrap_err();
    assert!(matches!(err, CompileError::Syntax(_)));
    assert_eq!(err.to_string(), "Unparseable(!)");
}

#[test]
fn duplicate_rule() {
    let err = compile("A = uint\nA = tstr", DEFAULT_MAX_QTY).unwrap_err();
    assert_eq!(err.to_string(), "DuplicateRule(A)");
}

#[test]
fn missing_rule_in_document() {
    let err = compile("A = [Ghost]", DEFAULT_MAX_QTY).unwrap_err();
    assert_eq!(err.to_string(), "MissingRule(Ghost)");
}

#[test]
fn missing_rule_at_validation() {
    let schema = compile("A = uint", DEFAULT_MAX_QTY).unwrap();
    let err = schema.validate_cbor("B", b"\x05").unwrap_err();
    assert_eq!(err.to_string(), "MissingRule(B)");
}

#[test]
fn map_entry_without_key() {
    let err = compile("M = {tstr}", DEFAULT_MAX_QTY).unwrap_err();
    assert!(matches!(err, CompileError::Semantic(_)));
}

#[test]
fn circular_reference_chain() {
    let err = compile("A = B\nB = A", DEFAULT_MAX_QTY).unwrap_err();
    assert!(matches!(err, CompileError::Semantic(_)));
}

#[test]
fn mismatch_reports_both_sides() {
    let err = validate_cbor_bytes("A", "A = uint", b"\x62\x68\x69").unwrap_err();
    assert!(matches!(err, CompileError::Mismatch { .. }));
    let msg = err.to_string();
    assert!(msg.starts_with("Mismatch(expected "), "got: {}", msg);
}

#[test]
fn unbalanced_brackets() {
    assert!(compile("A = [uint", DEFAULT_MAX_QTY).is_err());
    assert!(compile("A = {\"k\" => uint", DEFAULT_MAX_QTY).is_err());
}

#[test]
fn occurrence_bounds_with_wrong_order() {
    let err = compile("Q = [5**2 uint]", DEFAULT_MAX_QTY).unwrap_err();
    assert!(matches!(err, CompileError::Semantic(_)));
    // The default ceiling stands in for an open upper bound, so a minimum
    // above it cannot be satisfied either.
    let err = compile("Q = [5** uint]", DEFAULT_MAX_QTY).unwrap_err();
    assert!(matches!(err, CompileError::Semantic(_)));
}

#[test]
fn range_with_wrong_order() {
    let err = compile("A = 10..1", DEFAULT_MAX_QTY).unwrap_err();
    assert!(matches!(err, CompileError::Semantic(_)));
}

#[test]
fn any_in_union() {
    let err = compile("A = [uint / any]", DEFAULT_MAX_QTY).unwrap_err();
    assert!(matches!(err, CompileError::Semantic(_)));
}
