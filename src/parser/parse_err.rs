//! Parser error types and related utilities
//!

use thiserror::Error;

/// The "kind" of error generated during CDDL parsing.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An integer didn't parse correctly.
    MalformedInteger,
    /// A floating-point number didn't parse correctly.
    MalformedFloat,
    /// A hex literal didn't parse correctly.
    MalformedHex,
    /// A malformed text string
    MalformedText,
    /// A malformed base64 byte string
    MalformedBase64,
    /// A malformed occurrence quantifier
    MalformedQuantifier,
    /// A malformed control operator
    MalformedControl,
    /// A malformed tag
    MalformedTag,
    /// Unbalanced brackets or quotes
    Unbalanced,
    /// The same rule name was assigned twice with `=`
    DuplicateRule,
    /// A nonspecific parsing error.
    Unparseable,
}

/// An error that occurred during CDDL parsing.
#[derive(Debug, PartialEq, Eq, Error)]
// thiserror will generate a Display implementation.
#[error("{kind:?}({ctx})")]
pub struct ParseError {
    /// The "kind" of error generated during CDDL parsing.
    pub kind: ErrorKind,
    /// A snippet of text from the CDDL input that may be the cause of the error.
    pub ctx: String,
}

/// Build a [`ParseError`], keeping only a short snippet of the offending
/// input so error messages stay readable.
pub(crate) fn parse_error<S: Into<String>>(kind: ErrorKind, ctx: S) -> ParseError {
    let mut ctx: String = ctx.into();
    if let Some((cut, _)) = ctx.char_indices().nth(40) {
        ctx.truncate(cut);
    }
    if let Some(cut) = ctx.find('\n') {
        ctx.truncate(cut);
    }
    ParseError { kind, ctx }
}
