//! This module defines error and result types.
//!

use crate::parser::ParseError;
use thiserror::Error;

/// Any error that can come out of compiling a schema or pushing data
/// through it.
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Debug, PartialEq, Error)]
pub enum CompileError {
    /// An error during CDDL parsing.
    #[error("{0}")]
    Syntax(#[from] ParseError),
    /// A logical error in the CDDL structure.
    #[error("Semantic({0})")]
    Semantic(String),
    /// A data mismatch during validation.
    #[error("Mismatch(expected {expected}, found {found})")]
    Mismatch { expected: String, found: String },
    /// A CDDL rule lookup failed.
    #[error("MissingRule({0})")]
    MissingRule(String),
    /// A data value that can't be converted between formats.
    #[error("ValueError({0})")]
    ValueError(String),
    /// Generated code would be inconsistent (e.g. two different bodies
    /// under one name).
    #[error("Generator({0})")]
    Generator(String),
}

impl CompileError {
    /// True for errors that a union decode may swallow while it tries the
    /// next branch.  Everything else aborts the whole operation.
    pub(crate) fn is_mismatch(&self) -> bool {
        matches!(self, CompileError::Mismatch { .. })
    }
}

/// Shortcut for creating mismatch errors.
pub(crate) fn mismatch<E: Into<String>, F: Into<String>>(expected: E, found: F) -> CompileError {
    CompileError::Mismatch {
        expected: expected.into(),
        found: found.into(),
    }
}

/// Shortcut for creating semantic errors.
pub(crate) fn semantic<M: Into<String>>(msg: M) -> CompileError {
    CompileError::Semantic(msg.into())
}

/// A result with a [`CompileError`] inside.
pub type CompileResult<T> = Result<T, CompileError>;
