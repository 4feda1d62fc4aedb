//! `cddl-forge` is a library for compiling CDDL documents and putting them to
//! work: validating and transcoding encoded data, and generating C sources
//! that encode or decode the same structures on embedded targets.
//!
//! CDDL is a text format described by [RFC8610] for specifying the structure
//! of CBOR (or JSON) data.  This library compiles a practical subset of it
//! into a [`Schema`], which can then:
//!
//! - validate CBOR data ([`Schema::validate_cbor`]),
//! - decode CBOR into a structured, named form ([`Schema::decode_cbor`]) and
//!   encode that form back to CBOR ([`Schema::encode_cbor`]),
//! - convert between CBOR and YAML or JSON documents,
//! - generate C encoder or decoder sources ([`Schema::generate`]).
//!
//! # Examples
//!
//! Validate CBOR-encoded data against a schema:
//!
//! ```
//! use cddl_forge::validate_cbor_bytes;
//!
//! let cddl = "Pair = [int, tstr]";
//! let cbor = b"\x82\x05\x62\x68\x69"; // [5, "hi"]
//! validate_cbor_bytes("Pair", cddl, cbor).unwrap();
//! ```
//!
//! Generate a C decoder:
//!
//! ```
//! use cddl_forge::{compile, Mode, DEFAULT_MAX_QTY};
//!
//! let schema = compile("Pair = [int, tstr]", DEFAULT_MAX_QTY).unwrap();
//! let code = schema
//!     .generate(Mode::Decode, &["Pair".to_string()], "pair_decode.h", "pair_types.h")
//!     .unwrap();
//! assert!(code.c_file.contains("bool cbor_decode_Pair("));
//! ```
//!
//! Supported CDDL features:
//! - Prelude types `any`, `uint`, `nint`, `int`, `bstr`, `tstr`, `bool`,
//!   `nil`, `float`, `float16`, `float32`, `float64`
//! - Literal ints, floats, bools, text, and byte strings (UTF-8, hex, base64)
//! - Lists, maps, and groups
//! - Choices (`/` and `//`), rule extension (`/=` and `//=`)
//! - Occurrences (`?`, `*`, `+`, `m*n`)
//! - Integer ranges (`1..10`)
//! - Tagged data (`#6.n`)
//! - Control operators `.size`, `.cbor`, `.cborseq`, `.eq`, `.lt`, `.le`,
//!   `.gt`, `.ge`
//!
//! [RFC8610]: https://tools.ietf.org/html/rfc8610

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod bridge;
pub mod cbor;
pub mod codegen;
pub mod parser;
pub mod render;
pub mod schema;
pub mod translate;
pub mod util;
pub mod value;

#[doc(inline)]
pub use codegen::Mode;
#[doc(inline)]
pub use render::GeneratedCode;
#[doc(inline)]
pub use translate::Structured;
#[doc(inline)]
pub use util::{CompileError, CompileResult};
#[doc(inline)]
pub use value::Value;

use schema::SymbolTable;
use translate::Translator;

/// The repetition ceiling used when a quantifier has no explicit upper bound
/// and no other ceiling was requested.
pub const DEFAULT_MAX_QTY: u64 = 3;

/// A compiled CDDL document.
#[derive(Debug, Clone)]
pub struct Schema {
    table: SymbolTable,
    default_max_qty: u64,
}

/// Compile a CDDL document.
///
/// `default_max_qty` bounds unbounded quantifiers (`*`, `+`, `m*`) in
/// generated C code and in structured decoding.
pub fn compile(cddl: &str, default_max_qty: u64) -> CompileResult<Schema> {
    let table = parser::parse_schema(cddl, default_max_qty)?;
    Ok(Schema {
        table,
        default_max_qty,
    })
}

impl Schema {
    /// The rule table this schema compiled to.
    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    /// Validate CBOR bytes against the named rule.
    pub fn validate_cbor(&self, name: &str, bytes: &[u8]) -> CompileResult<()> {
        let value = cbor::decode(bytes)?;
        Translator::new(&self.table).validate(name, &value)
    }

    /// Decode CBOR bytes into the structured form of the named rule.
    pub fn decode_cbor(&self, name: &str, bytes: &[u8]) -> CompileResult<Structured> {
        let value = cbor::decode(bytes)?;
        Translator::new(&self.table).decode(name, &value)
    }

    /// Encode the structured form of the named rule as CBOR bytes.
    pub fn encode_cbor(&self, name: &str, data: &Structured) -> CompileResult<Vec<u8>> {
        let value = Translator::new(&self.table).encode(name, data)?;
        cbor::encode(&value)
    }

    /// Validate CBOR bytes against the named rule and re-render them as YAML.
    pub fn cbor_to_yaml(&self, name: &str, bytes: &[u8]) -> CompileResult<String> {
        let value = cbor::decode(bytes)?;
        Translator::new(&self.table).validate(name, &value)?;
        bridge::value_to_yaml_str(&value)
    }

    /// Parse a YAML document, validate it against the named rule, and encode
    /// it as CBOR.
    pub fn yaml_to_cbor(&self, name: &str, yaml: &str) -> CompileResult<Vec<u8>> {
        let value = bridge::yaml_str_to_value(yaml)?;
        Translator::new(&self.table).validate(name, &value)?;
        cbor::encode(&value)
    }

    /// Validate CBOR bytes against the named rule and re-render them as JSON.
    pub fn cbor_to_json(&self, name: &str, bytes: &[u8]) -> CompileResult<String> {
        let value = cbor::decode(bytes)?;
        Translator::new(&self.table).validate(name, &value)?;
        bridge::value_to_json_str(&value)
    }

    /// Parse a JSON document, validate it against the named rule, and encode
    /// it as CBOR.
    pub fn json_to_cbor(&self, name: &str, json: &str) -> CompileResult<Vec<u8>> {
        let value = bridge::json_str_to_value(json)?;
        Translator::new(&self.table).validate(name, &value)?;
        cbor::encode(&value)
    }

    /// Generate C encoder or decoder sources for the given entry types.
    ///
    /// The file names are used for header guards and `#include` lines.
    pub fn generate(
        &self,
        mode: Mode,
        entry_types: &[String],
        h_file_name: &str,
        types_file_name: &str,
    ) -> CompileResult<GeneratedCode> {
        render::generate(
            &self.table,
            mode,
            entry_types,
            self.default_max_qty,
            h_file_name,
            types_file_name,
        )
    }
}

/// One-shot validation of CBOR bytes against one rule of a CDDL document.
pub fn validate_cbor_bytes(name: &str, cddl: &str, bytes: &[u8]) -> CompileResult<()> {
    compile(cddl, DEFAULT_MAX_QTY)?.validate_cbor(name, bytes)
}
