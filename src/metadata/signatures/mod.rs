//! Signature blobs (ECMA-335 II.23.2).
//!
//! Signatures describe the shape of fields, methods, properties, local variable sets,
//! type specifications and generic method instantiations. This module holds the
//! token-based [`TypeSignature`] model together with a [`SignatureParser`] for reading
//! blobs and the `encode_*` functions for writing them.
//!
//! ```rust
//! use dotemit::metadata::signatures::{
//!     encode_method_signature, parse_method_signature, SignatureMethod, SignatureParameter,
//!     TypeSignature,
//! };
//! use dotemit::metadata::flags::CallingConventions;
//!
//! let signature = SignatureMethod {
//!     calling_convention: CallingConventions::HAS_THIS,
//!     return_type: SignatureParameter { base: TypeSignature::I4, ..Default::default() },
//!     params: vec![SignatureParameter { base: TypeSignature::String, ..Default::default() }],
//!     ..Default::default()
//! };
//!
//! let blob = encode_method_signature(&signature)?;
//! assert_eq!(blob, vec![0x20, 0x01, 0x08, 0x0E]);
//! assert_eq!(parse_method_signature(&blob)?, signature);
//! # Ok::<(), dotemit::Error>(())
//! ```

mod encoder;
mod parser;
mod types;

pub use encoder::*;
pub use parser::*;
pub use types::*;

use crate::Result;

/// Element type constants (ECMA-335 II.23.1.16)
#[allow(non_snake_case, missing_docs)]
pub mod ELEMENT_TYPE {
    //Marks end of a list
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by type
    pub const PTR: u8 = 0x0f;
    // Followed by type
    pub const BYREF: u8 = 0x10;
    // Followed by TypeDef or TypeRef token
    pub const VALUETYPE: u8 = 0x11;
    // Followed by TypeDef or TypeRef token
    pub const CLASS: u8 = 0x12;
    // Generic parameter in a generic type definition, represented as number
    pub const VAR: u8 = 0x13;
    // type rank boundsCount bound1 … loCount lo1 …
    pub const ARRAY: u8 = 0x14;
    // Generic type instantiation. Followed by type type-arg-count type-1 ... type-n
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    // System.IntPtr
    pub const I: u8 = 0x18;
    // System.UIntPtr
    pub const U: u8 = 0x19;
    // Followed by full method signature
    pub const FNPTR: u8 = 0x1b;
    // System.Object
    pub const OBJECT: u8 = 0x1c;
    // Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    // Generic parameter in a generic method definition, represented as number
    pub const MVAR: u8 = 0x1e;
    // Required modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_REQD: u8 = 0x1f;
    // Optional modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_OPT: u8 = 0x20;
    pub const SENTINEL: u8 = 0x41;
    pub const PINNED: u8 = 0x45;
    // Custom attribute blobs: argument of type System.Type
    pub const TYPE: u8 = 0x50;
    // Custom attribute blobs: boxed object argument
    pub const BOXED: u8 = 0x51;
    // Custom attribute blobs: named field
    pub const FIELD: u8 = 0x53;
    // Custom attribute blobs: named property
    pub const PROPERTY: u8 = 0x54;
    // Custom attribute blobs: enum argument
    pub const ENUM: u8 = 0x55;
}

/// First byte of the non-method signature kinds
#[allow(non_snake_case, missing_docs)]
pub mod SIGNATURE_HEADER {
    pub const FIELD: u8 = 0x06;
    pub const LOCAL_SIG: u8 = 0x07;
    pub const PROPERTY: u8 = 0x08;
    pub const METHOD_SPEC: u8 = 0x0A;
}

/// Parse a method signature blob.
///
/// # Errors
/// Returns an error if the blob is truncated or malformed.
pub fn parse_method_signature(data: &[u8]) -> Result<SignatureMethod> {
    SignatureParser::new(data).parse_method_signature()
}

/// Parse a field signature blob.
///
/// # Errors
/// Returns an error if the blob is truncated or malformed.
pub fn parse_field_signature(data: &[u8]) -> Result<SignatureField> {
    SignatureParser::new(data).parse_field_signature()
}

/// Parse a property signature blob.
///
/// # Errors
/// Returns an error if the blob is truncated or malformed.
pub fn parse_property_signature(data: &[u8]) -> Result<SignatureProperty> {
    SignatureParser::new(data).parse_property_signature()
}

/// Parse a local variable signature blob.
///
/// # Errors
/// Returns an error if the blob is truncated or malformed.
pub fn parse_local_var_signature(data: &[u8]) -> Result<SignatureLocalVariables> {
    SignatureParser::new(data).parse_local_var_signature()
}

/// Parse a type specification blob.
///
/// # Errors
/// Returns an error if the blob is truncated or malformed.
pub fn parse_type_spec_signature(data: &[u8]) -> Result<TypeSignature> {
    SignatureParser::new(data).parse_type()
}

/// Parse a method specification blob.
///
/// # Errors
/// Returns an error if the blob is truncated or malformed.
pub fn parse_method_spec_signature(data: &[u8]) -> Result<SignatureMethodSpec> {
    SignatureParser::new(data).parse_method_spec_signature()
}
