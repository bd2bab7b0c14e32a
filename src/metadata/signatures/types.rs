use crate::metadata::{flags::CallingConventions, token::Token};

/// A custom modifier (`modreq` / `modopt`) attached to a type in a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CustomModifier {
    /// `true` for `CMOD_REQD`, `false` for `CMOD_OPT`
    pub is_required: bool,
    /// TypeDef, TypeRef or TypeSpec token of the modifier type
    pub modifier_type: Token,
}

/// One type within a signature blob (ECMA-335 II.23.2.12).
///
/// Class and value types are referenced by token, which makes this the module-relative
/// form of a type. The builders work on [`crate::typesystem::Type`] and lower to this
/// representation right before encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[allow(missing_docs)]
pub enum TypeSignature {
    #[default]
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    Ptr(SignaturePointer),
    ByRef(Box<TypeSignature>),
    /// TypeDefOrRefOrSpecEncoded
    ValueType(Token),
    /// TypeDefOrRefOrSpecEncoded
    Class(Token),
    /// Position within the generic parameters of the enclosing type
    GenericParamType(u32),
    Array(SignatureArray),
    GenericInst(Box<TypeSignature>, Vec<TypeSignature>),
    TypedByRef,
    I,
    U,
    FnPtr(Box<SignatureMethod>),
    Object,
    SzArray(SignatureSzArray),
    /// Position within the generic parameters of the enclosing method
    GenericParamMethod(u32),
    Pinned(Box<TypeSignature>),
}

/// A general array: element type, rank, sizes and lower bounds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureArray {
    /// The element type
    pub base: Box<TypeSignature>,
    /// Number of dimensions
    pub rank: u32,
    /// Sizes of the leading dimensions
    pub sizes: Vec<u32>,
    /// Lower bounds of the leading dimensions
    pub lower_bounds: Vec<i32>,
}

/// A single-dimensional, zero-based array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureSzArray {
    /// Modifiers preceding the element type
    pub modifiers: Vec<CustomModifier>,
    /// The element type
    pub base: Box<TypeSignature>,
}

/// An unmanaged pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignaturePointer {
    /// Modifiers preceding the pointee type
    pub modifiers: Vec<CustomModifier>,
    /// The pointee type
    pub base: Box<TypeSignature>,
}

/// A parameter or return type of a method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureParameter {
    /// Custom modifiers, required ones first
    pub modifiers: Vec<CustomModifier>,
    /// Passed by reference
    pub by_ref: bool,
    /// The parameter type
    pub base: TypeSignature,
}

/// A `MethodDefSig`, `MethodRefSig` or `StandAloneMethodSig`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureMethod {
    /// Calling convention byte, the `GENERIC` bit is derived from `generic_param_count`
    pub calling_convention: CallingConventions,
    /// Number of generic parameters of a generic method
    pub generic_param_count: u32,
    /// The return type
    pub return_type: SignatureParameter,
    /// The fixed parameters
    pub params: Vec<SignatureParameter>,
    /// Parameters following the vararg sentinel
    pub varargs: Vec<SignatureParameter>,
}

impl SignatureMethod {
    /// Returns true for instance methods.
    #[must_use]
    pub fn has_this(&self) -> bool {
        self.calling_convention.contains(CallingConventions::HAS_THIS)
    }
}

/// A `FieldSig`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureField {
    /// Custom modifiers of the field type, required ones first
    pub modifiers: Vec<CustomModifier>,
    /// The field type
    pub base: TypeSignature,
}

/// A `PropertySig`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureProperty {
    /// Instance property
    pub has_this: bool,
    /// Custom modifiers of the property type
    pub modifiers: Vec<CustomModifier>,
    /// The property type
    pub base: TypeSignature,
    /// Indexer parameters
    pub params: Vec<SignatureParameter>,
}

/// A `LocalVarSig`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureLocalVariables {
    /// The locals in slot order
    pub locals: Vec<SignatureLocalVariable>,
}

/// One local variable slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureLocalVariable {
    /// Custom modifiers
    pub modifiers: Vec<CustomModifier>,
    /// Declared by reference
    pub is_byref: bool,
    /// Pinned for the duration of the method
    pub is_pinned: bool,
    /// The local type
    pub base: TypeSignature,
}

/// A `MethodSpec` instantiation blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SignatureMethodSpec {
    /// The generic arguments
    pub generic_args: Vec<TypeSignature>,
}
