//! # dotemit Prelude
//!
//! The types needed to define, persist and reload an assembly, for glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotemit operations
pub use crate::Error;

/// Classification of errors
pub use crate::ErrorKind;

/// The result type used throughout dotemit
pub use crate::Result;

// ================================================================================================
// Builders
// ================================================================================================

/// Assembly, module and type builders
pub use crate::emit::{
    AssemblyBuilder, AssemblyBuilderAccess, EnumBuilder, ModuleBuilder, TypeBuilder,
    TypeOptions,
};

/// Member builders
pub use crate::emit::{
    EventBuilder, FieldBuilder, GenericTypeParameterBuilder, MethodBuilder, ParameterBuilder,
    PropertyBuilder,
};

/// Entity handles
pub use crate::emit::{EventId, FieldId, GenericParamId, MethodId, ModuleId, PropertyId, TypeId};

/// Member references and attribute applications
pub use crate::emit::{CustomAttributeBuilder, FieldRef, MethodRef, PermissionSet};

/// Instruction stream building
pub use crate::assembly::{ILGenerator, Label, LocalBuilder, OpCode};

// ================================================================================================
// Type System
// ================================================================================================

/// Types, external types and signatures
pub use crate::typesystem::{corlib, ExternalMethod, ExternalType, MethodSignature, ParamType, Type};

// ================================================================================================
// Metadata Vocabulary
// ================================================================================================

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Attribute flag sets
pub use crate::metadata::flags::{
    CallingConventions, EventAttributes, FieldAttributes, GenericParameterAttributes,
    MethodAttributes, MethodImplAttributes, ParamAttributes, PropertyAttributes,
    ResourceAttributes, SecurityAction, TypeAttributes,
};

/// Assembly identity
pub use crate::metadata::identity::{AssemblyName, AssemblyVersion, StrongNameKeyPair};

/// Constant values and attribute arguments
pub use crate::metadata::{constants::Constant, customattributes::CaValue};

// ================================================================================================
// Persistence and Loading
// ================================================================================================

/// Emission and image options
pub use crate::config::{
    EmitOptions, ImageFileMachine, PEFileKinds, PortableExecutableKinds, SaveOptions,
};

/// Read-only view of persisted images
pub use crate::loader::{LoadedModule, LoadedType};

/// Evidence of saved assemblies
pub use crate::evidence::{Hash, StrongName, StrongNamePublicKeyBlob};
