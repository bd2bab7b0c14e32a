//! Building assemblies in memory.
//!
//! The entry point is [`AssemblyBuilder`]. It owns every module, type and member defined
//! in it and hands out `Copy` handles ([`TypeId`], [`MethodId`], ...) from its define
//! operations. The builder views ([`TypeBuilder`], [`MethodBuilder`], ...) are short
//! lived: each borrows the assembly mutably and is obtained again from the handle
//! whenever it is needed.
//!
//! # Lifecycle
//!
//! A type is *open* until [`TypeBuilder::create_type`] succeeds. Structural mutators
//! work only on open types; reflection style queries that need the complete member list
//! (member enumeration, custom attributes, GUID) work only on created types and answer
//! from a [`RuntimeType`] snapshot. Creation validates the type, closes all method bodies
//! and adds the implicit default constructor where one is required. A failed creation
//! leaves the type open.
//!
//! # Tokens
//!
//! Every module resolves the entities its code refers to into tokens of its own
//! [`TokenTable`]. Definition tokens come from definition order; tokens of referenced
//! entities are interned on first use and stay stable for the lifetime of the module.
//!
//! # Example
//!
//! ```rust
//! use dotemit::prelude::*;
//!
//! let mut asm = AssemblyBuilder::new(AssemblyName::new("Hello"), AssemblyBuilderAccess::Run);
//! let module = asm.define_dynamic_module("Hello")?;
//! let program = asm
//!     .module_builder(module)?
//!     .define_type("Program", TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT | TypeAttributes::SEALED)?;
//! let answer = asm.type_builder(program)?.define_method(
//!     "Answer",
//!     MethodAttributes::PUBLIC | MethodAttributes::STATIC,
//!     Type::I4,
//!     vec![],
//! )?;
//!
//! let mut il = asm.il_generator(answer)?;
//! il.emit_i32(OpCode::LDC_I4, 42)?;
//! il.emit(OpCode::RET)?;
//!
//! let runtime = asm.type_builder(program)?.create_type()?;
//! assert_eq!(runtime.method("Answer").map(|m| m.name.as_str()), Some("Answer"));
//! # Ok::<(), dotemit::Error>(())
//! ```

pub(crate) mod data;

mod assembly;
mod customattr;
mod enumbuilder;
mod fieldbuilder;
mod genericparam;
mod handles;
mod members;
mod methodbuilder;
mod module;
mod parameter;
mod property;
mod resolve;
mod runtime;
mod security;
mod tokens;
mod typebuilder;

pub use assembly::{AssemblyBuilder, AssemblyBuilderAccess};
pub use customattr::{CustomAttribute, CustomAttributeBuilder, NamedValue};
pub use data::GenericParamOwner;
pub use enumbuilder::EnumBuilder;
pub use fieldbuilder::FieldBuilder;
pub use genericparam::GenericTypeParameterBuilder;
pub use handles::{EventId, FieldId, GenericParamId, MethodId, ModuleId, PropertyId, TypeId};
pub use members::{FieldRef, MethodRef};
pub use methodbuilder::MethodBuilder;
pub use module::{ModuleBuilder, TokenTarget};
pub use parameter::ParameterBuilder;
pub use property::{EventBuilder, PropertyBuilder};
pub use runtime::{
    RuntimeEvent, RuntimeField, RuntimeMethod, RuntimeParameter, RuntimeProperty, RuntimeType,
};
pub use security::{Permission, PermissionSet};
pub use tokens::{MemberRefRow, MethodSpecRow, ResolvedRef, TokenTable, TypeRefRow};
pub use typebuilder::{Member, TypeBuilder, TypeOptions};
