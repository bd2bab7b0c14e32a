//! Arena rows behind the builder views.
//!
//! The builder types handed to callers are thin views (`&mut AssemblyBuilder` plus a
//! handle); the state they edit lives here. Nothing in this module is public API.

use std::{collections::HashMap, sync::Arc};

use crate::{
    assembly::ILState,
    emit::{
        CustomAttribute, EventId, FieldId, GenericParamId, MethodId, MethodRef, PermissionSet,
        PropertyId, RuntimeType, TokenTable, TypeId,
    },
    metadata::{
        constants::Constant,
        flags::{
            CallingConventions, EventAttributes, FieldAttributes, GenericParameterAttributes,
            MethodAttributes, MethodImplAttributes, PInvokeAttributes, PackingSize,
            ParamAttributes, PropertyAttributes, ResourceAttributes, SecurityAction,
            TypeAttributes,
        },
        marshalling::MarshalDescriptor,
        method::ExceptionHandler,
        token::Token,
    },
    typesystem::{ParamType, Type},
};

/// Lifecycle of a type definition.
#[derive(Debug, Clone)]
pub(crate) enum TypeState {
    Open,
    Created(Arc<RuntimeType>),
}

/// A declarative security entry.
#[derive(Debug, Clone)]
pub(crate) struct SecurityData {
    pub action: SecurityAction,
    pub permission_set: PermissionSet,
}

/// An embedded manifest resource.
#[derive(Debug, Clone)]
pub(crate) struct EmbeddedResource {
    pub name: String,
    pub attributes: ResourceAttributes,
    pub data: Vec<u8>,
}

/// A resource linked from a file next to the manifest module.
#[derive(Debug, Clone)]
pub(crate) struct LinkedResource {
    pub name: String,
    pub file_name: String,
    pub attributes: ResourceAttributes,
    pub hash: Vec<u8>,
}

pub(crate) struct ModuleData {
    pub name: String,
    pub file_name: String,
    pub transient: bool,
    pub global_type: TypeId,
    /// Types in `TypeDef` row order, `<Module>` first
    pub types: Vec<TypeId>,
    pub type_names: HashMap<String, TypeId>,
    /// Fields and methods in provisional token order
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub tokens: TokenTable,
    pub resources: Vec<EmbeddedResource>,
    pub custom_attributes: Vec<CustomAttribute>,
    pub globals_created: bool,
    pub unmanaged_resource: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub(crate) struct TypeData {
    pub module: crate::emit::ModuleId,
    pub namespace: String,
    pub name: String,
    pub attributes: TypeAttributes,
    pub parent: Option<Type>,
    pub interfaces: Vec<Type>,
    pub declaring: Option<TypeId>,
    pub nested: Vec<TypeId>,
    pub generic_params: Vec<GenericParamId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub properties: Vec<PropertyId>,
    pub events: Vec<EventId>,
    pub packing: PackingSize,
    pub size: u32,
    pub custom_attributes: Vec<CustomAttribute>,
    pub security: Vec<SecurityData>,
    /// `(body, declaration)` pairs
    pub overrides: Vec<(MethodRef, MethodRef)>,
    pub state: TypeState,
    /// `TypeDef` row within the module
    pub row: u32,
    pub is_global: bool,
}

impl TypeData {
    pub fn is_created(&self) -> bool {
        matches!(self.state, TypeState::Created(_))
    }

    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FieldData {
    pub declaring: TypeId,
    pub name: String,
    pub field_type: ParamType,
    pub attributes: FieldAttributes,
    pub constant: Option<Constant>,
    pub offset: Option<u32>,
    pub marshal: Option<MarshalDescriptor>,
    /// Initial data of an RVA field
    pub data: Option<Vec<u8>>,
    pub custom_attributes: Vec<CustomAttribute>,
    /// Provisional `Field` row
    pub row: u32,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ParamData {
    pub attributes: ParamAttributes,
    pub name: Option<String>,
    pub constant: Option<Constant>,
    pub marshal: Option<MarshalDescriptor>,
    pub custom_attributes: Vec<CustomAttribute>,
}

#[derive(Debug, Clone)]
pub(crate) struct PInvokeData {
    pub dll_name: String,
    pub entry_name: String,
    pub attributes: PInvokeAttributes,
}

/// A closed method body, ready for the writer.
#[derive(Debug, Clone, Default)]
pub(crate) struct ClosedBody {
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub local_sig: Token,
    pub init_locals: bool,
    pub handlers: Vec<ExceptionHandler>,
    /// Offsets of 4 byte token operands in `code`
    pub token_fixups: Vec<usize>,
}

#[derive(Debug, Clone)]
pub(crate) enum BodyState {
    None,
    Generator(Box<ILState>),
    Raw { code: Vec<u8>, max_stack: u16 },
    Closed(ClosedBody),
}

#[derive(Debug, Clone)]
pub(crate) struct MethodData {
    pub declaring: TypeId,
    pub name: String,
    pub attributes: MethodAttributes,
    pub impl_attributes: MethodImplAttributes,
    pub calling_convention: CallingConventions,
    pub return_type: ParamType,
    pub parameters: Vec<ParamType>,
    /// Index 0 describes the return value, index n the n-th parameter
    pub params: Vec<Option<ParamData>>,
    pub generic_params: Vec<GenericParamId>,
    pub body: BodyState,
    pub init_locals: bool,
    pub pinvoke: Option<PInvokeData>,
    pub custom_attributes: Vec<CustomAttribute>,
    pub security: Vec<SecurityData>,
    /// Provisional `MethodDef` row
    pub row: u32,
}

impl MethodData {
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }

    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    /// Returns true if the method needs IL: not abstract, not a P/Invoke and implemented
    /// in IL by the runtime.
    pub fn needs_body(&self) -> bool {
        !self.attributes.contains(MethodAttributes::ABSTRACT)
            && !self.attributes.contains(MethodAttributes::PINVOKE_IMPL)
            && !self.impl_attributes.contains(MethodImplAttributes::RUNTIME)
            && !self.impl_attributes.contains(MethodImplAttributes::INTERNAL_CALL)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PropertyData {
    pub declaring: TypeId,
    pub name: String,
    pub attributes: PropertyAttributes,
    pub has_this: bool,
    pub property_type: ParamType,
    pub parameters: Vec<ParamType>,
    pub getter: Option<MethodId>,
    pub setter: Option<MethodId>,
    pub others: Vec<MethodId>,
    pub constant: Option<Constant>,
    pub custom_attributes: Vec<CustomAttribute>,
}

#[derive(Debug, Clone)]
pub(crate) struct EventData {
    pub declaring: TypeId,
    pub name: String,
    pub attributes: EventAttributes,
    pub event_type: Type,
    pub add_on: Option<MethodId>,
    pub remove_on: Option<MethodId>,
    pub raise: Option<MethodId>,
    pub others: Vec<MethodId>,
    pub custom_attributes: Vec<CustomAttribute>,
}

/// Owner of a generic parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericParamOwner {
    /// A generic type definition
    Type(TypeId),
    /// A generic method definition
    Method(MethodId),
}

#[derive(Debug, Clone)]
pub(crate) struct GenericParamData {
    pub owner: GenericParamOwner,
    pub position: u32,
    pub name: String,
    pub attributes: GenericParameterAttributes,
    pub base_constraint: Option<Type>,
    pub interface_constraints: Vec<Type>,
    pub custom_attributes: Vec<CustomAttribute>,
}
