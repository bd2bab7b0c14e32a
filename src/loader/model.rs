//! Owned records of a loaded module.

use uguid::Guid;

use crate::{
    emit::PermissionSet,
    metadata::{
        constants::Constant,
        customattributes::CustomAttributeValue,
        flags::{
            EventAttributes, FieldAttributes, FileAttributes, GenericParameterAttributes,
            MethodAttributes, MethodImplAttributes, PInvokeAttributes, ParamAttributes,
            PropertyAttributes, ResourceAttributes, SecurityAction, TypeAttributes,
        },
        identity::AssemblyName,
        marshalling::MarshalDescriptor,
        method::ExceptionHandler,
        signatures::{
            SignatureField, SignatureLocalVariable, SignatureMethod, SignatureProperty,
        },
        token::Token,
    },
};

/// One applied custom attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCustomAttribute {
    /// `MethodDef` or `MemberRef` token of the constructor
    pub constructor: Token,
    /// Full name of the attribute class
    pub attribute_type: String,
    /// The raw value blob
    pub blob: Vec<u8>,
    /// The decoded blob, `None` if an argument type could not be resolved
    pub value: Option<CustomAttributeValue>,
}

/// One declarative security entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSecurity {
    /// The security action
    pub action: SecurityAction,
    /// The decoded permission set
    pub permission_set: PermissionSet,
}

/// The manifest of the assembly, present in the module carrying it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedAssembly {
    /// Identity of the assembly
    pub name: AssemblyName,
    /// Assembly level custom attributes
    pub custom_attributes: Vec<LoadedCustomAttribute>,
    /// Assembly level permission requests
    pub security: Vec<LoadedSecurity>,
}

/// A `File` row of the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    /// File name without a path
    pub name: String,
    /// File flags
    pub attributes: FileAttributes,
    /// Hash of the file contents with the assembly's hash algorithm
    pub hash: Vec<u8>,
}

/// A type exported from another module of the assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedExportedType {
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Type flags
    pub attributes: TypeAttributes,
    /// `TypeDef` row hint inside the defining module
    pub type_def_id: u32,
    /// `File` or enclosing `ExportedType` token
    pub implementation: Token,
}

/// A `ManifestResource` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedResource {
    /// Resource name
    pub name: String,
    /// Visibility flags
    pub attributes: ResourceAttributes,
    /// Null for a resource embedded in this module, otherwise a `File` or `AssemblyRef`
    pub implementation: Token,
    /// Offset inside the resources of the implementing file
    pub offset: u32,
    /// Contents of a resource embedded in this module
    pub data: Option<Vec<u8>>,
}

/// A generic parameter of a type or method.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedGenericParam {
    /// `GenericParam` token
    pub token: Token,
    /// Position within the owner's parameter list
    pub number: u16,
    /// Parameter name
    pub name: String,
    /// Variance and special constraints
    pub attributes: GenericParameterAttributes,
    /// Constraint types in table order
    pub constraints: Vec<Token>,
    /// Applied attributes
    pub custom_attributes: Vec<LoadedCustomAttribute>,
}

/// A field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedField {
    /// `Field` token
    pub token: Token,
    /// Field name
    pub name: String,
    /// Field flags
    pub attributes: FieldAttributes,
    /// Decoded field signature
    pub signature: SignatureField,
    /// Default value
    pub constant: Option<Constant>,
    /// Explicit layout offset
    pub offset: Option<u32>,
    /// Native marshalling
    pub marshal: Option<MarshalDescriptor>,
    /// RVA of the initial value
    pub rva: Option<u32>,
    /// Initial value read from the image, its length taken from the field type
    pub data: Option<Vec<u8>>,
    /// Applied attributes
    pub custom_attributes: Vec<LoadedCustomAttribute>,
}

/// A `Param` row.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedParam {
    /// 0 for the return value, parameters count from 1
    pub sequence: u16,
    /// Parameter name, empty if unnamed
    pub name: String,
    /// Parameter flags
    pub attributes: ParamAttributes,
    /// Default value
    pub constant: Option<Constant>,
    /// Native marshalling
    pub marshal: Option<MarshalDescriptor>,
    /// Applied attributes
    pub custom_attributes: Vec<LoadedCustomAttribute>,
}

/// Platform invoke data of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPInvoke {
    /// Name of the native library
    pub module: String,
    /// Exported function name
    pub entry_point: String,
    /// Platform invoke flags
    pub attributes: PInvokeAttributes,
}

/// A decoded method body.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBody {
    /// Maximum evaluation stack depth
    pub max_stack: usize,
    /// Locals are zero initialized
    pub init_locals: bool,
    /// The instruction stream
    pub code: Vec<u8>,
    /// Exception clauses in table order
    pub handlers: Vec<ExceptionHandler>,
    /// Local variables of the `StandAloneSig` the header points at
    pub locals: Vec<SignatureLocalVariable>,
}

/// A method definition.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedMethod {
    /// `MethodDef` token
    pub token: Token,
    /// Method name
    pub name: String,
    /// Method flags
    pub attributes: MethodAttributes,
    /// Implementation flags
    pub impl_attributes: MethodImplAttributes,
    /// Decoded method signature
    pub signature: SignatureMethod,
    /// RVA of the body, 0 without IL
    pub rva: u32,
    /// `Param` rows in sequence order
    pub params: Vec<LoadedParam>,
    /// Generic parameters of the method
    pub generic_params: Vec<LoadedGenericParam>,
    /// `None` for methods without IL
    pub body: Option<LoadedBody>,
    /// Platform invoke data
    pub pinvoke: Option<LoadedPInvoke>,
    /// Declarative security
    pub security: Vec<LoadedSecurity>,
    /// Applied attributes
    pub custom_attributes: Vec<LoadedCustomAttribute>,
}

impl LoadedMethod {
    /// The parameter row for the 1-based `sequence`.
    #[must_use]
    pub fn param(&self, sequence: u16) -> Option<&LoadedParam> {
        self.params.iter().find(|param| param.sequence == sequence)
    }
}

/// A property definition.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProperty {
    /// `Property` token
    pub token: Token,
    /// Property name
    pub name: String,
    /// Property flags
    pub attributes: PropertyAttributes,
    /// Decoded property signature
    pub signature: SignatureProperty,
    /// Get accessor
    pub getter: Option<Token>,
    /// Set accessor
    pub setter: Option<Token>,
    /// Other associated methods
    pub others: Vec<Token>,
    /// Default value
    pub constant: Option<Constant>,
    /// Applied attributes
    pub custom_attributes: Vec<LoadedCustomAttribute>,
}

/// An event definition.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedEvent {
    /// `Event` token
    pub token: Token,
    /// Event name
    pub name: String,
    /// Event flags
    pub attributes: EventAttributes,
    /// Delegate type of the event
    pub event_type: Token,
    /// Add accessor
    pub add_on: Option<Token>,
    /// Remove accessor
    pub remove_on: Option<Token>,
    /// Raise method
    pub raise: Option<Token>,
    /// Other associated methods
    pub others: Vec<Token>,
    /// Applied attributes
    pub custom_attributes: Vec<LoadedCustomAttribute>,
}

/// A type definition with all of its members.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedType {
    /// `TypeDef` token
    pub token: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Type flags
    pub attributes: TypeAttributes,
    /// Base type, `None` for interfaces and `System.Object`
    pub extends: Option<Token>,
    /// Implemented interfaces in table order
    pub interfaces: Vec<Token>,
    /// Enclosing type of a nested type
    pub enclosing: Option<Token>,
    /// Packing size from `ClassLayout`
    pub packing: Option<u16>,
    /// Total size from `ClassLayout`
    pub class_size: Option<u32>,
    /// Generic parameters of the type
    pub generic_params: Vec<LoadedGenericParam>,
    /// Fields in table order
    pub fields: Vec<LoadedField>,
    /// Methods in table order
    pub methods: Vec<LoadedMethod>,
    /// Properties in table order
    pub properties: Vec<LoadedProperty>,
    /// Events in table order
    pub events: Vec<LoadedEvent>,
    /// `MethodImpl` rows as (body, declaration)
    pub overrides: Vec<(Token, Token)>,
    /// Declarative security
    pub security: Vec<LoadedSecurity>,
    /// Applied attributes
    pub custom_attributes: Vec<LoadedCustomAttribute>,
    pub(crate) full_name: String,
}

impl LoadedType {
    /// Full name, nested types joined with `+`.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The first field called `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&LoadedField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// The first method called `name`.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&LoadedMethod> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// The property called `name`.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&LoadedProperty> {
        self.properties.iter().find(|property| property.name == name)
    }

    /// The event called `name`.
    #[must_use]
    pub fn event(&self, name: &str) -> Option<&LoadedEvent> {
        self.events.iter().find(|event| event.name == name)
    }
}

/// Module level data that is not part of a type.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModuleInfo {
    /// Module name
    pub name: String,
    /// Module version id
    pub mvid: Guid,
    /// Module level attributes
    pub custom_attributes: Vec<LoadedCustomAttribute>,
}
