//! The read-only view of a created type.
//!
//! [`crate::emit::TypeBuilder::create_type`] freezes the definition into a
//! [`RuntimeType`]. Reflection style queries that the builder refuses while the type is
//! open (member enumeration, custom attributes, GUID) are answered from this snapshot.

use sha1::{Digest, Sha1};
use uguid::Guid;

use crate::{
    emit::{
        data::TypeData, AssemblyBuilder, CustomAttribute, EventId, FieldId, GenericParamId,
        Member, MethodId, PropertyId, TypeId,
    },
    metadata::{
        constants::Constant,
        flags::{
            EventAttributes, FieldAttributes, MethodAttributes, MethodImplAttributes,
            PackingSize, ParamAttributes, PropertyAttributes, TypeAttributes,
        },
    },
    typesystem::{MethodSignature, ParamType, Type},
    Result,
};

/// A field of a created type.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeField {
    /// Handle of the definition
    pub id: FieldId,
    /// Field name
    pub name: String,
    /// Declared type with custom modifiers
    pub field_type: ParamType,
    /// Field attributes
    pub attributes: FieldAttributes,
    /// Default value
    pub constant: Option<Constant>,
    /// Explicit layout offset
    pub offset: Option<u32>,
}

/// A parameter of a created method.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeParameter {
    /// 1-based position, 0 for the return value
    pub position: u32,
    /// Name, if one was defined
    pub name: Option<String>,
    /// Declared type with custom modifiers
    pub parameter_type: ParamType,
    /// Parameter attributes
    pub attributes: ParamAttributes,
    /// Default value
    pub default_value: Option<Constant>,
}

/// A method or constructor of a created type.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeMethod {
    /// Handle of the definition
    pub id: MethodId,
    /// Method name
    pub name: String,
    /// Method attributes
    pub attributes: MethodAttributes,
    /// Implementation attributes
    pub impl_attributes: MethodImplAttributes,
    /// Signature as declared
    pub signature: MethodSignature,
    /// Parameters in declaration order
    pub parameters: Vec<RuntimeParameter>,
    /// Generic parameters of a generic method definition
    pub generic_parameters: Vec<GenericParamId>,
    /// Applied custom attributes
    pub custom_attributes: Vec<CustomAttribute>,
}

/// A property of a created type.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeProperty {
    /// Handle of the definition
    pub id: PropertyId,
    /// Property name
    pub name: String,
    /// Property type
    pub property_type: ParamType,
    /// Property attributes
    pub attributes: PropertyAttributes,
    /// Get accessor
    pub getter: Option<MethodId>,
    /// Set accessor
    pub setter: Option<MethodId>,
}

/// An event of a created type.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeEvent {
    /// Handle of the definition
    pub id: EventId,
    /// Event name
    pub name: String,
    /// Delegate type
    pub event_type: Type,
    /// Event attributes
    pub attributes: EventAttributes,
    /// Add accessor
    pub add_on: Option<MethodId>,
    /// Remove accessor
    pub remove_on: Option<MethodId>,
    /// Raise method
    pub raise: Option<MethodId>,
}

/// A created type.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeType {
    /// Handle of the definition
    pub id: TypeId,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Full name, nested types joined with `+`
    pub full_name: String,
    /// Type attributes
    pub attributes: TypeAttributes,
    /// Base type
    pub base_type: Option<Type>,
    /// Directly implemented interfaces
    pub interfaces: Vec<Type>,
    /// Generic parameters of a generic type definition
    pub generic_parameters: Vec<GenericParamId>,
    /// Fields in declaration order
    pub fields: Vec<RuntimeField>,
    /// Methods, constructors excluded
    pub methods: Vec<RuntimeMethod>,
    /// Instance constructors
    pub constructors: Vec<RuntimeMethod>,
    /// The static constructor
    pub type_initializer: Option<RuntimeMethod>,
    /// Properties in declaration order
    pub properties: Vec<RuntimeProperty>,
    /// Events in declaration order
    pub events: Vec<RuntimeEvent>,
    /// Nested types in declaration order
    pub nested_types: Vec<TypeId>,
    /// Applied custom attributes, pseudo attributes excluded
    pub custom_attributes: Vec<CustomAttribute>,
    /// Packing size
    pub packing: PackingSize,
    /// Class size, 0 if unspecified
    pub size: u32,
    /// Stable identifier derived from the assembly and type names
    pub guid: Guid,
}

impl RuntimeType {
    /// Every member: fields, constructors, methods, properties, events and nested types.
    #[must_use]
    pub fn members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = Vec::new();
        members.extend(self.fields.iter().cloned().map(Member::Field));
        members.extend(self.constructors.iter().cloned().map(Member::Constructor));
        members.extend(self.type_initializer.iter().cloned().map(Member::Constructor));
        members.extend(self.methods.iter().cloned().map(Member::Method));
        members.extend(self.properties.iter().cloned().map(Member::Property));
        members.extend(self.events.iter().cloned().map(Member::Event));
        members.extend(self.nested_types.iter().copied().map(Member::NestedType));
        members
    }

    /// Field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&RuntimeField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// First method with the given name.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&RuntimeMethod> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// Property by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&RuntimeProperty> {
        self.properties.iter().find(|property| property.name == name)
    }

    /// Event by name.
    #[must_use]
    pub fn event(&self, name: &str) -> Option<&RuntimeEvent> {
        self.events.iter().find(|event| event.name == name)
    }

    /// Returns true if an attribute whose constructor is declared on `attribute_type` is
    /// applied.
    #[must_use]
    pub fn is_defined(&self, asm: &AssemblyBuilder, attribute_type: &Type) -> bool {
        self.custom_attributes.iter().any(|attribute| {
            asm.method_ref_declaring_type(&attribute.constructor)
                .is_ok_and(|declaring| declaring == *attribute_type)
        })
    }
}

/// Deterministic type GUID: a name based (version 5 layout) hash of the assembly and type
/// names.
fn type_guid(assembly_name: &str, full_name: &str) -> Guid {
    let mut hasher = Sha1::new();
    hasher.update(assembly_name.as_bytes());
    hasher.update([0]);
    hasher.update(full_name.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[7] = (bytes[7] & 0x0F) | 0x50;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    Guid::from_bytes(bytes)
}

impl AssemblyBuilder {
    fn runtime_method(&self, id: MethodId) -> Result<RuntimeMethod> {
        let data = self.method_data(id)?;
        let signature = self.method_definition_signature(id)?;
        #[allow(clippy::cast_possible_truncation)]
        let parameters = signature
            .parameters
            .iter()
            .enumerate()
            .map(|(index, parameter_type)| {
                let position = index as u32 + 1;
                let param = data.params.get(position as usize).and_then(Option::as_ref);
                RuntimeParameter {
                    position,
                    name: param.and_then(|param| param.name.clone()),
                    parameter_type: parameter_type.clone(),
                    attributes: param.map(|param| param.attributes).unwrap_or_default(),
                    default_value: param.and_then(|param| param.constant.clone()),
                }
            })
            .collect();

        Ok(RuntimeMethod {
            id,
            name: data.name.clone(),
            attributes: data.attributes,
            impl_attributes: data.impl_attributes,
            signature,
            parameters,
            generic_parameters: data.generic_params.clone(),
            custom_attributes: data.custom_attributes.clone(),
        })
    }

    /// Freeze the current state of a type definition.
    pub(crate) fn runtime_snapshot(&self, id: TypeId) -> Result<RuntimeType> {
        let data: &TypeData = self.type_data(id)?;
        let full_name = self.builder_type_name(id)?;

        let fields = data
            .fields
            .iter()
            .map(|field| {
                let field_data = self.field_data(*field)?;
                Ok(RuntimeField {
                    id: *field,
                    name: field_data.name.clone(),
                    field_type: field_data.field_type.clone(),
                    attributes: field_data.attributes,
                    constant: field_data.constant.clone(),
                    offset: field_data.offset,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut methods = Vec::new();
        let mut constructors = Vec::new();
        let mut type_initializer = None;
        for method in &data.methods {
            let runtime = self.runtime_method(*method)?;
            match runtime.name.as_str() {
                ".ctor" => constructors.push(runtime),
                ".cctor" => type_initializer = Some(runtime),
                _ => methods.push(runtime),
            }
        }

        let properties = data
            .properties
            .iter()
            .map(|property| {
                let property_data = self.property_data(*property)?;
                Ok(RuntimeProperty {
                    id: *property,
                    name: property_data.name.clone(),
                    property_type: property_data.property_type.clone(),
                    attributes: property_data.attributes,
                    getter: property_data.getter,
                    setter: property_data.setter,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let events = data
            .events
            .iter()
            .map(|event| {
                let event_data = self.event_data(*event)?;
                Ok(RuntimeEvent {
                    id: *event,
                    name: event_data.name.clone(),
                    event_type: event_data.event_type.clone(),
                    attributes: event_data.attributes,
                    add_on: event_data.add_on,
                    remove_on: event_data.remove_on,
                    raise: event_data.raise,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RuntimeType {
            id,
            namespace: data.namespace.clone(),
            name: data.name.clone(),
            guid: type_guid(&self.name.name, &full_name),
            full_name,
            attributes: data.attributes,
            base_type: data.parent.clone(),
            interfaces: data.interfaces.clone(),
            generic_parameters: data.generic_params.clone(),
            fields,
            methods,
            constructors,
            type_initializer,
            properties,
            events,
            nested_types: data.nested.clone(),
            custom_attributes: data.custom_attributes.clone(),
            packing: data.packing,
            size: data.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guids_are_stable_and_versioned() {
        let first = type_guid("A", "N.T");
        assert_eq!(first, type_guid("A", "N.T"));
        assert_ne!(first, type_guid("B", "N.T"));

        let bytes = first.to_bytes();
        assert_eq!(bytes[7] >> 4, 5);
        assert_eq!(bytes[8] & 0xC0, 0x80);
    }
}
