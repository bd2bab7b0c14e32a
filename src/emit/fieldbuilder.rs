//! Field definitions.

use crate::{
    emit::{
        customattr::PseudoAttribute, AssemblyBuilder, CustomAttribute, CustomAttributeBuilder,
        FieldId, TypeId,
    },
    metadata::{
        constants::Constant, flags::FieldAttributes, marshalling::MarshalDescriptor,
        signatures::ELEMENT_TYPE, token::Token,
    },
    typesystem::{corlib, ParamType, Type},
    Result,
};

impl AssemblyBuilder {
    /// Check that `constant` may be the default value of a location of type `target`.
    ///
    /// Enums take constants of their underlying type; reference types other than
    /// `string` and `object` only take null.
    pub(crate) fn check_constant(&self, target: &Type, constant: &Constant) -> Result<()> {
        let storage = match target {
            Type::Builder(id) if self.type_data(*id)?.parent == Some(corlib::enum_type()) => {
                self.enum_underlying_type_of(*id)?
            }
            Type::External(external) => external
                .enum_underlying_type()
                .cloned()
                .unwrap_or_else(|| target.clone()),
            other => other.clone(),
        };

        let code = match storage.element_type_code() {
            Some(code) => code,
            None if self.is_value_type(&storage)? => ELEMENT_TYPE::VALUETYPE,
            None => ELEMENT_TYPE::CLASS,
        };
        if !constant.is_assignable_to(code) {
            return Err(invalid_argument!(
                "defaultValue",
                "Constant {} does not match type {}",
                constant,
                self.type_name(target)
            ));
        }
        Ok(())
    }
}

/// Builder view of one field.
pub struct FieldBuilder<'a> {
    asm: &'a mut AssemblyBuilder,
    id: FieldId,
}

impl<'a> FieldBuilder<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, id: FieldId) -> Self {
        FieldBuilder { asm, id }
    }

    fn check_open(&self) -> Result<()> {
        let declaring = self.asm.field_data(self.id)?.declaring;
        self.asm.check_type_open(declaring)
    }

    /// Handle of this field.
    #[must_use]
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Field name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn name(&self) -> Result<String> {
        Ok(self.asm.field_data(self.id)?.name.clone())
    }

    /// Declared type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn field_type(&self) -> Result<ParamType> {
        Ok(self.asm.field_data(self.id)?.field_type.clone())
    }

    /// Field attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn attributes(&self) -> Result<FieldAttributes> {
        Ok(self.asm.field_data(self.id)?.attributes)
    }

    /// Declaring type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn declaring_type(&self) -> Result<TypeId> {
        Ok(self.asm.field_data(self.id)?.declaring)
    }

    /// Provisional `Field` token; the persisted image may renumber fields.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn get_token(&self) -> Result<Token> {
        self.asm.field_def_token(self.id)
    }

    /// Set the default value.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the constant does not match the field
    /// type and [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_constant(&mut self, constant: Constant) -> Result<()> {
        self.check_open()?;
        let field_type = self.asm.field_data(self.id)?.field_type.ty.clone();
        self.asm.check_constant(&field_type, &constant)?;

        let data = self.asm.field_data_mut(self.id)?;
        data.constant = Some(constant);
        data.attributes |= FieldAttributes::HAS_DEFAULT;
        Ok(())
    }

    /// Set the offset within an explicit layout type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_offset(&mut self, offset: u32) -> Result<()> {
        self.check_open()?;
        self.asm.field_data_mut(self.id)?.offset = Some(offset);
        Ok(())
    }

    /// Set the native marshalling.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_marshal(&mut self, marshal: MarshalDescriptor) -> Result<()> {
        self.check_open()?;
        let data = self.asm.field_data_mut(self.id)?;
        data.marshal = Some(marshal);
        data.attributes |= FieldAttributes::HAS_FIELD_MARSHAL;
        Ok(())
    }

    /// Read the value of a static field. Builder fields have no storage.
    ///
    /// # Errors
    /// Always [`crate::Error::NotSupported`].
    pub fn get_value(&self) -> Result<Constant> {
        Err(not_supported!("The invoked member is not supported in a dynamic module"))
    }

    /// Apply a custom attribute. `NonSerialized`, `FieldOffset`, `MarshalAs` and
    /// `SpecialName` are stored as flags and tables instead.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad constructor or arguments and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        self.check_open()?;
        let attribute = self.asm.build_custom_attribute(builder)?;
        let pseudo = self.asm.pseudo_attribute(&attribute)?;

        let data = self.asm.field_data_mut(self.id)?;
        match pseudo {
            Some(PseudoAttribute::NonSerialized) => {
                data.attributes |= FieldAttributes::NOT_SERIALIZED;
            }
            Some(PseudoAttribute::SpecialName) => {
                data.attributes |= FieldAttributes::SPECIAL_NAME;
            }
            Some(PseudoAttribute::FieldOffset(offset)) => data.offset = Some(offset),
            Some(PseudoAttribute::MarshalAs(marshal)) => {
                data.marshal = Some(marshal);
                data.attributes |= FieldAttributes::HAS_FIELD_MARSHAL;
            }
            _ => data.custom_attributes.push(attribute),
        }
        Ok(())
    }

    /// Applied custom attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_custom_attributes(&self) -> Result<Vec<CustomAttribute>> {
        let declaring = self.asm.field_data(self.id)?.declaring;
        self.asm.runtime_type(declaring)?;
        Ok(self.asm.field_data(self.id)?.custom_attributes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emit::AssemblyBuilderAccess,
        metadata::{flags::TypeAttributes, identity::AssemblyName},
        Error,
    };

    fn field(field_type: Type) -> (AssemblyBuilder, FieldId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("fields"), AssemblyBuilderAccess::Run);
        let module = asm.define_dynamic_module("fields").unwrap();
        let ty = asm
            .module_builder(module)
            .unwrap()
            .define_type("Holder", TypeAttributes::PUBLIC)
            .unwrap();
        let id = asm
            .type_builder(ty)
            .unwrap()
            .define_field("f", field_type, FieldAttributes::PUBLIC | FieldAttributes::STATIC)
            .unwrap();
        (asm, id)
    }

    #[test]
    fn constants_widen() {
        let (mut asm, id) = field(Type::I8);
        let mut builder = asm.field_builder(id).unwrap();
        builder.set_constant(Constant::I4(5)).unwrap();
        assert!(builder
            .attributes()
            .unwrap()
            .contains(FieldAttributes::HAS_DEFAULT));
        assert!(matches!(
            builder.set_constant(Constant::String("x".into())),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(builder.set_constant(Constant::U8(1)).is_err());
    }

    #[test]
    fn reference_fields_take_null() {
        let (mut asm, id) = field(corlib::exception());
        let mut builder = asm.field_builder(id).unwrap();
        builder.set_constant(Constant::Null).unwrap();
        assert!(builder.set_constant(Constant::I4(0)).is_err());

        let (mut asm, id) = field(Type::Object);
        asm.field_builder(id)
            .unwrap()
            .set_constant(Constant::String("s".into()))
            .unwrap();
    }

    #[test]
    fn enum_fields_take_underlying_constants() {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("fields"), AssemblyBuilderAccess::Run);
        let module = asm.define_dynamic_module("fields").unwrap();
        let color = asm
            .module_builder(module)
            .unwrap()
            .define_enum("Color", TypeAttributes::PUBLIC, Type::I2)
            .unwrap();
        let ty = asm
            .module_builder(module)
            .unwrap()
            .define_type("Palette", TypeAttributes::PUBLIC)
            .unwrap();
        let id = asm
            .type_builder(ty)
            .unwrap()
            .define_field("Default", Type::Builder(color), FieldAttributes::PUBLIC)
            .unwrap();

        let mut builder = asm.field_builder(id).unwrap();
        builder.set_constant(Constant::I2(3)).unwrap();
        assert!(builder.set_constant(Constant::I4(3)).is_err());
    }

    #[test]
    fn pseudo_attributes_and_queries() {
        let (mut asm, id) = field(Type::I4);
        let offset = crate::typesystem::corlib::attribute_constructor(
            "System.Runtime.InteropServices",
            "FieldOffsetAttribute",
            vec![Type::I4],
        );
        let non_serialized =
            crate::typesystem::corlib::attribute_constructor("System", "NonSerializedAttribute", vec![]);

        let mut builder = asm.field_builder(id).unwrap();
        builder
            .set_custom_attribute(&CustomAttributeBuilder::new(
                offset,
                vec![crate::metadata::customattributes::CaValue::I4(8)],
            ))
            .unwrap();
        builder
            .set_custom_attribute(&CustomAttributeBuilder::new(non_serialized, vec![]))
            .unwrap();
        assert!(builder
            .attributes()
            .unwrap()
            .contains(FieldAttributes::NOT_SERIALIZED));
        assert!(matches!(builder.get_value(), Err(Error::NotSupported(_))));
        assert!(matches!(
            builder.get_custom_attributes(),
            Err(Error::NotSupported(_))
        ));
        assert_eq!(asm.field_data(id).unwrap().offset, Some(8));
    }
}
