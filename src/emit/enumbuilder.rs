//! Enumeration types.

use std::sync::Arc;

use crate::{
    emit::{
        AssemblyBuilder, CustomAttributeBuilder, FieldId, ModuleId, RuntimeType, TypeBuilder,
        TypeId,
    },
    metadata::{
        constants::Constant,
        flags::{FieldAttributes, TypeAttributes},
    },
    typesystem::{ParamType, Type},
    Result,
};

/// Builder view of an enum defined by [`crate::emit::ModuleBuilder::define_enum`].
///
/// An enum is a sealed value type deriving from `System.Enum` with a single instance
/// field `value__` holding the underlying integral value, plus one static literal field
/// per named value.
pub struct EnumBuilder<'a> {
    asm: &'a mut AssemblyBuilder,
    id: TypeId,
}

impl<'a> EnumBuilder<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, id: TypeId) -> Self {
        EnumBuilder { asm, id }
    }

    /// Handle of the enum type.
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// The enum as a type.
    #[must_use]
    pub fn as_type(&self) -> Type {
        Type::Builder(self.id)
    }

    /// Namespace qualified name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn full_name(&self) -> Result<String> {
        self.asm.builder_type_name(self.id)
    }

    /// Defining module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn module(&self) -> Result<ModuleId> {
        Ok(self.asm.type_data(self.id)?.module)
    }

    /// The `value__` field.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the type has no instance field.
    pub fn underlying_field(&self) -> Result<FieldId> {
        let data = self.asm.type_data(self.id)?;
        for field in &data.fields {
            if !self.asm.field_data(*field)?.attributes.is_static() {
                return Ok(*field);
            }
        }
        Err(invalid_operation!("The enum has no underlying field"))
    }

    /// Integral storage type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the type has no instance field.
    pub fn underlying_type(&self) -> Result<Type> {
        self.asm.enum_underlying_type_of(self.id)
    }

    /// Returns true once [`Self::create_type`] has succeeded.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_created(&self) -> Result<bool> {
        Ok(self.asm.type_data(self.id)?.is_created())
    }

    /// Define a named value. The constant must fit the underlying type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad name or a constant of the
    /// wrong type and [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn define_literal(&mut self, name: &str, value: Constant) -> Result<FieldId> {
        self.asm.check_type_open(self.id)?;
        let underlying = self.underlying_type()?;
        if value == Constant::Null {
            return Err(invalid_argument!("literalValue", "An enum literal can not be null"));
        }
        self.asm.check_constant(&underlying, &value)?;

        let field = self.asm.new_field(
            self.id,
            name,
            ParamType::new(Type::Builder(self.id)),
            FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::LITERAL,
        )?;
        let data = self.asm.field_data_mut(field)?;
        data.constant = Some(value);
        data.attributes |= FieldAttributes::HAS_DEFAULT;
        Ok(field)
    }

    /// Apply a custom attribute to the enum type, e.g. `FlagsAttribute`.
    ///
    /// # Errors
    /// See [`TypeBuilder::set_custom_attribute`].
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        TypeBuilder::new(self.asm, self.id).set_custom_attribute(builder)
    }

    /// Type attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn attributes(&self) -> Result<TypeAttributes> {
        Ok(self.asm.type_data(self.id)?.attributes)
    }

    /// Finalize the enum.
    ///
    /// # Errors
    /// See [`TypeBuilder::create_type`].
    pub fn create_type(self) -> Result<Arc<RuntimeType>> {
        TypeBuilder::new(self.asm, self.id).create_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{emit::AssemblyBuilderAccess, metadata::identity::AssemblyName, Error};

    fn setup(underlying: Type) -> (AssemblyBuilder, TypeId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("enums"), AssemblyBuilderAccess::Run);
        let module = asm.define_dynamic_module("enums").unwrap();
        let id = asm
            .module_builder(module)
            .unwrap()
            .define_enum("Ns.Color", TypeAttributes::PUBLIC, underlying)
            .unwrap();
        (asm, id)
    }

    #[test]
    fn literals() {
        let (mut asm, id) = setup(Type::U1);
        let mut builder = asm.enum_builder(id).unwrap();
        assert_eq!(builder.underlying_type().unwrap(), Type::U1);
        assert_eq!(builder.full_name().unwrap(), "Ns.Color");

        let red = builder.define_literal("Red", Constant::U1(1)).unwrap();
        assert!(matches!(
            builder.define_literal("Green", Constant::I4(2)),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(builder.define_literal("None", Constant::Null).is_err());

        let runtime = builder.create_type().unwrap();
        assert_eq!(runtime.fields.len(), 2);
        assert_eq!(runtime.field("Red").unwrap().id, red);
        assert_eq!(runtime.field("Red").unwrap().constant, Some(Constant::U1(1)));
        assert!(runtime.attributes.contains(TypeAttributes::SEALED));

        let mut builder = asm.enum_builder(id).unwrap();
        assert!(builder.is_created().unwrap());
        assert!(matches!(
            builder.define_literal("Blue", Constant::U1(3)),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn value_field() {
        let (mut asm, id) = setup(Type::I8);
        let builder = asm.enum_builder(id).unwrap();
        let field = builder.underlying_field().unwrap();
        let data = asm.field_data(field).unwrap();
        assert_eq!(data.name, "value__");
        assert_eq!(data.field_type.ty, Type::I8);
        assert!(data.attributes.contains(FieldAttributes::RT_SPECIAL_NAME));
    }
}
