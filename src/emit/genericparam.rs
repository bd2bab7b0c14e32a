//! Generic parameters of types and methods.

use crate::{
    emit::{
        customattr::PseudoAttribute,
        data::{GenericParamData, GenericParamOwner},
        AssemblyBuilder, CustomAttributeBuilder, GenericParamId, Member, TypeId,
    },
    metadata::flags::GenericParameterAttributes,
    typesystem::Type,
    Result,
};

/// Builder view of one generic parameter.
///
/// The parameter is frozen together with its owner: constraints of a type parameter can
/// be changed until the type is created, those of a method parameter until the declaring
/// type of the method is created.
pub struct GenericTypeParameterBuilder<'a> {
    asm: &'a mut AssemblyBuilder,
    id: GenericParamId,
}

impl<'a> GenericTypeParameterBuilder<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, id: GenericParamId) -> Self {
        GenericTypeParameterBuilder { asm, id }
    }

    fn data(&self) -> Result<&GenericParamData> {
        self.asm.generic_param_data(self.id)
    }

    fn owning_type(&self) -> Result<TypeId> {
        Ok(match self.data()?.owner {
            GenericParamOwner::Type(ty) => ty,
            GenericParamOwner::Method(method) => self.asm.method_data(method)?.declaring,
        })
    }

    fn data_mut(&mut self) -> Result<&mut GenericParamData> {
        let owner = self.owning_type()?;
        self.asm.check_type_open(owner)?;
        self.asm.generic_param_data_mut(self.id)
    }

    /// Handle of this parameter.
    #[must_use]
    pub fn id(&self) -> GenericParamId {
        self.id
    }

    /// The parameter as a type, for use in signatures.
    #[must_use]
    pub fn as_type(&self) -> Type {
        Type::GenericParam(self.id)
    }

    /// A pointer to this parameter, distinct on every call until the owner is created.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn make_pointer_type(&mut self) -> Result<Type> {
        let element = self.as_type();
        Ok(Type::Pointer(self.asm.derived_element(element)?))
    }

    /// A managed reference to this parameter, see [`Self::make_pointer_type`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn make_by_ref_type(&mut self) -> Result<Type> {
        let element = self.as_type();
        Ok(Type::ByRef(self.asm.derived_element(element)?))
    }

    /// An array of this parameter, see [`Self::make_pointer_type`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn make_array_type(&mut self) -> Result<Type> {
        let element = self.as_type();
        Ok(Type::SzArray(self.asm.derived_element(element)?))
    }

    /// Parameter name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn name(&self) -> Result<String> {
        Ok(self.data()?.name.clone())
    }

    /// Zero-based position in the owner's parameter list.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn position(&self) -> Result<u32> {
        Ok(self.data()?.position)
    }

    /// The generic type or method declaring this parameter.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn owner(&self) -> Result<GenericParamOwner> {
        Ok(self.data()?.owner)
    }

    /// Variance and special constraints.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn attributes(&self) -> Result<GenericParameterAttributes> {
        Ok(self.data()?.attributes)
    }

    /// Class constraint, `object` unless one was set.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn base_type_constraint(&self) -> Result<Type> {
        Ok(self.data()?.base_constraint.clone().unwrap_or(Type::Object))
    }

    /// Interface constraints in declaration order.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn interface_constraints(&self) -> Result<Vec<Type>> {
        Ok(self.data()?.interface_constraints.clone())
    }

    /// Set the class constraint. `None` resets it to `object`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an interface and
    /// [`crate::Error::InvalidOperation`] once the owner has been created.
    pub fn set_base_type_constraint(&mut self, base: Option<Type>) -> Result<()> {
        if let Some(base) = &base {
            self.asm.check_type_usable(base)?;
            if self.asm.is_interface(base)? {
                return Err(invalid_argument!(
                    "baseTypeConstraint",
                    "{} is an interface",
                    self.asm.type_name(base)
                ));
            }
        }
        self.data_mut()?.base_constraint = base.filter(|base| *base != Type::Object);
        Ok(())
    }

    /// Replace the interface constraints.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a type that is not an interface and
    /// [`crate::Error::InvalidOperation`] once the owner has been created.
    pub fn set_interface_constraints(&mut self, interfaces: Vec<Type>) -> Result<()> {
        for interface in &interfaces {
            self.asm.check_type_usable(interface)?;
            if !self.asm.is_interface(interface)? {
                return Err(invalid_argument!(
                    "interfaceConstraints",
                    "{} is not an interface",
                    self.asm.type_name(interface)
                ));
            }
        }
        self.data_mut()?.interface_constraints = interfaces;
        Ok(())
    }

    /// Set variance and special constraints.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] once the owner has been created.
    pub fn set_generic_parameter_attributes(
        &mut self,
        attributes: GenericParameterAttributes,
    ) -> Result<()> {
        self.data_mut()?.attributes = attributes;
        Ok(())
    }

    /// Apply a custom attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad constructor or arguments and
    /// [`crate::Error::InvalidOperation`] once the owner has been created.
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        let attribute = self.asm.build_custom_attribute(builder)?;
        match self.asm.pseudo_attribute(&attribute)? {
            Some(PseudoAttribute::SuppressUnmanagedCodeSecurity) | None => {}
            Some(_) => {
                return Err(invalid_argument!(
                    "customBuilder",
                    "The attribute does not apply to a generic parameter"
                ));
            }
        }
        self.data_mut()?.custom_attributes.push(attribute);
        Ok(())
    }

    /// A placeholder type has no members.
    ///
    /// # Errors
    /// Always [`crate::Error::NotSupported`].
    pub fn get_members(&self) -> Result<Vec<Member>> {
        Err(not_supported!("A generic parameter has no members"))
    }

    /// A placeholder type has no interface map.
    ///
    /// # Errors
    /// Always [`crate::Error::NotSupported`].
    pub fn get_interface(&self, _name: &str) -> Result<Option<Type>> {
        Err(not_supported!("A generic parameter has no members"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emit::AssemblyBuilderAccess,
        metadata::{flags::TypeAttributes, identity::AssemblyName},
        typesystem::corlib,
        Error,
    };

    fn setup() -> (AssemblyBuilder, TypeId, GenericParamId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("generic"), AssemblyBuilderAccess::Run);
        let module = asm.define_dynamic_module("generic").unwrap();
        let ty = asm
            .module_builder(module)
            .unwrap()
            .define_type("Box", TypeAttributes::PUBLIC)
            .unwrap();
        let params = asm
            .type_builder(ty)
            .unwrap()
            .define_generic_parameters(&["T"])
            .unwrap();
        (asm, ty, params[0])
    }

    #[test]
    fn constraints() {
        let (mut asm, ty, param) = setup();
        let mut builder = asm.generic_param_builder(param).unwrap();
        assert_eq!(builder.name().unwrap(), "T");
        assert_eq!(builder.position().unwrap(), 0);
        assert_eq!(builder.owner().unwrap(), GenericParamOwner::Type(ty));
        assert_eq!(builder.base_type_constraint().unwrap(), Type::Object);

        builder
            .set_base_type_constraint(Some(corlib::exception()))
            .unwrap();
        assert!(matches!(
            builder.set_base_type_constraint(Some(corlib::idisposable())),
            Err(Error::InvalidArgument { .. })
        ));
        builder
            .set_interface_constraints(vec![corlib::idisposable()])
            .unwrap();
        assert!(builder
            .set_interface_constraints(vec![corlib::exception()])
            .is_err());
        builder
            .set_generic_parameter_attributes(
                GenericParameterAttributes::DEFAULT_CONSTRUCTOR_CONSTRAINT,
            )
            .unwrap();
        builder.set_base_type_constraint(None).unwrap();
        assert_eq!(builder.base_type_constraint().unwrap(), Type::Object);
        assert_eq!(
            builder.interface_constraints().unwrap(),
            vec![corlib::idisposable()]
        );
        assert!(matches!(builder.get_members(), Err(Error::NotSupported(_))));
    }

    #[test]
    fn frozen_with_the_owner() {
        let (mut asm, ty, param) = setup();
        asm.type_builder(ty).unwrap().create_type().unwrap();
        assert!(matches!(
            asm.generic_param_builder(param)
                .unwrap()
                .set_base_type_constraint(Some(corlib::exception())),
            Err(Error::InvalidOperation(_))
        ));
    }
}
