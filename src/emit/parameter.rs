//! Parameter descriptions of a method.

use crate::{
    emit::{
        customattr::PseudoAttribute, data::ParamData, AssemblyBuilder, CustomAttributeBuilder,
        MethodId,
    },
    metadata::{constants::Constant, flags::ParamAttributes, marshalling::MarshalDescriptor},
    typesystem::Type,
    Result,
};

/// Builder view of one parameter, created by
/// [`crate::emit::MethodBuilder::define_parameter`].
pub struct ParameterBuilder<'a> {
    asm: &'a mut AssemblyBuilder,
    method: MethodId,
    position: usize,
}

impl<'a> ParameterBuilder<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, method: MethodId, position: usize) -> Self {
        ParameterBuilder {
            asm,
            method,
            position,
        }
    }

    fn data(&self) -> Result<&ParamData> {
        self.asm.method_data(self.method)?.params[self.position]
            .as_ref()
            .ok_or_else(|| invalid_operation!("Parameter {} is not defined", self.position))
    }

    fn data_mut(&mut self) -> Result<&mut ParamData> {
        let declaring = self.asm.method_data(self.method)?.declaring;
        self.asm.check_type_open(declaring)?;
        let position = self.position;
        self.asm.method_data_mut(self.method)?.params[position]
            .as_mut()
            .ok_or_else(|| invalid_operation!("Parameter {} is not defined", position))
    }

    /// The declaring method.
    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Position: 0 for the return value, 1 for the first parameter.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Parameter name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn name(&self) -> Result<Option<String>> {
        Ok(self.data()?.name.clone())
    }

    /// Parameter attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn attributes(&self) -> Result<ParamAttributes> {
        Ok(self.data()?.attributes)
    }

    /// Returns true for `[in]` parameters.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_in(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(ParamAttributes::IN))
    }

    /// Returns true for `[out]` parameters.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_out(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(ParamAttributes::OUT))
    }

    /// Returns true for `[opt]` parameters.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_optional(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(ParamAttributes::OPTIONAL))
    }

    fn parameter_type(&self) -> Result<Type> {
        let data = self.asm.method_data(self.method)?;
        Ok(match self.position {
            0 => data.return_type.ty.clone(),
            position => data.parameters[position - 1].ty.clone(),
        })
    }

    /// Set the default value.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the constant does not match the
    /// parameter type and [`crate::Error::InvalidOperation`] after the type has been
    /// created.
    pub fn set_constant(&mut self, constant: Constant) -> Result<()> {
        let parameter_type = self.parameter_type()?;
        let target = match parameter_type {
            Type::ByRef(inner) => inner.into_inner(),
            other => other,
        };
        self.asm.check_constant(&target, &constant)?;

        let data = self.data_mut()?;
        data.constant = Some(constant);
        data.attributes |= ParamAttributes::HAS_DEFAULT;
        Ok(())
    }

    /// Set the native marshalling.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_marshal(&mut self, marshal: MarshalDescriptor) -> Result<()> {
        let data = self.data_mut()?;
        data.marshal = Some(marshal);
        data.attributes |= ParamAttributes::HAS_FIELD_MARSHAL;
        Ok(())
    }

    /// Apply a custom attribute. `MarshalAs` is stored as marshalling information.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad constructor or arguments and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        let attribute = self.asm.build_custom_attribute(builder)?;
        let pseudo = self.asm.pseudo_attribute(&attribute)?;

        let data = self.data_mut()?;
        match pseudo {
            Some(PseudoAttribute::MarshalAs(marshal)) => {
                data.marshal = Some(marshal);
                data.attributes |= ParamAttributes::HAS_FIELD_MARSHAL;
            }
            _ => data.custom_attributes.push(attribute),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emit::{AssemblyBuilderAccess, TypeId},
        metadata::{
            flags::{MethodAttributes, TypeAttributes},
            identity::AssemblyName,
        },
        Error,
    };

    fn method() -> (AssemblyBuilder, TypeId, MethodId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("params"), AssemblyBuilderAccess::Run);
        let module = asm.define_dynamic_module("params").unwrap();
        let ty = asm
            .module_builder(module)
            .unwrap()
            .define_type("Host", TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT)
            .unwrap();
        let method = asm
            .type_builder(ty)
            .unwrap()
            .define_method(
                "Run",
                MethodAttributes::PUBLIC | MethodAttributes::ABSTRACT | MethodAttributes::VIRTUAL,
                Type::Void,
                vec![Type::I4, Type::String.make_by_ref_type()],
            )
            .unwrap();
        (asm, ty, method)
    }

    #[test]
    fn defaults_follow_the_parameter_type() {
        let (mut asm, _, method) = method();
        let mut count = asm
            .method_builder(method)
            .unwrap()
            .define_parameter(1, ParamAttributes::OPTIONAL, Some("count"))
            .unwrap();
        count.set_constant(Constant::I4(10)).unwrap();
        assert!(count.is_optional().unwrap());
        assert!(count
            .attributes()
            .unwrap()
            .contains(ParamAttributes::HAS_DEFAULT));
        assert!(matches!(
            count.set_constant(Constant::String("ten".into())),
            Err(Error::InvalidArgument { .. })
        ));

        let mut text = asm
            .method_builder(method)
            .unwrap()
            .define_parameter(2, ParamAttributes::OUT, Some("text"))
            .unwrap();
        text.set_constant(Constant::Null).unwrap();
        assert!(text.is_out().unwrap());
        assert_eq!(text.name().unwrap().as_deref(), Some("text"));
    }

    #[test]
    fn frozen_after_creation() {
        let (mut asm, ty, method) = method();
        asm.method_builder(method)
            .unwrap()
            .define_parameter(1, ParamAttributes::empty(), Some("count"))
            .unwrap();
        asm.type_builder(ty).unwrap().create_type().unwrap();

        let params = asm.method_data(method).unwrap().params.clone();
        assert_eq!(params[1].as_ref().unwrap().name.as_deref(), Some("count"));
        assert!(matches!(
            asm.method_builder(method)
                .unwrap()
                .define_parameter(1, ParamAttributes::empty(), None),
            Err(Error::InvalidOperation(_))
        ));
    }
}
