//! Property and event definitions.
//!
//! Both only tie existing methods of the declaring type together; the accessors must be
//! defined on the same type before they are attached.

use crate::{
    emit::{
        customattr::PseudoAttribute,
        data::{EventData, PropertyData},
        AssemblyBuilder, CustomAttributeBuilder, EventId, MethodId, PropertyId, TypeId,
    },
    metadata::{
        constants::Constant,
        flags::{EventAttributes, PropertyAttributes},
        tables::TableId,
        token::Token,
    },
    typesystem::{ParamType, Type},
    Result,
};

impl AssemblyBuilder {
    /// Check that `method` may be an accessor of a member declared on `declaring`.
    fn check_accessor(&self, declaring: TypeId, method: MethodId) -> Result<()> {
        self.check_type_open(declaring)?;
        if self.method_data(method)?.declaring != declaring {
            return Err(invalid_argument!(
                "mdBuilder",
                "The accessor must be defined on the declaring type"
            ));
        }
        Ok(())
    }
}

/// Builder view of one property.
pub struct PropertyBuilder<'a> {
    asm: &'a mut AssemblyBuilder,
    id: PropertyId,
}

impl<'a> PropertyBuilder<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, id: PropertyId) -> Self {
        PropertyBuilder { asm, id }
    }

    fn data(&self) -> Result<&PropertyData> {
        self.asm.property_data(self.id)
    }

    fn attach(&mut self, method: MethodId) -> Result<&mut PropertyData> {
        let declaring = self.data()?.declaring;
        self.asm.check_accessor(declaring, method)?;
        self.asm.property_data_mut(self.id)
    }

    /// Handle of this property.
    #[must_use]
    pub fn id(&self) -> PropertyId {
        self.id
    }

    /// Property name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn name(&self) -> Result<String> {
        Ok(self.data()?.name.clone())
    }

    /// Property attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn attributes(&self) -> Result<PropertyAttributes> {
        Ok(self.data()?.attributes)
    }

    /// Property type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn property_type(&self) -> Result<ParamType> {
        Ok(self.data()?.property_type.clone())
    }

    /// Declaring type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn declaring_type(&self) -> Result<TypeId> {
        Ok(self.data()?.declaring)
    }

    /// Returns true if a get accessor is attached.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn can_read(&self) -> Result<bool> {
        Ok(self.data()?.getter.is_some())
    }

    /// Returns true if a set accessor is attached.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn can_write(&self) -> Result<bool> {
        Ok(self.data()?.setter.is_some())
    }

    /// Provisional `Property` token; the persisted image may renumber properties.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_token(&self) -> Result<Token> {
        Ok(Token::from_parts(TableId::Property, self.id.index() as u32 + 1))
    }

    /// Attach the get accessor.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a method of another type and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_get_method(&mut self, method: MethodId) -> Result<()> {
        self.attach(method)?.getter = Some(method);
        Ok(())
    }

    /// Attach the set accessor.
    ///
    /// # Errors
    /// See [`Self::set_get_method`].
    pub fn set_set_method(&mut self, method: MethodId) -> Result<()> {
        self.attach(method)?.setter = Some(method);
        Ok(())
    }

    /// Attach an additional accessor.
    ///
    /// # Errors
    /// See [`Self::set_get_method`].
    pub fn add_other_method(&mut self, method: MethodId) -> Result<()> {
        self.attach(method)?.others.push(method);
        Ok(())
    }

    /// Set the default value.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the constant does not match the
    /// property type and [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_constant(&mut self, constant: Constant) -> Result<()> {
        let declaring = self.data()?.declaring;
        self.asm.check_type_open(declaring)?;
        let property_type = self.data()?.property_type.ty.clone();
        self.asm.check_constant(&property_type, &constant)?;

        let data = self.asm.property_data_mut(self.id)?;
        data.constant = Some(constant);
        data.attributes |= PropertyAttributes::HAS_DEFAULT;
        Ok(())
    }

    /// Apply a custom attribute. `SpecialName` becomes a flag.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad constructor or arguments and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        let declaring = self.data()?.declaring;
        self.asm.check_type_open(declaring)?;
        let attribute = self.asm.build_custom_attribute(builder)?;
        let pseudo = self.asm.pseudo_attribute(&attribute)?;

        let data = self.asm.property_data_mut(self.id)?;
        match pseudo {
            Some(PseudoAttribute::SpecialName) => data.attributes |= PropertyAttributes::SPECIAL_NAME,
            _ => data.custom_attributes.push(attribute),
        }
        Ok(())
    }

    /// Properties of builder types have no storage.
    ///
    /// # Errors
    /// Always [`crate::Error::NotSupported`].
    pub fn get_value(&self) -> Result<Constant> {
        Err(not_supported!("The invoked member is not supported in a dynamic module"))
    }

    /// Properties of builder types have no storage.
    ///
    /// # Errors
    /// Always [`crate::Error::NotSupported`].
    pub fn set_value(&mut self, _value: Constant) -> Result<()> {
        Err(not_supported!("The invoked member is not supported in a dynamic module"))
    }
}

/// Builder view of one event.
pub struct EventBuilder<'a> {
    asm: &'a mut AssemblyBuilder,
    id: EventId,
}

impl<'a> EventBuilder<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, id: EventId) -> Self {
        EventBuilder { asm, id }
    }

    fn data(&self) -> Result<&EventData> {
        self.asm.event_data(self.id)
    }

    fn attach(&mut self, method: MethodId) -> Result<&mut EventData> {
        let declaring = self.data()?.declaring;
        self.asm.check_accessor(declaring, method)?;
        self.asm.event_data_mut(self.id)
    }

    /// Handle of this event.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Event name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn name(&self) -> Result<String> {
        Ok(self.data()?.name.clone())
    }

    /// Event attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn attributes(&self) -> Result<EventAttributes> {
        Ok(self.data()?.attributes)
    }

    /// Delegate type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn event_type(&self) -> Result<Type> {
        Ok(self.data()?.event_type.clone())
    }

    /// Provisional `Event` token; the persisted image may renumber events.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_event_token(&self) -> Result<Token> {
        self.data()?;
        Ok(Token::from_parts(TableId::Event, self.id.index() as u32 + 1))
    }

    /// Attach the add accessor.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a method of another type and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_add_on_method(&mut self, method: MethodId) -> Result<()> {
        self.attach(method)?.add_on = Some(method);
        Ok(())
    }

    /// Attach the remove accessor.
    ///
    /// # Errors
    /// See [`Self::set_add_on_method`].
    pub fn set_remove_on_method(&mut self, method: MethodId) -> Result<()> {
        self.attach(method)?.remove_on = Some(method);
        Ok(())
    }

    /// Attach the raise method.
    ///
    /// # Errors
    /// See [`Self::set_add_on_method`].
    pub fn set_raise_method(&mut self, method: MethodId) -> Result<()> {
        self.attach(method)?.raise = Some(method);
        Ok(())
    }

    /// Attach an additional accessor.
    ///
    /// # Errors
    /// See [`Self::set_add_on_method`].
    pub fn add_other_method(&mut self, method: MethodId) -> Result<()> {
        self.attach(method)?.others.push(method);
        Ok(())
    }

    /// Apply a custom attribute. `SpecialName` becomes a flag.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad constructor or arguments and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        let declaring = self.data()?.declaring;
        self.asm.check_type_open(declaring)?;
        let attribute = self.asm.build_custom_attribute(builder)?;
        let pseudo = self.asm.pseudo_attribute(&attribute)?;

        let data = self.asm.event_data_mut(self.id)?;
        match pseudo {
            Some(PseudoAttribute::SpecialName) => data.attributes |= EventAttributes::SPECIAL_NAME,
            _ => data.custom_attributes.push(attribute),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emit::AssemblyBuilderAccess,
        metadata::{
            flags::{MethodAttributes, TypeAttributes},
            identity::AssemblyName,
        },
        typesystem::corlib,
        Error,
    };

    fn setup() -> (AssemblyBuilder, TypeId, TypeId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("props"), AssemblyBuilderAccess::Run);
        let module = asm.define_dynamic_module("props").unwrap();
        let attrs = TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT;
        let first = asm
            .module_builder(module)
            .unwrap()
            .define_type("First", attrs)
            .unwrap();
        let second = asm
            .module_builder(module)
            .unwrap()
            .define_type("Second", attrs)
            .unwrap();
        (asm, first, second)
    }

    fn accessor(asm: &mut AssemblyBuilder, ty: TypeId, name: &str, ret: Type, params: Vec<Type>) -> MethodId {
        asm.type_builder(ty)
            .unwrap()
            .define_method(
                name,
                MethodAttributes::PUBLIC
                    | MethodAttributes::ABSTRACT
                    | MethodAttributes::VIRTUAL
                    | MethodAttributes::SPECIAL_NAME,
                ret,
                params,
            )
            .unwrap()
    }

    #[test]
    fn property_accessors_stay_on_their_type() {
        let (mut asm, first, second) = setup();
        let getter = accessor(&mut asm, first, "get_Count", Type::I4, vec![]);
        let foreign = accessor(&mut asm, second, "get_Other", Type::I4, vec![]);
        let property = asm
            .type_builder(first)
            .unwrap()
            .define_property("Count", PropertyAttributes::empty(), Type::I4, vec![])
            .unwrap();

        let mut builder = asm.property_builder(property).unwrap();
        builder.set_get_method(getter).unwrap();
        assert!(builder.can_read().unwrap());
        assert!(!builder.can_write().unwrap());
        assert!(matches!(
            builder.set_set_method(foreign),
            Err(Error::InvalidArgument { .. })
        ));
        builder.set_constant(Constant::I4(1)).unwrap();
        assert!(builder.set_constant(Constant::R8(1.0)).is_err());
        assert!(matches!(builder.get_value(), Err(Error::NotSupported(_))));
        assert_eq!(builder.get_token().unwrap().row(), 1);

        asm.type_builder(first).unwrap().create_type().unwrap();
        let runtime = asm.runtime_type(first).unwrap();
        assert_eq!(runtime.property("Count").unwrap().getter, Some(getter));
        assert!(matches!(
            asm.property_builder(property).unwrap().set_get_method(getter),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn event_accessors() {
        let (mut asm, first, second) = setup();
        let handler = corlib::event_handler();
        let add = accessor(&mut asm, first, "add_Changed", Type::Void, vec![handler.clone()]);
        let remove = accessor(&mut asm, first, "remove_Changed", Type::Void, vec![handler.clone()]);
        let foreign = accessor(&mut asm, second, "raise_Changed", Type::Void, vec![]);
        let event = asm
            .type_builder(first)
            .unwrap()
            .define_event("Changed", EventAttributes::empty(), handler.clone())
            .unwrap();

        let mut builder = asm.event_builder(event).unwrap();
        builder.set_add_on_method(add).unwrap();
        builder.set_remove_on_method(remove).unwrap();
        assert!(builder.set_raise_method(foreign).is_err());
        assert_eq!(builder.event_type().unwrap(), handler);

        asm.type_builder(first).unwrap().create_type().unwrap();
        let runtime = asm.runtime_type(first).unwrap();
        let changed = runtime.event("Changed").unwrap();
        assert_eq!(changed.add_on, Some(add));
        assert_eq!(changed.remove_on, Some(remove));
        assert_eq!(changed.raise, None);
    }
}
