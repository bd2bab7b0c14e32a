//! Method and constructor definitions.

use crate::{
    assembly::{ILGenerator, ILState},
    emit::{
        customattr::PseudoAttribute,
        data::{BodyState, GenericParamOwner, MethodData, ParamData, SecurityData},
        AssemblyBuilder, CustomAttribute, CustomAttributeBuilder, GenericParamId, MethodId,
        MethodRef, ModuleId, ParameterBuilder, PermissionSet, RuntimeMethod, RuntimeParameter,
        TypeId,
    },
    metadata::{
        flags::{
            CallingConventions, MethodAttributes, MethodImplAttributes, ParamAttributes,
            SecurityAction,
        },
        token::Token,
    },
    typesystem::{MethodSignature, ParamType, Type},
    Result,
};

/// Initial capacity of a new instruction stream.
const DEFAULT_IL_SIZE: usize = 64;

/// Builder view of one method or constructor.
pub struct MethodBuilder<'a> {
    asm: &'a mut AssemblyBuilder,
    id: MethodId,
}

impl<'a> MethodBuilder<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, id: MethodId) -> Self {
        MethodBuilder { asm, id }
    }

    fn data(&self) -> Result<&MethodData> {
        self.asm.method_data(self.id)
    }

    fn data_mut(&mut self) -> Result<&mut MethodData> {
        self.asm.method_data_mut(self.id)
    }

    fn check_open(&self) -> Result<()> {
        let declaring = self.data()?.declaring;
        self.asm.check_type_open(declaring)
    }

    /// Handle of this method.
    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// Method name; `.ctor` and `.cctor` for constructors.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn name(&self) -> Result<String> {
        Ok(self.data()?.name.clone())
    }

    /// Method attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn attributes(&self) -> Result<MethodAttributes> {
        Ok(self.data()?.attributes)
    }

    /// Implementation attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn implementation_flags(&self) -> Result<MethodImplAttributes> {
        Ok(self.data()?.impl_attributes)
    }

    /// Calling convention as declared.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn calling_convention(&self) -> Result<CallingConventions> {
        Ok(self.data()?.calling_convention)
    }

    /// Declaring type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn declaring_type(&self) -> Result<TypeId> {
        Ok(self.data()?.declaring)
    }

    /// Module of the declaring type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn get_module(&self) -> Result<ModuleId> {
        self.asm.method_module(self.id)
    }

    /// Return type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn return_type(&self) -> Result<Type> {
        Ok(self.data()?.return_type.ty.clone())
    }

    /// The signature as declared.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn signature(&self) -> Result<MethodSignature> {
        self.asm.method_definition_signature(self.id)
    }

    /// Provisional `MethodDef` token; the persisted image may renumber methods.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn get_token(&self) -> Result<Token> {
        self.asm.method_def_token(self.id)
    }

    /// The instruction stream builder, created on first use.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] for abstract, P/Invoke and runtime
    /// implemented methods, for a method with a raw body and after the type has been
    /// created.
    pub fn get_il_generator(self) -> Result<ILGenerator<'a>> {
        self.get_il_generator_with_size(DEFAULT_IL_SIZE)
    }

    /// [`Self::get_il_generator`] reserving `size` bytes for the stream.
    ///
    /// # Errors
    /// See [`Self::get_il_generator`].
    pub fn get_il_generator_with_size(mut self, size: usize) -> Result<ILGenerator<'a>> {
        self.check_open()?;
        let data = self.data_mut()?;
        if !data.needs_body() {
            return Err(invalid_operation!(
                "Method '{}' is not allowed to have a body",
                data.name
            ));
        }
        match data.body {
            BodyState::None => data.body = BodyState::Generator(Box::new(ILState::with_capacity(size))),
            BodyState::Generator(_) => {}
            BodyState::Raw { .. } | BodyState::Closed(_) => {
                return Err(invalid_operation!(
                    "Method '{}' already has a method body",
                    data.name
                ));
            }
        }
        Ok(ILGenerator::new(self.asm, self.id))
    }

    /// Supply the body as raw IL instead of using the generator.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for empty code and
    /// [`crate::Error::InvalidOperation`] if a body or generator exists, the method can not
    /// have a body or the type has been created.
    pub fn create_method_body(&mut self, code: &[u8], max_stack: u16) -> Result<()> {
        self.check_open()?;
        if code.is_empty() {
            return Err(invalid_argument!("il", "Empty method body"));
        }
        let data = self.data_mut()?;
        if !data.needs_body() {
            return Err(invalid_operation!(
                "Method '{}' is not allowed to have a body",
                data.name
            ));
        }
        if !matches!(data.body, BodyState::None) {
            return Err(invalid_operation!(
                "Method '{}' already has a method body",
                data.name
            ));
        }
        data.body = BodyState::Raw {
            code: code.to_vec(),
            max_stack,
        };
        Ok(())
    }

    /// Describe parameter `position`: 0 is the return value, `n` the n-th parameter.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a position beyond the parameter
    /// count and [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn define_parameter(
        self,
        position: usize,
        attributes: ParamAttributes,
        name: Option<&str>,
    ) -> Result<ParameterBuilder<'a>> {
        self.check_open()?;
        let arity = self.data()?.parameters.len();
        if position > arity {
            return Err(invalid_argument!(
                "position",
                "Parameter position {} is beyond the {} parameters",
                position,
                arity
            ));
        }
        let method = self.id;
        let asm = self.asm;
        asm.method_data_mut(method)?.params[position] = Some(ParamData {
            attributes,
            name: name.map(str::to_string),
            ..ParamData::default()
        });
        Ok(ParameterBuilder::new(asm, method, position))
    }

    /// Replace the parameter types. Parameter descriptions beyond the new arity are
    /// dropped.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a `void` parameter and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_parameters(&mut self, parameters: Vec<Type>) -> Result<()> {
        let return_type = self.data()?.return_type.clone();
        self.set_signature(return_type, parameters.into_iter().map(ParamType::new).collect())
    }

    /// Replace the return type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_return_type(&mut self, return_type: Type) -> Result<()> {
        let parameters = self.data()?.parameters.clone();
        self.set_signature(ParamType::new(return_type), parameters)
    }

    /// Replace return and parameter types including custom modifiers.
    ///
    /// # Errors
    /// See [`Self::set_parameters`].
    pub fn set_signature(&mut self, return_type: ParamType, parameters: Vec<ParamType>) -> Result<()> {
        self.check_open()?;
        self.asm.check_param_type(&return_type)?;
        for parameter in &parameters {
            self.asm.check_param_type(parameter)?;
            if parameter.ty == Type::Void {
                return Err(invalid_argument!("parameterTypes", "A parameter can not be void"));
            }
        }

        let data = self.data_mut()?;
        data.params.resize(parameters.len() + 1, None);
        data.return_type = return_type;
        data.parameters = parameters;
        Ok(())
    }

    /// Make this a generic method definition.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty list or bad names and
    /// [`crate::Error::InvalidOperation`] if parameters were already defined or the type
    /// has been created.
    pub fn define_generic_parameters(&mut self, names: &[&str]) -> Result<Vec<GenericParamId>> {
        self.check_open()?;
        if !self.data()?.generic_params.is_empty() {
            return Err(invalid_operation!(
                "Generic parameters have already been defined"
            ));
        }
        let ids = self
            .asm
            .new_generic_params(GenericParamOwner::Method(self.id), names)?;
        self.data_mut()?.generic_params = ids.clone();
        Ok(ids)
    }

    /// Returns true for generic method definitions.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_generic_method_definition(&self) -> Result<bool> {
        Ok(!self.data()?.generic_params.is_empty())
    }

    /// Generic parameters of a generic method definition.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn generic_parameters(&self) -> Result<Vec<GenericParamId>> {
        Ok(self.data()?.generic_params.clone())
    }

    /// Close this generic method definition over `arguments`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] for a non-generic method and
    /// [`crate::Error::InvalidArgument`] for a wrong number of arguments.
    pub fn make_generic_method(&self, arguments: Vec<Type>) -> Result<MethodRef> {
        let arity = self.data()?.generic_params.len();
        if arity == 0 {
            return Err(invalid_operation!(
                "'{}' is not a generic method definition",
                self.data()?.name
            ));
        }
        if arguments.len() != arity {
            return Err(invalid_argument!(
                "typeArguments",
                "Expected {} type arguments, got {}",
                arity,
                arguments.len()
            ));
        }
        for argument in &arguments {
            self.asm.check_type_usable(argument)?;
        }
        Ok(MethodRef::Generic {
            method: Box::new(MethodRef::Builder(self.id)),
            arguments,
        })
    }

    /// Replace the implementation attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_implementation_flags(&mut self, attributes: MethodImplAttributes) -> Result<()> {
        self.check_open()?;
        self.data_mut()?.impl_attributes = attributes;
        Ok(())
    }

    /// Whether locals are zero-initialized.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn init_locals(&self) -> Result<bool> {
        Ok(self.data()?.init_locals)
    }

    /// Set whether locals are zero-initialized.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_init_locals(&mut self, init_locals: bool) -> Result<()> {
        self.check_open()?;
        self.data_mut()?.init_locals = init_locals;
        Ok(())
    }

    fn runtime(&self) -> Result<RuntimeMethod> {
        let declaring = self.data()?.declaring;
        let runtime = self.asm.runtime_type(declaring)?;
        runtime
            .methods
            .iter()
            .chain(runtime.constructors.iter())
            .chain(runtime.type_initializer.iter())
            .find(|method| method.id == self.id)
            .cloned()
            .ok_or_else(|| invalid_operation!("Method is missing from its created type"))
    }

    /// Parameters of the created method.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_parameters(&self) -> Result<Vec<RuntimeParameter>> {
        Ok(self.runtime()?.parameters)
    }

    /// Applied custom attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_custom_attributes(&self) -> Result<Vec<CustomAttribute>> {
        Ok(self.runtime()?.custom_attributes)
    }

    /// Attach a permission set for `action`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for assembly request actions and
    /// [`crate::Error::InvalidOperation`] for a repeated action or after the type has been
    /// created.
    pub fn add_declarative_security(
        &mut self,
        action: SecurityAction,
        permission_set: PermissionSet,
    ) -> Result<()> {
        self.check_open()?;
        if action.is_request() {
            return Err(invalid_argument!(
                "action",
                "Request actions are only valid on assemblies"
            ));
        }
        let data = self.data_mut()?;
        if data.security.iter().any(|entry| entry.action == action) {
            return Err(invalid_operation!(
                "Multiple permission sets specified with the same SecurityAction"
            ));
        }
        data.security.push(SecurityData {
            action,
            permission_set,
        });
        data.attributes |= MethodAttributes::HAS_SECURITY;
        Ok(())
    }

    /// Apply a custom attribute. `PreserveSig`, `MethodImpl` and `SpecialName` become
    /// flags.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad constructor or arguments and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        self.check_open()?;
        let attribute = self.asm.build_custom_attribute(builder)?;
        let pseudo = self.asm.pseudo_attribute(&attribute)?;

        let data = self.data_mut()?;
        match pseudo {
            Some(PseudoAttribute::PreserveSig) => {
                data.impl_attributes |= MethodImplAttributes::PRESERVE_SIG;
            }
            Some(PseudoAttribute::MethodImpl(bits)) => {
                data.impl_attributes = MethodImplAttributes::from_bits_retain(bits);
            }
            Some(PseudoAttribute::SpecialName) => {
                data.attributes |= MethodAttributes::SPECIAL_NAME;
            }
            Some(PseudoAttribute::SuppressUnmanagedCodeSecurity) => {
                data.attributes |= MethodAttributes::HAS_SECURITY;
                data.custom_attributes.push(attribute);
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
        assembly::OpCode,
        emit::AssemblyBuilderAccess,
        metadata::{flags::TypeAttributes, identity::AssemblyName},
        typesystem::corlib,
        Error,
    };

    fn setup() -> (AssemblyBuilder, TypeId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("methods"), AssemblyBuilderAccess::Run);
        let module = asm.define_dynamic_module("methods").unwrap();
        let ty = asm
            .module_builder(module)
            .unwrap()
            .define_type("Host", TypeAttributes::PUBLIC)
            .unwrap();
        (asm, ty)
    }

    fn static_method(asm: &mut AssemblyBuilder, ty: TypeId, parameters: Vec<Type>) -> MethodId {
        asm.type_builder(ty)
            .unwrap()
            .define_method(
                "M",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                Type::I4,
                parameters,
            )
            .unwrap()
    }

    #[test]
    fn parameters_by_position() {
        let (mut asm, ty) = setup();
        let method = static_method(&mut asm, ty, vec![Type::I4, Type::String]);

        asm.method_builder(method)
            .unwrap()
            .define_parameter(2, ParamAttributes::OUT, Some("text"))
            .unwrap();
        assert!(matches!(
            asm.method_builder(method)
                .unwrap()
                .define_parameter(3, ParamAttributes::empty(), None),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            asm.method_builder(method).unwrap().get_parameters(),
            Err(Error::NotSupported(_))
        ));

        let mut il = asm.il_generator(method).unwrap();
        il.emit(OpCode::LDARG_0).unwrap();
        il.emit(OpCode::RET).unwrap();
        asm.type_builder(ty).unwrap().create_type().unwrap();

        let parameters = asm.method_builder(method).unwrap().get_parameters().unwrap();
        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters[1].name.as_deref(), Some("text"));
        assert_eq!(parameters[1].attributes, ParamAttributes::OUT);
        assert_eq!(parameters[0].name, None);
    }

    #[test]
    fn one_body_only() {
        let (mut asm, ty) = setup();
        let method = static_method(&mut asm, ty, vec![]);
        asm.method_builder(method)
            .unwrap()
            .create_method_body(&[0x16, 0x2A], 1)
            .unwrap();
        assert!(matches!(
            asm.il_generator(method),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            asm.method_builder(method)
                .unwrap()
                .create_method_body(&[0x2A], 0),
            Err(Error::InvalidOperation(_))
        ));
        asm.type_builder(ty).unwrap().create_type().unwrap();
    }

    #[test]
    fn abstract_methods_have_no_generator() {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("methods"), AssemblyBuilderAccess::Run);
        let module = asm.define_dynamic_module("methods").unwrap();
        let ty = asm
            .module_builder(module)
            .unwrap()
            .define_type("Base", TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT)
            .unwrap();
        let method = asm
            .type_builder(ty)
            .unwrap()
            .define_method(
                "Run",
                MethodAttributes::PUBLIC | MethodAttributes::ABSTRACT | MethodAttributes::VIRTUAL,
                Type::Void,
                vec![],
            )
            .unwrap();
        assert!(matches!(
            asm.il_generator(method),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn generic_methods() {
        let (mut asm, ty) = setup();
        let method = static_method(&mut asm, ty, vec![]);
        let mut builder = asm.method_builder(method).unwrap();
        assert!(matches!(
            builder.make_generic_method(vec![Type::I4]),
            Err(Error::InvalidOperation(_))
        ));
        let params = builder.define_generic_parameters(&["T"]).unwrap();
        builder
            .set_signature(
                ParamType::new(Type::GenericParam(params[0])),
                vec![ParamType::new(Type::GenericParam(params[0]))],
            )
            .unwrap();
        assert!(builder.make_generic_method(vec![]).is_err());
        let closed = builder.make_generic_method(vec![Type::String]).unwrap();
        assert!(closed.is_generic_method_instance());

        let signature = asm.method_ref_signature(&closed).unwrap();
        assert_eq!(signature.return_type.ty, Type::String);
    }

    #[test]
    fn pseudo_attributes() {
        let (mut asm, ty) = setup();
        let method = static_method(&mut asm, ty, vec![]);
        let preserve = corlib::attribute_constructor(
            "System.Runtime.InteropServices",
            "PreserveSigAttribute",
            vec![],
        );
        let mut builder = asm.method_builder(method).unwrap();
        builder
            .set_custom_attribute(&CustomAttributeBuilder::new(preserve, vec![]))
            .unwrap();
        assert!(builder
            .implementation_flags()
            .unwrap()
            .contains(MethodImplAttributes::PRESERVE_SIG));
        builder
            .add_declarative_security(SecurityAction::Demand, PermissionSet::unrestricted())
            .unwrap();
        assert!(builder
            .attributes()
            .unwrap()
            .contains(MethodAttributes::HAS_SECURITY));
    }
}
