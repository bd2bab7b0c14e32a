//! Lowering of the type algebra to tokens and signature blobs, and the structural queries
//! (names, base types, interfaces, assignability, generic substitution) the builders ask
//! about types that may still be under construction.
//!
//! Tokens handed out here fall into two groups. `TypeDef` tokens and every referenced row
//! (`TypeRef`, `TypeSpec`, `MemberRef`, `MethodSpec`, `StandAloneSig`, user strings) are
//! final when returned. `Field` and `MethodDef` tokens carry the definition order of the
//! module; the writer maps them to their sorted rows when the image is laid out.

use std::sync::Arc;

use crate::{
    assembly::LocalInfo,
    emit::{
        data::GenericParamOwner, AssemblyBuilder, FieldRef, Member, MethodId, MethodRef,
        ModuleId, RuntimeField, RuntimeMethod, RuntimeType, TypeId,
    },
    metadata::{
        flags::CallingConventions,
        signatures::{
            encode_field_signature, encode_local_var_signature, encode_method_signature,
            encode_method_spec_signature, encode_property_signature, encode_typespec_signature,
            CustomModifier, SignatureArray, SignatureField, SignatureLocalVariable,
            SignatureLocalVariables, SignatureMethod, SignatureMethodSpec, SignatureParameter,
            SignaturePointer, SignatureProperty, SignatureSzArray, TypeSignature,
        },
        tables::TableId,
        token::Token,
    },
    typesystem::{
        corlib, DerivedElement, ExternalType, GenericInstance, MethodSignature, ParamType, Type,
    },
    Error, Result,
};

/// Deepest base or interface chain followed before giving up.
const MAX_HIERARCHY_DEPTH: usize = 64;

impl AssemblyBuilder {
    /// Display name of a type, resolving builder handles to their names.
    #[must_use]
    pub fn type_name(&self, ty: &Type) -> String {
        match ty {
            Type::Builder(id) => self
                .builder_type_name(*id)
                .unwrap_or_else(|_| ty.to_string()),
            Type::GenericParam(id) => self
                .generic_param_data(*id)
                .map(|data| data.name.clone())
                .unwrap_or_else(|_| ty.to_string()),
            Type::GenericInst(instance) => {
                let arguments: Vec<String> = instance
                    .arguments
                    .iter()
                    .map(|argument| self.type_name(argument))
                    .collect();
                format!(
                    "{}[{}]",
                    self.type_name(&instance.definition),
                    arguments.join(",")
                )
            }
            Type::Pointer(inner) => format!("{}*", self.type_name(inner)),
            Type::ByRef(inner) => format!("{}&", self.type_name(inner)),
            Type::SzArray(inner) => format!("{}[]", self.type_name(inner)),
            Type::Array(inner, rank) => {
                let shape = if *rank == 1 {
                    "*".to_string()
                } else {
                    ",".repeat(*rank as usize - 1)
                };
                format!("{}[{}]", self.type_name(inner), shape)
            }
            other => other.to_string(),
        }
    }

    /// Full name of a builder type, nested types joined with `+`.
    pub(crate) fn builder_type_name(&self, id: TypeId) -> Result<String> {
        let data = self.type_data(id)?;
        match data.declaring {
            Some(declaring) => Ok(format!(
                "{}+{}",
                self.builder_type_name(declaring)?,
                data.name
            )),
            None => Ok(data.full_name()),
        }
    }

    /// Fail for handles of other assemblies anywhere inside `ty`.
    pub(crate) fn check_type_usable(&self, ty: &Type) -> Result<()> {
        match ty {
            Type::Builder(id) => self.type_data(*id).map(|_| ()),
            Type::GenericParam(id) => self.generic_param_data(*id).map(|_| ()),
            Type::Pointer(inner) | Type::ByRef(inner) | Type::SzArray(inner) => {
                self.check_type_usable(inner)
            }
            Type::Array(inner, _) => self.check_type_usable(inner),
            Type::GenericInst(instance) => {
                self.check_type_usable(&instance.definition)?;
                instance
                    .arguments
                    .iter()
                    .try_for_each(|argument| self.check_type_usable(argument))
            }
            _ => Ok(()),
        }
    }

    /// Returns true for value types, including enums and primitive value types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub fn is_value_type(&self, ty: &Type) -> Result<bool> {
        Ok(match ty {
            Type::Builder(id) => {
                let parent = self.type_data(*id)?.parent.as_ref();
                parent == Some(&corlib::value_type()) || parent == Some(&corlib::enum_type())
            }
            Type::External(external) => external.is_value_type(),
            Type::GenericInst(instance) => self.is_value_type(&instance.definition)?,
            Type::GenericParam(id) => self
                .generic_param_data(*id)?
                .base_constraint
                .as_ref()
                .map_or(Ok(false), |base| self.is_value_type(base))?,
            other => other.is_primitive_value_type(),
        })
    }

    /// Returns true for interfaces.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub fn is_interface(&self, ty: &Type) -> Result<bool> {
        Ok(match ty {
            Type::Builder(id) => self.type_data(*id)?.attributes.is_interface(),
            Type::External(external) => external.is_interface(),
            Type::GenericInst(instance) => self.is_interface(&instance.definition)?,
            _ => false,
        })
    }

    /// Direct base type. Generic instantiations report the substituted base of their
    /// definition.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub fn base_type(&self, ty: &Type) -> Result<Option<Type>> {
        Ok(match ty {
            Type::Builder(id) => self.type_data(*id)?.parent.clone(),
            Type::External(external) => external.base.clone(),
            Type::GenericInst(instance) => self
                .base_type(&instance.definition)?
                .map(|base| self.substitute_instance(instance, &base)),
            Type::GenericParam(id) => Some(
                self.generic_param_data(*id)?
                    .base_constraint
                    .clone()
                    .unwrap_or(Type::Object),
            ),
            Type::Var(_) | Type::MVar(_) | Type::String => Some(Type::Object),
            Type::SzArray(_) | Type::Array(..) => Some(corlib::array()),
            Type::Object | Type::Void | Type::Pointer(_) | Type::ByRef(_) => None,
            other if other.is_primitive_value_type() => Some(corlib::value_type()),
            _ => Some(Type::Object),
        })
    }

    /// Every interface `ty` implements, including those of its base types and the ones
    /// inherited by interfaces, without duplicates.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for pointer, by-ref and array types and
    /// [`crate::Error::RecursionLimit`] for cyclic hierarchies.
    pub fn interfaces(&self, ty: &Type) -> Result<Vec<Type>> {
        self.reject_derived(ty)?;
        self.all_interfaces(ty)
    }

    fn all_interfaces(&self, ty: &Type) -> Result<Vec<Type>> {
        let mut result = Vec::new();
        self.collect_interfaces(ty, &mut result, 0)?;
        Ok(result)
    }

    /// Pointer, by-ref and array types only answer shape queries.
    fn reject_derived(&self, ty: &Type) -> Result<()> {
        if ty.has_element_type() {
            return Err(not_supported!(
                "{} is a derived type, only its element type and shape can be queried",
                self.type_name(ty)
            ));
        }
        Ok(())
    }

    /// The created definition behind reflective member queries on `ty`.
    fn reflected_type(&self, ty: &Type) -> Result<Arc<RuntimeType>> {
        self.reject_derived(ty)?;
        match ty {
            Type::Builder(id) => self.runtime_type(*id),
            Type::GenericParam(_) | Type::Var(_) | Type::MVar(_) => {
                Err(not_supported!("A generic parameter has no members"))
            }
            other => Err(not_supported!(
                "Members of {} are only known to the runtime that defines it",
                self.type_name(other)
            )),
        }
    }

    /// Every member of `ty`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] unless `ty` is a created builder type.
    pub fn type_members(&self, ty: &Type) -> Result<Vec<Member>> {
        Ok(self.reflected_type(ty)?.members())
    }

    /// Methods of `ty`, constructors excluded.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] unless `ty` is a created builder type.
    pub fn type_methods(&self, ty: &Type) -> Result<Vec<RuntimeMethod>> {
        Ok(self.reflected_type(ty)?.methods.clone())
    }

    /// Instance constructors of `ty`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] unless `ty` is a created builder type.
    pub fn type_constructors(&self, ty: &Type) -> Result<Vec<RuntimeMethod>> {
        Ok(self.reflected_type(ty)?.constructors.clone())
    }

    /// Fields of `ty`.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] unless `ty` is a created builder type.
    pub fn type_fields(&self, ty: &Type) -> Result<Vec<RuntimeField>> {
        Ok(self.reflected_type(ty)?.fields.clone())
    }

    /// Element of a pointer, by-ref or array shape made by a builder.
    ///
    /// A shape over a definition that is not created yet, or over one of its generic
    /// parameters, gets a fresh serial and so never equals another shape.
    pub(crate) fn derived_element(&mut self, element: Type) -> Result<DerivedElement> {
        self.check_type_usable(&element)?;
        let open = match &element {
            Type::Builder(id) => !self.type_data(*id)?.is_created(),
            Type::GenericParam(id) => {
                let declaring = match self.generic_param_data(*id)?.owner {
                    GenericParamOwner::Type(owner) => owner,
                    GenericParamOwner::Method(method) => self.method_data(method)?.declaring,
                };
                !self.type_data(declaring)?.is_created()
            }
            _ => false,
        };
        if !open {
            return Ok(DerivedElement::new(element));
        }
        self.derived_shapes += 1;
        Ok(DerivedElement::unique(element, self.derived_shapes))
    }

    fn collect_interfaces(&self, ty: &Type, result: &mut Vec<Type>, depth: usize) -> Result<()> {
        if depth > MAX_HIERARCHY_DEPTH {
            return Err(Error::RecursionLimit(MAX_HIERARCHY_DEPTH));
        }

        let direct = match ty {
            Type::Builder(id) => self.type_data(*id)?.interfaces.clone(),
            Type::External(external) => external.interfaces.clone(),
            Type::GenericInst(instance) => {
                let mut inherited = Vec::new();
                self.collect_interfaces(&instance.definition, &mut inherited, depth + 1)?;
                inherited
                    .iter()
                    .map(|interface| self.substitute_instance(instance, interface))
                    .collect()
            }
            Type::GenericParam(id) => self.generic_param_data(*id)?.interface_constraints.clone(),
            _ => Vec::new(),
        };

        for interface in direct {
            if !result.contains(&interface) {
                result.push(interface.clone());
                self.collect_interfaces(&interface, result, depth + 1)?;
            }
        }

        if !matches!(ty, Type::GenericInst(_)) {
            if let Some(base) = self.base_type(ty)? {
                self.collect_interfaces(&base, result, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Returns true if a value of type `source` can be stored in a location of type
    /// `target`, following base chains, implemented interfaces and array covariance.
    ///
    /// # Errors
    /// Returns [`crate::Error::RecursionLimit`] for cyclic hierarchies.
    pub fn is_assignable_from(&self, target: &Type, source: &Type) -> Result<bool> {
        if target == source {
            return Ok(true);
        }
        if matches!(target, Type::Pointer(_) | Type::ByRef(_))
            || matches!(source, Type::Pointer(_) | Type::ByRef(_))
        {
            return Ok(false);
        }
        if *target == Type::Object {
            return Ok(true);
        }

        if let (Type::SzArray(target_element), Type::SzArray(source_element)) = (target, source) {
            if self.is_value_type(target_element)? || self.is_value_type(source_element)? {
                return Ok(target_element == source_element);
            }
            return self.is_assignable_from(target_element, source_element);
        }

        if self.is_interface(target)? {
            return Ok(self.all_interfaces(source)?.contains(target));
        }

        let mut current = self.base_type(source)?;
        let mut depth = 0;
        while let Some(base) = current {
            if base == *target {
                return Ok(true);
            }
            depth += 1;
            if depth > MAX_HIERARCHY_DEPTH {
                return Err(Error::RecursionLimit(MAX_HIERARCHY_DEPTH));
            }
            current = self.base_type(&base)?;
        }
        Ok(false)
    }

    /// Number of generic parameters of a generic type definition.
    pub(crate) fn generic_arity(&self, ty: &Type) -> Result<usize> {
        Ok(match ty {
            Type::Builder(id) => self.type_data(*id)?.generic_params.len(),
            Type::External(external) => external.generic_arity as usize,
            _ => 0,
        })
    }

    /// Close the generic type definition `definition` over `arguments`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if `definition` is not a generic type
    /// definition and [`crate::Error::InvalidArgument`] if the number of arguments does
    /// not match.
    pub fn make_generic_type(&self, definition: &Type, arguments: Vec<Type>) -> Result<Type> {
        self.check_type_usable(definition)?;
        let arity = self.generic_arity(definition)?;
        if arity == 0 {
            return Err(invalid_operation!(
                "{} is not a generic type definition",
                self.type_name(definition)
            ));
        }
        if arity != arguments.len() {
            return Err(invalid_argument!(
                "typeArguments",
                "{} expects {} type arguments, got {}",
                self.type_name(definition),
                arity,
                arguments.len()
            ));
        }
        for argument in &arguments {
            self.check_type_usable(argument)?;
        }
        Type::generic_instance(definition.clone(), arguments)
    }

    /// Replace the generic parameters of `owner` in `ty` by `arguments`.
    ///
    /// Builder parameters are matched by owner, positional `Var` / `MVar` parameters by
    /// the kind of owner.
    pub(crate) fn substitute_params(
        &self,
        ty: &Type,
        owner: GenericParamOwner,
        arguments: &[Type],
    ) -> Type {
        ty.map(&|node| match node {
            Type::GenericParam(id) => {
                let data = self.generic_param_data(*id).ok()?;
                if data.owner == owner {
                    arguments.get(data.position as usize).cloned()
                } else {
                    None
                }
            }
            Type::Var(position) if matches!(owner, GenericParamOwner::Type(_)) => {
                arguments.get(*position as usize).cloned()
            }
            Type::MVar(position) if matches!(owner, GenericParamOwner::Method(_)) => {
                arguments.get(*position as usize).cloned()
            }
            _ => None,
        })
    }

    /// Substitute the arguments of `instance` into a type written against its definition.
    pub(crate) fn substitute_instance(&self, instance: &GenericInstance, ty: &Type) -> Type {
        match &instance.definition {
            Type::Builder(id) => {
                self.substitute_params(ty, GenericParamOwner::Type(*id), &instance.arguments)
            }
            _ => instance.substitute(ty),
        }
    }

    fn substitute_signature(
        &self,
        signature: &MethodSignature,
        owner: GenericParamOwner,
        arguments: &[Type],
    ) -> MethodSignature {
        let substitute = |ty: &Type| self.substitute_params(ty, owner, arguments);
        MethodSignature {
            calling_convention: signature.calling_convention,
            generic_param_count: signature.generic_param_count,
            return_type: signature.return_type.map(&substitute),
            parameters: signature
                .parameters
                .iter()
                .map(|param| param.map(&substitute))
                .collect(),
        }
    }

    /// Signature of a builder method as declared.
    pub(crate) fn method_definition_signature(&self, id: MethodId) -> Result<MethodSignature> {
        let data = self.method_data(id)?;
        #[allow(clippy::cast_possible_truncation)]
        let generic_param_count = data.generic_params.len() as u32;
        Ok(MethodSignature {
            calling_convention: data.calling_convention,
            generic_param_count,
            return_type: data.return_type.clone(),
            parameters: data.parameters.clone(),
        })
    }

    /// Signature of a method reference with every generic argument substituted.
    ///
    /// The result is the same before and after the generic definition is created.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies or an
    /// instantiated reference whose declaring type is not a generic instantiation.
    pub fn method_ref_signature(&self, method: &MethodRef) -> Result<MethodSignature> {
        match method {
            MethodRef::Builder(id) => self.method_definition_signature(*id),
            MethodRef::External(external) => Ok(match &external.declaring {
                Type::GenericInst(instance) => {
                    external.signature.substitute(&instance.arguments, &[])
                }
                _ => external.signature.clone(),
            }),
            MethodRef::Instantiated { declaring, method } => {
                let Type::GenericInst(instance) = declaring else {
                    return Err(invalid_argument!(
                        "type",
                        "{} is not a generic instantiation",
                        self.type_name(declaring)
                    ));
                };
                let definition = self.method_definition_signature(*method)?;
                let owner = GenericParamOwner::Type(self.method_data(*method)?.declaring);
                Ok(self.substitute_signature(&definition, owner, &instance.arguments))
            }
            MethodRef::Generic { method, arguments } => {
                let inner = self.method_ref_signature(method)?;
                let owner = match method.as_ref() {
                    MethodRef::Builder(id) | MethodRef::Instantiated { method: id, .. } => {
                        GenericParamOwner::Method(*id)
                    }
                    MethodRef::External(_) | MethodRef::Generic { .. } => {
                        return Ok(inner.substitute(&[], arguments));
                    }
                };
                Ok(self.substitute_signature(&inner, owner, arguments))
            }
        }
    }

    /// Declaring type of a method reference.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub fn method_ref_declaring_type(&self, method: &MethodRef) -> Result<Type> {
        match method {
            MethodRef::Builder(id) => Ok(Type::Builder(self.method_data(*id)?.declaring)),
            MethodRef::External(external) => Ok(external.declaring.clone()),
            MethodRef::Instantiated { declaring, .. } => Ok(declaring.clone()),
            MethodRef::Generic { method, .. } => self.method_ref_declaring_type(method),
        }
    }

    /// Name of a method reference.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub fn method_ref_name(&self, method: &MethodRef) -> Result<String> {
        match method {
            MethodRef::Builder(id) | MethodRef::Instantiated { method: id, .. } => {
                Ok(self.method_data(*id)?.name.clone())
            }
            MethodRef::External(external) => Ok(external.name.clone()),
            MethodRef::Generic { method, .. } => self.method_ref_name(method),
        }
    }

    /// Type of a field reference with generic arguments substituted.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub fn field_ref_type(&self, field: &FieldRef) -> Result<ParamType> {
        match field {
            FieldRef::Builder(id) => Ok(self.field_data(*id)?.field_type.clone()),
            FieldRef::External(external) => Ok(match &external.declaring {
                Type::GenericInst(instance) => {
                    external.field_type.map(&|ty| instance.substitute(ty))
                }
                _ => external.field_type.clone(),
            }),
            FieldRef::Instantiated { declaring, field } => {
                let Type::GenericInst(instance) = declaring else {
                    return Err(invalid_argument!(
                        "type",
                        "{} is not a generic instantiation",
                        self.type_name(declaring)
                    ));
                };
                let data = self.field_data(*field)?;
                Ok(data
                    .field_type
                    .map(&|ty| self.substitute_instance(instance, ty)))
            }
        }
    }

    fn check_instantiation_of(&self, instance: &Type, declaring: TypeId) -> Result<()> {
        let Type::GenericInst(generic) = instance else {
            return Err(invalid_argument!(
                "type",
                "{} is not a generic instantiation of a type builder",
                self.type_name(instance)
            ));
        };
        let Type::Builder(definition) = generic.definition else {
            return Err(invalid_argument!(
                "type",
                "{} is not a generic instantiation of a type builder",
                self.type_name(instance)
            ));
        };
        if definition != declaring {
            return Err(invalid_argument!(
                "method",
                "The member is not declared on the generic definition of {}",
                self.type_name(instance)
            ));
        }
        Ok(())
    }

    /// The method `method` of a generic type builder, seen through the instantiation
    /// `instance` of that builder.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `instance` is not an instantiation of
    /// the type that declares `method`.
    pub fn instantiated_method(&self, instance: &Type, method: MethodId) -> Result<MethodRef> {
        let declaring = self.method_data(method)?.declaring;
        self.check_instantiation_of(instance, declaring)?;
        Ok(MethodRef::Instantiated {
            declaring: instance.clone(),
            method,
        })
    }

    /// The field `field` of a generic type builder, seen through the instantiation
    /// `instance` of that builder.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `instance` is not an instantiation of
    /// the type that declares `field`.
    pub fn instantiated_field(
        &self,
        instance: &Type,
        field: crate::emit::FieldId,
    ) -> Result<FieldRef> {
        let declaring = self.field_data(field)?.declaring;
        self.check_instantiation_of(instance, declaring)?;
        Ok(FieldRef::Instantiated {
            declaring: instance.clone(),
            field,
        })
    }

    /// The parameterless instance constructor of `ty`, if it has one.
    pub(crate) fn default_constructor_of(&self, ty: &Type) -> Result<Option<MethodRef>> {
        let builder_constructor = |id: TypeId| -> Result<Option<MethodId>> {
            let data = self.type_data(id)?;
            for method in &data.methods {
                let method_data = self.method_data(*method)?;
                if method_data.name == ".ctor"
                    && !method_data.is_static()
                    && method_data.parameters.is_empty()
                {
                    return Ok(Some(*method));
                }
            }
            Ok(None)
        };

        Ok(match ty {
            Type::Object => Some(MethodRef::External(Arc::new(corlib::object_constructor()))),
            Type::Builder(id) => builder_constructor(*id)?.map(MethodRef::Builder),
            Type::External(external) => external
                .default_constructor()
                .map(|constructor| MethodRef::External(Arc::new(constructor))),
            Type::GenericInst(instance) => match &instance.definition {
                Type::Builder(id) => {
                    builder_constructor(*id)?.map(|method| MethodRef::Instantiated {
                        declaring: ty.clone(),
                        method,
                    })
                }
                Type::External(external) if external.has_default_constructor => {
                    Some(MethodRef::External(Arc::new(
                        crate::typesystem::ExternalMethod::constructor(ty.clone(), Vec::new()),
                    )))
                }
                _ => None,
            },
            _ => None,
        })
    }

    /// `TypeDef` token of a builder type.
    pub(crate) fn type_def_token(&self, id: TypeId) -> Result<Token> {
        Ok(Token::from_parts(TableId::TypeDef, self.type_data(id)?.row))
    }

    /// Provisional `MethodDef` token of a builder method.
    pub(crate) fn method_def_token(&self, id: MethodId) -> Result<Token> {
        Ok(Token::from_parts(TableId::MethodDef, self.method_data(id)?.row))
    }

    /// Provisional `Field` token of a builder field.
    pub(crate) fn field_def_token(&self, id: crate::emit::FieldId) -> Result<Token> {
        Ok(Token::from_parts(TableId::Field, self.field_data(id)?.row))
    }

    fn external_type_ref(&self, module: ModuleId, external: &ExternalType) -> Result<Token> {
        let tokens = &self.module_data(module)?.tokens;
        let scope = match &external.declaring {
            Some(declaring) => self.external_type_ref(module, declaring)?,
            None => tokens.assembly_ref(&external.assembly),
        };
        Ok(tokens.type_ref(scope, &external.namespace, &external.name))
    }

    fn builder_type_ref(&self, module: ModuleId, id: TypeId) -> Result<Token> {
        let data = self.type_data(id)?;
        let scope = match data.declaring {
            Some(declaring) => self.builder_type_ref(module, declaring)?,
            None => {
                let file_name = &self.module_data(data.module)?.file_name;
                self.module_data(module)?.tokens.module_ref(file_name)
            }
        };
        Ok(self
            .module_data(module)?
            .tokens
            .type_ref(scope, &data.namespace, &data.name))
    }

    /// `TypeDef`, `TypeRef` or `TypeSpec` token of `ty` as seen from `module`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub(crate) fn type_token(&self, module: ModuleId, ty: &Type) -> Result<Token> {
        if let Some((namespace, name)) = ty.primitive_name() {
            let tokens = &self.module_data(module)?.tokens;
            let scope = tokens.assembly_ref(&crate::metadata::identity::AssemblyName::mscorlib());
            return Ok(tokens.type_ref(scope, namespace, name));
        }

        match ty {
            Type::Builder(id) => {
                if self.type_data(*id)?.module == module {
                    self.type_def_token(*id)
                } else {
                    self.builder_type_ref(module, *id)
                }
            }
            Type::External(external) => self.external_type_ref(module, external),
            other => {
                let signature = self.type_signature(module, other)?;
                let blob = encode_typespec_signature(&signature)?;
                Ok(self.module_data(module)?.tokens.type_spec(blob))
            }
        }
    }

    /// Lower `ty` to its signature form in `module`.
    pub(crate) fn type_signature(&self, module: ModuleId, ty: &Type) -> Result<TypeSignature> {
        Ok(match ty {
            Type::Void => TypeSignature::Void,
            Type::Boolean => TypeSignature::Boolean,
            Type::Char => TypeSignature::Char,
            Type::I1 => TypeSignature::I1,
            Type::U1 => TypeSignature::U1,
            Type::I2 => TypeSignature::I2,
            Type::U2 => TypeSignature::U2,
            Type::I4 => TypeSignature::I4,
            Type::U4 => TypeSignature::U4,
            Type::I8 => TypeSignature::I8,
            Type::U8 => TypeSignature::U8,
            Type::R4 => TypeSignature::R4,
            Type::R8 => TypeSignature::R8,
            Type::I => TypeSignature::I,
            Type::U => TypeSignature::U,
            Type::String => TypeSignature::String,
            Type::Object => TypeSignature::Object,
            Type::TypedReference => TypeSignature::TypedByRef,
            Type::Builder(_) | Type::External(_) => {
                let token = self.type_token(module, ty)?;
                if self.is_value_type(ty)? {
                    TypeSignature::ValueType(token)
                } else {
                    TypeSignature::Class(token)
                }
            }
            Type::GenericParam(id) => {
                let data = self.generic_param_data(*id)?;
                match data.owner {
                    GenericParamOwner::Type(_) => TypeSignature::GenericParamType(data.position),
                    GenericParamOwner::Method(_) => {
                        TypeSignature::GenericParamMethod(data.position)
                    }
                }
            }
            Type::Var(position) => TypeSignature::GenericParamType(*position),
            Type::MVar(position) => TypeSignature::GenericParamMethod(*position),
            Type::GenericInst(instance) => {
                let definition = self.type_signature(module, &instance.definition)?;
                let arguments = instance
                    .arguments
                    .iter()
                    .map(|argument| self.type_signature(module, argument))
                    .collect::<Result<Vec<_>>>()?;
                TypeSignature::GenericInst(Box::new(definition), arguments)
            }
            Type::Pointer(inner) => TypeSignature::Ptr(SignaturePointer {
                modifiers: Vec::new(),
                base: Box::new(self.type_signature(module, inner)?),
            }),
            Type::ByRef(inner) => TypeSignature::ByRef(Box::new(self.type_signature(module, inner)?)),
            Type::SzArray(inner) => TypeSignature::SzArray(SignatureSzArray {
                modifiers: Vec::new(),
                base: Box::new(self.type_signature(module, inner)?),
            }),
            Type::Array(inner, rank) => TypeSignature::Array(SignatureArray {
                base: Box::new(self.type_signature(module, inner)?),
                rank: *rank,
                sizes: Vec::new(),
                lower_bounds: Vec::new(),
            }),
        })
    }

    fn custom_modifiers(&self, module: ModuleId, param: &ParamType) -> Result<Vec<CustomModifier>> {
        let required = param.required_modifiers.iter().map(|ty| (true, ty));
        let optional = param.optional_modifiers.iter().map(|ty| (false, ty));
        required
            .chain(optional)
            .map(|(is_required, ty)| {
                Ok(CustomModifier {
                    is_required,
                    modifier_type: self.type_token(module, ty)?,
                })
            })
            .collect()
    }

    pub(crate) fn param_signature(
        &self,
        module: ModuleId,
        param: &ParamType,
    ) -> Result<SignatureParameter> {
        let (by_ref, base) = match &param.ty {
            Type::ByRef(inner) => (true, self.type_signature(module, inner)?),
            other => (false, self.type_signature(module, other)?),
        };
        Ok(SignatureParameter {
            modifiers: self.custom_modifiers(module, param)?,
            by_ref,
            base,
        })
    }

    /// Encode a method signature blob in `module`.
    pub(crate) fn method_signature_blob(
        &self,
        module: ModuleId,
        calling_convention: CallingConventions,
        generic_param_count: u32,
        return_type: &ParamType,
        parameters: &[ParamType],
    ) -> Result<Vec<u8>> {
        let signature = SignatureMethod {
            calling_convention,
            generic_param_count,
            return_type: self.param_signature(module, return_type)?,
            params: parameters
                .iter()
                .map(|param| self.param_signature(module, param))
                .collect::<Result<Vec<_>>>()?,
            varargs: Vec::new(),
        };
        encode_method_signature(&signature)
    }

    /// Encode the definition signature of a builder method in `module`.
    pub(crate) fn method_definition_blob(&self, module: ModuleId, id: MethodId) -> Result<Vec<u8>> {
        let signature = self.method_definition_signature(id)?;
        self.method_signature_blob(
            module,
            signature.calling_convention,
            signature.generic_param_count,
            &signature.return_type,
            &signature.parameters,
        )
    }

    pub(crate) fn field_signature_blob(&self, module: ModuleId, field_type: &ParamType) -> Result<Vec<u8>> {
        encode_field_signature(&SignatureField {
            modifiers: self.custom_modifiers(module, field_type)?,
            base: self.type_signature(module, &field_type.ty)?,
        })
    }

    pub(crate) fn property_signature_blob(
        &self,
        module: ModuleId,
        has_this: bool,
        property_type: &ParamType,
        parameters: &[ParamType],
    ) -> Result<Vec<u8>> {
        encode_property_signature(&SignatureProperty {
            has_this,
            modifiers: self.custom_modifiers(module, property_type)?,
            base: self.type_signature(module, &property_type.ty)?,
            params: parameters
                .iter()
                .map(|param| self.param_signature(module, param))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    pub(crate) fn local_signature_blob(&self, module: ModuleId, locals: &[LocalInfo]) -> Result<Vec<u8>> {
        let locals = locals
            .iter()
            .map(|local| {
                let (is_byref, base) = match &local.local_type {
                    Type::ByRef(inner) => (true, self.type_signature(module, inner)?),
                    other => (false, self.type_signature(module, other)?),
                };
                Ok(SignatureLocalVariable {
                    modifiers: Vec::new(),
                    is_byref,
                    is_pinned: local.pinned,
                    base,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        encode_local_var_signature(&SignatureLocalVariables { locals })
    }

    /// Token of a method reference as seen from `module`.
    ///
    /// Builder methods of `module` get their provisional `MethodDef` token, everything
    /// else an interned `MemberRef` or `MethodSpec`.
    pub(crate) fn method_token(&self, module: ModuleId, method: &MethodRef) -> Result<Token> {
        match method {
            MethodRef::Builder(id) => {
                let data = self.method_data(*id)?;
                if self.type_data(data.declaring)?.module == module {
                    return self.method_def_token(*id);
                }
                let parent = self.type_token(module, &Type::Builder(data.declaring))?;
                let blob = self.method_definition_blob(module, *id)?;
                Ok(self
                    .module_data(module)?
                    .tokens
                    .member_ref(parent, &data.name, blob))
            }
            MethodRef::External(external) => {
                let parent = self.type_token(module, &external.declaring)?;
                let signature = &external.signature;
                let blob = self.method_signature_blob(
                    module,
                    signature.calling_convention,
                    signature.generic_param_count,
                    &signature.return_type,
                    &signature.parameters,
                )?;
                Ok(self
                    .module_data(module)?
                    .tokens
                    .member_ref(parent, &external.name, blob))
            }
            MethodRef::Instantiated { declaring, method } => {
                self.check_instantiation_of(declaring, self.method_data(*method)?.declaring)?;
                let parent = self.type_token(module, declaring)?;
                let blob = self.method_definition_blob(module, *method)?;
                let name = &self.method_data(*method)?.name;
                Ok(self.module_data(module)?.tokens.member_ref(parent, name, blob))
            }
            MethodRef::Generic { method, arguments } => {
                let inner = self.method_token(module, method)?;
                let generic_args = arguments
                    .iter()
                    .map(|argument| self.type_signature(module, argument))
                    .collect::<Result<Vec<_>>>()?;
                let blob = encode_method_spec_signature(&SignatureMethodSpec { generic_args })?;
                Ok(self.module_data(module)?.tokens.method_spec(inner, blob))
            }
        }
    }

    /// Token of a field reference as seen from `module`.
    pub(crate) fn field_token(&self, module: ModuleId, field: &FieldRef) -> Result<Token> {
        match field {
            FieldRef::Builder(id) => {
                let data = self.field_data(*id)?;
                if self.type_data(data.declaring)?.module == module {
                    return self.field_def_token(*id);
                }
                let parent = self.type_token(module, &Type::Builder(data.declaring))?;
                let blob = self.field_signature_blob(module, &data.field_type)?;
                Ok(self
                    .module_data(module)?
                    .tokens
                    .member_ref(parent, &data.name, blob))
            }
            FieldRef::External(external) => {
                let parent = self.type_token(module, &external.declaring)?;
                let blob = self.field_signature_blob(module, &external.field_type)?;
                Ok(self
                    .module_data(module)?
                    .tokens
                    .member_ref(parent, &external.name, blob))
            }
            FieldRef::Instantiated { declaring, field } => {
                let data = self.field_data(*field)?;
                self.check_instantiation_of(declaring, data.declaring)?;
                let parent = self.type_token(module, declaring)?;
                let blob = self.field_signature_blob(module, &data.field_type)?;
                Ok(self
                    .module_data(module)?
                    .tokens
                    .member_ref(parent, &data.name, blob))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        emit::{AssemblyBuilder, AssemblyBuilderAccess, MethodRef},
        metadata::{
            flags::{MethodAttributes, TypeAttributes},
            identity::AssemblyName,
            tables::TableId,
        },
        typesystem::{corlib, Type},
        Error,
    };

    fn assembly() -> AssemblyBuilder {
        AssemblyBuilder::new(AssemblyName::new("resolve"), AssemblyBuilderAccess::Run)
    }

    #[test]
    fn tokens_are_stable() {
        let mut asm = assembly();
        let module = asm.define_dynamic_module("m").unwrap();
        let ty = asm
            .module_builder(module)
            .unwrap()
            .define_type("A.B", TypeAttributes::PUBLIC)
            .unwrap();

        let own = asm.type_token(module, &Type::Builder(ty)).unwrap();
        assert_eq!(own.table_id(), Some(TableId::TypeDef));
        assert_eq!(own.row(), 2);

        let int = asm.type_token(module, &Type::I4).unwrap();
        assert_eq!(int.table_id(), Some(TableId::TypeRef));
        assert_eq!(asm.type_token(module, &Type::I4).unwrap(), int);

        let array = asm.type_token(module, &Type::I4.make_array_type()).unwrap();
        assert_eq!(array.table_id(), Some(TableId::TypeSpec));
        assert_ne!(array, asm.type_token(module, &Type::I8.make_array_type()).unwrap());
    }

    #[test]
    fn generic_substitution_is_stable_across_creation() {
        let mut asm = assembly();
        let module = asm.define_dynamic_module("m").unwrap();
        let boxed = asm
            .module_builder(module)
            .unwrap()
            .define_type("Box", TypeAttributes::PUBLIC)
            .unwrap();
        let params = asm
            .type_builder(boxed)
            .unwrap()
            .define_generic_parameters(&["T"])
            .unwrap();
        let get = asm
            .type_builder(boxed)
            .unwrap()
            .define_method(
                "Get",
                MethodAttributes::PUBLIC,
                Type::GenericParam(params[0]),
                vec![],
            )
            .unwrap();

        let instance = asm
            .make_generic_type(&Type::Builder(boxed), vec![Type::I4])
            .unwrap();
        let method = asm.instantiated_method(&instance, get).unwrap();
        let before = asm.method_ref_signature(&method).unwrap();
        assert_eq!(before.return_type.ty, Type::I4);

        let mut il = asm.il_generator(get).unwrap();
        il.emit(crate::assembly::OpCode::LDNULL).unwrap();
        il.emit(crate::assembly::OpCode::RET).unwrap();
        asm.type_builder(boxed).unwrap().create_type().unwrap();

        let after = asm.method_ref_signature(&method).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn make_generic_type_checks() {
        let mut asm = assembly();
        let module = asm.define_dynamic_module("m").unwrap();
        let plain = asm
            .module_builder(module)
            .unwrap()
            .define_type("Plain", TypeAttributes::PUBLIC)
            .unwrap();
        assert!(matches!(
            asm.make_generic_type(&Type::Builder(plain), vec![Type::I4]),
            Err(crate::Error::InvalidOperation(_))
        ));

        let list = corlib::generic_class("System.Collections.Generic", "List`1", 1);
        assert!(matches!(
            asm.make_generic_type(&list, vec![Type::I4, Type::I8]),
            Err(crate::Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            asm.instantiated_method(&Type::I4, crate::emit::MethodId::new(asm.serial, 0)),
            Err(crate::Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn assignability() {
        let mut asm = assembly();
        let module = asm.define_dynamic_module("m").unwrap();
        let interface = asm
            .module_builder(module)
            .unwrap()
            .define_type(
                "IThing",
                TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
            )
            .unwrap();
        let base = asm
            .module_builder(module)
            .unwrap()
            .define_type("Base", TypeAttributes::PUBLIC)
            .unwrap();
        asm.type_builder(base)
            .unwrap()
            .add_interface_implementation(Type::Builder(interface))
            .unwrap();
        let derived = asm
            .module_builder(module)
            .unwrap()
            .define_type_with_parent("Derived", TypeAttributes::PUBLIC, Some(Type::Builder(base)))
            .unwrap();

        let derived = Type::Builder(derived);
        assert!(asm.is_assignable_from(&Type::Builder(base), &derived).unwrap());
        assert!(asm.is_assignable_from(&Type::Builder(interface), &derived).unwrap());
        assert!(asm.is_assignable_from(&Type::Object, &derived).unwrap());
        assert!(!asm.is_assignable_from(&derived, &Type::Builder(base)).unwrap());
        assert!(asm
            .is_assignable_from(&corlib::exception(), &corlib::exception())
            .unwrap());
        assert!(asm
            .is_assignable_from(
                &Type::Object.make_array_type(),
                &Type::String.make_array_type()
            )
            .unwrap());
        assert!(!asm
            .is_assignable_from(&Type::Object.make_array_type(), &Type::I4.make_array_type())
            .unwrap());
    }

    #[test]
    fn member_refs_for_external_methods() {
        let mut asm = assembly();
        let module = asm.define_dynamic_module("m").unwrap();
        let constructor = MethodRef::External(std::sync::Arc::new(corlib::object_constructor()));
        let token = asm.method_token(module, &constructor).unwrap();
        assert_eq!(token.table_id(), Some(TableId::MemberRef));
        assert_eq!(asm.method_token(module, &constructor).unwrap(), token);
    }

    #[test]
    fn derived_types_answer_shape_queries_only() {
        let mut asm = assembly();
        let module = asm.define_dynamic_module("m").unwrap();
        let shape = asm
            .module_builder(module)
            .unwrap()
            .define_type("Shape", TypeAttributes::PUBLIC)
            .unwrap();

        let mut builder = asm.type_builder(shape).unwrap();
        let pointer = builder.make_pointer_type().unwrap();
        let by_ref = builder.make_by_ref_type().unwrap();
        let array = builder.make_array_type().unwrap();
        let matrix = builder.make_array_type_rank(2).unwrap();

        for derived in [&pointer, &by_ref, &array, &matrix] {
            assert_eq!(derived.element_type(), Some(&Type::Builder(shape)));
            assert!(matches!(asm.interfaces(derived), Err(Error::NotSupported(_))));
            assert!(matches!(asm.type_members(derived), Err(Error::NotSupported(_))));
            assert!(matches!(asm.type_methods(derived), Err(Error::NotSupported(_))));
            assert!(matches!(asm.type_constructors(derived), Err(Error::NotSupported(_))));
            assert!(matches!(asm.type_fields(derived), Err(Error::NotSupported(_))));
        }
        assert!(pointer.is_pointer());
        assert!(by_ref.is_by_ref());
        assert!(array.is_array());
        assert_eq!(matrix.array_rank().unwrap(), 2);
        assert!(matches!(
            asm.interfaces(&Type::I4.make_array_type()),
            Err(Error::NotSupported(_))
        ));

        asm.type_builder(shape).unwrap().create_type().unwrap();
        assert!(matches!(asm.type_members(&array), Err(Error::NotSupported(_))));
        assert!(asm.interfaces(&Type::Builder(shape)).unwrap().is_empty());
        assert_eq!(asm.type_constructors(&Type::Builder(shape)).unwrap().len(), 1);
        assert!(matches!(
            asm.type_members(&corlib::exception()),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn shapes_over_open_definitions_have_identity() {
        let mut asm = assembly();
        let module = asm.define_dynamic_module("m").unwrap();
        let node = asm
            .module_builder(module)
            .unwrap()
            .define_type("Node", TypeAttributes::PUBLIC)
            .unwrap();
        let params = asm
            .type_builder(node)
            .unwrap()
            .define_generic_parameters(&["T"])
            .unwrap();

        let mut builder = asm.type_builder(node).unwrap();
        let first = builder.make_pointer_type().unwrap();
        let second = builder.make_pointer_type().unwrap();
        assert_ne!(first, second);
        assert_eq!(first, first.clone());
        assert_eq!(first.to_string(), second.to_string());
        assert_ne!(
            builder.make_array_type().unwrap(),
            builder.make_array_type().unwrap()
        );

        let mut param = asm.generic_param_builder(params[0]).unwrap();
        assert_ne!(
            param.make_by_ref_type().unwrap(),
            param.make_by_ref_type().unwrap()
        );

        asm.type_builder(node).unwrap().create_type().unwrap();
        let mut builder = asm.type_builder(node).unwrap();
        let created = builder.make_pointer_type().unwrap();
        assert_eq!(created, builder.make_pointer_type().unwrap());
        assert_eq!(created, Type::Builder(node).make_pointer_type());
        assert_ne!(created, first);
    }
}
