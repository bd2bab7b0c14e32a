//! Type definitions and their two-phase lifecycle.
//!
//! A type is open while members are being defined. [`TypeBuilder::create_type`] validates
//! it, closes every method body and freezes the definition into a [`RuntimeType`]; after
//! that every structural mutator fails with [`crate::Error::InvalidOperation`] and the
//! reflection style queries start answering.

use std::sync::Arc;

use log::debug;

use crate::{
    assembly::{decode_stream, OpCode},
    emit::{
        assembly::check_name,
        customattr::PseudoAttribute,
        data::{
            BodyState, ClosedBody, EventData, FieldData, GenericParamData, GenericParamOwner,
            MethodData, PInvokeData, PropertyData, SecurityData, TypeData, TypeState,
        },
        AssemblyBuilder, CustomAttribute, CustomAttributeBuilder, EventId, FieldId, FieldRef,
        GenericParamId, MethodId, MethodRef, ModuleId, PermissionSet, PropertyId, RuntimeEvent,
        RuntimeField, RuntimeMethod, RuntimeProperty, RuntimeType, TypeId,
    },
    metadata::{
        flags::{
            CallingConventions, EventAttributes, FieldAttributes, MethodAttributes,
            MethodImplAttributes, PInvokeAttributes, PackingSize, PropertyAttributes,
            SecurityAction, TypeAttributes,
        },
        token::Token,
    },
    typesystem::{corlib, ParamType, Type},
    Error, Result,
};

/// Largest blob accepted by `define_initialized_data`.
const MAX_DATA_SIZE: usize = 0x3F_0000;

/// Optional parts of a type definition.
///
/// ```rust
/// use dotemit::emit::TypeOptions;
/// use dotemit::metadata::flags::PackingSize;
/// use dotemit::typesystem::corlib;
///
/// let options = TypeOptions::new()
///     .with_parent(corlib::value_type())
///     .with_packing(PackingSize::Size4)
///     .with_size(16);
/// assert_eq!(options.size, 16);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TypeOptions {
    /// Base type, `System.Object` for classes if unset
    pub parent: Option<Type>,
    /// Implemented interfaces
    pub interfaces: Vec<Type>,
    /// Packing size
    pub packing: PackingSize,
    /// Total size, 0 if unspecified
    pub size: u32,
}

impl TypeOptions {
    /// No parent, interfaces or layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base type.
    #[must_use]
    pub fn with_parent(mut self, parent: Type) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Add an implemented interface.
    #[must_use]
    pub fn with_interface(mut self, interface: Type) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Set the packing size.
    #[must_use]
    pub fn with_packing(mut self, packing: PackingSize) -> Self {
        self.packing = packing;
        self
    }

    /// Set the total size.
    #[must_use]
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }
}

/// A member of a created type, as returned by [`TypeBuilder::get_members`].
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// A field
    Field(RuntimeField),
    /// An instance constructor or the type initializer
    Constructor(RuntimeMethod),
    /// A method
    Method(RuntimeMethod),
    /// A property
    Property(RuntimeProperty),
    /// An event
    Event(RuntimeEvent),
    /// A nested type
    NestedType(TypeId),
}

fn split_name(full_name: &str) -> (String, String) {
    match full_name.rfind('.') {
        Some(dot) => (
            full_name[..dot].to_string(),
            full_name[dot + 1..].to_string(),
        ),
        None => (String::new(), full_name.to_string()),
    }
}

/// Token operand offsets of a raw body, empty if it does not decode.
fn raw_token_fixups(code: &[u8]) -> Vec<usize> {
    decode_stream(code)
        .map(|instructions| {
            instructions
                .iter()
                .filter(|instruction| instruction.token().is_some())
                .map(|instruction| instruction.next_offset() as usize - 4)
                .collect()
        })
        .unwrap_or_default()
}

impl AssemblyBuilder {
    pub(crate) fn check_type_open(&self, id: TypeId) -> Result<()> {
        let data = self.type_data(id)?;
        if data.is_created() {
            return Err(invalid_operation!(
                "Type '{}' has already been created",
                self.builder_type_name(id)?
            ));
        }
        Ok(())
    }

    /// The snapshot of a created type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] while the type is open.
    pub fn runtime_type(&self, id: TypeId) -> Result<Arc<RuntimeType>> {
        match &self.type_data(id)?.state {
            TypeState::Created(runtime) => Ok(Arc::clone(runtime)),
            TypeState::Open => Err(not_supported!(
                "The invoked member is not supported before the type is created"
            )),
        }
    }

    fn check_parent(&self, parent: &Type) -> Result<()> {
        self.check_type_usable(parent)?;
        let usable = matches!(
            parent,
            Type::Object | Type::External(_) | Type::Builder(_) | Type::GenericInst(_)
        );
        if !usable || self.is_interface(parent)? {
            return Err(invalid_argument!(
                "parent",
                "{} can not be used as a base type",
                self.type_name(parent)
            ));
        }
        Ok(())
    }

    pub(crate) fn new_type(
        &mut self,
        module: ModuleId,
        declaring: Option<TypeId>,
        name: &str,
        attributes: TypeAttributes,
        options: TypeOptions,
    ) -> Result<TypeId> {
        check_name("name", name)?;
        self.check_not_saved()?;
        let mut attributes = attributes;
        let (namespace, simple, full_name) = match declaring {
            Some(outer) => {
                self.check_type_open(outer)?;
                if self.type_data(outer)?.is_global {
                    return Err(invalid_argument!(
                        "declaringType",
                        "The global type can not declare nested types"
                    ));
                }
                if attributes.visibility() == TypeAttributes::PUBLIC.bits() {
                    return Err(invalid_argument!(
                        "attr",
                        "Bad type attributes: a nested type can not be public, use NESTED_PUBLIC"
                    ));
                }
                if !attributes.is_nested() {
                    attributes = attributes.with_visibility(TypeAttributes::NESTED_PRIVATE);
                }
                let full_name = format!("{}+{}", self.builder_type_name(outer)?, name);
                (String::new(), name.to_string(), full_name)
            }
            None => {
                if attributes.is_nested() {
                    return Err(invalid_argument!(
                        "attr",
                        "Bad type attributes: a top-level type can not have nested visibility"
                    ));
                }
                let (namespace, simple) = split_name(name);
                (namespace, simple, name.to_string())
            }
        };
        check_name("name", &simple)?;

        if self.module_data(module)?.type_names.contains_key(&full_name) {
            return Err(invalid_argument!(
                "name",
                "Duplicate type name '{}' within the module",
                full_name
            ));
        }

        if let Some(parent) = &options.parent {
            self.check_parent(parent)?;
        }
        let mut interfaces: Vec<Type> = Vec::new();
        for interface in options.interfaces {
            self.check_type_usable(&interface)?;
            if !interfaces.contains(&interface) {
                interfaces.push(interface);
            }
        }

        let parent = if attributes.is_interface() {
            None
        } else {
            Some(options.parent.unwrap_or(Type::Object))
        };

        let id = TypeId::new(self.serial, self.types.len());
        let module_data = self.module_data(module)?;
        #[allow(clippy::cast_possible_truncation)]
        let row = module_data.types.len() as u32 + 1;

        self.types.push(TypeData {
            module,
            namespace,
            name: simple,
            attributes,
            parent,
            interfaces,
            declaring,
            nested: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            packing: options.packing,
            size: options.size,
            custom_attributes: Vec::new(),
            security: Vec::new(),
            overrides: Vec::new(),
            state: TypeState::Open,
            row,
            is_global: false,
        });

        let module_data = self.module_data_mut(module)?;
        module_data.types.push(id);
        module_data.type_names.insert(full_name.clone(), id);
        if let Some(outer) = declaring {
            self.type_data_mut(outer)?.nested.push(id);
        }
        debug!("Defined type '{}'", full_name);
        Ok(id)
    }

    pub(crate) fn new_field(
        &mut self,
        declaring: TypeId,
        name: &str,
        field_type: ParamType,
        attributes: FieldAttributes,
    ) -> Result<FieldId> {
        check_name("fieldName", name)?;
        self.check_type_open(declaring)?;
        self.check_param_type(&field_type)?;
        if matches!(field_type.ty, Type::Void | Type::ByRef(_)) {
            return Err(invalid_argument!(
                "type",
                "Bad field type {}",
                self.type_name(&field_type.ty)
            ));
        }

        let module = self.type_data(declaring)?.module;
        let id = FieldId::new(self.serial, self.fields.len());
        #[allow(clippy::cast_possible_truncation)]
        let row = self.module_data(module)?.fields.len() as u32 + 1;
        self.fields.push(FieldData {
            declaring,
            name: name.to_string(),
            field_type,
            attributes,
            constant: None,
            offset: None,
            marshal: None,
            data: None,
            custom_attributes: Vec::new(),
            row,
        });
        self.module_data_mut(module)?.fields.push(id);
        self.type_data_mut(declaring)?.fields.push(id);
        Ok(id)
    }

    pub(crate) fn check_param_type(&self, param: &ParamType) -> Result<()> {
        self.check_type_usable(&param.ty)?;
        param
            .required_modifiers
            .iter()
            .chain(param.optional_modifiers.iter())
            .try_for_each(|modifier| self.check_type_usable(modifier))
    }

    pub(crate) fn new_method(
        &mut self,
        declaring: TypeId,
        name: &str,
        attributes: MethodAttributes,
        calling_convention: CallingConventions,
        return_type: ParamType,
        parameters: Vec<ParamType>,
    ) -> Result<MethodId> {
        check_name("name", name)?;
        self.check_type_open(declaring)?;
        self.check_param_type(&return_type)?;
        for parameter in &parameters {
            self.check_param_type(parameter)?;
            if parameter.ty == Type::Void {
                return Err(invalid_argument!("parameterTypes", "A parameter can not be void"));
            }
        }

        let type_data = self.type_data(declaring)?;
        if type_data.attributes.is_interface()
            && !attributes.is_static()
            && !(attributes.is_abstract() && attributes.contains(MethodAttributes::VIRTUAL))
        {
            return Err(invalid_argument!(
                "attributes",
                "Interface method '{}' must be abstract and virtual",
                name
            ));
        }
        if type_data.is_global && !attributes.is_static() {
            return Err(invalid_argument!("attributes", "Global methods must be static"));
        }

        let mut calling_convention = calling_convention;
        if attributes.is_static() {
            calling_convention.remove(CallingConventions::HAS_THIS);
        } else {
            calling_convention.insert(CallingConventions::HAS_THIS);
        }

        let module = type_data.module;
        let id = MethodId::new(self.serial, self.methods.len());
        #[allow(clippy::cast_possible_truncation)]
        let row = self.module_data(module)?.methods.len() as u32 + 1;
        let params = vec![None; parameters.len() + 1];
        self.methods.push(MethodData {
            declaring,
            name: name.to_string(),
            attributes,
            impl_attributes: MethodImplAttributes::IL,
            calling_convention,
            return_type,
            parameters,
            params,
            generic_params: Vec::new(),
            body: BodyState::None,
            init_locals: self.options.init_locals,
            pinvoke: None,
            custom_attributes: Vec::new(),
            security: Vec::new(),
            row,
        });
        self.module_data_mut(module)?.methods.push(id);
        self.type_data_mut(declaring)?.methods.push(id);
        Ok(id)
    }

    pub(crate) fn new_generic_params(
        &mut self,
        owner: GenericParamOwner,
        names: &[&str],
    ) -> Result<Vec<GenericParamId>> {
        if names.is_empty() {
            return Err(invalid_argument!("names", "Empty generic parameter list"));
        }
        for name in names {
            check_name("names", name)?;
        }

        let mut ids = Vec::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            let id = GenericParamId::new(self.serial, self.generic_params.len());
            #[allow(clippy::cast_possible_truncation)]
            let position = position as u32;
            self.generic_params.push(GenericParamData {
                owner,
                position,
                name: (*name).to_string(),
                attributes: crate::metadata::flags::GenericParameterAttributes::empty(),
                base_constraint: None,
                interface_constraints: Vec::new(),
                custom_attributes: Vec::new(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_pinvoke_method(
        &mut self,
        declaring: TypeId,
        name: &str,
        dll_name: &str,
        entry_name: &str,
        attributes: MethodAttributes,
        return_type: Type,
        parameters: Vec<Type>,
        pinvoke_attributes: PInvokeAttributes,
    ) -> Result<MethodId> {
        check_name("dllName", dll_name)?;
        check_name("entryName", entry_name)?;
        if attributes.is_abstract() {
            return Err(invalid_argument!(
                "attributes",
                "A P/Invoke method can not be abstract"
            ));
        }
        if self.type_data(declaring)?.attributes.is_interface() {
            return Err(invalid_argument!(
                "attributes",
                "An interface can not declare P/Invoke methods"
            ));
        }

        let id = self.new_method(
            declaring,
            name,
            attributes | MethodAttributes::PINVOKE_IMPL,
            CallingConventions::DEFAULT,
            ParamType::new(return_type),
            parameters.into_iter().map(ParamType::new).collect(),
        )?;
        let module = self.type_data(declaring)?.module;
        self.module_data(module)?.tokens.module_ref(dll_name);

        let data = self.method_data_mut(id)?;
        data.impl_attributes = MethodImplAttributes::PRESERVE_SIG;
        data.pinvoke = Some(PInvokeData {
            dll_name: dll_name.to_string(),
            entry_name: entry_name.to_string(),
            attributes: pinvoke_attributes,
        });
        Ok(id)
    }

    /// Define a static field whose initial value is `data`, backed by an RVA.
    pub(crate) fn new_data_field(
        &mut self,
        owner: TypeId,
        name: &str,
        data: Vec<u8>,
        attributes: FieldAttributes,
    ) -> Result<FieldId> {
        check_name("name", name)?;
        self.check_type_open(owner)?;
        if data.is_empty() || data.len() > MAX_DATA_SIZE {
            return Err(invalid_argument!(
                "size",
                "Data size must be between 1 and {:#x} bytes",
                MAX_DATA_SIZE
            ));
        }

        let holder = self.data_holder_type(owner, data.len())?;
        let field = self.new_field(
            owner,
            name,
            ParamType::new(Type::Builder(holder)),
            (attributes | FieldAttributes::STATIC | FieldAttributes::HAS_FIELD_RVA)
                - FieldAttributes::LITERAL,
        )?;
        self.field_data_mut(field)?.data = Some(data);
        Ok(field)
    }

    /// The `$ArrayType$<size>` value type that gives an RVA field its size.
    fn data_holder_type(&mut self, owner: TypeId, size: usize) -> Result<TypeId> {
        let owner_data = self.type_data(owner)?;
        let module = owner_data.module;
        let declaring = if owner_data.is_global { None } else { Some(owner) };

        let simple = format!("$ArrayType${size}");
        let full_name = match declaring {
            Some(outer) => format!("{}+{}", self.builder_type_name(outer)?, simple),
            None => simple.clone(),
        };
        if let Some(existing) = self.module_data(module)?.type_names.get(&full_name) {
            return Ok(*existing);
        }

        let visibility = if declaring.is_some() {
            TypeAttributes::NESTED_PRIVATE
        } else {
            TypeAttributes::NOT_PUBLIC
        };
        #[allow(clippy::cast_possible_truncation)]
        let options = TypeOptions::new()
            .with_parent(corlib::value_type())
            .with_packing(PackingSize::Size1)
            .with_size(size as u32);
        let holder = self.new_type(
            module,
            declaring,
            &simple,
            visibility | TypeAttributes::EXPLICIT_LAYOUT | TypeAttributes::SEALED,
            options,
        )?;
        self.create_type_internal(holder)?;
        Ok(holder)
    }

    /// The type of the single instance field of an enum.
    pub(crate) fn enum_underlying_type_of(&self, id: TypeId) -> Result<Type> {
        let data = self.type_data(id)?;
        for field in &data.fields {
            let field_data = self.field_data(*field)?;
            if !field_data.attributes.is_static() {
                return Ok(field_data.field_type.ty.clone());
            }
        }
        Err(invalid_operation!(
            "Enum '{}' has no underlying field",
            self.builder_type_name(id)?
        ))
    }

    fn validate_type(&self, id: TypeId) -> Result<()> {
        let data = self.type_data(id)?;
        let type_load = |message: &str| -> Result<Error> {
            Ok(Error::TypeLoad {
                type_name: self.builder_type_name(id)?,
                message: message.to_string(),
            })
        };

        if data.attributes.is_interface() && !data.attributes.contains(TypeAttributes::ABSTRACT) {
            return Err(type_load("An interface must be abstract")?);
        }

        let sealed_parent = match &data.parent {
            Some(Type::Builder(parent)) => self
                .type_data(*parent)?
                .attributes
                .contains(TypeAttributes::SEALED),
            Some(Type::External(parent)) => parent.is_sealed,
            _ => false,
        };
        if sealed_parent {
            return Err(type_load("Can not derive from a sealed type")?);
        }

        if data.parent == Some(corlib::enum_type()) {
            let mut instance_fields = Vec::new();
            for field in &data.fields {
                let field_data = self.field_data(*field)?;
                if !field_data.attributes.is_static() {
                    instance_fields.push(field_data);
                }
            }
            if instance_fields.len() != 1 {
                return Err(type_load("An enum must have exactly one instance field")?);
            }
            if !instance_fields[0].field_type.ty.is_integral() {
                return Err(type_load("The underlying type of an enum must be integral")?);
            }
            if data.attributes.layout() != TypeAttributes::AUTO_LAYOUT.bits() {
                return Err(type_load("An enum must have auto layout")?);
            }
            if !data.methods.is_empty() {
                return Err(type_load("An enum can not declare methods")?);
            }
        }

        if !data.attributes.contains(TypeAttributes::ABSTRACT) {
            for method in &data.methods {
                if self.method_data(*method)?.attributes.is_abstract() {
                    return Err(type_load(
                        "A type with abstract methods must be abstract",
                    )?);
                }
            }
        }
        Ok(())
    }

    fn needs_implicit_constructor(&self, id: TypeId) -> Result<bool> {
        let data = self.type_data(id)?;
        if data.attributes.is_interface()
            || data.attributes.contains(TypeAttributes::ABSTRACT | TypeAttributes::SEALED)
            || self.is_value_type(&Type::Builder(id))?
        {
            return Ok(false);
        }
        for method in &data.methods {
            let method_data = self.method_data(*method)?;
            if method_data.name == ".ctor" {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Close the body of `method` for the writer.
    fn close_body(&self, module: ModuleId, method: MethodId) -> Result<Option<ClosedBody>> {
        let data = self.method_data(method)?;
        let needs_body = data.needs_body();
        match &data.body {
            BodyState::None if needs_body => Err(invalid_operation!(
                "Method '{}' does not have a method body",
                data.name
            )),
            BodyState::None => Ok(None),
            BodyState::Closed(body) => Ok(Some(body.clone())),
            _ if !needs_body => Err(invalid_operation!(
                "Method '{}' can not have a method body",
                data.name
            )),
            BodyState::Generator(state) => {
                let resolved = state.close()?;
                let local_sig = if resolved.locals.is_empty() {
                    Token::new(0)
                } else {
                    let signature = self.local_signature_blob(module, &resolved.locals)?;
                    self.module_data(module)?.tokens.standalone_sig(signature)
                };
                Ok(Some(ClosedBody {
                    code: resolved.code,
                    max_stack: resolved.max_stack,
                    local_sig,
                    init_locals: data.init_locals,
                    handlers: resolved.handlers,
                    token_fixups: resolved.token_fixups,
                }))
            }
            BodyState::Raw { code, max_stack } => Ok(Some(ClosedBody {
                token_fixups: raw_token_fixups(code),
                code: code.clone(),
                max_stack: *max_stack,
                local_sig: Token::new(0),
                init_locals: data.init_locals,
                handlers: Vec::new(),
            })),
        }
    }

    /// Validate, close and freeze a type. On failure the type stays open.
    pub(crate) fn create_type_internal(&mut self, id: TypeId) -> Result<Arc<RuntimeType>> {
        self.check_type_open(id)?;
        let data = self.type_data(id)?;
        let is_global = data.is_global;
        let module = data.module;
        if !is_global {
            self.validate_type(id)?;
        }

        let mut closed = Vec::new();
        for method in self.type_data(id)?.methods.clone() {
            closed.push((method, self.close_body(module, method)?));
        }
        if !is_global && self.needs_implicit_constructor(id)? {
            let constructor = self
                .type_builder(id)?
                .define_default_constructor(MethodAttributes::PUBLIC)?;
            closed.push((constructor, self.close_body(module, constructor)?));
        }

        for (method, body) in closed {
            if let Some(body) = body {
                self.method_data_mut(method)?.body = BodyState::Closed(body);
            }
        }

        let snapshot = Arc::new(self.runtime_snapshot(id)?);
        self.type_data_mut(id)?.state = TypeState::Created(Arc::clone(&snapshot));
        debug!(
            "Created type '{}' with {} methods",
            snapshot.full_name,
            snapshot.methods.len() + snapshot.constructors.len()
        );
        Ok(snapshot)
    }
}

/// Builder view of one type definition.
pub struct TypeBuilder<'a> {
    asm: &'a mut AssemblyBuilder,
    id: TypeId,
}

impl<'a> TypeBuilder<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, id: TypeId) -> Self {
        TypeBuilder { asm, id }
    }

    fn data(&self) -> Result<&TypeData> {
        self.asm.type_data(self.id)
    }

    fn data_mut(&mut self) -> Result<&mut TypeData> {
        self.asm.type_data_mut(self.id)
    }

    fn check_open(&self) -> Result<()> {
        self.asm.check_type_open(self.id)
    }

    /// Handle of this type.
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// This type as a [`Type`].
    #[must_use]
    pub fn as_type(&self) -> Type {
        Type::Builder(self.id)
    }

    /// Simple name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn name(&self) -> Result<String> {
        Ok(self.data()?.name.clone())
    }

    /// Namespace, empty for nested types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn namespace(&self) -> Result<String> {
        Ok(self.data()?.namespace.clone())
    }

    /// Full name, nested types joined with `+`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn full_name(&self) -> Result<String> {
        self.asm.builder_type_name(self.id)
    }

    /// Type attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn attributes(&self) -> Result<TypeAttributes> {
        Ok(self.data()?.attributes)
    }

    /// The declaring module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn module(&self) -> Result<ModuleId> {
        Ok(self.data()?.module)
    }

    /// Enclosing type of a nested type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn declaring_type(&self) -> Result<Option<TypeId>> {
        Ok(self.data()?.declaring)
    }

    /// Returns true once [`Self::create_type`] succeeded.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_created(&self) -> Result<bool> {
        Ok(self.data()?.is_created())
    }

    /// Base type; `None` for interfaces.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn base_type(&self) -> Result<Option<Type>> {
        Ok(self.data()?.parent.clone())
    }

    /// Packing size.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn packing_size(&self) -> Result<PackingSize> {
        Ok(self.data()?.packing)
    }

    /// Total size, 0 if unspecified.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn size(&self) -> Result<u32> {
        Ok(self.data()?.size)
    }

    /// Define a field.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad name or a `void` type and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn define_field(
        &mut self,
        name: &str,
        field_type: Type,
        attributes: FieldAttributes,
    ) -> Result<FieldId> {
        self.asm
            .new_field(self.id, name, ParamType::new(field_type), attributes)
    }

    /// Define a field whose type carries custom modifiers.
    ///
    /// # Errors
    /// See [`Self::define_field`].
    pub fn define_field_with_modifiers(
        &mut self,
        name: &str,
        field_type: ParamType,
        attributes: FieldAttributes,
    ) -> Result<FieldId> {
        self.asm.new_field(self.id, name, field_type, attributes)
    }

    /// Define a method. Instance methods get the `HASTHIS` calling convention.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad name, a `void` parameter or a
    /// non-abstract instance method on an interface, and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn define_method(
        &mut self,
        name: &str,
        attributes: MethodAttributes,
        return_type: Type,
        parameters: Vec<Type>,
    ) -> Result<MethodId> {
        self.define_method_with_signature(
            name,
            attributes,
            CallingConventions::DEFAULT,
            ParamType::new(return_type),
            parameters.into_iter().map(ParamType::new).collect(),
        )
    }

    /// Define a method with an explicit calling convention and custom modifiers.
    ///
    /// # Errors
    /// See [`Self::define_method`].
    pub fn define_method_with_signature(
        &mut self,
        name: &str,
        attributes: MethodAttributes,
        calling_convention: CallingConventions,
        return_type: ParamType,
        parameters: Vec<ParamType>,
    ) -> Result<MethodId> {
        self.asm.new_method(
            self.id,
            name,
            attributes,
            calling_convention,
            return_type,
            parameters,
        )
    }

    /// Define an instance constructor, or the type initializer for static attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] for interfaces and after the type has
    /// been created.
    pub fn define_constructor(
        &mut self,
        attributes: MethodAttributes,
        parameters: Vec<Type>,
    ) -> Result<MethodId> {
        self.check_open()?;
        if self.data()?.attributes.is_interface() {
            return Err(invalid_operation!("Interfaces can not declare constructors"));
        }
        let name = if attributes.is_static() { ".cctor" } else { ".ctor" };
        self.asm.new_method(
            self.id,
            name,
            attributes | MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME,
            CallingConventions::DEFAULT,
            ParamType::new(Type::Void),
            parameters.into_iter().map(ParamType::new).collect(),
        )
    }

    /// Define the parameterless constructor that calls the parent's one.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the parent has no parameterless
    /// constructor, for interfaces and after the type has been created.
    pub fn define_default_constructor(&mut self, attributes: MethodAttributes) -> Result<MethodId> {
        self.check_open()?;
        if self.data()?.attributes.is_interface() {
            return Err(invalid_operation!("Interfaces can not declare constructors"));
        }
        let parent = self.data()?.parent.clone().unwrap_or(Type::Object);
        let Some(base) = self.asm.default_constructor_of(&parent)? else {
            return Err(invalid_operation!(
                "Parent {} does not have a default constructor",
                self.asm.type_name(&parent)
            ));
        };

        let constructor = self.define_constructor(attributes - MethodAttributes::STATIC, Vec::new())?;
        let mut il = self.asm.il_generator(constructor)?;
        il.emit(OpCode::LDARG_0)?;
        il.emit_method(OpCode::CALL, &base)?;
        il.emit(OpCode::RET)?;
        Ok(constructor)
    }

    /// Define the static constructor.
    ///
    /// # Errors
    /// See [`Self::define_constructor`].
    pub fn define_type_initializer(&mut self) -> Result<MethodId> {
        self.define_constructor(MethodAttributes::PRIVATE | MethodAttributes::STATIC, Vec::new())
    }

    /// Define an instance property with `HASTHIS` signature.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad name and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn define_property(
        &mut self,
        name: &str,
        attributes: PropertyAttributes,
        property_type: Type,
        parameters: Vec<Type>,
    ) -> Result<PropertyId> {
        self.define_property_with_signature(
            name,
            attributes,
            true,
            ParamType::new(property_type),
            parameters.into_iter().map(ParamType::new).collect(),
        )
    }

    /// Define a property with explicit `HASTHIS` and custom modifiers.
    ///
    /// # Errors
    /// See [`Self::define_property`].
    pub fn define_property_with_signature(
        &mut self,
        name: &str,
        attributes: PropertyAttributes,
        has_this: bool,
        property_type: ParamType,
        parameters: Vec<ParamType>,
    ) -> Result<PropertyId> {
        check_name("name", name)?;
        self.check_open()?;
        self.asm.check_param_type(&property_type)?;
        for parameter in &parameters {
            self.asm.check_param_type(parameter)?;
        }

        let id = PropertyId::new(self.asm.serial, self.asm.properties.len());
        self.asm.properties.push(PropertyData {
            declaring: self.id,
            name: name.to_string(),
            attributes,
            has_this,
            property_type,
            parameters,
            getter: None,
            setter: None,
            others: Vec::new(),
            constant: None,
            custom_attributes: Vec::new(),
        });
        self.data_mut()?.properties.push(id);
        Ok(id)
    }

    /// Define an event.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad name and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn define_event(
        &mut self,
        name: &str,
        attributes: EventAttributes,
        event_type: Type,
    ) -> Result<EventId> {
        check_name("name", name)?;
        self.check_open()?;
        self.asm.check_type_usable(&event_type)?;

        let id = EventId::new(self.asm.serial, self.asm.events.len());
        self.asm.events.push(EventData {
            declaring: self.id,
            name: name.to_string(),
            attributes,
            event_type,
            add_on: None,
            remove_on: None,
            raise: None,
            others: Vec::new(),
            custom_attributes: Vec::new(),
        });
        self.data_mut()?.events.push(id);
        Ok(id)
    }

    /// Define a nested type. `NOT_PUBLIC` becomes `NESTED_PRIVATE`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad or duplicate name or `PUBLIC`
    /// visibility, and [`crate::Error::InvalidOperation`] after this type has been created.
    pub fn define_nested_type(&mut self, name: &str, attributes: TypeAttributes) -> Result<TypeId> {
        self.define_nested_type_with(name, attributes, TypeOptions::new())
    }

    /// [`Self::define_nested_type`] with parent, interfaces and layout.
    ///
    /// # Errors
    /// See [`Self::define_nested_type`].
    pub fn define_nested_type_with(
        &mut self,
        name: &str,
        attributes: TypeAttributes,
        options: TypeOptions,
    ) -> Result<TypeId> {
        let module = self.data()?.module;
        self.asm
            .new_type(module, Some(self.id), name, attributes, options)
    }

    /// Make this a generic type definition.
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
            .new_generic_params(GenericParamOwner::Type(self.id), names)?;
        self.data_mut()?.generic_params = ids.clone();
        Ok(ids)
    }

    /// Define a method forwarded to an unmanaged export.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for bad names, abstract attributes or an
    /// interface, and [`crate::Error::InvalidOperation`] after the type has been created.
    #[allow(clippy::too_many_arguments)]
    pub fn define_pinvoke_method(
        &mut self,
        name: &str,
        dll_name: &str,
        entry_name: &str,
        attributes: MethodAttributes,
        return_type: Type,
        parameters: Vec<Type>,
        pinvoke_attributes: PInvokeAttributes,
    ) -> Result<MethodId> {
        self.asm.new_pinvoke_method(
            self.id,
            name,
            dll_name,
            entry_name,
            attributes,
            return_type,
            parameters,
            pinvoke_attributes,
        )
    }

    /// Define a static field initialized with `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for empty or oversized data and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn define_initialized_data(
        &mut self,
        name: &str,
        data: &[u8],
        attributes: FieldAttributes,
    ) -> Result<FieldId> {
        self.asm
            .new_data_field(self.id, name, data.to_vec(), attributes)
    }

    /// Define a zero-initialized static field of `size` bytes.
    ///
    /// # Errors
    /// See [`Self::define_initialized_data`].
    pub fn define_uninitialized_data(
        &mut self,
        name: &str,
        size: usize,
        attributes: FieldAttributes,
    ) -> Result<FieldId> {
        if size == 0 || size > MAX_DATA_SIZE {
            return Err(invalid_argument!(
                "size",
                "Data size must be between 1 and {:#x} bytes",
                MAX_DATA_SIZE
            ));
        }
        self.asm
            .new_data_field(self.id, name, vec![0; size], attributes)
    }

    /// Replace the base type. `None` means `System.Object` for classes and no parent for
    /// abstract interfaces.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an interface or non-class parent and
    /// [`crate::Error::InvalidOperation`] for a non-abstract interface, an interface with
    /// a parent and after the type has been created.
    pub fn set_parent(&mut self, parent: Option<Type>) -> Result<()> {
        self.check_open()?;
        let attributes = self.data()?.attributes;
        let parent = match parent {
            Some(parent) => {
                self.asm.check_parent(&parent)?;
                if attributes.is_interface() {
                    return Err(invalid_operation!("An interface can not have a parent"));
                }
                Some(parent)
            }
            None if attributes.is_interface() => {
                if !attributes.contains(TypeAttributes::ABSTRACT) {
                    return Err(invalid_operation!("An interface must be abstract"));
                }
                None
            }
            None => Some(Type::Object),
        };
        self.data_mut()?.parent = parent;
        Ok(())
    }

    /// Add an implemented interface; duplicates are ignored.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `interface` is not an interface and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn add_interface_implementation(&mut self, interface: Type) -> Result<()> {
        self.check_open()?;
        self.asm.check_type_usable(&interface)?;
        if !self.asm.is_interface(&interface)? {
            return Err(invalid_argument!(
                "interfaceType",
                "{} is not an interface",
                self.asm.type_name(&interface)
            ));
        }
        let data = self.data_mut()?;
        if !data.interfaces.contains(&interface) {
            data.interfaces.push(interface);
        }
        Ok(())
    }

    /// Record that `body`, declared on this type, implements `declaration`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `body` is declared elsewhere and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn define_method_override(&mut self, body: MethodId, declaration: MethodRef) -> Result<()> {
        self.check_open()?;
        if self.asm.method_data(body)?.declaring != self.id {
            return Err(invalid_argument!(
                "methodInfoBody",
                "The method body must be declared on this type"
            ));
        }
        self.asm.method_ref_name(&declaration)?;
        self.data_mut()?
            .overrides
            .push((MethodRef::Builder(body), declaration));
        Ok(())
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
        data.attributes |= TypeAttributes::HAS_SECURITY;
        Ok(())
    }

    /// Apply a custom attribute. `Serializable`, `ComImport`, `SpecialName` and
    /// `StructLayout` become type flags instead of attribute rows.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad constructor or arguments and
    /// [`crate::Error::InvalidOperation`] after the type has been created.
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        self.check_open()?;
        let attribute = self.asm.build_custom_attribute(builder)?;

        match self.asm.pseudo_attribute(&attribute)? {
            Some(PseudoAttribute::Serializable) => {
                self.data_mut()?.attributes |= TypeAttributes::SERIALIZABLE;
            }
            Some(PseudoAttribute::ComImport) => {
                self.data_mut()?.attributes |= TypeAttributes::IMPORT;
            }
            Some(PseudoAttribute::SpecialName) => {
                self.data_mut()?.attributes |= TypeAttributes::SPECIAL_NAME;
            }
            Some(PseudoAttribute::StructLayout {
                kind,
                pack,
                size,
                char_set,
            }) => self.apply_struct_layout(kind, pack, size, char_set)?,
            Some(PseudoAttribute::SuppressUnmanagedCodeSecurity) => {
                let data = self.data_mut()?;
                data.attributes |= TypeAttributes::HAS_SECURITY;
                data.custom_attributes.push(attribute);
            }
            _ => self.data_mut()?.custom_attributes.push(attribute),
        }
        Ok(())
    }

    fn apply_struct_layout(
        &mut self,
        kind: u32,
        pack: Option<u32>,
        size: Option<u32>,
        char_set: Option<u32>,
    ) -> Result<()> {
        let layout = match kind {
            0 => TypeAttributes::SEQUENTIAL_LAYOUT,
            2 => TypeAttributes::EXPLICIT_LAYOUT,
            3 => TypeAttributes::AUTO_LAYOUT,
            _ => return Err(invalid_argument!("customBuilder", "Unknown LayoutKind {}", kind)),
        };
        let string_format = match char_set {
            None | Some(1 | 2) => TypeAttributes::ANSI_CLASS,
            Some(3) => TypeAttributes::UNICODE_CLASS,
            Some(4) => TypeAttributes::AUTO_CLASS,
            Some(other) => {
                return Err(invalid_argument!("customBuilder", "Unknown CharSet {}", other))
            }
        };
        let packing = match pack {
            None => None,
            Some(pack) => Some(
                u16::try_from(pack)
                    .ok()
                    .and_then(PackingSize::from_u16)
                    .ok_or_else(|| invalid_argument!("customBuilder", "Bad packing size {}", pack))?,
            ),
        };

        let data = self.data_mut()?;
        data.attributes.remove(TypeAttributes::LAYOUT_MASK | TypeAttributes::STRING_FORMAT_MASK);
        data.attributes |= layout | string_format;
        if let Some(packing) = packing {
            data.packing = packing;
        }
        if let Some(size) = size {
            data.size = size;
        }
        Ok(())
    }

    /// The method `method` of a generic type builder seen through `instance`, a generic
    /// instantiation of it.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `instance` is not an instantiation of
    /// the declaring type of `method`.
    pub fn get_method(asm: &AssemblyBuilder, instance: &Type, method: MethodId) -> Result<MethodRef> {
        asm.instantiated_method(instance, method)
    }

    /// The constructor `constructor` seen through `instance`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `constructor` is not a constructor or
    /// `instance` is not an instantiation of its declaring type.
    pub fn get_constructor(
        asm: &AssemblyBuilder,
        instance: &Type,
        constructor: MethodId,
    ) -> Result<MethodRef> {
        if !asm.method_data(constructor)?.is_constructor() {
            return Err(invalid_argument!("constructor", "The method is not a constructor"));
        }
        asm.instantiated_method(instance, constructor)
    }

    /// The field `field` seen through `instance`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `instance` is not an instantiation of
    /// the declaring type of `field`.
    pub fn get_field(asm: &AssemblyBuilder, instance: &Type, field: FieldId) -> Result<FieldRef> {
        asm.instantiated_field(instance, field)
    }

    /// Close this generic type definition over `arguments`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] for a non-generic type and
    /// [`crate::Error::InvalidArgument`] for a wrong number of arguments.
    pub fn make_generic_type(&self, arguments: Vec<Type>) -> Result<Type> {
        self.asm.make_generic_type(&self.as_type(), arguments)
    }

    /// A pointer to this type.
    ///
    /// While the type is open every call gives a distinct type, equal only to its clones.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn make_pointer_type(&mut self) -> Result<Type> {
        let element = self.as_type();
        Ok(Type::Pointer(self.asm.derived_element(element)?))
    }

    /// A managed reference to this type, see [`Self::make_pointer_type`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn make_by_ref_type(&mut self) -> Result<Type> {
        let element = self.as_type();
        Ok(Type::ByRef(self.asm.derived_element(element)?))
    }

    /// A single-dimensional array of this type, see [`Self::make_pointer_type`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn make_array_type(&mut self) -> Result<Type> {
        let element = self.as_type();
        Ok(Type::SzArray(self.asm.derived_element(element)?))
    }

    /// A multi-dimensional array of this type, see [`Self::make_pointer_type`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `rank` is 0 or larger than 32.
    pub fn make_array_type_rank(&mut self, rank: u32) -> Result<Type> {
        if rank == 0 || rank > 32 {
            return Err(invalid_argument!("rank", "Invalid array rank {}", rank));
        }
        let element = self.as_type();
        Ok(Type::Array(self.asm.derived_element(element)?, rank))
    }

    /// The type itself, or the underlying integral type of an enum.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] for an enum without underlying field.
    pub fn underlying_system_type(&self) -> Result<Type> {
        if self.is_enum()? {
            return self.asm.enum_underlying_type_of(self.id);
        }
        Ok(self.as_type())
    }

    /// Runtime type handle. Builder types never have one.
    ///
    /// # Errors
    /// Always [`crate::Error::NotSupported`].
    pub fn type_handle(&self) -> Result<()> {
        Err(not_supported!("A dynamic type has no runtime type handle"))
    }

    /// Directly implemented interfaces, available in both states.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn get_interfaces(&self) -> Result<Vec<Type>> {
        Ok(self.data()?.interfaces.clone())
    }

    /// Finalize the type.
    ///
    /// The type is validated (interfaces abstract, enums with one integral instance field,
    /// abstract methods only on abstract types), every method body is closed, a default
    /// constructor is added to classes without constructor, and the definition is frozen.
    /// A failed call leaves the type open.
    ///
    /// # Errors
    /// Returns [`crate::Error::TypeLoad`] for an invalid definition and
    /// [`crate::Error::InvalidOperation`] for a missing or unfinished method body or a
    /// second call.
    pub fn create_type(&mut self) -> Result<Arc<RuntimeType>> {
        self.asm.create_type_internal(self.id)
    }

    fn runtime(&self) -> Result<Arc<RuntimeType>> {
        self.asm.runtime_type(self.id)
    }

    /// Fields of the created type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_fields(&self) -> Result<Vec<RuntimeField>> {
        Ok(self.runtime()?.fields.clone())
    }

    /// Methods of the created type, constructors excluded.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_methods(&self) -> Result<Vec<RuntimeMethod>> {
        Ok(self.runtime()?.methods.clone())
    }

    /// Instance constructors of the created type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_constructors(&self) -> Result<Vec<RuntimeMethod>> {
        Ok(self.runtime()?.constructors.clone())
    }

    /// The static constructor of the created type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn type_initializer(&self) -> Result<Option<RuntimeMethod>> {
        Ok(self.runtime()?.type_initializer.clone())
    }

    /// Properties of the created type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_properties(&self) -> Result<Vec<RuntimeProperty>> {
        Ok(self.runtime()?.properties.clone())
    }

    /// Events of the created type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_events(&self) -> Result<Vec<RuntimeEvent>> {
        Ok(self.runtime()?.events.clone())
    }

    /// Nested types of the created type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_nested_types(&self) -> Result<Vec<TypeId>> {
        Ok(self.runtime()?.nested_types.clone())
    }

    /// Every member of the created type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_members(&self) -> Result<Vec<Member>> {
        Ok(self.runtime()?.members())
    }

    /// Directly implemented interface by full name.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_interface(&self, name: &str) -> Result<Option<Type>> {
        let runtime = self.runtime()?;
        Ok(runtime
            .interfaces
            .iter()
            .find(|interface| self.asm.type_name(interface) == name)
            .cloned())
    }

    /// Applied custom attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn get_custom_attributes(&self) -> Result<Vec<CustomAttribute>> {
        Ok(self.runtime()?.custom_attributes.clone())
    }

    /// Returns true if an attribute declared on `attribute_type` is applied.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn is_defined(&self, attribute_type: &Type) -> Result<bool> {
        Ok(self.runtime()?.is_defined(self.asm, attribute_type))
    }

    /// Stable identifier of the created type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the type is created.
    pub fn guid(&self) -> Result<uguid::Guid> {
        Ok(self.runtime()?.guid)
    }

    /// Returns true for classes: neither interfaces nor value types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_class(&self) -> Result<bool> {
        Ok(!self.is_interface()? && !self.is_value_type()?)
    }

    /// Returns true for interfaces.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_interface(&self) -> Result<bool> {
        Ok(self.attributes()?.is_interface())
    }

    /// Returns true for value types and enums.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_value_type(&self) -> Result<bool> {
        self.asm.is_value_type(&self.as_type())
    }

    /// Returns true for enums.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_enum(&self) -> Result<bool> {
        Ok(self.data()?.parent == Some(corlib::enum_type()))
    }

    /// Returns true for abstract types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_abstract(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(TypeAttributes::ABSTRACT))
    }

    /// Returns true for sealed types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_sealed(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(TypeAttributes::SEALED))
    }

    /// Returns true for `PUBLIC` top-level types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_public(&self) -> Result<bool> {
        Ok(self.attributes()?.visibility() == TypeAttributes::PUBLIC.bits())
    }

    /// Returns true for `NOT_PUBLIC` top-level types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_not_public(&self) -> Result<bool> {
        Ok(self.attributes()?.visibility() == TypeAttributes::NOT_PUBLIC.bits())
    }

    /// Returns true for nested types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_nested(&self) -> Result<bool> {
        Ok(self.data()?.declaring.is_some())
    }

    /// Returns true for `NESTED_PUBLIC` types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_nested_public(&self) -> Result<bool> {
        Ok(self.attributes()?.visibility() == TypeAttributes::NESTED_PUBLIC.bits())
    }

    /// Returns true for `NESTED_PRIVATE` types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_nested_private(&self) -> Result<bool> {
        Ok(self.attributes()?.visibility() == TypeAttributes::NESTED_PRIVATE.bits())
    }

    /// Returns true for automatic layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_auto_layout(&self) -> Result<bool> {
        Ok(self.attributes()?.layout() == TypeAttributes::AUTO_LAYOUT.bits())
    }

    /// Returns true for sequential layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_layout_sequential(&self) -> Result<bool> {
        Ok(self.attributes()?.layout() == TypeAttributes::SEQUENTIAL_LAYOUT.bits())
    }

    /// Returns true for explicit layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_explicit_layout(&self) -> Result<bool> {
        Ok(self.attributes()?.layout() == TypeAttributes::EXPLICIT_LAYOUT.bits())
    }

    /// Returns true if strings marshal as ANSI.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_ansi_class(&self) -> Result<bool> {
        Ok(self.attributes()?.bits() & TypeAttributes::STRING_FORMAT_MASK.bits() == 0)
    }

    /// Returns true if strings marshal as Unicode.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_unicode_class(&self) -> Result<bool> {
        Ok(self.attributes()?.bits() & TypeAttributes::STRING_FORMAT_MASK.bits()
            == TypeAttributes::UNICODE_CLASS.bits())
    }

    /// Returns true if the string format is chosen automatically.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_auto_class(&self) -> Result<bool> {
        Ok(self.attributes()?.bits() & TypeAttributes::STRING_FORMAT_MASK.bits()
            == TypeAttributes::AUTO_CLASS.bits())
    }

    /// Returns true for `ComImport` types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_import(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(TypeAttributes::IMPORT))
    }

    /// Returns true for serializable types.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_serializable(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(TypeAttributes::SERIALIZABLE))
    }

    /// Returns true for special names.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_special_name(&self) -> Result<bool> {
        Ok(self.attributes()?.contains(TypeAttributes::SPECIAL_NAME))
    }

    /// Returns true for generic type definitions.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_generic_type_definition(&self) -> Result<bool> {
        Ok(!self.data()?.generic_params.is_empty())
    }

    /// A builder is only ever a generic definition, never a closed instance.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_generic_type(&self) -> Result<bool> {
        self.is_generic_type_definition()
    }

    /// Open generic parameters of a definition are unbound.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn contains_generic_parameters(&self) -> Result<bool> {
        self.is_generic_type_definition()
    }

    /// Generic parameters of a generic type definition.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn generic_parameters(&self) -> Result<Vec<GenericParamId>> {
        Ok(self.data()?.generic_params.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emit::AssemblyBuilderAccess,
        metadata::{customattributes::CaValue, identity::AssemblyName},
    };

    fn setup() -> (AssemblyBuilder, ModuleId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("types"), AssemblyBuilderAccess::RunAndSave);
        let module = asm.define_persistent_module("types", "types.dll").unwrap();
        (asm, module)
    }

    fn define(asm: &mut AssemblyBuilder, module: ModuleId, name: &str, attributes: TypeAttributes) -> TypeId {
        asm.module_builder(module)
            .unwrap()
            .define_type(name, attributes)
            .unwrap()
    }

    #[test]
    fn names_and_nesting() {
        let (mut asm, module) = setup();
        let outer = define(&mut asm, module, "N.Outer", TypeAttributes::PUBLIC);
        let inner = asm
            .type_builder(outer)
            .unwrap()
            .define_nested_type("Inner", TypeAttributes::NOT_PUBLIC)
            .unwrap();

        let builder = asm.type_builder(inner).unwrap();
        assert_eq!(builder.full_name().unwrap(), "N.Outer+Inner");
        assert_eq!(builder.namespace().unwrap(), "");
        assert!(builder.is_nested_private().unwrap());
        assert_eq!(builder.declaring_type().unwrap(), Some(outer));

        assert!(matches!(
            asm.type_builder(outer)
                .unwrap()
                .define_nested_type("Bad", TypeAttributes::PUBLIC),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            asm.module_builder(module)
                .unwrap()
                .define_type("Top", TypeAttributes::NESTED_PUBLIC),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            asm.module_builder(module)
                .unwrap()
                .define_type("N.Outer", TypeAttributes::PUBLIC),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn implicit_constructor_and_snapshot() {
        let (mut asm, module) = setup();
        let ty = define(&mut asm, module, "Plain", TypeAttributes::PUBLIC);
        asm.type_builder(ty)
            .unwrap()
            .define_field("value", Type::I4, FieldAttributes::PRIVATE)
            .unwrap();

        assert!(matches!(
            asm.type_builder(ty).unwrap().get_fields(),
            Err(Error::NotSupported(_))
        ));

        let runtime = asm.type_builder(ty).unwrap().create_type().unwrap();
        assert_eq!(runtime.constructors.len(), 1);
        assert_eq!(runtime.fields[0].name, "value");

        let builder = asm.type_builder(ty).unwrap();
        assert!(builder.is_created().unwrap());
        assert_eq!(builder.get_constructors().unwrap().len(), 1);
        assert_eq!(builder.guid().unwrap(), runtime.guid);

        assert!(matches!(
            asm.type_builder(ty)
                .unwrap()
                .define_field("late", Type::I4, FieldAttributes::PUBLIC),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            asm.type_builder(ty).unwrap().create_type(),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn no_implicit_constructor_for_static_classes_and_structs() {
        let (mut asm, module) = setup();
        let helpers = define(
            &mut asm,
            module,
            "Helpers",
            TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT | TypeAttributes::SEALED,
        );
        let runtime = asm.type_builder(helpers).unwrap().create_type().unwrap();
        assert!(runtime.constructors.is_empty());

        let point = asm
            .module_builder(module)
            .unwrap()
            .define_type_with_parent(
                "Point",
                TypeAttributes::PUBLIC | TypeAttributes::SEALED,
                Some(corlib::value_type()),
            )
            .unwrap();
        let runtime = asm.type_builder(point).unwrap().create_type().unwrap();
        assert!(runtime.constructors.is_empty());
        assert!(asm.type_builder(point).unwrap().is_value_type().unwrap());
    }

    #[test]
    fn validation_failures_leave_the_type_open() {
        let (mut asm, module) = setup();
        let shape = define(&mut asm, module, "Shape", TypeAttributes::PUBLIC);
        asm.type_builder(shape)
            .unwrap()
            .define_method(
                "Area",
                MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL | MethodAttributes::ABSTRACT,
                Type::R8,
                vec![],
            )
            .unwrap();
        assert!(matches!(
            asm.type_builder(shape).unwrap().create_type(),
            Err(Error::TypeLoad { .. })
        ));
        assert!(!asm.type_builder(shape).unwrap().is_created().unwrap());

        let interface = define(
            &mut asm,
            module,
            "IBroken",
            TypeAttributes::PUBLIC | TypeAttributes::INTERFACE,
        );
        assert!(matches!(
            asm.type_builder(interface).unwrap().create_type(),
            Err(Error::TypeLoad { .. })
        ));
    }

    #[test]
    fn missing_body() {
        let (mut asm, module) = setup();
        let ty = define(&mut asm, module, "NoBody", TypeAttributes::PUBLIC);
        asm.type_builder(ty)
            .unwrap()
            .define_method("Run", MethodAttributes::PUBLIC, Type::Void, vec![])
            .unwrap();
        assert!(matches!(
            asm.type_builder(ty).unwrap().create_type(),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn interfaces_and_parents() {
        let (mut asm, module) = setup();
        let interface = define(
            &mut asm,
            module,
            "IThing",
            TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
        );
        assert_eq!(asm.type_builder(interface).unwrap().base_type().unwrap(), None);

        let class = define(&mut asm, module, "Thing", TypeAttributes::PUBLIC);
        let mut builder = asm.type_builder(class).unwrap();
        builder
            .add_interface_implementation(Type::Builder(interface))
            .unwrap();
        builder
            .add_interface_implementation(Type::Builder(interface))
            .unwrap();
        assert_eq!(builder.get_interfaces().unwrap().len(), 1);
        assert!(matches!(
            builder.add_interface_implementation(Type::Object),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            builder.set_parent(Some(Type::Builder(interface))),
            Err(Error::InvalidArgument { .. })
        ));
        builder.set_parent(None).unwrap();
        assert_eq!(builder.base_type().unwrap(), Some(Type::Object));
    }

    #[test]
    fn generic_parameters_once() {
        let (mut asm, module) = setup();
        let ty = define(&mut asm, module, "Pair`2", TypeAttributes::PUBLIC);
        let mut builder = asm.type_builder(ty).unwrap();
        assert!(builder.define_generic_parameters(&[]).is_err());
        let params = builder.define_generic_parameters(&["K", "V"]).unwrap();
        assert_eq!(params.len(), 2);
        assert!(builder.is_generic_type_definition().unwrap());
        assert!(builder.contains_generic_parameters().unwrap());
        assert!(matches!(
            builder.define_generic_parameters(&["X"]),
            Err(Error::InvalidOperation(_))
        ));
        assert!(builder.make_generic_type(vec![Type::I4]).is_err());
        assert!(builder.make_generic_type(vec![Type::I4, Type::String]).is_ok());
    }

    #[test]
    fn initialized_data_shares_holder_types() {
        let (mut asm, module) = setup();
        let ty = define(&mut asm, module, "Tables", TypeAttributes::PUBLIC);
        let mut builder = asm.type_builder(ty).unwrap();
        let first = builder
            .define_initialized_data("A", &[1, 2, 3, 4], FieldAttributes::PUBLIC)
            .unwrap();
        let second = builder
            .define_uninitialized_data("B", 4, FieldAttributes::PUBLIC)
            .unwrap();
        assert!(builder
            .define_initialized_data("C", &[], FieldAttributes::PUBLIC)
            .is_err());

        let first_type = asm.field_data(first).unwrap().field_type.ty.clone();
        assert_eq!(first_type, asm.field_data(second).unwrap().field_type.ty);
        let Type::Builder(holder) = first_type else {
            panic!("expected a builder type");
        };
        let holder = asm.type_builder(holder).unwrap();
        assert_eq!(holder.full_name().unwrap(), "Tables+$ArrayType$4");
        assert!(holder.is_created().unwrap());
        assert!(holder.is_explicit_layout().unwrap());
        assert_eq!(holder.size().unwrap(), 4);
        assert!(asm
            .field_data(first)
            .unwrap()
            .attributes
            .contains(FieldAttributes::STATIC | FieldAttributes::HAS_FIELD_RVA));
    }

    #[test]
    fn pseudo_attributes_become_flags() {
        let (mut asm, module) = setup();
        let ty = define(&mut asm, module, "Interop", TypeAttributes::PUBLIC);
        let serializable = corlib::attribute_constructor("System", "SerializableAttribute", vec![]);
        let layout_kind = Type::External(Arc::new(crate::typesystem::ExternalType::enumeration(
            AssemblyName::mscorlib(),
            "System.Runtime.InteropServices",
            "LayoutKind",
            Type::I4,
        )));
        let struct_layout = corlib::attribute_constructor(
            "System.Runtime.InteropServices",
            "StructLayoutAttribute",
            vec![layout_kind],
        );

        let mut builder = asm.type_builder(ty).unwrap();
        builder
            .set_custom_attribute(&CustomAttributeBuilder::new(serializable, vec![]))
            .unwrap();
        builder
            .set_custom_attribute(
                &CustomAttributeBuilder::new(struct_layout, vec![CaValue::I4(0)])
                    .with_named_fields(vec![("Size".into(), Type::I4)], vec![CaValue::I4(12)])
                    .unwrap(),
            )
            .unwrap();

        assert!(builder.is_serializable().unwrap());
        assert!(builder.is_layout_sequential().unwrap());
        assert_eq!(builder.size().unwrap(), 12);
        let runtime = builder.create_type().unwrap();
        assert!(runtime.custom_attributes.is_empty());
    }

    #[test]
    fn declarative_security_once_per_action() {
        let (mut asm, module) = setup();
        let ty = define(&mut asm, module, "Secure", TypeAttributes::PUBLIC);
        let mut builder = asm.type_builder(ty).unwrap();
        builder
            .add_declarative_security(SecurityAction::Demand, PermissionSet::unrestricted())
            .unwrap();
        assert!(matches!(
            builder.add_declarative_security(SecurityAction::Demand, PermissionSet::empty()),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            builder.add_declarative_security(SecurityAction::RequestMinimum, PermissionSet::empty()),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(builder
            .attributes()
            .unwrap()
            .contains(TypeAttributes::HAS_SECURITY));
    }

    #[test]
    fn raw_bodies_record_token_offsets() {
        let mut code = vec![0x28];
        code.extend_from_slice(&0x0A00_0001u32.to_le_bytes());
        code.push(0x2A);
        assert_eq!(raw_token_fixups(&code), vec![1]);
        assert!(raw_token_fixups(&[0xFE, 0xFF]).is_empty());
    }
}
