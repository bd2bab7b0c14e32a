//! Modules: type definitions, global members, tokens and embedded resources.

use log::debug;

use crate::{
    emit::{
        assembly::check_name,
        data::EmbeddedResource,
        AssemblyBuilder, CustomAttributeBuilder, FieldId, FieldRef, MethodId, MethodRef,
        ModuleId, ResolvedRef, TypeId, TypeOptions,
    },
    metadata::{
        flags::{
            CallingConventions, FieldAttributes, MethodAttributes, PInvokeAttributes,
            ResourceAttributes, TypeAttributes,
        },
        tables::TableId,
        token::Token,
    },
    typesystem::{corlib, ParamType, Type},
    Result,
};

/// The entity behind a token, as returned by [`ModuleBuilder::resolve_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenTarget {
    /// A type defined in the module
    Type(TypeId),
    /// A field defined in the module
    Field(FieldId),
    /// A method defined in the module
    Method(MethodId),
    /// A referenced entity
    Reference(ResolvedRef),
}

/// Array, pointer and by-ref suffixes of a type name, innermost first.
enum NameSuffix {
    SzArray,
    Array(u32),
    Pointer,
    ByRef,
}

fn parse_type_name(name: &str) -> Result<(&str, Vec<NameSuffix>)> {
    let end = name.find(['[', '*', '&']).unwrap_or(name.len());
    let (base, mut rest) = name.split_at(end);
    if base.is_empty() {
        return Err(invalid_argument!("className", "Empty type name"));
    }

    let mut suffixes = Vec::new();
    while !rest.is_empty() {
        if suffixes.last().is_some_and(|suffix| matches!(suffix, NameSuffix::ByRef)) {
            return Err(invalid_argument!(
                "className",
                "A by-ref type can only be the outermost shape in '{}'",
                name
            ));
        }
        if let Some(tail) = rest.strip_prefix('*') {
            suffixes.push(NameSuffix::Pointer);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('&') {
            suffixes.push(NameSuffix::ByRef);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('[') {
            let Some(close) = tail.find(']') else {
                return Err(invalid_argument!("className", "Unbalanced brackets in '{}'", name));
            };
            let shape = &tail[..close];
            if shape.is_empty() {
                suffixes.push(NameSuffix::SzArray);
            } else if shape == "*" {
                suffixes.push(NameSuffix::Array(1));
            } else if shape.chars().all(|c| c == ',') {
                #[allow(clippy::cast_possible_truncation)]
                let rank = shape.len() as u32 + 1;
                suffixes.push(NameSuffix::Array(rank));
            } else {
                return Err(invalid_argument!("className", "Bad array shape in '{}'", name));
            }
            rest = &tail[close + 1..];
        } else {
            return Err(invalid_argument!("className", "Bad type name '{}'", name));
        }
    }
    Ok((base, suffixes))
}

/// Builder view of one module.
///
/// ```rust
/// use dotemit::prelude::*;
///
/// let mut asm = AssemblyBuilder::new(AssemblyName::new("Lookup"), AssemblyBuilderAccess::Run);
/// let module = asm.define_dynamic_module("Lookup")?;
/// let outer = asm.module_builder(module)?.define_type("N.Outer", TypeAttributes::PUBLIC)?;
/// asm.type_builder(outer)?.define_nested_type("Inner", TypeAttributes::NESTED_PUBLIC)?;
///
/// let module = asm.module_builder(module)?;
/// assert!(module.get_type("N.Outer+Inner")?.is_some());
/// assert_eq!(
///     module.get_type("N.Outer[]")?,
///     Some(Type::Builder(outer).make_array_type())
/// );
/// assert!(module.get_type("n.outer")?.is_none());
/// assert!(module.get_type_ignore_case("n.outer")?.is_some());
/// # Ok::<(), dotemit::Error>(())
/// ```
pub struct ModuleBuilder<'a> {
    asm: &'a mut AssemblyBuilder,
    id: ModuleId,
}

impl<'a> ModuleBuilder<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, id: ModuleId) -> Self {
        ModuleBuilder { asm, id }
    }

    /// Handle of this module.
    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Module name.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn name(&self) -> Result<String> {
        Ok(self.asm.module_data(self.id)?.name.clone())
    }

    /// File the module is persisted to.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn file_name(&self) -> Result<String> {
        Ok(self.asm.module_data(self.id)?.file_name.clone())
    }

    /// Returns true for modules that are never persisted.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn is_transient(&self) -> Result<bool> {
        Ok(self.asm.module_data(self.id)?.transient)
    }

    /// The `<Module>` type holding global members.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn global_type(&self) -> Result<TypeId> {
        Ok(self.asm.module_data(self.id)?.global_type)
    }

    /// Define a top-level type. `name` may carry a namespace: `Namespace.Name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty, NUL-bearing or duplicate
    /// name or nested visibility, and [`crate::Error::InvalidOperation`] after the
    /// assembly has been saved.
    pub fn define_type(&mut self, name: &str, attributes: TypeAttributes) -> Result<TypeId> {
        self.define_type_with(name, attributes, TypeOptions::new())
    }

    /// [`Self::define_type`] with a base type.
    ///
    /// # Errors
    /// See [`Self::define_type`]; an interface or non-class parent is rejected with
    /// [`crate::Error::InvalidArgument`].
    pub fn define_type_with_parent(
        &mut self,
        name: &str,
        attributes: TypeAttributes,
        parent: Option<Type>,
    ) -> Result<TypeId> {
        let options = TypeOptions {
            parent,
            ..TypeOptions::new()
        };
        self.define_type_with(name, attributes, options)
    }

    /// [`Self::define_type`] with parent, interfaces and layout.
    ///
    /// # Errors
    /// See [`Self::define_type_with_parent`].
    pub fn define_type_with(
        &mut self,
        name: &str,
        attributes: TypeAttributes,
        options: TypeOptions,
    ) -> Result<TypeId> {
        self.asm.new_type(self.id, None, name, attributes, options)
    }

    /// Define an enum with the integral `underlying` type. The underlying value lives in
    /// the instance field `value__`; literals are added with
    /// [`crate::emit::EnumBuilder::define_literal`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a non-integral underlying type or
    /// attributes beyond top-level visibility, otherwise see [`Self::define_type`].
    pub fn define_enum(
        &mut self,
        name: &str,
        visibility: TypeAttributes,
        underlying: Type,
    ) -> Result<TypeId> {
        if !underlying.is_integral() {
            return Err(invalid_argument!(
                "underlyingType",
                "{} is not an integral type",
                underlying
            ));
        }
        if visibility.bits() & !TypeAttributes::VISIBILITY_MASK.bits() != 0 || visibility.is_nested()
        {
            return Err(invalid_argument!(
                "visibility",
                "An enum only takes top-level visibility attributes"
            ));
        }

        let options = TypeOptions::new().with_parent(corlib::enum_type());
        let id = self.define_type_with(name, visibility | TypeAttributes::SEALED, options)?;
        self.asm.new_field(
            id,
            "value__",
            ParamType::new(underlying),
            FieldAttributes::PUBLIC | FieldAttributes::SPECIAL_NAME | FieldAttributes::RT_SPECIAL_NAME,
        )?;
        Ok(id)
    }

    /// Define a static method on the global type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for non-static attributes and
    /// [`crate::Error::InvalidOperation`] after [`Self::create_global_functions`].
    pub fn define_global_method(
        &mut self,
        name: &str,
        attributes: MethodAttributes,
        return_type: Type,
        parameters: Vec<Type>,
    ) -> Result<MethodId> {
        self.define_global_method_with_signature(
            name,
            attributes,
            CallingConventions::DEFAULT,
            ParamType::new(return_type),
            parameters.into_iter().map(ParamType::new).collect(),
        )
    }

    /// [`Self::define_global_method`] with calling convention and custom modifiers.
    ///
    /// # Errors
    /// See [`Self::define_global_method`].
    pub fn define_global_method_with_signature(
        &mut self,
        name: &str,
        attributes: MethodAttributes,
        calling_convention: CallingConventions,
        return_type: ParamType,
        parameters: Vec<ParamType>,
    ) -> Result<MethodId> {
        if !attributes.is_static() {
            return Err(invalid_argument!("attributes", "Global methods must be static"));
        }
        let global = self.global_type()?;
        self.asm.new_method(
            global,
            name,
            attributes,
            calling_convention,
            return_type,
            parameters,
        )
    }

    /// Define a global P/Invoke method.
    ///
    /// # Errors
    /// See [`Self::define_global_method`].
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
        if !attributes.is_static() {
            return Err(invalid_argument!("attributes", "Global methods must be static"));
        }
        let global = self.global_type()?;
        self.asm.new_pinvoke_method(
            global,
            name,
            dll_name,
            entry_name,
            attributes,
            return_type,
            parameters,
            pinvoke_attributes,
        )
    }

    /// Define a global static field initialized with `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for empty or oversized data and
    /// [`crate::Error::InvalidOperation`] after [`Self::create_global_functions`].
    pub fn define_initialized_data(
        &mut self,
        name: &str,
        data: &[u8],
        attributes: FieldAttributes,
    ) -> Result<FieldId> {
        let global = self.global_type()?;
        self.asm.type_builder(global)?.define_initialized_data(name, data, attributes)
    }

    /// Define a zero-initialized global static field of `size` bytes.
    ///
    /// # Errors
    /// See [`Self::define_initialized_data`].
    pub fn define_uninitialized_data(
        &mut self,
        name: &str,
        size: usize,
        attributes: FieldAttributes,
    ) -> Result<FieldId> {
        let global = self.global_type()?;
        self.asm
            .type_builder(global)?
            .define_uninitialized_data(name, size, attributes)
    }

    /// Close the global type. Global members can not be added afterwards.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] on a second call or if a global method
    /// lacks a body.
    pub fn create_global_functions(&mut self) -> Result<()> {
        if self.asm.module_data(self.id)?.globals_created {
            return Err(invalid_operation!(
                "CreateGlobalFunctions has already been called"
            ));
        }
        let global = self.global_type()?;
        self.asm.create_type_internal(global)?;
        self.asm.module_data_mut(self.id)?.globals_created = true;
        debug!("Created global functions of '{}'", self.name()?);
        Ok(())
    }

    /// Look up a type by full name. Nested types are joined with `+`; the name may end
    /// in array (`[]`, `[,]`, `[*]`), pointer (`*`) and by-ref (`&`) suffixes.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty or malformed name.
    pub fn get_type(&self, name: &str) -> Result<Option<Type>> {
        self.get_type_with_case(name, false)
    }

    /// [`Self::get_type`] comparing names without regard to ASCII case.
    ///
    /// # Errors
    /// See [`Self::get_type`].
    pub fn get_type_ignore_case(&self, name: &str) -> Result<Option<Type>> {
        self.get_type_with_case(name, true)
    }

    fn get_type_with_case(&self, name: &str, ignore_case: bool) -> Result<Option<Type>> {
        let (base, suffixes) = parse_type_name(name)?;
        let type_names = &self.asm.module_data(self.id)?.type_names;
        let found = if ignore_case {
            type_names
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(base))
                .map(|(_, id)| *id)
        } else {
            type_names.get(base).copied()
        };

        let Some(id) = found else {
            return Ok(None);
        };
        let mut ty = Type::Builder(id);
        for suffix in suffixes {
            ty = match suffix {
                NameSuffix::SzArray => ty.make_array_type(),
                NameSuffix::Array(rank) => ty.make_array_type_rank(rank)?,
                NameSuffix::Pointer => ty.make_pointer_type(),
                NameSuffix::ByRef => ty.make_by_ref_type(),
            };
        }
        Ok(Some(ty))
    }

    /// Types of the module in definition order, the global type excluded.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn get_types(&self) -> Result<Vec<TypeId>> {
        let data = self.asm.module_data(self.id)?;
        Ok(data
            .types
            .iter()
            .copied()
            .filter(|id| *id != data.global_type)
            .collect())
    }

    /// `TypeDef`, `TypeRef` or `TypeSpec` token of `ty` in this module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub fn get_type_token(&self, ty: &Type) -> Result<Token> {
        self.asm.check_type_usable(ty)?;
        self.asm.type_token(self.id, ty)
    }

    /// Token of a field in this module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub fn get_field_token(&self, field: &FieldRef) -> Result<Token> {
        self.asm.field_token(self.id, field)
    }

    /// Token of a method in this module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for handles of other assemblies.
    pub fn get_method_token(&self, method: &MethodRef) -> Result<Token> {
        self.asm.method_token(self.id, method)
    }

    /// Token of a constructor in this module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `constructor` is not a constructor.
    pub fn get_constructor_token(&self, constructor: &MethodRef) -> Result<Token> {
        let name = self.asm.method_ref_name(constructor)?;
        if name != ".ctor" && name != ".cctor" {
            return Err(invalid_argument!("con", "'{}' is not a constructor", name));
        }
        self.asm.method_token(self.id, constructor)
    }

    /// User string token of a literal.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] once the `#US` heap is full.
    pub fn get_string_constant(&self, value: &str) -> Result<Token> {
        self.asm.module_data(self.id)?.tokens.user_string(value)
    }

    /// `StandAloneSig` token of a signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty blob.
    pub fn get_signature_token(&self, signature: &[u8]) -> Result<Token> {
        if signature.is_empty() {
            return Err(invalid_argument!("sigBytes", "Empty signature"));
        }
        Ok(self
            .asm
            .module_data(self.id)?
            .tokens
            .standalone_sig(signature.to_vec()))
    }

    /// The entity behind a token handed out by this module.
    ///
    /// Field and method tokens are the provisional ones returned while building.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a token this module never issued.
    pub fn resolve_token(&self, token: Token) -> Result<TokenTarget> {
        let data = self.asm.module_data(self.id)?;
        let index = (token.row() as usize).checked_sub(1);
        let target = match (token.table_id(), index) {
            (Some(TableId::TypeDef), Some(index)) => {
                data.types.get(index).copied().map(TokenTarget::Type)
            }
            (Some(TableId::Field), Some(index)) => {
                data.fields.get(index).copied().map(TokenTarget::Field)
            }
            (Some(TableId::MethodDef), Some(index)) => {
                data.methods.get(index).copied().map(TokenTarget::Method)
            }
            _ => data.tokens.resolve(token).map(TokenTarget::Reference),
        };
        target.ok_or_else(|| {
            invalid_argument!("metadataToken", "Token {:#010x} is not valid in this module", token.value())
        })
    }

    /// Apply a custom attribute to the module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad constructor or arguments and
    /// [`crate::Error::InvalidOperation`] after the assembly has been saved.
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        self.asm.check_not_saved()?;
        let attribute = self.asm.build_custom_attribute(builder)?;
        self.asm
            .module_data_mut(self.id)?
            .custom_attributes
            .push(attribute);
        Ok(())
    }

    /// Embed `data` as the manifest resource `name`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad or duplicate name and
    /// [`crate::Error::InvalidOperation`] for a transient module or after the assembly has
    /// been saved.
    pub fn define_manifest_resource(
        &mut self,
        name: &str,
        data: &[u8],
        attributes: ResourceAttributes,
    ) -> Result<()> {
        check_name("name", name)?;
        self.asm.check_not_saved()?;
        if self.is_transient()? {
            return Err(invalid_operation!(
                "A transient module can not hold manifest resources"
            ));
        }
        self.asm.check_resource_name(name)?;
        self.asm
            .module_data_mut(self.id)?
            .resources
            .push(EmbeddedResource {
                name: name.to_string(),
                attributes,
                data: data.to_vec(),
            });
        Ok(())
    }

    /// Attach compiled Win32 resources in the `.res` file format.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for empty or malformed data and
    /// [`crate::Error::InvalidOperation`] if a resource was already defined or the
    /// assembly has been saved.
    pub fn define_unmanaged_resource(&mut self, resource: &[u8]) -> Result<()> {
        if resource.is_empty() {
            return Err(invalid_argument!("resource", "Empty unmanaged resource"));
        }
        crate::writer::win32res::parse_res(resource)?;
        self.asm.check_not_saved()?;
        let data = self.asm.module_data_mut(self.id)?;
        if data.unmanaged_resource.is_some() {
            return Err(invalid_operation!(
                "An unmanaged resource has already been defined"
            ));
        }
        data.unmanaged_resource = Some(resource.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::OpCode,
        emit::AssemblyBuilderAccess,
        metadata::{flags::MethodAttributes, identity::AssemblyName},
        Error,
    };

    fn setup() -> (AssemblyBuilder, ModuleId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("mods"), AssemblyBuilderAccess::RunAndSave);
        let module = asm.define_persistent_module("mods", "mods.dll").unwrap();
        (asm, module)
    }

    #[test]
    fn type_name_suffixes() {
        let (base, suffixes) = parse_type_name("A.B+C[,]*&").unwrap();
        assert_eq!(base, "A.B+C");
        assert_eq!(suffixes.len(), 3);
        assert!(matches!(suffixes[0], NameSuffix::Array(2)));
        assert!(parse_type_name("").is_err());
        assert!(parse_type_name("A&*").is_err());
        assert!(parse_type_name("A[x]").is_err());
        assert!(parse_type_name("A[").is_err());
    }

    #[test]
    fn enums() {
        let (mut asm, module) = setup();
        let mut builder = asm.module_builder(module).unwrap();
        assert!(matches!(
            builder.define_enum("Bad", TypeAttributes::PUBLIC, Type::R8),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(builder
            .define_enum("Bad2", TypeAttributes::PUBLIC | TypeAttributes::ABSTRACT, Type::I4)
            .is_err());
        let color = builder
            .define_enum("Color", TypeAttributes::PUBLIC, Type::U1)
            .unwrap();

        let ty = asm.type_builder(color).unwrap();
        assert!(ty.is_enum().unwrap());
        assert!(ty.is_value_type().unwrap());
        assert_eq!(ty.underlying_system_type().unwrap(), Type::U1);
    }

    #[test]
    fn global_functions_once() {
        let (mut asm, module) = setup();
        let mut builder = asm.module_builder(module).unwrap();
        assert!(matches!(
            builder.define_global_method("Instance", MethodAttributes::PUBLIC, Type::Void, vec![]),
            Err(Error::InvalidArgument { .. })
        ));
        let main = builder
            .define_global_method(
                "Main",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                Type::Void,
                vec![],
            )
            .unwrap();
        asm.il_generator(main).unwrap().emit(OpCode::RET).unwrap();

        let mut builder = asm.module_builder(module).unwrap();
        builder.create_global_functions().unwrap();
        assert!(matches!(
            builder.create_global_functions(),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            builder.define_global_method(
                "Late",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                Type::Void,
                vec![],
            ),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn global_data_holder_is_top_level() {
        let (mut asm, module) = setup();
        let field = asm
            .module_builder(module)
            .unwrap()
            .define_initialized_data("Blob", &[1, 2, 3], FieldAttributes::PUBLIC)
            .unwrap();
        let holder = asm.module_builder(module).unwrap().get_type("$ArrayType$3").unwrap();
        assert_eq!(holder, Some(asm.field_data(field).unwrap().field_type.ty.clone()));
    }

    #[test]
    fn tokens_round_trip() {
        let (mut asm, module) = setup();
        let ty = asm
            .module_builder(module)
            .unwrap()
            .define_type("T", TypeAttributes::PUBLIC)
            .unwrap();
        let field = asm
            .type_builder(ty)
            .unwrap()
            .define_field("f", Type::I4, FieldAttributes::PUBLIC)
            .unwrap();

        let builder = asm.module_builder(module).unwrap();
        let type_token = builder.get_type_token(&Type::Builder(ty)).unwrap();
        assert_eq!(builder.resolve_token(type_token).unwrap(), TokenTarget::Type(ty));
        let field_token = builder.get_field_token(&FieldRef::Builder(field)).unwrap();
        assert_eq!(builder.resolve_token(field_token).unwrap(), TokenTarget::Field(field));

        let string = builder.get_string_constant("hello").unwrap();
        assert_eq!(
            builder.resolve_token(string).unwrap(),
            TokenTarget::Reference(ResolvedRef::UserString("hello".into()))
        );
        assert!(builder.resolve_token(Token::new(0x0200_0099)).is_err());
        assert!(builder.get_signature_token(&[]).is_err());
        assert!(matches!(
            builder.get_constructor_token(&MethodRef::from(corlib::object_constructor())),
            Ok(_)
        ));
    }

    #[test]
    fn manifest_resources() {
        let (mut asm, module) = setup();
        let mut builder = asm.module_builder(module).unwrap();
        builder
            .define_manifest_resource("data", b"abc", ResourceAttributes::PUBLIC)
            .unwrap();
        assert!(matches!(
            builder.define_manifest_resource("data", b"x", ResourceAttributes::PUBLIC),
            Err(Error::InvalidArgument { .. })
        ));

        let transient = asm.define_dynamic_module("scratch").unwrap();
        assert!(matches!(
            asm.module_builder(transient).unwrap().define_manifest_resource(
                "other",
                b"x",
                ResourceAttributes::PUBLIC
            ),
            Err(Error::InvalidOperation(_))
        ));
    }
}
