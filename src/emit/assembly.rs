//! The assembly builder: identity, modules, manifest resources and persistence.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{
    assembly::{ILGenerator, ILState},
    config::{EmitOptions, SaveOptions},
    emit::{
        data::{
            BodyState, EventData, FieldData, GenericParamData, LinkedResource, MethodData,
            ModuleData, PropertyData, SecurityData, TypeData, TypeState,
        },
        handles::next_serial,
        CustomAttribute, CustomAttributeBuilder, EnumBuilder, EventBuilder, EventId,
        FieldBuilder, FieldId, GenericParamId, GenericTypeParameterBuilder, MethodBuilder,
        MethodId, ModuleBuilder, ModuleId, PermissionSet, PropertyBuilder, PropertyId,
        TokenTable, TypeBuilder, TypeId,
    },
    metadata::{
        flags::{MethodAttributes, PackingSize, ResourceAttributes, SecurityAction, TypeAttributes},
        identity::AssemblyName,
    },
    writer::ModuleFile,
    Result,
};

/// What a dynamic assembly may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssemblyBuilderAccess {
    /// In-memory use only; `Save` is not supported
    Run,
    /// Persistence only
    Save,
    /// Both
    RunAndSave,
}

impl AssemblyBuilderAccess {
    /// Returns true if the assembly may be saved.
    #[must_use]
    pub fn can_save(self) -> bool {
        !matches!(self, AssemblyBuilderAccess::Run)
    }
}

#[derive(Debug, Clone)]
struct SavedAssembly {
    path: PathBuf,
    image: Vec<u8>,
}

/// Check a type, member or resource name.
pub(crate) fn check_name(param: &'static str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid_argument!(param, "Empty name is not legal"));
    }
    if name.contains('\0') {
        return Err(invalid_argument!(param, "Illegal name"));
    }
    Ok(())
}

/// Check a file name of a module or linked resource.
pub(crate) fn check_file_name(param: &'static str, file_name: &str) -> Result<()> {
    check_name(param, file_name)?;
    if file_name.contains(['/', '\\', ':']) {
        return Err(invalid_argument!(
            param,
            "File name '{}' must not include a path",
            file_name
        ));
    }
    match file_name.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < file_name.len() => Ok(()),
        _ => Err(invalid_argument!(
            param,
            "File name '{}' must have an extension",
            file_name
        )),
    }
}

macro_rules! arena_access {
    ($get:ident, $get_mut:ident, $field:ident, $id:ty, $data:ty, $what:literal) => {
        pub(crate) fn $get(&self, id: $id) -> Result<&$data> {
            if id.owner() != self.serial {
                return Err(invalid_argument!(
                    $what,
                    "The {} belongs to another assembly",
                    $what
                ));
            }
            self.$field
                .get(id.index())
                .ok_or_else(|| invalid_argument!($what, "Unknown {}", $what))
        }

        pub(crate) fn $get_mut(&mut self, id: $id) -> Result<&mut $data> {
            if id.owner() != self.serial {
                return Err(invalid_argument!(
                    $what,
                    "The {} belongs to another assembly",
                    $what
                ));
            }
            self.$field
                .get_mut(id.index())
                .ok_or_else(|| invalid_argument!($what, "Unknown {}", $what))
        }
    };
}

/// A dynamic assembly under construction.
///
/// The builder owns every entity defined in it. Define operations hand out `Copy`
/// handles; the builder views returned by [`Self::module_builder`],
/// [`Self::type_builder`] and friends borrow the assembly mutably for as long as they
/// are used.
///
/// ```rust
/// use dotemit::prelude::*;
///
/// let mut asm = AssemblyBuilder::new(
///     AssemblyName::new("Sample").with_version(AssemblyVersion::new(1, 2, 0, 0)),
///     AssemblyBuilderAccess::RunAndSave,
/// );
/// let module = asm.define_persistent_module("Sample", "Sample.dll")?;
/// let point = asm
///     .module_builder(module)?
///     .define_type("Geometry.Point", TypeAttributes::PUBLIC)?;
///
/// asm.type_builder(point)?.define_field("X", Type::I4, FieldAttributes::PUBLIC)?;
/// asm.type_builder(point)?.create_type()?;
///
/// assert_eq!(asm.full_name(), "Sample, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null");
/// # Ok::<(), dotemit::Error>(())
/// ```
pub struct AssemblyBuilder {
    pub(crate) serial: u32,
    pub(crate) name: AssemblyName,
    access: AssemblyBuilderAccess,
    directory: PathBuf,
    pub(crate) options: EmitOptions,
    pub(crate) modules: Vec<ModuleData>,
    pub(crate) types: Vec<TypeData>,
    pub(crate) fields: Vec<FieldData>,
    pub(crate) methods: Vec<MethodData>,
    pub(crate) properties: Vec<PropertyData>,
    pub(crate) events: Vec<EventData>,
    pub(crate) generic_params: Vec<GenericParamData>,
    pub(crate) custom_attributes: Vec<CustomAttribute>,
    pub(crate) security: Vec<SecurityData>,
    pub(crate) linked_resources: Vec<LinkedResource>,
    pub(crate) entry_point: Option<MethodId>,
    /// Serial of the last shape made over an open definition
    pub(crate) derived_shapes: u64,
    saved: Option<SavedAssembly>,
}

impl AssemblyBuilder {
    /// Start a new dynamic assembly.
    #[must_use]
    pub fn new(name: AssemblyName, access: AssemblyBuilderAccess) -> Self {
        AssemblyBuilder {
            serial: next_serial(),
            name,
            access,
            directory: PathBuf::from("."),
            options: EmitOptions::default(),
            modules: Vec::new(),
            types: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            generic_params: Vec::new(),
            custom_attributes: Vec::new(),
            security: Vec::new(),
            linked_resources: Vec::new(),
            entry_point: None,
            derived_shapes: 0,
            saved: None,
        }
    }

    /// Use `options` for new builders.
    #[must_use]
    pub fn with_options(mut self, options: EmitOptions) -> Self {
        self.options = options;
        self
    }

    /// Directory `Save` writes to and linked resources are read from.
    #[must_use]
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    arena_access!(module_data, module_data_mut, modules, ModuleId, ModuleData, "module");
    arena_access!(type_data, type_data_mut, types, TypeId, TypeData, "type");
    arena_access!(field_data, field_data_mut, fields, FieldId, FieldData, "field");
    arena_access!(method_data, method_data_mut, methods, MethodId, MethodData, "method");
    arena_access!(
        property_data,
        property_data_mut,
        properties,
        PropertyId,
        PropertyData,
        "property"
    );
    arena_access!(event_data, event_data_mut, events, EventId, EventData, "event");
    arena_access!(
        generic_param_data,
        generic_param_data_mut,
        generic_params,
        GenericParamId,
        GenericParamData,
        "genericParameter"
    );

    /// The identity of this assembly.
    #[must_use]
    pub fn name(&self) -> &AssemblyName {
        &self.name
    }

    /// Display name, `Name, Version=..., Culture=..., PublicKeyToken=...`.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.name.display_name()
    }

    /// Access mode given at construction.
    #[must_use]
    pub fn access(&self) -> AssemblyBuilderAccess {
        self.access
    }

    /// Builder defaults.
    #[must_use]
    pub fn options(&self) -> EmitOptions {
        self.options
    }

    /// Returns true once [`Self::save`] succeeded.
    #[must_use]
    pub fn is_saved(&self) -> bool {
        self.saved.is_some()
    }

    pub(crate) fn check_not_saved(&self) -> Result<()> {
        if self.saved.is_some() {
            return Err(invalid_operation!(
                "Cannot change the assembly after it has been saved"
            ));
        }
        Ok(())
    }

    /// Path of the saved manifest module.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the assembly has been saved.
    pub fn location(&self) -> Result<PathBuf> {
        self.saved
            .as_ref()
            .map(|saved| saved.path.clone())
            .ok_or_else(|| not_supported!("A dynamic assembly has no location until it is saved"))
    }

    /// `file://` URL of the saved manifest module.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] before the assembly has been saved.
    pub fn code_base(&self) -> Result<String> {
        let path = self.location()?;
        let absolute = fs::canonicalize(&path).unwrap_or(path);
        Ok(format!(
            "file://{}",
            absolute.to_string_lossy().replace('\\', "/")
        ))
    }

    /// Bytes of the saved manifest module.
    #[must_use]
    pub fn saved_image(&self) -> Option<&[u8]> {
        self.saved.as_ref().map(|saved| saved.image.as_slice())
    }

    /// A persisted module or a linked resource already uses `file_name`. Transient modules
    /// have no file.
    fn is_file_name_taken(&self, file_name: &str) -> bool {
        self.modules
            .iter()
            .filter(|module| !module.transient)
            .any(|module| module.file_name.eq_ignore_ascii_case(file_name))
            || self
                .linked_resources
                .iter()
                .any(|resource| resource.file_name.eq_ignore_ascii_case(file_name))
    }

    fn define_module(&mut self, name: &str, file_name: &str, transient: bool) -> Result<ModuleId> {
        check_name("name", name)?;
        self.check_not_saved()?;
        if self.modules.iter().any(|module| module.name == name) {
            return Err(invalid_argument!("name", "Duplicate module name '{}'", name));
        }
        if !transient && self.is_file_name_taken(file_name) {
            return Err(invalid_argument!(
                "fileName",
                "Duplicate file name '{}'",
                file_name
            ));
        }

        let id = ModuleId::new(self.serial, self.modules.len());
        let global_type = TypeId::new(self.serial, self.types.len());
        self.types.push(TypeData {
            module: id,
            namespace: String::new(),
            name: "<Module>".to_string(),
            attributes: TypeAttributes::empty(),
            parent: None,
            interfaces: Vec::new(),
            declaring: None,
            nested: Vec::new(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
            packing: PackingSize::Unspecified,
            size: 0,
            custom_attributes: Vec::new(),
            security: Vec::new(),
            overrides: Vec::new(),
            state: TypeState::Open,
            row: 1,
            is_global: true,
        });

        self.modules.push(ModuleData {
            name: name.to_string(),
            file_name: file_name.to_string(),
            transient,
            global_type,
            types: vec![global_type],
            type_names: HashMap::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            tokens: TokenTable::new(),
            resources: Vec::new(),
            custom_attributes: Vec::new(),
            globals_created: false,
            unmanaged_resource: None,
        });
        debug!("Defined module '{}' ({})", name, file_name);
        Ok(id)
    }

    /// Define a transient module that is never persisted.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty or duplicate name and
    /// [`crate::Error::InvalidOperation`] after the assembly has been saved.
    pub fn define_dynamic_module(&mut self, name: &str) -> Result<ModuleId> {
        self.define_module(name, name, true)
    }

    /// Define a module that is written to `file_name` by [`Self::save`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty or duplicate name, a file
    /// name with a directory part or without extension, and
    /// [`crate::Error::InvalidOperation`] after the assembly has been saved.
    pub fn define_persistent_module(&mut self, name: &str, file_name: &str) -> Result<ModuleId> {
        check_file_name("fileName", file_name)?;
        self.define_module(name, file_name, false)
    }

    /// The module named `name`.
    #[must_use]
    pub fn get_dynamic_module(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .position(|module| module.name == name)
            .map(|index| ModuleId::new(self.serial, index))
    }

    /// All modules in definition order.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleId> {
        (0..self.modules.len())
            .map(|index| ModuleId::new(self.serial, index))
            .collect()
    }

    /// The module that carries the manifest: the first one defined.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if no module has been defined.
    pub fn manifest_module(&self) -> Result<ModuleId> {
        if self.modules.is_empty() {
            return Err(invalid_operation!("The assembly has no modules"));
        }
        Ok(ModuleId::new(self.serial, 0))
    }

    /// Link the existing file `file_name` as the manifest resource `name`.
    ///
    /// The file is looked up in the save directory and hashed with the assembly hash
    /// algorithm.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for bad or duplicate names,
    /// [`crate::Error::MissingResource`] if the file does not exist and
    /// [`crate::Error::InvalidOperation`] after the assembly has been saved.
    pub fn add_resource_file(&mut self, name: &str, file_name: &str) -> Result<()> {
        self.add_resource_file_with(name, file_name, ResourceAttributes::PUBLIC)
    }

    /// [`Self::add_resource_file`] with explicit visibility.
    ///
    /// # Errors
    /// See [`Self::add_resource_file`].
    pub fn add_resource_file_with(
        &mut self,
        name: &str,
        file_name: &str,
        attributes: ResourceAttributes,
    ) -> Result<()> {
        check_name("name", name)?;
        check_file_name("fileName", file_name)?;
        self.check_not_saved()?;
        self.check_resource_name(name)?;

        if self.is_file_name_taken(file_name) {
            return Err(invalid_argument!(
                "fileName",
                "Duplicate file name '{}'",
                file_name
            ));
        }

        let path = self.directory.join(file_name);
        if !path.is_file() {
            return Err(crate::Error::MissingResource(path));
        }
        let contents = fs::read(&path)?;

        self.linked_resources.push(LinkedResource {
            name: name.to_string(),
            file_name: file_name.to_string(),
            attributes,
            hash: self.name.hash_algorithm.hash(&contents),
        });
        Ok(())
    }

    /// Fail if a manifest resource named `name` exists anywhere in the assembly.
    pub(crate) fn check_resource_name(&self, name: &str) -> Result<()> {
        let embedded = self
            .modules
            .iter()
            .flat_map(|module| module.resources.iter())
            .any(|resource| resource.name == name);
        let linked = self
            .linked_resources
            .iter()
            .any(|resource| resource.name == name);

        if embedded || linked {
            return Err(invalid_argument!("name", "Duplicate resource name '{}'", name));
        }
        Ok(())
    }

    /// Attach compiled Win32 resources (`.res` format) to the manifest module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for empty or malformed data and
    /// [`crate::Error::InvalidOperation`] if a resource was already defined or the
    /// assembly has been saved.
    pub fn define_unmanaged_resource(&mut self, resource: &[u8]) -> Result<()> {
        let module = self.manifest_module()?;
        self.module_builder(module)?
            .define_unmanaged_resource(resource)
    }

    /// [`Self::define_unmanaged_resource`] with the contents of a file.
    ///
    /// # Errors
    /// Returns [`crate::Error::MissingResource`] if the file does not exist, otherwise see
    /// [`Self::define_unmanaged_resource`].
    pub fn define_unmanaged_resource_file(&mut self, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(crate::Error::MissingResource(path.to_path_buf()));
        }
        let contents = fs::read(path)?;
        self.define_unmanaged_resource(&contents)
    }

    /// Set the entry point of the assembly.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a method of another assembly or an
    /// instance method.
    pub fn set_entry_point(&mut self, method: MethodId) -> Result<()> {
        let data = self.method_data(method)?;
        if !data.attributes.contains(MethodAttributes::STATIC) {
            return Err(invalid_argument!(
                "entryMethod",
                "The entry point must be a static method"
            ));
        }
        self.check_not_saved()?;
        self.entry_point = Some(method);
        Ok(())
    }

    /// The entry point, if set.
    #[must_use]
    pub fn entry_point(&self) -> Option<MethodId> {
        self.entry_point
    }

    /// Apply a custom attribute to the assembly.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a bad constructor or arguments and
    /// [`crate::Error::InvalidOperation`] after the assembly has been saved.
    pub fn set_custom_attribute(&mut self, builder: &CustomAttributeBuilder) -> Result<()> {
        self.check_not_saved()?;
        let attribute = self.build_custom_attribute(builder)?;
        self.custom_attributes.push(attribute);
        Ok(())
    }

    /// Attribute rows applied to the assembly.
    #[must_use]
    pub fn custom_attributes(&self) -> &[CustomAttribute] {
        &self.custom_attributes
    }

    /// Attach a permission request to the assembly.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for actions other than the request
    /// actions and [`crate::Error::InvalidOperation`] for a repeated action or after the
    /// assembly has been saved.
    pub fn add_declarative_security(
        &mut self,
        action: SecurityAction,
        permission_set: PermissionSet,
    ) -> Result<()> {
        self.check_not_saved()?;
        if !action.is_request() {
            return Err(invalid_argument!(
                "action",
                "Only request actions apply to an assembly"
            ));
        }
        if self.security.iter().any(|entry| entry.action == action) {
            return Err(invalid_operation!(
                "Multiple permission sets specified with the same SecurityAction"
            ));
        }
        self.security.push(SecurityData {
            action,
            permission_set,
        });
        Ok(())
    }

    /// Look up a type by full name in every module.
    #[must_use]
    pub fn get_type(&self, name: &str) -> Option<TypeId> {
        self.modules
            .iter()
            .find_map(|module| module.type_names.get(name).copied())
    }

    /// View of a module.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn module_builder(&mut self, id: ModuleId) -> Result<ModuleBuilder<'_>> {
        self.module_data(id)?;
        Ok(ModuleBuilder::new(self, id))
    }

    /// View of a type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn type_builder(&mut self, id: TypeId) -> Result<TypeBuilder<'_>> {
        self.type_data(id)?;
        Ok(TypeBuilder::new(self, id))
    }

    /// View of an enum type defined by [`ModuleBuilder::define_enum`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn enum_builder(&mut self, id: TypeId) -> Result<EnumBuilder<'_>> {
        self.type_data(id)?;
        Ok(EnumBuilder::new(self, id))
    }

    /// View of a field.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn field_builder(&mut self, id: FieldId) -> Result<FieldBuilder<'_>> {
        self.field_data(id)?;
        Ok(FieldBuilder::new(self, id))
    }

    /// View of a method or constructor.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn method_builder(&mut self, id: MethodId) -> Result<MethodBuilder<'_>> {
        self.method_data(id)?;
        Ok(MethodBuilder::new(self, id))
    }

    /// View of a property.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn property_builder(&mut self, id: PropertyId) -> Result<PropertyBuilder<'_>> {
        self.property_data(id)?;
        Ok(PropertyBuilder::new(self, id))
    }

    /// View of an event.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn event_builder(&mut self, id: EventId) -> Result<EventBuilder<'_>> {
        self.event_data(id)?;
        Ok(EventBuilder::new(self, id))
    }

    /// View of a generic parameter.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a handle of another assembly.
    pub fn generic_param_builder(
        &mut self,
        id: GenericParamId,
    ) -> Result<GenericTypeParameterBuilder<'_>> {
        self.generic_param_data(id)?;
        Ok(GenericTypeParameterBuilder::new(self, id))
    }

    /// The instruction stream builder of a method, see [`MethodBuilder::get_il_generator`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the method can not have IL or its type
    /// has been created.
    pub fn il_generator(&mut self, id: MethodId) -> Result<ILGenerator<'_>> {
        self.method_builder(id)?.get_il_generator()
    }

    pub(crate) fn method_module(&self, method: MethodId) -> Result<ModuleId> {
        let declaring = self.method_data(method)?.declaring;
        Ok(self.type_data(declaring)?.module)
    }

    pub(crate) fn method_returns_value(&self, method: MethodId) -> Result<bool> {
        Ok(self.method_data(method)?.return_type.ty != crate::typesystem::Type::Void)
    }

    pub(crate) fn il_state_mut(&mut self, method: MethodId) -> Result<&mut ILState> {
        let declaring = self.method_data(method)?.declaring;
        if self.type_data(declaring)?.is_created() {
            return Err(invalid_operation!("Type has been created"));
        }
        match &mut self.method_data_mut(method)?.body {
            BodyState::Generator(state) => Ok(state.as_mut()),
            _ => Err(invalid_operation!("The method has no IL generator")),
        }
    }

    /// Finalize every open type, as `Save` does.
    fn finalize_open_types(&mut self, module: ModuleId) -> Result<()> {
        let global = self.module_data(module)?.global_type;
        if !self.module_data(module)?.globals_created {
            self.module_builder(module)?.create_global_functions()?;
        }

        let types = self.module_data(module)?.types.clone();
        for id in types {
            if id == global || self.type_data(id)?.is_created() {
                continue;
            }
            let name = self.type_data(id)?.full_name();
            if !self.options.finalize_on_save {
                return Err(invalid_operation!(
                    "Type '{}' has not been created",
                    name
                ));
            }
            warn!("Creating type '{}' implicitly on save", name);
            self.type_builder(id)?.create_type()?;
        }
        Ok(())
    }

    /// Emit every persisted module other than the manifest module, hashed with the
    /// assembly hash algorithm.
    fn emit_secondary_modules(
        &mut self,
        manifest: ModuleId,
        options: &SaveOptions,
    ) -> Result<Vec<(ModuleFile, Vec<u8>)>> {
        let mut files = Vec::new();
        for module in self.modules() {
            if module == manifest || self.module_data(module)?.transient {
                continue;
            }
            self.finalize_open_types(module)?;
            let image = crate::writer::write_module(self, module, None, options)?;
            files.push((
                ModuleFile {
                    module,
                    file_name: self.module_data(module)?.file_name.clone(),
                    hash: self.name.hash_algorithm.hash(&image),
                },
                image,
            ));
        }
        Ok(files)
    }

    /// Build the image of one module in memory.
    ///
    /// Open types are finalized first unless [`EmitOptions::finalize_on_save`] is off. The
    /// image of the manifest module carries the assembly manifest, including the hashes
    /// of the other persisted modules.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if an open type can not be finalized,
    /// and format errors if the metadata exceeds the limits of the file format.
    pub fn emit_image(&mut self, module: ModuleId, options: &SaveOptions) -> Result<Vec<u8>> {
        self.module_data(module)?;
        let manifest = self.manifest_module()?;
        if module != manifest {
            self.finalize_open_types(module)?;
            return crate::writer::write_module(self, module, None, options);
        }

        let files: Vec<ModuleFile> = self
            .emit_secondary_modules(manifest, options)?
            .into_iter()
            .map(|(file, _)| file)
            .collect();
        self.finalize_open_types(manifest)?;
        crate::writer::write_module(self, manifest, Some(&files), options)
    }

    /// Persist the assembly to `file_name` in the save directory.
    ///
    /// # Errors
    /// See [`Self::save_with`].
    pub fn save(&mut self, file_name: &str) -> Result<PathBuf> {
        self.save_with(file_name, &SaveOptions::default())
    }

    /// Persist the assembly with explicit image options.
    ///
    /// The manifest module is written to `file_name`, every other non-transient module to
    /// its own file name. Saving is a one-shot operation.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] for a run-only assembly,
    /// [`crate::Error::InvalidOperation`] if it was already saved or has no module,
    /// [`crate::Error::InvalidArgument`] for a bad file name and I/O errors from writing.
    pub fn save_with(&mut self, file_name: &str, options: &SaveOptions) -> Result<PathBuf> {
        if !self.access.can_save() {
            return Err(not_supported!("Cannot save a run-only dynamic assembly"));
        }
        self.check_not_saved()?;
        check_file_name("assemblyFileName", file_name)?;
        let manifest = self.manifest_module()?;
        if self
            .modules
            .iter()
            .skip(1)
            .any(|module| !module.transient && module.file_name.eq_ignore_ascii_case(file_name))
        {
            return Err(invalid_argument!(
                "assemblyFileName",
                "'{}' is already the file name of another module",
                file_name
            ));
        }

        debug!("Saving assembly '{}' to {}", self.name.name, file_name);
        let secondary = self.emit_secondary_modules(manifest, options)?;
        let mut files = Vec::with_capacity(secondary.len());
        for (file, image) in secondary {
            let path = self.directory.join(&file.file_name);
            fs::write(&path, &image)?;
            debug!("Wrote {} ({} bytes)", path.display(), image.len());
            files.push(file);
        }

        self.finalize_open_types(manifest)?;
        let image = crate::writer::write_module(self, manifest, Some(&files), options)?;
        let path = self.directory.join(file_name);
        fs::write(&path, &image)?;
        debug!("Wrote {} ({} bytes)", path.display(), image.len());

        self.saved = Some(SavedAssembly {
            path: path.clone(),
            image,
        });
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembly() -> AssemblyBuilder {
        AssemblyBuilder::new(AssemblyName::new("test"), AssemblyBuilderAccess::RunAndSave)
    }

    #[test]
    fn module_names() {
        let mut asm = assembly();
        assert!(matches!(
            asm.define_dynamic_module(""),
            Err(crate::Error::InvalidArgument { .. })
        ));
        assert!(asm.define_persistent_module("a", "dir/a.dll").is_err());
        assert!(asm.define_persistent_module("a", "noextension").is_err());

        let a = asm.define_persistent_module("a", "a.dll").unwrap();
        assert!(asm.define_persistent_module("a", "b.dll").is_err());
        assert!(asm.define_persistent_module("b", "A.DLL").is_err());
        assert_eq!(asm.get_dynamic_module("a"), Some(a));
        assert_eq!(asm.manifest_module().unwrap(), a);
    }

    #[test]
    fn foreign_handles() {
        let mut first = assembly();
        let mut second = assembly();
        let module = first.define_dynamic_module("m").unwrap();
        second.define_dynamic_module("m").unwrap();
        assert!(matches!(
            second.module_builder(module),
            Err(crate::Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn location_before_save() {
        let asm = assembly();
        assert!(matches!(asm.location(), Err(crate::Error::NotSupported(_))));
        assert!(asm.code_base().is_err());
        assert!(asm.saved_image().is_none());
    }

    #[test]
    fn run_only_can_not_save() {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("run"), AssemblyBuilderAccess::Run);
        asm.define_dynamic_module("run").unwrap();
        assert!(matches!(
            asm.save("run.dll"),
            Err(crate::Error::NotSupported(_))
        ));
    }

    #[test]
    fn resource_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.txt"), b"one").unwrap();
        fs::write(dir.path().join("two.txt"), b"two").unwrap();

        let mut asm = assembly().with_directory(dir.path());
        asm.define_persistent_module("m", "m.dll").unwrap();

        asm.add_resource_file("foo", "one.txt").unwrap();
        assert!(matches!(
            asm.add_resource_file("foo", "two.txt"),
            Err(crate::Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            asm.add_resource_file("foo2", "one.txt"),
            Err(crate::Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            asm.add_resource_file("bar", "missing.txt"),
            Err(crate::Error::MissingResource(_))
        ));
        assert!(asm.add_resource_file("bar", "m.dll").is_err());
        asm.add_resource_file("two", "two.txt").unwrap();
        assert_eq!(asm.linked_resources[0].hash.len(), 20);
    }

    #[test]
    fn transient_modules_have_no_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"notes").unwrap();

        let mut asm = assembly().with_directory(dir.path());
        asm.define_dynamic_module("notes.txt").unwrap();
        asm.define_dynamic_module("tool.dll").unwrap();

        asm.add_resource_file("notes", "notes.txt").unwrap();
        asm.define_persistent_module("tool", "tool.dll").unwrap();
        assert!(matches!(
            asm.define_persistent_module("other", "TOOL.DLL"),
            Err(crate::Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            asm.define_dynamic_module("notes.txt"),
            Err(crate::Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn unmanaged_resource_once() {
        let mut asm = assembly();
        asm.define_persistent_module("m", "m.dll").unwrap();
        assert!(asm.define_unmanaged_resource(&[]).is_err());
        assert!(matches!(
            asm.define_unmanaged_resource(&[1, 2, 3]),
            Err(crate::Error::InvalidArgument { .. })
        ));
        let resource = crate::writer::win32res::tests::sample_res();
        asm.define_unmanaged_resource(&resource).unwrap();
        assert!(matches!(
            asm.define_unmanaged_resource(&resource),
            Err(crate::Error::InvalidOperation(_))
        ));
        assert!(matches!(
            asm.define_unmanaged_resource_file(Path::new("/nonexistent/res.res")),
            Err(crate::Error::MissingResource(_))
        ));
    }
}
