//! Read-only view of persisted images.
//!
//! The loader shares nothing with the builders except the table schema and the blob
//! codecs. It parses an image with [`goblin`], walks the CLI header to the metadata and
//! turns every table into owned records: [`LoadedType`] with its fields, methods,
//! properties and events, the manifest, references and resources.
//!
//! Parsing is strict about structure and lenient about content. A method body or
//! attribute blob that can not be decoded is logged and left out, the rest of the module
//! still loads.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotemit::loader::LoadedModule;
//! use std::path::Path;
//!
//! let module = LoadedModule::from_file(Path::new("Hello.dll"))?;
//! for ty in &module.types {
//!     println!("{} has {} methods", ty.full_name(), ty.methods.len());
//! }
//! # Ok::<(), dotemit::Error>(())
//! ```

mod context;
mod model;
mod raw;

use std::{collections::HashMap, path::Path};

use log::{debug, warn};

pub use model::{
    LoadedAssembly, LoadedBody, LoadedCustomAttribute, LoadedEvent, LoadedExportedType,
    LoadedField, LoadedFile, LoadedGenericParam, LoadedMethod, LoadedModuleInfo, LoadedPInvoke,
    LoadedParam, LoadedProperty, LoadedResource, LoadedSecurity, LoadedType,
};

use context::Context;
use raw::RawMetadata;

use crate::{
    emit::PermissionSet,
    file::File,
    metadata::{
        constants::Constant,
        cor20header::Cor20Header,
        flags::{
            AssemblyFlags, AssemblyHashAlgorithm, EventAttributes, FieldAttributes,
            FileAttributes, GenericParameterAttributes, MethodAttributes, MethodImplAttributes,
            PInvokeAttributes, ParamAttributes, PropertyAttributes, ResourceAttributes,
            SecurityAction, TypeAttributes,
        },
        identity::{AssemblyName, AssemblyVersion},
        marshalling::MarshalDescriptor,
        method::MethodBody,
        signatures::{
            parse_field_signature, parse_local_var_signature, parse_method_signature,
            parse_property_signature, TypeSignature,
        },
        tables::{CodedIndexType, TableId},
        token::Token,
    },
    Result,
};

const SEMANTICS_SETTER: u32 = 0x0001;
const SEMANTICS_GETTER: u32 = 0x0002;
const SEMANTICS_OTHER: u32 = 0x0004;
const SEMANTICS_ADD_ON: u32 = 0x0008;
const SEMANTICS_REMOVE_ON: u32 = 0x0010;
const SEMANTICS_FIRE: u32 = 0x0020;

/// A persisted module, fully decoded.
#[derive(Debug)]
pub struct LoadedModule {
    /// The `Module` row
    pub module: LoadedModuleInfo,
    /// The manifest, `None` for a module without one
    pub assembly: Option<LoadedAssembly>,
    /// Referenced assemblies in table order
    pub assembly_refs: Vec<AssemblyName>,
    /// Referenced native libraries and modules in table order
    pub module_refs: Vec<String>,
    /// Other files of the assembly
    pub files: Vec<LoadedFile>,
    /// Types exported from other modules of the assembly
    pub exported_types: Vec<LoadedExportedType>,
    /// Manifest resources
    pub resources: Vec<LoadedResource>,
    /// Type definitions in table order, the global `<Module>` type first
    pub types: Vec<LoadedType>,
    /// Entry point method or file
    pub entry_point: Option<Token>,
    /// The CLI header
    pub cli_header: Cor20Header,
    /// Version string of the metadata root
    pub runtime_version: String,
    /// Returns true for a PE32+ image
    pub is_64: bool,
    /// Returns true if the image carries a `.rsrc` section
    pub has_win32_resources: bool,
    metadata: RawMetadata,
}

impl LoadedModule {
    /// Load the image at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file can not be read, or a format error if it
    /// is not a managed image.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::from_file(path)?;
        Self::load(&file)
    }

    /// Load an image held in memory.
    ///
    /// # Errors
    /// Returns a format error if `data` is not a managed image.
    pub fn from_mem(data: Vec<u8>) -> Result<Self> {
        let file = File::from_mem(data)?;
        Self::load(&file)
    }

    fn load(file: &File) -> Result<Self> {
        let (clr_rva, clr_size) = file.clr()?;
        let clr_offset = file.rva_to_offset(clr_rva as usize)?;
        let cli_header = Cor20Header::read(file.data_slice(clr_offset, clr_size as usize)?)?;
        let metadata_offset = file.rva_to_offset(cli_header.meta_data_rva as usize)?;
        let metadata = RawMetadata::parse(
            file.data_slice(metadata_offset, cli_header.meta_data_size as usize)?,
        )?;

        let reader = Reader::new(file, &metadata, cli_header)?;
        let module = reader.module()?;
        debug!("Loading module '{}'", module.name);
        let assembly = reader.assembly()?;
        let assembly_refs = reader.assembly_refs()?;
        let module_refs = reader.module_refs()?;
        let files = reader.files()?;
        let exported_types = reader.exported_types()?;
        let resources = reader.resources()?;
        let types = reader.types()?;

        Ok(LoadedModule {
            module,
            assembly,
            assembly_refs,
            module_refs,
            files,
            exported_types,
            resources,
            types,
            entry_point: (cli_header.entry_point_token != 0)
                .then(|| Token::new(cli_header.entry_point_token)),
            cli_header,
            runtime_version: metadata.version.clone(),
            is_64: file.is_64(),
            has_win32_resources: file
                .sections()
                .any(|section| section.name().ok() == Some(".rsrc")),
            metadata,
        })
    }

    /// The type with the given full name, nested types joined with `+`.
    #[must_use]
    pub fn type_by_name(&self, full_name: &str) -> Option<&LoadedType> {
        self.types.iter().find(|ty| ty.full_name == full_name)
    }

    /// The type definition behind a `TypeDef` token.
    #[must_use]
    pub fn type_by_token(&self, token: Token) -> Option<&LoadedType> {
        self.types.iter().find(|ty| ty.token == token)
    }

    /// The method definition behind a `MethodDef` token.
    #[must_use]
    pub fn method_by_token(&self, token: Token) -> Option<&LoadedMethod> {
        self.types
            .iter()
            .flat_map(|ty| ty.methods.iter())
            .find(|method| method.token == token)
    }

    /// The field definition behind a `Field` token.
    #[must_use]
    pub fn field_by_token(&self, token: Token) -> Option<&LoadedField> {
        self.types
            .iter()
            .flat_map(|ty| ty.fields.iter())
            .find(|field| field.token == token)
    }

    /// Full name of a `TypeDef`, `TypeRef` or `TypeSpec` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for any other token or a dangling row.
    pub fn type_name(&self, token: Token) -> Result<String> {
        Context::new(&self.metadata).type_name(token)
    }

    /// Name of a `MethodDef`, `Field` or `MemberRef` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for any other token or a dangling row.
    pub fn member_name(&self, token: Token) -> Result<String> {
        let row = self.metadata.row(token)?;
        let column = match token.table_id() {
            Some(TableId::MethodDef) => 3,
            Some(TableId::Field | TableId::MemberRef) => 1,
            _ => return Err(malformed_error!("Token {} is not a member", token)),
        };
        Ok(self.metadata.string(row[column])?.to_string())
    }

    /// The parent of a `MemberRef` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for any other token or a dangling row.
    pub fn member_ref_parent(&self, token: Token) -> Result<Token> {
        if token.table_id() != Some(TableId::MemberRef) {
            return Err(malformed_error!("Token {} is not a member reference", token));
        }
        CodedIndexType::MemberRefParent.decode(self.metadata.row(token)?[0])
    }

    /// The string a `ldstr` token refers to.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `token` is not a user string token.
    pub fn user_string(&self, token: Token) -> Result<String> {
        if token.value() >> 24 != 0x70 {
            return Err(malformed_error!("Token {} is not a user string", token));
        }
        self.metadata.user_string(token.value() & 0x00FF_FFFF)
    }
}

/// Owner lookups built in one pass over the association tables.
#[derive(Default)]
struct Index {
    custom_attributes: HashMap<Token, Vec<usize>>,
    constants: HashMap<Token, usize>,
    marshals: HashMap<Token, usize>,
    security: HashMap<Token, Vec<usize>>,
    class_layouts: HashMap<u32, (u16, u32)>,
    field_offsets: HashMap<u32, u32>,
    field_rvas: HashMap<u32, u32>,
    impl_maps: HashMap<Token, usize>,
    interfaces: HashMap<u32, Vec<Token>>,
    semantics: HashMap<Token, Vec<(u32, Token)>>,
    generic_params: HashMap<Token, Vec<usize>>,
    constraints: HashMap<u32, Vec<Token>>,
    method_impls: HashMap<u32, Vec<(Token, Token)>>,
}

impl Index {
    fn new(md: &RawMetadata) -> Result<Self> {
        let mut index = Index::default();
        for (row, data) in md.rows(TableId::CustomAttribute).iter().enumerate() {
            let parent = CodedIndexType::HasCustomAttribute.decode(data[0])?;
            index.custom_attributes.entry(parent).or_default().push(row);
        }
        for (row, data) in md.rows(TableId::Constant).iter().enumerate() {
            index
                .constants
                .insert(CodedIndexType::HasConstant.decode(data[1])?, row);
        }
        for (row, data) in md.rows(TableId::FieldMarshal).iter().enumerate() {
            index
                .marshals
                .insert(CodedIndexType::HasFieldMarshal.decode(data[0])?, row);
        }
        for (row, data) in md.rows(TableId::DeclSecurity).iter().enumerate() {
            let parent = CodedIndexType::HasDeclSecurity.decode(data[1])?;
            index.security.entry(parent).or_default().push(row);
        }
        for data in md.rows(TableId::ClassLayout) {
            #[allow(clippy::cast_possible_truncation)]
            let packing = data[0] as u16;
            index.class_layouts.insert(data[2], (packing, data[1]));
        }
        for data in md.rows(TableId::FieldLayout) {
            index.field_offsets.insert(data[1], data[0]);
        }
        for data in md.rows(TableId::FieldRVA) {
            index.field_rvas.insert(data[1], data[0]);
        }
        for (row, data) in md.rows(TableId::ImplMap).iter().enumerate() {
            index
                .impl_maps
                .insert(CodedIndexType::MemberForwarded.decode(data[1])?, row);
        }
        for data in md.rows(TableId::InterfaceImpl) {
            let interface = CodedIndexType::TypeDefOrRef.decode(data[1])?;
            index.interfaces.entry(data[0]).or_default().push(interface);
        }
        for data in md.rows(TableId::MethodSemantics) {
            let association = CodedIndexType::HasSemantics.decode(data[2])?;
            let method = Token::from_parts(TableId::MethodDef, data[1]);
            index
                .semantics
                .entry(association)
                .or_default()
                .push((data[0], method));
        }
        for (row, data) in md.rows(TableId::GenericParam).iter().enumerate() {
            let owner = CodedIndexType::TypeOrMethodDef.decode(data[2])?;
            index.generic_params.entry(owner).or_default().push(row);
        }
        for data in md.rows(TableId::GenericParamConstraint) {
            let constraint = CodedIndexType::TypeDefOrRef.decode(data[1])?;
            index.constraints.entry(data[0]).or_default().push(constraint);
        }
        for data in md.rows(TableId::MethodImpl) {
            let body = CodedIndexType::MethodDefOrRef.decode(data[1])?;
            let declaration = CodedIndexType::MethodDefOrRef.decode(data[2])?;
            index
                .method_impls
                .entry(data[0])
                .or_default()
                .push((body, declaration));
        }
        Ok(index)
    }
}

struct Reader<'a> {
    file: &'a File,
    md: &'a RawMetadata,
    ctx: Context<'a>,
    index: Index,
    cli_header: Cor20Header,
}

#[allow(clippy::cast_possible_truncation)]
fn u16_column(value: u32) -> u16 {
    value as u16
}

impl<'a> Reader<'a> {
    fn new(file: &'a File, md: &'a RawMetadata, cli_header: Cor20Header) -> Result<Self> {
        Ok(Reader {
            file,
            md,
            ctx: Context::new(md),
            index: Index::new(md)?,
            cli_header,
        })
    }

    fn attributes(&self, parent: Token) -> Result<Vec<LoadedCustomAttribute>> {
        self.ctx.custom_attributes(&self.index.custom_attributes, parent)
    }

    fn constant(&self, parent: Token) -> Result<Option<Constant>> {
        let Some(row) = self.index.constants.get(&parent) else {
            return Ok(None);
        };
        let data = &self.md.rows(TableId::Constant)[*row];
        #[allow(clippy::cast_possible_truncation)]
        let element_type = data[0] as u8;
        Ok(Some(Constant::from_blob(element_type, self.md.blob(data[2])?)?))
    }

    fn marshal(&self, parent: Token) -> Result<Option<MarshalDescriptor>> {
        let Some(row) = self.index.marshals.get(&parent) else {
            return Ok(None);
        };
        let data = &self.md.rows(TableId::FieldMarshal)[*row];
        Ok(Some(MarshalDescriptor::decode(self.md.blob(data[1])?)?))
    }

    fn security(&self, parent: Token) -> Result<Vec<LoadedSecurity>> {
        let Some(rows) = self.index.security.get(&parent) else {
            return Ok(Vec::new());
        };
        let table = self.md.rows(TableId::DeclSecurity);
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let data = &table[*row];
            let Some(action) = SecurityAction::from_u16(u16_column(data[0])) else {
                warn!("Skipping security entry of {} with unknown action {}", parent, data[0]);
                continue;
            };
            entries.push(LoadedSecurity {
                action,
                permission_set: PermissionSet::decode(self.md.blob(data[2])?)?,
            });
        }
        Ok(entries)
    }

    fn generic_params(&self, owner: Token) -> Result<Vec<LoadedGenericParam>> {
        let Some(rows) = self.index.generic_params.get(&owner) else {
            return Ok(Vec::new());
        };
        let table = self.md.rows(TableId::GenericParam);
        let mut params = Vec::with_capacity(rows.len());
        for row in rows {
            let data = &table[*row];
            #[allow(clippy::cast_possible_truncation)]
            let token = Token::from_parts(TableId::GenericParam, *row as u32 + 1);
            params.push(LoadedGenericParam {
                token,
                number: u16_column(data[0]),
                name: self.md.string(data[3])?.to_string(),
                attributes: GenericParameterAttributes::from_bits_retain(u16_column(data[1])),
                constraints: self
                    .index
                    .constraints
                    .get(&token.row())
                    .cloned()
                    .unwrap_or_default(),
                custom_attributes: self.attributes(token)?,
            });
        }
        params.sort_by_key(|param| param.number);
        Ok(params)
    }

    fn module(&self) -> Result<LoadedModuleInfo> {
        let Some(data) = self.md.rows(TableId::Module).first() else {
            return Err(malformed_error!("Metadata has no Module row"));
        };
        Ok(LoadedModuleInfo {
            name: self.md.string(data[1])?.to_string(),
            mvid: self.md.guid(data[2])?,
            custom_attributes: self.attributes(Token::from_parts(TableId::Module, 1))?,
        })
    }

    fn assembly(&self) -> Result<Option<LoadedAssembly>> {
        let Some(data) = self.md.rows(TableId::Assembly).first() else {
            return Ok(None);
        };
        let hash_algorithm = AssemblyHashAlgorithm::from_u32(data[0]).unwrap_or_else(|| {
            warn!("Unknown assembly hash algorithm {:#x}", data[0]);
            AssemblyHashAlgorithm::default()
        });
        let public_key = self.md.blob(data[6])?;

        let mut name = AssemblyName::new(self.md.string(data[7])?);
        name.version = AssemblyVersion {
            major: u16_column(data[1]),
            minor: u16_column(data[2]),
            build: u16_column(data[3]),
            revision: u16_column(data[4]),
        };
        name.flags = AssemblyFlags::from_bits_retain(data[5]);
        name.hash_algorithm = hash_algorithm;
        name.public_key = (!public_key.is_empty()).then(|| public_key.to_vec());
        name.culture = culture(self.md.string(data[8])?);

        let token = Token::from_parts(TableId::Assembly, 1);
        Ok(Some(LoadedAssembly {
            name,
            custom_attributes: self.attributes(token)?,
            security: self.security(token)?,
        }))
    }

    fn assembly_refs(&self) -> Result<Vec<AssemblyName>> {
        let mut references = Vec::new();
        for data in self.md.rows(TableId::AssemblyRef) {
            let flags = AssemblyFlags::from_bits_retain(data[4]);
            let key = self.md.blob(data[5])?;

            let mut name = AssemblyName::new(self.md.string(data[6])?);
            name.version = AssemblyVersion {
                major: u16_column(data[0]),
                minor: u16_column(data[1]),
                build: u16_column(data[2]),
                revision: u16_column(data[3]),
            };
            name.flags = flags;
            name.culture = culture(self.md.string(data[7])?);
            if flags.contains(AssemblyFlags::PUBLIC_KEY) {
                name.public_key = Some(key.to_vec());
            } else if let Ok(token) = <[u8; 8]>::try_from(key) {
                name.token = Some(token);
            }
            references.push(name);
        }
        Ok(references)
    }

    fn module_refs(&self) -> Result<Vec<String>> {
        self.md
            .rows(TableId::ModuleRef)
            .iter()
            .map(|data| Ok(self.md.string(data[0])?.to_string()))
            .collect()
    }

    fn files(&self) -> Result<Vec<LoadedFile>> {
        self.md
            .rows(TableId::File)
            .iter()
            .map(|data| {
                Ok(LoadedFile {
                    name: self.md.string(data[1])?.to_string(),
                    attributes: FileAttributes::from_bits_retain(data[0]),
                    hash: self.md.blob(data[2])?.to_vec(),
                })
            })
            .collect()
    }

    fn exported_types(&self) -> Result<Vec<LoadedExportedType>> {
        self.md
            .rows(TableId::ExportedType)
            .iter()
            .map(|data| {
                Ok(LoadedExportedType {
                    namespace: self.md.string(data[3])?.to_string(),
                    name: self.md.string(data[2])?.to_string(),
                    attributes: TypeAttributes::from_bits_retain(data[0]),
                    type_def_id: data[1],
                    implementation: CodedIndexType::Implementation.decode(data[4])?,
                })
            })
            .collect()
    }

    fn resources(&self) -> Result<Vec<LoadedResource>> {
        let mut resources = Vec::new();
        for data in self.md.rows(TableId::ManifestResource) {
            let implementation = CodedIndexType::Implementation.decode(data[3])?;
            let resource = if implementation.is_null() {
                Some(self.embedded_resource(data[0])?)
            } else {
                None
            };
            resources.push(LoadedResource {
                name: self.md.string(data[2])?.to_string(),
                attributes: ResourceAttributes::from_bits_retain(data[1]),
                implementation,
                offset: data[0],
                data: resource,
            });
        }
        Ok(resources)
    }

    fn embedded_resource(&self, offset: u32) -> Result<Vec<u8>> {
        if offset >= self.cli_header.resource_size {
            return Err(malformed_error!("Resource offset {:#x} is out of range", offset));
        }
        let start = self
            .file
            .rva_to_offset((self.cli_header.resource_rva + offset) as usize)?;
        let length = self.file.data_slice(start, 4)?;
        let length = u32::from_le_bytes([length[0], length[1], length[2], length[3]]);
        Ok(self.file.data_slice(start + 4, length as usize)?.to_vec())
    }

    fn types(&self) -> Result<Vec<LoadedType>> {
        let count = self.md.rows(TableId::TypeDef).len();
        let mut types = Vec::with_capacity(count);
        for index in 0..count {
            types.push(self.type_def(index)?);
        }
        Ok(types)
    }

    fn type_def(&self, index: usize) -> Result<LoadedType> {
        let data = &self.md.rows(TableId::TypeDef)[index];
        #[allow(clippy::cast_possible_truncation)]
        let row = index as u32 + 1;
        let token = Token::from_parts(TableId::TypeDef, row);
        let extends = CodedIndexType::TypeDefOrRef.decode(data[3])?;
        let layout = self.index.class_layouts.get(&row);

        let (first, end) = self.md.list_range(TableId::TypeDef, 4, TableId::Field, index);
        let fields = (first..end)
            .map(|field| self.field(field))
            .collect::<Result<Vec<_>>>()?;
        let (first, end) = self
            .md
            .list_range(TableId::TypeDef, 5, TableId::MethodDef, index);
        let methods = (first..end)
            .map(|method| self.method(method))
            .collect::<Result<Vec<_>>>()?;

        Ok(LoadedType {
            token,
            namespace: self.md.string(data[2])?.to_string(),
            name: self.md.string(data[1])?.to_string(),
            attributes: TypeAttributes::from_bits_retain(data[0]),
            extends: (!extends.is_null()).then_some(extends),
            interfaces: self.index.interfaces.get(&row).cloned().unwrap_or_default(),
            enclosing: self
                .ctx
                .enclosing(row)
                .map(|outer| Token::from_parts(TableId::TypeDef, outer)),
            packing: layout.map(|(packing, _)| *packing),
            class_size: layout.map(|(_, size)| *size),
            generic_params: self.generic_params(token)?,
            fields,
            methods,
            properties: self.properties(row)?,
            events: self.events(row)?,
            overrides: self.index.method_impls.get(&row).cloned().unwrap_or_default(),
            security: self.security(token)?,
            custom_attributes: self.attributes(token)?,
            full_name: self.ctx.type_def_name(row)?,
        })
    }

    fn field(&self, row: u32) -> Result<LoadedField> {
        let token = Token::from_parts(TableId::Field, row);
        let data = self.md.row(token)?;
        let signature = parse_field_signature(self.md.blob(data[2])?)?;
        let rva = self.index.field_rvas.get(&row).copied();
        let initial = match rva {
            Some(rva) => self.field_data(token, rva, &signature.base)?,
            None => None,
        };

        Ok(LoadedField {
            token,
            name: self.md.string(data[1])?.to_string(),
            attributes: FieldAttributes::from_bits_retain(u16_column(data[0])),
            signature,
            constant: self.constant(token)?,
            offset: self.index.field_offsets.get(&row).copied(),
            marshal: self.marshal(token)?,
            rva,
            data: initial,
            custom_attributes: self.attributes(token)?,
        })
    }

    /// Size in bytes of a value of `signature`, known for primitives and value types
    /// with an explicit size in this module.
    fn value_size(&self, signature: &TypeSignature) -> Option<usize> {
        Some(match signature {
            TypeSignature::Boolean | TypeSignature::I1 | TypeSignature::U1 => 1,
            TypeSignature::Char | TypeSignature::I2 | TypeSignature::U2 => 2,
            TypeSignature::I4 | TypeSignature::U4 | TypeSignature::R4 => 4,
            TypeSignature::I8 | TypeSignature::U8 | TypeSignature::R8 => 8,
            TypeSignature::I | TypeSignature::U => {
                if self.file.is_64() {
                    8
                } else {
                    4
                }
            }
            TypeSignature::ValueType(token) if token.table_id() == Some(TableId::TypeDef) => {
                let (_, size) = self.index.class_layouts.get(&token.row())?;
                *size as usize
            }
            _ => return None,
        })
    }

    fn field_data(&self, field: Token, rva: u32, signature: &TypeSignature) -> Result<Option<Vec<u8>>> {
        let Some(size) = self.value_size(signature) else {
            warn!("Field {} has an RVA but no known size", field);
            return Ok(None);
        };
        let offset = self.file.rva_to_offset(rva as usize)?;
        Ok(Some(self.file.data_slice(offset, size)?.to_vec()))
    }

    fn method(&self, row: u32) -> Result<LoadedMethod> {
        let token = Token::from_parts(TableId::MethodDef, row);
        let data = self.md.row(token)?;
        let attributes = MethodAttributes::from_bits_retain(u16_column(data[2]));
        let impl_attributes = MethodImplAttributes::from_bits_retain(u16_column(data[1]));

        let (first, end) = self.md.list_range(
            TableId::MethodDef,
            5,
            TableId::Param,
            row as usize - 1,
        );
        let params = (first..end)
            .map(|param| self.param(param))
            .collect::<Result<Vec<_>>>()?;

        let body = if data[0] != 0 && impl_attributes.bits() & 0x0003 == 0 {
            self.body(token, data[0])?
        } else {
            None
        };

        let pinvoke = match self.index.impl_maps.get(&token) {
            Some(map) => {
                let map = &self.md.rows(TableId::ImplMap)[*map];
                let module = self
                    .md
                    .row(Token::from_parts(TableId::ModuleRef, map[3]))?;
                Some(LoadedPInvoke {
                    module: self.md.string(module[0])?.to_string(),
                    entry_point: self.md.string(map[2])?.to_string(),
                    attributes: PInvokeAttributes::from_bits_retain(u16_column(map[0])),
                })
            }
            None => None,
        };

        Ok(LoadedMethod {
            token,
            name: self.md.string(data[3])?.to_string(),
            attributes,
            impl_attributes,
            signature: parse_method_signature(self.md.blob(data[4])?)?,
            rva: data[0],
            params,
            generic_params: self.generic_params(token)?,
            body,
            pinvoke,
            security: self.security(token)?,
            custom_attributes: self.attributes(token)?,
        })
    }

    fn body(&self, method: Token, rva: u32) -> Result<Option<LoadedBody>> {
        let offset = self.file.rva_to_offset(rva as usize)?;
        let Some(data) = self.file.data().get(offset..) else {
            return Err(out_of_bounds_error!());
        };
        let header = match MethodBody::from(data) {
            Ok(header) => header,
            Err(error) => {
                warn!("Leaving out the unreadable body of {} - {}", method, error);
                return Ok(None);
            }
        };

        let locals = if header.local_var_sig_token == 0 {
            Vec::new()
        } else {
            let signature = Token::new(header.local_var_sig_token);
            let decoded = self
                .md
                .row(signature)
                .and_then(|row| self.md.blob(row[0]))
                .and_then(parse_local_var_signature);
            match decoded {
                Ok(locals) => locals.locals,
                Err(error) => {
                    warn!("Leaving out the locals of {} - {}", method, error);
                    Vec::new()
                }
            }
        };

        Ok(Some(LoadedBody {
            max_stack: header.max_stack,
            init_locals: header.is_init_local,
            code: header.code(data).to_vec(),
            handlers: header.exception_handlers.clone(),
            locals,
        }))
    }

    fn param(&self, row: u32) -> Result<LoadedParam> {
        let token = Token::from_parts(TableId::Param, row);
        let data = self.md.row(token)?;
        Ok(LoadedParam {
            sequence: u16_column(data[1]),
            name: self.md.string(data[2])?.to_string(),
            attributes: ParamAttributes::from_bits_retain(u16_column(data[0])),
            constant: self.constant(token)?,
            marshal: self.marshal(token)?,
            custom_attributes: self.attributes(token)?,
        })
    }

    /// Member list of a `PropertyMap` or `EventMap` entry of `type_row`.
    fn map_range(&self, map: TableId, list: TableId, type_row: u32) -> (u32, u32) {
        match self
            .md
            .rows(map)
            .iter()
            .position(|data| data[0] == type_row)
        {
            Some(index) => self.md.list_range(map, 1, list, index),
            None => (1, 1),
        }
    }

    fn semantics(&self, association: Token) -> &[(u32, Token)] {
        self.index
            .semantics
            .get(&association)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn properties(&self, type_row: u32) -> Result<Vec<LoadedProperty>> {
        let (first, end) = self.map_range(TableId::PropertyMap, TableId::Property, type_row);
        let mut properties = Vec::new();
        for row in first..end {
            let token = Token::from_parts(TableId::Property, row);
            let data = self.md.row(token)?;
            let mut property = LoadedProperty {
                token,
                name: self.md.string(data[1])?.to_string(),
                attributes: PropertyAttributes::from_bits_retain(u16_column(data[0])),
                signature: parse_property_signature(self.md.blob(data[2])?)?,
                getter: None,
                setter: None,
                others: Vec::new(),
                constant: self.constant(token)?,
                custom_attributes: self.attributes(token)?,
            };
            for (semantic, method) in self.semantics(token) {
                match *semantic {
                    SEMANTICS_GETTER => property.getter = Some(*method),
                    SEMANTICS_SETTER => property.setter = Some(*method),
                    SEMANTICS_OTHER => property.others.push(*method),
                    other => warn!("Property {} has unexpected semantics {:#x}", token, other),
                }
            }
            properties.push(property);
        }
        Ok(properties)
    }

    fn events(&self, type_row: u32) -> Result<Vec<LoadedEvent>> {
        let (first, end) = self.map_range(TableId::EventMap, TableId::Event, type_row);
        let mut events = Vec::new();
        for row in first..end {
            let token = Token::from_parts(TableId::Event, row);
            let data = self.md.row(token)?;
            let mut event = LoadedEvent {
                token,
                name: self.md.string(data[1])?.to_string(),
                attributes: EventAttributes::from_bits_retain(u16_column(data[0])),
                event_type: CodedIndexType::TypeDefOrRef.decode(data[2])?,
                add_on: None,
                remove_on: None,
                raise: None,
                others: Vec::new(),
                custom_attributes: self.attributes(token)?,
            };
            for (semantic, method) in self.semantics(token) {
                match *semantic {
                    SEMANTICS_ADD_ON => event.add_on = Some(*method),
                    SEMANTICS_REMOVE_ON => event.remove_on = Some(*method),
                    SEMANTICS_FIRE => event.raise = Some(*method),
                    SEMANTICS_OTHER => event.others.push(*method),
                    other => warn!("Event {} has unexpected semantics {:#x}", token, other),
                }
            }
            events.push(event);
        }
        Ok(events)
    }
}

fn culture(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::OpCode,
        config::SaveOptions,
        emit::{AssemblyBuilder, AssemblyBuilderAccess, CustomAttributeBuilder, ModuleId},
        metadata::{customattributes::CaValue, method::ExceptionHandlerFlags},
        typesystem::{corlib, Type},
    };

    fn build() -> (AssemblyBuilder, ModuleId) {
        let mut asm = AssemblyBuilder::new(
            AssemblyName::new("Loaded").with_version(AssemblyVersion {
                major: 1,
                minor: 2,
                build: 3,
                revision: 4,
            }),
            AssemblyBuilderAccess::Save,
        );
        let module = asm.define_persistent_module("Loaded", "Loaded.dll").unwrap();
        let widget = asm
            .module_builder(module)
            .unwrap()
            .define_type("Shapes.Widget", TypeAttributes::PUBLIC)
            .unwrap();

        let mut ty = asm.type_builder(widget).unwrap();
        let limit = ty
            .define_field(
                "Limit",
                Type::I4,
                FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::LITERAL,
            )
            .unwrap();
        let getter = ty
            .define_method(
                "get_Size",
                MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME,
                Type::I4,
                vec![],
            )
            .unwrap();
        let property = ty
            .define_property("Size", PropertyAttributes::empty(), Type::I4, vec![])
            .unwrap();
        let guarded = ty
            .define_method(
                "Guarded",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                Type::Void,
                vec![Type::String],
            )
            .unwrap();
        asm.field_builder(limit)
            .unwrap()
            .set_constant(Constant::I4(10))
            .unwrap();
        asm.property_builder(property)
            .unwrap()
            .set_get_method(getter)
            .unwrap();
        asm.method_builder(guarded)
            .unwrap()
            .define_parameter(1, ParamAttributes::empty(), Some("text"))
            .unwrap();

        let mut il = asm.il_generator(getter).unwrap();
        il.emit_i32(OpCode::LDC_I4, 7).unwrap();
        il.emit(OpCode::RET).unwrap();

        let mut il = asm.il_generator(guarded).unwrap();
        il.begin_exception_block().unwrap();
        il.emit_string(OpCode::LDSTR, "inside").unwrap();
        il.emit(OpCode::POP).unwrap();
        il.begin_finally_block().unwrap();
        il.emit(OpCode::NOP).unwrap();
        il.end_exception_block().unwrap();
        il.emit(OpCode::RET).unwrap();

        let obsolete =
            corlib::attribute_constructor("System", "ObsoleteAttribute", vec![Type::String]);
        asm.type_builder(widget)
            .unwrap()
            .set_custom_attribute(&CustomAttributeBuilder::new(
                obsolete,
                vec![CaValue::String(Some("old".into()))],
            ))
            .unwrap();
        asm.type_builder(widget).unwrap().create_type().unwrap();
        (asm, module)
    }

    fn load() -> LoadedModule {
        let (mut asm, module) = build();
        let image = asm.emit_image(module, &SaveOptions::new()).unwrap();
        LoadedModule::from_mem(image).unwrap()
    }

    #[test]
    fn manifest() {
        let module = load();
        assert_eq!(module.module.name, "Loaded");
        let assembly = module.assembly.as_ref().unwrap();
        assert_eq!(assembly.name.name, "Loaded");
        assert_eq!(assembly.name.version.build, 3);
        assert!(module
            .assembly_refs
            .iter()
            .any(|reference| reference.name == "mscorlib"));
        assert!(!module.is_64);
        assert!(module.entry_point.is_none());
    }

    #[test]
    fn types_and_members() {
        let module = load();
        assert_eq!(module.types[0].full_name(), "<Module>");
        let widget = module.type_by_name("Shapes.Widget").unwrap();
        assert_eq!(widget.namespace, "Shapes");
        assert_eq!(module.type_name(widget.extends.unwrap()).unwrap(), "System.Object");

        let limit = widget.field("Limit").unwrap();
        assert_eq!(limit.constant, Some(Constant::I4(10)));
        assert_eq!(limit.signature.base, TypeSignature::I4);

        let size = widget.property("Size").unwrap();
        let getter = module.method_by_token(size.getter.unwrap()).unwrap();
        assert_eq!(getter.name, "get_Size");
        let body = getter.body.as_ref().unwrap();
        assert_eq!(body.code, vec![0x20, 7, 0, 0, 0, 0x2A]);
    }

    #[test]
    fn bodies_and_parameters() {
        let module = load();
        let widget = module.type_by_name("Shapes.Widget").unwrap();
        let guarded = widget.method("Guarded").unwrap();
        assert_eq!(guarded.param(1).unwrap().name, "text");
        assert_eq!(guarded.signature.params[0].base, TypeSignature::String);

        let body = guarded.body.as_ref().unwrap();
        assert_eq!(body.handlers.len(), 1);
        assert!(body.handlers[0].flags.contains(ExceptionHandlerFlags::FINALLY));
        let token = Token::new(u32::from_le_bytes([
            body.code[1],
            body.code[2],
            body.code[3],
            body.code[4],
        ]));
        assert_eq!(module.user_string(token).unwrap(), "inside");
    }

    #[test]
    fn custom_attributes() {
        let module = load();
        let widget = module.type_by_name("Shapes.Widget").unwrap();
        let attribute = &widget.custom_attributes[0];
        assert_eq!(attribute.attribute_type, "System.ObsoleteAttribute");
        let value = attribute.value.as_ref().unwrap();
        assert_eq!(value.fixed_args, vec![CaValue::String(Some("old".into()))]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(LoadedModule::from_mem(Vec::new()).is_err());
        assert!(LoadedModule::from_mem(vec![0x4D, 0x5A, 0, 0]).is_err());
    }
}
