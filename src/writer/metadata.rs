//! Lowering of one module into metadata rows, heaps and method bodies.
//!
//! [`MetadataWriter`] walks the arena of the [`AssemblyBuilder`] for a single module and
//! produces a [`ModuleContent`]: the rows of every table, the `#Strings`, `#US` and
//! `#Blob` heaps, the encoded method bodies, the initial data of RVA fields and the
//! embedded resources.
//!
//! Everything that may intern a new reference (signatures, base types, custom attribute
//! constructors, module references of P/Invoke methods) is resolved while the definition
//! rows are built. The reference tables of the module's [`crate::emit::TokenTable`] are
//! copied only afterwards, so the snapshot contains every row a definition points to.

use std::collections::HashMap;

use log::{debug, trace};
use rayon::prelude::*;

use crate::{
    emit::{
        data::{BodyState, ClosedBody, EmbeddedResource, SecurityData},
        AssemblyBuilder, CustomAttribute, EventId, GenericParamId, MethodId, ModuleId,
        PropertyId,
    },
    metadata::{
        constants::Constant,
        flags::{AssemblyFlags, FileAttributes, MethodSemanticsKind, TypeAttributes},
        heaps::{BlobHeap, StringHeap},
        identity::{AssemblyName, StrongNameKeyPair},
        marshalling::MarshalDescriptor,
        method::MethodBody,
        root::{Root, StreamHeader},
        tables::{CodedIndexType, TableId},
        token::Token,
    },
    typesystem::Type,
    utils::{compute_sha1, pad_to},
    writer::{
        layout::RowLayout,
        tables::{HeapSizes, TablesBuilder},
    },
    Result,
};

/// A persisted module file other than the manifest module.
#[derive(Debug, Clone)]
pub(crate) struct ModuleFile {
    pub module: ModuleId,
    pub file_name: String,
    /// Hash of the image with the assembly hash algorithm
    pub hash: Vec<u8>,
}

/// Offsets of embedded resources within the resource blob of their module.
///
/// Each entry is a 4-byte length followed by the data, aligned to 8 bytes.
pub(crate) fn resource_offsets(resources: &[EmbeddedResource]) -> Vec<u32> {
    let mut offset = 0_usize;
    let mut offsets = Vec::with_capacity(resources.len());
    for resource in resources {
        #[allow(clippy::cast_possible_truncation)]
        let start = offset as u32;
        offsets.push(start);
        offset = (offset + 4 + resource.data.len() + 7) & !7;
    }
    offsets
}

fn resource_blob(resources: &[EmbeddedResource]) -> Vec<u8> {
    let mut blob = Vec::new();
    for resource in resources {
        #[allow(clippy::cast_possible_truncation)]
        let length = resource.data.len() as u32;
        blob.extend_from_slice(&length.to_le_bytes());
        blob.extend_from_slice(&resource.data);
        pad_to(&mut blob, 8);
    }
    blob
}

/// Everything the image writer needs from one module.
pub(crate) struct ModuleContent {
    pub tables: TablesBuilder,
    pub strings: Vec<u8>,
    pub user_strings: Vec<u8>,
    pub blobs: Vec<u8>,
    /// Method bodies, `MethodDef` rows hold RVAs into this area
    pub bodies: Vec<u8>,
    /// Initial data of RVA fields, `FieldRVA` rows hold offsets into this area
    pub field_data: Vec<u8>,
    /// Embedded managed resources
    pub resources: Vec<u8>,
    /// `MethodDef` or `File` token of the entry point, 0 for none
    pub entry_point: u32,
    /// Size of the reserved strong name signature, 0 when unsigned
    pub strong_name_size: u32,
    module_name: String,
}

impl ModuleContent {
    fn heap_sizes(&self) -> HeapSizes {
        HeapSizes {
            strings: self.strings.len(),
            guids: 16,
            blobs: self.blobs.len(),
        }
    }

    fn streams(&self) -> [(&'static str, usize); 5] {
        let padded = |length: usize| (length + 3) & !3;
        [
            ("#~", self.tables.stream_size(self.heap_sizes())),
            ("#Strings", padded(self.strings.len())),
            ("#US", padded(self.user_strings.len())),
            ("#GUID", 16),
            ("#Blob", padded(self.blobs.len())),
        ]
    }

    /// Size of the metadata block written by [`Self::metadata`].
    pub fn metadata_size(&self, runtime_version: &str) -> usize {
        let streams = self.streams();
        let names: Vec<&str> = streams.iter().map(|(name, _)| *name).collect();
        Root::header_size(runtime_version, &names)
            + streams.iter().map(|(_, size)| *size).sum::<usize>()
    }

    /// Serialize the metadata block: root, stream headers and streams.
    ///
    /// `field_data_rva` is the RVA the field data area was placed at; the `FieldRVA`
    /// rows are rebased onto it first. The module version id is derived from the
    /// serialized streams, so identical input produces identical bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a row value does not fit its column.
    pub fn metadata(&mut self, field_data_rva: u32, runtime_version: &str) -> Result<Vec<u8>> {
        for row in self.tables.rows_mut(TableId::FieldRVA) {
            row[0] += field_data_rva;
        }

        let tables = self.tables.serialize(self.heap_sizes())?;
        let streams = self.streams();
        let names: Vec<&str> = streams.iter().map(|(name, _)| *name).collect();
        let mut offset = Root::header_size(runtime_version, &names);
        let mut stream_headers = Vec::with_capacity(streams.len());
        for (name, size) in streams {
            #[allow(clippy::cast_possible_truncation)]
            let header = StreamHeader {
                offset: offset as u32,
                size: size as u32,
                name: name.to_string(),
            };
            stream_headers.push(header);
            offset += size;
        }

        let root = Root {
            major_version: 1,
            minor_version: 1,
            version: runtime_version.to_string(),
            stream_headers,
        };

        let mvid = self.mvid(&tables);
        let mut buffer = root.write();
        for data in [&tables, &self.strings, &self.user_strings] {
            buffer.extend_from_slice(data);
            pad_to(&mut buffer, 4);
        }
        buffer.extend_from_slice(&mvid);
        buffer.extend_from_slice(&self.blobs);
        pad_to(&mut buffer, 4);
        Ok(buffer)
    }

    /// Name-based module version id: SHA-1 over the streams and the module name, with the
    /// version and variant bits of RFC 4122 set.
    fn mvid(&self, tables: &[u8]) -> [u8; 16] {
        let mut input = Vec::with_capacity(
            tables.len() + self.strings.len() + self.user_strings.len() + self.blobs.len(),
        );
        for data in [tables, &self.strings, &self.user_strings, &self.blobs] {
            input.extend_from_slice(data);
        }
        input.extend_from_slice(self.module_name.as_bytes());

        let hash = compute_sha1(&input);
        let mut mvid = [0_u8; 16];
        mvid.copy_from_slice(&hash[..16]);
        mvid[7] = (mvid[7] & 0x0F) | 0x50;
        mvid[8] = (mvid[8] & 0x3F) | 0x80;
        mvid
    }
}

/// Builds the [`ModuleContent`] of one module.
pub(crate) struct MetadataWriter<'a> {
    asm: &'a AssemblyBuilder,
    module: ModuleId,
    layout: RowLayout,
    tables: TablesBuilder,
    strings: StringHeap,
    blobs: BlobHeap,
    /// `(method, position)` to `Param` row
    param_rows: HashMap<(MethodId, usize), u32>,
    property_rows: HashMap<PropertyId, u32>,
    event_rows: HashMap<EventId, u32>,
    generic_param_rows: HashMap<GenericParamId, u32>,
    custom_attributes: Vec<(Token, &'a CustomAttribute)>,
}

impl<'a> MetadataWriter<'a> {
    pub fn new(asm: &'a AssemblyBuilder, module: ModuleId) -> Result<Self> {
        Ok(MetadataWriter {
            asm,
            module,
            layout: RowLayout::new(asm, module)?,
            tables: TablesBuilder::new(),
            strings: StringHeap::new(),
            blobs: BlobHeap::new(),
            param_rows: HashMap::new(),
            property_rows: HashMap::new(),
            event_rows: HashMap::new(),
            generic_param_rows: HashMap::new(),
            custom_attributes: Vec::new(),
        })
    }

    fn string(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            0
        } else {
            self.strings.add(value)
        }
    }

    fn blob(&mut self, value: &[u8]) -> Result<u32> {
        self.blobs.add(value)
    }

    fn coded(coded: CodedIndexType, token: Token) -> Result<u32> {
        coded.encode(token)
    }

    fn type_token(&self, ty: &Type) -> Result<Token> {
        self.asm.type_token(self.module, ty)
    }

    fn collect_attributes(&mut self, parent: Token, attributes: &'a [CustomAttribute]) {
        self.custom_attributes
            .extend(attributes.iter().map(|attribute| (parent, attribute)));
    }

    /// Lower the module.
    ///
    /// `body_rva` is the RVA the body area will be placed at. `manifest` lists the other
    /// module files of the assembly when this module carries the manifest, `None`
    /// otherwise.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] for methods whose body was never closed
    /// and format errors if the metadata exceeds the limits of the file format.
    pub fn build(mut self, body_rva: u32, manifest: Option<&[ModuleFile]>) -> Result<ModuleContent> {
        let module_data = self.asm.module_data(self.module)?;
        let module_name = module_data.name.clone();

        let name = self.string(&module_name);
        self.tables.push(TableId::Module, vec![0, name, 1, 0, 0]);
        self.collect_attributes(
            Token::from_parts(TableId::Module, 1),
            &module_data.custom_attributes,
        );

        let (body_offsets, bodies) = self.write_bodies()?;

        self.write_types()?;
        let field_data = self.write_fields()?;
        self.write_methods(body_rva, &body_offsets)?;
        self.write_properties_and_events()?;
        self.write_generic_params()?;

        let mut entry_point = 0;
        let mut strong_name_size = 0;
        if let Some(files) = manifest {
            self.write_manifest(files)?;
            entry_point = self.entry_point_token(files)?;
            if let Some(public_key) = &self.asm.name.public_key {
                #[allow(clippy::cast_possible_truncation)]
                let size = StrongNameKeyPair::new(public_key)
                    .map_or(128, |pair| pair.signature_size()) as u32;
                strong_name_size = size;
            }
        }

        self.write_custom_attributes()?;
        self.write_references()?;
        self.tables.sort();

        let user_strings = module_data.tokens.user_string_heap()?;
        let resources = resource_blob(&module_data.resources);

        debug!(
            "Module '{}': {} types, {} fields, {} methods, {} body bytes",
            module_name,
            self.tables.rows(TableId::TypeDef),
            self.tables.rows(TableId::Field),
            self.tables.rows(TableId::MethodDef),
            bodies.len()
        );

        Ok(ModuleContent {
            tables: self.tables,
            strings: self.strings.into_bytes(),
            user_strings,
            blobs: self.blobs.into_bytes(),
            bodies,
            field_data,
            resources,
            entry_point,
            strong_name_size,
            module_name,
        })
    }

    /// Encode every method body with final tokens. Returns the offset of each body within
    /// the body area (in final `MethodDef` order) and the area itself.
    fn write_bodies(&self) -> Result<(Vec<Option<u32>>, Vec<u8>)> {
        let mut closed: Vec<Option<&ClosedBody>> = Vec::with_capacity(self.layout.methods.len());
        for method in &self.layout.methods {
            let data = self.asm.method_data(*method)?;
            closed.push(match &data.body {
                BodyState::Closed(body) => Some(body),
                BodyState::None => None,
                BodyState::Generator(_) | BodyState::Raw { .. } => {
                    return Err(invalid_operation!(
                        "The body of method '{}' has not been closed",
                        data.name
                    ));
                }
            });
        }

        let layout = &self.layout;
        let encoded = closed
            .par_iter()
            .map(|body| {
                body.map(|body| {
                    let mut code = body.code.clone();
                    layout.patch_code(&mut code, &body.token_fixups)?;
                    let handlers = body
                        .handlers
                        .iter()
                        .map(|handler| {
                            let mut handler = handler.clone();
                            handler.class_token = layout.remap(handler.class_token)?;
                            Ok(handler)
                        })
                        .collect::<Result<Vec<_>>>()?;
                    MethodBody::encode(
                        &code,
                        body.max_stack,
                        body.local_sig.value(),
                        body.init_locals,
                        &handlers,
                    )
                })
                .transpose()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut area = Vec::new();
        let mut offsets = Vec::with_capacity(encoded.len());
        for body in encoded {
            offsets.push(body.map(|body| {
                pad_to(&mut area, 4);
                #[allow(clippy::cast_possible_truncation)]
                let offset = area.len() as u32;
                area.extend_from_slice(&body);
                offset
            }));
        }
        pad_to(&mut area, 4);
        Ok((offsets, area))
    }

    fn write_security(&mut self, parent: Token, security: &[SecurityData]) -> Result<()> {
        for entry in security {
            let blob = entry.permission_set.encode()?;
            let blob = self.blob(&blob)?;
            let parent = Self::coded(CodedIndexType::HasDeclSecurity, parent)?;
            self.tables.push(
                TableId::DeclSecurity,
                vec![u32::from(entry.action as u16), parent, blob],
            );
        }
        Ok(())
    }

    fn write_constant(&mut self, parent: Token, constant: &Constant) -> Result<()> {
        let blob = self.blob(&constant.to_blob())?;
        let parent = Self::coded(CodedIndexType::HasConstant, parent)?;
        self.tables.push(
            TableId::Constant,
            vec![u32::from(constant.element_type()), parent, blob],
        );
        Ok(())
    }

    fn write_marshal(&mut self, parent: Token, marshal: &MarshalDescriptor) -> Result<()> {
        let blob = self.blob(&marshal.encode()?)?;
        let parent = Self::coded(CodedIndexType::HasFieldMarshal, parent)?;
        self.tables.push(TableId::FieldMarshal, vec![parent, blob]);
        Ok(())
    }

    fn write_types(&mut self) -> Result<()> {
        let asm = self.asm;
        for (index, id) in self.layout.types.clone().into_iter().enumerate() {
            let data = asm.type_data(id)?;
            let range = self.layout.ranges[index];
            let token = asm.type_def_token(id)?;

            let extends = match &data.parent {
                Some(parent) => Self::coded(CodedIndexType::TypeDefOrRef, self.type_token(parent)?)?,
                None => 0,
            };
            let name = self.string(&data.name);
            let namespace = self.string(&data.namespace);
            let row = self.tables.push(
                TableId::TypeDef,
                vec![
                    data.attributes.bits(),
                    name,
                    namespace,
                    extends,
                    range.first_field,
                    range.first_method,
                ],
            );
            if row != token.row() {
                return Err(malformed_error!(
                    "Type '{}' expected at row {}, laid out at {}",
                    data.full_name(),
                    token.row(),
                    row
                ));
            }
            trace!("TypeDef {} '{}'", row, data.full_name());

            for interface in &data.interfaces {
                let interface = Self::coded(CodedIndexType::TypeDefOrRef, self.type_token(interface)?)?;
                self.tables.push(TableId::InterfaceImpl, vec![row, interface]);
            }
            if let Some(declaring) = data.declaring {
                let enclosing = asm.type_def_token(declaring)?.row();
                self.tables.push(TableId::NestedClass, vec![row, enclosing]);
            }
            if !data.is_global && (data.packing as u16 != 0 || data.size != 0) {
                self.tables.push(
                    TableId::ClassLayout,
                    vec![u32::from(data.packing as u16), data.size, row],
                );
            }
            self.write_security(token, &data.security)?;
            for (body, declaration) in &data.overrides {
                let body = asm.method_token(self.module, body)?;
                let declaration = asm.method_token(self.module, declaration)?;
                let body = Self::coded(CodedIndexType::MethodDefOrRef, self.layout.remap(body)?)?;
                let declaration = Self::coded(
                    CodedIndexType::MethodDefOrRef,
                    self.layout.remap(declaration)?,
                )?;
                self.tables
                    .push(TableId::MethodImpl, vec![row, body, declaration]);
            }
            self.collect_attributes(token, &data.custom_attributes);
        }
        Ok(())
    }

    /// Write the `Field` rows and their satellites; returns the field data area.
    fn write_fields(&mut self) -> Result<Vec<u8>> {
        let asm = self.asm;
        let mut field_data = Vec::new();
        for id in self.layout.fields.clone() {
            let data = asm.field_data(id)?;
            let signature = asm.field_signature_blob(self.module, &data.field_type)?;
            let name = self.string(&data.name);
            let signature = self.blob(&signature)?;
            let row = self.tables.push(
                TableId::Field,
                vec![u32::from(data.attributes.bits()), name, signature],
            );
            let token = Token::from_parts(TableId::Field, row);

            if let Some(constant) = &data.constant {
                self.write_constant(token, constant)?;
            }
            if let Some(marshal) = &data.marshal {
                self.write_marshal(token, marshal)?;
            }
            if let Some(offset) = data.offset {
                self.tables.push(TableId::FieldLayout, vec![offset, row]);
            }
            if let Some(bytes) = &data.data {
                pad_to(&mut field_data, 8);
                #[allow(clippy::cast_possible_truncation)]
                let offset = field_data.len() as u32;
                field_data.extend_from_slice(bytes);
                self.tables.push(TableId::FieldRVA, vec![offset, row]);
            }
            self.collect_attributes(token, &data.custom_attributes);
        }
        Ok(field_data)
    }

    fn write_methods(&mut self, body_rva: u32, body_offsets: &[Option<u32>]) -> Result<()> {
        let asm = self.asm;
        for (index, id) in self.layout.methods.clone().into_iter().enumerate() {
            let data = asm.method_data(id)?;
            let signature = asm.method_definition_blob(self.module, id)?;
            let rva = body_offsets
                .get(index)
                .copied()
                .flatten()
                .map_or(0, |offset| body_rva + offset);
            let name = self.string(&data.name);
            let signature = self.blob(&signature)?;
            let param_list = self.tables.rows(TableId::Param) + 1;
            let row = self.tables.push(
                TableId::MethodDef,
                vec![
                    rva,
                    u32::from(data.impl_attributes.bits()),
                    u32::from(data.attributes.bits()),
                    name,
                    signature,
                    param_list,
                ],
            );
            let token = Token::from_parts(TableId::MethodDef, row);
            trace!("MethodDef {} '{}' at {:#x}", row, data.name, rva);

            for (position, param) in data.params.iter().enumerate() {
                let Some(param) = param else {
                    continue;
                };
                let name = match &param.name {
                    Some(name) => self.string(name),
                    None => 0,
                };
                #[allow(clippy::cast_possible_truncation)]
                let param_row = self.tables.push(
                    TableId::Param,
                    vec![u32::from(param.attributes.bits()), position as u32, name],
                );
                self.param_rows.insert((id, position), param_row);
                let param_token = Token::from_parts(TableId::Param, param_row);
                if let Some(constant) = &param.constant {
                    self.write_constant(param_token, constant)?;
                }
                if let Some(marshal) = &param.marshal {
                    self.write_marshal(param_token, marshal)?;
                }
                self.collect_attributes(param_token, &param.custom_attributes);
            }

            if let Some(pinvoke) = &data.pinvoke {
                let scope = asm
                    .module_data(self.module)?
                    .tokens
                    .module_ref(&pinvoke.dll_name);
                let forwarded = Self::coded(CodedIndexType::MemberForwarded, token)?;
                let entry = self.string(&pinvoke.entry_name);
                self.tables.push(
                    TableId::ImplMap,
                    vec![
                        u32::from(pinvoke.attributes.bits()),
                        forwarded,
                        entry,
                        scope.row(),
                    ],
                );
            }
            self.write_security(token, &data.security)?;
            self.collect_attributes(token, &data.custom_attributes);
        }
        Ok(())
    }

    fn write_semantics(&mut self, owner: Token, kind: MethodSemanticsKind, method: MethodId) -> Result<()> {
        let method = self.layout.method_row(self.asm, method)?;
        let owner = Self::coded(CodedIndexType::HasSemantics, owner)?;
        self.tables.push(
            TableId::MethodSemantics,
            vec![u32::from(kind as u16), method, owner],
        );
        Ok(())
    }

    fn write_properties_and_events(&mut self) -> Result<()> {
        let asm = self.asm;
        for id in self.layout.types.clone() {
            let data = asm.type_data(id)?;
            let type_row = asm.type_def_token(id)?.row();

            if !data.properties.is_empty() {
                let first = self.tables.rows(TableId::Property) + 1;
                self.tables.push(TableId::PropertyMap, vec![type_row, first]);
            }
            for property in &data.properties {
                let property_data = asm.property_data(*property)?;
                let signature = asm.property_signature_blob(
                    self.module,
                    property_data.has_this,
                    &property_data.property_type,
                    &property_data.parameters,
                )?;
                let name = self.string(&property_data.name);
                let signature = self.blob(&signature)?;
                let row = self.tables.push(
                    TableId::Property,
                    vec![u32::from(property_data.attributes.bits()), name, signature],
                );
                self.property_rows.insert(*property, row);
                let token = Token::from_parts(TableId::Property, row);

                if let Some(setter) = property_data.setter {
                    self.write_semantics(token, MethodSemanticsKind::Setter, setter)?;
                }
                if let Some(getter) = property_data.getter {
                    self.write_semantics(token, MethodSemanticsKind::Getter, getter)?;
                }
                for other in &property_data.others {
                    self.write_semantics(token, MethodSemanticsKind::Other, *other)?;
                }
                if let Some(constant) = &property_data.constant {
                    self.write_constant(token, constant)?;
                }
                self.collect_attributes(token, &property_data.custom_attributes);
            }

            if !data.events.is_empty() {
                let first = self.tables.rows(TableId::Event) + 1;
                self.tables.push(TableId::EventMap, vec![type_row, first]);
            }
            for event in &data.events {
                let event_data = asm.event_data(*event)?;
                let event_type = Self::coded(
                    CodedIndexType::TypeDefOrRef,
                    self.type_token(&event_data.event_type)?,
                )?;
                let name = self.string(&event_data.name);
                let row = self.tables.push(
                    TableId::Event,
                    vec![u32::from(event_data.attributes.bits()), name, event_type],
                );
                self.event_rows.insert(*event, row);
                let token = Token::from_parts(TableId::Event, row);

                if let Some(add_on) = event_data.add_on {
                    self.write_semantics(token, MethodSemanticsKind::AddOn, add_on)?;
                }
                if let Some(remove_on) = event_data.remove_on {
                    self.write_semantics(token, MethodSemanticsKind::RemoveOn, remove_on)?;
                }
                if let Some(raise) = event_data.raise {
                    self.write_semantics(token, MethodSemanticsKind::Fire, raise)?;
                }
                for other in &event_data.others {
                    self.write_semantics(token, MethodSemanticsKind::Other, *other)?;
                }
                self.collect_attributes(token, &event_data.custom_attributes);
            }
        }
        Ok(())
    }

    /// `GenericParam` rows must be sorted by owner and number before anything refers to
    /// them, so they are numbered here rather than by the final sort pass.
    fn write_generic_params(&mut self) -> Result<()> {
        let asm = self.asm;
        let mut entries: Vec<(u32, u32, GenericParamId)> = Vec::new();
        for id in &self.layout.types {
            let owner = Self::coded(CodedIndexType::TypeOrMethodDef, asm.type_def_token(*id)?)?;
            for param in &asm.type_data(*id)?.generic_params {
                entries.push((owner, asm.generic_param_data(*param)?.position, *param));
            }
        }
        for (index, id) in self.layout.methods.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let token = Token::from_parts(TableId::MethodDef, index as u32 + 1);
            let owner = Self::coded(CodedIndexType::TypeOrMethodDef, token)?;
            for param in &asm.method_data(*id)?.generic_params {
                entries.push((owner, asm.generic_param_data(*param)?.position, *param));
            }
        }
        entries.sort_by_key(|(owner, number, _)| (*owner, *number));

        for (owner, number, id) in &entries {
            let data = asm.generic_param_data(*id)?;
            let name = self.string(&data.name);
            let row = self.tables.push(
                TableId::GenericParam,
                vec![*number, u32::from(data.attributes.bits()), *owner, name],
            );
            self.generic_param_rows.insert(*id, row);
        }

        for (_, _, id) in entries {
            let data = asm.generic_param_data(id)?;
            let row = self.generic_param_rows[&id];
            let constraints = data
                .base_constraint
                .iter()
                .chain(data.interface_constraints.iter());
            for constraint in constraints {
                let constraint =
                    Self::coded(CodedIndexType::TypeDefOrRef, self.type_token(constraint)?)?;
                self.tables
                    .push(TableId::GenericParamConstraint, vec![row, constraint]);
            }
            self.collect_attributes(
                Token::from_parts(TableId::GenericParam, row),
                &data.custom_attributes,
            );
        }
        Ok(())
    }

    fn identity_blob(&mut self, name: &AssemblyName, reference: bool) -> Result<(u32, u32)> {
        let mut flags = name.flags;
        let key: Vec<u8> = match (&name.public_key, name.token) {
            (Some(public_key), _) => {
                flags |= AssemblyFlags::PUBLIC_KEY;
                public_key.clone()
            }
            (None, Some(token)) if reference => token.to_vec(),
            _ => Vec::new(),
        };
        Ok((flags.bits(), self.blob(&key)?))
    }

    fn write_manifest(&mut self, files: &[ModuleFile]) -> Result<()> {
        let asm = self.asm;
        let name = &asm.name;
        let (flags, public_key) = self.identity_blob(name, false)?;
        let simple_name = self.string(&name.name);
        let culture = self.string(name.culture.as_deref().unwrap_or(""));
        self.tables.push(
            TableId::Assembly,
            vec![
                name.hash_algorithm as u32,
                u32::from(name.version.major),
                u32::from(name.version.minor),
                u32::from(name.version.build),
                u32::from(name.version.revision),
                flags,
                public_key,
                simple_name,
                culture,
            ],
        );
        let assembly = Token::from_parts(TableId::Assembly, 1);
        self.write_security(assembly, &asm.security)?;
        self.collect_attributes(assembly, &asm.custom_attributes);

        let mut file_rows = HashMap::new();
        for file in files {
            let name = self.string(&file.file_name);
            let hash = self.blob(&file.hash)?;
            let row = self.tables.push(
                TableId::File,
                vec![FileAttributes::CONTAINS_METADATA.bits(), name, hash],
            );
            file_rows.insert(file.module, row);
        }

        for file in files {
            let module_data = asm.module_data(file.module)?;
            let file_token = Token::from_parts(TableId::File, file_rows[&file.module]);
            let mut exported: HashMap<crate::emit::TypeId, u32> = HashMap::new();
            for id in &module_data.types {
                let data = asm.type_data(*id)?;
                if data.is_global {
                    continue;
                }
                let implementation = match data.declaring {
                    None if data.attributes.visibility() == TypeAttributes::PUBLIC.bits() => {
                        file_token
                    }
                    Some(declaring)
                        if data.attributes.visibility()
                            == TypeAttributes::NESTED_PUBLIC.bits() =>
                    {
                        match exported.get(&declaring) {
                            Some(row) => Token::from_parts(TableId::ExportedType, *row),
                            None => continue,
                        }
                    }
                    _ => continue,
                };
                let implementation = Self::coded(CodedIndexType::Implementation, implementation)?;
                let name = self.string(&data.name);
                let namespace = self.string(&data.namespace);
                let row = self.tables.push(
                    TableId::ExportedType,
                    vec![
                        data.attributes.bits(),
                        asm.type_def_token(*id)?.value(),
                        name,
                        namespace,
                        implementation,
                    ],
                );
                exported.insert(*id, row);
            }
        }

        let own = asm.module_data(self.module)?;
        for (resource, offset) in own.resources.iter().zip(resource_offsets(&own.resources)) {
            let name = self.string(&resource.name);
            self.tables.push(
                TableId::ManifestResource,
                vec![offset, resource.attributes.bits(), name, 0],
            );
        }
        for file in files {
            let module_data = asm.module_data(file.module)?;
            let implementation = Self::coded(
                CodedIndexType::Implementation,
                Token::from_parts(TableId::File, file_rows[&file.module]),
            )?;
            for (resource, offset) in module_data
                .resources
                .iter()
                .zip(resource_offsets(&module_data.resources))
            {
                let name = self.string(&resource.name);
                self.tables.push(
                    TableId::ManifestResource,
                    vec![offset, resource.attributes.bits(), name, implementation],
                );
            }
        }

        for linked in &asm.linked_resources {
            let file_name = self.string(&linked.file_name);
            let hash = self.blob(&linked.hash)?;
            let file_row = self.tables.push(
                TableId::File,
                vec![FileAttributes::CONTAINS_NO_METADATA.bits(), file_name, hash],
            );
            let implementation = Self::coded(
                CodedIndexType::Implementation,
                Token::from_parts(TableId::File, file_row),
            )?;
            let name = self.string(&linked.name);
            self.tables.push(
                TableId::ManifestResource,
                vec![0, linked.attributes.bits(), name, implementation],
            );
        }
        Ok(())
    }

    fn entry_point_token(&self, files: &[ModuleFile]) -> Result<u32> {
        let Some(method) = self.asm.entry_point else {
            return Ok(0);
        };
        let module = self.asm.method_module(method)?;
        if module == self.module {
            let row = self.layout.method_row(self.asm, method)?;
            return Ok(Token::from_parts(TableId::MethodDef, row).value());
        }
        match files.iter().position(|file| file.module == module) {
            #[allow(clippy::cast_possible_truncation)]
            Some(index) => Ok(Token::from_parts(TableId::File, index as u32 + 1).value()),
            None => Err(invalid_operation!(
                "The entry point is defined in a transient module"
            )),
        }
    }

    fn write_custom_attributes(&mut self) -> Result<()> {
        let attributes = std::mem::take(&mut self.custom_attributes);
        for (parent, attribute) in attributes {
            let constructor = self.asm.method_token(self.module, &attribute.constructor)?;
            let constructor = Self::coded(
                CodedIndexType::CustomAttributeType,
                self.layout.remap(constructor)?,
            )?;
            let parent = Self::coded(CodedIndexType::HasCustomAttribute, parent)?;
            let blob = self.blob(&attribute.blob)?;
            self.tables
                .push(TableId::CustomAttribute, vec![parent, constructor, blob]);
        }
        Ok(())
    }

    /// Copy the interned reference rows. Must run after every definition row is built.
    fn write_references(&mut self) -> Result<()> {
        let tokens = &self.asm.module_data(self.module)?.tokens;

        for type_ref in tokens.type_refs() {
            let scope = Self::coded(CodedIndexType::ResolutionScope, type_ref.scope)?;
            let name = self.string(&type_ref.name);
            let namespace = self.string(&type_ref.namespace);
            self.tables
                .push(TableId::TypeRef, vec![scope, name, namespace]);
        }
        for signature in tokens.type_specs() {
            let signature = self.blob(&signature)?;
            self.tables.push(TableId::TypeSpec, vec![signature]);
        }
        for member_ref in tokens.member_refs() {
            let parent = Self::coded(
                CodedIndexType::MemberRefParent,
                self.layout.remap(member_ref.parent)?,
            )?;
            let name = self.string(&member_ref.name);
            let signature = self.blob(&member_ref.signature)?;
            self.tables
                .push(TableId::MemberRef, vec![parent, name, signature]);
        }
        for method_spec in tokens.method_specs() {
            let method = Self::coded(
                CodedIndexType::MethodDefOrRef,
                self.layout.remap(method_spec.method)?,
            )?;
            let instantiation = self.blob(&method_spec.instantiation)?;
            self.tables
                .push(TableId::MethodSpec, vec![method, instantiation]);
        }
        for signature in tokens.standalone_sigs() {
            let signature = self.blob(&signature)?;
            self.tables.push(TableId::StandAloneSig, vec![signature]);
        }
        for module_ref in tokens.module_refs() {
            let name = self.string(&module_ref);
            self.tables.push(TableId::ModuleRef, vec![name]);
        }
        for assembly_ref in tokens.assembly_refs() {
            let (flags, key) = self.identity_blob(&assembly_ref, true)?;
            let name = self.string(&assembly_ref.name);
            let culture = self.string(assembly_ref.culture.as_deref().unwrap_or(""));
            let hash = self.blob(&[])?;
            self.tables.push(
                TableId::AssemblyRef,
                vec![
                    u32::from(assembly_ref.version.major),
                    u32::from(assembly_ref.version.minor),
                    u32::from(assembly_ref.version.build),
                    u32::from(assembly_ref.version.revision),
                    flags,
                    key,
                    name,
                    culture,
                    hash,
                ],
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::flags::ResourceAttributes;

    #[test]
    fn resources_are_length_prefixed_and_aligned() {
        let resources = vec![
            EmbeddedResource {
                name: "a".into(),
                attributes: ResourceAttributes::PUBLIC,
                data: vec![1, 2, 3],
            },
            EmbeddedResource {
                name: "b".into(),
                attributes: ResourceAttributes::PRIVATE,
                data: vec![4; 9],
            },
        ];
        assert_eq!(resource_offsets(&resources), vec![0, 8]);
        let blob = resource_blob(&resources);
        assert_eq!(blob.len(), 8 + 16);
        assert_eq!(&blob[..7], &[3, 0, 0, 0, 1, 2, 3]);
        assert_eq!(&blob[8..12], &9_u32.to_le_bytes());
    }
}
