//! Name resolution and custom attribute decoding over the raw tables.

use std::collections::HashMap;

use log::warn;

use crate::{
    loader::{model::LoadedCustomAttribute, raw::RawMetadata},
    metadata::{
        customattributes::{parse_custom_attribute, CaType, CustomAttributeValue},
        flags::FieldAttributes,
        signatures::{
            parse_field_signature, parse_method_signature, parse_type_spec_signature,
            TypeSignature,
        },
        tables::{CodedIndexType, TableId},
        token::Token,
    },
    Result,
};

/// Lookups shared by every part of the typed view.
pub(crate) struct Context<'a> {
    pub md: &'a RawMetadata,
    /// Nested `TypeDef` row to enclosing row
    enclosing: HashMap<u32, u32>,
    /// `TypeDef` row owning each `MethodDef` row, at index `row - 1`
    method_owner: Vec<u32>,
    /// `TypeDef` row owning each `Field` row, at index `row - 1`
    field_owner: Vec<u32>,
}

impl<'a> Context<'a> {
    pub fn new(md: &'a RawMetadata) -> Self {
        let mut enclosing = HashMap::new();
        for row in md.rows(TableId::NestedClass) {
            enclosing.insert(row[0], row[1]);
        }

        let mut method_owner = vec![0; md.row_count(TableId::MethodDef) as usize];
        let mut field_owner = vec![0; md.row_count(TableId::Field) as usize];
        for index in 0..md.rows(TableId::TypeDef).len() {
            #[allow(clippy::cast_possible_truncation)]
            let owner = index as u32 + 1;
            let (first, end) = md.list_range(TableId::TypeDef, 5, TableId::MethodDef, index);
            for row in first..end {
                method_owner[row as usize - 1] = owner;
            }
            let (first, end) = md.list_range(TableId::TypeDef, 4, TableId::Field, index);
            for row in first..end {
                field_owner[row as usize - 1] = owner;
            }
        }

        Context {
            md,
            enclosing,
            method_owner,
            field_owner,
        }
    }

    /// Enclosing `TypeDef` row of a nested type.
    pub fn enclosing(&self, type_row: u32) -> Option<u32> {
        self.enclosing.get(&type_row).copied()
    }

    /// The `TypeDef` declaring a method or field definition.
    pub fn declaring_type(&self, member: Token) -> Option<Token> {
        let owners = match member.table_id() {
            Some(TableId::MethodDef) => &self.method_owner,
            Some(TableId::Field) => &self.field_owner,
            _ => return None,
        };
        owners
            .get((member.row() as usize).checked_sub(1)?)
            .filter(|row| **row != 0)
            .map(|row| Token::from_parts(TableId::TypeDef, *row))
    }

    /// Full name of a `TypeDef` row, nested types joined with `+`.
    pub fn type_def_name(&self, row: u32) -> Result<String> {
        let mut names = Vec::new();
        let mut current = row;
        loop {
            let data = self.md.row(Token::from_parts(TableId::TypeDef, current))?;
            let name = self.md.string(data[1])?;
            match self.enclosing(current) {
                Some(outer) if names.len() < 64 => {
                    names.push(name.to_string());
                    current = outer;
                }
                _ => {
                    let namespace = self.md.string(data[2])?;
                    names.push(qualify(namespace, name));
                    break;
                }
            }
        }
        names.reverse();
        Ok(names.join("+"))
    }

    /// Full name of a `TypeDef`, `TypeRef` or `TypeSpec`.
    pub fn type_name(&self, token: Token) -> Result<String> {
        match token.table_id() {
            Some(TableId::TypeDef) => self.type_def_name(token.row()),
            Some(TableId::TypeRef) => self.type_ref_name(token, 0),
            Some(TableId::TypeSpec) => {
                let row = self.md.row(token)?;
                let signature = parse_type_spec_signature(self.md.blob(row[0])?)?;
                self.signature_name(&signature)
            }
            _ => Err(malformed_error!("Token {} is not a type", token)),
        }
    }

    fn type_ref_name(&self, token: Token, depth: usize) -> Result<String> {
        let row = self.md.row(token)?;
        let name = self.md.string(row[1])?;
        let scope = CodedIndexType::ResolutionScope.decode(row[0])?;
        if scope.table_id() == Some(TableId::TypeRef) && depth < 64 {
            return Ok(format!("{}+{}", self.type_ref_name(scope, depth + 1)?, name));
        }
        Ok(qualify(self.md.string(row[2])?, name))
    }

    /// Display name of a signature type.
    pub fn signature_name(&self, signature: &TypeSignature) -> Result<String> {
        Ok(match signature {
            TypeSignature::Void => "System.Void".to_string(),
            TypeSignature::Boolean => "System.Boolean".to_string(),
            TypeSignature::Char => "System.Char".to_string(),
            TypeSignature::I1 => "System.SByte".to_string(),
            TypeSignature::U1 => "System.Byte".to_string(),
            TypeSignature::I2 => "System.Int16".to_string(),
            TypeSignature::U2 => "System.UInt16".to_string(),
            TypeSignature::I4 => "System.Int32".to_string(),
            TypeSignature::U4 => "System.UInt32".to_string(),
            TypeSignature::I8 => "System.Int64".to_string(),
            TypeSignature::U8 => "System.UInt64".to_string(),
            TypeSignature::R4 => "System.Single".to_string(),
            TypeSignature::R8 => "System.Double".to_string(),
            TypeSignature::String => "System.String".to_string(),
            TypeSignature::Object => "System.Object".to_string(),
            TypeSignature::I => "System.IntPtr".to_string(),
            TypeSignature::U => "System.UIntPtr".to_string(),
            TypeSignature::TypedByRef => "System.TypedReference".to_string(),
            TypeSignature::FnPtr(_) => "method*".to_string(),
            TypeSignature::ValueType(token) | TypeSignature::Class(token) => {
                self.type_name(*token)?
            }
            TypeSignature::GenericParamType(index) => format!("!{index}"),
            TypeSignature::GenericParamMethod(index) => format!("!!{index}"),
            TypeSignature::Ptr(pointer) => format!("{}*", self.signature_name(&pointer.base)?),
            TypeSignature::ByRef(inner) => format!("{}&", self.signature_name(inner)?),
            TypeSignature::Pinned(inner) => self.signature_name(inner)?,
            TypeSignature::SzArray(array) => format!("{}[]", self.signature_name(&array.base)?),
            TypeSignature::Array(array) => format!(
                "{}[{}]",
                self.signature_name(&array.base)?,
                ",".repeat(array.rank.saturating_sub(1) as usize)
            ),
            TypeSignature::GenericInst(base, arguments) => {
                let arguments = arguments
                    .iter()
                    .map(|argument| self.signature_name(argument))
                    .collect::<Result<Vec<_>>>()?;
                format!("{}[{}]", self.signature_name(base)?, arguments.join(","))
            }
        })
    }

    /// The `TypeDef` row with the given full name.
    pub fn find_type_def(&self, full_name: &str) -> Option<u32> {
        #[allow(clippy::cast_possible_truncation)]
        let count = self.md.rows(TableId::TypeDef).len() as u32;
        (1..=count).find(|row| {
            self.type_def_name(*row)
                .is_ok_and(|name| name == full_name)
        })
    }

    /// Underlying type of an enum defined in this module.
    pub fn enum_underlying(&self, token: Token) -> Option<CaType> {
        if token.table_id() != Some(TableId::TypeDef) {
            return None;
        }
        let row = self.md.row(token).ok()?;
        let base = CodedIndexType::TypeDefOrRef.decode(row[3]).ok()?;
        if base.is_null() || self.type_name(base).ok()? != "System.Enum" {
            return None;
        }

        let (first, end) =
            self.md
                .list_range(TableId::TypeDef, 4, TableId::Field, token.row() as usize - 1);
        for field in first..end {
            let data = self.md.row(Token::from_parts(TableId::Field, field)).ok()?;
            #[allow(clippy::cast_possible_truncation)]
            let flags = FieldAttributes::from_bits_retain(data[0] as u16);
            if flags.contains(FieldAttributes::STATIC) {
                continue;
            }
            let signature = parse_field_signature(self.md.blob(data[2]).ok()?).ok()?;
            return primitive_ca_type(&signature.base);
        }
        None
    }

    /// Serialization type of a constructor parameter.
    fn ca_type(&self, signature: &TypeSignature) -> Option<CaType> {
        match signature {
            TypeSignature::String => Some(CaType::String),
            TypeSignature::Object => Some(CaType::Boxed),
            TypeSignature::SzArray(array) => {
                Some(CaType::SzArray(Box::new(self.ca_type(&array.base)?)))
            }
            TypeSignature::Class(token) => {
                (self.type_name(*token).ok()? == "System.Type").then_some(CaType::Type)
            }
            TypeSignature::ValueType(token) => Some(CaType::Enum {
                name: self.type_name(*token).ok()?,
                underlying: Box::new(self.enum_underlying(*token)?),
            }),
            other => primitive_ca_type(other),
        }
    }

    /// The full name of the class declaring an attribute constructor.
    pub fn constructor_type(&self, constructor: Token) -> Result<String> {
        match constructor.table_id() {
            Some(TableId::MethodDef) => match self.declaring_type(constructor) {
                Some(owner) => self.type_name(owner),
                None => Err(malformed_error!("Method {} has no declaring type", constructor)),
            },
            Some(TableId::MemberRef) => {
                let row = self.md.row(constructor)?;
                let parent = CodedIndexType::MemberRefParent.decode(row[0])?;
                self.type_name(parent)
            }
            _ => Err(malformed_error!("Token {} is not a constructor", constructor)),
        }
    }

    /// Decode a value blob against the parameters of its constructor.
    pub fn decode_attribute(&self, constructor: Token, blob: &[u8]) -> Option<CustomAttributeValue> {
        let signature_blob = match constructor.table_id() {
            Some(TableId::MethodDef) => self.md.row(constructor).ok()?[4],
            Some(TableId::MemberRef) => self.md.row(constructor).ok()?[2],
            _ => return None,
        };
        let signature = parse_method_signature(self.md.blob(signature_blob).ok()?).ok()?;

        let mut param_types = Vec::with_capacity(signature.params.len());
        for param in &signature.params {
            let Some(ca_type) = self.ca_type(&param.base) else {
                warn!(
                    "Attribute constructor {} has a parameter type that can not be decoded",
                    constructor
                );
                return None;
            };
            param_types.push(ca_type);
        }

        let resolve_enum = |name: &str| {
            let simple = name.split(',').next().unwrap_or(name).trim();
            self.find_type_def(simple)
                .and_then(|row| self.enum_underlying(Token::from_parts(TableId::TypeDef, row)))
        };
        match parse_custom_attribute(blob, &param_types, &resolve_enum) {
            Ok(value) => Some(value),
            Err(error) => {
                warn!("Skipping undecodable attribute blob of {} - {}", constructor, error);
                None
            }
        }
    }

    /// Every attribute applied to `parent`, in table order.
    pub fn custom_attributes(
        &self,
        by_parent: &HashMap<Token, Vec<usize>>,
        parent: Token,
    ) -> Result<Vec<LoadedCustomAttribute>> {
        let Some(rows) = by_parent.get(&parent) else {
            return Ok(Vec::new());
        };
        let table = self.md.rows(TableId::CustomAttribute);
        let mut attributes = Vec::with_capacity(rows.len());
        for index in rows {
            let row = &table[*index];
            let constructor = CodedIndexType::CustomAttributeType.decode(row[1])?;
            let blob = self.md.blob(row[2])?;
            attributes.push(LoadedCustomAttribute {
                constructor,
                attribute_type: self.constructor_type(constructor)?,
                blob: blob.to_vec(),
                value: self.decode_attribute(constructor, blob),
            });
        }
        Ok(attributes)
    }
}

fn qualify(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}

fn primitive_ca_type(signature: &TypeSignature) -> Option<CaType> {
    Some(match signature {
        TypeSignature::Boolean => CaType::Boolean,
        TypeSignature::Char => CaType::Char,
        TypeSignature::I1 => CaType::I1,
        TypeSignature::U1 => CaType::U1,
        TypeSignature::I2 => CaType::I2,
        TypeSignature::U2 => CaType::U2,
        TypeSignature::I4 => CaType::I4,
        TypeSignature::U4 => CaType::U4,
        TypeSignature::I8 => CaType::I8,
        TypeSignature::U8 => CaType::U8,
        TypeSignature::R4 => CaType::R4,
        TypeSignature::R8 => CaType::R8,
        _ => return None,
    })
}
