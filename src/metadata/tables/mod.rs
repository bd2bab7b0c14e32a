//! Metadata table identities, coded indexes and row schemas.
//!
//! The writer and the loader share everything in this module: [`TableId`] names the 45
//! ECMA-335 tables, [`CodedIndexType`] describes the tagged unions that point into several
//! tables at once, [`TableInfo`] derives column widths from row counts and heap sizes, and
//! [`schema`] lists the columns of every table so that rows can be serialized and parsed
//! generically.

mod info;
pub mod schema;

pub use info::{
    TableInfo, TableRowInfo, HEAP_LARGE_BLOB, HEAP_LARGE_GUID, HEAP_LARGE_STRINGS,
};
pub use schema::{Column, RawRow, TableData};

use strum::{EnumCount, EnumIter};

use crate::{metadata::token::Token, Result};

/// Identifier of a metadata table, its value is the ECMA-335 table number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TableId {
    Module = 0x00,
    TypeRef = 0x01,
    TypeDef = 0x02,
    FieldPtr = 0x03,
    Field = 0x04,
    MethodPtr = 0x05,
    MethodDef = 0x06,
    ParamPtr = 0x07,
    Param = 0x08,
    InterfaceImpl = 0x09,
    MemberRef = 0x0A,
    Constant = 0x0B,
    CustomAttribute = 0x0C,
    FieldMarshal = 0x0D,
    DeclSecurity = 0x0E,
    ClassLayout = 0x0F,
    FieldLayout = 0x10,
    StandAloneSig = 0x11,
    EventMap = 0x12,
    EventPtr = 0x13,
    Event = 0x14,
    PropertyMap = 0x15,
    PropertyPtr = 0x16,
    Property = 0x17,
    MethodSemantics = 0x18,
    MethodImpl = 0x19,
    ModuleRef = 0x1A,
    TypeSpec = 0x1B,
    ImplMap = 0x1C,
    FieldRVA = 0x1D,
    EncLog = 0x1E,
    EncMap = 0x1F,
    Assembly = 0x20,
    AssemblyProcessor = 0x21,
    AssemblyOS = 0x22,
    AssemblyRef = 0x23,
    AssemblyRefProcessor = 0x24,
    AssemblyRefOS = 0x25,
    File = 0x26,
    ExportedType = 0x27,
    ManifestResource = 0x28,
    NestedClass = 0x29,
    GenericParam = 0x2A,
    MethodSpec = 0x2B,
    GenericParamConstraint = 0x2C,
}

impl TableId {
    /// Map a raw table number to its id.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<TableId> {
        use strum::IntoEnumIterator;

        TableId::iter().find(|id| *id as u8 == value)
    }

    /// Returns true if ECMA-335 II.22 requires this table to be sorted by its primary key.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        matches!(
            self,
            TableId::InterfaceImpl
                | TableId::Constant
                | TableId::CustomAttribute
                | TableId::FieldMarshal
                | TableId::DeclSecurity
                | TableId::ClassLayout
                | TableId::FieldLayout
                | TableId::MethodSemantics
                | TableId::MethodImpl
                | TableId::ImplMap
                | TableId::FieldRVA
                | TableId::NestedClass
                | TableId::GenericParam
                | TableId::GenericParamConstraint
        )
    }
}

/// The coded index kinds of ECMA-335 II.24.2.6.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
#[allow(missing_docs)]
pub enum CodedIndexType {
    TypeDefOrRef,
    HasConstant,
    HasCustomAttribute,
    HasFieldMarshal,
    HasDeclSecurity,
    MemberRefParent,
    HasSemantics,
    MethodDefOrRef,
    MemberForwarded,
    Implementation,
    CustomAttributeType,
    ResolutionScope,
    TypeOrMethodDef,
}

impl CodedIndexType {
    /// The tables this coded index can point to, in tag order.
    #[must_use]
    pub fn tables(&self) -> &'static [TableId] {
        match self {
            CodedIndexType::TypeDefOrRef => {
                &[TableId::TypeDef, TableId::TypeRef, TableId::TypeSpec]
            }
            CodedIndexType::HasConstant => &[TableId::Field, TableId::Param, TableId::Property],
            CodedIndexType::HasCustomAttribute => &[
                TableId::MethodDef,
                TableId::Field,
                TableId::TypeRef,
                TableId::TypeDef,
                TableId::Param,
                TableId::InterfaceImpl,
                TableId::MemberRef,
                TableId::Module,
                TableId::DeclSecurity, // 'Permission' in the standard, no such table exists
                TableId::Property,
                TableId::Event,
                TableId::StandAloneSig,
                TableId::ModuleRef,
                TableId::TypeSpec,
                TableId::Assembly,
                TableId::AssemblyRef,
                TableId::File,
                TableId::ExportedType,
                TableId::ManifestResource,
                TableId::GenericParam,
                TableId::GenericParamConstraint,
                TableId::MethodSpec,
            ],
            CodedIndexType::HasFieldMarshal => &[TableId::Field, TableId::Param],
            CodedIndexType::HasDeclSecurity => {
                &[TableId::TypeDef, TableId::MethodDef, TableId::Assembly]
            }
            CodedIndexType::MemberRefParent => &[
                TableId::TypeDef,
                TableId::TypeRef,
                TableId::ModuleRef,
                TableId::MethodDef,
                TableId::TypeSpec,
            ],
            CodedIndexType::HasSemantics => &[TableId::Event, TableId::Property],
            CodedIndexType::MethodDefOrRef => &[TableId::MethodDef, TableId::MemberRef],
            CodedIndexType::MemberForwarded => &[TableId::Field, TableId::MethodDef],
            CodedIndexType::Implementation => {
                &[TableId::File, TableId::AssemblyRef, TableId::ExportedType]
            }
            // Tags 0, 1 and 4 are unused; only 2 (MethodDef) and 3 (MemberRef) are emitted
            CodedIndexType::CustomAttributeType => &[
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MethodDef,
                TableId::MemberRef,
                TableId::MemberRef,
            ],
            CodedIndexType::ResolutionScope => &[
                TableId::Module,
                TableId::ModuleRef,
                TableId::AssemblyRef,
                TableId::TypeRef,
            ],
            CodedIndexType::TypeOrMethodDef => &[TableId::TypeDef, TableId::MethodDef],
        }
    }

    /// Number of low bits used for the tag.
    #[must_use]
    pub fn tag_bits(&self) -> u8 {
        let count = self.tables().len() as u32;
        #[allow(clippy::cast_possible_truncation)]
        let bits = (32 - (count - 1).leading_zeros()) as u8;
        bits
    }

    /// The tag value used when this coded index points into `table`.
    #[must_use]
    pub fn tag_of(&self, table: TableId) -> Option<u32> {
        if *self == CodedIndexType::CustomAttributeType {
            return match table {
                TableId::MethodDef => Some(2),
                TableId::MemberRef => Some(3),
                _ => None,
            };
        }

        self.tables()
            .iter()
            .position(|candidate| *candidate == table)
            .map(|position| position as u32)
    }

    /// Encode a token as a coded index value.
    ///
    /// A null token encodes as 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the token's table is not a member of
    /// this coded index.
    pub fn encode(&self, token: Token) -> Result<u32> {
        if token.is_null() {
            return Ok(0);
        }

        let Some(tag) = token.table_id().and_then(|table| self.tag_of(table)) else {
            return Err(invalid_argument!(
                "token",
                "Token {} can not be encoded as {:?}",
                token,
                self
            ));
        };

        Ok((token.row() << self.tag_bits()) | tag)
    }

    /// Decode a coded index value into a token, 0 decodes to the null token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag is out of range.
    pub fn decode(&self, value: u32) -> Result<Token> {
        let bits = self.tag_bits();
        let tag = value & ((1 << bits) - 1);
        let row = value >> bits;
        if row == 0 {
            return Ok(Token::new(0));
        }

        match self.tables().get(tag as usize) {
            Some(table) => Ok(Token::from_parts(*table, row)),
            None => Err(malformed_error!(
                "Coded index {:?} has an invalid tag - {}",
                self,
                tag
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ids() {
        assert_eq!(TableId::from_u8(0x2C), Some(TableId::GenericParamConstraint));
        assert_eq!(TableId::from_u8(0x2D), None);
        assert_eq!(TableId::COUNT, 45);
        assert!(TableId::NestedClass.is_sorted());
        assert!(!TableId::TypeDef.is_sorted());
    }

    #[test]
    fn tag_bits() {
        assert_eq!(CodedIndexType::TypeDefOrRef.tag_bits(), 2);
        assert_eq!(CodedIndexType::HasCustomAttribute.tag_bits(), 5);
        assert_eq!(CodedIndexType::CustomAttributeType.tag_bits(), 3);
        assert_eq!(CodedIndexType::MethodDefOrRef.tag_bits(), 1);
        assert_eq!(CodedIndexType::ResolutionScope.tag_bits(), 2);
    }

    #[test]
    fn encode_decode() {
        let token = Token::from_parts(TableId::TypeRef, 7);
        let value = CodedIndexType::TypeDefOrRef.encode(token).unwrap();
        assert_eq!(value, (7 << 2) | 1);
        assert_eq!(CodedIndexType::TypeDefOrRef.decode(value).unwrap(), token);

        let ctor = Token::from_parts(TableId::MemberRef, 2);
        let value = CodedIndexType::CustomAttributeType.encode(ctor).unwrap();
        assert_eq!(value, (2 << 3) | 3);
        assert_eq!(CodedIndexType::CustomAttributeType.decode(value).unwrap(), ctor);

        assert!(CodedIndexType::HasConstant
            .encode(Token::from_parts(TableId::TypeDef, 1))
            .is_err());
        assert_eq!(CodedIndexType::HasConstant.encode(Token::new(0)).unwrap(), 0);
    }
}
