//! Column layout of every metadata table (ECMA-335 II.22).
//!
//! Rows are handled generically as a list of `u32` column values. A heap column holds the
//! heap offset, a table column the 1-based row, and a coded index column the already
//! encoded coded index value. The writer and the loader both go through
//! [`write_row`] / [`read_row`], so the two sides cannot disagree on a layout.

use crate::{
    file::io::{read_le_at, read_le_at_dyn, WriteLe},
    metadata::tables::{CodedIndexType, TableId, TableInfo},
    Result,
};

/// One column of a metadata table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Fixed 2-byte value (a 1-byte value plus padding is also stored this way)
    U16,
    /// Fixed 4-byte value
    U32,
    /// Offset into `#Strings`
    Str,
    /// Index into `#GUID`
    Guid,
    /// Offset into `#Blob`
    Blob,
    /// Row index into one table
    Index(TableId),
    /// Coded index into one of several tables
    Coded(CodedIndexType),
}

impl Column {
    /// Returns true if the column is 4 bytes wide for the given stream layout.
    #[must_use]
    pub fn is_large(&self, info: &TableInfo) -> bool {
        match self {
            Column::U16 => false,
            Column::U32 => true,
            Column::Str => info.is_large_str(),
            Column::Guid => info.is_large_guid(),
            Column::Blob => info.is_large_blob(),
            Column::Index(table) => info.is_large(*table),
            Column::Coded(coded) => info.is_large_coded(*coded),
        }
    }
}

/// The column values of one row.
pub type RawRow = Vec<u32>;

/// The columns of `table`, in physical order.
#[must_use]
pub fn columns(table: TableId) -> &'static [Column] {
    use Column::{Blob, Coded, Guid, Index, Str, U16, U32};
    use CodedIndexType as C;

    match table {
        TableId::Module => &[U16, Str, Guid, Guid, Guid],
        TableId::TypeRef => &[Coded(C::ResolutionScope), Str, Str],
        TableId::TypeDef => &[
            U32,
            Str,
            Str,
            Coded(C::TypeDefOrRef),
            Index(TableId::Field),
            Index(TableId::MethodDef),
        ],
        TableId::FieldPtr => &[Index(TableId::Field)],
        TableId::Field => &[U16, Str, Blob],
        TableId::MethodPtr => &[Index(TableId::MethodDef)],
        TableId::MethodDef => &[U32, U16, U16, Str, Blob, Index(TableId::Param)],
        TableId::ParamPtr => &[Index(TableId::Param)],
        TableId::Param => &[U16, U16, Str],
        TableId::InterfaceImpl => &[Index(TableId::TypeDef), Coded(C::TypeDefOrRef)],
        TableId::MemberRef => &[Coded(C::MemberRefParent), Str, Blob],
        TableId::Constant => &[U16, Coded(C::HasConstant), Blob],
        TableId::CustomAttribute => &[
            Coded(C::HasCustomAttribute),
            Coded(C::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(C::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16, Coded(C::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16, U32, Index(TableId::TypeDef)],
        TableId::FieldLayout => &[U32, Index(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Index(TableId::TypeDef), Index(TableId::Event)],
        TableId::EventPtr => &[Index(TableId::Event)],
        TableId::Event => &[U16, Str, Coded(C::TypeDefOrRef)],
        TableId::PropertyMap => &[Index(TableId::TypeDef), Index(TableId::Property)],
        TableId::PropertyPtr => &[Index(TableId::Property)],
        TableId::Property => &[U16, Str, Blob],
        TableId::MethodSemantics => &[U16, Index(TableId::MethodDef), Coded(C::HasSemantics)],
        TableId::MethodImpl => &[
            Index(TableId::TypeDef),
            Coded(C::MethodDefOrRef),
            Coded(C::MethodDefOrRef),
        ],
        TableId::ModuleRef => &[Str],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[U16, Coded(C::MemberForwarded), Str, Index(TableId::ModuleRef)],
        TableId::FieldRVA => &[U32, Index(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[U32, U16, U16, U16, U16, U32, Blob, Str, Str],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOS => &[U32, U32, U32],
        TableId::AssemblyRef => &[U16, U16, U16, U16, U32, Blob, Str, Str, Blob],
        TableId::AssemblyRefProcessor => &[U32, Index(TableId::AssemblyRef)],
        TableId::AssemblyRefOS => &[U32, U32, U32, Index(TableId::AssemblyRef)],
        TableId::File => &[U32, Str, Blob],
        TableId::ExportedType => &[U32, U32, Str, Str, Coded(C::Implementation)],
        TableId::ManifestResource => &[U32, U32, Str, Coded(C::Implementation)],
        TableId::NestedClass => &[Index(TableId::TypeDef), Index(TableId::TypeDef)],
        TableId::GenericParam => &[U16, U16, Coded(C::TypeOrMethodDef), Str],
        TableId::MethodSpec => &[Coded(C::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => {
            &[Index(TableId::GenericParam), Coded(C::TypeDefOrRef)]
        }
    }
}

/// Size in bytes of one row of `table`.
#[must_use]
pub fn row_size(table: TableId, info: &TableInfo) -> usize {
    columns(table)
        .iter()
        .map(|column| if column.is_large(info) { 4 } else { 2 })
        .sum()
}

/// Serialize one row.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if the row has the wrong number of columns or a
/// value does not fit its column.
pub fn write_row(buffer: &mut Vec<u8>, table: TableId, row: &[u32], info: &TableInfo) -> Result<()> {
    let layout = columns(table);
    if layout.len() != row.len() {
        return Err(malformed_error!(
            "Row of {:?} has {} columns, expected {}",
            table,
            row.len(),
            layout.len()
        ));
    }

    for (column, value) in layout.iter().zip(row) {
        let is_large = column.is_large(info);
        if !is_large && *value > u32::from(u16::MAX) {
            return Err(malformed_error!(
                "Value {:#x} does not fit the 2-byte {:?} column of {:?}",
                value,
                column,
                table
            ));
        }
        buffer.write_le_dyn(*value, is_large);
    }

    Ok(())
}

/// Parse one row at `offset`, advancing it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the data is truncated.
pub fn read_row(data: &[u8], offset: &mut usize, table: TableId, info: &TableInfo) -> Result<RawRow> {
    columns(table)
        .iter()
        .map(|column| match column {
            Column::U32 => read_le_at::<u32>(data, offset),
            other => read_le_at_dyn(data, offset, other.is_large(info)),
        })
        .collect()
}

/// All rows of one table.
#[derive(Debug, Clone)]
pub struct TableData {
    /// The table
    pub table: TableId,
    /// Rows in physical order, row `n` lives at index `n - 1`
    pub rows: Vec<RawRow>,
}

impl TableData {
    /// An empty table.
    #[must_use]
    pub fn new(table: TableId) -> Self {
        TableData {
            table,
            rows: Vec::new(),
        }
    }

    /// Append a row and return its 1-based index.
    pub fn push(&mut self, row: RawRow) -> u32 {
        self.rows.push(row);
        self.rows.len() as u32
    }

    /// The 1-based row `rid`.
    #[must_use]
    pub fn get(&self, rid: u32) -> Option<&RawRow> {
        rid.checked_sub(1).and_then(|index| self.rows.get(index as usize))
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::EnumCount;

    #[test]
    fn typedef_row() {
        let mut counts = [0_u32; TableId::COUNT];
        counts[TableId::TypeDef as usize] = 2;
        let info = TableInfo::new(&counts, 0);

        assert_eq!(row_size(TableId::TypeDef, &info), 4 + 2 + 2 + 2 + 2 + 2);

        let row = vec![0x0010_0001, 1, 5, 0x09, 1, 1];
        let mut buffer = Vec::new();
        write_row(&mut buffer, TableId::TypeDef, &row, &info).unwrap();
        assert_eq!(buffer.len(), row_size(TableId::TypeDef, &info));

        let mut offset = 0;
        let parsed = read_row(&buffer, &mut offset, TableId::TypeDef, &info).unwrap();
        assert_eq!(parsed, row);
        assert_eq!(offset, buffer.len());
    }

    #[test]
    fn rejects_wrong_shape() {
        let counts = [0_u32; TableId::COUNT];
        let info = TableInfo::new(&counts, 0);
        let mut buffer = Vec::new();
        assert!(write_row(&mut buffer, TableId::Field, &[1, 2], &info).is_err());
        assert!(write_row(&mut buffer, TableId::Field, &[1, 0x1_0000, 2], &info).is_err());
    }

    #[test]
    fn table_data() {
        let mut data = TableData::new(TableId::ModuleRef);
        assert!(data.is_empty());
        assert_eq!(data.push(vec![10]), 1);
        assert_eq!(data.push(vec![20]), 2);
        assert_eq!(data.get(2), Some(&vec![20]));
        assert_eq!(data.get(0), None);
    }
}
