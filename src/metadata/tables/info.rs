//! Column width calculation for the `#~` stream.
//!
//! The width of every index column in the metadata tables depends on how many rows the
//! referenced tables contain and on the sizes of the heaps. [`TableInfo`] captures those
//! inputs once, both when the writer lays out a module and when the loader parses one, and
//! answers "is this column 2 or 4 bytes wide" for simple indexes, coded indexes and heap
//! indexes.

use std::sync::Arc;

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::read_le_at,
    metadata::tables::{CodedIndexType, TableId},
    Result,
};

/// Row count of one table and the number of bits needed to index it.
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct TableRowInfo {
    /// Number of rows
    pub rows: u32,
    /// Bits required to represent every row index
    pub bits: u8,
    /// Indexes into this table need 4 bytes
    pub is_large: bool,
}

impl TableRowInfo {
    /// Create the info for a table with `rows` rows.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(rows: u32) -> Self {
        let bits = if rows == 0 {
            1
        } else {
            (32 - rows.leading_zeros()) as u8
        };

        Self {
            rows,
            bits,
            is_large: rows > u32::from(u16::MAX),
        }
    }
}

/// Row counts and heap size flags of one table stream.
#[derive(Clone, Default, Debug)]
pub struct TableInfo {
    rows: Vec<TableRowInfo>,
    coded_indexes: Vec<u8>,
    is_large_index_str: bool,
    is_large_index_guid: bool,
    is_large_index_blob: bool,
}

/// Shared reference to a [`TableInfo`].
pub type TableInfoRef = Arc<TableInfo>;

/// `HeapSizes` bit for 4-byte `#Strings` indexes
pub const HEAP_LARGE_STRINGS: u8 = 0x01;
/// `HeapSizes` bit for 4-byte `#GUID` indexes
pub const HEAP_LARGE_GUID: u8 = 0x02;
/// `HeapSizes` bit for 4-byte `#Blob` indexes
pub const HEAP_LARGE_BLOB: u8 = 0x04;

impl TableInfo {
    /// Parse the row counts following the fixed `#~` header.
    ///
    /// `data` starts at the beginning of the `#~` stream, `valid_bitvec` is its `Valid`
    /// field. Returns the info together with the offset of the first table row.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the stream is truncated.
    pub fn read(data: &[u8], valid_bitvec: u64) -> Result<(Self, usize)> {
        let mut counts = [0_u32; TableId::COUNT];
        let mut next_row_offset = 24;

        for bit in 0..64_u8 {
            if valid_bitvec & (1 << bit) == 0 {
                continue;
            }

            let row_count = read_le_at::<u32>(data, &mut next_row_offset)?;
            let Some(table_id) = TableId::from_u8(bit) else {
                return Err(malformed_error!(
                    "Table stream declares unknown table - {:#x}",
                    bit
                ));
            };
            counts[table_id as usize] = row_count;
        }

        let Some(heap_size_flags) = data.get(6) else {
            return Err(out_of_bounds_error!());
        };

        Ok((Self::new(&counts, *heap_size_flags), next_row_offset))
    }

    /// Create the info from explicit row counts (indexed by [`TableId`]) and heap flags.
    #[must_use]
    pub fn new(row_counts: &[u32; TableId::COUNT], heap_size_flags: u8) -> Self {
        let mut table_info = TableInfo {
            rows: row_counts.iter().map(|rows| TableRowInfo::new(*rows)).collect(),
            coded_indexes: vec![0; CodedIndexType::COUNT],
            is_large_index_str: heap_size_flags & HEAP_LARGE_STRINGS != 0,
            is_large_index_guid: heap_size_flags & HEAP_LARGE_GUID != 0,
            is_large_index_blob: heap_size_flags & HEAP_LARGE_BLOB != 0,
        };

        table_info.calculate_coded_index_bits();
        table_info
    }

    /// Row count of `table`.
    #[must_use]
    pub fn rows(&self, table: TableId) -> u32 {
        self.rows[table as usize].rows
    }

    /// The `Valid` bit vector: one bit per table that has rows.
    #[must_use]
    pub fn valid(&self) -> u64 {
        TableId::iter()
            .filter(|table| self.rows(*table) > 0)
            .fold(0, |valid, table| valid | (1_u64 << table as u8))
    }

    /// The `HeapSizes` byte.
    #[must_use]
    pub fn heap_size_flags(&self) -> u8 {
        let mut flags = 0;
        if self.is_large_index_str {
            flags |= HEAP_LARGE_STRINGS;
        }
        if self.is_large_index_guid {
            flags |= HEAP_LARGE_GUID;
        }
        if self.is_large_index_blob {
            flags |= HEAP_LARGE_BLOB;
        }
        flags
    }

    /// Returns true if indexes into `id` are 4 bytes wide.
    #[must_use]
    pub fn is_large(&self, id: TableId) -> bool {
        self.rows[id as usize].is_large
    }

    /// `#Strings` indexes are 4 bytes wide
    #[must_use]
    pub fn is_large_str(&self) -> bool {
        self.is_large_index_str
    }

    /// `#GUID` indexes are 4 bytes wide
    #[must_use]
    pub fn is_large_guid(&self) -> bool {
        self.is_large_index_guid
    }

    /// `#Blob` indexes are 4 bytes wide
    #[must_use]
    pub fn is_large_blob(&self) -> bool {
        self.is_large_index_blob
    }

    /// Returns true if a `coded_index_type` column needs 4 bytes.
    #[must_use]
    pub fn is_large_coded(&self, coded_index_type: CodedIndexType) -> bool {
        self.coded_indexes[coded_index_type as usize] > 16
    }

    fn calculate_coded_index_size(&self, coded_index_type: CodedIndexType) -> u8 {
        let max_bits = coded_index_type
            .tables()
            .iter()
            .map(|table| self.rows[*table as usize].bits)
            .max()
            .unwrap_or(1);

        max_bits + coded_index_type.tag_bits()
    }

    fn calculate_coded_index_bits(&mut self) {
        for coded_index in CodedIndexType::iter() {
            let size = self.calculate_coded_index_size(coded_index);
            self.coded_indexes[coded_index as usize] = size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_tables() {
        let mut counts = [0_u32; TableId::COUNT];
        counts[TableId::TypeDef as usize] = 3;
        counts[TableId::MethodDef as usize] = 10;
        let info = TableInfo::new(&counts, 0);

        assert!(!info.is_large(TableId::TypeDef));
        assert!(!info.is_large_coded(CodedIndexType::HasCustomAttribute));
        assert_eq!(
            info.valid(),
            (1 << TableId::TypeDef as u8) | (1 << TableId::MethodDef as u8)
        );
        assert_eq!(info.heap_size_flags(), 0);
    }

    #[test]
    fn large_coded_index() {
        let mut counts = [0_u32; TableId::COUNT];
        // 2^14 rows need 15 bits, plus 2 tag bits for TypeDefOrRef exceed 16
        counts[TableId::TypeRef as usize] = 1 << 14;
        let info = TableInfo::new(&counts, HEAP_LARGE_BLOB);

        assert!(!info.is_large(TableId::TypeRef));
        assert!(info.is_large_coded(CodedIndexType::TypeDefOrRef));
        assert!(!info.is_large_coded(CodedIndexType::MethodDefOrRef));
        assert!(info.is_large_blob());
        assert!(!info.is_large_str());
    }

    #[test]
    fn read_header() {
        let mut data = vec![0_u8; 24];
        data[6] = HEAP_LARGE_STRINGS;
        // Module and TypeDef present
        let valid = (1_u64 << 0x00) | (1_u64 << 0x02);
        data.extend_from_slice(&1_u32.to_le_bytes());
        data.extend_from_slice(&5_u32.to_le_bytes());

        let (info, offset) = TableInfo::read(&data, valid).unwrap();
        assert_eq!(offset, 32);
        assert_eq!(info.rows(TableId::Module), 1);
        assert_eq!(info.rows(TableId::TypeDef), 5);
        assert!(info.is_large_str());
    }
}
