//! The `#~` table stream (ECMA-335 II.24.2.6).
//!
//! Rows are collected as generic column vectors, grouped per table. Once every row is in
//! place, the sorted tables are put into key order and the stream is serialized through
//! [`schema::write_row`], so column widths always agree with the row counts and heap
//! sizes recorded in the header.

use strum::{EnumCount, IntoEnumIterator};

use crate::{
    file::io::WriteLe,
    metadata::tables::{
        schema, RawRow, TableData, TableId, TableInfo, HEAP_LARGE_BLOB, HEAP_LARGE_GUID,
        HEAP_LARGE_STRINGS,
    },
    utils::pad_to,
    Result,
};

/// Bit vector of the tables that are always written sorted
const SORTED_TABLES: u64 = 0x0000_1600_3301_FA00;

/// Sizes of the heaps the table stream points into.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HeapSizes {
    pub strings: usize,
    pub guids: usize,
    pub blobs: usize,
}

impl HeapSizes {
    fn flags(self) -> u8 {
        let mut flags = 0;
        if self.strings > 0xFFFF {
            flags |= HEAP_LARGE_STRINGS;
        }
        if self.guids > 0xFFFF {
            flags |= HEAP_LARGE_GUID;
        }
        if self.blobs > 0xFFFF {
            flags |= HEAP_LARGE_BLOB;
        }
        flags
    }
}

/// Row storage for every table of one module.
pub(crate) struct TablesBuilder {
    tables: Vec<TableData>,
}

impl TablesBuilder {
    pub fn new() -> Self {
        TablesBuilder {
            tables: TableId::iter().map(TableData::new).collect(),
        }
    }

    /// Append a row, returning its 1-based index.
    pub fn push(&mut self, table: TableId, row: RawRow) -> u32 {
        self.tables[table as usize].push(row)
    }

    /// Number of rows in `table`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn rows(&self, table: TableId) -> u32 {
        self.tables[table as usize].len() as u32
    }

    /// Mutable access to the rows of `table`.
    pub fn rows_mut(&mut self, table: TableId) -> &mut Vec<RawRow> {
        &mut self.tables[table as usize].rows
    }

    /// Put every sorted table into key order.
    ///
    /// The sort is stable, so rows with equal keys keep their insertion order. Tables
    /// whose rows are referenced from elsewhere (`GenericParam`) must be emitted sorted
    /// by the caller, this pass does not renumber references.
    pub fn sort(&mut self) {
        for table in TableId::iter().filter(TableId::is_sorted) {
            let rows = self.rows_mut(table);
            match table {
                TableId::InterfaceImpl => rows.sort_by_key(|row| (row[0], row[1])),
                TableId::ClassLayout => rows.sort_by_key(|row| row[2]),
                TableId::MethodSemantics => rows.sort_by_key(|row| row[2]),
                TableId::Constant
                | TableId::DeclSecurity
                | TableId::FieldLayout
                | TableId::ImplMap
                | TableId::FieldRVA => rows.sort_by_key(|row| row[1]),
                _ => rows.sort_by_key(|row| row[0]),
            }
        }
    }

    fn info(&self, heaps: HeapSizes) -> TableInfo {
        let mut counts = [0_u32; TableId::COUNT];
        for table in TableId::iter() {
            counts[table as usize] = self.rows(table);
        }
        TableInfo::new(&counts, heaps.flags())
    }

    /// Size of the serialized stream, padded to 4 bytes.
    pub fn stream_size(&self, heaps: HeapSizes) -> usize {
        let info = self.info(heaps);
        let present = TableId::iter().filter(|table| self.rows(*table) > 0);
        let header = 24 + 4 * present.clone().count();
        let rows: usize = present
            .map(|table| self.rows(table) as usize * schema::row_size(table, &info))
            .sum();
        (header + rows + 3) & !3
    }

    /// Serialize the stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a value does not fit its column.
    pub fn serialize(&self, heaps: HeapSizes) -> Result<Vec<u8>> {
        let info = self.info(heaps);
        let mut buffer = Vec::with_capacity(self.stream_size(heaps));

        buffer.write_le::<u32>(0);
        buffer.push(2);
        buffer.push(0);
        buffer.push(info.heap_size_flags());
        buffer.push(1);
        buffer.write_le::<u64>(info.valid());
        buffer.write_le::<u64>(SORTED_TABLES);

        for table in TableId::iter() {
            let rows = self.rows(table);
            if rows > 0 {
                buffer.write_le::<u32>(rows);
            }
        }
        for table in &self.tables {
            for row in &table.rows {
                schema::write_row(&mut buffer, table.table, row, &info)?;
            }
        }

        pad_to(&mut buffer, 4);
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_by_key_column() {
        let mut tables = TablesBuilder::new();
        tables.push(TableId::Constant, vec![0x08, 9, 1]);
        tables.push(TableId::Constant, vec![0x08, 4, 3]);
        tables.push(TableId::NestedClass, vec![3, 2]);
        tables.push(TableId::NestedClass, vec![2, 1]);
        tables.sort();

        assert_eq!(tables.rows_mut(TableId::Constant)[0][1], 4);
        assert_eq!(tables.rows_mut(TableId::NestedClass)[0], vec![2, 1]);
    }

    #[test]
    fn header_layout() {
        let mut tables = TablesBuilder::new();
        tables.push(TableId::Module, vec![0, 1, 1, 0, 0]);
        tables.push(TableId::TypeDef, vec![0, 2, 0, 0, 1, 1]);

        let heaps = HeapSizes {
            strings: 16,
            guids: 16,
            blobs: 1,
        };
        let stream = tables.serialize(heaps).unwrap();
        assert_eq!(stream.len(), tables.stream_size(heaps));
        assert_eq!(stream[4], 2);
        assert_eq!(&stream[8..16], &0b101_u64.to_le_bytes());
        assert_eq!(&stream[24..28], &1_u32.to_le_bytes());
        // Module row: generation, name, mvid, encid, encbaseid
        assert_eq!(&stream[32..42], &[0, 0, 1, 0, 1, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn large_heap_flags() {
        let small = HeapSizes {
            strings: 0xFFFF,
            guids: 16,
            blobs: 1,
        };
        assert_eq!(small.flags(), 0);

        let large = HeapSizes {
            strings: 0x1_0000,
            guids: 16,
            blobs: 0x2_0000,
        };
        assert_eq!(large.flags(), HEAP_LARGE_STRINGS | HEAP_LARGE_BLOB);
        assert_eq!(large.flags() & HEAP_LARGE_GUID, 0);

        let mut tables = TablesBuilder::new();
        tables.push(TableId::Module, vec![0, 1, 1, 0, 0]);
        let stream = tables.serialize(large).unwrap();
        assert_eq!(stream[6], HEAP_LARGE_STRINGS | HEAP_LARGE_BLOB);
        assert_eq!(stream.len(), tables.stream_size(large));
    }
}
