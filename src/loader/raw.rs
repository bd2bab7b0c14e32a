//! The physical metadata of a loaded module: table rows and heap bytes.

use strum::EnumCount;
use uguid::Guid;

use crate::{
    file::io::read_le,
    metadata::{
        heaps::{BlobView, GuidView, StringsView, UserStringsView},
        root::Root,
        tables::{schema::read_row, RawRow, TableId, TableInfo},
        token::Token,
    },
    Result,
};

/// Rows of every table plus owned copies of the four heaps.
#[derive(Debug)]
pub(crate) struct RawMetadata {
    pub version: String,
    tables: Vec<Vec<RawRow>>,
    strings: Vec<u8>,
    blobs: Vec<u8>,
    guids: Vec<u8>,
    user_strings: Vec<u8>,
}

impl RawMetadata {
    /// Parse a metadata block starting at its `BSJB` root.
    pub fn parse(metadata: &[u8]) -> Result<Self> {
        let root = Root::read(metadata)?;
        let stream = |name: &str| -> Result<Vec<u8>> {
            let Some(header) = root.stream(name) else {
                return Ok(Vec::new());
            };
            let start = header.offset as usize;
            let end = start + header.size as usize;
            match metadata.get(start..end) {
                Some(data) => Ok(data.to_vec()),
                None => Err(out_of_bounds_error!()),
            }
        };

        let tables_stream = match root.stream("#~") {
            Some(_) => stream("#~")?,
            None => stream("#-")?,
        };
        if tables_stream.len() < 24 {
            return Err(malformed_error!("Metadata has no table stream"));
        }

        let valid = read_le::<u64>(&tables_stream[8..])?;
        let (info, mut offset) = TableInfo::read(&tables_stream, valid)?;
        let mut tables = Vec::with_capacity(TableId::COUNT);
        for id in 0..TableId::COUNT {
            #[allow(clippy::cast_possible_truncation)]
            let table = TableId::from_u8(id as u8);
            let Some(table) = table else {
                tables.push(Vec::new());
                continue;
            };
            let rows = info.rows(table);
            let mut parsed = Vec::with_capacity(rows as usize);
            for _ in 0..rows {
                parsed.push(read_row(&tables_stream, &mut offset, table, &info)?);
            }
            tables.push(parsed);
        }

        let mut strings = stream("#Strings")?;
        if strings.is_empty() {
            strings.push(0);
        }
        let mut blobs = stream("#Blob")?;
        if blobs.is_empty() {
            blobs.push(0);
        }

        Ok(RawMetadata {
            version: root.version.clone(),
            tables,
            strings,
            blobs,
            guids: stream("#GUID")?,
            user_strings: stream("#US")?,
        })
    }

    /// All rows of `table`, row `n` at index `n - 1`.
    pub fn rows(&self, table: TableId) -> &[RawRow] {
        self.tables
            .get(table as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of rows of `table`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn row_count(&self, table: TableId) -> u32 {
        self.rows(table).len() as u32
    }

    /// The row a definition token points at.
    pub fn row(&self, token: Token) -> Result<&RawRow> {
        let Some(table) = token.table_id() else {
            return Err(malformed_error!("Token {} has an unknown table", token));
        };
        let row = token.row() as usize;
        if row == 0 {
            return Err(malformed_error!("Null token {} has no row", token));
        }
        self.rows(table)
            .get(row - 1)
            .ok_or_else(|| malformed_error!("Token {} is past the end of its table", token))
    }

    pub fn string(&self, offset: u32) -> Result<&str> {
        StringsView::new(&self.strings)?.get(offset)
    }

    pub fn blob(&self, offset: u32) -> Result<&[u8]> {
        BlobView::new(&self.blobs)?.get(offset)
    }

    pub fn guid(&self, index: u32) -> Result<Guid> {
        GuidView::new(&self.guids).get(index)
    }

    pub fn user_string(&self, offset: u32) -> Result<String> {
        UserStringsView::new(&self.user_strings).get(offset)
    }

    /// The half-open row range `[first, end)` of a member list column.
    ///
    /// `column` is the list column of `owner_table`, which points into `list_table`. The
    /// list of row `index` runs up to the list start of the next row, or the end of the
    /// table for the last row.
    pub fn list_range(
        &self,
        owner_table: TableId,
        column: usize,
        list_table: TableId,
        index: usize,
    ) -> (u32, u32) {
        let owners = self.rows(owner_table);
        let end_of_table = self.row_count(list_table) + 1;
        let start = owners
            .get(index)
            .and_then(|row| row.get(column))
            .copied()
            .unwrap_or(end_of_table)
            .clamp(1, end_of_table);
        let end = owners
            .get(index + 1)
            .and_then(|row| row.get(column))
            .copied()
            .unwrap_or(end_of_table)
            .clamp(start, end_of_table);
        (start, end)
    }
}
