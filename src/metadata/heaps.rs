//! Metadata heaps: `#Strings`, `#US`, `#GUID` and `#Blob`.
//!
//! Each heap comes in two shapes. The `*Heap` builders are append-only, deduplicate their
//! entries and hand out the offsets that table rows and instruction operands refer to.
//! The `*View` readers borrow the bytes of a persisted heap and resolve offsets back into
//! values for the loader.
//!
//! ```rust
//! use dotemit::metadata::heaps::{StringHeap, StringsView};
//!
//! let mut heap = StringHeap::new();
//! let offset = heap.add("Sample");
//! assert_eq!(heap.add("Sample"), offset);
//!
//! let bytes = heap.into_bytes();
//! let view = StringsView::new(&bytes)?;
//! assert_eq!(view.get(offset)?, "Sample");
//! # Ok::<(), dotemit::Error>(())
//! ```

use std::collections::HashMap;

use uguid::Guid;
use widestring::U16String;

use crate::{file::parser::Parser, utils::write_compressed_uint, Result};

/// Builder for the `#Strings` heap.
#[derive(Debug, Clone)]
pub struct StringHeap {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for StringHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl StringHeap {
    /// Create a heap containing only the mandatory empty string.
    #[must_use]
    pub fn new() -> Self {
        StringHeap {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Add `value` and return its offset; the empty string is always at 0.
    pub fn add(&mut self, value: &str) -> u32 {
        if value.is_empty() {
            return 0;
        }

        if let Some(offset) = self.offsets.get(value) {
            return *offset;
        }

        let offset = self.data.len() as u32;
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
        self.offsets.insert(value.to_string(), offset);
        offset
    }

    /// Current size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if only the empty string is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 1
    }

    /// The heap bytes, not yet padded.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Builder for the `#Blob` heap.
#[derive(Debug, Clone)]
pub struct BlobHeap {
    data: Vec<u8>,
    offsets: HashMap<Vec<u8>, u32>,
}

impl Default for BlobHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobHeap {
    /// Create a heap containing only the mandatory empty blob.
    #[must_use]
    pub fn new() -> Self {
        BlobHeap {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Add `value` and return its offset; the empty blob is always at 0.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the blob is too large to be prefixed.
    pub fn add(&mut self, value: &[u8]) -> Result<u32> {
        if value.is_empty() {
            return Ok(0);
        }

        if let Some(offset) = self.offsets.get(value) {
            return Ok(*offset);
        }

        let offset = self.data.len() as u32;
        write_compressed_uint(value.len() as u32, &mut self.data)?;
        self.data.extend_from_slice(value);
        self.offsets.insert(value.to_vec(), offset);
        Ok(offset)
    }

    /// Current size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if only the empty blob is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 1
    }

    /// The heap bytes, not yet padded.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Builder for the `#GUID` heap; indexes are 1-based.
#[derive(Debug, Clone, Default)]
pub struct GuidHeap {
    guids: Vec<Guid>,
}

impl GuidHeap {
    /// Create an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `guid` and return its 1-based index.
    pub fn add(&mut self, guid: Guid) -> u32 {
        if let Some(position) = self.guids.iter().position(|existing| *existing == guid) {
            return position as u32 + 1;
        }

        self.guids.push(guid);
        self.guids.len() as u32
    }

    /// Current size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guids.len() * 16
    }

    /// Returns true if no GUID was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guids.is_empty()
    }

    /// The heap bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.guids.iter().flat_map(|guid| guid.to_bytes()).collect()
    }
}

/// Builder for the `#US` heap.
///
/// Entries are length-prefixed UTF-16LE strings followed by the trailing flag byte of
/// ECMA-335 II.24.2.4.
#[derive(Debug, Clone)]
pub struct UserStringHeap {
    data: Vec<u8>,
    offsets: HashMap<String, u32>,
}

impl Default for UserStringHeap {
    fn default() -> Self {
        Self::new()
    }
}

/// Largest offset a user string token can address.
pub const MAX_USER_STRING_OFFSET: u32 = 0x00FF_FFFF;

impl UserStringHeap {
    /// Create a heap containing only the mandatory empty entry.
    #[must_use]
    pub fn new() -> Self {
        UserStringHeap {
            data: vec![0],
            offsets: HashMap::new(),
        }
    }

    /// Add `value` and return its offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] once the heap outgrows the 24-bit offset
    /// space of user string tokens.
    pub fn add(&mut self, value: &str) -> Result<u32> {
        if let Some(offset) = self.offsets.get(value) {
            return Ok(*offset);
        }

        let offset = self.data.len() as u32;
        if offset > MAX_USER_STRING_OFFSET {
            return Err(invalid_operation!("The user string heap is full"));
        }

        let units = U16String::from_str(value);
        let mut flag = 0_u8;
        let mut encoded = Vec::with_capacity(units.len() * 2 + 1);
        for unit in units.as_slice() {
            if *unit > 0x7F || Self::needs_special_handling(*unit) {
                flag = 1;
            }
            encoded.extend_from_slice(&unit.to_le_bytes());
        }
        encoded.push(flag);

        write_compressed_uint(encoded.len() as u32, &mut self.data)?;
        self.data.extend_from_slice(&encoded);
        self.offsets.insert(value.to_string(), offset);
        Ok(offset)
    }

    fn needs_special_handling(unit: u16) -> bool {
        matches!(unit, 0x01..=0x08 | 0x0E..=0x1F | 0x27 | 0x2D | 0x7F)
    }

    /// Current size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no string was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 1
    }

    /// The heap bytes as built so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Read access to a persisted `#Strings` heap.
pub struct StringsView<'a> {
    data: &'a [u8],
}

impl<'a> StringsView<'a> {
    /// Wrap heap bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty string.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.first().copied() != Some(0) {
            return Err(malformed_error!("#Strings heap does not start with 0"));
        }
        Ok(StringsView { data })
    }

    /// The string at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `offset` is invalid.
    pub fn get(&self, offset: u32) -> Result<&'a str> {
        let Some(rest) = self.data.get(offset as usize..) else {
            return Err(out_of_bounds_error!());
        };
        let Some(end) = rest.iter().position(|byte| *byte == 0) else {
            return Err(out_of_bounds_error!());
        };

        std::str::from_utf8(&rest[..end])
            .map_err(|_| malformed_error!("Invalid UTF-8 in #Strings at {}", offset))
    }
}

/// Read access to a persisted `#Blob` heap.
pub struct BlobView<'a> {
    data: &'a [u8],
}

impl<'a> BlobView<'a> {
    /// Wrap heap bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap does not start with the empty blob.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.first().copied() != Some(0) {
            return Err(malformed_error!("#Blob heap does not start with 0"));
        }
        Ok(BlobView { data })
    }

    /// The blob at `offset`, without its length prefix.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `offset` or the length are invalid.
    pub fn get(&self, offset: u32) -> Result<&'a [u8]> {
        let mut parser = Parser::new(self.data);
        parser.seek(offset as usize)?;
        let length = parser.read_compressed_uint()? as usize;
        parser.read_bytes(length)
    }
}

/// Read access to a persisted `#GUID` heap.
pub struct GuidView<'a> {
    data: &'a [u8],
}

impl<'a> GuidView<'a> {
    /// Wrap heap bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        GuidView { data }
    }

    /// The GUID at the 1-based `index`, 0 yields the nil GUID.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `index` is past the end.
    pub fn get(&self, index: u32) -> Result<Guid> {
        if index == 0 {
            return Ok(Guid::ZERO);
        }

        let start = (index as usize - 1) * 16;
        let Some(bytes) = self.data.get(start..start + 16) else {
            return Err(out_of_bounds_error!());
        };

        let mut raw = [0_u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Guid::from_bytes(raw))
    }
}

/// Read access to a persisted `#US` heap.
pub struct UserStringsView<'a> {
    data: &'a [u8],
}

impl<'a> UserStringsView<'a> {
    /// Wrap heap bytes.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        UserStringsView { data }
    }

    /// The string at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `offset` or the length are invalid.
    pub fn get(&self, offset: u32) -> Result<String> {
        let mut parser = Parser::new(self.data);
        parser.seek(offset as usize)?;
        let length = parser.read_compressed_uint()? as usize;
        if length == 0 {
            return Ok(String::new());
        }

        let bytes = parser.read_bytes(length)?;
        let units: Vec<u16> = bytes[..length - 1]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(U16String::from_vec(units).to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_dedup() {
        let mut heap = StringHeap::new();
        assert_eq!(heap.add(""), 0);
        let a = heap.add("Alpha");
        let b = heap.add("Beta");
        assert_eq!(a, 1);
        assert_eq!(b, 7);
        assert_eq!(heap.add("Alpha"), a);

        let bytes = heap.into_bytes();
        let view = StringsView::new(&bytes).unwrap();
        assert_eq!(view.get(b).unwrap(), "Beta");
        assert_eq!(view.get(0).unwrap(), "");
    }

    #[test]
    fn blobs() {
        let mut heap = BlobHeap::new();
        let first = heap.add(&[0x20, 0x00, 0x01]).unwrap();
        let second = heap.add(&[0x06, 0x08]).unwrap();
        assert_eq!(heap.add(&[0x20, 0x00, 0x01]).unwrap(), first);
        assert_eq!(heap.add(&[]).unwrap(), 0);

        let bytes = heap.into_bytes();
        assert_eq!(&bytes[..5], &[0x00, 0x03, 0x20, 0x00, 0x01]);
        let view = BlobView::new(&bytes).unwrap();
        assert_eq!(view.get(second).unwrap(), &[0x06, 0x08]);
        assert!(view.get(200).is_err());
    }

    #[test]
    fn user_strings() {
        let mut heap = UserStringHeap::new();
        let hello = heap.add("Hello").unwrap();
        let quote = heap.add("it's").unwrap();
        assert_eq!(hello, 1);
        // 5 UTF-16 units plus the flag byte
        assert_eq!(heap.bytes()[1], 11);
        assert_eq!(heap.bytes()[12], 0);
        // the apostrophe sets the flag
        assert_eq!(*heap.bytes().last().unwrap(), 1);

        let view = UserStringsView::new(heap.bytes());
        assert_eq!(view.get(hello).unwrap(), "Hello");
        assert_eq!(view.get(quote).unwrap(), "it's");
        assert_eq!(heap.add("Hello").unwrap(), hello);
    }

    #[test]
    fn guids() {
        let mut heap = GuidHeap::new();
        let guid = Guid::from_bytes([7; 16]);
        assert_eq!(heap.add(guid), 1);
        assert_eq!(heap.add(guid), 1);
        let bytes = heap.into_bytes();
        let view = GuidView::new(&bytes);
        assert_eq!(view.get(1).unwrap(), guid);
        assert_eq!(view.get(0).unwrap(), Guid::ZERO);
        assert!(view.get(2).is_err());
    }
}
