//! Cursor based binary parser for metadata structures.
//!
//! [`Parser`] keeps a position within a borrowed byte slice and offers the primitive reads
//! that signatures, custom attribute blobs and marshalling descriptors are built from:
//! little-endian integers, ECMA-335 compressed integers, compressed `TypeDefOrRef` tokens
//! and length-prefixed UTF-8 strings.
//!
//! ```rust
//! use dotemit::file::parser::Parser;
//!
//! let data = [0x81, 0x00, 0x05];
//! let mut parser = Parser::new(&data);
//! assert_eq!(parser.read_compressed_uint()?, 0x100);
//! assert_eq!(parser.read_le::<u8>()?, 5);
//! # Ok::<(), dotemit::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::token::Token,
    Result,
};

/// A cursor over a byte slice.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Length of the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the underlying data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if there are unread bytes left.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Current position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` lies past the end.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Skip one byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn advance(&mut self) -> Result<()> {
        self.advance_by(1)
    }

    /// Skip `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `step` bytes remain.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        if step > self.remaining() {
            return Err(out_of_bounds_error!());
        }

        self.position += step;
        Ok(())
    }

    /// Move forward to the next multiple of `alignment`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the aligned position lies past the end.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let aligned = self.position.div_ceil(alignment) * alignment;
        self.seek(aligned)
    }

    /// Look at the next byte without consuming it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] at the end of the data.
    pub fn peek_byte(&self) -> Result<u8> {
        match self.data.get(self.position) {
            Some(byte) => Ok(*byte),
            None => Err(out_of_bounds_error!()),
        }
    }

    /// Read a little-endian value.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at(self.data, &mut self.position)
    }

    /// Read `length` raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if not enough data remains.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        if length > self.remaining() {
            return Err(out_of_bounds_error!());
        }

        let bytes = &self.data[self.position..self.position + length];
        self.position += length;
        Ok(bytes)
    }

    /// Read an ECMA-335 II.23.2 compressed unsigned integer.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid lead byte.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        Ok(self.read_compressed_uint_with_width()?.0)
    }

    fn read_compressed_uint_with_width(&mut self) -> Result<(u32, u8)> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok((u32::from(first_byte), 1));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            let value = ((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte);
            return Ok((value, 2));
        }

        // 4-byte encoding: 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            let value = ((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3;
            return Ok((value, 4));
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read an ECMA-335 II.23.2 compressed signed integer.
    ///
    /// The sign bit is rotated into the lowest bit and the value is sign extended from the
    /// width of its encoding (7, 14 or 29 bits).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid lead byte.
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let (unsigned, width) = self.read_compressed_uint_with_width()?;

        let magnitude = unsigned >> 1;
        let value = if unsigned & 1 == 0 {
            magnitude
        } else {
            let extension = match width {
                1 => 0xFFFF_FFC0,
                2 => 0xFFFF_E000,
                _ => 0xF000_0000,
            };
            magnitude | extension
        };

        #[allow(clippy::cast_possible_wrap)]
        let value = value as i32;
        Ok(value)
    }

    /// Read a compressed `TypeDefOrRefOrSpecEncoded` token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag is not TypeDef, TypeRef or TypeSpec.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000, // TypeDef
            0x1 => 0x0100_0000, // TypeRef
            0x2 => 0x1B00_0000, // TypeSpec
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::new(table | (compressed_token >> 2)))
    }

    /// Read a NUL terminated UTF-8 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no terminator is found.
    pub fn read_string_utf8(&mut self) -> Result<String> {
        let rest = &self.data[self.position..];
        let Some(end) = rest.iter().position(|byte| *byte == 0) else {
            return Err(out_of_bounds_error!());
        };

        let value = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.position += end + 1;
        Ok(value)
    }

    /// Read a `SerString`: compressed length followed by UTF-8 bytes, `0xFF` encodes null.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the string is truncated.
    pub fn read_ser_string(&mut self) -> Result<Option<String>> {
        if self.peek_byte()? == 0xFF {
            self.advance()?;
            return Ok(None);
        }

        let length = self.read_compressed_uint()? as usize;
        let bytes = self.read_bytes(length)?;
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_tokens() {
        let data = [0x49, 0x0C];
        let mut parser = Parser::new(&data);
        // 0x49 = row 0x12, tag TypeRef
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x0100_0012));
        // 0x0C = row 3, tag TypeDef
        assert_eq!(parser.read_compressed_token().unwrap(), Token::new(0x0200_0003));
        assert!(!parser.has_more_data());
    }

    #[test]
    fn compressed_token_invalid_tag() {
        let data = [0x03];
        let mut parser = Parser::new(&data);
        assert!(parser.read_compressed_token().is_err());
    }

    #[test]
    fn strings() {
        let data = [b'a', b'b', 0, 0x03, b'x', b'y', b'z', 0xFF];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_string_utf8().unwrap(), "ab");
        assert_eq!(parser.read_ser_string().unwrap(), Some("xyz".to_string()));
        assert_eq!(parser.read_ser_string().unwrap(), None);
    }

    #[test]
    fn seek_align_bounds() {
        let data = [0u8; 10];
        let mut parser = Parser::new(&data);
        parser.advance_by(5).unwrap();
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 8);
        assert!(parser.advance_by(3).is_err());
        assert!(parser.seek(11).is_err());
        assert_eq!(parser.read_bytes(2).unwrap().len(), 2);
        assert!(parser.peek_byte().is_err());
    }
}
