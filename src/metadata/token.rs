//! Metadata tokens.
//!
//! A token is the 32-bit identity of one metadata entity within a module: the high byte
//! names the table (or `0x70` for the user string heap), the low 24 bits hold the 1-based
//! row, or the heap offset for user strings. Tokens handed out by the builders are stable
//! for the lifetime of their module and can be embedded into instruction streams long
//! before the corresponding rows exist.
//!
//! ```rust
//! use dotemit::metadata::{tables::TableId, token::Token};
//!
//! let token = Token::from_parts(TableId::MethodDef, 3);
//! assert_eq!(token.value(), 0x0600_0003);
//! assert_eq!(token.table_id(), Some(TableId::MethodDef));
//! assert_eq!(token.row(), 3);
//! ```

use std::fmt;

use crate::metadata::tables::TableId;

/// Table byte of tokens that point into the `#US` heap.
pub const USER_STRING_TABLE: u8 = 0x70;

/// A metadata token: table tag in the high byte, row or heap offset in the low 24 bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Create a token from a table and a 1-based row.
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token(((table as u32) << 24) | (row & 0x00FF_FFFF))
    }

    /// Create a user string token from a `#US` heap offset.
    #[must_use]
    pub fn user_string(offset: u32) -> Self {
        Token((u32::from(USER_STRING_TABLE) << 24) | (offset & 0x00FF_FFFF))
    }

    /// The raw value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table byte.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The table this token points into, `None` for user strings and unknown tables.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_u8(self.table())
    }

    /// The row (or heap offset) part.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true for the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if this token points into the `#US` heap.
    #[must_use]
    pub fn is_user_string(&self) -> bool {
        self.table() == USER_STRING_TABLE
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_parts() {
        let token = Token::from_parts(TableId::TypeDef, 5);
        assert_eq!(token.value(), 0x0200_0005);
        assert_eq!(token.table(), 0x02);
        assert_eq!(token.row(), 5);
        assert_eq!(token.table_id(), Some(TableId::TypeDef));
    }

    #[test]
    fn test_token_user_string() {
        let token = Token::user_string(0x1F);
        assert_eq!(token.value(), 0x7000_001F);
        assert!(token.is_user_string());
        assert_eq!(token.table_id(), None);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(!Token(0x0600_0001).is_null());
    }

    #[test]
    fn test_token_from_conversion() {
        let value = 0x0600_0001_u32;
        let token: Token = value.into();
        assert_eq!(token.value(), value);
        let back_to_u32: u32 = token.into();
        assert_eq!(back_to_u32, value);
    }

    #[test]
    fn test_token_display_debug() {
        let token = Token(0x0600_0001);
        assert_eq!(format!("{}", token), "0x06000001");

        let debug_str = format!("{:?}", token);
        assert!(debug_str.contains("Token(0x06000001"));
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }

    #[test]
    fn test_token_as_key() {
        let mut map = HashMap::new();
        map.insert(Token(0x0100_0001), "TypeRef");
        map.insert(Token(0x0200_0001), "TypeDef");
        assert_eq!(map.get(&Token(0x0200_0001)), Some(&"TypeDef"));
    }
}
