//! Default values stored in the `Constant` table (ECMA-335 II.22.9).
//!
//! Fields, parameters and properties may carry a compile time constant. The table stores
//! an element type byte plus a blob with the little-endian value; strings are UTF-16LE
//! without terminator, and the null reference is written as `ELEMENT_TYPE_CLASS` with a
//! 4 byte zero value.

use std::fmt;

use crate::{
    file::io::read_le,
    metadata::signatures::ELEMENT_TYPE,
    Result,
};

/// A constant value assignable to a field, parameter or property.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Constant {
    Boolean(bool),
    Char(u16),
    I1(i8),
    U1(u8),
    I2(i16),
    U2(u16),
    I4(i32),
    U4(u32),
    I8(i64),
    U8(u64),
    R4(f32),
    R8(f64),
    String(String),
    /// The null reference
    Null,
}

impl Constant {
    /// The element type byte written to the `Type` column.
    #[must_use]
    pub fn element_type(&self) -> u8 {
        match self {
            Constant::Boolean(_) => ELEMENT_TYPE::BOOLEAN,
            Constant::Char(_) => ELEMENT_TYPE::CHAR,
            Constant::I1(_) => ELEMENT_TYPE::I1,
            Constant::U1(_) => ELEMENT_TYPE::U1,
            Constant::I2(_) => ELEMENT_TYPE::I2,
            Constant::U2(_) => ELEMENT_TYPE::U2,
            Constant::I4(_) => ELEMENT_TYPE::I4,
            Constant::U4(_) => ELEMENT_TYPE::U4,
            Constant::I8(_) => ELEMENT_TYPE::I8,
            Constant::U8(_) => ELEMENT_TYPE::U8,
            Constant::R4(_) => ELEMENT_TYPE::R4,
            Constant::R8(_) => ELEMENT_TYPE::R8,
            Constant::String(_) => ELEMENT_TYPE::STRING,
            Constant::Null => ELEMENT_TYPE::CLASS,
        }
    }

    /// The value blob.
    #[must_use]
    pub fn to_blob(&self) -> Vec<u8> {
        match self {
            Constant::Boolean(value) => vec![u8::from(*value)],
            Constant::Char(value) | Constant::U2(value) => value.to_le_bytes().to_vec(),
            Constant::I1(value) => value.to_le_bytes().to_vec(),
            Constant::U1(value) => vec![*value],
            Constant::I2(value) => value.to_le_bytes().to_vec(),
            Constant::I4(value) => value.to_le_bytes().to_vec(),
            Constant::U4(value) => value.to_le_bytes().to_vec(),
            Constant::I8(value) => value.to_le_bytes().to_vec(),
            Constant::U8(value) => value.to_le_bytes().to_vec(),
            Constant::R4(value) => value.to_le_bytes().to_vec(),
            Constant::R8(value) => value.to_le_bytes().to_vec(),
            Constant::String(value) => value.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Constant::Null => vec![0; 4],
        }
    }

    /// Decode a constant from its type byte and value blob.
    ///
    /// # Errors
    /// Returns an error for unknown type bytes or short blobs.
    pub fn from_blob(type_byte: u8, blob: &[u8]) -> Result<Self> {
        Ok(match type_byte {
            ELEMENT_TYPE::BOOLEAN => Constant::Boolean(read_le::<u8>(blob)? != 0),
            ELEMENT_TYPE::CHAR => Constant::Char(read_le::<u16>(blob)?),
            ELEMENT_TYPE::I1 => Constant::I1(read_le::<i8>(blob)?),
            ELEMENT_TYPE::U1 => Constant::U1(read_le::<u8>(blob)?),
            ELEMENT_TYPE::I2 => Constant::I2(read_le::<i16>(blob)?),
            ELEMENT_TYPE::U2 => Constant::U2(read_le::<u16>(blob)?),
            ELEMENT_TYPE::I4 => Constant::I4(read_le::<i32>(blob)?),
            ELEMENT_TYPE::U4 => Constant::U4(read_le::<u32>(blob)?),
            ELEMENT_TYPE::I8 => Constant::I8(read_le::<i64>(blob)?),
            ELEMENT_TYPE::U8 => Constant::U8(read_le::<u64>(blob)?),
            ELEMENT_TYPE::R4 => Constant::R4(read_le::<f32>(blob)?),
            ELEMENT_TYPE::R8 => Constant::R8(read_le::<f64>(blob)?),
            ELEMENT_TYPE::STRING => {
                if blob.len() % 2 != 0 {
                    return Err(malformed_error!(
                        "String constant of odd length {}",
                        blob.len()
                    ));
                }
                let units: Vec<u16> = blob
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                Constant::String(String::from_utf16_lossy(&units))
            }
            ELEMENT_TYPE::CLASS => Constant::Null,
            other => {
                return Err(malformed_error!("Invalid constant type - {:#x}", other));
            }
        })
    }

    /// Check whether this constant may be stored on a target of the primitive element
    /// type `target`.
    ///
    /// Exact matches and the lossless widenings (signed to larger signed, unsigned to
    /// larger unsigned, `float32` to `float64`, small integers to floating point) are
    /// accepted. Strings and null are accepted by `string` and `object` targets.
    #[must_use]
    #[allow(clippy::unnested_or_patterns)]
    pub fn is_assignable_to(&self, target: u8) -> bool {
        use ELEMENT_TYPE as E;

        matches!(
            (self, target),
            (Constant::Boolean(_), E::BOOLEAN)
                | (Constant::Char(_), E::CHAR)
                | (Constant::I1(_), E::I1 | E::I2 | E::I4 | E::I8 | E::R4 | E::R8)
                | (Constant::U1(_), E::U1 | E::U2 | E::U4 | E::U8 | E::R4 | E::R8)
                | (Constant::I2(_), E::I2 | E::I4 | E::I8 | E::R4 | E::R8)
                | (Constant::U2(_), E::U2 | E::U4 | E::U8 | E::R4 | E::R8)
                | (Constant::I4(_), E::I4 | E::I8 | E::R4 | E::R8)
                | (Constant::U4(_), E::U4 | E::U8 | E::R8)
                | (Constant::I8(_), E::I8 | E::R8)
                | (Constant::U8(_), E::U8 | E::R8)
                | (Constant::R4(_), E::R4 | E::R8)
                | (Constant::R8(_), E::R8)
                | (Constant::String(_), E::STRING | E::OBJECT)
                | (Constant::Null, E::STRING | E::OBJECT | E::CLASS)
        )
    }

    /// Returns true for the integral kinds an enum may be based on.
    #[must_use]
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Constant::Boolean(_)
                | Constant::Char(_)
                | Constant::I1(_)
                | Constant::U1(_)
                | Constant::I2(_)
                | Constant::U2(_)
                | Constant::I4(_)
                | Constant::U4(_)
                | Constant::I8(_)
                | Constant::U8(_)
        )
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Boolean(value) => write!(f, "{value}"),
            Constant::Char(value) => write!(f, "'\\u{value:04x}'"),
            Constant::I1(value) => write!(f, "{value}"),
            Constant::U1(value) => write!(f, "{value}"),
            Constant::I2(value) => write!(f, "{value}"),
            Constant::U2(value) => write!(f, "{value}"),
            Constant::I4(value) => write!(f, "{value}"),
            Constant::U4(value) => write!(f, "{value}"),
            Constant::I8(value) => write!(f, "{value}"),
            Constant::U8(value) => write!(f, "{value}"),
            Constant::R4(value) => write!(f, "{value}"),
            Constant::R8(value) => write!(f, "{value}"),
            Constant::String(value) => write!(f, "\"{value}\""),
            Constant::Null => f.write_str("null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobs() {
        assert_eq!(Constant::I4(-2).to_blob(), vec![0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(Constant::String("Hi".into()).to_blob(), vec![b'H', 0, b'i', 0]);
        assert_eq!(Constant::Null.element_type(), ELEMENT_TYPE::CLASS);
        assert_eq!(Constant::Null.to_blob(), vec![0, 0, 0, 0]);

        let value = Constant::R8(1.5);
        assert_eq!(
            Constant::from_blob(value.element_type(), &value.to_blob()).unwrap(),
            value
        );
        assert_eq!(
            Constant::from_blob(ELEMENT_TYPE::STRING, &[]).unwrap(),
            Constant::String(String::new())
        );
        assert!(Constant::from_blob(ELEMENT_TYPE::I8, &[1, 2]).is_err());
        assert!(Constant::from_blob(ELEMENT_TYPE::SZARRAY, &[0; 4]).is_err());
    }

    #[test]
    fn widening() {
        assert!(Constant::I4(1).is_assignable_to(ELEMENT_TYPE::I4));
        assert!(Constant::I4(1).is_assignable_to(ELEMENT_TYPE::I8));
        assert!(!Constant::I4(1).is_assignable_to(ELEMENT_TYPE::I2));
        assert!(!Constant::I4(1).is_assignable_to(ELEMENT_TYPE::U4));
        assert!(!Constant::I4(1).is_assignable_to(ELEMENT_TYPE::STRING));
        assert!(Constant::String("a".into()).is_assignable_to(ELEMENT_TYPE::OBJECT));
        assert!(Constant::Null.is_assignable_to(ELEMENT_TYPE::STRING));
        assert!(!Constant::Null.is_assignable_to(ELEMENT_TYPE::I4));
        assert!(!Constant::R8(0.0).is_assignable_to(ELEMENT_TYPE::R4));
    }
}
