//! Marshalling descriptors of the `FieldMarshal` table (ECMA-335 II.23.4).
//!
//! A descriptor tells the interop layer how a field or parameter is represented in
//! native code. Builders attach one through `set_marshal`, or implicitly through the
//! `MarshalAsAttribute` pseudo custom attribute; the writer stores it as a blob and the
//! loader decodes it back into a [`MarshalDescriptor`].

use crate::{file::parser::Parser, utils::write_compressed_uint, Result};

/// Native type constants (`NATIVE_TYPE_*`)
#[allow(non_snake_case, missing_docs)]
pub mod NATIVE_TYPE {
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const I1: u8 = 0x03;
    pub const U1: u8 = 0x04;
    pub const I2: u8 = 0x05;
    pub const U2: u8 = 0x06;
    pub const I4: u8 = 0x07;
    pub const U4: u8 = 0x08;
    pub const I8: u8 = 0x09;
    pub const U8: u8 = 0x0a;
    pub const R4: u8 = 0x0b;
    pub const R8: u8 = 0x0c;
    pub const SYSCHAR: u8 = 0x0d;
    pub const VARIANT: u8 = 0x0e;
    pub const CURRENCY: u8 = 0x0f;
    pub const PTR: u8 = 0x10;
    pub const DECIMAL: u8 = 0x11;
    pub const DATE: u8 = 0x12;
    pub const BSTR: u8 = 0x13;
    pub const LPSTR: u8 = 0x14;
    pub const LPWSTR: u8 = 0x15;
    pub const LPTSTR: u8 = 0x16;
    pub const FIXEDSYSSTRING: u8 = 0x17;
    pub const OBJECTREF: u8 = 0x18;
    pub const IUNKNOWN: u8 = 0x19;
    pub const IDISPATCH: u8 = 0x1a;
    pub const STRUCT: u8 = 0x1b;
    pub const INTERFACE: u8 = 0x1c;
    pub const SAFEARRAY: u8 = 0x1d;
    pub const FIXEDARRAY: u8 = 0x1e;
    pub const INT: u8 = 0x1f;
    pub const UINT: u8 = 0x20;
    pub const NESTEDSTRUCT: u8 = 0x21;
    pub const BYVALSTR: u8 = 0x22;
    pub const ANSIBSTR: u8 = 0x23;
    pub const TBSTR: u8 = 0x24;
    pub const VARIANTBOOL: u8 = 0x25;
    pub const FUNC: u8 = 0x26;
    pub const ASANY: u8 = 0x28;
    pub const ARRAY: u8 = 0x2a;
    pub const LPSTRUCT: u8 = 0x2b;
    pub const CUSTOMMARSHALER: u8 = 0x2c;
    pub const ERROR: u8 = 0x2d;
    pub const IINSPECTABLE: u8 = 0x2e;
    pub const HSTRING: u8 = 0x2f;
    pub const LPUTF8STR: u8 = 0x30;
    pub const MAX: u8 = 0x50;
}

/// Variant type constants used by `SAFEARRAY` descriptors
#[allow(non_snake_case, missing_docs)]
pub mod VARIANT_TYPE {
    pub const EMPTY: u16 = 0;
    pub const I2: u16 = 2;
    pub const I4: u16 = 3;
    pub const R4: u16 = 4;
    pub const R8: u16 = 5;
    pub const BSTR: u16 = 8;
    pub const DISPATCH: u16 = 9;
    pub const BOOL: u16 = 11;
    pub const VARIANT: u16 = 12;
    pub const UNKNOWN: u16 = 13;
    pub const I1: u16 = 16;
    pub const UI1: u16 = 17;
    pub const UI2: u16 = 18;
    pub const UI4: u16 = 19;
    pub const I8: u16 = 20;
    pub const UI8: u16 = 21;
    pub const USERDEFINED: u16 = 29;
    pub const TYPEMASK: u16 = 0xfff;
}

/// How a field or parameter is marshalled to native code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarshalDescriptor {
    /// A native type without further data
    Simple(u8),
    /// `ByValTStr`: inline character array of a fixed size
    ByValTStr {
        /// Number of characters
        size: u32,
    },
    /// `ByValArray`: inline array of a fixed size
    ByValArray {
        /// Number of elements
        size: u32,
        /// Native element type
        element: Option<u8>,
    },
    /// `LPArray`: pointer to a C-style array
    LPArray {
        /// Native element type
        element: u8,
        /// Index of the parameter holding the element count
        size_param_index: Option<u32>,
        /// Constant element count
        size_const: Option<u32>,
    },
    /// `SafeArray` of a variant type
    SafeArray {
        /// Variant type of the elements
        element: u16,
        /// Name of a user defined element type
        user_defined_name: Option<String>,
    },
    /// COM interface pointer
    Interface {
        /// `INTERFACE`, `IUNKNOWN`, `IDISPATCH` or `IINSPECTABLE`
        native_type: u8,
        /// Index of the parameter holding the IID
        iid_param_index: Option<u32>,
    },
    /// Custom marshaler
    CustomMarshaler {
        /// GUID string, usually empty
        guid: String,
        /// Native type name, usually empty
        native_type_name: String,
        /// Assembly qualified name of the marshaler type
        marshaler: String,
        /// Cookie passed to the marshaler
        cookie: String,
    },
}

fn write_packed_string(value: &str, buffer: &mut Vec<u8>) -> Result<()> {
    write_compressed_uint(value.len() as u32, buffer)?;
    buffer.extend_from_slice(value.as_bytes());
    Ok(())
}

fn read_packed_string(parser: &mut Parser) -> Result<String> {
    let length = parser.read_compressed_uint()? as usize;
    let bytes = parser.read_bytes(length)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

impl MarshalDescriptor {
    /// The leading native type byte.
    #[must_use]
    pub fn native_type(&self) -> u8 {
        match self {
            MarshalDescriptor::Simple(native) => *native,
            MarshalDescriptor::ByValTStr { .. } => NATIVE_TYPE::FIXEDSYSSTRING,
            MarshalDescriptor::ByValArray { .. } => NATIVE_TYPE::FIXEDARRAY,
            MarshalDescriptor::LPArray { .. } => NATIVE_TYPE::ARRAY,
            MarshalDescriptor::SafeArray { .. } => NATIVE_TYPE::SAFEARRAY,
            MarshalDescriptor::Interface { native_type, .. } => *native_type,
            MarshalDescriptor::CustomMarshaler { .. } => NATIVE_TYPE::CUSTOMMARSHALER,
        }
    }

    /// Encode the descriptor blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if a count does not fit the compressed
    /// integer encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![self.native_type()];

        match self {
            MarshalDescriptor::Simple(_) => {}
            MarshalDescriptor::ByValTStr { size } => write_compressed_uint(*size, &mut buffer)?,
            MarshalDescriptor::ByValArray { size, element } => {
                write_compressed_uint(*size, &mut buffer)?;
                if let Some(element) = element {
                    buffer.push(*element);
                }
            }
            MarshalDescriptor::LPArray {
                element,
                size_param_index,
                size_const,
            } => {
                buffer.push(*element);
                if size_param_index.is_some() || size_const.is_some() {
                    write_compressed_uint(size_param_index.unwrap_or(0), &mut buffer)?;
                }
                if let Some(size_const) = size_const {
                    write_compressed_uint(*size_const, &mut buffer)?;
                }
            }
            MarshalDescriptor::SafeArray {
                element,
                user_defined_name,
            } => {
                #[allow(clippy::cast_possible_truncation)]
                let element = *element as u8;
                buffer.push(element);
                if let Some(name) = user_defined_name {
                    write_packed_string(name, &mut buffer)?;
                }
            }
            MarshalDescriptor::Interface {
                iid_param_index, ..
            } => {
                if let Some(index) = iid_param_index {
                    write_compressed_uint(*index, &mut buffer)?;
                }
            }
            MarshalDescriptor::CustomMarshaler {
                guid,
                native_type_name,
                marshaler,
                cookie,
            } => {
                write_packed_string(guid, &mut buffer)?;
                write_packed_string(native_type_name, &mut buffer)?;
                write_packed_string(marshaler, &mut buffer)?;
                write_packed_string(cookie, &mut buffer)?;
            }
        }

        Ok(buffer)
    }

    /// Decode a descriptor blob.
    ///
    /// # Errors
    /// Returns an error if the blob is empty or truncated.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(data);
        let native_type = parser.read_le::<u8>()?;

        let optional_uint = |parser: &mut Parser| -> Result<Option<u32>> {
            if parser.has_more_data() {
                Ok(Some(parser.read_compressed_uint()?))
            } else {
                Ok(None)
            }
        };

        Ok(match native_type {
            NATIVE_TYPE::FIXEDSYSSTRING => MarshalDescriptor::ByValTStr {
                size: parser.read_compressed_uint()?,
            },
            NATIVE_TYPE::FIXEDARRAY => {
                let size = parser.read_compressed_uint()?;
                let element = if parser.has_more_data() {
                    Some(parser.read_le::<u8>()?)
                } else {
                    None
                };
                MarshalDescriptor::ByValArray { size, element }
            }
            NATIVE_TYPE::ARRAY => {
                let element = if parser.has_more_data() {
                    parser.read_le::<u8>()?
                } else {
                    NATIVE_TYPE::MAX
                };
                let size_param_index = optional_uint(&mut parser)?;
                let size_const = optional_uint(&mut parser)?;
                MarshalDescriptor::LPArray {
                    element,
                    size_param_index,
                    size_const,
                }
            }
            NATIVE_TYPE::SAFEARRAY => {
                let element = if parser.has_more_data() {
                    u16::from(parser.read_le::<u8>()?) & VARIANT_TYPE::TYPEMASK
                } else {
                    VARIANT_TYPE::EMPTY
                };
                let user_defined_name = if parser.has_more_data() {
                    Some(read_packed_string(&mut parser)?)
                } else {
                    None
                };
                MarshalDescriptor::SafeArray {
                    element,
                    user_defined_name,
                }
            }
            NATIVE_TYPE::INTERFACE
            | NATIVE_TYPE::IUNKNOWN
            | NATIVE_TYPE::IDISPATCH
            | NATIVE_TYPE::IINSPECTABLE => MarshalDescriptor::Interface {
                native_type,
                iid_param_index: optional_uint(&mut parser)?,
            },
            NATIVE_TYPE::CUSTOMMARSHALER => MarshalDescriptor::CustomMarshaler {
                guid: read_packed_string(&mut parser)?,
                native_type_name: read_packed_string(&mut parser)?,
                marshaler: read_packed_string(&mut parser)?,
                cookie: read_packed_string(&mut parser)?,
            },
            other => MarshalDescriptor::Simple(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple() {
        let descriptor = MarshalDescriptor::Simple(NATIVE_TYPE::LPWSTR);
        assert_eq!(descriptor.encode().unwrap(), vec![0x15]);
        assert_eq!(MarshalDescriptor::decode(&[0x15]).unwrap(), descriptor);
    }

    #[test]
    fn arrays() {
        let by_val = MarshalDescriptor::ByValArray {
            size: 16,
            element: Some(NATIVE_TYPE::U1),
        };
        assert_eq!(by_val.encode().unwrap(), vec![0x1E, 0x10, 0x04]);

        let lp_array = MarshalDescriptor::LPArray {
            element: NATIVE_TYPE::I4,
            size_param_index: Some(1),
            size_const: None,
        };
        let blob = lp_array.encode().unwrap();
        assert_eq!(blob, vec![0x2A, 0x07, 0x01]);
        assert_eq!(MarshalDescriptor::decode(&blob).unwrap(), lp_array);

        let by_val_str = MarshalDescriptor::ByValTStr { size: 260 };
        let blob = by_val_str.encode().unwrap();
        assert_eq!(MarshalDescriptor::decode(&blob).unwrap(), by_val_str);
    }

    #[test]
    fn custom_marshaler() {
        let descriptor = MarshalDescriptor::CustomMarshaler {
            guid: String::new(),
            native_type_name: String::new(),
            marshaler: "Sample.Marshaler".to_string(),
            cookie: "cookie".to_string(),
        };
        let blob = descriptor.encode().unwrap();
        assert_eq!(&blob[..4], &[0x2C, 0x00, 0x00, 0x10]);
        assert_eq!(MarshalDescriptor::decode(&blob).unwrap(), descriptor);
    }

    #[test]
    fn safe_array() {
        let descriptor = MarshalDescriptor::SafeArray {
            element: VARIANT_TYPE::BSTR,
            user_defined_name: None,
        };
        let blob = descriptor.encode().unwrap();
        assert_eq!(blob, vec![0x1D, 0x08]);
        assert_eq!(MarshalDescriptor::decode(&blob).unwrap(), descriptor);
        assert!(MarshalDescriptor::decode(&[]).is_err());
    }
}
