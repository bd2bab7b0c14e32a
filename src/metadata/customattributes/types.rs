//! Value model of custom attribute blobs (ECMA-335 II.23.3).

/// .NET `CorSerializationType` constants as defined in corhdr.h
#[allow(non_snake_case, missing_docs)]
pub mod SERIALIZATION_TYPE {
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0A;
    pub const U8: u8 = 0x0B;
    pub const R4: u8 = 0x0C;
    pub const R8: u8 = 0x0D;
    pub const STRING: u8 = 0x0E;
    pub const SZARRAY: u8 = 0x1D;
    pub const TYPE: u8 = 0x50;
    pub const TAGGED_OBJECT: u8 = 0x51;
    pub const FIELD: u8 = 0x53;
    pub const PROPERTY: u8 = 0x54;
    pub const ENUM: u8 = 0x55;
}

/// The type of an attribute argument (`FieldOrPropType`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CaType {
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    /// `System.Type`, serialized as a type name
    Type,
    /// `System.Object`, the value carries its own type tag
    Boxed,
    /// An enum, by full (or assembly qualified) name and underlying type
    Enum {
        name: String,
        underlying: Box<CaType>,
    },
    /// Single dimensional array
    SzArray(Box<CaType>),
}

impl CaType {
    /// Map a primitive serialization tag.
    #[must_use]
    pub fn from_primitive(tag: u8) -> Option<CaType> {
        use SERIALIZATION_TYPE as S;
        Some(match tag {
            S::BOOLEAN => CaType::Boolean,
            S::CHAR => CaType::Char,
            S::I1 => CaType::I1,
            S::U1 => CaType::U1,
            S::I2 => CaType::I2,
            S::U2 => CaType::U2,
            S::I4 => CaType::I4,
            S::U4 => CaType::U4,
            S::I8 => CaType::I8,
            S::U8 => CaType::U8,
            S::R4 => CaType::R4,
            S::R8 => CaType::R8,
            S::STRING => CaType::String,
            S::TYPE => CaType::Type,
            S::TAGGED_OBJECT => CaType::Boxed,
            _ => return None,
        })
    }

    /// Returns true for the integral types an enum may be based on.
    #[must_use]
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            CaType::Boolean
                | CaType::Char
                | CaType::I1
                | CaType::U1
                | CaType::I2
                | CaType::U2
                | CaType::I4
                | CaType::U4
                | CaType::I8
                | CaType::U8
        )
    }
}

/// One argument value of a custom attribute.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum CaValue {
    Bool(bool),
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
    /// `None` is the null string
    String(Option<String>),
    /// A type by name, `None` is the null type
    Type(Option<String>),
    /// An enum value, `value` holds the underlying integral value
    Enum {
        type_name: String,
        value: Box<CaValue>,
    },
    /// An array, `None` is the null array
    Array {
        element: CaType,
        values: Option<Vec<CaValue>>,
    },
    /// A value passed for an `object` parameter
    Boxed(Box<CaValue>),
}

impl CaValue {
    /// The serialization type of this value.
    #[must_use]
    pub fn ca_type(&self) -> CaType {
        match self {
            CaValue::Bool(_) => CaType::Boolean,
            CaValue::Char(_) => CaType::Char,
            CaValue::I1(_) => CaType::I1,
            CaValue::U1(_) => CaType::U1,
            CaValue::I2(_) => CaType::I2,
            CaValue::U2(_) => CaType::U2,
            CaValue::I4(_) => CaType::I4,
            CaValue::U4(_) => CaType::U4,
            CaValue::I8(_) => CaType::I8,
            CaValue::U8(_) => CaType::U8,
            CaValue::R4(_) => CaType::R4,
            CaValue::R8(_) => CaType::R8,
            CaValue::String(_) => CaType::String,
            CaValue::Type(_) => CaType::Type,
            CaValue::Enum { type_name, value } => CaType::Enum {
                name: type_name.clone(),
                underlying: Box::new(value.ca_type()),
            },
            CaValue::Array { element, .. } => CaType::SzArray(Box::new(element.clone())),
            CaValue::Boxed(_) => CaType::Boxed,
        }
    }

    /// The value as a signed 64 bit integer, for integral and enum values.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        Some(match self {
            CaValue::Bool(value) => i64::from(*value),
            CaValue::Char(value) | CaValue::U2(value) => i64::from(*value),
            CaValue::I1(value) => i64::from(*value),
            CaValue::U1(value) => i64::from(*value),
            CaValue::I2(value) => i64::from(*value),
            CaValue::I4(value) => i64::from(*value),
            CaValue::U4(value) => i64::from(*value),
            CaValue::I8(value) => *value,
            #[allow(clippy::cast_possible_wrap)]
            CaValue::U8(value) => *value as i64,
            CaValue::Enum { value, .. } | CaValue::Boxed(value) => return value.as_i64(),
            _ => return None,
        })
    }

    /// The value as a string, for string and type values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CaValue::String(value) | CaValue::Type(value) => value.as_deref(),
            CaValue::Boxed(value) => value.as_str(),
            _ => None,
        }
    }
}

/// A named field or property assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct CaNamedArgument {
    /// `true` for a field, `false` for a property
    pub is_field: bool,
    /// Name of the field or property
    pub name: String,
    /// Declared type of the field or property
    pub arg_type: CaType,
    /// Assigned value
    pub value: CaValue,
}

/// A decoded custom attribute blob.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomAttributeValue {
    /// Fixed arguments in constructor parameter order
    pub fixed_args: Vec<CaValue>,
    /// Named arguments in declaration order
    pub named_args: Vec<CaNamedArgument>,
}
