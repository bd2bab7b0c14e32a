use crate::{
    file::io::WriteLe,
    metadata::customattributes::{CaNamedArgument, CaType, CaValue, SERIALIZATION_TYPE},
    utils::write_compressed_uint,
    Result,
};

/// Prolog of every custom attribute blob.
pub const CUSTOM_ATTRIBUTE_PROLOG: u16 = 0x0001;

fn write_ser_string(value: Option<&str>, buffer: &mut Vec<u8>) -> Result<()> {
    match value {
        None => buffer.push(0xFF),
        Some(value) => {
            #[allow(clippy::cast_possible_truncation)]
            let length = value.len() as u32;
            write_compressed_uint(length, buffer)?;
            buffer.extend_from_slice(value.as_bytes());
        }
    }
    Ok(())
}

/// Append the `FieldOrPropType` encoding of `ty`.
///
/// # Errors
/// Returns an error if an enum name is too long to encode.
pub fn encode_ca_type(ty: &CaType, buffer: &mut Vec<u8>) -> Result<()> {
    use SERIALIZATION_TYPE as S;
    let tag = match ty {
        CaType::Boolean => S::BOOLEAN,
        CaType::Char => S::CHAR,
        CaType::I1 => S::I1,
        CaType::U1 => S::U1,
        CaType::I2 => S::I2,
        CaType::U2 => S::U2,
        CaType::I4 => S::I4,
        CaType::U4 => S::U4,
        CaType::I8 => S::I8,
        CaType::U8 => S::U8,
        CaType::R4 => S::R4,
        CaType::R8 => S::R8,
        CaType::String => S::STRING,
        CaType::Type => S::TYPE,
        CaType::Boxed => S::TAGGED_OBJECT,
        CaType::Enum { name, .. } => {
            buffer.push(S::ENUM);
            return write_ser_string(Some(name), buffer);
        }
        CaType::SzArray(element) => {
            buffer.push(S::SZARRAY);
            return encode_ca_type(element, buffer);
        }
    };
    buffer.push(tag);
    Ok(())
}

fn mismatch(ty: &CaType, value: &CaValue) -> crate::Error {
    invalid_argument!(
        "constructorArgs",
        "Value {:?} does not match the argument type {:?}",
        value,
        ty
    )
}

/// Append `value` encoded as an element of type `ty`.
///
/// # Errors
/// Returns [`crate::Error::InvalidArgument`] if the value does not match the type.
pub fn encode_ca_value(ty: &CaType, value: &CaValue, buffer: &mut Vec<u8>) -> Result<()> {
    match (ty, value) {
        (CaType::Boxed, CaValue::Boxed(inner)) => {
            encode_ca_type(&inner.ca_type(), buffer)?;
            encode_ca_value(&inner.ca_type(), inner, buffer)
        }
        (CaType::Boxed, other) => {
            encode_ca_type(&other.ca_type(), buffer)?;
            encode_ca_value(&other.ca_type(), other, buffer)
        }
        (CaType::Enum { underlying, .. }, CaValue::Enum { value, .. }) => {
            encode_ca_value(underlying, value, buffer)
        }
        (CaType::Enum { underlying, .. }, other) if other.ca_type() == **underlying => {
            encode_ca_value(underlying, other, buffer)
        }
        (CaType::SzArray(element), CaValue::Array { values, .. }) => match values {
            None => {
                buffer.write_le::<u32>(u32::MAX);
                Ok(())
            }
            Some(values) => {
                #[allow(clippy::cast_possible_truncation)]
                let count = values.len() as u32;
                buffer.write_le::<u32>(count);
                for item in values {
                    encode_ca_value(element, item, buffer)?;
                }
                Ok(())
            }
        },
        (CaType::String, CaValue::String(value)) | (CaType::Type, CaValue::Type(value)) => {
            write_ser_string(value.as_deref(), buffer)
        }
        (CaType::Boolean, CaValue::Bool(value)) => {
            buffer.push(u8::from(*value));
            Ok(())
        }
        (CaType::Char, CaValue::Char(value)) | (CaType::U2, CaValue::U2(value)) => {
            buffer.write_le::<u16>(*value);
            Ok(())
        }
        (CaType::I1, CaValue::I1(value)) => {
            buffer.write_le::<i8>(*value);
            Ok(())
        }
        (CaType::U1, CaValue::U1(value)) => {
            buffer.push(*value);
            Ok(())
        }
        (CaType::I2, CaValue::I2(value)) => {
            buffer.write_le::<i16>(*value);
            Ok(())
        }
        (CaType::I4, CaValue::I4(value)) => {
            buffer.write_le::<i32>(*value);
            Ok(())
        }
        (CaType::U4, CaValue::U4(value)) => {
            buffer.write_le::<u32>(*value);
            Ok(())
        }
        (CaType::I8, CaValue::I8(value)) => {
            buffer.write_le::<i64>(*value);
            Ok(())
        }
        (CaType::U8, CaValue::U8(value)) => {
            buffer.write_le::<u64>(*value);
            Ok(())
        }
        (CaType::R4, CaValue::R4(value)) => {
            buffer.write_le::<f32>(*value);
            Ok(())
        }
        (CaType::R8, CaValue::R8(value)) => {
            buffer.write_le::<f64>(*value);
            Ok(())
        }
        _ => Err(mismatch(ty, value)),
    }
}

/// Encode a complete custom attribute blob.
///
/// `fixed_args` pairs every constructor parameter type with its value.
///
/// # Errors
/// Returns [`crate::Error::InvalidArgument`] if a value does not match its type.
pub fn encode_custom_attribute(
    fixed_args: &[(CaType, CaValue)],
    named_args: &[CaNamedArgument],
) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(16);
    buffer.write_le::<u16>(CUSTOM_ATTRIBUTE_PROLOG);

    for (ty, value) in fixed_args {
        encode_ca_value(ty, value, &mut buffer)?;
    }

    #[allow(clippy::cast_possible_truncation)]
    let named_count = named_args.len() as u16;
    buffer.write_le::<u16>(named_count);
    for named in named_args {
        buffer.push(if named.is_field {
            SERIALIZATION_TYPE::FIELD
        } else {
            SERIALIZATION_TYPE::PROPERTY
        });
        encode_ca_type(&named.arg_type, &mut buffer)?;
        write_ser_string(Some(&named.name), &mut buffer)?;
        encode_ca_value(&named.arg_type, &named.value, &mut buffer)?;
    }

    Ok(buffer)
}
