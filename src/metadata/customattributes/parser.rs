use crate::{
    file::parser::Parser,
    metadata::customattributes::{
        CaNamedArgument, CaType, CaValue, CustomAttributeValue, CUSTOM_ATTRIBUTE_PROLOG,
        SERIALIZATION_TYPE,
    },
    Result,
};

const MAX_NESTING: usize = 16;

/// Decode a custom attribute blob.
///
/// `param_types` are the constructor parameter types in declaration order. Enums named in
/// the blob (named arguments and boxed values only carry the name) are resolved through
/// `resolve_enum`; unknown enums are read as `int32`.
///
/// # Errors
/// Returns an error if the prolog is wrong or the blob is truncated.
pub fn parse_custom_attribute(
    data: &[u8],
    param_types: &[CaType],
    resolve_enum: &dyn Fn(&str) -> Option<CaType>,
) -> Result<CustomAttributeValue> {
    CustomAttributeParser {
        parser: Parser::new(data),
        resolve_enum,
    }
    .parse(param_types)
}

struct CustomAttributeParser<'a, 'r> {
    parser: Parser<'a>,
    resolve_enum: &'r dyn Fn(&str) -> Option<CaType>,
}

impl CustomAttributeParser<'_, '_> {
    fn parse(&mut self, param_types: &[CaType]) -> Result<CustomAttributeValue> {
        if self.parser.len() < 2 {
            return Err(malformed_error!(
                "Custom attribute blob too short - {}",
                self.parser.len()
            ));
        }

        let prolog = self.parser.read_le::<u16>()?;
        if prolog != CUSTOM_ATTRIBUTE_PROLOG {
            return Err(malformed_error!(
                "Invalid custom attribute prolog - {:#06x}",
                prolog
            ));
        }

        let mut fixed_args = Vec::with_capacity(param_types.len());
        for ty in param_types {
            fixed_args.push(self.parse_value(ty, 0)?);
        }

        let mut named_args = Vec::new();
        if self.parser.has_more_data() {
            let count = self.parser.read_le::<u16>()?;
            for _ in 0..count {
                named_args.push(self.parse_named_argument()?);
            }
        }

        Ok(CustomAttributeValue {
            fixed_args,
            named_args,
        })
    }

    fn parse_named_argument(&mut self) -> Result<CaNamedArgument> {
        let is_field = match self.parser.read_le::<u8>()? {
            SERIALIZATION_TYPE::FIELD => true,
            SERIALIZATION_TYPE::PROPERTY => false,
            other => {
                return Err(malformed_error!(
                    "Invalid named argument kind - {:#04x}",
                    other
                ))
            }
        };

        let arg_type = self.parse_type(0)?;
        let Some(name) = self.parser.read_ser_string()? else {
            return Err(malformed_error!("Named argument without a name"));
        };
        let value = self.parse_value(&arg_type, 0)?;

        Ok(CaNamedArgument {
            is_field,
            name,
            arg_type,
            value,
        })
    }

    fn parse_type(&mut self, depth: usize) -> Result<CaType> {
        if depth > MAX_NESTING {
            return Err(crate::Error::RecursionLimit(MAX_NESTING));
        }

        let tag = self.parser.read_le::<u8>()?;
        match tag {
            SERIALIZATION_TYPE::ENUM => {
                let Some(name) = self.parser.read_ser_string()? else {
                    return Err(malformed_error!("Enum argument without a type name"));
                };
                let underlying = (self.resolve_enum)(&name).unwrap_or(CaType::I4);
                Ok(CaType::Enum {
                    name,
                    underlying: Box::new(underlying),
                })
            }
            SERIALIZATION_TYPE::SZARRAY => {
                Ok(CaType::SzArray(Box::new(self.parse_type(depth + 1)?)))
            }
            other => CaType::from_primitive(other)
                .ok_or_else(|| malformed_error!("Invalid serialization type - {:#04x}", other)),
        }
    }

    fn parse_value(&mut self, ty: &CaType, depth: usize) -> Result<CaValue> {
        if depth > MAX_NESTING {
            return Err(crate::Error::RecursionLimit(MAX_NESTING));
        }

        Ok(match ty {
            CaType::Boolean => CaValue::Bool(self.parser.read_le::<u8>()? != 0),
            CaType::Char => CaValue::Char(self.parser.read_le::<u16>()?),
            CaType::I1 => CaValue::I1(self.parser.read_le::<i8>()?),
            CaType::U1 => CaValue::U1(self.parser.read_le::<u8>()?),
            CaType::I2 => CaValue::I2(self.parser.read_le::<i16>()?),
            CaType::U2 => CaValue::U2(self.parser.read_le::<u16>()?),
            CaType::I4 => CaValue::I4(self.parser.read_le::<i32>()?),
            CaType::U4 => CaValue::U4(self.parser.read_le::<u32>()?),
            CaType::I8 => CaValue::I8(self.parser.read_le::<i64>()?),
            CaType::U8 => CaValue::U8(self.parser.read_le::<u64>()?),
            CaType::R4 => CaValue::R4(self.parser.read_le::<f32>()?),
            CaType::R8 => CaValue::R8(self.parser.read_le::<f64>()?),
            CaType::String => CaValue::String(self.parser.read_ser_string()?),
            CaType::Type => CaValue::Type(self.parser.read_ser_string()?),
            CaType::Boxed => {
                let inner_type = self.parse_type(depth + 1)?;
                CaValue::Boxed(Box::new(self.parse_value(&inner_type, depth + 1)?))
            }
            CaType::Enum { name, underlying } => CaValue::Enum {
                type_name: name.clone(),
                value: Box::new(self.parse_value(underlying, depth + 1)?),
            },
            CaType::SzArray(element) => {
                let count = self.parser.read_le::<u32>()?;
                if count == u32::MAX {
                    CaValue::Array {
                        element: (**element).clone(),
                        values: None,
                    }
                } else {
                    if count as usize > self.parser.remaining() {
                        return Err(malformed_error!(
                            "Array length {} exceeds the blob",
                            count
                        ));
                    }
                    let mut values = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        values.push(self.parse_value(element, depth + 1)?);
                    }
                    CaValue::Array {
                        element: (**element).clone(),
                        values: Some(values),
                    }
                }
            }
        })
    }
}
