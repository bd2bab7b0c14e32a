use crate::{
    file::parser::Parser,
    metadata::{
        flags::CallingConventions,
        signatures::{
            CustomModifier, SignatureArray, SignatureField, SignatureLocalVariable,
            SignatureLocalVariables, SignatureMethod, SignatureMethodSpec, SignatureParameter,
            SignaturePointer, SignatureProperty, SignatureSzArray, TypeSignature, ELEMENT_TYPE,
            SIGNATURE_HEADER,
        },
    },
    Error::RecursionLimit,
    Result,
};

const MAX_RECURSION_DEPTH: usize = 50;

/// Reads signature blobs into [`TypeSignature`] based structures.
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Create a parser over one signature blob.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    /// Parse one type.
    ///
    /// # Errors
    /// Returns an error for truncated input, unknown element types or excessive nesting.
    pub fn parse_type(&mut self) -> Result<TypeSignature> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let result = self.parse_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_type_inner(&mut self) -> Result<TypeSignature> {
        let current_byte = self.parser.read_le::<u8>()?;
        match current_byte {
            ELEMENT_TYPE::VOID => Ok(TypeSignature::Void),
            ELEMENT_TYPE::BOOLEAN => Ok(TypeSignature::Boolean),
            ELEMENT_TYPE::CHAR => Ok(TypeSignature::Char),
            ELEMENT_TYPE::I1 => Ok(TypeSignature::I1),
            ELEMENT_TYPE::U1 => Ok(TypeSignature::U1),
            ELEMENT_TYPE::I2 => Ok(TypeSignature::I2),
            ELEMENT_TYPE::U2 => Ok(TypeSignature::U2),
            ELEMENT_TYPE::I4 => Ok(TypeSignature::I4),
            ELEMENT_TYPE::U4 => Ok(TypeSignature::U4),
            ELEMENT_TYPE::I8 => Ok(TypeSignature::I8),
            ELEMENT_TYPE::U8 => Ok(TypeSignature::U8),
            ELEMENT_TYPE::R4 => Ok(TypeSignature::R4),
            ELEMENT_TYPE::R8 => Ok(TypeSignature::R8),
            ELEMENT_TYPE::STRING => Ok(TypeSignature::String),
            ELEMENT_TYPE::PTR => Ok(TypeSignature::Ptr(SignaturePointer {
                modifiers: self.parse_custom_mods()?,
                base: Box::new(self.parse_type()?),
            })),
            ELEMENT_TYPE::BYREF => Ok(TypeSignature::ByRef(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::VALUETYPE => Ok(TypeSignature::ValueType(
                self.parser.read_compressed_token()?,
            )),
            ELEMENT_TYPE::CLASS => Ok(TypeSignature::Class(self.parser.read_compressed_token()?)),
            ELEMENT_TYPE::VAR => Ok(TypeSignature::GenericParamType(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::ARRAY => {
                let elem_type = self.parse_type()?;
                let rank = self.parser.read_compressed_uint()?;

                let num_sizes = self.parser.read_compressed_uint()?;
                let mut sizes = Vec::with_capacity(num_sizes.min(rank) as usize);
                for _ in 0..num_sizes {
                    sizes.push(self.parser.read_compressed_uint()?);
                }

                let num_lo_bounds = self.parser.read_compressed_uint()?;
                let mut lower_bounds = Vec::with_capacity(num_lo_bounds.min(rank) as usize);
                for _ in 0..num_lo_bounds {
                    lower_bounds.push(self.parser.read_compressed_int()?);
                }

                Ok(TypeSignature::Array(SignatureArray {
                    base: Box::new(elem_type),
                    rank,
                    sizes,
                    lower_bounds,
                }))
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.parser.peek_byte()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        peek_byte
                    ));
                }

                let base_type = self.parse_type()?;
                let arg_count = self.parser.read_compressed_uint()?;

                let mut type_args = Vec::with_capacity(arg_count.min(64) as usize);
                for _ in 0..arg_count {
                    type_args.push(self.parse_type()?);
                }

                Ok(TypeSignature::GenericInst(Box::new(base_type), type_args))
            }
            ELEMENT_TYPE::TYPEDBYREF => Ok(TypeSignature::TypedByRef),
            ELEMENT_TYPE::I => Ok(TypeSignature::I),
            ELEMENT_TYPE::U => Ok(TypeSignature::U),
            ELEMENT_TYPE::FNPTR => Ok(TypeSignature::FnPtr(Box::new(
                self.parse_method_signature()?,
            ))),
            ELEMENT_TYPE::OBJECT => Ok(TypeSignature::Object),
            ELEMENT_TYPE::SZARRAY => Ok(TypeSignature::SzArray(SignatureSzArray {
                modifiers: self.parse_custom_mods()?,
                base: Box::new(self.parse_type()?),
            })),
            ELEMENT_TYPE::MVAR => Ok(TypeSignature::GenericParamMethod(
                self.parser.read_compressed_uint()?,
            )),
            ELEMENT_TYPE::PINNED => Ok(TypeSignature::Pinned(Box::new(self.parse_type()?))),
            _ => Err(malformed_error!(
                "Unsupported ELEMENT_TYPE - {}",
                current_byte
            )),
        }
    }

    fn parse_custom_mods(&mut self) -> Result<Vec<CustomModifier>> {
        let mut mods = Vec::new();

        while self.parser.has_more_data() {
            let next_byte = self.parser.peek_byte()?;
            if next_byte != ELEMENT_TYPE::CMOD_OPT && next_byte != ELEMENT_TYPE::CMOD_REQD {
                break;
            }

            self.parser.advance()?;

            mods.push(CustomModifier {
                is_required: next_byte == ELEMENT_TYPE::CMOD_REQD,
                modifier_type: self.parser.read_compressed_token()?,
            });
        }

        Ok(mods)
    }

    fn parse_param(&mut self) -> Result<SignatureParameter> {
        let custom_mods = self.parse_custom_mods()?;

        let mut by_ref = false;
        if self.parser.peek_byte()? == ELEMENT_TYPE::BYREF {
            self.parser.advance()?;
            by_ref = true;
        }

        Ok(SignatureParameter {
            modifiers: custom_mods,
            by_ref,
            base: self.parse_type()?,
        })
    }

    /// Parse a method signature.
    ///
    /// # Errors
    /// Returns an error for truncated or malformed input.
    pub fn parse_method_signature(&mut self) -> Result<SignatureMethod> {
        let convention_byte = self.parser.read_le::<u8>()?;
        let calling_convention = CallingConventions::from_bits_retain(convention_byte);

        let generic_param_count = if calling_convention.contains(CallingConventions::GENERIC) {
            self.parser.read_compressed_uint()?
        } else {
            0
        };
        let param_count = self.parser.read_compressed_uint()?;

        let mut method = SignatureMethod {
            calling_convention: calling_convention - CallingConventions::GENERIC,
            generic_param_count,
            return_type: self.parse_param()?,
            params: Vec::new(),
            varargs: Vec::new(),
        };

        let mut in_varargs = false;
        for _ in 0..param_count {
            if self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                self.parser.advance()?;
                in_varargs = true;
            }

            let param = self.parse_param()?;
            if in_varargs {
                method.varargs.push(param);
            } else {
                method.params.push(param);
            }
        }

        Ok(method)
    }

    /// Parse a field signature.
    ///
    /// # Errors
    /// Returns an error for truncated or malformed input.
    pub fn parse_field_signature(&mut self) -> Result<SignatureField> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::FIELD {
            return Err(malformed_error!(
                "SignatureField - invalid start - {}",
                head_byte
            ));
        }

        let custom_mods = self.parse_custom_mods()?;
        let type_sig = self.parse_type()?;

        Ok(SignatureField {
            modifiers: custom_mods,
            base: type_sig,
        })
    }

    /// Parse a property signature.
    ///
    /// # Errors
    /// Returns an error for truncated or malformed input.
    pub fn parse_property_signature(&mut self) -> Result<SignatureProperty> {
        let head_byte = self.parser.read_le::<u8>()?;
        if (head_byte & SIGNATURE_HEADER::PROPERTY) == 0 {
            return Err(malformed_error!(
                "SignatureProperty - invalid start - {}",
                head_byte
            ));
        }

        let has_this = (head_byte & CallingConventions::HAS_THIS.bits()) != 0;

        let param_count = self.parser.read_compressed_uint()?;
        let custom_mods = self.parse_custom_mods()?;
        let type_sig = self.parse_type()?;

        let mut params = Vec::with_capacity(param_count.min(64) as usize);
        for _ in 0..param_count {
            params.push(self.parse_param()?);
        }

        Ok(SignatureProperty {
            has_this,
            modifiers: custom_mods,
            base: type_sig,
            params,
        })
    }

    /// Parse a local variable signature.
    ///
    /// # Errors
    /// Returns an error for truncated or malformed input.
    pub fn parse_local_var_signature(&mut self) -> Result<SignatureLocalVariables> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::LOCAL_SIG {
            return Err(malformed_error!(
                "SignatureLocalVar - invalid start - {}",
                head_byte
            ));
        }

        let count = self.parser.read_compressed_uint()?;

        let mut locals = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            if self.parser.peek_byte()? == ELEMENT_TYPE::TYPEDBYREF {
                locals.push(SignatureLocalVariable {
                    base: TypeSignature::TypedByRef,
                    ..Default::default()
                });
                self.parser.advance()?;

                continue;
            }

            // Modifiers and the pinned constraint may interleave, II.23.2.6
            let mut modifiers = Vec::new();
            let mut pinned = false;
            while self.parser.has_more_data() {
                match self.parser.peek_byte()? {
                    ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                        modifiers.extend(self.parse_custom_mods()?);
                    }
                    ELEMENT_TYPE::PINNED => {
                        self.parser.advance()?;
                        pinned = true;
                    }
                    _ => break,
                }
            }

            let by_ref = if self.parser.peek_byte()? == ELEMENT_TYPE::BYREF {
                self.parser.advance()?;
                true
            } else {
                false
            };

            let type_sig = self.parse_type()?;

            locals.push(SignatureLocalVariable {
                modifiers,
                is_byref: by_ref,
                is_pinned: pinned,
                base: type_sig,
            });
        }

        Ok(SignatureLocalVariables { locals })
    }

    /// Parse a method specification signature.
    ///
    /// # Errors
    /// Returns an error for truncated or malformed input.
    pub fn parse_method_spec_signature(&mut self) -> Result<SignatureMethodSpec> {
        let head_byte = self.parser.read_le::<u8>()?;
        if head_byte != SIGNATURE_HEADER::METHOD_SPEC {
            return Err(malformed_error!(
                "SignatureMethodSpec - invalid start - {}",
                head_byte
            ));
        }

        let arg_count = self.parser.read_compressed_uint()?;
        let mut generic_args = Vec::with_capacity(arg_count.min(64) as usize);
        for _ in 0..arg_count {
            generic_args.push(self.parse_type()?);
        }

        Ok(SignatureMethodSpec { generic_args })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;

    #[test]
    fn test_parse_primitive_types() {
        let test_cases = [
            (vec![0x01], TypeSignature::Void),
            (vec![0x02], TypeSignature::Boolean),
            (vec![0x03], TypeSignature::Char),
            (vec![0x08], TypeSignature::I4),
            (vec![0x0B], TypeSignature::U8),
            (vec![0x0D], TypeSignature::R8),
            (vec![0x0E], TypeSignature::String),
            (vec![0x1C], TypeSignature::Object),
            (vec![0x18], TypeSignature::I),
            (vec![0x19], TypeSignature::U),
        ];

        for (bytes, expected_type) in test_cases {
            let mut parser = SignatureParser::new(&bytes);
            assert_eq!(parser.parse_type().unwrap(), expected_type);
        }
    }

    #[test]
    fn test_parse_class_and_valuetype() {
        let mut parser = SignatureParser::new(&[0x12, 0x42]);
        assert_eq!(
            parser.parse_type().unwrap(),
            TypeSignature::Class(Token::new(0x1B00_0010))
        );

        let mut parser = SignatureParser::new(&[0x11, 0x35]);
        assert_eq!(
            parser.parse_type().unwrap(),
            TypeSignature::ValueType(Token::new(0x0100_000D))
        );

        let mut parser = SignatureParser::new(&[0x13, 0x03]);
        assert_eq!(
            parser.parse_type().unwrap(),
            TypeSignature::GenericParamType(0x03)
        );
    }

    #[test]
    fn test_parse_array_with_bounds() {
        // int32[-1..., 0...4] rank 2, one size (5), two lower bounds (-1, 0)
        let mut parser = SignatureParser::new(&[0x14, 0x08, 0x02, 0x01, 0x05, 0x02, 0x7F, 0x00]);
        assert_eq!(
            parser.parse_type().unwrap(),
            TypeSignature::Array(SignatureArray {
                base: Box::new(TypeSignature::I4),
                rank: 2,
                sizes: vec![5],
                lower_bounds: vec![-1, 0],
            })
        );
    }

    #[test]
    fn test_parse_generic_method_with_modifiers() {
        // GENERIC|HASTHIS, 1 generic param, 1 param, returns void, param modreq(TypeRef 1) !!0
        let data = [0x30, 0x01, 0x01, 0x01, 0x1F, 0x05, 0x1E, 0x00];
        let method = SignatureParser::new(&data).parse_method_signature().unwrap();
        assert!(method.has_this());
        assert_eq!(method.generic_param_count, 1);
        assert_eq!(method.params.len(), 1);
        assert_eq!(
            method.params[0].modifiers,
            vec![CustomModifier {
                is_required: true,
                modifier_type: Token::new(0x0100_0001)
            }]
        );
        assert_eq!(method.params[0].base, TypeSignature::GenericParamMethod(0));
    }

    #[test]
    fn test_parse_vararg_sentinel() {
        // VARARG, 2 params, void (int32, SENTINEL string)
        let data = [0x05, 0x02, 0x01, 0x08, 0x41, 0x0E];
        let method = SignatureParser::new(&data).parse_method_signature().unwrap();
        assert_eq!(method.params.len(), 1);
        assert_eq!(method.varargs.len(), 1);
        assert_eq!(method.varargs[0].base, TypeSignature::String);
    }

    #[test]
    fn test_parse_locals() {
        // 2 locals: pinned byref int32, typedbyref
        let data = [0x07, 0x02, 0x45, 0x10, 0x08, 0x16];
        let locals = SignatureParser::new(&data)
            .parse_local_var_signature()
            .unwrap();
        assert_eq!(locals.locals.len(), 2);
        assert!(locals.locals[0].is_pinned);
        assert!(locals.locals[0].is_byref);
        assert_eq!(locals.locals[1].base, TypeSignature::TypedByRef);
    }

    #[test]
    fn test_recursion_limit() {
        let data = vec![0x0F; 100];
        assert!(matches!(
            SignatureParser::new(&data).parse_type(),
            Err(RecursionLimit(_))
        ));
    }

    #[test]
    fn test_invalid_headers() {
        assert!(SignatureParser::new(&[0x07]).parse_field_signature().is_err());
        assert!(SignatureParser::new(&[0x06]).parse_local_var_signature().is_err());
        assert!(SignatureParser::new(&[0x0B]).parse_method_spec_signature().is_err());
    }
}
