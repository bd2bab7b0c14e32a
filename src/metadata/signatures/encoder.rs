use crate::{
    metadata::{
        flags::CallingConventions,
        signatures::{
            CustomModifier, SignatureField, SignatureLocalVariables, SignatureMethod,
            SignatureMethodSpec, SignatureParameter, SignatureProperty, TypeSignature,
            ELEMENT_TYPE, SIGNATURE_HEADER,
        },
        token::Token,
    },
    utils::{write_compressed_int, write_compressed_uint},
    Result,
};

fn encode_custom_modifier(modifier: &CustomModifier, buffer: &mut Vec<u8>) -> Result<()> {
    let modifier_type = if modifier.is_required {
        ELEMENT_TYPE::CMOD_REQD
    } else {
        ELEMENT_TYPE::CMOD_OPT
    };
    buffer.push(modifier_type);

    let coded_index = encode_type_def_or_ref_coded_index(modifier.modifier_type)?;
    write_compressed_uint(coded_index, buffer)
}

/// Encode a token as `TypeDefOrRefOrSpecEncoded` (ECMA-335 II.23.2.8).
///
/// # Errors
/// Returns [`crate::Error::InvalidArgument`] for tokens of any other table.
pub fn encode_type_def_or_ref_coded_index(token: Token) -> Result<u32> {
    let table_id = token.table();
    let rid = token.row();

    match table_id {
        0x02 => Ok(rid << 2),       // TypeDef
        0x01 => Ok((rid << 2) | 1), // TypeRef
        0x1B => Ok((rid << 2) | 2), // TypeSpec
        _ => Err(invalid_argument!(
            "token",
            "Invalid token table 0x{:02X} for TypeDefOrRef coded index. Token: 0x{:08X}",
            table_id,
            token.value()
        )),
    }
}

fn encode_modifiers(modifiers: &[CustomModifier], buffer: &mut Vec<u8>) -> Result<()> {
    // Required modifiers precede optional ones, each group keeps its declaration order
    for modifier in modifiers.iter().filter(|modifier| modifier.is_required) {
        encode_custom_modifier(modifier, buffer)?;
    }
    for modifier in modifiers.iter().filter(|modifier| !modifier.is_required) {
        encode_custom_modifier(modifier, buffer)?;
    }
    Ok(())
}

/// Append the encoding of a single type.
///
/// # Errors
/// Returns an error if a token or a count can not be encoded.
pub fn encode_type_signature(signature: &TypeSignature, buffer: &mut Vec<u8>) -> Result<()> {
    match signature {
        TypeSignature::Void => buffer.push(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => buffer.push(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => buffer.push(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => buffer.push(ELEMENT_TYPE::I1),
        TypeSignature::U1 => buffer.push(ELEMENT_TYPE::U1),
        TypeSignature::I2 => buffer.push(ELEMENT_TYPE::I2),
        TypeSignature::U2 => buffer.push(ELEMENT_TYPE::U2),
        TypeSignature::I4 => buffer.push(ELEMENT_TYPE::I4),
        TypeSignature::U4 => buffer.push(ELEMENT_TYPE::U4),
        TypeSignature::I8 => buffer.push(ELEMENT_TYPE::I8),
        TypeSignature::U8 => buffer.push(ELEMENT_TYPE::U8),
        TypeSignature::R4 => buffer.push(ELEMENT_TYPE::R4),
        TypeSignature::R8 => buffer.push(ELEMENT_TYPE::R8),
        TypeSignature::String => buffer.push(ELEMENT_TYPE::STRING),
        TypeSignature::Object => buffer.push(ELEMENT_TYPE::OBJECT),
        TypeSignature::TypedByRef => buffer.push(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::I => buffer.push(ELEMENT_TYPE::I),
        TypeSignature::U => buffer.push(ELEMENT_TYPE::U),
        TypeSignature::Ptr(pointer) => {
            buffer.push(ELEMENT_TYPE::PTR);
            encode_modifiers(&pointer.modifiers, buffer)?;
            encode_type_signature(&pointer.base, buffer)?;
        }
        TypeSignature::ByRef(inner) => {
            buffer.push(ELEMENT_TYPE::BYREF);
            encode_type_signature(inner, buffer)?;
        }
        TypeSignature::Pinned(inner) => {
            buffer.push(ELEMENT_TYPE::PINNED);
            encode_type_signature(inner, buffer)?;
        }
        TypeSignature::ValueType(token) => {
            buffer.push(ELEMENT_TYPE::VALUETYPE);
            write_compressed_uint(encode_type_def_or_ref_coded_index(*token)?, buffer)?;
        }
        TypeSignature::Class(token) => {
            buffer.push(ELEMENT_TYPE::CLASS);
            write_compressed_uint(encode_type_def_or_ref_coded_index(*token)?, buffer)?;
        }
        TypeSignature::GenericParamType(position) => {
            buffer.push(ELEMENT_TYPE::VAR);
            write_compressed_uint(*position, buffer)?;
        }
        TypeSignature::GenericParamMethod(position) => {
            buffer.push(ELEMENT_TYPE::MVAR);
            write_compressed_uint(*position, buffer)?;
        }
        TypeSignature::SzArray(array) => {
            buffer.push(ELEMENT_TYPE::SZARRAY);
            encode_modifiers(&array.modifiers, buffer)?;
            encode_type_signature(&array.base, buffer)?;
        }
        TypeSignature::Array(array) => {
            buffer.push(ELEMENT_TYPE::ARRAY);
            encode_type_signature(&array.base, buffer)?;
            write_compressed_uint(array.rank, buffer)?;
            write_compressed_uint(array.sizes.len() as u32, buffer)?;
            for size in &array.sizes {
                write_compressed_uint(*size, buffer)?;
            }
            write_compressed_uint(array.lower_bounds.len() as u32, buffer)?;
            for bound in &array.lower_bounds {
                write_compressed_int(*bound, buffer)?;
            }
        }
        TypeSignature::GenericInst(definition, arguments) => {
            buffer.push(ELEMENT_TYPE::GENERICINST);
            encode_type_signature(definition, buffer)?;
            write_compressed_uint(arguments.len() as u32, buffer)?;
            for argument in arguments {
                encode_type_signature(argument, buffer)?;
            }
        }
        TypeSignature::FnPtr(method) => {
            buffer.push(ELEMENT_TYPE::FNPTR);
            encode_method_signature_into(method, buffer)?;
        }
    }

    Ok(())
}

fn encode_parameter(parameter: &SignatureParameter, buffer: &mut Vec<u8>) -> Result<()> {
    encode_modifiers(&parameter.modifiers, buffer)?;

    if parameter.by_ref {
        buffer.push(ELEMENT_TYPE::BYREF);
    }

    encode_type_signature(&parameter.base, buffer)
}

fn encode_method_signature_into(signature: &SignatureMethod, buffer: &mut Vec<u8>) -> Result<()> {
    let mut calling_convention = signature.calling_convention;
    if signature.generic_param_count > 0 {
        calling_convention |= CallingConventions::GENERIC;
    }
    buffer.push(calling_convention.bits());

    if signature.generic_param_count > 0 {
        write_compressed_uint(signature.generic_param_count, buffer)?;
    }

    let param_count = signature.params.len() + signature.varargs.len();
    write_compressed_uint(param_count as u32, buffer)?;

    encode_parameter(&signature.return_type, buffer)?;
    for param in &signature.params {
        encode_parameter(param, buffer)?;
    }

    if !signature.varargs.is_empty() {
        buffer.push(ELEMENT_TYPE::SENTINEL);
        for param in &signature.varargs {
            encode_parameter(param, buffer)?;
        }
    }

    Ok(())
}

/// Encode a method signature blob.
///
/// # Errors
/// Returns an error if a token or a count can not be encoded.
pub fn encode_method_signature(signature: &SignatureMethod) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_method_signature_into(signature, &mut buffer)?;
    Ok(buffer)
}

/// Encode a field signature blob.
///
/// # Errors
/// Returns an error if a token can not be encoded.
pub fn encode_field_signature(signature: &SignatureField) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::FIELD];
    encode_modifiers(&signature.modifiers, &mut buffer)?;
    encode_type_signature(&signature.base, &mut buffer)?;
    Ok(buffer)
}

/// Encode a property signature blob.
///
/// # Errors
/// Returns an error if a token or a count can not be encoded.
pub fn encode_property_signature(signature: &SignatureProperty) -> Result<Vec<u8>> {
    let mut prolog = SIGNATURE_HEADER::PROPERTY;
    if signature.has_this {
        prolog |= CallingConventions::HAS_THIS.bits();
    }
    let mut buffer = vec![prolog];

    write_compressed_uint(signature.params.len() as u32, &mut buffer)?;
    encode_modifiers(&signature.modifiers, &mut buffer)?;
    encode_type_signature(&signature.base, &mut buffer)?;

    for param in &signature.params {
        encode_parameter(param, &mut buffer)?;
    }

    Ok(buffer)
}

/// Encode a local variable signature blob.
///
/// # Errors
/// Returns an error if a token or a count can not be encoded.
pub fn encode_local_var_signature(signature: &SignatureLocalVariables) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::LOCAL_SIG];
    write_compressed_uint(signature.locals.len() as u32, &mut buffer)?;

    for local in &signature.locals {
        if local.base == TypeSignature::TypedByRef {
            buffer.push(ELEMENT_TYPE::TYPEDBYREF);
            continue;
        }

        encode_modifiers(&local.modifiers, &mut buffer)?;

        if local.is_pinned {
            buffer.push(ELEMENT_TYPE::PINNED);
        }

        if local.is_byref {
            buffer.push(ELEMENT_TYPE::BYREF);
        }

        encode_type_signature(&local.base, &mut buffer)?;
    }

    Ok(buffer)
}

/// Encode a type specification blob.
///
/// # Errors
/// Returns an error if a token or a count can not be encoded.
pub fn encode_typespec_signature(signature: &TypeSignature) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    encode_type_signature(signature, &mut buffer)?;
    Ok(buffer)
}

/// Encode a method specification blob.
///
/// # Errors
/// Returns an error if a token or a count can not be encoded.
pub fn encode_method_spec_signature(signature: &SignatureMethodSpec) -> Result<Vec<u8>> {
    let mut buffer = vec![SIGNATURE_HEADER::METHOD_SPEC];
    write_compressed_uint(signature.generic_args.len() as u32, &mut buffer)?;
    for argument in &signature.generic_args {
        encode_type_signature(argument, &mut buffer)?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::{
        parse_field_signature, parse_local_var_signature, parse_method_signature,
        SignatureLocalVariable, SignatureSzArray,
    };

    fn modifier(is_required: bool, row: u32) -> CustomModifier {
        CustomModifier {
            is_required,
            modifier_type: Token::new(0x0100_0000 | row),
        }
    }

    #[test]
    fn modifiers_required_first() {
        let field = SignatureField {
            modifiers: vec![modifier(false, 1), modifier(true, 2), modifier(false, 3)],
            base: TypeSignature::I4,
        };

        let blob = encode_field_signature(&field).unwrap();
        assert_eq!(
            blob,
            vec![0x06, 0x1F, 0x09, 0x20, 0x05, 0x20, 0x0D, 0x08]
        );

        let parsed = parse_field_signature(&blob).unwrap();
        assert_eq!(
            parsed.modifiers,
            vec![modifier(true, 2), modifier(false, 1), modifier(false, 3)]
        );
    }

    #[test]
    fn generic_instance() {
        let signature = TypeSignature::GenericInst(
            Box::new(TypeSignature::Class(Token::new(0x0200_0002))),
            vec![TypeSignature::I4, TypeSignature::GenericParamMethod(0)],
        );
        let blob = encode_typespec_signature(&signature).unwrap();
        assert_eq!(blob, vec![0x15, 0x12, 0x08, 0x02, 0x08, 0x1E, 0x00]);
    }

    #[test]
    fn generic_method_signature() {
        let signature = SignatureMethod {
            calling_convention: CallingConventions::DEFAULT,
            generic_param_count: 2,
            return_type: SignatureParameter {
                base: TypeSignature::GenericParamMethod(1),
                ..Default::default()
            },
            params: vec![SignatureParameter {
                by_ref: true,
                base: TypeSignature::SzArray(SignatureSzArray {
                    modifiers: Vec::new(),
                    base: Box::new(TypeSignature::GenericParamMethod(0)),
                }),
                ..Default::default()
            }],
            varargs: Vec::new(),
        };

        let blob = encode_method_signature(&signature).unwrap();
        assert_eq!(blob, vec![0x10, 0x02, 0x01, 0x1E, 0x01, 0x10, 0x1D, 0x1E, 0x00]);
        assert_eq!(parse_method_signature(&blob).unwrap(), signature);
    }

    #[test]
    fn locals() {
        let locals = SignatureLocalVariables {
            locals: vec![
                SignatureLocalVariable {
                    base: TypeSignature::String,
                    ..Default::default()
                },
                SignatureLocalVariable {
                    is_pinned: true,
                    is_byref: true,
                    base: TypeSignature::U1,
                    ..Default::default()
                },
            ],
        };

        let blob = encode_local_var_signature(&locals).unwrap();
        assert_eq!(blob, vec![0x07, 0x02, 0x0E, 0x45, 0x10, 0x05]);
        assert_eq!(parse_local_var_signature(&blob).unwrap(), locals);
    }

    #[test]
    fn invalid_token_table() {
        let signature = TypeSignature::Class(Token::new(0x0600_0001));
        assert!(encode_typespec_signature(&signature).is_err());
    }
}
