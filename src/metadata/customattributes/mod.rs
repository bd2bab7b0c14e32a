//! Custom attribute blobs (ECMA-335 II.23.3).
//!
//! A blob starts with the prolog `0x0001`, followed by the fixed (constructor) arguments
//! encoded according to the constructor signature, a 16 bit count of named arguments and
//! the named field and property assignments, each tagged with its own type.
//!
//! ```rust
//! use dotemit::metadata::customattributes::{
//!     encode_custom_attribute, parse_custom_attribute, CaNamedArgument, CaType, CaValue,
//! };
//!
//! let blob = encode_custom_attribute(
//!     &[(CaType::String, CaValue::String(Some("Hi".into())))],
//!     &[CaNamedArgument {
//!         is_field: false,
//!         name: "Count".into(),
//!         arg_type: CaType::I4,
//!         value: CaValue::I4(3),
//!     }],
//! )?;
//!
//! let decoded = parse_custom_attribute(&blob, &[CaType::String], &|_| None)?;
//! assert_eq!(decoded.fixed_args, vec![CaValue::String(Some("Hi".into()))]);
//! assert_eq!(decoded.named_args[0].value, CaValue::I4(3));
//! # Ok::<(), dotemit::Error>(())
//! ```

mod encoder;
mod parser;
mod types;

pub use encoder::*;
pub use parser::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;

    fn no_enums(_: &str) -> Option<CaType> {
        None
    }

    #[test]
    fn empty() {
        let blob = encode_custom_attribute(&[], &[]).unwrap();
        assert_eq!(blob, vec![0x01, 0x00, 0x00, 0x00]);

        let decoded = parse_custom_attribute(&blob, &[], &no_enums).unwrap();
        assert!(decoded.fixed_args.is_empty());
        assert!(decoded.named_args.is_empty());

        // Named count may be omitted entirely
        assert!(parse_custom_attribute(&[0x01, 0x00], &[], &no_enums).is_ok());
    }

    #[test]
    fn invalid_prolog() {
        assert!(parse_custom_attribute(&[0x02, 0x00, 0x00, 0x00], &[], &no_enums).is_err());
        assert!(parse_custom_attribute(&[0x01], &[], &no_enums).is_err());
    }

    #[test]
    fn null_string_and_type() {
        let blob = encode_custom_attribute(
            &[
                (CaType::String, CaValue::String(None)),
                (CaType::Type, CaValue::Type(Some("System.Int32".into()))),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(blob[2], 0xFF);
        assert_eq!(blob[3], 12);

        let decoded =
            parse_custom_attribute(&blob, &[CaType::String, CaType::Type], &no_enums).unwrap();
        assert_eq!(decoded.fixed_args[0], CaValue::String(None));
        assert_eq!(decoded.fixed_args[1].as_str(), Some("System.Int32"));
    }

    #[test]
    fn boxed_and_arrays() {
        let int_array = CaValue::Array {
            element: CaType::I4,
            values: Some(vec![CaValue::I4(1), CaValue::I4(2)]),
        };
        let blob = encode_custom_attribute(
            &[
                (CaType::Boxed, CaValue::Boxed(Box::new(CaValue::I8(7)))),
                (CaType::SzArray(Box::new(CaType::I4)), int_array.clone()),
                (
                    CaType::SzArray(Box::new(CaType::String)),
                    CaValue::Array {
                        element: CaType::String,
                        values: None,
                    },
                ),
            ],
            &[],
        )
        .unwrap();

        // boxed int64: tag then value
        assert_eq!(blob[2], SERIALIZATION_TYPE::I8);

        let decoded = parse_custom_attribute(
            &blob,
            &[
                CaType::Boxed,
                CaType::SzArray(Box::new(CaType::I4)),
                CaType::SzArray(Box::new(CaType::String)),
            ],
            &no_enums,
        )
        .unwrap();
        assert_eq!(decoded.fixed_args[0], CaValue::Boxed(Box::new(CaValue::I8(7))));
        assert_eq!(decoded.fixed_args[1], int_array);
        assert!(matches!(
            decoded.fixed_args[2],
            CaValue::Array { values: None, .. }
        ));
    }

    #[test]
    fn enums() {
        let enum_type = CaType::Enum {
            name: "Sample.Color".into(),
            underlying: Box::new(CaType::U1),
        };
        let value = CaValue::Enum {
            type_name: "Sample.Color".into(),
            value: Box::new(CaValue::U1(2)),
        };
        let named = CaNamedArgument {
            is_field: true,
            name: "Tint".into(),
            arg_type: enum_type.clone(),
            value: value.clone(),
        };

        let blob = encode_custom_attribute(&[(enum_type.clone(), value.clone())], &[named]).unwrap();

        let resolve = |name: &str| (name == "Sample.Color").then_some(CaType::U1);
        let decoded = parse_custom_attribute(&blob, &[enum_type], &resolve).unwrap();
        assert_eq!(decoded.fixed_args[0], value);
        assert!(decoded.named_args[0].is_field);
        assert_eq!(decoded.named_args[0].value.as_i64(), Some(2));

        // Unknown enums decode as int32
        let wide = CaNamedArgument {
            is_field: false,
            name: "Mode".into(),
            arg_type: CaType::Enum {
                name: "Other.Mode".into(),
                underlying: Box::new(CaType::I4),
            },
            value: CaValue::I4(5),
        };
        let blob = encode_custom_attribute(&[], &[wide.clone()]).unwrap();
        let decoded = parse_custom_attribute(&blob, &[], &no_enums).unwrap();
        assert_eq!(
            decoded.named_args[0].value,
            CaValue::Enum {
                type_name: "Other.Mode".into(),
                value: Box::new(CaValue::I4(5)),
            }
        );
    }

    #[test]
    fn type_mismatch() {
        let result = encode_custom_attribute(&[(CaType::I4, CaValue::String(None))], &[]);
        assert!(matches!(
            result,
            Err(crate::Error::InvalidArgument { .. })
        ));
    }
}
