//! Custom attributes: the builder callers fill in, the encoded form stored on entities and
//! the pseudo attributes that turn into metadata flags instead of `CustomAttribute` rows.

use crate::{
    emit::{AssemblyBuilder, MethodRef},
    metadata::{
        customattributes::{
            encode_custom_attribute, parse_custom_attribute, CaNamedArgument, CaType, CaValue,
            CustomAttributeValue, CUSTOM_ATTRIBUTE_PROLOG,
        },
        flags::MethodAttributes,
        marshalling::{MarshalDescriptor, NATIVE_TYPE},
    },
    typesystem::{corlib, Type},
    Result,
};

/// A custom attribute as attached to an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttribute {
    /// The attribute constructor
    pub constructor: MethodRef,
    /// The encoded blob, starting with the prolog
    pub blob: Vec<u8>,
    /// The decoded arguments
    pub value: CustomAttributeValue,
}

/// A named property or field assignment of a [`CustomAttributeBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    /// Property or field name
    pub name: String,
    /// Declared type of the property or field
    pub value_type: Type,
    /// Assigned value
    pub value: CaValue,
}

/// Describes one custom attribute application.
///
/// ```rust
/// use dotemit::emit::CustomAttributeBuilder;
/// use dotemit::metadata::customattributes::CaValue;
/// use dotemit::typesystem::{corlib, Type};
///
/// let constructor = corlib::attribute_constructor("Sample", "NoteAttribute", vec![Type::String]);
/// let builder = CustomAttributeBuilder::new(constructor, vec![CaValue::String(Some("hi".into()))])
///     .with_named_properties(vec![("Level".into(), Type::I4)], vec![CaValue::I4(2)])?;
/// assert_eq!(builder.named_properties().len(), 1);
///
/// // Names and values must pair up
/// assert!(CustomAttributeBuilder::new(corlib::object_constructor(), vec![])
///     .with_named_fields(vec![("A".into(), Type::I4)], vec![])
///     .is_err());
/// # Ok::<(), dotemit::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CustomAttributeBuilder {
    constructor: MethodRef,
    constructor_args: Vec<CaValue>,
    named_properties: Vec<NamedValue>,
    named_fields: Vec<NamedValue>,
    blob: Option<Vec<u8>>,
}

fn pair_named(
    param: &'static str,
    names: Vec<(String, Type)>,
    values: Vec<CaValue>,
) -> Result<Vec<NamedValue>> {
    if names.len() != values.len() {
        return Err(invalid_argument!(
            param,
            "{} names but {} values",
            names.len(),
            values.len()
        ));
    }
    names
        .into_iter()
        .zip(values)
        .map(|((name, value_type), value)| {
            if name.is_empty() {
                return Err(invalid_argument!(param, "Empty name is not legal"));
            }
            Ok(NamedValue {
                name,
                value_type,
                value,
            })
        })
        .collect()
}

impl CustomAttributeBuilder {
    /// An attribute application with constructor arguments.
    pub fn new(constructor: impl Into<MethodRef>, constructor_args: Vec<CaValue>) -> Self {
        CustomAttributeBuilder {
            constructor: constructor.into(),
            constructor_args,
            named_properties: Vec::new(),
            named_fields: Vec::new(),
            blob: None,
        }
    }

    /// An attribute application from an already encoded blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the blob does not start with the
    /// custom attribute prolog.
    pub fn from_blob(constructor: impl Into<MethodRef>, blob: Vec<u8>) -> Result<Self> {
        if blob.len() < 2 || u16::from_le_bytes([blob[0], blob[1]]) != CUSTOM_ATTRIBUTE_PROLOG {
            return Err(invalid_argument!(
                "binaryAttribute",
                "The blob does not start with the custom attribute prolog"
            ));
        }
        Ok(CustomAttributeBuilder {
            blob: Some(blob),
            ..Self::new(constructor, Vec::new())
        })
    }

    /// Add named property assignments.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the lists differ in length or a name is
    /// empty.
    pub fn with_named_properties(
        mut self,
        properties: Vec<(String, Type)>,
        values: Vec<CaValue>,
    ) -> Result<Self> {
        self.named_properties
            .extend(pair_named("namedProperties", properties, values)?);
        Ok(self)
    }

    /// Add named field assignments.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the lists differ in length or a name is
    /// empty.
    pub fn with_named_fields(mut self, fields: Vec<(String, Type)>, values: Vec<CaValue>) -> Result<Self> {
        self.named_fields
            .extend(pair_named("namedFields", fields, values)?);
        Ok(self)
    }

    /// The attribute constructor.
    #[must_use]
    pub fn constructor(&self) -> &MethodRef {
        &self.constructor
    }

    /// Constructor arguments.
    #[must_use]
    pub fn constructor_args(&self) -> &[CaValue] {
        &self.constructor_args
    }

    /// Named property assignments.
    #[must_use]
    pub fn named_properties(&self) -> &[NamedValue] {
        &self.named_properties
    }

    /// Named field assignments.
    #[must_use]
    pub fn named_fields(&self) -> &[NamedValue] {
        &self.named_fields
    }
}

/// An attribute that the runtime expresses through metadata flags or tables.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PseudoAttribute {
    Serializable,
    ComImport,
    SpecialName,
    NonSerialized,
    FieldOffset(u32),
    MarshalAs(MarshalDescriptor),
    PreserveSig,
    MethodImpl(u16),
    StructLayout {
        kind: u32,
        pack: Option<u32>,
        size: Option<u32>,
        char_set: Option<u32>,
    },
    SuppressUnmanagedCodeSecurity,
}

fn named_i64(value: &CustomAttributeValue, name: &str) -> Option<i64> {
    value
        .named_args
        .iter()
        .find(|named| named.name == name)
        .and_then(|named| named.value.as_i64())
}

fn named_str<'a>(value: &'a CustomAttributeValue, name: &str) -> Option<&'a str> {
    value
        .named_args
        .iter()
        .find(|named| named.name == name)
        .and_then(|named| named.value.as_str())
}

fn to_u32(value: Option<i64>) -> Option<u32> {
    value.and_then(|value| u32::try_from(value).ok())
}

fn marshal_descriptor(value: &CustomAttributeValue) -> Result<MarshalDescriptor> {
    let native_type = value
        .fixed_args
        .first()
        .and_then(CaValue::as_i64)
        .and_then(|native| u8::try_from(native).ok())
        .ok_or_else(|| invalid_argument!("customBuilder", "MarshalAs needs an unmanaged type"))?;

    let array_sub_type = to_u32(named_i64(value, "ArraySubType")).and_then(|sub| u8::try_from(sub).ok());

    Ok(match native_type {
        NATIVE_TYPE::FIXEDSYSSTRING => MarshalDescriptor::ByValTStr {
            size: to_u32(named_i64(value, "SizeConst")).ok_or_else(|| {
                invalid_argument!("customBuilder", "ByValTStr requires SizeConst")
            })?,
        },
        NATIVE_TYPE::FIXEDARRAY => MarshalDescriptor::ByValArray {
            size: to_u32(named_i64(value, "SizeConst")).ok_or_else(|| {
                invalid_argument!("customBuilder", "ByValArray requires SizeConst")
            })?,
            element: array_sub_type,
        },
        NATIVE_TYPE::ARRAY => MarshalDescriptor::LPArray {
            element: array_sub_type.unwrap_or(NATIVE_TYPE::MAX),
            size_param_index: to_u32(named_i64(value, "SizeParamIndex")),
            size_const: to_u32(named_i64(value, "SizeConst")),
        },
        NATIVE_TYPE::SAFEARRAY => MarshalDescriptor::SafeArray {
            element: named_i64(value, "SafeArraySubType")
                .and_then(|sub| u16::try_from(sub).ok())
                .unwrap_or(0),
            user_defined_name: named_str(value, "SafeArrayUserDefinedSubType").map(str::to_string),
        },
        NATIVE_TYPE::INTERFACE
        | NATIVE_TYPE::IUNKNOWN
        | NATIVE_TYPE::IDISPATCH
        | NATIVE_TYPE::IINSPECTABLE => MarshalDescriptor::Interface {
            native_type,
            iid_param_index: to_u32(named_i64(value, "IidParameterIndex")),
        },
        NATIVE_TYPE::CUSTOMMARSHALER => {
            let marshaler = named_str(value, "MarshalType")
                .or_else(|| named_str(value, "MarshalTypeRef"))
                .ok_or_else(|| {
                    invalid_argument!(
                        "customBuilder",
                        "CustomMarshaler requires MarshalType or MarshalTypeRef"
                    )
                })?;
            MarshalDescriptor::CustomMarshaler {
                guid: String::new(),
                native_type_name: String::new(),
                marshaler: marshaler.to_string(),
                cookie: named_str(value, "MarshalCookie").unwrap_or_default().to_string(),
            }
        }
        other => MarshalDescriptor::Simple(other),
    })
}

impl AssemblyBuilder {
    /// Serialization type of an attribute parameter, field or property type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for types that can not appear in a custom
    /// attribute and [`crate::Error::InvalidOperation`] for an enum builder without
    /// underlying field.
    pub fn ca_type(&self, ty: &Type) -> Result<CaType> {
        Ok(match ty {
            Type::Boolean => CaType::Boolean,
            Type::Char => CaType::Char,
            Type::I1 => CaType::I1,
            Type::U1 => CaType::U1,
            Type::I2 => CaType::I2,
            Type::U2 => CaType::U2,
            Type::I4 => CaType::I4,
            Type::U4 => CaType::U4,
            Type::I8 => CaType::I8,
            Type::U8 => CaType::U8,
            Type::R4 => CaType::R4,
            Type::R8 => CaType::R8,
            Type::String => CaType::String,
            Type::Object => CaType::Boxed,
            Type::SzArray(element) if !element.is_array() => {
                CaType::SzArray(Box::new(self.ca_type(element)?))
            }
            Type::External(external) => {
                if *ty == corlib::type_type() {
                    CaType::Type
                } else if let Some(underlying) = external.enum_underlying_type() {
                    let name = if external.assembly.name == "mscorlib" {
                        external.full_name()
                    } else {
                        format!("{}, {}", external.full_name(), external.assembly.display_name())
                    };
                    CaType::Enum {
                        name,
                        underlying: Box::new(self.ca_type(underlying)?),
                    }
                } else {
                    return Err(self.bad_ca_type(ty));
                }
            }
            Type::Builder(id) if self.type_data(*id)?.parent == Some(corlib::enum_type()) => {
                CaType::Enum {
                    name: self.builder_type_name(*id)?,
                    underlying: Box::new(self.ca_type(&self.enum_underlying_type_of(*id)?)?),
                }
            }
            _ => return Err(self.bad_ca_type(ty)),
        })
    }

    fn bad_ca_type(&self, ty: &Type) -> crate::Error {
        invalid_argument!(
            "customBuilder",
            "{} is not a valid custom attribute type",
            self.type_name(ty)
        )
    }

    /// Convert `value` to the representation of `ty`: enum values accept their underlying
    /// value, `object` parameters box whatever they get.
    fn coerce_ca_value(ty: &CaType, value: CaValue) -> Result<CaValue> {
        match (ty, value) {
            (CaType::Boxed, CaValue::Boxed(inner)) => Ok(CaValue::Boxed(inner)),
            (CaType::Boxed, other) => Ok(CaValue::Boxed(Box::new(other))),
            (CaType::Enum { name, underlying }, value) if value_matches(underlying, &value) => {
                let inner = match value {
                    CaValue::Enum { value, .. } => *value,
                    other => other,
                };
                Ok(CaValue::Enum {
                    type_name: name.clone(),
                    value: Box::new(inner),
                })
            }
            (CaType::SzArray(element), CaValue::Array { values, .. }) => {
                let values = values
                    .map(|values| {
                        values
                            .into_iter()
                            .map(|value| Self::coerce_ca_value(element, value))
                            .collect::<Result<Vec<_>>>()
                    })
                    .transpose()?;
                Ok(CaValue::Array {
                    element: element.as_ref().clone(),
                    values,
                })
            }
            (expected, value) if value.ca_type() == *expected => Ok(value),
            (expected, value) => Err(invalid_argument!(
                "constructorArgs",
                "A value of type {:?} can not be passed as {:?}",
                value.ca_type(),
                expected
            )),
        }
    }

    fn check_attribute_constructor(&self, constructor: &MethodRef) -> Result<()> {
        let (name, is_static) = match constructor {
            MethodRef::External(external) => (
                external.name.clone(),
                external.attributes.contains(MethodAttributes::STATIC),
            ),
            MethodRef::Builder(id) | MethodRef::Instantiated { method: id, .. } => {
                let data = self.method_data(*id)?;
                (data.name.clone(), data.is_static())
            }
            MethodRef::Generic { .. } => (String::new(), false),
        };
        if name != ".ctor" || is_static {
            return Err(invalid_argument!(
                "con",
                "'{}' is not an instance constructor",
                name
            ));
        }
        Ok(())
    }

    /// Underlying type of a builder enum named in a blob, for decoding.
    fn builder_enum_ca_type(&self, name: &str) -> Option<CaType> {
        let id = self.get_type(name)?;
        if self.type_data(id).ok()?.parent != Some(corlib::enum_type()) {
            return None;
        }
        self.ca_type(&self.enum_underlying_type_of(id).ok()?).ok()
    }

    /// Validate and encode a custom attribute application.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the constructor is not an instance
    /// constructor, the argument count does not match its signature, or a value does not
    /// fit its declared type.
    pub fn build_custom_attribute(&self, builder: &CustomAttributeBuilder) -> Result<CustomAttribute> {
        self.check_attribute_constructor(&builder.constructor)?;
        let signature = self.method_ref_signature(&builder.constructor)?;
        let param_types = signature
            .parameters
            .iter()
            .map(|param| self.ca_type(&param.ty))
            .collect::<Result<Vec<_>>>()?;

        if let Some(blob) = &builder.blob {
            let value =
                parse_custom_attribute(blob, &param_types, &|name| self.builder_enum_ca_type(name))?;
            return Ok(CustomAttribute {
                constructor: builder.constructor.clone(),
                blob: blob.clone(),
                value,
            });
        }

        if param_types.len() != builder.constructor_args.len() {
            return Err(invalid_argument!(
                "constructorArgs",
                "The constructor takes {} arguments, {} were given",
                param_types.len(),
                builder.constructor_args.len()
            ));
        }

        let fixed = param_types
            .into_iter()
            .zip(builder.constructor_args.iter().cloned())
            .map(|(ty, value)| Ok((ty.clone(), Self::coerce_ca_value(&ty, value)?)))
            .collect::<Result<Vec<_>>>()?;

        let named = builder
            .named_properties
            .iter()
            .map(|named| (false, named))
            .chain(builder.named_fields.iter().map(|named| (true, named)))
            .map(|(is_field, named)| {
                let arg_type = self.ca_type(&named.value_type)?;
                Ok(CaNamedArgument {
                    is_field,
                    name: named.name.clone(),
                    value: Self::coerce_ca_value(&arg_type, named.value.clone())?,
                    arg_type,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let blob = encode_custom_attribute(&fixed, &named)?;
        Ok(CustomAttribute {
            constructor: builder.constructor.clone(),
            blob,
            value: CustomAttributeValue {
                fixed_args: fixed.into_iter().map(|(_, value)| value).collect(),
                named_args: named,
            },
        })
    }

    /// Full name of the attribute class of `attribute`, if it is a core library type.
    fn attribute_class_name(&self, attribute: &CustomAttribute) -> Option<String> {
        match self.method_ref_declaring_type(&attribute.constructor).ok()? {
            Type::External(external) => Some(external.full_name()),
            _ => None,
        }
    }

    /// Recognize attributes the runtime stores as flags or in dedicated tables.
    pub(crate) fn pseudo_attribute(&self, attribute: &CustomAttribute) -> Result<Option<PseudoAttribute>> {
        let Some(class) = self.attribute_class_name(attribute) else {
            return Ok(None);
        };
        let value = &attribute.value;
        let first = value.fixed_args.first().and_then(CaValue::as_i64);

        Ok(Some(match class.as_str() {
            "System.SerializableAttribute" => PseudoAttribute::Serializable,
            "System.NonSerializedAttribute" => PseudoAttribute::NonSerialized,
            "System.Runtime.InteropServices.ComImportAttribute" => PseudoAttribute::ComImport,
            "System.Runtime.CompilerServices.SpecialNameAttribute" => PseudoAttribute::SpecialName,
            "System.Runtime.InteropServices.PreserveSigAttribute" => PseudoAttribute::PreserveSig,
            "System.Security.SuppressUnmanagedCodeSecurityAttribute" => {
                PseudoAttribute::SuppressUnmanagedCodeSecurity
            }
            "System.Runtime.InteropServices.FieldOffsetAttribute" => PseudoAttribute::FieldOffset(
                to_u32(first).ok_or_else(|| {
                    invalid_argument!("customBuilder", "FieldOffset needs a non-negative offset")
                })?,
            ),
            "System.Runtime.CompilerServices.MethodImplAttribute" => PseudoAttribute::MethodImpl(
                first.and_then(|options| u16::try_from(options).ok()).unwrap_or(0),
            ),
            "System.Runtime.InteropServices.MarshalAsAttribute" => {
                PseudoAttribute::MarshalAs(marshal_descriptor(value)?)
            }
            "System.Runtime.InteropServices.StructLayoutAttribute" => PseudoAttribute::StructLayout {
                kind: to_u32(first).unwrap_or(0),
                pack: to_u32(named_i64(value, "Pack")),
                size: to_u32(named_i64(value, "Size")),
                char_set: to_u32(named_i64(value, "CharSet")),
            },
            _ => return Ok(None),
        }))
    }
}

fn value_matches(underlying: &CaType, value: &CaValue) -> bool {
    match value {
        CaValue::Enum { value, .. } => value.ca_type() == *underlying,
        other => other.ca_type() == *underlying,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        emit::AssemblyBuilderAccess,
        metadata::identity::AssemblyName,
        typesystem::{ExternalMethod, ExternalType},
    };

    fn assembly() -> AssemblyBuilder {
        AssemblyBuilder::new(AssemblyName::new("attrs"), AssemblyBuilderAccess::Run)
    }

    fn interop(name: &str, parameters: Vec<Type>) -> ExternalMethod {
        corlib::attribute_constructor("System.Runtime.InteropServices", name, parameters)
    }

    #[test]
    fn encodes_fixed_and_named_arguments() {
        let asm = assembly();
        let constructor = corlib::attribute_constructor("Sample", "Note", vec![Type::String, Type::Object]);
        let builder = CustomAttributeBuilder::new(
            constructor,
            vec![CaValue::String(Some("x".into())), CaValue::I4(3)],
        )
        .with_named_fields(vec![("Flag".into(), Type::Boolean)], vec![CaValue::Bool(true)])
        .unwrap();

        let attribute = asm.build_custom_attribute(&builder).unwrap();
        assert_eq!(&attribute.blob[..2], &[0x01, 0x00]);
        assert_eq!(
            attribute.value.fixed_args[1],
            CaValue::Boxed(Box::new(CaValue::I4(3)))
        );
        assert!(attribute.value.named_args[0].is_field);
    }

    #[test]
    fn rejects_bad_applications() {
        let asm = assembly();
        let constructor = corlib::attribute_constructor("Sample", "Note", vec![Type::String]);

        let missing = CustomAttributeBuilder::new(constructor.clone(), vec![]);
        assert!(matches!(
            asm.build_custom_attribute(&missing),
            Err(crate::Error::InvalidArgument { .. })
        ));

        let wrong_type = CustomAttributeBuilder::new(constructor, vec![CaValue::I4(1)]);
        assert!(asm.build_custom_attribute(&wrong_type).is_err());

        let not_a_constructor = ExternalMethod::new(corlib::attribute(), "Match", Type::Boolean, vec![]);
        let builder = CustomAttributeBuilder::new(not_a_constructor, vec![]);
        assert!(asm.build_custom_attribute(&builder).is_err());

        assert!(CustomAttributeBuilder::from_blob(corlib::object_constructor(), vec![0, 0]).is_err());
    }

    #[test]
    fn enum_arguments_take_underlying_values() {
        let asm = assembly();
        let kind = Type::External(Arc::new(ExternalType::enumeration(
            AssemblyName::mscorlib(),
            "System.Runtime.InteropServices",
            "LayoutKind",
            Type::I4,
        )));
        let builder = CustomAttributeBuilder::new(
            interop("StructLayoutAttribute", vec![kind]),
            vec![CaValue::I4(2)],
        )
        .with_named_fields(vec![("Pack".into(), Type::I4)], vec![CaValue::I4(4)])
        .unwrap();

        let attribute = asm.build_custom_attribute(&builder).unwrap();
        assert_eq!(
            asm.pseudo_attribute(&attribute).unwrap(),
            Some(PseudoAttribute::StructLayout {
                kind: 2,
                pack: Some(4),
                size: None,
                char_set: None
            })
        );
    }

    #[test]
    fn marshal_as() {
        let asm = assembly();
        let builder = CustomAttributeBuilder::new(
            interop("MarshalAsAttribute", vec![Type::I2]),
            vec![CaValue::I2(i16::from(NATIVE_TYPE::FIXEDSYSSTRING))],
        )
        .with_named_fields(vec![("SizeConst".into(), Type::I4)], vec![CaValue::I4(16)])
        .unwrap();
        let attribute = asm.build_custom_attribute(&builder).unwrap();
        assert_eq!(
            asm.pseudo_attribute(&attribute).unwrap(),
            Some(PseudoAttribute::MarshalAs(MarshalDescriptor::ByValTStr { size: 16 }))
        );

        let incomplete = CustomAttributeBuilder::new(
            interop("MarshalAsAttribute", vec![Type::I2]),
            vec![CaValue::I2(i16::from(NATIVE_TYPE::FIXEDSYSSTRING))],
        );
        let attribute = asm.build_custom_attribute(&incomplete).unwrap();
        assert!(asm.pseudo_attribute(&attribute).is_err());
    }

    #[test]
    fn blobs_are_decoded() {
        let asm = assembly();
        let constructor = corlib::attribute_constructor("Sample", "Note", vec![Type::I4]);
        let builder =
            CustomAttributeBuilder::from_blob(constructor, vec![0x01, 0x00, 0x07, 0, 0, 0, 0, 0])
                .unwrap();
        let attribute = asm.build_custom_attribute(&builder).unwrap();
        assert_eq!(attribute.value.fixed_args, vec![CaValue::I4(7)]);
    }
}
