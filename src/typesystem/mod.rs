//! The type algebra shared by every builder.
//!
//! A [`Type`] is a small value describing one type as it can appear in a signature, an
//! operand or a base type position. Primitive element types are unit variants, already
//! compiled types are [`ExternalType`] descriptors, builder types are referenced by their
//! arena handle, and generic parameters, generic instantiations and the derived
//! pointer / by-ref / array shapes wrap other types.
//!
//! Everything in here is independent of an assembly under construction. Queries that
//! need to look at a builder (its name, base type, generic parameters) are answered by
//! [`crate::emit::AssemblyBuilder`].
//!
//! ```rust
//! use dotemit::typesystem::{corlib, Type};
//!
//! let list = corlib::generic_class("System.Collections.Generic", "List`1", 1);
//! let ints = Type::generic_instance(list, vec![Type::I4])?;
//!
//! assert!(ints.is_generic_instance());
//! assert_eq!(ints.to_string(), "System.Collections.Generic.List`1[System.Int32]");
//!
//! let array = Type::I4.make_array_type();
//! assert!(array.is_array());
//! assert_eq!(array.element_type(), Some(&Type::I4));
//! # Ok::<(), dotemit::Error>(())
//! ```

mod external;
mod generics;
mod signature;

pub use external::{corlib, ExternalField, ExternalKind, ExternalMethod, ExternalType};
pub use generics::GenericInstance;
pub use signature::{MethodSignature, ParamType};

use std::{fmt, ops::Deref, sync::Arc};

use crate::{
    emit::{GenericParamId, TypeId},
    metadata::signatures::ELEMENT_TYPE,
    Result,
};

/// A type reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Type {
    Void,
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
    /// Native signed integer, `System.IntPtr`
    I,
    /// Native unsigned integer, `System.UIntPtr`
    U,
    String,
    Object,
    TypedReference,
    /// An already compiled type
    External(Arc<ExternalType>),
    /// A type defined by a [`crate::emit::TypeBuilder`]
    Builder(TypeId),
    /// A generic parameter defined on a builder type or method
    GenericParam(GenericParamId),
    /// Generic type parameter by position, as used by external signatures
    Var(u32),
    /// Generic method parameter by position, as used by external signatures
    MVar(u32),
    /// A generic type definition closed (or partially closed) over arguments
    GenericInst(Arc<GenericInstance>),
    /// Unmanaged pointer
    Pointer(DerivedElement),
    /// Managed reference
    ByRef(DerivedElement),
    /// Single-dimensional, zero-based array
    SzArray(DerivedElement),
    /// Multi-dimensional array of the given rank
    Array(DerivedElement, u32),
}

/// The element type of a pointer, by-ref or array type.
///
/// Shapes made by a builder over a definition that is not created yet carry the serial of
/// the call that made them, so they only equal their own clones. Every other shape
/// compares by structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivedElement {
    ty: Box<Type>,
    serial: Option<u64>,
}

impl DerivedElement {
    /// An element compared by structure.
    #[must_use]
    pub fn new(ty: Type) -> Self {
        DerivedElement {
            ty: Box::new(ty),
            serial: None,
        }
    }

    pub(crate) fn unique(ty: Type, serial: u64) -> Self {
        DerivedElement {
            ty: Box::new(ty),
            serial: Some(serial),
        }
    }

    /// Serial of the builder call that made this shape, if it has an identity of its own.
    #[must_use]
    pub fn serial(&self) -> Option<u64> {
        self.serial
    }

    /// The element type.
    #[must_use]
    pub fn into_inner(self) -> Type {
        *self.ty
    }

    /// Same identity over another element type.
    fn replace(&self, ty: Type) -> Self {
        DerivedElement {
            ty: Box::new(ty),
            serial: self.serial,
        }
    }
}

impl Deref for DerivedElement {
    type Target = Type;

    fn deref(&self) -> &Type {
        &self.ty
    }
}

impl fmt::Display for DerivedElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.ty, f)
    }
}

impl Type {
    /// Namespace and name of a primitive in the core library.
    #[must_use]
    pub fn primitive_name(&self) -> Option<(&'static str, &'static str)> {
        let name = match self {
            Type::Void => "Void",
            Type::Boolean => "Boolean",
            Type::Char => "Char",
            Type::I1 => "SByte",
            Type::U1 => "Byte",
            Type::I2 => "Int16",
            Type::U2 => "UInt16",
            Type::I4 => "Int32",
            Type::U4 => "UInt32",
            Type::I8 => "Int64",
            Type::U8 => "UInt64",
            Type::R4 => "Single",
            Type::R8 => "Double",
            Type::I => "IntPtr",
            Type::U => "UIntPtr",
            Type::String => "String",
            Type::Object => "Object",
            Type::TypedReference => "TypedReference",
            _ => return None,
        };
        Some(("System", name))
    }

    /// The primitive named `System.<name>`, if any.
    #[must_use]
    pub fn from_primitive_name(namespace: &str, name: &str) -> Option<Type> {
        if namespace != "System" {
            return None;
        }

        Some(match name {
            "Void" => Type::Void,
            "Boolean" => Type::Boolean,
            "Char" => Type::Char,
            "SByte" => Type::I1,
            "Byte" => Type::U1,
            "Int16" => Type::I2,
            "UInt16" => Type::U2,
            "Int32" => Type::I4,
            "UInt32" => Type::U4,
            "Int64" => Type::I8,
            "UInt64" => Type::U8,
            "Single" => Type::R4,
            "Double" => Type::R8,
            "IntPtr" => Type::I,
            "UIntPtr" => Type::U,
            "String" => Type::String,
            "Object" => Type::Object,
            "TypedReference" => Type::TypedReference,
            _ => return None,
        })
    }

    /// The `ELEMENT_TYPE` byte of a primitive.
    #[must_use]
    pub fn element_type_code(&self) -> Option<u8> {
        Some(match self {
            Type::Void => ELEMENT_TYPE::VOID,
            Type::Boolean => ELEMENT_TYPE::BOOLEAN,
            Type::Char => ELEMENT_TYPE::CHAR,
            Type::I1 => ELEMENT_TYPE::I1,
            Type::U1 => ELEMENT_TYPE::U1,
            Type::I2 => ELEMENT_TYPE::I2,
            Type::U2 => ELEMENT_TYPE::U2,
            Type::I4 => ELEMENT_TYPE::I4,
            Type::U4 => ELEMENT_TYPE::U4,
            Type::I8 => ELEMENT_TYPE::I8,
            Type::U8 => ELEMENT_TYPE::U8,
            Type::R4 => ELEMENT_TYPE::R4,
            Type::R8 => ELEMENT_TYPE::R8,
            Type::I => ELEMENT_TYPE::I,
            Type::U => ELEMENT_TYPE::U,
            Type::String => ELEMENT_TYPE::STRING,
            Type::Object => ELEMENT_TYPE::OBJECT,
            Type::TypedReference => ELEMENT_TYPE::TYPEDBYREF,
            _ => return None,
        })
    }

    /// Returns true for the primitive element types, including `string` and `object`.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.primitive_name().is_some()
    }

    /// Returns true for the types an enum may use as its underlying storage.
    #[must_use]
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Type::Boolean
                | Type::Char
                | Type::I1
                | Type::U1
                | Type::I2
                | Type::U2
                | Type::I4
                | Type::U4
                | Type::I8
                | Type::U8
                | Type::I
                | Type::U
        )
    }

    /// Returns true for primitive value types (everything primitive except `void`,
    /// `string` and `object`).
    #[must_use]
    pub fn is_primitive_value_type(&self) -> bool {
        self.is_primitive() && !matches!(self, Type::Void | Type::String | Type::Object)
    }

    /// Returns true for unmanaged pointers.
    #[must_use]
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// Returns true for managed references.
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        matches!(self, Type::ByRef(_))
    }

    /// Returns true for both array shapes.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Type::SzArray(_) | Type::Array(..))
    }

    /// Returns true for pointers, references and arrays.
    #[must_use]
    pub fn has_element_type(&self) -> bool {
        self.element_type().is_some()
    }

    /// Returns true for a generic parameter of either kind.
    #[must_use]
    pub fn is_generic_parameter(&self) -> bool {
        matches!(self, Type::GenericParam(_) | Type::Var(_) | Type::MVar(_))
    }

    /// Returns true for a generic instantiation.
    #[must_use]
    pub fn is_generic_instance(&self) -> bool {
        matches!(self, Type::GenericInst(_))
    }

    /// The element type of a pointer, reference or array.
    #[must_use]
    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) | Type::ByRef(inner) | Type::SzArray(inner) => Some(&**inner),
            Type::Array(inner, _) => Some(&**inner),
            _ => None,
        }
    }

    /// Number of dimensions of an array type.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] if this is not an array.
    pub fn array_rank(&self) -> Result<u32> {
        match self {
            Type::SzArray(_) => Ok(1),
            Type::Array(_, rank) => Ok(*rank),
            _ => Err(not_supported!("Type is not an array")),
        }
    }

    /// A pointer to this type.
    ///
    /// Shapes made here compare by structure. `make_pointer_type` on a
    /// [`crate::emit::TypeBuilder`] gives every shape over an open definition its own
    /// identity.
    #[must_use]
    pub fn make_pointer_type(&self) -> Type {
        Type::Pointer(DerivedElement::new(self.clone()))
    }

    /// A managed reference to this type.
    #[must_use]
    pub fn make_by_ref_type(&self) -> Type {
        Type::ByRef(DerivedElement::new(self.clone()))
    }

    /// A single-dimensional, zero-based array of this type.
    #[must_use]
    pub fn make_array_type(&self) -> Type {
        Type::SzArray(DerivedElement::new(self.clone()))
    }

    /// A multi-dimensional array of this type.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if `rank` is 0 or larger than 32.
    pub fn make_array_type_rank(&self, rank: u32) -> Result<Type> {
        if rank == 0 || rank > 32 {
            return Err(invalid_argument!("rank", "Invalid array rank {}", rank));
        }
        Ok(Type::Array(DerivedElement::new(self.clone()), rank))
    }

    /// Close the generic definition `definition` over `arguments`.
    ///
    /// This only checks the shape that can be checked without an assembly; the arity of
    /// builder definitions is checked by [`crate::emit::AssemblyBuilder::make_generic_type`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if no arguments are given, if an argument
    /// is `void` or a by-ref, or if an external definition has a different arity.
    pub fn generic_instance(definition: Type, arguments: Vec<Type>) -> Result<Type> {
        if arguments.is_empty() {
            return Err(invalid_argument!("typeArguments", "Empty type argument list"));
        }
        if arguments
            .iter()
            .any(|argument| matches!(argument, Type::Void | Type::ByRef(_)))
        {
            return Err(invalid_argument!(
                "typeArguments",
                "void and by-ref types can not be generic arguments"
            ));
        }

        match &definition {
            Type::External(external) => {
                if external.generic_arity as usize != arguments.len() {
                    return Err(invalid_argument!(
                        "typeArguments",
                        "{} expects {} type arguments, got {}",
                        external.full_name(),
                        external.generic_arity,
                        arguments.len()
                    ));
                }
            }
            Type::Builder(_) => {}
            _ => {
                return Err(invalid_operation!(
                    "{} is not a generic type definition",
                    definition
                ))
            }
        }

        Ok(Type::GenericInst(Arc::new(GenericInstance {
            definition,
            arguments,
        })))
    }

    /// Rebuild this type bottom-up, replacing every node for which `f` returns a value.
    ///
    /// `f` is consulted before descending, so a replaced node is not visited further.
    #[must_use]
    pub fn map(&self, f: &dyn Fn(&Type) -> Option<Type>) -> Type {
        if let Some(replacement) = f(self) {
            return replacement;
        }

        match self {
            Type::Pointer(inner) => Type::Pointer(inner.replace(inner.map(f))),
            Type::ByRef(inner) => Type::ByRef(inner.replace(inner.map(f))),
            Type::SzArray(inner) => Type::SzArray(inner.replace(inner.map(f))),
            Type::Array(inner, rank) => Type::Array(inner.replace(inner.map(f)), *rank),
            Type::GenericInst(instance) => Type::GenericInst(Arc::new(GenericInstance {
                definition: instance.definition.map(f),
                arguments: instance.arguments.iter().map(|arg| arg.map(f)).collect(),
            })),
            other => other.clone(),
        }
    }

    /// Returns true if `predicate` holds for this type or any type nested in it.
    #[must_use]
    pub fn any(&self, predicate: &dyn Fn(&Type) -> bool) -> bool {
        if predicate(self) {
            return true;
        }

        match self {
            Type::Pointer(inner) | Type::ByRef(inner) | Type::SzArray(inner) => {
                inner.any(predicate)
            }
            Type::Array(inner, _) => inner.any(predicate),
            Type::GenericInst(instance) => {
                instance.definition.any(predicate)
                    || instance.arguments.iter().any(|arg| arg.any(predicate))
            }
            _ => false,
        }
    }

    /// Substitute positional generic parameters.
    ///
    /// `Var(n)` becomes `type_args[n]` and `MVar(n)` becomes `method_args[n]`; positions
    /// without an argument are left untouched.
    #[must_use]
    pub fn substitute(&self, type_args: &[Type], method_args: &[Type]) -> Type {
        self.map(&|ty| match ty {
            Type::Var(position) => type_args.get(*position as usize).cloned(),
            Type::MVar(position) => method_args.get(*position as usize).cloned(),
            _ => None,
        })
    }
}

impl From<ExternalType> for Type {
    fn from(external: ExternalType) -> Self {
        if let Some(primitive) = Type::from_primitive_name(&external.namespace, &external.name)
        {
            if external.declaring.is_none() {
                return primitive;
            }
        }
        Type::External(Arc::new(external))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some((namespace, name)) = self.primitive_name() {
            return write!(f, "{namespace}.{name}");
        }

        match self {
            Type::External(external) => write!(f, "{}", external.full_name()),
            Type::Builder(id) => write!(f, "<type {}>", id.index()),
            Type::GenericParam(id) => write!(f, "<generic parameter {}>", id.index()),
            Type::Var(position) => write!(f, "!{position}"),
            Type::MVar(position) => write!(f, "!!{position}"),
            Type::GenericInst(instance) => {
                write!(f, "{}[", instance.definition)?;
                for (index, argument) in instance.arguments.iter().enumerate() {
                    if index > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{argument}")?;
                }
                write!(f, "]")
            }
            Type::Pointer(inner) => write!(f, "{inner}*"),
            Type::ByRef(inner) => write!(f, "{inner}&"),
            Type::SzArray(inner) => write!(f, "{inner}[]"),
            Type::Array(inner, rank) => {
                write!(f, "{inner}[")?;
                if *rank == 1 {
                    write!(f, "*")?;
                }
                for _ in 1..*rank {
                    write!(f, ",")?;
                }
                write!(f, "]")
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives() {
        assert_eq!(Type::I4.primitive_name(), Some(("System", "Int32")));
        assert_eq!(Type::from_primitive_name("System", "Byte"), Some(Type::U1));
        assert_eq!(Type::from_primitive_name("Other", "Byte"), None);
        assert_eq!(Type::String.element_type_code(), Some(ELEMENT_TYPE::STRING));
        assert!(Type::Char.is_integral());
        assert!(!Type::R8.is_integral());
        assert!(Type::R8.is_primitive_value_type());
        assert!(!Type::String.is_primitive_value_type());
    }

    #[test]
    fn derived_shapes() {
        let pointer = Type::I4.make_pointer_type();
        assert!(pointer.is_pointer());
        assert_eq!(pointer.element_type(), Some(&Type::I4));
        assert!(pointer.array_rank().is_err());

        let by_ref = Type::String.make_by_ref_type();
        assert!(by_ref.is_by_ref());
        assert_eq!(by_ref.to_string(), "System.String&");

        let matrix = Type::R8.make_array_type_rank(2).unwrap();
        assert_eq!(matrix.array_rank().unwrap(), 2);
        assert_eq!(matrix.to_string(), "System.Double[,]");
        assert_eq!(
            Type::R8.make_array_type_rank(1).unwrap().to_string(),
            "System.Double[*]"
        );
        assert!(Type::R8.make_array_type_rank(0).is_err());

        // structural equality
        assert_eq!(Type::I4.make_array_type(), Type::I4.make_array_type());
    }

    #[test]
    fn substitution() {
        let definition = corlib::generic_class("System.Collections.Generic", "Dictionary`2", 2);
        let open = Type::generic_instance(definition.clone(), vec![Type::Var(0), Type::MVar(0)])
            .unwrap()
            .make_array_type();

        let closed = open.substitute(&[Type::String], &[Type::I8]);
        let expected = Type::generic_instance(definition, vec![Type::String, Type::I8])
            .unwrap()
            .make_array_type();
        assert_eq!(closed, expected);
        assert!(open.any(&|ty| matches!(ty, Type::MVar(_))));
        assert!(!closed.any(&Type::is_generic_parameter));
    }

    #[test]
    fn generic_instance_checks() {
        let list = corlib::generic_class("System.Collections.Generic", "List`1", 1);
        assert!(Type::generic_instance(list.clone(), vec![]).is_err());
        assert!(Type::generic_instance(list.clone(), vec![Type::I4, Type::I4]).is_err());
        assert!(Type::generic_instance(list, vec![Type::Void]).is_err());
        assert!(matches!(
            Type::generic_instance(Type::I4, vec![Type::I4]),
            Err(crate::Error::InvalidOperation(_))
        ));
    }
}
