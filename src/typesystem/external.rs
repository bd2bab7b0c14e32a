//! Descriptors of already compiled types and members.
//!
//! A dynamic assembly references the outside world (the core library, other assemblies)
//! through these descriptors. They carry exactly what emission needs: the identity used
//! for `TypeRef` / `MemberRef` rows, the value-type / interface shape that decides how a
//! type is encoded in signatures, and the facts the builders validate against (generic
//! arity, base type, implemented interfaces, presence of a default constructor).

use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    metadata::{
        flags::{CallingConventions, FieldAttributes, MethodAttributes},
        identity::AssemblyName,
    },
    typesystem::{MethodSignature, ParamType, Type},
};

/// The shape of an external type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ExternalKind {
    /// A reference type
    Class,
    /// A value type
    ValueType,
    /// An interface
    Interface,
    /// An enumeration with the given underlying type
    Enum(Type),
}

/// An already compiled type.
///
/// Two descriptors are equal when they name the same type in the same assembly; the
/// descriptive fields (kind, base, interfaces) do not take part in the comparison.
#[derive(Debug, Clone)]
pub struct ExternalType {
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name, including the generic arity suffix
    pub name: String,
    /// Enclosing type of a nested type
    pub declaring: Option<Arc<ExternalType>>,
    /// Defining assembly
    pub assembly: AssemblyName,
    /// Class, value type, interface or enum
    pub kind: ExternalKind,
    /// Number of generic parameters of a generic type definition
    pub generic_arity: u32,
    /// Direct base type
    pub base: Option<Type>,
    /// Implemented interfaces, including inherited ones
    pub interfaces: Vec<Type>,
    /// The type has an accessible parameterless constructor
    pub has_default_constructor: bool,
    /// The type is abstract
    pub is_abstract: bool,
    /// The type is sealed
    pub is_sealed: bool,
}

impl ExternalType {
    /// A reference type deriving from `System.Object`.
    #[must_use]
    pub fn class(assembly: AssemblyName, namespace: &str, name: &str) -> Self {
        ExternalType {
            namespace: namespace.to_string(),
            name: name.to_string(),
            declaring: None,
            assembly,
            kind: ExternalKind::Class,
            generic_arity: 0,
            base: Some(Type::Object),
            interfaces: Vec::new(),
            has_default_constructor: true,
            is_abstract: false,
            is_sealed: false,
        }
    }

    /// A value type deriving from `System.ValueType`.
    #[must_use]
    pub fn value_type(assembly: AssemblyName, namespace: &str, name: &str) -> Self {
        ExternalType {
            kind: ExternalKind::ValueType,
            base: Some(corlib::value_type()),
            is_sealed: true,
            ..Self::class(assembly, namespace, name)
        }
    }

    /// An interface.
    #[must_use]
    pub fn interface(assembly: AssemblyName, namespace: &str, name: &str) -> Self {
        ExternalType {
            kind: ExternalKind::Interface,
            base: None,
            has_default_constructor: false,
            is_abstract: true,
            ..Self::class(assembly, namespace, name)
        }
    }

    /// An enumeration with the given underlying type.
    #[must_use]
    pub fn enumeration(
        assembly: AssemblyName,
        namespace: &str,
        name: &str,
        underlying: Type,
    ) -> Self {
        ExternalType {
            kind: ExternalKind::Enum(underlying),
            base: Some(corlib::enum_type()),
            is_sealed: true,
            ..Self::class(assembly, namespace, name)
        }
    }

    /// Make this a generic type definition with `arity` parameters.
    #[must_use]
    pub fn with_generic_arity(mut self, arity: u32) -> Self {
        self.generic_arity = arity;
        self
    }

    /// Replace the base type.
    #[must_use]
    pub fn with_base(mut self, base: Type) -> Self {
        self.base = Some(base);
        self
    }

    /// Add an implemented interface.
    #[must_use]
    pub fn with_interface(mut self, interface: Type) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Nest this type inside `declaring`.
    #[must_use]
    pub fn nested_in(mut self, declaring: Arc<ExternalType>) -> Self {
        self.namespace = String::new();
        self.declaring = Some(declaring);
        self
    }

    /// Mark the type as having no accessible parameterless constructor.
    #[must_use]
    pub fn without_default_constructor(mut self) -> Self {
        self.has_default_constructor = false;
        self
    }

    /// Mark the type as abstract.
    #[must_use]
    pub fn with_abstract(mut self) -> Self {
        self.is_abstract = true;
        self.has_default_constructor = false;
        self
    }

    /// Full name, `Namespace.Name` or `Outer+Inner`.
    #[must_use]
    pub fn full_name(&self) -> String {
        match &self.declaring {
            Some(declaring) => format!("{}+{}", declaring.full_name(), self.name),
            None if self.namespace.is_empty() => self.name.clone(),
            None => format!("{}.{}", self.namespace, self.name),
        }
    }

    /// Returns true for value types and enums.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        matches!(self.kind, ExternalKind::ValueType | ExternalKind::Enum(_))
    }

    /// Returns true for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        matches!(self.kind, ExternalKind::Interface)
    }

    /// The underlying type of an enum.
    #[must_use]
    pub fn enum_underlying_type(&self) -> Option<&Type> {
        match &self.kind {
            ExternalKind::Enum(underlying) => Some(underlying),
            _ => None,
        }
    }

    /// The default constructor of this type, if it declares one.
    #[must_use]
    pub fn default_constructor(self: &Arc<Self>) -> Option<ExternalMethod> {
        self.has_default_constructor
            .then(|| ExternalMethod::constructor(Type::External(self.clone()), Vec::new()))
    }
}

impl PartialEq for ExternalType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.declaring == other.declaring
            && self.assembly.name == other.assembly.name
    }
}

impl Eq for ExternalType {}

impl Hash for ExternalType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.name.hash(state);
        self.declaring.hash(state);
        self.assembly.name.hash(state);
    }
}

/// A method or constructor of an already compiled type.
///
/// The signature is written against the definition: type parameters of the declaring
/// type are `Var(n)` and method type parameters are `MVar(n)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalMethod {
    /// Declaring type, an external type or a generic instantiation of one
    pub declaring: Type,
    /// Method name, `.ctor` for constructors
    pub name: String,
    /// Signature of the definition
    pub signature: MethodSignature,
    /// Method attributes
    pub attributes: MethodAttributes,
}

impl ExternalMethod {
    /// A public instance method.
    #[must_use]
    pub fn new(declaring: Type, name: &str, return_type: Type, parameters: Vec<Type>) -> Self {
        ExternalMethod {
            declaring,
            name: name.to_string(),
            signature: MethodSignature::new(
                CallingConventions::HAS_THIS,
                return_type,
                parameters,
            ),
            attributes: MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG,
        }
    }

    /// A public static method.
    #[must_use]
    pub fn new_static(
        declaring: Type,
        name: &str,
        return_type: Type,
        parameters: Vec<Type>,
    ) -> Self {
        ExternalMethod {
            declaring,
            name: name.to_string(),
            signature: MethodSignature::new(
                CallingConventions::DEFAULT,
                return_type,
                parameters,
            ),
            attributes: MethodAttributes::PUBLIC
                | MethodAttributes::HIDE_BY_SIG
                | MethodAttributes::STATIC,
        }
    }

    /// A public instance constructor.
    #[must_use]
    pub fn constructor(declaring: Type, parameters: Vec<Type>) -> Self {
        ExternalMethod {
            attributes: MethodAttributes::PUBLIC
                | MethodAttributes::HIDE_BY_SIG
                | MethodAttributes::SPECIAL_NAME
                | MethodAttributes::RT_SPECIAL_NAME,
            ..Self::new(declaring, ".ctor", Type::Void, parameters)
        }
    }

    /// Make this a generic method with `count` type parameters.
    #[must_use]
    pub fn with_generic_params(mut self, count: u32) -> Self {
        self.signature.generic_param_count = count;
        self
    }

    /// Returns true for instance and static constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.name == ".ctor" || self.name == ".cctor"
    }
}

/// A field of an already compiled type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalField {
    /// Declaring type
    pub declaring: Type,
    /// Field name
    pub name: String,
    /// Field type as declared on the definition
    pub field_type: ParamType,
    /// Field attributes
    pub attributes: FieldAttributes,
}

impl ExternalField {
    /// A public instance field.
    #[must_use]
    pub fn new(declaring: Type, name: &str, field_type: Type) -> Self {
        ExternalField {
            declaring,
            name: name.to_string(),
            field_type: ParamType::new(field_type),
            attributes: FieldAttributes::PUBLIC,
        }
    }
}

/// Well-known types of the core library.
pub mod corlib {
    use std::sync::Arc;

    use super::{ExternalKind, ExternalMethod, ExternalType};
    use crate::{metadata::identity::AssemblyName, typesystem::Type};

    fn system(name: &str, kind: ExternalKind) -> Type {
        let assembly = AssemblyName::mscorlib();
        let descriptor = match kind {
            ExternalKind::Class => ExternalType::class(assembly, "System", name),
            ExternalKind::ValueType => ExternalType::value_type(assembly, "System", name),
            ExternalKind::Interface => ExternalType::interface(assembly, "System", name),
            ExternalKind::Enum(underlying) => {
                ExternalType::enumeration(assembly, "System", name, underlying)
            }
        };
        Type::External(Arc::new(descriptor))
    }

    /// `System.ValueType`
    #[must_use]
    pub fn value_type() -> Type {
        let mut descriptor =
            ExternalType::class(AssemblyName::mscorlib(), "System", "ValueType").with_abstract();
        descriptor.base = Some(Type::Object);
        Type::External(Arc::new(descriptor))
    }

    /// `System.Enum`
    #[must_use]
    pub fn enum_type() -> Type {
        let descriptor = ExternalType::class(AssemblyName::mscorlib(), "System", "Enum")
            .with_abstract()
            .with_base(value_type());
        Type::External(Arc::new(descriptor))
    }

    /// `System.Type`
    #[must_use]
    pub fn type_type() -> Type {
        let descriptor =
            ExternalType::class(AssemblyName::mscorlib(), "System", "Type").with_abstract();
        Type::External(Arc::new(descriptor))
    }

    /// `System.Array`, the base of every array type
    #[must_use]
    pub fn array() -> Type {
        let descriptor =
            ExternalType::class(AssemblyName::mscorlib(), "System", "Array").with_abstract();
        Type::External(Arc::new(descriptor))
    }

    /// `System.Attribute`
    #[must_use]
    pub fn attribute() -> Type {
        let descriptor =
            ExternalType::class(AssemblyName::mscorlib(), "System", "Attribute").with_abstract();
        Type::External(Arc::new(descriptor))
    }

    /// `System.Exception`
    #[must_use]
    pub fn exception() -> Type {
        system("Exception", ExternalKind::Class)
    }

    /// `System.Delegate`
    #[must_use]
    pub fn delegate() -> Type {
        let descriptor =
            ExternalType::class(AssemblyName::mscorlib(), "System", "Delegate").with_abstract();
        Type::External(Arc::new(descriptor))
    }

    /// `System.MulticastDelegate`
    #[must_use]
    pub fn multicast_delegate() -> Type {
        let descriptor =
            ExternalType::class(AssemblyName::mscorlib(), "System", "MulticastDelegate")
                .with_abstract()
                .with_base(delegate());
        Type::External(Arc::new(descriptor))
    }

    /// `System.EventHandler`
    #[must_use]
    pub fn event_handler() -> Type {
        let descriptor = ExternalType::class(AssemblyName::mscorlib(), "System", "EventHandler")
            .with_base(multicast_delegate())
            .without_default_constructor();
        Type::External(Arc::new(descriptor))
    }

    /// `System.IDisposable`
    #[must_use]
    pub fn idisposable() -> Type {
        system("IDisposable", ExternalKind::Interface)
    }

    /// `System.Guid`
    #[must_use]
    pub fn guid() -> Type {
        system("Guid", ExternalKind::ValueType)
    }

    /// `System.Object`'s parameterless constructor.
    #[must_use]
    pub fn object_constructor() -> ExternalMethod {
        ExternalMethod::constructor(Type::Object, Vec::new())
    }

    /// An attribute class from the `System` namespaces with the given constructor
    /// parameter types, returning its constructor.
    #[must_use]
    pub fn attribute_constructor(namespace: &str, name: &str, parameters: Vec<Type>) -> ExternalMethod {
        let descriptor = ExternalType::class(AssemblyName::mscorlib(), namespace, name)
            .with_base(attribute());
        ExternalMethod::constructor(Type::External(Arc::new(descriptor)), parameters)
    }

    /// A generic class of the core library with `arity` type parameters.
    #[must_use]
    pub fn generic_class(namespace: &str, name: &str, arity: u32) -> Type {
        let descriptor = ExternalType::class(AssemblyName::mscorlib(), namespace, name)
            .with_generic_arity(arity);
        Type::External(Arc::new(descriptor))
    }

    /// A generic interface of the core library with `arity` type parameters.
    #[must_use]
    pub fn generic_interface(namespace: &str, name: &str, arity: u32) -> Type {
        let descriptor = ExternalType::interface(AssemblyName::mscorlib(), namespace, name)
            .with_generic_arity(arity);
        Type::External(Arc::new(descriptor))
    }

    /// `System.Collections.IEnumerable`
    #[must_use]
    pub fn ienumerable() -> Type {
        Type::External(Arc::new(ExternalType::interface(
            AssemblyName::mscorlib(),
            "System.Collections",
            "IEnumerable",
        )))
    }

    /// `System.Collections.Generic.IEnumerable<T>` as a definition.
    #[must_use]
    pub fn generic_ienumerable() -> Type {
        let descriptor = ExternalType::interface(
            AssemblyName::mscorlib(),
            "System.Collections.Generic",
            "IEnumerable`1",
        )
        .with_generic_arity(1)
        .with_interface(ienumerable());
        Type::External(Arc::new(descriptor))
    }

    /// `System.IComparable`
    #[must_use]
    pub fn icomparable() -> Type {
        system("IComparable", ExternalKind::Interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_equality() {
        let a = ExternalType::class(AssemblyName::mscorlib(), "System", "Exception");
        let b = ExternalType::class(AssemblyName::mscorlib(), "System", "Exception")
            .without_default_constructor();
        assert_eq!(a, b);

        let other = ExternalType::class(AssemblyName::new("Other"), "System", "Exception");
        assert_ne!(a, other);
    }

    #[test]
    fn names_and_kinds() {
        let outer = Arc::new(ExternalType::class(AssemblyName::mscorlib(), "System", "Environment"));
        let nested = ExternalType::enumeration(
            AssemblyName::mscorlib(),
            "System",
            "SpecialFolder",
            Type::I4,
        )
        .nested_in(outer);

        assert_eq!(nested.full_name(), "System.Environment+SpecialFolder");
        assert!(nested.is_value_type());
        assert_eq!(nested.enum_underlying_type(), Some(&Type::I4));

        let disposable = corlib::idisposable();
        let Type::External(disposable) = disposable else {
            panic!("expected an external type");
        };
        assert!(disposable.is_interface());
        assert!(disposable.base.is_none());
        assert!(disposable.default_constructor().is_none());
    }

    #[test]
    fn primitive_conversion() {
        let int32 = ExternalType::value_type(AssemblyName::mscorlib(), "System", "Int32");
        assert_eq!(Type::from(int32), Type::I4);

        let guid = ExternalType::value_type(AssemblyName::mscorlib(), "System", "Guid");
        assert!(matches!(Type::from(guid), Type::External(_)));
    }

    #[test]
    fn constructors() {
        let ctor = corlib::object_constructor();
        assert!(ctor.is_constructor());
        assert!(ctor.signature.has_this());
        assert!(ctor.signature.parameters.is_empty());

        let attribute = corlib::attribute_constructor("System", "ObsoleteAttribute", vec![Type::String]);
        assert_eq!(attribute.signature.parameters[0].ty, Type::String);
    }
}
