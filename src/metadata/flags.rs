//! Attribute flag sets of metadata entities (ECMA-335 II.23.1).
//!
//! Flags are `bitflags` types so builders can combine them freely. Multi-bit fields such
//! as visibility or layout are exposed through masks and helper accessors, since their
//! values are not independent bits.

use bitflags::bitflags;

bitflags! {
    /// Flags of a type definition (`TypeAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TypeAttributes: u32 {
        /// Visibility mask
        const VISIBILITY_MASK = 0x0000_0007;
        /// Not visible outside the assembly
        const NOT_PUBLIC = 0x0000_0000;
        /// Visible outside the assembly
        const PUBLIC = 0x0000_0001;
        /// Nested, public visibility
        const NESTED_PUBLIC = 0x0000_0002;
        /// Nested, private visibility
        const NESTED_PRIVATE = 0x0000_0003;
        /// Nested, family visibility
        const NESTED_FAMILY = 0x0000_0004;
        /// Nested, assembly visibility
        const NESTED_ASSEMBLY = 0x0000_0005;
        /// Nested, family and assembly visibility
        const NESTED_FAM_AND_ASSEM = 0x0000_0006;
        /// Nested, family or assembly visibility
        const NESTED_FAM_OR_ASSEM = 0x0000_0007;
        /// Layout mask
        const LAYOUT_MASK = 0x0000_0018;
        /// Fields are laid out automatically
        const AUTO_LAYOUT = 0x0000_0000;
        /// Fields are laid out sequentially
        const SEQUENTIAL_LAYOUT = 0x0000_0008;
        /// Layout is supplied explicitly
        const EXPLICIT_LAYOUT = 0x0000_0010;
        /// Class semantics mask
        const CLASS_SEMANTICS_MASK = 0x0000_0020;
        /// Type is a class
        const CLASS = 0x0000_0000;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Type is abstract
        const ABSTRACT = 0x0000_0080;
        /// Type can not be derived from
        const SEALED = 0x0000_0100;
        /// Name is special
        const SPECIAL_NAME = 0x0000_0400;
        /// Type is imported
        const IMPORT = 0x0000_1000;
        /// Type is serializable
        const SERIALIZABLE = 0x0000_2000;
        /// Windows Runtime type
        const WINDOWS_RUNTIME = 0x0000_4000;
        /// String format mask
        const STRING_FORMAT_MASK = 0x0003_0000;
        /// LPTSTR is ANSI
        const ANSI_CLASS = 0x0000_0000;
        /// LPTSTR is Unicode
        const UNICODE_CLASS = 0x0001_0000;
        /// LPTSTR is interpreted automatically
        const AUTO_CLASS = 0x0002_0000;
        /// Non-standard encoding
        const CUSTOM_FORMAT_CLASS = 0x0003_0000;
        /// Initialize the type before the first static field access
        const BEFORE_FIELD_INIT = 0x0010_0000;
        /// The runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x0000_0800;
        /// Type has security associated with it
        const HAS_SECURITY = 0x0004_0000;
    }
}

impl TypeAttributes {
    /// The visibility bits.
    #[must_use]
    pub fn visibility(self) -> u32 {
        self.bits() & Self::VISIBILITY_MASK.bits()
    }

    /// The layout bits.
    #[must_use]
    pub fn layout(self) -> u32 {
        self.bits() & Self::LAYOUT_MASK.bits()
    }

    /// Returns true if one of the nested visibilities is set.
    #[must_use]
    pub fn is_nested(self) -> bool {
        self.visibility() >= Self::NESTED_PUBLIC.bits()
    }

    /// Returns true for interfaces.
    #[must_use]
    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    /// Replace the visibility bits.
    #[must_use]
    pub fn with_visibility(self, visibility: TypeAttributes) -> Self {
        Self::from_bits_retain(
            (self.bits() & !Self::VISIBILITY_MASK.bits()) | visibility.visibility(),
        )
    }
}

bitflags! {
    /// Flags of a field definition (`FieldAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldAttributes: u16 {
        /// Access mask
        const FIELD_ACCESS_MASK = 0x0007;
        /// Member not referenceable
        const COMPILER_CONTROLLED = 0x0000;
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types anywhere, plus anyone in the assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on the type, not per instance
        const STATIC = 0x0010;
        /// Can only be initialized
        const INIT_ONLY = 0x0020;
        /// Value is a compile time constant
        const LITERAL = 0x0040;
        /// Not serialized when the type is remoted
        const NOT_SERIALIZED = 0x0080;
        /// Name is special
        const SPECIAL_NAME = 0x0200;
        /// Implementation is forwarded through P/Invoke
        const PINVOKE_IMPL = 0x2000;
        /// The runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x0400;
        /// Field has marshalling information
        const HAS_FIELD_MARSHAL = 0x1000;
        /// Field has a default value
        const HAS_DEFAULT = 0x8000;
        /// Field has an RVA
        const HAS_FIELD_RVA = 0x0100;
    }
}

impl FieldAttributes {
    /// Returns true for static fields.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }
}

bitflags! {
    /// Flags of a method definition (`MethodAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodAttributes: u16 {
        /// Access mask
        const MEMBER_ACCESS_MASK = 0x0007;
        /// Member not referenceable
        const COMPILER_CONTROLLED = 0x0000;
        /// Accessible only by the parent type
        const PRIVATE = 0x0001;
        /// Accessible by sub-types only in this assembly
        const FAM_AND_ASSEM = 0x0002;
        /// Accessible by anyone in the assembly
        const ASSEMBLY = 0x0003;
        /// Accessible only by type and sub-types
        const FAMILY = 0x0004;
        /// Accessible by sub-types anywhere, plus anyone in the assembly
        const FAM_OR_ASSEM = 0x0005;
        /// Accessible by anyone
        const PUBLIC = 0x0006;
        /// Defined on the type, not per instance
        const STATIC = 0x0010;
        /// Can not be overridden
        const FINAL = 0x0020;
        /// Virtual dispatch
        const VIRTUAL = 0x0040;
        /// Hide by name and signature, otherwise by name only
        const HIDE_BY_SIG = 0x0080;
        /// Vtable layout mask
        const VTABLE_LAYOUT_MASK = 0x0100;
        /// Always gets a new vtable slot
        const NEW_SLOT = 0x0100;
        /// Can only be overridden if also accessible
        const CHECK_ACCESS_ON_OVERRIDE = 0x0200;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Name is special
        const SPECIAL_NAME = 0x0800;
        /// Implementation is forwarded through P/Invoke
        const PINVOKE_IMPL = 0x2000;
        /// Managed method exported to unmanaged code
        const UNMANAGED_EXPORT = 0x0008;
        /// The runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x1000;
        /// Method has security associated with it
        const HAS_SECURITY = 0x4000;
        /// Method calls another method containing security code
        const REQUIRE_SEC_OBJECT = 0x8000;
    }
}

impl MethodAttributes {
    /// Returns true for static methods.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    /// Returns true for abstract methods.
    #[must_use]
    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }
}

bitflags! {
    /// Implementation flags of a method (`MethodImplAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodImplAttributes: u16 {
        /// Code type mask
        const CODE_TYPE_MASK = 0x0003;
        /// Method impl is IL
        const IL = 0x0000;
        /// Method impl is native
        const NATIVE = 0x0001;
        /// Method impl is OPTIL
        const OPTIL = 0x0002;
        /// Method impl is provided by the runtime
        const RUNTIME = 0x0003;
        /// Method impl is unmanaged, otherwise managed
        const UNMANAGED = 0x0004;
        /// Method can not be inlined
        const NO_INLINING = 0x0008;
        /// Method is defined, used in merge scenarios
        const FORWARD_REF = 0x0010;
        /// Method is single threaded through the body
        const SYNCHRONIZED = 0x0020;
        /// Method will not be optimized
        const NO_OPTIMIZATION = 0x0040;
        /// Signature is exported exactly as declared
        const PRESERVE_SIG = 0x0080;
        /// Method should be inlined if possible
        const AGGRESSIVE_INLINING = 0x0100;
        /// Internal call
        const INTERNAL_CALL = 0x1000;
    }
}

impl MethodImplAttributes {
    /// The code type bits.
    #[must_use]
    pub fn code_type(self) -> u16 {
        self.bits() & Self::CODE_TYPE_MASK.bits()
    }
}

bitflags! {
    /// Flags of a parameter (`ParamAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParamAttributes: u16 {
        /// Input parameter
        const IN = 0x0001;
        /// Output parameter
        const OUT = 0x0002;
        /// Locale identifier
        const LCID = 0x0004;
        /// Return value
        const RETVAL = 0x0008;
        /// Optional parameter
        const OPTIONAL = 0x0010;
        /// Parameter has a default value
        const HAS_DEFAULT = 0x1000;
        /// Parameter has marshalling information
        const HAS_FIELD_MARSHAL = 0x2000;
    }
}

bitflags! {
    /// Flags of a property (`PropertyAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PropertyAttributes: u16 {
        /// Name is special
        const SPECIAL_NAME = 0x0200;
        /// The runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x0400;
        /// Property has a default value
        const HAS_DEFAULT = 0x1000;
    }
}

bitflags! {
    /// Flags of an event (`EventAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventAttributes: u16 {
        /// Name is special
        const SPECIAL_NAME = 0x0200;
        /// The runtime should check the name encoding
        const RT_SPECIAL_NAME = 0x0400;
    }
}

bitflags! {
    /// Flags of a generic parameter (`GenericParamAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GenericParameterAttributes: u16 {
        /// Variance mask
        const VARIANCE_MASK = 0x0003;
        /// Covariant
        const COVARIANT = 0x0001;
        /// Contravariant
        const CONTRAVARIANT = 0x0002;
        /// Special constraint mask
        const SPECIAL_CONSTRAINT_MASK = 0x001C;
        /// Must be a reference type
        const REFERENCE_TYPE_CONSTRAINT = 0x0004;
        /// Must be a non-nullable value type
        const NOT_NULLABLE_VALUE_TYPE_CONSTRAINT = 0x0008;
        /// Must have a public default constructor
        const DEFAULT_CONSTRUCTOR_CONSTRAINT = 0x0010;
    }
}

bitflags! {
    /// Method signature calling convention byte (ECMA-335 II.23.2.1 and II.23.2.3)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CallingConventions: u8 {
        /// Default managed calling convention
        const DEFAULT = 0x00;
        /// C calling convention
        const C = 0x01;
        /// Standard call
        const STDCALL = 0x02;
        /// This call
        const THISCALL = 0x03;
        /// Fast call
        const FASTCALL = 0x04;
        /// Variable arguments
        const VARARG = 0x05;
        /// Field signature
        const FIELD = 0x06;
        /// Local variable signature
        const LOCAL_SIG = 0x07;
        /// Property signature
        const PROPERTY = 0x08;
        /// Generic method instantiation
        const GENERIC_INST = 0x0A;
        /// Method has generic parameters
        const GENERIC = 0x10;
        /// Instance method, `this` is passed implicitly
        const HAS_THIS = 0x20;
        /// `this` is passed explicitly as the first parameter
        const EXPLICIT_THIS = 0x40;
    }
}

impl CallingConventions {
    /// The kind nibble.
    #[must_use]
    pub fn kind(self) -> u8 {
        self.bits() & 0x0F
    }
}

bitflags! {
    /// Flags of an assembly (`AssemblyFlags`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AssemblyFlags: u32 {
        /// The assembly reference holds the full public key
        const PUBLIC_KEY = 0x0001;
        /// The assembly can be retargeted
        const RETARGETABLE = 0x0100;
        /// JIT tracking is disabled
        const DISABLE_JIT_COMPILE_OPTIMIZER = 0x4000;
        /// JIT tracking is enabled
        const ENABLE_JIT_COMPILE_TRACKING = 0x8000;
    }
}

/// Hash algorithm identifiers of the `Assembly` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum AssemblyHashAlgorithm {
    /// No hash
    None = 0x0000,
    /// MD5
    Md5 = 0x8003,
    /// SHA-1
    #[default]
    Sha1 = 0x8004,
}

impl AssemblyHashAlgorithm {
    /// Map a raw identifier.
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0x0000 => Some(Self::None),
            0x8003 => Some(Self::Md5),
            0x8004 => Some(Self::Sha1),
            _ => None,
        }
    }

    /// Hash `data` with this algorithm; `None` produces an empty hash.
    #[must_use]
    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::None => Vec::new(),
            Self::Md5 => crate::utils::compute_md5(data),
            Self::Sha1 => crate::utils::compute_sha1(data),
        }
    }
}

bitflags! {
    /// Flags of a manifest resource (`ManifestResourceAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceAttributes: u32 {
        /// Exported from the assembly
        const PUBLIC = 0x0001;
        /// Private to the assembly
        const PRIVATE = 0x0002;
    }
}

bitflags! {
    /// Flags of a `File` table row
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttributes: u32 {
        /// The file is not a resource file
        const CONTAINS_METADATA = 0x0000;
        /// The file is a resource file or other non-metadata file
        const CONTAINS_NO_METADATA = 0x0001;
    }
}

bitflags! {
    /// Flags of an `ImplMap` row (`PInvokeAttributes`)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PInvokeAttributes: u16 {
        /// Use the member name as specified
        const NO_MANGLE = 0x0001;
        /// Character set mask
        const CHAR_SET_MASK = 0x0006;
        /// ANSI strings
        const CHAR_SET_ANSI = 0x0002;
        /// Unicode strings
        const CHAR_SET_UNICODE = 0x0004;
        /// Automatic character set
        const CHAR_SET_AUTO = 0x0006;
        /// Record the last error
        const SUPPORTS_LAST_ERROR = 0x0040;
        /// Calling convention mask
        const CALL_CONV_MASK = 0x0700;
        /// Platform default calling convention
        const CALL_CONV_WINAPI = 0x0100;
        /// C calling convention
        const CALL_CONV_CDECL = 0x0200;
        /// Standard call
        const CALL_CONV_STDCALL = 0x0300;
        /// This call
        const CALL_CONV_THISCALL = 0x0400;
        /// Fast call
        const CALL_CONV_FASTCALL = 0x0500;
    }
}

/// Declarative security actions (ECMA-335 II.22.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum SecurityAction {
    Demand = 2,
    Assert = 3,
    Deny = 4,
    PermitOnly = 5,
    LinkDemand = 6,
    InheritanceDemand = 7,
    RequestMinimum = 8,
    RequestOptional = 9,
    RequestRefuse = 10,
}

impl SecurityAction {
    /// Map a raw action.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            2 => Self::Demand,
            3 => Self::Assert,
            4 => Self::Deny,
            5 => Self::PermitOnly,
            6 => Self::LinkDemand,
            7 => Self::InheritanceDemand,
            8 => Self::RequestMinimum,
            9 => Self::RequestOptional,
            10 => Self::RequestRefuse,
            _ => return None,
        })
    }

    /// Returns true for the assembly-level request actions.
    #[must_use]
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::RequestMinimum | Self::RequestOptional | Self::RequestRefuse
        )
    }
}

/// Packing size of a type with sequential or explicit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum PackingSize {
    #[default]
    Unspecified = 0,
    Size1 = 1,
    Size2 = 2,
    Size4 = 4,
    Size8 = 8,
    Size16 = 16,
    Size32 = 32,
    Size64 = 64,
    Size128 = 128,
}

impl PackingSize {
    /// Map a raw packing size.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => Self::Unspecified,
            1 => Self::Size1,
            2 => Self::Size2,
            4 => Self::Size4,
            8 => Self::Size8,
            16 => Self::Size16,
            32 => Self::Size32,
            64 => Self::Size64,
            128 => Self::Size128,
            _ => return None,
        })
    }
}

/// Semantics of a method associated with a property or an event (ECMA-335 II.23.1.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum MethodSemanticsKind {
    Setter = 0x0001,
    Getter = 0x0002,
    Other = 0x0004,
    AddOn = 0x0008,
    RemoveOn = 0x0010,
    Fire = 0x0020,
}

impl MethodSemanticsKind {
    /// Map a raw semantics value.
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x0001 => Self::Setter,
            0x0002 => Self::Getter,
            0x0004 => Self::Other,
            0x0008 => Self::AddOn,
            0x0010 => Self::RemoveOn,
            0x0020 => Self::Fire,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_attribute_helpers() {
        let attrs = TypeAttributes::PUBLIC | TypeAttributes::SEQUENTIAL_LAYOUT;
        assert_eq!(attrs.visibility(), 1);
        assert_eq!(attrs.layout(), TypeAttributes::SEQUENTIAL_LAYOUT.bits());
        assert!(!attrs.is_nested());

        let nested = attrs.with_visibility(TypeAttributes::NESTED_PRIVATE);
        assert!(nested.is_nested());
        assert_eq!(nested.layout(), attrs.layout());
    }

    #[test]
    fn hash_algorithms() {
        assert_eq!(AssemblyHashAlgorithm::Sha1.hash(b"abc").len(), 20);
        assert_eq!(AssemblyHashAlgorithm::Md5.hash(b"abc").len(), 16);
        assert!(AssemblyHashAlgorithm::None.hash(b"abc").is_empty());
        assert_eq!(
            AssemblyHashAlgorithm::from_u32(0x8004),
            Some(AssemblyHashAlgorithm::Sha1)
        );
    }

    #[test]
    fn raw_enums() {
        assert_eq!(SecurityAction::from_u16(6), Some(SecurityAction::LinkDemand));
        assert!(SecurityAction::RequestRefuse.is_request());
        assert_eq!(PackingSize::from_u16(3), None);
        assert_eq!(MethodSemanticsKind::from_u16(0x20), Some(MethodSemanticsKind::Fire));
    }
}
