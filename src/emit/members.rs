//! References to methods and fields as operands, custom attribute constructors and
//! accessor targets.

use std::sync::Arc;

use crate::{
    emit::{FieldId, MethodId},
    typesystem::{ExternalField, ExternalMethod, Type},
};

/// A method or constructor as it can be referenced from IL or metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodRef {
    /// A method defined by a [`crate::emit::MethodBuilder`]
    Builder(MethodId),
    /// A method of an already compiled type
    External(Arc<ExternalMethod>),
    /// A method of a generic builder type seen through an instantiation of that type,
    /// as returned by [`crate::emit::TypeBuilder::get_method`]
    Instantiated {
        /// The generic instantiation the method is looked up on
        declaring: Type,
        /// The method on the generic definition
        method: MethodId,
    },
    /// A generic method definition closed over method type arguments
    Generic {
        /// The generic method definition
        method: Box<MethodRef>,
        /// The method type arguments
        arguments: Vec<Type>,
    },
}

impl MethodRef {
    /// The builder method behind this reference, if any.
    #[must_use]
    pub fn builder_method(&self) -> Option<MethodId> {
        match self {
            MethodRef::Builder(id) | MethodRef::Instantiated { method: id, .. } => Some(*id),
            MethodRef::Generic { method, .. } => method.builder_method(),
            MethodRef::External(_) => None,
        }
    }

    /// Returns true for an instantiated generic method.
    #[must_use]
    pub fn is_generic_method_instance(&self) -> bool {
        matches!(self, MethodRef::Generic { .. })
    }
}

impl From<MethodId> for MethodRef {
    fn from(id: MethodId) -> Self {
        MethodRef::Builder(id)
    }
}

impl From<ExternalMethod> for MethodRef {
    fn from(method: ExternalMethod) -> Self {
        MethodRef::External(Arc::new(method))
    }
}

/// A field as it can be referenced from IL or metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// A field defined by a [`crate::emit::FieldBuilder`]
    Builder(FieldId),
    /// A field of an already compiled type
    External(Arc<ExternalField>),
    /// A field of a generic builder type seen through an instantiation of that type
    Instantiated {
        /// The generic instantiation the field is looked up on
        declaring: Type,
        /// The field on the generic definition
        field: FieldId,
    },
}

impl From<FieldId> for FieldRef {
    fn from(id: FieldId) -> Self {
        FieldRef::Builder(id)
    }
}

impl From<ExternalField> for FieldRef {
    fn from(field: ExternalField) -> Self {
        FieldRef::External(Arc::new(field))
    }
}
