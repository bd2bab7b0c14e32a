//! Generic instantiations.

use crate::typesystem::Type;

/// A generic definition closed over type arguments.
///
/// Instances are plain values: two instances are equal when their definitions and argument
/// lists are equal, regardless of whether the definition has been created yet. Member
/// queries substitute the arguments on demand, see
/// [`crate::emit::AssemblyBuilder::instantiated_method`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericInstance {
    /// The generic type definition, an external type or a builder type
    pub definition: Type,
    /// The type arguments, one per generic parameter of the definition
    pub arguments: Vec<Type>,
}

impl GenericInstance {
    /// Substitute `Var(n)` in `ty` with the argument at position `n`.
    #[must_use]
    pub fn substitute(&self, ty: &Type) -> Type {
        ty.substitute(&self.arguments, &[])
    }

    /// Returns true if every argument is free of generic parameters.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self
            .arguments
            .iter()
            .any(|argument| argument.any(&Type::is_generic_parameter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typesystem::corlib;

    #[test]
    fn closed_and_open() {
        let definition = corlib::generic_class("System", "Nullable`1", 1);
        let closed = GenericInstance {
            definition: definition.clone(),
            arguments: vec![Type::I4],
        };
        assert!(closed.is_closed());
        assert_eq!(closed.substitute(&Type::Var(0).make_by_ref_type()), Type::I4.make_by_ref_type());

        let open = GenericInstance {
            definition,
            arguments: vec![Type::MVar(0)],
        };
        assert!(!open.is_closed());
        assert_ne!(open, closed);
    }
}
