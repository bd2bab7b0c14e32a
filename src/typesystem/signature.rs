//! Method signatures in terms of [`Type`].

use crate::{metadata::flags::CallingConventions, typesystem::Type};

/// A parameter, return or field type together with its custom modifiers.
///
/// Modifiers are kept in declaration order; the encoder writes the required ones first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamType {
    /// The type
    pub ty: Type,
    /// `modreq` modifier types
    pub required_modifiers: Vec<Type>,
    /// `modopt` modifier types
    pub optional_modifiers: Vec<Type>,
}

impl ParamType {
    /// A type without modifiers.
    #[must_use]
    pub fn new(ty: Type) -> Self {
        ParamType {
            ty,
            required_modifiers: Vec::new(),
            optional_modifiers: Vec::new(),
        }
    }

    /// A type with modifiers.
    #[must_use]
    pub fn with_modifiers(ty: Type, required: Vec<Type>, optional: Vec<Type>) -> Self {
        ParamType {
            ty,
            required_modifiers: required,
            optional_modifiers: optional,
        }
    }

    /// Apply `f` to the type and every modifier.
    #[must_use]
    pub fn map(&self, f: &dyn Fn(&Type) -> Type) -> Self {
        ParamType {
            ty: f(&self.ty),
            required_modifiers: self.required_modifiers.iter().map(f).collect(),
            optional_modifiers: self.optional_modifiers.iter().map(f).collect(),
        }
    }
}

impl From<Type> for ParamType {
    fn from(ty: Type) -> Self {
        ParamType::new(ty)
    }
}

/// A method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Calling convention, `HAS_THIS` for instance methods
    pub calling_convention: CallingConventions,
    /// Number of generic method parameters
    pub generic_param_count: u32,
    /// Return type
    pub return_type: ParamType,
    /// Parameter types
    pub parameters: Vec<ParamType>,
}

impl MethodSignature {
    /// A signature without modifiers.
    #[must_use]
    pub fn new(calling_convention: CallingConventions, return_type: Type, parameters: Vec<Type>) -> Self {
        MethodSignature {
            calling_convention,
            generic_param_count: 0,
            return_type: ParamType::new(return_type),
            parameters: parameters.into_iter().map(ParamType::new).collect(),
        }
    }

    /// Returns true for instance methods.
    #[must_use]
    pub fn has_this(&self) -> bool {
        self.calling_convention.contains(CallingConventions::HAS_THIS)
    }

    /// The parameter types without modifiers.
    #[must_use]
    pub fn parameter_types(&self) -> Vec<Type> {
        self.parameters.iter().map(|param| param.ty.clone()).collect()
    }

    /// Substitute positional generic parameters in the return and parameter types.
    #[must_use]
    pub fn substitute(&self, type_args: &[Type], method_args: &[Type]) -> Self {
        let substitute = |ty: &Type| ty.substitute(type_args, method_args);
        MethodSignature {
            calling_convention: self.calling_convention,
            generic_param_count: self.generic_param_count,
            return_type: self.return_type.map(&substitute),
            parameters: self
                .parameters
                .iter()
                .map(|param| param.map(&substitute))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_keeps_modifiers() {
        let modifier = Type::Var(0);
        let signature = MethodSignature {
            calling_convention: CallingConventions::HAS_THIS,
            generic_param_count: 1,
            return_type: ParamType::with_modifiers(Type::Var(0), vec![modifier], vec![]),
            parameters: vec![ParamType::new(Type::MVar(0).make_array_type())],
        };

        let closed = signature.substitute(&[Type::String], &[Type::U1]);
        assert!(closed.has_this());
        assert_eq!(closed.return_type.ty, Type::String);
        assert_eq!(closed.return_type.required_modifiers, vec![Type::String]);
        assert_eq!(closed.parameter_types(), vec![Type::U1.make_array_type()]);
        assert_eq!(closed.generic_param_count, 1);
    }
}
