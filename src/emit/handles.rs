//! Stable handles into the entity arena of an [`crate::emit::AssemblyBuilder`].
//!
//! Every define operation returns one of these. A handle is a plain `Copy` value made of
//! the serial number of the owning assembly and an index into one of its arenas, so it can
//! be stored freely and compared by value. Passing a handle to a different assembly is
//! rejected with [`crate::Error::InvalidArgument`].

use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_ASSEMBLY_SERIAL: AtomicU32 = AtomicU32::new(1);

/// Allocate the serial number of a new assembly.
pub(crate) fn next_serial() -> u32 {
    NEXT_ASSEMBLY_SERIAL.fetch_add(1, Ordering::Relaxed)
}

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name {
            owner: u32,
            index: u32,
        }

        impl $name {
            #[allow(clippy::cast_possible_truncation)]
            pub(crate) fn new(owner: u32, index: usize) -> Self {
                Self {
                    owner,
                    index: index as u32,
                }
            }

            /// Serial number of the assembly this handle belongs to.
            pub(crate) fn owner(self) -> u32 {
                self.owner
            }

            /// Position of the entity in its arena, in definition order.
            #[must_use]
            pub fn index(self) -> usize {
                self.index as usize
            }
        }
    };
}

handle!(
    /// A module of an assembly under construction.
    ModuleId
);
handle!(
    /// A type definition, including the global `<Module>` type of every module.
    TypeId
);
handle!(
    /// A field definition.
    FieldId
);
handle!(
    /// A method or constructor definition.
    MethodId
);
handle!(
    /// A property definition.
    PropertyId
);
handle!(
    /// An event definition.
    EventId
);
handle!(
    /// A generic parameter of a type or method definition.
    GenericParamId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity() {
        let a = TypeId::new(7, 3);
        let b = TypeId::new(7, 3);
        let c = TypeId::new(8, 3);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.index(), 3);
        assert_eq!(c.owner(), 8);
    }

    #[test]
    fn serials_are_unique() {
        let first = next_serial();
        let second = next_serial();
        assert_ne!(first, second);
    }
}
