//! Method bodies: header formats, exception handling sections and their encoding.
//!
//! The [`MethodBody`] type is shared by the writer, which lays out bodies produced by the
//! [`crate::assembly::ILGenerator`], and by the loader, which reads them back.

use bitflags::bitflags;

mod body;
mod exceptions;

pub use body::{MethodBody, MAX_TINY_CODE_SIZE, MAX_TINY_STACK};
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};

bitflags! {
    /// Flags of the first header word (ECMA-335 II.25.4.1)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodBodyFlags: u16 {
        /// Tiny header, code size in the upper 6 bits
        const TINY_FORMAT = 0x2;
        /// Fat header of 12 bytes
        const FAT_FORMAT = 0x3;
        /// Extra data sections follow the code
        const MORE_SECTS = 0x8;
        /// Zero-initialize locals
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    /// Flags of an extra data section header (ECMA-335 II.25.4.5)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// Exception handling table
        const EHTABLE = 0x1;
        /// Reserved
        const OPT_ILTABLE = 0x2;
        /// Fat clauses with 24 bit section size
        const FAT_FORMAT = 0x40;
        /// Another section follows
        const MORE_SECTS = 0x80;
    }
}
