//! Exception handling clauses of method bodies.

use bitflags::bitflags;

use crate::metadata::token::Token;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause, `class_token` names the caught type
        const EXCEPTION = 0x0000;
        /// A filter clause, `filter_offset` points at the filter code
        const FILTER = 0x0001;
        /// A finally clause
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception)
        const FAULT = 0x0004;
    }
}

/// One clause of an exception region.
///
/// All clauses produced for one region share the same try range; handlers are listed in
/// the order they were declared.
///
/// ```text
/// try {
///     // try_offset -> try_offset + try_length
/// }
/// catch (ExceptionType) {
///     // handler_offset -> handler_offset + handler_length
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    /// Kind of the clause
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of try block from start of method body
    pub try_offset: u32,
    /// Length in bytes of the try block
    pub try_length: u32,
    /// Location of the handler for this try block
    pub handler_offset: u32,
    /// Size of the handler code in bytes
    pub handler_length: u32,
    /// Caught type of an `EXCEPTION` clause, the null token catches everything
    pub class_token: Token,
    /// Start of the filter code of a `FILTER` clause
    pub filter_offset: u32,
}

impl ExceptionHandler {
    /// The fourth clause word: class token or filter offset depending on the kind.
    #[must_use]
    pub fn class_or_filter(&self) -> u32 {
        if self.flags.contains(ExceptionHandlerFlags::FILTER) {
            self.filter_offset
        } else if self.flags == ExceptionHandlerFlags::EXCEPTION {
            self.class_token.value()
        } else {
            0
        }
    }

    pub(crate) fn from_raw(
        flags: ExceptionHandlerFlags,
        ranges: [u32; 4],
        class_or_filter: u32,
    ) -> Self {
        let is_filter = flags.contains(ExceptionHandlerFlags::FILTER);
        let is_typed = flags == ExceptionHandlerFlags::EXCEPTION;
        ExceptionHandler {
            flags,
            try_offset: ranges[0],
            try_length: ranges[1],
            handler_offset: ranges[2],
            handler_length: ranges[3],
            class_token: if is_typed {
                Token::new(class_or_filter)
            } else {
                Token::default()
            },
            filter_offset: if is_filter { class_or_filter } else { 0 },
        }
    }

    /// Returns true if the clause fits the small section encoding.
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= 0xFFFF
            && self.try_length <= 0xFF
            && self.handler_offset <= 0xFFFF
            && self.handler_length <= 0xFF
    }
}
