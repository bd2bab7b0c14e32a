//! Error types and helper macros for `dotemit`.
//!
//! Every fallible operation in the crate returns [`crate::Result`], whose error side is the
//! single [`Error`] enum defined here. Builder operations report the four caller-facing
//! failure kinds (invalid argument, invalid state, not supported, missing resource) while
//! the persistence writer and the loader additionally report format and I/O problems.
//!
//! Use [`Error::kind`] to classify an error without matching on individual variants:
//!
//! ```rust
//! use dotemit::{Error, ErrorKind};
//!
//! let error = Error::InvalidOperation("Unable to change after type has been created.".into());
//! assert_eq!(error.kind(), ErrorKind::InvalidState);
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// Build an [`Error::Malformed`] carrying the source location of the check that failed.
///
/// ```rust, ignore
/// return Err(malformed_error!("Invalid stream header - {}", name));
/// ```
macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Build an [`Error::OutOfBounds`] carrying the source location of the failed read.
macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// Build an [`Error::InvalidArgument`] for the named parameter.
///
/// ```rust, ignore
/// return Err(invalid_argument!("name", "Empty name is not legal."));
/// ```
macro_rules! invalid_argument {
    ($param:expr, $msg:expr) => {
        crate::Error::InvalidArgument {
            param: $param,
            message: $msg.to_string(),
        }
    };

    ($param:expr, $fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidArgument {
            param: $param,
            message: format!($fmt, $($arg)*),
        }
    };
}

/// Build an [`Error::InvalidOperation`].
macro_rules! invalid_operation {
    ($msg:expr) => {
        crate::Error::InvalidOperation($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidOperation(format!($fmt, $($arg)*))
    };
}

/// Build an [`Error::NotSupported`].
macro_rules! not_supported {
    ($msg:expr) => {
        crate::Error::NotSupported($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::NotSupported(format!($fmt, $($arg)*))
    };
}

/// The error type for every operation of this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// An argument was rejected: empty or NUL-bearing names, duplicate names, path-bearing
    /// file names, mismatched parallel argument lists, or a constant that does not match
    /// the declared type of its target.
    #[error("Invalid argument '{param}': {message}")]
    InvalidArgument {
        /// Name of the offending parameter
        param: &'static str,
        /// Human readable reason
        message: String,
    },

    /// The operation is not valid in the current state of the object.
    ///
    /// Raised by structural mutators after the owning type was created, by one-shot
    /// operations invoked twice, and by exception block calls made out of order.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The operation is meaningless for this kind of object, e.g. member enumeration on a
    /// pointer type, or invocation of a member of an uncreated generic instantiation.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// A file that had to be bound (resource file, unmanaged resource) does not exist.
    #[error("Missing resource file: {}", .0.display())]
    MissingResource(PathBuf),

    /// A type failed the validation performed when it is created.
    #[error("Could not load type '{type_name}': {message}")]
    TypeLoad {
        /// Full name of the type that failed
        type_name: String,
        /// Reason for the failure
        message: String,
    },

    /// The loaded image is damaged or not what it claims to be.
    ///
    /// The error includes the source location where the malformation was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A read would have gone past the end of the available data.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// Provided input was empty
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The PE container could not be parsed
    #[error("{0}")]
    GoblinErr(#[from] goblin::error::Error),

    /// A permission set or evidence document is not well-formed XML
    #[error("{0}")]
    Xml(#[from] quick_xml::Error),

    /// Reached the maximum nesting depth while decoding a signature
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// Failed to acquire a lock, the lock was poisoned
    #[error("Failed to lock target")]
    LockError,
}

/// The caller-facing classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid-argument
    InvalidArgument,
    /// Invalid-state (invalid operation in the current state)
    InvalidState,
    /// Not-supported
    NotSupported,
    /// Missing-resource
    MissingResource,
    /// Type validation failed during creation
    TypeLoad,
    /// Binary format problems found while reading an image
    Format,
    /// Underlying I/O failure
    Io,
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Error::InvalidOperation(_) | Error::LockError => ErrorKind::InvalidState,
            Error::NotSupported(_) => ErrorKind::NotSupported,
            Error::MissingResource(_) => ErrorKind::MissingResource,
            Error::TypeLoad { .. } => ErrorKind::TypeLoad,
            Error::Malformed { .. }
            | Error::OutOfBounds { .. }
            | Error::Empty
            | Error::GoblinErr(_)
            | Error::Xml(_)
            | Error::RecursionLimit(_) => ErrorKind::Format,
            Error::FileError(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            invalid_argument!("name", "Empty name is not legal.").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(invalid_operation!("twice").kind(), ErrorKind::InvalidState);
        assert_eq!(not_supported!("pointer").kind(), ErrorKind::NotSupported);
        assert_eq!(
            Error::MissingResource(PathBuf::from("res.txt")).kind(),
            ErrorKind::MissingResource
        );
        assert_eq!(malformed_error!("bad {}", 1).kind(), ErrorKind::Format);
        assert_eq!(out_of_bounds_error!().kind(), ErrorKind::Format);
    }

    #[test]
    fn messages() {
        let error = invalid_argument!("fileName", "Duplicate file name '{}'", "a.dll");
        assert_eq!(
            error.to_string(),
            "Invalid argument 'fileName': Duplicate file name 'a.dll'"
        );

        let error = malformed_error!("broken");
        assert!(error.to_string().contains("error.rs"));
    }
}
