// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]
//#![deny(unsafe_code)]
// - 'file/physical.rs' uses mmap to map a file into memory

//! # dotemit
//!
//! Build .NET assemblies at run time and write them to disk, in pure Rust.
//!
//! `dotemit` is a Reflection.Emit style engine. An [`emit::AssemblyBuilder`] owns modules,
//! modules own types, and types own fields, methods, properties and events. Method
//! bodies are assembled with an [`assembly::ILGenerator`] that tracks labels, locals and
//! structured exception regions. Every definition and reference gets a metadata token
//! the moment it is created, and `save` lowers the whole graph into an ECMA-335 PE image.
//!
//! ## Features
//!
//! - **Two phase build** - types stay open for members until `create_type` seals them
//! - **Generics** - generic types and methods, constraints and instantiation over builders
//! - **Exception regions** - try, catch, filter, fault and finally with automatic `leave`
//! - **Deterministic output** - the same definitions always produce the same bytes
//! - **Multi-module assemblies** - one manifest, several persisted modules and linked files
//! - **Independent loader** - [`loader::LoadedModule`] reads images back for inspection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dotemit::prelude::*;
//!
//! let mut asm = AssemblyBuilder::new(AssemblyName::new("Hello"), AssemblyBuilderAccess::Save);
//! let module = asm.define_persistent_module("Hello", "Hello.exe")?;
//! let program = asm
//!     .module_builder(module)?
//!     .define_type("Program", TypeAttributes::PUBLIC)?;
//! let main = asm.type_builder(program)?.define_method(
//!     "Main",
//!     MethodAttributes::PUBLIC | MethodAttributes::STATIC,
//!     Type::Void,
//!     vec![],
//! )?;
//!
//! let mut il = asm.il_generator(main)?;
//! il.emit_string(OpCode::LDSTR, "Hello, World")?;
//! il.emit(OpCode::POP)?;
//! il.emit(OpCode::RET)?;
//!
//! asm.type_builder(program)?.create_type()?;
//! asm.set_entry_point(main)?;
//! asm.save_with(
//!     "Hello.exe",
//!     &SaveOptions::new().with_file_kind(PEFileKinds::ConsoleApplication),
//! )?;
//!
//! let loaded = LoadedModule::from_file(std::path::Path::new("Hello.exe"))?;
//! assert!(loaded.type_by_name("Program").is_some());
//! # Ok::<(), dotemit::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`emit`] - the builders, the entity arena and the token table
//! - [`assembly`] - the opcode table and the instruction stream builder
//! - [`typesystem`] - types as builders and the encoder see them
//! - [`metadata`] - the binary vocabulary shared by writer and loader
//! - [`loader`] - the read-only view of persisted images
//! - [`evidence`] - strong name and hash evidence of a saved assembly
//! - [`config`] - emission and persistence options
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Standards Compliance
//!
//! The persisted format follows the **ECMA-335 specification** (6th edition), partition II.
//!
//! - [ECMA-335 Standard](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Failing calls leave the builders
//! untouched, so a rejected definition can be retried.
//!
//! ```rust
//! use dotemit::{prelude::*, ErrorKind};
//!
//! let mut asm = AssemblyBuilder::new(AssemblyName::new("Errors"), AssemblyBuilderAccess::Run);
//! let module = asm.define_dynamic_module("Errors")?;
//! let error = asm.module_builder(module)?.define_type("", TypeAttributes::PUBLIC).unwrap_err();
//! assert_eq!(error.kind(), ErrorKind::InvalidArgument);
//! # Ok::<(), dotemit::Error>(())
//! ```
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade and never installs a logger.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Backing stores and cursors for reading persisted images.
pub mod file;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use dotemit::prelude::*;
///
/// let asm = AssemblyBuilder::new(AssemblyName::new("Quick"), AssemblyBuilderAccess::Run);
/// assert_eq!(asm.name().name, "Quick");
/// ```
pub mod prelude;

/// The opcode table and the instruction stream builder.
pub mod assembly;

/// Emission and persistence options.
pub mod config;

/// Builders for assemblies, modules, types and members.
pub mod emit;

/// Strong name and hash evidence of saved assemblies.
pub mod evidence;

/// Read-only view of persisted images.
pub mod loader;

/// The ECMA-335 binary vocabulary: tokens, tables, heaps, signatures and blobs.
pub mod metadata;

/// Types as seen by the builders.
pub mod typesystem;

/// Encoding, alignment and hashing helpers.
pub mod utils;

pub(crate) mod writer;

/// `dotemit` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotemit` Error type
///
/// The main error type for all operations in this crate. [`Error::kind`] maps a value
/// onto the coarse [`ErrorKind`] categories callers usually match on.
///
/// # Examples
///
/// ```rust,no_run
/// use dotemit::{loader::LoadedModule, Error};
///
/// match LoadedModule::from_file(std::path::Path::new("broken.dll")) {
///     Ok(module) => println!("Loaded {}", module.module.name),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::{Error, ErrorKind};

/// Provides access to the little-endian cursor used by every decoder.
pub use file::parser::Parser;
