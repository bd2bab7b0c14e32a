//! CIL instruction streams.
//!
//! - [`OpCode`]: the ECMA-335 opcode table with operand kinds, flow and stack behaviour
//! - [`ILGenerator`]: the incremental method body builder with labels, locals and
//!   exception regions
//! - [`decode_stream`]: a linear decoder used to read bodies back
//!
//! # Example
//!
//! ```rust
//! use dotemit::prelude::*;
//!
//! let mut asm = AssemblyBuilder::new(AssemblyName::new("Demo"), AssemblyBuilderAccess::Run);
//! let module = asm.define_dynamic_module("Demo")?;
//! let ty = asm.module_builder(module)?.define_type("Demo.Math", TypeAttributes::PUBLIC)?;
//! let add = asm.type_builder(ty)?.define_method(
//!     "Add",
//!     MethodAttributes::PUBLIC | MethodAttributes::STATIC,
//!     Type::I4,
//!     vec![Type::I4, Type::I4],
//! )?;
//!
//! let mut il = asm.il_generator(add)?;
//! il.emit(OpCode::LDARG_0)?;
//! il.emit(OpCode::LDARG_1)?;
//! il.emit(OpCode::ADD)?;
//! il.emit(OpCode::RET)?;
//!
//! asm.type_builder(ty)?.create_type()?;
//! # Ok::<(), dotemit::Error>(())
//! ```

mod decoder;
mod ilgen;
mod opcodes;

pub use decoder::{decode_instruction, decode_stream, Instruction, Operand};
pub use ilgen::{ILGenerator, Label, LocalBuilder};
pub(crate) use ilgen::{ILState, LocalInfo, ResolvedBody};
pub use opcodes::{FlowType, OpCode, OperandType, StackBehavior, FE_PREFIX};
