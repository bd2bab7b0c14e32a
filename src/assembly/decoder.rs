//! Linear decoding of CIL instruction streams.
//!
//! The loader uses this to walk persisted method bodies, and tests use it to check what
//! the [`crate::assembly::ILGenerator`] produced. Branch operands are resolved to absolute
//! offsets within the body.
//!
//! ```rust
//! use dotemit::assembly::{decode_stream, OpCode, Operand};
//!
//! // ldarg.0; brtrue.s +1; nop; ret
//! let instructions = decode_stream(&[0x02, 0x2D, 0x01, 0x00, 0x2A])?;
//! assert_eq!(instructions.len(), 4);
//! assert_eq!(instructions[1].opcode, OpCode::BRTRUE_S);
//! assert_eq!(instructions[1].operand, Operand::Target(4));
//! # Ok::<(), dotemit::Error>(())
//! ```

use crate::{
    assembly::opcodes::{OpCode, OperandType, FE_PREFIX},
    file::parser::Parser,
    metadata::token::Token,
    Result,
};

/// The decoded operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Signed 8-bit immediate (`ldc.i4.s`, `unaligned.`, `no.`)
    Int8(i8),
    /// Local or argument index
    Variable(u16),
    /// Signed 32-bit immediate
    Int32(i32),
    /// Signed 64-bit immediate
    Int64(i64),
    /// 32-bit floating point immediate
    Float32(f32),
    /// 64-bit floating point immediate
    Float64(f64),
    /// Metadata or user string token
    Token(Token),
    /// Absolute branch target within the body
    Target(i64),
    /// Absolute targets of a jump table
    Switch(Vec<i64>),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the instruction within the body
    pub offset: u32,
    /// Size of the instruction in bytes, operand included
    pub size: u32,
    /// The opcode
    pub opcode: OpCode,
    /// The decoded operand
    pub operand: Operand,
}

impl Instruction {
    /// The metadata token operand, if the instruction has one.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }

    /// Offset of the next instruction.
    #[must_use]
    pub fn next_offset(&self) -> u32 {
        self.offset + self.size
    }
}

/// Decode the instruction at the current position of `parser`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for undefined opcodes and
/// [`crate::Error::OutOfBounds`] for a truncated instruction.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let start = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let value = if first_byte == FE_PREFIX {
        0xFE00 | u16::from(parser.read_le::<u8>()?)
    } else {
        u16::from(first_byte)
    };
    let Some(opcode) = OpCode::from_value(value) else {
        return Err(malformed_error!("Invalid opcode: {:04X} at {}", value, start));
    };

    let operand = match opcode.operand_type() {
        OperandType::None => Operand::None,
        OperandType::ShortI => Operand::Int8(parser.read_le::<i8>()?),
        OperandType::ShortVar => Operand::Variable(u16::from(parser.read_le::<u8>()?)),
        OperandType::Var => Operand::Variable(parser.read_le::<u16>()?),
        OperandType::I => Operand::Int32(parser.read_le::<i32>()?),
        OperandType::I8 => Operand::Int64(parser.read_le::<i64>()?),
        OperandType::ShortR => Operand::Float32(parser.read_le::<f32>()?),
        OperandType::R => Operand::Float64(parser.read_le::<f64>()?),
        OperandType::Method
        | OperandType::Field
        | OperandType::Type
        | OperandType::Tok
        | OperandType::String
        | OperandType::Sig => Operand::Token(Token::new(parser.read_le::<u32>()?)),
        OperandType::ShortBranch => {
            let delta = parser.read_le::<i8>()?;
            Operand::Target(parser.pos() as i64 + i64::from(delta))
        }
        OperandType::Branch => {
            let delta = parser.read_le::<i32>()?;
            Operand::Target(parser.pos() as i64 + i64::from(delta))
        }
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count > parser.remaining() / 4 {
                return Err(out_of_bounds_error!());
            }

            let mut deltas = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                deltas.push(parser.read_le::<i32>()?);
            }
            let end = parser.pos() as i64;
            Operand::Switch(deltas.into_iter().map(|delta| end + i64::from(delta)).collect())
        }
    };

    #[allow(clippy::cast_possible_truncation)]
    let (offset, size) = (start as u32, (parser.pos() - start) as u32);
    Ok(Instruction {
        offset,
        size,
        opcode,
        operand,
    })
}

/// Decode a complete instruction stream.
///
/// # Errors
/// Returns an error if any instruction is invalid or truncated.
pub fn decode_stream(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::new();
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }
    Ok(instructions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operands() {
        #[rustfmt::skip]
        let code = [
            0x1F, 0xFE,                   // ldc.i4.s -2
            0xFE, 0x0C, 0x01, 0x01,       // ldloc 0x101
            0x72, 0x01, 0x00, 0x00, 0x70, // ldstr 0x70000001
            0x23, 0, 0, 0, 0, 0, 0, 0xF0, 0x3F, // ldc.r8 1.0
        ];

        let instructions = decode_stream(&code).unwrap();
        assert_eq!(instructions.len(), 4);
        assert_eq!(instructions[0].operand, Operand::Int8(-2));
        assert_eq!(instructions[1].opcode, OpCode::LDLOC);
        assert_eq!(instructions[1].operand, Operand::Variable(0x101));
        assert_eq!(instructions[2].token(), Some(Token::new(0x7000_0001)));
        assert_eq!(instructions[3].operand, Operand::Float64(1.0));
        assert_eq!(instructions[3].next_offset() as usize, code.len());
    }

    #[test]
    fn branch_targets() {
        // br.s -2 loops onto itself
        let instructions = decode_stream(&[0x2B, 0xFE]).unwrap();
        assert_eq!(instructions[0].operand, Operand::Target(0));

        // switch (2 targets); ret
        #[rustfmt::skip]
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x2A, 0x2A,
        ];
        let instructions = decode_stream(&code).unwrap();
        assert_eq!(instructions[0].operand, Operand::Switch(vec![13, 14]));
    }

    #[test]
    fn invalid() {
        assert!(decode_stream(&[0x24]).is_err());
        assert!(decode_stream(&[0xFE]).is_err());
        assert!(decode_stream(&[0x20, 0x01]).is_err());
        assert!(decode_stream(&[0x45, 0xFF, 0xFF, 0xFF, 0x0F]).is_err());
    }
}
