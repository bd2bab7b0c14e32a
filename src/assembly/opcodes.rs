//! The CIL instruction set (ECMA-335 Partition III).
//!
//! Every opcode is an associated constant of [`OpCode`] (e.g. [`OpCode::LDARG_0`],
//! [`OpCode::CALL`]). An opcode knows its encoded value, its mnemonic, the kind of inline
//! operand it takes, how it affects control flow and its fixed stack behaviour. The
//! stack effect of the call family (`call`, `callvirt`, `newobj`, `calli`) depends on the
//! callee signature and is computed by the generator.
//!
//! ```rust
//! use dotemit::assembly::{OpCode, OperandType};
//!
//! assert_eq!(OpCode::BR_S.operand_type(), OperandType::ShortBranch);
//! assert_eq!(OpCode::CEQ.size(), 2);
//! assert_eq!(OpCode::from_value(0xFE01), Some(OpCode::CEQ));
//! assert_eq!(OpCode::from_name("ldstr"), Some(OpCode::LDSTR));
//! ```

use std::{collections::HashMap, fmt, sync::OnceLock};

/// Prefix byte of the two-byte opcodes.
pub const FE_PREFIX: u8 = 0xFE;

/// Kind of the inline operand following an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandType {
    /// No operand
    None,
    /// 1-byte signed branch offset
    ShortBranch,
    /// 4-byte signed branch offset
    Branch,
    /// 1-byte local or argument index
    ShortVar,
    /// 2-byte local or argument index
    Var,
    /// 1-byte integer
    ShortI,
    /// 4-byte integer
    I,
    /// 8-byte integer
    I8,
    /// 4-byte float
    ShortR,
    /// 8-byte float
    R,
    /// `MethodDef`, `MemberRef` or `MethodSpec` token
    Method,
    /// `Field` or `MemberRef` token
    Field,
    /// `TypeDef`, `TypeRef` or `TypeSpec` token
    Type,
    /// Any of the type, method or field tokens
    Tok,
    /// User string token
    String,
    /// `StandAloneSig` token
    Sig,
    /// Jump table
    Switch,
}

impl OperandType {
    /// Size in bytes of the operand, `None` for the variable sized jump table.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandType::None => Some(0),
            OperandType::ShortBranch | OperandType::ShortVar | OperandType::ShortI => Some(1),
            OperandType::Var => Some(2),
            OperandType::Branch
            | OperandType::I
            | OperandType::ShortR
            | OperandType::Method
            | OperandType::Field
            | OperandType::Type
            | OperandType::Tok
            | OperandType::String
            | OperandType::Sig => Some(4),
            OperandType::I8 | OperandType::R => Some(8),
            OperandType::Switch => None,
        }
    }

    /// Returns true for operands that carry a metadata token.
    #[must_use]
    pub const fn is_token(&self) -> bool {
        matches!(
            self,
            OperandType::Method
                | OperandType::Field
                | OperandType::Type
                | OperandType::Tok
                | OperandType::String
                | OperandType::Sig
        )
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch
    Switch,
    /// Exception throwing
    Throw,
    /// End of a finally, fault or filter block
    EndFinally,
    /// Leave protected region
    Leave,
}

impl FlowType {
    /// Returns true if execution never falls through to the next instruction.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::Leave
        )
    }
}

/// Fixed stack effect of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: u8,
    /// Number of items pushed to stack
    pub pushes: u8,
    /// Net effect on stack depth (pushes - pops)
    pub net_effect: i8,
}

/// One CIL opcode.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpCode {
    value: u16,
    name: &'static str,
    operand: OperandType,
    flow: FlowType,
    stack: StackBehavior,
}

impl OpCode {
    #[allow(clippy::cast_possible_wrap)]
    const fn new(
        value: u16,
        name: &'static str,
        operand: OperandType,
        flow: FlowType,
        pops: u8,
        pushes: u8,
    ) -> Self {
        OpCode {
            value,
            name,
            operand,
            flow,
            stack: StackBehavior {
                pops,
                pushes,
                net_effect: pushes as i8 - pops as i8,
            },
        }
    }

    /// The encoded value, `0x00XX` for one-byte and `0xFEXX` for two-byte opcodes.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.value
    }

    /// The mnemonic, e.g. `ldarg.0`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The kind of inline operand.
    #[must_use]
    pub const fn operand_type(&self) -> OperandType {
        self.operand
    }

    /// The control flow kind.
    #[must_use]
    pub const fn flow(&self) -> FlowType {
        self.flow
    }

    /// The fixed stack behaviour; zero for the call family.
    #[must_use]
    pub const fn stack_behavior(&self) -> StackBehavior {
        self.stack
    }

    /// Returns true for opcodes with the `0xFE` prefix.
    #[must_use]
    pub const fn is_two_byte(&self) -> bool {
        self.value >> 8 == FE_PREFIX as u16
    }

    /// Size of the opcode itself in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        if self.is_two_byte() {
            2
        } else {
            1
        }
    }

    /// Size of the opcode plus its fixed-size operand.
    #[must_use]
    pub const fn instruction_size(&self) -> Option<usize> {
        match self.operand.size() {
            Some(operand) => Some(self.size() + operand),
            None => None,
        }
    }

    /// Returns true for the prefixes (`unaligned.`, `volatile.`, `tail.`, `constrained.`,
    /// `no.`, `readonly.`).
    #[must_use]
    pub const fn is_prefix(&self) -> bool {
        matches!(self.value, 0xFE12 | 0xFE13 | 0xFE14 | 0xFE16 | 0xFE19 | 0xFE1E)
    }

    /// Returns true for `call`, `callvirt`, `newobj` and `calli`.
    #[must_use]
    pub const fn is_call(&self) -> bool {
        matches!(self.flow, FlowType::Call)
    }

    /// Append the opcode bytes.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self, buffer: &mut Vec<u8>) {
        if self.is_two_byte() {
            buffer.push(FE_PREFIX);
            buffer.push(self.value as u8);
        } else {
            buffer.push(self.value as u8);
        }
    }

    /// Look up an opcode by its encoded value.
    #[must_use]
    pub fn from_value(value: u16) -> Option<OpCode> {
        let (one_byte, two_byte) = value_lookup();
        match value >> 8 {
            0 => one_byte[value as usize],
            0xFE => two_byte[(value & 0xFF) as usize],
            _ => None,
        }
    }

    /// Look up an opcode by its mnemonic.
    #[must_use]
    pub fn from_name(name: &str) -> Option<OpCode> {
        name_lookup().get(name).copied()
    }
}

impl fmt::Debug for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpCode({} {:#06x})", self.name, self.value)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

type ValueTables = ([Option<OpCode>; 256], [Option<OpCode>; 256]);

static VALUE_LOOKUP: OnceLock<ValueTables> = OnceLock::new();
static NAME_LOOKUP: OnceLock<HashMap<&'static str, OpCode>> = OnceLock::new();

fn value_lookup() -> &'static ValueTables {
    VALUE_LOOKUP.get_or_init(|| {
        let mut one_byte = [None; 256];
        let mut two_byte = [None; 256];
        for opcode in OpCode::ALL {
            let low = (opcode.value & 0xFF) as usize;
            if opcode.is_two_byte() {
                two_byte[low] = Some(*opcode);
            } else {
                one_byte[low] = Some(*opcode);
            }
        }
        (one_byte, two_byte)
    })
}

fn name_lookup() -> &'static HashMap<&'static str, OpCode> {
    NAME_LOOKUP.get_or_init(|| {
        OpCode::ALL
            .iter()
            .map(|opcode| (opcode.name, *opcode))
            .collect()
    })
}

macro_rules! opcodes {
    ($( $konst:ident = $value:expr, $name:expr, $operand:ident, $flow:ident, $pops:expr, $pushes:expr; )*) => {
        #[allow(missing_docs)]
        impl OpCode {
            $(
                pub const $konst: OpCode = OpCode::new(
                    $value,
                    $name,
                    OperandType::$operand,
                    FlowType::$flow,
                    $pops,
                    $pushes,
                );
            )*

            /// Every defined opcode, in encoding order.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$konst),*];
        }
    };
}

opcodes! {
    NOP = 0x00, "nop", None, Sequential, 0, 0;
    BREAK = 0x01, "break", None, Sequential, 0, 0;
    LDARG_0 = 0x02, "ldarg.0", None, Sequential, 0, 1;
    LDARG_1 = 0x03, "ldarg.1", None, Sequential, 0, 1;
    LDARG_2 = 0x04, "ldarg.2", None, Sequential, 0, 1;
    LDARG_3 = 0x05, "ldarg.3", None, Sequential, 0, 1;
    LDLOC_0 = 0x06, "ldloc.0", None, Sequential, 0, 1;
    LDLOC_1 = 0x07, "ldloc.1", None, Sequential, 0, 1;
    LDLOC_2 = 0x08, "ldloc.2", None, Sequential, 0, 1;
    LDLOC_3 = 0x09, "ldloc.3", None, Sequential, 0, 1;
    STLOC_0 = 0x0A, "stloc.0", None, Sequential, 1, 0;
    STLOC_1 = 0x0B, "stloc.1", None, Sequential, 1, 0;
    STLOC_2 = 0x0C, "stloc.2", None, Sequential, 1, 0;
    STLOC_3 = 0x0D, "stloc.3", None, Sequential, 1, 0;
    LDARG_S = 0x0E, "ldarg.s", ShortVar, Sequential, 0, 1;
    LDARGA_S = 0x0F, "ldarga.s", ShortVar, Sequential, 0, 1;
    STARG_S = 0x10, "starg.s", ShortVar, Sequential, 1, 0;
    LDLOC_S = 0x11, "ldloc.s", ShortVar, Sequential, 0, 1;
    LDLOCA_S = 0x12, "ldloca.s", ShortVar, Sequential, 0, 1;
    STLOC_S = 0x13, "stloc.s", ShortVar, Sequential, 1, 0;
    LDNULL = 0x14, "ldnull", None, Sequential, 0, 1;
    LDC_I4_M1 = 0x15, "ldc.i4.m1", None, Sequential, 0, 1;
    LDC_I4_0 = 0x16, "ldc.i4.0", None, Sequential, 0, 1;
    LDC_I4_1 = 0x17, "ldc.i4.1", None, Sequential, 0, 1;
    LDC_I4_2 = 0x18, "ldc.i4.2", None, Sequential, 0, 1;
    LDC_I4_3 = 0x19, "ldc.i4.3", None, Sequential, 0, 1;
    LDC_I4_4 = 0x1A, "ldc.i4.4", None, Sequential, 0, 1;
    LDC_I4_5 = 0x1B, "ldc.i4.5", None, Sequential, 0, 1;
    LDC_I4_6 = 0x1C, "ldc.i4.6", None, Sequential, 0, 1;
    LDC_I4_7 = 0x1D, "ldc.i4.7", None, Sequential, 0, 1;
    LDC_I4_8 = 0x1E, "ldc.i4.8", None, Sequential, 0, 1;
    LDC_I4_S = 0x1F, "ldc.i4.s", ShortI, Sequential, 0, 1;
    LDC_I4 = 0x20, "ldc.i4", I, Sequential, 0, 1;
    LDC_I8 = 0x21, "ldc.i8", I8, Sequential, 0, 1;
    LDC_R4 = 0x22, "ldc.r4", ShortR, Sequential, 0, 1;
    LDC_R8 = 0x23, "ldc.r8", R, Sequential, 0, 1;
    DUP = 0x25, "dup", None, Sequential, 1, 2;
    POP = 0x26, "pop", None, Sequential, 1, 0;
    JMP = 0x27, "jmp", Method, Return, 0, 0;
    CALL = 0x28, "call", Method, Call, 0, 0;
    CALLI = 0x29, "calli", Sig, Call, 0, 0;
    RET = 0x2A, "ret", None, Return, 0, 0;
    BR_S = 0x2B, "br.s", ShortBranch, UnconditionalBranch, 0, 0;
    BRFALSE_S = 0x2C, "brfalse.s", ShortBranch, ConditionalBranch, 1, 0;
    BRTRUE_S = 0x2D, "brtrue.s", ShortBranch, ConditionalBranch, 1, 0;
    BEQ_S = 0x2E, "beq.s", ShortBranch, ConditionalBranch, 2, 0;
    BGE_S = 0x2F, "bge.s", ShortBranch, ConditionalBranch, 2, 0;
    BGT_S = 0x30, "bgt.s", ShortBranch, ConditionalBranch, 2, 0;
    BLE_S = 0x31, "ble.s", ShortBranch, ConditionalBranch, 2, 0;
    BLT_S = 0x32, "blt.s", ShortBranch, ConditionalBranch, 2, 0;
    BNE_UN_S = 0x33, "bne.un.s", ShortBranch, ConditionalBranch, 2, 0;
    BGE_UN_S = 0x34, "bge.un.s", ShortBranch, ConditionalBranch, 2, 0;
    BGT_UN_S = 0x35, "bgt.un.s", ShortBranch, ConditionalBranch, 2, 0;
    BLE_UN_S = 0x36, "ble.un.s", ShortBranch, ConditionalBranch, 2, 0;
    BLT_UN_S = 0x37, "blt.un.s", ShortBranch, ConditionalBranch, 2, 0;
    BR = 0x38, "br", Branch, UnconditionalBranch, 0, 0;
    BRFALSE = 0x39, "brfalse", Branch, ConditionalBranch, 1, 0;
    BRTRUE = 0x3A, "brtrue", Branch, ConditionalBranch, 1, 0;
    BEQ = 0x3B, "beq", Branch, ConditionalBranch, 2, 0;
    BGE = 0x3C, "bge", Branch, ConditionalBranch, 2, 0;
    BGT = 0x3D, "bgt", Branch, ConditionalBranch, 2, 0;
    BLE = 0x3E, "ble", Branch, ConditionalBranch, 2, 0;
    BLT = 0x3F, "blt", Branch, ConditionalBranch, 2, 0;
    BNE_UN = 0x40, "bne.un", Branch, ConditionalBranch, 2, 0;
    BGE_UN = 0x41, "bge.un", Branch, ConditionalBranch, 2, 0;
    BGT_UN = 0x42, "bgt.un", Branch, ConditionalBranch, 2, 0;
    BLE_UN = 0x43, "ble.un", Branch, ConditionalBranch, 2, 0;
    BLT_UN = 0x44, "blt.un", Branch, ConditionalBranch, 2, 0;
    SWITCH = 0x45, "switch", Switch, Switch, 1, 0;
    LDIND_I1 = 0x46, "ldind.i1", None, Sequential, 1, 1;
    LDIND_U1 = 0x47, "ldind.u1", None, Sequential, 1, 1;
    LDIND_I2 = 0x48, "ldind.i2", None, Sequential, 1, 1;
    LDIND_U2 = 0x49, "ldind.u2", None, Sequential, 1, 1;
    LDIND_I4 = 0x4A, "ldind.i4", None, Sequential, 1, 1;
    LDIND_U4 = 0x4B, "ldind.u4", None, Sequential, 1, 1;
    LDIND_I8 = 0x4C, "ldind.i8", None, Sequential, 1, 1;
    LDIND_I = 0x4D, "ldind.i", None, Sequential, 1, 1;
    LDIND_R4 = 0x4E, "ldind.r4", None, Sequential, 1, 1;
    LDIND_R8 = 0x4F, "ldind.r8", None, Sequential, 1, 1;
    LDIND_REF = 0x50, "ldind.ref", None, Sequential, 1, 1;
    STIND_REF = 0x51, "stind.ref", None, Sequential, 2, 0;
    STIND_I1 = 0x52, "stind.i1", None, Sequential, 2, 0;
    STIND_I2 = 0x53, "stind.i2", None, Sequential, 2, 0;
    STIND_I4 = 0x54, "stind.i4", None, Sequential, 2, 0;
    STIND_I8 = 0x55, "stind.i8", None, Sequential, 2, 0;
    STIND_R4 = 0x56, "stind.r4", None, Sequential, 2, 0;
    STIND_R8 = 0x57, "stind.r8", None, Sequential, 2, 0;
    ADD = 0x58, "add", None, Sequential, 2, 1;
    SUB = 0x59, "sub", None, Sequential, 2, 1;
    MUL = 0x5A, "mul", None, Sequential, 2, 1;
    DIV = 0x5B, "div", None, Sequential, 2, 1;
    DIV_UN = 0x5C, "div.un", None, Sequential, 2, 1;
    REM = 0x5D, "rem", None, Sequential, 2, 1;
    REM_UN = 0x5E, "rem.un", None, Sequential, 2, 1;
    AND = 0x5F, "and", None, Sequential, 2, 1;
    OR = 0x60, "or", None, Sequential, 2, 1;
    XOR = 0x61, "xor", None, Sequential, 2, 1;
    SHL = 0x62, "shl", None, Sequential, 2, 1;
    SHR = 0x63, "shr", None, Sequential, 2, 1;
    SHR_UN = 0x64, "shr.un", None, Sequential, 2, 1;
    NEG = 0x65, "neg", None, Sequential, 1, 1;
    NOT = 0x66, "not", None, Sequential, 1, 1;
    CONV_I1 = 0x67, "conv.i1", None, Sequential, 1, 1;
    CONV_I2 = 0x68, "conv.i2", None, Sequential, 1, 1;
    CONV_I4 = 0x69, "conv.i4", None, Sequential, 1, 1;
    CONV_I8 = 0x6A, "conv.i8", None, Sequential, 1, 1;
    CONV_R4 = 0x6B, "conv.r4", None, Sequential, 1, 1;
    CONV_R8 = 0x6C, "conv.r8", None, Sequential, 1, 1;
    CONV_U4 = 0x6D, "conv.u4", None, Sequential, 1, 1;
    CONV_U8 = 0x6E, "conv.u8", None, Sequential, 1, 1;
    CALLVIRT = 0x6F, "callvirt", Method, Call, 0, 0;
    CPOBJ = 0x70, "cpobj", Type, Sequential, 2, 0;
    LDOBJ = 0x71, "ldobj", Type, Sequential, 1, 1;
    LDSTR = 0x72, "ldstr", String, Sequential, 0, 1;
    NEWOBJ = 0x73, "newobj", Method, Call, 0, 0;
    CASTCLASS = 0x74, "castclass", Type, Sequential, 1, 1;
    ISINST = 0x75, "isinst", Type, Sequential, 1, 1;
    CONV_R_UN = 0x76, "conv.r.un", None, Sequential, 1, 1;
    UNBOX = 0x79, "unbox", Type, Sequential, 1, 1;
    THROW = 0x7A, "throw", None, Throw, 1, 0;
    LDFLD = 0x7B, "ldfld", Field, Sequential, 1, 1;
    LDFLDA = 0x7C, "ldflda", Field, Sequential, 1, 1;
    STFLD = 0x7D, "stfld", Field, Sequential, 2, 0;
    LDSFLD = 0x7E, "ldsfld", Field, Sequential, 0, 1;
    LDSFLDA = 0x7F, "ldsflda", Field, Sequential, 0, 1;
    STSFLD = 0x80, "stsfld", Field, Sequential, 1, 0;
    STOBJ = 0x81, "stobj", Type, Sequential, 2, 0;
    CONV_OVF_I1_UN = 0x82, "conv.ovf.i1.un", None, Sequential, 1, 1;
    CONV_OVF_I2_UN = 0x83, "conv.ovf.i2.un", None, Sequential, 1, 1;
    CONV_OVF_I4_UN = 0x84, "conv.ovf.i4.un", None, Sequential, 1, 1;
    CONV_OVF_I8_UN = 0x85, "conv.ovf.i8.un", None, Sequential, 1, 1;
    CONV_OVF_U1_UN = 0x86, "conv.ovf.u1.un", None, Sequential, 1, 1;
    CONV_OVF_U2_UN = 0x87, "conv.ovf.u2.un", None, Sequential, 1, 1;
    CONV_OVF_U4_UN = 0x88, "conv.ovf.u4.un", None, Sequential, 1, 1;
    CONV_OVF_U8_UN = 0x89, "conv.ovf.u8.un", None, Sequential, 1, 1;
    CONV_OVF_I_UN = 0x8A, "conv.ovf.i.un", None, Sequential, 1, 1;
    CONV_OVF_U_UN = 0x8B, "conv.ovf.u.un", None, Sequential, 1, 1;
    BOX = 0x8C, "box", Type, Sequential, 1, 1;
    NEWARR = 0x8D, "newarr", Type, Sequential, 1, 1;
    LDLEN = 0x8E, "ldlen", None, Sequential, 1, 1;
    LDELEMA = 0x8F, "ldelema", Type, Sequential, 2, 1;
    LDELEM_I1 = 0x90, "ldelem.i1", None, Sequential, 2, 1;
    LDELEM_U1 = 0x91, "ldelem.u1", None, Sequential, 2, 1;
    LDELEM_I2 = 0x92, "ldelem.i2", None, Sequential, 2, 1;
    LDELEM_U2 = 0x93, "ldelem.u2", None, Sequential, 2, 1;
    LDELEM_I4 = 0x94, "ldelem.i4", None, Sequential, 2, 1;
    LDELEM_U4 = 0x95, "ldelem.u4", None, Sequential, 2, 1;
    LDELEM_I8 = 0x96, "ldelem.i8", None, Sequential, 2, 1;
    LDELEM_I = 0x97, "ldelem.i", None, Sequential, 2, 1;
    LDELEM_R4 = 0x98, "ldelem.r4", None, Sequential, 2, 1;
    LDELEM_R8 = 0x99, "ldelem.r8", None, Sequential, 2, 1;
    LDELEM_REF = 0x9A, "ldelem.ref", None, Sequential, 2, 1;
    STELEM_I = 0x9B, "stelem.i", None, Sequential, 3, 0;
    STELEM_I1 = 0x9C, "stelem.i1", None, Sequential, 3, 0;
    STELEM_I2 = 0x9D, "stelem.i2", None, Sequential, 3, 0;
    STELEM_I4 = 0x9E, "stelem.i4", None, Sequential, 3, 0;
    STELEM_I8 = 0x9F, "stelem.i8", None, Sequential, 3, 0;
    STELEM_R4 = 0xA0, "stelem.r4", None, Sequential, 3, 0;
    STELEM_R8 = 0xA1, "stelem.r8", None, Sequential, 3, 0;
    STELEM_REF = 0xA2, "stelem.ref", None, Sequential, 3, 0;
    LDELEM = 0xA3, "ldelem", Type, Sequential, 2, 1;
    STELEM = 0xA4, "stelem", Type, Sequential, 3, 0;
    UNBOX_ANY = 0xA5, "unbox.any", Type, Sequential, 1, 1;
    CONV_OVF_I1 = 0xB3, "conv.ovf.i1", None, Sequential, 1, 1;
    CONV_OVF_U1 = 0xB4, "conv.ovf.u1", None, Sequential, 1, 1;
    CONV_OVF_I2 = 0xB5, "conv.ovf.i2", None, Sequential, 1, 1;
    CONV_OVF_U2 = 0xB6, "conv.ovf.u2", None, Sequential, 1, 1;
    CONV_OVF_I4 = 0xB7, "conv.ovf.i4", None, Sequential, 1, 1;
    CONV_OVF_U4 = 0xB8, "conv.ovf.u4", None, Sequential, 1, 1;
    CONV_OVF_I8 = 0xB9, "conv.ovf.i8", None, Sequential, 1, 1;
    CONV_OVF_U8 = 0xBA, "conv.ovf.u8", None, Sequential, 1, 1;
    REFANYVAL = 0xC2, "refanyval", Type, Sequential, 1, 1;
    CKFINITE = 0xC3, "ckfinite", None, Sequential, 1, 1;
    MKREFANY = 0xC6, "mkrefany", Type, Sequential, 1, 1;
    LDTOKEN = 0xD0, "ldtoken", Tok, Sequential, 0, 1;
    CONV_U2 = 0xD1, "conv.u2", None, Sequential, 1, 1;
    CONV_U1 = 0xD2, "conv.u1", None, Sequential, 1, 1;
    CONV_I = 0xD3, "conv.i", None, Sequential, 1, 1;
    CONV_OVF_I = 0xD4, "conv.ovf.i", None, Sequential, 1, 1;
    CONV_OVF_U = 0xD5, "conv.ovf.u", None, Sequential, 1, 1;
    ADD_OVF = 0xD6, "add.ovf", None, Sequential, 2, 1;
    ADD_OVF_UN = 0xD7, "add.ovf.un", None, Sequential, 2, 1;
    MUL_OVF = 0xD8, "mul.ovf", None, Sequential, 2, 1;
    MUL_OVF_UN = 0xD9, "mul.ovf.un", None, Sequential, 2, 1;
    SUB_OVF = 0xDA, "sub.ovf", None, Sequential, 2, 1;
    SUB_OVF_UN = 0xDB, "sub.ovf.un", None, Sequential, 2, 1;
    ENDFINALLY = 0xDC, "endfinally", None, EndFinally, 0, 0;
    LEAVE = 0xDD, "leave", Branch, Leave, 0, 0;
    LEAVE_S = 0xDE, "leave.s", ShortBranch, Leave, 0, 0;
    STIND_I = 0xDF, "stind.i", None, Sequential, 2, 0;
    CONV_U = 0xE0, "conv.u", None, Sequential, 1, 1;
    ARGLIST = 0xFE00, "arglist", None, Sequential, 0, 1;
    CEQ = 0xFE01, "ceq", None, Sequential, 2, 1;
    CGT = 0xFE02, "cgt", None, Sequential, 2, 1;
    CGT_UN = 0xFE03, "cgt.un", None, Sequential, 2, 1;
    CLT = 0xFE04, "clt", None, Sequential, 2, 1;
    CLT_UN = 0xFE05, "clt.un", None, Sequential, 2, 1;
    LDFTN = 0xFE06, "ldftn", Method, Sequential, 0, 1;
    LDVIRTFTN = 0xFE07, "ldvirtftn", Method, Sequential, 1, 1;
    LDARG = 0xFE09, "ldarg", Var, Sequential, 0, 1;
    LDARGA = 0xFE0A, "ldarga", Var, Sequential, 0, 1;
    STARG = 0xFE0B, "starg", Var, Sequential, 1, 0;
    LDLOC = 0xFE0C, "ldloc", Var, Sequential, 0, 1;
    LDLOCA = 0xFE0D, "ldloca", Var, Sequential, 0, 1;
    STLOC = 0xFE0E, "stloc", Var, Sequential, 1, 0;
    LOCALLOC = 0xFE0F, "localloc", None, Sequential, 1, 1;
    ENDFILTER = 0xFE11, "endfilter", None, EndFinally, 1, 0;
    UNALIGNED = 0xFE12, "unaligned.", ShortI, Sequential, 0, 0;
    VOLATILE = 0xFE13, "volatile.", None, Sequential, 0, 0;
    TAIL = 0xFE14, "tail.", None, Sequential, 0, 0;
    INITOBJ = 0xFE15, "initobj", Type, Sequential, 1, 0;
    CONSTRAINED = 0xFE16, "constrained.", Type, Sequential, 0, 0;
    CPBLK = 0xFE17, "cpblk", None, Sequential, 3, 0;
    INITBLK = 0xFE18, "initblk", None, Sequential, 3, 0;
    NO = 0xFE19, "no.", ShortI, Sequential, 0, 0;
    RETHROW = 0xFE1A, "rethrow", None, Throw, 0, 0;
    SIZEOF = 0xFE1C, "sizeof", Type, Sequential, 0, 1;
    REFANYTYPE = 0xFE1D, "refanytype", None, Sequential, 1, 1;
    READONLY = 0xFE1E, "readonly.", None, Sequential, 0, 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_consistent() {
        assert_eq!(OpCode::ALL.len(), 219);
        for opcode in OpCode::ALL {
            assert_eq!(OpCode::from_value(opcode.value()), Some(*opcode));
            assert_eq!(OpCode::from_name(opcode.name()), Some(*opcode));
        }

        assert_eq!(OpCode::from_value(0x24), None);
        assert_eq!(OpCode::from_value(0xFE08), None);
        assert_eq!(OpCode::from_value(0x1234), None);
        assert_eq!(OpCode::from_name("frobnicate"), None);
    }

    #[test]
    fn encoding() {
        let mut buffer = Vec::new();
        OpCode::RET.encode(&mut buffer);
        OpCode::CLT_UN.encode(&mut buffer);
        assert_eq!(buffer, vec![0x2A, 0xFE, 0x05]);

        assert_eq!(OpCode::LDC_I8.instruction_size(), Some(9));
        assert_eq!(OpCode::LDARG.instruction_size(), Some(4));
        assert_eq!(OpCode::SWITCH.instruction_size(), None);
    }

    #[test]
    fn behaviour() {
        assert_eq!(OpCode::DUP.stack_behavior().net_effect, 1);
        assert_eq!(OpCode::STELEM_REF.stack_behavior().net_effect, -3);
        assert!(OpCode::LEAVE_S.flow().is_terminal());
        assert!(!OpCode::BRTRUE.flow().is_terminal());
        assert!(OpCode::NEWOBJ.is_call());
        assert!(OpCode::TAIL.is_prefix());
        assert!(OpCode::LDTOKEN.operand_type().is_token());
    }
}
