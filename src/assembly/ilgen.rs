//! Incremental construction of method bodies.
//!
//! An [`ILGenerator`] appends instructions to the body of one method. Operands are given
//! as typed values (labels, locals, types, method and field references, strings) and are
//! checked against the operand kind of the opcode; references are turned into tokens of
//! the declaring module right away.
//!
//! Branch targets are [`Label`]s: abstract positions that are defined first, used by any
//! number of branches and marked exactly once. Branch operands are patched when the body
//! is closed, which happens when the declaring type is created. Every defined label must
//! have been marked by then, and short branches must reach their target.
//!
//! Exception regions follow the usual protocol:
//!
//! ```text
//! BeginExceptionBlock            try
//!   BeginCatchBlock(type)        catch
//!   BeginExceptFilterBlock       filter
//!   BeginCatchBlock(None)        filter handler
//!   BeginFaultBlock              fault
//!   BeginFinallyBlock            finally
//! EndExceptionBlock
//! ```
//!
//! Each clause implicitly closes the previous one with `leave` (or `endfilter`,
//! `endfinally`), and `EndExceptionBlock` commits the whole region as a single set of
//! clauses in declaration order. Inner regions are committed before outer ones.
//!
//! The maximum stack depth is tracked while emitting, from the stack behaviour of every
//! opcode and the signature of every call site.

use crate::{
    assembly::opcodes::{FlowType, OpCode, OperandType},
    emit::{AssemblyBuilder, FieldRef, MethodId, MethodRef, ModuleId},
    metadata::{
        flags::CallingConventions,
        method::{ExceptionHandler, ExceptionHandlerFlags},
        token::Token,
    },
    typesystem::{corlib, ParamType, Type},
    Result,
};

/// A branch target of one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    method: MethodId,
    index: u32,
}

impl Label {
    /// Position of the label in definition order.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// A local variable of one method body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalBuilder {
    method: MethodId,
    index: u16,
    local_type: Type,
    pinned: bool,
}

impl LocalBuilder {
    /// Slot number of the local.
    #[must_use]
    pub fn local_index(&self) -> u16 {
        self.index
    }

    /// Declared type.
    #[must_use]
    pub fn local_type(&self) -> &Type {
        &self.local_type
    }

    /// Returns true if the local pins the object it refers to.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

#[derive(Debug, Clone, Default)]
struct LabelState {
    position: Option<u32>,
    stack_depth: Option<u16>,
}

#[derive(Debug, Clone)]
struct BranchFixup {
    label: usize,
    position: usize,
    size: u8,
    instruction_end: usize,
}

#[derive(Debug, Clone)]
struct SwitchFixup {
    labels: Vec<usize>,
    position: usize,
    instruction_end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClauseKind {
    Catch,
    Filter,
    Fault,
    Finally,
}

#[derive(Debug, Clone)]
struct Clause {
    kind: ClauseKind,
    /// Start of the filter code of a filter clause
    filter_start: u32,
    /// Start of the handler, `None` while a filter still awaits its handler
    handler_start: Option<u32>,
    class_token: Token,
}

impl Clause {
    fn start(&self) -> u32 {
        match self.kind {
            ClauseKind::Filter => self.filter_start,
            _ => self.handler_start.unwrap_or(self.filter_start),
        }
    }
}

/// An exception region that has been begun and not yet ended.
#[derive(Debug, Clone)]
struct OpenRegion {
    try_start: u32,
    end_label: usize,
    clauses: Vec<Clause>,
}

impl OpenRegion {
    fn in_dangling_filter(&self) -> bool {
        self.clauses
            .last()
            .is_some_and(|clause| clause.kind == ClauseKind::Filter && clause.handler_start.is_none())
    }
}

/// A declared local as recorded in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalInfo {
    pub local_type: Type,
    pub pinned: bool,
}

/// Generator state of one method body.
#[derive(Debug, Clone, Default)]
pub(crate) struct ILState {
    code: Vec<u8>,
    labels: Vec<LabelState>,
    branch_fixups: Vec<BranchFixup>,
    switch_fixups: Vec<SwitchFixup>,
    token_fixups: Vec<usize>,
    locals: Vec<LocalInfo>,
    regions: Vec<OpenRegion>,
    handlers: Vec<ExceptionHandler>,
    stack_depth: u16,
    max_stack: u16,
    unreachable: bool,
}

/// A body as produced by [`ILState::close`].
#[derive(Debug, Clone)]
pub(crate) struct ResolvedBody {
    pub code: Vec<u8>,
    pub max_stack: u16,
    pub locals: Vec<LocalInfo>,
    pub handlers: Vec<ExceptionHandler>,
    pub token_fixups: Vec<usize>,
}

impl ILState {
    pub(crate) fn with_capacity(size: usize) -> Self {
        ILState {
            code: Vec::with_capacity(size),
            ..Self::default()
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    fn update_stack_depth(&mut self, pops: u16, pushes: u16) {
        self.stack_depth = self.stack_depth.saturating_sub(pops).saturating_add(pushes);
        self.max_stack = self.max_stack.max(self.stack_depth);
    }

    fn record_label_stack_depth(&mut self, label: usize) {
        if self.unreachable {
            return;
        }
        let depth = self.stack_depth;
        if let Some(state) = self.labels.get_mut(label) {
            state.stack_depth.get_or_insert(depth);
        }
    }

    fn after_flow(&mut self, flow: FlowType) {
        if flow.is_terminal() {
            self.unreachable = true;
            self.stack_depth = 0;
        }
    }

    fn enter_handler(&mut self, depth: u16) {
        self.unreachable = false;
        self.stack_depth = depth;
        self.max_stack = self.max_stack.max(depth);
    }

    fn write_branch(&mut self, opcode: OpCode, label: usize) {
        opcode.encode(&mut self.code);
        let stack = opcode.stack_behavior();
        self.update_stack_depth(u16::from(stack.pops), u16::from(stack.pushes));
        self.record_label_stack_depth(label);

        let size: u8 = if opcode.operand_type() == OperandType::ShortBranch {
            1
        } else {
            4
        };
        let position = self.code.len();
        self.code.resize(position + size as usize, 0);
        self.branch_fixups.push(BranchFixup {
            label,
            position,
            size,
            instruction_end: self.code.len(),
        });
        self.after_flow(opcode.flow());
    }

    fn write_token(&mut self, opcode: OpCode, token: Token, pops: u16, pushes: u16) {
        opcode.encode(&mut self.code);
        self.token_fixups.push(self.code.len());
        self.code.extend_from_slice(&token.value().to_le_bytes());
        self.update_stack_depth(pops, pushes);
        self.after_flow(opcode.flow());
    }

    fn mark(&mut self, label: usize) {
        let position = self.offset();
        let state = &mut self.labels[label];
        state.position = Some(position);
        if let Some(depth) = state.stack_depth {
            self.stack_depth = depth;
        } else {
            let depth = if self.unreachable { 0 } else { self.stack_depth };
            state.stack_depth = Some(depth);
            self.stack_depth = depth;
        }
        self.unreachable = false;
    }

    /// Resolve every branch and produce the final instruction stream.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] for an open exception region, a label
    /// that was never marked or a short branch that can not reach its target.
    pub(crate) fn close(&self) -> Result<ResolvedBody> {
        if !self.regions.is_empty() {
            return Err(invalid_operation!(
                "{} exception block(s) were not closed",
                self.regions.len()
            ));
        }

        let label_position = |label: usize| -> Result<i64> {
            self.labels
                .get(label)
                .and_then(|state| state.position)
                .map(i64::from)
                .ok_or_else(|| invalid_operation!("Label {} is not marked", label))
        };

        for index in 0..self.labels.len() {
            label_position(index)?;
        }

        let mut code = self.code.clone();
        for fixup in &self.branch_fixups {
            let delta = label_position(fixup.label)? - fixup.instruction_end as i64;
            if fixup.size == 1 {
                let short = i8::try_from(delta).map_err(|_| {
                    invalid_operation!(
                        "Short branch at offset {} can not reach label {} ({} bytes)",
                        fixup.position - 1,
                        fixup.label,
                        delta
                    )
                })?;
                code[fixup.position] = short.to_le_bytes()[0];
            } else {
                let long = i32::try_from(delta)
                    .map_err(|_| invalid_operation!("Branch offset {} out of range", delta))?;
                code[fixup.position..fixup.position + 4].copy_from_slice(&long.to_le_bytes());
            }
        }

        for fixup in &self.switch_fixups {
            for (case, label) in fixup.labels.iter().enumerate() {
                let delta = label_position(*label)? - fixup.instruction_end as i64;
                let delta = i32::try_from(delta)
                    .map_err(|_| invalid_operation!("Switch offset {} out of range", delta))?;
                let target = fixup.position + case * 4;
                code[target..target + 4].copy_from_slice(&delta.to_le_bytes());
            }
        }

        Ok(ResolvedBody {
            code,
            max_stack: self.max_stack,
            locals: self.locals.clone(),
            handlers: self.handlers.clone(),
            token_fixups: self.token_fixups.clone(),
        })
    }
}

/// Instruction stream builder of one method.
///
/// Obtained from [`crate::emit::MethodBuilder::get_il_generator`]. Every operation fails
/// with [`crate::Error::InvalidOperation`] once the declaring type has been created.
pub struct ILGenerator<'a> {
    asm: &'a mut AssemblyBuilder,
    method: MethodId,
}

impl<'a> ILGenerator<'a> {
    pub(crate) fn new(asm: &'a mut AssemblyBuilder, method: MethodId) -> Self {
        ILGenerator { asm, method }
    }

    /// The method this generator writes.
    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    fn module(&self) -> Result<ModuleId> {
        self.asm.method_module(self.method)
    }

    fn state(&mut self) -> Result<&mut ILState> {
        self.asm.il_state_mut(self.method)
    }

    /// Offset of the next instruction.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the body is already closed.
    pub fn il_offset(&mut self) -> Result<u32> {
        Ok(self.state()?.offset())
    }

    fn check_operand(opcode: OpCode, allowed: &[OperandType]) -> Result<()> {
        if allowed.contains(&opcode.operand_type()) {
            Ok(())
        } else {
            Err(invalid_argument!(
                "opcode",
                "{} does not take an operand of this kind (expects {:?})",
                opcode.name(),
                opcode.operand_type()
            ))
        }
    }

    fn write_plain(&mut self, opcode: OpCode, operand: &[u8]) -> Result<()> {
        let return_pops = if opcode == OpCode::RET {
            u16::from(self.asm.method_returns_value(self.method)?)
        } else {
            0
        };

        let state = self.state()?;
        opcode.encode(&mut state.code);
        state.code.extend_from_slice(operand);
        let stack = opcode.stack_behavior();
        state.update_stack_depth(u16::from(stack.pops) + return_pops, u16::from(stack.pushes));
        state.after_flow(opcode.flow());
        Ok(())
    }

    /// Emit an instruction without operand.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the opcode requires an operand.
    pub fn emit(&mut self, opcode: OpCode) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::None])?;
        self.write_plain(opcode, &[])
    }

    /// Emit an instruction with a signed 8 bit immediate (`ldc.i4.s`, `unaligned.`).
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch.
    pub fn emit_i8(&mut self, opcode: OpCode, value: i8) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::ShortI, OperandType::ShortVar])?;
        self.write_plain(opcode, &value.to_le_bytes())
    }

    /// Emit an instruction with an unsigned 8 bit operand, such as a short argument index.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch.
    pub fn emit_u8(&mut self, opcode: OpCode, value: u8) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::ShortI, OperandType::ShortVar])?;
        self.write_plain(opcode, &[value])
    }

    /// Emit an instruction with a 16 bit argument or local index.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch.
    pub fn emit_i16(&mut self, opcode: OpCode, value: i16) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::Var])?;
        self.write_plain(opcode, &value.to_le_bytes())
    }

    /// Emit an instruction with a 32 bit immediate.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch.
    pub fn emit_i32(&mut self, opcode: OpCode, value: i32) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::I])?;
        self.write_plain(opcode, &value.to_le_bytes())
    }

    /// Emit an instruction with a 64 bit immediate.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch.
    pub fn emit_i64(&mut self, opcode: OpCode, value: i64) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::I8])?;
        self.write_plain(opcode, &value.to_le_bytes())
    }

    /// Emit an instruction with a 32 bit float immediate.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch.
    pub fn emit_f32(&mut self, opcode: OpCode, value: f32) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::ShortR])?;
        self.write_plain(opcode, &value.to_le_bytes())
    }

    /// Emit an instruction with a 64 bit float immediate.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch.
    pub fn emit_f64(&mut self, opcode: OpCode, value: f64) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::R])?;
        self.write_plain(opcode, &value.to_le_bytes())
    }

    fn check_label(&mut self, label: Label) -> Result<usize> {
        if label.method != self.method || label.index() >= self.state()?.labels.len() {
            return Err(invalid_argument!(
                "label",
                "Label {} was not defined by this generator",
                label.index
            ));
        }
        Ok(label.index())
    }

    /// Emit a branch to `label`.
    ///
    /// The opcode decides the operand size; short forms are not chosen automatically.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a non-branch opcode or a foreign label.
    pub fn emit_label(&mut self, opcode: OpCode, label: Label) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::ShortBranch, OperandType::Branch])?;
        let index = self.check_label(label)?;
        self.state()?.write_branch(opcode, index);
        Ok(())
    }

    /// Emit a jump table.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a non-switch opcode or a foreign label.
    pub fn emit_switch(&mut self, opcode: OpCode, labels: &[Label]) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::Switch])?;
        let indices = labels
            .iter()
            .map(|label| self.check_label(*label))
            .collect::<Result<Vec<_>>>()?;

        #[allow(clippy::cast_possible_truncation)]
        let count = indices.len() as u32;

        let state = self.state()?;
        opcode.encode(&mut state.code);
        state.code.extend_from_slice(&count.to_le_bytes());
        let position = state.code.len();
        state.code.resize(position + indices.len() * 4, 0);
        state.update_stack_depth(1, 0);
        for index in &indices {
            state.record_label_stack_depth(*index);
        }
        state.switch_fixups.push(SwitchFixup {
            labels: indices,
            position,
            instruction_end: state.code.len(),
        });
        Ok(())
    }

    /// Emit an instruction addressing a local variable.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch, for a local of
    /// another method, or for a short form with a slot above 255.
    pub fn emit_local(&mut self, opcode: OpCode, local: &LocalBuilder) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::ShortVar, OperandType::Var])?;
        if local.method != self.method {
            return Err(invalid_argument!(
                "local",
                "Local variable belongs to another method"
            ));
        }

        if opcode.operand_type() == OperandType::ShortVar {
            let index = u8::try_from(local.index).map_err(|_| {
                invalid_argument!(
                    "local",
                    "{} can not address local {}",
                    opcode.name(),
                    local.index
                )
            })?;
            self.write_plain(opcode, &[index])
        } else {
            self.write_plain(opcode, &local.index.to_le_bytes())
        }
    }

    /// Emit an instruction with a type operand (`box`, `newarr`, `ldtoken`, ...).
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch or a type that
    /// can not be referenced from this module.
    pub fn emit_type(&mut self, opcode: OpCode, ty: &Type) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::Type, OperandType::Tok])?;
        let token = self.asm.type_token(self.module()?, ty)?;
        let stack = opcode.stack_behavior();
        self.state()?
            .write_token(opcode, token, u16::from(stack.pops), u16::from(stack.pushes));
        Ok(())
    }

    /// Emit a call, `newobj`, `ldftn` or `ldtoken` of a method.
    ///
    /// The stack effect of call sites is derived from the callee signature.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch or a method
    /// that can not be referenced from this module.
    pub fn emit_method(&mut self, opcode: OpCode, method: &MethodRef) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::Method, OperandType::Tok])?;
        let module = self.module()?;
        let token = self.asm.method_token(module, method)?;

        let (pops, pushes) = if opcode.is_call() && opcode != OpCode::JMP {
            let signature = self.asm.method_ref_signature(method)?;
            #[allow(clippy::cast_possible_truncation)]
            let params = signature.parameters.len() as u16;
            let returns = u16::from(signature.return_type.ty != Type::Void);
            if opcode == OpCode::NEWOBJ {
                (params, 1)
            } else {
                (params + u16::from(signature.has_this()), returns)
            }
        } else {
            let stack = opcode.stack_behavior();
            (u16::from(stack.pops), u16::from(stack.pushes))
        };

        self.state()?.write_token(opcode, token, pops, pushes);
        Ok(())
    }

    /// Emit a field access or `ldtoken` of a field.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch or a field that
    /// can not be referenced from this module.
    pub fn emit_field(&mut self, opcode: OpCode, field: &FieldRef) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::Field, OperandType::Tok])?;
        let token = self.asm.field_token(self.module()?, field)?;
        let stack = opcode.stack_behavior();
        self.state()?
            .write_token(opcode, token, u16::from(stack.pops), u16::from(stack.pushes));
        Ok(())
    }

    /// Emit `ldstr` of a string literal.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for any opcode but `ldstr`.
    pub fn emit_string(&mut self, opcode: OpCode, value: &str) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::String])?;
        let module = self.module()?;
        let token = self.asm.module_data(module)?.tokens.user_string(value)?;
        self.state()?.write_token(opcode, token, 0, 1);
        Ok(())
    }

    /// Emit an instruction with a stand-alone signature token, as returned by
    /// [`crate::emit::ModuleBuilder::get_signature_token`].
    ///
    /// The stack effect is not known for raw signatures; prefer [`Self::emit_calli`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] on an operand kind mismatch or a token of
    /// another table.
    pub fn emit_signature(&mut self, opcode: OpCode, token: Token) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::Sig])?;
        if token.table() != crate::metadata::tables::TableId::StandAloneSig as u8 {
            return Err(invalid_argument!(
                "signature",
                "Token {} is not a stand-alone signature",
                token
            ));
        }
        self.state()?.write_token(opcode, token, 1, 0);
        Ok(())
    }

    /// Emit an indirect call through a function pointer with the given signature.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for any opcode but `calli` or a type that
    /// can not be referenced.
    pub fn emit_calli(
        &mut self,
        opcode: OpCode,
        calling_convention: CallingConventions,
        return_type: Type,
        parameter_types: &[Type],
    ) -> Result<()> {
        Self::check_operand(opcode, &[OperandType::Sig])?;
        let module = self.module()?;
        let parameters: Vec<ParamType> =
            parameter_types.iter().cloned().map(ParamType::from).collect();
        let returns = u16::from(return_type != Type::Void);
        let blob = self.asm.method_signature_blob(
            module,
            calling_convention,
            0,
            &ParamType::new(return_type),
            &parameters,
        )?;
        let token = self.asm.module_data(module)?.tokens.standalone_sig(blob);

        #[allow(clippy::cast_possible_truncation)]
        let pops = parameters.len() as u16
            + 1
            + u16::from(calling_convention.contains(CallingConventions::HAS_THIS));
        self.state()?.write_token(opcode, token, pops, returns);
        Ok(())
    }

    /// Declare a local variable.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for `void`, and
    /// [`crate::Error::InvalidOperation`] after 65535 locals.
    pub fn declare_local(&mut self, local_type: Type) -> Result<LocalBuilder> {
        self.declare_local_pinned(local_type, false)
    }

    /// Declare a local variable, optionally pinned.
    ///
    /// # Errors
    /// See [`Self::declare_local`].
    pub fn declare_local_pinned(&mut self, local_type: Type, pinned: bool) -> Result<LocalBuilder> {
        if local_type == Type::Void {
            return Err(invalid_argument!("localType", "A local can not be of type void"));
        }
        self.asm.check_type_usable(&local_type)?;

        let method = self.method;
        let state = self.state()?;
        let index = u16::try_from(state.locals.len())
            .map_err(|_| invalid_operation!("Too many local variables"))?;
        state.locals.push(LocalInfo {
            local_type: local_type.clone(),
            pinned,
        });
        Ok(LocalBuilder {
            method,
            index,
            local_type,
            pinned,
        })
    }

    /// Define a new, unmarked label.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the body is already closed.
    pub fn define_label(&mut self) -> Result<Label> {
        let method = self.method;
        let state = self.state()?;
        let index = u32::try_from(state.labels.len())
            .map_err(|_| invalid_operation!("Too many labels"))?;
        state.labels.push(LabelState::default());
        Ok(Label { method, index })
    }

    /// Bind `label` to the current offset.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for a foreign label or one that is already
    /// marked, and [`crate::Error::InvalidOperation`] for the end label of a region that is
    /// still open. That label is bound by [`Self::end_exception_block`].
    pub fn mark_label(&mut self, label: Label) -> Result<()> {
        let index = self.check_label(label)?;
        let state = self.state()?;
        if state.labels[index].position.is_some() {
            return Err(invalid_argument!(
                "label",
                "Label {} has already been marked",
                index
            ));
        }
        if state.regions.iter().any(|region| region.end_label == index) {
            return Err(invalid_operation!(
                "Label {} ends an open exception block",
                index
            ));
        }
        state.mark(index);
        Ok(())
    }

    /// Begin a protected region and return the label marking its end.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the body is already closed.
    pub fn begin_exception_block(&mut self) -> Result<Label> {
        let end = self.define_label()?;
        let state = self.state()?;
        let try_start = state.offset();
        state.regions.push(OpenRegion {
            try_start,
            end_label: end.index(),
            clauses: Vec::new(),
        });
        Ok(end)
    }

    fn current_region(&mut self) -> Result<&mut OpenRegion> {
        self.state()?
            .regions
            .last_mut()
            .ok_or_else(|| invalid_operation!("Not in an exception block"))
    }

    /// Close the try block or the previous clause of the current region.
    fn end_clause(&mut self) -> Result<()> {
        let region = self.current_region()?;
        if region.in_dangling_filter() {
            return Err(invalid_operation!(
                "A filter block must be followed by its handler"
            ));
        }
        let end_label = region.end_label;
        let ends_with_endfinally = region
            .clauses
            .last()
            .is_some_and(|clause| matches!(clause.kind, ClauseKind::Finally | ClauseKind::Fault));

        if ends_with_endfinally {
            self.write_plain(OpCode::ENDFINALLY, &[])
        } else {
            self.state()?.write_branch(OpCode::LEAVE, end_label);
            Ok(())
        }
    }

    /// Begin a catch clause.
    ///
    /// Directly after [`Self::begin_except_filter_block`] this starts the filter handler,
    /// which catches whatever the filter accepted; `exception_type` must be `None` there.
    /// Elsewhere `None` catches every exception (`System.Object`).
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] outside an exception block and
    /// [`crate::Error::InvalidArgument`] for a type given to a filter handler.
    pub fn begin_catch_block(&mut self, exception_type: Option<&Type>) -> Result<()> {
        if self.current_region()?.in_dangling_filter() {
            if exception_type.is_some() {
                return Err(invalid_argument!(
                    "exceptionType",
                    "Do not supply an exception type for a filter clause"
                ));
            }

            self.write_plain(OpCode::ENDFILTER, &[])?;
            let state = self.state()?;
            let start = state.offset();
            state.enter_handler(1);
            if let Some(clause) = state
                .regions
                .last_mut()
                .and_then(|region| region.clauses.last_mut())
            {
                clause.handler_start = Some(start);
            }
            return Ok(());
        }

        let catch_type = exception_type.cloned().unwrap_or(Type::Object);
        let class_token = self.asm.type_token(self.module()?, &catch_type)?;
        self.end_clause()?;

        let state = self.state()?;
        let start = state.offset();
        state.enter_handler(1);
        self.current_region()?.clauses.push(Clause {
            kind: ClauseKind::Catch,
            filter_start: start,
            handler_start: Some(start),
            class_token,
        });
        Ok(())
    }

    /// Begin a filter clause. It must be followed by [`Self::begin_catch_block`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] outside an exception block or after
    /// another filter without handler.
    pub fn begin_except_filter_block(&mut self) -> Result<()> {
        self.end_clause()?;
        let state = self.state()?;
        let start = state.offset();
        state.enter_handler(1);
        self.current_region()?.clauses.push(Clause {
            kind: ClauseKind::Filter,
            filter_start: start,
            handler_start: None,
            class_token: Token::new(0),
        });
        Ok(())
    }

    fn begin_terminal_clause(&mut self, kind: ClauseKind) -> Result<()> {
        self.end_clause()?;
        let state = self.state()?;
        let start = state.offset();
        state.enter_handler(0);
        self.current_region()?.clauses.push(Clause {
            kind,
            filter_start: start,
            handler_start: Some(start),
            class_token: Token::new(0),
        });
        Ok(())
    }

    /// Begin a fault clause.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] outside an exception block.
    pub fn begin_fault_block(&mut self) -> Result<()> {
        self.begin_terminal_clause(ClauseKind::Fault)
    }

    /// Begin a finally clause.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] outside an exception block.
    pub fn begin_finally_block(&mut self) -> Result<()> {
        self.begin_terminal_clause(ClauseKind::Finally)
    }

    /// Close the current region and commit its clauses.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] outside an exception block, for a region
    /// without handlers, for a filter that never got its handler, or when the region's end
    /// label is already bound.
    pub fn end_exception_block(&mut self) -> Result<()> {
        let region = self.current_region()?;
        let end_label = region.end_label;
        if region.clauses.is_empty() {
            return Err(invalid_operation!(
                "An exception block needs at least one handler"
            ));
        }
        if region.in_dangling_filter() {
            return Err(invalid_operation!(
                "Incorrect code generation for exception block: filter without handler"
            ));
        }

        if self.state()?.labels[end_label].position.is_some() {
            return Err(invalid_operation!(
                "End label {} of the exception block is already marked",
                end_label
            ));
        }

        self.end_clause()?;
        let state = self.state()?;
        let Some(region) = state.regions.pop() else {
            return Err(invalid_operation!("Not in an exception block"));
        };
        let end = state.offset();

        let try_length = region.clauses[0].start() - region.try_start;
        for (index, clause) in region.clauses.iter().enumerate() {
            let clause_end = region
                .clauses
                .get(index + 1)
                .map_or(end, Clause::start);
            let handler_offset = clause.handler_start.unwrap_or(clause.filter_start);
            let flags = match clause.kind {
                ClauseKind::Catch => ExceptionHandlerFlags::EXCEPTION,
                ClauseKind::Filter => ExceptionHandlerFlags::FILTER,
                ClauseKind::Fault => ExceptionHandlerFlags::FAULT,
                ClauseKind::Finally => ExceptionHandlerFlags::FINALLY,
            };

            state.handlers.push(ExceptionHandler {
                flags,
                try_offset: region.try_start,
                try_length,
                handler_offset,
                handler_length: clause_end - handler_offset,
                class_token: clause.class_token,
                filter_offset: if clause.kind == ClauseKind::Filter {
                    clause.filter_start
                } else {
                    0
                },
            });
        }

        state.mark(region.end_label);
        Ok(())
    }

    /// Lexical scopes only matter for debugging symbols, which are not written.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the body is already closed.
    pub fn begin_scope(&mut self) -> Result<()> {
        self.state().map(|_| ())
    }

    /// See [`Self::begin_scope`].
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidOperation`] if the body is already closed.
    pub fn end_scope(&mut self) -> Result<()> {
        self.state().map(|_| ())
    }

    /// Namespace imports only matter for debugging symbols, which are not written.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] for an empty namespace.
    pub fn using_namespace(&mut self, namespace: &str) -> Result<()> {
        if namespace.is_empty() {
            return Err(invalid_argument!("usingNamespace", "Empty namespace"));
        }
        self.state().map(|_| ())
    }

    /// Emit `newobj` of the parameterless constructor of `exception_type` and `throw`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidArgument`] if the type is not an exception type or
    /// has no parameterless constructor.
    pub fn throw_exception(&mut self, exception_type: &Type) -> Result<()> {
        if !self
            .asm
            .is_assignable_from(&corlib::exception(), exception_type)?
        {
            return Err(invalid_argument!(
                "excType",
                "{} does not derive from System.Exception",
                self.asm.type_name(exception_type)
            ));
        }
        let Some(constructor) = self.asm.default_constructor_of(exception_type)? else {
            return Err(invalid_argument!(
                "excType",
                "Type should have a default constructor"
            ));
        };

        self.emit_method(OpCode::NEWOBJ, &constructor)?;
        self.emit(OpCode::THROW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::decode_stream,
        emit::AssemblyBuilderAccess,
        metadata::{flags::MethodAttributes, identity::AssemblyName},
    };

    fn fixture() -> (AssemblyBuilder, MethodId) {
        let mut asm = AssemblyBuilder::new(AssemblyName::new("ilgen"), AssemblyBuilderAccess::Run);
        let module = asm.define_dynamic_module("ilgen").unwrap();
        let ty = asm
            .module_builder(module)
            .unwrap()
            .define_type("Test", Default::default())
            .unwrap();
        let method = asm
            .type_builder(ty)
            .unwrap()
            .define_method(
                "M",
                MethodAttributes::PUBLIC | MethodAttributes::STATIC,
                Type::I4,
                vec![Type::I4],
            )
            .unwrap();
        (asm, method)
    }

    #[test]
    fn branches_are_patched() {
        let (mut asm, method) = fixture();
        let state = {
            let mut il = asm.il_generator(method).unwrap();
            let done = il.define_label().unwrap();
            il.emit_u8(OpCode::LDARG_S, 0).unwrap();
            il.emit_label(OpCode::BRTRUE_S, done).unwrap();
            il.emit(OpCode::LDC_I4_1).unwrap();
            il.emit(OpCode::RET).unwrap();
            il.mark_label(done).unwrap();
            il.emit(OpCode::LDC_I4_0).unwrap();
            il.emit(OpCode::RET).unwrap();
            asm.il_state_mut(method).unwrap().clone()
        };

        let body = state.close().unwrap();
        assert_eq!(body.code, vec![0x0E, 0x00, 0x2D, 0x02, 0x17, 0x2A, 0x16, 0x2A]);
        assert_eq!(body.max_stack, 1);
    }

    #[test]
    fn operand_mismatch() {
        let (mut asm, method) = fixture();
        let mut il = asm.il_generator(method).unwrap();
        assert!(matches!(
            il.emit(OpCode::LDC_I4_S),
            Err(crate::Error::InvalidArgument { .. })
        ));
        assert!(il.emit_i32(OpCode::LDC_I4_S, 1).is_err());
        assert!(il.emit_string(OpCode::LDC_I4, "x").is_err());
        assert!(il.emit_i32(OpCode::LDC_I4, 1).is_ok());
    }

    #[test]
    fn labels() {
        let (mut asm, method) = fixture();
        let (_, other) = fixture();

        let mut il = asm.il_generator(method).unwrap();
        let label = il.define_label().unwrap();
        il.mark_label(label).unwrap();
        assert!(matches!(
            il.mark_label(label),
            Err(crate::Error::InvalidArgument { .. })
        ));

        let foreign = Label {
            method: other,
            index: 0,
        };
        assert!(il.emit_label(OpCode::BR, foreign).is_err());

        let unmarked = il.define_label().unwrap();
        il.emit_label(OpCode::BR, unmarked).unwrap();
        let state = asm.il_state_mut(method).unwrap().clone();
        assert!(matches!(
            state.close(),
            Err(crate::Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn short_branch_out_of_range() {
        let (mut asm, method) = fixture();
        let mut il = asm.il_generator(method).unwrap();
        let target = il.define_label().unwrap();
        il.emit_label(OpCode::BR_S, target).unwrap();
        for _ in 0..200 {
            il.emit(OpCode::NOP).unwrap();
        }
        il.mark_label(target).unwrap();
        il.emit(OpCode::RET).unwrap();

        let state = asm.il_state_mut(method).unwrap().clone();
        assert!(matches!(
            state.close(),
            Err(crate::Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn exception_regions() {
        let (mut asm, method) = fixture();
        let mut il = asm.il_generator(method).unwrap();

        assert!(matches!(
            il.begin_catch_block(None),
            Err(crate::Error::InvalidOperation(_))
        ));

        il.begin_exception_block().unwrap();
        il.emit(OpCode::NOP).unwrap();
        il.begin_except_filter_block().unwrap();
        il.emit(OpCode::POP).unwrap();
        il.emit(OpCode::LDC_I4_1).unwrap();
        assert!(matches!(
            il.begin_catch_block(Some(&Type::String)),
            Err(crate::Error::InvalidArgument { .. })
        ));
        il.begin_catch_block(None).unwrap();
        il.emit(OpCode::POP).unwrap();
        il.begin_finally_block().unwrap();
        il.emit(OpCode::NOP).unwrap();
        il.end_exception_block().unwrap();

        // the region is committed; closing it again is out of protocol
        assert!(matches!(
            il.end_exception_block(),
            Err(crate::Error::InvalidOperation(_))
        ));
        il.emit(OpCode::LDC_I4_0).unwrap();
        il.emit(OpCode::RET).unwrap();

        let body = asm.il_state_mut(method).unwrap().clone().close().unwrap();
        assert_eq!(body.handlers.len(), 2);

        let filter = &body.handlers[0];
        assert_eq!(filter.flags, ExceptionHandlerFlags::FILTER);
        assert_eq!(filter.try_offset, 0);
        // nop; leave
        assert_eq!(filter.try_length, 6);
        assert_eq!(filter.filter_offset, 6);
        // pop; ldc.i4.1; endfilter
        assert_eq!(filter.handler_offset, 10);

        let finally = &body.handlers[1];
        assert_eq!(finally.flags, ExceptionHandlerFlags::FINALLY);
        // pop; leave
        assert_eq!(finally.handler_offset, 16);
        assert_eq!(filter.handler_length, 6);
        // nop; endfinally
        assert_eq!(finally.handler_length, 2);

        let instructions = decode_stream(&body.code).unwrap();
        let leave = &instructions[1];
        assert_eq!(leave.opcode, OpCode::LEAVE);
        assert_eq!(
            leave.operand,
            crate::assembly::Operand::Target(i64::from(finally.handler_offset + 2))
        );
    }

    #[test]
    fn dangling_filter() {
        let (mut asm, method) = fixture();
        let mut il = asm.il_generator(method).unwrap();
        il.begin_exception_block().unwrap();
        il.begin_except_filter_block().unwrap();
        assert!(matches!(
            il.end_exception_block(),
            Err(crate::Error::InvalidOperation(_))
        ));
        assert!(il.begin_finally_block().is_err());
    }

    #[test]
    fn region_end_label_is_bound_once() {
        let (mut asm, method) = fixture();
        let mut il = asm.il_generator(method).unwrap();
        let end = il.begin_exception_block().unwrap();
        il.emit(OpCode::NOP).unwrap();
        assert!(matches!(
            il.mark_label(end),
            Err(crate::Error::InvalidOperation(_))
        ));
        il.begin_finally_block().unwrap();
        il.emit(OpCode::NOP).unwrap();
        il.end_exception_block().unwrap();
        assert!(il.mark_label(end).is_err());

        let inner_end = il.begin_exception_block().unwrap();
        il.begin_exception_block().unwrap();
        assert!(il.mark_label(inner_end).is_err());
    }

    #[test]
    fn empty_region() {
        let (mut asm, method) = fixture();
        let mut il = asm.il_generator(method).unwrap();
        il.begin_exception_block().unwrap();
        assert!(matches!(
            il.end_exception_block(),
            Err(crate::Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn locals() {
        let (mut asm, method) = fixture();
        let (_, other) = fixture();
        let mut il = asm.il_generator(method).unwrap();

        let local = il.declare_local(Type::I8).unwrap();
        assert_eq!(local.local_index(), 0);
        let pinned = il.declare_local_pinned(Type::U1.make_by_ref_type(), true).unwrap();
        assert_eq!(pinned.local_index(), 1);
        assert!(pinned.is_pinned());
        assert!(il.declare_local(Type::Void).is_err());

        il.emit_local(OpCode::STLOC_S, &local).unwrap();
        il.emit_local(OpCode::LDLOC, &pinned).unwrap();

        let foreign = LocalBuilder {
            method: other,
            ..local
        };
        assert!(il.emit_local(OpCode::LDLOC_S, &foreign).is_err());
    }
}
