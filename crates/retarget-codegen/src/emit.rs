//! Instruction sink and the code buffer it records into.

use std::fmt;

use crate::error::Result;
use crate::variable::VarId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(u32);

impl LabelId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Recorded operation. Everything except `Mark`, `Source` and `Entry`
/// becomes exactly one host instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Push(VarId),
    Pop,
    /// Bare copy: pops destination, then source.
    Copy,
    /// Operand is the constant holding the signature.
    Extern(VarId),
    Jump(LabelId),
    JumpIfFalse(LabelId),
    JumpIndirect(VarId),
    Annotation(VarId),
    Nop,
    /// Places a label at the next instruction.
    Mark(LabelId),
    /// Debug point for the next instruction.
    Source { method: u32, offset: u32 },
    /// Exported entry point at the next instruction.
    Entry(String),
}

impl Op {
    /// Encoded size in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Op::Pop | Op::Copy | Op::Nop => 4,
            Op::Push(_)
            | Op::Extern(_)
            | Op::Jump(_)
            | Op::JumpIfFalse(_)
            | Op::JumpIndirect(_)
            | Op::Annotation(_) => 8,
            Op::Mark(_) | Op::Source { .. } | Op::Entry(_) => 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct CodeBuffer {
    ops: Vec<Op>,
    labels: u32,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> LabelId {
        self.labels += 1;
        LabelId(self.labels - 1)
    }

    #[inline]
    pub fn op(&mut self, op: Op) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn label_count(&self) -> usize {
        self.labels as usize
    }

    /// Ops recorded since `start`.
    pub fn since(&self, start: usize) -> &[Op] {
        &self.ops[start..]
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Target-machine primitives available to builders.
///
/// Every variable passed in is checked against the scratch pool: inputs
/// consume one pending use, and touching a pooled temporary is an
/// invariant error.
pub trait InstructionSink {
    /// Push a variable's address (a read).
    fn push(&mut self, var: VarId) -> Result<()>;
    fn pop(&mut self);
    /// `dst = src`.
    fn copy(&mut self, src: VarId, dst: VarId) -> Result<()>;
    fn extern_call(
        &mut self,
        signature: &str,
        inputs: &[VarId],
        output: Option<VarId>,
    ) -> Result<()>;
    fn jump(&mut self, label: LabelId);
    fn jump_if_false(&mut self, cond: VarId, label: LabelId) -> Result<()>;
    fn jump_indirect(&mut self, var: VarId) -> Result<()>;
    fn new_label(&mut self) -> LabelId;
    fn apply_label(&mut self, label: LabelId);
    fn annotate(&mut self, text: &str);
    fn mark_source(&mut self, offset: u32);
}
