//! Decoded instructions.

use std::fmt;

use crate::metadata::{FieldKey, MethodKey, TypeKey, Universe};
use crate::opcode::Opcode;

/// Inline operand with tokens already resolved and branch targets made
/// absolute.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Arg(u16),
    Local(u16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Absolute offset of a branch target.
    Target(u32),
    Switch(Vec<u32>),
    Type(TypeKey),
    Field(FieldKey),
    Method(MethodKey),
}

impl Operand {
    /// Textual form used in diagnostics.
    pub fn display<'a>(&'a self, universe: &'a Universe) -> OperandDisplay<'a> {
        OperandDisplay { operand: self, universe }
    }
}

pub struct OperandDisplay<'a> {
    operand: &'a Operand,
    universe: &'a Universe,
}

impl fmt::Display for OperandDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Operand::None => Ok(()),
            Operand::Arg(n) => write!(f, "arg{}", n),
            Operand::Local(n) => write!(f, "V_{}", n),
            Operand::Int32(v) => write!(f, "{}", v),
            Operand::Int64(v) => write!(f, "{}", v),
            Operand::Float32(v) => write!(f, "{:?}", v),
            Operand::Float64(v) => write!(f, "{:?}", v),
            Operand::String(s) => write!(f, "{:?}", s),
            Operand::Target(t) => write!(f, "IL_{:04x}", t),
            Operand::Switch(targets) => {
                f.write_str("(")?;
                for (i, t) in targets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "IL_{:04x}", t)?;
                }
                f.write_str(")")
            }
            Operand::Type(t) => f.write_str(&self.universe.ty(*t).name),
            Operand::Field(k) => f.write_str(&self.universe.field_display(*k)),
            Operand::Method(k) => f.write_str(&self.universe.method_display(*k)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: Opcode,
    pub operand: Operand,
}

impl Instruction {
    /// Branch targets of this instruction (empty for non-branches).
    pub fn targets(&self) -> &[u32] {
        match &self.operand {
            Operand::Target(t) => std::slice::from_ref(t),
            Operand::Switch(ts) => ts,
            _ => &[],
        }
    }

    pub fn display<'a>(&'a self, universe: &'a Universe) -> impl fmt::Display + 'a {
        InstructionDisplay { inst: self, universe }
    }
}

struct InstructionDisplay<'a> {
    inst: &'a Instruction,
    universe: &'a Universe,
}

impl fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.inst.offset, self.inst.opcode)?;
        if self.inst.operand != Operand::None {
            write!(f, " {}", self.inst.operand.display(self.universe))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let u = Universe::new();
        let inst =
            Instruction { offset: 0x12, opcode: Opcode::BrS, operand: Operand::Target(0x20) };
        assert_eq!(inst.display(&u).to_string(), "IL_0012: br.s IL_0020");

        let ty = Operand::Type(u.builtins().int32);
        assert_eq!(ty.display(&u).to_string(), "System.Int32");
        assert_eq!(Operand::Switch(vec![1, 2]).display(&u).to_string(), "(IL_0001, IL_0002)");
    }
}
