//! Body assembler.
//!
//! Picks the shortest encoding for argument, local and integer operands.
//! Branches are emitted in the form requested; short branches that cannot
//! reach their label fail in `finish`.

use crate::error::ReadError;
use crate::opcode::{Opcode, OperandKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

#[derive(Debug)]
struct Fixup {
    /// Offset of the instruction, for diagnostics.
    inst: u32,
    /// Where the displacement is written.
    at: usize,
    /// Displacement is relative to this position.
    base: usize,
    label: Label,
    short: bool,
}

#[derive(Debug, Default)]
pub struct BodyWriter {
    code: Vec<u8>,
    labels: Vec<Option<usize>>,
    fixups: Vec<Fixup>,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    fn opcode(&mut self, op: Opcode) {
        if op.is_two_byte() {
            self.code.extend_from_slice(&op.code().to_be_bytes());
        } else {
            self.code.push(op.code() as u8);
        }
    }

    /// Emit an opcode without inline operand (or with an implicit one).
    pub fn emit(&mut self, op: Opcode) -> &mut Self {
        debug_assert_eq!(op.operand_kind().size(), Some(0), "{} takes an operand", op);
        self.opcode(op);
        self
    }

    /// Emit an opcode followed by a metadata token.
    pub fn token(&mut self, op: Opcode, token: u32) -> &mut Self {
        self.opcode(op);
        self.code.extend_from_slice(&token.to_le_bytes());
        self
    }

    pub fn ldarg(&mut self, n: u16) -> &mut Self {
        match n {
            0 => self.emit(Opcode::Ldarg0),
            1 => self.emit(Opcode::Ldarg1),
            2 => self.emit(Opcode::Ldarg2),
            3 => self.emit(Opcode::Ldarg3),
            _ => self.indexed(Opcode::LdargS, Opcode::Ldarg, n),
        }
    }

    pub fn ldarga(&mut self, n: u16) -> &mut Self {
        self.indexed(Opcode::LdargaS, Opcode::Ldarga, n)
    }

    pub fn starg(&mut self, n: u16) -> &mut Self {
        self.indexed(Opcode::StargS, Opcode::Starg, n)
    }

    pub fn ldloc(&mut self, n: u16) -> &mut Self {
        match n {
            0 => self.emit(Opcode::Ldloc0),
            1 => self.emit(Opcode::Ldloc1),
            2 => self.emit(Opcode::Ldloc2),
            3 => self.emit(Opcode::Ldloc3),
            _ => self.indexed(Opcode::LdlocS, Opcode::Ldloc, n),
        }
    }

    pub fn ldloca(&mut self, n: u16) -> &mut Self {
        self.indexed(Opcode::LdlocaS, Opcode::Ldloca, n)
    }

    pub fn stloc(&mut self, n: u16) -> &mut Self {
        match n {
            0 => self.emit(Opcode::Stloc0),
            1 => self.emit(Opcode::Stloc1),
            2 => self.emit(Opcode::Stloc2),
            3 => self.emit(Opcode::Stloc3),
            _ => self.indexed(Opcode::StlocS, Opcode::Stloc, n),
        }
    }

    fn indexed(&mut self, short: Opcode, long: Opcode, n: u16) -> &mut Self {
        if let Ok(b) = u8::try_from(n) {
            self.opcode(short);
            self.code.push(b);
        } else {
            self.opcode(long);
            self.code.extend_from_slice(&n.to_le_bytes());
        }
        self
    }

    pub fn ldc_i4(&mut self, value: i32) -> &mut Self {
        let implicit = Opcode::ALL.iter().copied().find(|op| {
            op.operand_kind() == OperandKind::ImplicitInt(value)
        });
        if let Some(op) = implicit {
            return self.emit(op);
        }
        if let Ok(b) = i8::try_from(value) {
            self.opcode(Opcode::LdcI4S);
            self.code.push(b as u8);
        } else {
            self.opcode(Opcode::LdcI4);
            self.code.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    pub fn ldc_i8(&mut self, value: i64) -> &mut Self {
        self.opcode(Opcode::LdcI8);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn ldc_r4(&mut self, value: f32) -> &mut Self {
        self.opcode(Opcode::LdcR4);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn ldc_r8(&mut self, value: f64) -> &mut Self {
        self.opcode(Opcode::LdcR8);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    // === Labels ===

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    pub fn bind(&mut self, label: Label) -> Result<(), ReadError> {
        let slot = &mut self.labels[label.0];
        if slot.is_some() {
            return Err(ReadError::LabelRebound(label.0));
        }
        *slot = Some(self.code.len());
        Ok(())
    }

    /// Emit a branch (short or long form, as given) to `label`.
    ///
    /// Panics if `op` takes no branch operand.
    pub fn branch(&mut self, op: Opcode, label: Label) -> &mut Self {
        let inst = self.offset();
        let short = match op.operand_kind() {
            OperandKind::BranchShort => true,
            OperandKind::Branch => false,
            _ => panic!("{} is not a branch", op),
        };
        self.opcode(op);
        let at = self.code.len();
        let width = if short { 1 } else { 4 };
        self.code.resize(at + width, 0);
        self.fixups.push(Fixup { inst, at, base: at + width, label, short });
        self
    }

    pub fn switch(&mut self, labels: &[Label]) -> &mut Self {
        let inst = self.offset();
        self.opcode(Opcode::Switch);
        self.code.extend_from_slice(&(labels.len() as u32).to_le_bytes());
        let start = self.code.len();
        let base = start + labels.len() * 4;
        self.code.resize(base, 0);
        for (i, &label) in labels.iter().enumerate() {
            self.fixups.push(Fixup { inst, at: start + i * 4, base, label, short: false });
        }
        self
    }

    /// Resolve labels and return the encoded body.
    pub fn finish(mut self) -> Result<Vec<u8>, ReadError> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.labels[fixup.label.0].ok_or(ReadError::UnboundLabel(fixup.label.0))?;
            let distance = target as i64 - fixup.base as i64;
            if fixup.short {
                let rel = i8::try_from(distance).map_err(|_| ReadError::BranchOutOfRange {
                    offset: fixup.inst,
                    distance,
                })?;
                self.code[fixup.at] = rel as u8;
            } else {
                let rel = distance as i32;
                self.code[fixup.at..fixup.at + 4].copy_from_slice(&rel.to_le_bytes());
            }
        }
        Ok(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortest_forms() {
        let mut w = BodyWriter::new();
        w.ldc_i4(8).ldc_i4(9).ldc_i4(1000).ldloc(7).ldarg(300);
        let code = w.finish().unwrap();
        assert_eq!(
            code,
            vec![0x1E, 0x1F, 9, 0x20, 0xE8, 0x03, 0, 0, 0x11, 7, 0xFE, 0x09, 0x2C, 0x01]
        );
    }

    #[test]
    fn test_short_branch_out_of_range() {
        let mut w = BodyWriter::new();
        let end = w.new_label();
        w.branch(Opcode::BrS, end);
        for _ in 0..200 {
            w.emit(Opcode::Nop);
        }
        w.bind(end).unwrap();
        assert_eq!(
            w.finish(),
            Err(ReadError::BranchOutOfRange { offset: 0, distance: 200 })
        );
    }

    #[test]
    fn test_unbound_label() {
        let mut w = BodyWriter::new();
        let l = w.new_label();
        w.branch(Opcode::Br, l);
        assert_eq!(w.finish(), Err(ReadError::UnboundLabel(0)));
    }
}
