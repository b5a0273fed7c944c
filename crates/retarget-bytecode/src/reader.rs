//! Instruction Reader: decodes a method body into `Instruction`s.

use rustc_hash::FxHashSet;

use crate::error::ReadError;
use crate::instruction::{Instruction, Operand};
use crate::metadata::{FieldKey, MethodKey, TypeKey};
use crate::opcode::{Opcode, OperandKind, TWO_BYTE_PREFIX};

/// Resolves metadata tokens embedded in bodies.
pub trait TokenResolver {
    fn resolve_type(&self, token: u32) -> Option<TypeKey>;
    fn resolve_field(&self, token: u32) -> Option<FieldKey>;
    fn resolve_method(&self, token: u32) -> Option<MethodKey>;
    fn resolve_string(&self, token: u32) -> Option<&str>;
}

pub struct InstructionReader<'a, R: ?Sized> {
    code: &'a [u8],
    pos: usize,
    resolver: &'a R,
}

impl<'a, R: TokenResolver + ?Sized> InstructionReader<'a, R> {
    /// Decode the whole region, validating branch targets.
    pub fn read(code: &'a [u8], resolver: &'a R) -> Result<Vec<Instruction>, ReadError> {
        let mut reader = Self { code, pos: 0, resolver };
        let mut insts = Vec::new();
        while reader.pos < code.len() {
            insts.push(reader.next_instruction()?);
        }

        let boundaries: FxHashSet<u32> = insts.iter().map(|i| i.offset).collect();
        for inst in &insts {
            for &target in inst.targets() {
                if !boundaries.contains(&target) {
                    return Err(ReadError::BadBranchTarget {
                        offset: inst.offset,
                        target: i64::from(target),
                    });
                }
            }
        }
        Ok(insts)
    }

    fn next_instruction(&mut self) -> Result<Instruction, ReadError> {
        let offset = self.pos as u32;
        let first = self.code[self.pos];
        self.pos += 1;
        let code = if first == TWO_BYTE_PREFIX {
            let second = *self.code.get(self.pos).ok_or(ReadError::UnknownOpcode {
                offset,
                code: u16::from(first),
            })?;
            self.pos += 1;
            (u16::from(first) << 8) | u16::from(second)
        } else {
            u16::from(first)
        };
        let opcode = Opcode::try_from(code).map_err(|_| ReadError::UnknownOpcode { offset, code })?;
        let operand = self.operand(offset, opcode)?;
        Ok(Instruction { offset, opcode, operand })
    }

    fn take<const N: usize>(&mut self, offset: u32, opcode: Opcode) -> Result<[u8; N], ReadError> {
        let bytes = self
            .code
            .get(self.pos..self.pos + N)
            .ok_or(ReadError::Truncated { offset, mnemonic: opcode.mnemonic() })?;
        self.pos += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn operand(&mut self, offset: u32, opcode: Opcode) -> Result<Operand, ReadError> {
        let op = match opcode.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::ImplicitArg(n) => Operand::Arg(n),
            OperandKind::ImplicitLocal(n) => Operand::Local(n),
            OperandKind::ImplicitInt(v) => Operand::Int32(v),
            OperandKind::ArgShort => Operand::Arg(u16::from(self.take::<1>(offset, opcode)?[0])),
            OperandKind::LocalShort => {
                Operand::Local(u16::from(self.take::<1>(offset, opcode)?[0]))
            }
            OperandKind::Arg => Operand::Arg(u16::from_le_bytes(self.take(offset, opcode)?)),
            OperandKind::Local => Operand::Local(u16::from_le_bytes(self.take(offset, opcode)?)),
            OperandKind::IntShort => {
                Operand::Int32(i32::from(self.take::<1>(offset, opcode)?[0] as i8))
            }
            OperandKind::Int32 => Operand::Int32(i32::from_le_bytes(self.take(offset, opcode)?)),
            OperandKind::Int64 => Operand::Int64(i64::from_le_bytes(self.take(offset, opcode)?)),
            OperandKind::Float32 => {
                Operand::Float32(f32::from_le_bytes(self.take(offset, opcode)?))
            }
            OperandKind::Float64 => {
                Operand::Float64(f64::from_le_bytes(self.take(offset, opcode)?))
            }
            OperandKind::BranchShort => {
                let rel = i64::from(self.take::<1>(offset, opcode)?[0] as i8);
                Operand::Target(self.absolute(offset, rel)?)
            }
            OperandKind::Branch => {
                let rel = i64::from(i32::from_le_bytes(self.take(offset, opcode)?));
                Operand::Target(self.absolute(offset, rel)?)
            }
            OperandKind::Switch => {
                let count = u32::from_le_bytes(self.take(offset, opcode)?) as usize;
                if self.code.len().saturating_sub(self.pos) < count.saturating_mul(4) {
                    return Err(ReadError::Truncated { offset, mnemonic: opcode.mnemonic() });
                }
                let mut rels = Vec::with_capacity(count);
                for _ in 0..count {
                    rels.push(i64::from(i32::from_le_bytes(self.take(offset, opcode)?)));
                }
                // relative to the end of the whole switch instruction
                let targets = rels
                    .into_iter()
                    .map(|rel| self.absolute(offset, rel))
                    .collect::<Result<Vec<_>, _>>()?;
                Operand::Switch(targets)
            }
            OperandKind::TypeToken => {
                let token = u32::from_le_bytes(self.take(offset, opcode)?);
                let key = self.resolver.resolve_type(token);
                Operand::Type(key.ok_or(ReadError::BadToken { offset, token })?)
            }
            OperandKind::FieldToken => {
                let token = u32::from_le_bytes(self.take(offset, opcode)?);
                let key = self.resolver.resolve_field(token);
                Operand::Field(key.ok_or(ReadError::BadToken { offset, token })?)
            }
            OperandKind::MethodToken => {
                let token = u32::from_le_bytes(self.take(offset, opcode)?);
                let key = self.resolver.resolve_method(token);
                Operand::Method(key.ok_or(ReadError::BadToken { offset, token })?)
            }
            OperandKind::StringToken => {
                let token = u32::from_le_bytes(self.take(offset, opcode)?);
                let s = self.resolver.resolve_string(token);
                Operand::String(s.ok_or(ReadError::BadToken { offset, token })?.to_string())
            }
        };
        Ok(op)
    }

    /// Relative displacement measured from the next instruction.
    fn absolute(&self, offset: u32, rel: i64) -> Result<u32, ReadError> {
        let target = self.pos as i64 + rel;
        if target < 0 || target >= self.code.len() as i64 {
            return Err(ReadError::BadBranchTarget { offset, target });
        }
        Ok(target as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Universe;
    use crate::writer::BodyWriter;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_short_and_long_forms() {
        let u = Universe::new();
        let mut w = BodyWriter::new();
        w.ldarg(1).ldc_i4(300).emit(Opcode::Add).stloc(0);
        w.ldc_i4(-1).emit(Opcode::Pop).emit(Opcode::Ret);
        let code = w.finish().unwrap();
        let insts = InstructionReader::read(&code, &u).unwrap();
        let ops: Vec<_> = insts.iter().map(|i| (i.opcode, i.operand.clone())).collect();
        assert_eq!(
            ops,
            vec![
                (Opcode::Ldarg1, Operand::Arg(1)),
                (Opcode::LdcI4, Operand::Int32(300)),
                (Opcode::Add, Operand::None),
                (Opcode::Stloc0, Operand::Local(0)),
                (Opcode::LdcI4M1, Operand::Int32(-1)),
                (Opcode::Pop, Operand::None),
                (Opcode::Ret, Operand::None),
            ]
        );
        assert_eq!(insts[1].offset, 1);
        assert_eq!(insts[2].offset, 6);
    }

    #[test]
    fn test_branch_targets_are_absolute() {
        let u = Universe::new();
        let mut w = BodyWriter::new();
        let top = w.new_label();
        let end = w.new_label();
        w.bind(top).unwrap();
        w.ldarg(0).branch(Opcode::Brfalse, end);
        w.branch(Opcode::Br, top);
        w.bind(end).unwrap();
        w.emit(Opcode::Ret);
        let code = w.finish().unwrap();
        let insts = InstructionReader::read(&code, &u).unwrap();
        let ret = insts.last().unwrap().offset;
        assert_eq!(insts[1].operand, Operand::Target(ret));
        assert_eq!(insts[2].operand, Operand::Target(0));
    }

    #[test]
    fn test_switch() {
        let u = Universe::new();
        let mut w = BodyWriter::new();
        let a = w.new_label();
        let b = w.new_label();
        w.ldarg(0).switch(&[a, b]);
        w.bind(a).unwrap();
        w.emit(Opcode::Ret);
        w.bind(b).unwrap();
        w.emit(Opcode::Ret);
        let code = w.finish().unwrap();
        let insts = InstructionReader::read(&code, &u).unwrap();
        assert_eq!(insts[1].operand, Operand::Switch(vec![insts[2].offset, insts[3].offset]));
    }

    #[test]
    fn test_errors() {
        let u = Universe::new();
        assert_eq!(
            InstructionReader::read(&[0x24], &u),
            Err(ReadError::UnknownOpcode { offset: 0, code: 0x24 })
        );
        assert_eq!(
            InstructionReader::read(&[0x00, 0x20, 0x01], &u),
            Err(ReadError::Truncated { offset: 1, mnemonic: "ldc.i4" })
        );
        // br.s +1 lands inside the following ldc.i4.s
        assert!(matches!(
            InstructionReader::read(&[0x2B, 0x01, 0x1F, 0x05, 0x2A], &u),
            Err(ReadError::BadBranchTarget { offset: 0, .. })
        ));
        assert_eq!(
            InstructionReader::read(&[0x28, 0x01, 0x00, 0x00, 0x06], &u),
            Err(ReadError::BadToken { offset: 0, token: 0x0600_0001 })
        );
    }
}
