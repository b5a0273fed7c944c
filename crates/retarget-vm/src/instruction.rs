//! Host machine instruction format and opcodes.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    Nop = 0,
    /// Push a heap address.
    Push = 1,
    Pop = 2,
    /// Pop a boolean address; jump when the value is false.
    JumpIfFalse = 4,
    Jump = 5,
    /// Call a host operation; operand is the heap address of its signature.
    Extern = 6,
    Annotation = 7,
    /// Jump to the address stored in a heap slot.
    JumpIndirect = 8,
    /// Pop destination then source; copy source into destination.
    Copy = 9,
}

impl Opcode {
    #[inline]
    pub fn has_operand(self) -> bool {
        !matches!(self, Opcode::Nop | Opcode::Pop | Opcode::Copy)
    }

    /// Encoded size in bytes.
    #[inline]
    pub fn size(self) -> u32 {
        if self.has_operand() {
            8
        } else {
            4
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::Jump => "JUMP",
            Opcode::Extern => "EXTERN",
            Opcode::Annotation => "ANNOTATION",
            Opcode::JumpIndirect => "JUMP_INDIRECT",
            Opcode::Copy => "COPY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode {code} at byte {at}")]
    UnknownOpcode { at: usize, code: u32 },
    #[error("code truncated at byte {0}")]
    Truncated(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: Option<u32>,
}

impl Instruction {
    #[inline]
    pub const fn new(opcode: Opcode, operand: u32) -> Self {
        Self { opcode, operand: Some(operand) }
    }

    #[inline]
    pub const fn bare(opcode: Opcode) -> Self {
        Self { opcode, operand: None }
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.opcode.size()
    }

    /// Big-endian encoding: opcode word, then the operand word if any.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&u32::from(self.opcode).to_be_bytes());
        if self.opcode.has_operand() {
            out.extend_from_slice(&self.operand.unwrap_or(0).to_be_bytes());
        }
    }

    pub fn decode_all(bytes: &[u8]) -> Result<Vec<Instruction>, DecodeError> {
        let word = |at: usize| -> Result<u32, DecodeError> {
            let b = bytes.get(at..at + 4).ok_or(DecodeError::Truncated(at))?;
            Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        };
        let mut out = Vec::new();
        let mut at = 0;
        while at < bytes.len() {
            let code = word(at)?;
            let opcode =
                Opcode::try_from(code).map_err(|_| DecodeError::UnknownOpcode { at, code })?;
            let operand = if opcode.has_operand() { Some(word(at + 4)?) } else { None };
            at += opcode.size() as usize;
            out.push(Instruction { opcode, operand });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(Instruction::new(Opcode::Push, 3).size(), 8);
        assert_eq!(Instruction::bare(Opcode::Copy).size(), 4);
        assert_eq!(Instruction::bare(Opcode::Pop).size(), 4);
        assert_eq!(Instruction::new(Opcode::JumpIndirect, 1).size(), 8);
    }

    #[test]
    fn test_encode_decode() {
        let code = [
            Instruction::new(Opcode::Push, 0x10),
            Instruction::bare(Opcode::Copy),
            Instruction::new(Opcode::Jump, 0xFFFF_FFFC),
        ];
        let mut bytes = Vec::new();
        for inst in &code {
            inst.encode(&mut bytes);
        }
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[..8], &[0, 0, 0, 1, 0, 0, 0, 0x10]);
        assert_eq!(Instruction::decode_all(&bytes).unwrap(), code.to_vec());
    }

    #[test]
    fn test_decode_rejects_gap_opcode() {
        assert_eq!(
            Instruction::decode_all(&[0, 0, 0, 3]),
            Err(DecodeError::UnknownOpcode { at: 0, code: 3 })
        );
    }
}
