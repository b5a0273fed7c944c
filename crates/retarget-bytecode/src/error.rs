//! Errors raised while decoding or assembling method bodies.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("IL_{offset:04x}: unknown opcode 0x{code:02x}")]
    UnknownOpcode { offset: u32, code: u16 },

    #[error("IL_{offset:04x}: operand of {mnemonic} runs past the end of the body")]
    Truncated { offset: u32, mnemonic: &'static str },

    #[error("IL_{offset:04x}: token 0x{token:08x} does not resolve")]
    BadToken { offset: u32, token: u32 },

    #[error("IL_{offset:04x}: branch target IL_{target:04x} is not an instruction boundary")]
    BadBranchTarget { offset: u32, target: i64 },

    #[error("short branch at IL_{offset:04x} cannot reach its label (distance {distance})")]
    BranchOutOfRange { offset: u32, distance: i64 },

    #[error("label {0} was used but never bound")]
    UnboundLabel(usize),

    #[error("label {0} bound twice")]
    LabelRebound(usize),
}

impl ReadError {
    /// Source offset the error refers to, if any.
    pub fn offset(&self) -> Option<u32> {
        match *self {
            ReadError::UnknownOpcode { offset, .. }
            | ReadError::Truncated { offset, .. }
            | ReadError::BadToken { offset, .. }
            | ReadError::BadBranchTarget { offset, .. }
            | ReadError::BranchOutOfRange { offset, .. } => Some(offset),
            ReadError::UnboundLabel(_) | ReadError::LabelRebound(_) => None,
        }
    }
}
