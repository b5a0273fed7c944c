//! Input side of the retargeting compiler.
//!
//! - `opcode`: the stack bytecode opcode table
//! - `metadata`: types, fields, methods and tokens
//! - `reader`: decodes method bodies into `Instruction`s
//! - `writer`: assembles method bodies

pub mod error;
pub mod instruction;
pub mod metadata;
pub mod opcode;
pub mod reader;
pub mod writer;

pub use error::ReadError;
pub use instruction::{Instruction, Operand};
pub use metadata::{
    Builtins, FieldDef, FieldKey, Literal, MemberFlags, MethodBody, MethodDef, MethodKey, ParamDef,
    SyncMode, TypeDef, TypeKey, TypeKind, Universe,
};
pub use opcode::{Opcode, OperandKind};
pub use reader::{InstructionReader, TokenResolver};
pub use writer::{BodyWriter, Label};
