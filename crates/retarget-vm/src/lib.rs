//! Target side of the retargeting compiler: the host stack machine.

pub mod debug_map;
pub mod instruction;
pub mod program;
pub mod value;

pub use debug_map::{DebugMap, DebugPoint, SourcePoint};
pub use instruction::{DecodeError, Instruction, Opcode};
pub use program::{EntryPoint, HeapSlot, Program, SyncMode, HALT_ADDRESS};
pub use value::{Value, ValueKey};
