//! Retargeting compiler.
//!
//! Lowers the method bodies of behaviour types from stack bytecode onto the
//! host stack machine, one type per program:
//!
//! 1. member discovery and naming (`symbols`)
//! 2. constructor defaults folded into initial heap values (`ctor`)
//! 3. per-method translation through the builder registry (`context`,
//!    `registry`, `builders`)
//! 4. address layout and heap declaration (`assemble`)

mod assemble;
mod compile;
mod context;
mod convert;
mod ctor;
mod emit;
mod error;
mod options;
mod pool;
mod registry;
mod symbols;
mod unit;
mod variable;

pub mod builders;
pub mod host;

pub use builders::{binary_type, compare_type, Accessor, AccessorShortcut};
pub use compile::Compiler;
pub use context::{MethodContext, OutVar};
pub use convert::{fold_constant, fold_integer, ConversionChain, IntShape};
pub use emit::{CodeBuffer, InstructionSink, LabelId, Op};
pub use error::{CompileError, Location, Result};
pub use options::{CompilerOptions, RemoteExterns};
pub use registry::{Claim, OperationBuilder, Registry, Scope};
pub use symbols::{Member, Symbol, SymbolTable};
pub use unit::TypeUnit;
pub use variable::{VarId, VarKind, Variable};

use retarget_bytecode::{TypeKey, Universe};
use retarget_vm::Program;

/// Compile one behaviour type with a fresh compiler.
pub fn compile_type(universe: &Universe, ty: TypeKey, options: CompilerOptions) -> Result<Program> {
    Compiler::new(options).compile_type(universe, ty)
}
