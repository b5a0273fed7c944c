//! Operation Builder Registry.
//!
//! A fixed-size table indexed by opcode. Each slot holds builders ordered
//! by priority (highest first), ties broken by registration order. The
//! first builder to claim an instruction translates it.

use std::rc::Rc;

use log::trace;
use retarget_bytecode::{Instruction, Opcode};

use crate::context::MethodContext;
use crate::error::{CompileError, Location, Result};

/// Outcome of offering an instruction to a builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Claimed,
    /// Not handled; the context must be left untouched.
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Registered once and shared by every compiled type.
    Global,
    /// Bound to the type being compiled; removed afterwards.
    Type,
}

pub trait OperationBuilder {
    fn name(&self) -> &'static str;

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim>;
}

struct Registration {
    priority: i32,
    seq: u32,
    scope: Scope,
    builder: Rc<dyn OperationBuilder>,
}

pub struct Registry {
    table: Vec<Vec<Registration>>,
    seq: u32,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self { table: (0..Opcode::COUNT).map(|_| Vec::new()).collect(), seq: 0 }
    }

    pub fn register(
        &mut self,
        opcodes: &[Opcode],
        priority: i32,
        scope: Scope,
        builder: Rc<dyn OperationBuilder>,
    ) {
        let seq = self.seq;
        self.seq += 1;
        for &op in opcodes {
            let slot = &mut self.table[op.index()];
            slot.push(Registration { priority, seq, scope, builder: Rc::clone(&builder) });
            slot.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        }
    }

    pub fn unregister_type_scoped(&mut self) {
        for slot in &mut self.table {
            slot.retain(|r| r.scope == Scope::Global);
        }
    }

    /// Builder names for `op`, in the order they are consulted.
    pub fn builders_for(&self, op: Opcode) -> Vec<&'static str> {
        self.table[op.index()].iter().map(|r| r.builder.name()).collect()
    }

    pub fn dispatch(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<()> {
        for reg in &self.table[inst.opcode.index()] {
            if reg.builder.build(ctx, inst)? == Claim::Claimed {
                trace!("IL_{:04x}: {} claimed by {}", inst.offset, inst.opcode, reg.builder.name());
                return Ok(());
            }
        }
        Err(CompileError::Unclaimed {
            mnemonic: inst.opcode.mnemonic(),
            operand: inst.operand.display(ctx.universe()).to_string(),
            location: Location::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Named(&'static str);

    impl OperationBuilder for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn build(&self, _: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
            Ok(Claim::Declined)
        }
    }

    #[test]
    fn test_priority_then_registration_order() {
        let mut registry = Registry::new();
        registry.register(&[Opcode::Add], 0, Scope::Global, Rc::new(Named("low")));
        registry.register(&[Opcode::Add, Opcode::Sub], 10, Scope::Global, Rc::new(Named("first")));
        registry.register(&[Opcode::Add], 10, Scope::Type, Rc::new(Named("second")));
        assert_eq!(registry.builders_for(Opcode::Add), vec!["first", "second", "low"]);
        assert_eq!(registry.builders_for(Opcode::Sub), vec!["first"]);

        registry.unregister_type_scoped();
        assert_eq!(registry.builders_for(Opcode::Add), vec!["first", "low"]);
    }
}
