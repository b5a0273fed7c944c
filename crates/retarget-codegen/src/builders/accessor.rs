//! Trivial accessor shortcut.
//!
//! Methods of the compiled type whose whole body is `this.f` or
//! `this.f = value` are replaced at call sites by direct heap slot access.
//! Bound to one type: the analysis reads that type's method bodies.

use log::debug;
use retarget_bytecode::{
    FieldKey, Instruction, InstructionReader, MethodKey, Opcode, Operand, Universe,
};
use rustc_hash::FxHashMap;

use crate::context::MethodContext;
use crate::error::{CompileError, Result};
use crate::registry::{Claim, OperationBuilder};
use crate::symbols::{Member, SymbolTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
    Getter(FieldKey),
    Setter(FieldKey),
}

impl Accessor {
    /// Classify a decoded body, ignoring `nop`s.
    pub fn classify(insts: &[Instruction]) -> Option<Accessor> {
        let ops: Vec<&Instruction> = insts.iter().filter(|i| i.opcode != Opcode::Nop).collect();
        let is_arg = |i: &Instruction, n: u16| {
            matches!(i.opcode, Opcode::Ldarg0 | Opcode::Ldarg1 | Opcode::LdargS | Opcode::Ldarg)
                && i.operand == Operand::Arg(n)
        };
        let is = |i: &Instruction, op: Opcode| i.opcode == op;
        match ops.as_slice() {
            [this, load, ret]
                if is_arg(this, 0) && is(load, Opcode::Ldfld) && is(ret, Opcode::Ret) =>
            {
                match load.operand {
                    Operand::Field(f) => Some(Accessor::Getter(f)),
                    _ => None,
                }
            }
            [this, value, store, ret]
                if is_arg(this, 0)
                    && is_arg(value, 1)
                    && is(store, Opcode::Stfld)
                    && is(ret, Opcode::Ret) =>
            {
                match store.operand {
                    Operand::Field(f) => Some(Accessor::Setter(f)),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

pub struct AccessorShortcut {
    accessors: FxHashMap<MethodKey, Accessor>,
}

impl AccessorShortcut {
    pub fn analyze(universe: &Universe, symbols: &SymbolTable) -> Result<Self> {
        let mut accessors = FxHashMap::default();
        for method in symbols.iter().filter_map(|s| s.method()) {
            let m = universe.method(method);
            let Some(body) = &m.body else { continue };
            if m.is_static {
                continue;
            }
            let insts = InstructionReader::read(&body.code, universe)
                .map_err(|e| CompileError::read(e).at(&universe.method_display(method), None))?;
            let Some(accessor) = Accessor::classify(&insts) else { continue };
            let field = match accessor {
                Accessor::Getter(f) | Accessor::Setter(f) => f,
            };
            let f = universe.field(field);
            let shape_ok = match accessor {
                Accessor::Getter(_) => m.params.is_empty() && m.ret == f.ty,
                Accessor::Setter(_) => {
                    m.params.len() == 1 && !m.params[0].by_ref && m.params[0].ty == f.ty
                }
            };
            if shape_ok && symbols.contains(Member::Field(field)) {
                debug!("{} is a trivial accessor of {}", universe.method_display(method), f.name);
                accessors.insert(method, accessor);
            }
        }
        Ok(Self { accessors })
    }

    pub fn get(&self, method: MethodKey) -> Option<Accessor> {
        self.accessors.get(&method).copied()
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}

impl OperationBuilder for AccessorShortcut {
    fn name(&self) -> &'static str {
        "accessor-shortcut"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let Operand::Method(method) = inst.operand else {
            return Ok(Claim::Declined);
        };
        let Some(accessor) = self.get(method) else {
            return Ok(Claim::Declined);
        };
        let u = ctx.universe();
        // the call must land on this very body
        let emitted = &ctx.unit().symbols.method(u, method)?.emitted;
        if inst.opcode == Opcode::Callvirt
            && ctx.unit().symbols.dispatch_target(u, emitted) != Some(method)
        {
            return Ok(Claim::Declined);
        }
        let depth = usize::from(matches!(accessor, Accessor::Setter(_)));
        if !ctx.is_this(ctx.peek_stack(depth)?) {
            return Ok(Claim::Declined);
        }

        match accessor {
            Accessor::Getter(field) => {
                ctx.pop_stack()?;
                let slot = ctx.field_var(field)?;
                ctx.push_stack(slot);
            }
            Accessor::Setter(field) => {
                let value = ctx.pop_stack()?;
                ctx.pop_stack()?;
                let slot = ctx.field_var(field)?;
                let value = ctx.convert(value, ctx.var_type(slot))?;
                ctx.store(slot, value)?;
            }
        }
        Ok(Claim::Claimed)
    }
}
