//! Constructor defaults.
//!
//! Host programs are never constructed: their heap starts from the
//! declared initial values. The leading part of the parameterless instance
//! constructor that only stores constants into fields (and chains to the
//! base constructor) is folded into those initial values. Whatever follows
//! runs as a synthetic method at the start event.
//!
//! The scan is linear and never follows a jump, so it stops after at most
//! one pass over the body.

use std::rc::Rc;

use indexmap::IndexMap;
use log::debug;
use retarget_bytecode::{
    FieldKey, Instruction, InstructionReader, MethodKey, Opcode, Operand, TypeKey, Universe,
};
use retarget_vm::Value;

use crate::convert::fold_constant;
use crate::error::{CompileError, Result};
use crate::symbols::{Member, SymbolTable};

#[derive(Debug, Default)]
pub struct CtorPlan {
    pub ctor: Option<MethodKey>,
    pub insts: Option<Rc<[Instruction]>>,
    /// Initial heap values, in store order.
    pub initial: IndexMap<FieldKey, Value>,
    /// Index of the first instruction that still has to run.
    pub remainder: Option<usize>,
}

/// Parameterless instance constructor of `ty`.
fn find_ctor(universe: &Universe, ty: TypeKey) -> Result<Option<MethodKey>> {
    let ctors: Vec<MethodKey> = universe
        .ty(ty)
        .methods
        .iter()
        .copied()
        .filter(|&m| universe.method(m).is_ctor() && !universe.method(m).is_static)
        .collect();
    if let Some(&ctor) = ctors.iter().find(|&&m| universe.method(m).params.is_empty()) {
        return Ok(Some(ctor));
    }
    match ctors.first() {
        Some(&ctor) => Err(CompileError::unsupported(format!(
            "{} has no parameterless constructor ({})",
            universe.ty(ty).name,
            universe.method_display(ctor)
        ))),
        None => Ok(None),
    }
}

fn constant_operand(universe: &Universe, inst: &Instruction) -> Option<(Value, TypeKey)> {
    let b = universe.builtins();
    Some(match (&inst.operand, inst.opcode) {
        (_, Opcode::Ldnull) => (Value::Null, b.object),
        (Operand::Int32(v), _) => (Value::Int32(*v), b.int32),
        (Operand::Int64(v), _) => (Value::Int64(*v), b.int64),
        (Operand::Float32(v), _) => (Value::Single(*v), b.float32),
        (Operand::Float64(v), _) => (Value::Double(*v), b.float64),
        (Operand::String(s), Opcode::Ldstr) => (Value::String(s.clone()), b.string),
        _ => return None,
    })
}

fn is_this(inst: &Instruction) -> bool {
    inst.opcode == Opcode::Ldarg0
}

/// Evaluate the constructor defaults of `ty`.
pub fn evaluate(universe: &Universe, symbols: &SymbolTable, ty: TypeKey) -> Result<CtorPlan> {
    let Some(ctor) = find_ctor(universe, ty)? else {
        return Ok(CtorPlan::default());
    };
    let Some(body) = &universe.method(ctor).body else {
        return Ok(CtorPlan { ctor: Some(ctor), ..CtorPlan::default() });
    };
    let name = universe.method_display(ctor);
    let insts: Rc<[Instruction]> = InstructionReader::read(&body.code, universe)
        .map_err(|e| CompileError::read(e).at(&name, None))?
        .into();

    let base = universe.ty(ty).base;
    let mut initial = IndexMap::new();
    let live: Vec<usize> = (0..insts.len()).filter(|&i| insts[i].opcode != Opcode::Nop).collect();
    let mut pos = 0;

    while pos < live.len() {
        let window: [Option<&Instruction>; 3] =
            [0, 1, 2].map(|k| live.get(pos + k).map(|&i| &insts[i]));
        match window {
            [Some(this), Some(value), Some(store)]
                if is_this(this) && store.opcode == Opcode::Stfld =>
            {
                let Operand::Field(field) = store.operand else { break };
                if !symbols.contains(Member::Field(field)) {
                    break;
                }
                let Some((value, from)) = constant_operand(universe, value) else { break };
                let to = universe.field(field).ty;
                let Some(value) = fold_constant(universe, &value, from, to) else { break };
                initial.insert(field, value);
                pos += 3;
            }
            [Some(this), Some(call), _] if is_this(this) && call.opcode == Opcode::Call => {
                let Operand::Method(callee) = call.operand else { break };
                let m = universe.method(callee);
                if !m.is_ctor() || !m.params.is_empty() || Some(m.declaring) != base {
                    break;
                }
                if universe.is_user_type(m.declaring) {
                    let inherited = evaluate(universe, symbols, m.declaring)?;
                    if inherited.remainder.is_some() {
                        return Err(CompileError::unsupported(format!(
                            "base constructor {} does more than initialise fields",
                            universe.method_display(callee)
                        ))
                        .at(&name, Some(call.offset)));
                    }
                    initial.extend(inherited.initial);
                }
                pos += 2;
            }
            _ => break,
        }
    }

    let remainder = match live.get(pos) {
        Some(&cut) if !(live.len() == pos + 1 && insts[cut].opcode == Opcode::Ret) => {
            let cut_offset = insts[cut].offset;
            for inst in &insts[cut..] {
                if inst.targets().iter().any(|&t| t < cut_offset) {
                    return Err(CompileError::unsupported(format!(
                        "branch to IL_{:04x} re-enters folded field initialisers",
                        inst.targets().iter().copied().min().unwrap_or(0)
                    ))
                    .at(&name, Some(inst.offset)));
                }
            }
            Some(cut)
        }
        _ => None,
    };

    debug!("{}: {} initial value(s), remainder {:?}", name, initial.len(), remainder);
    Ok(CtorPlan { ctor: Some(ctor), insts: Some(insts), initial, remainder })
}
