//! Assembler: recorded ops to a finished host program.
//!
//! Two passes over the code buffer. The first lays out addresses, places
//! labels, entry points and debug points. The second resolves labels and
//! heap indices into instructions.

use log::debug;
use retarget_vm::{DebugMap, EntryPoint, HeapSlot, Instruction, Opcode, Program, Value};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::emit::{LabelId, Op};
use crate::error::{CompileError, Location, Result};
use crate::host;
use crate::unit::TypeUnit;
use crate::variable::{VarId, VarKind, Variable};

struct Layout {
    labels: Vec<Option<u32>>,
    entry_points: Vec<EntryPoint>,
    points: Vec<(u32, u32, u32)>,
}

fn layout(ops: &[Op], label_count: usize) -> Result<Layout> {
    let mut labels = vec![None; label_count];
    let mut entry_points = Vec::new();
    let mut points = Vec::new();
    let mut address = 0u32;
    for op in ops {
        match op {
            Op::Mark(label) => {
                let slot = &mut labels[label.index()];
                if slot.is_some() {
                    return Err(CompileError::invariant(format!("label {:?} placed twice", label)));
                }
                *slot = Some(address);
            }
            Op::Entry(name) => entry_points.push(EntryPoint { name: name.clone(), address }),
            Op::Source { method, offset } => points.push((address, *method, *offset)),
            _ => address += op.size(),
        }
    }
    Ok(Layout { labels, entry_points, points })
}

fn resolve(labels: &[Option<u32>], label: LabelId) -> Result<u32> {
    labels
        .get(label.index())
        .copied()
        .flatten()
        .ok_or(CompileError::UnresolvedLabel {
            label: label.index() as u32,
            location: Location::default(),
        })
}

/// Prefix of generated names for unnamed variables.
fn deferred_kind(var: &Variable) -> &'static str {
    match var.kind {
        VarKind::Local => "lcl",
        VarKind::Constant | VarKind::LabelAddress(_) => "const",
        _ => "intnl",
    }
}

/// Heap slots in declaration order: own fields, inherited fields, then
/// every other variable the code references.
fn heap_order(unit: &TypeUnit<'_>, referenced: &FxHashSet<VarId>) -> Vec<VarId> {
    let u = unit.universe;
    let mut order: Vec<VarId> = Vec::new();
    let (own, inherited): (Vec<_>, Vec<_>) =
        unit.field_vars().partition(|&(field, _)| u.field(field).declaring == unit.ty);
    order.extend(own.into_iter().map(|(_, var)| var));
    order.extend(inherited.into_iter().map(|(_, var)| var));
    for (id, var) in unit.vars.iter() {
        if matches!(var.kind, VarKind::Field(_)) || var.is_address() || !referenced.contains(&id) {
            continue;
        }
        order.push(id);
    }
    order
}

pub(crate) fn assemble(unit: &TypeUnit<'_>) -> Result<Program> {
    let u = unit.universe;
    let options = unit.options;
    let ops = unit.code.ops();
    let Layout { labels, entry_points, points } = layout(ops, unit.code.label_count())?;

    let mut referenced = FxHashSet::default();
    for op in ops {
        if let Op::Push(v) | Op::Extern(v) | Op::JumpIndirect(v) | Op::Annotation(v) = op {
            referenced.insert(*v);
        }
    }

    let order = heap_order(unit, &referenced);
    let mut index: FxHashMap<VarId, u32> = FxHashMap::default();
    let mut names: FxHashSet<String> = FxHashSet::default();
    let mut heap = Vec::with_capacity(order.len());
    let mut deferred = 0u32;
    for id in order {
        let var = unit.vars.get(id);
        let host_type = host::type_ident(u, var.ty, options);
        let name = match &var.name {
            Some(name) => name.clone(),
            None => {
                deferred += 1;
                format!("__{}_{}_{}", deferred - 1, deferred_kind(var), host_type)
            }
        };
        if !names.insert(name.clone()) {
            return Err(CompileError::invariant(format!("heap slot `{}` declared twice", name)));
        }
        let value = match var.kind {
            VarKind::LabelAddress(label) => Value::Address(resolve(&labels, label)?),
            _ => var.value.clone().unwrap_or_else(|| host::default_value(u, var.ty)),
        };
        index.insert(id, heap.len() as u32);
        heap.push(HeapSlot { name, host_type, value, export: var.export, sync: var.sync });
    }

    let slot = |v: &VarId| {
        index
            .get(v)
            .copied()
            .ok_or_else(|| CompileError::invariant(format!("{:?} has no heap slot", v)))
    };
    let mut code = Vec::with_capacity(ops.len());
    for op in ops {
        let inst = match op {
            Op::Push(v) => Instruction::new(Opcode::Push, slot(v)?),
            Op::Pop => Instruction::bare(Opcode::Pop),
            Op::Copy => Instruction::bare(Opcode::Copy),
            Op::Nop => Instruction::bare(Opcode::Nop),
            Op::Extern(v) => Instruction::new(Opcode::Extern, slot(v)?),
            Op::Jump(label) => Instruction::new(Opcode::Jump, resolve(&labels, *label)?),
            Op::JumpIfFalse(label) => {
                Instruction::new(Opcode::JumpIfFalse, resolve(&labels, *label)?)
            }
            Op::JumpIndirect(v) => Instruction::new(Opcode::JumpIndirect, slot(v)?),
            Op::Annotation(v) => Instruction::new(Opcode::Annotation, slot(v)?),
            Op::Mark(_) | Op::Source { .. } | Op::Entry(_) => continue,
        };
        code.push(inst);
    }

    let debug_map = options.debug_map.then(|| {
        let mut map = DebugMap { methods: unit.method_names().to_vec(), points: Vec::new() };
        for (address, method, offset) in points {
            map.add(address, method, offset);
        }
        map.finalize();
        map
    });

    debug!(
        "assembled {}: {} instructions, {} heap slots, {} entry points",
        u.ty(unit.ty).name,
        code.len(),
        heap.len(),
        entry_points.len()
    );
    Ok(Program { heap, code, entry_points, debug_map })
}
