//! Type driver: one behaviour type in, one host program out.

use std::rc::Rc;

use log::{debug, info};
use retarget_bytecode::{Instruction, InstructionReader, MethodKey, TypeKey, TypeKind, Universe};
use retarget_vm::Program;

use crate::assemble::assemble;
use crate::builders;
use crate::context::MethodContext;
use crate::ctor::{self, CtorPlan};
use crate::emit::{LabelId, Op};
use crate::error::{CompileError, Result};
use crate::options::CompilerOptions;
use crate::registry::Registry;
use crate::symbols::{Member, SymbolTable};
use crate::unit::TypeUnit;

pub struct Compiler {
    options: CompilerOptions,
    registry: Registry,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        let mut registry = Registry::new();
        builders::register_globals(&mut registry);
        Self { options, registry }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Extra builders registered here take part in every later compilation.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn compile_type(&mut self, universe: &Universe, ty: TypeKey) -> Result<Program> {
        let def = universe.ty(ty);
        if !universe.is_behaviour(ty) || def.kind == TypeKind::Interface {
            return Err(CompileError::unsupported(format!("{} is not a behaviour class", def.name)));
        }
        info!("compiling {}", def.name);
        let symbols = SymbolTable::build(universe, ty, &self.options)?;
        let result =
            builders::register_type_scoped(&mut self.registry, universe, &symbols, &self.options)
                .and_then(|()| compile_unit(&self.registry, universe, &self.options, ty, symbols));
        self.registry.unregister_type_scoped();
        result
    }

    /// Compile every behaviour class of the universe, in declaration order.
    pub fn compile_all(&mut self, universe: &Universe) -> Vec<(TypeKey, Result<Program>)> {
        let behaviours: Vec<TypeKey> = universe
            .types()
            .filter(|&(key, def)| {
                universe.is_user_type(key)
                    && universe.is_behaviour(key)
                    && def.kind == TypeKind::Class
            })
            .map(|(key, _)| key)
            .collect();
        behaviours.into_iter().map(|ty| (ty, self.compile_type(universe, ty))).collect()
    }
}

/// Constructor logic that survived folding.
struct CtorRemainder {
    method: MethodKey,
    insts: Rc<[Instruction]>,
    start: usize,
    label: LabelId,
}

fn compile_unit(
    registry: &Registry,
    universe: &Universe,
    options: &CompilerOptions,
    ty: TypeKey,
    symbols: SymbolTable,
) -> Result<Program> {
    let plan = ctor::evaluate(universe, &symbols, ty)?;
    let mut unit = TypeUnit::new(universe, options, ty, symbols);
    declare_fields(&mut unit, &plan)?;

    let mut remainder = match plan {
        CtorPlan { ctor: Some(method), insts: Some(insts), remainder: Some(start), .. } => {
            let label = unit.method_label(method);
            Some(CtorRemainder { method, insts, start, label })
        }
        _ => None,
    };
    let ctor_label = remainder.as_ref().map(|r| r.label);

    let entries: Vec<(String, MethodKey)> = unit
        .symbols
        .exported_methods()
        .filter_map(|s| {
            let target = unit.symbols.dispatch_target(universe, &s.emitted)?;
            Some((s.emitted.clone(), target))
        })
        .collect();
    let mut started = false;
    for (name, method) in &entries {
        unit.code.op(Op::Entry(name.clone()));
        let halt = unit.halt();
        unit.code.op(Op::Push(halt));
        if *name == options.start_event {
            started = true;
            if let Some(label) = ctor_label {
                emit_call(&mut unit, label);
            }
        }
        let label = unit.method_label(*method);
        unit.code.op(Op::Jump(label));
        unit.require(*method);
    }

    loop {
        while let Some(method) = unit.next_job() {
            translate_method(&mut unit, registry, method)?;
        }
        match remainder.take() {
            Some(r) => translate_remainder(&mut unit, registry, r)?,
            None => break,
        }
    }

    if let (false, Some(label)) = (started, ctor_label) {
        debug!("synthesizing {} for constructor logic", options.start_event);
        unit.code.op(Op::Entry(options.start_event.clone()));
        let halt = unit.halt();
        unit.code.op(Op::Push(halt));
        emit_call(&mut unit, label);
        emit_return(&mut unit);
    }

    unit.check_recursion()?;
    assemble(&unit)
}

/// Own fields and exported inherited fields get a slot whether or not the
/// code touches them; folded constructor stores give initial values.
fn declare_fields(unit: &mut TypeUnit<'_>, plan: &CtorPlan) -> Result<()> {
    let u = unit.universe;
    let mut fields: Vec<_> =
        u.ty(unit.ty).fields.iter().copied().filter(|&f| !u.field(f).is_static).collect();
    for symbol in unit.symbols.iter() {
        if let Member::Field(f) = symbol.member {
            if symbol.flags.export && !fields.contains(&f) {
                fields.push(f);
            }
        }
    }
    for &f in plan.initial.keys() {
        if !fields.contains(&f) {
            fields.push(f);
        }
    }
    for field in fields {
        unit.declare_field(field, plan.initial.get(&field).cloned())?;
    }
    Ok(())
}

/// Caller half of the call protocol: push the return address and jump.
fn emit_call(unit: &mut TypeUnit<'_>, callee: LabelId) {
    let after = unit.code.new_label();
    let address = unit.label_address(after);
    unit.code.op(Op::Push(address));
    unit.code.op(Op::Jump(callee));
    unit.code.op(Op::Mark(after));
}

/// Callee half: the return address is on the stack.
fn emit_return(unit: &mut TypeUnit<'_>) {
    let return_jump = unit.return_jump();
    unit.code.op(Op::Push(return_jump));
    unit.code.op(Op::Copy);
    unit.code.op(Op::JumpIndirect(return_jump));
}

fn read_body(universe: &Universe, method: MethodKey) -> Result<Rc<[Instruction]>> {
    let name = universe.method_display(method);
    let body = universe
        .method(method)
        .body
        .as_ref()
        .ok_or_else(|| CompileError::invariant(format!("{} has no body", name)))?;
    let insts = InstructionReader::read(&body.code, universe)
        .map_err(|e| CompileError::read(e).at(&name, None))?;
    Ok(insts.into())
}

fn translate_body(
    unit: &mut TypeUnit<'_>,
    registry: &Registry,
    method: MethodKey,
    insts: Rc<[Instruction]>,
    start: usize,
    label: LabelId,
) -> Result<()> {
    let name = unit.universe.method_display(method);
    debug!("translating {} from instruction {} of {}", name, start, insts.len());
    unit.code.op(Op::Mark(label));
    let return_label = {
        let mut ctx =
            MethodContext::new(unit, method, insts, start).map_err(|e| e.at(&name, None))?;
        ctx.translate(registry)?;
        ctx.return_label()
    };
    unit.code.op(Op::Mark(return_label));
    emit_return(unit);
    Ok(())
}

fn translate_method(unit: &mut TypeUnit<'_>, registry: &Registry, method: MethodKey) -> Result<()> {
    let insts = read_body(unit.universe, method)?;
    let label = unit.method_label(method);
    translate_body(unit, registry, method, insts, 0, label)
}

fn translate_remainder(
    unit: &mut TypeUnit<'_>,
    registry: &Registry,
    r: CtorRemainder,
) -> Result<()> {
    translate_body(unit, registry, r.method, r.insts, r.start, r.label)
}
