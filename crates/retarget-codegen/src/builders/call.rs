//! `call`, `callvirt` and `newobj`.
//!
//! Three targets, tried in priority order: bodies of the compiled type
//! (jump with a return address), other compiled behaviours (host variable
//! and event operations), and host operations (one extern each).

use retarget_bytecode::{Instruction, MethodKey, Opcode, TypeKind};
use retarget_vm::Value;

use crate::context::MethodContext;
use crate::emit::InstructionSink;
use crate::error::{CompileError, Result};
use crate::host;
use crate::registry::{Claim, OperationBuilder};
use crate::symbols::Member;
use crate::variable::{VarId, VarKind};

use super::method_operand;

const BY_REF_SOURCE: &str = "by-ref argument that is not a local or field";

/// Value a receiver or argument stands for, dereferencing addresses.
fn value_of(ctx: &mut MethodContext<'_, '_>, var: VarId) -> Result<VarId> {
    ctx.load_indirect(var)
}

/// Host method, property accessor or constructor.
pub struct HostCall;

impl OperationBuilder for HostCall {
    fn name(&self) -> &'static str {
        "host-call"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let method = method_operand(inst)?;
        let u = ctx.universe();
        let m = u.method(method);
        if u.is_user_type(m.declaring) {
            return Err(CompileError::unsupported(format!("call to {}", u.method_display(method))));
        }

        let args = ctx.pop_multiple(m.params.len())?;
        let newobj = inst.opcode == Opcode::Newobj;
        let receiver = if m.is_static || newobj { None } else { Some(ctx.pop_stack()?) };

        // base constructor of a compiled behaviour
        if m.is_ctor() && receiver.is_some_and(|r| ctx.is_this(r)) {
            for arg in args {
                ctx.discard(arg)?;
            }
            return Ok(Claim::Claimed);
        }

        let mut inputs = Vec::with_capacity(args.len() + 1);
        if let Some(r) = receiver.filter(|_| !m.is_ctor()) {
            inputs.push(value_of(ctx, r)?);
        }
        for (arg, p) in args.into_iter().zip(&m.params) {
            let input = if p.by_ref {
                match ctx.var(arg).kind {
                    VarKind::Address(target) => {
                        ctx.snapshot(|v| v == target)?;
                        target
                    }
                    _ => return Err(CompileError::unsupported(BY_REF_SOURCE)),
                }
            } else if matches!(u.kind(p.ty), TypeKind::Object | TypeKind::GenericParam { .. }) {
                value_of(ctx, arg)?
            } else {
                ctx.convert(arg, p.ty)?
            };
            inputs.push(input);
        }

        let signature = host::method_signature(u, method, ctx.options());
        if m.is_ctor() {
            match receiver.map(|r| ctx.var(r).kind) {
                // `ldloca; ...; call .ctor` initialises a value type in place
                Some(VarKind::Address(target)) => {
                    ctx.snapshot(|v| v == target)?;
                    ctx.extern_call(&signature, &inputs, Some(target))?;
                }
                Some(VarKind::Element { array, index }) => {
                    let value = ctx.extern_temp(&signature, &inputs, m.declaring)?;
                    ctx.array_set(array, index, value)?;
                }
                Some(_) => return Err(CompileError::unsupported("constructor call on a value")),
                None => ctx.extern_result(&signature, &inputs, m.declaring)?,
            }
        } else if u.kind(m.ret) == TypeKind::Void {
            ctx.extern_call(&signature, &inputs, None)?;
        } else {
            ctx.extern_result(&signature, &inputs, m.ret)?;
        }
        Ok(Claim::Claimed)
    }
}

/// Body of the compiled type or one of its ancestors.
pub struct SelfCall;

impl SelfCall {
    fn applies(ctx: &MethodContext<'_, '_>, method: MethodKey, opcode: Opcode) -> Result<bool> {
        let u = ctx.universe();
        let m = u.method(method);
        if opcode == Opcode::Newobj || !ctx.unit().symbols.contains(Member::Method(method)) {
            return Ok(false);
        }
        if m.is_static {
            return Ok(true);
        }
        let receiver = ctx.peek_stack(m.params.len())?;
        Ok(ctx.is_this(receiver))
    }
}

impl OperationBuilder for SelfCall {
    fn name(&self) -> &'static str {
        "self-call"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let method = method_operand(inst)?;
        let u = ctx.universe();
        let m = u.method(method);
        if m.is_ctor() && inst.opcode == Opcode::Call && u.is_user_type(m.declaring) {
            return Err(CompileError::unsupported(format!(
                "constructor chaining into {} outside the leading field initialisers",
                u.method_display(method)
            )));
        }
        if !Self::applies(ctx, method, inst.opcode)? {
            return Ok(Claim::Declined);
        }

        let symbol = ctx.unit().symbols.method(u, method)?;
        let (emitted, params, ret) =
            (symbol.emitted.clone(), symbol.params.clone(), symbol.ret.clone());
        let dispatch = inst.opcode == Opcode::Callvirt || m.body.is_none();
        let target = if dispatch {
            ctx.unit().symbols.dispatch_target(u, &emitted)
        } else {
            Some(method)
        };
        let target = target.ok_or_else(|| {
            CompileError::unsupported(format!("{} has no implementation", u.method_display(method)))
        })?;

        let caller = ctx.method();
        ctx.unit_mut().record_call(caller, target);
        if target == caller {
            let what = format!("recursive call to {}", u.method_display(target));
            return Err(CompileError::unsupported(what));
        }

        let mut args = ctx.pop_multiple(m.params.len())?;
        if !m.is_static {
            ctx.pop_stack()?;
        }

        let slots: Vec<VarId> = m
            .params
            .iter()
            .zip(&params)
            .map(|(p, name)| ctx.unit_mut().param_var(name, p.ty))
            .collect();
        // an argument read from a parameter slot written before it
        for i in 0..args.len() {
            if !m.params[i].by_ref && slots[..i].contains(&args[i]) {
                let copy = ctx.get_temp(ctx.var_type(args[i]));
                ctx.copy(args[i], copy)?;
                args[i] = copy;
            }
        }

        let mut copy_back = Vec::new();
        for ((arg, p), slot) in args.into_iter().zip(&m.params).zip(slots) {
            if p.by_ref {
                let source = match ctx.var(arg).kind {
                    VarKind::Address(target) => target,
                    _ => return Err(CompileError::unsupported(BY_REF_SOURCE)),
                };
                ctx.store(slot, source)?;
                copy_back.push((slot, source));
            } else {
                let value = ctx.convert(arg, p.ty)?;
                ctx.store(slot, value)?;
            }
        }
        ctx.snapshot_fields()?;

        let callee = ctx.unit_mut().method_label(target);
        ctx.unit_mut().require(target);
        let after = ctx.new_label();
        let address = ctx.unit_mut().label_address(after);
        ctx.push(address)?;
        ctx.jump(callee);
        ctx.apply_label(after);

        for (slot, source) in copy_back {
            ctx.store(source, slot)?;
        }
        if let Some(ret) = ret {
            let ret = ctx.unit_mut().return_var(&ret, m.ret);
            let out = ctx.out_var(m.ret)?;
            ctx.copy(ret, out.var)?;
            ctx.complete(out);
        }
        Ok(Claim::Claimed)
    }
}

/// Method of another compiled behaviour, through its program variables.
pub struct RemoteCall;

impl OperationBuilder for RemoteCall {
    fn name(&self) -> &'static str {
        "remote-call"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let method = method_operand(inst)?;
        let u = ctx.universe();
        let m = u.method(method);
        if !u.is_behaviour(m.declaring) {
            return Ok(Claim::Declined);
        }
        if inst.opcode == Opcode::Newobj || m.is_ctor() {
            return Err(CompileError::unsupported(format!(
                "compiled behaviours cannot be constructed ({})",
                u.method_display(method)
            )));
        }
        if m.is_static {
            return Err(CompileError::unsupported(format!(
                "static method {} of another behaviour",
                u.method_display(method)
            )));
        }
        if m.params.iter().any(|p| p.by_ref) {
            return Err(CompileError::unsupported(format!(
                "by-ref parameters across behaviours ({})",
                u.method_display(method)
            )));
        }

        let remote = ctx.unit_mut().remote_symbols(m.declaring)?;
        let symbol = remote.method(u, method)?;
        let (emitted, params, ret) =
            (symbol.emitted.clone(), symbol.params.clone(), symbol.ret.clone());

        let args = ctx.pop_multiple(m.params.len())?;
        let receiver = ctx.pop_stack()?;
        let uses = args.len() as u32 + u32::from(ret.is_some());
        ctx.allocate(receiver, uses)?;

        let string = u.builtins().string;
        let remote_ops = &ctx.options().remote;
        for ((arg, p), name) in args.into_iter().zip(&m.params).zip(&params) {
            let value = ctx.convert(arg, p.ty)?;
            let name = ctx.constant(Value::String(name.clone()), string);
            ctx.extern_call(&remote_ops.set_variable, &[receiver, name, value], None)?;
        }
        let event = ctx.constant(Value::String(emitted), string);
        ctx.extern_call(&remote_ops.send_event, &[receiver, event], None)?;
        if let Some(ret) = ret {
            let name = ctx.constant(Value::String(ret), string);
            ctx.extern_result(&remote_ops.get_variable, &[receiver, name], m.ret)?;
        }
        Ok(Claim::Claimed)
    }
}

/// `constrained.` only adjusts how the following `callvirt` boxes its
/// receiver, which addresses already cover.
pub struct ConstrainedPrefix;

impl OperationBuilder for ConstrainedPrefix {
    fn name(&self) -> &'static str {
        "constrained"
    }

    fn build(&self, _: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        Ok(Claim::Claimed)
    }
}
