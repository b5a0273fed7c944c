//! Loads, stores and constants.

use retarget_bytecode::{Instruction, Opcode, Operand};
use retarget_vm::Value;

use crate::context::MethodContext;
use crate::error::{CompileError, Result};
use crate::registry::{Claim, OperationBuilder};
use crate::variable::VarKind;

use super::index_operand;

pub struct NoOp;

impl OperationBuilder for NoOp {
    fn name(&self) -> &'static str {
        "no-op"
    }

    fn build(&self, _: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        Ok(Claim::Claimed)
    }
}

pub struct LoadArg;

impl OperationBuilder for LoadArg {
    fn name(&self) -> &'static str {
        "ldarg"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let n = index_operand(inst)?;
        let arg = ctx.arg(n)?;
        let m = ctx.universe().method(ctx.method());
        let param = usize::from(n).checked_sub(usize::from(!m.is_static));
        // by-ref parameters are copied in and out, so loading one yields its address
        if param.and_then(|p| m.params.get(p)).is_some_and(|p| p.by_ref) {
            let addr = ctx.address_of(arg);
            ctx.push_stack(addr);
        } else {
            ctx.push_stack(arg);
        }
        Ok(Claim::Claimed)
    }
}

pub struct StoreArg;

impl OperationBuilder for StoreArg {
    fn name(&self) -> &'static str {
        "starg"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let slot = ctx.arg(index_operand(inst)?)?;
        if ctx.is_this(slot) {
            return Err(CompileError::unsupported("assignment to `this`"));
        }
        let value = ctx.pop_stack()?;
        let value = ctx.convert(value, ctx.var_type(slot))?;
        ctx.store(slot, value)?;
        Ok(Claim::Claimed)
    }
}

pub struct LoadLocal;

impl OperationBuilder for LoadLocal {
    fn name(&self) -> &'static str {
        "ldloc"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let local = ctx.local(index_operand(inst)?)?;
        ctx.push_stack(local);
        Ok(Claim::Claimed)
    }
}

pub struct StoreLocal;

impl OperationBuilder for StoreLocal {
    fn name(&self) -> &'static str {
        "stloc"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let slot = ctx.local(index_operand(inst)?)?;
        let value = ctx.pop_stack()?;
        let value = ctx.convert(value, ctx.var_type(slot))?;
        ctx.store(slot, value)?;
        Ok(Claim::Claimed)
    }
}

pub struct LoadAddress;

impl OperationBuilder for LoadAddress {
    fn name(&self) -> &'static str {
        "ldloca"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let n = index_operand(inst)?;
        let slot = match inst.opcode {
            Opcode::LdargaS | Opcode::Ldarga => ctx.arg(n)?,
            _ => ctx.local(n)?,
        };
        let addr = ctx.address_of(slot);
        ctx.push_stack(addr);
        Ok(Claim::Claimed)
    }
}

pub struct LoadConstant;

impl OperationBuilder for LoadConstant {
    fn name(&self) -> &'static str {
        "ldc"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let b = *ctx.universe().builtins();
        let (value, ty) = match (&inst.operand, inst.opcode) {
            (_, Opcode::Ldnull) => (Value::Null, b.object),
            (Operand::Int32(v), _) => (Value::Int32(*v), b.int32),
            (Operand::Int64(v), _) => (Value::Int64(*v), b.int64),
            (Operand::Float32(v), _) => (Value::Single(*v), b.float32),
            (Operand::Float64(v), _) => (Value::Double(*v), b.float64),
            (Operand::String(s), _) => (Value::String(s.clone()), b.string),
            _ => return Ok(Claim::Declined),
        };
        let constant = ctx.constant(value, ty);
        ctx.push_stack(constant);
        Ok(Claim::Claimed)
    }
}

pub struct Duplicate;

impl OperationBuilder for Duplicate {
    fn name(&self) -> &'static str {
        "dup"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        let top = ctx.peek_stack(0)?;
        match ctx.var(top).kind {
            VarKind::Element { array, index } => {
                ctx.allocate(array, 1)?;
                ctx.allocate(index, 1)?;
            }
            _ => ctx.allocate(top, 1)?,
        }
        ctx.push_stack(top);
        Ok(Claim::Claimed)
    }
}

pub struct Discard;

impl OperationBuilder for Discard {
    fn name(&self) -> &'static str {
        "pop"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        let value = ctx.pop_stack()?;
        ctx.discard(value)?;
        Ok(Claim::Claimed)
    }
}
