//! Instance and static field access.

use retarget_bytecode::{Instruction, Opcode};
use retarget_vm::Value;

use crate::context::MethodContext;
use crate::emit::InstructionSink;
use crate::error::{CompileError, Result};
use crate::host;
use crate::registry::{Claim, OperationBuilder};
use crate::symbols::Member;
use crate::variable::VarKind;

use super::field_operand;

/// Fields of the compiled type's chain, read through `this`: one heap slot
/// each.
pub struct OwnField;

impl OperationBuilder for OwnField {
    fn name(&self) -> &'static str {
        "own-field"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let field = field_operand(inst)?;
        if !ctx.unit().symbols.contains(Member::Field(field)) {
            return Ok(Claim::Declined);
        }
        let depth = usize::from(inst.opcode == Opcode::Stfld);
        if !ctx.is_this(ctx.peek_stack(depth)?) {
            return Ok(Claim::Declined);
        }

        let slot = ctx.field_var(field)?;
        match inst.opcode {
            Opcode::Stfld => {
                let value = ctx.pop_stack()?;
                ctx.pop_stack()?;
                let value = ctx.convert(value, ctx.var_type(slot))?;
                ctx.store(slot, value)?;
            }
            Opcode::Ldflda => {
                ctx.pop_stack()?;
                let address = ctx.address_of(slot);
                ctx.push_stack(address);
            }
            _ => {
                ctx.pop_stack()?;
                ctx.push_stack(slot);
            }
        }
        Ok(Claim::Claimed)
    }
}

/// Fields of another compiled behaviour, as its program variables.
pub struct RemoteField;

impl OperationBuilder for RemoteField {
    fn name(&self) -> &'static str {
        "remote-field"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let field = field_operand(inst)?;
        let u = ctx.universe();
        let f = u.field(field);
        if !u.is_behaviour(f.declaring) {
            return Ok(Claim::Declined);
        }
        let emitted = ctx.unit_mut().remote_symbols(f.declaring)?.field(u, field)?.emitted.clone();
        let string = u.builtins().string;
        let name = ctx.constant(Value::String(emitted), string);
        let remote = &ctx.options().remote;

        if inst.opcode == Opcode::Stfld {
            let value = ctx.pop_stack()?;
            let receiver = ctx.pop_stack()?;
            let value = ctx.convert(value, f.ty)?;
            ctx.extern_call(&remote.set_variable, &[receiver, name, value], None)?;
        } else {
            let receiver = ctx.pop_stack()?;
            ctx.extern_result(&remote.get_variable, &[receiver, name], f.ty)?;
        }
        Ok(Claim::Claimed)
    }
}

/// Fields of host types, through their getter and setter operations.
pub struct HostField;

impl OperationBuilder for HostField {
    fn name(&self) -> &'static str {
        "host-field"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let field = field_operand(inst)?;
        let u = ctx.universe();
        let f = u.field(field);
        if u.is_user_type(f.declaring) {
            return Err(CompileError::unsupported(format!(
                "field {} has no storage",
                u.field_display(field)
            )));
        }
        let options = ctx.options();

        match inst.opcode {
            Opcode::Ldfld => {
                let receiver = ctx.pop_stack()?;
                let receiver = ctx.load_indirect(receiver)?;
                ctx.extern_result(&host::field_getter(u, field, options), &[receiver], f.ty)?;
            }
            Opcode::Stfld => {
                let value = ctx.pop_stack()?;
                let receiver = ctx.pop_stack()?;
                let value = ctx.convert(value, f.ty)?;
                let setter = host::field_setter(u, field, options);
                match ctx.var(receiver).kind {
                    VarKind::Address(target) => ctx.extern_call(&setter, &[target, value], None)?,
                    // element of a value-type array: load, modify, store back
                    VarKind::Element { array, index } => {
                        ctx.allocate(array, 1)?;
                        ctx.allocate(index, 1)?;
                        let element = ctx.array_get(array, index)?;
                        ctx.allocate(element, 1)?;
                        ctx.extern_call(&setter, &[element, value], None)?;
                        ctx.array_set(array, index, element)?;
                    }
                    _ => ctx.extern_call(&setter, &[receiver, value], None)?,
                }
            }
            _ => {
                return Err(CompileError::unsupported(format!(
                    "address of host field {}",
                    u.field_display(field)
                )))
            }
        }
        Ok(Claim::Claimed)
    }
}

/// `ldsfld`/`stsfld`: literal constants fold, host statics use their
/// accessors, mutable user statics have no storage.
pub struct StaticField;

impl OperationBuilder for StaticField {
    fn name(&self) -> &'static str {
        "static-field"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let field = field_operand(inst)?;
        let u = ctx.universe();
        let f = u.field(field);
        if inst.opcode == Opcode::Ldsflda {
            return Err(CompileError::unsupported(format!(
                "address of static field {}",
                u.field_display(field)
            )));
        }

        if inst.opcode == Opcode::Ldsfld {
            let folded = f.constant.as_ref().and_then(|lit| host::literal_value(u, f.ty, lit));
            if let Some(value) = folded {
                let constant = ctx.constant(value, f.ty);
                ctx.push_stack(constant);
                return Ok(Claim::Claimed);
            }
        }
        if u.is_user_type(f.declaring) {
            return Err(CompileError::unsupported(format!(
                "static field {} is not a compile-time constant",
                u.field_display(field)
            )));
        }

        let options = ctx.options();
        if inst.opcode == Opcode::Stsfld {
            let value = ctx.pop_stack()?;
            let value = ctx.convert(value, f.ty)?;
            ctx.extern_call(&host::field_setter(u, field, options), &[value], None)?;
        } else {
            ctx.extern_result(&host::field_getter(u, field, options), &[], f.ty)?;
        }
        Ok(Claim::Claimed)
    }
}
