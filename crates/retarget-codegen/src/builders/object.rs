//! Boxing, casts, arrays, indirect access and `initobj`.

use retarget_bytecode::{Instruction, Opcode, TypeKey, TypeKind};
use retarget_vm::Value;

use crate::context::MethodContext;
use crate::emit::InstructionSink;
use crate::error::{CompileError, Result};
use crate::host;
use crate::registry::{Claim, OperationBuilder};
use crate::variable::VarId;

use super::type_operand;

const IS_INSTANCE: &str = "SystemType.__IsInstanceOfType__SystemObject__SystemBoolean";
const CREATE_INSTANCE: &str = "SystemActivator.__CreateInstance__SystemType__SystemObject";

fn type_constant(ctx: &mut MethodContext<'_, '_>, ty: TypeKey) -> VarId {
    let u = ctx.universe();
    let def = u.ty(ty);
    let name = def.host_name.clone().unwrap_or_else(|| def.name.clone());
    ctx.constant(Value::Type(name), u.builtins().system_type)
}

/// `box`, `unbox`, `unbox.any`, `castclass`, `isinst`.
///
/// The host stores every value boxed, so boxing and unboxing are
/// conversions and casts only need a check when the result is observed.
pub struct Casts;

impl Casts {
    fn isinst(ctx: &mut MethodContext<'_, '_>, value: VarId, ty: TypeKey) -> Result<()> {
        let u = ctx.universe();
        if u.is_assignable_to(ctx.var_type(value), ty) {
            ctx.push_stack(value);
            return Ok(());
        }
        if u.is_user_type(ty) {
            return Err(CompileError::unsupported(format!("type test against {}", u.ty(ty).name)));
        }
        let type_const = type_constant(ctx, ty);
        let null = ctx.constant(Value::Null, u.builtins().object);
        let out = ctx.get_temp(ty);
        ctx.allocate(value, 1)?;
        ctx.copy(null, out)?;
        let matches = ctx.extern_temp(IS_INSTANCE, &[type_const, value], u.builtins().boolean)?;
        let skip = ctx.new_label();
        ctx.jump_if_false(matches, skip)?;
        ctx.copy(value, out)?;
        ctx.apply_label(skip);
        ctx.push_stack(out);
        Ok(())
    }
}

impl OperationBuilder for Casts {
    fn name(&self) -> &'static str {
        "cast"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let ty = type_operand(inst)?;
        let value = ctx.pop_stack()?;
        if inst.opcode == Opcode::Isinst {
            Self::isinst(ctx, value, ty)?;
            return Ok(Claim::Claimed);
        }
        let out = ctx.convert(value, ty)?;
        ctx.push_stack(out);
        Ok(Claim::Claimed)
    }
}

/// `newarr`, `ldlen`.
pub struct Arrays;

impl OperationBuilder for Arrays {
    fn name(&self) -> &'static str {
        "array"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let u = ctx.universe();
        let int32 = u.builtins().int32;
        if inst.opcode == Opcode::Ldlen {
            let array = ctx.pop_stack()?;
            let owner = ctx.type_ident(ctx.var_type(array));
            let signature = host::signature(&owner, "get_Length", &[], "SystemInt32");
            ctx.extern_result(&signature, &[array], int32)?;
            return Ok(Claim::Claimed);
        }

        let elem = type_operand(inst)?;
        let array_ty = u
            .find_array(elem)
            .ok_or_else(|| {
                CompileError::unsupported(format!("no array type of {}", u.ty(elem).name))
            })?;
        let length = ctx.pop_stack()?;
        let length = ctx.convert(length, int32)?;
        let ident = ctx.type_ident(array_ty);
        let signature = host::signature(&ident, "ctor", &["SystemInt32".to_string()], &ident);
        ctx.extern_result(&signature, &[length], array_ty)?;
        Ok(Claim::Claimed)
    }
}

/// Pop `array, index` with the index as `int`.
fn element_operands(ctx: &mut MethodContext<'_, '_>) -> Result<(VarId, VarId)> {
    let int32 = ctx.universe().builtins().int32;
    let index = ctx.pop_stack()?;
    let array = ctx.pop_stack()?;
    let index = ctx.convert(index, int32)?;
    Ok((array, index))
}

pub struct LoadElement;

impl OperationBuilder for LoadElement {
    fn name(&self) -> &'static str {
        "ldelem"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        let (array, index) = element_operands(ctx)?;
        let (signature, elem) = ctx.array_getter(array)?;
        ctx.extern_result(&signature, &[array, index], elem)?;
        Ok(Claim::Claimed)
    }
}

pub struct StoreElement;

impl OperationBuilder for StoreElement {
    fn name(&self) -> &'static str {
        "stelem"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        let value = ctx.pop_stack()?;
        let (array, index) = element_operands(ctx)?;
        ctx.array_set(array, index, value)?;
        Ok(Claim::Claimed)
    }
}

pub struct ElementAddress;

impl OperationBuilder for ElementAddress {
    fn name(&self) -> &'static str {
        "ldelema"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let elem = type_operand(inst)?;
        let (array, index) = element_operands(ctx)?;
        let address = ctx.element_address(array, index, elem);
        ctx.push_stack(address);
        Ok(Claim::Claimed)
    }
}

/// `ldobj`, `ldind.*`.
pub struct LoadIndirect;

impl OperationBuilder for LoadIndirect {
    fn name(&self) -> &'static str {
        "ldind"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        let address = ctx.pop_stack()?;
        let value = ctx.load_indirect(address)?;
        ctx.push_stack(value);
        Ok(Claim::Claimed)
    }
}

/// `stobj`, `stind.*`.
pub struct StoreIndirect;

impl OperationBuilder for StoreIndirect {
    fn name(&self) -> &'static str {
        "stind"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        let value = ctx.pop_stack()?;
        let address = ctx.pop_stack()?;
        ctx.store_indirect(address, value)?;
        Ok(Claim::Claimed)
    }
}

/// `initobj`: reset a value type to its default.
pub struct InitObject;

impl OperationBuilder for InitObject {
    fn name(&self) -> &'static str {
        "initobj"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let ty = type_operand(inst)?;
        let u = ctx.universe();
        let address = ctx.pop_stack()?;
        if !ctx.var(address).is_address() {
            return Err(CompileError::invariant("`initobj` without an address"));
        }

        let value = if u.kind(ty) == TypeKind::Struct {
            if u.is_user_type(ty) {
                return Err(CompileError::unsupported(format!("user value type {}", u.ty(ty).name)));
            }
            let type_const = type_constant(ctx, ty);
            ctx.extern_temp(CREATE_INSTANCE, &[type_const], ty)?
        } else {
            let default = host::default_value(u, ty);
            ctx.constant(default, ty)
        };
        ctx.store_indirect(address, value)?;
        Ok(Claim::Claimed)
    }
}
