//! `Nullable<T>` on the host: a boxed `T` or null in an object slot.

use retarget_bytecode::{Instruction, Opcode};
use retarget_vm::Value;

use crate::context::MethodContext;
use crate::emit::InstructionSink;
use crate::error::{CompileError, Result};
use crate::host;
use crate::registry::{Claim, OperationBuilder};
use crate::variable::VarId;

use super::method_operand;

pub struct NullableOps;

impl NullableOps {
    fn has_value(ctx: &mut MethodContext<'_, '_>, value: VarId) -> Result<VarId> {
        let b = *ctx.universe().builtins();
        let null = ctx.constant(Value::Null, b.object);
        let signature = host::binary_operator("SystemObject", "op_Inequality", "SystemBoolean");
        ctx.extern_temp(&signature, &[value, null], b.boolean)
    }
}

impl OperationBuilder for NullableOps {
    fn name(&self) -> &'static str {
        "nullable"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let method = method_operand(inst)?;
        let u = ctx.universe();
        let m = u.method(method);
        let Some(inner) = u.nullable_inner(m.declaring) else {
            return Ok(Claim::Declined);
        };
        let nullable = m.declaring;

        if m.is_ctor() {
            let value = ctx.pop_stack()?;
            let value = ctx.convert(value, inner)?;
            if inst.opcode == Opcode::Newobj {
                let out = ctx.out_var(nullable)?;
                ctx.copy(value, out.var)?;
                ctx.complete(out);
            } else {
                let address = ctx.pop_stack()?;
                ctx.store_indirect(address, value)?;
            }
            return Ok(Claim::Claimed);
        }

        match (m.name.as_str(), m.params.len()) {
            ("get_HasValue", 0) => {
                let receiver = ctx.pop_stack()?;
                let value = ctx.load_indirect(receiver)?;
                let b = *u.builtins();
                let null = ctx.constant(Value::Null, b.object);
                let signature =
                    host::binary_operator("SystemObject", "op_Inequality", "SystemBoolean");
                ctx.extern_result(&signature, &[value, null], b.boolean)?;
            }
            ("get_Value", 0) => {
                let receiver = ctx.pop_stack()?;
                let value = ctx.load_indirect(receiver)?;
                let out = ctx.out_var(inner)?;
                ctx.copy(value, out.var)?;
                ctx.complete(out);
            }
            ("GetValueOrDefault", n @ (0 | 1)) => {
                let fallback = if n == 1 {
                    let arg = ctx.pop_stack()?;
                    ctx.convert(arg, inner)?
                } else {
                    ctx.constant(host::default_value(u, inner), inner)
                };
                let receiver = ctx.pop_stack()?;
                let value = ctx.load_indirect(receiver)?;
                ctx.allocate(value, 1)?;
                let out = ctx.get_temp(inner);
                ctx.copy(fallback, out)?;
                let present = Self::has_value(ctx, value)?;
                let skip = ctx.new_label();
                ctx.jump_if_false(present, skip)?;
                ctx.copy(value, out)?;
                ctx.apply_label(skip);
                ctx.push_stack(out);
            }
            _ => {
                return Err(CompileError::unsupported(format!(
                    "{} on a nullable value",
                    u.method_display(method)
                )))
            }
        }
        Ok(Claim::Claimed)
    }
}
