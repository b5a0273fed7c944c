//! Jumps, conditional branches, `switch` and `ret`.
//!
//! The host only has "jump if false", so a conditional branch computes the
//! negation of its condition and jumps when that is false.

use retarget_bytecode::{Instruction, Opcode, Operand};

use crate::context::MethodContext;
use crate::emit::InstructionSink;
use crate::error::{CompileError, Result};
use crate::host;
use crate::registry::{Claim, OperationBuilder};
use crate::variable::VarId;

use super::arith::compare_type;
use super::target_operand;

/// Unconditional transfer to `target`.
fn jump_to(ctx: &mut MethodContext<'_, '_>, target: u32) -> Result<()> {
    let label = ctx.branch_to(target, false)?;
    ctx.jump(label);
    Ok(())
}

pub struct Jump;

impl OperationBuilder for Jump {
    fn name(&self) -> &'static str {
        "br"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        jump_to(ctx, target_operand(inst)?)?;
        Ok(Claim::Claimed)
    }
}

/// `brtrue` / `brfalse`.
pub struct Test;

impl OperationBuilder for Test {
    fn name(&self) -> &'static str {
        "brtrue"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let target = target_operand(inst)?;
        let on_true = matches!(inst.opcode, Opcode::Brtrue | Opcode::BrtrueS);
        let value = ctx.pop_stack()?;
        let boolean = ctx.universe().builtins().boolean;
        let cond = ctx.convert(value, boolean)?;

        if let Some(v) = ctx.constant_value(cond) {
            let truthy = v.as_integer().map(|i| i != 0).unwrap_or(false);
            if truthy == on_true {
                jump_to(ctx, target)?;
            }
            return Ok(Claim::Claimed);
        }

        if on_true {
            let skip = ctx.new_label();
            ctx.jump_if_false(cond, skip)?;
            let label = ctx.branch_to(target, true)?;
            ctx.jump(label);
            ctx.apply_label(skip);
        } else {
            let label = ctx.branch_to(target, true)?;
            ctx.jump_if_false(cond, label)?;
        }
        Ok(Claim::Claimed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
}

impl Relation {
    fn of(op: Opcode) -> (Self, bool) {
        use Opcode::*;
        match op {
            Beq | BeqS => (Relation::Eq, false),
            BneUn | BneUnS => (Relation::Ne, true),
            Bge | BgeS => (Relation::Ge, false),
            BgeUn | BgeUnS => (Relation::Ge, true),
            Bgt | BgtS => (Relation::Gt, false),
            BgtUn | BgtUnS => (Relation::Gt, true),
            Ble | BleS => (Relation::Le, false),
            BleUn | BleUnS => (Relation::Le, true),
            Blt | BltS => (Relation::Lt, false),
            _ => (Relation::Lt, true),
        }
    }

    fn holds(self, ordering: std::cmp::Ordering) -> bool {
        match self {
            Relation::Eq => ordering.is_eq(),
            Relation::Ne => ordering.is_ne(),
            Relation::Ge => ordering.is_ge(),
            Relation::Gt => ordering.is_gt(),
            Relation::Le => ordering.is_le(),
            Relation::Lt => ordering.is_lt(),
        }
    }

    /// Host operator that is true exactly when the branch is not taken.
    fn negated_operator(self) -> &'static str {
        match self {
            Relation::Eq => "op_Inequality",
            Relation::Ne => "op_Equality",
            Relation::Ge => "op_LessThan",
            Relation::Gt => "op_LessThanOrEqual",
            Relation::Le => "op_GreaterThan",
            Relation::Lt => "op_GreaterThanOrEqual",
        }
    }
}

/// `beq`, `bne.un`, `bge`, `bgt`, `ble`, `blt` and unsigned forms.
pub struct CompareBranch;

impl OperationBuilder for CompareBranch {
    fn name(&self) -> &'static str {
        "compare-branch"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let target = target_operand(inst)?;
        let (relation, unsigned) = Relation::of(inst.opcode);
        let u = ctx.universe();
        let b = *u.builtins();
        let rhs = ctx.pop_stack()?;
        let lhs = ctx.pop_stack()?;
        let ty = compare_type(u, ctx.var_type(lhs), ctx.var_type(rhs), unsigned)?;

        let relation = if ty == b.object {
            match relation {
                Relation::Eq | Relation::Ne => relation,
                // `bgt.un x, null` tests for a non-null reference
                Relation::Gt if unsigned => Relation::Ne,
                _ => return Err(CompileError::unsupported("ordered comparison of references")),
            }
        } else {
            relation
        };
        let (lhs, rhs) = if ty == b.object {
            (lhs, rhs)
        } else {
            (ctx.convert(lhs, ty)?, ctx.convert(rhs, ty)?)
        };

        if let (Some(x), Some(y)) = (ctx.constant_value(lhs), ctx.constant_value(rhs)) {
            let ordering = match (x.as_integer(), y.as_integer()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => x.as_float().zip(y.as_float()).and_then(|(x, y)| x.partial_cmp(&y)),
            };
            if let Some(ordering) = ordering {
                if relation.holds(ordering) {
                    jump_to(ctx, target)?;
                }
                return Ok(Claim::Claimed);
            }
        }

        let ident = ctx.type_ident(ty);
        let signature = host::binary_operator(&ident, relation.negated_operator(), "SystemBoolean");
        let cond = ctx.extern_temp(&signature, &[lhs, rhs], b.boolean)?;
        let label = ctx.branch_to(target, true)?;
        ctx.jump_if_false(cond, label)?;
        Ok(Claim::Claimed)
    }
}

/// `switch`, lowered to a chain of equality tests.
pub struct SwitchTable;

impl OperationBuilder for SwitchTable {
    fn name(&self) -> &'static str {
        "switch"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let Operand::Switch(targets) = &inst.operand else {
            return Err(CompileError::invariant("`switch` without a target table"));
        };
        let int32 = ctx.universe().builtins().int32;
        let value = ctx.pop_stack()?;
        let value = ctx.convert(value, int32)?;

        if let Some(v) = ctx.constant_value(value).and_then(|v| v.as_integer()) {
            if let Some(&target) = usize::try_from(v).ok().and_then(|i| targets.get(i)) {
                jump_to(ctx, target)?;
            }
            return Ok(Claim::Claimed);
        }
        if targets.is_empty() {
            ctx.use_var(value)?;
            return Ok(Claim::Claimed);
        }

        ctx.allocate(value, targets.len() as u32 - 1)?;
        let boolean = ctx.universe().builtins().boolean;
        let signature = host::binary_operator("SystemInt32", "op_Inequality", "SystemBoolean");
        for (i, &target) in targets.iter().enumerate() {
            let case = ctx.int_constant(int32, i as i128)?;
            let differs: VarId = ctx.extern_temp(&signature, &[value, case], boolean)?;
            let label = ctx.branch_to(target, true)?;
            ctx.jump_if_false(differs, label)?;
        }
        Ok(Claim::Claimed)
    }
}

pub struct Return;

impl OperationBuilder for Return {
    fn name(&self) -> &'static str {
        "ret"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        if let Some(ret) = ctx.return_var() {
            let value = ctx.pop_stack()?;
            let value = ctx.convert(value, ctx.var_type(ret))?;
            ctx.copy(value, ret)?;
        }
        if ctx.stack_len() != 0 {
            return Err(CompileError::invariant(format!(
                "{} value(s) left on the stack at `ret`",
                ctx.stack_len()
            )));
        }
        // the epilogue follows the last instruction directly
        if ctx.peek_index().is_some() {
            let label = ctx.return_label();
            ctx.jump(label);
        }
        Ok(Claim::Claimed)
    }
}

pub struct Throw;

impl OperationBuilder for Throw {
    fn name(&self) -> &'static str {
        "throw"
    }

    fn build(&self, _: &mut MethodContext<'_, '_>, _: &Instruction) -> Result<Claim> {
        Err(CompileError::unsupported("exceptions cannot be raised on the host machine"))
    }
}
