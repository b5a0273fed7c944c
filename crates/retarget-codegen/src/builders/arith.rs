//! Arithmetic, bitwise, conversion and comparison operators.
//!
//! Operands are promoted the way the evaluation stack sees them: integers
//! narrower than 32 bits widen to 32, mixed widths widen to the larger,
//! and `.un` opcodes select the unsigned variant.

use retarget_bytecode::{Builtins, Instruction, Opcode, Operand, TypeKey, TypeKind, Universe};
use retarget_vm::Value;

use crate::context::MethodContext;
use crate::convert::IntShape;
use crate::error::{CompileError, Result};
use crate::host;
use crate::registry::{Claim, OperationBuilder};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(IntShape),
    Float(u32),
    Bool,
}

fn num(universe: &Universe, ty: TypeKey) -> Option<Num> {
    let ty = universe.enum_underlying(ty).unwrap_or(ty);
    match universe.kind(ty) {
        TypeKind::Boolean => Some(Num::Bool),
        TypeKind::Float32 => Some(Num::Float(32)),
        TypeKind::Float64 => Some(Num::Float(64)),
        _ => IntShape::of(universe, ty).map(Num::Int),
    }
}

pub(crate) fn int_type(b: &Builtins, shape: IntShape) -> TypeKey {
    match (shape.bits, shape.signed) {
        (8, true) => b.int8,
        (8, false) => b.uint8,
        (16, true) => b.int16,
        (16, false) => b.uint16,
        (32, true) => b.int32,
        (32, false) => b.uint32,
        (_, true) => b.int64,
        (_, false) => b.uint64,
    }
}

fn promote(shape: IntShape) -> IntShape {
    IntShape::new(shape.bits.max(32), shape.signed)
}

/// Operand type of a binary operator on `a` and `b`.
pub fn binary_type(universe: &Universe, a: TypeKey, b: TypeKey, unsigned: bool) -> Result<TypeKey> {
    let builtins = universe.builtins();
    let as_int = |n: Num| match n {
        Num::Bool => Some(IntShape::new(32, true)),
        Num::Int(shape) => Some(shape),
        Num::Float(_) => None,
    };
    let (Some(x), Some(y)) = (num(universe, a), num(universe, b)) else {
        return Err(CompileError::unsupported(format!(
            "arithmetic on {} and {}",
            universe.ty(a).name,
            universe.ty(b).name
        )));
    };
    Ok(match (x, y) {
        (Num::Bool, Num::Bool) => builtins.boolean,
        (Num::Float(32), Num::Float(32)) => builtins.float32,
        (Num::Float(_), Num::Float(_)) => builtins.float64,
        (Num::Float(bits), _) | (_, Num::Float(bits)) => {
            if bits == 32 {
                builtins.float32
            } else {
                builtins.float64
            }
        }
        _ => {
            let (Some(x), Some(y)) = (as_int(x), as_int(y)) else {
                return Err(CompileError::invariant("integer promotion of a float"));
            };
            let bits = x.bits.max(y.bits).max(32);
            let signed = !(unsigned || (!x.signed && !y.signed));
            int_type(builtins, IntShape::new(bits, signed))
        }
    })
}

/// Operand type of a comparison; references compare as objects.
pub fn compare_type(
    universe: &Universe,
    a: TypeKey,
    b: TypeKey,
    unsigned: bool,
) -> Result<TypeKey> {
    if universe.is_reference(a) || universe.is_reference(b) {
        return Ok(universe.builtins().object);
    }
    binary_type(universe, a, b, unsigned)
}

fn operator(op: Opcode) -> &'static str {
    match op {
        Opcode::Add => "op_Addition",
        Opcode::Sub => "op_Subtraction",
        Opcode::Mul => "op_Multiplication",
        Opcode::Div | Opcode::DivUn => "op_Division",
        Opcode::Rem | Opcode::RemUn => "op_Modulus",
        Opcode::And => "op_LogicalAnd",
        Opcode::Or => "op_LogicalOr",
        Opcode::Xor => "op_LogicalXor",
        Opcode::Shl => "op_LeftShift",
        _ => "op_RightShift",
    }
}

fn fold_binary(
    universe: &Universe,
    op: Opcode,
    ty: TypeKey,
    a: &Value,
    b: &Value,
) -> Option<Value> {
    if let Some(shape) = IntShape::of(universe, ty) {
        let (x, y) = (shape.wrap(a.as_integer()?), b.as_integer()?);
        let shift = (y & i128::from(shape.bits - 1)) as u32;
        let y = shape.wrap(y);
        let r = match op {
            Opcode::Add => x.wrapping_add(y),
            Opcode::Sub => x.wrapping_sub(y),
            Opcode::Mul => x.wrapping_mul(y),
            Opcode::Div | Opcode::DivUn => x.checked_div(y)?,
            Opcode::Rem | Opcode::RemUn => x.checked_rem(y)?,
            Opcode::And => x & y,
            Opcode::Or => x | y,
            Opcode::Xor => x ^ y,
            Opcode::Shl => x << shift,
            _ => x >> shift,
        };
        return host::integer_value(universe, ty, shape.wrap(r));
    }
    match universe.kind(ty) {
        TypeKind::Boolean => {
            let (x, y) = (a.as_integer()? != 0, b.as_integer()? != 0);
            let r = match op {
                Opcode::And => x & y,
                Opcode::Or => x | y,
                Opcode::Xor => x ^ y,
                _ => return None,
            };
            Some(Value::Bool(r))
        }
        kind @ (TypeKind::Float32 | TypeKind::Float64) => {
            let x = a.as_float().or_else(|| a.as_integer().map(|v| v as f64))?;
            let y = b.as_float().or_else(|| b.as_integer().map(|v| v as f64))?;
            let r = match op {
                Opcode::Add => x + y,
                Opcode::Sub => x - y,
                Opcode::Mul => x * y,
                Opcode::Div => x / y,
                Opcode::Rem => x % y,
                _ => return None,
            };
            Some(if kind == TypeKind::Float32 { Value::Single(r as f32) } else { Value::Double(r) })
        }
        _ => None,
    }
}

pub struct Binary;

impl OperationBuilder for Binary {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let op = inst.opcode;
        let u = ctx.universe();
        let b = *u.builtins();
        let rhs = ctx.pop_stack()?;
        let lhs = ctx.pop_stack()?;
        let (lt, rt) = (ctx.var_type(lhs), ctx.var_type(rhs));
        let shift = matches!(op, Opcode::Shl | Opcode::Shr | Opcode::ShrUn);
        let unsigned = matches!(op, Opcode::DivUn | Opcode::RemUn | Opcode::ShrUn);

        let mut ty = if shift {
            match num(u, lt) {
                Some(Num::Int(shape)) => {
                    let shape = promote(shape);
                    int_type(&b, IntShape::new(shape.bits, shape.signed && !unsigned))
                }
                _ => return Err(CompileError::unsupported(format!("shift of {}", u.ty(lt).name))),
            }
        } else {
            binary_type(u, lt, rt, unsigned)?
        };
        if ty == b.boolean && !matches!(op, Opcode::And | Opcode::Or | Opcode::Xor) {
            ty = b.int32;
        }
        let rhs_ty = if shift { b.int32 } else { ty };
        let lhs = ctx.convert(lhs, ty)?;
        let rhs = ctx.convert(rhs, rhs_ty)?;

        if let (Some(x), Some(y)) = (ctx.constant_value(lhs), ctx.constant_value(rhs)) {
            if let Some(folded) = fold_binary(u, op, ty, x, y) {
                let constant = ctx.constant(folded, ty);
                ctx.push_stack(constant);
                return Ok(Claim::Claimed);
            }
        }

        let ident = ctx.type_ident(ty);
        let params = [ident.clone(), ctx.type_ident(rhs_ty)];
        let signature = host::signature(&ident, operator(op), &params, &ident);
        ctx.extern_result(&signature, &[lhs, rhs], ty)?;
        Ok(Claim::Claimed)
    }
}

pub struct Unary;

impl OperationBuilder for Unary {
    fn name(&self) -> &'static str {
        "unary"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let u = ctx.universe();
        let b = *u.builtins();
        let value = ctx.pop_stack()?;
        let from = ctx.var_type(value);
        let negate = inst.opcode == Opcode::Neg;
        let ty = match num(u, from) {
            Some(Num::Bool) if !negate => b.boolean,
            Some(Num::Bool) => b.int32,
            Some(Num::Float(_)) if negate => from,
            Some(Num::Int(shape)) => {
                let shape = promote(shape);
                int_type(&b, IntShape::new(shape.bits, shape.signed || negate))
            }
            _ => {
                let what = format!("`{}` on {}", inst.opcode, u.ty(from).name);
                return Err(CompileError::unsupported(what));
            }
        };
        let value = ctx.convert(value, ty)?;
        let ident = ctx.type_ident(ty);

        if ty == b.boolean {
            let signature = host::signature(&ident, "op_UnaryNegation", &[ident.clone()], &ident);
            ctx.extern_result(&signature, &[value], ty)?;
            return Ok(Claim::Claimed);
        }
        if let Some(v) = ctx.constant_value(value).cloned() {
            let folded = match (IntShape::of(u, ty), v.as_integer(), v.as_float()) {
                (Some(shape), Some(x), _) if negate => host::integer_value(u, ty, shape.wrap(-x)),
                (Some(shape), Some(x), _) => host::integer_value(u, ty, shape.wrap(!x)),
                (None, _, Some(f)) if ty == b.float32 => Some(Value::Single(-f as f32)),
                (None, _, Some(f)) => Some(Value::Double(-f)),
                _ => None,
            };
            if let Some(folded) = folded {
                let constant = ctx.constant(folded, ty);
                ctx.push_stack(constant);
                return Ok(Claim::Claimed);
            }
        }
        if negate {
            let signature = host::signature(&ident, "op_UnaryMinus", &[ident.clone()], &ident);
            ctx.extern_result(&signature, &[value], ty)?;
        } else {
            let ones = ctx.int_constant(ty, -1)?;
            let signature = host::binary_operator(&ident, "op_LogicalXor", &ident);
            ctx.extern_result(&signature, &[value, ones], ty)?;
        }
        Ok(Claim::Claimed)
    }
}

/// `conv.*` through the conversion chain.
pub struct Convert;

impl OperationBuilder for Convert {
    fn name(&self) -> &'static str {
        "conv"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let u = ctx.universe();
        let b = *u.builtins();
        let target = match inst.opcode {
            Opcode::ConvI1 => b.int8,
            Opcode::ConvI2 => b.int16,
            Opcode::ConvI4 => b.int32,
            Opcode::ConvI8 => b.int64,
            Opcode::ConvU1 => b.uint8,
            Opcode::ConvU2 => b.uint16,
            Opcode::ConvU4 => b.uint32,
            Opcode::ConvU8 => b.uint64,
            Opcode::ConvR4 => b.float32,
            _ => b.float64,
        };
        let mut value = ctx.pop_stack()?;
        if inst.opcode == Opcode::ConvRUn {
            if let Some(Num::Int(shape)) = num(u, ctx.var_type(value)) {
                value = ctx.convert(value, int_type(&b, IntShape::new(shape.bits, false)))?;
            }
        }
        let out = ctx.convert(value, target)?;
        ctx.push_stack(out);
        Ok(Claim::Claimed)
    }
}

/// `ceq`, `cgt`, `clt` and their unsigned forms.
pub struct Compare;

impl Compare {
    /// Consume a following `ldc.i4.0; ceq` that negates the result.
    fn take_negation(ctx: &mut MethodContext<'_, '_>) -> Result<bool> {
        let insts = ctx.instructions();
        ctx.push_state();
        let first = ctx.next().map(|i| &insts[i]);
        let second = ctx.next().map(|i| &insts[i]);
        let matched = match (first, second) {
            (Some(zero), Some(ceq)) => {
                matches!(zero.opcode, Opcode::LdcI40 | Opcode::LdcI4S | Opcode::LdcI4)
                    && zero.operand == Operand::Int32(0)
                    && ceq.opcode == Opcode::Ceq
                    && !ctx.is_branch_target(zero.offset)
                    && !ctx.is_branch_target(ceq.offset)
            }
            _ => false,
        };
        if matched {
            ctx.drop_state()?;
        } else {
            ctx.pop_state()?;
        }
        Ok(matched)
    }
}

impl OperationBuilder for Compare {
    fn name(&self) -> &'static str {
        "compare"
    }

    fn build(&self, ctx: &mut MethodContext<'_, '_>, inst: &Instruction) -> Result<Claim> {
        let u = ctx.universe();
        let b = *u.builtins();
        let rhs = ctx.pop_stack()?;
        let lhs = ctx.pop_stack()?;
        let (lt, rt) = (ctx.var_type(lhs), ctx.var_type(rhs));
        let unsigned = matches!(inst.opcode, Opcode::CgtUn | Opcode::CltUn);

        // `b == false` on a boolean is a negation
        if inst.opcode == Opcode::Ceq && lt == b.boolean {
            if let Some(v) = ctx.constant_value(rhs) {
                if v.as_integer() == Some(0) {
                    let bool_ident = "SystemBoolean".to_string();
                    let signature = host::signature(
                        &bool_ident,
                        "op_UnaryNegation",
                        std::slice::from_ref(&bool_ident),
                        &bool_ident,
                    );
                    ctx.extern_result(&signature, &[lhs], b.boolean)?;
                    return Ok(Claim::Claimed);
                }
            }
        }

        let ty = compare_type(u, lt, rt, unsigned)?;
        let mut op = match inst.opcode {
            Opcode::Ceq => "op_Equality",
            Opcode::Cgt | Opcode::CgtUn => "op_GreaterThan",
            _ => "op_LessThan",
        };
        if ty == b.object {
            op = match inst.opcode {
                Opcode::Ceq => "op_Equality",
                // `x != null` compiles to `cgt.un`
                Opcode::CgtUn => "op_Inequality",
                _ => return Err(CompileError::unsupported("ordered comparison of references")),
            };
        }
        if inst.opcode == Opcode::Ceq && Self::take_negation(ctx)? {
            op = "op_Inequality";
        }

        let (lhs, rhs) = if ty == b.object {
            (lhs, rhs)
        } else {
            (ctx.convert(lhs, ty)?, ctx.convert(rhs, ty)?)
        };
        if let (Some(x), Some(y)) = (ctx.constant_value(lhs), ctx.constant_value(rhs)) {
            let ordering = match (x.as_integer(), y.as_integer(), x.as_float(), y.as_float()) {
                (Some(x), Some(y), _, _) => x.partial_cmp(&y),
                (_, _, Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            };
            if let Some(ordering) = ordering {
                let r = match op {
                    "op_Equality" => ordering.is_eq(),
                    "op_Inequality" => ordering.is_ne(),
                    "op_GreaterThan" => ordering.is_gt(),
                    _ => ordering.is_lt(),
                };
                let constant = ctx.constant(Value::Bool(r), b.boolean);
                ctx.push_stack(constant);
                return Ok(Claim::Claimed);
            }
        }

        let ident = ctx.type_ident(ty);
        let signature = host::binary_operator(&ident, op, "SystemBoolean");
        ctx.extern_result(&signature, &[lhs, rhs], b.boolean)?;
        Ok(Claim::Claimed)
    }
}
