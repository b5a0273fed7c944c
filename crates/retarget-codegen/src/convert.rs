//! Primitive Conversion Chain.
//!
//! Converters are tried in order; the first that produces a value wins.
//! Compile-time constants never reach the chain: they are folded into new
//! constants up front.
//!
//! The host converts between integer types with range-checked operations,
//! so changes of width or signedness that may not fit are done with bit
//! arithmetic in a 64-bit working type: mask to the destination width,
//! then OR the sign bits back in when the destination is signed.

use log::trace;
use retarget_bytecode::{TypeKey, TypeKind, Universe};
use retarget_vm::Value;

use crate::context::MethodContext;
use crate::emit::InstructionSink;
use crate::error::{CompileError, Result};
use crate::host;
use crate::variable::VarId;

/// Width and signedness of an integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntShape {
    pub bits: u32,
    pub signed: bool,
}

impl IntShape {
    pub const fn new(bits: u32, signed: bool) -> Self {
        Self { bits, signed }
    }

    pub fn of(universe: &Universe, ty: TypeKey) -> Option<Self> {
        universe.int_shape(ty).map(|(bits, signed)| Self { bits, signed })
    }

    /// Two's-complement wrap of `value` into this shape.
    pub fn wrap(self, value: i128) -> i128 {
        let low = value & ((1i128 << self.bits) - 1);
        if self.signed && (low >> (self.bits - 1)) & 1 == 1 {
            low - (1i128 << self.bits)
        } else {
            low
        }
    }

    /// Every value of `self` is representable in `other`.
    pub fn fits_in(self, other: IntShape) -> bool {
        match (self.signed, other.signed) {
            (false, false) | (true, true) => other.bits >= self.bits,
            (false, true) => other.bits > self.bits,
            (true, false) => false,
        }
    }
}

/// Reinterpret `value` of shape `from` as shape `to`.
pub fn fold_integer(value: i128, from: IntShape, to: IntShape) -> i128 {
    to.wrap(from.wrap(value))
}

/// Compile-time conversion of a constant, or `None` if it must happen at
/// run time.
pub fn fold_constant(
    universe: &Universe,
    value: &Value,
    from: TypeKey,
    to: TypeKey,
) -> Option<Value> {
    if from == to {
        return Some(value.clone());
    }
    let to_kind = universe.kind(to);
    match value {
        Value::Null => return universe.is_reference(to).then_some(Value::Null),
        Value::String(_) => {
            return matches!(to_kind, TypeKind::String | TypeKind::Object).then(|| value.clone())
        }
        Value::Type(_) | Value::Address(_) | Value::This => return None,
        _ => {}
    }
    if to_kind == TypeKind::Object {
        return Some(value.clone());
    }
    if let Some(inner) = universe.nullable_inner(to) {
        return fold_constant(universe, value, from, inner);
    }
    if let Some(v) = value.as_integer() {
        return match IntShape::of(universe, universe.enum_underlying(to).unwrap_or(to)) {
            Some(shape) => host::integer_value(universe, to, shape.wrap(v)),
            None if to_kind == TypeKind::Boolean || universe.is_float(to) => {
                host::integer_value(universe, to, v)
            }
            None => None,
        };
    }
    let f = value.as_float()?;
    match to_kind {
        TypeKind::Boolean => Some(Value::Bool(f != 0.0)),
        TypeKind::Float32 => Some(Value::Single(f as f32)),
        TypeKind::Float64 => Some(Value::Double(f)),
        _ => {
            let shape = IntShape::of(universe, universe.enum_underlying(to).unwrap_or(to))?;
            if !f.is_finite() {
                return None;
            }
            host::integer_value(universe, to, shape.wrap(f.trunc() as i128))
        }
    }
}

trait Converter {
    fn name(&self) -> &'static str;

    fn convert(
        &self,
        ctx: &mut MethodContext<'_, '_>,
        value: VarId,
        from: TypeKey,
        to: TypeKey,
    ) -> Result<Option<VarId>>;
}

const CHAIN: &[&dyn Converter] =
    &[&Identity, &EnumUnderlying, &NullableBox, &BooleanCoercion, &IntegerBits, &RuntimeCoercion];

pub struct ConversionChain;

impl ConversionChain {
    pub fn convert(ctx: &mut MethodContext<'_, '_>, value: VarId, to: TypeKey) -> Result<VarId> {
        let from = ctx.var_type(value);
        Self::convert_from(ctx, value, from, to)
    }

    /// Convert `value`, treating it as a value of `from`.
    pub fn convert_from(
        ctx: &mut MethodContext<'_, '_>,
        value: VarId,
        from: TypeKey,
        to: TypeKey,
    ) -> Result<VarId> {
        if let Some(v) = ctx.constant_value(value).cloned() {
            if let Some(folded) = fold_constant(ctx.universe(), &v, from, to) {
                return Ok(ctx.constant(folded, to));
            }
        }
        for converter in CHAIN {
            if let Some(out) = converter.convert(ctx, value, from, to)? {
                if out != value {
                    trace!(
                        "{}: {:?} {} -> {:?} {}",
                        converter.name(),
                        value,
                        ctx.universe().ty(from).name,
                        out,
                        ctx.universe().ty(to).name
                    );
                }
                return Ok(out);
            }
        }
        let u = ctx.universe();
        Err(CompileError::unsupported(format!(
            "no conversion from {} to {}",
            u.ty(from).name,
            u.ty(to).name
        )))
    }
}

// === Emission helpers ===

/// `System.Convert.To{To}(value)`.
fn runtime(
    ctx: &mut MethodContext<'_, '_>,
    value: VarId,
    from: TypeKey,
    to: TypeKey,
) -> Result<VarId> {
    let out = ctx.get_temp(to);
    runtime_into(ctx, value, from, to, out)?;
    Ok(out)
}

fn runtime_into(
    ctx: &mut MethodContext<'_, '_>,
    value: VarId,
    from: TypeKey,
    to: TypeKey,
    out: VarId,
) -> Result<()> {
    let name = host::convert_name(ctx.universe(), to).ok_or_else(|| {
        CompileError::unsupported(format!("no host conversion to {}", ctx.universe().ty(to).name))
    })?;
    let member = format!("To{}", name);
    let signature =
        host::signature("SystemConvert", &member, &[ctx.type_ident(from)], &ctx.type_ident(to));
    ctx.extern_call(&signature, &[value], Some(out))
}

/// `out = a {op} k` on `ty`.
fn bitwise(
    ctx: &mut MethodContext<'_, '_>,
    ty: TypeKey,
    op: &str,
    a: VarId,
    k: i128,
    out: Option<VarId>,
) -> Result<VarId> {
    let k = ctx.int_constant(ty, k)?;
    let ident = ctx.type_ident(ty);
    let out = match out {
        Some(out) => out,
        None => ctx.get_temp(ty),
    };
    ctx.extern_call(&host::binary_operator(&ident, op, &ident), &[a, k], Some(out))?;
    Ok(out)
}

/// Boolean temporary holding `a != 0`.
fn non_zero(ctx: &mut MethodContext<'_, '_>, ty: TypeKey, a: VarId) -> Result<VarId> {
    let zero = ctx.int_constant(ty, 0)?;
    let ident = ctx.type_ident(ty);
    let boolean = ctx.universe().builtins().boolean;
    let signature = host::binary_operator(&ident, "op_Inequality", "SystemBoolean");
    ctx.extern_temp(&signature, &[a, zero], boolean)
}

/// Sets `target |= k` when `cond` holds. `target` must be reserved.
fn or_if(
    ctx: &mut MethodContext<'_, '_>,
    cond: VarId,
    ty: TypeKey,
    target: VarId,
    k: i128,
) -> Result<()> {
    let skip = ctx.new_label();
    ctx.jump_if_false(cond, skip)?;
    ctx.allocate(target, 1)?;
    bitwise(ctx, ty, "op_LogicalOr", target, k, Some(target))?;
    ctx.apply_label(skip);
    Ok(())
}

// === Converters ===

struct Identity;

impl Converter for Identity {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn convert(
        &self,
        ctx: &mut MethodContext<'_, '_>,
        value: VarId,
        from: TypeKey,
        to: TypeKey,
    ) -> Result<Option<VarId>> {
        let u = ctx.universe();
        let same = from == to
            || ctx.type_ident(from) == ctx.type_ident(to)
            || (u.is_reference(from) && u.is_reference(to) && u.is_assignable_to(from, to));
        Ok(same.then_some(value))
    }
}

struct EnumUnderlying;

impl Converter for EnumUnderlying {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn convert(
        &self,
        ctx: &mut MethodContext<'_, '_>,
        value: VarId,
        from: TypeKey,
        to: TypeKey,
    ) -> Result<Option<VarId>> {
        let u = ctx.universe();
        if let Some(underlying) = u.enum_underlying(from) {
            if !u.is_numeric(to) && u.kind(to) != TypeKind::Boolean {
                return Ok(None);
            }
            if !u.ty(from).is_host() {
                return ConversionChain::convert_from(ctx, value, underlying, to).map(Some);
            }
            let raw = runtime(ctx, value, u.builtins().object, underlying)?;
            return ConversionChain::convert_from(ctx, raw, underlying, to).map(Some);
        }
        if let Some(underlying) = u.enum_underlying(to) {
            if !u.is_numeric(from) {
                return Ok(None);
            }
            let raw = ConversionChain::convert_from(ctx, value, from, underlying)?;
            if !u.ty(to).is_host() {
                return Ok(Some(raw));
            }
            let host_name = u.ty(to).host_name.clone().unwrap_or_default();
            let ty_const = ctx.constant(Value::Type(host_name), u.builtins().system_type);
            let signature = host::signature(
                "SystemEnum",
                "ToObject",
                &["SystemType".to_string(), ctx.type_ident(underlying)],
                "SystemObject",
            );
            return ctx.extern_temp(&signature, &[ty_const, raw], to).map(Some);
        }
        Ok(None)
    }
}

struct NullableBox;

impl Converter for NullableBox {
    fn name(&self) -> &'static str {
        "nullable"
    }

    fn convert(
        &self,
        ctx: &mut MethodContext<'_, '_>,
        value: VarId,
        from: TypeKey,
        to: TypeKey,
    ) -> Result<Option<VarId>> {
        let u = ctx.universe();
        if let Some(inner) = u.nullable_inner(from) {
            let unboxed = ctx.get_temp(inner);
            ctx.copy(value, unboxed)?;
            return ConversionChain::convert_from(ctx, unboxed, inner, to).map(Some);
        }
        if let Some(inner) = u.nullable_inner(to) {
            let v = ConversionChain::convert_from(ctx, value, from, inner)?;
            let boxed = ctx.get_temp(to);
            ctx.copy(v, boxed)?;
            return Ok(Some(boxed));
        }
        Ok(None)
    }
}

struct BooleanCoercion;

impl Converter for BooleanCoercion {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn convert(
        &self,
        ctx: &mut MethodContext<'_, '_>,
        value: VarId,
        from: TypeKey,
        to: TypeKey,
    ) -> Result<Option<VarId>> {
        let u = ctx.universe();
        let b = *u.builtins();
        if u.kind(to) != TypeKind::Boolean {
            return Ok(None);
        }
        if let Some(shape) = IntShape::of(u, from) {
            let (value, ty) = if shape.bits < 32 {
                (runtime(ctx, value, from, b.int32)?, b.int32)
            } else {
                (value, from)
            };
            return non_zero(ctx, ty, value).map(Some);
        }
        if u.is_float(from) {
            return non_zero(ctx, from, value).map(Some);
        }
        if u.is_reference(from) {
            let null = ctx.constant(Value::Null, b.object);
            let signature = host::binary_operator("SystemObject", "op_Inequality", "SystemBoolean");
            return ctx.extern_temp(&signature, &[value, null], b.boolean).map(Some);
        }
        Ok(None)
    }
}

struct IntegerBits;

impl Converter for IntegerBits {
    fn name(&self) -> &'static str {
        "integer-bits"
    }

    fn convert(
        &self,
        ctx: &mut MethodContext<'_, '_>,
        value: VarId,
        from: TypeKey,
        to: TypeKey,
    ) -> Result<Option<VarId>> {
        let u = ctx.universe();
        let Some(d) = IntShape::of(u, to) else {
            return Ok(None);
        };
        if u.is_float(from) {
            return float_to_int(ctx, value, from, to).map(Some);
        }
        let Some(s) = IntShape::of(u, from) else {
            return Ok(None);
        };
        if s.fits_in(d) {
            return Ok(None);
        }
        reinterpret(ctx, value, from, s, to, d).map(Some)
    }
}

fn float_to_int(
    ctx: &mut MethodContext<'_, '_>,
    value: VarId,
    from: TypeKey,
    to: TypeKey,
) -> Result<VarId> {
    let b = *ctx.universe().builtins();
    let d = if from == b.float64 { value } else { runtime(ctx, value, from, b.float64)? };
    let truncated =
        ctx.extern_temp("SystemMath.__Truncate__SystemDouble__SystemDouble", &[d], b.float64)?;
    let wide = runtime(ctx, truncated, b.float64, b.int64)?;
    if to == b.int64 {
        return Ok(wide);
    }
    ConversionChain::convert_from(ctx, wide, b.int64, to)
}

/// Bit-exact change of width and/or signedness.
fn reinterpret(
    ctx: &mut MethodContext<'_, '_>,
    value: VarId,
    from: TypeKey,
    s: IntShape,
    to: TypeKey,
    d: IntShape,
) -> Result<VarId> {
    let b = *ctx.universe().builtins();
    let (i64_ty, u64_ty) = (b.int64, b.uint64);

    let mut work = if s.signed || s.bits < 64 { i64_ty } else { u64_ty };
    let mut w = if from == work { value } else { runtime(ctx, value, from, work)? };

    if work == u64_ty && d.bits < 64 {
        let masked = bitwise(ctx, u64_ty, "op_LogicalAnd", w, (1i128 << d.bits) - 1, None)?;
        if !d.signed {
            return runtime(ctx, masked, u64_ty, to);
        }
        w = runtime(ctx, masked, u64_ty, i64_ty)?;
        work = i64_ty;
    }

    match (d.bits, d.signed) {
        (64, false) => {
            ctx.allocate(w, 1)?;
            let low = bitwise(ctx, i64_ty, "op_LogicalAnd", w, i128::from(i64::MAX), None)?;
            let out = ctx.get_temp(to);
            ctx.reserve(out)?;
            runtime_into(ctx, low, i64_ty, to, out)?;
            let zero = ctx.int_constant(i64_ty, 0)?;
            let negative = ctx.extern_temp(
                &host::binary_operator("SystemInt64", "op_LessThan", "SystemBoolean"),
                &[w, zero],
                b.boolean,
            )?;
            or_if(ctx, negative, to, out, 1i128 << 63)?;
            ctx.release(out)?;
            Ok(out)
        }
        (64, true) => {
            ctx.allocate(w, 1)?;
            let low = bitwise(ctx, u64_ty, "op_LogicalAnd", w, i128::from(i64::MAX), None)?;
            let out = ctx.get_temp(to);
            ctx.reserve(out)?;
            runtime_into(ctx, low, u64_ty, to, out)?;
            let top = bitwise(ctx, u64_ty, "op_LogicalAnd", w, 1i128 << 63, None)?;
            let set = non_zero(ctx, u64_ty, top)?;
            or_if(ctx, set, to, out, i128::from(i64::MIN))?;
            ctx.release(out)?;
            Ok(out)
        }
        (n, false) => {
            let masked = bitwise(ctx, work, "op_LogicalAnd", w, (1i128 << n) - 1, None)?;
            runtime(ctx, masked, work, to)
        }
        (n, true) => {
            let sign = 1i128 << (n - 1);
            ctx.allocate(w, 1)?;
            let t = ctx.get_temp(work);
            ctx.reserve(t)?;
            bitwise(ctx, work, "op_LogicalAnd", w, sign - 1, Some(t))?;
            let top = bitwise(ctx, work, "op_LogicalAnd", w, sign, None)?;
            let set = non_zero(ctx, work, top)?;
            or_if(ctx, set, work, t, -sign)?;
            ctx.release(t)?;
            runtime(ctx, t, work, to)
        }
    }
}

struct RuntimeCoercion;

impl Converter for RuntimeCoercion {
    fn name(&self) -> &'static str {
        "runtime"
    }

    fn convert(
        &self,
        ctx: &mut MethodContext<'_, '_>,
        value: VarId,
        from: TypeKey,
        to: TypeKey,
    ) -> Result<Option<VarId>> {
        let u = ctx.universe();
        let to_kind = u.kind(to);
        if to_kind == TypeKind::String && host::convert_name(u, from).is_none() {
            let object = ["SystemObject".to_string()];
            let signature = host::signature("SystemConvert", "ToString", &object, "SystemString");
            return ctx.extern_temp(&signature, &[value], to).map(Some);
        }
        if host::convert_name(u, from).is_some() && host::convert_name(u, to).is_some() {
            return runtime(ctx, value, from, to).map(Some);
        }
        if u.is_reference(from) || u.is_reference(to) {
            let out = ctx.get_temp(to);
            ctx.copy(value, out)?;
            return Ok(Some(out));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fold_integer() {
        let i32s = IntShape::new(32, true);
        assert_eq!(fold_integer(300, i32s, IntShape::new(8, false)), 44);
        assert_eq!(fold_integer(-1, i32s, IntShape::new(16, false)), 65535);
        assert_eq!(fold_integer(200, IntShape::new(8, false), IntShape::new(8, true)), -56);
        assert_eq!(fold_integer(-56, IntShape::new(8, true), IntShape::new(8, false)), 200);
        let (i64s, u64s) = (IntShape::new(64, true), IntShape::new(64, false));
        assert_eq!(fold_integer(-1, i64s, u64s), i128::from(u64::MAX));
        assert_eq!(fold_integer(i128::from(u64::MAX), u64s, i64s), -1);
    }

    #[test]
    fn test_fits_in() {
        assert!(IntShape::new(8, false).fits_in(IntShape::new(16, true)));
        assert!(!IntShape::new(16, false).fits_in(IntShape::new(16, true)));
        assert!(!IntShape::new(8, true).fits_in(IntShape::new(64, false)));
        assert!(IntShape::new(32, true).fits_in(IntShape::new(64, true)));
    }

    #[test]
    fn test_fold_constant() {
        let u = Universe::new();
        let b = *u.builtins();
        let fold = |v: Value, from, to| fold_constant(&u, &v, from, to);
        assert_eq!(fold(Value::Int32(300), b.int32, b.uint8), Some(Value::Byte(44)));
        assert_eq!(fold(Value::Int32(-1), b.int32, b.uint16), Some(Value::UInt16(65535)));
        assert_eq!(fold(Value::Int32(1), b.int32, b.boolean), Some(Value::Bool(true)));
        assert_eq!(fold(Value::Int32(65), b.int32, b.char), Some(Value::Char(65)));
        assert_eq!(fold(Value::Double(-2.75), b.float64, b.int32), Some(Value::Int32(-2)));
        assert_eq!(fold(Value::Int32(3), b.int32, b.float32), Some(Value::Single(3.0)));
        assert_eq!(fold(Value::Double(f64::NAN), b.float64, b.int32), None);
        assert_eq!(fold(Value::Null, b.object, b.string), Some(Value::Null));
        assert_eq!(fold(Value::Null, b.object, b.int32), None);
    }
}
