//! Host naming: type identifiers, extern signatures, and typed values.
//!
//! Extern signatures have the shape
//! `{Owner}.__{member}__{Param1}_{Param2}__{Return}`; the parameter group
//! is omitted for members without parameters.

use retarget_bytecode::{FieldKey, Literal, MethodKey, TypeKey, TypeKind, Universe};
use retarget_vm::Value;

use crate::options::CompilerOptions;

/// Identifier of a type in host signatures and heap declarations.
pub fn type_ident(universe: &Universe, ty: TypeKey, options: &CompilerOptions) -> String {
    let def = universe.ty(ty);
    match def.kind {
        TypeKind::Enum { underlying } if !def.is_host() => {
            type_ident(universe, underlying, options)
        }
        TypeKind::Class | TypeKind::Interface if !def.is_host() => options.behaviour_type.clone(),
        TypeKind::Nullable { .. } => "SystemObject".to_string(),
        TypeKind::Array { elem } => format!("{}Array", type_ident(universe, elem, options)),
        TypeKind::ByRef { elem } => format!("{}Ref", type_ident(universe, elem, options)),
        TypeKind::GenericParam { index } => format!("T{}", index),
        _ => {
            let name = def.host_name.as_deref().unwrap_or(&def.name);
            name.chars().filter(|c| !matches!(c, '.' | '+' | '<' | '>' | ',' | ' ' | '`')).collect()
        }
    }
}

pub fn signature(owner: &str, member: &str, params: &[String], ret: &str) -> String {
    if params.is_empty() {
        format!("{}.__{}__{}", owner, member, ret)
    } else {
        format!("{}.__{}__{}__{}", owner, member, params.join("_"), ret)
    }
}

/// Signature of a host method or constructor.
pub fn method_signature(
    universe: &Universe,
    method: MethodKey,
    options: &CompilerOptions,
) -> String {
    let m = universe.method(method);
    let owner = type_ident(universe, m.declaring, options);
    let params: Vec<String> = m
        .params
        .iter()
        .map(|p| {
            let ident = type_ident(universe, p.ty, options);
            if p.by_ref {
                format!("{}Ref", ident)
            } else {
                ident
            }
        })
        .collect();
    if m.is_ctor() {
        signature(&owner, "ctor", &params, &owner)
    } else {
        let ret = type_ident(universe, m.ret, options);
        signature(&owner, &m.name, &params, &ret)
    }
}

pub fn field_getter(universe: &Universe, field: FieldKey, options: &CompilerOptions) -> String {
    let f = universe.field(field);
    let owner = type_ident(universe, f.declaring, options);
    signature(&owner, &format!("get_{}", f.name), &[], &type_ident(universe, f.ty, options))
}

pub fn field_setter(universe: &Universe, field: FieldKey, options: &CompilerOptions) -> String {
    let f = universe.field(field);
    let owner = type_ident(universe, f.declaring, options);
    let value = type_ident(universe, f.ty, options);
    signature(&owner, &format!("set_{}", f.name), &[value], "SystemVoid")
}

/// Binary operator on a single type, e.g. `op_Addition(T, T) -> T`.
pub fn binary_operator(ident: &str, op: &str, ret: &str) -> String {
    signature(ident, op, &[ident.to_string(), ident.to_string()], ret)
}

/// Short name used by `System.Convert.To{Name}`.
pub fn convert_name(universe: &Universe, ty: TypeKey) -> Option<&'static str> {
    Some(match universe.kind(ty) {
        TypeKind::Boolean => "Boolean",
        TypeKind::Char => "Char",
        TypeKind::Int8 => "SByte",
        TypeKind::UInt8 => "Byte",
        TypeKind::Int16 => "Int16",
        TypeKind::UInt16 => "UInt16",
        TypeKind::Int32 => "Int32",
        TypeKind::UInt32 => "UInt32",
        TypeKind::Int64 => "Int64",
        TypeKind::UInt64 => "UInt64",
        TypeKind::Float32 => "Single",
        TypeKind::Float64 => "Double",
        TypeKind::String => "String",
        _ => return None,
    })
}

/// Value of an integer-like type, or `None` if `ty` is not one.
pub fn integer_value(universe: &Universe, ty: TypeKey, v: i128) -> Option<Value> {
    Some(match universe.kind(ty) {
        TypeKind::Boolean => Value::Bool(v != 0),
        TypeKind::Char => Value::Char(v as u16),
        TypeKind::Int8 => Value::SByte(v as i8),
        TypeKind::UInt8 => Value::Byte(v as u8),
        TypeKind::Int16 => Value::Int16(v as i16),
        TypeKind::UInt16 => Value::UInt16(v as u16),
        TypeKind::Int32 => Value::Int32(v as i32),
        TypeKind::UInt32 => Value::UInt32(v as u32),
        TypeKind::Int64 => Value::Int64(v as i64),
        TypeKind::UInt64 => Value::UInt64(v as u64),
        TypeKind::Float32 => Value::Single(v as f32),
        TypeKind::Float64 => Value::Double(v as f64),
        TypeKind::Enum { underlying } => return integer_value(universe, underlying, v),
        _ => return None,
    })
}

/// Metadata constant as a typed value of `ty`.
pub fn literal_value(universe: &Universe, ty: TypeKey, literal: &Literal) -> Option<Value> {
    match literal {
        Literal::Null => Some(Value::Null),
        Literal::String(s) => Some(Value::String(s.clone())),
        Literal::Bool(v) => integer_value(universe, ty, i128::from(*v)),
        Literal::Char(v) => integer_value(universe, ty, i128::from(*v)),
        Literal::Int32(v) => integer_value(universe, ty, i128::from(*v)),
        Literal::Int64(v) => integer_value(universe, ty, i128::from(*v)),
        Literal::Float32(v) => match universe.kind(ty) {
            TypeKind::Float64 => Some(Value::Double(f64::from(*v))),
            _ => Some(Value::Single(*v)),
        },
        Literal::Float64(v) => match universe.kind(ty) {
            TypeKind::Float32 => Some(Value::Single(*v as f32)),
            _ => Some(Value::Double(*v)),
        },
    }
}

/// Zero value of a type as stored in a fresh heap slot.
pub fn default_value(universe: &Universe, ty: TypeKey) -> Value {
    integer_value(universe, ty, 0).unwrap_or(Value::Null)
}
