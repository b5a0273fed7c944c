//! Reference interpreter for compiled programs.
//!
//! Implements the host machine instructions and the static host operations
//! the generated code relies on: operators on primitive types and
//! `System.Convert`. Conversions are checked the way the host checks them,
//! so out-of-range intermediate values fail the run.

#![allow(dead_code)]

use retarget_vm::{Opcode, Program, Value, HALT_ADDRESS};
use rustc_hash::FxHashMap;

const STEP_LIMIT: usize = 100_000;

pub struct Machine<'p> {
    program: &'p Program,
    heap: Vec<Value>,
    stack: Vec<u32>,
    index: FxHashMap<u32, usize>,
    /// Every extern signature called, in order.
    pub calls: Vec<String>,
}

impl<'p> Machine<'p> {
    pub fn new(program: &'p Program) -> Self {
        let heap = program.heap.iter().map(|s| s.value.clone()).collect();
        let index = program.addresses().enumerate().map(|(i, (addr, _))| (addr, i)).collect();
        Self { program, heap, stack: Vec::new(), index, calls: Vec::new() }
    }

    pub fn set(&mut self, name: &str, value: Value) {
        let (idx, _) = self.program.slot(name).unwrap_or_else(|| panic!("no heap slot `{}`", name));
        self.heap[idx as usize] = value;
    }

    pub fn get(&self, name: &str) -> &Value {
        let (idx, _) = self.program.slot(name).unwrap_or_else(|| panic!("no heap slot `{}`", name));
        &self.heap[idx as usize]
    }

    pub fn run(&mut self, entry: &str) -> Result<(), String> {
        let mut pc =
            self.program.entry(entry).ok_or_else(|| format!("no entry point `{}`", entry))?;
        for _ in 0..STEP_LIMIT {
            if pc == HALT_ADDRESS {
                if !self.stack.is_empty() {
                    return Err(format!("halted with {} value(s) on the stack", self.stack.len()));
                }
                return Ok(());
            }
            let &i = self.index.get(&pc).ok_or_else(|| format!("no instruction at {:#010x}", pc))?;
            let inst = self.program.code[i];
            let next = pc + inst.size();
            let operand = inst.operand.unwrap_or(0);
            pc = match inst.opcode {
                Opcode::Nop | Opcode::Annotation => next,
                Opcode::Push => {
                    self.stack.push(operand);
                    next
                }
                Opcode::Pop => {
                    self.pop()?;
                    next
                }
                Opcode::Copy => {
                    let dst = self.pop()?;
                    let src = self.pop()?;
                    let slot = &self.program.heap[dst];
                    if !fits(&self.heap[src], &slot.host_type) {
                        return Err(format!(
                            "COPY of {:?} into {} slot `{}` at {:#010x}",
                            self.heap[src], slot.host_type, slot.name, pc
                        ));
                    }
                    self.heap[dst] = self.heap[src].clone();
                    next
                }
                Opcode::Jump => operand,
                Opcode::JumpIfFalse => {
                    let cond = self.pop()?;
                    match self.heap[cond] {
                        Value::Bool(true) => next,
                        Value::Bool(false) => operand,
                        ref other => {
                            return Err(format!("JUMP_IF_FALSE on {:?} at {:#010x}", other, pc))
                        }
                    }
                }
                Opcode::JumpIndirect => match self.heap[operand as usize] {
                    Value::Address(a) | Value::UInt32(a) => a,
                    ref other => {
                        return Err(format!("JUMP_INDIRECT through {:?} at {:#010x}", other, pc))
                    }
                },
                Opcode::Extern => {
                    self.call(operand as usize)?;
                    next
                }
            };
        }
        Err(format!("no halt after {} steps", STEP_LIMIT))
    }

    fn pop(&mut self) -> Result<usize, String> {
        self.stack.pop().map(|a| a as usize).ok_or_else(|| "stack underflow".to_string())
    }

    fn call(&mut self, slot: usize) -> Result<(), String> {
        let signature = match &self.heap[slot] {
            Value::String(s) => s.clone(),
            other => return Err(format!("EXTERN through {:?}", other)),
        };
        let (member, arity, ret) =
            parse(&signature).ok_or_else(|| format!("malformed signature {}", signature))?;
        let out = if ret == "SystemVoid" { None } else { Some(self.pop()?) };
        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            let a = self.pop()?;
            args.push(self.heap[a].clone());
        }
        args.reverse();
        let value = evaluate(member, &args, ret).map_err(|e| format!("{}: {}", signature, e))?;
        if let Some(out) = out {
            self.heap[out] = value;
        }
        self.calls.push(signature);
        Ok(())
    }
}

/// `(member, parameter count, return type)` of a static host operation.
fn parse(signature: &str) -> Option<(&str, usize, &str)> {
    let (_, rest) = signature.split_once(".__")?;
    let parts: Vec<&str> = rest.split("__").collect();
    match parts.as_slice() {
        [member, ret] => Some((member, 0, ret)),
        [member, params, ret] => Some((member, params.split('_').count(), ret)),
        _ => None,
    }
}

/// Host type of a primitive value; `None` for references.
fn primitive(value: &Value) -> Option<&'static str> {
    Some(match value {
        Value::Bool(_) => "SystemBoolean",
        Value::Char(_) => "SystemChar",
        Value::SByte(_) => "SystemSByte",
        Value::Byte(_) => "SystemByte",
        Value::Int16(_) => "SystemInt16",
        Value::UInt16(_) => "SystemUInt16",
        Value::Int32(_) => "SystemInt32",
        Value::UInt32(_) | Value::Address(_) => "SystemUInt32",
        Value::Int64(_) => "SystemInt64",
        Value::UInt64(_) => "SystemUInt64",
        Value::Single(_) => "SystemSingle",
        Value::Double(_) => "SystemDouble",
        Value::String(_) => "SystemString",
        Value::Type(_) => "SystemType",
        Value::Null | Value::This => return None,
    })
}

const VALUE_TYPES: &[&str] = &[
    "SystemBoolean",
    "SystemChar",
    "SystemSByte",
    "SystemByte",
    "SystemInt16",
    "SystemUInt16",
    "SystemInt32",
    "SystemUInt32",
    "SystemInt64",
    "SystemUInt64",
    "SystemSingle",
    "SystemDouble",
];

/// A value may be stored in a slot of `host_type`: same primitive type,
/// boxed into an object slot, or a reference in a reference slot.
fn fits(value: &Value, host_type: &str) -> bool {
    match primitive(value) {
        Some(ty) => ty == host_type || host_type == "SystemObject",
        None => !VALUE_TYPES.contains(&host_type),
    }
}

fn range(ident: &str) -> Option<(i128, i128)> {
    Some(match ident {
        "SystemSByte" => (i8::MIN.into(), i8::MAX.into()),
        "SystemByte" => (0, u8::MAX.into()),
        "SystemInt16" => (i16::MIN.into(), i16::MAX.into()),
        "SystemUInt16" | "SystemChar" => (0, u16::MAX.into()),
        "SystemInt32" => (i32::MIN.into(), i32::MAX.into()),
        "SystemUInt32" => (0, u32::MAX.into()),
        "SystemInt64" => (i64::MIN.into(), i64::MAX.into()),
        "SystemUInt64" => (0, u64::MAX.into()),
        _ => return None,
    })
}

fn integer(ident: &str, v: i128) -> Result<Value, String> {
    Ok(match ident {
        "SystemSByte" => Value::SByte(v as i8),
        "SystemByte" => Value::Byte(v as u8),
        "SystemInt16" => Value::Int16(v as i16),
        "SystemUInt16" => Value::UInt16(v as u16),
        "SystemChar" => Value::Char(v as u16),
        "SystemInt32" => Value::Int32(v as i32),
        "SystemUInt32" => Value::UInt32(v as u32),
        "SystemInt64" => Value::Int64(v as i64),
        "SystemUInt64" => Value::UInt64(v as u64),
        "SystemBoolean" => Value::Bool(v != 0),
        "SystemSingle" => Value::Single(v as f32),
        "SystemDouble" => Value::Double(v as f64),
        other => return Err(format!("no integer representation in {}", other)),
    })
}

fn checked(ident: &str, v: i128) -> Result<Value, String> {
    if let Some((lo, hi)) = range(ident) {
        if v < lo || v > hi {
            return Err(format!("{} overflows {}", v, ident));
        }
    }
    integer(ident, v)
}

fn float(ident: &str, v: f64) -> Result<Value, String> {
    match ident {
        "SystemSingle" => Ok(Value::Single(v as f32)),
        "SystemDouble" => Ok(Value::Double(v)),
        other => checked(other, v.round_ties_even() as i128),
    }
}

fn convert(value: &Value, ret: &str) -> Result<Value, String> {
    if ret == "SystemString" {
        return Ok(match value {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        });
    }
    if let Some(v) = value.as_integer() {
        return checked(ret, v);
    }
    if let Some(f) = value.as_float() {
        return float(ret, f);
    }
    Err(format!("cannot convert {:?}", value))
}

fn evaluate(member: &str, args: &[Value], ret: &str) -> Result<Value, String> {
    if member.starts_with("To") {
        let [value] = args else { return Err("conversion takes one argument".into()) };
        return convert(value, ret);
    }
    match (member, args) {
        ("Truncate", [Value::Double(v)]) => return Ok(Value::Double(v.trunc())),
        ("op_UnaryNegation", [Value::Bool(v)]) => return Ok(Value::Bool(!v)),
        ("op_Equality", [x, y]) => return Ok(Value::Bool(equal(x, y))),
        ("op_Inequality", [x, y]) => return Ok(Value::Bool(!equal(x, y))),
        _ => {}
    }
    if let [x] = args {
        return match (member, x.as_integer(), x.as_float()) {
            ("op_UnaryMinus", Some(v), _) => integer(ret, -v),
            ("op_UnaryMinus", _, Some(f)) => float(ret, -f),
            _ => Err(format!("unknown operation {}", member)),
        };
    }
    let [x, y] = args else { return Err(format!("unknown operation {}", member)) };
    if let (Some(a), Some(b)) = (x.as_integer(), y.as_integer()) {
        let compare = |r: bool| Ok(Value::Bool(r));
        return match member {
            "op_Addition" => integer(ret, a + b),
            "op_Subtraction" => integer(ret, a - b),
            "op_Multiplication" => integer(ret, a * b),
            "op_Division" if b != 0 => integer(ret, a / b),
            "op_Modulus" if b != 0 => integer(ret, a % b),
            "op_LogicalAnd" => integer(ret, a & b),
            "op_LogicalOr" => integer(ret, a | b),
            "op_LogicalXor" => integer(ret, a ^ b),
            "op_LeftShift" => integer(ret, a << (b & 63)),
            "op_RightShift" => integer(ret, a >> (b & 63)),
            "op_LessThan" => compare(a < b),
            "op_LessThanOrEqual" => compare(a <= b),
            "op_GreaterThan" => compare(a > b),
            "op_GreaterThanOrEqual" => compare(a >= b),
            _ => Err(format!("unknown operation {}", member)),
        };
    }
    let (Some(a), Some(b)) = (x.as_float(), y.as_float()) else {
        return Err(format!("{} on {:?} and {:?}", member, x, y));
    };
    match member {
        "op_Addition" => float(ret, a + b),
        "op_Subtraction" => float(ret, a - b),
        "op_Multiplication" => float(ret, a * b),
        "op_Division" => float(ret, a / b),
        "op_LessThan" => Ok(Value::Bool(a < b)),
        "op_LessThanOrEqual" => Ok(Value::Bool(a <= b)),
        "op_GreaterThan" => Ok(Value::Bool(a > b)),
        "op_GreaterThanOrEqual" => Ok(Value::Bool(a >= b)),
        _ => Err(format!("unknown operation {}", member)),
    }
}

fn equal(x: &Value, y: &Value) -> bool {
    match (x.as_integer(), y.as_integer()) {
        (Some(a), Some(b)) => a == b,
        _ => match (x.as_float(), y.as_float()) {
            (Some(a), Some(b)) => a == b,
            _ => x == y,
        },
    }
}
