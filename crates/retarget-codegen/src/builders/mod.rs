//! Operation builders and the explicit registration table.

mod accessor;
mod arith;
mod branch;
mod call;
mod field;
mod load;
mod nullable;
mod object;

use std::rc::Rc;

use retarget_bytecode::{FieldKey, Instruction, MethodKey, Opcode, Operand, TypeKey, Universe};

use crate::error::{CompileError, Result};
use crate::options::CompilerOptions;
use crate::registry::{OperationBuilder, Registry, Scope};
use crate::symbols::SymbolTable;

pub use accessor::{Accessor, AccessorShortcut};
pub use arith::{binary_type, compare_type};

pub const PRIORITY_ACCESSOR: i32 = 100;
pub const PRIORITY_NULLABLE: i32 = 50;
pub const PRIORITY_SELF_CALL: i32 = 10;
pub const PRIORITY_REMOTE: i32 = 5;
pub const PRIORITY_DEFAULT: i32 = 0;

fn global(registry: &mut Registry, opcodes: &[Opcode], builder: Rc<dyn OperationBuilder>) {
    registry.register(opcodes, PRIORITY_DEFAULT, Scope::Global, builder);
}

fn ranked(
    registry: &mut Registry,
    opcodes: &[Opcode],
    priority: i32,
    builder: Rc<dyn OperationBuilder>,
) {
    registry.register(opcodes, priority, Scope::Global, builder);
}

/// Register every builder that does not depend on the compiled type.
pub fn register_globals(registry: &mut Registry) {
    use Opcode::*;

    global(registry, &[Nop, Break], Rc::new(load::NoOp));
    global(registry, &[Ldarg0, Ldarg1, Ldarg2, Ldarg3, LdargS, Ldarg], Rc::new(load::LoadArg));
    global(registry, &[StargS, Starg], Rc::new(load::StoreArg));
    global(registry, &[Ldloc0, Ldloc1, Ldloc2, Ldloc3, LdlocS, Ldloc], Rc::new(load::LoadLocal));
    global(registry, &[Stloc0, Stloc1, Stloc2, Stloc3, StlocS, Stloc], Rc::new(load::StoreLocal));
    global(registry, &[LdargaS, Ldarga, LdlocaS, Ldloca], Rc::new(load::LoadAddress));
    global(
        registry,
        &[
            Ldnull, LdcI4M1, LdcI40, LdcI41, LdcI42, LdcI43, LdcI44, LdcI45, LdcI46, LdcI47, LdcI48,
            LdcI4S, LdcI4, LdcI8, LdcR4, LdcR8, Ldstr,
        ],
        Rc::new(load::LoadConstant),
    );
    global(registry, &[Dup], Rc::new(load::Duplicate));
    global(registry, &[Pop], Rc::new(load::Discard));

    global(
        registry,
        &[Add, Sub, Mul, Div, DivUn, Rem, RemUn, And, Or, Xor, Shl, Shr, ShrUn],
        Rc::new(arith::Binary),
    );
    global(registry, &[Neg, Not], Rc::new(arith::Unary));
    global(
        registry,
        &[ConvI1, ConvI2, ConvI4, ConvI8, ConvU1, ConvU2, ConvU4, ConvU8, ConvR4, ConvR8, ConvRUn],
        Rc::new(arith::Convert),
    );
    global(registry, &[Ceq, Cgt, CgtUn, Clt, CltUn], Rc::new(arith::Compare));

    global(registry, &[Br, BrS, Leave, LeaveS], Rc::new(branch::Jump));
    global(registry, &[Brtrue, BrtrueS, Brfalse, BrfalseS], Rc::new(branch::Test));
    global(
        registry,
        &[
            Beq, BeqS, BneUn, BneUnS, Bge, BgeS, BgeUn, BgeUnS, Bgt, BgtS, BgtUn, BgtUnS, Ble, BleS,
            BleUn, BleUnS, Blt, BltS, BltUn, BltUnS,
        ],
        Rc::new(branch::CompareBranch),
    );
    global(registry, &[Switch], Rc::new(branch::SwitchTable));
    global(registry, &[Ret], Rc::new(branch::Return));
    global(registry, &[Throw], Rc::new(branch::Throw));

    let calls = [Call, Callvirt, Newobj];
    ranked(registry, &calls, PRIORITY_NULLABLE, Rc::new(nullable::NullableOps));
    ranked(registry, &calls, PRIORITY_SELF_CALL, Rc::new(call::SelfCall));
    ranked(registry, &calls, PRIORITY_REMOTE, Rc::new(call::RemoteCall));
    global(registry, &calls, Rc::new(call::HostCall));
    global(registry, &[Constrained], Rc::new(call::ConstrainedPrefix));

    ranked(registry, &[Ldfld, Stfld, Ldflda], PRIORITY_SELF_CALL, Rc::new(field::OwnField));
    ranked(registry, &[Ldfld, Stfld], PRIORITY_REMOTE, Rc::new(field::RemoteField));
    global(registry, &[Ldfld, Stfld, Ldflda], Rc::new(field::HostField));
    global(registry, &[Ldsfld, Stsfld, Ldsflda], Rc::new(field::StaticField));

    global(registry, &[Box, Unbox, UnboxAny, Castclass, Isinst], Rc::new(object::Casts));
    global(registry, &[Newarr, Ldlen], Rc::new(object::Arrays));
    global(
        registry,
        &[
            LdelemI1, LdelemU1, LdelemI2, LdelemU2, LdelemI4, LdelemU4, LdelemI8, LdelemR4,
            LdelemR8, LdelemRef, Ldelem,
        ],
        Rc::new(object::LoadElement),
    );
    global(
        registry,
        &[StelemI1, StelemI2, StelemI4, StelemI8, StelemR4, StelemR8, StelemRef, Stelem],
        Rc::new(object::StoreElement),
    );
    global(registry, &[Ldelema], Rc::new(object::ElementAddress));
    global(
        registry,
        &[
            Ldobj, LdindI1, LdindU1, LdindI2, LdindU2, LdindI4, LdindU4, LdindI8, LdindR4, LdindR8,
            LdindRef,
        ],
        Rc::new(object::LoadIndirect),
    );
    global(
        registry,
        &[Stobj, StindI1, StindI2, StindI4, StindI8, StindR4, StindR8, StindRef],
        Rc::new(object::StoreIndirect),
    );
    global(registry, &[Initobj], Rc::new(object::InitObject));
}

/// Register builders bound to the type about to be compiled.
pub fn register_type_scoped(
    registry: &mut Registry,
    universe: &Universe,
    symbols: &SymbolTable,
    options: &CompilerOptions,
) -> Result<()> {
    if options.inline_accessors {
        let shortcut = AccessorShortcut::analyze(universe, symbols)?;
        let calls = [Opcode::Call, Opcode::Callvirt];
        registry.register(&calls, PRIORITY_ACCESSOR, Scope::Type, Rc::new(shortcut));
    }
    Ok(())
}

// === Operand helpers ===

fn method_operand(inst: &Instruction) -> Result<MethodKey> {
    match inst.operand {
        Operand::Method(m) => Ok(m),
        _ => Err(CompileError::invariant(format!("`{}` without a method operand", inst.opcode))),
    }
}

fn field_operand(inst: &Instruction) -> Result<FieldKey> {
    match inst.operand {
        Operand::Field(f) => Ok(f),
        _ => Err(CompileError::invariant(format!("`{}` without a field operand", inst.opcode))),
    }
}

fn type_operand(inst: &Instruction) -> Result<TypeKey> {
    match inst.operand {
        Operand::Type(t) => Ok(t),
        _ => Err(CompileError::invariant(format!("`{}` without a type operand", inst.opcode))),
    }
}

fn target_operand(inst: &Instruction) -> Result<u32> {
    match inst.operand {
        Operand::Target(t) => Ok(t),
        _ => Err(CompileError::invariant(format!("`{}` without a branch target", inst.opcode))),
    }
}

fn index_operand(inst: &Instruction) -> Result<u16> {
    match inst.operand {
        Operand::Arg(n) | Operand::Local(n) => Ok(n),
        _ => Err(CompileError::invariant(format!("`{}` without a slot index", inst.opcode))),
    }
}
