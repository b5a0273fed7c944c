//! Integration tests: metadata + bodies → compile → run on the reference
//! interpreter.

mod support;

use std::rc::Rc;

use pretty_assertions::assert_eq;
use retarget_bytecode::{
    BodyWriter, FieldDef, FieldKey, Instruction, InstructionReader, MemberFlags, MethodDef,
    MethodKey, Opcode, TypeDef, TypeKey, TypeKind, Universe,
};
use retarget_codegen::{
    CompileError, Compiler, CompilerOptions, MethodContext, Registry, SymbolTable, TypeUnit,
};
use retarget_vm::{Opcode as HostOp, Program, Value};

use support::Machine;

const ADD_I32: &str = "SystemInt32.__op_Addition__SystemInt32_SystemInt32__SystemInt32";

/// `Game.Door` with three `int` fields: `a`, `b`, `result`.
struct Door {
    u: Universe,
    ty: TypeKey,
    a: FieldKey,
    b: FieldKey,
    result: FieldKey,
}

impl Door {
    fn new() -> Self {
        let mut u = Universe::new();
        let int = u.builtins().int32;
        let ty = u.add_type(TypeDef::user("Game.Door", TypeKind::Class));
        let a = u.add_field(ty, FieldDef::new("a", int));
        let b = u.add_field(ty, FieldDef::new("b", int));
        let result = u.add_field(ty, FieldDef::new("result", int));
        Door { u, ty, a, b, result }
    }

    fn field(&self, f: FieldKey) -> u32 {
        self.u.field_token(f)
    }

    fn method(&self, m: MethodKey) -> u32 {
        self.u.method_token(m)
    }

    /// Declare an exported `void` method without a body.
    fn exported(&mut self, name: &str) -> MethodKey {
        let void = self.u.builtins().void;
        self.u.add_method(self.ty, MethodDef::new(name, void).with_flags(MemberFlags::exported()))
    }

    fn body(&mut self, m: MethodKey, w: BodyWriter, locals: Vec<TypeKey>) {
        self.u.set_body(m, w.finish().unwrap(), locals);
    }

    fn compile(&self) -> Result<Program, CompileError> {
        self.compile_with(CompilerOptions::default())
    }

    fn compile_with(&self, options: CompilerOptions) -> Result<Program, CompileError> {
        Compiler::new(options).compile_type(&self.u, self.ty)
    }
}

fn run<'p>(program: &'p Program, entry: &str, inputs: &[(&str, Value)]) -> Machine<'p> {
    let mut machine = Machine::new(program);
    for (name, value) in inputs {
        machine.set(name, value.clone());
    }
    if let Err(e) = machine.run(entry) {
        panic!("{}\n{}", e, program);
    }
    machine
}

/// `result = a + b` through three locals.
fn add_through_locals(door: &mut Door) -> MethodKey {
    let int = door.u.builtins().int32;
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.ldarg(0).token(Opcode::Ldfld, door.field(door.a)).stloc(0);
    w.ldarg(0).token(Opcode::Ldfld, door.field(door.b)).stloc(1);
    w.ldloc(0).ldloc(1).emit(Opcode::Add).stloc(2);
    w.ldarg(0).ldloc(2).token(Opcode::Stfld, door.field(door.result));
    w.emit(Opcode::Ret);
    door.body(compute, w, vec![int, int, int]);
    compute
}

#[test]
fn test_add_locals_is_one_extern() {
    let mut door = Door::new();
    add_through_locals(&mut door);
    let program = door.compile().unwrap();

    assert_eq!(program.externs(), vec![ADD_I32]);
    assert!(
        !program.heap.iter().any(|s| s.name.contains("_intnl_")),
        "no temporaries expected:\n{}",
        program
    );
    let m = run(&program, "Compute", &[("a", Value::Int32(2)), ("b", Value::Int32(40))]);
    assert_eq!(m.get("result"), &Value::Int32(42));
    assert_eq!(m.calls, vec![ADD_I32.to_string()]);
}

#[test]
fn test_heap_declaration() {
    let mut door = Door::new();
    add_through_locals(&mut door);
    let program = door.compile().unwrap();

    let names: Vec<&str> = program.heap.iter().take(3).map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "result"]);
    let (_, a) = program.slot("a").unwrap();
    assert_eq!(a.host_type, "SystemInt32");
    assert_eq!(a.value, Value::Int32(0));
    assert_eq!(program.entry_points.len(), 1);
    assert_eq!(program.entry("Compute"), Some(0));
    assert!(program.slot("__return_jump").is_some());
}

#[test]
fn test_branches_to_one_offset_share_an_address() {
    let mut door = Door::new();
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    let skip = w.new_label();
    w.ldarg(0).token(Opcode::Ldfld, door.field(door.a)).branch(Opcode::Brfalse, skip);
    w.ldarg(0).token(Opcode::Ldfld, door.field(door.b)).branch(Opcode::BrfalseS, skip);
    w.ldarg(0).ldc_i4(1).token(Opcode::Stfld, door.field(door.result));
    w.bind(skip).unwrap();
    w.emit(Opcode::Ret);
    door.body(compute, w, vec![]);
    let program = door.compile().unwrap();

    let targets: Vec<u32> = program
        .code
        .iter()
        .filter(|i| i.opcode == HostOp::JumpIfFalse)
        .filter_map(|i| i.operand)
        .collect();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0], targets[1]);

    let both = run(&program, "Compute", &[("a", Value::Int32(1)), ("b", Value::Int32(7))]);
    assert_eq!(both.get("result"), &Value::Int32(1));
    let one = run(&program, "Compute", &[("a", Value::Int32(1)), ("b", Value::Int32(0))]);
    assert_eq!(one.get("result"), &Value::Int32(0));
}

#[test]
fn test_branch_onto_nop() {
    let mut door = Door::new();
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    let skip = w.new_label();
    w.ldarg(0).token(Opcode::Ldfld, door.field(door.a)).branch(Opcode::BrfalseS, skip);
    w.ldarg(0).ldc_i4(1).token(Opcode::Stfld, door.field(door.result));
    w.bind(skip).unwrap();
    w.emit(Opcode::Nop).emit(Opcode::Ret);
    door.body(compute, w, vec![]);
    let program = door.compile().unwrap();

    let taken = run(&program, "Compute", &[("a", Value::Int32(0))]);
    assert_eq!(taken.get("result"), &Value::Int32(0));
    let through = run(&program, "Compute", &[("a", Value::Int32(3))]);
    assert_eq!(through.get("result"), &Value::Int32(1));
}

#[test]
fn test_store_after_nop_target_is_not_fused() {
    let mut door = Door::new();
    let int = door.u.builtins().int32;
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    let (other, join) = (w.new_label(), w.new_label());
    w.ldarg(0).token(Opcode::Ldfld, door.field(door.a)).branch(Opcode::BrfalseS, other);
    w.ldc_i4(5).branch(Opcode::BrS, join);
    w.bind(other).unwrap();
    w.ldarg(0).token(Opcode::Ldfld, door.field(door.b));
    w.bind(join).unwrap();
    w.emit(Opcode::Nop).stloc(0);
    w.ldarg(0).ldloc(0).token(Opcode::Stfld, door.field(door.result)).emit(Opcode::Ret);
    door.body(compute, w, vec![int]);
    let program = door.compile().unwrap();

    let m = run(&program, "Compute", &[("a", Value::Int32(1)), ("b", Value::Int32(9))]);
    assert_eq!(m.get("result"), &Value::Int32(5));
    let m = run(&program, "Compute", &[("a", Value::Int32(0)), ("b", Value::Int32(9))]);
    assert_eq!(m.get("result"), &Value::Int32(9));
}

/// `result = a != 0 ? {first} : {second}` with `this` loaded before the
/// condition.
fn conditional_store(
    door: &mut Door,
    first: impl Fn(&mut BodyWriter),
    second: impl Fn(&mut BodyWriter),
) {
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    let (other, join) = (w.new_label(), w.new_label());
    w.ldarg(0).ldarg(0).token(Opcode::Ldfld, door.field(door.a));
    w.branch(Opcode::Brfalse, other);
    first(&mut w);
    w.branch(Opcode::Br, join);
    w.bind(other).unwrap();
    second(&mut w);
    w.bind(join).unwrap();
    w.token(Opcode::Stfld, door.field(door.result)).emit(Opcode::Ret);
    door.body(compute, w, vec![]);
}

#[test]
fn test_this_survives_a_join() {
    let mut door = Door::new();
    conditional_store(
        &mut door,
        |w| {
            w.ldc_i4(1);
        },
        |w| {
            w.ldc_i4(2);
        },
    );
    let program = door.compile().unwrap();

    let options = CompilerOptions::default();
    assert!(!program.externs().contains(&options.remote.set_variable.as_str()), "{}", program);
    let m = run(&program, "Compute", &[("a", Value::Int32(4))]);
    assert_eq!(m.get("result"), &Value::Int32(1));
    let m = run(&program, "Compute", &[("a", Value::Int32(0))]);
    assert_eq!(m.get("result"), &Value::Int32(2));
}

#[test]
fn test_join_widens_narrow_values() {
    let mut door = Door::new();
    let b = *door.u.builtins();
    let small = door.u.add_field(door.ty, FieldDef::new("small", b.uint8));
    let small_token = door.field(small);
    conditional_store(
        &mut door,
        |w| {
            w.ldarg(0).token(Opcode::Ldfld, small_token);
        },
        |w| {
            w.ldc_i4(300);
        },
    );
    let program = door.compile().unwrap();

    let m = run(&program, "Compute", &[("a", Value::Int32(1)), ("small", Value::Byte(7))]);
    assert_eq!(m.get("result"), &Value::Int32(7));
    let m = run(&program, "Compute", &[("a", Value::Int32(0)), ("small", Value::Byte(7))]);
    assert_eq!(m.get("result"), &Value::Int32(300));
}

#[test]
fn test_override_calls_base_with_swapped_arguments() {
    let mut u = Universe::new();
    let b = *u.builtins();
    let calc = u.add_type(TypeDef::user("Game.Calc", TypeKind::Class));
    let int_pair = |name: &str| {
        let def = MethodDef::new(name, b.int32).with_virtual();
        def.with_param("x", b.int32).with_param("y", b.int32)
    };
    let sub = u.add_method(calc, int_pair("Sub"));
    let mut w = BodyWriter::new();
    w.ldarg(1).ldarg(2).emit(Opcode::Sub).emit(Opcode::Ret);
    u.set_body(sub, w.finish().unwrap(), vec![]);

    let gate = u.add_type(TypeDef::user("Game.Gate", TypeKind::Class).with_base(calc));
    let a = u.add_field(gate, FieldDef::new("a", b.int32));
    let c = u.add_field(gate, FieldDef::new("c", b.int32));
    let result = u.add_field(gate, FieldDef::new("result", b.int32));
    let swapped = u.add_method(gate, int_pair("Sub"));
    let mut w = BodyWriter::new();
    w.ldarg(0).ldarg(2).ldarg(1).token(Opcode::Call, u.method_token(sub)).emit(Opcode::Ret);
    u.set_body(swapped, w.finish().unwrap(), vec![]);

    let compute =
        u.add_method(gate, MethodDef::new("Compute", b.void).with_flags(MemberFlags::exported()));
    let mut w = BodyWriter::new();
    w.ldarg(0).ldarg(0).ldarg(0).token(Opcode::Ldfld, u.field_token(a));
    w.ldarg(0).token(Opcode::Ldfld, u.field_token(c));
    w.token(Opcode::Callvirt, u.method_token(sub));
    w.token(Opcode::Stfld, u.field_token(result)).emit(Opcode::Ret);
    u.set_body(compute, w.finish().unwrap(), vec![]);

    let program = Compiler::new(CompilerOptions::default()).compile_type(&u, gate).unwrap();
    let m = run(&program, "Compute", &[("a", Value::Int32(10)), ("c", Value::Int32(3))]);
    assert_eq!(m.get("result"), &Value::Int32(-7));
}

#[test]
fn test_loop_with_backward_branch() {
    let mut door = Door::new();
    let int = door.u.builtins().int32;
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    let (body, check) = (w.new_label(), w.new_label());
    w.ldc_i4(0).stloc(0).ldc_i4(1).stloc(1).branch(Opcode::BrS, check);
    w.bind(body).unwrap();
    w.ldloc(0).ldloc(1).emit(Opcode::Add).stloc(0);
    w.ldloc(1).ldc_i4(1).emit(Opcode::Add).stloc(1);
    w.bind(check).unwrap();
    w.ldloc(1).ldarg(0).token(Opcode::Ldfld, door.field(door.a)).branch(Opcode::BleS, body);
    w.ldarg(0).ldloc(0).token(Opcode::Stfld, door.field(door.result));
    w.emit(Opcode::Ret);
    door.body(compute, w, vec![int, int]);
    let program = door.compile().unwrap();

    let m = run(&program, "Compute", &[("a", Value::Int32(4))]);
    assert_eq!(m.get("result"), &Value::Int32(10));
    let none = run(&program, "Compute", &[("a", Value::Int32(0))]);
    assert_eq!(none.get("result"), &Value::Int32(0));
}

#[test]
fn test_constant_conversions_fold() {
    let mut door = Door::new();
    let b = *door.u.builtins();
    let small = door.u.add_field(door.ty, FieldDef::new("small", b.uint8));
    let wide = door.u.add_field(door.ty, FieldDef::new("wide", b.uint16));
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.ldarg(0).ldc_i4(300).emit(Opcode::ConvU1).token(Opcode::Stfld, door.field(small));
    w.ldarg(0).ldc_i4(-1).emit(Opcode::ConvU2).token(Opcode::Stfld, door.field(wide));
    w.emit(Opcode::Ret);
    door.body(compute, w, vec![]);
    let program = door.compile().unwrap();

    assert!(program.externs().is_empty(), "{}", program);
    let m = run(&program, "Compute", &[]);
    assert_eq!(m.get("small"), &Value::Byte(44));
    assert_eq!(m.get("wide"), &Value::UInt16(65535));
}

#[test]
fn test_runtime_reinterpretation_round_trips() {
    let mut door = Door::new();
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.ldarg(0).ldarg(0).token(Opcode::Ldfld, door.field(door.a));
    w.emit(Opcode::ConvU4).emit(Opcode::ConvI4);
    w.token(Opcode::Stfld, door.field(door.result)).emit(Opcode::Ret);
    door.body(compute, w, vec![]);
    let program = door.compile().unwrap();

    for v in [-5, 0, 7, i32::MIN, i32::MAX] {
        let m = run(&program, "Compute", &[("a", Value::Int32(v))]);
        assert_eq!(m.get("result"), &Value::Int32(v), "round trip of {}", v);
    }
}

#[test]
fn test_runtime_narrowing_wraps() {
    let mut door = Door::new();
    let b = *door.u.builtins();
    let small = door.u.add_field(door.ty, FieldDef::new("small", b.uint8));
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.ldarg(0).ldarg(0).token(Opcode::Ldfld, door.field(door.a));
    w.emit(Opcode::ConvU1).token(Opcode::Stfld, door.field(small)).emit(Opcode::Ret);
    door.body(compute, w, vec![]);
    let program = door.compile().unwrap();

    let m = run(&program, "Compute", &[("a", Value::Int32(300))]);
    assert_eq!(m.get("small"), &Value::Byte(44));
    let m = run(&program, "Compute", &[("a", Value::Int32(-1))]);
    assert_eq!(m.get("small"), &Value::Byte(255));
}

#[test]
fn test_compilation_is_deterministic() {
    let mut door = Door::new();
    add_through_locals(&mut door);
    let first = door.compile().unwrap();
    let second = door.compile().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());

    let mut compiler = Compiler::new(CompilerOptions::default());
    compiler.compile_type(&door.u, door.ty).unwrap();
    assert_eq!(
        compiler.registry().builders_for(Opcode::Call),
        vec!["nullable", "self-call", "remote-call", "host-call"]
    );
}

#[test]
fn test_unclaimed_instruction_names_opcode_and_operand() {
    let mut door = Door::new();
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.ldc_i4(100).emit(Opcode::Pop).emit(Opcode::Ret);
    door.body(compute, w, vec![]);

    let options = CompilerOptions::default();
    let symbols = SymbolTable::build(&door.u, door.ty, &options).unwrap();
    let mut unit = TypeUnit::new(&door.u, &options, door.ty, symbols);
    let code = door.u.method(compute).body.as_ref().unwrap().code.clone();
    let insts: Rc<[Instruction]> = InstructionReader::read(&code, &door.u).unwrap().into();
    let mut ctx = MethodContext::new(&mut unit, compute, insts, 0).unwrap();

    let err = ctx.translate(&Registry::new()).unwrap_err();
    assert!(matches!(err, CompileError::Unclaimed { .. }));
    let message = err.to_string();
    assert!(message.contains("`ldc.i4.s 100`"), "{}", message);
    assert!(message.contains("IL_0000"), "{}", message);
}

#[test]
fn test_unsupported_carries_offset() {
    let mut door = Door::new();
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.emit(Opcode::Nop).emit(Opcode::Ldnull).emit(Opcode::Throw);
    door.body(compute, w, vec![]);

    let err = door.compile().unwrap_err();
    assert!(matches!(err, CompileError::Unsupported { .. }), "{}", err);
    assert_eq!(err.offset(), Some(2));
    assert!(err.to_string().contains("Game.Door::Compute()"), "{}", err);
}

#[test]
fn test_inherited_fields_get_distinct_names() {
    let mut door = Door::new();
    let int = door.u.builtins().int32;
    let base = door.u.add_type(TypeDef::user("Game.Base", TypeKind::Class));
    let inherited = door.u.add_field(base, FieldDef::new("count", int));
    let ty = door.u.add_type(TypeDef::user("Game.Gate", TypeKind::Class).with_base(base));
    let own = door.u.add_field(ty, FieldDef::new("count", int));
    let void = door.u.builtins().void;
    let compute =
        door.u.add_method(ty, MethodDef::new("Compute", void).with_flags(MemberFlags::exported()));
    let mut w = BodyWriter::new();
    w.ldarg(0).ldarg(0).token(Opcode::Ldfld, door.field(inherited));
    w.token(Opcode::Stfld, door.field(own)).emit(Opcode::Ret);
    door.body(compute, w, vec![]);

    let program = Compiler::new(CompilerOptions::default()).compile_type(&door.u, ty).unwrap();
    let m = run(&program, "Compute", &[("count", Value::Int32(5))]);
    assert_eq!(m.get("__1_count"), &Value::Int32(5));
}

#[test]
fn test_unique_fields_conflict() {
    let mut u = Universe::new();
    let int = u.builtins().int32;
    let unique = MemberFlags::default().with_unique();
    let base = u.add_type(TypeDef::user("Game.Base", TypeKind::Class));
    u.add_field(base, FieldDef::new("count", int).with_flags(unique));
    let ty = u.add_type(TypeDef::user("Game.Gate", TypeKind::Class).with_base(base));
    u.add_field(ty, FieldDef::new("count", int).with_flags(unique));

    let err = Compiler::new(CompilerOptions::default()).compile_type(&u, ty).unwrap_err();
    assert!(
        matches!(err, CompileError::NamingConflict { ref name, .. } if name == "count"),
        "{}",
        err
    );
}

/// `.ctor`: `a = 1; small = 300; b = a + 2;`
fn ctor_with_logic(door: &mut Door) -> FieldKey {
    let b = *door.u.builtins();
    let small = door.u.add_field(door.ty, FieldDef::new("small", b.uint8));
    let ctor = door.u.add_method(door.ty, MethodDef::new(".ctor", b.void));
    let mut w = BodyWriter::new();
    w.ldarg(0).ldc_i4(1).token(Opcode::Stfld, door.field(door.a));
    w.ldarg(0).ldc_i4(300).token(Opcode::Stfld, door.field(small));
    w.ldarg(0).ldarg(0).token(Opcode::Ldfld, door.field(door.a)).ldc_i4(2).emit(Opcode::Add);
    w.token(Opcode::Stfld, door.field(door.b)).emit(Opcode::Ret);
    door.body(ctor, w, vec![]);
    small
}

#[test]
fn test_constructor_defaults_and_synthetic_start() {
    let mut door = Door::new();
    ctor_with_logic(&mut door);
    let program = door.compile().unwrap();

    assert_eq!(program.slot("a").unwrap().1.value, Value::Int32(1));
    assert_eq!(program.slot("small").unwrap().1.value, Value::Byte(44));
    assert_eq!(program.slot("b").unwrap().1.value, Value::Int32(0));
    let m = run(&program, "_start", &[]);
    assert_eq!(m.get("b"), &Value::Int32(3));
}

#[test]
fn test_start_event_runs_constructor_first() {
    let mut door = Door::new();
    ctor_with_logic(&mut door);
    let start = door.exported("Start");
    let mut w = BodyWriter::new();
    w.ldarg(0).ldarg(0).token(Opcode::Ldfld, door.field(door.b)).ldc_i4(10).emit(Opcode::Mul);
    w.token(Opcode::Stfld, door.field(door.result)).emit(Opcode::Ret);
    door.body(start, w, vec![]);
    let program = door.compile().unwrap();

    assert_eq!(program.entry_points.len(), 1);
    let m = run(&program, "_start", &[]);
    assert_eq!(m.get("b"), &Value::Int32(3));
    assert_eq!(m.get("result"), &Value::Int32(30));
}

#[test]
fn test_self_call_with_parameter_and_return() {
    let mut door = Door::new();
    let int = door.u.builtins().int32;
    let add2 = door.u.add_method(door.ty, MethodDef::new("Add2", int).with_param("x", int));
    let mut w = BodyWriter::new();
    w.ldarg(1).ldc_i4(2).emit(Opcode::Add).emit(Opcode::Ret);
    door.body(add2, w, vec![]);

    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.ldarg(0).ldarg(0).ldarg(0).token(Opcode::Ldfld, door.field(door.a));
    w.token(Opcode::Call, door.method(add2));
    w.token(Opcode::Stfld, door.field(door.result)).emit(Opcode::Ret);
    door.body(compute, w, vec![]);
    let program = door.compile().unwrap();

    assert!(program.slot("__Add2_x").is_some());
    assert!(program.slot("__Add2__ret").is_some());
    let m = run(&program, "Compute", &[("a", Value::Int32(40))]);
    assert_eq!(m.get("result"), &Value::Int32(42));
}

#[test]
fn test_call_cycles_are_rejected() {
    let mut door = Door::new();
    let void = door.u.builtins().void;
    let ping = door.exported("Ping");
    let pong = door.u.add_method(door.ty, MethodDef::new("Pong", void));
    let mut w = BodyWriter::new();
    w.ldarg(0).token(Opcode::Call, door.method(pong)).emit(Opcode::Ret);
    door.body(ping, w, vec![]);
    let mut w = BodyWriter::new();
    w.ldarg(0).token(Opcode::Call, door.method(ping)).emit(Opcode::Ret);
    door.body(pong, w, vec![]);

    let err = door.compile().unwrap_err();
    assert!(err.to_string().contains("recursive call cycle"), "{}", err);

    let mut door = Door::new();
    let again = door.exported("Again");
    let mut w = BodyWriter::new();
    w.ldarg(0).token(Opcode::Call, door.method(again)).emit(Opcode::Ret);
    door.body(again, w, vec![]);
    let err = door.compile().unwrap_err();
    assert!(err.to_string().contains("recursive call to"), "{}", err);
}

#[test]
fn test_trivial_getter_is_inlined() {
    let mut door = Door::new();
    let int = door.u.builtins().int32;
    let get_a = door.u.add_method(door.ty, MethodDef::new("GetA", int));
    let mut w = BodyWriter::new();
    w.ldarg(0).token(Opcode::Ldfld, door.field(door.a)).emit(Opcode::Ret);
    door.body(get_a, w, vec![]);
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.ldarg(0).ldarg(0).token(Opcode::Call, door.method(get_a));
    w.token(Opcode::Stfld, door.field(door.result)).emit(Opcode::Ret);
    door.body(compute, w, vec![]);

    let inlined = door.compile().unwrap();
    assert!(inlined.slot("__GetA__ret").is_none(), "{}", inlined);
    let m = run(&inlined, "Compute", &[("a", Value::Int32(9))]);
    assert_eq!(m.get("result"), &Value::Int32(9));

    let called =
        door.compile_with(CompilerOptions::default().with_inline_accessors(false)).unwrap();
    assert!(called.slot("__GetA__ret").is_some());
    assert!(called.code_size() > inlined.code_size());
    let m = run(&called, "Compute", &[("a", Value::Int32(9))]);
    assert_eq!(m.get("result"), &Value::Int32(9));
}

#[test]
fn test_remote_call_goes_through_events() {
    let mut door = Door::new();
    let void = door.u.builtins().void;
    let lamp = door.u.add_type(TypeDef::user("Game.Lamp", TypeKind::Class));
    let toggle =
        door.u.add_method(lamp, MethodDef::new("Toggle", void).with_flags(MemberFlags::exported()));
    door.u.set_body(toggle, vec![0x2A], vec![]);
    let target = door.u.add_field(door.ty, FieldDef::new("lamp", lamp));
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.ldarg(0).token(Opcode::Ldfld, door.field(target));
    w.token(Opcode::Callvirt, door.method(toggle)).emit(Opcode::Ret);
    door.body(compute, w, vec![]);
    let program = door.compile().unwrap();

    let options = CompilerOptions::default();
    assert_eq!(program.externs(), vec![options.remote.send_event.as_str()]);
    assert!(program.heap.iter().any(|s| s.value == Value::String("Toggle".into())));
    assert_eq!(program.slot("lamp").unwrap().1.host_type, options.behaviour_type);
}

#[test]
fn test_debug_map_points_back_to_source() {
    let mut door = Door::new();
    let int = door.u.builtins().int32;
    let compute = door.exported("Compute");
    let mut w = BodyWriter::new();
    w.ldarg(0).token(Opcode::Ldfld, door.field(door.a)).stloc(0);
    w.ldloc(0).ldloc(0);
    let add_offset = w.offset();
    w.emit(Opcode::Add).stloc(0);
    w.ldarg(0).ldloc(0).token(Opcode::Stfld, door.field(door.result)).emit(Opcode::Ret);
    door.body(compute, w, vec![int]);
    let program = door.compile().unwrap();

    let map = program.debug_map.as_ref().unwrap();
    let (address, _) = program.addresses().find(|(_, i)| i.opcode == HostOp::Extern).unwrap();
    let point = map.lookup(address).unwrap();
    assert_eq!(point.method, "Game.Door::Compute()");
    assert_eq!(point.offset, add_offset);

    let without = door.compile_with(CompilerOptions::default().with_debug_map(false)).unwrap();
    assert!(without.debug_map.is_none());
    assert_eq!(without.code, program.code);
}

#[test]
fn test_compile_all_behaviours() {
    let mut door = Door::new();
    add_through_locals(&mut door);
    let void = door.u.builtins().void;
    let iface = door.u.add_type(TypeDef::user("Game.IUsable", TypeKind::Interface));
    door.u.add_method(iface, MethodDef::new("Use", void));

    let results = Compiler::new(CompilerOptions::default()).compile_all(&door.u);
    assert_eq!(results.len(), 1);
    let (ty, program) = &results[0];
    assert_eq!(*ty, door.ty);
    assert!(program.is_ok());
    assert!(Compiler::new(CompilerOptions::default()).compile_type(&door.u, iface).is_err());
}
