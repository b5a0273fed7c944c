//! Method Translation Context.
//!
//! Drives the translation of one method body: a cursor over the immutable
//! instruction arena, the simulated operand stack, argument and local
//! slots, one label per branch-target offset, and the merge variables that
//! carry stack values across branches.

use std::rc::Rc;

use log::trace;
use retarget_bytecode::{Instruction, MethodKey, Opcode, Operand, TypeKey, TypeKind, Universe};
use retarget_vm::Value;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::convert::ConversionChain;
use crate::emit::{InstructionSink, LabelId, Op};
use crate::error::{CompileError, Result};
use crate::host;
use crate::options::CompilerOptions;
use crate::pool::ScratchPool;
use crate::registry::Registry;
use crate::unit::TypeUnit;
use crate::variable::{Site, VarId, VarKind, Variable};

/// Landing offset of branches to trailing `nop`s.
const END_OF_BODY: u32 = u32::MAX;

/// Offset where control arriving at `target` lands: the first instruction
/// at or after it that is not a `nop`.
fn landing_offset(insts: &[Instruction], target: u32) -> u32 {
    match insts.binary_search_by_key(&target, |i| i.offset) {
        Ok(idx) => insts[idx..]
            .iter()
            .find(|i| i.opcode != Opcode::Nop)
            .map_or(END_OF_BODY, |i| i.offset),
        Err(_) => target,
    }
}

/// Output slot returned by [`MethodContext::out_var`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutVar {
    pub var: VarId,
    /// The following store was consumed and `var` is its destination.
    pub fused: bool,
}

pub struct MethodContext<'a, 'u> {
    unit: &'a mut TypeUnit<'u>,
    method: MethodKey,
    name: String,
    method_id: u32,
    insts: Rc<[Instruction]>,
    cursor: usize,
    current: Option<usize>,
    states: Vec<(usize, Option<usize>)>,
    stack: Vec<VarId>,
    pool: ScratchPool,
    args: Vec<VarId>,
    locals: Vec<VarId>,
    labels: FxHashMap<u32, LabelId>,
    targets: FxHashSet<u32>,
    redirects: FxHashMap<u32, u32>,
    merges: FxHashMap<u32, Vec<VarId>>,
    flow_ended: bool,
    return_label: LabelId,
    return_var: Option<VarId>,
}

impl<'a, 'u> MethodContext<'a, 'u> {
    /// Context for `method`, starting at instruction index `start`.
    pub fn new(
        unit: &'a mut TypeUnit<'u>,
        method: MethodKey,
        insts: Rc<[Instruction]>,
        start: usize,
    ) -> Result<Self> {
        let universe = unit.universe;
        let m = universe.method(method);
        let name = universe.method_display(method);
        let method_id = unit.method_id(&name);

        let mut args = Vec::with_capacity(m.arg_count());
        if !m.is_static {
            args.push(unit.this_var());
        }
        let mut return_var = None;
        if !m.params.is_empty() || universe.kind(m.ret) != TypeKind::Void {
            let symbol = unit.symbols.method(universe, method)?;
            let (params, ret) = (symbol.params.clone(), symbol.ret.clone());
            for (p, emitted) in m.params.iter().zip(&params) {
                args.push(unit.param_var(emitted, p.ty));
            }
            if let Some(ret) = ret {
                return_var = Some(unit.return_var(&ret, m.ret));
            }
        }
        let locals = m
            .body
            .as_ref()
            .map(|b| {
                b.locals
                    .iter()
                    .map(|&ty| unit.vars.add(Variable::new(ty, VarKind::Local)))
                    .collect()
            })
            .unwrap_or_default();

        let live = &insts[start.min(insts.len())..];
        let mut targets = FxHashSet::default();
        let mut redirects = FxHashMap::default();
        for target in live.iter().flat_map(|i| i.targets().iter().copied()) {
            let landing = landing_offset(live, target);
            if landing != target {
                redirects.insert(target, landing);
            }
            targets.insert(landing);
        }
        let return_label = unit.code.new_label();

        Ok(Self {
            unit,
            method,
            name,
            method_id,
            insts,
            cursor: start,
            current: None,
            states: Vec::new(),
            stack: Vec::new(),
            pool: ScratchPool::new(),
            args,
            locals,
            labels: FxHashMap::default(),
            targets,
            redirects,
            merges: FxHashMap::default(),
            flow_ended: false,
            return_label,
            return_var,
        })
    }

    // === Accessors ===

    #[inline]
    pub fn universe(&self) -> &'u Universe {
        self.unit.universe
    }

    #[inline]
    pub fn options(&self) -> &'u CompilerOptions {
        self.unit.options
    }

    #[inline]
    pub fn unit(&self) -> &TypeUnit<'u> {
        &*self.unit
    }

    #[inline]
    pub fn unit_mut(&mut self) -> &mut TypeUnit<'u> {
        &mut *self.unit
    }

    pub fn method(&self) -> MethodKey {
        self.method
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_label(&self) -> LabelId {
        self.return_label
    }

    pub fn return_var(&self) -> Option<VarId> {
        self.return_var
    }

    pub fn this_var(&self) -> VarId {
        self.unit.this_var()
    }

    pub fn arg(&self, n: u16) -> Result<VarId> {
        self.args
            .get(usize::from(n))
            .copied()
            .ok_or_else(|| CompileError::invariant(format!("argument {} out of range", n)))
    }

    pub fn local(&self, n: u16) -> Result<VarId> {
        self.locals
            .get(usize::from(n))
            .copied()
            .ok_or_else(|| CompileError::invariant(format!("local {} out of range", n)))
    }

    #[inline]
    pub fn var_type(&self, var: VarId) -> TypeKey {
        self.unit.vars.ty(var)
    }

    pub fn var(&self, var: VarId) -> &Variable {
        self.unit.vars.get(var)
    }

    pub fn constant_value(&self, var: VarId) -> Option<&Value> {
        self.unit.vars.constant_value(var)
    }

    pub fn is_this(&self, var: VarId) -> bool {
        var == self.unit.this_var()
    }

    pub fn type_ident(&self, ty: TypeKey) -> String {
        host::type_ident(self.universe(), ty, self.options())
    }

    /// Offset of the instruction being translated.
    pub fn current_offset(&self) -> u32 {
        self.current.map(|i| self.insts[i].offset).unwrap_or(0)
    }

    pub fn instructions(&self) -> Rc<[Instruction]> {
        Rc::clone(&self.insts)
    }

    pub fn is_branch_target(&self, offset: u32) -> bool {
        self.targets.contains(&offset)
    }

    /// Offset a branch to `target` actually reaches, past any `nop`s.
    pub fn landing(&self, target: u32) -> u32 {
        self.redirects.get(&target).copied().unwrap_or(target)
    }

    /// Type a value has on the operand stack: narrow integers widen to
    /// 32 bits.
    pub fn stack_type(&self, var: VarId) -> TypeKey {
        let u = self.universe();
        let ty = self.var_type(var);
        match u.int_shape(ty) {
            Some((bits, _)) if bits < 32 => u.builtins().int32,
            _ => ty,
        }
    }

    // === Cursor ===

    /// Advance to the next instruction that is not a `nop`.
    pub fn next(&mut self) -> Option<usize> {
        while self.cursor < self.insts.len() {
            let idx = self.cursor;
            self.cursor += 1;
            if self.insts[idx].opcode != Opcode::Nop {
                self.current = Some(idx);
                return Some(idx);
            }
        }
        None
    }

    /// Index of the instruction `next` would return, without moving.
    pub fn peek_index(&self) -> Option<usize> {
        (self.cursor..self.insts.len()).find(|&i| self.insts[i].opcode != Opcode::Nop)
    }

    pub fn peek(&self) -> Option<&Instruction> {
        self.peek_index().map(|i| &self.insts[i])
    }

    /// Save the cursor for speculative lookahead.
    pub fn push_state(&mut self) {
        self.states.push((self.cursor, self.current));
    }

    /// Restore the most recently saved cursor.
    pub fn pop_state(&mut self) -> Result<()> {
        let (cursor, current) = self
            .states
            .pop()
            .ok_or_else(|| CompileError::invariant("pop_state without a saved state"))?;
        self.cursor = cursor;
        self.current = current;
        Ok(())
    }

    pub fn drop_state(&mut self) -> Result<()> {
        self.states
            .pop()
            .ok_or_else(|| CompileError::invariant("drop_state without a saved state"))?;
        Ok(())
    }

    // === Operand stack ===

    pub fn push_stack(&mut self, var: VarId) {
        self.stack.push(var);
    }

    pub fn pop_stack(&mut self) -> Result<VarId> {
        self.stack.pop().ok_or_else(|| CompileError::invariant("operand stack underflow"))
    }

    /// Value `depth` entries below the top.
    pub fn peek_stack(&self, depth: usize) -> Result<VarId> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|i| self.stack[i])
            .ok_or_else(|| CompileError::invariant("operand stack underflow"))
    }

    /// Pop `n` values, returned in push order.
    pub fn pop_multiple(&mut self, n: usize) -> Result<Vec<VarId>> {
        let at = self
            .stack
            .len()
            .checked_sub(n)
            .ok_or_else(|| CompileError::invariant("operand stack underflow"))?;
        Ok(self.stack.split_off(at))
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    // === Variables and pool ===

    fn site(&self) -> Option<Site> {
        cfg!(debug_assertions).then(|| Site {
            method: self.name.clone(),
            offset: self.current.map(|i| self.insts[i].offset),
        })
    }

    pub fn get_temp(&mut self, ty: TypeKey) -> VarId {
        let site = self.site();
        self.pool.get_temp(&mut self.unit.vars, ty, site)
    }

    pub fn allocate(&mut self, var: VarId, n: u32) -> Result<()> {
        self.pool.allocate(&mut self.unit.vars, var, n)
    }

    /// Consume one pending use without emitting a read.
    pub fn use_var(&mut self, var: VarId) -> Result<()> {
        self.pool.use_var(&mut self.unit.vars, var)
    }

    pub fn reserve(&mut self, var: VarId) -> Result<()> {
        self.pool.reserve(&mut self.unit.vars, var)
    }

    pub fn release(&mut self, var: VarId) -> Result<()> {
        self.pool.release(&mut self.unit.vars, var)
    }

    pub fn constant(&mut self, value: Value, ty: TypeKey) -> VarId {
        self.unit.constant(value, ty)
    }

    /// Integer constant of `ty`, wrapped to its width.
    pub fn int_constant(&mut self, ty: TypeKey, value: i128) -> Result<VarId> {
        let v = host::integer_value(self.universe(), ty, value).ok_or_else(|| {
            let name = &self.universe().ty(ty).name;
            CompileError::invariant(format!("{} has no integer constants", name))
        })?;
        Ok(self.constant(v, ty))
    }

    /// Address pseudo-variable for `ldloca`/`ldarga`/`ldflda`.
    pub fn address_of(&mut self, target: VarId) -> VarId {
        let ty = self.var_type(target);
        self.unit.vars.add(Variable::new(ty, VarKind::Address(target)))
    }

    /// Element address pseudo-variable for `ldelema`.
    pub fn element_address(&mut self, array: VarId, index: VarId, elem: TypeKey) -> VarId {
        self.unit.vars.add(Variable::new(elem, VarKind::Element { array, index }))
    }

    pub fn field_var(&mut self, field: retarget_bytecode::FieldKey) -> Result<VarId> {
        self.unit.field_var(field)
    }

    pub fn convert(&mut self, value: VarId, to: TypeKey) -> Result<VarId> {
        ConversionChain::convert(self, value, to)
    }

    /// Drop a stack value without reading it.
    pub fn discard(&mut self, var: VarId) -> Result<()> {
        match self.var(var).kind {
            VarKind::Address(_) => Ok(()),
            VarKind::Element { array, index } => {
                self.use_var(array)?;
                self.use_var(index)
            }
            _ => self.use_var(var),
        }
    }

    /// Value behind an address; plain values pass through.
    pub fn load_indirect(&mut self, var: VarId) -> Result<VarId> {
        match self.var(var).kind {
            VarKind::Address(target) => Ok(target),
            VarKind::Element { array, index } => self.array_get(array, index),
            _ => Ok(var),
        }
    }

    /// Store `value` through an address.
    pub fn store_indirect(&mut self, addr: VarId, value: VarId) -> Result<()> {
        match self.var(addr).kind {
            VarKind::Address(target) => {
                let value = self.convert(value, self.var_type(target))?;
                self.store(target, value)
            }
            VarKind::Element { array, index } => self.array_set(array, index, value),
            _ => Err(CompileError::unsupported("store through a value that is not an address")),
        }
    }

    fn array_elem(&self, array: VarId) -> Result<TypeKey> {
        let ty = self.var_type(array);
        self.universe()
            .array_elem(ty)
            .ok_or_else(|| {
                let name = &self.universe().ty(ty).name;
                CompileError::unsupported(format!("{} is not an array", name))
            })
    }

    /// Signature of `T[].Get(index)`.
    pub fn array_getter(&self, array: VarId) -> Result<(String, TypeKey)> {
        let elem = self.array_elem(array)?;
        let owner = self.type_ident(self.var_type(array));
        let index = ["SystemInt32".to_string()];
        Ok((host::signature(&owner, "Get", &index, &self.type_ident(elem)), elem))
    }

    pub fn array_get(&mut self, array: VarId, index: VarId) -> Result<VarId> {
        let (signature, elem) = self.array_getter(array)?;
        self.extern_temp(&signature, &[array, index], elem)
    }

    pub fn array_set(&mut self, array: VarId, index: VarId, value: VarId) -> Result<()> {
        let elem = self.array_elem(array)?;
        let value = self.convert(value, elem)?;
        let owner = self.type_ident(self.var_type(array));
        let params = ["SystemInt32".to_string(), self.type_ident(elem)];
        let signature = host::signature(&owner, "Set", &params, "SystemVoid");
        self.extern_call(&signature, &[array, index, value], None)
    }

    fn check(&self, var: VarId) -> Result<()> {
        let v = self.unit.vars.get(var);
        if v.is_address() {
            return Err(CompileError::invariant(format!("address {:?} used as a value", var)));
        }
        if v.pooled {
            let site =
                v.site.as_ref().map(|s| format!(" (handed out in {})", s)).unwrap_or_default();
            return Err(CompileError::invariant(format!(
                "pooled temporary {:?} referenced{}",
                var, site
            )));
        }
        Ok(())
    }

    fn check_write(&self, var: VarId) -> Result<()> {
        self.check(var)?;
        if self.unit.vars.get(var).is_constant() {
            return Err(CompileError::invariant(format!("write to constant {:?}", var)));
        }
        Ok(())
    }

    // === Stores and outputs ===

    /// `dst = src`, snapshotting any stacked reference to `dst` first.
    pub fn store(&mut self, dst: VarId, src: VarId) -> Result<()> {
        self.snapshot(|v| v == dst)?;
        self.copy(src, dst)
    }

    /// Replace stacked non-temporary slots matching `pred` with copies.
    pub fn snapshot(&mut self, pred: impl Fn(VarId) -> bool) -> Result<()> {
        let mut done: Vec<(VarId, VarId)> = Vec::new();
        for i in 0..self.stack.len() {
            let v = self.stack[i];
            let var = self.unit.vars.get(v);
            if !pred(v) || var.is_temporary() || var.is_constant() {
                continue;
            }
            if let Some(&(_, copy)) = done.iter().find(|(orig, _)| *orig == v) {
                self.allocate(copy, 1)?;
                self.stack[i] = copy;
                continue;
            }
            let copy = self.get_temp(self.var_type(v));
            self.copy(v, copy)?;
            trace!("snapshot {:?} -> {:?}", v, copy);
            self.stack[i] = copy;
            done.push((v, copy));
        }
        Ok(())
    }

    /// Snapshot stacked field slots before an operation that may write
    /// them (calls into the compiled type).
    pub fn snapshot_fields(&mut self) -> Result<()> {
        let fields: Vec<VarId> = self
            .stack
            .iter()
            .copied()
            .filter(|&v| matches!(self.unit.vars.get(v).kind, VarKind::Field(_)))
            .collect();
        self.snapshot(|v| fields.contains(&v))
    }

    /// Destination for a value of `ty`. A directly following `stloc` or
    /// `starg` of the same type is fused when it is not a branch target
    /// and its slot is not on the stack.
    pub fn out_var(&mut self, ty: TypeKey) -> Result<OutVar> {
        if let Some(idx) = self.peek_index() {
            let inst = &self.insts[idx];
            let slot = match (&inst.operand, inst.opcode) {
                (
                    Operand::Local(n),
                    Opcode::Stloc0
                    | Opcode::Stloc1
                    | Opcode::Stloc2
                    | Opcode::Stloc3
                    | Opcode::StlocS
                    | Opcode::Stloc,
                ) => self.locals.get(usize::from(*n)).copied(),
                (Operand::Arg(n), Opcode::StargS | Opcode::Starg) => {
                    self.args.get(usize::from(*n)).copied()
                }
                _ => None,
            };
            if let Some(slot) = slot {
                let fusable = self.var_type(slot) == ty
                    && !self.targets.contains(&inst.offset)
                    && !self.stack.contains(&slot)
                    && !self.is_this(slot);
                if fusable {
                    trace!("fuse store into {:?} at IL_{:04x}", slot, inst.offset);
                    self.cursor = idx + 1;
                    self.current = Some(idx);
                    return Ok(OutVar { var: slot, fused: true });
                }
            }
        }
        Ok(OutVar { var: self.get_temp(ty), fused: false })
    }

    /// Push an unfused output.
    pub fn complete(&mut self, out: OutVar) {
        if !out.fused {
            self.stack.push(out.var);
        }
    }

    /// Call a host operation and leave its result on the stack.
    pub fn extern_result(&mut self, signature: &str, inputs: &[VarId], ty: TypeKey) -> Result<()> {
        let out = self.out_var(ty)?;
        self.extern_call(signature, inputs, Some(out.var))?;
        self.complete(out);
        Ok(())
    }

    /// Call a host operation into a fresh temporary.
    pub fn extern_temp(&mut self, signature: &str, inputs: &[VarId], ty: TypeKey) -> Result<VarId> {
        let out = self.get_temp(ty);
        self.extern_call(signature, inputs, Some(out))?;
        Ok(out)
    }

    // === Labels and branches ===

    pub fn label_for(&mut self, offset: u32) -> LabelId {
        let code = &mut self.unit.code;
        *self.labels.entry(offset).or_insert_with(|| code.new_label())
    }

    /// Merge slots of `target`, typed by the stack that first reaches it.
    /// `this` is carried through as itself.
    fn merge_vars(&mut self, target: u32) -> Result<Vec<VarId>> {
        if let Some(merges) = self.merges.get(&target) {
            if merges.len() != self.stack.len() {
                return Err(CompileError::invariant(format!(
                    "stack depth {} does not match {} at IL_{:04x}",
                    self.stack.len(),
                    merges.len(),
                    target
                )));
            }
            return Ok(merges.clone());
        }
        let this = self.this_var();
        let mut merges = Vec::with_capacity(self.stack.len());
        for i in 0..self.stack.len() {
            let v = self.stack[i];
            if v == this {
                merges.push(this);
                continue;
            }
            let temp = self.get_temp(self.stack_type(v));
            self.reserve(temp)?;
            merges.push(temp);
        }
        self.merges.insert(target, merges.clone());
        Ok(merges)
    }

    /// Move the stacked values into the merge slots of `target`. A
    /// conditional transfer keeps the stack for the fall-through path.
    fn flow_into(&mut self, target: u32, conditional: bool) -> Result<()> {
        let merges = self.merge_vars(target)?;
        let values = self.stack.clone();
        let this = self.this_var();
        for (&v, &m) in values.iter().zip(&merges) {
            if v == this || m == this {
                if v != m {
                    return Err(CompileError::unsupported(format!(
                        "`this` meets another value at IL_{:04x}",
                        target
                    )));
                }
                continue;
            }
            if conditional {
                self.allocate(v, 1)?;
            }
            let value = self.convert(v, self.var_type(m))?;
            self.copy(value, m)?;
        }
        if !conditional {
            self.stack.clear();
        }
        Ok(())
    }

    /// Prepare a branch to `target`, copying stacked values into the
    /// target's merge variables.
    pub fn branch_to(&mut self, target: u32, conditional: bool) -> Result<LabelId> {
        let target = self.landing(target);
        let label = self.label_for(target);
        if self.stack.is_empty() {
            return Ok(label);
        }
        if target <= self.current_offset() {
            return Err(CompileError::unsupported(format!(
                "backward branch to IL_{:04x} with {} value(s) on the stack",
                target,
                self.stack.len()
            )));
        }
        self.flow_into(target, conditional)?;
        Ok(label)
    }

    /// Place the label of a branch target, joining the incoming stacks.
    fn arrive(&mut self, offset: u32) -> Result<()> {
        let label = self.label_for(offset);
        if !self.flow_ended && !self.stack.is_empty() {
            self.flow_into(offset, false)?;
        }
        self.apply_label(label);
        if let Some(merges) = self.merges.remove(&offset) {
            for &m in &merges {
                self.release(m)?;
            }
            self.stack = merges;
        }
        Ok(())
    }

    /// Bookkeeping before translating the instruction at `idx`.
    fn enter(&mut self, idx: usize) -> Result<()> {
        let offset = self.insts[idx].offset;
        if self.flow_ended && !self.stack.is_empty() {
            return Err(CompileError::invariant(format!(
                "{} value(s) left on the stack after an unconditional transfer",
                self.stack.len()
            )));
        }
        if self.targets.contains(&offset) {
            self.arrive(offset)?;
        }
        self.flow_ended = false;
        if self.unit.options.debug_map {
            self.mark_source(offset);
        }
        Ok(())
    }

    /// Translate from the cursor to the end of the body.
    pub fn translate(&mut self, registry: &Registry) -> Result<()> {
        let insts = Rc::clone(&self.insts);
        while let Some(idx) = self.next() {
            let inst = &insts[idx];
            self.enter(idx).map_err(|e| e.at(&self.name, Some(inst.offset)))?;
            registry.dispatch(self, inst).map_err(|e| e.at(&self.name, Some(inst.offset)))?;
            let last = self.current.unwrap_or(idx);
            self.flow_ended = insts[last].opcode.ends_flow();
        }
        if self.targets.contains(&END_OF_BODY) {
            self.arrive(END_OF_BODY).map_err(|e| e.at(&self.name, None))?;
        }
        self.finish().map_err(|e| e.at(&self.name, None))
    }

    /// Structural checks at method exit.
    pub fn finish(&self) -> Result<()> {
        if !self.stack.is_empty() {
            return Err(CompileError::invariant(format!(
                "operand stack holds {} value(s) at method exit",
                self.stack.len()
            )));
        }
        if !self.states.is_empty() {
            return Err(CompileError::invariant(format!(
                "{} cursor state(s) still saved",
                self.states.len()
            )));
        }
        if let Some(&leak) = self.pool.outstanding(&self.unit.vars).first() {
            let var = self.unit.vars.get(leak);
            let site =
                var.site.as_ref().map(|s| format!(", handed out in {}", s)).unwrap_or_default();
            let state = if var.reserved { "still reserved" } else { "has pending uses" };
            return Err(CompileError::invariant(format!("temporary {:?} {}{}", leak, state, site)));
        }
        Ok(())
    }
}

impl InstructionSink for MethodContext<'_, '_> {
    fn push(&mut self, var: VarId) -> Result<()> {
        self.check(var)?;
        self.use_var(var)?;
        self.unit.code.op(Op::Push(var));
        Ok(())
    }

    fn pop(&mut self) {
        self.unit.code.op(Op::Pop);
    }

    fn copy(&mut self, src: VarId, dst: VarId) -> Result<()> {
        self.check(src)?;
        self.check_write(dst)?;
        if src == dst {
            return self.use_var(src);
        }
        self.use_var(src)?;
        self.unit.code.op(Op::Push(src));
        self.unit.code.op(Op::Push(dst));
        self.unit.code.op(Op::Copy);
        Ok(())
    }

    fn extern_call(
        &mut self,
        signature: &str,
        inputs: &[VarId],
        output: Option<VarId>,
    ) -> Result<()> {
        for &input in inputs {
            self.check(input)?;
        }
        if let Some(out) = output {
            self.check_write(out)?;
        }
        for &input in inputs {
            self.use_var(input)?;
            self.unit.code.op(Op::Push(input));
        }
        if let Some(out) = output {
            self.unit.code.op(Op::Push(out));
        }
        let sig = self.unit.signature(signature);
        self.unit.code.op(Op::Extern(sig));
        Ok(())
    }

    fn jump(&mut self, label: LabelId) {
        self.unit.code.op(Op::Jump(label));
    }

    fn jump_if_false(&mut self, cond: VarId, label: LabelId) -> Result<()> {
        self.push(cond)?;
        self.unit.code.op(Op::JumpIfFalse(label));
        Ok(())
    }

    fn jump_indirect(&mut self, var: VarId) -> Result<()> {
        self.check(var)?;
        self.unit.code.op(Op::JumpIndirect(var));
        Ok(())
    }

    fn new_label(&mut self) -> LabelId {
        self.unit.code.new_label()
    }

    fn apply_label(&mut self, label: LabelId) {
        self.unit.code.op(Op::Mark(label));
    }

    fn annotate(&mut self, text: &str) {
        let string = self.universe().builtins().string;
        let var = self.unit.constant(Value::String(text.to_string()), string);
        self.unit.code.op(Op::Annotation(var));
    }

    fn mark_source(&mut self, offset: u32) {
        self.unit.code.op(Op::Source { method: self.method_id, offset });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(offset: u32, opcode: Opcode) -> Instruction {
        Instruction { offset, opcode, operand: Operand::None }
    }

    #[test]
    fn test_landing_skips_nops() {
        let insts = [
            inst(0, Opcode::Ldarg0),
            inst(1, Opcode::Nop),
            inst(2, Opcode::Nop),
            inst(3, Opcode::Pop),
            inst(4, Opcode::Nop),
        ];
        assert_eq!(landing_offset(&insts, 0), 0);
        assert_eq!(landing_offset(&insts, 1), 3);
        assert_eq!(landing_offset(&insts, 3), 3);
        assert_eq!(landing_offset(&insts, 4), END_OF_BODY);
        // not an instruction boundary
        assert_eq!(landing_offset(&insts, 7), 7);
    }
}
