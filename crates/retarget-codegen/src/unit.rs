//! Per-type compilation state shared by every method of one program.

use std::collections::VecDeque;

use indexmap::IndexMap;
use log::debug;
use retarget_bytecode::{FieldKey, MethodKey, TypeKey, Universe};
use retarget_vm::{SyncMode, Value, HALT_ADDRESS};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::emit::{CodeBuffer, LabelId};
use crate::error::{CompileError, Result};
use crate::host;
use crate::options::CompilerOptions;
use crate::symbols::SymbolTable;
use crate::variable::{VarId, VarKind, VarTable, Variable};

pub(crate) fn sync_mode(mode: retarget_bytecode::SyncMode) -> SyncMode {
    match mode {
        retarget_bytecode::SyncMode::None => SyncMode::None,
        retarget_bytecode::SyncMode::Linear => SyncMode::Linear,
        retarget_bytecode::SyncMode::Smooth => SyncMode::Smooth,
    }
}

pub struct TypeUnit<'u> {
    pub universe: &'u Universe,
    pub options: &'u CompilerOptions,
    pub ty: TypeKey,
    pub symbols: SymbolTable,
    pub vars: VarTable,
    pub code: CodeBuffer,
    method_names: Vec<String>,
    field_vars: IndexMap<FieldKey, VarId>,
    method_labels: FxHashMap<MethodKey, LabelId>,
    this_var: VarId,
    return_jump: VarId,
    halt: VarId,
    worklist: VecDeque<MethodKey>,
    queued: FxHashSet<MethodKey>,
    calls: Vec<(MethodKey, MethodKey)>,
    remote: FxHashMap<TypeKey, SymbolTable>,
}

impl<'u> TypeUnit<'u> {
    pub fn new(
        universe: &'u Universe,
        options: &'u CompilerOptions,
        ty: TypeKey,
        symbols: SymbolTable,
    ) -> Self {
        let b = universe.builtins();
        let mut vars = VarTable::new();
        let mut this = Variable::named(ty, VarKind::This, "__this");
        this.value = Some(Value::This);
        let this_var = vars.add(this);
        let return_jump = vars.named("__return_jump", b.uint32, VarKind::ReturnJump);
        let halt = vars.constant(Value::Address(HALT_ADDRESS), b.uint32);
        Self {
            universe,
            options,
            ty,
            symbols,
            vars,
            code: CodeBuffer::new(),
            method_names: Vec::new(),
            field_vars: IndexMap::new(),
            method_labels: FxHashMap::default(),
            this_var,
            return_jump,
            halt,
            worklist: VecDeque::new(),
            queued: FxHashSet::default(),
            calls: Vec::new(),
            remote: FxHashMap::default(),
        }
    }

    #[inline]
    pub fn this_var(&self) -> VarId {
        self.this_var
    }

    #[inline]
    pub fn return_jump(&self) -> VarId {
        self.return_jump
    }

    /// Constant holding the address that stops the machine.
    #[inline]
    pub fn halt(&self) -> VarId {
        self.halt
    }

    pub fn method_names(&self) -> &[String] {
        &self.method_names
    }

    pub fn method_id(&mut self, name: &str) -> u32 {
        if let Some(idx) = self.method_names.iter().position(|m| m == name) {
            return idx as u32;
        }
        self.method_names.push(name.to_string());
        self.method_names.len() as u32 - 1
    }

    // === Storage ===

    /// Heap slot of a field of the compiled type's chain.
    pub fn field_var(&mut self, field: FieldKey) -> Result<VarId> {
        if let Some(&id) = self.field_vars.get(&field) {
            return Ok(id);
        }
        let symbol = self.symbols.field(self.universe, field)?;
        let f = self.universe.field(field);
        let mut var = Variable::named(f.ty, VarKind::Field(field), &symbol.emitted);
        var.value = Some(host::default_value(self.universe, f.ty));
        var.export = symbol.flags.export;
        var.sync = sync_mode(symbol.flags.sync);
        let id = self.vars.add(var);
        self.field_vars.insert(field, id);
        Ok(id)
    }

    /// Declare a field slot up front, with an optional initial value.
    pub fn declare_field(&mut self, field: FieldKey, initial: Option<Value>) -> Result<VarId> {
        let id = self.field_var(field)?;
        if initial.is_some() {
            self.vars.get_mut(id).value = initial;
        }
        Ok(id)
    }

    pub fn field_vars(&self) -> impl Iterator<Item = (FieldKey, VarId)> + '_ {
        self.field_vars.iter().map(|(&f, &v)| (f, v))
    }

    pub fn param_var(&mut self, name: &str, ty: TypeKey) -> VarId {
        self.vars.named(name, ty, VarKind::Parameter)
    }

    pub fn return_var(&mut self, name: &str, ty: TypeKey) -> VarId {
        self.vars.named(name, ty, VarKind::ReturnValue)
    }

    pub fn constant(&mut self, value: Value, ty: TypeKey) -> VarId {
        self.vars.constant(value, ty)
    }

    /// String constant holding an extern signature.
    pub fn signature(&mut self, signature: &str) -> VarId {
        let string = self.universe.builtins().string;
        self.vars.constant(Value::String(signature.to_string()), string)
    }

    /// Fresh constant whose value becomes the address of `label`.
    pub fn label_address(&mut self, label: LabelId) -> VarId {
        let ty = self.universe.builtins().uint32;
        self.vars.add(Variable::new(ty, VarKind::LabelAddress(label)))
    }

    // === Methods ===

    pub fn method_label(&mut self, method: MethodKey) -> LabelId {
        if let Some(&label) = self.method_labels.get(&method) {
            return label;
        }
        let label = self.code.new_label();
        self.method_labels.insert(method, label);
        label
    }

    /// Queue a body for translation (once).
    pub fn require(&mut self, method: MethodKey) {
        if self.queued.insert(method) {
            debug!("queue {}", self.universe.method_display(method));
            self.worklist.push_back(method);
        }
    }

    pub fn next_job(&mut self) -> Option<MethodKey> {
        self.worklist.pop_front()
    }

    pub fn record_call(&mut self, caller: MethodKey, callee: MethodKey) {
        if !self.calls.contains(&(caller, callee)) {
            self.calls.push((caller, callee));
        }
    }

    /// Reject call cycles; parameter slots are shared, so re-entry would
    /// clobber the caller's arguments.
    pub fn check_recursion(&self) -> Result<()> {
        let mut edges: FxHashMap<MethodKey, Vec<MethodKey>> = FxHashMap::default();
        for &(from, to) in &self.calls {
            edges.entry(from).or_default().push(to);
        }
        let mut done = FxHashSet::default();
        for &(start, _) in &self.calls {
            let mut path = Vec::new();
            self.visit(start, &edges, &mut path, &mut done)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        node: MethodKey,
        edges: &FxHashMap<MethodKey, Vec<MethodKey>>,
        path: &mut Vec<MethodKey>,
        done: &mut FxHashSet<MethodKey>,
    ) -> Result<()> {
        if done.contains(&node) {
            return Ok(());
        }
        if let Some(pos) = path.iter().position(|&m| m == node) {
            let cycle: Vec<String> =
                path[pos..].iter().map(|&m| self.universe.method_display(m)).collect();
            return Err(CompileError::unsupported(format!(
                "recursive call cycle: {}",
                cycle.join(" -> ")
            )));
        }
        path.push(node);
        for &next in edges.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
            self.visit(next, edges, path, done)?;
        }
        path.pop();
        done.insert(node);
        Ok(())
    }

    /// Symbol table of another compiled behaviour type.
    pub fn remote_symbols(&mut self, ty: TypeKey) -> Result<&SymbolTable> {
        if ty == self.ty {
            return Ok(&self.symbols);
        }
        if !self.remote.contains_key(&ty) {
            let table = SymbolTable::build(self.universe, ty, self.options)?;
            self.remote.insert(ty, table);
        }
        self.remote
            .get(&ty)
            .ok_or_else(|| CompileError::invariant("remote symbol table vanished"))
    }
}
