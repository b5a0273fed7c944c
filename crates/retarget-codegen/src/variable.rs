//! Variables: handles to heap storage in the emitted program.
//!
//! Temporaries, constants and locals have deferred names; they are named
//! during assembly, and only if the emitted code references them.

use std::fmt;

use retarget_bytecode::{FieldKey, TypeKey};
use retarget_vm::{SyncMode, Value, ValueKey};
use rustc_hash::FxHashMap;

use crate::emit::LabelId;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u32);

impl VarId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    This,
    Field(FieldKey),
    /// Parameter slot of a method (shared by every caller).
    Parameter,
    ReturnValue,
    /// Slot the return protocol copies return addresses into.
    ReturnJump,
    Local,
    Constant,
    /// Constant holding the address of a label, fixed during assembly.
    LabelAddress(LabelId),
    Temporary,
    /// Address of another variable (`ldloca`, `ldflda`); never emitted.
    Address(VarId),
    /// Address of an array element (`ldelema`); never emitted.
    Element { array: VarId, index: VarId },
}

/// Where a temporary was handed out, for invariant diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub method: String,
    pub offset: Option<u32>,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{} at IL_{:04x}", self.method, offset),
            None => write!(f, "{}", self.method),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub ty: TypeKey,
    pub kind: VarKind,
    pub name: Option<String>,
    /// Compile-time value for constants, initial value for other slots.
    pub value: Option<Value>,
    pub export: bool,
    pub sync: SyncMode,
    // pool accounting, temporaries only
    pub uses: u32,
    pub reserved: bool,
    pub pooled: bool,
    pub site: Option<Site>,
}

impl Variable {
    pub fn new(ty: TypeKey, kind: VarKind) -> Self {
        Self {
            ty,
            kind,
            name: None,
            value: None,
            export: false,
            sync: SyncMode::None,
            uses: 0,
            reserved: false,
            pooled: false,
            site: None,
        }
    }

    pub fn named(ty: TypeKey, kind: VarKind, name: &str) -> Self {
        Self { name: Some(name.to_string()), ..Self::new(ty, kind) }
    }

    #[inline]
    pub fn is_temporary(&self) -> bool {
        self.kind == VarKind::Temporary
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, VarKind::Constant | VarKind::LabelAddress(_))
    }

    /// Pseudo variables that stand for an address and have no slot.
    #[inline]
    pub fn is_address(&self) -> bool {
        matches!(self.kind, VarKind::Address(_) | VarKind::Element { .. })
    }
}

/// Arena of every variable in one compiled program.
#[derive(Debug, Default)]
pub struct VarTable {
    vars: Vec<Variable>,
    constants: FxHashMap<(TypeKey, ValueKey), VarId>,
    named: FxHashMap<String, VarId>,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, var: Variable) -> VarId {
        if let Some(name) = &var.name {
            if !var.is_temporary() {
                self.named.insert(name.clone(), VarId(self.vars.len() as u32));
            }
        }
        self.vars.push(var);
        VarId(self.vars.len() as u32 - 1)
    }

    #[inline]
    pub fn get(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.index()]
    }

    #[inline]
    pub fn ty(&self, id: VarId) -> TypeKey {
        self.vars[id.index()].ty
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars.iter().enumerate().map(|(i, v)| (VarId(i as u32), v))
    }

    /// Constant of `ty`, shared with every other use of the same value.
    pub fn constant(&mut self, value: Value, ty: TypeKey) -> VarId {
        let key = (ty, value.key());
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let mut var = Variable::new(ty, VarKind::Constant);
        var.value = Some(value);
        let id = self.add(var);
        self.constants.insert(key, id);
        id
    }

    /// Variable with a fixed name, created on first request.
    pub fn named(&mut self, name: &str, ty: TypeKey, kind: VarKind) -> VarId {
        if let Some(&id) = self.named.get(name) {
            return id;
        }
        self.add(Variable::named(ty, kind, name))
    }

    pub fn find(&self, name: &str) -> Option<VarId> {
        self.named.get(name).copied()
    }

    /// Compile-time value of a constant.
    pub fn constant_value(&self, id: VarId) -> Option<&Value> {
        let var = self.get(id);
        match var.kind {
            VarKind::Constant => var.value.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use retarget_bytecode::Universe;

    #[test]
    fn test_constants_dedup_by_value_and_type() {
        let u = Universe::new();
        let b = u.builtins();
        let mut vars = VarTable::new();
        let a = vars.constant(Value::Int32(1), b.int32);
        assert_eq!(vars.constant(Value::Int32(1), b.int32), a);
        assert_ne!(vars.constant(Value::UInt32(1), b.uint32), a);
        assert_ne!(vars.constant(Value::Int32(2), b.int32), a);
        assert_eq!(vars.constant_value(a), Some(&Value::Int32(1)));
    }

    #[test]
    fn test_named_vars_are_shared() {
        let u = Universe::new();
        let mut vars = VarTable::new();
        let p = vars.named("__Add_a", u.builtins().int32, VarKind::Parameter);
        assert_eq!(vars.named("__Add_a", u.builtins().int32, VarKind::Parameter), p);
        assert_eq!(vars.find("__Add_a"), Some(p));
    }
}
