//! Symbol/Type Table: collision-free emitted names for one compiled type.
//!
//! The table is built once per type before any method is translated, by
//! walking the base classes root-first, then every declared interface,
//! then the type's own members. The host heap is flat, so every member of
//! the whole chain needs a distinct emitted name:
//!
//! - unique members keep their name and fail the build on any collision;
//! - ordinary members keep the bare name on first use and get
//!   `__{n}_{name}` afterwards;
//! - family members (virtual, interface, or flagged) share the emitted name
//!   of the earliest declaration with the same name and parameter shape.
//!   Callers always go through the shared name, which fakes override
//!   dispatch on a machine without virtual calls.

use indexmap::IndexMap;
use log::debug;
use retarget_bytecode::{FieldKey, MemberFlags, MethodKey, TypeKey, TypeKind, Universe};
use rustc_hash::FxHashMap;

use crate::error::{CompileError, Result};
use crate::options::CompilerOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Member {
    Field(FieldKey),
    Method(MethodKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

#[derive(Debug)]
pub struct Symbol {
    pub member: Member,
    pub declaring: TypeKey,
    pub name: String,
    pub emitted: String,
    pub flags: MemberFlags,
    /// Emitted parameter slot names (methods only).
    pub params: Vec<String>,
    /// Emitted return slot name, `None` for fields and void methods.
    pub ret: Option<String>,
    /// Original declaration this member overrides.
    pub overrides: Option<SymbolId>,
}

impl Symbol {
    pub fn method(&self) -> Option<MethodKey> {
        match self.member {
            Member::Method(m) => Some(m),
            Member::Field(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct SymbolTable {
    owner: TypeKey,
    symbols: Vec<Symbol>,
    by_member: FxHashMap<Member, SymbolId>,
    /// First symbol registered under each emitted name.
    by_emitted: IndexMap<String, SymbolId>,
    counters: FxHashMap<String, u32>,
}

impl SymbolTable {
    pub fn build(universe: &Universe, ty: TypeKey, options: &CompilerOptions) -> Result<Self> {
        let mut table = Self {
            owner: ty,
            symbols: Vec::new(),
            by_member: FxHashMap::default(),
            by_emitted: IndexMap::new(),
            counters: FxHashMap::default(),
        };

        let mut classes: Vec<TypeKey> =
            universe.ancestors(ty).filter(|&t| universe.is_user_type(t)).collect();
        classes.reverse();

        let mut interfaces = Vec::new();
        for &t in classes.iter().chain(std::iter::once(&ty)) {
            collect_interfaces(universe, t, &mut interfaces);
        }

        for &t in classes.iter().chain(interfaces.iter()).chain(std::iter::once(&ty)) {
            table.add_type(universe, t, options)?;
        }
        debug!(
            "symbols for {}: {} members, {} emitted names",
            universe.ty(ty).name,
            table.symbols.len(),
            table.by_emitted.len()
        );
        Ok(table)
    }

    fn add_type(
        &mut self,
        universe: &Universe,
        ty: TypeKey,
        options: &CompilerOptions,
    ) -> Result<()> {
        let def = universe.ty(ty);
        for &field in &def.fields {
            let f = universe.field(field);
            if f.is_static {
                continue;
            }
            let emitted = self.claim_name(universe, Member::Field(field), &f.name, f.flags.unique)?;
            self.push(Symbol {
                member: Member::Field(field),
                declaring: ty,
                name: f.name.clone(),
                emitted,
                flags: f.flags,
                params: Vec::new(),
                ret: None,
                overrides: None,
            });
        }

        for &method in &def.methods {
            let m = universe.method(method);
            if m.is_ctor() || m.name == ".cctor" {
                continue;
            }
            let family = m.flags.family || m.is_virtual || universe.kind(ty) == TypeKind::Interface;
            // implicit interface implementations join the interface's family
            let prior = self.find_family(universe, method).filter(|&p| {
                family || universe.kind(self.get(p).declaring) == TypeKind::Interface
            });
            if let Some(prior) = prior {
                let original = self.get(prior).overrides.unwrap_or(prior);
                let base = self.get(prior);
                let mut flags = m.flags;
                flags.export |= base.flags.export;
                flags.family = true;
                debug!("{} overrides {}", universe.method_display(method), base.emitted);
                let symbol = Symbol {
                    member: Member::Method(method),
                    declaring: ty,
                    name: m.name.clone(),
                    emitted: base.emitted.clone(),
                    flags,
                    params: base.params.clone(),
                    ret: base.ret.clone(),
                    overrides: Some(original),
                };
                self.push(symbol);
                continue;
            }

            let event = if m.flags.export { options.event_name(&m.name) } else { None };
            let name = event.unwrap_or(m.name.as_str());
            let unique = m.flags.unique || event.is_some();
            let emitted = self.claim_name(universe, Member::Method(method), name, unique)?;
            let params = m.params.iter().map(|p| format!("__{}_{}", emitted, p.name)).collect();
            let returns = universe.kind(m.ret) != TypeKind::Void;
            let ret = returns.then(|| format!("__{}__ret", emitted));
            let mut flags = m.flags;
            flags.family |= family;
            self.push(Symbol {
                member: Member::Method(method),
                declaring: ty,
                name: m.name.clone(),
                emitted,
                flags,
                params,
                ret,
                overrides: None,
            });
        }
        Ok(())
    }

    fn claim_name(
        &mut self,
        universe: &Universe,
        member: Member,
        name: &str,
        unique: bool,
    ) -> Result<String> {
        if unique {
            if let Some(&other) = self.by_emitted.get(name) {
                return Err(CompileError::NamingConflict {
                    name: name.to_string(),
                    first: member_display(universe, self.get(other).member),
                    second: member_display(universe, member),
                });
            }
            return Ok(name.to_string());
        }
        let counter = self.counters.entry(name.to_string()).or_insert(0);
        loop {
            let candidate =
                if *counter == 0 { name.to_string() } else { format!("__{}_{}", counter, name) };
            *counter += 1;
            if !self.by_emitted.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }

    /// Latest method with the same name, staticness and parameter types.
    fn find_family(&self, universe: &Universe, method: MethodKey) -> Option<SymbolId> {
        let m = universe.method(method);
        self.symbols.iter().enumerate().rev().find_map(|(i, s)| {
            let other = universe.method(s.method()?);
            let same = other.name == m.name
                && other.is_static == m.is_static
                && other.params.len() == m.params.len()
                && other
                    .params
                    .iter()
                    .zip(&m.params)
                    .all(|(a, b)| a.ty == b.ty && a.by_ref == b.by_ref);
            same.then_some(SymbolId(i as u32))
        })
    }

    fn push(&mut self, symbol: Symbol) {
        let id = SymbolId(self.symbols.len() as u32);
        self.by_member.insert(symbol.member, id);
        self.by_emitted.entry(symbol.emitted.clone()).or_insert(id);
        self.symbols.push(symbol);
    }

    // === Queries ===

    pub fn owner(&self) -> TypeKey {
        self.owner
    }

    #[inline]
    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn contains(&self, member: Member) -> bool {
        self.by_member.contains_key(&member)
    }

    /// Symbol of a member, or an error if the member has no storage or
    /// entry point on the host.
    pub fn lookup(&self, universe: &Universe, member: Member) -> Result<&Symbol> {
        match self.by_member.get(&member) {
            Some(&id) => Ok(self.get(id)),
            None => Err(CompileError::unsupported(format!(
                "{} is not representable in {}",
                member_display(universe, member),
                universe.ty(self.owner).name
            ))),
        }
    }

    pub fn field(&self, universe: &Universe, field: FieldKey) -> Result<&Symbol> {
        self.lookup(universe, Member::Field(field))
    }

    pub fn method(&self, universe: &Universe, method: MethodKey) -> Result<&Symbol> {
        self.lookup(universe, Member::Method(method))
    }

    pub fn by_emitted(&self, emitted: &str) -> Option<&Symbol> {
        self.by_emitted.get(emitted).map(|&id| self.get(id))
    }

    /// Most-derived body registered under an emitted name.
    pub fn dispatch_target(&self, universe: &Universe, emitted: &str) -> Option<MethodKey> {
        self.symbols
            .iter()
            .rev()
            .filter(|s| s.emitted == emitted)
            .filter_map(Symbol::method)
            .find(|&m| universe.method(m).body.is_some())
    }

    /// One symbol per exported method name, in declaration order.
    pub fn exported_methods(&self) -> impl Iterator<Item = &Symbol> {
        self.by_emitted.values().map(|&id| self.get(id)).filter(|s| {
            s.method().is_some()
                && self.symbols.iter().any(|o| o.emitted == s.emitted && o.flags.export)
        })
    }
}

fn collect_interfaces(universe: &Universe, ty: TypeKey, out: &mut Vec<TypeKey>) {
    for &iface in &universe.ty(ty).interfaces {
        if !universe.is_user_type(iface) || out.contains(&iface) {
            continue;
        }
        collect_interfaces(universe, iface, out);
        out.push(iface);
    }
}

pub fn member_display(universe: &Universe, member: Member) -> String {
    match member {
        Member::Field(f) => universe.field_display(f),
        Member::Method(m) => universe.method_display(m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use retarget_bytecode::{FieldDef, MethodDef, TypeDef};

    fn emitted(table: &SymbolTable, u: &Universe, member: Member) -> String {
        table.lookup(u, member).unwrap().emitted.clone()
    }

    #[test]
    fn test_ordinary_names_are_disambiguated() {
        let mut u = Universe::new();
        let int = u.builtins().int32;
        let base = u.add_type(TypeDef::user("Game.Base", TypeKind::Class));
        let derived = u.add_type(TypeDef::user("Game.Derived", TypeKind::Class).with_base(base));
        let a = u.add_field(base, FieldDef::new("count", int));
        let b = u.add_field(derived, FieldDef::new("count", int));

        let table = SymbolTable::build(&u, derived, &CompilerOptions::default()).unwrap();
        assert_eq!(emitted(&table, &u, Member::Field(a)), "count");
        assert_eq!(emitted(&table, &u, Member::Field(b)), "__1_count");
    }

    #[test]
    fn test_unique_names_conflict() {
        let mut u = Universe::new();
        let int = u.builtins().int32;
        let base = u.add_type(TypeDef::user("Game.Base", TypeKind::Class));
        let derived = u.add_type(TypeDef::user("Game.Derived", TypeKind::Class).with_base(base));
        let unique = MemberFlags::default().with_unique();
        u.add_field(base, FieldDef::new("count", int).with_flags(unique));
        u.add_field(derived, FieldDef::new("count", int).with_flags(unique));

        let err = SymbolTable::build(&u, derived, &CompilerOptions::default()).unwrap_err();
        assert_eq!(
            err,
            CompileError::NamingConflict {
                name: "count".into(),
                first: "Game.Base::count".into(),
                second: "Game.Derived::count".into(),
            }
        );
    }

    #[test]
    fn test_family_shares_names() {
        let mut u = Universe::new();
        let b = *u.builtins();
        let base = u.add_type(TypeDef::user("Game.Base", TypeKind::Class));
        let derived = u.add_type(TypeDef::user("Game.Derived", TypeKind::Class).with_base(base));
        let hit = MethodDef::new("Hit", b.int32).with_virtual().with_param("damage", b.int32);
        let base_hit = u.add_method(base, hit.clone().with_body(vec![0x2A], vec![]));
        let derived_hit = u.add_method(derived, hit.with_body(vec![0x2A], vec![]));
        // same name, different shape: ordinary disambiguation
        let other = u.add_method(derived, MethodDef::new("Hit", b.void).with_virtual());

        let table = SymbolTable::build(&u, derived, &CompilerOptions::default()).unwrap();
        let base_sym = table.method(&u, base_hit).unwrap();
        let derived_sym = table.method(&u, derived_hit).unwrap();
        assert_eq!(base_sym.emitted, "Hit");
        assert_eq!(derived_sym.emitted, "Hit");
        assert_eq!(derived_sym.params, vec!["__Hit_damage".to_string()]);
        assert_eq!(derived_sym.ret.as_deref(), Some("__Hit__ret"));
        assert_eq!(derived_sym.overrides, Some(SymbolId(0)));
        assert_eq!(table.method(&u, other).unwrap().emitted, "__1_Hit");
        assert_eq!(table.dispatch_target(&u, "Hit"), Some(derived_hit));
    }

    #[test]
    fn test_interface_methods_are_family() {
        let mut u = Universe::new();
        let void = u.builtins().void;
        let iface = u.add_type(TypeDef::user("Game.IInteractable", TypeKind::Interface));
        u.add_method(iface, MethodDef::new("Use", void));
        let door = u.add_type(TypeDef::user("Game.Door", TypeKind::Class).with_interface(iface));
        let use_ = u.add_method(door, MethodDef::new("Use", void).with_body(vec![0x2A], vec![]));

        let table = SymbolTable::build(&u, door, &CompilerOptions::default()).unwrap();
        assert_eq!(table.method(&u, use_).unwrap().emitted, "Use");
        assert!(table.method(&u, use_).unwrap().overrides.is_some());
    }

    #[test]
    fn test_exported_event_names() {
        let mut u = Universe::new();
        let void = u.builtins().void;
        let door = u.add_type(TypeDef::user("Game.Door", TypeKind::Class));
        let start =
            u.add_method(door, MethodDef::new("Start", void).with_flags(MemberFlags::exported()));
        let table = SymbolTable::build(&u, door, &CompilerOptions::default()).unwrap();
        assert_eq!(table.method(&u, start).unwrap().emitted, "_start");
        assert_eq!(table.exported_methods().count(), 1);
    }

    #[test]
    fn test_missing_member_is_unsupported() {
        let mut u = Universe::new();
        let int = u.builtins().int32;
        let door = u.add_type(TypeDef::user("Game.Door", TypeKind::Class));
        let other = u.add_type(TypeDef::user("Game.Other", TypeKind::Class));
        let f = u.add_field(other, FieldDef::new("x", int));
        let table = SymbolTable::build(&u, door, &CompilerOptions::default()).unwrap();
        assert!(matches!(table.field(&u, f), Err(CompileError::Unsupported { .. })));
    }
}
