//! Metadata model: types, fields, methods, and the user string heap.
//!
//! Everything lives in one `Universe` arena and is addressed by small
//! copyable keys. Tokens embedded in method bodies use the ECMA-335 layout
//! (table tag in the high byte, 1-based row in the low 24 bits).

use std::fmt;

use rustc_hash::FxHashMap;

use crate::reader::TokenResolver;

macro_rules! define_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(u32);

        impl $name {
            #[inline]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_key!(
    /// Handle to a `TypeDef`.
    TypeKey
);
define_key!(
    /// Handle to a `FieldDef`.
    FieldKey
);
define_key!(
    /// Handle to a `MethodDef`.
    MethodKey
);

pub const TOKEN_TYPE: u8 = 0x02;
pub const TOKEN_FIELD: u8 = 0x04;
pub const TOKEN_METHOD: u8 = 0x06;
pub const TOKEN_STRING: u8 = 0x70;

#[inline]
pub fn make_token(table: u8, index: usize) -> u32 {
    ((table as u32) << 24) | ((index as u32 + 1) & 0x00FF_FFFF)
}

#[inline]
fn split_token(token: u32) -> (u8, usize) {
    ((token >> 24) as u8, (token & 0x00FF_FFFF) as usize)
}

/// Classification of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Boolean,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    String,
    Object,
    Class,
    Struct,
    Interface,
    Enum { underlying: TypeKey },
    /// `Nullable<T>`; represented on the target as a boxed reference.
    Nullable { inner: TypeKey },
    Array { elem: TypeKey },
    ByRef { elem: TypeKey },
    GenericParam { index: u16 },
}

/// Replication mode of a heap slot, carried through to the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncMode {
    #[default]
    None,
    Linear,
    Smooth,
}

/// Naming and visibility flags attached by member discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MemberFlags {
    pub export: bool,
    pub unique: bool,
    pub family: bool,
    pub sync: SyncMode,
}

impl MemberFlags {
    pub fn exported() -> Self {
        Self { export: true, ..Self::default() }
    }

    pub fn with_unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_family(mut self) -> Self {
        self.family = true;
        self
    }

    pub fn with_sync(mut self, sync: SyncMode) -> Self {
        self.sync = sync;
        self
    }
}

/// A metadata literal (field constants).
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Char(u16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
}

#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,
    /// Set for types provided by the host; `None` for types being compiled.
    pub host_name: Option<String>,
    pub base: Option<TypeKey>,
    pub interfaces: Vec<TypeKey>,
    pub fields: Vec<FieldKey>,
    pub methods: Vec<MethodKey>,
}

impl TypeDef {
    pub fn host(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            host_name: Some(name.to_string()),
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn user(name: &str, kind: TypeKind) -> Self {
        Self { host_name: None, ..Self::host(name, kind) }
    }

    pub fn with_base(mut self, base: TypeKey) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_interface(mut self, iface: TypeKey) -> Self {
        self.interfaces.push(iface);
        self
    }

    pub fn is_host(&self) -> bool {
        self.host_name.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub declaring: TypeKey,
    pub ty: TypeKey,
    pub is_static: bool,
    pub is_init_only: bool,
    pub constant: Option<Literal>,
    pub flags: MemberFlags,
}

impl FieldDef {
    pub fn new(name: &str, ty: TypeKey) -> Self {
        Self {
            name: name.to_string(),
            declaring: TypeKey::new(0),
            ty,
            is_static: false,
            is_init_only: false,
            constant: None,
            flags: MemberFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: MemberFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn with_constant(mut self, value: Literal) -> Self {
        self.is_static = true;
        self.is_init_only = true;
        self.constant = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDef {
    pub name: String,
    pub ty: TypeKey,
    pub by_ref: bool,
}

/// Raw method body.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    pub code: Vec<u8>,
    pub locals: Vec<TypeKey>,
}

#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub declaring: TypeKey,
    pub is_static: bool,
    pub is_virtual: bool,
    pub params: Vec<ParamDef>,
    pub ret: TypeKey,
    pub body: Option<MethodBody>,
    pub flags: MemberFlags,
}

impl MethodDef {
    /// An instance method returning `ret`.
    pub fn new(name: &str, ret: TypeKey) -> Self {
        Self {
            name: name.to_string(),
            declaring: TypeKey::new(0),
            is_static: false,
            is_virtual: false,
            params: Vec::new(),
            ret,
            body: None,
            flags: MemberFlags::default(),
        }
    }

    pub fn with_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn with_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn with_param(mut self, name: &str, ty: TypeKey) -> Self {
        self.params.push(ParamDef { name: name.to_string(), ty, by_ref: false });
        self
    }

    pub fn with_ref_param(mut self, name: &str, ty: TypeKey) -> Self {
        self.params.push(ParamDef { name: name.to_string(), ty, by_ref: true });
        self
    }

    pub fn with_body(mut self, code: Vec<u8>, locals: Vec<TypeKey>) -> Self {
        self.body = Some(MethodBody { code, locals });
        self
    }

    pub fn with_flags(mut self, flags: MemberFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn is_ctor(&self) -> bool {
        self.name == ".ctor"
    }

    /// Number of stack arguments, including the receiver.
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(!self.is_static)
    }
}

/// Well-known host types created by `Universe::new`.
#[derive(Debug, Clone, Copy)]
pub struct Builtins {
    pub void: TypeKey,
    pub boolean: TypeKey,
    pub char: TypeKey,
    pub int8: TypeKey,
    pub uint8: TypeKey,
    pub int16: TypeKey,
    pub uint16: TypeKey,
    pub int32: TypeKey,
    pub uint32: TypeKey,
    pub int64: TypeKey,
    pub uint64: TypeKey,
    pub float32: TypeKey,
    pub float64: TypeKey,
    pub string: TypeKey,
    pub object: TypeKey,
    pub system_type: TypeKey,
}

/// Arena of all metadata visible to one compilation.
#[derive(Debug, Clone)]
pub struct Universe {
    types: Vec<TypeDef>,
    fields: Vec<FieldDef>,
    methods: Vec<MethodDef>,
    strings: Vec<String>,
    arrays: FxHashMap<TypeKey, TypeKey>,
    nullables: FxHashMap<TypeKey, TypeKey>,
    builtins: Builtins,
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

impl Universe {
    pub fn new() -> Self {
        let mut types = Vec::new();
        let mut add = |name: &str, kind: TypeKind| {
            types.push(TypeDef::host(name, kind));
            TypeKey::new(types.len() as u32 - 1)
        };
        let builtins = Builtins {
            void: add("System.Void", TypeKind::Void),
            boolean: add("System.Boolean", TypeKind::Boolean),
            char: add("System.Char", TypeKind::Char),
            int8: add("System.SByte", TypeKind::Int8),
            uint8: add("System.Byte", TypeKind::UInt8),
            int16: add("System.Int16", TypeKind::Int16),
            uint16: add("System.UInt16", TypeKind::UInt16),
            int32: add("System.Int32", TypeKind::Int32),
            uint32: add("System.UInt32", TypeKind::UInt32),
            int64: add("System.Int64", TypeKind::Int64),
            uint64: add("System.UInt64", TypeKind::UInt64),
            float32: add("System.Single", TypeKind::Float32),
            float64: add("System.Double", TypeKind::Float64),
            string: add("System.String", TypeKind::String),
            object: add("System.Object", TypeKind::Object),
            system_type: add("System.Type", TypeKind::Class),
        };
        Self {
            types,
            fields: Vec::new(),
            methods: Vec::new(),
            strings: Vec::new(),
            arrays: FxHashMap::default(),
            nullables: FxHashMap::default(),
            builtins,
        }
    }

    #[inline]
    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    // === Construction ===

    pub fn add_type(&mut self, def: TypeDef) -> TypeKey {
        self.types.push(def);
        TypeKey::new(self.types.len() as u32 - 1)
    }

    pub fn add_field(&mut self, owner: TypeKey, mut def: FieldDef) -> FieldKey {
        def.declaring = owner;
        self.fields.push(def);
        let key = FieldKey::new(self.fields.len() as u32 - 1);
        self.types[owner.index()].fields.push(key);
        key
    }

    pub fn add_method(&mut self, owner: TypeKey, mut def: MethodDef) -> MethodKey {
        def.declaring = owner;
        self.methods.push(def);
        let key = MethodKey::new(self.methods.len() as u32 - 1);
        self.types[owner.index()].methods.push(key);
        key
    }

    /// Replace the body of an existing method (bodies often reference the
    /// method's own token, so they are attached after registration).
    pub fn set_body(&mut self, method: MethodKey, code: Vec<u8>, locals: Vec<TypeKey>) {
        self.methods[method.index()].body = Some(MethodBody { code, locals });
    }

    /// Interns a user string and returns its token.
    pub fn string_token(&mut self, value: &str) -> u32 {
        let index = match self.strings.iter().position(|s| s == value) {
            Some(index) => index,
            None => {
                self.strings.push(value.to_string());
                self.strings.len() - 1
            }
        };
        make_token(TOKEN_STRING, index)
    }

    /// Single-dimension array of `elem`, created on first request.
    pub fn array_of(&mut self, elem: TypeKey) -> TypeKey {
        if let Some(&key) = self.arrays.get(&elem) {
            return key;
        }
        let name = format!("{}[]", self.ty(elem).name);
        let mut def = TypeDef::host(&name, TypeKind::Array { elem });
        if !self.ty(elem).is_host() {
            def.host_name = None;
        }
        let key = self.add_type(def);
        self.arrays.insert(elem, key);
        key
    }

    /// `Nullable<inner>`, created on first request.
    pub fn nullable_of(&mut self, inner: TypeKey) -> TypeKey {
        if let Some(&key) = self.nullables.get(&inner) {
            return key;
        }
        let name = format!("System.Nullable<{}>", self.ty(inner).name);
        let key = self.add_type(TypeDef::host(&name, TypeKind::Nullable { inner }));
        self.nullables.insert(inner, key);
        let (void, boolean) = (self.builtins.void, self.builtins.boolean);
        self.add_method(key, MethodDef::new(".ctor", void).with_param("value", inner));
        self.add_method(key, MethodDef::new("get_HasValue", boolean));
        self.add_method(key, MethodDef::new("get_Value", inner));
        self.add_method(key, MethodDef::new("GetValueOrDefault", inner));
        key
    }

    // === Tokens ===

    pub fn type_token(&self, key: TypeKey) -> u32 {
        make_token(TOKEN_TYPE, key.index())
    }

    pub fn field_token(&self, key: FieldKey) -> u32 {
        make_token(TOKEN_FIELD, key.index())
    }

    pub fn method_token(&self, key: MethodKey) -> u32 {
        make_token(TOKEN_METHOD, key.index())
    }

    // === Lookup ===

    #[inline]
    pub fn ty(&self, key: TypeKey) -> &TypeDef {
        &self.types[key.index()]
    }

    #[inline]
    pub fn field(&self, key: FieldKey) -> &FieldDef {
        &self.fields[key.index()]
    }

    #[inline]
    pub fn method(&self, key: MethodKey) -> &MethodDef {
        &self.methods[key.index()]
    }

    pub fn types(&self) -> impl Iterator<Item = (TypeKey, &TypeDef)> {
        self.types.iter().enumerate().map(|(i, t)| (TypeKey::new(i as u32), t))
    }

    pub fn find_type(&self, name: &str) -> Option<TypeKey> {
        self.types().find(|(_, t)| t.name == name).map(|(k, _)| k)
    }

    pub fn find_method(&self, owner: TypeKey, name: &str) -> Option<MethodKey> {
        self.ty(owner).methods.iter().copied().find(|&m| self.method(m).name == name)
    }

    pub fn find_field(&self, owner: TypeKey, name: &str) -> Option<FieldKey> {
        self.ty(owner).fields.iter().copied().find(|&f| self.field(f).name == name)
    }

    /// Previously created array type of `elem`.
    pub fn find_array(&self, elem: TypeKey) -> Option<TypeKey> {
        self.arrays.get(&elem).copied()
    }

    /// Base classes of `key`, nearest first (excluding `key` itself).
    pub fn ancestors(&self, key: TypeKey) -> Ancestors<'_> {
        Ancestors { universe: self, next: self.ty(key).base }
    }

    /// True when `ty` is `target`, derives from it, or implements it.
    pub fn is_assignable_to(&self, ty: TypeKey, target: TypeKey) -> bool {
        if ty == target || target == self.builtins.object {
            return true;
        }
        std::iter::once(ty).chain(self.ancestors(ty)).any(|t| {
            t == target || self.ty(t).interfaces.iter().any(|&i| self.interface_extends(i, target))
        })
    }

    fn interface_extends(&self, iface: TypeKey, target: TypeKey) -> bool {
        iface == target
            || self.ty(iface).interfaces.iter().any(|&i| self.interface_extends(i, target))
    }

    // === Classification ===

    #[inline]
    pub fn kind(&self, key: TypeKey) -> TypeKind {
        self.ty(key).kind
    }

    /// Types compiled into target programs (user classes).
    pub fn is_behaviour(&self, key: TypeKey) -> bool {
        let def = self.ty(key);
        !def.is_host() && matches!(def.kind, TypeKind::Class | TypeKind::Interface)
    }

    pub fn is_integer(&self, key: TypeKey) -> bool {
        self.int_shape(key).is_some()
    }

    /// Bit width and signedness of an integer-like type. `char` counts as
    /// an unsigned 16-bit integer.
    pub fn int_shape(&self, key: TypeKey) -> Option<(u32, bool)> {
        match self.kind(key) {
            TypeKind::Int8 => Some((8, true)),
            TypeKind::UInt8 => Some((8, false)),
            TypeKind::Int16 => Some((16, true)),
            TypeKind::UInt16 | TypeKind::Char => Some((16, false)),
            TypeKind::Int32 => Some((32, true)),
            TypeKind::UInt32 => Some((32, false)),
            TypeKind::Int64 => Some((64, true)),
            TypeKind::UInt64 => Some((64, false)),
            _ => None,
        }
    }

    pub fn is_unsigned(&self, key: TypeKey) -> bool {
        matches!(self.int_shape(key), Some((_, false)))
    }

    /// Width in bits of integer and float types.
    pub fn bit_width(&self, key: TypeKey) -> Option<u32> {
        match self.kind(key) {
            TypeKind::Float32 => Some(32),
            TypeKind::Float64 => Some(64),
            _ => self.int_shape(key).map(|(bits, _)| bits),
        }
    }

    pub fn is_value_type(&self, key: TypeKey) -> bool {
        !self.is_reference(key) && !matches!(self.kind(key), TypeKind::Void)
    }

    /// Types defined by the program rather than the host.
    pub fn is_user_type(&self, key: TypeKey) -> bool {
        !self.ty(key).is_host()
    }

    pub fn is_float(&self, key: TypeKey) -> bool {
        matches!(self.kind(key), TypeKind::Float32 | TypeKind::Float64)
    }

    pub fn is_numeric(&self, key: TypeKey) -> bool {
        self.is_integer(key) || self.is_float(key)
    }

    pub fn is_reference(&self, key: TypeKey) -> bool {
        matches!(
            self.kind(key),
            TypeKind::String
                | TypeKind::Object
                | TypeKind::Class
                | TypeKind::Interface
                | TypeKind::Array { .. }
                | TypeKind::Nullable { .. }
        )
    }

    pub fn enum_underlying(&self, key: TypeKey) -> Option<TypeKey> {
        match self.kind(key) {
            TypeKind::Enum { underlying } => Some(underlying),
            _ => None,
        }
    }

    pub fn nullable_inner(&self, key: TypeKey) -> Option<TypeKey> {
        match self.kind(key) {
            TypeKind::Nullable { inner } => Some(inner),
            _ => None,
        }
    }

    /// Managed pointer to `elem`, created on first request.
    pub fn by_ref_of(&mut self, elem: TypeKey) -> TypeKey {
        let name = format!("{}&", self.ty(elem).name);
        if let Some(key) = self.find_type(&name) {
            return key;
        }
        self.add_type(TypeDef::host(&name, TypeKind::ByRef { elem }))
    }

    pub fn array_elem(&self, key: TypeKey) -> Option<TypeKey> {
        match self.kind(key) {
            TypeKind::Array { elem } => Some(elem),
            _ => None,
        }
    }

    /// Readable `Type::member(params)` form used in diagnostics.
    pub fn method_display(&self, key: MethodKey) -> String {
        let m = self.method(key);
        let params: Vec<&str> = m.params.iter().map(|p| self.ty(p.ty).name.as_str()).collect();
        format!("{}::{}({})", self.ty(m.declaring).name, m.name, params.join(", "))
    }

    pub fn field_display(&self, key: FieldKey) -> String {
        let f = self.field(key);
        format!("{}::{}", self.ty(f.declaring).name, f.name)
    }
}

impl TokenResolver for Universe {
    fn resolve_type(&self, token: u32) -> Option<TypeKey> {
        match split_token(token) {
            (TOKEN_TYPE, row) if row >= 1 && row <= self.types.len() => {
                Some(TypeKey::new(row as u32 - 1))
            }
            _ => None,
        }
    }

    fn resolve_field(&self, token: u32) -> Option<FieldKey> {
        match split_token(token) {
            (TOKEN_FIELD, row) if row >= 1 && row <= self.fields.len() => {
                Some(FieldKey::new(row as u32 - 1))
            }
            _ => None,
        }
    }

    fn resolve_method(&self, token: u32) -> Option<MethodKey> {
        match split_token(token) {
            (TOKEN_METHOD, row) if row >= 1 && row <= self.methods.len() => {
                Some(MethodKey::new(row as u32 - 1))
            }
            _ => None,
        }
    }

    fn resolve_string(&self, token: u32) -> Option<&str> {
        match split_token(token) {
            (TOKEN_STRING, row) if row >= 1 => self.strings.get(row - 1).map(String::as_str),
            _ => None,
        }
    }
}

/// Iterator over base classes.
pub struct Ancestors<'a> {
    universe: &'a Universe,
    next: Option<TypeKey>,
}

impl Iterator for Ancestors<'_> {
    type Item = TypeKey;

    fn next(&mut self) -> Option<TypeKey> {
        let current = self.next?;
        self.next = self.universe.ty(current).base;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_resolve() {
        let mut u = Universe::new();
        let int = u.builtins().int32;
        let ty = u.add_type(TypeDef::user("Game.Counter", TypeKind::Class));
        let field = u.add_field(ty, FieldDef::new("count", int));
        let method = u.add_method(ty, MethodDef::new("Tick", u.builtins().void));
        let s = u.string_token("hello");

        assert_eq!(u.resolve_type(u.type_token(ty)), Some(ty));
        assert_eq!(u.resolve_field(u.field_token(field)), Some(field));
        assert_eq!(u.resolve_method(u.method_token(method)), Some(method));
        assert_eq!(u.resolve_string(s), Some("hello"));
        assert_eq!(u.string_token("hello"), s);
        // wrong table
        assert_eq!(u.resolve_field(u.type_token(ty)), None);
    }

    #[test]
    fn test_assignability() {
        let mut u = Universe::new();
        let obj = u.builtins().object;
        let iface = u.add_type(TypeDef::user("Game.IHit", TypeKind::Interface));
        let base = u.add_type(TypeDef::user("Game.Base", TypeKind::Class).with_base(obj));
        let derived = u.add_type(
            TypeDef::user("Game.Derived", TypeKind::Class).with_base(base).with_interface(iface),
        );
        assert!(u.is_assignable_to(derived, base));
        assert!(u.is_assignable_to(derived, iface));
        assert!(!u.is_assignable_to(base, derived));
        assert_eq!(u.ancestors(derived).collect::<Vec<_>>(), vec![base, obj]);
    }

    #[test]
    fn test_interned_arrays() {
        let mut u = Universe::new();
        let int = u.builtins().int32;
        let a = u.array_of(int);
        assert_eq!(u.array_of(int), a);
        assert_eq!(u.ty(a).host_name.as_deref(), Some("System.Int32[]"));
        assert_eq!(u.array_elem(a), Some(int));
    }
}
