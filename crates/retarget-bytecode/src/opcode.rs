//! Input opcode table.
//!
//! Encodings follow ECMA-335 partition III. Two-byte opcodes are stored as
//! `0xFExx`. Only the subset the translator understands is listed; anything
//! else is rejected by the reader.

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Prefix byte of two-byte opcodes.
pub const TWO_BYTE_PREFIX: u8 = 0xFE;

/// Shape of the inline operand that follows an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// Argument index encoded in the opcode itself (`ldarg.0`).
    ImplicitArg(u16),
    /// Local index encoded in the opcode itself (`stloc.2`).
    ImplicitLocal(u16),
    /// Integer literal encoded in the opcode itself (`ldc.i4.m1`).
    ImplicitInt(i32),
    ArgShort,
    Arg,
    LocalShort,
    Local,
    IntShort,
    Int32,
    Int64,
    Float32,
    Float64,
    BranchShort,
    Branch,
    Switch,
    TypeToken,
    FieldToken,
    MethodToken,
    StringToken,
}

impl OperandKind {
    /// Number of inline bytes, `None` for variable-size operands.
    pub fn size(self) -> Option<usize> {
        match self {
            OperandKind::None
            | OperandKind::ImplicitArg(_)
            | OperandKind::ImplicitLocal(_)
            | OperandKind::ImplicitInt(_) => Some(0),
            OperandKind::ArgShort
            | OperandKind::LocalShort
            | OperandKind::IntShort
            | OperandKind::BranchShort => Some(1),
            OperandKind::Arg | OperandKind::Local => Some(2),
            OperandKind::Int32
            | OperandKind::Float32
            | OperandKind::Branch
            | OperandKind::TypeToken
            | OperandKind::FieldToken
            | OperandKind::MethodToken
            | OperandKind::StringToken => Some(4),
            OperandKind::Int64 | OperandKind::Float64 => Some(8),
            OperandKind::Switch => None,
        }
    }
}

macro_rules! opcodes {
    ($($name:ident = $code:literal, $mnemonic:literal, $operand:expr;)*) => {
        /// Input instruction opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[derive(TryFromPrimitive, IntoPrimitive)]
        #[repr(u16)]
        pub enum Opcode {
            $($name = $code,)*
        }

        #[allow(dead_code)]
        #[repr(usize)]
        enum Ordinal {
            $($name,)*
        }

        impl Opcode {
            /// Every opcode, in table order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            /// Number of opcodes; the size of per-opcode tables.
            pub const COUNT: usize = Self::ALL.len();

            /// Dense index in `0..COUNT`.
            #[inline]
            pub const fn index(self) -> usize {
                match self {
                    $(Opcode::$name => Ordinal::$name as usize,)*
                }
            }

            /// Symbolic name as written in assembly listings.
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            pub const fn operand_kind(self) -> OperandKind {
                use OperandKind::*;
                match self {
                    $(Opcode::$name => $operand,)*
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00, "nop", None;
    Break = 0x01, "break", None;
    Ldarg0 = 0x02, "ldarg.0", ImplicitArg(0);
    Ldarg1 = 0x03, "ldarg.1", ImplicitArg(1);
    Ldarg2 = 0x04, "ldarg.2", ImplicitArg(2);
    Ldarg3 = 0x05, "ldarg.3", ImplicitArg(3);
    Ldloc0 = 0x06, "ldloc.0", ImplicitLocal(0);
    Ldloc1 = 0x07, "ldloc.1", ImplicitLocal(1);
    Ldloc2 = 0x08, "ldloc.2", ImplicitLocal(2);
    Ldloc3 = 0x09, "ldloc.3", ImplicitLocal(3);
    Stloc0 = 0x0A, "stloc.0", ImplicitLocal(0);
    Stloc1 = 0x0B, "stloc.1", ImplicitLocal(1);
    Stloc2 = 0x0C, "stloc.2", ImplicitLocal(2);
    Stloc3 = 0x0D, "stloc.3", ImplicitLocal(3);
    LdargS = 0x0E, "ldarg.s", ArgShort;
    LdargaS = 0x0F, "ldarga.s", ArgShort;
    StargS = 0x10, "starg.s", ArgShort;
    LdlocS = 0x11, "ldloc.s", LocalShort;
    LdlocaS = 0x12, "ldloca.s", LocalShort;
    StlocS = 0x13, "stloc.s", LocalShort;
    Ldnull = 0x14, "ldnull", None;
    LdcI4M1 = 0x15, "ldc.i4.m1", ImplicitInt(-1);
    LdcI40 = 0x16, "ldc.i4.0", ImplicitInt(0);
    LdcI41 = 0x17, "ldc.i4.1", ImplicitInt(1);
    LdcI42 = 0x18, "ldc.i4.2", ImplicitInt(2);
    LdcI43 = 0x19, "ldc.i4.3", ImplicitInt(3);
    LdcI44 = 0x1A, "ldc.i4.4", ImplicitInt(4);
    LdcI45 = 0x1B, "ldc.i4.5", ImplicitInt(5);
    LdcI46 = 0x1C, "ldc.i4.6", ImplicitInt(6);
    LdcI47 = 0x1D, "ldc.i4.7", ImplicitInt(7);
    LdcI48 = 0x1E, "ldc.i4.8", ImplicitInt(8);
    LdcI4S = 0x1F, "ldc.i4.s", IntShort;
    LdcI4 = 0x20, "ldc.i4", Int32;
    LdcI8 = 0x21, "ldc.i8", Int64;
    LdcR4 = 0x22, "ldc.r4", Float32;
    LdcR8 = 0x23, "ldc.r8", Float64;
    Dup = 0x25, "dup", None;
    Pop = 0x26, "pop", None;
    Call = 0x28, "call", MethodToken;
    Ret = 0x2A, "ret", None;
    BrS = 0x2B, "br.s", BranchShort;
    BrfalseS = 0x2C, "brfalse.s", BranchShort;
    BrtrueS = 0x2D, "brtrue.s", BranchShort;
    BeqS = 0x2E, "beq.s", BranchShort;
    BgeS = 0x2F, "bge.s", BranchShort;
    BgtS = 0x30, "bgt.s", BranchShort;
    BleS = 0x31, "ble.s", BranchShort;
    BltS = 0x32, "blt.s", BranchShort;
    BneUnS = 0x33, "bne.un.s", BranchShort;
    BgeUnS = 0x34, "bge.un.s", BranchShort;
    BgtUnS = 0x35, "bgt.un.s", BranchShort;
    BleUnS = 0x36, "ble.un.s", BranchShort;
    BltUnS = 0x37, "blt.un.s", BranchShort;
    Br = 0x38, "br", Branch;
    Brfalse = 0x39, "brfalse", Branch;
    Brtrue = 0x3A, "brtrue", Branch;
    Beq = 0x3B, "beq", Branch;
    Bge = 0x3C, "bge", Branch;
    Bgt = 0x3D, "bgt", Branch;
    Ble = 0x3E, "ble", Branch;
    Blt = 0x3F, "blt", Branch;
    BneUn = 0x40, "bne.un", Branch;
    BgeUn = 0x41, "bge.un", Branch;
    BgtUn = 0x42, "bgt.un", Branch;
    BleUn = 0x43, "ble.un", Branch;
    BltUn = 0x44, "blt.un", Branch;
    Switch = 0x45, "switch", Switch;
    LdindI1 = 0x46, "ldind.i1", None;
    LdindU1 = 0x47, "ldind.u1", None;
    LdindI2 = 0x48, "ldind.i2", None;
    LdindU2 = 0x49, "ldind.u2", None;
    LdindI4 = 0x4A, "ldind.i4", None;
    LdindU4 = 0x4B, "ldind.u4", None;
    LdindI8 = 0x4C, "ldind.i8", None;
    LdindR4 = 0x4E, "ldind.r4", None;
    LdindR8 = 0x4F, "ldind.r8", None;
    LdindRef = 0x50, "ldind.ref", None;
    StindRef = 0x51, "stind.ref", None;
    StindI1 = 0x52, "stind.i1", None;
    StindI2 = 0x53, "stind.i2", None;
    StindI4 = 0x54, "stind.i4", None;
    StindI8 = 0x55, "stind.i8", None;
    StindR4 = 0x56, "stind.r4", None;
    StindR8 = 0x57, "stind.r8", None;
    Add = 0x58, "add", None;
    Sub = 0x59, "sub", None;
    Mul = 0x5A, "mul", None;
    Div = 0x5B, "div", None;
    DivUn = 0x5C, "div.un", None;
    Rem = 0x5D, "rem", None;
    RemUn = 0x5E, "rem.un", None;
    And = 0x5F, "and", None;
    Or = 0x60, "or", None;
    Xor = 0x61, "xor", None;
    Shl = 0x62, "shl", None;
    Shr = 0x63, "shr", None;
    ShrUn = 0x64, "shr.un", None;
    Neg = 0x65, "neg", None;
    Not = 0x66, "not", None;
    ConvI1 = 0x67, "conv.i1", None;
    ConvI2 = 0x68, "conv.i2", None;
    ConvI4 = 0x69, "conv.i4", None;
    ConvI8 = 0x6A, "conv.i8", None;
    ConvR4 = 0x6B, "conv.r4", None;
    ConvR8 = 0x6C, "conv.r8", None;
    ConvU4 = 0x6D, "conv.u4", None;
    ConvU8 = 0x6E, "conv.u8", None;
    Callvirt = 0x6F, "callvirt", MethodToken;
    Ldobj = 0x71, "ldobj", TypeToken;
    Ldstr = 0x72, "ldstr", StringToken;
    Newobj = 0x73, "newobj", MethodToken;
    Castclass = 0x74, "castclass", TypeToken;
    Isinst = 0x75, "isinst", TypeToken;
    ConvRUn = 0x76, "conv.r.un", None;
    Unbox = 0x79, "unbox", TypeToken;
    Throw = 0x7A, "throw", None;
    Ldfld = 0x7B, "ldfld", FieldToken;
    Ldflda = 0x7C, "ldflda", FieldToken;
    Stfld = 0x7D, "stfld", FieldToken;
    Ldsfld = 0x7E, "ldsfld", FieldToken;
    Ldsflda = 0x7F, "ldsflda", FieldToken;
    Stsfld = 0x80, "stsfld", FieldToken;
    Stobj = 0x81, "stobj", TypeToken;
    Box = 0x8C, "box", TypeToken;
    Newarr = 0x8D, "newarr", TypeToken;
    Ldlen = 0x8E, "ldlen", None;
    Ldelema = 0x8F, "ldelema", TypeToken;
    LdelemI1 = 0x90, "ldelem.i1", None;
    LdelemU1 = 0x91, "ldelem.u1", None;
    LdelemI2 = 0x92, "ldelem.i2", None;
    LdelemU2 = 0x93, "ldelem.u2", None;
    LdelemI4 = 0x94, "ldelem.i4", None;
    LdelemU4 = 0x95, "ldelem.u4", None;
    LdelemI8 = 0x96, "ldelem.i8", None;
    LdelemR4 = 0x98, "ldelem.r4", None;
    LdelemR8 = 0x99, "ldelem.r8", None;
    LdelemRef = 0x9A, "ldelem.ref", None;
    StelemI1 = 0x9C, "stelem.i1", None;
    StelemI2 = 0x9D, "stelem.i2", None;
    StelemI4 = 0x9E, "stelem.i4", None;
    StelemI8 = 0x9F, "stelem.i8", None;
    StelemR4 = 0xA0, "stelem.r4", None;
    StelemR8 = 0xA1, "stelem.r8", None;
    StelemRef = 0xA2, "stelem.ref", None;
    Ldelem = 0xA3, "ldelem", TypeToken;
    Stelem = 0xA4, "stelem", TypeToken;
    UnboxAny = 0xA5, "unbox.any", TypeToken;
    ConvU2 = 0xD1, "conv.u2", None;
    ConvU1 = 0xD2, "conv.u1", None;
    Leave = 0xDD, "leave", Branch;
    LeaveS = 0xDE, "leave.s", BranchShort;
    Ceq = 0xFE01, "ceq", None;
    Cgt = 0xFE02, "cgt", None;
    CgtUn = 0xFE03, "cgt.un", None;
    Clt = 0xFE04, "clt", None;
    CltUn = 0xFE05, "clt.un", None;
    Ldarg = 0xFE09, "ldarg", Arg;
    Ldarga = 0xFE0A, "ldarga", Arg;
    Starg = 0xFE0B, "starg", Arg;
    Ldloc = 0xFE0C, "ldloc", Local;
    Ldloca = 0xFE0D, "ldloca", Local;
    Stloc = 0xFE0E, "stloc", Local;
    Initobj = 0xFE15, "initobj", TypeToken;
    Constrained = 0xFE16, "constrained.", TypeToken;
}

impl Opcode {
    /// Raw encoding (`0xFExx` for two-byte opcodes).
    #[inline]
    pub fn code(self) -> u16 {
        self.into()
    }

    #[inline]
    pub fn is_two_byte(self) -> bool {
        self.code() > 0xFF
    }

    /// Control never reaches the following instruction.
    pub fn ends_flow(self) -> bool {
        matches!(
            self,
            Opcode::Br | Opcode::BrS | Opcode::Leave | Opcode::LeaveS | Opcode::Ret | Opcode::Throw
        )
    }

    /// Operand value folded into short forms (`ldarg.0`, `ldc.i4.5`).
    pub fn implicit_operand(self) -> Option<i32> {
        match self.operand_kind() {
            OperandKind::ImplicitArg(n) | OperandKind::ImplicitLocal(n) => Some(i32::from(n)),
            OperandKind::ImplicitInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self.operand_kind(),
            OperandKind::Branch | OperandKind::BranchShort | OperandKind::Switch
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
