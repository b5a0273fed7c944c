//! Initial values of heap slots.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    Null,
    Bool(bool),
    Char(u16),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    String(String),
    /// Reference to a host type, by host name.
    Type(String),
    /// Code address (return addresses and jump targets).
    Address(u32),
    /// The running behaviour instance.
    This,
}

impl Value {
    /// Bit-exact identity used to deduplicate constants.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(v) => ValueKey::Bits(0, u64::from(*v)),
            Value::Char(v) => ValueKey::Bits(1, u64::from(*v)),
            Value::SByte(v) => ValueKey::Bits(2, *v as u64),
            Value::Byte(v) => ValueKey::Bits(3, u64::from(*v)),
            Value::Int16(v) => ValueKey::Bits(4, *v as u64),
            Value::UInt16(v) => ValueKey::Bits(5, u64::from(*v)),
            Value::Int32(v) => ValueKey::Bits(6, *v as u64),
            Value::UInt32(v) => ValueKey::Bits(7, u64::from(*v)),
            Value::Int64(v) => ValueKey::Bits(8, *v as u64),
            Value::UInt64(v) => ValueKey::Bits(9, *v),
            Value::Single(v) => ValueKey::Bits(10, u64::from(v.to_bits())),
            Value::Double(v) => ValueKey::Bits(11, v.to_bits()),
            Value::Address(v) => ValueKey::Bits(12, u64::from(*v)),
            Value::String(s) => ValueKey::Text(0, s.clone()),
            Value::Type(s) => ValueKey::Text(1, s.clone()),
            Value::This => ValueKey::This,
        }
    }

    /// Integer payload widened to 128 bits.
    pub fn as_integer(&self) -> Option<i128> {
        Some(match *self {
            Value::Bool(v) => i128::from(v),
            Value::Char(v) => i128::from(v),
            Value::SByte(v) => i128::from(v),
            Value::Byte(v) => i128::from(v),
            Value::Int16(v) => i128::from(v),
            Value::UInt16(v) => i128::from(v),
            Value::Int32(v) => i128::from(v),
            Value::UInt32(v) => i128::from(v),
            Value::Int64(v) => i128::from(v),
            Value::UInt64(v) => i128::from(v),
            _ => return None,
        })
    }

    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Single(v) => Some(f64::from(v)),
            Value::Double(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    This,
    Bits(u8, u64),
    Text(u8, String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Char(v) => write!(f, "'\\u{:04x}'", v),
            Value::SByte(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Single(v) => write!(f, "{:?}", v),
            Value::Double(v) => write!(f, "{:?}", v),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Type(s) => write!(f, "typeof({})", s),
            Value::Address(a) => write!(f, "0x{:08X}", a),
            Value::This => f.write_str("this"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_separates_types() {
        assert_ne!(Value::Int32(1).key(), Value::UInt32(1).key());
        assert_eq!(Value::Double(0.5).key(), Value::Double(0.5).key());
        assert_ne!(Value::Double(0.0).key(), Value::Double(-0.0).key());
    }
}
