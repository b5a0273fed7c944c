//! Finished programs: heap declaration, code, entry points, debug map.

use std::fmt;

use crate::debug_map::DebugMap;
use crate::instruction::{Instruction, Opcode};
use crate::value::Value;

/// Address that halts the machine when jumped to.
pub const HALT_ADDRESS: u32 = 0xFFFF_FFFC;

/// Replication mode of an exported heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SyncMode {
    #[default]
    None,
    Linear,
    Smooth,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeapSlot {
    pub name: String,
    /// Host type identifier, e.g. `SystemInt32`.
    pub host_type: String,
    pub value: Value,
    pub export: bool,
    pub sync: SyncMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryPoint {
    pub name: String,
    pub address: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    pub heap: Vec<HeapSlot>,
    pub code: Vec<Instruction>,
    pub entry_points: Vec<EntryPoint>,
    pub debug_map: Option<DebugMap>,
}

impl Program {
    pub fn slot(&self, name: &str) -> Option<(u32, &HeapSlot)> {
        self.heap.iter().enumerate().find(|(_, s)| s.name == name).map(|(i, s)| (i as u32, s))
    }

    pub fn entry(&self, name: &str) -> Option<u32> {
        self.entry_points.iter().find(|e| e.name == name).map(|e| e.address)
    }

    /// Address of every instruction, in code order.
    pub fn addresses(&self) -> impl Iterator<Item = (u32, &Instruction)> {
        self.code.iter().scan(0u32, |addr, inst| {
            let here = *addr;
            *addr += inst.size();
            Some((here, inst))
        })
    }

    pub fn code_size(&self) -> u32 {
        self.code.iter().map(Instruction::size).sum()
    }

    /// Extern signatures called by the code, in call order.
    pub fn externs(&self) -> Vec<&str> {
        self.code
            .iter()
            .filter(|i| i.opcode == Opcode::Extern)
            .filter_map(|i| self.heap.get(i.operand? as usize))
            .filter_map(|slot| match &slot.value {
                Value::String(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code_size() as usize);
        for inst in &self.code {
            inst.encode(&mut out);
        }
        out
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ".data_start")?;
        for slot in &self.heap {
            if slot.export {
                writeln!(f, "    .export {}", slot.name)?;
            }
            match slot.sync {
                SyncMode::None => {}
                SyncMode::Linear => writeln!(f, "    .sync {}, linear", slot.name)?,
                SyncMode::Smooth => writeln!(f, "    .sync {}, smooth", slot.name)?,
            }
            writeln!(f, "    {}: %{}, {}", slot.name, slot.host_type, slot.value)?;
        }
        writeln!(f, ".data_end")?;
        writeln!(f, ".code_start")?;
        for (addr, inst) in self.addresses() {
            for entry in self.entry_points.iter().filter(|e| e.address == addr) {
                writeln!(f, "    .export {}", entry.name)?;
                writeln!(f, "    {}:", entry.name)?;
            }
            write!(f, "        /* {:08X} */ {}", addr, inst.opcode.name())?;
            match (inst.opcode, inst.operand) {
                (Opcode::Push, Some(idx)) => match self.heap.get(idx as usize) {
                    Some(slot) => write!(f, ", {}", slot.name)?,
                    None => write!(f, ", 0x{:08X}", idx)?,
                },
                (Opcode::Extern, Some(idx)) => match self.heap.get(idx as usize).map(|s| &s.value) {
                    Some(Value::String(sig)) => write!(f, ", \"{}\"", sig)?,
                    _ => write!(f, ", 0x{:08X}", idx)?,
                },
                (Opcode::JumpIndirect, Some(idx)) => match self.heap.get(idx as usize) {
                    Some(slot) => write!(f, ", {}", slot.name)?,
                    None => write!(f, ", 0x{:08X}", idx)?,
                },
                (_, Some(operand)) => write!(f, ", 0x{:08X}", operand)?,
                (_, None) => {}
            }
            writeln!(f)?;
        }
        writeln!(f, ".code_end")
    }
}
