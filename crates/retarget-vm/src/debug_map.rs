//! Maps code addresses back to source methods and offsets.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugPoint {
    pub address: u32,
    /// Index into `DebugMap::methods`.
    pub method: u32,
    /// Source instruction offset.
    pub offset: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourcePoint<'a> {
    pub method: &'a str,
    pub offset: u32,
}

impl fmt::Display for SourcePoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+IL_{:04x}", self.method, self.offset)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DebugMap {
    pub methods: Vec<String>,
    pub points: Vec<DebugPoint>,
}

impl DebugMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method_id(&mut self, name: &str) -> u32 {
        if let Some(idx) = self.methods.iter().position(|m| m == name) {
            idx as u32
        } else {
            self.methods.push(name.to_string());
            self.methods.len() as u32 - 1
        }
    }

    pub fn add(&mut self, address: u32, method: u32, offset: u32) {
        self.points.push(DebugPoint { address, method, offset });
    }

    /// Sort points by address. Must be called before `lookup`.
    pub fn finalize(&mut self) {
        self.points.sort_by_key(|p| p.address);
    }

    /// Source point of the instruction at or before `address`.
    pub fn lookup(&self, address: u32) -> Option<SourcePoint<'_>> {
        let idx = self.points.partition_point(|p| p.address <= address);
        if idx == 0 {
            return None;
        }
        let point = &self.points[idx - 1];
        Some(SourcePoint { method: self.methods.get(point.method as usize)?, offset: point.offset })
    }
}
