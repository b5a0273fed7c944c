//! Translation errors.
//!
//! Every error is fatal for the type being compiled. Errors raised inside a
//! method carry the method and the source offset of the instruction being
//! translated; `CompileError::at` fills them in on the way out.

use std::fmt;

use retarget_bytecode::ReadError;
use thiserror::Error;

/// Where an error happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub method: Option<String>,
    pub offset: Option<u32>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(method) = &self.method {
            write!(f, " in {}", method)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " at IL_{:04x}", offset)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A construct the host machine cannot express.
    #[error("unsupported: {message}{location}")]
    Unsupported { message: String, location: Location },

    /// Two unique members collide across an inheritance chain.
    #[error("naming conflict: `{name}` declared by both {first} and {second}")]
    NamingConflict { name: String, first: String, second: String },

    /// A builder left the translation state inconsistent.
    #[error("internal invariant violated: {message}{location}")]
    Invariant { message: String, location: Location },

    /// No builder accepted an instruction.
    #[error("no builder claimed `{mnemonic}{}`{location}", spaced(.operand))]
    Unclaimed { mnemonic: &'static str, operand: String, location: Location },

    #[error("malformed method body{location}: {source}")]
    Read { source: ReadError, location: Location },

    #[error("label L{label} is never placed{location}")]
    UnresolvedLabel { label: u32, location: Location },
}

impl CompileError {
    pub fn unsupported(message: impl Into<String>) -> Self {
        CompileError::Unsupported { message: message.into(), location: Location::default() }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        CompileError::Invariant { message: message.into(), location: Location::default() }
    }

    pub fn read(source: ReadError) -> Self {
        let location = Location { method: None, offset: source.offset() };
        CompileError::Read { source, location }
    }

    fn location_mut(&mut self) -> Option<&mut Location> {
        match self {
            CompileError::Unsupported { location, .. }
            | CompileError::Invariant { location, .. }
            | CompileError::Unclaimed { location, .. }
            | CompileError::Read { location, .. }
            | CompileError::UnresolvedLabel { location, .. } => Some(location),
            CompileError::NamingConflict { .. } => None,
        }
    }

    /// Attach the method and offset unless already known.
    pub fn at(mut self, method: &str, offset: Option<u32>) -> Self {
        if let Some(location) = self.location_mut() {
            if location.method.is_none() {
                location.method = Some(method.to_string());
            }
            if location.offset.is_none() {
                location.offset = offset;
            }
        }
        self
    }

    pub fn offset(&self) -> Option<u32> {
        match self {
            CompileError::Unsupported { location, .. }
            | CompileError::Invariant { location, .. }
            | CompileError::Unclaimed { location, .. }
            | CompileError::Read { location, .. }
            | CompileError::UnresolvedLabel { location, .. } => location.offset,
            CompileError::NamingConflict { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            CompileError::Unsupported { location, .. }
            | CompileError::Invariant { location, .. }
            | CompileError::Unclaimed { location, .. }
            | CompileError::Read { location, .. }
            | CompileError::UnresolvedLabel { location, .. } => location.method.as_deref(),
            CompileError::NamingConflict { .. } => None,
        }
    }
}

impl From<ReadError> for CompileError {
    fn from(source: ReadError) -> Self {
        CompileError::read(source)
    }
}

fn spaced(operand: &str) -> String {
    if operand.is_empty() {
        String::new()
    } else {
        format!(" {}", operand)
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_is_filled_once() {
        let err = CompileError::unsupported("throw").at("Game::Tick", Some(4)).at("other", Some(9));
        assert_eq!(err.offset(), Some(4));
        assert_eq!(err.method(), Some("Game::Tick"));
        assert_eq!(err.to_string(), "unsupported: throw in Game::Tick at IL_0004");
    }

    #[test]
    fn test_unclaimed_message() {
        let err = CompileError::Unclaimed {
            mnemonic: "ldsflda",
            operand: "Game::counter".into(),
            location: Location { method: None, offset: Some(0x10) },
        };
        assert_eq!(err.to_string(), "no builder claimed `ldsflda Game::counter` at IL_0010");
    }
}
