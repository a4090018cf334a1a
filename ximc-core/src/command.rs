//! Command names
//!
//! Every request starts with a 4-character ASCII name (`gpos`, `move`, ...)
//! and every good response echoes it. Two names are reserved for errors.

use std::fmt;

use crate::constants::COMMAND_LEN;
use crate::error::{Error, Result};

/// Four-byte command name
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct CommandName([u8; COMMAND_LEN]);

impl CommandName {
    /// Device rejected a value in the request
    pub const ERRV: Self = Self(*b"errv");

    /// Device could not parse the request
    pub const ERRD: Self = Self(*b"errd");

    pub const fn new(name: [u8; COMMAND_LEN]) -> Self {
        Self(name)
    }

    /// Take the name from the first four bytes of a frame
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let name = frame
            .get(..COMMAND_LEN)
            .ok_or_else(|| Error::failed(format!("frame of {} bytes has no command name", frame.len())))?;
        let mut bytes = [0u8; COMMAND_LEN];
        bytes.copy_from_slice(name);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_LEN] {
        &self.0
    }

    /// Check if this is one of the error sentinels
    pub fn is_error(&self) -> bool {
        *self == Self::ERRV || *self == Self::ERRD
    }

    /// Whether `frame` begins with this name
    pub fn matches(&self, frame: &[u8]) -> bool {
        frame.get(..COMMAND_LEN) == Some(&self.0[..])
    }
}

impl TryFrom<&str> for CommandName {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        if value.len() != COMMAND_LEN || !value.is_ascii() {
            return Err(Error::failed(format!("command name must be 4 ASCII characters, got '{}'", value)));
        }
        Self::from_frame(value.as_bytes())
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandName({})", self)
    }
}
