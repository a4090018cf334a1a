//! Device handle

use std::fmt;

/// Opaque, process-local device handle
///
/// Handles are issued by the device registry in strictly increasing order
/// and are never persisted. A handle is only meaningful to the registry
/// that issued it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Wrap a raw handle value
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw handle value
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Handle that follows this one, `None` once the handle space is used up
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl From<DeviceId> for u32 {
    fn from(id: DeviceId) -> u32 {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
