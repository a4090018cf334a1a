//! Error types for ximc-core

use std::fmt;

/// Result type alias for ximc protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Flat status taxonomy reported to callers
///
/// The numeric codes match the result codes of the vendor C library so
/// they can be passed through bindings unchanged.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Error = -1,
    NotImplemented = -2,
    ValueError = -3,
    NoDevice = -4,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> i32 {
        status as i32
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "result_ok",
            Self::Error => "result_error",
            Self::NotImplemented => "result_not_implemented",
            Self::ValueError => "result_value_error",
            Self::NoDevice => "result_nodevice",
        };
        write!(f, "{}({})", name, self.code())
    }
}

/// Buffer direction of an overrun check
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        })
    }
}

/// Core protocol errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Generic failure, often cured by resynchronization
    #[error("Operation failed: {0}")]
    Failed(String),

    /// Operation is not available in this build
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Device understood the command but rejected a value (`errv`)
    #[error("Device rejected a value")]
    ValueError,

    /// Confirmed physical disconnection
    #[error("Device lost: {0}")]
    NoDevice(String),

    /// Frame length does not match the buffer it is decoded from or encoded to
    #[error("Buffer {direction} overrun: {count} bytes vs buffer size {size}")]
    Overrun {
        direction: Direction,
        count: usize,
        size: usize,
    },

    /// Checksum verification failed
    #[error("Checksum mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    ChecksumMismatch {
        expected: u16,
        received: u16,
    },

    /// Correction table could not be loaded
    #[error("Correction table error: {0}")]
    CorrectionTable(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn no_device(msg: impl Into<String>) -> Self {
        Self::NoDevice(msg.into())
    }

    /// Status code seen by callers
    pub fn status(&self) -> Status {
        match self {
            Self::NotImplemented(_) => Status::NotImplemented,
            Self::ValueError => Status::ValueError,
            Self::NoDevice(_) => Status::NoDevice,
            Self::Failed(_)
            | Self::Overrun { .. }
            | Self::ChecksumMismatch { .. }
            | Self::CorrectionTable(_)
            | Self::Io(_) => Status::Error,
        }
    }

    /// Check if error is recoverable (retry might succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Failed(_) | Self::ChecksumMismatch { .. } | Self::ValueError
        )
    }

    /// Check if the handle is unusable and must be closed
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, Self::NoDevice(_))
    }
}

/// Flatten an operation result into its status code
pub fn status_of<T>(result: &Result<T>) -> Status {
    match result {
        Ok(_) => Status::Ok,
        Err(e) => e.status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Error.code(), -1);
        assert_eq!(Status::NotImplemented.code(), -2);
        assert_eq!(Status::ValueError.code(), -3);
        assert_eq!(Status::NoDevice.code(), -4);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(Error::ValueError.status(), Status::ValueError);
        assert_eq!(Error::no_device("unplugged").status(), Status::NoDevice);
        assert_eq!(
            Error::ChecksumMismatch { expected: 1, received: 2 }.status(),
            Status::Error
        );
        assert_eq!(status_of::<()>(&Ok(())), Status::Ok);
    }

    #[test]
    fn test_no_device_is_terminal() {
        assert!(Error::no_device("gone").requires_reconnect());
        assert!(!Error::no_device("gone").is_recoverable());
        assert!(Error::failed("desync").is_recoverable());
    }
}
