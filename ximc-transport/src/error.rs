//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Unsupported transport: {0}")]
    Unsupported(String),
}

#[cfg(unix)]
const NODEVICE_OS_ERRORS: &[i32] = &[
    5,  // EIO
    6,  // ENXIO
    19, // ENODEV
];

#[cfg(windows)]
const NODEVICE_OS_ERRORS: &[i32] = &[
    2,    // ERROR_FILE_NOT_FOUND
    5,    // ERROR_ACCESS_DENIED
    22,   // ERROR_BAD_COMMAND
    31,   // ERROR_GEN_FAILURE
    995,  // ERROR_OPERATION_ABORTED
    1167, // ERROR_DEVICE_NOT_CONNECTED
];

#[cfg(not(any(unix, windows)))]
const NODEVICE_OS_ERRORS: &[i32] = &[];

/// Classify a raw I/O failure: `true` means the device is physically gone
/// (unplugged, link dropped), `false` means a transient error.
pub fn is_disconnect(err: &io::Error) -> bool {
    if let Some(code) = err.raw_os_error() {
        if NODEVICE_OS_ERRORS.contains(&code) {
            return true;
        }
    }
    matches!(
        err.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_classification() {
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_disconnect(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_disconnect(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_disconnect(&io::Error::new(io::ErrorKind::Other, "glitch")));
    }

    #[cfg(unix)]
    #[test]
    fn test_disconnect_os_codes() {
        assert!(is_disconnect(&io::Error::from_raw_os_error(19)));
        assert!(!is_disconnect(&io::Error::from_raw_os_error(11)));
    }
}
