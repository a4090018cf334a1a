//! High-level error types

use ximc_core::Status;
use ximc_types::DeviceId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Core protocol error: {0}")]
    Core(#[from] ximc_core::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] ximc_transport::Error),

    #[error("Type error: {0}")]
    Types(#[from] ximc_types::Error),

    #[error("Device {0} is not open")]
    NotOpen(DeviceId),

    #[error("Device {0} has no port attached")]
    HalfOpen(DeviceId),

    #[error("Device {0} is busy")]
    Busy(DeviceId),

    #[error("No device handles left")]
    HandlesExhausted,
}

impl Error {
    /// Status code seen by callers
    pub fn status(&self) -> Status {
        match self {
            Self::Core(e) => e.status(),
            Self::Transport(ximc_transport::Error::Unsupported(_)) => Status::NotImplemented,
            Self::Transport(_) | Self::Types(_) => Status::Error,
            Self::NotOpen(_) | Self::HalfOpen(_) | Self::Busy(_) | Self::HandlesExhausted => {
                Status::Error
            }
        }
    }

    /// Device is gone and the handle should be closed
    pub fn requires_reconnect(&self) -> bool {
        matches!(self, Self::Core(e) if e.requires_reconnect())
    }
}

/// Flatten an operation result into its status code
pub fn status_of<T>(result: &Result<T>) -> Status {
    match result {
        Ok(_) => Status::Ok,
        Err(e) => e.status(),
    }
}
