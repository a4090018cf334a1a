//! # ximc
//!
//! Protocol engine for XIMC stepper and DC motor controllers.
//!
//! ## Features
//!
//! - Serial, UDP, TCP and file-backed virtual controllers
//! - Echo-checked commands with automatic stream resynchronization
//! - Per-device command serialization, async API using Tokio
//! - Position correction tables
//! - Tab-separated wire log (`XILOG`)
//!
//! ## Quick Start
//!
//! ```no_run
//! use ximc::{FrameReader, Ximc};
//!
//! #[tokio::main]
//! async fn main() -> ximc::Result<()> {
//!     let ximc = Ximc::from_env();
//!     let id = ximc.open("xi-emu:///tmp/virtual_controller.bin").await?;
//!
//!     let mut response = [0u8; 12];
//!     ximc.command_checked_str(id, "gpos", &mut response).await?;
//!
//!     let mut reader = FrameReader::new(&response);
//!     reader.pop_command()?;
//!     let position = reader.pop_i32()?;
//!     let _microsteps = reader.pop_i16()?;
//!     let consumed = reader.position();
//!     ximc.check_in_overrun(id, &response, consumed).await?;
//!     println!("position: {}", position);
//!
//!     ximc.close_device(id).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod filelog;
pub mod locks;
pub mod metadata;
pub mod mux;
pub mod protocol;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use config::ProtocolConfig;
pub use device::Ximc;
pub use error::{status_of, Error, Result};
pub use metadata::DeviceMetadata;
pub use mux::PortFailure;

// Re-export types
pub use ximc_core::{CommandName, CorrectionTable, FrameReader, FrameWriter, Status};
pub use ximc_transport::{Connector, Port, PortOptions};
pub use ximc_types::{DeviceId, Locator, TransportKind};
