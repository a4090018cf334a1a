//! # ximc-core
//!
//! Core protocol implementation for XIMC motor controllers.
//!
//! This crate provides the low-level protocol primitives:
//! - Status codes and error taxonomy
//! - CRC-16 calculation
//! - Frame cursors and overrun checks
//! - Command names and error sentinels
//! - Position correction tables
//! - Protocol constants

pub mod command;
pub mod constants;
pub mod correction;
pub mod crc;
pub mod error;
pub mod frame;

pub use command::CommandName;
pub use correction::CorrectionTable;
pub use error::{Error, Result, Status};
pub use frame::{FrameReader, FrameWriter};

/// Protocol generation implemented by this crate
///
/// Frames are `command + payload + crc`; older firmware put the command last.
pub const PROTOCOL_VERSION: &str = "14";
