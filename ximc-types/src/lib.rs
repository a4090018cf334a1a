//! Shared vocabulary for the ximc crates: device handles, transport kinds
//! and device locators.

pub mod device_id;
pub mod error;
pub mod locator;
pub mod transport_kind;

pub use device_id::DeviceId;
pub use error::{Error, Result};
pub use locator::Locator;
pub use transport_kind::TransportKind;
