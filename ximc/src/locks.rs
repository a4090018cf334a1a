//! Lock domains
//!
//! Three locks protect the engine:
//!
//! - the lifecycle lock serializes opening and closing devices;
//! - the registry's own mutex guards the handle map (see [`Registry`](crate::registry::Registry));
//! - each device's metadata mutex serializes commands to that device.
//!
//! With the `locks` feature disabled the lifecycle lock disappears and a
//! contended device fails fast with [`Error::Busy`](crate::Error::Busy) instead of waiting.

use tokio::sync::MutexGuard;

use crate::error::Result;
use crate::metadata::DeviceMetadata;
use crate::registry::DeviceSlot;

/// Serializes device open and close
#[derive(Debug, Default)]
pub struct LifecycleLock {
    #[cfg(feature = "locks")]
    inner: tokio::sync::Mutex<()>,
}

#[cfg(feature = "locks")]
pub type LifecycleGuard<'a> = MutexGuard<'a, ()>;

#[cfg(not(feature = "locks"))]
pub type LifecycleGuard<'a> = std::marker::PhantomData<&'a ()>;

impl LifecycleLock {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "locks")]
    pub async fn acquire(&self) -> LifecycleGuard<'_> {
        self.inner.lock().await
    }

    #[cfg(not(feature = "locks"))]
    pub async fn acquire(&self) -> LifecycleGuard<'_> {
        std::marker::PhantomData
    }
}

/// Take the per-device lock for one command
#[cfg(feature = "locks")]
pub async fn lock_device(slot: &DeviceSlot) -> Result<MutexGuard<'_, DeviceMetadata>> {
    Ok(slot.metadata.lock().await)
}

/// Take the per-device lock for one command
#[cfg(not(feature = "locks"))]
pub async fn lock_device(slot: &DeviceSlot) -> Result<MutexGuard<'_, DeviceMetadata>> {
    slot.metadata
        .try_lock()
        .map_err(|_| crate::error::Error::Busy(slot.id()))
}
