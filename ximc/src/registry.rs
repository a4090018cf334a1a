//! Device registry
//!
//! Maps device handles to their metadata. Handles grow strictly: a new
//! handle is one past the largest handle ever issued by this registry, so a
//! closed handle is never handed out again. Once `u32::MAX` has been issued
//! allocation fails instead of wrapping.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};
use ximc_types::DeviceId;

use crate::error::{Error, Result};
use crate::metadata::{DeviceMetadata, EngineContext};

/// Registry entry: a handle and its lock-protected metadata
#[derive(Debug)]
pub struct DeviceSlot {
    id: DeviceId,
    pub(crate) metadata: tokio::sync::Mutex<DeviceMetadata>,
}

impl DeviceSlot {
    pub fn id(&self) -> DeviceId {
        self.id
    }
}

#[derive(Debug, Default)]
struct Inner {
    devices: HashMap<DeviceId, Arc<DeviceSlot>>,
    high_water: u32,
}

/// Handle to metadata map
///
/// The inner lock guards map structure only and is never held across an
/// await.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new handle with a fresh, unopened record
    pub fn allocate(&self, ctx: Arc<EngineContext>) -> Result<(DeviceId, Arc<DeviceSlot>)> {
        let mut inner = self.inner.lock();

        let max_live = inner.devices.keys().map(|id| id.get()).max().unwrap_or(0);
        let Some(id) = DeviceId::new(max_live.max(inner.high_water)).next() else {
            error!("Device handle space exhausted");
            return Err(Error::HandlesExhausted);
        };
        if inner.devices.contains_key(&id) {
            error!("Device {} is already registered", id);
            return Err(Error::HandlesExhausted);
        }
        inner.high_water = id.get();

        let slot = Arc::new(DeviceSlot {
            id,
            metadata: tokio::sync::Mutex::new(DeviceMetadata::new(id, ctx)),
        });
        inner.devices.insert(id, Arc::clone(&slot));

        debug!("Allocated device {}", id);
        Ok((id, slot))
    }

    pub fn lookup(&self, id: DeviceId) -> Option<Arc<DeviceSlot>> {
        self.inner.lock().devices.get(&id).cloned()
    }

    /// Drop a record; an unknown handle is logged and ignored
    pub fn remove(&self, id: DeviceId) -> Option<Arc<DeviceSlot>> {
        let removed = self.inner.lock().devices.remove(&id);
        if removed.is_none() {
            warn!("Removing unknown device {}", id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().devices.is_empty()
    }

    /// Live handles, ascending
    pub fn ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.inner.lock().devices.keys().copied().collect();
        ids.sort();
        ids
    }
}
