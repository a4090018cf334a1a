//! Per-device state

use std::sync::Arc;
use std::time::Duration;

use ximc_core::CorrectionTable;
use ximc_transport::Port;
use ximc_types::{DeviceId, TransportKind};

use crate::config::ProtocolConfig;
use crate::filelog::FileLog;

/// Engine-wide settings shared by every open device
#[derive(Debug, Default)]
pub struct EngineContext {
    pub config: ProtocolConfig,
    pub filelog: FileLog,
}

impl EngineContext {
    pub fn new(config: ProtocolConfig) -> Self {
        let filelog = FileLog::new(config.log_path.clone());
        Self { config, filelog }
    }
}

/// State of one open device
///
/// Owned by the registry and only reachable through the device lock.
pub struct DeviceMetadata {
    pub(crate) id: DeviceId,
    pub(crate) kind: TransportKind,
    pub(crate) port: Option<Box<dyn Port>>,
    pub(crate) logical_timeout: Duration,
    pub(crate) port_timeout: Duration,
    pub(crate) correction: Option<CorrectionTable>,
    pub(crate) ctx: Arc<EngineContext>,
}

impl DeviceMetadata {
    /// Fresh record: unknown transport, no port
    pub(crate) fn new(id: DeviceId, ctx: Arc<EngineContext>) -> Self {
        Self {
            id,
            kind: TransportKind::Unknown,
            port: None,
            logical_timeout: Duration::ZERO,
            port_timeout: ctx.config.port_timeout,
            correction: None,
            ctx,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn logical_timeout(&self) -> Duration {
        self.logical_timeout
    }

    pub fn port_timeout(&self) -> Duration {
        self.port_timeout
    }

    pub fn correction(&self) -> Option<&CorrectionTable> {
        self.correction.as_ref()
    }

    /// Port is attached and the transport is known
    pub fn is_open(&self) -> bool {
        self.kind != TransportKind::Unknown && self.port.is_some()
    }

    pub(crate) fn config(&self) -> &ProtocolConfig {
        &self.ctx.config
    }

    pub(crate) fn filelog(&self) -> &FileLog {
        &self.ctx.filelog
    }
}

impl std::fmt::Debug for DeviceMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMetadata")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("port", &self.port.as_ref().map(|p| p.remote_addr()))
            .field("logical_timeout", &self.logical_timeout)
            .field("port_timeout", &self.port_timeout)
            .field("correction_rows", &self.correction.as_ref().map(CorrectionTable::len))
            .finish()
    }
}
