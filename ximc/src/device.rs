//! Caller-facing engine

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};
use ximc_core::{CorrectionTable, FrameReader};
use ximc_transport::{Connector, DefaultConnector, PortOptions};
use ximc_types::{DeviceId, Locator};

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::locks::{self, LifecycleLock};
use crate::metadata::{DeviceMetadata, EngineContext};
use crate::mux;
use crate::protocol;
use crate::registry::{DeviceSlot, Registry};

/// XIMC controller engine
///
/// Owns the registry of open devices. Commands to one device are
/// serialized; commands to different devices run concurrently.
///
/// # Examples
///
/// ```no_run
/// use ximc::Ximc;
///
/// #[tokio::main]
/// async fn main() -> ximc::Result<()> {
///     let ximc = Ximc::from_env();
///     let id = ximc.open("xi-com:///dev/ximc/000017A2").await?;
///
///     ximc.command_checked_echo_str(id, "stop").await?;
///
///     ximc.close_device(id).await?;
///     Ok(())
/// }
/// ```
pub struct Ximc {
    registry: Registry,
    lifecycle: LifecycleLock,
    connector: Arc<dyn Connector>,
    ctx: Arc<EngineContext>,
}

impl Ximc {
    pub fn new(config: ProtocolConfig) -> Self {
        Self {
            registry: Registry::new(),
            lifecycle: LifecycleLock::new(),
            connector: Arc::new(DefaultConnector),
            ctx: Arc::new(EngineContext::new(config)),
        }
    }

    /// Engine configured from the environment (`XILOG`)
    pub fn from_env() -> Self {
        Self::new(ProtocolConfig::from_env())
    }

    /// Open ports through a custom connector
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.ctx.config
    }

    /// Open a device with the default logical timeout
    pub async fn open(&self, uri: &str) -> Result<DeviceId> {
        self.open_device(uri, self.ctx.config.default_timeout).await
    }

    /// Open a device by locator
    ///
    /// `timeout` bounds each logical receive on this device.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The locator cannot be parsed or names an unknown scheme
    /// - The transport is not available in this build
    /// - The port cannot be opened
    pub async fn open_device(&self, uri: &str, timeout: Duration) -> Result<DeviceId> {
        let _lifecycle = self.lifecycle.acquire().await;

        let (id, slot) = self.registry.allocate(Arc::clone(&self.ctx))?;
        match self.attach(&slot, uri, timeout).await {
            Ok(()) => {
                info!("Opened device {} at {}", id, uri);
                Ok(id)
            }
            Err(e) => {
                error!("Cannot open {}: {}", uri, e);
                self.registry.remove(id);
                Err(e)
            }
        }
    }

    async fn attach(&self, slot: &DeviceSlot, uri: &str, timeout: Duration) -> Result<()> {
        let locator: Locator = uri.parse()?;

        let mut dm = slot.metadata.lock().await;
        // Ports pick their timeout up at open
        dm.port_timeout = self.ctx.config.port_timeout;
        dm.logical_timeout = timeout;
        dm.kind = locator.kind();
        dm.filelog().text(dm.kind, dm.id, "Opening port...");

        let options = PortOptions {
            timeout: dm.port_timeout,
        };
        let port = self.connector.connect(&locator, &options).await?;
        debug!("Device {} attached to {}", dm.id, port.remote_addr());
        dm.port = Some(port);
        Ok(())
    }

    /// Close a device and release its handle
    ///
    /// Waits for a command in flight on the same device. The handle is
    /// released even when closing the port fails.
    pub async fn close_device(&self, id: DeviceId) -> Result<()> {
        let _lifecycle = self.lifecycle.acquire().await;

        let slot = self.slot(id)?;
        let result = {
            let mut dm = slot.metadata.lock().await;
            dm.filelog().text(dm.kind, dm.id, "Closing port...");
            dm.correction = None;
            match dm.port.take() {
                Some(mut port) => port.close().await.map_err(Error::from),
                None => Ok(()),
            }
        };

        self.registry.remove(id);
        info!("Closed device {}", id);
        result
    }

    /// Kept for API compatibility; locks are released automatically
    pub fn reset_locks(&self) -> Result<()> {
        Ok(())
    }

    /// Handles of all open devices, ascending
    pub fn open_devices(&self) -> Vec<DeviceId> {
        self.registry.ids()
    }

    fn slot(&self, id: DeviceId) -> Result<Arc<DeviceSlot>> {
        self.registry.lookup(id).ok_or_else(|| {
            error!("Cannot get metadata for device {}", id);
            Error::NotOpen(id)
        })
    }

    async fn checked(
        &self,
        id: DeviceId,
        command: &[u8],
        response: Option<&mut [u8]>,
        need_sync: bool,
    ) -> Result<()> {
        let slot = self.slot(id)?;
        let mut dm = locks::lock_device(&slot).await?;
        if dm.port.is_none() {
            return Err(Error::HalfOpen(id));
        }
        protocol::command_checked_impl(&mut dm, command, response, need_sync).await?;
        Ok(())
    }

    /// Send a command and read the full answer frame into `response`
    ///
    /// Resynchronizes the stream if the answer does not arrive in time.
    pub async fn command_checked(&self, id: DeviceId, command: &[u8], response: &mut [u8]) -> Result<()> {
        self.checked(id, command, Some(response), true).await
    }

    /// Same as [`command_checked`](Self::command_checked), without resynchronization
    pub async fn command_checked_unsynced(
        &self,
        id: DeviceId,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<()> {
        self.checked(id, command, Some(response), false).await
    }

    /// Send a bare 4-character command and read the answer frame
    pub async fn command_checked_str(&self, id: DeviceId, command: &str, response: &mut [u8]) -> Result<()> {
        self.checked(id, name_bytes(command), Some(response), true).await
    }

    pub async fn command_checked_str_unsynced(
        &self,
        id: DeviceId,
        command: &str,
        response: &mut [u8],
    ) -> Result<()> {
        self.checked(id, name_bytes(command), Some(response), false).await
    }

    /// Send a command that is answered by its bare name
    pub async fn command_checked_echo(&self, id: DeviceId, command: &[u8]) -> Result<()> {
        let mut response = [0u8; 4];
        self.checked(id, command, Some(&mut response[..]), true).await
    }

    pub async fn command_checked_echo_unsynced(&self, id: DeviceId, command: &[u8]) -> Result<()> {
        let mut response = [0u8; 4];
        self.checked(id, command, Some(&mut response[..]), false).await
    }

    /// Send a bare 4-character command that is answered by its name
    pub async fn command_checked_echo_str(&self, id: DeviceId, command: &str) -> Result<()> {
        self.command_checked_echo(id, name_bytes(command)).await
    }

    pub async fn command_checked_echo_str_unsynced(&self, id: DeviceId, command: &str) -> Result<()> {
        self.command_checked_echo_unsynced(id, name_bytes(command)).await
    }

    /// Same as [`command_checked_echo_str`](Self::command_checked_echo_str);
    /// every command already holds the device lock
    pub async fn command_checked_echo_str_locked(&self, id: DeviceId, command: &str) -> Result<()> {
        self.command_checked_echo_str(id, command).await
    }

    /// Send a command without waiting for an answer
    pub async fn send_command(&self, id: DeviceId, command: &[u8]) -> Result<()> {
        self.checked(id, command, None, true).await
    }

    /// Realign the byte stream with the controller
    pub async fn synchronize(&self, id: DeviceId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut dm = locks::lock_device(&slot).await?;
        protocol::synchronize(&mut dm).await?;
        Ok(())
    }

    /// Drop whatever the device's port has buffered
    pub async fn flush(&self, id: DeviceId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut dm = locks::lock_device(&slot).await?;
        mux::flush(&mut dm)
            .await
            .map_err(|failure| port_failure(&dm, failure))
    }

    /// Verify a decoded answer frame
    ///
    /// `consumed` is the number of bytes the decoder read, command name
    /// included; only the CRC may follow. A CRC mismatch means the stream
    /// can no longer be trusted, so the device is resynchronized and
    /// flushed before the error is returned.
    pub async fn check_in_overrun(&self, id: DeviceId, response: &[u8], consumed: usize) -> Result<()> {
        let mut reader = FrameReader::new(response);
        reader.pop_bytes(consumed)?;

        match reader.finish() {
            Err(e @ ximc_core::Error::ChecksumMismatch { .. }) => {
                let slot = self.slot(id)?;
                let mut dm = locks::lock_device(&slot).await?;
                let _ = protocol::synchronize(&mut dm).await;
                let _ = mux::flush(&mut dm).await;
                Err(e.into())
            }
            result => Ok(result?),
        }
    }

    /// Load a correction table for a device, or clear it with `None`
    ///
    /// The previous table is dropped first, so a failed load leaves the
    /// device without correction.
    pub async fn set_correction_table(&self, id: DeviceId, path: Option<&Path>) -> Result<()> {
        let slot = self.slot(id)?;
        let mut dm = locks::lock_device(&slot).await?;
        dm.correction = None;

        let Some(path) = path else {
            debug!("Device {}: correction table cleared", id);
            return Ok(());
        };

        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            error!("Error opening calibration table file {}: {}", path.display(), e);
            ximc_core::Error::Io(e)
        })?;
        let table = CorrectionTable::parse(&text)?;
        info!(
            "Device {}: loaded correction table {} ({} rows)",
            id,
            path.display(),
            table.len()
        );
        dm.correction = Some(table);
        Ok(())
    }

    /// Map a controller position to the user's corrected coordinate
    ///
    /// `None` when the device has no correction table.
    pub async fn correct_to_user(&self, id: DeviceId, position: f32) -> Result<Option<f32>> {
        self.with_table(id, |table| table.apply_forward(position)).await
    }

    /// Map a user coordinate to the controller position
    ///
    /// `None` when the device has no correction table.
    pub async fn correct_to_device(&self, id: DeviceId, position: f32) -> Result<Option<f32>> {
        self.with_table(id, |table| table.apply_inverse(position)).await
    }

    async fn with_table(
        &self,
        id: DeviceId,
        f: impl FnOnce(&CorrectionTable) -> f32,
    ) -> Result<Option<f32>> {
        let slot = self.slot(id)?;
        let dm = locks::lock_device(&slot).await?;
        Ok(dm.correction.as_ref().map(f))
    }
}

impl Default for Ximc {
    fn default() -> Self {
        Self::new(ProtocolConfig::default())
    }
}

/// First four bytes of a command string; shorter strings are rejected later
fn name_bytes(command: &str) -> &[u8] {
    let bytes = command.as_bytes();
    &bytes[..bytes.len().min(4)]
}

fn port_failure(dm: &DeviceMetadata, failure: mux::PortFailure) -> Error {
    match failure {
        mux::PortFailure::NoDevice => {
            ximc_core::Error::no_device(format!("device {} lost", dm.id())).into()
        }
        other => ximc_core::Error::failed(format!("device {}: {}", dm.id(), other)).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{frame, ScriptedConnector};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use ximc_core::{CommandName, FrameWriter, Status};

    fn scripted() -> (Ximc, ScriptedConnector) {
        let connector = ScriptedConnector::default();
        let ximc = Ximc::new(crate::test_support::fast_config())
            .with_connector(Arc::new(connector.clone()));
        (ximc, connector)
    }

    fn emu_uri(dir: &tempfile::TempDir) -> String {
        format!("xi-emu://{}/dev.bin?serial=56", dir.path().display())
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let (ximc, connector) = scripted();

        let id = ximc.open("xi-com:/dev/ttyACM0").await.unwrap();
        assert_eq!(ximc.open_devices(), vec![id]);

        ximc.close_device(id).await.unwrap();
        assert!(ximc.open_devices().is_empty());
        assert!(connector.script.state().closed);

        // Already closed
        let err = ximc.close_device(id).await.unwrap_err();
        assert_eq!(err.status(), Status::Error);
    }

    #[tokio::test]
    async fn test_handles_grow_across_close() {
        let (ximc, _) = scripted();

        let a = ximc.open("xi-com:/dev/ttyACM0").await.unwrap();
        let b = ximc.open("xi-com:/dev/ttyACM1").await.unwrap();
        ximc.close_device(b).await.unwrap();
        let c = ximc.open("xi-com:/dev/ttyACM1").await.unwrap();

        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_locator() {
        let (ximc, _) = scripted();

        let err = ximc.open("xi-foo://nowhere").await.unwrap_err();
        assert_eq!(err.status(), Status::Error);
        assert!(ximc.open_devices().is_empty());
    }

    #[tokio::test]
    async fn test_network_tunnel_not_built() {
        let ximc = Ximc::default();

        let err = ximc.open("xi-net://192.168.0.5/000017A2").await.unwrap_err();
        assert_eq!(err.status(), Status::NotImplemented);
        assert!(ximc.open_devices().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let ximc = Ximc::default();

        let err = ximc
            .command_checked_echo_str(DeviceId::new(42), "stop")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotOpen(_)));
        assert_eq!(err.status(), Status::Error);
        assert!(ximc.correct_to_user(DeviceId::new(42), 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_reset_locks_is_noop() {
        assert!(Ximc::default().reset_locks().is_ok());
    }

    #[tokio::test]
    async fn test_end_to_end_virtual_controller() {
        let dir = tempfile::tempdir().unwrap();
        let ximc = Ximc::new(crate::test_support::fast_config());
        let id = ximc.open(&emu_uri(&dir)).await.unwrap();

        // Store a position, then read it back
        let mut set = FrameWriter::with_command(CommandName::new(*b"spos"), 4 + 4 + 2 + 2);
        set.push_i32(1000).unwrap();
        set.push_i16(-5).unwrap();
        set.push_crc().unwrap();
        let set = set.finish().unwrap();
        ximc.command_checked_echo(id, &set).await.unwrap();

        let mut response = [0u8; 4 + 4 + 2 + 2];
        ximc.command_checked_str(id, "gpos", &mut response).await.unwrap();

        let mut reader = FrameReader::new(&response);
        assert_eq!(reader.pop_command().unwrap(), CommandName::new(*b"gpos"));
        assert_eq!(reader.pop_i32().unwrap(), 1000);
        assert_eq!(reader.pop_i16().unwrap(), -5);
        let consumed = reader.position();
        reader.finish().unwrap();
        ximc.check_in_overrun(id, &response, consumed).await.unwrap();

        ximc.close_device(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_virtual_controller_value_error() {
        let dir = tempfile::tempdir().unwrap();
        let ximc = Ximc::new(crate::test_support::fast_config());
        let id = ximc.open(&emu_uri(&dir)).await.unwrap();

        // Nothing stored under "eng" yet
        let mut response = [0u8; 8];
        let err = ximc.command_checked_str(id, "geng", &mut response).await.unwrap_err();
        assert_eq!(err.status(), Status::ValueError);

        ximc.close_device(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupted_crc_passes_echo_stage() {
        let (ximc, connector) = scripted();
        let mut answer = frame(b"gpos", &[0x10, 0x27, 0, 0, 0xFB, 0xFF]);
        let last = answer.len() - 1;
        answer[last] ^= 0x5A;
        let canned = answer.clone();
        connector.script.respond_zeros_then(move |_| canned.clone());

        let id = ximc.open("xi-com:/dev/ttyACM0").await.unwrap();

        let mut response = vec![0u8; answer.len()];
        ximc.command_checked_str(id, "gpos", &mut response).await.unwrap();

        let mut reader = FrameReader::new(&response);
        reader.pop_command().unwrap();
        reader.pop_i32().unwrap();
        reader.pop_i16().unwrap();
        let consumed = reader.position();
        assert!(matches!(
            reader.finish(),
            Err(ximc_core::Error::ChecksumMismatch { .. })
        ));

        let err = ximc.check_in_overrun(id, &response, consumed).await.unwrap_err();
        assert_eq!(err.status(), Status::Error);
        assert!(connector.script.longest_zero_run() >= 64);
    }

    #[tokio::test]
    async fn test_check_in_overrun_length_first() {
        let (ximc, connector) = scripted();
        let id = ximc.open("xi-com:/dev/ttyACM0").await.unwrap();

        let response = frame(b"gpos", &[1, 2, 3, 4]);
        let err = ximc.check_in_overrun(id, &response, 6).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Core(ximc_core::Error::Overrun { .. })
        ));
        assert!(connector.script.written().is_empty());
    }

    #[tokio::test]
    async fn test_half_open_device() {
        let (ximc, _) = scripted();
        let id = ximc.open("xi-com:/dev/ttyACM0").await.unwrap();

        let slot = ximc.slot(id).unwrap();
        slot.metadata.lock().await.port = None;

        let err = ximc.command_checked_echo_str(id, "stop").await.unwrap_err();
        assert!(matches!(err, Error::HalfOpen(_)));
    }

    #[tokio::test]
    async fn test_correction_table_lifecycle() {
        let (ximc, _) = scripted();
        let id = ximc.open("xi-com:/dev/ttyACM0").await.unwrap();

        assert_eq!(ximc.correct_to_user(id, 2.5).await.unwrap(), None);

        let mut good = tempfile::NamedTempFile::new().unwrap();
        good.write_all(b"X\tdX\n0\t0\n5\t0.01\n10\t0.03\n").unwrap();
        ximc.set_correction_table(id, Some(good.path())).await.unwrap();

        let user = ximc.correct_to_user(id, 2.5).await.unwrap().unwrap();
        assert!((user - 2.505).abs() < 1e-4);
        let device = ximc.correct_to_device(id, user).await.unwrap().unwrap();
        assert!((device - 2.5).abs() < 1e-4);

        // A rejected table leaves no table behind
        let mut bad = tempfile::NamedTempFile::new().unwrap();
        bad.write_all(b"X\tdX\n0\t0\n5\t0.01\n4\t0.02\n").unwrap();
        let err = ximc
            .set_correction_table(id, Some(bad.path()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Status::Error);
        assert_eq!(ximc.correct_to_user(id, 2.5).await.unwrap(), None);

        ximc.set_correction_table(id, Some(good.path())).await.unwrap();
        ximc.set_correction_table(id, None).await.unwrap();
        assert_eq!(ximc.correct_to_device(id, 2.5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_devices() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let ximc = Arc::new(Ximc::new(crate::test_support::fast_config()));

        let a = ximc.open(&emu_uri(&dir_a)).await.unwrap();
        let b = ximc.open(&emu_uri(&dir_b)).await.unwrap();

        let tasks: Vec<_> = [a, b, a, b]
            .into_iter()
            .map(|id| {
                let ximc = Arc::clone(&ximc);
                tokio::spawn(async move { ximc.command_checked_echo_str(id, "stop").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_flush_and_synchronize() {
        let (ximc, connector) = scripted();
        connector.script.respond_zeros_then(|req| req.to_vec());
        let id = ximc.open("xi-com:/dev/ttyACM0").await.unwrap();

        ximc.synchronize(id).await.unwrap();
        ximc.flush(id).await.unwrap();
        assert_eq!(connector.script.flushes(), 1);
    }
}
