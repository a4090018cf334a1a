//! In-memory ports for engine tests

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use ximc_transport::{Connector, Port, PortOptions};
use ximc_types::{DeviceId, Locator, TransportKind};

use crate::config::ProtocolConfig;
use crate::metadata::{DeviceMetadata, EngineContext};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// Observable state behind a [`ScriptedPort`]
#[derive(Default)]
pub struct ScriptState {
    /// Every byte accepted by `write`, in order
    pub written: Vec<u8>,
    /// Bytes served by `read`
    pub rx: VecDeque<u8>,
    pub flushes: usize,
    pub closed: bool,
    /// Reads that return nothing before `rx` is served
    pub stalls_before_data: usize,
    /// Upper bound on bytes accepted per write; `Some(0)` stalls writes
    pub write_chunk: Option<usize>,
    /// Upper bound on bytes returned per read
    pub read_chunk: Option<usize>,
    pub write_error: Option<io::ErrorKind>,
    pub read_error: Option<io::ErrorKind>,
    /// Reads that fail with `Other` before reads behave normally
    pub read_errors_left: usize,
    pub flush_error: Option<io::ErrorKind>,
    responder: Option<Responder>,
}

/// Shared view of a scripted port, kept by the test
#[derive(Clone, Default)]
pub struct ScriptHandle(Arc<Mutex<ScriptState>>);

impl ScriptHandle {
    pub fn state(&self) -> parking_lot::MutexGuard<'_, ScriptState> {
        self.0.lock()
    }

    /// Queue bytes for the next reads
    pub fn push_rx(&self, data: &[u8]) {
        self.0.lock().rx.extend(data.iter().copied());
    }

    /// Answer every write with whatever `f` returns
    pub fn respond_with(&self, f: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) {
        self.0.lock().responder = Some(Box::new(f));
    }

    /// Answer zero bursts with zeros, everything else with `reply`
    pub fn respond_zeros_then(&self, mut reply: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) {
        self.respond_with(move |request| {
            if request.iter().all(|&b| b == 0) {
                request.to_vec()
            } else {
                reply(request)
            }
        });
    }

    pub fn written(&self) -> Vec<u8> {
        self.0.lock().written.clone()
    }

    pub fn flushes(&self) -> usize {
        self.0.lock().flushes
    }

    /// Longest run of zero bytes written
    pub fn longest_zero_run(&self) -> usize {
        let state = self.0.lock();
        let mut best = 0;
        let mut run = 0;
        for &b in &state.written {
            run = if b == 0 { run + 1 } else { 0 };
            best = best.max(run);
        }
        best
    }
}

/// Port that serves canned bytes and records what it is sent
pub struct ScriptedPort {
    kind: TransportKind,
    script: ScriptHandle,
}

impl ScriptedPort {
    pub fn new(kind: TransportKind) -> (Self, ScriptHandle) {
        let script = ScriptHandle::default();
        (
            Self {
                kind,
                script: script.clone(),
            },
            script,
        )
    }
}

#[async_trait]
impl Port for ScriptedPort {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.script.0.lock();
        if let Some(kind) = state.read_error {
            return Err(io::Error::from(kind));
        }
        if state.read_errors_left > 0 {
            state.read_errors_left -= 1;
            return Err(io::Error::other("transient read failure"));
        }
        if state.stalls_before_data > 0 {
            state.stalls_before_data -= 1;
            return Ok(0);
        }

        let limit = state.read_chunk.unwrap_or(usize::MAX);
        let n = buf.len().min(state.rx.len()).min(limit);
        for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.script.0.lock();
        if let Some(kind) = state.write_error {
            return Err(io::Error::from(kind));
        }

        let n = data.len().min(state.write_chunk.unwrap_or(usize::MAX));
        state.written.extend_from_slice(&data[..n]);

        if n > 0 {
            if let Some(responder) = state.responder.as_mut() {
                let reply = responder(&data[..n]);
                state.rx.extend(reply);
            }
        }
        Ok(n)
    }

    async fn flush(&mut self) -> io::Result<()> {
        let mut state = self.script.0.lock();
        state.flushes += 1;
        if let Some(kind) = state.flush_error {
            return Err(io::Error::from(kind));
        }
        state.rx.clear();
        Ok(())
    }

    async fn close(&mut self) -> ximc_transport::Result<()> {
        self.script.0.lock().closed = true;
        Ok(())
    }

    fn remote_addr(&self) -> String {
        "scripted".to_string()
    }
}

/// Connector that hands out scripted ports sharing one script
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    pub script: ScriptHandle,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        locator: &Locator,
        _options: &PortOptions,
    ) -> ximc_transport::Result<Box<dyn Port>> {
        Ok(Box::new(ScriptedPort {
            kind: locator.kind(),
            script: self.script.clone(),
        }))
    }
}

/// Timings small enough for paused-clock tests
pub fn fast_config() -> ProtocolConfig {
    ProtocolConfig::default()
        .with_wait_before_retry(Duration::from_millis(10))
        .with_tunnel_read_budget(Duration::from_millis(20))
        .with_default_timeout(Duration::from_millis(50))
}

/// Open device record wired to a scripted port
pub fn scripted_device(
    kind: TransportKind,
    config: ProtocolConfig,
) -> (DeviceMetadata, ScriptHandle) {
    let logical_timeout = config.default_timeout;
    let mut dm = DeviceMetadata::new(DeviceId::new(1), Arc::new(EngineContext::new(config)));
    let (port, script) = ScriptedPort::new(kind);
    dm.kind = kind;
    dm.port = Some(Box::new(port));
    dm.logical_timeout = logical_timeout;
    (dm, script)
}

/// Frame `name + payload + crc(payload)`
pub fn frame(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = name.to_vec();
    out.extend_from_slice(payload);
    out.extend_from_slice(&ximc_core::crc::calculate(payload).to_le_bytes());
    out
}
