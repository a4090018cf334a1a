//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use ximc_core::constants::{
    DEFAULT_TIMEOUT, LOG_PATH_ENV, PORT_TIMEOUT, SYNC_RETRY_COUNT, SYNC_ZERO_COUNT,
    WAIT_BEFORE_RETRY_TIME,
};

/// Tunables of the synchronization and receive loops
///
/// The defaults match what controllers expect; tests shrink the timings.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ximc::ProtocolConfig;
///
/// let config = ProtocolConfig::default()
///     .with_wait_before_retry(Duration::from_millis(10))
///     .with_sync_retry_count(2);
/// assert_eq!(config.sync_zero_count, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Zero bytes in one synchronization burst
    pub sync_zero_count: usize,

    /// Bursts attempted before a device is declared lost
    pub sync_retry_count: usize,

    /// Minimum spacing between receive attempts after a stall
    pub wait_before_retry: Duration,

    /// How long a network tunnel read polls for data
    pub tunnel_read_budget: Duration,

    /// Per read/write timeout of newly opened ports
    pub port_timeout: Duration,

    /// Logical timeout used by [`Ximc::open`](crate::Ximc::open)
    pub default_timeout: Duration,

    /// Diagnostic wire log; `None` disables it
    pub log_path: Option<PathBuf>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            sync_zero_count: SYNC_ZERO_COUNT,
            sync_retry_count: SYNC_RETRY_COUNT,
            wait_before_retry: WAIT_BEFORE_RETRY_TIME,
            tunnel_read_budget: DEFAULT_TIMEOUT,
            port_timeout: PORT_TIMEOUT,
            default_timeout: DEFAULT_TIMEOUT,
            log_path: None,
        }
    }
}

impl ProtocolConfig {
    /// Defaults, with the wire log path taken from `XILOG`
    pub fn from_env() -> Self {
        let log_path = std::env::var_os(LOG_PATH_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        Self::default().with_log_path(log_path)
    }

    pub fn with_sync_zero_count(mut self, count: usize) -> Self {
        self.sync_zero_count = count;
        self
    }

    pub fn with_sync_retry_count(mut self, count: usize) -> Self {
        self.sync_retry_count = count;
        self
    }

    pub fn with_wait_before_retry(mut self, wait: Duration) -> Self {
        self.wait_before_retry = wait;
        self
    }

    pub fn with_tunnel_read_budget(mut self, budget: Duration) -> Self {
        self.tunnel_read_budget = budget;
        self
    }

    pub fn with_port_timeout(mut self, timeout: Duration) -> Self {
        self.port_timeout = timeout;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_log_path(mut self, path: Option<PathBuf>) -> Self {
        self.log_path = path;
        self
    }
}
