//! Transport layer for XIMC controllers
//!
//! Every physical link is exposed as a [`Port`]: a byte channel with
//! bounded reads and writes. A read or write that makes no progress within
//! the port timeout returns `Ok(0)`; the protocol layer above decides
//! whether that is a stall or "try again". Ports are opened through a
//! [`Connector`], which maps a [`Locator`] to a concrete driver.

pub mod error;
pub mod serial;
pub mod tcp;
pub mod udp;
pub mod virtual_port;

pub use error::{is_disconnect, Error, Result};
pub use serial::SerialPort;
pub use tcp::TcpPort;
pub use udp::UdpPort;
pub use virtual_port::VirtualPort;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use ximc_core::constants::{DEFAULT_NET_PORT, PORT_TIMEOUT};
use ximc_types::{Locator, TransportKind};

/// Open byte channel to one controller
#[async_trait]
pub trait Port: Send + Sync {
    /// Transport behind this port
    fn kind(&self) -> TransportKind;

    /// Read up to `buf.len()` bytes; `Ok(0)` when nothing arrived in time
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write a prefix of `data`; `Ok(0)` when the link accepted nothing in time
    async fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Drop whatever is buffered in either direction
    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Release the underlying handle
    async fn close(&mut self) -> Result<()>;

    /// Human-readable endpoint for logs
    fn remote_addr(&self) -> String;
}

/// Options applied when a port is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortOptions {
    /// Bound on a single read or write
    pub timeout: Duration,
}

impl Default for PortOptions {
    fn default() -> Self {
        Self { timeout: PORT_TIMEOUT }
    }
}

/// Opens ports for locators
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, locator: &Locator, options: &PortOptions) -> Result<Box<dyn Port>>;
}

/// Connector for the drivers shipped in this crate
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, locator: &Locator, options: &PortOptions) -> Result<Box<dyn Port>> {
        debug!("Opening {}", locator);

        match locator {
            Locator::Serial { path } => {
                let mut port = SerialPort::new(path.clone()).with_timeout(options.timeout);
                port.open()?;
                Ok(Box::new(port))
            }
            Locator::Virtual { path, serial } => {
                let port = VirtualPort::open(path, *serial).await?;
                Ok(Box::new(port))
            }
            Locator::Udp { host, port } => {
                let mut udp = UdpPort::new(host.clone(), port.unwrap_or(DEFAULT_NET_PORT))
                    .with_timeout(options.timeout);
                udp.open().await?;
                Ok(Box::new(udp))
            }
            Locator::Tcp { host, port } => {
                let mut tcp = TcpPort::new(host.clone(), port.unwrap_or(DEFAULT_NET_PORT))
                    .with_timeout(options.timeout);
                tcp.open().await?;
                Ok(Box::new(tcp))
            }
            Locator::NetworkTunnel { .. } => Err(Error::Unsupported(
                "network tunnel support is not built".to_string(),
            )),
        }
    }
}
