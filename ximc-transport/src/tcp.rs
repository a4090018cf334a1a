//! TCP transport

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use ximc_core::constants::PORT_TIMEOUT;
use ximc_types::TransportKind;

use crate::{error::*, Port};

/// TCP transport for network-attached controllers
pub struct TcpPort {
    addr: String,
    port: u16,
    socket_addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
    timeout: Duration,
}

impl TcpPort {
    /// Create new TCP transport
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            socket_addr: None,
            stream: None,
            connect_timeout: Duration::from_secs(5),
            timeout: PORT_TIMEOUT,
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set per read/write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Resolve address to SocketAddr
    async fn resolve_addr(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.socket_addr {
            return Ok(addr);
        }

        let addr_str = format!("{}:{}", self.addr, self.port);

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr_str, e)))?
            .collect();

        let addr = addrs
            .first()
            .ok_or_else(|| Error::InvalidAddress(format!("No addresses found for {}", addr_str)))?;

        self.socket_addr = Some(*addr);
        Ok(*addr)
    }

    /// Connect to the controller
    pub async fn open(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let addr = self.resolve_addr().await?;

        debug!("Connecting to {}...", addr);

        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::Io)?;

        // Commands are tiny; do not let Nagle hold them back
        stream.set_nodelay(true)?;

        debug!("Connected to {}", addr);

        self.stream = Some(stream);
        Ok(())
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

#[async_trait]
impl Port for TcpPort {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.timeout;
        let stream = self.stream()?;

        match timeout(limit, stream.read(buf)).await {
            Err(_) => Ok(0),
            Ok(Ok(0)) if !buf.is_empty() => {
                warn!("Connection closed by remote");
                Err(io::Error::from(io::ErrorKind::ConnectionReset))
            }
            Ok(Ok(n)) => {
                trace!("Received {} bytes: {:02X?}", n, &buf[..n.min(16)]);
                Ok(n)
            }
            Ok(Err(e)) => Err(e),
        }
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let limit = self.timeout;
        let stream = self.stream()?;

        trace!("Sending {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        match timeout(limit, stream.write(data)).await {
            Err(_) => Ok(0),
            Ok(result) => result,
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("Disconnecting from {}...", self.remote_addr());

            // Graceful shutdown
            let _ = stream.shutdown().await;
        }

        self.socket_addr = None;
        Ok(())
    }

    fn remote_addr(&self) -> String {
        self.socket_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| format!("{}:{}", self.addr, self.port))
    }
}

impl Drop for TcpPort {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!("TCP port dropped while still connected");
        }
    }
}
