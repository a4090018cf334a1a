//! UDP transport
//!
//! Controllers with an Ethernet interface answer each request datagram with
//! one response datagram. The protocol layer reads responses in pieces
//! (first byte, header, payload), so the unread tail of a datagram is kept
//! and served to the next read.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use ximc_core::constants::PORT_TIMEOUT;
use ximc_types::TransportKind;

use crate::{error::*, Port};

const MAX_DATAGRAM: usize = 2048;

/// UDP transport for network-attached controllers
pub struct UdpPort {
    addr: String,
    port: u16,
    socket: Option<UdpSocket>,
    remote_addr: Option<SocketAddr>,
    pending: BytesMut,
    timeout: Duration,
}

impl UdpPort {
    /// Create new UDP transport
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            socket: None,
            remote_addr: None,
            pending: BytesMut::new(),
            timeout: PORT_TIMEOUT,
        }
    }

    /// Set per read/write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Resolve address to SocketAddr
    async fn resolve_addr(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.remote_addr {
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

        self.remote_addr = Some(*addr);
        Ok(*addr)
    }

    /// Bind a local socket and fix the remote peer
    pub async fn open(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let remote = self.resolve_addr().await?;

        debug!("Connecting to {} via UDP...", remote);

        let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local).await.map_err(Error::Io)?;

        // Sets the default send/recv target
        socket.connect(remote).await.map_err(Error::Io)?;

        debug!("Connected to {} via UDP", remote);

        self.socket = Some(socket);
        Ok(())
    }
}

#[async_trait]
impl Port for UdpPort {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            let socket = self
                .socket
                .as_ref()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

            let mut datagram = [0u8; MAX_DATAGRAM];
            let n = match timeout(self.timeout, socket.recv(&mut datagram)).await {
                Err(_) => return Ok(0),
                Ok(Err(e)) => {
                    warn!("Read error: {}", e);
                    return Err(e);
                }
                Ok(Ok(n)) => n,
            };

            if n == MAX_DATAGRAM {
                warn!(
                    "Datagram from {} filled the {}-byte buffer, the rest is lost",
                    self.remote_addr(),
                    MAX_DATAGRAM
                );
            }
            trace!("Received {} bytes via UDP: {:02X?}", n, &datagram[..n.min(32)]);
            self.pending.extend_from_slice(&datagram[..n]);
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        trace!(
            "Sending {} bytes via UDP: {:02X?}",
            data.len(),
            &data[..data.len().min(32)]
        );

        match timeout(self.timeout, socket.send(data)).await {
            Err(_) => Ok(0),
            Ok(result) => result,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.pending.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            debug!("Disconnecting from {}...", self.remote_addr());
        }

        self.pending.clear();
        self.remote_addr = None;
        Ok(())
    }

    fn remote_addr(&self) -> String {
        self.remote_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| format!("{}:{}", self.addr, self.port))
    }
}
