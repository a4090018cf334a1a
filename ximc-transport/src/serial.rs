//! Serial transport
//!
//! USB controllers enumerate as CDC-ACM serial devices. The line settings
//! are fixed (115200 8N1); the device ignores them but some host drivers
//! refuse to open a port without a sane configuration.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort as _, SerialPortBuilderExt, SerialStream};
use tracing::{debug, trace, warn};
use ximc_core::constants::{PORT_TIMEOUT, SERIAL_BAUD_RATE};
use ximc_types::TransportKind;

use crate::{error::*, Port};

/// Serial (USB CDC) transport
pub struct SerialPort {
    path: String,
    stream: Option<SerialStream>,
    timeout: Duration,
}

impl SerialPort {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stream: None,
            timeout: PORT_TIMEOUT,
        }
    }

    /// Set per read/write timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the device node
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        debug!("Opening serial port {}...", self.path);

        #[allow(unused_mut)]
        let mut stream = tokio_serial::new(&self.path, SERIAL_BAUD_RATE)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.timeout)
            .open_native_async()?;

        // Another process talking to the same controller would corrupt framing
        #[cfg(unix)]
        stream.set_exclusive(true)?;

        debug!("Opened serial port {}", self.path);

        self.stream = Some(stream);
        Ok(())
    }

    fn stream(&mut self) -> io::Result<&mut SerialStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

#[async_trait]
impl Port for SerialPort {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.timeout;
        let stream = self.stream()?;

        match timeout(limit, stream.read(buf)).await {
            Err(_) => Ok(0),
            Ok(Ok(0)) if !buf.is_empty() => {
                warn!("Serial device went away");
                Err(io::Error::from(io::ErrorKind::UnexpectedEof))
            }
            Ok(Ok(n)) => {
                trace!("Received {} bytes: {:02X?}", n, &buf[..n.min(16)]);
                Ok(n)
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Ok(Err(e)) => Err(e),
        }
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let limit = self.timeout;
        let stream = self.stream()?;

        trace!("Sending {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        match timeout(limit, stream.write(data)).await {
            Err(_) => Ok(0),
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Ok(result) => result,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        let stream = self.stream()?;
        stream.clear(ClearBuffer::All).map_err(io::Error::from)
    }

    async fn close(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            debug!("Closed serial port {}", self.path);
        }
        Ok(())
    }

    fn remote_addr(&self) -> String {
        self.path.clone()
    }
}
