//! Virtual controller
//!
//! A file-backed stand-in for a real controller, reachable through
//! `xi-emu:///<path>`. It understands just enough of the wire protocol to
//! exercise the engine end to end:
//!
//! - zero bytes (synchronization bursts) are echoed back one for one;
//! - `s???` frames carry a payload and CRC; the payload is stored under
//!   `???` and the 4-byte command is echoed;
//! - `g???` requests answer with the payload last stored under `???`, or
//!   `errv` when nothing was stored;
//! - any other command is echoed.
//!
//! The register map survives close and reopen through the backing file:
//!
//! ```text
//! "XEMU" | serial (u32 LE) | { key (3 bytes) | len (u16 LE) | payload }*
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, trace, warn};
use ximc_core::constants::{COMMAND_LEN, CRC_LEN};
use ximc_core::{crc, CommandName};
use ximc_types::TransportKind;

use crate::{error::*, Port};

const MAGIC: &[u8; 4] = b"XEMU";

type RegisterKey = [u8; 3];

/// File-backed emulated controller
#[derive(Debug)]
pub struct VirtualPort {
    path: PathBuf,
    serial: u32,
    registers: BTreeMap<RegisterKey, Vec<u8>>,
    rx: VecDeque<u8>,
    open: bool,
}

impl VirtualPort {
    /// Open the backing file, creating it when missing
    ///
    /// An explicit `serial` overrides the one stored in the file.
    pub async fn open(path: &Path, serial: Option<u32>) -> Result<Self> {
        let mut port = Self {
            path: path.to_path_buf(),
            serial: serial.unwrap_or_default(),
            registers: BTreeMap::new(),
            rx: VecDeque::new(),
            open: true,
        };

        match tokio::fs::read(path).await {
            Ok(data) => {
                let stored = port.load(&data)?;
                if serial.is_none() {
                    port.serial = stored;
                }
                debug!(
                    "Opened virtual controller {} (serial {:08X}, {} registers)",
                    path.display(),
                    port.serial,
                    port.registers.len()
                );
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Creating virtual controller {}", path.display());
            }
            Err(e) => return Err(Error::Io(e)),
        }

        port.persist().await?;
        Ok(port)
    }

    /// Serial number reported by this controller
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// Payload stored under a register key
    pub fn register(&self, key: &[u8; 3]) -> Option<&[u8]> {
        self.registers.get(key).map(Vec::as_slice)
    }

    fn load(&mut self, data: &[u8]) -> Result<u32> {
        let corrupt = || {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "corrupt virtual controller file",
            ))
        };

        let mut buf = data;
        if buf.len() < MAGIC.len() + 4 || &buf[..MAGIC.len()] != MAGIC {
            return Err(corrupt());
        }
        buf.advance(MAGIC.len());
        let serial = buf.get_u32_le();

        while buf.has_remaining() {
            if buf.remaining() < 5 {
                return Err(corrupt());
            }
            let key = [buf[0], buf[1], buf[2]];
            buf.advance(3);
            let len = buf.get_u16_le() as usize;
            if buf.remaining() < len {
                return Err(corrupt());
            }
            self.registers.insert(key, buf[..len].to_vec());
            buf.advance(len);
        }

        Ok(serial)
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_slice(MAGIC);
        buf.put_u32_le(self.serial);
        for (key, payload) in &self.registers {
            buf.put_slice(key);
            buf.put_u16_le(payload.len() as u16);
            buf.put_slice(payload);
        }
        buf
    }

    async fn persist(&self) -> Result<()> {
        tokio::fs::write(&self.path, self.encode()).await?;
        Ok(())
    }

    fn respond(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    /// Handle one request; returns whether the register map changed
    fn handle(&mut self, request: &[u8]) -> bool {
        if request.iter().all(|&b| b == 0) {
            self.rx.extend(std::iter::repeat_n(0u8, request.len()));
            return false;
        }

        let start = request.iter().take_while(|&&b| b == 0).count();
        let frame = &request[start..];
        if frame.len() < COMMAND_LEN {
            trace!("Ignoring short request {:02X?}", frame);
            return false;
        }

        let name = [frame[0], frame[1], frame[2], frame[3]];
        let key = [frame[1], frame[2], frame[3]];

        if frame.len() > COMMAND_LEN {
            if frame.len() <= COMMAND_LEN + CRC_LEN || name[0] != b's' {
                self.respond(CommandName::ERRD.as_bytes());
                return false;
            }
            let body = &frame[COMMAND_LEN..frame.len() - CRC_LEN];
            let received = u16::from_le_bytes([frame[frame.len() - 2], frame[frame.len() - 1]]);
            if !crc::verify(body, received) {
                warn!("Virtual controller: bad CRC in {}", CommandName::new(name));
                self.respond(CommandName::ERRD.as_bytes());
                return false;
            }
            self.registers.insert(key, body.to_vec());
            self.respond(&name);
            return true;
        }

        if name[0] == b'g' {
            match self.registers.get(&key) {
                Some(payload) => {
                    let mut frame = BytesMut::with_capacity(COMMAND_LEN + payload.len() + CRC_LEN);
                    frame.put_slice(&name);
                    frame.put_slice(payload);
                    frame.put_u16_le(crc::calculate(payload));
                    self.respond(&frame);
                }
                None => self.respond(CommandName::ERRV.as_bytes()),
            }
            return false;
        }

        self.respond(&name);
        false
    }
}

#[async_trait]
impl Port for VirtualPort {
    fn kind(&self) -> TransportKind {
        TransportKind::Virtual
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }

        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }

        if self.handle(data) {
            self.persist().await.map_err(|e| match e {
                Error::Io(e) => e,
                other => io::Error::other(other.to_string()),
            })?;
        }
        Ok(data.len())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open {
            self.open = false;
            self.rx.clear();
            debug!("Closed virtual controller {}", self.path.display());
        }
        Ok(())
    }

    fn remote_addr(&self) -> String {
        self.path.display().to_string()
    }
}
