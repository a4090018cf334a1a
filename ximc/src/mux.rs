//! Framed I/O multiplexer
//!
//! Moves raw bytes between a device record and its port. Partial transfers
//! are continued until the whole buffer is done; a stall (a port call that
//! makes no progress within the port timeout) flushes the port and is
//! reported as [`PortFailure::Timeout`], which the protocol layer may retry.
//!
//! Network tunnel ports are non-blocking underneath: an empty read means
//! "not yet", so they are polled every millisecond up to the configured
//! budget before the device is declared lost.

use std::fmt;
use std::io;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, trace, warn};
use ximc_core::constants::TUNNEL_POLL_TICK;
use ximc_transport::{is_disconnect, Port};

use crate::filelog::LogDirection;
use crate::metadata::DeviceMetadata;

/// Raw port failure, before it is mapped to a caller status
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PortFailure {
    /// Transient failure
    Error,
    /// No progress within the port timeout
    Timeout,
    /// The device is physically gone
    NoDevice,
}

impl fmt::Display for PortFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "port error",
            Self::Timeout => "port timeout",
            Self::NoDevice => "device lost",
        })
    }
}

pub type PortResult = std::result::Result<(), PortFailure>;

fn port_of(dm: &mut DeviceMetadata) -> std::result::Result<&mut Box<dyn Port>, PortFailure> {
    match dm.port.as_mut() {
        Some(port) => Ok(port),
        None => {
            error!("Device {} has no port attached", dm.id);
            Err(PortFailure::Error)
        }
    }
}

/// Write all of `data`
pub async fn send(dm: &mut DeviceMetadata, data: &[u8]) -> PortResult {
    let mut written = 0;

    while written < data.len() {
        let port = port_of(dm)?;
        match port.write(&data[written..]).await {
            Ok(0) => {
                debug!(
                    "Device {}: write stalled, {} bytes left",
                    dm.id,
                    data.len() - written
                );
                return Err(match flush(dm).await {
                    Err(PortFailure::NoDevice) => PortFailure::NoDevice,
                    _ => PortFailure::Timeout,
                });
            }
            Ok(n) => {
                let chunk = &data[written..written + n];
                trace!("Device {}: wrote {}", dm.id, hex::encode(chunk));
                dm.filelog().data(LogDirection::Write, dm.kind, dm.id, chunk);
                written += n;
            }
            Err(e) => return Err(recover(dm, "write to port", e).await),
        }
    }

    Ok(())
}

/// Fill all of `buf`
pub async fn receive(dm: &mut DeviceMetadata, buf: &mut [u8]) -> PortResult {
    let polls = dm.kind.polls_on_empty_read();
    let budget = dm.config().tunnel_read_budget;
    let mut polling_since: Option<Instant> = None;
    let mut got = 0;

    while got < buf.len() {
        let port = port_of(dm)?;
        match port.read(&mut buf[got..]).await {
            Ok(0) if polls => {
                let since = *polling_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= budget {
                    error!("Device {}: no data from tunnel within {:?}", dm.id, budget);
                    return Err(PortFailure::NoDevice);
                }
                sleep(TUNNEL_POLL_TICK).await;
            }
            Ok(0) => {
                debug!(
                    "Device {}: read stalled, {} bytes left",
                    dm.id,
                    buf.len() - got
                );
                return Err(match flush(dm).await {
                    Err(PortFailure::NoDevice) => PortFailure::NoDevice,
                    _ => PortFailure::Timeout,
                });
            }
            Ok(n) => {
                let chunk = &buf[got..got + n];
                trace!("Device {}: read {}", dm.id, hex::encode(chunk));
                dm.filelog().data(LogDirection::Read, dm.kind, dm.id, chunk);
                got += n;
                polling_since = None;
            }
            Err(e) => return Err(recover(dm, "read from port", e).await),
        }
    }

    Ok(())
}

/// Drop whatever the port has buffered
pub async fn flush(dm: &mut DeviceMetadata) -> PortResult {
    dm.filelog().text(dm.kind, dm.id, "Flushing port...");

    let port = port_of(dm)?;
    match port.flush().await {
        Ok(()) => Ok(()),
        Err(e) if is_disconnect(&e) => {
            error!("Device {}: flush failed, device lost: {}", dm.id, e);
            Err(PortFailure::NoDevice)
        }
        Err(e) => {
            warn!("Device {}: flush failed: {}", dm.id, e);
            Err(PortFailure::Error)
        }
    }
}

async fn recover(dm: &mut DeviceMetadata, what: &str, e: io::Error) -> PortFailure {
    if is_disconnect(&e) {
        error!("Device {}: {} failed, device lost: {}", dm.id, what, e);
        return PortFailure::NoDevice;
    }

    error!("Device {}: {} failed: {}", dm.id, what, e);
    match flush(dm).await {
        Err(PortFailure::NoDevice) => PortFailure::NoDevice,
        _ => PortFailure::Error,
    }
}
