//! Synchronization and checked commands
//!
//! Every command is answered by a frame that starts with the command's own
//! 4-byte name. When the host and the controller disagree about where a
//! frame starts, the host floods the controller with zero bytes: the
//! controller drops any partial frame, echoes the zeros, and both sides
//! are aligned again.

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};
use ximc_core::constants::COMMAND_LEN;
use ximc_core::{CommandName, Error, Result};

use crate::metadata::DeviceMetadata;
use crate::mux::{self, PortFailure};

enum Burst {
    Synced,
    Stalled,
    /// Read failed without the device being confirmed gone
    Faulted,
    Lost,
}

async fn send_zero_burst(dm: &mut DeviceMetadata, zeros: &[u8]) -> Burst {
    info!("Device {}: sending sync zeroes", dm.id);

    if let Err(failure) = mux::send(dm, zeros).await {
        error!("Device {}: sync send failed: {}", dm.id, failure);
        return Burst::Lost;
    }

    let mut byte = [0xFFu8; 1];
    for _ in 0..zeros.len() {
        match mux::receive(dm, &mut byte).await {
            Ok(()) if byte[0] == 0 => {
                info!("Device {}: got a zero, done", dm.id);
                return Burst::Synced;
            }
            Ok(()) => {}
            Err(PortFailure::Timeout) => return Burst::Stalled,
            Err(PortFailure::Error) => {
                warn!("Device {}: sync receive failed", dm.id);
                return Burst::Faulted;
            }
            Err(PortFailure::NoDevice) => {
                error!("Device {}: sync receive failed, device lost", dm.id);
                return Burst::Lost;
            }
        }
    }

    Burst::Stalled
}

/// Realign the byte stream with the controller
///
/// Sends bursts of zero bytes until one comes back. Fails with `NoDevice`
/// when the port breaks or every burst goes unanswered. A single failed read
/// that does not report the device as gone costs one burst; a second one is
/// treated as a lost device.
pub async fn synchronize(dm: &mut DeviceMetadata) -> Result<()> {
    info!("Device {}: synchronize started", dm.id);

    let zeros = vec![0u8; dm.config().sync_zero_count];
    let retries = dm.config().sync_retry_count;
    let mut faulted = false;

    for attempt in 1..=retries {
        match send_zero_burst(dm, &zeros).await {
            Burst::Synced => {
                info!("Device {}: synchronize completed", dm.id);
                return Ok(());
            }
            Burst::Stalled => debug!("Device {}: sync attempt {} unanswered", dm.id, attempt),
            Burst::Faulted if !faulted => {
                faulted = true;
                debug!("Device {}: sync attempt {} failed, retrying once", dm.id, attempt);
            }
            Burst::Faulted | Burst::Lost => {
                return Err(Error::no_device("port failed during synchronization"));
            }
        }
    }

    error!("Device {}: synchronization attempts failed, device is lost", dm.id);
    Err(Error::no_device("synchronization attempts failed"))
}

/// Receive exactly `buf.len()` bytes within the device's logical timeout
///
/// Stalls are retried, no faster than the configured retry floor. When the
/// deadline passes the call fails with `Failed`; with `need_sync` the stream
/// is first resynchronized, and a failed resync turns the result into
/// `NoDevice`.
pub async fn receive_synchronized(
    dm: &mut DeviceMetadata,
    buf: &mut [u8],
    need_sync: bool,
) -> Result<()> {
    let logical_timeout = dm.logical_timeout;
    if logical_timeout.is_zero() {
        error!(
            "Device {}: logical timeout is not properly set at device open",
            dm.id
        );
    }
    let retry_floor = dm.config().wait_before_retry;

    let started = Instant::now();
    loop {
        let attempt = Instant::now();
        match mux::receive(dm, buf).await {
            Ok(()) => return Ok(()),
            Err(PortFailure::Timeout) => {
                let spent = attempt.elapsed();
                if spent < retry_floor {
                    debug!("Device {}: receive timed out too fast, wait a little", dm.id);
                    sleep(retry_floor - spent).await;
                }
            }
            Err(PortFailure::Error) => {
                error!("Device {}: receive failed", dm.id);
                return Err(Error::no_device("receive failed"));
            }
            Err(PortFailure::NoDevice) => {
                error!("Device {}: device lost", dm.id);
                return Err(Error::no_device("device lost during receive"));
            }
        }

        let elapsed = started.elapsed();
        debug!(
            "Device {}: passed {:?}, needed at least {:?}",
            dm.id, elapsed, logical_timeout
        );
        if elapsed >= logical_timeout {
            break;
        }
    }

    error!("Device {}: receive finally timed out", dm.id);
    timed_out(dm, need_sync).await
}

async fn timed_out(dm: &mut DeviceMetadata, need_sync: bool) -> Result<()> {
    if need_sync {
        synchronize(dm).await?;
    }
    Err(Error::failed("receive timed out"))
}

/// Send a command and validate the controller's answer
///
/// `response`, when given, receives the whole answer frame: its first four
/// bytes must echo the command name. The trailing CRC is left to the
/// caller's frame decoder.
pub async fn command_checked_impl(
    dm: &mut DeviceMetadata,
    command: &[u8],
    response: Option<&mut [u8]>,
    need_sync: bool,
) -> Result<()> {
    if command.len() < COMMAND_LEN {
        error!("Device {}: command is shorter than {} bytes", dm.id, COMMAND_LEN);
        return Err(Error::failed("command too short"));
    }
    if !dm.is_open() {
        error!("Device {}: command sent to a device that is not open", dm.id);
        return Err(Error::failed("device is not open"));
    }
    if response.as_ref().is_some_and(|r| r.len() < COMMAND_LEN) {
        error!("Device {}: response buffer cannot hold a command name", dm.id);
        return Err(Error::failed("response buffer too short"));
    }

    if let Err(failure) = mux::send(dm, command).await {
        error!("Device {}: command send failed: {}", dm.id, failure);
        return Err(Error::no_device("command send failed"));
    }

    let Some(response) = response else {
        return Ok(());
    };

    // Zeros left over from a sync burst may precede the answer
    let started = Instant::now();
    loop {
        receive_synchronized(dm, &mut response[..1], need_sync).await?;
        if response[0] != 0 {
            break;
        }
        if started.elapsed() >= dm.logical_timeout {
            error!("Device {}: only zeros received before the deadline", dm.id);
            return timed_out(dm, need_sync).await;
        }
    }

    receive_synchronized(dm, &mut response[1..COMMAND_LEN], need_sync).await?;

    let header = CommandName::from_frame(response)?;
    if header == CommandName::ERRV {
        warn!("Device {}: response 'errv' received", dm.id);
        let _ = mux::flush(dm).await;
        return Err(Error::ValueError);
    }
    if header == CommandName::ERRD {
        warn!("Device {}: response 'errd' received", dm.id);
        let _ = synchronize(dm).await;
        let _ = mux::flush(dm).await;
        return Err(Error::failed("device reported a protocol error"));
    }
    if !header.matches(command) {
        warn!(
            "Device {}: sent {} but the answer starts with {}",
            dm.id,
            String::from_utf8_lossy(&command[..COMMAND_LEN]),
            header
        );
        let _ = synchronize(dm).await;
        let _ = mux::flush(dm).await;
        return Err(Error::failed("answer does not echo the command"));
    }

    receive_synchronized(dm, &mut response[COMMAND_LEN..], need_sync).await
}
