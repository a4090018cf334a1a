//! Protocol constants

use std::time::Duration;

/// Length of the command name that opens every frame
pub const COMMAND_LEN: usize = 4;

/// Length of the trailing CRC
pub const CRC_LEN: usize = 2;

/// Zero bytes sent in one synchronization burst
pub const SYNC_ZERO_COUNT: usize = 64;

/// Synchronization bursts attempted before the device is declared lost
pub const SYNC_RETRY_COUNT: usize = 4;

/// Minimum spacing between two receive attempts after a stall
pub const WAIT_BEFORE_RETRY_TIME: Duration = Duration::from_millis(100);

/// Default logical timeout of one synchronized receive
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Per read/write timeout of a port
pub const PORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Polling tick of the network tunnel read loop
pub const TUNNEL_POLL_TICK: Duration = Duration::from_millis(1);

/// Default UDP/TCP port of network-attached controllers
pub const DEFAULT_NET_PORT: u16 = 1820;

/// Serial line speed of USB-CDC controllers
pub const SERIAL_BAUD_RATE: u32 = 115_200;

/// Largest correction table accepted (exclusive)
pub const MAX_CORRECTION_ROWS: usize = 100;

/// Filler written by `push_garbage`
pub const GARBAGE_BYTE: u8 = 0xCC;

/// Environment variable naming the diagnostic wire log
pub const LOG_PATH_ENV: &str = "XILOG";
