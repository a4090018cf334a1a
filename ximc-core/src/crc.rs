//! Frame checksum
//!
//! Controllers protect every payload with CRC-16/MODBUS:
//! polynomial 0x8005 (0xA001 reflected), initial value 0xFFFF, no final XOR.
//! The checksum is sent little-endian after the payload.

use tracing::trace;

/// Calculate CRC-16 over `data`
///
/// # Examples
///
/// ```
/// use ximc_core::crc;
///
/// assert_eq!(crc::calculate(b"123456789"), 0x4B37);
/// ```
pub fn calculate(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }

    trace!(len = data.len(), crc = format!("0x{:04X}", crc), "Calculated CRC");

    crc
}

/// Verify checksum
pub fn verify(data: &[u8], expected: u16) -> bool {
    calculate(data) == expected
}
