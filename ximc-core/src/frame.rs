//! Frame encoding and decoding
//!
//! # Frame Structure
//!
//! ```text
//! ┌─────────────┬──────────────────────┬─────────────┐
//! │   Command   │       Payload        │    CRC16    │
//! │   4 bytes   │   size - 4 bytes     │   2 bytes   │
//! │   (ASCII)   │   (LE fields)        │   (LE u16)  │
//! └─────────────┴──────────────────────┴─────────────┘
//! ```
//!
//! The CRC covers the payload only. Commands without payload are sent as
//! the bare 4-byte name. All multi-byte fields are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::error;

use crate::{
    command::CommandName,
    constants::{COMMAND_LEN, CRC_LEN, GARBAGE_BYTE},
    crc,
    error::{Direction, Error, Result},
};

/// Check that a decoded frame consumed exactly the received bytes
pub fn check_in_overrun_raw(data_count: usize, buf_size: usize) -> Result<()> {
    if data_count != buf_size {
        error!("buffer incoming overrun {} vs buf size {}", data_count, buf_size);
        return Err(Error::Overrun {
            direction: Direction::Incoming,
            count: data_count,
            size: buf_size,
        });
    }
    Ok(())
}

/// Check that an encoded frame filled exactly its declared size
pub fn check_out_overrun(data_count: usize, buf_size: usize) -> Result<()> {
    if data_count != buf_size {
        error!("buffer outgoing overrun {} vs buf size {}", data_count, buf_size);
        return Err(Error::Overrun {
            direction: Direction::Outgoing,
            count: data_count,
            size: buf_size,
        });
    }
    Ok(())
}

/// Check that an encoded frame fits into its declared size
pub fn check_out_atleast_overrun(data_count: usize, buf_size: usize) -> Result<()> {
    if data_count > buf_size {
        error!("buffer outgoing overrun {} vs buf size {}", data_count, buf_size);
        return Err(Error::Overrun {
            direction: Direction::Outgoing,
            count: data_count,
            size: buf_size,
        });
    }
    Ok(())
}

/// Cursor that packs fields into an outgoing frame
///
/// # Examples
///
/// ```
/// use ximc_core::{CommandName, FrameWriter};
///
/// let mut w = FrameWriter::with_command(CommandName::new(*b"move"), 4 + 4 + 2 + 2);
/// w.push_i32(1000).unwrap();
/// w.push_i16(0).unwrap();
/// w.push_crc().unwrap();
/// let frame = w.finish().unwrap();
/// assert_eq!(&frame[..4], b"move");
/// ```
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    size: usize,
}

impl FrameWriter {
    /// Empty frame with a declared total size
    pub fn new(size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(size),
            size,
        }
    }

    /// Frame that starts with a command name
    pub fn with_command(command: CommandName, size: usize) -> Self {
        let mut writer = Self::new(size);
        writer.buf.put_slice(command.as_bytes());
        writer
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn reserve(&self, n: usize) -> Result<()> {
        check_out_atleast_overrun(self.buf.len() + n, self.size)
    }

    pub fn push_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.reserve(data.len())?;
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn push_str(&mut self, s: &str) -> Result<()> {
        self.push_bytes(s.as_bytes())
    }

    /// Fill `n` reserved bytes
    pub fn push_garbage(&mut self, n: usize) -> Result<()> {
        self.reserve(n)?;
        self.buf.put_bytes(GARBAGE_BYTE, n);
        Ok(())
    }

    pub fn push_u8(&mut self, v: u8) -> Result<()> {
        self.reserve(1)?;
        self.buf.put_u8(v);
        Ok(())
    }

    pub fn push_i8(&mut self, v: i8) -> Result<()> {
        self.reserve(1)?;
        self.buf.put_i8(v);
        Ok(())
    }

    pub fn push_u16(&mut self, v: u16) -> Result<()> {
        self.reserve(2)?;
        self.buf.put_u16_le(v);
        Ok(())
    }

    pub fn push_i16(&mut self, v: i16) -> Result<()> {
        self.reserve(2)?;
        self.buf.put_i16_le(v);
        Ok(())
    }

    pub fn push_u32(&mut self, v: u32) -> Result<()> {
        self.reserve(4)?;
        self.buf.put_u32_le(v);
        Ok(())
    }

    pub fn push_i32(&mut self, v: i32) -> Result<()> {
        self.reserve(4)?;
        self.buf.put_i32_le(v);
        Ok(())
    }

    pub fn push_u64(&mut self, v: u64) -> Result<()> {
        self.reserve(8)?;
        self.buf.put_u64_le(v);
        Ok(())
    }

    pub fn push_i64(&mut self, v: i64) -> Result<()> {
        self.reserve(8)?;
        self.buf.put_i64_le(v);
        Ok(())
    }

    pub fn push_f32(&mut self, v: f32) -> Result<()> {
        self.reserve(4)?;
        self.buf.put_f32_le(v);
        Ok(())
    }

    pub fn push_f64(&mut self, v: f64) -> Result<()> {
        self.reserve(8)?;
        self.buf.put_f64_le(v);
        Ok(())
    }

    /// Append the CRC of everything after the command name
    pub fn push_crc(&mut self) -> Result<()> {
        let start = COMMAND_LEN.min(self.buf.len());
        let crc = crc::calculate(&self.buf[start..]);
        self.push_u16(crc)
    }

    /// Append the CRC of the whole frame so far, command name included
    pub fn push_crc_with_command(&mut self) -> Result<()> {
        let crc = crc::calculate(&self.buf);
        self.push_u16(crc)
    }

    /// Finish the frame, which must fill its declared size exactly
    pub fn finish(self) -> Result<Bytes> {
        check_out_overrun(self.buf.len(), self.size)?;
        Ok(self.buf.freeze())
    }
}

/// Cursor that unpacks fields from a received frame
#[derive(Debug, Clone)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            error!("buffer incoming overrun {} vs buf size {}", end, self.buf.len());
            return Err(Error::Overrun {
                direction: Direction::Incoming,
                count: end,
                size: self.buf.len(),
            });
        }
        let data = &self.buf[self.pos..end];
        self.pos = end;
        Ok(data)
    }

    pub fn pop_command(&mut self) -> Result<CommandName> {
        CommandName::from_frame(self.take(COMMAND_LEN)?)
    }

    pub fn pop_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Fixed-width string field, cut at the first NUL
    pub fn pop_str(&mut self, n: usize) -> Result<String> {
        let raw = self.take(n)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn pop_garbage(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn pop_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?.get_u8())
    }

    pub fn pop_i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?.get_i8())
    }

    pub fn pop_u16(&mut self) -> Result<u16> {
        Ok(self.take(2)?.get_u16_le())
    }

    pub fn pop_i16(&mut self) -> Result<i16> {
        Ok(self.take(2)?.get_i16_le())
    }

    pub fn pop_u32(&mut self) -> Result<u32> {
        Ok(self.take(4)?.get_u32_le())
    }

    pub fn pop_i32(&mut self) -> Result<i32> {
        Ok(self.take(4)?.get_i32_le())
    }

    pub fn pop_u64(&mut self) -> Result<u64> {
        Ok(self.take(8)?.get_u64_le())
    }

    pub fn pop_i64(&mut self) -> Result<i64> {
        Ok(self.take(8)?.get_i64_le())
    }

    pub fn pop_f32(&mut self) -> Result<f32> {
        Ok(self.take(4)?.get_f32_le())
    }

    pub fn pop_f64(&mut self) -> Result<f64> {
        Ok(self.take(8)?.get_f64_le())
    }

    /// Finish decoding: only the CRC may remain, and it must match the payload
    ///
    /// The length check runs before the CRC check.
    pub fn finish(self) -> Result<()> {
        check_in_overrun_raw(self.pos + CRC_LEN, self.buf.len())?;

        let start = COMMAND_LEN.min(self.pos);
        let expected = crc::calculate(&self.buf[start..self.pos]);
        let received = u16::from_le_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        if expected != received {
            error!("buffer crc check failed, real {:x}, in buffer {:x}", expected, received);
            return Err(Error::ChecksumMismatch { expected, received });
        }
        Ok(())
    }

    /// Finish decoding without looking at the trailing CRC
    pub fn finish_without_crc(self) -> Result<()> {
        check_in_overrun_raw(self.pos + CRC_LEN, self.buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn gpos_response(position: i32, upos: i16, encoder: i64) -> Bytes {
        let mut w = FrameWriter::with_command(CommandName::new(*b"gpos"), 4 + 4 + 2 + 8 + 6 + 2);
        w.push_i32(position).unwrap();
        w.push_i16(upos).unwrap();
        w.push_i64(encoder).unwrap();
        w.push_garbage(6).unwrap();
        w.push_crc().unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn test_writer_layout() {
        let frame = gpos_response(-5, 3, 1 << 40);

        assert_eq!(frame.len(), 26);
        assert_eq!(&frame[..4], b"gpos");
        assert_eq!(&frame[4..8], &(-5i32).to_le_bytes());
        assert_eq!(&frame[18..24], &[GARBAGE_BYTE; 6]);

        let crc = u16::from_le_bytes([frame[24], frame[25]]);
        assert_eq!(crc, crc::calculate(&frame[4..24]));
    }

    #[test]
    fn test_reader_decodes_fields() {
        let frame = gpos_response(123_456, -7, -1);
        let mut r = FrameReader::new(&frame);

        assert_eq!(r.pop_command().unwrap(), CommandName::new(*b"gpos"));
        assert_eq!(r.pop_i32().unwrap(), 123_456);
        assert_eq!(r.pop_i16().unwrap(), -7);
        assert_eq!(r.pop_i64().unwrap(), -1);
        r.pop_garbage(6).unwrap();
        assert_eq!(r.remaining(), 2);
        r.finish().unwrap();
    }

    #[test]
    fn test_reader_detects_corrupted_crc() {
        let frame = gpos_response(1, 2, 3);
        let mut corrupted = frame.to_vec();
        corrupted[25] ^= 0x01;

        let mut r = FrameReader::new(&corrupted);
        r.pop_bytes(18).unwrap();
        r.pop_garbage(6).unwrap();
        assert!(matches!(r.finish(), Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_length_checked_before_crc() {
        let frame = gpos_response(1, 2, 3);
        let mut corrupted = frame.to_vec();
        corrupted[25] ^= 0x01;

        // Decoder stopped early: overrun wins over the bad CRC
        let mut r = FrameReader::new(&corrupted);
        r.pop_command().unwrap();
        r.pop_i32().unwrap();
        assert!(matches!(
            r.finish(),
            Err(Error::Overrun { direction: Direction::Incoming, .. })
        ));
    }

    #[test]
    fn test_reader_overrun() {
        let mut r = FrameReader::new(&[1, 2, 3]);
        assert!(r.pop_u16().is_ok());
        assert!(matches!(r.pop_u16(), Err(Error::Overrun { count: 4, size: 3, .. })));
    }

    #[test]
    fn test_writer_overrun() {
        let mut w = FrameWriter::with_command(CommandName::new(*b"smov"), 6);
        w.push_u16(1).unwrap();
        assert!(w.push_u8(0).is_err());

        let short = FrameWriter::with_command(CommandName::new(*b"smov"), 6);
        assert!(matches!(
            short.finish(),
            Err(Error::Overrun { direction: Direction::Outgoing, count: 4, size: 6 })
        ));
    }

    #[test]
    fn test_crc_with_command_covers_header() {
        let mut w = FrameWriter::with_command(CommandName::new(*b"sser"), 4 + 4 + 2);
        w.push_u32(0xDEADBEEF).unwrap();
        w.push_crc_with_command().unwrap();
        let frame = w.finish().unwrap();

        let crc = u16::from_le_bytes([frame[8], frame[9]]);
        assert_eq!(crc, crc::calculate(&frame[..8]));
        assert_ne!(crc, crc::calculate(&frame[4..8]));
    }

    #[test]
    fn test_strings_and_floats() {
        let mut w = FrameWriter::new(16 + 4 + 8);
        w.push_str("8SMC5").unwrap();
        w.push_bytes(&[0; 11]).unwrap();
        w.push_f32(1.5).unwrap();
        w.push_f64(-0.25).unwrap();
        let frame = w.finish().unwrap();

        let mut r = FrameReader::new(&frame);
        assert_eq!(r.pop_str(16).unwrap(), "8SMC5");
        assert_eq!(r.pop_f32().unwrap(), 1.5);
        assert_eq!(r.pop_f64().unwrap(), -0.25);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_out_atleast() {
        assert!(check_out_atleast_overrun(4, 6).is_ok());
        assert!(check_out_atleast_overrun(7, 6).is_err());
        assert!(check_in_overrun_raw(6, 6).is_ok());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(1000))]

            #[test]
            fn pushed_crc_matches_recomputed(payload in proptest::collection::vec(any::<u8>(), 0..128)) {
                let mut w = FrameWriter::with_command(CommandName::new(*b"test"), 4 + payload.len() + 2);
                w.push_bytes(&payload).unwrap();
                w.push_crc().unwrap();
                let frame = w.finish().unwrap();

                let n = frame.len();
                let carried = u16::from_le_bytes([frame[n - 2], frame[n - 1]]);
                prop_assert_eq!(carried, crc::calculate(&payload));

                let mut r = FrameReader::new(&frame);
                r.pop_command().unwrap();
                r.pop_bytes(payload.len()).unwrap();
                prop_assert!(r.finish().is_ok());
            }
        }
    }
}
