//! Frame construction, validation and cursor-based field access.
//!
//! Wire format:
//! ```text
//! command:  FF | len | opcode | data[len]                  | crc16
//! response: FF | len | opcode | status (2B BE) | data[len] | crc16
//! ```
//! The checksum covers everything between the start marker and the checksum.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::protocol::{MAX_DATA_LEN, SOF};

const CRC_TABLE: [u16; 16] = [
    0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50A5, 0x60C6, 0x70E7, 0x8108, 0x9129, 0xA14A,
    0xB16B, 0xC18C, 0xD1AD, 0xE1CE, 0xF1EF,
];

/// Module checksum: seeded with all ones, folds every byte a nibble at a time.
pub fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0xFFFF, |crc: u16, &b| {
        let crc = ((crc << 4) | (b >> 4) as u16) ^ CRC_TABLE[(crc >> 12) as usize];
        ((crc << 4) | (b & 0x0F) as u16) ^ CRC_TABLE[(crc >> 12) as usize]
    })
}

/// Check `bytes` against a received checksum.
pub fn verify_crc(bytes: &[u8], crc: u16) -> bool {
    crc16(bytes) == crc
}

/// Incremental frame builder. Fields are appended at the write cursor; the
/// length byte and checksum are filled in by [`FrameWriter::finish`].
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    header: usize,
}

impl FrameWriter {
    /// Start a host-to-module command frame.
    pub fn command(opcode: u8) -> Self {
        let mut buf = BytesMut::with_capacity(MAX_DATA_LEN + 7);
        buf.put_u8(SOF);
        buf.put_u8(0);
        buf.put_u8(opcode);
        Self { buf, header: 3 }
    }

    /// Start a module-to-host response frame (used by simulators and tests).
    pub fn response(opcode: u8, status: u16) -> Self {
        let mut writer = Self::command(opcode);
        writer.buf.put_u16(status);
        writer.header = 5;
        writer
    }

    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn put_u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16(v);
        self
    }

    pub fn put_u24(&mut self, v: u32) -> &mut Self {
        self.buf.put_slice(&v.to_be_bytes()[1..]);
        self
    }

    pub fn put_u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32(v);
        self
    }

    pub fn put_slice(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    /// Number of data bytes written so far.
    pub fn data_len(&self) -> usize {
        self.buf.len() - self.header
    }

    /// Seal the frame: write the length byte and append the checksum.
    pub fn finish(mut self) -> Result<Bytes> {
        let len = self.data_len();
        if len > MAX_DATA_LEN {
            return Err(ProtocolError::PayloadTooLarge {
                size: len,
                max: MAX_DATA_LEN,
            });
        }
        self.buf[1] = len as u8;
        let crc = crc16(&self.buf[1..]);
        self.buf.put_u16(crc);
        Ok(self.buf.freeze())
    }
}

/// Encode a complete command frame.
pub fn encode(opcode: u8, payload: &[u8]) -> Result<Bytes> {
    let mut writer = FrameWriter::command(opcode);
    writer.put_slice(payload);
    writer.finish()
}

/// Encode a complete response frame.
pub fn encode_response(opcode: u8, status: u16, data: &[u8]) -> Result<Bytes> {
    let mut writer = FrameWriter::response(opcode, status);
    writer.put_slice(data);
    writer.finish()
}

/// A validated response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    raw: Bytes,
}

impl Frame {
    /// Wrap a frame whose length and checksum were already verified.
    pub(crate) fn from_validated(raw: Bytes) -> Self {
        Self { raw }
    }

    /// Parse and validate a complete response frame from a byte slice.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < crate::protocol::RESPONSE_OVERHEAD || bytes[0] != SOF {
            return Err(ProtocolError::Malformed(format!(
                "not a response frame: {:02X?}",
                bytes
            )));
        }
        let total = bytes[1] as usize + crate::protocol::RESPONSE_OVERHEAD;
        if bytes.len() != total {
            return Err(ProtocolError::Malformed(format!(
                "length byte says {} bytes, got {}",
                total,
                bytes.len()
            )));
        }
        let received = u16::from_be_bytes([bytes[total - 2], bytes[total - 1]]);
        let computed = crc16(&bytes[1..total - 2]);
        if received != computed {
            return Err(ProtocolError::ChecksumFault { received, computed });
        }
        Ok(Self::from_validated(Bytes::copy_from_slice(bytes)))
    }

    pub fn opcode(&self) -> u8 {
        self.raw[2]
    }

    pub fn status(&self) -> u16 {
        u16::from_be_bytes([self.raw[3], self.raw[4]])
    }

    pub fn data(&self) -> &[u8] {
        &self.raw[5..self.raw.len() - 2]
    }

    /// The data bytes as a shared buffer.
    pub fn payload(&self) -> Bytes {
        self.raw.slice(5..self.raw.len() - 2)
    }

    /// Cursor over the data bytes.
    pub fn reader(&self) -> FrameReader {
        FrameReader::new(self.payload())
    }

    /// The complete frame as received.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

/// Cursor-based reader over frame data. Every accessor checks the remaining
/// length and reports a [`ProtocolError::Malformed`] instead of panicking.
#[derive(Debug, Clone)]
pub struct FrameReader {
    buf: Bytes,
    start: usize,
}

impl FrameReader {
    pub fn new(buf: Bytes) -> Self {
        let start = buf.len();
        Self { buf, start }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::Malformed(format!(
                "need {} bytes at offset {}, only {} left",
                n,
                self.position(),
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Read offset from the start of the data.
    pub fn position(&self) -> usize {
        self.start - self.buf.remaining()
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn i8(&mut self) -> Result<i8> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn u24(&mut self) -> Result<u32> {
        self.need(3)?;
        Ok(self.buf.get_uint(3) as u32)
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn bytes(&mut self, n: usize) -> Result<Bytes> {
        self.need(n)?;
        Ok(self.buf.copy_to_bytes(n))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.need(n)?;
        self.buf.advance(n);
        Ok(())
    }
}
