//! Sequential reader/writer over a byte vector.
//!
//! Every wire structure in this crate is built from the primitives here.
//! Reads advance an internal offset and fail with
//! [`CodecError::BufferUnderflow`] when not enough bytes remain; writes
//! append to the end of the buffer.
//!
//! Two quirks of the SA-MP dialect live at this level and nowhere else:
//! the 3-byte little-endian integers used for every sequence and index, and
//! the embedded IPv4 address format (version byte, bitwise-inverted octets,
//! little-endian port).

use std::net::{Ipv4Addr, SocketAddrV4};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::CodecError;
use crate::util::U24_MAX;

#[derive(Debug, Clone, Default)]
pub struct BitStream {
    data: Vec<u8>,
    offset: usize,
}

impl BitStream {
    /// An empty stream, ready for writing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing buffer for reading.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            offset: 0,
        }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::BufferUnderflow {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16, CodecError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_u16_le(&mut self) -> Result<u16, CodecError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    /// 3-byte little-endian, the width of every RakNet sequence counter.
    pub fn read_u24_le(&mut self) -> Result<u32, CodecError> {
        Ok(LittleEndian::read_u24(self.take(3)?))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, CodecError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, CodecError> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    pub fn read_f32_le(&mut self) -> Result<f32, CodecError> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, CodecError> {
        Ok(self.take(n)?.to_vec())
    }

    /// A `u16` big-endian length prefix followed by raw bytes.
    ///
    /// The payload is opaque: the SA-MP client is byte-transparent, so no
    /// UTF-8 validation happens here.
    pub fn read_string(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u16_be()? as usize;
        self.read_bytes(len)
    }

    /// Embedded IPv4 endpoint: version byte (must be 4), four
    /// bitwise-inverted octets, then a little-endian port.
    pub fn read_address(&mut self) -> Result<SocketAddrV4, CodecError> {
        let version = self.read_u8()?;
        if version != 4 {
            return Err(CodecError::UnknownVersion(version));
        }
        let raw = self.take(4)?;
        let octets = [!raw[0], !raw[1], !raw[2], !raw[3]];
        let port = self.read_u16_le()?;
        Ok(SocketAddrV4::new(Ipv4Addr::from(octets), port))
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, v);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_u16_le(&mut self, v: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, v);
        self.data.extend_from_slice(&buf);
    }

    /// Writes the low 24 bits of `v`, little-endian. Counters wrap at 2^24,
    /// so the high byte is masked off rather than rejected.
    pub fn write_u24_le(&mut self, v: u32) {
        let mut buf = [0u8; 3];
        LittleEndian::write_u24(&mut buf, v & U24_MAX);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_u32_be(&mut self, v: u32) {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, v);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_u32_le(&mut self, v: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, v);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_u64_be(&mut self, v: u64) {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, v);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_f32_le(&mut self, v: f32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, v);
        self.data.extend_from_slice(&buf);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Length-prefixed string; fails with [`CodecError::BufferOverflow`] if
    /// the payload does not fit the 16-bit length field.
    pub fn write_string(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let len = u16::try_from(bytes.len()).map_err(|_| CodecError::BufferOverflow)?;
        self.write_u16_be(len);
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn write_address(&mut self, addr: &SocketAddrV4) {
        self.write_u8(4);
        for octet in addr.ip().octets() {
            self.write_u8(!octet);
        }
        self.write_u16_le(addr.port());
    }
}
