//! Acknowledgement packets.
//!
//! The emit path is deliberately flat: one 3-byte little-endian sequence per
//! record, no per-record flag byte and no range compression. This is the
//! exact format the SA-MP 0.3.7 client expects and is simpler than the
//! canonical RakNet encoding.
//!
//! The decode path is the canonical one: each record starts with a
//! single/range flag byte followed by a start and an end sequence, and
//! ranges are expanded by iterating `start..=end`.

use crate::error::CodecError;
use crate::protocol::stream::BitStream;
use crate::protocol::{ACK_FLAG, NACK_FLAG};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub id: u8,
    pub sequences: Vec<u32>,
}

impl Acknowledgement {
    pub fn ack(sequences: Vec<u32>) -> Self {
        Self {
            id: ACK_FLAG,
            sequences,
        }
    }

    pub fn nack(sequences: Vec<u32>) -> Self {
        Self {
            id: NACK_FLAG,
            sequences,
        }
    }

    pub fn is_nack(&self) -> bool {
        self.id == NACK_FLAG
    }

    /// Flat SA-MP encoding: id, record count (u16 little-endian), then each
    /// sequence as 3 little-endian bytes. An empty set is the 3-byte header
    /// alone.
    pub fn encode(&self) -> Vec<u8> {
        let mut bs = BitStream::new();
        bs.write_u8(self.id);
        bs.write_u16_le(self.sequences.len() as u16);
        for seq in &self.sequences {
            bs.write_u24_le(*seq);
        }
        bs.into_inner()
    }

    /// Canonical decoding: per record a flag byte (ignored), a start and an
    /// end sequence. Sequences are expanded in range order. A reversed range
    /// is normalised rather than rejected.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut bs = BitStream::from_bytes(data);
        let id = bs.read_u8()?;
        if id != ACK_FLAG && id != NACK_FLAG {
            return Err(CodecError::InvalidHeader(id));
        }
        let count = bs.read_u16_le()?;

        let mut sequences = Vec::new();
        for _ in 0..count {
            bs.read_u8()?; // single/range flag
            let mut start = bs.read_u24_le()?;
            let mut end = bs.read_u24_le()?;
            if end < start {
                std::mem::swap(&mut start, &mut end);
            }
            for seq in start..=end {
                sequences.push(seq);
            }
        }
        Ok(Self { id, sequences })
    }
}
