//! Datagram and encapsulation codec.
//!
//! A [`FramePacket`] is one UDP datagram: a header byte with bit 7 set, a
//! 24-bit little-endian sequence, and one or more [`Frame`]s. Each frame
//! carries a reliability-annotated payload; which header fields are present
//! depends on the reliability tier and the split flag.

use log::debug;

use crate::error::CodecError;
use crate::protocol::reliability::Reliability;
use crate::protocol::stream::BitStream;
use crate::protocol::{DATAGRAM_FLAG, DATAGRAM_HEADER};

/// Fragmentation metadata carried when the split flag is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentMeta {
    /// Total number of fragments in the group.
    pub count: u32,
    /// Group identifier shared by every fragment of one transmission.
    pub id: u16,
    /// Position of this fragment within the group.
    pub index: u32,
}

impl FragmentMeta {
    pub fn new(count: u32, id: u16, index: u32) -> Self {
        Self { count, id, index }
    }
}

/// One encapsulated packet inside a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub reliability: Reliability,
    /// Present for every reliable tier.
    pub message_index: Option<u32>,
    /// Present for the sequenced tiers (no channel byte follows).
    pub sequence_index: Option<u32>,
    /// Present for the ordered tiers, together with `order_channel`.
    pub order_index: Option<u32>,
    pub order_channel: Option<u8>,
    pub fragment: Option<FragmentMeta>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(reliability: Reliability, body: Vec<u8>) -> Self {
        Self {
            reliability,
            message_index: None,
            sequence_index: None,
            order_index: None,
            order_channel: None,
            fragment: None,
            body,
        }
    }

    pub fn with_fragment(mut self, meta: FragmentMeta) -> Self {
        self.fragment = Some(meta);
        self
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment.is_some()
    }

    /// Size of the encapsulation header on the wire, excluding the body.
    pub fn header_len(&self) -> usize {
        let mut size = 3; // flags + bit length
        if self.reliability.is_reliable() {
            size += 3;
        }
        if self.reliability.is_sequenced() {
            size += 3;
        }
        if self.reliability.is_ordered() {
            size += 4;
        }
        if self.fragment.is_some() {
            size += 10;
        }
        size
    }

    /// Exact number of bytes this frame occupies inside a datagram.
    pub fn wire_len(&self) -> usize {
        self.header_len() + self.body.len()
    }

    pub fn encode_into(&self, bs: &mut BitStream) -> Result<(), CodecError> {
        // the length field is expressed in bits and must fit 16 bits
        let length_bits = self
            .body
            .len()
            .checked_mul(8)
            .and_then(|bits| u16::try_from(bits).ok())
            .ok_or(CodecError::BufferOverflow)?;

        let mut flags = self.reliability.to_flags();
        if self.fragment.is_some() {
            flags |= 0x10;
        }
        bs.write_u8(flags);
        bs.write_u16_be(length_bits);

        if self.reliability.is_reliable() {
            bs.write_u24_le(self.message_index.unwrap_or(0));
        }
        if self.reliability.is_sequenced() {
            bs.write_u24_le(self.sequence_index.unwrap_or(0));
        }
        if self.reliability.is_ordered() {
            bs.write_u24_le(self.order_index.unwrap_or(0));
            bs.write_u8(self.order_channel.unwrap_or(0));
        }
        if let Some(meta) = &self.fragment {
            bs.write_u32_be(meta.count);
            bs.write_u16_be(meta.id);
            bs.write_u32_be(meta.index);
        }
        bs.write_bytes(&self.body);
        Ok(())
    }

    pub fn decode(bs: &mut BitStream) -> Result<Frame, CodecError> {
        let flags = bs.read_u8()?;
        let reliability = Reliability::from_flags(flags);
        let split = (flags & 0x10) != 0;

        let length_bits = bs.read_u16_be()? as usize;
        let length_bytes = (length_bits + 7) / 8;

        let mut frame = Frame::new(reliability, Vec::new());

        if reliability.is_reliable() {
            frame.message_index = Some(bs.read_u24_le()?);
        }
        if reliability.is_sequenced() {
            frame.sequence_index = Some(bs.read_u24_le()?);
        }
        if reliability.is_ordered() {
            frame.order_index = Some(bs.read_u24_le()?);
            frame.order_channel = Some(bs.read_u8()?);
        }
        if split {
            frame.fragment = Some(FragmentMeta {
                count: bs.read_u32_be()?,
                id: bs.read_u16_be()?,
                index: bs.read_u32_be()?,
            });
        }
        frame.body = bs.read_bytes(length_bytes)?;
        Ok(frame)
    }
}

/// A full datagram: sequence number plus the frames packed into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePacket {
    /// 24-bit datagram sequence, acknowledged via ACK/NACK.
    pub sequence: u32,
    pub frames: Vec<Frame>,
}

impl FramePacket {
    pub fn new(sequence: u32) -> Self {
        Self {
            sequence,
            frames: Vec::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut bs = BitStream::new();
        bs.write_u8(DATAGRAM_HEADER);
        bs.write_u24_le(self.sequence);
        for frame in &self.frames {
            frame.encode_into(&mut bs)?;
        }
        Ok(bs.into_inner())
    }

    /// Decodes a datagram. A malformed or truncated frame terminates parsing
    /// at that point; frames already extracted remain valid and the datagram
    /// is still returned.
    pub fn decode(data: &[u8]) -> Result<FramePacket, CodecError> {
        let mut bs = BitStream::from_bytes(data);
        let header = bs.read_u8()?;
        if header & DATAGRAM_FLAG == 0 {
            return Err(CodecError::InvalidHeader(header));
        }
        let sequence = bs.read_u24_le()?;

        let mut packet = FramePacket::new(sequence);
        while bs.remaining() > 0 {
            match Frame::decode(&mut bs) {
                Ok(frame) => packet.frames.push(frame),
                Err(err) => {
                    debug!(
                        "truncated frame in datagram seq={}: {} ({} frame(s) kept)",
                        sequence,
                        err,
                        packet.frames.len()
                    );
                    break;
                }
            }
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliable_datagram_round_trip() {
        let mut packet = FramePacket::new(100);
        let mut frame = Frame::new(Reliability::Reliable, vec![0xAA, 0xBB, 0xCC]);
        frame.message_index = Some(50);
        packet.frames.push(frame);

        let encoded = packet.encode().unwrap();
        assert_eq!(encoded[0], DATAGRAM_HEADER);

        let decoded = FramePacket::decode(&encoded).unwrap();
        assert_eq!(decoded.sequence, 100);
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.frames[0].reliability, Reliability::Reliable);
        assert_eq!(decoded.frames[0].message_index, Some(50));
        assert_eq!(decoded.frames[0].body, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn ordered_frame_round_trip() {
        let mut frame = Frame::new(Reliability::ReliableOrdered, vec![1, 2, 3, 4]);
        frame.message_index = Some(7);
        frame.order_index = Some(3);
        frame.order_channel = Some(2);

        let mut bs = BitStream::new();
        frame.encode_into(&mut bs).unwrap();
        assert_eq!(bs.as_slice().len(), frame.wire_len());

        let mut rd = BitStream::from_bytes(bs.as_slice());
        let decoded = Frame::decode(&mut rd).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn fragment_round_trip() {
        let mut frame = Frame::new(Reliability::ReliableOrdered, vec![9; 16])
            .with_fragment(FragmentMeta::new(3, 11, 1));
        frame.message_index = Some(0);
        frame.order_index = Some(0);
        frame.order_channel = Some(0);

        let mut bs = BitStream::new();
        frame.encode_into(&mut bs).unwrap();

        let mut rd = BitStream::from_bytes(bs.as_slice());
        let decoded = Frame::decode(&mut rd).unwrap();
        assert_eq!(decoded.fragment, Some(FragmentMeta::new(3, 11, 1)));
        assert_eq!(decoded, frame);
    }

    #[test]
    fn header_sizes_by_tier() {
        let unreliable = Frame::new(Reliability::Unreliable, vec![]);
        assert_eq!(unreliable.header_len(), 3);

        let reliable = Frame::new(Reliability::Reliable, vec![]);
        assert_eq!(reliable.header_len(), 6);

        let ordered = Frame::new(Reliability::ReliableOrdered, vec![]);
        assert_eq!(ordered.header_len(), 10);

        let sequenced = Frame::new(Reliability::ReliableSequenced, vec![]);
        assert_eq!(sequenced.header_len(), 9);

        let split = Frame::new(Reliability::ReliableOrdered, vec![])
            .with_fragment(FragmentMeta::new(2, 0, 0));
        assert_eq!(split.header_len(), 20);
    }

    #[test]
    fn truncated_tail_keeps_earlier_frames() {
        let mut packet = FramePacket::new(5);
        let mut first = Frame::new(Reliability::Reliable, vec![0x01, 0x02]);
        first.message_index = Some(0);
        let mut second = Frame::new(Reliability::Reliable, vec![0x03, 0x04]);
        second.message_index = Some(1);
        packet.frames.push(first.clone());
        packet.frames.push(second);

        let mut encoded = packet.encode().unwrap();
        // cut into the second frame's body
        encoded.truncate(encoded.len() - 1);

        let decoded = FramePacket::decode(&encoded).unwrap();
        assert_eq!(decoded.sequence, 5);
        assert_eq!(decoded.frames, vec![first]);
    }

    #[test]
    fn non_datagram_header_rejected() {
        let err = FramePacket::decode(&[0x05, 0, 0, 0]).unwrap_err();
        assert_eq!(err, CodecError::InvalidHeader(0x05));
    }

    #[test]
    fn bit_length_rounds_up() {
        // 12 bits of payload length -> 2 bytes
        let raw = [0x00, 0x00, 0x0C, 0xDE, 0xAD];
        let mut rd = BitStream::from_bytes(&raw);
        let frame = Frame::decode(&mut rd).unwrap();
        assert_eq!(frame.body, vec![0xDE, 0xAD]);
    }
}
