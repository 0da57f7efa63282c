//! Inbound half of the reliability engine.
//!
//! `ingest` records the datagram for acknowledgement, applies per-channel
//! ordering, reassembles split groups, and stages delivered payloads for
//! the dispatcher to drain.

use std::collections::BTreeSet;

use log::{debug, warn};

use crate::connection::queue::SplitAssembler;
use crate::protocol::frame::{Frame, FramePacket};
use crate::protocol::MAX_ORDER_CHANNELS;
use crate::util::next_u24;

#[derive(Debug, Clone)]
pub struct RecvQueue {
    /// Inbound sequences to acknowledge at the next flush. Set semantics:
    /// re-ingesting a datagram does not duplicate its entry.
    ack_set: BTreeSet<u32>,

    /// Detected missing inbound sequences, reported via NACK.
    nack_set: BTreeSet<u32>,

    /// One past the highest datagram sequence observed. Sequences between
    /// this and a newly arrived one are the gap to NACK.
    next_seq: u32,

    /// Next inbound ordering slot expected, per channel. Only advances on
    /// in-order receipt.
    expected_order: [u32; MAX_ORDER_CHANNELS],

    splits: SplitAssembler,

    /// Payloads ready for delivery, in arrival order.
    ready: Vec<Vec<u8>>,
}

impl Default for RecvQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RecvQueue {
    pub fn new() -> Self {
        Self {
            ack_set: BTreeSet::new(),
            nack_set: BTreeSet::new(),
            next_seq: 0,
            expected_order: [0; MAX_ORDER_CHANNELS],
            splits: SplitAssembler::new(),
            ready: Vec::new(),
        }
    }

    /// Feeds one decoded datagram through the engine.
    ///
    /// Empty datagrams are not acknowledged; this matches the SA-MP
    /// client's expectation.
    pub fn ingest(&mut self, packet: FramePacket) {
        if packet.frames.is_empty() {
            debug!("ignoring empty datagram seq={}", packet.sequence);
            return;
        }

        self.ack_set.insert(packet.sequence);
        self.nack_set.remove(&packet.sequence);

        if packet.sequence >= self.next_seq {
            for missing in self.next_seq..packet.sequence {
                self.nack_set.insert(missing);
            }
            self.next_seq = packet.sequence + 1;
        }

        for frame in packet.frames {
            self.handle_frame(frame);
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        // fragments share one ordering slot across the group, so they must
        // reach the assembler untouched; the ordering state machine applies
        // once, to the reassembled message
        if let Some(meta) = frame.fragment {
            let ordered = frame.reliability.is_ordered();
            let order_index = frame.order_index;
            let order_channel = frame.order_channel;
            match self.splits.insert(meta, frame.body) {
                Ok(Some(payload)) => {
                    if ordered && !self.accept_ordered(order_index, order_channel) {
                        return;
                    }
                    self.ready.push(payload);
                }
                Ok(None) => {}
                Err(err) => warn!("discarding split group: {}", err),
            }
            return;
        }

        if frame.reliability.is_ordered()
            && !self.accept_ordered(frame.order_index, frame.order_channel)
        {
            return;
        }

        self.ready.push(frame.body);
    }

    /// Per-channel ordering check for one logical message. Returns `false`
    /// when the message is a duplicate to discard.
    fn accept_ordered(&mut self, order_index: Option<u32>, order_channel: Option<u8>) -> bool {
        let channel = order_channel.unwrap_or(0);
        if channel as usize >= MAX_ORDER_CHANNELS {
            warn!("dropping frame on out-of-range channel {}", channel);
            return false;
        }
        let index = order_index.unwrap_or(0);
        let expected = self.expected_order[channel as usize];

        if index < expected {
            debug!(
                "duplicate ordered frame: got {}, expected {} (channel {})",
                index, expected, channel
            );
            return false;
        }
        if index > expected {
            // delivered anyway: the SA-MP client tolerates minor
            // reordering, so no hold-back buffer exists here
            warn!(
                "out-of-order frame: got {}, expected {} (channel {})",
                index, expected, channel
            );
        } else {
            self.expected_order[channel as usize] = next_u24(expected);
        }
        true
    }

    /// Drains payloads staged for delivery, in order.
    pub fn drain_ready(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.ready)
    }

    /// Drains the acknowledgement set, sorted ascending.
    pub fn take_acks(&mut self) -> Vec<u32> {
        let acks: Vec<u32> = self.ack_set.iter().copied().collect();
        self.ack_set.clear();
        acks
    }

    /// Drains the missing-sequence set, sorted ascending.
    pub fn take_nacks(&mut self) -> Vec<u32> {
        let nacks: Vec<u32> = self.nack_set.iter().copied().collect();
        self.nack_set.clear();
        nacks
    }

    pub fn acks_pending(&self) -> usize {
        self.ack_set.len()
    }

    pub fn expected_order(&self, channel: u8) -> u32 {
        self.expected_order[channel as usize % MAX_ORDER_CHANNELS]
    }

    pub fn pending_split_groups(&self) -> usize {
        self.splits.pending_groups()
    }
}
