//! Outbound half of the reliability engine.
//!
//! `enqueue` wraps payloads into frames, assigning message and ordering
//! indices; oversized payloads are partitioned into a split group. `flush`
//! drains ready frames into one datagram per tick, bounded by the batch
//! limit and the negotiated MTU.

use std::collections::VecDeque;

use crate::connection::queue::RecoveryQueue;
use crate::error::SessionError;
use crate::protocol::frame::{FragmentMeta, Frame, FramePacket};
use crate::protocol::reliability::Reliability;
use crate::protocol::{safe_payload, DATAGRAM_HEADER_SIZE, MAX_BATCH_FRAMES, MAX_ORDER_CHANNELS};
use crate::util::{next_u24, SeqGenerator};

#[derive(Debug, Clone)]
pub struct SendQueue {
    mtu: u16,

    /// Next outbound datagram sequence. Never resets within a session.
    send_seq: SeqGenerator,

    /// Next reliable message index. Never resets within a session.
    message_index: SeqGenerator,

    /// Next outbound ordering slot, one 24-bit counter per channel.
    order_index: [u32; MAX_ORDER_CHANNELS],

    /// Next fragmentation group identifier.
    split_id: u16,

    /// Fragments of the current split transmission still waiting to be
    /// batched. While non-zero, no new split may begin and the MTU is
    /// locked.
    split_pending: usize,

    queue: VecDeque<Frame>,

    /// Unacknowledged datagrams for NACK-driven retransmit.
    pub recovery: RecoveryQueue,
}

impl SendQueue {
    pub fn new(mtu: u16) -> Self {
        Self {
            mtu,
            send_seq: SeqGenerator::new(),
            message_index: SeqGenerator::new(),
            order_index: [0; MAX_ORDER_CHANNELS],
            split_id: 0,
            split_pending: 0,
            queue: VecDeque::new(),
            recovery: RecoveryQueue::new(),
        }
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Renegotiates the MTU. Forbidden while a split transmission is in
    /// flight, since the fragment chunk size was derived from the old value.
    pub fn set_mtu(&mut self, mtu: u16) -> Result<(), SessionError> {
        if self.split_in_flight() {
            return Err(SessionError::MtuLocked);
        }
        self.mtu = mtu;
        Ok(())
    }

    pub fn split_in_flight(&self) -> bool {
        self.split_pending > 0
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// The datagram sequence the next flush will use.
    pub fn next_sequence(&self) -> u32 {
        self.send_seq.peek()
    }

    /// The ordering slot the next ordered enqueue on `channel` will take.
    pub fn order_slot(&self, channel: u8) -> u32 {
        self.order_index[channel as usize % MAX_ORDER_CHANNELS]
    }

    /// Wraps `payload` into one or more frames and appends them to the
    /// queue. Payloads larger than the safe single-datagram size are
    /// partitioned into a split group sharing the outer reliability and
    /// ordering slot; each fragment is individually reliable and takes its
    /// own message index.
    pub fn enqueue(
        &mut self,
        payload: Vec<u8>,
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), SessionError> {
        if channel as usize >= MAX_ORDER_CHANNELS {
            return Err(SessionError::InvalidChannel(channel));
        }

        let chunk = safe_payload(self.mtu, reliability.is_ordered());
        let needs_split = chunk > 0 && payload.len() > chunk;
        // reject before any counter is advanced
        if needs_split && self.split_in_flight() {
            return Err(SessionError::SplitInFlight);
        }

        let mut frame = Frame::new(reliability, payload);

        if reliability.is_ordered() {
            let slot = self.order_index[channel as usize];
            self.order_index[channel as usize] = next_u24(slot);
            frame.order_index = Some(slot);
            frame.order_channel = Some(channel);
        } else if reliability.is_sequenced() {
            let slot = self.order_index[channel as usize];
            self.order_index[channel as usize] = next_u24(slot);
            frame.sequence_index = Some(slot);
        }

        if needs_split {
            return self.enqueue_split(frame, chunk);
        }

        if reliability.is_reliable() {
            frame.message_index = Some(self.message_index.next());
        }
        self.queue.push_back(frame);
        Ok(())
    }

    fn enqueue_split(&mut self, frame: Frame, chunk: usize) -> Result<(), SessionError> {
        let id = self.split_id;
        self.split_id = self.split_id.wrapping_add(1);

        let parts: Vec<&[u8]> = frame.body.chunks(chunk).collect();
        let count = parts.len() as u32;

        for (index, part) in parts.iter().enumerate() {
            let mut fragment = Frame::new(frame.reliability, part.to_vec())
                .with_fragment(FragmentMeta::new(count, id, index as u32));
            fragment.order_index = frame.order_index;
            fragment.order_channel = frame.order_channel;
            fragment.sequence_index = frame.sequence_index;
            if frame.reliability.is_reliable() {
                fragment.message_index = Some(self.message_index.next());
            }
            self.queue.push_back(fragment);
        }
        self.split_pending = parts.len();
        Ok(())
    }

    /// Re-queues frames recovered after a NACK. They go to the back of the
    /// queue and will ride out in a datagram with a fresh sequence.
    pub fn requeue(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            self.queue.push_back(frame);
        }
    }

    /// Drains up to [`MAX_BATCH_FRAMES`] frames, stopping before the
    /// datagram would overflow the MTU, and wraps them with the next
    /// datagram sequence. Returns `None` when nothing is queued.
    pub fn flush(&mut self) -> Option<FramePacket> {
        if self.queue.is_empty() {
            return None;
        }

        let mut packet = FramePacket::new(0);
        let mut used = DATAGRAM_HEADER_SIZE;

        while let Some(front) = self.queue.front() {
            if packet.frames.len() >= MAX_BATCH_FRAMES {
                break;
            }
            if !packet.frames.is_empty() && used + front.wire_len() > self.mtu as usize {
                break;
            }
            let frame = self.queue.pop_front().expect("front checked above");
            used += frame.wire_len();
            if frame.is_fragment() {
                self.split_pending = self.split_pending.saturating_sub(1);
            }
            packet.frames.push(frame);
        }

        packet.sequence = self.send_seq.next();
        Some(packet)
    }

    /// Drops all queued frames without sending. Used on session teardown.
    pub fn drain(&mut self) {
        self.queue.clear();
        self.split_pending = 0;
        self.recovery.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_enqueue_advances_channel_slot() {
        let mut queue = SendQueue::new(576);
        queue
            .enqueue(vec![1], Reliability::ReliableOrdered, 0)
            .unwrap();
        queue
            .enqueue(vec![2], Reliability::ReliableOrdered, 0)
            .unwrap();
        queue
            .enqueue(vec![3], Reliability::ReliableOrdered, 5)
            .unwrap();

        assert_eq!(queue.order_slot(0), 2);
        assert_eq!(queue.order_slot(5), 1);

        let packet = queue.flush().unwrap();
        assert_eq!(packet.sequence, 0);
        assert_eq!(packet.frames[0].order_index, Some(0));
        assert_eq!(packet.frames[1].order_index, Some(1));
        assert_eq!(packet.frames[2].order_index, Some(0));
        assert_eq!(packet.frames[2].order_channel, Some(5));
    }

    #[test]
    fn boundary_payload_splits_into_two() {
        let mut queue = SendQueue::new(576);
        // safe ordered payload at mtu 576 is 501 bytes
        queue
            .enqueue(vec![0xAB; 502], Reliability::ReliableOrdered, 0)
            .unwrap();

        assert!(queue.split_in_flight());
        assert_eq!(queue.queued_frames(), 2);

        let first = queue.flush().unwrap();
        let meta = first.frames[0].fragment.unwrap();
        assert_eq!(meta.count, 2);
        assert_eq!(meta.index, 0);
        // both fragments carry the same ordering slot, distinct msg indices
        assert_eq!(first.frames[0].order_index, Some(0));
        assert_eq!(first.frames[0].message_index, Some(0));

        let second = queue.flush().unwrap();
        let meta = second.frames[0].fragment.unwrap();
        assert_eq!(meta.index, 1);
        assert_eq!(second.frames[0].order_index, Some(0));
        assert_eq!(second.frames[0].message_index, Some(1));
        assert!(!queue.split_in_flight());
    }

    #[test]
    fn exact_fit_does_not_split() {
        let mut queue = SendQueue::new(576);
        queue
            .enqueue(vec![0xAB; 501], Reliability::ReliableOrdered, 0)
            .unwrap();
        assert_eq!(queue.queued_frames(), 1);
        assert!(!queue.split_in_flight());
    }

    #[test]
    fn second_split_rejected_while_in_flight() {
        let mut queue = SendQueue::new(576);
        queue
            .enqueue(vec![0; 1000], Reliability::ReliableOrdered, 0)
            .unwrap();
        let err = queue
            .enqueue(vec![0; 1000], Reliability::ReliableOrdered, 0)
            .unwrap_err();
        assert_eq!(err, SessionError::SplitInFlight);
    }

    #[test]
    fn mtu_locked_during_split() {
        let mut queue = SendQueue::new(576);
        queue
            .enqueue(vec![0; 1000], Reliability::ReliableOrdered, 0)
            .unwrap();
        assert_eq!(queue.set_mtu(1400), Err(SessionError::MtuLocked));
        while queue.flush().is_some() {}
        assert!(queue.set_mtu(1400).is_ok());
    }

    #[test]
    fn flush_respects_batch_and_sequence() {
        let mut queue = SendQueue::new(1492);
        for i in 0..130u8 {
            queue.enqueue(vec![i], Reliability::Reliable, 0).unwrap();
        }
        let first = queue.flush().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.frames.len(), MAX_BATCH_FRAMES);
        let second = queue.flush().unwrap();
        assert_eq!(second.sequence, 1);
        assert_eq!(second.frames.len(), 10);
        assert!(queue.flush().is_none());
    }

    #[test]
    fn message_index_is_monotonic_across_enqueues() {
        let mut queue = SendQueue::new(576);
        queue.enqueue(vec![1], Reliability::Reliable, 0).unwrap();
        queue
            .enqueue(vec![2], Reliability::ReliableOrdered, 0)
            .unwrap();
        queue.enqueue(vec![3], Reliability::Unreliable, 0).unwrap();
        let packet = queue.flush().unwrap();
        assert_eq!(packet.frames[0].message_index, Some(0));
        assert_eq!(packet.frames[1].message_index, Some(1));
        assert_eq!(packet.frames[2].message_index, None);
    }

    #[test]
    fn invalid_channel_rejected() {
        let mut queue = SendQueue::new(576);
        let err = queue
            .enqueue(vec![0], Reliability::ReliableOrdered, 32)
            .unwrap_err();
        assert_eq!(err, SessionError::InvalidChannel(32));
    }
}
