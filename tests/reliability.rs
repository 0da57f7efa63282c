//! Reliability engine laws exercised through the public session API, with
//! real sockets observing the wire.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use sampnet::connection::{SendQueue, Session};
use sampnet::protocol::ack::Acknowledgement;
use sampnet::protocol::frame::{FragmentMeta, Frame, FramePacket};
use sampnet::Reliability;

async fn socket_pair() -> (UdpSocket, UdpSocket) {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    (server, client)
}

async fn recv(client: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 2048];
    let (len, _) = timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .expect("recv failed");
    buf[..len].to_vec()
}

async fn recv_nothing(client: &UdpSocket) {
    let mut buf = [0u8; 2048];
    assert!(
        timeout(Duration::from_millis(200), client.recv_from(&mut buf))
            .await
            .is_err(),
        "expected silence but a datagram arrived"
    );
}

/// Parses the flat emit-side acknowledgement layout:
/// id, count (u16 le), then one 3-byte little-endian sequence per record.
fn parse_flat_ack(data: &[u8]) -> (u8, Vec<u32>) {
    let id = data[0];
    let count = u16::from_le_bytes([data[1], data[2]]) as usize;
    let mut sequences = Vec::with_capacity(count);
    for i in 0..count {
        let off = 3 + i * 3;
        sequences.push(u32::from_le_bytes([
            data[off],
            data[off + 1],
            data[off + 2],
            0,
        ]));
    }
    assert_eq!(data.len(), 3 + count * 3);
    (id, sequences)
}

fn reliable_frame(message_index: u32, body: &[u8]) -> Frame {
    let mut frame = Frame::new(Reliability::Reliable, body.to_vec());
    frame.message_index = Some(message_index);
    frame
}

fn ordered_frame(index: u32, channel: u8, body: &[u8]) -> Frame {
    let mut frame = Frame::new(Reliability::ReliableOrdered, body.to_vec());
    frame.message_index = Some(index);
    frame.order_index = Some(index);
    frame.order_channel = Some(channel);
    frame
}

#[tokio::test]
async fn tick_flushes_queue_and_ack_clears_recovery() {
    let (server, client) = socket_pair().await;
    let session = Session::new(client.local_addr().unwrap(), 576);

    session
        .enqueue(vec![0x11, 0x22], Reliability::Reliable, 0)
        .await
        .unwrap();
    session.tick(&server).await;

    let raw = recv(&client).await;
    let packet = FramePacket::decode(&raw).unwrap();
    assert_eq!(packet.sequence, 0);
    assert_eq!(packet.frames.len(), 1);
    assert_eq!(packet.frames[0].message_index, Some(0));
    assert_eq!(packet.frames[0].body, vec![0x11, 0x22]);

    assert_eq!(session.recovery_len().await, 1);

    session.handle_ack(&Acknowledgement::ack(vec![0])).await;
    assert_eq!(session.recovery_len().await, 0);

    // repeated acks are idempotent
    session.handle_ack(&Acknowledgement::ack(vec![0])).await;
    assert_eq!(session.recovery_len().await, 0);
}

#[tokio::test]
async fn nack_resends_under_fresh_sequence() {
    let (server, client) = socket_pair().await;
    let session = Session::new(client.local_addr().unwrap(), 576);

    session
        .enqueue(vec![0xAB], Reliability::Reliable, 0)
        .await
        .unwrap();
    session.tick(&server).await;
    let first = FramePacket::decode(&recv(&client).await).unwrap();
    assert_eq!(first.sequence, 0);

    session.handle_nack(&Acknowledgement::nack(vec![0])).await;
    session.tick(&server).await;

    let second = FramePacket::decode(&recv(&client).await).unwrap();
    assert_eq!(second.sequence, 1);
    assert_eq!(second.frames[0].body, vec![0xAB]);

    // the original recovery entry survives until acked, plus the resend
    assert_eq!(session.recovery_len().await, 2);

    session.handle_ack(&Acknowledgement::ack(vec![0, 1])).await;
    assert_eq!(session.recovery_len().await, 0);
}

#[tokio::test]
async fn inbound_datagrams_are_acked_once_sorted() {
    let (server, client) = socket_pair().await;
    let session = Session::new(client.local_addr().unwrap(), 576);

    let mut first = FramePacket::new(0);
    first.frames.push(reliable_frame(0, &[0x01]));
    let mut third = FramePacket::new(2);
    third.frames.push(reliable_frame(1, &[0x02]));

    session.ingest(first.clone()).await;
    session.ingest(third).await;
    session.ingest(first).await; // duplicate, ack set dedups

    session.tick(&server).await;

    // first flush: the ack, then the nack for the gap
    let ack_raw = recv(&client).await;
    assert_eq!(parse_flat_ack(&ack_raw), (0xC0, vec![0, 2]));

    let nack_raw = recv(&client).await;
    assert_eq!(parse_flat_ack(&nack_raw), (0xA0, vec![1]));

    // nothing left to acknowledge on the next tick
    session.tick(&server).await;
    recv_nothing(&client).await;
}

#[tokio::test]
async fn empty_datagram_is_not_acknowledged() {
    let (server, client) = socket_pair().await;
    let session = Session::new(client.local_addr().unwrap(), 576);

    session.ingest(FramePacket::new(9)).await;
    session.tick(&server).await;
    recv_nothing(&client).await;
}

#[tokio::test]
async fn duplicate_ordered_payload_delivered_once() {
    let (_server, client) = socket_pair().await;
    let session = Session::new(client.local_addr().unwrap(), 576);

    let mut packet = FramePacket::new(0);
    packet.frames.push(ordered_frame(0, 0, &[0xEE]));

    let delivered = session.ingest(packet.clone()).await;
    assert_eq!(delivered, vec![vec![0xEE]]);

    let redelivered = session.ingest(packet).await;
    assert!(redelivered.is_empty());
}

#[tokio::test]
async fn split_group_reassembles_across_datagrams() {
    let (_server, client) = socket_pair().await;
    let session = Session::new(client.local_addr().unwrap(), 576);

    let parts: [&[u8]; 3] = [b"one", b"two", b"three"];
    let mut assembled = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let mut frame = reliable_frame(i as u32, part);
        frame.fragment = Some(FragmentMeta::new(3, 7, i as u32));
        let mut packet = FramePacket::new(i as u32);
        packet.frames.push(frame);
        assembled = session.ingest(packet).await;
    }
    assert_eq!(assembled, vec![b"onetwothree".to_vec()]);
}

#[tokio::test]
async fn ordered_split_round_trips_send_to_recv() {
    let (_server, client) = socket_pair().await;
    let session = Session::new(client.local_addr().unwrap(), 576);

    // 600 bytes exceeds the 501-byte safe ordered payload at mtu 576
    let payload: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
    let mut sender = SendQueue::new(576);
    sender
        .enqueue(payload.clone(), Reliability::ReliableOrdered, 0)
        .unwrap();
    assert!(sender.split_in_flight());

    let mut delivered = Vec::new();
    let mut datagrams = 0;
    while let Some(packet) = sender.flush() {
        datagrams += 1;
        delivered.extend(session.ingest(packet).await);
    }
    assert_eq!(datagrams, 2);
    assert_eq!(delivered, vec![payload]);

    // the group consumed exactly one ordering slot: the next in-order
    // message on the channel still goes through
    sender.enqueue(vec![0x77], Reliability::ReliableOrdered, 0).unwrap();
    let next = sender.flush().unwrap();
    assert_eq!(next.frames[0].order_index, Some(1));
    assert_eq!(session.ingest(next).await, vec![vec![0x77]]);
}

#[test]
fn recovery_sequences_stay_below_next_sequence() {
    let mut queue = SendQueue::new(1492);
    for i in 0..5u8 {
        queue.enqueue(vec![i], Reliability::Reliable, 0).unwrap();
        let packet = queue.flush().unwrap();
        queue.recovery.insert(packet.sequence, packet);
    }
    let next = queue.next_sequence();
    for seq in queue.recovery.sequences() {
        assert!(seq < next);
    }
}

#[test]
fn order_slots_never_decrease() {
    let mut queue = SendQueue::new(1492);
    let mut last = 0;
    for _ in 0..10 {
        queue
            .enqueue(vec![0], Reliability::ReliableOrdered, 3)
            .unwrap();
        let slot = queue.order_slot(3);
        assert!(slot >= last);
        last = slot;
    }
}
