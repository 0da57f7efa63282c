//! Full login flow against a running listener: handshake, auth, E3
//! phases, join, spawn burst.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use sampnet::protocol::frame::{Frame, FramePacket};
use sampnet::protocol::magic::OFFLINE_MAGIC;
use sampnet::protocol::offline::port_cookie;
use sampnet::protocol::rpc::RPC_INIT_GAME;
use sampnet::protocol::{ID_E3, ID_RPC};
use sampnet::{Listener, NullHandler, Reliability, ServerConfig, SessionState};

struct Client {
    socket: UdpSocket,
    server: SocketAddr,
    send_seq: u32,
    message_index: u32,
}

impl Client {
    async fn connect(listener: &Listener) -> Self {
        let server = listener.local_addr().unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut request = vec![0x05];
        request.extend_from_slice(&OFFLINE_MAGIC);
        request.extend(std::iter::repeat(0u8).take(512));
        socket.send_to(&request, server).await.unwrap();

        let client = Self {
            socket,
            server,
            send_seq: 0,
            message_index: 0,
        };
        let reply = client.recv_raw().await.expect("no 0x06 reply");
        assert_eq!(reply[0], 0x06);

        // announce the connection so the FSM accepts auth
        client.socket.send_to(&[0x13], server).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client
    }

    fn cookie(&self) -> [u8; 2] {
        port_cookie(self.socket.local_addr().unwrap().port())
    }

    async fn send_payload(&mut self, payload: &[u8]) {
        let mut frame = Frame::new(Reliability::ReliableOrdered, payload.to_vec());
        frame.message_index = Some(self.message_index);
        frame.order_index = Some(self.message_index);
        frame.order_channel = Some(0);
        self.message_index += 1;

        let mut packet = FramePacket::new(self.send_seq);
        self.send_seq += 1;
        packet.frames.push(frame);

        self.socket
            .send_to(&packet.encode().unwrap(), self.server)
            .await
            .unwrap();
    }

    async fn recv_raw(&self) -> Option<Vec<u8>> {
        let mut buf = [0u8; 2048];
        match timeout(Duration::from_secs(2), self.socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
            _ => None,
        }
    }

    /// Receives datagrams until `count` frames with the given payload id
    /// have been collected, skipping acks and unrelated traffic.
    async fn collect_payloads(&self, id: u8, count: usize) -> Vec<Vec<u8>> {
        let mut found = Vec::new();
        while found.len() < count {
            let Some(raw) = self.recv_raw().await else {
                panic!(
                    "timed out: wanted {} payload(s) of id 0x{:02X}, got {}",
                    count,
                    id,
                    found.len()
                );
            };
            if !(0x80..=0x8F).contains(&raw[0]) {
                continue;
            }
            let packet = FramePacket::decode(&raw).unwrap();
            for frame in packet.frames {
                if frame.body.first() == Some(&id) {
                    found.push(frame.body);
                }
            }
        }
        found
    }
}

async fn start_listener() -> Listener {
    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        server_name: "flow test".to_string(),
        ..Default::default()
    };
    let listener = Listener::bind(config, Arc::new(NullHandler)).await.unwrap();
    listener.start().await;
    listener
}

#[tokio::test]
async fn auth_triggers_e3_challenge_with_sub_sequence() {
    let listener = start_listener().await;
    let mut client = Client::connect(&listener).await;

    client.send_payload(&[0x88, 0x01, 0x02]).await;

    let challenge = &client.collect_payloads(ID_E3, 1).await[0];
    // id, u24le sub-sequence starting at 1, phase 0, cookie body
    assert_eq!(challenge[0], ID_E3);
    assert_eq!(&challenge[1..4], &[0x01, 0x00, 0x00]);
    assert_eq!(challenge[4], 0x00);
    assert_eq!(&challenge[5..7], &client.cookie());

    let session = listener
        .session(client.socket.local_addr().unwrap())
        .await
        .unwrap();
    assert_eq!(session.state().await, SessionState::LoginComplete);
    assert!(!session.can_stream().await);

    listener.stop().await;
}

#[tokio::test]
async fn login_with_wrong_cookie_is_dropped() {
    let listener = start_listener().await;
    let mut client = Client::connect(&listener).await;

    client.send_payload(&[0x88]).await;
    client.collect_payloads(ID_E3, 1).await;

    // wrong cookie: no E3 accept may come back
    client.send_payload(&[0x22, 0xFF, 0xFF]).await;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(400);
    while tokio::time::Instant::now() < deadline {
        let Some(raw) = client.recv_raw().await else {
            break;
        };
        if (0x80..=0x8F).contains(&raw[0]) {
            let packet = FramePacket::decode(&raw).unwrap();
            for frame in packet.frames {
                assert_ne!(frame.body.first(), Some(&ID_E3), "accept sent despite bad cookie");
            }
        }
    }

    let session = listener
        .session(client.socket.local_addr().unwrap())
        .await
        .unwrap();
    assert_eq!(session.state().await, SessionState::LoginComplete);

    listener.stop().await;
}

#[tokio::test]
async fn full_login_reaches_in_game() {
    let listener = start_listener().await;
    let mut client = Client::connect(&listener).await;

    // auth -> challenge (E3 sub-seq 1)
    client.send_payload(&[0x88, 0xAA]).await;
    client.collect_payloads(ID_E3, 1).await;

    // login with the cookie -> accept (E3 sub-seq 2)
    let cookie = client.cookie();
    client.send_payload(&[0x22, cookie[0], cookie[1]]).await;
    let accept = &client.collect_payloads(ID_E3, 1).await[0];
    assert_eq!(&accept[1..4], &[0x02, 0x00, 0x00]);
    assert_eq!(accept[4], 0x01);

    // join -> spawn burst, all RPCs, InitGame first
    client.send_payload(&[0x8A, 4, b't', b'e', b's', b't']).await;
    let burst = client.collect_payloads(ID_RPC, 6).await;
    assert_eq!(burst.len(), 6);
    assert_eq!(burst[0][1], RPC_INIT_GAME);

    let session = listener
        .session(client.socket.local_addr().unwrap())
        .await
        .unwrap();
    assert_eq!(session.state().await, SessionState::InGame);
    assert!(session.can_stream().await);
    assert_eq!(session.nickname().await.as_deref(), Some("test"));

    // a duplicate join does not spawn a second burst
    client.send_payload(&[0x8A, 4, b't', b'e', b's', b't']).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    listener.stop().await;
}

#[tokio::test]
async fn disconnect_notification_destroys_session() {
    let listener = start_listener().await;
    let mut client = Client::connect(&listener).await;
    assert_eq!(listener.sessions().await.len(), 1);

    client.send_payload(&[0x15]).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(listener.sessions().await.len(), 0);

    listener.stop().await;
}
