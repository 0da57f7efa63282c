//! The post-handshake connection FSM.
//!
//! Drives the SA-MP auth and spawn sequence:
//!
//! ```text
//! Connected --[recv 0x88 auth]--> LoginComplete   (auth_handled)
//!           --[send E3:00 challenge]              (sent_e3_phase0)
//!           --[recv 0x22 login, cookie checked]
//!           --[send E3:01 accept]                 (sent_e3_phase1)
//!           --[recv 0x8A join]--> spawn burst --> InGame
//!                                                 (join_response_sent)
//! ```
//!
//! Every transition is one-shot, guarded by a [`Guard`] on the session;
//! duplicates are logged and dropped. Unexpected packets in the current
//! state never disconnect the peer.
//!
//! [`Guard`]: crate::connection::Guard

use std::sync::Arc;

use log::{debug, info, warn};

use crate::connection::{Session, SessionState};
use crate::protocol::offline::port_cookie;
use crate::protocol::reliability::Reliability;
use crate::protocol::rpc::{self, InitGameParams, SpawnInfo};
use crate::protocol::stream::BitStream;
use crate::protocol::{ID_AUTH, ID_AUTH_KEY, ID_E3, ID_JOIN, ID_LOGIN};
use crate::server::Listener;

const E3_PHASE_CHALLENGE: u8 = 0x00;
const E3_PHASE_ACCEPT: u8 = 0x01;

/// Spawn burst packets go out reliable-ordered on this channel.
const FSM_CHANNEL: u8 = 0;

/// Default spawn class handed out before a gamemode takes over:
/// the Los Santos drop-off point.
const DEFAULT_SPAWN_POS: [f32; 3] = [1958.3783, 1343.1572, 15.3746];
const DEFAULT_SPAWN_ROT: f32 = 270.1425;

/// Builds an E3 control packet: id, 24-bit sub-sequence, phase, body.
/// The sub-sequence is allocated per session and is independent from the
/// RakNet datagram sequence.
fn e3_packet(seq: u32, phase: u8, body: &[u8]) -> Vec<u8> {
    let mut bs = BitStream::new();
    bs.write_u8(ID_E3);
    bs.write_u24_le(seq);
    bs.write_u8(phase);
    bs.write_bytes(body);
    bs.into_inner()
}

pub(crate) async fn handle_payload(
    listener: &Listener,
    session: &Arc<Session>,
    packet_id: u8,
    body: &[u8],
) {
    match packet_id {
        ID_AUTH => handle_auth(session).await,
        ID_LOGIN => handle_login(listener, session, body).await,
        ID_JOIN => handle_join(listener, session, body).await,
        ID_AUTH_KEY => handle_auth_key(session, body).await,
        _ => {}
    }
}

/// `0x88`: the client's auth blob. Accepting it completes the login state
/// and triggers the E3 phase-0 challenge.
async fn handle_auth(session: &Arc<Session>) {
    let state = session.state().await;
    if state < SessionState::Connected {
        warn!(
            "session {}: auth received in state {}, dropping",
            session.addr, state
        );
        return;
    }

    let seq = {
        let mut login = session.login().await;
        if !login.auth_handled.trip() {
            debug!("session {}: duplicate auth, dropping", session.addr);
            return;
        }
        // auth implies the challenge; the guards trip together
        if !login.sent_e3_phase0.trip() {
            return;
        }
        login.next_e3_seq()
    };

    session.set_state(SessionState::LoginComplete).await;

    let challenge = port_cookie(session.addr.port());
    let packet = e3_packet(seq, E3_PHASE_CHALLENGE, &challenge);
    if let Err(err) = session
        .enqueue(packet, Reliability::ReliableOrdered, FSM_CHANNEL)
        .await
    {
        warn!("session {}: challenge enqueue failed: {}", session.addr, err);
    }
}

/// `0x22`: the client echoes the cookie. On a match, the E3 phase-1 accept
/// goes out carrying the assigned player id.
async fn handle_login(listener: &Listener, session: &Arc<Session>, body: &[u8]) {
    let expected = port_cookie(session.addr.port());
    if body.len() < 2 || body[..2] != expected {
        warn!("session {}: login cookie mismatch, dropping", session.addr);
        return;
    }

    let (seq, player_id) = {
        let mut login = session.login().await;
        if !login.auth_handled.is_set() {
            warn!(
                "session {}: login before auth, dropping",
                session.addr
            );
            return;
        }
        if !login.sent_e3_phase1.trip() {
            debug!("session {}: duplicate login, dropping", session.addr);
            return;
        }
        login.player_id = listener.allocate_player_id();
        (login.next_e3_seq(), login.player_id)
    };

    let packet = e3_packet(seq, E3_PHASE_ACCEPT, &player_id.to_le_bytes());
    if let Err(err) = session
        .enqueue(packet, Reliability::ReliableOrdered, FSM_CHANNEL)
        .await
    {
        warn!("session {}: accept enqueue failed: {}", session.addr, err);
    }
}

/// `0x8A`: the client asks to join. The spawn burst brings the world up on
/// the client and opens the streaming gate.
async fn handle_join(listener: &Listener, session: &Arc<Session>, body: &[u8]) {
    // best-effort nickname: length-prefixed byte string
    let nickname = body
        .split_first()
        .and_then(|(len, rest)| rest.get(..*len as usize))
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned());

    let player_id = {
        let mut login = session.login().await;
        if !login.join_response_sent.trip() {
            debug!("session {}: duplicate join, dropping", session.addr);
            return;
        }
        if nickname.is_some() {
            login.nickname = nickname.clone();
        }
        login.player_id
    };

    let config = listener.config();
    let params = InitGameParams {
        player_id,
        world_time: config.world_time,
        weather: config.weather,
        hostname: config.server_name.clone(),
        game_mode_text: config.game_mode.clone(),
        map_name: config.map_name.clone(),
        ..Default::default()
    };
    let spawn = SpawnInfo {
        team: 0,
        skin: 0,
        position: DEFAULT_SPAWN_POS,
        rotation: DEFAULT_SPAWN_ROT,
        weapons: [(0, 0); 3],
    };

    let burst = [
        rpc::encode_rpc(&rpc::init_game(&params)),
        rpc::encode_rpc(&rpc::set_game_mode_text(&config.game_mode)),
        rpc::encode_rpc(&rpc::set_weather(config.weather)),
        rpc::encode_rpc(&rpc::set_world_time(config.world_time)),
        rpc::encode_rpc(&rpc::set_spawn_info(&spawn)),
        rpc::encode_rpc(&rpc::spawn_player()),
    ];
    for packet in burst {
        if let Err(err) = session
            .enqueue(packet, Reliability::ReliableOrdered, FSM_CHANNEL)
            .await
        {
            warn!(
                "session {}: spawn burst enqueue failed: {}",
                session.addr, err
            );
            return;
        }
    }

    session.set_state(SessionState::InGame).await;
    info!(
        "player {} ({}) entered the game",
        player_id,
        nickname.as_deref().unwrap_or("?")
    );
}

/// `0x25`: auth-key sent ahead of the expected E3 phases. Treated as an
/// idempotent fast-path to the login-complete state.
async fn handle_auth_key(session: &Arc<Session>, body: &[u8]) {
    debug!(
        "session {}: auth key ({} bytes)",
        session.addr,
        body.len()
    );
    let state = session.state().await;
    if state >= SessionState::Connected && state < SessionState::LoginComplete {
        session.set_state(SessionState::LoginComplete).await;
    }
}
