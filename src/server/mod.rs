//! The UDP listener: session table, receive loop, dispatch, ticking.
//!
//! One task reads datagrams off the socket and classifies them by first
//! byte; each session additionally owns a 50 ms tick task that flushes
//! acknowledgements and the send queue. A slower sweep removes sessions
//! that have gone silent.

pub mod handshake;
pub mod login;

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::connection::{Session, SessionState};
use crate::error::{ServerError, SessionError};
use crate::protocol::ack::Acknowledgement;
use crate::protocol::frame::FramePacket;
use crate::protocol::{
    ACK_FLAG, ID_AUTH, ID_AUTH_KEY, ID_CONNECTION_REQUEST, ID_DISCONNECTION_NOTIFICATION, ID_JOIN,
    ID_LOGIN, ID_NEW_INCOMING_CONNECTION, ID_OPEN_CONNECTION_REQUEST_1,
    ID_OPEN_CONNECTION_REQUEST_2, ID_UNCONNECTED_PING, MTU_MIN, NACK_FLAG, SAMP_QUERY_PREFIX,
};
use crate::util::to_address_token;

/// Cadence of the per-session flush task.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);
/// Inbound silence after which a session is destroyed.
pub const SESSION_TIMEOUT_MS: u64 = 30_000;
/// Cadence of the stale-session sweep.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5);

/// Flat configuration consumed at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_players: u32,
    pub server_name: String,
    pub game_mode: String,
    pub language: String,
    pub weather: u8,
    /// Hour of day, `0..=23`.
    pub world_time: u8,
    pub map_name: String,
    pub web_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7777,
            max_players: 100,
            server_name: "SA-MP Server".to_string(),
            game_mode: "Freeroam".to_string(),
            language: "English".to_string(),
            weather: 10,
            world_time: 12,
            map_name: "San Andreas".to_string(),
            web_url: "www.sa-mp.com".to_string(),
        }
    }
}

/// Callback surface for the external gamemode layer.
///
/// Everything the transport does not consume itself ends up here. The
/// methods are synchronous; implementations that need to do real work
/// should hand it off to their own tasks.
pub trait GameHandler: Send + Sync {
    /// A delivered payload the connection FSM did not handle.
    fn on_packet(&self, session: &Arc<Session>, packet_id: u8, payload: &[u8]) {
        let _ = (session, packet_id, payload);
    }

    /// A SA-MP query probe (`SAMP` prefix). Return the response datagram to
    /// send back, or `None` to ignore it. The query responder itself lives
    /// outside this crate.
    fn on_query(&self, probe: &[u8], addr: SocketAddr) -> Option<Vec<u8>> {
        let _ = (probe, addr);
        None
    }

    /// A new session appeared in the table.
    fn on_connect(&self, session: &Arc<Session>) {
        let _ = session;
    }

    /// A session left the table (timeout, disconnect or shutdown).
    fn on_disconnect(&self, addr: SocketAddr) {
        let _ = addr;
    }
}

/// A handler that ignores everything. Useful for tests and as a default.
pub struct NullHandler;

impl GameHandler for NullHandler {}

/// The server: binds the socket, owns the session table and drives the
/// receive and tick loops. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Listener {
    config: Arc<ServerConfig>,
    guid: u64,
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    handler: Arc<dyn GameHandler>,
    running: Arc<AtomicBool>,
    next_player_id: Arc<AtomicU16>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Listener {
    /// Binds the UDP socket. Binding failures surface here; nothing is
    /// spawned yet.
    pub async fn bind(
        mut config: ServerConfig,
        handler: Arc<dyn GameHandler>,
    ) -> Result<Self, ServerError> {
        if config.world_time > 23 {
            warn!("world_time {} out of range, wrapping", config.world_time);
            config.world_time %= 24;
        }

        let bind_addr = format!("{}:{}", config.host, config.port);
        let socket = UdpSocket::bind(&bind_addr).await.map_err(ServerError::Bind)?;
        let local = socket.local_addr().map_err(ServerError::Bind)?;
        info!(
            "{} | {} listening on {}",
            config.server_name, config.game_mode, local
        );

        Ok(Self {
            config: Arc::new(config),
            guid: rand::random(),
            socket: Arc::new(socket),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            handler,
            running: Arc::new(AtomicBool::new(true)),
            next_player_id: Arc::new(AtomicU16::new(0)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.socket.local_addr().map_err(ServerError::Bind)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn guid(&self) -> u64 {
        self.guid
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Spawns the receive loop and the stale-session sweep.
    pub async fn start(&self) {
        let receiver = self.clone();
        let recv_task = tokio::spawn(async move { receiver.recv_loop().await });

        let sweeper = self.clone();
        let sweep_task = tokio::spawn(async move { sweeper.cleanup_loop().await });

        let mut tasks = self.tasks.lock().await;
        tasks.push(recv_task);
        tasks.push(sweep_task);
    }

    /// Stops the server: the receive loop and all ticks observe the flag
    /// and exit, sessions are drained without a final flush.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        let drained: Vec<Arc<Session>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in drained {
            session.close().await;
        }
        info!("listener stopped");
    }

    async fn recv_loop(self) {
        let mut buffer = [0u8; 2048];
        while self.is_running() {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    self.handle_datagram(&buffer[..len], addr).await;
                }
                Err(err) => {
                    if self.is_running() {
                        warn!("recv error: {}", err);
                    }
                }
            }
        }
    }

    async fn cleanup_loop(self) {
        while self.is_running() {
            sleep(CLEANUP_INTERVAL).await;
            let stale: Vec<SocketAddr> = {
                let sessions = self.sessions.read().await;
                sessions
                    .values()
                    .filter(|s| s.is_timed_out(SESSION_TIMEOUT_MS))
                    .map(|s| s.addr)
                    .collect()
            };
            for addr in stale {
                info!("removing session {}: {}", addr, SessionError::SessionTimeout);
                self.remove_session(addr).await;
            }
        }
    }

    /// Classifies one raw datagram by its first byte and routes it.
    pub async fn handle_datagram(&self, data: &[u8], addr: SocketAddr) {
        if data.is_empty() {
            return;
        }

        if data.len() >= SAMP_QUERY_PREFIX.len() && &data[..4] == SAMP_QUERY_PREFIX {
            if let Some(response) = self.handler.on_query(data, addr) {
                self.send_to(&response, addr).await;
            }
            return;
        }

        match data[0] {
            ID_OPEN_CONNECTION_REQUEST_1
            | ID_OPEN_CONNECTION_REQUEST_2
            | ID_CONNECTION_REQUEST
            | ID_NEW_INCOMING_CONNECTION
            | ID_UNCONNECTED_PING => handshake::handle_offline(self, data, addr).await,
            ACK_FLAG => {
                if let Some(session) = self.session(addr).await {
                    match Acknowledgement::decode(data) {
                        Ok(ack) => session.handle_ack(&ack).await,
                        Err(err) => debug!("malformed ack from {}: {}", addr, err),
                    }
                }
            }
            NACK_FLAG => {
                if let Some(session) = self.session(addr).await {
                    match Acknowledgement::decode(data) {
                        Ok(nack) => session.handle_nack(&nack).await,
                        Err(err) => debug!("malformed nack from {}: {}", addr, err),
                    }
                }
            }
            0x80..=0x8F => self.handle_data(data, addr).await,
            other => debug!("unhandled packet 0x{:02X} from {}", other, addr),
        }
    }

    async fn handle_data(&self, data: &[u8], addr: SocketAddr) {
        let Some(session) = self.session(addr).await else {
            debug!("data packet from unknown peer {}", addr);
            return;
        };
        match FramePacket::decode(data) {
            Ok(packet) => {
                let payloads = session.ingest(packet).await;
                for payload in payloads {
                    self.dispatch_payload(&session, &payload).await;
                }
            }
            Err(err) => debug!("malformed datagram from {}: {}", addr, err),
        }
    }

    /// Routes a delivered payload: the auth/login/join exchange goes to the
    /// FSM, a disconnect notification tears the session down, everything
    /// else surfaces to the external handler.
    async fn dispatch_payload(&self, session: &Arc<Session>, payload: &[u8]) {
        let Some((&id, body)) = payload.split_first() else {
            return;
        };
        match id {
            ID_AUTH | ID_LOGIN | ID_JOIN | ID_AUTH_KEY => {
                login::handle_payload(self, session, id, body).await;
            }
            ID_DISCONNECTION_NOTIFICATION => {
                info!("session {} disconnected", session.addr);
                self.remove_session(session.addr).await;
            }
            _ => self.handler.on_packet(session, id, body),
        }
    }

    /// Read-only snapshot of the session table.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn session(&self, addr: SocketAddr) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(&to_address_token(addr))
            .cloned()
    }

    /// Fetches the session for `addr`, creating it (and its tick task) on
    /// first contact.
    pub(crate) async fn session_or_create(&self, addr: SocketAddr) -> Arc<Session> {
        if let Some(session) = self.session(addr).await {
            return session;
        }
        let mut sessions = self.sessions.write().await;
        // re-check under the write lock
        if let Some(session) = sessions.get(&to_address_token(addr)) {
            return session.clone();
        }
        let session = Arc::new(Session::new(addr, MTU_MIN));
        sessions.insert(to_address_token(addr), session.clone());
        drop(sessions);

        self.spawn_session_tick(session.clone());
        self.handler.on_connect(&session);
        session
    }

    pub(crate) async fn remove_session(&self, addr: SocketAddr) {
        let removed = self.sessions.write().await.remove(&to_address_token(addr));
        if let Some(session) = removed {
            session.close().await;
            self.handler.on_disconnect(addr);
        }
    }

    fn spawn_session_tick(&self, session: Arc<Session>) {
        let listener = self.clone();
        tokio::spawn(async move {
            loop {
                sleep(TICK_INTERVAL).await;
                if !listener.is_running() || session.is_closed() {
                    break;
                }
                if session.is_timed_out(SESSION_TIMEOUT_MS) {
                    info!(
                        "removing session {}: {}",
                        session.addr,
                        SessionError::SessionTimeout
                    );
                    listener.remove_session(session.addr).await;
                    break;
                }
                session.tick(&listener.socket).await;
            }
        });
    }

    pub(crate) fn allocate_player_id(&self) -> u16 {
        self.next_player_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The server's own IPv4 endpoint, as embedded in the `0x08` reply.
    pub(crate) fn local_addr_v4(&self) -> Option<SocketAddrV4> {
        match self.socket.local_addr() {
            Ok(SocketAddr::V4(addr)) => Some(addr),
            Ok(SocketAddr::V6(_)) | Err(_) => None,
        }
    }

    pub(crate) async fn send_to(&self, bytes: &[u8], addr: SocketAddr) {
        if let Err(err) = self.socket.send_to(bytes, addr).await {
            warn!("send to {} failed: {}", addr, err);
        }
    }

    /// Count of sessions currently past the handshake.
    pub async fn player_count(&self) -> usize {
        let sessions = self.sessions.read().await;
        let mut count = 0;
        for session in sessions.values() {
            if session.state().await >= SessionState::Connected {
                count += 1;
            }
        }
        count
    }
}
