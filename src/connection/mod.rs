//! Per-peer session state.
//!
//! A [`Session`] owns everything the reliability engine needs for one
//! remote endpoint: the monotonic counters, the send/recv queues, the
//! recovery map for NACK-driven retransmit, and the one-shot login guards
//! the connection FSM trips on its way to the in-game state.
//!
//! Locking: the send queue, recv queue, state and login data each sit
//! behind their own async lock. `pending_ack` deliberately uses a separate
//! std mutex so the retransmit path can clear entries while a tick holds
//! the send lock. Acquiring (session lock, pending_ack) in that order is
//! permitted; the reverse order is forbidden.

pub mod queue;
pub mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use log::{debug, warn};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::error::SessionError;
use crate::protocol::ack::Acknowledgement;
use crate::protocol::frame::FramePacket;
use crate::protocol::reliability::Reliability;
use crate::protocol::{safe_payload, MTU_MAX, MTU_MIN};
use crate::util::{current_epoch, next_u24};

pub use self::queue::{RecvQueue, SendQueue};
pub use self::state::SessionState;

/// A boolean that may be set exactly once.
///
/// The connection FSM uses these for its one-shot transitions; tripping a
/// guard twice means a duplicate packet (or a bug) and is reported by the
/// return value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Guard(bool);

impl Guard {
    /// Sets the guard. Returns `true` on the first call, `false` on every
    /// call after that.
    pub fn trip(&mut self) -> bool {
        !std::mem::replace(&mut self.0, true)
    }

    pub fn is_set(&self) -> bool {
        self.0
    }
}

/// FSM-owned state for the SA-MP auth/login/spawn exchange.
#[derive(Debug, Default)]
pub struct LoginState {
    pub auth_handled: Guard,
    pub sent_e3_phase0: Guard,
    pub sent_e3_phase1: Guard,
    pub join_response_sent: Guard,

    /// Sub-sequence stamped into E3 payloads. 24-bit, monotonic, distinct
    /// from the RakNet datagram sequence.
    e3_seq: u32,

    pub player_id: u16,
    pub nickname: Option<String>,
}

impl LoginState {
    /// Allocates the next E3 sub-sequence. The first allocation yields 1.
    pub fn next_e3_seq(&mut self) -> u32 {
        self.e3_seq = next_u24(self.e3_seq);
        self.e3_seq
    }

    pub fn e3_seq(&self) -> u32 {
        self.e3_seq
    }
}

/// State for one remote peer, keyed by its socket address.
///
/// Lives from the first `0x05` received until timeout, an explicit
/// disconnect notification, or server shutdown.
pub struct Session {
    /// Remote endpoint; the session table key.
    pub addr: SocketAddr,

    guid: AtomicU64,
    state: Mutex<SessionState>,
    send: RwLock<SendQueue>,
    recv: Mutex<RecvQueue>,
    login: Mutex<LoginState>,

    /// Encoded in-flight datagrams keyed by sequence, under a lock of
    /// their own (see module docs for the ordering rule).
    pending_ack: StdMutex<HashMap<u32, Vec<u8>>>,

    last_rx: AtomicU64,
    last_tx: AtomicU64,
    closed: AtomicBool,
}

impl Session {
    pub fn new(addr: SocketAddr, mtu: u16) -> Self {
        debug!(
            "session {} created: mtu={} safe payload ordered={} reliable={}",
            addr,
            mtu,
            safe_payload(mtu, true),
            safe_payload(mtu, false)
        );
        Self {
            addr,
            guid: AtomicU64::new(0),
            state: Mutex::new(SessionState::Unconnected),
            send: RwLock::new(SendQueue::new(mtu)),
            recv: Mutex::new(RecvQueue::new()),
            login: Mutex::new(LoginState::default()),
            pending_ack: StdMutex::new(HashMap::new()),
            last_rx: AtomicU64::new(current_epoch()),
            last_tx: AtomicU64::new(current_epoch()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn guid(&self) -> u64 {
        self.guid.load(Ordering::Relaxed)
    }

    pub fn set_guid(&self, guid: u64) {
        self.guid.store(guid, Ordering::Relaxed);
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    pub async fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().await;
        if *state != next {
            debug!("session {}: {} -> {}", self.addr, *state, next);
            *state = next;
        }
    }

    /// Streaming gate consulted by external gamemode code before enqueueing
    /// world updates.
    pub async fn can_stream(&self) -> bool {
        self.state().await.can_stream()
    }

    pub async fn mtu(&self) -> u16 {
        self.send.read().await.mtu()
    }

    /// Applies the MTU requested during the `0x07` exchange. Values below
    /// the protocol minimum are rejected; larger requests are clamped to
    /// the local maximum. Renegotiation fails while a split transmission
    /// is in flight.
    pub async fn negotiate_mtu(&self, requested: u16) -> Result<u16, SessionError> {
        if requested < MTU_MIN {
            return Err(SessionError::MtuOutOfRange(requested));
        }
        let accepted = requested.min(MTU_MAX);
        self.send.write().await.set_mtu(accepted)?;
        debug!(
            "session {}: mtu {} accepted, safe payload ordered={} reliable={}",
            self.addr,
            accepted,
            safe_payload(accepted, true),
            safe_payload(accepted, false)
        );
        Ok(accepted)
    }

    /// Submits an outbound payload. Indices are assigned immediately;
    /// transmission happens on the next tick.
    pub async fn enqueue(
        &self,
        payload: Vec<u8>,
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), SessionError> {
        self.send.write().await.enqueue(payload, reliability, channel)
    }

    /// Feeds a decoded inbound datagram through the reliability engine and
    /// returns the payloads that became deliverable.
    pub async fn ingest(&self, packet: FramePacket) -> Vec<Vec<u8>> {
        self.touch_rx();
        let mut recv = self.recv.lock().await;
        recv.ingest(packet);
        recv.drain_ready()
    }

    /// Removes acknowledged datagrams from recovery. Idempotent.
    pub async fn handle_ack(&self, ack: &Acknowledgement) {
        {
            let mut send = self.send.write().await;
            for seq in &ack.sequences {
                send.recovery.remove(*seq);
            }
        }
        // session lock released; pending_ack lock is independent
        if let Ok(mut pending) = self.pending_ack.lock() {
            for seq in &ack.sequences {
                pending.remove(seq);
            }
        }
    }

    /// Re-queues the frames of NACKed datagrams. The recovery entries stay
    /// in place until an ACK arrives.
    pub async fn handle_nack(&self, nack: &Acknowledgement) {
        let mut send = self.send.write().await;
        for seq in &nack.sequences {
            if let Some(packet) = send.recovery.get(*seq) {
                let frames = packet.frames.clone();
                debug!(
                    "session {}: resending {} frame(s) from seq {}",
                    self.addr,
                    frames.len(),
                    seq
                );
                send.requeue(frames);
            }
        }
    }

    /// One 50 ms tick: flush ACKs, NACKs, then at most one datagram from
    /// the send queue.
    pub async fn tick(&self, socket: &UdpSocket) {
        if self.is_closed() {
            return;
        }

        let (acks, nacks) = {
            let mut recv = self.recv.lock().await;
            (recv.take_acks(), recv.take_nacks())
        };

        if !acks.is_empty() {
            self.send_raw(socket, &Acknowledgement::ack(acks).encode()).await;
        }
        if !nacks.is_empty() {
            self.send_raw(socket, &Acknowledgement::nack(nacks).encode()).await;
        }

        let flushed = {
            let mut send = self.send.write().await;
            match send.flush() {
                Some(packet) => match packet.encode() {
                    Ok(bytes) => {
                        let sequence = packet.sequence;
                        send.recovery.insert(sequence, packet);
                        Some((sequence, bytes))
                    }
                    Err(err) => {
                        warn!("session {}: dropping unencodable datagram: {}", self.addr, err);
                        None
                    }
                },
                None => None,
            }
        };

        if let Some((sequence, bytes)) = flushed {
            if let Ok(mut pending) = self.pending_ack.lock() {
                pending.insert(sequence, bytes.clone());
            }
            self.send_raw(socket, &bytes).await;
        }
    }

    async fn send_raw(&self, socket: &UdpSocket, bytes: &[u8]) {
        match socket.send_to(bytes, self.addr).await {
            Ok(_) => self.last_tx.store(current_epoch(), Ordering::Relaxed),
            // transient send errors do not kill a live session
            Err(err) => warn!("session {}: send failed: {}", self.addr, err),
        }
    }

    pub(crate) async fn login(&self) -> MutexGuard<'_, LoginState> {
        self.login.lock().await
    }

    pub async fn player_id(&self) -> u16 {
        self.login.lock().await.player_id
    }

    pub async fn nickname(&self) -> Option<String> {
        self.login.lock().await.nickname.clone()
    }

    pub fn touch_rx(&self) {
        self.last_rx.store(current_epoch(), Ordering::Relaxed);
    }

    pub fn last_rx(&self) -> u64 {
        self.last_rx.load(Ordering::Relaxed)
    }

    pub fn last_tx(&self) -> u64 {
        self.last_tx.load(Ordering::Relaxed)
    }

    pub fn is_timed_out(&self, timeout_ms: u64) -> bool {
        current_epoch().saturating_sub(self.last_rx()) > timeout_ms
    }

    /// Tears the session down: queues are drained without sending and no
    /// further ticks do anything. There is no final-flush guarantee.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.send.write().await.drain();
        {
            let mut recv = self.recv.lock().await;
            recv.take_acks();
            recv.take_nacks();
            recv.drain_ready();
        }
        if let Ok(mut pending) = self.pending_ack.lock() {
            pending.clear();
        }
        debug!("session {} closed", self.addr);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of unacknowledged datagrams held for retransmit.
    pub async fn recovery_len(&self) -> usize {
        self.send.read().await.recovery.len()
    }

    /// Whether a split transmission still has fragments queued.
    pub async fn split_in_flight(&self) -> bool {
        self.send.read().await.split_in_flight()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.addr)
            .field("guid", &self.guid())
            .field("closed", &self.is_closed())
            .finish()
    }
}
