//! Wire protocol for the SA-MP 0.3.7 RakNet dialect.
//!
//! The modules here are pure data transformation: no sockets, no timers.
//! [`stream`] holds the byte-level primitives, [`frame`] the datagram and
//! encapsulation codec, [`ack`] the acknowledgement formats, [`offline`]
//! the pre-session handshake packets, and [`rpc`] the SA-MP RPC payload
//! constructors.

pub mod ack;
pub mod frame;
pub mod magic;
pub mod offline;
pub mod reliability;
pub mod rpc;
pub mod stream;

/// Smallest MTU a peer may negotiate. Anything below is rejected.
pub const MTU_MIN: u16 = 576;
/// Largest MTU the server will accept; larger requests are clamped.
pub const MTU_MAX: u16 = 1492;
/// Margin subtracted from the MTU to stay clear of IP/UDP overhead and
/// avoid IP-level fragmentation.
pub const MTU_SAFETY_MARGIN: u16 = 60;

/// Datagram header: flag byte plus the 24-bit sequence.
pub const DATAGRAM_HEADER_SIZE: usize = 4;
/// Flag byte emitted on outbound datagrams.
pub const DATAGRAM_HEADER: u8 = 0x84;
/// Bit 7, set on every datagram header byte (`0x80..=0x8F` inbound).
pub const DATAGRAM_FLAG: u8 = 0x80;

/// Independent ordering streams per session.
pub const MAX_ORDER_CHANNELS: usize = 32;
/// Upper bound on fragments per split group, to keep bad actors from
/// ballooning the reassembly arena.
pub const MAX_SPLIT_COUNT: u32 = 128;
/// At most this many encapsulated packets are batched into one datagram.
pub const MAX_BATCH_FRAMES: usize = 120;

pub const ACK_FLAG: u8 = 0xC0;
pub const NACK_FLAG: u8 = 0xA0;

// Offline packet ids.
pub const ID_OPEN_CONNECTION_REQUEST_1: u8 = 0x05;
pub const ID_OPEN_CONNECTION_REPLY_1: u8 = 0x06;
pub const ID_OPEN_CONNECTION_REQUEST_2: u8 = 0x07;
pub const ID_OPEN_CONNECTION_REPLY_2: u8 = 0x08;
pub const ID_CONNECTION_REQUEST: u8 = 0x09;
pub const ID_CONNECTION_REQUEST_ACCEPTED: u8 = 0x10;
pub const ID_NEW_INCOMING_CONNECTION: u8 = 0x13;
pub const ID_DISCONNECTION_NOTIFICATION: u8 = 0x15;
pub const ID_UNCONNECTED_PING: u8 = 0x1C;
pub const ID_UNCONNECTED_PONG: u8 = 0x1D;

// In-session payload ids handled by the connection FSM.
pub const ID_AUTH: u8 = 0x88;
pub const ID_LOGIN: u8 = 0x22;
pub const ID_AUTH_KEY: u8 = 0x25;
pub const ID_JOIN: u8 = 0x8A;
pub const ID_E3: u8 = 0xE3;
pub const ID_RPC: u8 = 0x7C;

/// The 4-byte prefix of SA-MP query datagrams (`i`, `r`, `c`, `p` probes).
pub const SAMP_QUERY_PREFIX: &[u8; 4] = b"SAMP";

/// Largest payload that fits a single datagram of the given MTU without
/// risking IP fragmentation. Subtracts the safety margin, the datagram
/// header and the encapsulation header (11 bytes for reliable-ordered,
/// 7 for plain reliable).
pub fn safe_payload(mtu: u16, ordered: bool) -> usize {
    let header = DATAGRAM_HEADER_SIZE + if ordered { 11 } else { 7 };
    (mtu as usize)
        .saturating_sub(MTU_SAFETY_MARGIN as usize)
        .saturating_sub(header)
}
