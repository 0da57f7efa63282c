//! # Error types
//! Error taxonomy for the codec, the per-session reliability engine and the
//! listener. Codec errors are contained within the decode of a single
//! datagram and never escape the receive loop; session errors surface to the
//! caller that mutated the session.

use thiserror::Error;

/// Errors produced while reading or writing wire data.
///
/// These are always recoverable by dropping the datagram being decoded.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// A read ran past the end of the buffer.
    #[error("buffer underflow: needed {needed} byte(s), {remaining} remaining")]
    BufferUnderflow { needed: usize, remaining: usize },

    /// A value does not fit the wire field it is written into.
    #[error("buffer overflow: value exceeds field width")]
    BufferOverflow,

    /// An embedded address with a version other than 4. IPv6 is rejected.
    #[error("unsupported address version {0}")]
    UnknownVersion(u8),

    /// The 16-byte offline magic did not match.
    #[error("offline magic mismatch")]
    BadMagic,

    /// The first byte of a buffer is not a valid header for the packet
    /// being decoded.
    #[error("invalid header byte {0:#04x}")]
    InvalidHeader(u8),
}

/// Errors raised by session-level operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The peer requested an MTU below the protocol minimum. The session is
    /// never inserted (or is torn down if it already exists).
    #[error("mtu {0} out of range")]
    MtuOutOfRange(u16),

    /// No inbound traffic for longer than the session timeout.
    #[error("session timed out")]
    SessionTimeout,

    /// A fragment group carried inconsistent metadata: more fragments than
    /// declared, or a `count` that changed mid-group. The whole group is
    /// discarded.
    #[error("split group {split_id} mismatch: declared {declared}, got {got}")]
    SplitGroupMismatch {
        split_id: u16,
        declared: u32,
        got: u32,
    },

    /// A new split transmission was started while a prior one was still in
    /// flight on the session.
    #[error("split transmission already in flight")]
    SplitInFlight,

    /// Ordering channel outside `0..32`.
    #[error("invalid order channel {0}")]
    InvalidChannel(u8),

    /// MTU renegotiation attempted while a split transmission is in flight.
    #[error("mtu locked while split transmission is in flight")]
    MtuLocked,
}

/// Errors raised by the listener itself.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or inspecting the UDP socket failed. Surfaces to the caller
    /// of `bind`.
    #[error("failed to bind udp socket: {0}")]
    Bind(std::io::Error),
}
