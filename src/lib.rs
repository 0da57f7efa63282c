//! A reliable-UDP transport speaking the RakNet dialect of SA-MP 0.3.7,
//! together with the handshake and session state machine layered on top.
//!
//! The crate is bit-exact against the legacy client: 24-bit little-endian
//! counters, inverted IPv4 octets, flat single-record acknowledgements.
//! It is not a general-purpose reliable-UDP library.
//!
//! The outer surface is small: bind a [`Listener`] with a [`ServerConfig`]
//! and a [`GameHandler`], then `start` it. Delivered payloads the transport
//! does not consume itself arrive through [`GameHandler::on_packet`];
//! outbound traffic is submitted per session via [`Session::enqueue`].

pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod util;

pub use connection::{Session, SessionState};
pub use protocol::reliability::Reliability;
pub use server::{GameHandler, Listener, NullHandler, ServerConfig};
