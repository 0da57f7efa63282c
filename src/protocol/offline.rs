//! Offline (pre-session) packets.
//!
//! These are recognised by the first byte of a raw datagram, before any
//! reliability layer exists: the `0x05`/`0x06` and `0x07`/`0x08` open
//! connection exchange, the `0x09`/`0x10` connection request, the bare
//! `0x13` new-incoming-connection marker, and the `0x1C`/`0x1D` unconnected
//! ping/pong.

use std::net::SocketAddrV4;

use crate::error::CodecError;
use crate::protocol::magic::{read_magic, write_magic};
use crate::protocol::stream::BitStream;
use crate::protocol::{
    ID_CONNECTION_REQUEST_ACCEPTED, ID_OPEN_CONNECTION_REPLY_1, ID_OPEN_CONNECTION_REPLY_2,
    ID_OPEN_CONNECTION_REQUEST_2, ID_UNCONNECTED_PONG,
};

/// XOR constants applied to the peer port (hi, lo) to form the reply cookie.
const COOKIE_XOR: [u8; 2] = [0x82, 0x93];

/// Computes the session cookie for a peer port.
pub fn port_cookie(port: u16) -> [u8; 2] {
    [
        ((port >> 8) as u8) ^ COOKIE_XOR[0],
        ((port & 0xFF) as u8) ^ COOKIE_XOR[1],
    ]
}

/// `0x05` Open Connection Request 1: magic followed by MTU-probing padding.
#[derive(Debug, Clone)]
pub struct OpenConnectionRequest1 {
    /// Number of padding bytes the client attached to probe the path MTU.
    pub padding: usize,
}

impl OpenConnectionRequest1 {
    /// Decodes the body of a `0x05` packet (the id byte already consumed).
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut bs = BitStream::from_bytes(body);
        read_magic(&mut bs)?;
        Ok(Self {
            padding: bs.remaining(),
        })
    }
}

/// `0x06` Open Connection Reply 1: magic echo, server GUID, reply cookie.
#[derive(Debug, Clone)]
pub struct OpenConnectionReply1 {
    pub guid: u64,
    pub cookie: [u8; 2],
}

impl OpenConnectionReply1 {
    pub fn encode(&self) -> Vec<u8> {
        let mut bs = BitStream::new();
        bs.write_u8(ID_OPEN_CONNECTION_REPLY_1);
        write_magic(&mut bs);
        bs.write_u64_be(self.guid);
        bs.write_bytes(&self.cookie);
        bs.into_inner()
    }
}

/// `0x07` Open Connection Request 2: magic, requested MTU, peer GUID.
#[derive(Debug, Clone)]
pub struct OpenConnectionRequest2 {
    pub mtu: u16,
    pub guid: u64,
}

impl OpenConnectionRequest2 {
    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut bs = BitStream::from_bytes(body);
        read_magic(&mut bs)?;
        let mtu = bs.read_u16_be()?;
        let guid = bs.read_u64_be()?;
        Ok(Self { mtu, guid })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bs = BitStream::new();
        bs.write_u8(ID_OPEN_CONNECTION_REQUEST_2);
        write_magic(&mut bs);
        bs.write_u16_be(self.mtu);
        bs.write_u64_be(self.guid);
        bs.into_inner()
    }
}

/// `0x08` Open Connection Reply 2: magic, server GUID, server address,
/// accepted MTU.
#[derive(Debug, Clone)]
pub struct OpenConnectionReply2 {
    pub guid: u64,
    pub address: SocketAddrV4,
    pub mtu: u16,
}

impl OpenConnectionReply2 {
    pub fn encode(&self) -> Vec<u8> {
        let mut bs = BitStream::new();
        bs.write_u8(ID_OPEN_CONNECTION_REPLY_2);
        write_magic(&mut bs);
        bs.write_u64_be(self.guid);
        bs.write_address(&self.address);
        bs.write_u16_be(self.mtu);
        bs.into_inner()
    }

    pub fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut bs = BitStream::from_bytes(body);
        read_magic(&mut bs)?;
        let guid = bs.read_u64_be()?;
        let address = bs.read_address()?;
        let mtu = bs.read_u16_be()?;
        Ok(Self { guid, address, mtu })
    }
}

/// `0x10` Connection Request Accepted: the peer's own address as seen by the
/// server, plus a zero system index.
#[derive(Debug, Clone)]
pub struct ConnectionRequestAccepted {
    pub peer: SocketAddrV4,
}

impl ConnectionRequestAccepted {
    pub fn encode(&self) -> Vec<u8> {
        let mut bs = BitStream::new();
        bs.write_u8(ID_CONNECTION_REQUEST_ACCEPTED);
        bs.write_address(&self.peer);
        bs.write_u16_be(0); // system index
        bs.into_inner()
    }
}

/// `0x1D` Unconnected Pong: magic plus the server GUID.
#[derive(Debug, Clone)]
pub struct UnconnectedPong {
    pub guid: u64,
}

impl UnconnectedPong {
    pub fn encode(&self) -> Vec<u8> {
        let mut bs = BitStream::new();
        bs.write_u8(ID_UNCONNECTED_PONG);
        write_magic(&mut bs);
        bs.write_u64_be(self.guid);
        bs.into_inner()
    }
}
