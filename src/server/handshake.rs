//! The offline handshake driver.
//!
//! Handles every packet that arrives outside a datagram: the
//! `0x05`/`0x06` open-connection exchange (which creates the session), the
//! `0x07`/`0x08` MTU negotiation, the `0x09`/`0x10` connection request,
//! the `0x13` connected marker and `0x1C` pings. Unexpected or malformed
//! packets are logged and dropped; reordered handshakes never disconnect a
//! peer.

use std::net::SocketAddr;

use log::{debug, info, warn};

use crate::connection::SessionState;
use crate::error::SessionError;
use crate::protocol::offline::{
    port_cookie, ConnectionRequestAccepted, OpenConnectionReply1, OpenConnectionReply2,
    OpenConnectionRequest1, OpenConnectionRequest2, UnconnectedPong,
};
use crate::protocol::{
    ID_CONNECTION_REQUEST, ID_NEW_INCOMING_CONNECTION, ID_OPEN_CONNECTION_REQUEST_1,
    ID_OPEN_CONNECTION_REQUEST_2, ID_UNCONNECTED_PING,
};
use crate::server::Listener;

pub(crate) async fn handle_offline(listener: &Listener, data: &[u8], addr: SocketAddr) {
    match data[0] {
        ID_OPEN_CONNECTION_REQUEST_1 => handle_request1(listener, &data[1..], addr).await,
        ID_OPEN_CONNECTION_REQUEST_2 => handle_request2(listener, &data[1..], addr).await,
        ID_CONNECTION_REQUEST => handle_connection_request(listener, addr).await,
        ID_NEW_INCOMING_CONNECTION => handle_new_incoming(listener, addr).await,
        ID_UNCONNECTED_PING => handle_ping(listener, addr).await,
        _ => {}
    }
}

async fn handle_request1(listener: &Listener, body: &[u8], addr: SocketAddr) {
    let request = match OpenConnectionRequest1::decode(body) {
        Ok(request) => request,
        Err(err) => {
            debug!("bad 0x05 from {}: {}", addr, err);
            return;
        }
    };
    debug!(
        "open connection request from {} ({} padding bytes)",
        addr, request.padding
    );

    let session = listener.session_or_create(addr).await;
    let reply = OpenConnectionReply1 {
        guid: listener.guid(),
        cookie: port_cookie(addr.port()),
    };
    listener.send_to(&reply.encode(), addr).await;
    // a stray 0x05 must not rewind a session that is already established
    if !session.state().await.is_established() {
        session.set_state(SessionState::HandshakeSent).await;
    }
}

async fn handle_request2(listener: &Listener, body: &[u8], addr: SocketAddr) {
    let request = match OpenConnectionRequest2::decode(body) {
        Ok(request) => request,
        Err(err) => {
            debug!("bad 0x07 from {}: {}", addr, err);
            return;
        }
    };

    let session = listener.session_or_create(addr).await;
    match session.negotiate_mtu(request.mtu).await {
        Ok(mtu) => {
            session.set_guid(request.guid);
            let Some(server_addr) = listener.local_addr_v4() else {
                warn!("cannot reply to 0x07: listener is not bound to an IPv4 address");
                return;
            };
            let reply = OpenConnectionReply2 {
                guid: listener.guid(),
                address: server_addr,
                mtu,
            };
            listener.send_to(&reply.encode(), addr).await;
            info!("session {} negotiated mtu {} (guid {:#x})", addr, mtu, request.guid);
        }
        Err(SessionError::MtuOutOfRange(requested)) => {
            warn!("session {} requested mtu {}, closing", addr, requested);
            listener.remove_session(addr).await;
        }
        Err(SessionError::MtuLocked) => {
            warn!(
                "session {} tried to renegotiate mtu mid-split, ignoring",
                addr
            );
        }
        Err(err) => debug!("mtu negotiation with {} failed: {}", addr, err),
    }
}

async fn handle_connection_request(listener: &Listener, addr: SocketAddr) {
    let SocketAddr::V4(peer) = addr else {
        debug!("dropping connection request from non-IPv4 peer {}", addr);
        return;
    };
    let session = listener.session_or_create(addr).await;
    let reply = ConnectionRequestAccepted { peer };
    listener.send_to(&reply.encode(), addr).await;
    if !session.state().await.is_established() {
        session.set_state(SessionState::Connecting).await;
    }
}

async fn handle_new_incoming(listener: &Listener, addr: SocketAddr) {
    let session = listener.session_or_create(addr).await;
    if session.state().await < SessionState::Connected {
        session.set_state(SessionState::Connected).await;
        info!("session {} connected", addr);
    }
}

async fn handle_ping(listener: &Listener, addr: SocketAddr) {
    let pong = UnconnectedPong {
        guid: listener.guid(),
    };
    listener.send_to(&pong.encode(), addr).await;
}
