//! Transport layer for Huddle.
//!
//! A [`WebSocketListener`] takes TCP sockets; each [`Incoming`] socket is
//! upgraded separately, normally on the connection's own task, so a client
//! stalling mid-handshake never holds up the accept loop. Once upgraded,
//! a [`Connection`] moves whole frames. Its read and write halves lock
//! independently: pushing an event never waits on a parked `recv`.

mod error;
mod websocket;

use std::future::Future;
use std::net::SocketAddr;

pub use error::TransportError;
pub use websocket::{Incoming, WebSocketConnection, WebSocketListener};

/// One upgraded, bidirectional connection.
pub trait Connection: Send + Sync + 'static {
    /// Process-unique, assigned at upgrade.
    fn id(&self) -> u64;

    fn peer_addr(&self) -> SocketAddr;

    /// Sends one frame. Valid UTF-8 goes out as a text frame, anything
    /// else as binary.
    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// The next data frame, or `Ok(None)` once the peer has closed.
    fn recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
