use std::io;
use std::net::SocketAddr;

use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    #[error("websocket upgrade from {peer} failed: {source}")]
    Upgrade {
        peer: SocketAddr,
        #[source]
        source: tungstenite::Error,
    },

    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

impl TransportError {
    /// True when the peer went away, as opposed to a local failure.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(
                tungstenite::Error::ConnectionClosed
                    | tungstenite::Error::AlreadyClosed
                    | tungstenite::Error::Protocol(_)
                    | tungstenite::Error::Io(_)
            )
        )
    }
}
