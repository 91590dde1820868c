//! A `ProtocolError` means the bytes on the wire were wrong. Requests a
//! room refuses are not protocol errors; they go back to the client as
//! [`ServerMessage::Error`](crate::ServerMessage::Error) frames.

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[cfg(feature = "json")]
    #[error("cannot encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// Malformed JSON, or a payload no message type matches.
    #[cfg(feature = "json")]
    #[error("cannot decode frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// Well-formed, but out of place, such as a handshake announcing a
    /// version this server does not speak.
    #[error("protocol violation: {0}")]
    Violation(String),
}
