//! The server's error type.

use huddle_protocol::ProtocolError;
use huddle_room::RoomError;
use huddle_session::SessionError;
use huddle_transport::TransportError;

/// Any layer's failure, as seen by a connection task.
#[derive(Debug, thiserror::Error)]
pub enum HuddleError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),
}
