use huddle_protocol::UserId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The identity provider did not accept the handshake token.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("user {0} has no open session")]
    NoSession(UserId),
}
