//! Identity port.
//!
//! Production deployments plug in their auth service (JWT validation, a
//! session cookie lookup, ...) by implementing [`IdentityProvider`]. The
//! server calls it once per connection, during the handshake.

use std::future::Future;

use huddle_protocol::UserId;

use crate::SessionError;

/// A resolved, authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

/// Resolves a client's handshake token.
///
/// The returned future must be `Send` because every connection runs on
/// its own Tokio task.
///
/// ```rust
/// use huddle_protocol::UserId;
/// use huddle_session::{Identity, IdentityProvider, SessionError};
///
/// struct SingleUser;
///
/// impl IdentityProvider for SingleUser {
///     fn resolve(
///         &self,
///         token: &str,
///     ) -> impl std::future::Future<Output = Result<Identity, SessionError>> + Send {
///         let ok = token == "let-me-in";
///         async move {
///             if ok {
///                 Ok(Identity { user_id: UserId(1), display_name: "admin".into() })
///             } else {
///                 Err(SessionError::InvalidToken("bad token".into()))
///             }
///         }
///     }
/// }
/// ```
pub trait IdentityProvider: Send + Sync + 'static {
    fn resolve(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send;
}

/// Development provider. Accepts tokens of the form `"<id>:<name>"` or
/// just `"<id>"` (the name then defaults to `player-<id>`).
///
/// Never deploy this: any client can claim any id.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevIdentityProvider;

impl DevIdentityProvider {
    fn parse(token: &str) -> Result<Identity, SessionError> {
        let (id, name) = match token.split_once(':') {
            Some((id, name)) => (id, name.trim()),
            None => (token, ""),
        };
        let user_id = id
            .trim()
            .parse::<u64>()
            .map(UserId)
            .map_err(|_| SessionError::InvalidToken(format!("malformed token {token:?}")))?;
        let display_name = if name.is_empty() {
            format!("player-{}", user_id.0)
        } else {
            name.to_string()
        };
        Ok(Identity {
            user_id,
            display_name,
        })
    }
}

impl IdentityProvider for DevIdentityProvider {
    fn resolve(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<Identity, SessionError>> + Send {
        let result = Self::parse(token);
        async move { result }
    }
}
