//! Who is on the other end of a connection, and which rooms they are in.
//!
//! - [`IdentityProvider`]: turns a handshake token into an [`Identity`].
//!   Huddle never issues identities itself.
//! - [`SessionManager`]: per-user registry of open connections and joined
//!   rooms. When a user's last connection closes it hands back the rooms
//!   the server must leave on their behalf.

mod error;
mod identity;
mod manager;
mod session;

pub use error::SessionError;
pub use identity::{DevIdentityProvider, Identity, IdentityProvider};
pub use manager::SessionManager;
pub use session::{ConnectionId, Session};
