//! Wire protocol for Huddle.
//!
//! - **Types**: identifiers, statuses, roles and hands ([`types`]).
//! - **Snapshots**: the read-only room views pushed to observers.
//! - **Messages**: [`ClientEnvelope`] / [`ServerEnvelope`] and their payloads.
//! - **Codec**: [`Codec`] trait with the [`JsonCodec`] implementation.
//!
//! ```text
//! Transport (text frames) → Protocol (envelopes) → Room engine (commands)
//! ```
//!
//! Nothing in here knows about connections or room rules.

mod codec;
mod error;
mod messages;
mod snapshot;
pub mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use messages::{
    ClientEnvelope, ClientMessage, CreateRoomRequest, ErrorCode, Reply, ServerEnvelope,
    ServerEvent, ServerMessage,
};
pub use snapshot::{
    Bid, BracketView, BudgetView, FormationView, MatchStatus, MatchView, MemberView, RoomSnapshot,
    RoomSummary, RoundView,
};
pub use types::{
    Capacity, Hand, MatchId, Role, RoleScope, RoomId, RoomStatus, TeamFormationMode, TeamId,
    Timestamp, UnknownRole, UserId,
};

/// Protocol version a client must announce in its handshake.
pub const PROTOCOL_VERSION: u32 = 1;
