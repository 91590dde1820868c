//! Error types for the room layer.
//!
//! Every rejection falls into one category of the public taxonomy
//! (`NotFound`, `Forbidden`, `Conflict`, `WrongPhase`, `Validation`), plus
//! the bracket-specific `InvalidReport` and the infrastructure failures
//! `Storage` and `Unavailable`. [`RoomError::code`] maps each onto the
//! wire [`ErrorCode`].

use std::fmt;

use huddle_protocol::{ErrorCode, MatchId, Role, RoomId, TeamId, UserId};

use crate::PhaseError;

/// What could not be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Room(RoomId),
    Member(UserId),
    Team(TeamId),
    Match(MatchId),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(id) => write!(f, "room {id}"),
            Self::Member(id) => write!(f, "member {id}"),
            Self::Team(id) => write!(f, "{id}"),
            Self::Match(id) => write!(f, "match {id}"),
        }
    }
}

/// Why the caller may not do this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Denied {
    #[error("only the room leader may do this")]
    NotLeader,
    #[error("wrong room secret")]
    WrongSecret,
    #[error("only team captains may bid")]
    NotCaptain,
    #[error("spectators cannot take part")]
    Spectator,
    #[error("this room does not allow spectators")]
    SpectatorsDisabled,
    #[error("not taking part in this round")]
    NotParticipant,
}

/// Which uniqueness or capacity rule the request collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Conflict {
    #[error("room is full")]
    Full,
    #[error("already a member of this room")]
    AlreadyMember,
    #[error("already on a team")]
    AlreadyAssigned,
    #[error("{0} is full")]
    TeamFull(TeamId),
    #[error("role {0} is already taken")]
    RoleTaken(Role),
    #[error("already claimed a role")]
    AlreadyClaimed,
    #[error("bidding on this player is closed")]
    AuctionClosed,
    #[error("player is not up for auction")]
    NotNominated,
    #[error("another player is still up for auction")]
    NominationOpen,
    #[error("no player is up for auction")]
    NoNomination,
    #[error("already captains another team")]
    AlreadyCaptain,
    #[error("already placed on a team")]
    AlreadyResolved,
    #[error("choice already submitted for this round")]
    ChoiceAlreadySubmitted,
}

/// Errors returned by room operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("{0} not found")]
    NotFound(Missing),

    #[error("forbidden: {0}")]
    Forbidden(Denied),

    #[error("conflict: {0}")]
    Conflict(Conflict),

    #[error(transparent)]
    WrongPhase(#[from] PhaseError),

    /// Malformed input: unknown role name, non-positive bid, bad settings.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A bracket result for a decided match, or from someone who may not
    /// report it.
    #[error("invalid report: {0}")]
    InvalidReport(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The room's actor is gone or its command channel is closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Forbidden(_) => ErrorCode::Forbidden,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::WrongPhase(_) => ErrorCode::WrongPhase,
            Self::Validation(_) => ErrorCode::Validation,
            Self::InvalidReport(_) => ErrorCode::InvalidReport,
            Self::Storage(_) | Self::Unavailable(_) => ErrorCode::Unavailable,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<Conflict> for RoomError {
    fn from(conflict: Conflict) -> Self {
        Self::Conflict(conflict)
    }
}

impl From<Denied> for RoomError {
    fn from(denied: Denied) -> Self {
        Self::Forbidden(denied)
    }
}

impl From<Missing> for RoomError {
    fn from(missing: Missing) -> Self {
        Self::NotFound(missing)
    }
}

/// Errors from a [`RoomStore`](crate::RoomStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Another writer saved this room first.
    #[error("version conflict on room {room_id}: expected {expected}, got {actual}")]
    VersionConflict {
        room_id: RoomId,
        expected: u64,
        actual: u64,
    },
}
