//! Core vocabulary shared by every Huddle crate.
//!
//! Identifiers, timestamps, and the small closed enums that describe a
//! custom-game room: member capacities, lifecycle statuses, team
//! formation modes, lane roles, and rock-paper-scissors hands.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Stable identifier of a user, as issued by the identity provider.
///
/// Serialized as the bare number (`#[serde(transparent)]`), so a
/// `UserId(42)` is just `42` on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U-{}", self.0)
    }
}

/// Identifier of one custom-game room.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// A team inside a room. Teams are numbered from 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TeamId(pub u8);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "team {}", self.0)
    }
}

/// A match inside a room's tournament bracket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MatchId(pub u32);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Wall-clock instant in milliseconds since the Unix epoch.
///
/// Join times, deadlines and grace windows are all expressed in this
/// unit so they survive persistence and can be shown to clients.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Reads the system clock.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Returns `self + duration`, saturating at the far future.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Time elapsed from `earlier` to `self` (zero if `earlier` is later).
    pub fn since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Raw milliseconds.
    pub fn as_millis(self) -> u64 {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Capacity
// ---------------------------------------------------------------------------

/// The capacity in which a user sits in a room.
///
/// Not to be confused with the in-game lane [`Role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    /// Owns the room and drives phase transitions. Exactly one per live room.
    Leader,
    /// Plays in the room and counts toward the room's capacity.
    Participant,
    /// Watches only. Does not count toward capacity and never holds a
    /// team, role, bid, or choice.
    Spectator,
}

impl Capacity {
    /// Leaders and participants are "active"; spectators are not.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Spectator)
    }
}

// ---------------------------------------------------------------------------
// RoomStatus
// ---------------------------------------------------------------------------

/// Position of a room in its lifecycle.
///
/// ```text
/// Recruiting → LeaderElection → TeamFormation → RoleSelection → InProgress → Completed
///     └──────→ TournamentBracket ─────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Recruiting,
    LeaderElection,
    TeamFormation,
    RoleSelection,
    InProgress,
    TournamentBracket,
    Completed,
}

impl RoomStatus {
    /// `Completed` is the only terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }

    /// New members may only join while recruiting.
    pub fn is_recruiting(self) -> bool {
        matches!(self, Self::Recruiting)
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Recruiting => "recruiting",
            Self::LeaderElection => "leader_election",
            Self::TeamFormation => "team_formation",
            Self::RoleSelection => "role_selection",
            Self::InProgress => "in_progress",
            Self::TournamentBracket => "tournament_bracket",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// TeamFormationMode
// ---------------------------------------------------------------------------

/// Which mini-engine splits the room into teams. Chosen at room creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamFormationMode {
    /// Members pick their own team.
    #[default]
    Free,
    /// Captains bid on nominated players.
    Auction,
    /// Rounds of rock-paper-scissors sort members into teams.
    RockPaperScissors,
}

impl fmt::Display for TeamFormationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::Auction => "auction",
            Self::RockPaperScissors => "rock_paper_scissors",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// One of the five lane roles a member can claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Top,
    Jungle,
    Mid,
    Adc,
    Support,
}

impl Role {
    /// All five roles in draft order.
    pub const ALL: [Role; 5] = [Role::Top, Role::Jungle, Role::Mid, Role::Adc, Role::Support];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Jungle => "jungle",
            Self::Mid => "mid",
            Self::Adc => "adc",
            Self::Support => "support",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role name is not one of the five lanes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role {0:?}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    /// Accepts the canonical names plus the common aliases clients send
    /// (`jg`, `middle`, `bot`, `sup`, ...). Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Self::Top),
            "jungle" | "jg" => Ok(Self::Jungle),
            "mid" | "middle" => Ok(Self::Mid),
            "adc" | "bot" | "bottom" => Ok(Self::Adc),
            "support" | "sup" | "supp" => Ok(Self::Support),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Hand
// ---------------------------------------------------------------------------

/// A rock-paper-scissors choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hand {
    Rock,
    Paper,
    Scissors,
}

impl Hand {
    pub const ALL: [Hand; 3] = [Hand::Rock, Hand::Paper, Hand::Scissors];

    /// Standard relation: rock > scissors > paper > rock.
    pub fn beats(self, other: Hand) -> bool {
        matches!(
            (self, other),
            (Hand::Rock, Hand::Scissors) | (Hand::Scissors, Hand::Paper) | (Hand::Paper, Hand::Rock)
        )
    }
}

// ---------------------------------------------------------------------------
// RoleScope
// ---------------------------------------------------------------------------

/// Where role uniqueness is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleScope {
    /// A role can be held by at most one member of the room.
    #[default]
    Room,
    /// A role can be held by at most one member of each team.
    Team,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&UserId(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&RoomId(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&TeamId(2)).unwrap(), "2");
    }

    #[test]
    fn test_id_display() {
        assert_eq!(UserId(42).to_string(), "U-42");
        assert_eq!(RoomId(7).to_string(), "R-7");
        assert_eq!(MatchId(3).to_string(), "M-3");
    }

    #[test]
    fn test_status_json_is_snake_case() {
        let json = serde_json::to_string(&RoomStatus::LeaderElection).unwrap();
        assert_eq!(json, "\"leader_election\"");
        assert_eq!(RoomStatus::TournamentBracket.to_string(), "tournament_bracket");
    }

    #[test]
    fn test_only_completed_is_terminal() {
        assert!(RoomStatus::Completed.is_terminal());
        assert!(!RoomStatus::InProgress.is_terminal());
        assert!(!RoomStatus::TournamentBracket.is_terminal());
    }

    #[test]
    fn test_spectators_are_not_active() {
        assert!(Capacity::Leader.is_active());
        assert!(Capacity::Participant.is_active());
        assert!(!Capacity::Spectator.is_active());
    }

    #[test]
    fn test_role_parses_aliases() {
        assert_eq!("Top".parse::<Role>().unwrap(), Role::Top);
        assert_eq!("jg".parse::<Role>().unwrap(), Role::Jungle);
        assert_eq!("bot".parse::<Role>().unwrap(), Role::Adc);
        assert_eq!(" SUP ".parse::<Role>().unwrap(), Role::Support);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let err = "feeder".parse::<Role>().unwrap_err();
        assert_eq!(err, UnknownRole("feeder".into()));
    }

    #[test]
    fn test_hand_beats_relation() {
        assert!(Hand::Rock.beats(Hand::Scissors));
        assert!(Hand::Scissors.beats(Hand::Paper));
        assert!(Hand::Paper.beats(Hand::Rock));
        for hand in Hand::ALL {
            assert!(!hand.beats(hand));
        }
        assert!(!Hand::Scissors.beats(Hand::Rock));
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp(1_000);
        assert_eq!(t.saturating_add(Duration::from_secs(2)), Timestamp(3_000));
        assert_eq!(Timestamp(3_000).since(t), Duration::from_secs(2));
        assert_eq!(t.since(Timestamp(3_000)), Duration::ZERO);
        assert_eq!(Timestamp(u64::MAX).saturating_add(Duration::from_secs(1)), Timestamp(u64::MAX));
    }
}
