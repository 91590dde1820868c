//! Phase state machine.
//!
//! ```text
//! Recruiting ─► LeaderElection ─► TeamFormation ─► RoleSelection ─► InProgress ─► Completed
//!  │  ▲  ▲            ▲                │  │
//!  │  │  │            └── captain left ┘  │   (resets, never via advance)
//!  │  │  └── fewer members than teams ────┤
//!  │  └───────────────────────────────────┘
//!  └──────► TournamentBracket ────────────────────────────────────────────────► Completed
//! ```
//!
//! Only forward edges are reachable through `advance_phase`. Leaving
//! LeaderElection or TeamFormation with fewer active members than teams
//! sends the room back to Recruiting. Each edge
//! carries a precondition; the aggregate checks it and reports a
//! [`PhaseError`] naming the unmet [`Requirement`].

use std::fmt;

use huddle_protocol::{RoomStatus, TeamFormationMode};

/// Statuses reachable from `status` by a leader-initiated advance.
pub fn successors(status: RoomStatus) -> &'static [RoomStatus] {
    use RoomStatus::*;
    match status {
        Recruiting => &[LeaderElection, TournamentBracket],
        LeaderElection => &[TeamFormation],
        TeamFormation => &[RoleSelection],
        RoleSelection => &[InProgress],
        InProgress => &[Completed],
        TournamentBracket => &[Completed],
        Completed => &[],
    }
}

pub fn can_transition(from: RoomStatus, to: RoomStatus) -> bool {
    successors(from).contains(&to)
}

/// What an action or transition needed but did not get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// The room must be in this status.
    Status(RoomStatus),
    /// `to` is not a forward edge from the current status.
    Transition { to: RoomStatus },
    /// At least this many leaders and participants.
    MinimumMembers(usize),
    /// Every team needs exactly one captain.
    CaptainPerTeam,
    /// Every active member must be on a team.
    EveryoneOnATeam,
    /// Every active member must hold a role claim.
    EveryoneHasARole,
    /// The action belongs to a different team-formation mode.
    Formation(TeamFormationMode),
    /// The room must not have finished.
    NotCompleted,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(status) => write!(f, "status {status}"),
            Self::Transition { to } => write!(f, "a path to {to}"),
            Self::MinimumMembers(n) => write!(f, "at least {n} members"),
            Self::CaptainPerTeam => f.write_str("a captain for every team"),
            Self::EveryoneOnATeam => f.write_str("every member on a team"),
            Self::EveryoneHasARole => f.write_str("every member holding a role"),
            Self::Formation(mode) => write!(f, "{mode} team formation"),
            Self::NotCompleted => f.write_str("an unfinished room"),
        }
    }
}

/// A rejected action or transition. State is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("wrong phase: requires {required}, room is {actual}")]
pub struct PhaseError {
    pub required: Requirement,
    pub actual: RoomStatus,
}

impl PhaseError {
    pub(crate) fn expected(required: RoomStatus, actual: RoomStatus) -> Self {
        Self {
            required: Requirement::Status(required),
            actual,
        }
    }
}

/// `Ok` if `actual == required`.
pub(crate) fn require_status(actual: RoomStatus, required: RoomStatus) -> Result<(), PhaseError> {
    if actual == required {
        Ok(())
    } else {
        Err(PhaseError::expected(required, actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RoomStatus::*;

    #[test]
    fn test_main_path_is_strictly_ordered() {
        assert!(can_transition(Recruiting, LeaderElection));
        assert!(can_transition(LeaderElection, TeamFormation));
        assert!(can_transition(TeamFormation, RoleSelection));
        assert!(can_transition(RoleSelection, InProgress));
        assert!(can_transition(InProgress, Completed));
    }

    #[test]
    fn test_bracket_short_circuit() {
        assert!(can_transition(Recruiting, TournamentBracket));
        assert!(can_transition(TournamentBracket, Completed));
        assert!(!can_transition(LeaderElection, TournamentBracket));
    }

    #[test]
    fn test_no_skipping_and_no_going_back() {
        assert!(!can_transition(Recruiting, TeamFormation));
        assert!(!can_transition(Recruiting, Completed));
        assert!(!can_transition(RoleSelection, TeamFormation));
        assert!(!can_transition(TeamFormation, LeaderElection));
        assert!(successors(Completed).is_empty());
    }

    #[test]
    fn test_phase_error_message() {
        let err = PhaseError::expected(RoleSelection, Recruiting);
        assert_eq!(
            err.to_string(),
            "wrong phase: requires status role_selection, room is recruiting"
        );
    }
}
