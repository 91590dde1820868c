//! Engine-wide tuning and per-room settings.

use std::time::Duration;

use huddle_protocol::{CreateRoomRequest, Role, RoleScope, TeamFormationMode};
use serde::{Deserialize, Serialize};

use crate::RoomError;

/// Knobs shared by every room in a process.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// How long a nominated player stays up for auction.
    pub auction_window: Duration,
    /// How long members have to submit a rock-paper-scissors hand.
    pub rps_round_window: Duration,
    /// Rounds played before unresolved members are split at random.
    pub rps_round_cap: u32,
    /// Points each captain starts the auction with.
    pub auction_budget: u32,
    /// Command channel size per room actor.
    pub channel_size: usize,
    /// Buffered events per fan-out topic before slow subscribers lag.
    pub topic_capacity: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            auction_window: Duration::from_secs(30),
            rps_round_window: Duration::from_secs(20),
            rps_round_cap: 3,
            auction_budget: 1_000,
            channel_size: 64,
            topic_capacity: 64,
        }
    }
}

/// Reaper and deadline-sweeper cadence.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    /// A recruiting room whose leader is still alone after this long is
    /// destroyed.
    pub recruiting_grace: Duration,
    /// Completed rooms are kept this long for late viewers.
    pub completed_retention: Duration,
    pub deadline_sweep_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            recruiting_grace: Duration::from_secs(10 * 60),
            completed_retention: Duration::from_secs(30 * 60),
            deadline_sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Per-room options, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub title: String,
    pub description: String,
    /// Maximum leaders plus participants. Spectators are not counted.
    pub capacity: usize,
    pub secret: Option<String>,
    pub mode: TeamFormationMode,
    pub allow_spectators: bool,
    pub team_count: u8,
    pub role_scope: RoleScope,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            title: "Custom game".into(),
            description: String::new(),
            capacity: 2,
            secret: None,
            mode: TeamFormationMode::Free,
            allow_spectators: false,
            team_count: 2,
            role_scope: RoleScope::Room,
        }
    }
}

impl RoomSettings {
    pub const MIN_CAPACITY: usize = 2;
    pub const MIN_TEAMS: u8 = 2;

    /// Checks the settings are playable.
    ///
    /// Role selection must be completable, so the room may not hold more
    /// members than there are distinct roles in the claim scope.
    pub fn validate(&self) -> Result<(), RoomError> {
        if self.title.trim().is_empty() {
            return Err(RoomError::validation("title must not be empty"));
        }
        if self.capacity < Self::MIN_CAPACITY {
            return Err(RoomError::validation(format!(
                "capacity must be at least {}",
                Self::MIN_CAPACITY
            )));
        }
        if self.team_count < Self::MIN_TEAMS {
            return Err(RoomError::validation(format!(
                "team count must be at least {}",
                Self::MIN_TEAMS
            )));
        }
        if self.capacity < usize::from(self.team_count) {
            return Err(RoomError::validation("capacity is smaller than the team count"));
        }
        let roles = Role::ALL.len();
        match self.role_scope {
            RoleScope::Room if self.capacity > roles => Err(RoomError::validation(format!(
                "room-wide roles fit at most {roles} members; use team role scope"
            ))),
            RoleScope::Team if self.capacity.div_ceil(usize::from(self.team_count)) > roles => {
                Err(RoomError::validation(format!(
                    "each team can hold at most {roles} members"
                )))
            }
            _ => Ok(()),
        }
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }
}

impl From<CreateRoomRequest> for RoomSettings {
    fn from(req: CreateRoomRequest) -> Self {
        Self {
            title: req.title,
            description: req.description,
            capacity: req.capacity,
            secret: req.secret.filter(|s| !s.is_empty()),
            mode: req.mode,
            allow_spectators: req.allow_spectators,
            team_count: req.team_count.unwrap_or(Self::MIN_TEAMS),
            role_scope: req.role_scope,
        }
    }
}
