//! Read-only views of a room, pushed to observers after every change.
//!
//! A [`RoomSnapshot`] is complete: a client that receives one can redraw
//! the whole room without remembering earlier events.

use serde::{Deserialize, Serialize};

use crate::{
    Capacity, Hand, MatchId, Role, RoleScope, RoomId, RoomStatus, TeamFormationMode, TeamId,
    Timestamp, UserId,
};

/// A member as observers see them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
    pub user_id: UserId,
    pub display_name: String,
    pub capacity: Capacity,
    pub joined_at: Timestamp,
    /// Team the member was placed on, once team formation assigned one.
    pub team: Option<TeamId>,
    /// Lane role the member claimed during role selection.
    pub role: Option<Role>,
    /// `true` for the captain of `team`.
    pub captain: bool,
}

/// A captain's bid on a nominated player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bid {
    pub bidder: UserId,
    pub target: UserId,
    pub amount: u32,
    pub submitted_at: Timestamp,
    /// Arrival order inside the room, breaks ties between bids carrying
    /// the same timestamp.
    pub sequence: u64,
}

/// State of the active team-formation mini-engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FormationView {
    /// Members pick any offered team with a free slot.
    Free { offered: Vec<TeamId>, slot_limit: usize },
    /// Sequential auction of nominated players.
    Auction {
        slot_limit: usize,
        nominee: Option<UserId>,
        deadline: Option<Timestamp>,
        highest_bid: Option<Bid>,
        budgets: Vec<BudgetView>,
    },
    /// Rock-paper-scissors rounds. Submitted hands stay hidden until the
    /// round resolves; only who has submitted is visible.
    RockPaperScissors {
        slot_limit: usize,
        round: u32,
        round_cap: u32,
        deadline: Option<Timestamp>,
        unresolved: Vec<UserId>,
        submitted: Vec<UserId>,
        last_round: Option<RoundView>,
    },
}

/// Remaining auction budget of one captain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetView {
    pub captain: UserId,
    pub team: TeamId,
    pub remaining: u32,
}

/// Revealed hands of the most recently resolved RPS round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundView {
    pub round: u32,
    pub hands: Vec<(UserId, Hand)>,
    /// `false` when the round was a tie and had to be replayed.
    pub decisive: bool,
}

/// Outcome of a bracket match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Pending,
    Decided,
    /// Decided because one player left the room.
    Walkover,
}

/// One bracket match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchView {
    pub match_id: MatchId,
    pub round: u32,
    pub slot: u32,
    pub player1: UserId,
    pub player2: UserId,
    pub winner: Option<UserId>,
    pub status: MatchStatus,
}

/// The room's single-elimination bracket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BracketView {
    pub seeds: Vec<UserId>,
    pub total_rounds: u32,
    pub current_round: u32,
    pub matches: Vec<MatchView>,
    /// `(round, user)` pairs for every bye handed out.
    pub byes: Vec<(u32, UserId)>,
    pub eliminated: Vec<UserId>,
    pub champion: Option<UserId>,
    pub completed: bool,
}

/// Complete, self-contained view of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    /// Increments on every committed change.
    pub version: u64,
    pub title: String,
    pub description: String,
    pub capacity: usize,
    pub has_secret: bool,
    pub status: RoomStatus,
    pub mode: TeamFormationMode,
    pub allow_spectators: bool,
    pub team_count: u8,
    pub role_scope: RoleScope,
    pub leader: Option<UserId>,
    pub created_at: Timestamp,
    /// Members in join order.
    pub members: Vec<MemberView>,
    /// Present while the room is in team formation.
    pub formation: Option<FormationView>,
    pub bracket: Option<BracketView>,
}

impl RoomSnapshot {
    /// The member record for `user`, if they are in the room.
    pub fn member(&self, user: UserId) -> Option<&MemberView> {
        self.members.iter().find(|m| m.user_id == user)
    }

    /// Number of leaders and participants (spectators excluded).
    pub fn active_count(&self) -> usize {
        self.members.iter().filter(|m| m.capacity.is_active()).count()
    }
}

/// One line of a room listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub title: String,
    pub status: RoomStatus,
    pub mode: TeamFormationMode,
    pub active_members: usize,
    pub capacity: usize,
    pub has_secret: bool,
}
