//! Frames exchanged between clients and the Huddle server.
//!
//! ```text
//! client → server   ClientEnvelope { seq, payload: ClientMessage }
//! server → client   ServerEnvelope { seq, timestamp, payload: ServerMessage }
//! ```
//!
//! Replies and errors echo the `seq` of the request they answer. Pushed
//! events carry `seq: 0`.

use serde::{Deserialize, Serialize};

use crate::{
    Bid, Hand, MatchId, RoleScope, RoomId, RoomSnapshot, RoomStatus, RoomSummary,
    TeamFormationMode, TeamId, Timestamp, UserId,
};

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Envelope around every client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub seq: u64,
    pub payload: ClientMessage,
}

/// Room options supplied when a room is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub capacity: usize,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub mode: TeamFormationMode,
    #[serde(default)]
    pub allow_spectators: bool,
    #[serde(default)]
    pub team_count: Option<u8>,
    #[serde(default)]
    pub role_scope: RoleScope,
}

/// Everything a client can ask for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first frame on a connection.
    Handshake { version: u32, token: String },
    Heartbeat { client_time: u64 },
    Disconnect { reason: String },

    ListRooms,
    GetRoom { room_id: RoomId },
    Subscribe { room_id: RoomId },
    Unsubscribe { room_id: RoomId },

    CreateRoom(CreateRoomRequest),
    Join { room_id: RoomId, #[serde(default)] secret: Option<String> },
    Spectate { room_id: RoomId },
    Leave { room_id: RoomId },
    AdvancePhase { room_id: RoomId, target: RoomStatus },

    AppointCaptain { room_id: RoomId, team: TeamId, user_id: UserId },
    ChooseTeam { room_id: RoomId, team: TeamId },
    /// Leader narrows the teams free-join members may pick from.
    OfferTeams { room_id: RoomId, teams: Vec<TeamId> },
    Nominate { room_id: RoomId, player: UserId },
    SubmitBid { room_id: RoomId, target: UserId, amount: i64 },
    CloseBidding { room_id: RoomId },
    SubmitChoice { room_id: RoomId, hand: Hand },

    /// `role` is free text so unknown names surface as validation errors
    /// instead of undecodable frames.
    ClaimRole { room_id: RoomId, role: String },

    CreateBracket { room_id: RoomId, #[serde(default)] participants: Option<Vec<UserId>> },
    ReportMatchResult { room_id: RoomId, match_id: MatchId, winner: UserId },
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Envelope around every server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    pub seq: u64,
    pub timestamp: u64,
    pub payload: ServerMessage,
}

/// Category of a rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Forbidden,
    Conflict,
    WrongPhase,
    Validation,
    /// A bracket result that cannot be accepted.
    InvalidReport,
    Unauthorized,
    Unavailable,
    BadRequest,
}

/// What a successful request returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reply {
    Room { snapshot: RoomSnapshot },
    Rooms { rooms: Vec<RoomSummary> },
    /// Result of a `leave`. `snapshot` is `None` when the room was destroyed.
    Left {
        room_id: RoomId,
        room_destroyed: bool,
        new_leader: Option<UserId>,
        snapshot: Option<RoomSnapshot>,
    },
    /// Result of a match report.
    MatchReported { bracket_complete: bool, snapshot: RoomSnapshot },
    Subscribed { room_id: RoomId },
    Unsubscribed { room_id: RoomId },
}

/// Something that happened in a room, fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    RoomChanged { room_id: RoomId, snapshot: RoomSnapshot },
    RoomDeleted { room_id: RoomId },
    BidPlaced { room_id: RoomId, bid: Bid },
    ChoiceSubmitted { room_id: RoomId, round: u32, user_id: UserId },
}

impl ServerEvent {
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::RoomChanged { room_id, .. }
            | Self::RoomDeleted { room_id }
            | Self::BidPlaced { room_id, .. }
            | Self::ChoiceSubmitted { room_id, .. } => *room_id,
        }
    }
}

/// Everything the server can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    HandshakeAck { user_id: UserId, display_name: String, server_time: Timestamp },
    HeartbeatAck { client_time: u64, server_time: Timestamp },
    Reply(Reply),
    Error { code: ErrorCode, message: String },
    Event(ServerEvent),
}
