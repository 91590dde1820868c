//! Room manager: creates rooms, routes member actions to their actors and
//! drives the background sweeps.
//!
//! This is the entry point for the server layer. Every inbound command
//! port is a typed method here that takes the caller's authenticated
//! user id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use huddle_protocol::{
    Bid, Hand, MatchId, RoomId, RoomSnapshot, RoomStatus, RoomSummary, ServerEvent, TeamId,
    Timestamp, UserId,
};
use tokio::sync::{RwLock, broadcast};

use crate::room::{RoomDeps, spawn_room};
use crate::{
    Action, ActionReply, Clock, FanOut, LeaveOutcome, LobbyConfig, Missing, Outcome, ReaperConfig,
    RoomAggregate, RoomError, RoomHandle, RoomSettings, RoomStore, SystemClock, Topic,
};

/// Result of [`RoomManager::leave`].
#[derive(Debug, Clone)]
pub struct LeaveReply {
    pub outcome: LeaveOutcome,
    /// `None` when the room was destroyed.
    pub snapshot: Option<RoomSnapshot>,
}

/// Result of [`RoomManager::report_match_result`].
#[derive(Debug, Clone)]
pub struct ReportReply {
    pub bracket_complete: bool,
    pub snapshot: RoomSnapshot,
}

pub struct RoomManager<S: RoomStore> {
    rooms: RwLock<HashMap<RoomId, RoomHandle>>,
    deps: RoomDeps<S>,
    next_room_id: AtomicU64,
}

impl<S: RoomStore> RoomManager<S> {
    pub fn new(store: Arc<S>, config: LobbyConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, config: LobbyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            deps: RoomDeps {
                store,
                fanout: Arc::new(FanOut::new(config.topic_capacity)),
                clock,
                config: Arc::new(config),
            },
            next_room_id: AtomicU64::new(1),
        }
    }

    pub fn fanout(&self) -> &Arc<FanOut> {
        &self.deps.fanout
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<ServerEvent> {
        self.deps.fanout.subscribe(topic)
    }

    pub fn now(&self) -> Timestamp {
        self.deps.clock.now()
    }

    /// Re-spawns actors for every room in the store. Call once at startup.
    pub async fn restore(&self) -> Result<usize, RoomError> {
        let persisted = self.deps.store.list().await?;
        let mut rooms = self.rooms.write().await;
        let mut restored = 0;
        for room in persisted {
            let room_id = room.room_id();
            self.next_room_id.fetch_max(room_id.0 + 1, Ordering::Relaxed);
            if room.is_destroyed() || rooms.contains_key(&room_id) {
                continue;
            }
            rooms.insert(room_id, spawn_room(room, self.deps.clone()));
            restored += 1;
        }
        tracing::info!(rooms = restored, "rooms restored from store");
        Ok(restored)
    }

    // -----------------------------------------------------------------------
    // Inbound command ports
    // -----------------------------------------------------------------------

    /// Opens a room led by `user`.
    pub async fn create_room(
        &self,
        user: UserId,
        display_name: impl Into<String>,
        settings: RoomSettings,
    ) -> Result<RoomSnapshot, RoomError> {
        let room_id = RoomId(self.next_room_id.fetch_add(1, Ordering::Relaxed));
        let room = RoomAggregate::open(room_id, user, display_name.into(), settings, self.now())?;
        self.deps.store.save(&room).await?;
        let snapshot = room.snapshot();
        let handle = spawn_room(room, self.deps.clone());
        self.rooms.write().await.insert(room_id, handle);
        Ok(snapshot)
    }

    pub async fn join(
        &self,
        room_id: RoomId,
        user: UserId,
        display_name: impl Into<String>,
        secret: Option<String>,
    ) -> Result<RoomSnapshot, RoomError> {
        let action = Action::Join {
            display_name: display_name.into(),
            secret,
        };
        self.act(room_id, user, action).await?.into_snapshot(room_id)
    }

    pub async fn spectate(
        &self,
        room_id: RoomId,
        user: UserId,
        display_name: impl Into<String>,
    ) -> Result<RoomSnapshot, RoomError> {
        let action = Action::Spectate {
            display_name: display_name.into(),
        };
        self.act(room_id, user, action).await?.into_snapshot(room_id)
    }

    pub async fn leave(&self, room_id: RoomId, user: UserId) -> Result<LeaveReply, RoomError> {
        let reply = self.act(room_id, user, Action::Leave).await?;
        match reply.outcome {
            Outcome::Left(outcome) => Ok(LeaveReply {
                outcome,
                snapshot: reply.snapshot,
            }),
            other => Err(unexpected(room_id, &other)),
        }
    }

    pub async fn advance_phase(
        &self,
        room_id: RoomId,
        user: UserId,
        target: RoomStatus,
    ) -> Result<RoomSnapshot, RoomError> {
        self.act(room_id, user, Action::AdvancePhase { target })
            .await?
            .into_snapshot(room_id)
    }

    pub async fn appoint_captain(
        &self,
        room_id: RoomId,
        user: UserId,
        team: TeamId,
        captain: UserId,
    ) -> Result<RoomSnapshot, RoomError> {
        self.act(room_id, user, Action::AppointCaptain { team, captain })
            .await?
            .into_snapshot(room_id)
    }

    pub async fn choose_team(
        &self,
        room_id: RoomId,
        user: UserId,
        team: TeamId,
    ) -> Result<RoomSnapshot, RoomError> {
        self.act(room_id, user, Action::ChooseTeam { team })
            .await?
            .into_snapshot(room_id)
    }

    /// Leader restricts which teams free-join members may pick.
    pub async fn offer_teams(
        &self,
        room_id: RoomId,
        user: UserId,
        teams: Vec<TeamId>,
    ) -> Result<RoomSnapshot, RoomError> {
        self.act(room_id, user, Action::OfferTeams { teams })
            .await?
            .into_snapshot(room_id)
    }

    pub async fn nominate(
        &self,
        room_id: RoomId,
        user: UserId,
        player: UserId,
    ) -> Result<RoomSnapshot, RoomError> {
        self.act(room_id, user, Action::Nominate { player })
            .await?
            .into_snapshot(room_id)
    }

    pub async fn submit_bid(
        &self,
        room_id: RoomId,
        user: UserId,
        target: UserId,
        amount: i64,
    ) -> Result<(Bid, RoomSnapshot), RoomError> {
        let reply = self
            .act(room_id, user, Action::SubmitBid { target, amount })
            .await?;
        match reply.outcome {
            Outcome::BidPlaced(bid) => Ok((bid, reply.snapshot.ok_or(Missing::Room(room_id))?)),
            other => Err(unexpected(room_id, &other)),
        }
    }

    pub async fn close_bidding(&self, room_id: RoomId, user: UserId) -> Result<RoomSnapshot, RoomError> {
        self.act(room_id, user, Action::CloseBidding)
            .await?
            .into_snapshot(room_id)
    }

    pub async fn submit_choice(
        &self,
        room_id: RoomId,
        user: UserId,
        hand: Hand,
    ) -> Result<RoomSnapshot, RoomError> {
        self.act(room_id, user, Action::SubmitChoice { hand })
            .await?
            .into_snapshot(room_id)
    }

    /// `role` is the raw role name; unknown names are a validation error.
    pub async fn claim_role(
        &self,
        room_id: RoomId,
        user: UserId,
        role: impl Into<String>,
    ) -> Result<RoomSnapshot, RoomError> {
        self.act(room_id, user, Action::ClaimRole { role: role.into() })
            .await?
            .into_snapshot(room_id)
    }

    pub async fn create_bracket(
        &self,
        room_id: RoomId,
        user: UserId,
        participants: Option<Vec<UserId>>,
    ) -> Result<RoomSnapshot, RoomError> {
        self.act(room_id, user, Action::CreateBracket { participants })
            .await?
            .into_snapshot(room_id)
    }

    pub async fn report_match_result(
        &self,
        room_id: RoomId,
        user: UserId,
        match_id: MatchId,
        winner: UserId,
    ) -> Result<ReportReply, RoomError> {
        let reply = self
            .act(room_id, user, Action::ReportMatchResult { match_id, winner })
            .await?;
        match reply.outcome {
            Outcome::Reported(report) => Ok(ReportReply {
                bracket_complete: report.bracket_complete,
                snapshot: reply.snapshot.ok_or(Missing::Room(room_id))?,
            }),
            other => Err(unexpected(room_id, &other)),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn snapshot(&self, room_id: RoomId) -> Result<RoomSnapshot, RoomError> {
        self.handle(room_id).await?.snapshot().await
    }

    /// Summaries of every live room, ordered by id. Rooms that stop
    /// answering mid-listing are skipped.
    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let mut summaries = Vec::new();
        for handle in self.handles().await {
            if let Ok(summary) = handle.summary().await {
                summaries.push(summary);
            }
        }
        summaries.sort_by_key(|s| s.room_id);
        summaries
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    // -----------------------------------------------------------------------
    // Destruction and sweeps
    // -----------------------------------------------------------------------

    /// Destroys a room. Returns `false` if it was already gone, so racing
    /// callers see exactly one `true` and one `RoomDeleted` event.
    pub async fn destroy_room(&self, room_id: RoomId) -> Result<bool, RoomError> {
        let handle = match self.handle(room_id).await {
            Ok(handle) => handle,
            Err(RoomError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        let destroyed = handle.destroy().await?;
        self.forget(room_id).await;
        Ok(destroyed)
    }

    /// One reaper pass. Returns the rooms destroyed.
    pub async fn sweep(&self, policy: &ReaperConfig) -> Vec<RoomId> {
        let mut reaped = Vec::new();
        for handle in self.handles().await {
            let room_id = handle.room_id();
            match handle.reap(policy.clone()).await {
                Ok(Some(_)) | Err(RoomError::Unavailable(_)) => {
                    self.forget(room_id).await;
                    reaped.push(room_id);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(%room_id, error = %e, "reap failed"),
            }
        }
        let pruned = self.deps.fanout.prune();
        if pruned > 0 {
            tracing::debug!(topics = pruned, "idle fan-out topics pruned");
        }
        reaped
    }

    /// Nudges every room to settle overdue deadlines.
    pub async fn expire_deadlines(&self) {
        for handle in self.handles().await {
            handle.expire_deadlines();
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// The live actor for `room_id`. A room the store holds but this
    /// manager has no actor for, e.g. one persisted by an earlier process
    /// after `restore`, is loaded and respawned.
    async fn handle(&self, room_id: RoomId) -> Result<RoomHandle, RoomError> {
        if let Some(handle) = self.rooms.read().await.get(&room_id) {
            return Ok(handle.clone());
        }
        let room = match self.deps.store.load(room_id).await? {
            Some(room) if !room.is_destroyed() => room,
            _ => return Err(Missing::Room(room_id).into()),
        };
        self.next_room_id.fetch_max(room_id.0 + 1, Ordering::Relaxed);
        let mut rooms = self.rooms.write().await;
        let handle = rooms.entry(room_id).or_insert_with(|| {
            tracing::info!(%room_id, "room loaded from store");
            spawn_room(room, self.deps.clone())
        });
        Ok(handle.clone())
    }

    async fn handles(&self) -> Vec<RoomHandle> {
        self.rooms.read().await.values().cloned().collect()
    }

    async fn forget(&self, room_id: RoomId) {
        self.rooms.write().await.remove(&room_id);
    }

    async fn act(&self, room_id: RoomId, user: UserId, action: Action) -> Result<ActionReply, RoomError> {
        let handle = self.handle(room_id).await?;
        let reply = match handle.act(user, action).await {
            Err(RoomError::Unavailable(_)) if handle.is_closed() => {
                // The actor stopped because the room was destroyed.
                self.forget(room_id).await;
                return Err(Missing::Room(room_id).into());
            }
            other => other?,
        };
        if reply.snapshot.is_none() {
            self.forget(room_id).await;
        }
        Ok(reply)
    }
}

impl RoomManager<crate::MemoryRoomStore> {
    /// Manager over a fresh in-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::MemoryRoomStore::new()), LobbyConfig::default())
    }
}

fn unexpected(room_id: RoomId, outcome: &Outcome) -> RoomError {
    tracing::error!(%room_id, ?outcome, "room replied with an unexpected outcome");
    RoomError::Unavailable(room_id)
}
