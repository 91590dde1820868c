//! Room actor: one Tokio task per room, owning its aggregate.
//!
//! Commands arrive over a bounded mpsc channel and run one at a time, so
//! the task is the room's lock. A change is committed in four steps:
//!
//! 1. run the operation against a copy of the aggregate
//! 2. persist the copy (or delete it, if the room was destroyed)
//! 3. swap the copy in
//! 4. publish the queued events
//!
//! A rejected operation or a failed save stops before step 3, so neither
//! the room nor its subscribers see anything.

use std::sync::Arc;

use huddle_protocol::{
    Bid, Hand, MatchId, RoomId, RoomSnapshot, RoomStatus, RoomSummary, TeamId, Timestamp, UserId,
};
use tokio::sync::{mpsc, oneshot};

use crate::reaper::{ReapReason, verdict};
use crate::{
    ActionContext, Clock, FanOut, LeaveOutcome, LobbyConfig, Missing, ReaperConfig, ReportOutcome,
    RoomAggregate, RoomError, RoomStore,
};

/// A member action routed to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Join { display_name: String, secret: Option<String> },
    Spectate { display_name: String },
    Leave,
    AdvancePhase { target: RoomStatus },
    AppointCaptain { team: TeamId, captain: UserId },
    ChooseTeam { team: TeamId },
    OfferTeams { teams: Vec<TeamId> },
    Nominate { player: UserId },
    SubmitBid { target: UserId, amount: i64 },
    CloseBidding,
    SubmitChoice { hand: Hand },
    ClaimRole { role: String },
    CreateBracket { participants: Option<Vec<UserId>> },
    ReportMatchResult { match_id: MatchId, winner: UserId },
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Spectate { .. } => "spectate",
            Self::Leave => "leave",
            Self::AdvancePhase { .. } => "advance_phase",
            Self::AppointCaptain { .. } => "appoint_captain",
            Self::ChooseTeam { .. } => "choose_team",
            Self::OfferTeams { .. } => "offer_teams",
            Self::Nominate { .. } => "nominate",
            Self::SubmitBid { .. } => "submit_bid",
            Self::CloseBidding => "close_bidding",
            Self::SubmitChoice { .. } => "submit_choice",
            Self::ClaimRole { .. } => "claim_role",
            Self::CreateBracket { .. } => "create_bracket",
            Self::ReportMatchResult { .. } => "report_match_result",
        }
    }
}

/// What an action produced beyond the new snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Left(LeaveOutcome),
    BidPlaced(Bid),
    Nominated { deadline: Timestamp },
    ChoiceCounted { round: u32 },
    Reported(ReportOutcome),
}

/// Reply to an [`Action`]. `snapshot` is `None` once the room is gone.
#[derive(Debug, Clone)]
pub struct ActionReply {
    pub outcome: Outcome,
    pub snapshot: Option<RoomSnapshot>,
}

impl ActionReply {
    pub(crate) fn into_snapshot(self, room_id: RoomId) -> Result<RoomSnapshot, RoomError> {
        self.snapshot.ok_or_else(|| Missing::Room(room_id).into())
    }
}

fn apply(
    room: &mut RoomAggregate,
    ctx: &mut ActionContext<'_>,
    user: UserId,
    action: Action,
) -> Result<Outcome, RoomError> {
    match action {
        Action::Join { display_name, secret } => {
            room.join(ctx, user, display_name, secret.as_deref())?;
        }
        Action::Spectate { display_name } => room.spectate(ctx, user, display_name)?,
        Action::Leave => return room.leave(ctx, user).map(Outcome::Left),
        Action::AdvancePhase { target } => room.advance_phase(ctx, user, target)?,
        Action::AppointCaptain { team, captain } => room.appoint_captain(ctx, user, team, captain)?,
        Action::ChooseTeam { team } => room.choose_team(ctx, user, team)?,
        Action::OfferTeams { teams } => room.offer_teams(ctx, user, &teams)?,
        Action::Nominate { player } => {
            let deadline = room.nominate(ctx, user, player)?;
            return Ok(Outcome::Nominated { deadline });
        }
        Action::SubmitBid { target, amount } => {
            return room.submit_bid(ctx, user, target, amount).map(Outcome::BidPlaced);
        }
        Action::CloseBidding => room.close_bidding(ctx, user)?,
        Action::SubmitChoice { hand } => {
            let round = room.submit_choice(ctx, user, hand)?;
            return Ok(Outcome::ChoiceCounted { round });
        }
        Action::ClaimRole { role } => room.claim_role(ctx, user, &role)?,
        Action::CreateBracket { participants } => room.create_bracket(ctx, user, participants)?,
        Action::ReportMatchResult { match_id, winner } => {
            return room
                .report_result(ctx, user, match_id, winner)
                .map(Outcome::Reported);
        }
    }
    Ok(Outcome::Done)
}

pub(crate) enum RoomCommand {
    Act {
        user: UserId,
        action: Action,
        reply: oneshot::Sender<Result<ActionReply, RoomError>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Summary {
        reply: oneshot::Sender<RoomSummary>,
    },
    /// Resolve overdue auction lots and RPS rounds.
    ExpireDeadlines,
    /// Destroy the room if the reaper policy says it is stale. Evaluated
    /// inside the actor so a concurrent join is either fully before or
    /// fully after the check.
    Reap {
        policy: ReaperConfig,
        reply: oneshot::Sender<Result<Option<ReapReason>, RoomError>>,
    },
    Destroy {
        reply: oneshot::Sender<Result<bool, RoomError>>,
    },
}

/// Cheap, cloneable handle to a running room actor.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?;
        reply_rx.await.map_err(|_| RoomError::Unavailable(self.room_id))
    }

    pub async fn act(&self, user: UserId, action: Action) -> Result<ActionReply, RoomError> {
        self.request(|reply| RoomCommand::Act { user, action, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub async fn summary(&self) -> Result<RoomSummary, RoomError> {
        self.request(|reply| RoomCommand::Summary { reply }).await
    }

    /// Fire-and-forget. Skipped when the actor's queue is full; the next
    /// sweep or action will catch up.
    pub fn expire_deadlines(&self) {
        let _ = self.sender.try_send(RoomCommand::ExpireDeadlines);
    }

    pub async fn reap(&self, policy: ReaperConfig) -> Result<Option<ReapReason>, RoomError> {
        self.request(|reply| RoomCommand::Reap { policy, reply })
            .await?
    }

    /// Destroys the room. Returns `false` if it was already gone.
    pub async fn destroy(&self) -> Result<bool, RoomError> {
        match self.request(|reply| RoomCommand::Destroy { reply }).await {
            Err(RoomError::Unavailable(_)) => Ok(false),
            other => other?,
        }
    }
}

/// Shared dependencies every room actor needs.
pub(crate) struct RoomDeps<S> {
    pub(crate) store: Arc<S>,
    pub(crate) fanout: Arc<FanOut>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: Arc<LobbyConfig>,
}

impl<S> Clone for RoomDeps<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            fanout: Arc::clone(&self.fanout),
            clock: Arc::clone(&self.clock),
            config: Arc::clone(&self.config),
        }
    }
}

struct RoomActor<S: RoomStore> {
    room: RoomAggregate,
    deps: RoomDeps<S>,
    receiver: mpsc::Receiver<RoomCommand>,
}

impl<S: RoomStore> RoomActor<S> {
    async fn run(mut self) {
        let room_id = self.room.room_id();
        tracing::debug!(%room_id, "room actor started");

        while let Some(command) = self.receiver.recv().await {
            match command {
                RoomCommand::Act { user, action, reply } => {
                    let result = self.act(user, action).await;
                    let _ = reply.send(result);
                }
                RoomCommand::Snapshot { reply } => {
                    let _ = reply.send(self.room.snapshot());
                }
                RoomCommand::Summary { reply } => {
                    let _ = reply.send(self.room.summary());
                }
                RoomCommand::ExpireDeadlines => {
                    if let Err(e) = self.expire_deadlines().await {
                        tracing::warn!(%room_id, error = %e, "deadline sweep failed");
                    }
                }
                RoomCommand::Reap { policy, reply } => {
                    let result = self.reap(&policy).await;
                    let _ = reply.send(result);
                }
                RoomCommand::Destroy { reply } => {
                    let result = self.commit(|room, ctx| Ok(room.destroy(ctx))).await;
                    let _ = reply.send(result);
                }
            }
            if self.room.is_destroyed() {
                break;
            }
        }

        tracing::debug!(%room_id, "room actor stopped");
    }

    async fn act(&mut self, user: UserId, action: Action) -> Result<ActionReply, RoomError> {
        // A lapsed deadline is settled as its own change first, so the
        // action sees the state observers were told about.
        self.expire_deadlines().await?;

        let name = action.name();
        let outcome = self
            .commit(|room, ctx| apply(room, ctx, user, action))
            .await
            .inspect_err(|e| {
                tracing::debug!(
                    room_id = %self.room.room_id(),
                    user_id = %user,
                    action = name,
                    error = %e,
                    "action rejected"
                );
            })?;
        let snapshot = (!self.room.is_destroyed()).then(|| self.room.snapshot());
        Ok(ActionReply { outcome, snapshot })
    }

    async fn expire_deadlines(&mut self) -> Result<(), RoomError> {
        if !self.room.has_due_deadline(self.deps.clock.now()) {
            return Ok(());
        }
        self.commit(|room, ctx| Ok(room.expire_deadlines(ctx))).await?;
        Ok(())
    }

    async fn reap(&mut self, policy: &ReaperConfig) -> Result<Option<ReapReason>, RoomError> {
        let Some(reason) = verdict(&self.room, self.deps.clock.now(), policy) else {
            return Ok(None);
        };
        tracing::info!(room_id = %self.room.room_id(), ?reason, "reaping room");
        self.commit(|room, ctx| Ok(room.destroy(ctx))).await?;
        Ok(Some(reason))
    }

    /// Runs `op` against a copy and commits the copy if `op` succeeds and
    /// the store accepts it.
    async fn commit<T>(
        &mut self,
        op: impl FnOnce(&mut RoomAggregate, &mut ActionContext<'_>) -> Result<T, RoomError>,
    ) -> Result<T, RoomError> {
        let mut draft = self.room.clone();
        draft.bump_version();
        let value = {
            let mut rng = rand::rng();
            let mut ctx = ActionContext {
                now: self.deps.clock.now(),
                rng: &mut rng,
                config: &self.deps.config,
            };
            op(&mut draft, &mut ctx)?
        };
        let outbox = draft.take_outbox();

        let persisted = if draft.is_destroyed() {
            self.deps.store.delete(draft.room_id()).await.map(drop)
        } else {
            self.deps.store.save(&draft).await
        };
        if let Err(e) = persisted {
            tracing::warn!(
                room_id = %draft.room_id(),
                version = draft.version(),
                error = %e,
                "room change not persisted"
            );
            return Err(e.into());
        }

        self.room = draft;
        self.deps.fanout.publish_all(outbox);
        Ok(value)
    }
}

/// Spawns the actor for `room` and returns its handle.
pub(crate) fn spawn_room<S: RoomStore>(room: RoomAggregate, deps: RoomDeps<S>) -> RoomHandle {
    let (sender, receiver) = mpsc::channel(deps.config.channel_size.max(1));
    let room_id = room.room_id();
    let actor = RoomActor {
        room,
        deps,
        receiver,
    };
    tokio::spawn(actor.run());
    RoomHandle { room_id, sender }
}
