//! The room aggregate: everything one room owns, and every operation that
//! changes it.
//!
//! Operations are synchronous and either succeed completely or return an
//! error without touching state that observers can see. The room actor
//! runs each one against a copy, persists the copy, and only then swaps
//! it in and publishes the events queued in the outbox.

use huddle_protocol::{
    Bid, Capacity, Hand, MatchId, MemberView, Role, RoomId, RoomSnapshot, RoomStatus,
    RoomSummary, ServerEvent, TeamFormationMode, TeamId, Timestamp, UserId,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::phase::{Requirement, can_transition, require_status};
use crate::{
    AuctionEngine, Bracket, Conflict, Denied, Formation, Ledger, LobbyConfig, Member, PhaseError,
    Publication, RoleDraft, RoomError, RoomSettings, TeamBoard, successor,
};

/// Inputs an operation may need besides its arguments.
pub struct ActionContext<'a> {
    pub now: Timestamp,
    pub rng: &'a mut dyn RngCore,
    pub config: &'a LobbyConfig,
}

/// Result of a `leave`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub room_destroyed: bool,
    pub new_leader: Option<UserId>,
}

/// Result of a bracket report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOutcome {
    pub bracket_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomAggregate {
    room_id: RoomId,
    version: u64,
    settings: RoomSettings,
    status: RoomStatus,
    created_at: Timestamp,
    ledger: Ledger,
    teams: TeamBoard,
    formation: Option<Formation>,
    draft: RoleDraft,
    bracket: Option<Bracket>,
    /// Set while a recruiting room has nobody but its leader.
    lonely_since: Option<Timestamp>,
    completed_at: Option<Timestamp>,
    destroyed: bool,
    #[serde(skip)]
    outbox: Vec<Publication>,
}

impl RoomAggregate {
    /// Creates a recruiting room led by `leader`, at version 1.
    pub fn open(
        room_id: RoomId,
        leader: UserId,
        display_name: String,
        settings: RoomSettings,
        now: Timestamp,
    ) -> Result<Self, RoomError> {
        settings.validate()?;
        let mut ledger = Ledger::default();
        ledger.admit(Member {
            user_id: leader,
            display_name,
            capacity: Capacity::Leader,
            joined_at: now,
        })?;
        let room = Self {
            room_id,
            version: 1,
            teams: TeamBoard::new(settings.team_count),
            draft: RoleDraft::new(settings.role_scope),
            settings,
            status: RoomStatus::Recruiting,
            created_at: now,
            ledger,
            formation: None,
            bracket: None,
            lonely_since: Some(now),
            completed_at: None,
            destroyed: false,
            outbox: Vec::new(),
        };
        tracing::info!(
            room_id = %room_id,
            leader = %leader,
            mode = %room.settings.mode,
            capacity = room.settings.capacity,
            "room created"
        );
        Ok(room)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn teams(&self) -> &TeamBoard {
        &self.teams
    }

    pub fn bracket(&self) -> Option<&Bracket> {
        self.bracket.as_ref()
    }

    pub fn leader(&self) -> Option<UserId> {
        self.ledger.leader()
    }

    pub fn active_count(&self) -> usize {
        self.ledger.active_count()
    }

    pub fn lonely_since(&self) -> Option<Timestamp> {
        self.lonely_since
    }

    pub fn completed_at(&self) -> Option<Timestamp> {
        self.completed_at
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Called once per commit, before the operation runs.
    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }

    /// Events queued by the last operation, in order.
    pub(crate) fn take_outbox(&mut self) -> Vec<Publication> {
        std::mem::take(&mut self.outbox)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Adds `user` as a participant.
    ///
    /// # Errors
    /// `WrongPhase` unless recruiting, `AlreadyMember`, `WrongSecret` for a
    /// missing or wrong secret, `Full` at capacity.
    pub fn join(
        &mut self,
        ctx: &mut ActionContext<'_>,
        user: UserId,
        display_name: String,
        secret: Option<&str>,
    ) -> Result<(), RoomError> {
        require_status(self.status, RoomStatus::Recruiting)?;
        if self.ledger.contains(user) {
            return Err(Conflict::AlreadyMember.into());
        }
        if let Some(expected) = &self.settings.secret {
            if secret != Some(expected.as_str()) {
                return Err(Denied::WrongSecret.into());
            }
        }
        if self.ledger.active_count() >= self.settings.capacity {
            return Err(Conflict::Full.into());
        }
        self.ledger.admit(Member {
            user_id: user,
            display_name,
            capacity: Capacity::Participant,
            joined_at: ctx.now,
        })?;
        self.lonely_since = None;
        tracing::info!(
            room_id = %self.room_id,
            user_id = %user,
            members = self.ledger.active_count(),
            "member joined"
        );
        self.changed();
        Ok(())
    }

    /// Adds `user` as a spectator. Spectators do not count toward capacity.
    pub fn spectate(
        &mut self,
        ctx: &mut ActionContext<'_>,
        user: UserId,
        display_name: String,
    ) -> Result<(), RoomError> {
        if !self.settings.allow_spectators {
            return Err(Denied::SpectatorsDisabled.into());
        }
        if self.status.is_terminal() {
            return Err(self.phase_error(Requirement::NotCompleted).into());
        }
        self.ledger.admit(Member {
            user_id: user,
            display_name,
            capacity: Capacity::Spectator,
            joined_at: ctx.now,
        })?;
        tracing::debug!(room_id = %self.room_id, user_id = %user, "spectator joined");
        self.changed();
        Ok(())
    }

    /// Removes `user` and everything they held in the room.
    ///
    /// A departing leader is replaced before the room is checked for
    /// emptiness, so no snapshot ever shows a populated room without a
    /// leader. The last active member leaving destroys the room.
    pub fn leave(&mut self, ctx: &mut ActionContext<'_>, user: UserId) -> Result<LeaveOutcome, RoomError> {
        let member = self.ledger.remove(user)?;
        if !member.is_active() {
            tracing::debug!(room_id = %self.room_id, user_id = %user, "spectator left");
            self.changed();
            return Ok(LeaveOutcome {
                room_destroyed: false,
                new_leader: None,
            });
        }

        self.draft.release(user);
        if let Some(formation) = &mut self.formation {
            formation.withdraw(&mut self.teams, user, ctx.now, &mut *ctx.rng);
        }
        self.teams.unassign(user);
        let was_captain = self.teams.dismiss(user).is_some();
        let forfeited = self.bracket.as_mut().is_some_and(|b| b.forfeit(user));

        let mut new_leader = None;
        if member.capacity == Capacity::Leader {
            new_leader = successor(&self.ledger, user);
            if let Some(next) = new_leader {
                self.ledger.set_capacity(next, Capacity::Leader);
                tracing::info!(
                    room_id = %self.room_id,
                    previous = %user,
                    leader = %next,
                    "leadership passed on"
                );
            }
        }

        tracing::info!(
            room_id = %self.room_id,
            user_id = %user,
            members = self.ledger.active_count(),
            "member left"
        );

        if self.ledger.active_count() == 0 {
            self.destroy(ctx);
            return Ok(LeaveOutcome {
                room_destroyed: true,
                new_leader: None,
            });
        }

        let short_handed = self.ledger.active_count() < self.min_members();
        match self.status {
            RoomStatus::LeaderElection | RoomStatus::TeamFormation if short_handed => {
                self.reset_to_recruiting(ctx.now);
            }
            RoomStatus::TeamFormation if was_captain => self.reset_to_leader_election(ctx.now),
            RoomStatus::RoleSelection => self.complete_draft_if_done(ctx.now),
            RoomStatus::TournamentBracket if forfeited => self.complete_bracket_if_done(ctx.now),
            _ => {}
        }
        if self.status == RoomStatus::Recruiting && self.ledger.active_count() == 1 {
            self.lonely_since.get_or_insert(ctx.now);
        }

        if let Some(next) = new_leader {
            let event = self.changed_event();
            self.outbox.push(Publication::user(next, event));
        }
        self.changed();
        Ok(LeaveOutcome {
            room_destroyed: false,
            new_leader,
        })
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    /// Leader-initiated forward transition to `target`.
    pub fn advance_phase(
        &mut self,
        ctx: &mut ActionContext<'_>,
        user: UserId,
        target: RoomStatus,
    ) -> Result<(), RoomError> {
        self.require_leader(user)?;
        if !can_transition(self.status, target) {
            return Err(self.phase_error(Requirement::Transition { to: target }).into());
        }

        match (self.status, target) {
            (RoomStatus::Recruiting, RoomStatus::LeaderElection) => {
                self.require_members(self.min_members())?;
            }
            (RoomStatus::Recruiting, RoomStatus::TournamentBracket) => {
                self.require_members(2)?;
                self.bracket = Some(Bracket::create(self.ledger.active_ids())?);
            }
            (RoomStatus::LeaderElection, RoomStatus::TeamFormation) => {
                if !self.teams.has_full_captaincy() {
                    return Err(self.phase_error(Requirement::CaptainPerTeam).into());
                }
                self.begin_team_formation(ctx);
            }
            (RoomStatus::TeamFormation, RoomStatus::RoleSelection) => {
                let active = self.ledger.active_ids();
                if !self.teams.everyone_assigned(active.iter()) {
                    return Err(self.phase_error(Requirement::EveryoneOnATeam).into());
                }
                self.formation = None;
                self.draft.clear();
            }
            (RoomStatus::RoleSelection, RoomStatus::InProgress) => {
                let active = self.ledger.active_ids();
                if !self.draft.everyone_claimed(active.iter()) {
                    return Err(self.phase_error(Requirement::EveryoneHasARole).into());
                }
            }
            _ => {}
        }

        self.enter(target, ctx.now);
        self.changed();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Leader election and team formation
    // -----------------------------------------------------------------------

    /// Leader appoints `captain` to lead `team`.
    pub fn appoint_captain(
        &mut self,
        _ctx: &mut ActionContext<'_>,
        user: UserId,
        team: TeamId,
        captain: UserId,
    ) -> Result<(), RoomError> {
        require_status(self.status, RoomStatus::LeaderElection)?;
        self.require_leader(user)?;
        self.ledger.active_member(captain)?;
        let replaced = self.teams.appoint(team, captain)?;
        tracing::debug!(
            room_id = %self.room_id,
            %team,
            captain = %captain,
            replaced = ?replaced,
            "captain appointed"
        );
        self.changed();
        Ok(())
    }

    /// Free-join pick.
    pub fn choose_team(
        &mut self,
        _ctx: &mut ActionContext<'_>,
        user: UserId,
        team: TeamId,
    ) -> Result<(), RoomError> {
        require_status(self.status, RoomStatus::TeamFormation)?;
        self.ledger.active_member(user)?;
        let status = self.status;
        match &self.formation {
            Some(Formation::Free(engine)) => engine.choose(&mut self.teams, user, team)?,
            _ => return Err(wrong_mode(TeamFormationMode::Free, status).into()),
        }
        self.changed();
        Ok(())
    }

    /// Leader narrows the free-join teams members may pick from.
    pub fn offer_teams(
        &mut self,
        _ctx: &mut ActionContext<'_>,
        user: UserId,
        teams: &[TeamId],
    ) -> Result<(), RoomError> {
        require_status(self.status, RoomStatus::TeamFormation)?;
        self.require_leader(user)?;
        let status = self.status;
        let unplaced = self
            .ledger
            .active_ids()
            .iter()
            .filter(|u| !self.teams.is_assigned(**u))
            .count();
        match &mut self.formation {
            Some(Formation::Free(engine)) => engine.offer(&self.teams, teams, unplaced)?,
            _ => return Err(wrong_mode(TeamFormationMode::Free, status).into()),
        }
        tracing::debug!(room_id = %self.room_id, offered = ?teams, "teams offered");
        self.changed();
        Ok(())
    }

    /// Leader puts `player` up for auction. Returns the bidding deadline.
    pub fn nominate(
        &mut self,
        ctx: &mut ActionContext<'_>,
        user: UserId,
        player: UserId,
    ) -> Result<Timestamp, RoomError> {
        require_status(self.status, RoomStatus::TeamFormation)?;
        self.require_leader(user)?;
        self.ledger.active_member(player)?;
        let (engine, teams) = self.auction()?;
        let deadline = engine.nominate(teams, player, ctx.now, ctx.config.auction_window)?;
        tracing::debug!(room_id = %self.room_id, %player, deadline = deadline.as_millis(), "player nominated");
        self.changed();
        Ok(deadline)
    }

    pub fn submit_bid(
        &mut self,
        ctx: &mut ActionContext<'_>,
        user: UserId,
        target: UserId,
        amount: i64,
    ) -> Result<Bid, RoomError> {
        require_status(self.status, RoomStatus::TeamFormation)?;
        self.ledger.active_member(user)?;
        let (engine, teams) = self.auction()?;
        let bid = engine.bid(teams, user, target, amount, ctx.now)?;

        let event = ServerEvent::BidPlaced {
            room_id: self.room_id,
            bid: bid.clone(),
        };
        self.outbox.push(Publication::user(target, event.clone()));
        self.outbox.push(Publication::room(event));
        self.changed();
        Ok(bid)
    }

    /// Leader's "sold" signal for the current nominee.
    pub fn close_bidding(&mut self, _ctx: &mut ActionContext<'_>, user: UserId) -> Result<(), RoomError> {
        require_status(self.status, RoomStatus::TeamFormation)?;
        self.require_leader(user)?;
        let (engine, teams) = self.auction()?;
        let sale = engine.close(teams)?;
        tracing::info!(
            room_id = %self.room_id,
            player = %sale.player,
            team = %sale.team,
            price = sale.winning_bid.as_ref().map_or(0, |b| b.amount),
            "player sold"
        );
        self.changed();
        Ok(())
    }

    /// Records a rock-paper-scissors hand. Returns the round it counted for.
    pub fn submit_choice(
        &mut self,
        ctx: &mut ActionContext<'_>,
        user: UserId,
        hand: Hand,
    ) -> Result<u32, RoomError> {
        require_status(self.status, RoomStatus::TeamFormation)?;
        self.ledger.active_member(user)?;
        let status = self.status;
        let round = match &mut self.formation {
            Some(Formation::Rps(engine)) => {
                engine.submit(&mut self.teams, user, hand, ctx.now, &mut *ctx.rng)?
            }
            _ => return Err(wrong_mode(TeamFormationMode::RockPaperScissors, status).into()),
        };
        self.outbox.push(Publication::room(ServerEvent::ChoiceSubmitted {
            room_id: self.room_id,
            round,
            user_id: user,
        }));
        self.changed();
        Ok(round)
    }

    // -----------------------------------------------------------------------
    // Role draft
    // -----------------------------------------------------------------------

    /// Claims a lane role. The room moves to `InProgress` once every active
    /// member holds one.
    pub fn claim_role(
        &mut self,
        ctx: &mut ActionContext<'_>,
        user: UserId,
        role: &str,
    ) -> Result<(), RoomError> {
        require_status(self.status, RoomStatus::RoleSelection)?;
        let role: Role = role
            .parse()
            .map_err(|e: huddle_protocol::UnknownRole| RoomError::Validation(e.to_string()))?;
        self.ledger.active_member(user)?;
        self.draft.claim(&self.teams, user, role)?;
        tracing::debug!(room_id = %self.room_id, user_id = %user, role = role.as_str(), "role claimed");
        self.complete_draft_if_done(ctx.now);
        self.changed();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tournament bracket
    // -----------------------------------------------------------------------

    /// Leader starts bracket play. `participants` defaults to every active
    /// member in join order.
    pub fn create_bracket(
        &mut self,
        ctx: &mut ActionContext<'_>,
        user: UserId,
        participants: Option<Vec<UserId>>,
    ) -> Result<(), RoomError> {
        self.require_leader(user)?;
        require_status(self.status, RoomStatus::Recruiting)?;
        let participants = match participants {
            Some(list) => {
                for participant in &list {
                    self.ledger.active_member(*participant)?;
                }
                list
            }
            None => self.ledger.active_ids(),
        };
        let bracket = Bracket::create(participants)?;
        self.bracket = Some(bracket);
        self.enter(RoomStatus::TournamentBracket, ctx.now);
        self.changed();
        Ok(())
    }

    pub fn report_result(
        &mut self,
        ctx: &mut ActionContext<'_>,
        user: UserId,
        match_id: MatchId,
        winner: UserId,
    ) -> Result<ReportOutcome, RoomError> {
        require_status(self.status, RoomStatus::TournamentBracket)?;
        let is_leader = self.ledger.is_leader(user);
        let bracket = self.bracket.as_mut().ok_or(crate::Missing::Match(match_id))?;
        let bracket_complete = bracket.report(match_id, winner, user, is_leader)?;
        tracing::debug!(room_id = %self.room_id, %match_id, %winner, "match reported");
        self.complete_bracket_if_done(ctx.now);
        self.changed();
        Ok(ReportOutcome { bracket_complete })
    }

    // -----------------------------------------------------------------------
    // Deadlines and destruction
    // -----------------------------------------------------------------------

    pub fn next_deadline(&self) -> Option<Timestamp> {
        match self.status {
            RoomStatus::TeamFormation => self.formation.as_ref().and_then(Formation::deadline),
            _ => None,
        }
    }

    pub fn has_due_deadline(&self, now: Timestamp) -> bool {
        self.status == RoomStatus::TeamFormation
            && self.formation.as_ref().is_some_and(|f| f.is_due(now))
    }

    /// Forces resolution of an overdue auction lot or RPS round. Returns
    /// `true` if anything changed.
    pub fn expire_deadlines(&mut self, ctx: &mut ActionContext<'_>) -> bool {
        if !self.has_due_deadline(ctx.now) {
            return false;
        }
        let Some(formation) = &mut self.formation else {
            return false;
        };
        if !formation.expire(&mut self.teams, ctx.now, &mut *ctx.rng) {
            return false;
        }
        tracing::debug!(room_id = %self.room_id, "deadline expired");
        self.changed();
        true
    }

    /// Tears the room down: members, assignments, claims, bids, choices and
    /// bracket. Destroying twice is a no-op that returns `false`.
    pub fn destroy(&mut self, _ctx: &mut ActionContext<'_>) -> bool {
        if self.destroyed {
            return false;
        }
        self.destroyed = true;
        let event = ServerEvent::RoomDeleted {
            room_id: self.room_id,
        };
        for member in self.ledger.iter() {
            self.outbox.push(Publication::user(member.user_id, event.clone()));
        }
        self.outbox.push(Publication::room(event));
        self.ledger.clear();
        self.teams.reset();
        self.formation = None;
        self.draft.clear();
        self.bracket = None;
        self.lonely_since = None;
        tracing::info!(room_id = %self.room_id, status = %self.status, "room destroyed");
        true
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id,
            version: self.version,
            title: self.settings.title.clone(),
            description: self.settings.description.clone(),
            capacity: self.settings.capacity,
            has_secret: self.settings.has_secret(),
            status: self.status,
            mode: self.settings.mode,
            allow_spectators: self.settings.allow_spectators,
            team_count: self.settings.team_count,
            role_scope: self.settings.role_scope,
            leader: self.ledger.leader(),
            created_at: self.created_at,
            members: self
                .ledger
                .iter()
                .map(|m| MemberView {
                    user_id: m.user_id,
                    display_name: m.display_name.clone(),
                    capacity: m.capacity,
                    joined_at: m.joined_at,
                    team: self
                        .teams
                        .team_of(m.user_id)
                        .or_else(|| self.teams.team_captained_by(m.user_id)),
                    role: self.draft.role_of(m.user_id),
                    captain: self.teams.is_captain(m.user_id),
                })
                .collect(),
            formation: match self.status {
                RoomStatus::TeamFormation => self.formation.as_ref().map(|f| f.view(&self.teams)),
                _ => None,
            },
            bracket: self.bracket.as_ref().map(Bracket::view),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id,
            title: self.settings.title.clone(),
            status: self.status,
            mode: self.settings.mode,
            active_members: self.ledger.active_count(),
            capacity: self.settings.capacity,
            has_secret: self.settings.has_secret(),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn changed_event(&self) -> ServerEvent {
        ServerEvent::RoomChanged {
            room_id: self.room_id,
            snapshot: self.snapshot(),
        }
    }

    /// Queues the post-change snapshot for the room topic.
    fn changed(&mut self) {
        let event = self.changed_event();
        self.outbox.push(Publication::room(event));
    }

    fn enter(&mut self, status: RoomStatus, now: Timestamp) {
        let previous = self.status;
        self.status = status;
        if status == RoomStatus::Completed {
            self.completed_at = Some(now);
        }
        tracing::info!(
            room_id = %self.room_id,
            from = %previous,
            to = %status,
            "phase changed"
        );
    }

    fn begin_team_formation(&mut self, ctx: &mut ActionContext<'_>) {
        let active = self.ledger.active_ids();
        self.teams.begin_formation(active.len());
        self.formation = Some(Formation::start(
            self.settings.mode,
            &mut self.teams,
            &active,
            ctx.config,
            ctx.now,
            &mut *ctx.rng,
        ));
    }

    /// Teams need one captain each, so a room with fewer active members
    /// than teams cannot get past leader election.
    fn min_members(&self) -> usize {
        usize::from(self.settings.team_count).max(2)
    }

    /// Too few members left to field every team: captains, teams, engine
    /// and claims are dropped and the room recruits again.
    fn reset_to_recruiting(&mut self, now: Timestamp) {
        self.teams.disband();
        self.formation = None;
        self.draft.clear();
        tracing::info!(
            room_id = %self.room_id,
            members = self.ledger.active_count(),
            teams = self.settings.team_count,
            "not enough members for every team, back to recruiting"
        );
        self.enter(RoomStatus::Recruiting, now);
    }

    /// A captain left mid-formation: back to leader election with the
    /// remaining captains kept.
    fn reset_to_leader_election(&mut self, now: Timestamp) {
        self.teams.reset();
        self.formation = None;
        self.draft.clear();
        tracing::info!(room_id = %self.room_id, "captain left, team formation reset");
        self.enter(RoomStatus::LeaderElection, now);
    }

    fn complete_draft_if_done(&mut self, now: Timestamp) {
        let active = self.ledger.active_ids();
        if self.status == RoomStatus::RoleSelection && self.draft.everyone_claimed(active.iter()) {
            self.enter(RoomStatus::InProgress, now);
        }
    }

    fn complete_bracket_if_done(&mut self, now: Timestamp) {
        let done = self.bracket.as_ref().is_some_and(Bracket::is_completed);
        if self.status == RoomStatus::TournamentBracket && done {
            self.enter(RoomStatus::Completed, now);
        }
    }

    fn require_leader(&self, user: UserId) -> Result<(), RoomError> {
        self.ledger.active_member(user)?;
        if self.ledger.is_leader(user) {
            Ok(())
        } else {
            Err(Denied::NotLeader.into())
        }
    }

    fn require_members(&self, minimum: usize) -> Result<(), RoomError> {
        if self.ledger.active_count() >= minimum {
            Ok(())
        } else {
            Err(self.phase_error(Requirement::MinimumMembers(minimum)).into())
        }
    }

    fn phase_error(&self, required: Requirement) -> PhaseError {
        PhaseError {
            required,
            actual: self.status,
        }
    }

    fn auction(&mut self) -> Result<(&mut AuctionEngine, &mut TeamBoard), RoomError> {
        let status = self.status;
        match &mut self.formation {
            Some(Formation::Auction(engine)) => Ok((engine, &mut self.teams)),
            _ => Err(wrong_mode(TeamFormationMode::Auction, status).into()),
        }
    }

    #[cfg(test)]
    pub(crate) fn rps(&self) -> Option<&crate::RpsEngine> {
        match &self.formation {
            Some(Formation::Rps(engine)) => Some(engine),
            _ => None,
        }
    }
}

fn wrong_mode(mode: TeamFormationMode, actual: RoomStatus) -> PhaseError {
    PhaseError {
        required: Requirement::Formation(mode),
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_protocol::{FormationView, RoleScope};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const HOST: UserId = UserId(1);

    struct Harness {
        room: RoomAggregate,
        rng: StdRng,
        config: LobbyConfig,
        now: Timestamp,
    }

    impl Harness {
        fn new(settings: RoomSettings) -> Self {
            Self {
                room: RoomAggregate::open(RoomId(1), HOST, "host".into(), settings, Timestamp(0))
                    .unwrap(),
                rng: StdRng::seed_from_u64(7),
                config: LobbyConfig::default(),
                now: Timestamp(0),
            }
        }

        fn with_capacity(capacity: usize, mode: TeamFormationMode) -> Self {
            Self::new(RoomSettings {
                capacity,
                mode,
                role_scope: RoleScope::Team,
                ..RoomSettings::default()
            })
        }

        fn run<T>(
            &mut self,
            op: impl FnOnce(&mut RoomAggregate, &mut ActionContext<'_>) -> T,
        ) -> T {
            self.now = Timestamp(self.now.0 + 1);
            let mut ctx = ActionContext {
                now: self.now,
                rng: &mut self.rng,
                config: &self.config,
            };
            op(&mut self.room, &mut ctx)
        }

        fn join(&mut self, id: u64) {
            self.run(|r, ctx| r.join(ctx, UserId(id), format!("p{id}"), None))
                .unwrap();
        }

        fn fill(&mut self, up_to: u64) {
            for id in 2..=up_to {
                self.join(id);
            }
        }

        /// Recruiting → team formation with captains 1 and 2.
        fn to_team_formation(&mut self) {
            self.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection))
                .unwrap();
            self.run(|r, ctx| r.appoint_captain(ctx, HOST, TeamId(1), UserId(1)))
                .unwrap();
            self.run(|r, ctx| r.appoint_captain(ctx, HOST, TeamId(2), UserId(2)))
                .unwrap();
            self.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::TeamFormation))
                .unwrap();
        }
    }

    fn exactly_one_leader(room: &RoomAggregate) -> bool {
        let snapshot = room.snapshot();
        let leaders = snapshot
            .members
            .iter()
            .filter(|m| m.capacity == Capacity::Leader)
            .count();
        leaders == 1 || snapshot.members.is_empty()
    }

    #[test]
    fn test_open_validates_settings() {
        let result = RoomAggregate::open(
            RoomId(1),
            HOST,
            "host".into(),
            RoomSettings {
                capacity: 1,
                ..RoomSettings::default()
            },
            Timestamp(0),
        );
        assert!(matches!(result, Err(RoomError::Validation(_))));
    }

    #[test]
    fn test_join_rules() {
        let mut h = Harness::new(RoomSettings {
            capacity: 2,
            secret: Some("hunter2".into()),
            ..RoomSettings::default()
        });

        let wrong = h.run(|r, ctx| r.join(ctx, UserId(2), "p2".into(), Some("nope")));
        assert!(matches!(wrong, Err(RoomError::Forbidden(Denied::WrongSecret))));

        h.run(|r, ctx| r.join(ctx, UserId(2), "p2".into(), Some("hunter2")))
            .unwrap();
        let again = h.run(|r, ctx| r.join(ctx, UserId(2), "p2".into(), Some("hunter2")));
        assert!(matches!(again, Err(RoomError::Conflict(Conflict::AlreadyMember))));

        let full = h.run(|r, ctx| r.join(ctx, UserId(3), "p3".into(), Some("hunter2")));
        assert!(matches!(full, Err(RoomError::Conflict(Conflict::Full))));
    }

    #[test]
    fn test_join_after_recruiting_is_wrong_phase() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.join(2);
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection))
            .unwrap();
        let late = h.run(|r, ctx| r.join(ctx, UserId(3), "p3".into(), None));
        assert!(matches!(late, Err(RoomError::WrongPhase(_))));
    }

    #[test]
    fn test_spectators_do_not_use_capacity() {
        let mut h = Harness::new(RoomSettings {
            capacity: 2,
            allow_spectators: true,
            ..RoomSettings::default()
        });
        h.run(|r, ctx| r.spectate(ctx, UserId(9), "watcher".into()))
            .unwrap();
        h.join(2);
        assert_eq!(h.room.active_count(), 2);
        assert_eq!(h.room.snapshot().members.len(), 3);
    }

    #[test]
    fn test_spectate_requires_opt_in() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        let result = h.run(|r, ctx| r.spectate(ctx, UserId(9), "watcher".into()));
        assert!(matches!(
            result,
            Err(RoomError::Forbidden(Denied::SpectatorsDisabled))
        ));
    }

    #[test]
    fn test_leader_succession_picks_earliest_joiner() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.fill(3);

        let outcome = h.run(|r, ctx| r.leave(ctx, HOST)).unwrap();
        assert_eq!(outcome.new_leader, Some(UserId(2)));
        assert!(!outcome.room_destroyed);
        assert_eq!(h.room.leader(), Some(UserId(2)));
        assert!(exactly_one_leader(&h.room));
    }

    #[test]
    fn test_last_leave_destroys_room() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.room.take_outbox();
        let outcome = h.run(|r, ctx| r.leave(ctx, HOST)).unwrap();
        assert!(outcome.room_destroyed);
        assert!(h.room.is_destroyed());
        assert!(exactly_one_leader(&h.room));

        let outbox = h.room.take_outbox();
        assert!(outbox
            .iter()
            .all(|p| matches!(p.event, ServerEvent::RoomDeleted { .. })));
        assert!(!h.run(|r, ctx| r.destroy(ctx)));
    }

    #[test]
    fn test_lonely_since_tracks_solo_leader() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        assert_eq!(h.room.lonely_since(), Some(Timestamp(0)));
        h.join(2);
        assert_eq!(h.room.lonely_since(), None);
        h.run(|r, ctx| r.leave(ctx, UserId(2))).unwrap();
        assert!(h.room.lonely_since().is_some());
    }

    #[test]
    fn test_claim_role_while_recruiting_changes_nothing() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.join(2);
        h.room.take_outbox();
        let before = h.room.snapshot();

        let result = h.run(|r, ctx| r.claim_role(ctx, HOST, "mid"));

        assert!(matches!(result, Err(RoomError::WrongPhase(_))));
        assert_eq!(h.room.snapshot(), before);
        assert!(h.room.take_outbox().is_empty());
    }

    #[test]
    fn test_only_leader_advances() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.join(2);
        let result = h.run(|r, ctx| r.advance_phase(ctx, UserId(2), RoomStatus::LeaderElection));
        assert!(matches!(result, Err(RoomError::Forbidden(Denied::NotLeader))));
    }

    #[test]
    fn test_skipping_phases_is_rejected() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.join(2);
        let result = h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::RoleSelection));
        let Err(RoomError::WrongPhase(err)) = result else {
            panic!("expected a phase error");
        };
        assert_eq!(err.actual, RoomStatus::Recruiting);
        assert_eq!(err.required, Requirement::Transition { to: RoomStatus::RoleSelection });
        assert_eq!(h.room.status(), RoomStatus::Recruiting);
    }

    #[test]
    fn test_leader_election_needs_two_members() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        let result = h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection));
        let Err(RoomError::WrongPhase(err)) = result else {
            panic!("expected a phase error");
        };
        assert_eq!(err.required, Requirement::MinimumMembers(2));
    }

    #[test]
    fn test_leader_election_needs_a_member_per_team() {
        let mut h = Harness::new(RoomSettings {
            capacity: 5,
            team_count: 3,
            ..RoomSettings::default()
        });
        h.fill(2);
        let result = h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection));
        let Err(RoomError::WrongPhase(err)) = result else {
            panic!("expected a phase error");
        };
        assert_eq!(err.required, Requirement::MinimumMembers(3));

        h.join(3);
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection))
            .unwrap();
    }

    #[test]
    fn test_short_handed_leader_election_returns_to_recruiting() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.fill(2);
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection))
            .unwrap();
        h.run(|r, ctx| r.appoint_captain(ctx, HOST, TeamId(1), HOST))
            .unwrap();

        h.run(|r, ctx| r.leave(ctx, UserId(2))).unwrap();

        assert_eq!(h.room.status(), RoomStatus::Recruiting);
        assert_eq!(h.room.teams().captain_of(TeamId(1)), None);
        assert_eq!(h.room.lonely_since(), Some(h.now));

        h.join(2);
        assert_eq!(h.room.lonely_since(), None);
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection))
            .unwrap();
    }

    #[test]
    fn test_short_handed_team_formation_returns_to_recruiting() {
        let mut h = Harness::new(RoomSettings {
            capacity: 5,
            team_count: 3,
            ..RoomSettings::default()
        });
        h.fill(3);
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection))
            .unwrap();
        for id in 1..=3 {
            h.run(|r, ctx| r.appoint_captain(ctx, HOST, TeamId(id as u8), UserId(id)))
                .unwrap();
        }
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::TeamFormation))
            .unwrap();

        h.run(|r, ctx| r.leave(ctx, UserId(3))).unwrap();

        assert_eq!(h.room.status(), RoomStatus::Recruiting);
        assert!(h.room.snapshot().formation.is_none());
        assert!(!h.room.teams().is_assigned(HOST));
        assert_eq!(h.room.teams().captain_of(TeamId(2)), None);
        assert_eq!(h.room.lonely_since(), None);
        h.join(4);
        assert_eq!(h.room.active_count(), 3);
    }

    #[test]
    fn test_team_formation_needs_a_captain_per_team() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.fill(4);
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection))
            .unwrap();
        h.run(|r, ctx| r.appoint_captain(ctx, HOST, TeamId(1), UserId(3)))
            .unwrap();
        let result = h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::TeamFormation));
        let Err(RoomError::WrongPhase(err)) = result else {
            panic!("expected a phase error");
        };
        assert_eq!(err.required, Requirement::CaptainPerTeam);
    }

    #[test]
    fn test_free_join_flow_to_in_progress() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.fill(4);
        h.to_team_formation();

        let snapshot = h.room.snapshot();
        assert!(matches!(
            snapshot.formation,
            Some(FormationView::Free { slot_limit: 2, .. })
        ));
        assert_eq!(snapshot.member(UserId(1)).unwrap().team, Some(TeamId(1)));

        let early = h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::RoleSelection));
        assert!(matches!(early, Err(RoomError::WrongPhase(_))));

        h.run(|r, ctx| r.choose_team(ctx, UserId(3), TeamId(1))).unwrap();
        let full = h.run(|r, ctx| r.choose_team(ctx, UserId(4), TeamId(1)));
        assert!(matches!(full, Err(RoomError::Conflict(Conflict::TeamFull(_)))));
        h.run(|r, ctx| r.choose_team(ctx, UserId(4), TeamId(2))).unwrap();

        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::RoleSelection))
            .unwrap();
        h.run(|r, ctx| r.claim_role(ctx, UserId(1), "mid")).unwrap();
        h.run(|r, ctx| r.claim_role(ctx, UserId(2), "mid")).unwrap();
        h.run(|r, ctx| r.claim_role(ctx, UserId(3), "top")).unwrap();
        let unknown = h.run(|r, ctx| r.claim_role(ctx, UserId(4), "feeder"));
        assert!(matches!(unknown, Err(RoomError::Validation(_))));
        h.run(|r, ctx| r.claim_role(ctx, UserId(4), "support")).unwrap();

        assert_eq!(h.room.status(), RoomStatus::InProgress);
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::Completed))
            .unwrap();
        assert!(h.room.completed_at().is_some());
    }

    #[test]
    fn test_leader_offers_free_join_teams() {
        let mut h = Harness::new(RoomSettings {
            capacity: 5,
            team_count: 3,
            ..RoomSettings::default()
        });
        h.fill(5);
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::LeaderElection))
            .unwrap();
        for id in 1..=3 {
            h.run(|r, ctx| r.appoint_captain(ctx, HOST, TeamId(id as u8), UserId(id)))
                .unwrap();
        }
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::TeamFormation))
            .unwrap();

        let denied = h.run(|r, ctx| r.offer_teams(ctx, UserId(2), &[TeamId(2)]));
        assert!(matches!(denied, Err(RoomError::Forbidden(Denied::NotLeader))));
        // Team 3 has one free seat and two members still need a team.
        let short = h.run(|r, ctx| r.offer_teams(ctx, HOST, &[TeamId(3)]));
        assert!(matches!(short, Err(RoomError::Validation(_))));

        h.run(|r, ctx| r.offer_teams(ctx, HOST, &[TeamId(2), TeamId(3)]))
            .unwrap();
        assert!(matches!(
            h.room.snapshot().formation,
            Some(FormationView::Free { ref offered, .. }) if offered == &[TeamId(2), TeamId(3)]
        ));
        let refused = h.run(|r, ctx| r.choose_team(ctx, UserId(4), TeamId(1)));
        assert!(matches!(refused, Err(RoomError::Validation(_))));
        h.run(|r, ctx| r.choose_team(ctx, UserId(4), TeamId(2))).unwrap();
        h.run(|r, ctx| r.choose_team(ctx, UserId(5), TeamId(3))).unwrap();
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::RoleSelection))
            .unwrap();
    }

    #[test]
    fn test_auction_flow_and_tie_break() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Auction);
        h.fill(4);
        h.to_team_formation();

        h.run(|r, ctx| r.nominate(ctx, HOST, UserId(3))).unwrap();
        let first = h.run(|r, ctx| r.submit_bid(ctx, UserId(2), UserId(3), 100)).unwrap();
        h.run(|r, ctx| r.submit_bid(ctx, UserId(1), UserId(3), 100)).unwrap();
        assert!(first.sequence < 2);

        let not_captain = h.run(|r, ctx| r.submit_bid(ctx, UserId(4), UserId(3), 50));
        assert!(matches!(not_captain, Err(RoomError::Forbidden(Denied::NotCaptain))));

        h.run(|r, ctx| r.close_bidding(ctx, HOST)).unwrap();
        assert_eq!(h.room.teams().team_of(UserId(3)), Some(TeamId(2)));

        let late = h.run(|r, ctx| r.submit_bid(ctx, UserId(1), UserId(3), 200));
        assert!(matches!(late, Err(RoomError::Conflict(Conflict::AuctionClosed))));
    }

    #[test]
    fn test_auction_deadline_expiry_assigns_nominee() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Auction);
        h.fill(4);
        h.to_team_formation();
        let deadline = h.run(|r, ctx| r.nominate(ctx, HOST, UserId(4))).unwrap();
        assert_eq!(h.room.next_deadline(), Some(deadline));

        h.now = deadline;
        assert!(h.room.has_due_deadline(h.now));
        assert!(h.run(|r, ctx| r.expire_deadlines(ctx)));
        assert!(h.room.teams().is_assigned(UserId(4)));
        assert_eq!(h.room.next_deadline(), None);
    }

    #[test]
    fn test_rps_flow_settles_everyone() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::RockPaperScissors);
        h.fill(4);
        h.to_team_formation();
        assert_eq!(h.room.rps().unwrap().unresolved(), &[UserId(3), UserId(4)]);

        let spectator = h.run(|r, ctx| r.submit_choice(ctx, UserId(9), Hand::Rock));
        assert!(matches!(spectator, Err(RoomError::NotFound(_))));

        h.run(|r, ctx| r.submit_choice(ctx, UserId(3), Hand::Paper)).unwrap();
        h.run(|r, ctx| r.submit_choice(ctx, UserId(4), Hand::Rock)).unwrap();

        assert_eq!(h.room.teams().team_of(UserId(3)), Some(TeamId(1)));
        assert_eq!(h.room.teams().team_of(UserId(4)), Some(TeamId(2)));
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::RoleSelection))
            .unwrap();
    }

    #[test]
    fn test_wrong_mode_action_is_wrong_phase() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.fill(4);
        h.to_team_formation();
        let result = h.run(|r, ctx| r.nominate(ctx, HOST, UserId(3)));
        let Err(RoomError::WrongPhase(err)) = result else {
            panic!("expected a phase error");
        };
        assert_eq!(err.required, Requirement::Formation(TeamFormationMode::Auction));
    }

    #[test]
    fn test_captain_leaving_resets_to_leader_election() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.fill(4);
        h.to_team_formation();
        h.run(|r, ctx| r.choose_team(ctx, UserId(3), TeamId(1))).unwrap();

        h.run(|r, ctx| r.leave(ctx, UserId(2))).unwrap();

        assert_eq!(h.room.status(), RoomStatus::LeaderElection);
        assert!(!h.room.teams().is_assigned(UserId(3)));
        assert_eq!(h.room.teams().captain_of(TeamId(1)), Some(HOST));
        assert_eq!(h.room.teams().captain_of(TeamId(2)), None);
    }

    #[test]
    fn test_leaving_completes_role_draft() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.fill(4);
        h.to_team_formation();
        h.run(|r, ctx| r.choose_team(ctx, UserId(3), TeamId(1))).unwrap();
        h.run(|r, ctx| r.choose_team(ctx, UserId(4), TeamId(2))).unwrap();
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::RoleSelection))
            .unwrap();
        h.run(|r, ctx| r.claim_role(ctx, UserId(1), "top")).unwrap();
        h.run(|r, ctx| r.claim_role(ctx, UserId(2), "top")).unwrap();
        h.run(|r, ctx| r.claim_role(ctx, UserId(3), "mid")).unwrap();

        h.run(|r, ctx| r.leave(ctx, UserId(4))).unwrap();
        assert_eq!(h.room.status(), RoomStatus::InProgress);
    }

    #[test]
    fn test_bracket_flow_completes_room() {
        let mut h = Harness::with_capacity(5, TeamFormationMode::Free);
        h.fill(5);
        h.run(|r, ctx| r.create_bracket(ctx, HOST, None)).unwrap();
        assert_eq!(h.room.status(), RoomStatus::TournamentBracket);

        let mut reports = 0;
        loop {
            let pending = h.room.bracket().unwrap().pending();
            let Some(&id) = pending.first() else { break };
            let view = h.room.snapshot().bracket.unwrap();
            let m = view.matches.iter().find(|m| m.match_id == id).unwrap().clone();
            let outcome = h
                .run(|r, ctx| r.report_result(ctx, m.player2, id, m.player2))
                .unwrap();
            reports += 1;
            if outcome.bracket_complete {
                break;
            }
        }
        assert_eq!(reports, 4);
        assert_eq!(h.room.status(), RoomStatus::Completed);
    }

    #[test]
    fn test_bracket_forfeit_on_leave() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Free);
        h.join(2);
        h.run(|r, ctx| r.advance_phase(ctx, HOST, RoomStatus::TournamentBracket))
            .unwrap();
        h.run(|r, ctx| r.leave(ctx, UserId(2))).unwrap();
        assert_eq!(h.room.status(), RoomStatus::Completed);
        assert_eq!(h.room.bracket().unwrap().champion(), Some(HOST));
    }

    #[test]
    fn test_bid_publishes_to_room_and_target() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::Auction);
        h.fill(4);
        h.to_team_formation();
        h.run(|r, ctx| r.nominate(ctx, HOST, UserId(3))).unwrap();
        h.room.take_outbox();

        h.run(|r, ctx| r.submit_bid(ctx, UserId(1), UserId(3), 10)).unwrap();
        let topics: Vec<_> = h.room.take_outbox().into_iter().map(|p| p.topic).collect();
        assert_eq!(
            topics,
            vec![
                crate::Topic::User(UserId(3)),
                crate::Topic::Room(RoomId(1)),
                crate::Topic::Room(RoomId(1)),
            ]
        );
    }

    #[test]
    fn test_aggregate_round_trips_through_json() {
        let mut h = Harness::with_capacity(4, TeamFormationMode::RockPaperScissors);
        h.fill(4);
        h.to_team_formation();
        let json = serde_json::to_string(&h.room).unwrap();
        let restored: RoomAggregate = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.snapshot(), h.room.snapshot());
    }
}
