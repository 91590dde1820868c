//! Per-connection handler: handshake, request dispatch and event push.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive `handshake` → check version → resolve the token to a user
//!   2. Open the session, subscribe to the user's personal topic, ack
//!   3. Loop: dispatch client frames to the room engine and push events
//!      from every subscribed topic
//!   4. On exit close the session; the user's last connection leaves
//!      every room they joined

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use huddle_protocol::{
    ClientEnvelope, ClientMessage, Codec, ErrorCode, PROTOCOL_VERSION, ProtocolError, Reply,
    RoomId, ServerEnvelope, ServerEvent, ServerMessage, UserId,
};
use huddle_room::{RoomError, RoomSettings, RoomStore, Topic};
use huddle_session::{ConnectionId as SessionConnection, Identity, IdentityProvider};
use huddle_transport::{Connection, Incoming, WebSocketConnection};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::HuddleError;
use crate::server::ServerState;

/// Events queued for one connection before topic forwarders wait.
const EVENT_BUFFER: usize = 256;

/// Closes the session when the handler exits, even on error or panic.
/// `Drop` is synchronous, so the async cleanup runs on a spawned task.
struct SessionGuard<P: IdentityProvider, S: RoomStore, C: Codec> {
    conn: SessionConnection,
    user_id: UserId,
    state: Arc<ServerState<P, S, C>>,
}

impl<P: IdentityProvider, S: RoomStore, C: Codec> Drop for SessionGuard<P, S, C> {
    fn drop(&mut self) {
        let (conn, user_id) = (self.conn, self.user_id);
        let state = Arc::clone(&self.state);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { close_session(&state, conn, user_id).await });
        }
    }
}

async fn close_session<P, S, C>(
    state: &ServerState<P, S, C>,
    conn: SessionConnection,
    user_id: UserId,
) where
    P: IdentityProvider,
    S: RoomStore,
    C: Codec,
{
    let closed = state.sessions.lock().await.close(conn, user_id);
    let rooms = match closed {
        Ok(Some(rooms)) => rooms,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!(%user_id, error = %e, "session already gone");
            return;
        }
    };
    for room_id in rooms {
        match state.rooms.leave(room_id, user_id).await {
            Ok(reply) => tracing::info!(
                %room_id,
                %user_id,
                room_destroyed = reply.outcome.room_destroyed,
                "left room on disconnect"
            ),
            Err(e) => tracing::debug!(%room_id, %user_id, error = %e, "leave on disconnect failed"),
        }
    }
}

/// Handles a single client from TCP accept to close.
pub(crate) async fn handle_connection<P, S, C>(
    incoming: Incoming,
    state: Arc<ServerState<P, S, C>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), HuddleError>
where
    P: IdentityProvider,
    S: RoomStore,
    C: Codec,
{
    let peer = incoming.peer_addr();
    let conn = match tokio::time::timeout(state.config.handshake_timeout, incoming.upgrade()).await
    {
        Ok(upgraded) => upgraded?,
        Err(_) => {
            tracing::debug!(%peer, "websocket upgrade timed out");
            return Ok(());
        }
    };
    let conn_id = conn.id();
    tracing::debug!(conn_id, %peer, "handling new connection");

    let (identity, handshake_seq) = receive_handshake(&conn, &state).await?;
    let user_id = identity.user_id;
    tracing::info!(conn_id, %user_id, "user authenticated");

    let session_conn = SessionConnection(conn_id);
    state.sessions.lock().await.open(session_conn, identity.clone());
    let _guard = SessionGuard {
        conn: session_conn,
        user_id,
        state: Arc::clone(&state),
    };

    let (events_tx, mut events_rx) = mpsc::channel(EVENT_BUFFER);
    let mut client = Client {
        conn: &conn,
        state: &state,
        identity,
        subscriptions: Subscriptions::new(events_tx),
        deletions: Deletions::default(),
    };
    client.subscribe(Topic::User(user_id));

    let ack = ServerMessage::HandshakeAck {
        user_id,
        display_name: client.identity.display_name.clone(),
        server_time: state.rooms.now(),
    };
    client.send(handshake_seq, ack).await?;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!(%user_id, "closing connection for shutdown");
                    break;
                }
            }
            Some((topic, event)) = events_rx.recv() => {
                client.push(topic, event).await?;
            }
            received = tokio::time::timeout(state.config.idle_timeout, conn.recv()) => {
                let data = match received {
                    Ok(Ok(Some(data))) => data,
                    Ok(Ok(None)) => {
                        tracing::info!(%user_id, "connection closed cleanly");
                        break;
                    }
                    Ok(Err(e)) if e.is_disconnect() => {
                        tracing::info!(%user_id, error = %e, "peer dropped");
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(%user_id, error = %e, "recv failed");
                        break;
                    }
                    Err(_) => {
                        tracing::info!(%user_id, "connection timed out");
                        break;
                    }
                };
                if !client.handle_frame(&data).await? {
                    break;
                }
            }
        }
    }

    let _ = conn.close().await;
    // _guard drops here → session close and room leaves fire.
    Ok(())
}

/// Reads the handshake. Returns the resolved identity and the frame's
/// `seq`, which the ack echoes.
async fn receive_handshake<P, S, C>(
    conn: &WebSocketConnection,
    state: &ServerState<P, S, C>,
) -> Result<(Identity, u64), HuddleError>
where
    P: IdentityProvider,
    S: RoomStore,
    C: Codec,
{
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return Err(invalid("connection closed before handshake")),
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(invalid("handshake timed out")),
    };

    let envelope: ClientEnvelope = match state.codec.decode(&data) {
        Ok(envelope) => envelope,
        Err(e) => {
            send_error(conn, state, 0, ErrorCode::BadRequest, "expected a handshake").await?;
            return Err(e.into());
        }
    };
    let seq = envelope.seq;
    let ClientMessage::Handshake { version, token } = envelope.payload else {
        send_error(conn, state, seq, ErrorCode::BadRequest, "expected a handshake").await?;
        return Err(invalid("first message must be a handshake"));
    };

    if version != PROTOCOL_VERSION {
        let message = format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}");
        send_error(conn, state, seq, ErrorCode::BadRequest, &message).await?;
        return Err(invalid("protocol version mismatch"));
    }

    match state.identity.resolve(&token).await {
        Ok(identity) => Ok((identity, seq)),
        Err(e) => {
            send_error(conn, state, seq, ErrorCode::Unauthorized, "unauthorized").await?;
            Err(e.into())
        }
    }
}

fn invalid(message: &str) -> HuddleError {
    ProtocolError::Violation(message.to_string()).into()
}

async fn send_frame<P, S, C>(
    conn: &WebSocketConnection,
    state: &ServerState<P, S, C>,
    seq: u64,
    payload: ServerMessage,
) -> Result<(), HuddleError>
where
    S: RoomStore,
    C: Codec,
{
    let envelope = ServerEnvelope {
        seq,
        timestamp: state.rooms.now().as_millis(),
        payload,
    };
    let bytes = state.codec.encode(&envelope)?;
    conn.send(&bytes).await?;
    Ok(())
}

async fn send_error<P, S, C>(
    conn: &WebSocketConnection,
    state: &ServerState<P, S, C>,
    seq: u64,
    code: ErrorCode,
    message: &str,
) -> Result<(), HuddleError>
where
    S: RoomStore,
    C: Codec,
{
    let payload = ServerMessage::Error {
        code,
        message: message.to_string(),
    };
    send_frame(conn, state, seq, payload).await
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// One forwarding task per subscribed topic, all feeding the connection's
/// event queue.
struct Subscriptions {
    events: mpsc::Sender<(Topic, ServerEvent)>,
    forwarders: HashMap<Topic, JoinHandle<()>>,
}

impl Subscriptions {
    fn new(events: mpsc::Sender<(Topic, ServerEvent)>) -> Self {
        Self {
            events,
            forwarders: HashMap::new(),
        }
    }

    fn contains(&self, topic: Topic) -> bool {
        self.forwarders.contains_key(&topic)
    }

    fn add(&mut self, topic: Topic, receiver: broadcast::Receiver<ServerEvent>) {
        let forwarder = tokio::spawn(forward(topic, receiver, self.events.clone()));
        if let Some(previous) = self.forwarders.insert(topic, forwarder) {
            previous.abort();
        }
    }

    fn remove(&mut self, topic: Topic) -> bool {
        match self.forwarders.remove(&topic) {
            Some(forwarder) => {
                forwarder.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for forwarder in self.forwarders.values() {
            forwarder.abort();
        }
    }
}

async fn forward(
    topic: Topic,
    mut receiver: broadcast::Receiver<ServerEvent>,
    events: mpsc::Sender<(Topic, ServerEvent)>,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if events.send((topic, event)).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(%topic, skipped, "subscriber lagged; events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Deletions pushed on one topic whose copy on the other topic is still
/// due. A member watching the room hears each deletion twice.
#[derive(Debug, Default)]
struct Deletions {
    awaiting: HashSet<RoomId>,
}

impl Deletions {
    fn expect_echo(&mut self, room_id: RoomId) {
        self.awaiting.insert(room_id);
    }

    /// True for the second copy, which also forgets the room.
    fn is_echo(&mut self, room_id: RoomId) -> bool {
        self.awaiting.remove(&room_id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.awaiting.len()
    }
}

// ---------------------------------------------------------------------------
// Authenticated client
// ---------------------------------------------------------------------------

struct Client<'a, P, S: RoomStore, C> {
    conn: &'a WebSocketConnection,
    state: &'a ServerState<P, S, C>,
    identity: Identity,
    subscriptions: Subscriptions,
    deletions: Deletions,
}

impl<P, S, C> Client<'_, P, S, C>
where
    P: IdentityProvider,
    S: RoomStore,
    C: Codec,
{
    async fn send(&self, seq: u64, payload: ServerMessage) -> Result<(), HuddleError> {
        send_frame(self.conn, self.state, seq, payload).await
    }

    fn subscribe(&mut self, topic: Topic) {
        if !self.subscriptions.contains(topic) {
            let receiver = self.state.rooms.subscribe(topic);
            self.subscriptions.add(topic, receiver);
        }
    }

    /// Pushes an event, skipping personal copies of what the room topic
    /// already delivers.
    async fn push(&mut self, topic: Topic, event: ServerEvent) -> Result<(), HuddleError> {
        let room_id = event.room_id();
        if let ServerEvent::RoomDeleted { .. } = event {
            if self.deletions.is_echo(room_id) {
                self.subscriptions.remove(Topic::Room(room_id));
                return Ok(());
            }
            let user_id = self.identity.user_id;
            let member = {
                let mut sessions = self.state.sessions.lock().await;
                let member = sessions
                    .get(&user_id)
                    .is_some_and(|session| session.rooms().any(|r| r == room_id));
                sessions.track_leave(user_id, room_id);
                member
            };
            let echo_expected = match topic {
                Topic::Room(_) => member,
                Topic::User(_) => self.subscriptions.contains(Topic::Room(room_id)),
            };
            if echo_expected {
                self.deletions.expect_echo(room_id);
            }
            if let Topic::Room(_) = topic {
                self.subscriptions.remove(Topic::Room(room_id));
            }
        } else if matches!(topic, Topic::User(_)) && self.subscriptions.contains(Topic::Room(room_id)) {
            return Ok(());
        }
        self.send(0, ServerMessage::Event(event)).await
    }

    /// Handles one client frame. Returns `false` when the client asked to
    /// disconnect.
    async fn handle_frame(&mut self, data: &[u8]) -> Result<bool, HuddleError> {
        let user_id = self.identity.user_id;
        let envelope: ClientEnvelope = match self.state.codec.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(%user_id, error = %e, "failed to decode frame");
                let message = format!("undecodable frame: {e}");
                let seq = self.state.codec.seq_hint(data);
                send_error(self.conn, self.state, seq, ErrorCode::BadRequest, &message).await?;
                return Ok(true);
            }
        };
        let seq = envelope.seq;

        match envelope.payload {
            ClientMessage::Handshake { .. } => {
                send_error(self.conn, self.state, seq, ErrorCode::BadRequest, "already handshaken")
                    .await?;
            }
            ClientMessage::Heartbeat { client_time } => {
                let ack = ServerMessage::HeartbeatAck {
                    client_time,
                    server_time: self.state.rooms.now(),
                };
                self.send(seq, ack).await?;
            }
            ClientMessage::Disconnect { reason } => {
                tracing::info!(%user_id, %reason, "client disconnected");
                return Ok(false);
            }
            request => match self.dispatch(request).await {
                Ok(reply) => self.send(seq, ServerMessage::Reply(reply)).await?,
                Err(e) => {
                    tracing::debug!(%user_id, error = %e, "request rejected");
                    send_error(self.conn, self.state, seq, e.code(), &e.to_string()).await?;
                }
            },
        }
        Ok(true)
    }

    /// Routes a room request to the engine.
    async fn dispatch(&mut self, request: ClientMessage) -> Result<Reply, RoomError> {
        let state = self.state;
        let rooms = &state.rooms;
        let user = self.identity.user_id;
        let name = self.identity.display_name.clone();

        let snapshot = match request {
            ClientMessage::ListRooms => {
                return Ok(Reply::Rooms {
                    rooms: rooms.list_rooms().await,
                });
            }
            ClientMessage::GetRoom { room_id } => rooms.snapshot(room_id).await?,
            ClientMessage::Subscribe { room_id } => {
                rooms.snapshot(room_id).await?;
                self.subscribe(Topic::Room(room_id));
                return Ok(Reply::Subscribed { room_id });
            }
            ClientMessage::Unsubscribe { room_id } => {
                self.subscriptions.remove(Topic::Room(room_id));
                return Ok(Reply::Unsubscribed { room_id });
            }

            ClientMessage::CreateRoom(request) => {
                let snapshot = rooms
                    .create_room(user, name, RoomSettings::from(request))
                    .await?;
                self.entered(snapshot.room_id).await;
                snapshot
            }
            ClientMessage::Join { room_id, secret } => {
                let snapshot = rooms.join(room_id, user, name, secret).await?;
                self.entered(room_id).await;
                snapshot
            }
            ClientMessage::Spectate { room_id } => {
                let snapshot = rooms.spectate(room_id, user, name).await?;
                self.entered(room_id).await;
                snapshot
            }
            ClientMessage::Leave { room_id } => {
                let reply = rooms.leave(room_id, user).await?;
                self.subscriptions.remove(Topic::Room(room_id));
                state.sessions.lock().await.track_leave(user, room_id);
                return Ok(Reply::Left {
                    room_id,
                    room_destroyed: reply.outcome.room_destroyed,
                    new_leader: reply.outcome.new_leader,
                    snapshot: reply.snapshot,
                });
            }
            ClientMessage::AdvancePhase { room_id, target } => {
                rooms.advance_phase(room_id, user, target).await?
            }

            ClientMessage::AppointCaptain {
                room_id,
                team,
                user_id,
            } => rooms.appoint_captain(room_id, user, team, user_id).await?,
            ClientMessage::ChooseTeam { room_id, team } => {
                rooms.choose_team(room_id, user, team).await?
            }
            ClientMessage::OfferTeams { room_id, teams } => {
                rooms.offer_teams(room_id, user, teams).await?
            }
            ClientMessage::Nominate { room_id, player } => {
                rooms.nominate(room_id, user, player).await?
            }
            ClientMessage::SubmitBid {
                room_id,
                target,
                amount,
            } => rooms.submit_bid(room_id, user, target, amount).await?.1,
            ClientMessage::CloseBidding { room_id } => rooms.close_bidding(room_id, user).await?,
            ClientMessage::SubmitChoice { room_id, hand } => {
                rooms.submit_choice(room_id, user, hand).await?
            }

            ClientMessage::ClaimRole { room_id, role } => {
                rooms.claim_role(room_id, user, role).await?
            }

            ClientMessage::CreateBracket {
                room_id,
                participants,
            } => rooms.create_bracket(room_id, user, participants).await?,
            ClientMessage::ReportMatchResult {
                room_id,
                match_id,
                winner,
            } => {
                let reply = rooms
                    .report_match_result(room_id, user, match_id, winner)
                    .await?;
                return Ok(Reply::MatchReported {
                    bracket_complete: reply.bracket_complete,
                    snapshot: reply.snapshot,
                });
            }

            ClientMessage::Handshake { .. }
            | ClientMessage::Heartbeat { .. }
            | ClientMessage::Disconnect { .. } => {
                return Err(RoomError::Validation("not a room request".into()));
            }
        };
        Ok(Reply::Room { snapshot })
    }

    /// Records membership and starts watching the room.
    async fn entered(&mut self, room_id: RoomId) {
        self.subscribe(Topic::Room(room_id));
        self.state
            .sessions
            .lock()
            .await
            .track_join(self.identity.user_id, room_id);
    }
}
