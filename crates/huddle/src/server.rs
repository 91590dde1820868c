//! `HuddleServer` builder and accept loop.
//!
//! Ties the layers together: transport → protocol → session → rooms. The
//! server also owns the background reaper and deadline sweeper, and stops
//! them together with the accept loop.

use std::future::Future;
use std::sync::Arc;

use huddle_protocol::{Codec, JsonCodec};
use huddle_room::{
    LobbyConfig, ReaperConfig, RoomManager, RoomStore, spawn_deadline_sweeper, spawn_reaper,
};
use huddle_session::{IdentityProvider, SessionManager};
use huddle_transport::WebSocketListener;
use tokio::sync::{Mutex, watch};

use crate::handler::handle_connection;
use crate::{HuddleError, ServerConfig};

/// Shared state handed to each connection task.
pub(crate) struct ServerState<P, S: RoomStore, C> {
    pub(crate) sessions: Mutex<SessionManager>,
    pub(crate) rooms: Arc<RoomManager<S>>,
    pub(crate) identity: P,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for a [`HuddleServer`].
///
/// ```rust,ignore
/// let server = HuddleServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(DevIdentityProvider, Arc::new(MemoryRoomStore::new()))
///     .await?;
/// server.run().await
/// ```
pub struct HuddleServerBuilder {
    config: ServerConfig,
}

impl HuddleServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration, e.g. with [`ServerConfig::from_env`].
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    pub fn lobby(mut self, lobby: LobbyConfig) -> Self {
        self.config.lobby = lobby;
        self
    }

    pub fn reaper(mut self, reaper: ReaperConfig) -> Self {
        self.config.reaper = reaper;
        self
    }

    /// Binds the listener and restores any rooms already in `store`.
    ///
    /// Frames are JSON-encoded over WebSocket.
    pub async fn build<P, S>(
        self,
        identity: P,
        store: Arc<S>,
    ) -> Result<HuddleServer<P, S, JsonCodec>, HuddleError>
    where
        P: IdentityProvider,
        S: RoomStore,
    {
        let listener = WebSocketListener::bind(&self.config.bind).await?;
        let rooms = Arc::new(RoomManager::new(store, self.config.lobby.clone()));
        rooms.restore().await?;

        let state = Arc::new(ServerState {
            sessions: Mutex::new(SessionManager::new()),
            rooms,
            identity,
            codec: JsonCodec,
            config: self.config,
        });
        Ok(HuddleServer { listener, state })
    }
}

impl Default for HuddleServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Huddle server. Call [`run`](Self::run) to start serving.
pub struct HuddleServer<P, S: RoomStore, C> {
    listener: WebSocketListener,
    state: Arc<ServerState<P, S, C>>,
}

impl<P, S, C> HuddleServer<P, S, C>
where
    P: IdentityProvider,
    S: RoomStore,
    C: Codec,
{
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// The room engine behind this server.
    pub fn rooms(&self) -> &Arc<RoomManager<S>> {
        &self.state.rooms
    }

    /// Serves until the process is terminated.
    pub async fn run(self) -> Result<(), HuddleError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `signal` completes, then stops the background sweeps
    /// and tells every connection to close.
    pub async fn run_until(
        self,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), HuddleError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper_config = self.state.config.reaper.clone();
        let reaper = spawn_reaper(
            Arc::clone(&self.state.rooms),
            reaper_config.clone(),
            shutdown_rx.clone(),
        );
        let sweeper = spawn_deadline_sweeper(
            Arc::clone(&self.state.rooms),
            reaper_config,
            shutdown_rx.clone(),
        );

        tracing::info!(addr = ?self.local_addr().ok(), "huddle server running");
        tokio::pin!(signal);

        loop {
            tokio::select! {
                () = &mut signal => {
                    tracing::info!("shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(incoming) => {
                        let state = Arc::clone(&self.state);
                        let shutdown = shutdown_rx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(incoming, state, shutdown).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        let _ = shutdown_tx.send(true);
        let (reaper, sweeper) = tokio::join!(reaper, sweeper);
        if let Err(e) = reaper.and(sweeper) {
            tracing::warn!(error = %e, "background task ended abnormally");
        }
        tracing::info!("huddle server stopped");
        Ok(())
    }
}
