//! `huddle-server`: the Huddle lobby server with an in-memory room store.
//!
//! Configured through `HUDDLE_*` environment variables (see
//! [`ServerConfig::from_env`]) and `RUST_LOG`.

use std::sync::Arc;

use huddle::{HuddleError, HuddleServerBuilder, ServerConfig};
use huddle_room::MemoryRoomStore;
use huddle_session::DevIdentityProvider;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), HuddleError> {
    init_tracing();

    let server = HuddleServerBuilder::new()
        .config(ServerConfig::from_env())
        .build(DevIdentityProvider, Arc::new(MemoryRoomStore::new()))
        .await?;
    if let Ok(addr) = server.local_addr() {
        tracing::info!(%addr, "listening");
    }
    server.run_until(shutdown_signal()).await
}

fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
