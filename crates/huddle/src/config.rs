//! Server configuration, from builder calls or the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use huddle_room::{LobbyConfig, ReaperConfig};

const BIND_ENV: &str = "HUDDLE_BIND";
const REAPER_INTERVAL_ENV: &str = "HUDDLE_REAPER_INTERVAL_SECS";
const RECRUITING_GRACE_ENV: &str = "HUDDLE_RECRUITING_GRACE_SECS";
const AUCTION_WINDOW_ENV: &str = "HUDDLE_AUCTION_WINDOW_SECS";
const RPS_ROUND_ENV: &str = "HUDDLE_RPS_ROUND_SECS";
const RPS_ROUND_CAP_ENV: &str = "HUDDLE_RPS_ROUND_CAP";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub lobby: LobbyConfig,
    pub reaper: ReaperConfig,
    /// A client must complete its handshake within this window.
    pub handshake_timeout: Duration,
    /// Connections silent for longer than this are dropped. Clients keep
    /// idle connections alive with heartbeats.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            lobby: LobbyConfig::default(),
            reaper: ReaperConfig::default(),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by any `HUDDLE_*` variables that are set.
    /// Malformed values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(bind) = lookup(BIND_ENV).filter(|b| !b.trim().is_empty()) {
            config.bind = bind.trim().to_string();
        }
        if let Some(secs) = parse(&lookup, REAPER_INTERVAL_ENV) {
            config.reaper.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, RECRUITING_GRACE_ENV) {
            config.reaper.recruiting_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, AUCTION_WINDOW_ENV) {
            config.lobby.auction_window = Duration::from_secs(secs);
        }
        if let Some(secs) = parse(&lookup, RPS_ROUND_ENV) {
            config.lobby.rps_round_window = Duration::from_secs(secs);
        }
        if let Some(cap) = parse(&lookup, RPS_ROUND_CAP_ENV) {
            config.lobby.rps_round_cap = cap;
        }
        tracing::info!(
            bind = %config.bind,
            reaper_interval = ?config.reaper.interval,
            auction_window = ?config.lobby.auction_window,
            rps_round_window = ?config.lobby.rps_round_window,
            "server configuration loaded"
        );
        config
    }
}

/// Reads `key` as a positive number. Zero, negative and unparsable values
/// fall back to the default.
fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring malformed setting; using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.bind, "127.0.0.1:8080");
        assert_eq!(config.lobby.rps_round_cap, 3);
        assert_eq!(config.reaper.interval, Duration::from_secs(30));
    }

    #[test]
    fn test_variables_override_defaults() {
        let config = config_from(&[
            ("HUDDLE_BIND", "0.0.0.0:9000"),
            ("HUDDLE_REAPER_INTERVAL_SECS", "5"),
            ("HUDDLE_RECRUITING_GRACE_SECS", "90"),
            ("HUDDLE_AUCTION_WINDOW_SECS", "15"),
            ("HUDDLE_RPS_ROUND_SECS", "8"),
            ("HUDDLE_RPS_ROUND_CAP", "5"),
        ]);
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.reaper.interval, Duration::from_secs(5));
        assert_eq!(config.reaper.recruiting_grace, Duration::from_secs(90));
        assert_eq!(config.lobby.auction_window, Duration::from_secs(15));
        assert_eq!(config.lobby.rps_round_window, Duration::from_secs(8));
        assert_eq!(config.lobby.rps_round_cap, 5);
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = config_from(&[
            ("HUDDLE_REAPER_INTERVAL_SECS", "soon"),
            ("HUDDLE_RPS_ROUND_CAP", "0"),
            ("HUDDLE_AUCTION_WINDOW_SECS", "-4"),
            ("HUDDLE_BIND", "   "),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.reaper.interval, defaults.reaper.interval);
        assert_eq!(config.lobby.rps_round_cap, defaults.lobby.rps_round_cap);
        assert_eq!(config.lobby.auction_window, defaults.lobby.auction_window);
        assert_eq!(config.bind, defaults.bind);
    }
}
