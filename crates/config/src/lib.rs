//! Fleet configuration: a single hierarchical TOML document loaded at
//! startup, with environment variable overrides for secrets.
//!
//! Shared by `supervisor`, `hub` and `bot` so the three processes always
//! agree on socket paths, timeouts and the channel list.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level fleet configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub features: std::collections::HashMap<String, bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitchConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// The user id of the fleet's shared bot account. Its token authorizes
    /// the Hub's EventSub connection (and therefore subscription creation)
    /// and the chat transport in every bot process — one moderator-scoped
    /// account serving every configured channel, rather than one account
    /// per channel.
    #[serde(default)]
    pub bot_user_id: String,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            bot_user_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: f64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            rate_limit_per_sec: default_rate_limit_per_sec(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("KISSBOT_RUNTIME_DIR") {
        return PathBuf::from(dir).join("hub.sock");
    }
    PathBuf::from("/tmp/kissbot_hub.sock")
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

fn default_rate_limit_per_sec() -> f64 {
    2.0
}

fn default_jitter_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_irc_send_secs")]
    pub irc_send_secs: u64,
    #[serde(default = "default_rest_request_secs")]
    pub rest_request_secs: u64,
    #[serde(default = "default_refresh_margin_mins")]
    pub refresh_margin_mins: i64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            irc_send_secs: default_irc_send_secs(),
            rest_request_secs: default_rest_request_secs(),
            refresh_margin_mins: default_refresh_margin_mins(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            health_interval_secs: default_health_interval_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
        }
    }
}

fn default_irc_send_secs() -> u64 {
    5
}
fn default_rest_request_secs() -> u64 {
    10
}
fn default_refresh_margin_mins() -> i64 {
    10
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_health_interval_secs() -> u64 {
    30
}
fn default_keepalive_interval_secs() -> u64 {
    120
}

impl Timeouts {
    pub fn irc_send(&self) -> Duration {
        Duration::from_secs(self.irc_send_secs)
    }
    pub fn rest_request(&self) -> Duration {
        Duration::from_secs(self.rest_request_secs)
    }
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            key_path: default_key_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    data_dir().join("fleet.db")
}

fn default_key_path() -> PathBuf {
    data_dir().join("fleet.key")
}

fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("KISSBOT_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs_home().join(".kissbot")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            twitch: TwitchConfig::default(),
            channels: Vec::new(),
            hub: HubConfig::default(),
            timeouts: Timeouts::default(),
            store: StoreConfig::default(),
            features: std::collections::HashMap::new(),
        }
    }
}

impl FleetConfig {
    /// Load `.env` (if present), then the TOML document at `path`, then
    /// apply environment variable overrides for the Twitch credentials
    /// (so secrets never need to live in the checked-in config file).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        load_dotenv();

        let path = path.as_ref();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)?
        } else {
            tracing::info!(
                path = %path.display(),
                "No fleet config file found, using defaults"
            );
            FleetConfig::default()
        };

        if let Ok(v) = std::env::var("TWITCH_CLIENT_ID") {
            config.twitch.client_id = v;
        }
        if let Ok(v) = std::env::var("TWITCH_CLIENT_SECRET") {
            config.twitch.client_secret = v;
        }

        Ok(config)
    }

    /// Opaque per-feature flag lookup; the core treats these as inert.
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

fn load_dotenv() {
    let candidates = [".env", "../.env", "../../.env"];
    for path in &candidates {
        if dotenvy::from_filename(path).is_ok() {
            tracing::info!("Loaded .env from: {path}");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = FleetConfig::default();
        assert_eq!(config.hub.reconcile_interval_secs, 60);
        assert_eq!(config.hub.rate_limit_per_sec, 2.0);
        assert!(config.channels.is_empty());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml_text = r#"
            channels = ["chan_a", "chan_b"]

            [twitch]
            client_id = "abc"

            [hub]
            reconcile_interval_secs = 30
        "#;
        let config: FleetConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.channels, vec!["chan_a", "chan_b"]);
        assert_eq!(config.twitch.client_id, "abc");
        assert_eq!(config.hub.reconcile_interval_secs, 30);
        assert_eq!(config.hub.rate_limit_per_sec, 2.0);
    }

    #[test]
    fn feature_flags_are_opaque() {
        let mut config = FleetConfig::default();
        config.features.insert("llm_chat".into(), true);
        assert!(config.feature_enabled("llm_chat"));
        assert!(!config.feature_enabled("translation"));
    }
}
