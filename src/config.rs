use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Largest number of URIs the Web API accepts in one add-tracks call.
pub const API_BATCH_CEILING: usize = 100;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    // Web player and internal API
    #[serde(default = "default_web_player_url")]
    pub web_player_url: String,
    #[serde(default = "default_internal_query_url")]
    pub internal_query_url: String,
    #[serde(default = "default_internal_query_path")]
    pub internal_query_path: String,
    #[serde(default = "default_fetch_playlist_operation")]
    pub fetch_playlist_operation: String,

    // Public Web API and authorization
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_auth_base")]
    pub auth_base: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    // Bridge timing
    #[serde(default = "default_capture_activation_delay")]
    pub capture_activation_delay_ms: u64,
    #[serde(default = "default_relay_settle_delay")]
    pub relay_settle_delay_ms: u64,
    #[serde(default = "default_relay_message_timeout")]
    pub relay_message_timeout_ms: u64,
    #[serde(default = "default_relayed_call_timeout")]
    pub relayed_call_timeout_ms: u64,

    // Paging and batching
    #[serde(default = "default_blend_page_limit")]
    pub blend_page_limit: u32,
    #[serde(default = "default_existing_tracks_page_size")]
    pub existing_tracks_page_size: u32,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blend-sync")
        .join("blend-sync.db")
}
fn default_log_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blend-sync")
        .join("logs")
}
fn default_web_player_url() -> String { "https://open.spotify.com/".into() }
fn default_internal_query_url() -> String { "https://api-partner.spotify.com/pathfinder/v2/query".into() }
fn default_internal_query_path() -> String { "/pathfinder/v2/query".into() }
fn default_fetch_playlist_operation() -> String { "fetchPlaylist".into() }
fn default_api_base() -> String { "https://api.spotify.com/v1".into() }
fn default_auth_base() -> String { "https://accounts.spotify.com".into() }
fn default_redirect_uri() -> String { "http://127.0.0.1:8888/callback".into() }
fn default_capture_activation_delay() -> u64 { 1000 }
fn default_relay_settle_delay() -> u64 { 100 }
fn default_relay_message_timeout() -> u64 { 5_000 }
fn default_relayed_call_timeout() -> u64 { 30_000 }
fn default_blend_page_limit() -> u32 { 100 }
fn default_existing_tracks_page_size() -> u32 { 50 }
fn default_max_batch_size() -> usize { API_BATCH_CEILING }

fn default_scopes() -> Vec<String> {
    vec![
        "playlist-read-private",
        "playlist-modify-public",
        "playlist-modify-private",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            web_player_url: default_web_player_url(),
            internal_query_url: default_internal_query_url(),
            internal_query_path: default_internal_query_path(),
            fetch_playlist_operation: default_fetch_playlist_operation(),
            api_base: default_api_base(),
            auth_base: default_auth_base(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            capture_activation_delay_ms: default_capture_activation_delay(),
            relay_settle_delay_ms: default_relay_settle_delay(),
            relay_message_timeout_ms: default_relay_message_timeout(),
            relayed_call_timeout_ms: default_relayed_call_timeout(),
            blend_page_limit: default_blend_page_limit(),
            existing_tracks_page_size: default_existing_tracks_page_size(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&s)?;
        Ok(cfg)
    }

    /// Default location of the config file: `$XDG_CONFIG_HOME/blend-sync/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("blend-sync").join("config.toml"))
    }

    /// Public Web API base; `SPOTIFY_API_BASE` overrides the file (useful for tests).
    pub fn api_base(&self) -> String {
        env::var("SPOTIFY_API_BASE").unwrap_or_else(|_| self.api_base.clone())
    }

    /// Accounts service base; `SPOTIFY_AUTH_BASE` overrides the file.
    pub fn auth_base(&self) -> String {
        env::var("SPOTIFY_AUTH_BASE").unwrap_or_else(|_| self.auth_base.clone())
    }

    pub fn capture_activation_delay(&self) -> Duration {
        Duration::from_millis(self.capture_activation_delay_ms)
    }

    pub fn relay_settle_delay(&self) -> Duration {
        Duration::from_millis(self.relay_settle_delay_ms)
    }

    pub fn relay_message_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_message_timeout_ms)
    }

    pub fn relayed_call_timeout(&self) -> Duration {
        Duration::from_millis(self.relayed_call_timeout_ms)
    }

    /// Configured batch size, never above what the API accepts and never zero.
    pub fn batch_size(&self) -> usize {
        self.max_batch_size.clamp(1, API_BATCH_CEILING)
    }
}
