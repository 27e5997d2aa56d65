use std::{fs, io, path::Path, time::Duration};

use jukebox_core::{DEFAULT_NICKNAME, PayloadOrder};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::gate::{Backoff, RetryPolicy};
use crate::runtime::ReconnectPolicy;

/// `config.json` is expected to be tiny; anything larger is refused.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
pub const DEFAULT_NOW_PLAYING_INTERVAL: Duration = Duration::from_secs(5);

/// Every field is optional so the same shape serves both the config file and
/// command-line overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SavedConfig {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub retry_initial_ms: Option<u64>,
    #[serde(default)]
    pub retry_step_ms: Option<u64>,
    #[serde(default)]
    pub retry_max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_backoff: Option<Backoff>,
    #[serde(default)]
    pub reconnect: Option<ReconnectPolicy>,
    #[serde(default)]
    pub now_playing_secs: Option<u64>,
    #[serde(default)]
    pub payload_order: Option<PayloadOrder>,
}

impl SavedConfig {
    /// Field-wise merge where values set in `overrides` win.
    pub fn overlay(self, overrides: SavedConfig) -> SavedConfig {
        SavedConfig {
            server_url: overrides.server_url.or(self.server_url),
            nickname: overrides.nickname.or(self.nickname),
            retry_initial_ms: overrides.retry_initial_ms.or(self.retry_initial_ms),
            retry_step_ms: overrides.retry_step_ms.or(self.retry_step_ms),
            retry_max_attempts: overrides.retry_max_attempts.or(self.retry_max_attempts),
            retry_backoff: overrides.retry_backoff.or(self.retry_backoff),
            reconnect: overrides.reconnect.or(self.reconnect),
            now_playing_secs: overrides.now_playing_secs.or(self.now_playing_secs),
            payload_order: overrides.payload_order.or(self.payload_order),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub nickname: String,
    pub retry: RetryPolicy,
    pub reconnect: ReconnectPolicy,
    pub now_playing_interval: Duration,
    pub payload_order: PayloadOrder,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            nickname: DEFAULT_NICKNAME.to_owned(),
            retry: RetryPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            now_playing_interval: DEFAULT_NOW_PLAYING_INTERVAL,
            payload_order: PayloadOrder::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_saved(saved: SavedConfig) -> Result<Self, ConfigError> {
        let defaults = ClientConfig::default();

        let server_url = saved.server_url.unwrap_or(defaults.server_url);
        validate_server_url(&server_url)?;

        let nickname = match saved.nickname {
            Some(nick) if nick.trim().is_empty() => return Err(ConfigError::EmptyNickname),
            Some(nick) => nick.trim().to_owned(),
            None => defaults.nickname,
        };

        let now_playing_interval = match saved.now_playing_secs {
            Some(0) => return Err(ConfigError::ZeroInterval),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.now_playing_interval,
        };

        let retry = RetryPolicy {
            initial_delay: saved
                .retry_initial_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.initial_delay),
            step: saved
                .retry_step_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.step),
            max_attempts: saved
                .retry_max_attempts
                .unwrap_or(defaults.retry.max_attempts),
            backoff: saved.retry_backoff.unwrap_or(defaults.retry.backoff),
        };

        Ok(Self {
            server_url,
            nickname,
            retry,
            reconnect: saved.reconnect.unwrap_or(defaults.reconnect),
            now_playing_interval,
            payload_order: saved.payload_order.unwrap_or(defaults.payload_order),
        })
    }
}

pub fn validate_server_url(server_url: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(server_url).map_err(|err| ConfigError::InvalidUrl {
        url: server_url.to_owned(),
        reason: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_owned())),
    }
}

#[derive(Debug)]
pub enum ConfigLoadError {
    Metadata(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::Metadata(e) => write!(f, "metadata read failed: {e}"),
            ConfigLoadError::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            ConfigLoadError::Read(e) => write!(f, "read failed: {e}"),
            ConfigLoadError::Parse(e) => write!(f, "parse failed: {e}"),
        }
    }
}

impl std::error::Error for ConfigLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigLoadError::Metadata(e) => Some(e),
            ConfigLoadError::Read(e) => Some(e),
            ConfigLoadError::Parse(e) => Some(e),
            ConfigLoadError::TooLarge { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Load(ConfigLoadError),
    InvalidUrl { url: String, reason: String },
    UnsupportedScheme(String),
    EmptyNickname,
    ZeroInterval,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(e) => write!(f, "config file: {e}"),
            ConfigError::InvalidUrl { url, reason } => {
                write!(f, "invalid server URL {url:?}: {reason}")
            }
            ConfigError::UnsupportedScheme(scheme) => {
                write!(f, "server URL scheme must be ws or wss, got {scheme:?}")
            }
            ConfigError::EmptyNickname => write!(f, "nickname must not be empty"),
            ConfigError::ZeroInterval => write!(f, "now playing interval must be at least 1s"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Load(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigLoadError> for ConfigError {
    fn from(err: ConfigLoadError) -> Self {
        ConfigError::Load(err)
    }
}

pub fn parse_config_json(data: &str) -> Result<SavedConfig, serde_json::Error> {
    serde_json::from_str::<SavedConfig>(data)
}

pub fn load_config_from_path(path: &Path) -> Result<SavedConfig, ConfigLoadError> {
    let meta = fs::metadata(path).map_err(ConfigLoadError::Metadata)?;
    if meta.len() > MAX_CONFIG_BYTES {
        return Err(ConfigLoadError::TooLarge {
            size: meta.len(),
            max: MAX_CONFIG_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(ConfigLoadError::Read)?;
    parse_config_json(&data).map_err(ConfigLoadError::Parse)
}

/// Loads `path` when given, layers `overrides` on top and validates the
/// result.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: SavedConfig,
) -> Result<ClientConfig, ConfigError> {
    let saved = match path {
        Some(path) => load_config_from_path(path)?,
        None => SavedConfig::default(),
    };
    ClientConfig::from_saved(saved.overlay(overrides))
}
