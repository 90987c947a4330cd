//! TOML configuration.
//!
//! ```toml
//! [relay]
//! url = "ws://127.0.0.1:21213/?uniqueId={account}"
//!
//! [followers]
//! enabled = true
//! timeout_secs = 5
//!
//! [session]
//! stop_timeout_secs = 5
//!
//! [logging]
//! filter = "tiktok_live=info,tplive=info"
//! format = "text"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tiktok_live::followers::{DEFAULT_PROFILE_URL, DEFAULT_UA};
use tiktok_live::{
    ConnectionConfig, DisabledLookup, FollowerLookup, FollowerLookupConfig, HttpFollowerLookup,
    LiveProvider, ReconnectConfig, SessionConfig, create_relay_provider,
};
use url::Url;

use crate::cli::Args;

/// File name looked up inside the user config directory.
const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "tplive";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Relay WebSocket URL; no relay means live monitoring is unavailable
    pub url: Option<String>,
    pub heartbeat_secs: u64,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let reconnect = ReconnectConfig::default();
        Self {
            url: None,
            heartbeat_secs: 30,
            max_reconnect_attempts: reconnect.max_reconnect_attempts,
            base_reconnect_delay_ms: reconnect.base_reconnect_delay_ms,
            max_reconnect_delay_ms: reconnect.max_reconnect_delay_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FollowersConfig {
    pub enabled: bool,
    /// Profile page template containing `{account}`
    pub profile_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for FollowersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            profile_url: DEFAULT_PROFILE_URL.to_string(),
            user_agent: DEFAULT_UA.to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionSection {
    pub stop_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_reason_len: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            stop_timeout_secs: 5,
            connect_timeout_secs: 30,
            max_reason_len: 200,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    /// Filter directive; falls back to `RUST_LOG`, then the built-in default
    pub filter: Option<String>,
    pub format: LogFormat,
    /// Daily rotated log file
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub followers: FollowersConfig,
    pub session: SessionSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Load from `path`, or from the default location when it exists.
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match default_path() {
                Some(path) if path.is_file() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Command line values win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(url) = &args.relay_url {
            self.relay.url = Some(url.clone());
        }
        if let Some(filter) = &args.log_filter {
            self.logging.filter = Some(filter.clone());
        }
        if let Some(format) = args.log_format {
            self.logging.format = format;
        }
        if let Some(file) = &args.log_file {
            self.logging.file = Some(file.clone());
        }
        if args.no_followers {
            self.followers.enabled = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.relay.url {
            let sample = url.replace("{account}", "account");
            let parsed = Url::parse(&sample)
                .map_err(|e| ConfigError::Invalid(format!("relay.url {url:?}: {e}")))?;
            if !matches!(parsed.scheme(), "ws" | "wss") {
                return Err(ConfigError::Invalid(format!(
                    "relay.url must use ws:// or wss://, got {}://",
                    parsed.scheme()
                )));
            }
        }
        if self.relay.heartbeat_secs == 0 {
            return Err(ConfigError::Invalid("relay.heartbeat_secs must be > 0".into()));
        }
        if self.relay.base_reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "relay.base_reconnect_delay_ms must be > 0".into(),
            ));
        }
        if self.relay.base_reconnect_delay_ms > self.relay.max_reconnect_delay_ms {
            return Err(ConfigError::Invalid(
                "relay.base_reconnect_delay_ms must not exceed relay.max_reconnect_delay_ms".into(),
            ));
        }

        if self.followers.enabled {
            if !self.followers.profile_url.contains("{account}") {
                return Err(ConfigError::Invalid(
                    "followers.profile_url must contain {account}".into(),
                ));
            }
            if self.followers.timeout_secs == 0 {
                return Err(ConfigError::Invalid("followers.timeout_secs must be > 0".into()));
            }
        }

        if self.session.stop_timeout_secs == 0 {
            return Err(ConfigError::Invalid("session.stop_timeout_secs must be > 0".into()));
        }
        if self.session.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.connect_timeout_secs must be > 0".into(),
            ));
        }
        if self.session.max_reason_len == 0 {
            return Err(ConfigError::Invalid("session.max_reason_len must be > 0".into()));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            stop_timeout: Duration::from_secs(self.session.stop_timeout_secs),
            connect_timeout: Duration::from_secs(self.session.connect_timeout_secs),
            max_reason_len: self.session.max_reason_len,
            connection: ConnectionConfig {
                reconnect: ReconnectConfig {
                    max_reconnect_attempts: self.relay.max_reconnect_attempts,
                    base_reconnect_delay_ms: self.relay.base_reconnect_delay_ms,
                    max_reconnect_delay_ms: self.relay.max_reconnect_delay_ms,
                },
                heartbeat_interval: Duration::from_secs(self.relay.heartbeat_secs),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// The relay provider, or `None` when no relay is configured.
    pub fn live_provider(&self) -> tiktok_live::Result<Option<Arc<dyn LiveProvider>>> {
        match &self.relay.url {
            Some(url) => Ok(Some(Arc::new(create_relay_provider(url)?))),
            None => Ok(None),
        }
    }

    pub fn follower_lookup(&self) -> tiktok_live::Result<Arc<dyn FollowerLookup>> {
        if !self.followers.enabled {
            return Ok(Arc::new(DisabledLookup));
        }
        let lookup = HttpFollowerLookup::new(FollowerLookupConfig {
            profile_url: self.followers.profile_url.clone(),
            user_agent: self.followers.user_agent.clone(),
            timeout: Duration::from_secs(self.followers.timeout_secs),
        })?;
        Ok(Arc::new(lookup))
    }
}

/// `<config dir>/tplive/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}
