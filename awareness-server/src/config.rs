use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::moderation::RoomId;

/// Service configuration read from the environment.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the homeserver, e.g. `https://matrix.example.org`.
    pub homeserver_url: String,
    pub access_token: String,
    /// The bot's own user id. Resolved with `/account/whoami` when unset.
    pub user_id: Option<String>,
    /// Path to the TOML file holding keywords, notification room and templates.
    pub moderation_config_path: PathBuf,
    pub port: u16,
    /// Join rooms the bot is invited to.
    pub auto_join: bool,
    pub recording_enabled: bool,
    pub recording_log_path: String,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Optional bearer token for /status endpoint authentication.
    /// If not set, /status is disabled.
    pub status_auth_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let homeserver_url = env::var("MATRIX_HOMESERVER_URL")
            .context("MATRIX_HOMESERVER_URL environment variable is required")?
            .trim_end_matches('/')
            .to_string();

        let access_token = env::var("MATRIX_ACCESS_TOKEN")
            .context("MATRIX_ACCESS_TOKEN environment variable is required")?;

        let user_id = env::var("MATRIX_USER_ID")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let moderation_config_path = env::var("MODERATION_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("awareness.toml"));

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let auto_join = parse_bool_flag(env::var("AUTO_JOIN").ok(), true);

        let recording_enabled = parse_bool_flag(env::var("RECORDING_ENABLED").ok(), false);

        let recording_log_path =
            env::var("RECORDING_LOG_PATH").unwrap_or_else(|_| "recordings.jsonl".to_string());

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let status_auth_token = parse_status_auth_token(env::var("STATUS_AUTH_TOKEN").ok());

        Ok(Config {
            homeserver_url,
            access_token,
            user_id,
            moderation_config_path,
            port,
            auto_join,
            recording_enabled,
            recording_log_path,
            state_dir,
            status_auth_token,
        })
    }
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so an empty token can never grant unauthenticated access.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse a boolean environment flag, falling back to `default` when unset or invalid.
pub fn parse_bool_flag(value: Option<String>, default: bool) -> bool {
    value
        .and_then(|v| v.trim().to_lowercase().parse::<bool>().ok())
        .unwrap_or(default)
}

pub const DEFAULT_MESSAGE_WARNING: &str =
    "[user], please mind your language: \"[keyword]\" is not welcome here. This is warning number [count].";
pub const DEFAULT_MESSAGE_MUTE: &str =
    "[user] has been muted after repeatedly using \"[keyword]\" ([count] warnings).";
pub const DEFAULT_MESSAGE_REPORT: &str =
    "Thanks [reporter], the message by [user] has been reported and [user] has been muted until a moderator has had a look.";
pub const DEFAULT_MESSAGE_NOTIFY: &str = "[reporter] reported a message by [user] in [room]:";

/// Moderation rules and message templates.
///
/// Owned by the operator and read-only to the moderation core. A snapshot is
/// taken per event, so a reload never changes rules halfway through one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Case-insensitive trigger strings, evaluated in order.
    pub keywords: Vec<String>,
    /// Room for moderator alerts. Empty means none.
    pub notification_room: Option<String>,
    pub message_warning: String,
    pub message_mute: String,
    pub message_report: String,
    pub message_notify: String,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            notification_room: None,
            message_warning: DEFAULT_MESSAGE_WARNING.to_string(),
            message_mute: DEFAULT_MESSAGE_MUTE.to_string(),
            message_report: DEFAULT_MESSAGE_REPORT.to_string(),
            message_notify: DEFAULT_MESSAGE_NOTIFY.to_string(),
        }
    }
}

impl ModerationConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse moderation config TOML")
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents)
                .with_context(|| format!("Invalid moderation config {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Moderation config {} not found, using defaults (no keywords)",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read moderation config {}", path.display())),
        }
    }

    /// The configured notification room, treating blank values as unset.
    pub fn notification_room(&self) -> Option<RoomId> {
        self.notification_room
            .as_deref()
            .map(str::trim)
            .filter(|room| !room.is_empty())
            .map(RoomId::from)
    }
}

/// Shared, swappable moderation config.
///
/// Readers take an `Arc` snapshot; `replace` is the only reload boundary.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<ModerationConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: ModerationConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    pub async fn snapshot(&self) -> Arc<ModerationConfig> {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, config: ModerationConfig) {
        *self.current.write().await = Arc::new(config);
    }

    /// Re-read the config file and swap it in. On error the old config stays.
    pub async fn reload_from(&self, path: &Path) -> Result<()> {
        let config = ModerationConfig::load(path)?;
        info!(
            "Reloaded moderation config from {} ({} keywords)",
            path.display(),
            config.keywords.len()
        );
        self.replace(config).await;
        Ok(())
    }
}
