//! Configuration management for the offline engine.

use crate::store::SqliteBackend;
use std::env;
use std::path::PathBuf;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL; the engine runs in memory when unset
    pub database_url: Option<String>,
    /// Stable id of this device; generated and persisted when unset
    pub node_id: Option<String>,
    /// Whether records are sealed with the session key before they are stored
    pub encrypt_at_rest: bool,
    /// File holding the session key between reloads; memory only when unset
    pub key_slot_path: Option<PathBuf>,
    /// SQLite pool size
    pub max_connections: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            node_id: None,
            encrypt_at_rest: true,
            key_slot_path: None,
            max_connections: 4,
        }
    }
}

impl Config {
    /// In-memory configuration, mostly for tests.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("OUTBOX_DATABASE_URL")
            .ok()
            .filter(|v| !v.is_empty());

        let node_id = env::var("OUTBOX_NODE_ID").ok().filter(|v| !v.is_empty());

        let encrypt_at_rest = match env::var("OUTBOX_ENCRYPT") {
            Ok(value) => parse_bool(&value).ok_or(ConfigError::InvalidEncrypt(value))?,
            Err(_) => true,
        };

        let key_slot_path = env::var("OUTBOX_KEY_SLOT").ok().map(PathBuf::from);

        let max_connections = env::var("OUTBOX_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .ok()
            .filter(|n: &u32| *n > 0)
            .ok_or(ConfigError::InvalidMaxConnections)?;

        let config = Self {
            database_url,
            node_id,
            encrypt_at_rest,
            key_slot_path,
            max_connections,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would orphan the stored queue on every restart.
    ///
    /// A sealed on-disk database needs a key slot that outlives the process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seals_without_durable_key() {
            return Err(ConfigError::MissingKeySlot);
        }
        Ok(())
    }

    /// Records are sealed into a file database under a key kept only in memory.
    pub(crate) fn seals_without_durable_key(&self) -> bool {
        self.encrypt_at_rest
            && self.key_slot_path.is_none()
            && self
                .database_url
                .as_deref()
                .is_some_and(|url| !SqliteBackend::is_memory_url(url))
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encrypt_at_rest = enabled;
        self
    }

    pub fn with_key_slot(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_slot_path = Some(path.into());
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid OUTBOX_ENCRYPT value: {0}")]
    InvalidEncrypt(String),

    #[error("Invalid OUTBOX_MAX_CONNECTIONS value")]
    InvalidMaxConnections,

    #[error("OUTBOX_KEY_SLOT is required when OUTBOX_DATABASE_URL is set and OUTBOX_ENCRYPT is on")]
    MissingKeySlot,
}
