//! Unified error handling for the runtime.

use crate::config::ConfigError;
use outbox_engine::OperationId;

/// Error raised by an injected synchronizer.
pub type SyncError = Box<dyn std::error::Error + Send + Sync>;

/// Runtime error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] outbox_engine::Error),

    #[error("Key slot error: {0}")]
    KeySlot(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    #[error("Operation already queued: {0}")]
    DuplicateOperation(OperationId),

    #[error("Operation {0} is not in conflict")]
    NotInConflict(OperationId),

    #[error("Policy source failed: {0}")]
    PolicySource(#[source] SyncError),

    #[error("Synchronizer failed for operation {id}: {source}")]
    Transport {
        id: OperationId,
        #[source]
        source: SyncError,
    },
}

/// Result type alias for runtime calls.
pub type Result<T> = std::result::Result<T, Error>;
