//! # Outbox Runtime
//!
//! The IO host around [`outbox_engine`]: durable per-domain mutation queues,
//! at-rest encryption, the drain loop that feeds an injected
//! [`Synchronizer`], and administrator policy enforcement.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use outbox_engine::{NewOperation, Payload, QueueDomain};
//! use outbox_runtime::{Config, OfflineEngine, ScopeFilter, SyncOutcome, Synchronizer};
//! use serde_json::json;
//!
//! struct Accept;
//!
//! #[async_trait::async_trait]
//! impl Synchronizer for Accept {
//!     async fn sync(
//!         &self,
//!         _op: &outbox_engine::Operation,
//!     ) -> Result<SyncOutcome, outbox_runtime::SyncError> {
//!         Ok(SyncOutcome::Success { record: None })
//!     }
//! }
//!
//! # async fn run() -> outbox_runtime::Result<()> {
//! let engine = OfflineEngine::open(Config::in_memory()).await?;
//! let items = engine.queue(QueueDomain::Item);
//!
//! items
//!     .enqueue(NewOperation::new(
//!         "board-1",
//!         "item-1",
//!         Payload::Replace { record: json!({"title": "Ship it"}) },
//!     ))
//!     .await?;
//!
//! let report = engine
//!     .processor()
//!     .drain(items, &Accept, &ScopeFilter::scope("board-1"))
//!     .await?;
//! assert_eq!(report.processed.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod crypto;
pub mod deps;
pub mod enforcement;
pub mod engine;
pub mod error;
pub mod processor;
pub mod queue;
pub mod store;

pub use clock::ProcessClock;
pub use config::{Config, ConfigError};
pub use crypto::{Envelope, FileKeySlot, KeySlot, MemoryKeySlot, SessionKeyring};
pub use deps::DependencyTracker;
pub use enforcement::{EnforcementReport, PolicyEnforcer, PolicySource, SearchIndex, WipeOutcome};
pub use engine::OfflineEngine;
pub use error::{Error, Result, SyncError};
pub use processor::{
    AppliedRemote, ConflictAction, ConflictOutcome, DrainReport, QueueProcessor, SyncOutcome,
    Synchronizer,
};
pub use queue::{MutationQueue, ScopeFilter};
pub use store::{Backend, BackendKind, DurableStore, MemoryBackend, SqliteBackend, StoredRecord};

use outbox_engine::Timestamp;

/// Current wall-clock time in milliseconds since the epoch.
pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}
