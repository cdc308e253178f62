//! Snapshots of materialized collection state.
//!
//! A snapshot is the last known good view of one domain collection within one
//! scope (for example "the items of board 42 as of time T"). The UI layer
//! writes one alongside an enqueue and reads it back after a reload, before
//! the queued operations are replayed on top.

use crate::{error::Result, Error, QueueDomain, ScopeId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Namespace snapshots live in.
pub const SNAPSHOT_NAMESPACE: &str = "snapshots";

/// Materialized state of a domain collection for one scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    pub domain: QueueDomain,
    pub scope_id: ScopeId,
    /// The materialized collection, as the UI layer rendered it
    pub state: Value,
    /// When the snapshot was taken (milliseconds since epoch)
    pub captured_at: Timestamp,
}

impl CollectionSnapshot {
    pub fn new(
        domain: QueueDomain,
        scope_id: impl Into<ScopeId>,
        state: Value,
        captured_at: Timestamp,
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            domain,
            scope_id: scope_id.into(),
            state,
            captured_at,
        }
    }

    /// Store key for a domain + scope pair.
    pub fn key_for(domain: QueueDomain, scope_id: &str) -> String {
        format!("{domain}:{scope_id}")
    }

    /// Store key of this snapshot.
    pub fn key(&self) -> String {
        Self::key_for(self.domain, &self.scope_id)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON, rejecting formats newer than this build.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    /// Reject snapshots written by a newer format.
    pub fn check_version(&self) -> Result<()> {
        if self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(())
    }
}
