//! Offline policy pushed by an administrator.
//!
//! The policy decides whether offline mode is allowed at all, how much local
//! data may be cached and for how long, and whether a remote wipe has been
//! issued for this device.

use crate::{NodeId, Timestamp};
use serde::{Deserialize, Serialize};

/// Which devices a remote wipe addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WipeTarget {
    #[default]
    All,
    Sessions,
}

/// Remote wipe command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteWipe {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<Timestamp>,
    #[serde(default)]
    pub target: WipeTarget,
    #[serde(default)]
    pub session_ids: Vec<NodeId>,
}

impl RemoteWipe {
    /// Stable token identifying this wipe command.
    ///
    /// Uses the issue time when present, otherwise the target, the sorted
    /// session ids and the reason.
    pub fn token(&self) -> String {
        if let Some(issued_at) = self.issued_at {
            return format!("issued:{issued_at}");
        }
        let mut sessions = self.session_ids.clone();
        sessions.sort();
        let target = match self.target {
            WipeTarget::All => "all",
            WipeTarget::Sessions => "sessions",
        };
        format!(
            "{target}:{}:{}",
            sessions.join(","),
            self.reason.as_deref().unwrap_or("")
        )
    }

    /// Whether the wipe applies to the device identified by `node_id`.
    pub fn targets(&self, node_id: &str) -> bool {
        match self.target {
            WipeTarget::All => true,
            WipeTarget::Sessions => self.session_ids.iter().any(|id| id == node_id),
        }
    }
}

/// Process-wide offline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflinePolicy {
    pub enabled: bool,
    /// Upper bound on the serialized size of queued operations
    pub cache_limit_bytes: u64,
    /// Maximum age of an operation's last activity, in milliseconds
    pub retention_duration: u64,
    #[serde(default)]
    pub remote_wipe: RemoteWipe,
}

impl Default for OfflinePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_limit_bytes: 50 * 1024 * 1024,
            retention_duration: 30 * 24 * 60 * 60 * 1000,
            remote_wipe: RemoteWipe::default(),
        }
    }
}
