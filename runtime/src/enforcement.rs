//! Administrator policy enforcement: retention, cache budget and remote wipe.

use crate::deps::DependencyTracker;
use crate::error::{Error, Result, SyncError};
use crate::now_millis;
use crate::queue::{MutationQueue, ScopeFilter};
use crate::store::{DurableStore, META_NAMESPACE};
use async_trait::async_trait;
use outbox_engine::{OfflinePolicy, Operation, RemoteWipe, Timestamp, SNAPSHOT_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const WIPE_ACK_KEY: &str = "wipe-ack";

/// Where the current [`OfflinePolicy`] comes from.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn fetch_policy(&self) -> std::result::Result<OfflinePolicy, SyncError>;
}

/// Local full-text index that a remote wipe must also drop.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn clear(&self) -> std::result::Result<(), SyncError>;
}

/// Result of evaluating a remote wipe command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum WipeOutcome {
    Inactive,
    NotTargeted,
    AlreadyAcknowledged { token: String },
    Wiped { token: String },
}

/// Persisted acknowledgement of the last executed wipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WipeAck {
    token: String,
    acknowledged_at: Timestamp,
}

/// What one [`PolicyEnforcer::enforce`] run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementReport {
    pub wipe: WipeOutcome,
    /// Operations dropped for exceeding the retention window
    pub expired: usize,
    /// Operations dropped to fit the cache budget
    pub evicted: usize,
    /// Offline mode is disabled and the whole cache was dropped
    pub cache_cleared: bool,
}

/// Applies an [`OfflinePolicy`] to every queue of the engine.
#[derive(Clone)]
pub struct PolicyEnforcer {
    node_id: String,
    store: DurableStore,
    queues: Vec<MutationQueue>,
    deps: Arc<DependencyTracker>,
    search_index: Option<Arc<dyn SearchIndex>>,
}

impl PolicyEnforcer {
    pub fn new(
        node_id: impl Into<String>,
        store: DurableStore,
        queues: Vec<MutationQueue>,
        deps: Arc<DependencyTracker>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            queues,
            deps,
            search_index: None,
        }
    }

    pub fn with_search_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.search_index = Some(index);
        self
    }

    /// Drop operations idle for longer than `max_age` milliseconds, along
    /// with any stored operation that no longer decodes.
    pub async fn apply_retention(&self, max_age: u64) -> Result<usize> {
        self.apply_retention_at(max_age, now_millis()).await
    }

    /// [`apply_retention`](Self::apply_retention) against an explicit clock.
    pub async fn apply_retention_at(&self, max_age: u64, now: Timestamp) -> Result<usize> {
        let cutoff = now.saturating_sub(max_age);
        let mut expired = 0;
        let mut unreadable = 0;
        for queue in &self.queues {
            for record in self.store.scan::<Operation>(queue.namespace()).await? {
                let stale = match &record.value {
                    Some(op) => op.last_activity() < cutoff,
                    None => {
                        unreadable += 1;
                        true
                    }
                };
                if stale {
                    queue.delete(&record.id).await?;
                    expired += 1;
                }
            }
        }
        if expired > 0 {
            tracing::info!(expired, unreadable, max_age, "Retention removed stale operations");
        }
        Ok(expired)
    }

    /// Evict the least recently active operations until the stored size of
    /// all queues fits in `limit_bytes`. Rows that no longer decode count as
    /// the least recently active.
    pub async fn enforce_cache_budget(&self, limit_bytes: u64) -> Result<usize> {
        let mut total: u64 = 0;
        let mut candidates: Vec<(Timestamp, String, usize, u64)> = Vec::new();

        for (index, queue) in self.queues.iter().enumerate() {
            for record in self.store.scan::<Operation>(queue.namespace()).await? {
                let size = record.size as u64;
                total += size;
                let activity = record.value.as_ref().map_or(0, Operation::last_activity);
                candidates.push((activity, record.id, index, size));
            }
        }

        if total <= limit_bytes {
            return Ok(0);
        }

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        let mut evicted = 0;
        for (_, id, index, size) in candidates {
            if total <= limit_bytes {
                break;
            }
            self.queues[index].delete(&id).await?;
            total = total.saturating_sub(size);
            evicted += 1;
        }

        tracing::info!(evicted, remaining_bytes = total, limit_bytes, "Cache budget enforced");
        Ok(evicted)
    }

    /// Execute a remote wipe once per distinct command.
    pub async fn evaluate_remote_wipe(&self, wipe: &RemoteWipe) -> Result<WipeOutcome> {
        if !wipe.active {
            return Ok(WipeOutcome::Inactive);
        }
        if !wipe.targets(&self.node_id) {
            tracing::debug!(node_id = %self.node_id, "Remote wipe does not target this device");
            return Ok(WipeOutcome::NotTargeted);
        }

        let token = wipe.token();
        let ack: Option<WipeAck> = self.store.get(META_NAMESPACE, WIPE_ACK_KEY).await?;
        if ack.is_some_and(|ack| ack.token == token) {
            return Ok(WipeOutcome::AlreadyAcknowledged { token });
        }

        tracing::warn!(token = %token, reason = ?wipe.reason, "Executing remote wipe");
        self.clear_offline_cache().await?;
        if let Some(index) = &self.search_index {
            if let Err(e) = index.clear().await {
                tracing::warn!(error = %e, "Failed to clear search index during wipe");
            }
        }
        self.store.keyring().clear_session_key().await;

        let ack = WipeAck {
            token: token.clone(),
            acknowledged_at: now_millis(),
        };
        self.store.put(META_NAMESPACE, WIPE_ACK_KEY, &ack).await?;
        Ok(WipeOutcome::Wiped { token })
    }

    /// Drop every queue, snapshot and dependency record.
    pub async fn clear_offline_cache(&self) -> Result<()> {
        for queue in &self.queues {
            queue.clear_all().await?;
        }
        self.store.clear(SNAPSHOT_NAMESPACE).await?;
        self.deps.clear().await?;
        tracing::info!("Offline cache cleared");
        Ok(())
    }

    /// Fetch the current policy and apply it: wipe, then retention, then budget.
    pub async fn enforce(&self, source: &dyn PolicySource) -> Result<EnforcementReport> {
        let policy = source.fetch_policy().await.map_err(Error::PolicySource)?;

        let wipe = self.evaluate_remote_wipe(&policy.remote_wipe).await?;

        if !policy.enabled {
            self.clear_offline_cache().await?;
            return Ok(EnforcementReport {
                wipe,
                expired: 0,
                evicted: 0,
                cache_cleared: true,
            });
        }

        let expired = self.apply_retention(policy.retention_duration).await?;
        let evicted = self.enforce_cache_budget(policy.cache_limit_bytes).await?;
        Ok(EnforcementReport {
            wipe,
            expired,
            evicted,
            cache_cleared: false,
        })
    }
}
