//! Durable mutation queues, one per domain.
//!
//! A [`MutationQueue`] owns the operations of one [`QueueDomain`] in its own
//! store namespace. Its side effects stop at the durable store and the shared
//! dependency tracker; it never talks to the network.

use crate::clock::ProcessClock;
use crate::deps::DependencyTracker;
use crate::error::{Error, Result};
use crate::now_millis;
use crate::store::{DurableStore, StoreWrite};
use outbox_engine::{
    CollectionSnapshot, NewOperation, OpStatus, Operation, OperationId, OperationPatch,
    QueueDomain, ScopeId, SNAPSHOT_NAMESPACE,
};
use serde_json::Value;
use std::sync::Arc;

/// Selects operations by scope, target and status. Empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFilter {
    pub scope_id: Option<ScopeId>,
    pub target_id: Option<String>,
    pub statuses: Vec<OpStatus>,
}

impl ScopeFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn scope(scope_id: impl Into<ScopeId>) -> Self {
        Self {
            scope_id: Some(scope_id.into()),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_status(mut self, status: OpStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn matches(&self, op: &Operation) -> bool {
        self.scope_id.as_ref().map_or(true, |s| *s == op.scope_id)
            && self.target_id.as_ref().map_or(true, |t| *t == op.target_id)
            && (self.statuses.is_empty() || self.statuses.contains(&op.status))
    }
}

/// Queue of not-yet-acknowledged operations for one domain.
#[derive(Clone)]
pub struct MutationQueue {
    domain: QueueDomain,
    store: DurableStore,
    clock: Arc<ProcessClock>,
    deps: Arc<DependencyTracker>,
}

impl MutationQueue {
    pub fn new(
        domain: QueueDomain,
        store: DurableStore,
        clock: Arc<ProcessClock>,
        deps: Arc<DependencyTracker>,
    ) -> Self {
        Self {
            domain,
            store,
            clock,
            deps,
        }
    }

    pub fn domain(&self) -> QueueDomain {
        self.domain
    }

    pub fn namespace(&self) -> &'static str {
        self.domain.namespace()
    }

    pub fn dependencies(&self) -> &Arc<DependencyTracker> {
        &self.deps
    }

    /// Record a new local mutation.
    ///
    /// Assigns an id when absent, advances the process clock and persists the
    /// operation, its dependency records and any snapshot in one batch. A
    /// supplied id that is already queued is rejected rather than overwritten.
    pub async fn enqueue(&self, mut input: NewOperation) -> Result<Operation> {
        input.validate(self.domain)?;

        let id = match input.id.clone().filter(|id| !id.is_empty()) {
            Some(id) => {
                if self.get(&id).await?.is_some() {
                    return Err(Error::DuplicateOperation(id));
                }
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        let now = now_millis();
        let clock = self.clock.tick(input.vector_clock.as_ref()).await?;
        let snapshot = input.snapshot.take();
        let op = input.into_operation(self.domain, id, now, clock);

        let mut writes = vec![StoreWrite::put(self.namespace(), &op.id, &op)?];
        if let Some(state) = snapshot {
            let snapshot = CollectionSnapshot::new(self.domain, op.scope_id.clone(), state, now);
            writes.push(StoreWrite::put(SNAPSHOT_NAMESPACE, &snapshot.key(), &snapshot)?);
        }
        self.deps
            .register_with(&op.id, &op.dependencies, writes)
            .await?;

        tracing::debug!(
            op_id = %op.id,
            domain = %self.domain,
            scope = %op.scope_id,
            dependencies = op.dependencies.len(),
            "Operation enqueued"
        );
        Ok(op)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Operation>> {
        self.store.get(self.namespace(), id).await
    }

    /// Matching operations, oldest first; ties broken by id.
    pub async fn list(&self, filter: &ScopeFilter) -> Result<Vec<Operation>> {
        let mut ops: Vec<Operation> = self
            .store
            .get_all::<Operation>(self.namespace())
            .await?
            .into_iter()
            .filter(|op| filter.matches(op))
            .collect();
        ops.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(ops)
    }

    /// Apply a patch to a stored operation.
    ///
    /// Reaching `synced` removes the record. Any terminal status resolves the
    /// operation's dependency record.
    pub async fn update(&self, id: &str, patch: OperationPatch) -> Result<Operation> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;
        let next = patch.apply(&current)?;

        let write = if next.status == OpStatus::Synced {
            StoreWrite::delete(self.namespace(), id)
        } else {
            StoreWrite::put(self.namespace(), id, &next)?
        };
        if next.status.is_terminal() && !current.status.is_terminal() {
            self.deps.resolve_with(&[id.to_string()], vec![write]).await?;
        } else {
            self.store.write(vec![write]).await?;
        }

        if next.status != current.status {
            tracing::debug!(
                op_id = id,
                domain = %self.domain,
                from = %current.status,
                to = %next.status,
                "Operation status changed"
            );
        }
        Ok(next)
    }

    /// Remove an operation and resolve its dependency record.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.deps
            .resolve_with(&[id.to_string()], vec![StoreWrite::delete(self.namespace(), id)])
            .await?;
        tracing::debug!(op_id = id, domain = %self.domain, "Operation deleted");
        Ok(())
    }

    /// Delete every operation of a scope. Returns how many were removed.
    pub async fn clear(&self, scope_id: &str) -> Result<usize> {
        let ops = self.list(&ScopeFilter::scope(scope_id)).await?;
        let ids: Vec<OperationId> = ops.iter().map(|op| op.id.clone()).collect();
        let writes = ids
            .iter()
            .map(|id| StoreWrite::delete(self.namespace(), id))
            .collect();
        self.deps.resolve_with(&ids, writes).await?;
        tracing::info!(domain = %self.domain, scope = scope_id, removed = ops.len(), "Scope cleared");
        Ok(ops.len())
    }

    /// Drop the whole namespace without touching dependency records.
    pub async fn clear_all(&self) -> Result<()> {
        self.store.clear(self.namespace()).await
    }

    /// Persist the materialized collection state of a scope.
    pub async fn save_snapshot(&self, scope_id: &str, state: Value) -> Result<CollectionSnapshot> {
        let snapshot = CollectionSnapshot::new(self.domain, scope_id, state, now_millis());
        self.store
            .put(SNAPSHOT_NAMESPACE, &snapshot.key(), &snapshot)
            .await?;
        Ok(snapshot)
    }

    /// Last saved snapshot of a scope, if one survives.
    pub async fn load_snapshot(&self, scope_id: &str) -> Result<Option<CollectionSnapshot>> {
        let key = CollectionSnapshot::key_for(self.domain, scope_id);
        let snapshot: Option<CollectionSnapshot> = self.store.get(SNAPSHOT_NAMESPACE, &key).await?;
        match snapshot {
            Some(snapshot) => {
                snapshot.check_version()?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// Operations still waiting for the remote.
    pub async fn pending_count(&self) -> Result<usize> {
        Ok(self
            .store
            .get_all::<Operation>(self.namespace())
            .await?
            .iter()
            .filter(|op| op.status != OpStatus::Conflict && op.status.is_drainable())
            .count())
    }
}
