//! Drains a mutation queue through an injected synchronizer.
//!
//! One pass walks the queue's operations oldest first:
//!
//! 1. Operations whose dependencies are not resolved are left alone and
//!    reported as skipped
//! 2. An operation parked in conflict is reported again and halts the pass
//! 3. Everything else is marked syncing and handed to the [`Synchronizer`];
//!    its outcome decides whether the operation is deleted, parked in
//!    conflict or returned to pending
//!
//! A synchronizer error reverts the operation to pending and aborts the pass.

use crate::clock::ProcessClock;
use crate::error::{Error, Result, SyncError};
use crate::now_millis;
use crate::queue::{MutationQueue, ScopeFilter};
use async_trait::async_trait;
use outbox_engine::{
    conflict, CapturedConflict, OpStatus, Operation, OperationId, OperationPatch, RemoteState,
    Resolution, VectorClock,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// What the remote said about one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Accepted, optionally echoing the stored record and its clock
    Success { record: Option<RemoteState> },
    /// Remote state diverged from the operation's view
    Conflict {
        remote: RemoteState,
        reason: Option<String>,
    },
    /// Not attempted this time; try again on a later pass
    Skipped,
}

/// Pushes one operation to the remote. Implemented once per domain.
#[async_trait]
pub trait Synchronizer: Send + Sync {
    async fn sync(&self, op: &Operation) -> std::result::Result<SyncOutcome, SyncError>;
}

/// A remote record the caller should adopt in its local view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRemote {
    pub operation: Operation,
    pub resolved_record: Value,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Operations acknowledged by the remote and removed from the queue
    pub processed: Vec<Operation>,
    /// Operations parked in conflict, waiting for a manual decision
    pub conflicts: Vec<Operation>,
    pub applied_remote: Vec<AppliedRemote>,
    /// Operations left for a later pass
    pub skipped: Vec<Operation>,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
            && self.conflicts.is_empty()
            && self.applied_remote.is_empty()
            && self.skipped.is_empty()
    }
}

/// Manual decision on a parked conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictAction {
    /// Drop the local operation, optionally adopting a remote replacement
    Discard { remote: Option<Value> },
    /// Clear the conflict and send the operation again on the next pass
    Retry,
}

/// Result of [`QueueProcessor::resolve_conflict`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictOutcome {
    Discarded(Option<AppliedRemote>),
    Requeued(Operation),
}

enum Step {
    Continue,
    Halt,
}

/// Runs drain passes. Not reentrant: one pass per queue at a time.
#[derive(Clone)]
pub struct QueueProcessor {
    clock: Arc<ProcessClock>,
}

impl QueueProcessor {
    pub fn new(clock: Arc<ProcessClock>) -> Self {
        Self { clock }
    }

    /// Run one pass over the operations of `queue` matching `filter`.
    ///
    /// The id list is fetched once; operations enqueued during the pass wait
    /// for the next one and operations deleted during it are ignored.
    pub async fn drain(
        &self,
        queue: &MutationQueue,
        synchronizer: &dyn Synchronizer,
        filter: &ScopeFilter,
    ) -> Result<DrainReport> {
        let ids: Vec<OperationId> = queue
            .list(filter)
            .await?
            .into_iter()
            .filter(|op| op.status.is_drainable())
            .map(|op| op.id)
            .collect();

        tracing::debug!(domain = %queue.domain(), candidates = ids.len(), "Drain started");

        let mut report = DrainReport::default();
        for id in ids {
            let Some(op) = queue.get(&id).await? else {
                continue;
            };
            if let Step::Halt = self.process(queue, synchronizer, op, &mut report).await? {
                tracing::info!(
                    domain = %queue.domain(),
                    op_id = %id,
                    "Drain halted on unresolved conflict"
                );
                break;
            }
        }

        tracing::info!(
            domain = %queue.domain(),
            processed = report.processed.len(),
            conflicts = report.conflicts.len(),
            applied_remote = report.applied_remote.len(),
            skipped = report.skipped.len(),
            "Drain finished"
        );
        Ok(report)
    }

    async fn process(
        &self,
        queue: &MutationQueue,
        synchronizer: &dyn Synchronizer,
        op: Operation,
        report: &mut DrainReport,
    ) -> Result<Step> {
        if !queue.dependencies().is_satisfied(&op.dependencies).await {
            let blocking = queue.dependencies().unresolved(&op.dependencies).await;
            tracing::debug!(op_id = %op.id, ?blocking, "Dependencies unresolved, skipping");
            report.skipped.push(op);
            return Ok(Step::Continue);
        }

        if op.has_open_conflict() {
            report.conflicts.push(op);
            return Ok(Step::Halt);
        }

        let op = if op.status == OpStatus::Conflict {
            queue.update(&op.id, OperationPatch::retry()).await?
        } else {
            op
        };
        let op = queue
            .update(&op.id, OperationPatch::begin_attempt(&op, now_millis()))
            .await?;

        let outcome = match synchronizer.sync(&op).await {
            Ok(outcome) => outcome,
            Err(source) => {
                tracing::warn!(op_id = %op.id, attempt = op.attempt, error = %source, "Synchronizer failed");
                queue.update(&op.id, OperationPatch::retry()).await?;
                return Err(Error::Transport { id: op.id, source });
            }
        };

        match outcome {
            SyncOutcome::Success { record } => {
                let clock = match &record {
                    Some(remote) => self.observe(&op, &remote.vector_clock).await?,
                    None => op.vector_clock.clone(),
                };
                let synced = self.mark_synced(queue, &op, clock).await?;
                report.processed.push(synced);
            }
            SyncOutcome::Conflict { remote, reason } => {
                let resolution = conflict::resolve(&op, &remote);
                tracing::debug!(op_id = %op.id, ?resolution, "Conflict resolved by policy");
                match resolution {
                    Resolution::KeepLocal => {
                        let synced = self.mark_synced(queue, &op, op.vector_clock.clone()).await?;
                        report.processed.push(synced);
                    }
                    Resolution::UseRemote(record) | Resolution::Merge(record) => {
                        let clock = self.observe(&op, &remote.vector_clock).await?;
                        let synced = self.mark_synced(queue, &op, clock).await?;
                        report.applied_remote.push(AppliedRemote {
                            operation: synced.clone(),
                            resolved_record: record,
                        });
                        report.processed.push(synced);
                    }
                    Resolution::Manual => {
                        let parked = queue
                            .update(
                                &op.id,
                                OperationPatch::conflict(CapturedConflict {
                                    remote,
                                    reason,
                                    detected_at: now_millis(),
                                }),
                            )
                            .await?;
                        tracing::warn!(op_id = %parked.id, "Operation parked in conflict");
                        report.conflicts.push(parked);
                        return Ok(Step::Halt);
                    }
                }
            }
            SyncOutcome::Skipped => {
                let pending = queue.update(&op.id, OperationPatch::retry()).await?;
                report.skipped.push(pending);
            }
        }

        Ok(Step::Continue)
    }

    /// Merge a remote clock into the operation's and into the process clock.
    async fn observe(&self, op: &Operation, remote: &VectorClock) -> Result<VectorClock> {
        self.clock.observe(remote).await?;
        Ok(op.vector_clock.merge(remote))
    }

    async fn mark_synced(
        &self,
        queue: &MutationQueue,
        op: &Operation,
        clock: VectorClock,
    ) -> Result<Operation> {
        let patch = OperationPatch {
            status: Some(OpStatus::Synced),
            vector_clock: Some(clock),
            ..OperationPatch::default()
        };
        let synced = queue.update(&op.id, patch).await?;
        tracing::debug!(op_id = %synced.id, attempt = synced.attempt, "Operation synced");
        Ok(synced)
    }

    /// Apply a manual decision to an operation parked in conflict.
    pub async fn resolve_conflict(
        &self,
        queue: &MutationQueue,
        id: &str,
        action: ConflictAction,
    ) -> Result<ConflictOutcome> {
        let op = queue
            .get(id)
            .await?
            .ok_or_else(|| Error::OperationNotFound(id.to_string()))?;
        if op.status != OpStatus::Conflict {
            return Err(Error::NotInConflict(op.id));
        }

        match action {
            ConflictAction::Discard { remote } => {
                queue.delete(id).await?;
                tracing::info!(op_id = id, "Conflicting operation discarded");
                Ok(ConflictOutcome::Discarded(remote.map(|record| AppliedRemote {
                    operation: op,
                    resolved_record: record,
                })))
            }
            ConflictAction::Retry => {
                let requeued = queue.update(id, OperationPatch::retry()).await?;
                tracing::info!(op_id = id, attempt = requeued.attempt, "Conflicting operation requeued");
                Ok(ConflictOutcome::Requeued(requeued))
            }
        }
    }
}
