//! Operation types for queued offline mutations.
//!
//! Every local edit is captured as an [`Operation`]: what changed, which entity
//! it targets, its causal clock, how conflicts are reconciled, and which other
//! operations must be applied first. Operations are immutable values; changes
//! go through [`OperationPatch::apply`], which returns a new operation.

use crate::{
    error::Result, ConflictPolicy, Error, OperationId, ScopeId, Timestamp, VectorClock,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The domain a queue holds operations for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueDomain {
    Board,
    Item,
    Document,
    Comment,
    File,
    Preference,
}

impl QueueDomain {
    /// All domains, in a fixed order.
    pub const ALL: [QueueDomain; 6] = [
        QueueDomain::Board,
        QueueDomain::Item,
        QueueDomain::Document,
        QueueDomain::Comment,
        QueueDomain::File,
        QueueDomain::Preference,
    ];

    /// Store namespace holding this domain's operations.
    pub fn namespace(self) -> &'static str {
        match self {
            QueueDomain::Board => "board-ops",
            QueueDomain::Item => "item-ops",
            QueueDomain::Document => "document-ops",
            QueueDomain::Comment => "comment-ops",
            QueueDomain::File => "file-ops",
            QueueDomain::Preference => "preference-ops",
        }
    }

    /// Name of the key that scopes operations of this domain.
    pub fn scope_key(self) -> &'static str {
        match self {
            QueueDomain::Board | QueueDomain::Item => "boardId",
            QueueDomain::Document => "docId",
            QueueDomain::Comment | QueueDomain::File => "itemId",
            QueueDomain::Preference => "scope",
        }
    }
}

impl fmt::Display for QueueDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueDomain::Board => "board",
            QueueDomain::Item => "item",
            QueueDomain::Document => "document",
            QueueDomain::Comment => "comment",
            QueueDomain::File => "file",
            QueueDomain::Preference => "preference",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    #[default]
    Pending,
    Syncing,
    Conflict,
    Synced,
    Failed,
}

impl OpStatus {
    /// Synced and failed operations resolve their dependency records.
    pub fn is_terminal(self) -> bool {
        matches!(self, OpStatus::Synced | OpStatus::Failed)
    }

    /// Whether the processor may pick this operation up.
    pub fn is_drainable(self) -> bool {
        matches!(
            self,
            OpStatus::Pending | OpStatus::Failed | OpStatus::Syncing | OpStatus::Conflict
        )
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: OpStatus) -> bool {
        use OpStatus::*;
        if self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Syncing | Failed),
            Syncing => matches!(next, Synced | Conflict | Pending | Failed),
            Conflict => matches!(next, Synced | Pending | Failed),
            Failed => matches!(next, Syncing | Pending),
            Synced => false,
        }
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpStatus::Pending => "pending",
            OpStatus::Syncing => "syncing",
            OpStatus::Conflict => "conflict",
            OpStatus::Synced => "synced",
            OpStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The change an operation describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    /// Full replacement of the target entity.
    Replace { record: Value },
    /// Field-level patch.
    Patch { changes: Map<String, Value> },
    /// Positional move, e.g. an item dragged to another column.
    #[serde(rename_all = "camelCase")]
    Move {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<String>,
        position: f64,
    },
}

impl Payload {
    /// Field values this payload changes, as seen by conflict policies.
    pub fn changed_values(&self) -> Map<String, Value> {
        match self {
            Payload::Replace { record } => record.as_object().cloned().unwrap_or_default(),
            Payload::Patch { changes } => changes.clone(),
            Payload::Move {
                destination,
                position,
            } => {
                let mut fields = Map::new();
                if let Some(destination) = destination {
                    fields.insert("destination".into(), Value::String(destination.clone()));
                }
                fields.insert("position".into(), Value::from(*position));
                fields
            }
        }
    }
}

/// Remote state captured when a conflict could not be resolved automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedConflict {
    /// Remote record and its clock at the time of the conflict
    pub remote: RemoteState,
    /// Reason reported by the synchronizer, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// When the conflict was recorded
    pub detected_at: Timestamp,
}

/// A remote record together with its causal clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteState {
    pub record: Value,
    #[serde(default)]
    pub vector_clock: VectorClock,
}

impl RemoteState {
    pub fn new(record: Value, vector_clock: VectorClock) -> Self {
        Self {
            record,
            vector_clock,
        }
    }
}

/// A durably queued, not-yet-acknowledged local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Operation ID
    pub id: OperationId,
    /// Domain this operation belongs to
    pub domain: QueueDomain,
    /// Domain key (board, item, document ...) the operation is scoped to
    pub scope_id: ScopeId,
    /// Entity being mutated
    pub target_id: String,
    /// The change itself
    pub payload: Payload,
    /// Creation time (milliseconds since epoch)
    pub timestamp: Timestamp,
    pub status: OpStatus,
    /// Number of synchronizer attempts so far
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<Timestamp>,
    pub vector_clock: VectorClock,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    /// Operations that must resolve before this one is synced
    #[serde(default)]
    pub dependencies: Vec<OperationId>,
    /// Optional grouping key for ordered replay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_key: Option<String>,
    /// Present only while `status` is conflict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<CapturedConflict>,
}

impl Operation {
    /// Most recent activity on this operation.
    pub fn last_activity(&self) -> Timestamp {
        let mut latest = self.timestamp;
        if let Some(at) = self.last_attempt_at {
            latest = latest.max(at);
        }
        if let Some(conflict) = &self.conflict {
            latest = latest.max(conflict.detected_at);
        }
        latest
    }

    /// Whether the operation carries a captured remote conflict.
    pub fn has_open_conflict(&self) -> bool {
        self.status == OpStatus::Conflict && self.conflict.is_some()
    }
}

/// Caller-supplied input for enqueueing a new operation.
///
/// Fields left unset are derived at enqueue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOperation {
    #[serde(default)]
    pub id: Option<OperationId>,
    pub scope_id: ScopeId,
    pub target_id: String,
    pub payload: Payload,
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub vector_clock: Option<VectorClock>,
    #[serde(default)]
    pub conflict_policy: Option<ConflictPolicy>,
    #[serde(default)]
    pub dependencies: Vec<OperationId>,
    #[serde(default)]
    pub batch_key: Option<String>,
    /// Materialized collection state to persist alongside the operation
    #[serde(default)]
    pub snapshot: Option<Value>,
}

impl NewOperation {
    /// Start building an operation for `target_id` within `scope_id`.
    pub fn new(scope_id: impl Into<ScopeId>, target_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: None,
            scope_id: scope_id.into(),
            target_id: target_id.into(),
            payload,
            timestamp: None,
            vector_clock: None,
            conflict_policy: None,
            dependencies: Vec::new(),
            batch_key: None,
            snapshot: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<OperationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_clock(mut self, clock: VectorClock) -> Self {
        self.vector_clock = Some(clock);
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = Some(policy);
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OperationId>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_batch_key(mut self, batch_key: impl Into<String>) -> Self {
        self.batch_key = Some(batch_key.into());
        self
    }

    pub fn with_snapshot(mut self, snapshot: Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Check the caller supplied the domain key and a target.
    pub fn validate(&self, domain: QueueDomain) -> Result<()> {
        if self.scope_id.trim().is_empty() {
            return Err(Error::InvalidPayload(format!(
                "{domain} operation requires {}",
                domain.scope_key()
            )));
        }
        if self.target_id.trim().is_empty() {
            return Err(Error::InvalidPayload(format!(
                "{domain} operation requires a target id"
            )));
        }
        if let Payload::Move { position, .. } = &self.payload {
            if !position.is_finite() {
                return Err(Error::InvalidPayload("move position must be finite".into()));
            }
        }
        Ok(())
    }

    /// Materialize the operation once the id and clock are known.
    pub fn into_operation(
        self,
        domain: QueueDomain,
        id: OperationId,
        timestamp: Timestamp,
        vector_clock: VectorClock,
    ) -> Operation {
        Operation {
            id,
            domain,
            scope_id: self.scope_id,
            target_id: self.target_id,
            payload: self.payload,
            timestamp: self.timestamp.unwrap_or(timestamp),
            status: OpStatus::Pending,
            attempt: 0,
            last_attempt_at: None,
            vector_clock,
            conflict_policy: self.conflict_policy.unwrap_or_default(),
            dependencies: self.dependencies,
            batch_key: self.batch_key,
            conflict: None,
        }
    }
}

/// A partial update of a stored operation.
///
/// `conflict` is doubly optional: `None` leaves it alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationPatch {
    pub status: Option<OpStatus>,
    pub attempt: Option<u32>,
    pub last_attempt_at: Option<Timestamp>,
    pub vector_clock: Option<VectorClock>,
    pub conflict_policy: Option<ConflictPolicy>,
    pub payload: Option<Payload>,
    pub conflict: Option<Option<CapturedConflict>>,
}

impl OperationPatch {
    pub fn status(status: OpStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch recording the start of a sync attempt.
    pub fn begin_attempt(op: &Operation, now: Timestamp) -> Self {
        Self {
            status: Some(OpStatus::Syncing),
            attempt: Some(op.attempt.saturating_add(1)),
            last_attempt_at: Some(now),
            conflict: Some(None),
            ..Self::default()
        }
    }

    /// Patch parking an operation in the conflict state.
    pub fn conflict(captured: CapturedConflict) -> Self {
        Self {
            status: Some(OpStatus::Conflict),
            conflict: Some(Some(captured)),
            ..Self::default()
        }
    }

    /// Patch returning an operation to pending with its conflict cleared.
    pub fn retry() -> Self {
        Self {
            status: Some(OpStatus::Pending),
            conflict: Some(None),
            ..Self::default()
        }
    }

    /// Apply the patch to `op`, producing a new operation.
    pub fn apply(&self, op: &Operation) -> Result<Operation> {
        let mut next = op.clone();

        if let Some(status) = self.status {
            if !op.status.can_transition_to(status) {
                return Err(Error::InvalidTransition {
                    id: op.id.clone(),
                    from: op.status,
                    to: status,
                });
            }
            next.status = status;
        }
        if let Some(attempt) = self.attempt {
            next.attempt = attempt;
        }
        if let Some(at) = self.last_attempt_at {
            next.last_attempt_at = Some(at);
        }
        if let Some(clock) = &self.vector_clock {
            next.vector_clock = clock.clone();
        }
        if let Some(policy) = &self.conflict_policy {
            next.conflict_policy = policy.clone();
        }
        if let Some(payload) = &self.payload {
            next.payload = payload.clone();
        }
        if let Some(conflict) = &self.conflict {
            next.conflict = conflict.clone();
        }

        // A captured conflict only lives alongside the conflict status.
        if next.status != OpStatus::Conflict {
            next.conflict = None;
        }

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Operation {
        NewOperation::new(
            "board-1",
            "item-1",
            Payload::Patch {
                changes: json!({"title": "Ship it"}).as_object().cloned().unwrap(),
            },
        )
        .with_dependencies(["op-0"])
        .into_operation(
            QueueDomain::Item,
            "op-1".into(),
            1000,
            VectorClock::from_entries([("node-1", 1)]),
        )
    }

    #[test]
    fn into_operation_derives_defaults() {
        let op = sample();
        assert_eq!(op.status, OpStatus::Pending);
        assert_eq!(op.attempt, 0);
        assert_eq!(op.timestamp, 1000);
        assert_eq!(op.conflict_policy, ConflictPolicy::default());
        assert_eq!(op.dependencies, vec!["op-0".to_string()]);
        assert!(op.conflict.is_none());
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let op = NewOperation::new("b", "t", Payload::Replace { record: json!({}) })
            .with_timestamp(42)
            .into_operation(QueueDomain::Board, "op".into(), 1000, VectorClock::new());
        assert_eq!(op.timestamp, 42);
    }

    #[test]
    fn validate_requires_domain_key() {
        let missing = NewOperation::new(" ", "item-1", Payload::Replace { record: json!({}) });
        let err = missing.validate(QueueDomain::Document).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidPayload("document operation requires docId".into())
        );

        let bad_move = NewOperation::new(
            "board-1",
            "item-1",
            Payload::Move {
                destination: None,
                position: f64::NAN,
            },
        );
        assert!(bad_move.validate(QueueDomain::Item).is_err());
        assert!(NewOperation::new("board-1", "item-1", Payload::Replace { record: json!({}) })
            .validate(QueueDomain::Item)
            .is_ok());
    }

    #[test]
    fn status_transitions() {
        use OpStatus::*;
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Synced));
        assert!(Syncing.can_transition_to(Conflict));
        assert!(Syncing.can_transition_to(Pending));
        assert!(Conflict.can_transition_to(Synced));
        assert!(Conflict.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Syncing));

        assert!(!Pending.can_transition_to(Synced));
        assert!(!Pending.can_transition_to(Conflict));
        assert!(!Conflict.can_transition_to(Syncing));
        assert!(!Synced.can_transition_to(Pending));
    }

    #[test]
    fn patch_rejects_illegal_transition() {
        let op = sample();
        let err = OperationPatch::status(OpStatus::Synced).apply(&op).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidTransition {
                id: "op-1".into(),
                from: OpStatus::Pending,
                to: OpStatus::Synced,
            }
        );
    }

    #[test]
    fn begin_attempt_stamps_and_clears_conflict() {
        let op = sample();
        let next = OperationPatch::begin_attempt(&op, 5000).apply(&op).unwrap();
        assert_eq!(next.status, OpStatus::Syncing);
        assert_eq!(next.attempt, 1);
        assert_eq!(next.last_attempt_at, Some(5000));
        // original untouched
        assert_eq!(op.attempt, 0);
    }

    #[test]
    fn conflict_is_dropped_outside_conflict_status() {
        let op = sample();
        let syncing = OperationPatch::begin_attempt(&op, 10).apply(&op).unwrap();
        let captured = CapturedConflict {
            remote: RemoteState::new(json!({"title": "Other"}), VectorClock::new()),
            reason: Some("stale".into()),
            detected_at: 20,
        };
        let parked = OperationPatch::conflict(captured).apply(&syncing).unwrap();
        assert!(parked.has_open_conflict());
        assert_eq!(parked.last_activity(), 20);

        let retried = OperationPatch::retry().apply(&parked).unwrap();
        assert_eq!(retried.status, OpStatus::Pending);
        assert!(retried.conflict.is_none());
        assert_eq!(retried.attempt, 1);
    }

    #[test]
    fn move_payload_changed_values() {
        let payload = Payload::Move {
            destination: Some("column-2".into()),
            position: 3.0,
        };
        let changes = payload.changed_values();
        assert_eq!(changes["destination"], json!("column-2"));
        assert_eq!(changes["position"], json!(3.0));
    }

    #[test]
    fn serialization_format() {
        let op = sample();
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["targetId"], "item-1");
        assert_eq!(json["payload"]["kind"], "patch");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["conflictPolicy"]["strategy"], "last-writer-wins");
        assert!(json.get("conflict").is_none());

        let parsed: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn domain_namespaces_are_distinct() {
        let mut namespaces: Vec<_> = QueueDomain::ALL.iter().map(|d| d.namespace()).collect();
        namespaces.sort();
        namespaces.dedup();
        assert_eq!(namespaces.len(), QueueDomain::ALL.len());
        assert_eq!(QueueDomain::Document.scope_key(), "docId");
    }
}
