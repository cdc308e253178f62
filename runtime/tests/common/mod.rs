//! Shared fixtures for runtime integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use outbox_engine::{NewOperation, Operation, OperationId, Payload};
use outbox_runtime::{SyncError, SyncOutcome, Synchronizer};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Synchronizer that replays scripted outcomes per target id.
///
/// Targets without a script are accepted with `Success { record: None }`.
#[derive(Default)]
pub struct ScriptedSync {
    script: Mutex<HashMap<String, VecDeque<Result<SyncOutcome, String>>>>,
    calls: Mutex<Vec<OperationId>>,
}

impl ScriptedSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(self, target_id: &str, outcome: SyncOutcome) -> Self {
        self.push(target_id, Ok(outcome));
        self
    }

    pub fn then_fail(self, target_id: &str, message: &str) -> Self {
        self.push(target_id, Err(message.to_string()));
        self
    }

    fn push(&self, target_id: &str, outcome: Result<SyncOutcome, String>) {
        self.script
            .lock()
            .unwrap()
            .entry(target_id.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Operation ids handed to the synchronizer so far.
    pub fn calls(&self) -> Vec<OperationId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synchronizer for ScriptedSync {
    async fn sync(&self, op: &Operation) -> Result<SyncOutcome, SyncError> {
        self.calls.lock().unwrap().push(op.id.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .get_mut(&op.target_id)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(message.into()),
            None => Ok(SyncOutcome::Success { record: None }),
        }
    }
}

pub fn patch(changes: Value) -> Payload {
    Payload::Patch {
        changes: changes.as_object().cloned().unwrap_or_default(),
    }
}

/// A title change on `target_id` within `scope_id`.
pub fn rename(scope_id: &str, target_id: &str, title: &str) -> NewOperation {
    NewOperation::new(scope_id, target_id, patch(json!({ "title": title })))
}
