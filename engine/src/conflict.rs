//! Conflict resolution between a queued local operation and divergent remote state.
//!
//! # Algorithm
//!
//! 1. If either vector clock is empty, the outcome is [`Resolution::Manual`]
//! 2. Last-writer-wins consults the causal ordering of the two clocks
//! 3. Set and numeric strategies are commutative, so they merge the configured
//!    field regardless of ordering and return the remote record with that field
//!    replaced
//! 4. Anything else is manual

use crate::{ClockOrdering, Operation, RemoteState};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which side wins a last-writer-wins tie between equal clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preference {
    Local,
    Remote,
}

/// Policy used to reconcile an operation with a divergent remote state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Causally newer side wins (default)
    LastWriterWins {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefer: Option<Preference>,
    },
    SetUnion { field: String },
    SetIntersection { field: String },
    NumericMax { field: String },
    NumericMin { field: String },
    NumericSum { field: String },
    /// A strategy this build does not know; always escalates to manual.
    #[serde(other)]
    Unsupported,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        ConflictPolicy::LastWriterWins { prefer: None }
    }
}

impl ConflictPolicy {
    pub fn last_writer_wins() -> Self {
        Self::default()
    }

    pub fn prefer(side: Preference) -> Self {
        ConflictPolicy::LastWriterWins { prefer: Some(side) }
    }

    pub fn set_union(field: impl Into<String>) -> Self {
        ConflictPolicy::SetUnion {
            field: field.into(),
        }
    }

    pub fn set_intersection(field: impl Into<String>) -> Self {
        ConflictPolicy::SetIntersection {
            field: field.into(),
        }
    }

    pub fn numeric_max(field: impl Into<String>) -> Self {
        ConflictPolicy::NumericMax {
            field: field.into(),
        }
    }

    pub fn numeric_min(field: impl Into<String>) -> Self {
        ConflictPolicy::NumericMin {
            field: field.into(),
        }
    }

    pub fn numeric_sum(field: impl Into<String>) -> Self {
        ConflictPolicy::NumericSum {
            field: field.into(),
        }
    }
}

/// Outcome of resolving a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "record", rename_all = "kebab-case")]
pub enum Resolution {
    /// Local operation stands
    KeepLocal,
    /// Remote record replaces local intent
    UseRemote(Value),
    /// Both sides combined into a new record
    Merge(Value),
    /// Needs a human decision
    Manual,
}

impl Resolution {
    /// The record the caller should adopt, if any.
    pub fn resolved_record(&self) -> Option<&Value> {
        match self {
            Resolution::UseRemote(record) | Resolution::Merge(record) => Some(record),
            Resolution::KeepLocal | Resolution::Manual => None,
        }
    }
}

/// Resolve `op` against `remote` using the operation's conflict policy.
pub fn resolve(op: &Operation, remote: &RemoteState) -> Resolution {
    let Some(ordering) = op.vector_clock.compare(&remote.vector_clock) else {
        return Resolution::Manual;
    };

    match &op.conflict_policy {
        ConflictPolicy::LastWriterWins { prefer } => match ordering {
            ClockOrdering::Ahead => Resolution::KeepLocal,
            ClockOrdering::Behind => Resolution::UseRemote(remote.record.clone()),
            ClockOrdering::Equal => match prefer {
                Some(Preference::Local) => Resolution::KeepLocal,
                Some(Preference::Remote) => Resolution::UseRemote(remote.record.clone()),
                None => Resolution::Manual,
            },
            ClockOrdering::Concurrent => Resolution::Manual,
        },
        ConflictPolicy::SetUnion { field } => {
            let (local, remote_values) = set_operands(op, remote, field);
            let mut merged = local;
            for value in remote_values {
                if !merged.contains(&value) {
                    merged.push(value);
                }
            }
            Resolution::Merge(replace_field(&remote.record, field, Value::Array(merged)))
        }
        ConflictPolicy::SetIntersection { field } => {
            let (local, remote_values) = set_operands(op, remote, field);
            let mut merged: Vec<Value> = Vec::new();
            for value in local {
                if remote_values.contains(&value) && !merged.contains(&value) {
                    merged.push(value);
                }
            }
            Resolution::Merge(replace_field(&remote.record, field, Value::Array(merged)))
        }
        ConflictPolicy::NumericMax { field } => {
            numeric_merge(op, remote, field, |a, b| a.max(b))
        }
        ConflictPolicy::NumericMin { field } => {
            numeric_merge(op, remote, field, |a, b| a.min(b))
        }
        ConflictPolicy::NumericSum { field } => numeric_merge(op, remote, field, |a, b| a + b),
        ConflictPolicy::Unsupported => Resolution::Manual,
    }
}

fn local_field(op: &Operation, field: &str) -> Option<Value> {
    op.payload.changed_values().get(field).cloned()
}

fn remote_field<'a>(remote: &'a RemoteState, field: &str) -> Option<&'a Value> {
    remote.record.as_object().and_then(|record| record.get(field))
}

fn as_set(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => {
            let mut set: Vec<Value> = Vec::with_capacity(items.len());
            for item in items {
                if !set.contains(item) {
                    set.push(item.clone());
                }
            }
            set
        }
        _ => Vec::new(),
    }
}

fn set_operands(op: &Operation, remote: &RemoteState, field: &str) -> (Vec<Value>, Vec<Value>) {
    let local = local_field(op, field);
    (as_set(local.as_ref()), as_set(remote_field(remote, field)))
}

fn as_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()).unwrap_or(0.0),
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn numeric_merge(
    op: &Operation,
    remote: &RemoteState,
    field: &str,
    combine: impl Fn(f64, f64) -> f64,
) -> Resolution {
    let local = local_field(op, field);
    let value = combine(as_number(local.as_ref()), as_number(remote_field(remote, field)));
    Resolution::Merge(replace_field(&remote.record, field, number_value(value)))
}

fn replace_field(record: &Value, field: &str, value: Value) -> Value {
    let mut object = record.as_object().cloned().unwrap_or_else(Map::new);
    object.insert(field.to_string(), value);
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewOperation, Payload, QueueDomain, VectorClock};
    use serde_json::json;

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        VectorClock::from_entries(entries.iter().map(|(n, c)| (n.to_string(), *c)))
    }

    fn op_with(policy: ConflictPolicy, changes: Value, vc: VectorClock) -> Operation {
        NewOperation::new(
            "board-1",
            "item-1",
            Payload::Patch {
                changes: changes.as_object().cloned().unwrap(),
            },
        )
        .with_policy(policy)
        .into_operation(QueueDomain::Item, "op-1".into(), 1000, vc)
    }

    #[test]
    fn empty_clock_is_manual() {
        let op = op_with(ConflictPolicy::default(), json!({}), VectorClock::new());
        let remote = RemoteState::new(json!({}), clock(&[("remote", 1)]));
        assert_eq!(resolve(&op, &remote), Resolution::Manual);

        let op = op_with(ConflictPolicy::set_union("tags"), json!({}), clock(&[("local", 1)]));
        let remote = RemoteState::new(json!({}), VectorClock::new());
        assert_eq!(resolve(&op, &remote), Resolution::Manual);
    }

    #[test]
    fn lww_local_ahead_keeps_local() {
        let op = op_with(ConflictPolicy::default(), json!({"title": "A"}), clock(&[("local", 2)]));
        let remote = RemoteState::new(json!({"title": "B"}), clock(&[("local", 1)]));
        assert_eq!(resolve(&op, &remote), Resolution::KeepLocal);
    }

    #[test]
    fn lww_local_behind_uses_remote() {
        let op = op_with(ConflictPolicy::default(), json!({"title": "A"}), clock(&[("local", 1)]));
        let remote = RemoteState::new(
            json!({"title": "B"}),
            clock(&[("local", 1), ("remote", 3)]),
        );
        assert_eq!(resolve(&op, &remote), Resolution::UseRemote(json!({"title": "B"})));
    }

    #[test]
    fn lww_equal_uses_preference() {
        let vc = clock(&[("local", 1)]);
        let remote = RemoteState::new(json!({"title": "B"}), vc.clone());

        let op = op_with(ConflictPolicy::default(), json!({}), vc.clone());
        assert_eq!(resolve(&op, &remote), Resolution::Manual);

        let op = op_with(ConflictPolicy::prefer(Preference::Local), json!({}), vc.clone());
        assert_eq!(resolve(&op, &remote), Resolution::KeepLocal);

        let op = op_with(ConflictPolicy::prefer(Preference::Remote), json!({}), vc);
        assert_eq!(resolve(&op, &remote), Resolution::UseRemote(json!({"title": "B"})));
    }

    #[test]
    fn lww_concurrent_is_manual_even_with_preference() {
        let op = op_with(
            ConflictPolicy::prefer(Preference::Local),
            json!({}),
            clock(&[("local", 2), ("remote", 0)]),
        );
        let remote = RemoteState::new(json!({}), clock(&[("local", 1), ("remote", 1)]));
        assert_eq!(resolve(&op, &remote), Resolution::Manual);
    }

    #[test]
    fn set_union_merges_both_sides() {
        let op = op_with(
            ConflictPolicy::set_union("labels"),
            json!({"labels": ["a", "b"]}),
            clock(&[("local", 1)]),
        );
        let remote = RemoteState::new(
            json!({"labels": ["b", "c"], "title": "T"}),
            clock(&[("remote", 1)]),
        );
        let Resolution::Merge(record) = resolve(&op, &remote) else {
            panic!("expected merge");
        };
        let labels = record["labels"].as_array().unwrap();
        assert_eq!(labels.len(), 3);
        for label in ["a", "b", "c"] {
            assert!(labels.contains(&json!(label)));
        }
        assert_eq!(record["title"], "T");
    }

    #[test]
    fn set_intersection_keeps_common_values() {
        let op = op_with(
            ConflictPolicy::set_intersection("labels"),
            json!({"labels": ["a", "b"]}),
            clock(&[("local", 1)]),
        );
        let remote = RemoteState::new(json!({"labels": ["b", "c"]}), clock(&[("remote", 1)]));
        assert_eq!(resolve(&op, &remote), Resolution::Merge(json!({"labels": ["b"]})));
    }

    #[test]
    fn set_treats_non_arrays_as_empty() {
        let op = op_with(
            ConflictPolicy::set_union("labels"),
            json!({"labels": "oops"}),
            clock(&[("local", 1)]),
        );
        let remote = RemoteState::new(json!({"labels": ["x"]}), clock(&[("remote", 1)]));
        assert_eq!(resolve(&op, &remote), Resolution::Merge(json!({"labels": ["x"]})));
    }

    #[test]
    fn numeric_sum_adds_fields() {
        let op = op_with(
            ConflictPolicy::numeric_sum("estimate"),
            json!({"estimate": 5}),
            clock(&[("local", 1)]),
        );
        let remote = RemoteState::new(json!({"estimate": 3}), clock(&[("remote", 1)]));
        assert_eq!(resolve(&op, &remote), Resolution::Merge(json!({"estimate": 8})));
    }

    #[test]
    fn numeric_max_min_coerce() {
        let vc_local = clock(&[("local", 1)]);
        let remote = RemoteState::new(json!({"points": "7"}), clock(&[("remote", 1)]));

        let op = op_with(ConflictPolicy::numeric_max("points"), json!({"points": 4}), vc_local.clone());
        assert_eq!(resolve(&op, &remote), Resolution::Merge(json!({"points": 7})));

        let op = op_with(ConflictPolicy::numeric_min("points"), json!({"points": 4.5}), vc_local.clone());
        assert_eq!(resolve(&op, &remote), Resolution::Merge(json!({"points": 4.5})));

        // missing local value defaults to zero
        let op = op_with(ConflictPolicy::numeric_min("points"), json!({}), vc_local);
        assert_eq!(resolve(&op, &remote), Resolution::Merge(json!({"points": 0})));
    }

    #[test]
    fn unsupported_policy_is_manual() {
        let policy: ConflictPolicy =
            serde_json::from_value(json!({"strategy": "crdt-magic", "field": "x"})).unwrap();
        assert_eq!(policy, ConflictPolicy::Unsupported);

        let op = op_with(policy, json!({}), clock(&[("local", 2)]));
        let remote = RemoteState::new(json!({}), clock(&[("local", 1)]));
        assert_eq!(resolve(&op, &remote), Resolution::Manual);
    }

    #[test]
    fn policy_serialization_format() {
        let json = serde_json::to_value(ConflictPolicy::numeric_sum("estimate")).unwrap();
        assert_eq!(json, json!({"strategy": "numeric-sum", "field": "estimate"}));

        let json = serde_json::to_value(ConflictPolicy::prefer(Preference::Remote)).unwrap();
        assert_eq!(json, json!({"strategy": "last-writer-wins", "prefer": "remote"}));

        let parsed: ConflictPolicy =
            serde_json::from_value(json!({"strategy": "last-writer-wins"})).unwrap();
        assert_eq!(parsed, ConflictPolicy::default());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_algebraic_merges_ignore_ordering(
                local in -1000i64..1000,
                remote_value in -1000i64..1000,
                local_counter in 1u64..5,
                remote_counter in 1u64..5,
            ) {
                let op = op_with(
                    ConflictPolicy::numeric_sum("n"),
                    json!({"n": local}),
                    clock(&[("local", local_counter)]),
                );
                let remote = RemoteState::new(json!({"n": remote_value}), clock(&[("remote", remote_counter)]));
                prop_assert_eq!(
                    resolve(&op, &remote),
                    Resolution::Merge(json!({"n": local + remote_value}))
                );
            }

            #[test]
            fn prop_union_contains_both_sides(
                local in proptest::collection::vec(0u8..10, 0..6),
                remote_values in proptest::collection::vec(0u8..10, 0..6),
            ) {
                let op = op_with(
                    ConflictPolicy::set_union("s"),
                    json!({"s": local.clone()}),
                    clock(&[("local", 1)]),
                );
                let remote = RemoteState::new(json!({"s": remote_values.clone()}), clock(&[("remote", 1)]));
                let resolution = resolve(&op, &remote);
                let record = resolution.resolved_record().unwrap();
                let merged = record["s"].as_array().unwrap();
                for v in local.iter().chain(remote_values.iter()) {
                    prop_assert!(merged.contains(&json!(v)));
                }
            }
        }
    }
}
