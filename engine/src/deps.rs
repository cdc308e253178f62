//! Dependency graph between queued operations.
//!
//! An edge `a -> b` means "a must resolve before b is synced". Records can be
//! forward-declared: registering `b` with dependency `a` creates an unresolved
//! record for `a` if none exists yet. No cycle detection is performed;
//! dependencies model linear causal precedence.

use crate::{OperationId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dependency bookkeeping for one operation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRecord {
    pub id: OperationId,
    pub dependencies: Vec<OperationId>,
    pub dependents: Vec<OperationId>,
    pub resolved: bool,
    pub last_updated: Timestamp,
}

impl DependencyRecord {
    fn new(id: OperationId, now: Timestamp) -> Self {
        Self {
            id,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            resolved: false,
            last_updated: now,
        }
    }
}

/// In-memory dependency graph.
///
/// Mutating calls return the ids of the records they touched so a caller can
/// persist exactly those records.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    records: HashMap<OperationId, DependencyRecord>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from persisted records.
    pub fn from_records(records: impl IntoIterator<Item = DependencyRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }

    /// Create or update the record for `id` and link it to its dependencies.
    pub fn register(
        &mut self,
        id: &str,
        dependencies: &[OperationId],
        now: Timestamp,
    ) -> Vec<OperationId> {
        let mut touched = vec![id.to_string()];

        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| DependencyRecord::new(id.to_string(), now));
        for dep in dependencies {
            if !record.dependencies.contains(dep) {
                record.dependencies.push(dep.clone());
            }
        }
        record.last_updated = now;

        for dep in dependencies {
            let dep_record = self
                .records
                .entry(dep.clone())
                .or_insert_with(|| DependencyRecord::new(dep.clone(), now));
            if !dep_record.dependents.iter().any(|d| d == id) {
                dep_record.dependents.push(id.to_string());
            }
            dep_record.last_updated = now;
            if !touched.contains(dep) {
                touched.push(dep.clone());
            }
        }

        touched
    }

    /// Mark `id` resolved, creating a resolved stub if it was never registered.
    pub fn resolve(&mut self, id: &str, now: Timestamp) -> Vec<OperationId> {
        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| DependencyRecord::new(id.to_string(), now));
        record.resolved = true;
        record.last_updated = now;
        vec![id.to_string()]
    }

    /// True only if every id is known and resolved. Unknown ids are unsatisfied.
    pub fn is_satisfied(&self, ids: &[OperationId]) -> bool {
        ids.iter()
            .all(|id| self.records.get(id).is_some_and(|r| r.resolved))
    }

    /// Ids from `ids` that still block.
    pub fn unresolved<'a>(&self, ids: &'a [OperationId]) -> Vec<&'a OperationId> {
        ids.iter()
            .filter(|id| !self.records.get(*id).is_some_and(|r| r.resolved))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&DependencyRecord> {
        self.records.get(id)
    }

    pub fn records(&self) -> impl Iterator<Item = &DependencyRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<OperationId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn register_forward_declares_dependencies() {
        let mut graph = DependencyGraph::new();
        let touched = graph.register("b", &ids(&["a"]), 10);
        assert_eq!(touched, ids(&["b", "a"]));

        let a = graph.get("a").unwrap();
        assert!(!a.resolved);
        assert_eq!(a.dependents, ids(&["b"]));
        assert_eq!(graph.get("b").unwrap().dependencies, ids(&["a"]));
    }

    #[test]
    fn register_is_idempotent() {
        let mut graph = DependencyGraph::new();
        graph.register("b", &ids(&["a"]), 10);
        graph.register("b", &ids(&["a"]), 11);
        assert_eq!(graph.get("a").unwrap().dependents.len(), 1);
        assert_eq!(graph.get("b").unwrap().dependencies.len(), 1);
        assert_eq!(graph.get("b").unwrap().last_updated, 11);
    }

    #[test]
    fn satisfied_only_when_all_resolved() {
        let mut graph = DependencyGraph::new();
        graph.register("c", &ids(&["a", "b"]), 10);
        assert!(!graph.is_satisfied(&ids(&["a", "b"])));

        graph.resolve("a", 11);
        assert!(!graph.is_satisfied(&ids(&["a", "b"])));
        assert_eq!(graph.unresolved(&ids(&["a", "b"])), vec![&"b".to_string()]);

        graph.resolve("b", 12);
        assert!(graph.is_satisfied(&ids(&["a", "b"])));
    }

    #[test]
    fn unknown_ids_are_unsatisfied() {
        let graph = DependencyGraph::new();
        assert!(!graph.is_satisfied(&ids(&["ghost"])));
        assert!(graph.is_satisfied(&[]));
    }

    #[test]
    fn resolve_creates_stub() {
        let mut graph = DependencyGraph::new();
        graph.resolve("cancelled", 5);
        assert!(graph.is_satisfied(&ids(&["cancelled"])));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn from_records_roundtrip() {
        let mut graph = DependencyGraph::new();
        graph.register("b", &ids(&["a"]), 1);
        graph.resolve("a", 2);

        let rebuilt = DependencyGraph::from_records(graph.records().cloned());
        assert!(rebuilt.is_satisfied(&ids(&["a"])));
        assert_eq!(rebuilt.get("b"), graph.get("b"));
    }
}
