//! Vector clock for causal ordering of operations.
//!
//! Every queued operation carries a vector clock. Comparing the local clock of
//! an operation against the clock of a remote state tells the conflict engine
//! whether the local change is causally newer, older, identical, or concurrent.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Causal relation between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockOrdering {
    /// Left side dominates: strictly newer.
    Ahead,
    /// Left side is dominated: strictly older.
    Behind,
    /// Pairwise equal entries.
    Equal,
    /// Neither dominates. A true conflict.
    Concurrent,
}

impl ClockOrdering {
    /// The relation seen from the other side.
    pub fn reverse(self) -> Self {
        match self {
            ClockOrdering::Ahead => ClockOrdering::Behind,
            ClockOrdering::Behind => ClockOrdering::Ahead,
            other => other,
        }
    }
}

/// A vector clock mapping node ids to monotonically non-decreasing counters.
///
/// Backed by a `BTreeMap` so serialization order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clock from `(node, counter)` pairs.
    pub fn from_entries<I, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (N, u64)>,
        N: Into<NodeId>,
    {
        Self {
            entries: entries.into_iter().map(|(n, c)| (n.into(), c)).collect(),
        }
    }

    /// Counter for a node, 0 when absent.
    pub fn get(&self, node_id: &str) -> u64 {
        self.entries.get(node_id).copied().unwrap_or(0)
    }

    /// Whether the clock carries no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of tracked nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate `(node, counter)` pairs in node order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &u64)> {
        self.entries.iter()
    }

    /// Return a copy that is guaranteed to have an entry for `node_id`.
    pub fn ensure(&self, node_id: &str) -> Self {
        let mut next = self.clone();
        next.entries.entry(node_id.to_string()).or_insert(0);
        next
    }

    /// Return a copy with the entry for `node_id` incremented by one.
    pub fn increment(&self, node_id: &str) -> Self {
        let mut next = self.ensure(node_id);
        if let Some(counter) = next.entries.get_mut(node_id) {
            *counter += 1;
        }
        next
    }

    /// Return the per-node maximum of `self` and `other`.
    pub fn merge(&self, other: &VectorClock) -> Self {
        let mut next = self.clone();
        for (node_id, &counter) in &other.entries {
            let current = next.entries.entry(node_id.clone()).or_insert(0);
            *current = (*current).max(counter);
        }
        next
    }

    /// Merge any number of clocks into one.
    pub fn merge_all<'a>(clocks: impl IntoIterator<Item = &'a VectorClock>) -> Self {
        clocks
            .into_iter()
            .fold(VectorClock::new(), |acc, clock| acc.merge(clock))
    }

    /// Compare two clocks over the union of their node ids.
    ///
    /// Returns `None` when either clock is empty: there is no causal
    /// information to compare, and callers must treat the case as manual.
    pub fn compare(&self, other: &VectorClock) -> Option<ClockOrdering> {
        if self.is_empty() || other.is_empty() {
            return None;
        }

        let mut greater = false;
        let mut less = false;
        let nodes = self.entries.keys().chain(other.entries.keys());
        for node_id in nodes {
            let left = self.get(node_id);
            let right = other.get(node_id);
            if left > right {
                greater = true;
            } else if left < right {
                less = true;
            }
            if greater && less {
                return Some(ClockOrdering::Concurrent);
            }
        }

        Some(match (greater, less) {
            (true, false) => ClockOrdering::Ahead,
            (false, true) => ClockOrdering::Behind,
            _ => ClockOrdering::Equal,
        })
    }
}
