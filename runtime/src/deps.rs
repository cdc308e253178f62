//! Durable wrapper around the dependency graph.

use crate::error::Result;
use crate::now_millis;
use crate::store::{DurableStore, StoreWrite, DEPENDENCY_NAMESPACE};
use outbox_engine::{DependencyGraph, DependencyRecord, OperationId, Timestamp};
use tokio::sync::Mutex;

/// Shares one [`DependencyGraph`] between the queues and writes every touched
/// record through to the store.
pub struct DependencyTracker {
    store: DurableStore,
    graph: Mutex<DependencyGraph>,
}

impl DependencyTracker {
    /// Rebuild the graph from the persisted records.
    pub async fn load(store: DurableStore) -> Result<Self> {
        let records: Vec<DependencyRecord> = store.get_all(DEPENDENCY_NAMESPACE).await?;
        tracing::debug!(records = records.len(), "Loaded dependency records");
        Ok(Self {
            store,
            graph: Mutex::new(DependencyGraph::from_records(records)),
        })
    }

    pub async fn register(&self, id: &str, dependencies: &[OperationId]) -> Result<()> {
        self.register_with(id, dependencies, Vec::new()).await
    }

    /// Register `id` and persist its records in the same batch as `writes`.
    pub async fn register_with(
        &self,
        id: &str,
        dependencies: &[OperationId],
        writes: Vec<StoreWrite>,
    ) -> Result<()> {
        self.commit(writes, |graph, now| graph.register(id, dependencies, now))
            .await
    }

    pub async fn resolve(&self, id: &str) -> Result<()> {
        self.resolve_with(&[id.to_string()], Vec::new()).await
    }

    /// Resolve every id in `ids` and persist the records in the same batch as
    /// `writes`.
    pub async fn resolve_with(&self, ids: &[OperationId], writes: Vec<StoreWrite>) -> Result<()> {
        self.commit(writes, |graph, now| {
            ids.iter().flat_map(|id| graph.resolve(id, now)).collect()
        })
        .await?;
        tracing::debug!(op_ids = ?ids, "Dependencies resolved");
        Ok(())
    }

    pub async fn is_satisfied(&self, ids: &[OperationId]) -> bool {
        ids.is_empty() || self.graph.lock().await.is_satisfied(ids)
    }

    /// Ids that still block.
    pub async fn unresolved(&self, ids: &[OperationId]) -> Vec<OperationId> {
        self.graph
            .lock()
            .await
            .unresolved(ids)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<DependencyRecord> {
        self.graph.lock().await.get(id).cloned()
    }

    /// Drop every record, in memory and on disk.
    pub async fn clear(&self) -> Result<()> {
        let mut graph = self.graph.lock().await;
        self.store.clear(DEPENDENCY_NAMESPACE).await?;
        graph.clear();
        Ok(())
    }

    /// Apply `mutate` to a copy of the graph, write the touched records after
    /// `writes` in one batch and only then swap the copy in.
    async fn commit<F>(&self, mut writes: Vec<StoreWrite>, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut DependencyGraph, Timestamp) -> Vec<OperationId>,
    {
        let mut graph = self.graph.lock().await;
        let mut next = graph.clone();
        let mut touched = mutate(&mut next, now_millis());
        touched.sort();
        touched.dedup();

        for record in touched.iter().filter_map(|id| next.get(id)) {
            writes.push(StoreWrite::put(DEPENDENCY_NAMESPACE, &record.id, record)?);
        }
        self.store.write(writes).await?;
        *graph = next;
        Ok(())
    }
}
