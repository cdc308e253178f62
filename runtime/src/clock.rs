//! The process-wide vector clock of this device.

use crate::error::Result;
use crate::store::{DurableStore, META_NAMESPACE};
use outbox_engine::{NodeId, VectorClock};
use tokio::sync::Mutex;

const CLOCK_KEY: &str = "vector-clock";

/// Local node clock, persisted in the unsealed `meta` namespace.
pub struct ProcessClock {
    node_id: NodeId,
    store: DurableStore,
    clock: Mutex<VectorClock>,
}

impl ProcessClock {
    /// Load the persisted clock, making sure the local node has an entry.
    pub async fn load(store: DurableStore, node_id: NodeId) -> Result<Self> {
        let clock: VectorClock = store
            .get(META_NAMESPACE, CLOCK_KEY)
            .await?
            .unwrap_or_default();
        Ok(Self {
            clock: Mutex::new(clock.ensure(&node_id)),
            node_id,
            store,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn current(&self) -> VectorClock {
        self.clock.lock().await.clone()
    }

    /// Advance the local entry for a new operation.
    ///
    /// A clock supplied by the caller is merged in first, so the result
    /// dominates both it and everything this device issued before.
    pub async fn tick(&self, observed: Option<&VectorClock>) -> Result<VectorClock> {
        let mut clock = self.clock.lock().await;
        let base = match observed {
            Some(observed) => clock.merge(observed),
            None => clock.clone(),
        };
        let next = base.increment(&self.node_id);
        self.store.put(META_NAMESPACE, CLOCK_KEY, &next).await?;
        *clock = next.clone();
        Ok(next)
    }

    /// Fold a clock acknowledged by the remote into the local one.
    pub async fn observe(&self, remote: &VectorClock) -> Result<VectorClock> {
        let mut clock = self.clock.lock().await;
        let next = clock.merge(remote);
        if next != *clock {
            self.store.put(META_NAMESPACE, CLOCK_KEY, &next).await?;
            *clock = next.clone();
        }
        Ok(next)
    }
}
