//! Process-scoped wiring of the offline engine.

use crate::clock::ProcessClock;
use crate::config::Config;
use crate::crypto::{FileKeySlot, KeySlot, MemoryKeySlot, SessionKeyring};
use crate::deps::DependencyTracker;
use crate::enforcement::{PolicyEnforcer, SearchIndex};
use crate::error::Result;
use crate::processor::QueueProcessor;
use crate::queue::MutationQueue;
use crate::store::{BackendKind, DurableStore, META_NAMESPACE};
use outbox_engine::{NodeId, QueueDomain, VectorClock};
use std::collections::BTreeMap;
use std::sync::Arc;

const NODE_ID_KEY: &str = "node-id";

/// Handle to a fully wired engine. Cheap to clone.
#[derive(Clone)]
pub struct OfflineEngine {
    node_id: NodeId,
    store: DurableStore,
    clock: Arc<ProcessClock>,
    deps: Arc<DependencyTracker>,
    queues: BTreeMap<QueueDomain, MutationQueue>,
    processor: QueueProcessor,
    enforcer: PolicyEnforcer,
}

impl OfflineEngine {
    /// Open the store and load the persisted engine state.
    pub async fn open(config: Config) -> Result<Self> {
        if config.seals_without_durable_key() {
            tracing::warn!(
                "Sealing a file database with a memory-only session key; queued operations will be unreadable after a restart"
            );
        }

        let keyring = if config.encrypt_at_rest {
            let slot: Arc<dyn KeySlot> = match &config.key_slot_path {
                Some(path) => Arc::new(FileKeySlot::new(path.clone())),
                None => Arc::new(MemoryKeySlot::new()),
            };
            SessionKeyring::new(slot)
        } else {
            SessionKeyring::disabled()
        };

        let store = DurableStore::open(&config, Arc::new(keyring)).await;
        let node_id = resolve_node_id(&store, config.node_id.as_deref()).await?;

        let clock = Arc::new(ProcessClock::load(store.clone(), node_id.clone()).await?);
        let deps = Arc::new(DependencyTracker::load(store.clone()).await?);

        let queues: BTreeMap<QueueDomain, MutationQueue> = QueueDomain::ALL
            .iter()
            .map(|&domain| {
                let queue = MutationQueue::new(domain, store.clone(), clock.clone(), deps.clone());
                (domain, queue)
            })
            .collect();

        let processor = QueueProcessor::new(clock.clone());
        let enforcer = PolicyEnforcer::new(
            node_id.clone(),
            store.clone(),
            queues.values().cloned().collect(),
            deps.clone(),
        );

        tracing::info!(
            node_id = %node_id,
            backend = ?store.kind(),
            encrypted = store.keyring().is_enabled(),
            "Offline engine opened"
        );

        Ok(Self {
            node_id,
            store,
            clock,
            deps,
            queues,
            processor,
            enforcer,
        })
    }

    /// Attach the search index a remote wipe has to clear.
    pub fn with_search_index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.enforcer = self.enforcer.with_search_index(index);
        self
    }

    pub fn queue(&self, domain: QueueDomain) -> &MutationQueue {
        // every domain is inserted in `open`
        &self.queues[&domain]
    }

    pub fn queues(&self) -> impl Iterator<Item = &MutationQueue> {
        self.queues.values()
    }

    pub fn processor(&self) -> &QueueProcessor {
        &self.processor
    }

    pub fn enforcer(&self) -> &PolicyEnforcer {
        &self.enforcer
    }

    pub fn dependencies(&self) -> &Arc<DependencyTracker> {
        &self.deps
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub async fn clock(&self) -> VectorClock {
        self.clock.current().await
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.store.kind()
    }
}

/// Configured id, else the persisted one, else a fresh uuid that gets persisted.
async fn resolve_node_id(store: &DurableStore, configured: Option<&str>) -> Result<NodeId> {
    if let Some(node_id) = configured {
        store.put(META_NAMESPACE, NODE_ID_KEY, &node_id).await?;
        return Ok(node_id.to_string());
    }
    if let Some(node_id) = store.get::<NodeId>(META_NAMESPACE, NODE_ID_KEY).await? {
        return Ok(node_id);
    }
    let node_id = uuid::Uuid::new_v4().to_string();
    store.put(META_NAMESPACE, NODE_ID_KEY, &node_id).await?;
    tracing::info!(node_id = %node_id, "Generated node id");
    Ok(node_id)
}
