//! In-memory backend used when no durable database is available.

use super::{Backend, BackendKind, BackendWrite};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    namespaces: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn apply(&self, batch: Vec<BackendWrite>) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        for write in batch {
            match write {
                BackendWrite::Put {
                    namespace,
                    id,
                    body,
                } => {
                    namespaces.entry(namespace).or_default().insert(id, body);
                }
                BackendWrite::Delete { namespace, id } => {
                    if let Some(records) = namespaces.get_mut(&namespace) {
                        records.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<String>> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .and_then(|records| records.get(id).cloned()))
    }

    async fn get_all(&self, namespace: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .map(|records| {
                records
                    .iter()
                    .map(|(id, body)| (id.clone(), body.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        self.namespaces.write().await.remove(namespace);
        Ok(())
    }
}
