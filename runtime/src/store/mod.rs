//! Durable store for queued operations, snapshots and engine metadata.
//!
//! The store is a set of independent named namespaces (one per logical queue)
//! holding JSON records keyed by id. Raw IO goes through a [`Backend`]: SQLite
//! when a database is configured and reachable, an in-memory map otherwise.
//!
//! Values are sealed by the [`SessionKeyring`] on the way in. The stored body
//! always says whether it is sealed, so records written while encryption was
//! unavailable stay readable.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::config::Config;
use crate::crypto::{Envelope, SessionKeyring};
use crate::error::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Engine metadata: node id, process clock, wipe acknowledgements. Never sealed.
pub const META_NAMESPACE: &str = "meta";

/// Persisted dependency records.
pub const DEPENDENCY_NAMESPACE: &str = "dependencies";

/// Which persistence primitive backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Memory,
}

/// A single write in an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendWrite {
    Put {
        namespace: String,
        id: String,
        body: String,
    },
    Delete {
        namespace: String,
        id: String,
    },
}

/// Raw key-value persistence.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Apply every write or none of them.
    async fn apply(&self, batch: Vec<BackendWrite>) -> Result<()>;

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<String>>;

    /// Every `(id, body)` in a namespace, ordered by id.
    async fn get_all(&self, namespace: &str) -> Result<Vec<(String, String)>>;

    async fn clear(&self, namespace: &str) -> Result<()>;

    async fn put(&self, namespace: &str, id: &str, body: String) -> Result<()> {
        self.apply(vec![BackendWrite::Put {
            namespace: namespace.to_string(),
            id: id.to_string(),
            body,
        }])
        .await
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<()> {
        self.apply(vec![BackendWrite::Delete {
            namespace: namespace.to_string(),
            id: id.to_string(),
        }])
        .await
    }
}

/// Self-describing stored representation.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "lowercase")]
enum StoredValue {
    Plain { value: Value },
    Sealed { envelope: Envelope },
}

/// A typed write queued for [`DurableStore::write`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    Put {
        namespace: String,
        id: String,
        value: Value,
    },
    Delete {
        namespace: String,
        id: String,
    },
}

impl StoreWrite {
    pub fn put<T: Serialize>(namespace: &str, id: &str, value: &T) -> Result<Self> {
        Ok(StoreWrite::Put {
            namespace: namespace.to_string(),
            id: id.to_string(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn delete(namespace: &str, id: &str) -> Self {
        StoreWrite::Delete {
            namespace: namespace.to_string(),
            id: id.to_string(),
        }
    }
}

/// One stored row as seen by [`DurableStore::scan`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord<T> {
    pub id: String,
    pub size: usize,
    pub value: Option<T>,
}

/// Typed, optionally encrypted access to a [`Backend`].
#[derive(Clone)]
pub struct DurableStore {
    backend: Arc<dyn Backend>,
    keyring: Arc<SessionKeyring>,
}

impl DurableStore {
    pub fn new(backend: Arc<dyn Backend>, keyring: Arc<SessionKeyring>) -> Self {
        Self { backend, keyring }
    }

    /// Open the configured backend, degrading to memory when it is unavailable.
    pub async fn open(config: &Config, keyring: Arc<SessionKeyring>) -> Self {
        let backend: Arc<dyn Backend> = match &config.database_url {
            Some(url) => match SqliteBackend::connect(url, config.max_connections).await {
                Ok(backend) => {
                    tracing::info!("Durable store opened on SQLite");
                    Arc::new(backend)
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Durable store unavailable, falling back to memory; offline edits will not survive a restart"
                    );
                    Arc::new(MemoryBackend::new())
                }
            },
            None => {
                tracing::info!("No database configured, using in-memory store");
                Arc::new(MemoryBackend::new())
            }
        };
        Self::new(backend, keyring)
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn keyring(&self) -> &Arc<SessionKeyring> {
        &self.keyring
    }

    async fn encode(&self, namespace: &str, value: Value) -> Result<String> {
        let stored = if namespace == META_NAMESPACE {
            StoredValue::Plain { value }
        } else {
            match self.keyring.encrypt(&value).await {
                Some(envelope) => StoredValue::Sealed { envelope },
                None => StoredValue::Plain { value },
            }
        };
        Ok(serde_json::to_string(&stored)?)
    }

    async fn decode<T: DeserializeOwned>(&self, namespace: &str, id: &str, body: &str) -> Option<T> {
        let stored: StoredValue = match serde_json::from_str(body) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(namespace, id, error = %e, "Unreadable record, ignoring it");
                return None;
            }
        };
        let value: Value = match stored {
            StoredValue::Plain { value } => value,
            StoredValue::Sealed { envelope } => match self.keyring.decrypt(&envelope).await {
                Some(value) => value,
                None => {
                    tracing::warn!(namespace, id, "Undecryptable record, treating it as absent");
                    return None;
                }
            },
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(namespace, id, error = %e, "Record has unexpected shape, ignoring it");
                None
            }
        }
    }

    /// Apply typed writes atomically.
    pub async fn write(&self, batch: Vec<StoreWrite>) -> Result<()> {
        let mut raw = Vec::with_capacity(batch.len());
        for write in batch {
            raw.push(match write {
                StoreWrite::Put {
                    namespace,
                    id,
                    value,
                } => {
                    let body = self.encode(&namespace, value).await?;
                    BackendWrite::Put {
                        namespace,
                        id,
                        body,
                    }
                }
                StoreWrite::Delete { namespace, id } => BackendWrite::Delete { namespace, id },
            });
        }
        self.backend.apply(raw).await
    }

    pub async fn put<T: Serialize>(&self, namespace: &str, id: &str, value: &T) -> Result<()> {
        self.write(vec![StoreWrite::put(namespace, id, value)?]).await
    }

    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, id: &str) -> Result<Option<T>> {
        Ok(match self.backend.get(namespace, id).await? {
            Some(body) => self.decode(namespace, id, &body).await,
            None => None,
        })
    }

    /// Every readable record of a namespace. Undecodable records are skipped.
    pub async fn get_all<T: DeserializeOwned>(&self, namespace: &str) -> Result<Vec<T>> {
        let rows = self.backend.get_all(namespace).await?;
        let mut values = Vec::with_capacity(rows.len());
        for (id, body) in rows {
            if let Some(value) = self.decode(namespace, &id, &body).await {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Every row of a namespace with its stored size. `value` is `None` for
    /// rows that no longer decode, such as records sealed under a lost key.
    pub async fn scan<T: DeserializeOwned>(&self, namespace: &str) -> Result<Vec<StoredRecord<T>>> {
        let rows = self.backend.get_all(namespace).await?;
        let mut records = Vec::with_capacity(rows.len());
        for (id, body) in rows {
            let value = self.decode(namespace, &id, &body).await;
            records.push(StoredRecord {
                size: body.len(),
                id,
                value,
            });
        }
        Ok(records)
    }

    /// Stored size in bytes of every record of a namespace.
    pub async fn sizes(&self, namespace: &str) -> Result<Vec<(String, usize)>> {
        Ok(self
            .backend
            .get_all(namespace)
            .await?
            .into_iter()
            .map(|(id, body)| (id, body.len()))
            .collect())
    }

    pub async fn delete(&self, namespace: &str, id: &str) -> Result<()> {
        self.backend.delete(namespace, id).await
    }

    pub async fn clear(&self, namespace: &str) -> Result<()> {
        tracing::debug!(namespace, "Clearing namespace");
        self.backend.clear(namespace).await
    }
}
