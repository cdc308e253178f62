//! SQLite backend.

use super::{Backend, BackendKind, BackendWrite};
use crate::error::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Key-value rows in a single `records` table, keyed by `(namespace, id)`.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Connect and run migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` gets its own database, so pin the pool
        // to one connection that never expires.
        let pool = if Self::is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Whether `database_url` names a database that lives only in memory.
    pub fn is_memory_url(database_url: &str) -> bool {
        database_url.contains(":memory:") || database_url.contains("mode=memory")
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    async fn apply(&self, batch: Vec<BackendWrite>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for write in &batch {
            match write {
                BackendWrite::Put {
                    namespace,
                    id,
                    body,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO records (namespace, id, body)
                        VALUES (?1, ?2, ?3)
                        ON CONFLICT (namespace, id) DO UPDATE SET
                            body = excluded.body
                        "#,
                    )
                    .bind(namespace)
                    .bind(id)
                    .bind(body)
                    .execute(&mut *tx)
                    .await?;
                }
                BackendWrite::Delete { namespace, id } => {
                    sqlx::query("DELETE FROM records WHERE namespace = ?1 AND id = ?2")
                        .bind(namespace)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT body FROM records WHERE namespace = ?1 AND id = ?2")
            .bind(namespace)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("body")?),
            None => None,
        })
    }

    async fn get_all(&self, namespace: &str) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT id, body FROM records WHERE namespace = ?1 ORDER BY id")
            .bind(namespace)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("id")?, row.try_get("body")?)))
            .collect()
    }

    async fn clear(&self, namespace: &str) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE namespace = ?1")
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
