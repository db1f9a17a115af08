//! Row sink backed by SQLite
//!
//! A flush is one transaction of multi-row `INSERT OR REPLACE` statements.
//! The end state is the same as inserting row by row; a failed
//! transaction fails every key of the batch and leaves nothing behind.

use super::buffer::BufferedContent;
use super::sink::{KeyFailure, PersistenceSink};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, error};

/// Rows per INSERT statement (4 binds each)
const ROWS_PER_STATEMENT: usize = 200;

/// One result row produced for a processed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRecord {
    pub item_id: u32,
    /// JSON document
    pub payload: String,
}

impl RowRecord {
    pub fn new(item_id: u32, payload: String) -> Self {
        Self { item_id, payload }
    }

    pub fn json<T: Serialize>(item_id: u32, value: &T) -> Result<Self> {
        Ok(Self {
            item_id,
            payload: serde_json::to_string(value)?,
        })
    }
}

impl BufferedContent for RowRecord {
    fn byte_size(&self) -> usize {
        self.payload.len() + std::mem::size_of::<u32>()
    }
}

/// Inserts rows into the `processed_items` table
pub struct SqliteRowSink {
    db: SqlitePool,
}

impl SqliteRowSink {
    /// Connect (creating the database file if needed) and prepare the table
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let db = SqlitePool::connect_with(options).await?;
        Self::with_pool(db).await
    }

    pub async fn with_pool(db: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_items (
                key TEXT PRIMARY KEY,
                item_id INTEGER NOT NULL,
                payload TEXT NOT NULL,
                written_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        Ok(Self { db })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM processed_items")
            .fetch_one(&self.db)
            .await?;
        Ok(count)
    }

    pub async fn get(&self, key: &str) -> Result<Option<RowRecord>> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT item_id, payload FROM processed_items WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|(item_id, payload)| RowRecord::new(item_id as u32, payload)))
    }

    async fn insert_all(&self, batch: &[(String, RowRecord)]) -> Result<()> {
        let written_at = Utc::now().to_rfc3339();
        let mut tx = self.db.begin().await?;

        for chunk in batch.chunks(ROWS_PER_STATEMENT) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT OR REPLACE INTO processed_items (key, item_id, payload, written_at) ",
            );
            builder.push_values(chunk, |mut row, (key, record)| {
                row.push_bind(key.clone())
                    .push_bind(record.item_id as i64)
                    .push_bind(record.payload.clone())
                    .push_bind(written_at.clone());
            });
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for SqliteRowSink {
    type Content = RowRecord;

    async fn persist_batch(&self, batch: &[(String, RowRecord)]) -> Vec<KeyFailure> {
        match self.insert_all(batch).await {
            Ok(()) => {
                debug!("Inserted {} rows", batch.len());
                Vec::new()
            }
            Err(e) => {
                error!("Row batch of {} failed: {}", batch.len(), e);
                batch
                    .iter()
                    .map(|(key, _)| KeyFailure::new(key.clone(), &e))
                    .collect()
            }
        }
    }

    fn name(&self) -> &str {
        "rows"
    }
}
