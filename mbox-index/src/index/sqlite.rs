//! SQLite index encoding
//!
//! Stores one row per message plus a small key/value metadata table. The
//! secondary indexes let external tools (and [`IndexDatabase`] itself) answer
//! key and time queries without loading the whole index.
//!
//! # Schema
//! ```text
//! mbox_index(email_id PK, byte_offset, byte_length, content_digest,
//!            grouping_key, secondary_key, date_timestamp, has_large_payload)
//! index_metadata(key PK, value)
//! ```

use super::types::{ArchiveFingerprint, Index, IndexEntry, FORMAT_VERSION, INDEX_MAGIC};
use crate::error::{MboxError, Result};
use crate::scanner::DIGEST_ALGORITHM;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// File header of every SQLite database
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Rows per multi-row INSERT (8 binds each, under the 999 bind limit)
const INSERT_CHUNK: usize = 100;

type EntryRow = (i64, i64, i64, i64, Option<String>, Option<String>, Option<i64>, bool);

/// Handle on a persisted SQLite index
pub struct IndexDatabase {
    db: SqlitePool,
}

impl IndexDatabase {
    /// Write `index` into a fresh database at `path`
    ///
    /// `path` must not exist yet; callers write to a temporary name and
    /// rename once this returns.
    pub async fn create(path: &Path, index: &Index) -> Result<()> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let mut tx = db.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE mbox_index (
                email_id INTEGER PRIMARY KEY,
                byte_offset INTEGER NOT NULL,
                byte_length INTEGER NOT NULL,
                content_digest INTEGER NOT NULL,
                grouping_key TEXT,
                secondary_key TEXT,
                date_timestamp INTEGER,
                has_large_payload INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE index_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        for chunk in index.entries().chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO mbox_index (email_id, byte_offset, byte_length, content_digest, \
                 grouping_key, secondary_key, date_timestamp, has_large_payload) ",
            );
            builder.push_values(chunk, |mut row, entry| {
                row.push_bind(entry.id as i64)
                    .push_bind(entry.byte_offset as i64)
                    .push_bind(entry.byte_length as i64)
                    // Stored as the same 64 bits, reinterpreted as signed
                    .push_bind(entry.content_digest as i64)
                    .push_bind(entry.grouping_key.clone())
                    .push_bind(entry.secondary_key.clone())
                    .push_bind(entry.timestamp)
                    .push_bind(entry.has_large_payload);
            });
            builder.build().execute(&mut *tx).await?;
        }

        // Secondary indexes after the bulk load
        for statement in [
            "CREATE INDEX idx_mbox_grouping_key ON mbox_index(grouping_key)",
            "CREATE INDEX idx_mbox_secondary_key ON mbox_index(secondary_key)",
            "CREATE INDEX idx_mbox_date_timestamp ON mbox_index(date_timestamp)",
        ] {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        let fingerprint = index.fingerprint();
        let metadata = [
            ("magic", String::from_utf8_lossy(INDEX_MAGIC).into_owned()),
            ("format_version", index.version().to_string()),
            ("archive_size", fingerprint.byte_size.to_string()),
            ("mtime_secs", fingerprint.modified_secs.to_string()),
            ("mtime_nanos", fingerprint.modified_nanos.to_string()),
            ("entry_count", index.len().to_string()),
            ("digest_algorithm", DIGEST_ALGORITHM.to_string()),
            ("created_at", Utc::now().to_rfc3339()),
        ];
        for (key, value) in metadata {
            sqlx::query("INSERT INTO index_metadata (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        db.close().await;

        debug!("Wrote {} entries to {}", index.len(), path.display());
        Ok(())
    }

    /// Open an existing index read-only
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);
        let db = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(corrupt)?;

        Ok(Self { db })
    }

    /// Load the whole index, validating header and entries
    pub async fn read_index(&self) -> Result<Index> {
        let rows = sqlx::query_as::<_, (String, String)>("SELECT key, value FROM index_metadata")
            .fetch_all(&self.db)
            .await
            .map_err(corrupt)?;
        let metadata: HashMap<String, String> = rows.into_iter().collect();

        if metadata.get("magic").map(String::as_bytes) != Some(INDEX_MAGIC.as_slice()) {
            return Err(MboxError::CorruptIndex("bad magic".to_string()));
        }
        let version: u32 = parse_field(&metadata, "format_version")?;
        if version != FORMAT_VERSION {
            return Err(MboxError::CorruptIndex(format!(
                "unsupported format version {}",
                version
            )));
        }
        if metadata.get("digest_algorithm").map(String::as_str) != Some(DIGEST_ALGORITHM) {
            return Err(MboxError::CorruptIndex(format!(
                "unexpected digest algorithm {:?}",
                metadata.get("digest_algorithm")
            )));
        }

        let fingerprint = ArchiveFingerprint {
            byte_size: parse_field(&metadata, "archive_size")?,
            modified_secs: parse_field(&metadata, "mtime_secs")?,
            modified_nanos: parse_field(&metadata, "mtime_nanos")?,
        };
        let expected: usize = parse_field(&metadata, "entry_count")?;

        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT email_id, byte_offset, byte_length, content_digest,
                   grouping_key, secondary_key, date_timestamp, has_large_payload
            FROM mbox_index
            ORDER BY email_id ASC
            "#,
        )
        .fetch_all(&self.db)
        .await
        .map_err(corrupt)?;

        if rows.len() != expected {
            return Err(MboxError::CorruptIndex(format!(
                "metadata claims {} entries, table holds {}",
                expected,
                rows.len()
            )));
        }

        let entries = rows
            .into_iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>>>()?;

        Index::from_parts(version, fingerprint, entries)
    }

    /// Single entry by id
    pub async fn entry(&self, id: u32) -> Result<IndexEntry> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT email_id, byte_offset, byte_length, content_digest,
                   grouping_key, secondary_key, date_timestamp, has_large_payload
            FROM mbox_index
            WHERE email_id = ?
            "#,
        )
        .bind(id as i64)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| MboxError::NotFound(format!("index entry {}", id)))?;

        entry_from_row(row)
    }

    pub async fn ids_by_grouping_key(&self, key: &str) -> Result<Vec<u32>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT email_id FROM mbox_index WHERE grouping_key = ? ORDER BY email_id",
        )
        .bind(key)
        .fetch_all(&self.db)
        .await?;
        to_ids(ids)
    }

    pub async fn ids_by_secondary_key(&self, key: &str) -> Result<Vec<u32>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT email_id FROM mbox_index WHERE secondary_key = ? ORDER BY email_id",
        )
        .bind(key)
        .fetch_all(&self.db)
        .await?;
        to_ids(ids)
    }

    /// Ids with `start <= date_timestamp <= end`
    pub async fn ids_in_time_range(&self, start: i64, end: i64) -> Result<Vec<u32>> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT email_id FROM mbox_index
            WHERE date_timestamp BETWEEN ? AND ?
            ORDER BY email_id
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;
        to_ids(ids)
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

fn entry_from_row(row: EntryRow) -> Result<IndexEntry> {
    let (id, offset, length, digest, grouping_key, secondary_key, timestamp, large) = row;

    Ok(IndexEntry {
        id: u32::try_from(id).map_err(|_| out_of_domain("email_id", id))?,
        byte_offset: u64::try_from(offset).map_err(|_| out_of_domain("byte_offset", offset))?,
        byte_length: u32::try_from(length).map_err(|_| out_of_domain("byte_length", length))?,
        content_digest: digest as u64,
        grouping_key,
        secondary_key,
        timestamp,
        has_large_payload: large,
    })
}

fn to_ids(ids: Vec<i64>) -> Result<Vec<u32>> {
    ids.into_iter()
        .map(|id| u32::try_from(id).map_err(|_| out_of_domain("email_id", id)))
        .collect()
}

fn parse_field<T: std::str::FromStr>(metadata: &HashMap<String, String>, key: &str) -> Result<T> {
    metadata
        .get(key)
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| MboxError::CorruptIndex(format!("missing or invalid metadata field {}", key)))
}

fn out_of_domain(column: &str, value: i64) -> MboxError {
    MboxError::CorruptIndex(format!("{} out of range: {}", column, value))
}

fn corrupt(err: sqlx::Error) -> MboxError {
    MboxError::CorruptIndex(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_index() -> Index {
        let fingerprint = ArchiveFingerprint {
            byte_size: 300,
            modified_secs: 1_700_000_000,
            modified_nanos: 7,
        };
        let entries = (0..3u32)
            .map(|id| IndexEntry {
                id,
                byte_offset: id as u64 * 100,
                byte_length: 100,
                content_digest: u64::MAX - id as u64,
                grouping_key: Some(format!("thread-{}", id % 2)),
                secondary_key: (id != 1).then(|| "example.com".to_string()),
                timestamp: Some(1_000 + id as i64),
                has_large_payload: id == 2,
            })
            .collect();
        Index::new(fingerprint, entries).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.db");
        let index = sample_index();

        IndexDatabase::create(&path, &index).await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..16], SQLITE_MAGIC);

        let db = IndexDatabase::open(&path).await.unwrap();
        let loaded = db.read_index().await.unwrap();
        assert_eq!(loaded.entries(), index.entries());
        assert_eq!(loaded.fingerprint(), index.fingerprint());
        db.close().await;
    }

    #[tokio::test]
    async fn test_direct_queries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.db");
        IndexDatabase::create(&path, &sample_index()).await.unwrap();

        let db = IndexDatabase::open(&path).await.unwrap();
        assert_eq!(db.ids_by_grouping_key("thread-0").await.unwrap(), vec![0, 2]);
        assert_eq!(db.ids_by_secondary_key("example.com").await.unwrap(), vec![0, 2]);
        assert_eq!(db.ids_in_time_range(1_001, 1_002).await.unwrap(), vec![1, 2]);
        assert_eq!(db.entry(2).await.unwrap().content_digest, u64::MAX - 2);
        assert!(matches!(db.entry(9).await, Err(MboxError::NotFound(_))));
        db.close().await;
    }

    async fn rewrite_metadata(path: &Path, key: &str, value: &str) {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        sqlx::query("UPDATE index_metadata SET value = ? WHERE key = ?")
            .bind(value)
            .bind(key)
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn test_rejects_unknown_format_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.db");
        IndexDatabase::create(&path, &sample_index()).await.unwrap();
        rewrite_metadata(&path, "format_version", "2").await;

        let db = IndexDatabase::open(&path).await.unwrap();
        let result = db.read_index().await;
        assert!(
            matches!(&result, Err(MboxError::CorruptIndex(reason)) if reason.contains("version 2")),
            "got {:?}",
            result.map(|index| index.len())
        );
        db.close().await;
    }

    #[tokio::test]
    async fn test_rejects_other_digest_algorithm() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.db");
        IndexDatabase::create(&path, &sample_index()).await.unwrap();
        rewrite_metadata(&path, "digest_algorithm", "xxh3-full").await;

        let db = IndexDatabase::open(&path).await.unwrap();
        assert!(matches!(db.read_index().await, Err(MboxError::CorruptIndex(_))));
        db.close().await;
    }
}
