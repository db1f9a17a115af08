//! Index persistence
//!
//! Building scans the archive off the async runtime, checks the archive did
//! not change underneath the scan, and publishes the result atomically: the
//! index is written to a temporary sibling file and renamed into place, so a
//! reader never observes a partially written index.

use super::binary;
use super::sqlite::{IndexDatabase, SQLITE_MAGIC};
use super::types::{ArchiveFingerprint, Index, IndexFormat, INDEX_MAGIC};
use crate::config::Config;
use crate::error::{MboxError, Result};
use crate::reader::MmapReader;
use crate::scanner::{ScanOptions, Scanner};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Builds, persists and loads indexes
#[derive(Debug, Clone)]
pub struct IndexStore {
    format: IndexFormat,
    scan_options: ScanOptions,
}

impl IndexStore {
    pub fn new(format: IndexFormat, scan_options: ScanOptions) -> Self {
        Self {
            format,
            scan_options,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.index.format,
            ScanOptions {
                extract_metadata: config.index.extract_metadata,
                large_payload_threshold: config.index.large_payload_threshold,
            },
        )
    }

    pub fn format(&self) -> IndexFormat {
        self.format
    }

    /// Scan `archive` and atomically publish the index at `index_path`
    ///
    /// Fails with `StaleIndex` (and publishes nothing) if the archive is
    /// modified while the scan runs.
    pub async fn build(&self, archive: &Path, index_path: &Path) -> Result<Index> {
        let started = Instant::now();
        let before = ArchiveFingerprint::capture(archive)?;

        let scanner = Scanner::new(self.scan_options.clone());
        let archive_owned = archive.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || {
            let reader = MmapReader::open(&archive_owned)?;
            scanner.scan(reader.data())
        })
        .await
        .map_err(|e| MboxError::Worker(format!("scan task failed: {}", e)))??;

        let after = ArchiveFingerprint::capture(archive)?;
        if after != before {
            warn!("Archive {} changed during scan, discarding index", archive.display());
            return Err(MboxError::StaleIndex(format!(
                "{} was modified while being indexed",
                archive.display()
            )));
        }

        let index = Index::new(before, entries)?;
        persist(&index, index_path, self.format).await?;

        let elapsed = started.elapsed();
        let mib_per_sec =
            before.byte_size as f64 / (1024.0 * 1024.0) / elapsed.as_secs_f64().max(1e-9);
        info!(
            "Indexed {} messages ({} bytes) from {} into {} in {:?} ({:.1} MiB/s)",
            index.len(),
            before.byte_size,
            archive.display(),
            index_path.display(),
            elapsed,
            mib_per_sec
        );

        Ok(index)
    }

    /// Load an index, whichever encoding it uses
    pub async fn load(&self, index_path: &Path) -> Result<Index> {
        load_index(index_path).await
    }

    /// Load an index and reject it if it no longer describes `archive`
    pub async fn load_fresh(&self, archive: &Path, index_path: &Path) -> Result<Index> {
        let index = load_index(index_path).await?;
        if is_stale(archive, &index) {
            return Err(MboxError::StaleIndex(format!(
                "{} does not match {}",
                index_path.display(),
                archive.display()
            )));
        }
        Ok(index)
    }

    /// Load a fresh index, rebuilding when it is missing, stale or corrupt
    pub async fn load_or_build(&self, archive: &Path, index_path: &Path) -> Result<Index> {
        match self.load_fresh(archive, index_path).await {
            Ok(index) => Ok(index),
            Err(MboxError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No index at {}, building", index_path.display());
                self.build(archive, index_path).await
            }
            Err(e) if e.needs_rebuild() => {
                warn!("Rebuilding index {}: {}", index_path.display(), e);
                self.build(archive, index_path).await
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_stale(&self, archive: &Path, index: &Index) -> bool {
        is_stale(archive, index)
    }
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new(IndexFormat::default(), ScanOptions::default())
    }
}

/// Whether `index` no longer describes `archive`
///
/// Any failure to stat the archive counts as stale.
pub fn is_stale(archive: &Path, index: &Index) -> bool {
    match ArchiveFingerprint::capture(archive) {
        Ok(current) => current != *index.fingerprint(),
        Err(e) => {
            debug!("Cannot fingerprint {}: {}", archive.display(), e);
            true
        }
    }
}

/// Load an index file, detecting its encoding from the leading bytes
pub async fn load_index(index_path: &Path) -> Result<Index> {
    let mut head = Vec::with_capacity(SQLITE_MAGIC.len());
    tokio::fs::File::open(index_path)
        .await?
        .take(SQLITE_MAGIC.len() as u64)
        .read_to_end(&mut head)
        .await?;

    if head.starts_with(SQLITE_MAGIC) {
        let db = IndexDatabase::open(index_path).await?;
        let index = db.read_index().await;
        db.close().await;
        index
    } else if head.starts_with(INDEX_MAGIC) {
        let data = tokio::fs::read(index_path).await?;
        binary::decode(&data)
    } else {
        Err(MboxError::CorruptIndex(format!(
            "{} is not an index file",
            index_path.display()
        )))
    }
}

/// Atomically write `index` to `index_path` in the given encoding
pub async fn persist(index: &Index, index_path: &Path, format: IndexFormat) -> Result<()> {
    let temp_path = temp_sibling(index_path);

    let written = match format {
        IndexFormat::Binary => write_binary(index, &temp_path).await,
        IndexFormat::Sqlite => IndexDatabase::create(&temp_path, index).await,
    };

    let published = match written {
        Ok(()) => tokio::fs::rename(&temp_path, index_path).await.map_err(MboxError::from),
        Err(e) => Err(e),
    };

    if published.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    published
}

async fn write_binary(index: &Index, path: &Path) -> Result<()> {
    let bytes = binary::encode(index)?;
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Hidden temporary name in the same directory, so the rename stays atomic
fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    path.with_file_name(format!(".{}.tmp-{}", name, Uuid::new_v4()))
}
