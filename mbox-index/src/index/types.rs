//! Index data model

use crate::error::{MboxError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Current on-disk format version (both encodings)
pub const FORMAT_VERSION: u32 = 1;

/// Magic shared by both encodings
pub const INDEX_MAGIC: &[u8; 8] = b"MBOX_IDX";

/// Size and modification time of an archive at index time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveFingerprint {
    pub byte_size: u64,
    /// Seconds since the Unix epoch
    pub modified_secs: i64,
    pub modified_nanos: u32,
}

impl ArchiveFingerprint {
    /// Fingerprint of the archive as it is on disk right now
    pub fn capture(archive: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(archive)?;
        let modified = metadata.modified()?;

        let (modified_secs, modified_nanos) = match modified.duration_since(UNIX_EPOCH) {
            Ok(since) => (since.as_secs() as i64, since.subsec_nanos()),
            Err(before) => (-(before.duration().as_secs() as i64), 0),
        };

        Ok(Self {
            byte_size: metadata.len(),
            modified_secs,
            modified_nanos,
        })
    }
}

/// One message record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: u32,
    pub byte_offset: u64,
    /// Includes the envelope line
    pub byte_length: u32,
    pub content_digest: u64,
    pub grouping_key: Option<String>,
    pub secondary_key: Option<String>,
    pub timestamp: Option<i64>,
    pub has_large_payload: bool,
}

impl IndexEntry {
    pub fn end_offset(&self) -> u64 {
        self.byte_offset + self.byte_length as u64
    }

    pub fn range(&self) -> Range<u64> {
        self.byte_offset..self.end_offset()
    }
}

/// Physical encoding of a persisted index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexFormat {
    /// Compact little-endian binary file
    #[default]
    Binary,
    /// SQLite database with B-tree secondary indexes
    Sqlite,
}

impl IndexFormat {
    /// Default index location next to the archive
    pub fn default_path(&self, archive: &Path) -> PathBuf {
        let suffix = match self {
            IndexFormat::Binary => ".idx",
            IndexFormat::Sqlite => ".idx.db",
        };
        let mut name = OsString::from(archive.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }
}

impl std::fmt::Display for IndexFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexFormat::Binary => write!(f, "binary"),
            IndexFormat::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for IndexFormat {
    type Err = MboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(IndexFormat::Binary),
            "sqlite" => Ok(IndexFormat::Sqlite),
            other => Err(MboxError::InvalidConfiguration(format!(
                "unknown index format: {}",
                other
            ))),
        }
    }
}

/// Summary figures over an index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_entries: usize,
    pub total_bytes: u64,
    pub avg_entry_bytes: f64,
    pub min_entry_bytes: u32,
    pub max_entry_bytes: u32,
    pub distinct_grouping_keys: usize,
    pub distinct_secondary_keys: usize,
    pub timestamped_entries: usize,
    pub large_payload_entries: usize,
}

/// Ordered collection of entries for one archive
///
/// Read-only once constructed; secondary orderings are built up front so
/// that key and time lookups cost O(log n + k).
#[derive(Debug, Clone)]
pub struct Index {
    version: u32,
    fingerprint: ArchiveFingerprint,
    entries: Vec<IndexEntry>,
    by_grouping_key: Vec<(String, u32)>,
    by_secondary_key: Vec<(String, u32)>,
    by_timestamp: Vec<(i64, u32)>,
}

impl Index {
    /// Build an index at the current format version
    pub fn new(fingerprint: ArchiveFingerprint, entries: Vec<IndexEntry>) -> Result<Self> {
        Self::from_parts(FORMAT_VERSION, fingerprint, entries)
    }

    /// Assemble an index, checking the entry invariants
    pub(crate) fn from_parts(
        version: u32,
        fingerprint: ArchiveFingerprint,
        entries: Vec<IndexEntry>,
    ) -> Result<Self> {
        validate_entries(&fingerprint, &entries)?;

        let mut by_grouping_key: Vec<(String, u32)> = entries
            .iter()
            .filter_map(|e| e.grouping_key.clone().map(|key| (key, e.id)))
            .collect();
        by_grouping_key.sort();

        let mut by_secondary_key: Vec<(String, u32)> = entries
            .iter()
            .filter_map(|e| e.secondary_key.clone().map(|key| (key, e.id)))
            .collect();
        by_secondary_key.sort();

        let mut by_timestamp: Vec<(i64, u32)> = entries
            .iter()
            .filter_map(|e| e.timestamp.map(|ts| (ts, e.id)))
            .collect();
        by_timestamp.sort_unstable();

        Ok(Self {
            version,
            fingerprint,
            entries,
            by_grouping_key,
            by_secondary_key,
            by_timestamp,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fingerprint(&self) -> &ArchiveFingerprint {
        &self.fingerprint
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry by sequential id
    pub fn lookup_by_id(&self, id: u32) -> Result<&IndexEntry> {
        self.entries
            .get(id as usize)
            .ok_or_else(|| MboxError::NotFound(format!("index entry {}", id)))
    }

    /// Ids sharing a grouping key, ascending
    pub fn lookup_by_grouping_key(&self, key: &str) -> Vec<u32> {
        ids_for_key(&self.by_grouping_key, key)
    }

    /// Ids sharing a secondary key, ascending
    pub fn lookup_by_secondary_key(&self, key: &str) -> Vec<u32> {
        ids_for_key(&self.by_secondary_key, key)
    }

    /// Ids with a timestamp in `start..=end`, ascending
    ///
    /// O(log n + k log k): the k matches come out in timestamp order and
    /// are re-sorted by id.
    pub fn lookup_by_time_range(&self, start: i64, end: i64) -> Vec<u32> {
        if start > end {
            return Vec::new();
        }
        let lo = self.by_timestamp.partition_point(|(ts, _)| *ts < start);
        let hi = self.by_timestamp.partition_point(|(ts, _)| *ts <= end);

        let mut ids: Vec<u32> = self.by_timestamp[lo..hi].iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids
    }

    /// Cursor over `(id, range)` pairs starting at `start_id`
    pub fn cursor(&self, start_id: u32) -> EntryCursor<'_> {
        EntryCursor {
            entries: &self.entries,
            next: start_id as usize,
        }
    }

    pub fn stats(&self) -> IndexStats {
        let total_bytes: u64 = self.entries.iter().map(|e| e.byte_length as u64).sum();
        let count = self.entries.len();

        IndexStats {
            total_entries: count,
            total_bytes,
            avg_entry_bytes: if count > 0 {
                total_bytes as f64 / count as f64
            } else {
                0.0
            },
            min_entry_bytes: self.entries.iter().map(|e| e.byte_length).min().unwrap_or(0),
            max_entry_bytes: self.entries.iter().map(|e| e.byte_length).max().unwrap_or(0),
            distinct_grouping_keys: count_distinct(&self.by_grouping_key),
            distinct_secondary_keys: count_distinct(&self.by_secondary_key),
            timestamped_entries: self.by_timestamp.len(),
            large_payload_entries: self.entries.iter().filter(|e| e.has_large_payload).count(),
        }
    }
}

/// Restartable cursor over index entries
///
/// Seeking is O(1): ids are positions.
pub struct EntryCursor<'a> {
    entries: &'a [IndexEntry],
    next: usize,
}

impl EntryCursor<'_> {
    pub fn seek(&mut self, id: u32) {
        self.next = id as usize;
    }

    /// Id the next call to `next()` yields
    pub fn position(&self) -> u32 {
        self.next as u32
    }
}

impl Iterator for EntryCursor<'_> {
    type Item = (u32, Range<u64>);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.get(self.next)?;
        self.next += 1;
        Some((entry.id, entry.range()))
    }
}

fn ids_for_key(ordering: &[(String, u32)], key: &str) -> Vec<u32> {
    let lo = ordering.partition_point(|(k, _)| k.as_str() < key);
    let hi = ordering.partition_point(|(k, _)| k.as_str() <= key);
    ordering[lo..hi].iter().map(|(_, id)| *id).collect()
}

fn count_distinct(ordering: &[(String, u32)]) -> usize {
    let mut distinct = 0;
    let mut previous: Option<&str> = None;
    for (key, _) in ordering {
        if previous != Some(key.as_str()) {
            distinct += 1;
            previous = Some(key.as_str());
        }
    }
    distinct
}

fn validate_entries(fingerprint: &ArchiveFingerprint, entries: &[IndexEntry]) -> Result<()> {
    let mut previous_end: Option<u64> = None;
    for (position, entry) in entries.iter().enumerate() {
        if entry.id as usize != position {
            return Err(MboxError::CorruptIndex(format!(
                "entry at position {} has id {}",
                position, entry.id
            )));
        }
        if let Some(end) = previous_end {
            if end != entry.byte_offset {
                return Err(MboxError::CorruptIndex(format!(
                    "entry {} starts at {} but the previous entry ends at {}",
                    entry.id, entry.byte_offset, end
                )));
            }
        }
        let end = entry
            .byte_offset
            .checked_add(entry.byte_length as u64)
            .ok_or_else(|| {
                MboxError::CorruptIndex(format!(
                    "entry {} range {}+{} overflows",
                    entry.id, entry.byte_offset, entry.byte_length
                ))
            })?;
        previous_end = Some(end);
    }

    if let Some(end) = previous_end {
        if end != fingerprint.byte_size {
            return Err(MboxError::CorruptIndex(format!(
                "last entry ends at {} but archive size is {}",
                end, fingerprint.byte_size
            )));
        }
    }

    Ok(())
}
