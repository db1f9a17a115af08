//! Archive scanning
//!
//! Turns a mapped archive into index entries in a single linear pass:
//! - [`boundary`]: envelope line detection
//! - [`digest`]: advisory prefix digest for duplicate screening
//! - [`metadata`]: header fields used for secondary lookups

pub mod boundary;
pub mod digest;
pub mod metadata;

pub use boundary::{find_boundaries, message_ranges, BoundaryScan, MessageRange, ENVELOPE_MARKER};
pub use digest::{content_digest, DIGEST_ALGORITHM, DIGEST_PREFIX_LEN};
pub use metadata::MessageMetadata;

use crate::error::{MboxError, Result};
use crate::index::IndexEntry;
use crate::reader::strip_envelope;
use tracing::{debug, warn};

/// Scanner behaviour knobs
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Parse headers for grouping/secondary keys and timestamps
    pub extract_metadata: bool,
    /// Messages at least this large are flagged as large payloads
    pub large_payload_threshold: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extract_metadata: true,
            large_payload_threshold: 1024 * 1024,
        }
    }
}

/// One-pass archive scanner
pub struct Scanner {
    options: ScanOptions,
}

impl Scanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Scan the archive bytes into ordered index entries
    ///
    /// Malformed messages are still indexed; only records that cannot be
    /// represented (more than `u32::MAX` messages, or a message longer than
    /// `u32::MAX` bytes) abort the scan.
    pub fn scan(&self, data: &[u8]) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();

        for (position, range) in BoundaryScan::new(data).enumerate() {
            let id = u32::try_from(position).map_err(|_| MboxError::RecordTooLarge {
                id: position as u64,
                length: range.length,
            })?;
            let byte_length = u32::try_from(range.length).map_err(|_| MboxError::RecordTooLarge {
                id: position as u64,
                length: range.length,
            })?;

            let raw = &data[range.offset as usize..range.end() as usize];
            let content = strip_envelope(raw);

            let metadata = if self.options.extract_metadata {
                metadata::extract(content).unwrap_or_else(|| {
                    warn!("Message {} has no parseable headers, indexing without metadata", id);
                    MessageMetadata::default()
                })
            } else {
                MessageMetadata::default()
            };

            entries.push(IndexEntry {
                id,
                byte_offset: range.offset,
                byte_length,
                content_digest: content_digest(content),
                grouping_key: metadata.grouping_key,
                secondary_key: metadata.secondary_key,
                timestamp: metadata.timestamp,
                has_large_payload: metadata.has_attachments
                    || range.length >= self.options.large_payload_threshold,
            });
        }

        debug!("Scanned {} bytes, found {} messages", data.len(), entries.len());
        Ok(entries)
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(ScanOptions::default())
    }
}
