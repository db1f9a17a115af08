//! Zero-copy archive access
//!
//! [`MmapReader`] maps the archive read-only and hands out slices of the
//! mapping for index ranges. Nothing is copied; slices live as long as the
//! reader. Each worker opens its own reader, readers are not shared.
//!
//! Ranges include the envelope line. [`strip_envelope`] removes it before
//! content is interpreted, and is the only place that convention is applied.

use crate::distributor::WorkItem;
use crate::error::{MboxError, Result};
use crate::index::{ArchiveFingerprint, Index, IndexEntry};
use crate::scanner::ENVELOPE_MARKER;
use memmap2::Mmap;
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read-only memory map over an archive
pub struct MmapReader {
    path: PathBuf,
    // Zero-length files cannot be mapped
    map: Option<Mmap>,
}

impl MmapReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let map = if len == 0 {
            None
        } else {
            // SAFETY: the map is read-only. Archives are append-only by
            // contract; callers detect modification through the fingerprint
            // check in `open_verified` / `is_stale`.
            Some(unsafe { Mmap::map(&file)? })
        };

        debug!("Mapped {} ({} bytes)", path.display(), len);
        Ok(Self {
            path: path.to_path_buf(),
            map,
        })
    }

    /// Open only if the archive still matches the index fingerprint
    pub fn open_verified(path: &Path, index: &Index) -> Result<Self> {
        let current = ArchiveFingerprint::capture(path)?;
        if current != *index.fingerprint() {
            return Err(MboxError::StaleIndex(format!(
                "{} changed since it was indexed",
                path.display()
            )));
        }

        let reader = Self::open(path)?;
        if reader.len() != index.fingerprint().byte_size {
            return Err(MboxError::StaleIndex(format!(
                "{} changed while being opened",
                path.display()
            )));
        }
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The whole mapped archive
    pub fn data(&self) -> &[u8] {
        self.map.as_deref().unwrap_or_default()
    }

    pub fn len(&self) -> u64 {
        self.data().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Slice of `length` bytes at `offset`
    pub fn read(&self, offset: u64, length: u64) -> Result<&[u8]> {
        let size = self.len();
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= size)
            .ok_or(MboxError::OutOfRange {
                offset,
                length,
                size,
            })?;

        Ok(&self.data()[offset as usize..end as usize])
    }

    /// Slices for each `(offset, length)`, failing on the first bad range
    pub fn read_batch(&self, ranges: &[(u64, u64)]) -> Result<Vec<&[u8]>> {
        ranges
            .iter()
            .map(|&(offset, length)| self.read(offset, length))
            .collect()
    }

    pub fn read_range(&self, range: Range<u64>) -> Result<&[u8]> {
        let length = range.end.saturating_sub(range.start);
        self.read(range.start, length)
    }

    pub fn read_entry(&self, entry: &IndexEntry) -> Result<RawMessage<'_>> {
        self.read(entry.byte_offset, entry.byte_length as u64)
            .map(RawMessage::new)
    }

    pub fn read_item(&self, item: &WorkItem) -> Result<RawMessage<'_>> {
        self.read(item.byte_offset, item.byte_length as u64)
            .map(RawMessage::new)
    }
}

/// One message record as stored in the archive
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    bytes: &'a [u8],
}

impl<'a> RawMessage<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Full record, envelope line included
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The envelope line without its line ending, if the record has one
    pub fn envelope(&self) -> Option<&'a [u8]> {
        if !self.bytes.starts_with(ENVELOPE_MARKER) {
            return None;
        }
        let line_end = memchr::memchr(b'\n', self.bytes).unwrap_or(self.bytes.len());
        let line = &self.bytes[..line_end];
        Some(line.strip_suffix(b"\r").unwrap_or(line))
    }

    /// Message content: headers and body
    pub fn content(&self) -> &'a [u8] {
        strip_envelope(self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Drop the leading envelope line from a record
///
/// Records that do not start with the envelope marker are returned as-is.
pub fn strip_envelope(record: &[u8]) -> &[u8] {
    if !record.starts_with(ENVELOPE_MARKER) {
        return record;
    }
    match memchr::memchr(b'\n', record) {
        Some(pos) => &record[pos + 1..],
        None => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn archive(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_slices() {
        let file = archive(b"From a Mon\nhello\nFrom b Tue\nworld\n");
        let reader = MmapReader::open(file.path()).unwrap();

        assert_eq!(reader.len(), 34);
        assert_eq!(reader.read(11, 5).unwrap(), b"hello");
        assert_eq!(reader.read(34, 0).unwrap(), b"");

        let batch = reader.read_batch(&[(0, 4), (17, 4)]).unwrap();
        assert_eq!(batch, vec![&b"From"[..], &b"From"[..]]);
    }

    #[test]
    fn test_out_of_range() {
        let file = archive(b"0123456789");
        let reader = MmapReader::open(file.path()).unwrap();

        assert!(matches!(
            reader.read(5, 6),
            Err(MboxError::OutOfRange { offset: 5, length: 6, size: 10 })
        ));
        assert!(matches!(reader.read(u64::MAX, 2), Err(MboxError::OutOfRange { .. })));
        assert!(reader.read_batch(&[(0, 1), (9, 2)]).is_err());
    }

    #[test]
    fn test_empty_file() {
        let file = archive(b"");
        let reader = MmapReader::open(file.path()).unwrap();
        assert!(reader.is_empty());
        assert_eq!(reader.read(0, 0).unwrap(), b"");
        assert!(reader.read(0, 1).is_err());
    }

    #[test]
    fn test_strip_envelope() {
        assert_eq!(strip_envelope(b"From a Mon\nSubject: x\n"), b"Subject: x\n");
        assert_eq!(strip_envelope(b"From only-envelope"), b"");
        assert_eq!(strip_envelope(b"Subject: no envelope\n"), b"Subject: no envelope\n");
    }

    #[test]
    fn test_raw_message_parts() {
        let message = RawMessage::new(b"From a@x Mon Jan  1\r\nSubject: x\r\n\r\nbody");
        assert_eq!(message.envelope(), Some(&b"From a@x Mon Jan  1"[..]));
        assert_eq!(message.content(), b"Subject: x\r\n\r\nbody");
        assert_eq!(RawMessage::new(b"Subject: x").envelope(), None);
    }
}
