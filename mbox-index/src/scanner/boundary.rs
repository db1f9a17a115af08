//! One-pass envelope boundary detection
//!
//! A message record starts at a line beginning with [`ENVELOPE_MARKER`] and
//! runs up to the next such line, or to end-of-file for the last record.
//! The envelope line itself belongs to the record it opens.

use memchr::memmem;

/// Marker that opens every message record (the mbox `From_` line)
pub const ENVELOPE_MARKER: &[u8; 5] = b"From ";

/// Marker as it appears mid-file: preceded by the previous line's newline
const LINE_MARKER: &[u8] = b"\nFrom ";

/// Byte range of one message record inside the archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRange {
    pub offset: u64,
    pub length: u64,
}

impl MessageRange {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Lazy iterator over message ranges in scan order
pub struct BoundaryScan<'a> {
    size: u64,
    matches: memmem::FindIter<'a, 'static>,
    next_start: Option<u64>,
}

impl<'a> BoundaryScan<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut matches = memmem::find_iter(data, LINE_MARKER);
        let next_start = if data.starts_with(ENVELOPE_MARKER) {
            Some(0)
        } else {
            matches.next().map(|pos| pos as u64 + 1)
        };

        Self {
            size: data.len() as u64,
            matches,
            next_start,
        }
    }
}

impl Iterator for BoundaryScan<'_> {
    type Item = MessageRange;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        self.next_start = self.matches.next().map(|pos| pos as u64 + 1);
        let end = self.next_start.unwrap_or(self.size);

        Some(MessageRange {
            offset: start,
            length: end - start,
        })
    }
}

/// Start offsets of every record in the archive
pub fn find_boundaries(data: &[u8]) -> Vec<u64> {
    BoundaryScan::new(data).map(|range| range.offset).collect()
}

/// All message ranges in the archive
pub fn message_ranges(data: &[u8]) -> Vec<MessageRange> {
    BoundaryScan::new(data).collect()
}
