//! Compact binary index encoding
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! header (40 bytes)
//!   magic          8  b"MBOX_IDX"
//!   version        u32
//!   entry_count    u32
//!   archive_size   u64
//!   mtime_secs     i64
//!   mtime_nanos    u32
//!   reserved       u32
//! entry (repeated entry_count times)
//!   id             u32
//!   byte_offset    u64
//!   byte_length    u32
//!   content_digest u64
//!   timestamp      i64  (i64::MIN when absent)
//!   flags          u8   bit0 large payload, bit1 grouping key, bit2 secondary key
//!   grouping_len   u16
//!   secondary_len  u16
//!   grouping_key   [u8; grouping_len]
//!   secondary_key  [u8; secondary_len]
//! ```

use super::types::{ArchiveFingerprint, Index, IndexEntry, FORMAT_VERSION, INDEX_MAGIC};
use crate::error::{MboxError, Result};
use bytes::{Buf, BufMut, BytesMut};

pub const HEADER_LEN: usize = 40;

/// Fixed part of every entry
const ENTRY_FIXED_LEN: usize = 4 + 8 + 4 + 8 + 8 + 1 + 2 + 2;

const NO_TIMESTAMP: i64 = i64::MIN;

const FLAG_LARGE_PAYLOAD: u8 = 0b001;
const FLAG_GROUPING_KEY: u8 = 0b010;
const FLAG_SECONDARY_KEY: u8 = 0b100;

pub fn encode(index: &Index) -> Result<Vec<u8>> {
    let count = u32::try_from(index.len())
        .map_err(|_| MboxError::CorruptIndex(format!("too many entries: {}", index.len())))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + index.len() * (ENTRY_FIXED_LEN + 16));
    let fingerprint = index.fingerprint();

    buf.put_slice(INDEX_MAGIC);
    buf.put_u32_le(index.version());
    buf.put_u32_le(count);
    buf.put_u64_le(fingerprint.byte_size);
    buf.put_i64_le(fingerprint.modified_secs);
    buf.put_u32_le(fingerprint.modified_nanos);
    buf.put_u32_le(0);

    for entry in index.entries() {
        let grouping = key_bytes(entry.grouping_key.as_deref(), entry.id)?;
        let secondary = key_bytes(entry.secondary_key.as_deref(), entry.id)?;

        let mut flags = 0u8;
        if entry.has_large_payload {
            flags |= FLAG_LARGE_PAYLOAD;
        }
        if entry.grouping_key.is_some() {
            flags |= FLAG_GROUPING_KEY;
        }
        if entry.secondary_key.is_some() {
            flags |= FLAG_SECONDARY_KEY;
        }

        buf.put_u32_le(entry.id);
        buf.put_u64_le(entry.byte_offset);
        buf.put_u32_le(entry.byte_length);
        buf.put_u64_le(entry.content_digest);
        buf.put_i64_le(entry.timestamp.unwrap_or(NO_TIMESTAMP));
        buf.put_u8(flags);
        buf.put_u16_le(grouping.len() as u16);
        buf.put_u16_le(secondary.len() as u16);
        buf.put_slice(grouping);
        buf.put_slice(secondary);
    }

    Ok(buf.to_vec())
}

pub fn decode(mut data: &[u8]) -> Result<Index> {
    if data.remaining() < HEADER_LEN {
        return Err(MboxError::CorruptIndex(format!(
            "truncated header: {} bytes",
            data.remaining()
        )));
    }

    let mut magic = [0u8; 8];
    data.copy_to_slice(&mut magic);
    if &magic != INDEX_MAGIC {
        return Err(MboxError::CorruptIndex("bad magic".to_string()));
    }

    let version = data.get_u32_le();
    if version != FORMAT_VERSION {
        return Err(MboxError::CorruptIndex(format!(
            "unsupported format version {}",
            version
        )));
    }

    let count = data.get_u32_le() as usize;
    let fingerprint = ArchiveFingerprint {
        byte_size: data.get_u64_le(),
        modified_secs: data.get_i64_le(),
        modified_nanos: data.get_u32_le(),
    };
    let _reserved = data.get_u32_le();

    // Each entry needs at least its fixed part; reject absurd counts before allocating
    if count > data.remaining() / ENTRY_FIXED_LEN {
        return Err(MboxError::CorruptIndex(format!(
            "header claims {} entries but only {} bytes follow",
            count,
            data.remaining()
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for position in 0..count {
        if data.remaining() < ENTRY_FIXED_LEN {
            return Err(truncated(position));
        }

        let id = data.get_u32_le();
        let byte_offset = data.get_u64_le();
        let byte_length = data.get_u32_le();
        let content_digest = data.get_u64_le();
        let timestamp = data.get_i64_le();
        let flags = data.get_u8();
        let grouping_len = data.get_u16_le() as usize;
        let secondary_len = data.get_u16_le() as usize;

        if data.remaining() < grouping_len + secondary_len {
            return Err(truncated(position));
        }
        let grouping_key = read_key(&mut data, grouping_len, flags & FLAG_GROUPING_KEY != 0, position)?;
        let secondary_key =
            read_key(&mut data, secondary_len, flags & FLAG_SECONDARY_KEY != 0, position)?;

        entries.push(IndexEntry {
            id,
            byte_offset,
            byte_length,
            content_digest,
            grouping_key,
            secondary_key,
            timestamp: (timestamp != NO_TIMESTAMP).then_some(timestamp),
            has_large_payload: flags & FLAG_LARGE_PAYLOAD != 0,
        });
    }

    if data.has_remaining() {
        return Err(MboxError::CorruptIndex(format!(
            "{} trailing bytes after last entry",
            data.remaining()
        )));
    }

    Index::from_parts(version, fingerprint, entries)
}

fn key_bytes(key: Option<&str>, id: u32) -> Result<&[u8]> {
    let bytes = key.map(str::as_bytes).unwrap_or_default();
    if bytes.len() > u16::MAX as usize {
        return Err(MboxError::CorruptIndex(format!(
            "key of entry {} is {} bytes long",
            id,
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn read_key(data: &mut &[u8], len: usize, present: bool, position: usize) -> Result<Option<String>> {
    let raw = &data[..len];
    data.advance(len);

    if !present {
        return Ok(None);
    }
    String::from_utf8(raw.to_vec())
        .map(Some)
        .map_err(|_| MboxError::CorruptIndex(format!("entry {} has a non-UTF-8 key", position)))
}

fn truncated(position: usize) -> MboxError {
    MboxError::CorruptIndex(format!("truncated at entry {}", position))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> Index {
        let fingerprint = ArchiveFingerprint {
            byte_size: 30,
            modified_secs: 1_700_000_000,
            modified_nanos: 42,
        };
        let entries = vec![
            IndexEntry {
                id: 0,
                byte_offset: 0,
                byte_length: 10,
                content_digest: 0xdead_beef,
                grouping_key: Some("thread-1".to_string()),
                secondary_key: None,
                timestamp: Some(-5),
                has_large_payload: true,
            },
            IndexEntry {
                id: 1,
                byte_offset: 10,
                byte_length: 20,
                content_digest: u64::MAX,
                grouping_key: Some(String::new()),
                secondary_key: Some("example.org".to_string()),
                timestamp: None,
                has_large_payload: false,
            },
        ];
        Index::new(fingerprint, entries).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let index = sample_index();
        let bytes = encode(&index).unwrap();
        assert_eq!(&bytes[..8], INDEX_MAGIC);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.entries(), index.entries());
        assert_eq!(decoded.fingerprint(), index.fingerprint());
        // Empty-but-present key is distinct from an absent one
        assert_eq!(decoded.entries()[1].grouping_key.as_deref(), Some(""));
    }

    #[test]
    fn test_header_layout() {
        let bytes = encode(&sample_index()).unwrap();
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()), FORMAT_VERSION);
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 2);
        assert_eq!(u64::from_le_bytes(bytes[16..24].try_into().unwrap()), 30);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = encode(&sample_index()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(MboxError::CorruptIndex(_))));
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = encode(&sample_index()).unwrap();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(MboxError::CorruptIndex(_))));
    }

    #[test]
    fn test_rejects_truncation() {
        let bytes = encode(&sample_index()).unwrap();
        for cut in [0, 10, HEADER_LEN, HEADER_LEN + 5, bytes.len() - 1] {
            assert!(
                matches!(decode(&bytes[..cut]), Err(MboxError::CorruptIndex(_))),
                "cut at {}",
                cut
            );
        }
    }

    #[test]
    fn test_rejects_overflowing_offset() {
        let mut bytes = encode(&sample_index()).unwrap();
        // First entry's byte_offset
        bytes[44..52].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(MboxError::CorruptIndex(_))));
    }

    #[test]
    fn test_rejects_inflated_count() {
        let mut bytes = encode(&sample_index()).unwrap();
        bytes[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode(&bytes), Err(MboxError::CorruptIndex(_))));
    }
}
