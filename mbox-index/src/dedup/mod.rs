//! Duplicate detection
//!
//! A two-stage pass over a built index. Digests screen candidates cheaply
//! (they only cover a content prefix, so a match is never proof), then the
//! candidates are confirmed by comparing full content through a reader.
//! Runs after processing, on the immutable index; nothing is shared between
//! workers.

use crate::error::Result;
use crate::index::Index;
use crate::reader::MmapReader;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Ids sharing one content digest, ascending
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub content_digest: u64,
    pub ids: Vec<u32>,
}

impl DuplicateGroup {
    /// First occurrence, kept as the original
    pub fn original(&self) -> u32 {
        self.ids[0]
    }

    /// Every occurrence after the first
    pub fn duplicates(&self) -> &[u32] {
        &self.ids[1..]
    }
}

/// Groups of two or more entries with the same digest, by first id
pub fn find_duplicates(index: &Index) -> Vec<DuplicateGroup> {
    let mut by_digest: HashMap<u64, Vec<u32>> = HashMap::new();
    for entry in index.entries() {
        by_digest.entry(entry.content_digest).or_default().push(entry.id);
    }

    let mut groups: Vec<DuplicateGroup> = by_digest
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(content_digest, ids)| DuplicateGroup { content_digest, ids })
        .collect();
    groups.sort_by_key(|group| group.ids[0]);

    debug!("Found {} digest collision groups", groups.len());
    groups
}

/// Split candidate groups into exact duplicates of equal content
///
/// Content is compared without the envelope line, so the same message
/// delivered twice with different envelope dates still matches.
pub fn confirm(reader: &MmapReader, index: &Index, candidates: &[DuplicateGroup]) -> Result<Vec<DuplicateGroup>> {
    let mut confirmed = Vec::new();

    for candidate in candidates {
        let mut classes: Vec<(&[u8], Vec<u32>)> = Vec::new();
        for &id in &candidate.ids {
            let content = reader.read_entry(index.lookup_by_id(id)?)?.content();
            match classes.iter_mut().find(|(seen, _)| *seen == content) {
                Some((_, ids)) => ids.push(id),
                None => classes.push((content, vec![id])),
            }
        }

        confirmed.extend(
            classes
                .into_iter()
                .filter(|(_, ids)| ids.len() > 1)
                .map(|(_, ids)| DuplicateGroup {
                    content_digest: candidate.content_digest,
                    ids,
                }),
        );
    }

    Ok(confirmed)
}

/// Count of entries that duplicate an earlier one
pub fn duplicate_count(groups: &[DuplicateGroup]) -> usize {
    groups.iter().map(|group| group.duplicates().len()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ArchiveFingerprint;
    use crate::scanner::Scanner;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ARCHIVE: &[u8] = b"From a Mon\nSubject: same\n\nbody\n\
From b Tue\nSubject: other\n\nbody\n\
From c Wed\nSubject: same\n\nbody\n";

    #[test]
    fn test_find_and_confirm() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(ARCHIVE).unwrap();
        file.flush().unwrap();

        let entries = Scanner::default().scan(ARCHIVE).unwrap();
        let fingerprint = ArchiveFingerprint::capture(file.path()).unwrap();
        let index = Index::new(fingerprint, entries).unwrap();

        let candidates = find_duplicates(&index);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].ids, vec![0, 2]);

        let reader = MmapReader::open(file.path()).unwrap();
        let confirmed = confirm(&reader, &index, &candidates).unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].original(), 0);
        assert_eq!(duplicate_count(&confirmed), 1);
    }
}
