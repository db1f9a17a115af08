//! Persistent message index
//!
//! One [`IndexEntry`] per message, ordered by id, plus the fingerprint of the
//! archive it was built from. Two interchangeable encodings:
//! - [`binary`]: compact file, loaded whole into memory
//! - [`sqlite`]: database with secondary indexes, queryable in place
//!
//! [`store`] decides which one a file holds by its leading bytes.

pub mod binary;
pub mod sqlite;
pub mod store;
pub mod types;

pub use sqlite::IndexDatabase;
pub use store::{is_stale, load_index, persist, IndexStore};
pub use types::{
    ArchiveFingerprint, EntryCursor, Index, IndexEntry, IndexFormat, IndexStats, FORMAT_VERSION,
    INDEX_MAGIC,
};
