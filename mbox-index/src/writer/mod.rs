//! Batched output
//!
//! [`BatchedWriter`] buffers per-item output and hands it to a
//! [`PersistenceSink`] in bulk, either when a count or byte threshold is
//! crossed or on an explicit flush. Two sinks ship with the crate:
//! - [`FileSink`]: one file per key, bounded concurrent writes
//! - [`SqliteRowSink`]: one row per key, one transaction per flush

pub mod batch;
pub mod buffer;
pub mod rows;
pub mod sink;

pub use batch::{BatchedWriter, FlushReport, WriterStats, WriterThresholds};
pub use buffer::{BufferedContent, OutputBuffer};
pub use rows::{RowRecord, SqliteRowSink};
pub use sink::{FileSink, KeyFailure, PersistenceSink};

/// Writer for file outputs
pub type FileBatchWriter = BatchedWriter<FileSink>;

/// Writer for row outputs
pub type RowBatchWriter = BatchedWriter<SqliteRowSink>;
