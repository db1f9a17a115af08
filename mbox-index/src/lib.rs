//! mbox-index: byte-offset indexing and parallel processing for mbox archives
//!
//! Builds a persistent index of every message in a large mbox file, then
//! uses it for random access through a memory map and for splitting the
//! archive into balanced partitions processed in parallel.
//!
//! # Features
//!
//! - **Scanner**: one linear pass over the archive finds every envelope line
//! - **Index**: binary or SQLite encoding, atomic publish, staleness check
//! - **Reader**: zero-copy slices of a read-only memory map
//! - **Distributor**: round-robin or key-grouped partitioning
//! - **Driver**: per-unit timeouts, failures counted instead of aborting
//! - **Writer**: threshold-driven batches to files or SQLite rows
//!
//! # Message ranges
//!
//! A message's range starts at its `From ` envelope line and ends where the
//! next envelope begins (or at end-of-file). The envelope is part of the
//! range; [`reader::strip_envelope`] removes it before content is read.
//!
//! # Example
//!
//! ```no_run
//! use mbox_index::config::Config;
//! use mbox_index::index::IndexStore;
//! use mbox_index::pipeline::Pipeline;
//! use mbox_index::processor::EmlExportProcessor;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let archive = Path::new("all.mbox");
//!
//!     let store = IndexStore::from_config(&config);
//!     store.build(archive, &config.index_path(archive)).await?;
//!
//!     let stats = Pipeline::new(config, archive)
//!         .process(EmlExportProcessor::new())
//!         .await?;
//!     println!("{} of {} messages exported", stats.succeeded, stats.attempted);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling
//! - [`scanner`]: Boundary detection, digests and header metadata
//! - [`index`]: Index model, encodings and store
//! - [`reader`]: Memory-mapped archive access
//! - [`distributor`]: Work items and partitioning
//! - [`driver`]: Parallel execution
//! - [`writer`]: Batched persistence
//! - [`processor`]: Per-message callback
//! - [`dedup`]: Duplicate detection over an index
//! - [`pipeline`]: Load, partition, run and flush in one call

pub mod config;
pub mod dedup;
pub mod distributor;
pub mod driver;
pub mod error;
pub mod index;
pub mod pipeline;
pub mod processor;
pub mod reader;
pub mod scanner;
pub mod writer;

pub use error::{MboxError, Result};
