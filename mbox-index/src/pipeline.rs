//! End-to-end processing run
//!
//! Load index → check freshness → project → partition → drive → flush.
//! A stale index is reported, never rebuilt here: rebuilding is the
//! caller's decision.

use crate::config::Config;
use crate::distributor::{partition, to_work_items};
use crate::driver::{DriverOptions, ParallelDriver, RunStats};
use crate::error::{MboxError, Result};
use crate::index::{is_stale, load_index, Index};
use crate::processor::MessageProcessor;
use crate::writer::{
    BatchedWriter, FileBatchWriter, FileSink, PersistenceSink, RowBatchWriter, RowRecord,
    SqliteRowSink, WriterThresholds,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct Pipeline {
    config: Config,
    archive: PathBuf,
    index_path: PathBuf,
    expected_count: Option<usize>,
}

impl Pipeline {
    pub fn new(config: Config, archive: impl Into<PathBuf>) -> Self {
        let archive = archive.into();
        let index_path = config.index_path(&archive);
        Self {
            config,
            archive,
            index_path,
            expected_count: None,
        }
    }

    pub fn with_index_path(mut self, index_path: impl Into<PathBuf>) -> Self {
        self.index_path = index_path.into();
        self
    }

    /// Refuse to run an empty index when `count` messages are expected
    pub fn expect_count(mut self, count: usize) -> Self {
        self.expected_count = Some(count);
        self
    }

    pub fn archive(&self) -> &Path {
        &self.archive
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// Load the index, failing if it no longer matches the archive
    pub async fn load_index(&self) -> Result<Index> {
        let index = load_index(&self.index_path).await?;
        if is_stale(&self.archive, &index) {
            return Err(MboxError::StaleIndex(format!(
                "{} is out of date for {}, rebuild it first",
                self.index_path.display(),
                self.archive.display()
            )));
        }

        if let Some(expected) = self.expected_count {
            if index.is_empty() && expected > 0 {
                return Err(MboxError::InvalidConfiguration(format!(
                    "index of {} is empty but {} messages were expected",
                    self.archive.display(),
                    expected
                )));
            }
        }
        Ok(index)
    }

    /// Run `processor` over the archive with the configured file and row sinks
    pub async fn process<P: MessageProcessor>(&self, processor: P) -> Result<RunStats> {
        let thresholds = WriterThresholds::from(&self.config.writer);
        let mut files: FileBatchWriter = BatchedWriter::new(
            FileSink::new(&self.config.output.dir, self.config.writer.flush_concurrency),
            thresholds,
        );
        let mut rows: RowBatchWriter = BatchedWriter::new(
            SqliteRowSink::connect(&self.config.output.database_url).await?,
            thresholds,
        );

        self.process_with(processor, &mut files, &mut rows).await
    }

    /// Run `processor` feeding caller-owned writers
    pub async fn process_with<P, F, R>(
        &self,
        processor: P,
        files: &mut BatchedWriter<F>,
        rows: &mut BatchedWriter<R>,
    ) -> Result<RunStats>
    where
        P: MessageProcessor,
        F: PersistenceSink<Content = Vec<u8>>,
        R: PersistenceSink<Content = RowRecord>,
    {
        let index = self.load_index().await?;
        let items = to_work_items(&index);
        let partitions = partition(&items, self.config.worker_count(), self.config.workers.strategy)?;

        info!(
            "Processing {} messages from {} with {} ({} workers, {} strategy)",
            items.len(),
            self.archive.display(),
            processor.name(),
            partitions.len(),
            self.config.workers.strategy
        );

        let options = DriverOptions::from_config(&self.config)?;
        let mut driver = ParallelDriver::new(&self.archive, Arc::new(processor), options);
        driver.run(partitions, files, rows).await
    }
}
