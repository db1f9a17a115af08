//! Threshold-driven batched writer

use super::buffer::OutputBuffer;
use super::sink::{KeyFailure, PersistenceSink};
use crate::config::WriterConfig;
use crate::error::Result;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// When a buffer is flushed automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterThresholds {
    pub max_items: usize,
    pub max_bytes: usize,
}

impl Default for WriterThresholds {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

impl From<&WriterConfig> for WriterThresholds {
    fn from(config: &WriterConfig) -> Self {
        Self {
            max_items: config.max_items,
            max_bytes: config.max_bytes,
        }
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub failed: Vec<KeyFailure>,
}

/// Running totals for one writer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Times the sink was invoked
    pub flushes: usize,
    pub items_written: usize,
    pub items_failed: usize,
}

/// Buffers `(key, content)` pairs and hands them to a sink in batches
///
/// A writer is owned by a single task. Failed keys are parked, never retried
/// automatically; see [`BatchedWriter::take_failed`] and
/// [`BatchedWriter::requeue_failed`].
pub struct BatchedWriter<S: PersistenceSink> {
    sink: S,
    thresholds: WriterThresholds,
    buffer: OutputBuffer<S::Content>,
    failed: BTreeMap<String, (S::Content, String)>,
    stats: WriterStats,
}

impl<S: PersistenceSink> BatchedWriter<S> {
    pub fn new(sink: S, thresholds: WriterThresholds) -> Self {
        Self {
            sink,
            thresholds,
            buffer: OutputBuffer::new(),
            failed: BTreeMap::new(),
            stats: WriterStats::default(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.byte_size()
    }

    /// Buffer content under `key`, flushing if a threshold is reached
    ///
    /// Returns the report of the automatic flush, if one ran.
    pub async fn queue(&mut self, key: impl Into<String>, content: S::Content) -> Option<FlushReport> {
        let key = key.into();
        self.failed.remove(&key);
        self.buffer.insert(key, content);

        if self.buffer.len() >= self.thresholds.max_items
            || self.buffer.byte_size() >= self.thresholds.max_bytes
        {
            debug!(
                "{} buffer reached {} items / {} bytes, flushing",
                self.sink.name(),
                self.buffer.len(),
                self.buffer.byte_size()
            );
            Some(self.flush().await)
        } else {
            None
        }
    }

    /// Write everything buffered; a no-op on an empty buffer
    pub async fn flush(&mut self) -> FlushReport {
        if self.buffer.is_empty() {
            return FlushReport::default();
        }

        let batch = self.buffer.drain();
        let failures = self.sink.persist_batch(&batch).await;
        self.stats.flushes += 1;

        let reasons: HashMap<&str, &str> = failures
            .iter()
            .map(|f| (f.key.as_str(), f.reason.as_str()))
            .collect();

        let mut written = 0;
        let mut parked = Vec::new();
        for (key, content) in batch {
            match reasons.get(key.as_str()) {
                Some(reason) => parked.push((key, (content, reason.to_string()))),
                None => written += 1,
            }
        }
        self.failed.extend(parked);

        self.stats.items_written += written;
        self.stats.items_failed += failures.len();

        if !failures.is_empty() {
            warn!(
                "{} flush: {} written, {} failed",
                self.sink.name(),
                written,
                failures.len()
            );
        }

        FlushReport {
            written,
            failed: failures,
        }
    }

    /// Final flush on shutdown; logs anything left unpersisted
    pub async fn force_flush(&mut self) -> FlushReport {
        let report = self.flush().await;

        if !self.failed.is_empty() {
            warn!(
                "{} writer finished with {} unpersisted keys",
                self.sink.name(),
                self.failed.len()
            );
            for (key, (_, reason)) in self.failed.iter().take(10) {
                warn!("  {}: {}", key, reason);
            }
        }
        info!(
            "{} writer: {} written, {} failed, {} flushes",
            self.sink.name(),
            self.stats.items_written,
            self.stats.items_failed,
            self.stats.flushes
        );

        report
    }

    /// Keys that failed to persist, with their reasons
    pub fn failed_keys(&self) -> Vec<KeyFailure> {
        self.failed
            .iter()
            .map(|(key, (_, reason))| KeyFailure::new(key.clone(), reason))
            .collect()
    }

    /// Remove and return failed entries for external reprocessing
    pub fn take_failed(&mut self) -> Vec<(String, S::Content, String)> {
        std::mem::take(&mut self.failed)
            .into_iter()
            .map(|(key, (content, reason))| (key, content, reason))
            .collect()
    }

    /// Move failed entries back into the buffer for another attempt
    pub fn requeue_failed(&mut self) -> usize {
        let failed = std::mem::take(&mut self.failed);
        let count = failed.len();
        for (key, (content, _)) in failed {
            self.buffer.insert(key, content);
        }
        count
    }

    /// Run `body` with this writer, force-flushing on every exit path
    ///
    /// The flush runs whether `body` succeeds or returns early with an
    /// error; the body's result is passed through unchanged.
    pub async fn scoped<T, F>(&mut self, body: F) -> Result<T>
    where
        F: for<'w> FnOnce(&'w mut Self) -> BoxFuture<'w, Result<T>>,
    {
        let outcome = body(self).await;
        self.force_flush().await;
        outcome
    }
}

impl<S: PersistenceSink> Drop for BatchedWriter<S> {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            warn!(
                "{} writer dropped with {} unflushed items",
                self.sink.name(),
                self.buffer.len()
            );
        }
    }
}
