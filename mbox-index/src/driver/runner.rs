//! Parallel dispatch and collection
//!
//! Each partition gets its own async task, which walks the partition one
//! unit (chunk) at a time on the blocking pool with its own archive reader.
//! Units are bounded by a timeout: a late unit is abandoned, every item in
//! it counts as failed, and the task moves on. The abandoned thread keeps
//! running detached; the reader it held is reopened for the next unit.
//!
//! Results flow over a channel to a single collector, the only code that
//! touches the writers.

use super::types::{DriverOptions, DriverState, RunStats};
use crate::distributor::{Partition, WorkItem};
use crate::error::{MboxError, Result};
use crate::processor::{ItemOutput, MessageProcessor};
use crate::reader::MmapReader;
use crate::writer::{BatchedWriter, FlushReport, PersistenceSink, RowRecord};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result of processing one item
struct ItemOutcome {
    item_id: u32,
    result: std::result::Result<ItemOutput, String>,
}

/// Message from a partition task to the collector
enum UnitEvent {
    Completed {
        outcomes: Vec<ItemOutcome>,
    },
    Failed {
        unit: String,
        item_ids: Vec<u32>,
        reason: String,
        timed_out: bool,
    },
}

/// Runs a processor over partitions in parallel
pub struct ParallelDriver<P: MessageProcessor> {
    archive: PathBuf,
    processor: Arc<P>,
    options: DriverOptions,
    state: DriverState,
}

impl<P: MessageProcessor> ParallelDriver<P> {
    pub fn new(archive: impl Into<PathBuf>, processor: Arc<P>, options: DriverOptions) -> Self {
        Self {
            archive: archive.into(),
            processor,
            options,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn transition(&mut self, next: DriverState) {
        debug!("Driver {} -> {}", self.state, next);
        self.state = next;
    }

    /// Process every partition, feeding outputs into the two writers
    ///
    /// Both writers are force-flushed before this returns, whatever the
    /// outcome. Per-item failures and timeouts are counted, never returned
    /// as errors.
    pub async fn run<F, R>(
        &mut self,
        partitions: Vec<Partition>,
        files: &mut BatchedWriter<F>,
        rows: &mut BatchedWriter<R>,
    ) -> Result<RunStats>
    where
        F: PersistenceSink<Content = Vec<u8>>,
        R: PersistenceSink<Content = RowRecord>,
    {
        let started = Instant::now();
        let files_before = files.stats().clone();
        let rows_before = rows.stats().clone();

        let outcome = self.dispatch_and_collect(partitions, files, rows).await;

        files.force_flush().await;
        rows.force_flush().await;
        self.transition(DriverState::Done);

        let mut stats = outcome?;
        stats.files_written = files.stats().items_written - files_before.items_written;
        stats.rows_written = rows.stats().items_written - rows_before.items_written;
        stats.write_failures = (files.stats().items_failed - files_before.items_failed)
            + (rows.stats().items_failed - rows_before.items_failed);
        stats.failed_keys = files
            .failed_keys()
            .into_iter()
            .chain(rows.failed_keys())
            .take(self.options.failure_sample_limit)
            .collect();
        stats.finish(started.elapsed());

        info!(
            "Run finished in {:?} ({:.0} items/s): {} attempted, {} succeeded, {} failed ({} units timed out), {} files, {} rows, {} write failures",
            stats.elapsed,
            stats.throughput,
            stats.attempted,
            stats.succeeded,
            stats.failed,
            stats.timed_out_units,
            stats.files_written,
            stats.rows_written,
            stats.write_failures
        );

        Ok(stats)
    }

    async fn dispatch_and_collect<F, R>(
        &mut self,
        partitions: Vec<Partition>,
        files: &mut BatchedWriter<F>,
        rows: &mut BatchedWriter<R>,
    ) -> Result<RunStats>
    where
        F: PersistenceSink<Content = Vec<u8>>,
        R: PersistenceSink<Content = RowRecord>,
    {
        self.options.validate()?;
        if self.state != DriverState::Idle {
            return Err(MboxError::InvalidConfiguration(format!(
                "driver already used (state {})",
                self.state
            )));
        }

        let mut stats = RunStats {
            partitions: partitions.len(),
            ..Default::default()
        };
        let total_items: usize = partitions.iter().map(Partition::len).sum();

        self.transition(DriverState::Dispatching);
        let (tx, mut rx) = mpsc::channel(self.options.channel_capacity);
        let mut tasks = JoinSet::new();

        for partition in partitions.into_iter().filter(|p| !p.is_empty()) {
            debug!("Dispatching partition {} ({} items)", partition.index, partition.len());
            tasks.spawn(run_partition(
                self.archive.clone(),
                Arc::clone(&self.processor),
                partition,
                self.options.clone(),
                tx.clone(),
            ));
        }
        drop(tx);
        info!(
            "Dispatched {} items over {} partitions",
            total_items, stats.partitions
        );

        self.transition(DriverState::Collecting);
        let limit = self.options.failure_sample_limit;

        while let Some(event) = rx.recv().await {
            match event {
                UnitEvent::Completed { outcomes } => {
                    for outcome in outcomes {
                        match outcome.result {
                            Ok(output) => {
                                stats.attempted += 1;
                                stats.succeeded += 1;
                                queue_output(output, files, rows).await;
                            }
                            Err(reason) => {
                                debug!("Item {} failed: {}", outcome.item_id, reason);
                                stats.record_failures(
                                    1,
                                    format!("item {}: {}", outcome.item_id, reason),
                                    limit,
                                );
                            }
                        }
                    }
                }
                UnitEvent::Failed {
                    unit,
                    item_ids,
                    reason,
                    timed_out,
                } => {
                    if timed_out {
                        stats.timed_out_units += 1;
                    }
                    warn!("Unit {} failed ({} items): {}", unit, item_ids.len(), reason);
                    stats.record_failures(item_ids.len(), format!("unit {}: {}", unit, reason), limit);
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Partition task aborted: {}", e);
            }
        }

        // Items from an aborted partition task never reported back
        if stats.attempted < total_items {
            let lost = total_items - stats.attempted;
            stats.record_failures(lost, format!("{} items lost to aborted workers", lost), limit);
        }

        Ok(stats)
    }
}

async fn queue_output<F, R>(output: ItemOutput, files: &mut BatchedWriter<F>, rows: &mut BatchedWriter<R>)
where
    F: PersistenceSink<Content = Vec<u8>>,
    R: PersistenceSink<Content = RowRecord>,
{
    for file in output.files {
        log_flush(files.queue(file.key, file.content).await);
    }
    for row in output.rows {
        log_flush(rows.queue(row.key, row.record).await);
    }
}

fn log_flush(report: Option<FlushReport>) {
    if let Some(report) = report {
        debug!("Automatic flush wrote {} items", report.written);
    }
}

async fn run_partition<P: MessageProcessor>(
    archive: PathBuf,
    processor: Arc<P>,
    partition: Partition,
    options: DriverOptions,
    tx: mpsc::Sender<UnitEvent>,
) {
    let chunk_size = if options.chunk_size == 0 {
        partition.len().max(1)
    } else {
        options.chunk_size
    };
    let mut reader: Option<MmapReader> = None;

    for (unit_no, chunk) in partition.items.chunks(chunk_size).enumerate() {
        let unit = format!("{}.{}", partition.index, unit_no);
        let items = chunk.to_vec();
        let item_ids: Vec<u32> = items.iter().map(|item| item.id).collect();

        let carried = reader.take();
        let unit_archive = archive.clone();
        let unit_processor = Arc::clone(&processor);
        let handle = tokio::task::spawn_blocking(move || {
            process_unit(&unit_archive, carried, &items, unit_processor.as_ref())
        });

        let event = match tokio::time::timeout(options.unit_timeout, handle).await {
            Ok(Ok((returned, outcomes))) => {
                reader = returned;
                UnitEvent::Completed { outcomes }
            }
            Ok(Err(e)) => UnitEvent::Failed {
                unit,
                item_ids,
                reason: format!("worker thread failed: {}", e),
                timed_out: false,
            },
            Err(_) => {
                let timeout = MboxError::UnitTimeout {
                    unit: unit.clone(),
                    timeout: options.unit_timeout,
                };
                UnitEvent::Failed {
                    unit,
                    item_ids,
                    reason: timeout.to_string(),
                    timed_out: true,
                }
            }
        };

        if tx.send(event).await.is_err() {
            // Collector gone; nothing left to report to
            return;
        }
    }
}

/// Process one unit on a blocking thread, handing the reader back
fn process_unit<P: MessageProcessor>(
    archive: &Path,
    reader: Option<MmapReader>,
    items: &[WorkItem],
    processor: &P,
) -> (Option<MmapReader>, Vec<ItemOutcome>) {
    let reader = match reader {
        Some(reader) => reader,
        None => match MmapReader::open(archive) {
            Ok(reader) => reader,
            Err(e) => {
                let reason = format!("cannot open archive: {}", e);
                let outcomes = items
                    .iter()
                    .map(|item| ItemOutcome {
                        item_id: item.id,
                        result: Err(reason.clone()),
                    })
                    .collect();
                return (None, outcomes);
            }
        },
    };

    let outcomes = items
        .iter()
        .map(|item| ItemOutcome {
            item_id: item.id,
            result: process_item(&reader, item, processor),
        })
        .collect();

    (Some(reader), outcomes)
}

fn process_item<P: MessageProcessor>(
    reader: &MmapReader,
    item: &WorkItem,
    processor: &P,
) -> std::result::Result<ItemOutput, String> {
    let message = reader.read_item(item).map_err(|e| e.to_string())?;

    match catch_unwind(AssertUnwindSafe(|| processor.process(&message, item))) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(panic) => Err(format!("{} panicked: {}", processor.name(), panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
