use async_trait::async_trait;
use futures::FutureExt;
use mbox_index::error::{MboxError, Result};
use mbox_index::writer::{
    BatchedWriter, FileSink, KeyFailure, PersistenceSink, RowRecord, SqliteRowSink,
    WriterThresholds,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Sink that records every batch it receives
#[derive(Clone, Default)]
struct CountingSink {
    calls: Arc<Mutex<Vec<usize>>>,
    keys: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl PersistenceSink for CountingSink {
    type Content = Vec<u8>;

    async fn persist_batch(&self, batch: &[(String, Vec<u8>)]) -> Vec<KeyFailure> {
        self.calls.lock().unwrap().push(batch.len());
        let mut keys = self.keys.lock().unwrap();
        for (key, _) in batch {
            keys.insert(key.clone());
        }
        Vec::new()
    }

    fn name(&self) -> &str {
        "counting"
    }
}

fn thousand_items() -> WriterThresholds {
    WriterThresholds {
        max_items: 1000,
        max_bytes: usize::MAX,
    }
}

#[tokio::test]
async fn test_2500_items_flush_three_times() {
    let sink = CountingSink::default();
    let mut writer = BatchedWriter::new(sink.clone(), thousand_items());

    let mut automatic = 0;
    for i in 0..2500 {
        if writer.queue(format!("item-{}", i), vec![0u8; 16]).await.is_some() {
            automatic += 1;
        }
    }
    assert_eq!(automatic, 2);

    writer.force_flush().await;

    assert_eq!(*sink.calls.lock().unwrap(), vec![1000, 1000, 500]);
    assert_eq!(sink.keys.lock().unwrap().len(), 2500);
    assert_eq!(writer.stats().items_written, 2500);
}

#[tokio::test]
async fn test_early_error_exit_loses_nothing() {
    let sink = CountingSink::default();
    let mut writer = BatchedWriter::new(sink.clone(), thousand_items());

    let result: Result<usize> = writer
        .scoped(|w| {
            async move {
                for i in 0..2500 {
                    w.queue(format!("item-{}", i), vec![1u8; 8]).await;
                }
                Err(MboxError::Worker("processing aborted".to_string()))
            }
            .boxed()
        })
        .await;

    assert!(matches!(result, Err(MboxError::Worker(_))));
    assert_eq!(sink.calls.lock().unwrap().len(), 3);
    assert_eq!(sink.keys.lock().unwrap().len(), 2500);
    assert_eq!(writer.pending(), 0);
}

#[tokio::test]
async fn test_scoped_passes_success_through() {
    let sink = CountingSink::default();
    let mut writer = BatchedWriter::new(sink.clone(), thousand_items());

    let queued = writer
        .scoped(|w| {
            async move {
                w.queue("only", b"x".to_vec()).await;
                Ok(1)
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(queued, 1);
    assert_eq!(*sink.calls.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_file_writer_surfaces_failed_keys() {
    let temp_dir = TempDir::new().unwrap();
    let sink = FileSink::new(temp_dir.path(), 4);
    let mut writer = BatchedWriter::new(sink, WriterThresholds::default());

    writer.queue("thread/1.eml", b"one".to_vec()).await;
    writer.queue("../outside.eml", b"two".to_vec()).await;
    let report = writer.force_flush().await;

    assert_eq!(report.written, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(writer.failed_keys()[0].key, "../outside.eml");
    assert_eq!(std::fs::read(temp_dir.path().join("thread/1.eml")).unwrap(), b"one");
}

#[tokio::test]
async fn test_row_writer_bulk_inserts() {
    let temp_dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", temp_dir.path().join("rows.db").display());
    let sink = SqliteRowSink::connect(&url).await.unwrap();
    let mut writer = BatchedWriter::new(
        sink,
        WriterThresholds {
            max_items: 300,
            max_bytes: usize::MAX,
        },
    );

    for id in 0..1000u32 {
        let record = RowRecord::json(id, &serde_json::json!({ "id": id })).unwrap();
        writer.queue(format!("message-{}", id), record).await;
    }
    writer.force_flush().await;

    assert_eq!(writer.stats().flushes, 4);
    assert_eq!(writer.sink().count().await.unwrap(), 1000);
    let row = writer.sink().get("message-999").await.unwrap().unwrap();
    assert_eq!(row.item_id, 999);
}
