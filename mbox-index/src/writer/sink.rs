//! Persistence sinks
//!
//! A sink receives one flushed batch at a time and reports the keys it
//! could not persist. Every other key in the batch is considered durable.

use super::buffer::BufferedContent;
use crate::error::{MboxError, Result};
use async_trait::async_trait;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// A key that failed to persist, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyFailure {
    pub key: String,
    pub reason: String,
}

impl KeyFailure {
    pub fn new(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<KeyFailure> for MboxError {
    fn from(failure: KeyFailure) -> Self {
        MboxError::WriteFailure {
            key: failure.key,
            reason: failure.reason,
        }
    }
}

/// Durable destination for flushed batches
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    type Content: BufferedContent;

    /// Persist a batch, returning the keys that failed
    ///
    /// Each key must be all-or-nothing: a failed key leaves no partial
    /// output behind.
    async fn persist_batch(&self, batch: &[(String, Self::Content)]) -> Vec<KeyFailure>;

    /// Short label for logs
    fn name(&self) -> &str;
}

/// Writes each key as a file under a root directory
///
/// Files are written to a temporary sibling and renamed into place.
pub struct FileSink {
    root: PathBuf,
    concurrency: usize,
}

impl FileSink {
    pub fn new(root: impl Into<PathBuf>, concurrency: usize) -> Self {
        Self {
            root: root.into(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination for `key`, rejecting keys that would escape the root
    fn target_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let well_formed = !key.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));

        if !well_formed {
            return Err(MboxError::WriteFailure {
                key: key.to_string(),
                reason: "key must be a relative path without '..'".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

/// Write `content` to a temporary sibling of `target`, then move it into place
async fn write_atomically(
    target: PathBuf,
    fallback_dir: PathBuf,
    content: Vec<u8>,
) -> Result<()> {
    let parent = target.parent().map(Path::to_path_buf).unwrap_or(fallback_dir);
    fs::create_dir_all(&parent).await?;

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = parent.join(format!(".{}.tmp-{}", name, Uuid::new_v4()));

    let written = match fs::write(&tmp_path, &content).await {
        Ok(()) => fs::rename(&tmp_path, &target).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl PersistenceSink for FileSink {
    type Content = Vec<u8>;

    async fn persist_batch(&self, batch: &[(String, Vec<u8>)]) -> Vec<KeyFailure> {
        // Each write owns its key and content so the futures are 'static
        let writes: Vec<BoxFuture<'static, Option<KeyFailure>>> = batch
            .iter()
            .map(|(key, content)| {
                let key = key.clone();
                match self.target_path(&key) {
                    Ok(target) => {
                        let root = self.root.clone();
                        let content = content.clone();
                        async move {
                            write_atomically(target, root, content)
                                .await
                                .err()
                                .map(|e| KeyFailure::new(key, e))
                        }
                        .boxed()
                    }
                    Err(e) => future::ready(Some(KeyFailure::new(key, e))).boxed(),
                }
            })
            .collect();

        let outcomes: Vec<Option<KeyFailure>> = stream::iter(writes)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        let failures: Vec<KeyFailure> = outcomes.into_iter().flatten().collect();

        debug!(
            "Wrote {} of {} files under {}",
            batch.len() - failures.len(),
            batch.len(),
            self.root.display()
        );
        failures
    }

    fn name(&self) -> &str {
        "files"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_nested_files() {
        let temp_dir = TempDir::new().unwrap();
        let sink = FileSink::new(temp_dir.path(), 2);

        let batch = vec![
            ("a/1.eml".to_string(), b"one".to_vec()),
            ("a/2.eml".to_string(), b"two".to_vec()),
            ("top.txt".to_string(), b"three".to_vec()),
        ];
        let failures = sink.persist_batch(&batch).await;

        assert!(failures.is_empty());
        assert_eq!(std::fs::read(temp_dir.path().join("a/2.eml")).unwrap(), b"two");
        assert_eq!(std::fs::read(temp_dir.path().join("top.txt")).unwrap(), b"three");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let sink = FileSink::new(temp_dir.path().join("out"), 2);

        let batch = vec![
            ("../escape.txt".to_string(), b"x".to_vec()),
            ("/etc/absolute".to_string(), b"x".to_vec()),
            ("fine.txt".to_string(), b"ok".to_vec()),
        ];
        let mut failures = sink.persist_batch(&batch).await;
        failures.sort_by(|a, b| a.key.cmp(&b.key));

        let keys: Vec<&str> = failures.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["../escape.txt", "/etc/absolute"]);
        assert!(!temp_dir.path().join("escape.txt").exists());
        assert!(temp_dir.path().join("out/fine.txt").exists());
    }

    #[tokio::test]
    async fn test_spawned_batch_writes_every_key() {
        let temp_dir = TempDir::new().unwrap();
        let sink = std::sync::Arc::new(FileSink::new(temp_dir.path(), 4));

        let batch: Vec<(String, Vec<u8>)> = (0..50)
            .map(|i| (format!("group-{}/{}.eml", i % 5, i), format!("body {}", i).into_bytes()))
            .collect();

        // Runs on the multi-threaded runtime, so the batch future must be Send
        let task_sink = std::sync::Arc::clone(&sink);
        let failures = tokio::spawn(async move { task_sink.persist_batch(&batch).await })
            .await
            .unwrap();

        assert!(failures.is_empty());
        for i in 0..50 {
            let path = temp_dir.path().join(format!("group-{}/{}.eml", i % 5, i));
            assert_eq!(std::fs::read(path).unwrap(), format!("body {}", i).into_bytes());
        }
    }
}
