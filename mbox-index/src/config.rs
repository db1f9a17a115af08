use crate::distributor::PartitionStrategy;
use crate::error::{MboxError, Result};
use crate::index::IndexFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub format: IndexFormat,
    /// Explicit index location (defaults next to the archive)
    pub path: Option<String>,
    #[serde(default = "default_true")]
    pub extract_metadata: bool,
    #[serde(default = "default_large_payload_threshold")]
    pub large_payload_threshold: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Number of workers, 0 = available parallelism
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub strategy: PartitionStrategy,
    /// Items per dispatched unit, 0 = whole partition
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_unit_timeout")]
    pub unit_timeout_secs: u64,
    #[serde(default = "default_failure_sample_limit")]
    pub failure_sample_limit: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WriterConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_flush_concurrency")]
    pub flush_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_large_payload_threshold() -> u64 {
    1024 * 1024 // 1MB
}

fn default_chunk_size() -> usize {
    100
}

fn default_unit_timeout() -> u64 {
    300
}

fn default_failure_sample_limit() -> usize {
    20
}

fn default_max_items() -> usize {
    1000
}

fn default_max_bytes() -> usize {
    100 * 1024 * 1024 // 100MB
}

fn default_flush_concurrency() -> usize {
    4
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_database_url() -> String {
    "sqlite://output/results.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            format: IndexFormat::default(),
            path: None,
            extract_metadata: true,
            large_payload_threshold: default_large_payload_threshold(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 0,
            strategy: PartitionStrategy::default(),
            chunk_size: default_chunk_size(),
            unit_timeout_secs: default_unit_timeout(),
            failure_sample_limit: default_failure_sample_limit(),
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_bytes: default_max_bytes(),
            flush_concurrency: default_flush_concurrency(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            database_url: default_database_url(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            workers: WorkerConfig::default(),
            writer: WriterConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MboxError::Config(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| MboxError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.writer.max_items == 0 {
            return Err(MboxError::InvalidConfiguration(
                "writer.max_items must be at least 1".to_string(),
            ));
        }
        if self.writer.max_bytes == 0 {
            return Err(MboxError::InvalidConfiguration(
                "writer.max_bytes must be at least 1".to_string(),
            ));
        }
        if self.writer.flush_concurrency == 0 {
            return Err(MboxError::InvalidConfiguration(
                "writer.flush_concurrency must be at least 1".to_string(),
            ));
        }
        if self.workers.unit_timeout_secs == 0 {
            return Err(MboxError::InvalidConfiguration(
                "workers.unit_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved worker count
    pub fn worker_count(&self) -> usize {
        if self.workers.count > 0 {
            return self.workers.count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.workers.unit_timeout_secs)
    }

    /// Index location for an archive
    pub fn index_path(&self, archive: &Path) -> PathBuf {
        match &self.index.path {
            Some(path) => PathBuf::from(path),
            None => self.index.format.default_path(archive),
        }
    }
}
