//! Driver state and run statistics

use crate::config::Config;
use crate::error::{MboxError, Result};
use crate::writer::KeyFailure;
use serde::Serialize;
use std::time::Duration;

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverState {
    Idle,
    Dispatching,
    Collecting,
    Done,
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverState::Idle => write!(f, "idle"),
            DriverState::Dispatching => write!(f, "dispatching"),
            DriverState::Collecting => write!(f, "collecting"),
            DriverState::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// Items per dispatched unit, 0 = whole partition
    pub chunk_size: usize,
    /// Bound on each unit; exceeding it fails every item of the unit
    pub unit_timeout: Duration,
    pub failure_sample_limit: usize,
    /// Capacity of the worker to collector channel
    pub channel_capacity: usize,
}

impl DriverOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunk_size: config.workers.chunk_size,
            unit_timeout: config.unit_timeout(),
            failure_sample_limit: config.workers.failure_sample_limit,
            ..Self::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.unit_timeout.is_zero() {
            return Err(MboxError::InvalidConfiguration(
                "unit timeout must be positive".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(MboxError::InvalidConfiguration(
                "channel capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            unit_timeout: Duration::from_secs(300),
            failure_sample_limit: 20,
            channel_capacity: 256,
        }
    }
}

/// What a run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub partitions: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out_units: usize,
    pub files_written: usize,
    pub rows_written: usize,
    pub write_failures: usize,
    /// Keys the writers could not persist, bounded by the sample limit
    pub failed_keys: Vec<KeyFailure>,
    /// First failure messages, bounded by the sample limit
    pub failure_samples: Vec<String>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Items attempted per second
    pub throughput: f64,
}

impl RunStats {
    pub(crate) fn record_failures(&mut self, count: usize, message: String, limit: usize) {
        self.attempted += count;
        self.failed += count;
        if self.failure_samples.len() < limit {
            self.failure_samples.push(message);
        }
    }

    pub(crate) fn finish(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
        let secs = elapsed.as_secs_f64();
        self.throughput = if secs > 0.0 {
            self.attempted as f64 / secs
        } else {
            0.0
        };
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.write_failures == 0
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }
}
