//! Dispatch types

use crate::error::{MboxError, Result};
use crate::index::IndexEntry;
use serde::{Deserialize, Serialize};

/// Minimal projection of an index entry, copied into partitions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u32,
    pub byte_offset: u64,
    pub byte_length: u32,
    pub grouping_key: Option<String>,
    pub secondary_key: Option<String>,
}

impl From<&IndexEntry> for WorkItem {
    fn from(entry: &IndexEntry) -> Self {
        Self {
            id: entry.id,
            byte_offset: entry.byte_offset,
            byte_length: entry.byte_length,
            grouping_key: entry.grouping_key.clone(),
            secondary_key: entry.secondary_key.clone(),
        }
    }
}

/// Items assigned to one worker for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub items: Vec<WorkItem>,
}

impl Partition {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(|item| item.byte_length as u64).sum()
    }
}

/// How items are spread over workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartitionStrategy {
    /// Round-robin by position
    #[default]
    Balanced,
    /// Keep each grouping key on one worker
    GroupingKey,
    /// Keep each secondary key on one worker
    SecondaryKey,
}

impl PartitionStrategy {
    /// Key this strategy groups by, if any
    pub(crate) fn key_of<'a>(&self, item: &'a WorkItem) -> Option<&'a str> {
        match self {
            PartitionStrategy::Balanced => None,
            PartitionStrategy::GroupingKey => item.grouping_key.as_deref(),
            PartitionStrategy::SecondaryKey => item.secondary_key.as_deref(),
        }
    }
}

impl std::fmt::Display for PartitionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionStrategy::Balanced => write!(f, "balanced"),
            PartitionStrategy::GroupingKey => write!(f, "grouping-key"),
            PartitionStrategy::SecondaryKey => write!(f, "secondary-key"),
        }
    }
}

impl std::str::FromStr for PartitionStrategy {
    type Err = MboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "balanced" => Ok(PartitionStrategy::Balanced),
            "grouping-key" | "thread" => Ok(PartitionStrategy::GroupingKey),
            "secondary-key" | "domain" => Ok(PartitionStrategy::SecondaryKey),
            other => Err(MboxError::InvalidConfiguration(format!(
                "unknown partition strategy: {}",
                other
            ))),
        }
    }
}

/// Size spread across a set of partitions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PartitionSummary {
    pub partitions: usize,
    pub total_items: usize,
    pub min_items: usize,
    pub max_items: usize,
    pub avg_items: f64,
}

impl PartitionSummary {
    pub fn of(partitions: &[Partition]) -> Self {
        let total_items: usize = partitions.iter().map(Partition::len).sum();
        Self {
            partitions: partitions.len(),
            total_items,
            min_items: partitions.iter().map(Partition::len).min().unwrap_or(0),
            max_items: partitions.iter().map(Partition::len).max().unwrap_or(0),
            avg_items: if partitions.is_empty() {
                0.0
            } else {
                total_items as f64 / partitions.len() as f64
            },
        }
    }
}
