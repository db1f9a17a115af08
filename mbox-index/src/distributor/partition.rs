//! Partitioning algorithms
//!
//! Every strategy returns exactly `worker_count` partitions (some may be
//! empty) that together hold each input item exactly once.

use super::types::{Partition, PartitionStrategy, PartitionSummary, WorkItem};
use crate::error::{MboxError, Result};
use crate::index::Index;
use std::collections::HashMap;
use tracing::debug;

/// Project every index entry into a work item, in id order
pub fn to_work_items(index: &Index) -> Vec<WorkItem> {
    index.entries().iter().map(WorkItem::from).collect()
}

/// Split `items` over `worker_count` partitions
pub fn partition(
    items: &[WorkItem],
    worker_count: usize,
    strategy: PartitionStrategy,
) -> Result<Vec<Partition>> {
    if worker_count == 0 {
        return Err(MboxError::InvalidConfiguration(
            "worker count must be at least 1".to_string(),
        ));
    }

    let partitions = match strategy {
        PartitionStrategy::Balanced => round_robin(items, worker_count),
        PartitionStrategy::GroupingKey | PartitionStrategy::SecondaryKey => {
            grouped(items, worker_count, strategy)
        }
    };

    let summary = PartitionSummary::of(&partitions);
    debug!(
        "Partitioned {} items over {} workers ({}): min {}, max {}, avg {:.1}",
        summary.total_items,
        summary.partitions,
        strategy,
        summary.min_items,
        summary.max_items,
        summary.avg_items
    );

    Ok(partitions)
}

fn round_robin(items: &[WorkItem], worker_count: usize) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = (0..worker_count).map(Partition::new).collect();
    for (position, item) in items.iter().enumerate() {
        partitions[position % worker_count].items.push(item.clone());
    }
    partitions
}

/// Longest-processing-time bin packing over key groups
///
/// Groups are placed largest first onto the currently smallest partition,
/// so no partition exceeds the ideal share by more than the largest group.
/// Items without a key form singleton groups.
fn grouped(items: &[WorkItem], worker_count: usize, strategy: PartitionStrategy) -> Vec<Partition> {
    let mut groups: Vec<Vec<&WorkItem>> = Vec::new();
    let mut group_of_key: HashMap<&str, usize> = HashMap::new();

    for item in items {
        match strategy.key_of(item) {
            Some(key) => {
                let slot = *group_of_key.entry(key).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
                groups[slot].push(item);
            }
            None => groups.push(vec![item]),
        }
    }

    for group in &mut groups {
        group.sort_by_key(|item| item.id);
    }
    // Stable: equal-sized groups keep first-appearance order
    groups.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut partitions: Vec<Partition> = (0..worker_count).map(Partition::new).collect();
    for group in groups {
        // Smallest partition, lowest index on ties
        let mut target = 0;
        for (i, p) in partitions.iter().enumerate() {
            if p.items.len() < partitions[target].items.len() {
                target = i;
            }
        }
        partitions[target].items.extend(group.into_iter().cloned());
    }

    partitions
}
