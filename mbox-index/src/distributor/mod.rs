//! Work distribution
//!
//! Projects index entries into [`WorkItem`]s and splits them into one
//! [`Partition`] per worker. See [`PartitionStrategy`] for the options.

pub mod partition;
pub mod types;

pub use partition::{partition, to_work_items};
pub use types::{Partition, PartitionStrategy, PartitionSummary, WorkItem};
