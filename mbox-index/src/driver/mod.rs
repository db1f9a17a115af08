//! Parallel processing driver
//!
//! ```text
//! Idle → Dispatching → Collecting → Done
//!          │              ↑
//!          └─ partition tasks ─ units (timeout) ─┘
//! ```
//!
//! A run ends in `Done` once every unit has completed or timed out.
//! Partial completion is a normal outcome, reported through [`RunStats`].

pub mod runner;
pub mod types;

pub use runner::ParallelDriver;
pub use types::{DriverOptions, DriverState, RunStats};
