//! Task dependency graph and scheduler.
//!
//! - [`builder`] validates manifests (unique ids, known dependencies, no cycles).
//! - [`scheduler`] selects the next runnable task and applies outcomes.

pub mod builder;
pub mod scheduler;

pub use builder::GraphBuilder;
pub use scheduler::{FailureOutcome, ScheduleStatus, TaskScheduler};

use crate::state::task::Task;
use anyhow::{Result, bail};

/// Validate a complete plan.
pub fn validate_plan(tasks: &[Task]) -> Result<()> {
    if tasks.is_empty() {
        bail!("Plan contains no tasks");
    }
    GraphBuilder::new(tasks).validate()
}

/// Validate a delta plan against the manifest it extends. An empty delta is
/// valid.
pub fn validate_delta(existing: &[Task], delta: &[Task]) -> Result<()> {
    GraphBuilder::for_delta(existing, delta)?.validate()
}
