//! Typed error hierarchy for the orchestrator.
//!
//! Two top-level enums:
//! - `OrchestratorError`: control-plane failures (phases, planning, agents, validation)
//! - `StoreError`: persistence failures surfaced by the state store

use crate::phase::Phase;
use thiserror::Error;

/// Errors from the orchestrator control plane.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The spec draft is missing required information. Recovered by asking the user.
    #[error("Spec is incomplete: {}", missing.join("; "))]
    SpecIncomplete { missing: Vec<String> },

    #[error("Planning produced an invalid manifest: {0}")]
    PlanningInvalid(String),

    #[error("Task {task_id} failed: {message}")]
    Agent {
        task_id: String,
        message: String,
        file: Option<String>,
        line: Option<u32>,
    },

    #[error("Validation failed at {stage}: {message}")]
    ValidationFailure {
        stage: String,
        message: String,
        file: Option<String>,
        line: Option<u32>,
    },

    #[error("Could not classify interruption: {0}")]
    Classification(String),

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[source] anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the persisted state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Stored state for project {project_id} is corrupt: {message}")]
    Corrupt { project_id: String, message: String },
}
