//! Project data model and the shared-state store.

pub mod project;
pub mod shared;
pub mod spec;
pub mod store;
pub mod task;

pub use project::{Project, ProjectStatus};
pub use shared::{
    PendingQuestion, PlanRequest, QuestionKind, SessionMarkers, SharedState, Speaker,
    StatusReport, Suspension,
};
pub use spec::{
    Cardinality, EntitySpec, FieldSpec, MissingItem, ProjectSpec, Relationship, SpecUpdate,
};
pub use store::{PortAllocation, SqliteStore, StateStore};
pub use task::{
    AgentError, AgentResult, ErrorDetail, ErrorKind, ResultStatus, Task, TaskManifest, TaskRole,
    TaskStatus,
};
