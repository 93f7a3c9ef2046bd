//! Planning agent: spec → task manifest.
//!
//! Full mode plans the whole build. Delta mode receives the existing manifest
//! and a change request and returns only the new tasks to append.

use crate::llm::LlmClient;
use crate::llm::json::parse_reply;
use crate::state::spec::ProjectSpec;
use crate::state::task::{Task, TaskManifest, TaskRole};
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, spec: &ProjectSpec) -> Result<Vec<Task>>;

    /// New tasks only. They may depend on existing tasks.
    async fn plan_delta(
        &self,
        spec: &ProjectSpec,
        manifest: &TaskManifest,
        request: &str,
    ) -> Result<Vec<Task>>;
}

#[derive(Debug, Deserialize)]
struct PlanReply {
    tasks: Vec<PlannedTask>,
}

/// Planners name the role `role` or `agent`, and often also send a task
/// `type`. The explicit role wins.
#[derive(Debug, Deserialize)]
struct PlannedTask {
    id: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    description: String,
    #[serde(default, alias = "dependencies")]
    depends_on: Vec<String>,
    #[serde(default)]
    context: Option<serde_json::Value>,
}

impl PlannedTask {
    fn into_task(self) -> Result<Task> {
        let raw = self
            .role
            .or(self.agent)
            .or(self.kind)
            .ok_or_else(|| anyhow::anyhow!("Task '{}' has no role", self.id))?;
        let role = map_role(&raw)?;
        let task = Task::new(&self.id, role, &self.description, self.depends_on);
        Ok(match self.context {
            None | Some(serde_json::Value::Null) => task,
            Some(serde_json::Value::String(text)) => task.with_context(text),
            Some(other) => task.with_context(other.to_string()),
        })
    }
}

/// Accept either an agent name or one of the task-type names planners like to use.
fn map_role(raw: &str) -> Result<TaskRole> {
    match raw.trim().to_lowercase().as_str() {
        "create_models" | "models" => Ok(TaskRole::Database),
        "create_routes" | "routes" => Ok(TaskRole::Api),
        "docker_up" | "docker" => Ok(TaskRole::Devops),
        other => other.parse(),
    }
}

const PLANNING_SYSTEM: &str = "You are the planning agent of a backend generator. \
You break a project spec into ordered implementation tasks. Reply with a single JSON object.";

const TASK_RULES: &str = "Roles: scaffold (project skeleton, config, /health), database (one task \
per model), api (one task per router with its schemas), devops (Dockerfile, compose, requirements).\n\
Dependency rules: the scaffold task comes first and has no dependencies; every database task \
depends on the scaffold task; every api task depends on all database tasks it touches; the devops \
task depends on everything else. Dependencies must never form a cycle.\n\
Reply: {\"tasks\": [{\"id\": \"t1\", \"role\": \"scaffold\", \"description\": \"...\", \
\"depends_on\": []}, ...]}";

pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn full_prompt(spec: &ProjectSpec) -> String {
        format!(
            "## SPEC\n```json\n{}\n```\n\n{TASK_RULES}\nNumber task ids t1, t2, ...",
            serde_json::to_string_pretty(spec).unwrap_or_default()
        )
    }

    pub fn delta_prompt(spec: &ProjectSpec, manifest: &TaskManifest, request: &str) -> String {
        let existing: Vec<String> = manifest
            .tasks
            .iter()
            .map(|t| {
                format!(
                    "- {} [{}] {:?} depends_on={:?}: {}",
                    t.id, t.role, t.status, t.depends_on, t.description
                )
            })
            .collect();
        format!(
            "## SPEC\n```json\n{}\n```\n\n## EXISTING TASKS\n{}\n\n## CHANGE REQUEST\n{request}\n\n\
             Plan ONLY the additional tasks needed for the change request. Never repeat or modify \
             existing tasks. New tasks may depend on existing ones. Continue numbering from t{}.\n\n{TASK_RULES}",
            serde_json::to_string_pretty(spec).unwrap_or_default(),
            existing.join("\n"),
            manifest.next_sequence("t"),
        )
    }

    fn parse(reply: &str) -> Result<Vec<Task>> {
        let plan: PlanReply = parse_reply(reply, "planning")?;
        plan.tasks.into_iter().map(PlannedTask::into_task).collect()
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, spec: &ProjectSpec) -> Result<Vec<Task>> {
        let reply = self
            .llm
            .complete(PLANNING_SYSTEM, &Self::full_prompt(spec))
            .await?;
        Self::parse(&reply)
    }

    async fn plan_delta(
        &self,
        spec: &ProjectSpec,
        manifest: &TaskManifest,
        request: &str,
    ) -> Result<Vec<Task>> {
        let reply = self
            .llm
            .complete(
                PLANNING_SYSTEM,
                &Self::delta_prompt(spec, manifest, request),
            )
            .await?;
        Self::parse(&reply)
    }
}
