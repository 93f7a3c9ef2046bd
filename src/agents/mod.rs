//! Phase agents and the capabilities the orchestrator drives.
//!
//! | Seam | Trait | Shipped implementation |
//! |------|-------|------------------------|
//! | Implementation tasks | [`AgentRunner`] | [`claude::ClaudeAgentRunner`] |
//! | Research | [`research::Researcher`] | [`research::LlmResearcher`] |
//! | Planning | [`planning::Planner`] | [`planning::LlmPlanner`] |
//! | Validation | [`validation::Validator`] | [`validation::ComposeValidator`] |
//! | Version control | [`checkpoint::Checkpointer`] | [`checkpoint::GitCheckpointer`] |

pub mod checkpoint;
pub mod claude;
pub mod planning;
pub mod research;
pub mod stream;
pub mod validation;

use crate::orchestrator::events::OutboundEvent;
use crate::state::shared::SharedState;
use crate::state::task::{AgentResult, Task, TaskRole};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Forwards agent tool activity to the session's event stream.
#[derive(Clone)]
pub struct ProgressSink {
    task_id: String,
    tx: Option<mpsc::Sender<OutboundEvent>>,
}

impl ProgressSink {
    pub fn new(task_id: &str, tx: mpsc::Sender<OutboundEvent>) -> Self {
        Self {
            task_id: task_id.to_string(),
            tx: Some(tx),
        }
    }

    /// A sink that drops everything.
    pub fn discard(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            tx: None,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn tool(&self, tool: &str, arguments: Value, result: Option<String>) {
        if let Some(ref tx) = self.tx {
            tx.send(OutboundEvent::ToolProgress {
                task_id: self.task_id.clone(),
                tool: tool.to_string(),
                arguments,
                result,
            })
            .await
            .ok();
        }
    }
}

/// Everything an agent may look at while running a task.
pub struct AgentContext<'a> {
    pub state: &'a SharedState,
    /// The project's working directory. Owned by this dispatch alone.
    pub workdir: &'a Path,
    pub progress: &'a ProgressSink,
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run one task. An `Err` is an infrastructure failure and is handled like
    /// an error result.
    async fn run(&self, task: &Task, ctx: &AgentContext<'_>) -> Result<AgentResult>;
}

/// Role → runner map.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    runners: HashMap<TaskRole, Arc<dyn AgentRunner>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, role: TaskRole, runner: Arc<dyn AgentRunner>) -> Self {
        self.runners.insert(role, runner);
        self
    }

    /// Use the same runner for every role.
    pub fn uniform(runner: Arc<dyn AgentRunner>) -> Self {
        TaskRole::ALL
            .into_iter()
            .fold(Self::new(), |reg, role| reg.with(role, runner.clone()))
    }

    pub fn get(&self, role: TaskRole) -> Result<Arc<dyn AgentRunner>> {
        self.runners
            .get(&role)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No agent registered for role '{}'", role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl AgentRunner for Noop {
        async fn run(&self, _task: &Task, _ctx: &AgentContext<'_>) -> Result<AgentResult> {
            Ok(AgentResult::success(vec![]))
        }
    }

    #[test]
    fn registry_lookup_by_role() {
        let registry = AgentRegistry::new().with(TaskRole::Api, Arc::new(Noop));
        assert!(registry.get(TaskRole::Api).is_ok());
        let err = registry.get(TaskRole::Devops).err().unwrap();
        assert!(err.to_string().contains("devops"));
    }

    #[test]
    fn uniform_registry_covers_all_roles() {
        let registry = AgentRegistry::uniform(Arc::new(Noop));
        for role in TaskRole::ALL {
            assert!(registry.get(role).is_ok());
        }
    }

    #[tokio::test]
    async fn progress_sink_emits_tool_events() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ProgressSink::new("t1", tx);
        sink.tool("Write", serde_json::json!({"file_path": "a.py"}), None)
            .await;
        match rx.recv().await.unwrap() {
            OutboundEvent::ToolProgress { task_id, tool, .. } => {
                assert_eq!(task_id, "t1");
                assert_eq!(tool, "Write");
            }
            other => panic!("unexpected event {other:?}"),
        }
        ProgressSink::discard("t2")
            .tool("Read", Value::Null, None)
            .await;
    }
}
