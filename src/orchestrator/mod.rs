//! The hybrid orchestrator.
//!
//! - [`transition`]: pure phase transitions (`&SharedState` in, new state and events out)
//! - [`session`]: the per-project control loop
//! - [`registry`]: spawns and tracks sessions by project id
//! - [`events`]: the outbound/inbound session protocol

pub mod events;
pub mod registry;
pub mod session;
pub mod transition;

pub use events::{Inbound, OutboundEvent};
pub use registry::{Orchestrator, SessionChannels};
pub use session::Session;

use crate::agents::AgentRegistry;
use crate::agents::checkpoint::{Checkpointer, GitCheckpointer};
use crate::agents::claude::ClaudeAgentRunner;
use crate::agents::planning::{LlmPlanner, Planner};
use crate::agents::research::{LlmResearcher, Researcher};
use crate::agents::validation::{ComposeValidator, Validator};
use crate::classifier::{InterruptionClassifier, LlmClassifier};
use crate::config::Config;
use crate::llm::client_from_config;
use crate::state::task::TaskRole;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a session calls out to. Tests swap in stubs.
#[derive(Clone)]
pub struct Capabilities {
    pub classifier: Arc<dyn InterruptionClassifier>,
    pub researcher: Arc<dyn Researcher>,
    pub planner: Arc<dyn Planner>,
    pub agents: AgentRegistry,
    pub validator: Arc<dyn Validator>,
    pub checkpointer: Arc<dyn Checkpointer>,
}

impl Capabilities {
    /// The production wiring: LLM-backed research, planning and
    /// classification, Claude CLI agents, compose validation, git checkpoints.
    pub fn from_config(config: &Config) -> Result<Self> {
        let llm = client_from_config(config)?;
        let claude_cmd = &config.toml.llm.claude_cmd;
        let timeout = config.agent_timeout();
        let agents = TaskRole::ALL
            .into_iter()
            .fold(AgentRegistry::new(), |registry, role| {
                registry.with(
                    role,
                    Arc::new(ClaudeAgentRunner::new(role, claude_cmd, timeout)),
                )
            });
        Ok(Self {
            classifier: Arc::new(LlmClassifier::new(llm.clone())),
            researcher: Arc::new(LlmResearcher::new(llm.clone())),
            planner: Arc::new(LlmPlanner::new(llm)),
            agents,
            validator: Arc::new(ComposeValidator::new(config.toml.validation.clone())),
            checkpointer: Arc::new(GitCheckpointer),
        })
    }
}

/// Budgets and paths a session needs from config.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_task_attempts: u32,
    /// Automatic planning retries before escalating.
    pub planning_retries: u32,
    /// Validation failures tolerated before escalating.
    pub validation_budget: u32,
    pub projects_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_task_attempts: crate::dag::scheduler::DEFAULT_MAX_ATTEMPTS,
            planning_retries: 1,
            validation_budget: 3,
            projects_dir: PathBuf::from("projects"),
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        let scheduler = &config.toml.scheduler;
        Self {
            max_task_attempts: scheduler.max_task_attempts,
            planning_retries: scheduler.planning_retries,
            validation_budget: scheduler.validation_budget,
            projects_dir: config.projects_dir(),
        }
    }
}
