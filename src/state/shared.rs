//! The per-project shared state record.
//!
//! `SharedState` is the single authoritative record of a build session. Only
//! the session loop writes it; everything else receives a snapshot.

use crate::phase::Phase;
use crate::state::spec::ProjectSpec;
use crate::state::task::{AgentError, Task, TaskManifest, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// A research follow-up; the answer feeds the researcher.
    Research,
    /// The spec summary awaiting confirmation.
    ConfirmSpec,
}

/// An `ask_user` question the session is waiting on. The next user message
/// is its answer and is never classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub kind: QuestionKind,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Set when an error was escalated. No work is scheduled until a user reply
/// lifts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suspension {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlanRequest {
    Full,
    Delta { request: String },
}

/// Control-loop bookkeeping that must survive a restart.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionMarkers {
    #[serde(default)]
    pub pending_question: Option<PendingQuestion>,
    #[serde(default)]
    pub suspension: Option<Suspension>,
    /// Set by `stop`; cleared by the next user message.
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub plan_request: Option<PlanRequest>,
    /// Requests made after the spec was finalized, for the next full plan.
    /// The finalized spec itself never changes.
    #[serde(default)]
    pub plan_notes: Vec<String>,
    #[serde(default)]
    pub planning_failures: u32,
    /// Corrective rounds spent against the validation budget.
    #[serde(default)]
    pub validation_attempts: u32,
    /// Ad-hoc corrective tasks from MINOR_EDIT, run before manifest work.
    #[serde(default)]
    pub pending_edits: Vec<Task>,
    #[serde(default)]
    pub edit_seq: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    pub project_id: String,
    pub phase: Phase,
    /// Finalized spec. `None` until research is confirmed.
    pub spec: Option<ProjectSpec>,
    #[serde(default)]
    pub spec_draft: ProjectSpec,
    pub manifest: Option<TaskManifest>,
    #[serde(default)]
    pub completed_tasks: BTreeSet<String>,
    #[serde(default)]
    pub files_created: BTreeSet<String>,
    #[serde(default)]
    pub errors: Vec<AgentError>,
    #[serde(default)]
    pub swagger_url: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub conversation: Vec<ConversationTurn>,
    #[serde(default)]
    pub session: SessionMarkers,
    pub updated_at: DateTime<Utc>,
}

/// Serializable snapshot for `status` output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub project_id: String,
    pub phase: Phase,
    pub tasks_total: usize,
    pub tasks_done: usize,
    pub tasks_failed: usize,
    pub files_created: usize,
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub swagger_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awaiting_answer: Option<String>,
}

impl SharedState {
    pub fn new(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            phase: Phase::Research,
            spec: None,
            spec_draft: ProjectSpec::default(),
            manifest: None,
            completed_tasks: BTreeSet::new(),
            files_created: BTreeSet::new(),
            errors: Vec::new(),
            swagger_url: None,
            api_url: None,
            conversation: Vec::new(),
            session: SessionMarkers::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn record_turn(&mut self, speaker: Speaker, text: &str) {
        self.conversation.push(ConversationTurn {
            speaker,
            text: text.to_string(),
            at: Utc::now(),
        });
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.manifest.as_ref().and_then(|m| m.get(id))
    }

    /// The running task, or the first task still pending.
    pub fn current_task(&self) -> Option<&Task> {
        let manifest = self.manifest.as_ref()?;
        manifest
            .tasks
            .iter()
            .find(|t| t.status == TaskStatus::Running)
            .or_else(|| {
                manifest
                    .tasks
                    .iter()
                    .find(|t| t.status == TaskStatus::Pending)
            })
    }

    pub fn is_suspended(&self) -> bool {
        self.session.suspension.is_some()
    }

    /// Normalize after a crash: a task left `running` never reported back,
    /// so treat it like a cancelled dispatch. Returns how many were reset.
    pub fn recover_interrupted(&mut self) -> usize {
        let Some(manifest) = self.manifest.as_mut() else {
            return 0;
        };
        let mut reset = 0;
        for task in manifest
            .tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Running)
        {
            task.status = TaskStatus::Pending;
            reset += 1;
        }
        for task in self
            .session
            .pending_edits
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Running)
        {
            task.status = TaskStatus::Pending;
            reset += 1;
        }
        reset
    }

    /// Clear an escalation. Escalated tasks get a fresh retry budget and the
    /// validation and planning budgets start over.
    pub fn lift_suspension(&mut self) -> Option<Suspension> {
        let lifted = self.session.suspension.take()?;
        if let Some(manifest) = self.manifest.as_mut() {
            for task in manifest
                .tasks
                .iter_mut()
                .filter(|t| t.status == TaskStatus::Failed)
            {
                task.status = TaskStatus::Pending;
                task.retries = 0;
            }
        }
        self.session.validation_attempts = 0;
        self.session.planning_failures = 0;
        Some(lifted)
    }

    /// Condensed view handed to the interruption classifier.
    pub fn summary(&self) -> String {
        let spec = self
            .spec
            .as_ref()
            .map(|s| s.short_summary())
            .unwrap_or_else(|| "no finalized spec".to_string());
        let progress = match &self.manifest {
            Some(m) => format!("{}/{} tasks done", m.count(TaskStatus::Done), m.len()),
            None => "no plan".to_string(),
        };
        let current = self
            .current_task()
            .map(|t| format!("{} ({}: {})", t.id, t.role, t.description))
            .unwrap_or_else(|| "none".to_string());
        format!("phase {}; spec: {spec}; {progress}; current task: {current}", self.phase)
    }

    pub fn status_report(&self) -> StatusReport {
        let (total, done, failed) = match &self.manifest {
            Some(m) => (
                m.len(),
                m.count(TaskStatus::Done),
                m.count(TaskStatus::Failed),
            ),
            None => (0, 0, 0),
        };
        StatusReport {
            project_id: self.project_id.clone(),
            phase: self.phase,
            tasks_total: total,
            tasks_done: done,
            tasks_failed: failed,
            files_created: self.files_created.len(),
            errors: self.errors.len(),
            last_error: self.errors.last().map(|e| e.message.clone()),
            swagger_url: self.swagger_url.clone(),
            api_url: self.api_url.clone(),
            suspended: self.session.suspension.as_ref().map(|s| s.reason.clone()),
            awaiting_answer: self
                .session
                .pending_question
                .as_ref()
                .map(|q| q.question.clone()),
        }
    }

    /// Answer a message that needs no generation work, from state alone.
    pub fn unrelated_reply(&self) -> String {
        let mut reply = format!("We're in the {} phase.", self.phase);
        if let Some(m) = &self.manifest {
            reply.push_str(&format!(
                " {} of {} tasks are done.",
                m.count(TaskStatus::Done),
                m.len()
            ));
        }
        if let Some(task) = self.current_task() {
            reply.push_str(&format!(" Working on: {}.", task.description));
        }
        if let Some(url) = &self.api_url {
            reply.push_str(&format!(" The API is at {url}"));
            if let Some(docs) = &self.swagger_url {
                reply.push_str(&format!(" (docs: {docs})"));
            }
            reply.push('.');
        }
        if let Some(s) = &self.session.suspension {
            reply.push_str(&format!(
                " The build is paused on an error: {}. Tell me what to change to continue.",
                s.reason
            ));
        }
        reply
    }
}
