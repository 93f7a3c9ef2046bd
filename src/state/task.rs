//! Tasks, the task manifest, and agent results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which specialist agent a task is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRole {
    Scaffold,
    Database,
    Api,
    Devops,
}

const DATABASE_KEYWORDS: &[&str] = &["model", "field", "column", "table", "entity", "database"];

impl TaskRole {
    pub const ALL: [TaskRole; 4] = [
        TaskRole::Scaffold,
        TaskRole::Database,
        TaskRole::Api,
        TaskRole::Devops,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskRole::Scaffold => "scaffold",
            TaskRole::Database => "database",
            TaskRole::Api => "api",
            TaskRole::Devops => "devops",
        }
    }

    /// The role responsible for a generated file, by its path.
    pub fn for_file(path: &str) -> TaskRole {
        let normalized = path.replace('\\', "/").to_lowercase();
        let file_name = Path::new(&normalized)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("");

        if file_name.starts_with("dockerfile")
            || file_name.starts_with("docker-compose")
            || file_name.starts_with("compose.")
            || file_name.starts_with("requirements")
            || file_name.starts_with(".env")
        {
            return TaskRole::Devops;
        }
        if ["models/", "migrations/", "db/", "database"]
            .iter()
            .any(|p| normalized.contains(p))
        {
            return TaskRole::Database;
        }
        if ["routers/", "routes/", "schemas/", "services/", "api/", "endpoints/"]
            .iter()
            .any(|p| normalized.contains(p))
        {
            return TaskRole::Api;
        }
        TaskRole::Scaffold
    }

    /// Pick the role for a small correction described in free text.
    pub fn for_edit_request(message: &str) -> TaskRole {
        let lower = message.to_lowercase();
        if DATABASE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            TaskRole::Database
        } else {
            TaskRole::Api
        }
    }
}

impl fmt::Display for TaskRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scaffold" => Ok(TaskRole::Scaffold),
            "database" | "db" => Ok(TaskRole::Database),
            "api" => Ok(TaskRole::Api),
            "devops" => Ok(TaskRole::Devops),
            _ => anyhow::bail!(
                "Invalid task role '{}'. Valid values: scaffold, database, api, devops",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub role: TaskRole,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Failed attempts so far.
    #[serde(default)]
    pub retries: u32,
    /// Extra instructions for the agent (e.g. a validation error to fix).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Task {
    pub fn new(id: &str, role: TaskRole, description: &str, depends_on: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            role,
            description: description.to_string(),
            depends_on,
            status: TaskStatus::Pending,
            retries: 0,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// The ordered, dependency-annotated set of tasks produced by planning.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskManifest {
    pub tasks: Vec<Task>,
}

impl TaskManifest {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Done)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// Append delta tasks. Existing tasks are left untouched.
    pub fn append(&mut self, tasks: Vec<Task>) {
        self.tasks.extend(tasks);
    }

    /// Next free numeric suffix for ids of the form `<prefix><n>`.
    pub fn next_sequence(&self, prefix: &str) -> u32 {
        self.tasks
            .iter()
            .filter_map(|t| t.id.strip_prefix(prefix))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .map_or(1, |n| n + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Where and why an agent failed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// What an agent reports back after running a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: ResultStatus,
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl AgentResult {
    pub fn success(files: Vec<String>) -> Self {
        Self {
            status: ResultStatus::Success,
            files_touched: files,
            error: None,
        }
    }

    pub fn failure(detail: ErrorDetail) -> Self {
        Self {
            status: ResultStatus::Error,
            files_touched: Vec::new(),
            error: Some(detail),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Agent,
    Planning,
    Validation,
    Classification,
    Checkpoint,
}

/// An entry in the session's ordered error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentError {
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<TaskRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl AgentError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: None,
            role: None,
            file: None,
            line: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn for_task(task: &Task, detail: ErrorDetail) -> Self {
        Self {
            kind: ErrorKind::Agent,
            task_id: Some(task.id.clone()),
            role: Some(task.role),
            file: detail.file,
            line: detail.line,
            message: detail.message,
            at: Utc::now(),
        }
    }
}
