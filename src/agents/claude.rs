//! Implementation agents backed by the Claude CLI.
//!
//! Each task spawns `claude` in stream-json mode inside the project directory,
//! with a role-specific prompt on stdin. Tool calls are forwarded as progress
//! and files written through Write/Edit become the task's touched files.

use crate::agents::stream::{
    ContentBlock, StreamEvent, UserContent, describe_tool_use, parse_line, result_text,
    touched_file,
};
use crate::agents::{AgentContext, AgentRunner};
use crate::state::task::{AgentResult, ErrorDetail, Task, TaskRole};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

pub struct ClaudeAgentRunner {
    role: TaskRole,
    claude_cmd: String,
    timeout: Duration,
}

impl ClaudeAgentRunner {
    pub fn new(role: TaskRole, claude_cmd: &str, timeout: Duration) -> Self {
        Self {
            role,
            claude_cmd: claude_cmd.to_string(),
            timeout,
        }
    }

    pub fn flags() -> Vec<&'static str> {
        vec![
            "--dangerously-skip-permissions",
            "--print",
            "--output-format",
            "stream-json",
            "--verbose",
        ]
    }

    fn role_instructions(&self) -> &'static str {
        match self.role {
            TaskRole::Scaffold => {
                "You set up the project skeleton: a FastAPI application under app/ with \
                 app/main.py, configuration, a database session module, and a /health endpoint \
                 returning {\"status\": \"ok\"}."
            }
            TaskRole::Database => {
                "You write SQLAlchemy models under app/models/ and keep them consistent with the \
                 spec's entities, field types, constraints and relationships."
            }
            TaskRole::Api => {
                "You write Pydantic schemas under app/schemas/ and FastAPI routers under \
                 app/routers/, registering every router in app/main.py."
            }
            TaskRole::Devops => {
                "You write the Dockerfile, docker-compose.yml (app and database services, ports \
                 from ${APP_PORT} and ${DB_PORT}) and requirements.txt so that \
                 `docker compose up --build` starts a working service."
            }
        }
    }

    pub fn prompt(&self, task: &Task, ctx: &AgentContext<'_>) -> String {
        let spec = ctx
            .state
            .spec
            .as_ref()
            .and_then(|s| serde_json::to_string_pretty(s).ok())
            .unwrap_or_else(|| "{}".to_string());
        let files = if ctx.state.files_created.is_empty() {
            "(none yet)".to_string()
        } else {
            ctx.state
                .files_created
                .iter()
                .map(|f| format!("- {f}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let mut prompt = format!(
            "You are the {role} agent of a backend generator.\n{instructions}\n\n\
             ## PROJECT SPEC\n```json\n{spec}\n```\n\n\
             ## FILES ALREADY CREATED\n{files}\n\n\
             ## TASK {id}\n{description}\n",
            role = self.role,
            instructions = self.role_instructions(),
            id = task.id,
            description = task.description,
        );
        if let Some(context) = &task.context {
            prompt.push_str(&format!("\n## ADDITIONAL CONTEXT\n{context}\n"));
        }
        prompt.push_str(
            "\n## RULES\n1. Check existing files before changing them.\n\
             2. Only touch files your role owns.\n\
             3. Finish with a one-line summary of what you changed.\n",
        );
        prompt
    }

    async fn run_inner(&self, task: &Task, ctx: &AgentContext<'_>) -> Result<AgentResult> {
        std::fs::create_dir_all(ctx.workdir)
            .with_context(|| format!("Failed to create {}", ctx.workdir.display()))?;
        let prompt = self.prompt(task, ctx);

        let mut child = Command::new(&self.claude_cmd)
            .args(Self::flags())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .current_dir(ctx.workdir)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.claude_cmd))?;
        tracing::debug!(task = %task.id, pid = child.id().unwrap_or(0), "agent process spawned");

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let stdout = child.stdout.take().context("Failed to get stdout")?;
        let mut lines = BufReader::new(stdout).lines();

        let mut files = BTreeSet::new();
        let mut pending_tools: HashMap<String, String> = HashMap::new();
        let mut final_result: Option<String> = None;
        let mut is_error = false;
        let mut transcript = String::new();

        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            let Some(event) = parse_line(&line) else {
                transcript.push_str(&line);
                transcript.push('\n');
                continue;
            };
            match event {
                StreamEvent::Assistant { message } => {
                    for block in message.content {
                        match block {
                            ContentBlock::ToolUse { name, input, id } => {
                                if let Some(file) = touched_file(&name, &input, ctx.workdir) {
                                    files.insert(file);
                                }
                                tracing::debug!(task = %task.id, "{}", describe_tool_use(&name, &input));
                                ctx.progress.tool(&name, input, None).await;
                                pending_tools.insert(id, name);
                            }
                            ContentBlock::Text { text } => {
                                transcript.push_str(&text);
                                transcript.push('\n');
                            }
                            ContentBlock::Other => {}
                        }
                    }
                }
                StreamEvent::User { message } => {
                    for content in message.map(|m| m.content).unwrap_or_default() {
                        if let UserContent::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } = content
                            && let Some(tool) = pending_tools.remove(&tool_use_id)
                        {
                            ctx.progress
                                .tool(&tool, serde_json::Value::Null, result_text(&content, 200))
                                .await;
                        }
                    }
                }
                StreamEvent::Result {
                    result,
                    is_error: err,
                } => {
                    final_result = result;
                    is_error = err;
                }
                StreamEvent::System { .. } => {}
            }
        }

        let status = child.wait().await.context("Failed to wait for agent")?;
        let exit_code = status.code().unwrap_or(-1);
        let output = final_result.unwrap_or(transcript);

        if is_error || exit_code != 0 {
            let message = if output.trim().is_empty() {
                format!("agent exited with code {exit_code}")
            } else {
                output.trim().to_string()
            };
            return Ok(AgentResult::failure(ErrorDetail {
                file: files.iter().next_back().cloned(),
                message,
                line: None,
            }));
        }
        Ok(AgentResult::success(files.into_iter().collect()))
    }
}

#[async_trait]
impl AgentRunner for ClaudeAgentRunner {
    async fn run(&self, task: &Task, ctx: &AgentContext<'_>) -> Result<AgentResult> {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.run_inner(task, ctx))
            .await
            .with_context(|| {
                format!(
                    "Task {} timed out after {}s",
                    task.id,
                    self.timeout.as_secs()
                )
            })?;
        tracing::info!(
            task = %task.id,
            role = %self.role,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.as_ref().is_ok_and(|r| r.is_success()),
            "agent finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ProgressSink;
    use crate::state::shared::SharedState;
    use crate::state::spec::ProjectSpec;
    use tempfile::tempdir;

    fn task() -> Task {
        Task::new("t2", TaskRole::Database, "Create the Book model", vec!["t1".into()])
            .with_context("Validation failed: app/models/book.py line 3")
    }

    #[test]
    fn prompt_includes_spec_task_and_context() {
        let mut state = SharedState::new("p");
        state.spec = Some(ProjectSpec {
            project_name: "library".into(),
            ..Default::default()
        });
        state.files_created.insert("app/main.py".into());
        let dir = tempdir().unwrap();
        let sink = ProgressSink::discard("t2");
        let ctx = AgentContext {
            state: &state,
            workdir: dir.path(),
            progress: &sink,
        };
        let runner = ClaudeAgentRunner::new(TaskRole::Database, "claude", Duration::from_secs(5));
        let prompt = runner.prompt(&task(), &ctx);

        assert!(prompt.contains("database agent"));
        assert!(prompt.contains("\"project_name\": \"library\""));
        assert!(prompt.contains("- app/main.py"));
        assert!(prompt.contains("## TASK t2"));
        assert!(prompt.contains("line 3"));
    }

    #[test]
    fn flags_request_stream_json() {
        let flags = ClaudeAgentRunner::flags();
        assert!(flags.contains(&"stream-json"));
        assert!(flags.contains(&"--print"));
    }

    #[tokio::test]
    async fn missing_binary_surfaces_as_error() {
        let state = SharedState::new("p");
        let dir = tempdir().unwrap();
        let sink = ProgressSink::discard("t2");
        let ctx = AgentContext {
            state: &state,
            workdir: dir.path(),
            progress: &sink,
        };
        let runner = ClaudeAgentRunner::new(
            TaskRole::Api,
            "/nonexistent/claude-binary",
            Duration::from_secs(5),
        );
        assert!(runner.run(&task(), &ctx).await.is_err());
    }
}
