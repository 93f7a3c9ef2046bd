//! Validation of a generated project.
//!
//! Stages run in a fixed order and stop at the first failure. Each failure
//! carries the stage plus, when the output names one, the offending file and
//! line so the orchestrator can route a fix to the right agent.

use crate::agents::ProgressSink;
use crate::config::ValidationConfig;
use crate::state::project::Project;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

static PY_FRAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"File "([^"]+)", line (\d+)"#).unwrap());

static PATH_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\.?/?([\w./-]+\.\w+):(\d+)(?::\d+)?:").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Syntax,
    Imports,
    Build,
    Start,
    Health,
}

impl ValidationStage {
    pub const ALL: [ValidationStage; 5] = [
        ValidationStage::Syntax,
        ValidationStage::Imports,
        ValidationStage::Build,
        ValidationStage::Start,
        ValidationStage::Health,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStage::Syntax => "syntax",
            ValidationStage::Imports => "imports",
            ValidationStage::Build => "build",
            ValidationStage::Start => "start",
            ValidationStage::Health => "health",
        }
    }

    /// Whether failures at this stage are about the container setup rather than code.
    pub fn is_runtime(self) -> bool {
        matches!(
            self,
            ValidationStage::Build | ValidationStage::Start | ValidationStage::Health
        )
    }
}

impl std::fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub stage: ValidationStage,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
}

impl ValidationFailure {
    pub fn new(stage: ValidationStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    /// Build a failure from raw tool output, locating the error when possible.
    pub fn from_output(stage: ValidationStage, output: &str, workdir: &Path) -> Self {
        let (file, line) = match locate_error(output, workdir) {
            Some((file, line)) => (Some(file), Some(line)),
            None => (None, None),
        };
        Self {
            stage,
            file,
            line,
            message: tail(output, 20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Passed { api_url: String, swagger_url: String },
    Failed(ValidationFailure),
}

#[async_trait]
pub trait Validator: Send + Sync {
    /// `Err` means the validator itself could not run, not that the project is broken.
    async fn validate(
        &self,
        project: &Project,
        workdir: &Path,
        progress: &ProgressSink,
    ) -> Result<ValidationOutcome>;
}

/// Find the most relevant `(file, line)` in compiler or traceback output.
///
/// Python tracebacks list the innermost frame last, so the last frame inside
/// the project wins. Library frames are skipped.
pub fn locate_error(output: &str, workdir: &Path) -> Option<(String, u32)> {
    let frame = PY_FRAME_REGEX
        .captures_iter(output)
        .filter(|c| !c[1].contains("site-packages") && !c[1].starts_with('<'))
        .last();
    let caps = frame.or_else(|| PATH_LINE_REGEX.captures_iter(output).last())?;
    let line = caps[2].parse().ok()?;
    Some((relativize(&caps[1], workdir), line))
}

/// Paths inside the container are rooted at `/app`.
fn relativize(raw: &str, workdir: &Path) -> String {
    let path = Path::new(raw);
    let relative = path
        .strip_prefix(workdir)
        .or_else(|_| path.strip_prefix("/app"))
        .unwrap_or(path);
    relative
        .to_string_lossy()
        .trim_start_matches("./")
        .replace('\\', "/")
}

fn tail(output: &str, lines: usize) -> String {
    let all: Vec<&str> = output.trim().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

struct CommandOutput {
    success: bool,
    combined: String,
}

/// Validates with local interpreter checks followed by `docker compose`.
pub struct ComposeValidator {
    config: ValidationConfig,
    http: reqwest::Client,
}

impl ComposeValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn compose_args(&self, rest: &[&str]) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "-f".to_string(),
            self.config.compose_file.clone(),
        ];
        args.extend(rest.iter().map(|s| s.to_string()));
        args
    }

    async fn run(
        &self,
        program: &str,
        args: &[String],
        workdir: &Path,
        project: &Project,
        limit: Duration,
    ) -> Result<Option<CommandOutput>> {
        let child = Command::new(program)
            .args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("APP_PORT", project.app_port.to_string())
            .env("DB_PORT", project.db_port.to_string())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {program}"))?;

        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.with_context(|| format!("Failed to wait for {program}"))?,
            Err(_) => return Ok(None),
        };
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(Some(CommandOutput {
            success: output.status.success(),
            combined,
        }))
    }

    async fn command_stage(
        &self,
        stage: ValidationStage,
        argv: &[String],
        workdir: &Path,
        project: &Project,
        limit: Duration,
    ) -> Result<Option<ValidationFailure>> {
        let Some((program, args)) = argv.split_first() else {
            tracing::debug!(%stage, "no command configured, skipping");
            return Ok(None);
        };
        match self.run(program, args, workdir, project, limit).await? {
            None => Ok(Some(ValidationFailure::new(
                stage,
                format!("{stage} check timed out after {}s", limit.as_secs()),
            ))),
            Some(out) if out.success => Ok(None),
            Some(out) => Ok(Some(ValidationFailure::from_output(
                stage,
                &out.combined,
                workdir,
            ))),
        }
    }

    async fn health_stage(&self, project: &Project) -> Option<ValidationFailure> {
        let url = format!("{}{}", project.api_url(), self.config.health_path);
        let deadline = Instant::now() + Duration::from_secs(self.config.health_timeout_secs);
        let mut last_error = String::from("no response");
        while Instant::now() < deadline {
            match self
                .http
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return None,
                Ok(resp) => last_error = format!("HTTP {}", resp.status()),
                Err(e) => last_error = e.to_string(),
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Some(ValidationFailure::new(
            ValidationStage::Health,
            format!("{url} did not become healthy: {last_error}"),
        ))
    }

    async fn container_logs(&self, workdir: &Path, project: &Project) -> String {
        let args = self.compose_args(&["logs", "--no-color", "--tail", "50"]);
        match self
            .run("docker", &args, workdir, project, Duration::from_secs(30))
            .await
        {
            Ok(Some(out)) => out.combined,
            _ => String::new(),
        }
    }
}

#[async_trait]
impl Validator for ComposeValidator {
    async fn validate(
        &self,
        project: &Project,
        workdir: &Path,
        progress: &ProgressSink,
    ) -> Result<ValidationOutcome> {
        let check = Duration::from_secs(self.config.check_timeout_secs);
        for stage in ValidationStage::ALL {
            progress
                .tool("validate", serde_json::json!({ "stage": stage }), None)
                .await;
            let started = Instant::now();
            let failure = match stage {
                ValidationStage::Syntax => {
                    self.command_stage(stage, &self.config.syntax_cmd, workdir, project, check)
                        .await?
                }
                ValidationStage::Imports => {
                    self.command_stage(stage, &self.config.import_cmd, workdir, project, check)
                        .await?
                }
                ValidationStage::Build => {
                    let argv = [
                        vec!["docker".to_string()],
                        self.compose_args(&["build"]),
                    ]
                    .concat();
                    let limit = Duration::from_secs(self.config.build_timeout_secs);
                    self.command_stage(stage, &argv, workdir, project, limit)
                        .await?
                }
                ValidationStage::Start => {
                    let argv = [
                        vec!["docker".to_string()],
                        self.compose_args(&["up", "-d"]),
                    ]
                    .concat();
                    let limit = Duration::from_secs(self.config.start_timeout_secs);
                    self.command_stage(stage, &argv, workdir, project, limit)
                        .await?
                }
                ValidationStage::Health => match self.health_stage(project).await {
                    Some(mut failure) => {
                        // The app usually crashed on startup; its logs name the file.
                        let logs = self.container_logs(workdir, project).await;
                        if let Some((file, line)) = locate_error(&logs, workdir) {
                            failure.file = Some(file);
                            failure.line = Some(line);
                        }
                        if !logs.trim().is_empty() {
                            failure.message = format!("{}\n{}", failure.message, tail(&logs, 20));
                        }
                        Some(failure)
                    }
                    None => None,
                },
            };
            tracing::info!(
                %stage,
                elapsed_ms = started.elapsed().as_millis() as u64,
                passed = failure.is_none(),
                "validation stage finished"
            );
            if let Some(failure) = failure {
                return Ok(ValidationOutcome::Failed(failure));
            }
        }
        Ok(ValidationOutcome::Passed {
            api_url: project.api_url(),
            swagger_url: project.swagger_url(),
        })
    }
}
