//! Configuration for backforge.
//!
//! Settings live in `backforge.toml` inside the data directory
//! (`~/.backforge` unless `--data-dir` or `BACKFORGE_HOME` say otherwise).
//! Every section is optional. Layering is file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [paths]
//! projects_dir = "projects"
//! database = "backforge.db"
//!
//! [llm]
//! provider = "openrouter"          # or "claude-cli"
//! model = "anthropic/claude-sonnet-4"
//! base_url = "https://openrouter.ai/api/v1"
//! api_key_env = "OPENROUTER_API_KEY"
//! claude_cmd = "claude"
//!
//! [scheduler]
//! max_task_attempts = 3
//! planning_retries = 1
//! validation_budget = 3
//! agent_timeout_secs = 900
//!
//! [validation]
//! syntax_cmd = ["python", "-m", "compileall", "-q", "."]
//! import_cmd = ["python", "-c", "import app.main"]
//! compose_file = "docker-compose.yml"
//! health_path = "/health"
//!
//! [ports]
//! app_port_start = 8100
//! db_port_start = 5500
//!
//! [logging]
//! level = "info"
//! format = "compact"               # or "json"
//! ```

use crate::state::store::PortAllocation;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "backforge.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LlmProvider {
    /// OpenAI-compatible chat completions endpoint.
    #[default]
    Openrouter,
    /// Local `claude` CLI in print mode.
    ClaudeCli,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::ClaudeCli => write!(f, "claude-cli"),
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openrouter" => Ok(LlmProvider::Openrouter),
            "claude-cli" | "claude" => Ok(LlmProvider::ClaudeCli),
            _ => anyhow::bail!(
                "Invalid LLM provider '{}'. Valid values: openrouter, claude-cli",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Generated projects, relative to the data directory unless absolute.
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            database: default_database(),
        }
    }
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("projects")
}

fn default_database() -> PathBuf {
    PathBuf::from("backforge.db")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_claude_cmd")]
    pub claude_cmd: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            claude_cmd: default_claude_cmd(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_claude_cmd() -> String {
    "claude".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Attempts per task before escalating.
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,
    /// Automatic re-runs of an invalid plan before escalating.
    #[serde(default = "default_planning_retries")]
    pub planning_retries: u32,
    /// Corrective rounds allowed for validation failures.
    #[serde(default = "default_validation_budget")]
    pub validation_budget: u32,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_task_attempts: default_max_task_attempts(),
            planning_retries: default_planning_retries(),
            validation_budget: default_validation_budget(),
            agent_timeout_secs: default_agent_timeout_secs(),
        }
    }
}

fn default_max_task_attempts() -> u32 {
    3
}

fn default_planning_retries() -> u32 {
    1
}

fn default_validation_budget() -> u32 {
    3
}

fn default_agent_timeout_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_syntax_cmd")]
    pub syntax_cmd: Vec<String>,
    #[serde(default = "default_import_cmd")]
    pub import_cmd: Vec<String>,
    #[serde(default = "default_compose_file")]
    pub compose_file: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_check_timeout_secs")]
    pub check_timeout_secs: u64,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_start_timeout_secs")]
    pub start_timeout_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            syntax_cmd: default_syntax_cmd(),
            import_cmd: default_import_cmd(),
            compose_file: default_compose_file(),
            health_path: default_health_path(),
            check_timeout_secs: default_check_timeout_secs(),
            build_timeout_secs: default_build_timeout_secs(),
            start_timeout_secs: default_start_timeout_secs(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

fn default_syntax_cmd() -> Vec<String> {
    ["python", "-m", "compileall", "-q", "."]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_import_cmd() -> Vec<String> {
    ["python", "-c", "import app.main"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_compose_file() -> String {
    "docker-compose.yml".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_check_timeout_secs() -> u64 {
    60
}

fn default_build_timeout_secs() -> u64 {
    600
}

fn default_start_timeout_secs() -> u64 {
    120
}

fn default_health_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    #[serde(default = "default_app_port_start")]
    pub app_port_start: u16,
    #[serde(default = "default_db_port_start")]
    pub db_port_start: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            app_port_start: default_app_port_start(),
            db_port_start: default_db_port_start(),
        }
    }
}

fn default_app_port_start() -> u16 {
    8100
}

fn default_db_port_start() -> u16 {
    5500
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The contents of `backforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackforgeToml {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub ports: PortsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BackforgeToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse backforge.toml")
    }

    /// Returns defaults when the file doesn't exist.
    pub fn load_or_default(home: &Path) -> Result<Self> {
        let path = home.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize backforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `BACKFORGE_*` and related environment overrides.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(provider) = lookup("BACKFORGE_LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        if let Some(model) = lookup("BACKFORGE_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("BACKFORGE_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(cmd) = lookup("CLAUDE_CMD") {
            self.llm.claude_cmd = cmd;
        }
        if let Some(level) = lookup("BACKFORGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Non-fatal problems worth telling the user about.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.scheduler.max_task_attempts == 0 {
            warnings.push(
                "scheduler.max_task_attempts is 0; tasks will still get one attempt".to_string(),
            );
        }
        if self.scheduler.validation_budget == 0 {
            warnings.push(
                "scheduler.validation_budget is 0; any validation failure escalates immediately"
                    .to_string(),
            );
        }
        if self.validation.syntax_cmd.is_empty() {
            warnings.push("validation.syntax_cmd is empty; syntax check is skipped".to_string());
        }
        if self.validation.import_cmd.is_empty() {
            warnings.push("validation.import_cmd is empty; import check is skipped".to_string());
        }
        if !self.validation.health_path.starts_with('/') {
            warnings.push(format!(
                "validation.health_path '{}' should start with '/'",
                self.validation.health_path
            ));
        }
        if self.ports.app_port_start == self.ports.db_port_start {
            warnings.push("ports.app_port_start and ports.db_port_start overlap".to_string());
        }
        if self.llm.model.trim().is_empty() {
            warnings.push("llm.model is empty".to_string());
        }
        warnings
    }
}

/// Runtime configuration: the parsed file plus resolved locations and CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub toml: BackforgeToml,
    pub verbose: bool,
}

impl Config {
    /// Resolve the data directory, load `.env` and `backforge.toml`, and apply
    /// environment overrides.
    pub fn load(data_dir: Option<PathBuf>, verbose: bool) -> Result<Self> {
        let home = resolve_home(data_dir)?;
        dotenvy::from_path(home.join(".env")).ok();
        dotenvy::dotenv().ok();

        let mut toml = BackforgeToml::load_or_default(&home)?;
        toml.apply_env(|key| std::env::var(key).ok())?;
        Ok(Self {
            home,
            toml,
            verbose,
        })
    }

    pub fn from_parts(home: PathBuf, toml: BackforgeToml) -> Self {
        Self {
            home,
            toml,
            verbose: false,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.home.join(CONFIG_FILE_NAME)
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.home.join(&self.toml.paths.projects_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.home.join(&self.toml.paths.database)
    }

    pub fn ports(&self) -> PortAllocation {
        PortAllocation {
            app_port_start: self.toml.ports.app_port_start,
            db_port_start: self.toml.ports.db_port_start,
        }
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.scheduler.agent_timeout_secs)
    }

    /// API key for the configured provider, read from the named env var.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.toml.llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.home)
            .with_context(|| format!("Failed to create {}", self.home.display()))?;
        std::fs::create_dir_all(self.projects_dir())
            .context("Failed to create projects directory")?;
        Ok(())
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if self.toml.llm.provider == LlmProvider::Openrouter && self.api_key().is_none() {
            warnings.push(format!(
                "{} is not set; the openrouter provider will fail",
                self.toml.llm.api_key_env
            ));
        }
        warnings
    }
}

fn resolve_home(data_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = data_dir {
        return Ok(dir);
    }
    if let Ok(dir) = std::env::var("BACKFORGE_HOME")
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(".backforge"))
        .context("Could not determine home directory; pass --data-dir")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = BackforgeToml::parse("").unwrap();
        assert_eq!(cfg.scheduler.max_task_attempts, 3);
        assert_eq!(cfg.scheduler.planning_retries, 1);
        assert_eq!(cfg.scheduler.validation_budget, 3);
        assert_eq!(cfg.ports.app_port_start, 8100);
        assert_eq!(cfg.validation.health_path, "/health");
        assert_eq!(cfg.llm.provider, LlmProvider::Openrouter);
        assert_eq!(cfg.logging.format, LogFormat::Compact);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = BackforgeToml::parse(
            r#"
            [llm]
            provider = "claude-cli"

            [scheduler]
            validation_budget = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.llm.provider, LlmProvider::ClaudeCli);
        assert_eq!(cfg.llm.claude_cmd, "claude");
        assert_eq!(cfg.scheduler.validation_budget, 5);
        assert_eq!(cfg.scheduler.max_task_attempts, 3);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let err = BackforgeToml::parse("[scheduler\nmax = ").unwrap_err();
        assert!(err.to_string().contains("backforge.toml"));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("BACKFORGE_LLM_PROVIDER", "claude-cli"),
            ("BACKFORGE_LLM_MODEL", "some/model"),
            ("CLAUDE_CMD", "/opt/claude"),
        ]
        .into_iter()
        .collect();
        let mut cfg = BackforgeToml::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.llm.provider, LlmProvider::ClaudeCli);
        assert_eq!(cfg.llm.model, "some/model");
        assert_eq!(cfg.llm.claude_cmd, "/opt/claude");
    }

    #[test]
    fn bad_provider_in_env_is_rejected() {
        let mut cfg = BackforgeToml::default();
        let result = cfg.apply_env(|k| (k == "BACKFORGE_LLM_PROVIDER").then(|| "gpt".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let mut cfg = BackforgeToml::default();
        cfg.ports.app_port_start = 9000;
        cfg.save(&dir.path().join(CONFIG_FILE_NAME)).unwrap();

        let loaded = BackforgeToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.ports.app_port_start, 9000);
    }

    #[test]
    fn validate_flags_zero_budgets() {
        let mut cfg = BackforgeToml::default();
        assert!(cfg.validate().is_empty());
        cfg.scheduler.validation_budget = 0;
        cfg.validation.health_path = "health".into();
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn runtime_paths_resolve_under_home() {
        let config = Config::from_parts(PathBuf::from("/data"), BackforgeToml::default());
        assert_eq!(config.projects_dir(), PathBuf::from("/data/projects"));
        assert_eq!(config.database_path(), PathBuf::from("/data/backforge.db"));
        assert_eq!(config.config_path(), PathBuf::from("/data/backforge.toml"));
    }
}
