use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Lifecycle status of a project. Everything else about a project is fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Created,
    Generating,
    Building,
    Running,
    Error,
    Stopped,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Created => "created",
            ProjectStatus::Generating => "generating",
            ProjectStatus::Building => "building",
            ProjectStatus::Running => "running",
            ProjectStatus::Error => "error",
            ProjectStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ProjectStatus::Created),
            "generating" => Ok(ProjectStatus::Generating),
            "building" => Ok(ProjectStatus::Building),
            "running" => Ok(ProjectStatus::Running),
            "error" => Ok(ProjectStatus::Error),
            "stopped" => Ok(ProjectStatus::Stopped),
            _ => anyhow::bail!("Invalid project status '{}'", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: ProjectStatus,
    pub app_port: u16,
    pub db_port: u16,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Working directory for generated code.
    pub fn directory(&self, projects_root: &Path) -> PathBuf {
        projects_root.join(&self.id)
    }

    pub fn api_url(&self) -> String {
        format!("http://localhost:{}", self.app_port)
    }

    pub fn swagger_url(&self) -> String {
        format!("http://localhost:{}/docs", self.app_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_use_app_port() {
        let project = Project {
            id: "abc".into(),
            name: "shop".into(),
            description: String::new(),
            status: ProjectStatus::Created,
            app_port: 8101,
            db_port: 5501,
            created_at: Utc::now(),
        };
        assert_eq!(project.api_url(), "http://localhost:8101");
        assert_eq!(project.swagger_url(), "http://localhost:8101/docs");
        assert_eq!(
            project.directory(Path::new("/data/projects")),
            PathBuf::from("/data/projects/abc")
        );
    }

    #[test]
    fn status_parses_its_display() {
        for status in [
            ProjectStatus::Created,
            ProjectStatus::Generating,
            ProjectStatus::Building,
            ProjectStatus::Running,
            ProjectStatus::Error,
            ProjectStatus::Stopped,
        ] {
            assert_eq!(status.as_str().parse::<ProjectStatus>().unwrap(), status);
        }
    }
}
