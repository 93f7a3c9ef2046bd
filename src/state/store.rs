//! Persistence for projects and their shared state.
//!
//! [`StateStore`] is the seam the orchestrator depends on. [`SqliteStore`]
//! implements it on SQLite, running every query on tokio's blocking pool so
//! synchronous I/O never ties up async workers.

use crate::errors::StoreError;
use crate::phase::Phase;
use crate::state::project::{Project, ProjectStatus};
use crate::state::shared::{ConversationTurn, SessionMarkers, SharedState};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn create_project(&self, name: &str, description: &str) -> StoreResult<Project>;
    async fn list_projects(&self) -> StoreResult<Vec<Project>>;
    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>>;
    async fn set_project_status(&self, id: &str, status: ProjectStatus) -> StoreResult<()>;
    async fn load_state(&self, project_id: &str) -> StoreResult<Option<SharedState>>;
    async fn save_state(&self, state: &SharedState) -> StoreResult<()>;
    /// Returns whether a row was removed.
    async fn delete_state(&self, project_id: &str) -> StoreResult<bool>;
}

/// First ports handed out; later projects get `max + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortAllocation {
    pub app_port_start: u16,
    pub db_port_start: u16,
}

impl Default for PortAllocation {
    fn default() -> Self {
        Self {
            app_port_start: 8100,
            db_port_start: 5500,
        }
    }
}

/// Async-safe handle to the SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<std::sync::Mutex<Database>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path, ports: PortAllocation) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        Self::from_connection(conn, ports)
    }

    pub fn open_in_memory(ports: PortAllocation) -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        Self::from_connection(conn, ports)
    }

    fn from_connection(conn: Connection, ports: PortAllocation) -> anyhow::Result<Self> {
        let db = Database { conn, ports };
        db.init()?;
        Ok(Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        })
    }

    /// Run a closure against the database on a blocking thread.
    async fn call<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Database) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Database(anyhow::anyhow!("DB task panicked: {e}")))?
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn create_project(&self, name: &str, description: &str) -> StoreResult<Project> {
        let name = name.to_string();
        let description = description.to_string();
        self.call(move |db| db.create_project(&name, &description).map_err(StoreError::Database))
            .await
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        self.call(|db| db.list_projects().map_err(StoreError::Database))
            .await
    }

    async fn get_project(&self, id: &str) -> StoreResult<Option<Project>> {
        let id = id.to_string();
        self.call(move |db| db.get_project(&id).map_err(StoreError::Database))
            .await
    }

    async fn set_project_status(&self, id: &str, status: ProjectStatus) -> StoreResult<()> {
        let id = id.to_string();
        self.call(move |db| db.set_project_status(&id, status).map_err(StoreError::Database))
            .await
    }

    async fn load_state(&self, project_id: &str) -> StoreResult<Option<SharedState>> {
        let id = project_id.to_string();
        self.call(move |db| db.load_state(&id)).await
    }

    async fn save_state(&self, state: &SharedState) -> StoreResult<()> {
        let state = state.clone();
        self.call(move |db| db.save_state(&state)).await
    }

    async fn delete_state(&self, project_id: &str) -> StoreResult<bool> {
        let id = project_id.to_string();
        self.call(move |db| db.delete_state(&id).map_err(StoreError::Database))
            .await
    }
}

/// Columns of `shared_state` that don't warrant their own column.
#[derive(Serialize, Deserialize)]
struct SessionBlob {
    session: SessionMarkers,
    conversation: Vec<ConversationTurn>,
}

struct Database {
    conn: Connection,
    ports: PortAllocation,
}

impl Database {
    fn init(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'created',
                    app_port INTEGER NOT NULL UNIQUE,
                    db_port INTEGER NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS shared_state (
                    project_id TEXT PRIMARY KEY REFERENCES projects(id) ON DELETE CASCADE,
                    phase TEXT NOT NULL,
                    spec_json TEXT,
                    spec_draft_json TEXT NOT NULL,
                    manifest_json TEXT,
                    completed_tasks TEXT NOT NULL DEFAULT '[]',
                    files_created TEXT NOT NULL DEFAULT '[]',
                    errors TEXT NOT NULL DEFAULT '[]',
                    swagger_url TEXT,
                    api_url TEXT,
                    session_json TEXT NOT NULL DEFAULT '{}',
                    updated_at TEXT NOT NULL
                );
                ",
            )
            .context("Failed to run migrations")?;
        Ok(())
    }

    // ── Projects ──────────────────────────────────────────────────────

    fn create_project(&self, name: &str, description: &str) -> anyhow::Result<Project> {
        let (app_port, db_port): (u16, u16) = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(app_port) + 1, ?1), COALESCE(MAX(db_port) + 1, ?2) FROM projects",
                params![self.ports.app_port_start, self.ports.db_port_start],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to allocate ports")?;

        let project = Project {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: ProjectStatus::Created,
            app_port,
            db_port,
            created_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO projects (id, name, description, status, app_port, db_port, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    project.id,
                    project.name,
                    project.description,
                    project.status.as_str(),
                    project.app_port,
                    project.db_port,
                    project.created_at.to_rfc3339(),
                ],
            )
            .context("Failed to insert project")?;
        Ok(project)
    }

    fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, status, app_port, db_port, created_at
                 FROM projects ORDER BY created_at, app_port",
            )
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], ProjectRow::from_row)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row.context("Failed to read project row")?.into_project()?);
        }
        Ok(projects)
    }

    fn get_project(&self, id: &str) -> anyhow::Result<Option<Project>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, description, status, app_port, db_port, created_at
                 FROM projects WHERE id = ?1",
                params![id],
                ProjectRow::from_row,
            )
            .optional()
            .context("Failed to query project")?;
        row.map(ProjectRow::into_project).transpose()
    }

    fn set_project_status(&self, id: &str, status: ProjectStatus) -> anyhow::Result<()> {
        self.conn
            .execute(
                "UPDATE projects SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .context("Failed to update project status")?;
        Ok(())
    }

    // ── Shared state ──────────────────────────────────────────────────

    fn save_state(&self, state: &SharedState) -> StoreResult<()> {
        let encode = |what: &str, r: serde_json::Result<String>| {
            r.map_err(|e| StoreError::Corrupt {
                project_id: state.project_id.clone(),
                message: format!("cannot encode {what}: {e}"),
            })
        };
        let spec = state
            .spec
            .as_ref()
            .map(|s| encode("spec", serde_json::to_string(s)))
            .transpose()?;
        let draft = encode("spec draft", serde_json::to_string(&state.spec_draft))?;
        let manifest = state
            .manifest
            .as_ref()
            .map(|m| encode("manifest", serde_json::to_string(m)))
            .transpose()?;
        let completed = encode("completed tasks", serde_json::to_string(&state.completed_tasks))?;
        let files = encode("files", serde_json::to_string(&state.files_created))?;
        let errors = encode("errors", serde_json::to_string(&state.errors))?;
        let blob = encode(
            "session",
            serde_json::to_string(&SessionBlob {
                session: state.session.clone(),
                conversation: state.conversation.clone(),
            }),
        )?;

        self.conn
            .execute(
                "INSERT INTO shared_state (project_id, phase, spec_json, spec_draft_json, manifest_json,
                     completed_tasks, files_created, errors, swagger_url, api_url, session_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(project_id) DO UPDATE SET
                     phase = excluded.phase,
                     spec_json = excluded.spec_json,
                     spec_draft_json = excluded.spec_draft_json,
                     manifest_json = excluded.manifest_json,
                     completed_tasks = excluded.completed_tasks,
                     files_created = excluded.files_created,
                     errors = excluded.errors,
                     swagger_url = excluded.swagger_url,
                     api_url = excluded.api_url,
                     session_json = excluded.session_json,
                     updated_at = excluded.updated_at",
                params![
                    state.project_id,
                    state.phase.as_str(),
                    spec,
                    draft,
                    manifest,
                    completed,
                    files,
                    errors,
                    state.swagger_url,
                    state.api_url,
                    blob,
                    state.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to save shared state")
            .map_err(StoreError::Database)?;
        Ok(())
    }

    fn load_state(&self, project_id: &str) -> StoreResult<Option<SharedState>> {
        let row = self
            .conn
            .query_row(
                "SELECT phase, spec_json, spec_draft_json, manifest_json, completed_tasks,
                        files_created, errors, swagger_url, api_url, session_json, updated_at
                 FROM shared_state WHERE project_id = ?1",
                params![project_id],
                |row| {
                    Ok(StateRow {
                        phase: row.get(0)?,
                        spec: row.get(1)?,
                        draft: row.get(2)?,
                        manifest: row.get(3)?,
                        completed: row.get(4)?,
                        files: row.get(5)?,
                        errors: row.get(6)?,
                        swagger_url: row.get(7)?,
                        api_url: row.get(8)?,
                        session: row.get(9)?,
                        updated_at: row.get(10)?,
                    })
                },
            )
            .optional()
            .context("Failed to query shared state")
            .map_err(StoreError::Database)?;

        row.map(|r| r.into_state(project_id)).transpose()
    }

    fn delete_state(&self, project_id: &str) -> anyhow::Result<bool> {
        let n = self
            .conn
            .execute(
                "DELETE FROM shared_state WHERE project_id = ?1",
                params![project_id],
            )
            .context("Failed to delete shared state")?;
        Ok(n > 0)
    }
}

struct ProjectRow {
    id: String,
    name: String,
    description: String,
    status: String,
    app_port: u16,
    db_port: u16,
    created_at: String,
}

impl ProjectRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            app_port: row.get(4)?,
            db_port: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_project(self) -> anyhow::Result<Project> {
        Ok(Project {
            status: self.status.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            name: self.name,
            description: self.description,
            app_port: self.app_port,
            db_port: self.db_port,
        })
    }
}

struct StateRow {
    phase: String,
    spec: Option<String>,
    draft: String,
    manifest: Option<String>,
    completed: String,
    files: String,
    errors: String,
    swagger_url: Option<String>,
    api_url: Option<String>,
    session: String,
    updated_at: String,
}

impl StateRow {
    fn into_state(self, project_id: &str) -> StoreResult<SharedState> {
        let corrupt = |message: String| StoreError::Corrupt {
            project_id: project_id.to_string(),
            message,
        };
        let decode = |what: &str, e: serde_json::Error| corrupt(format!("bad {what}: {e}"));

        let phase: Phase = self.phase.parse().map_err(|e| corrupt(format!("{e}")))?;
        let spec = self
            .spec
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| decode("spec", e))?;
        let manifest = self
            .manifest
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| decode("manifest", e))?;
        let blob: SessionBlob =
            serde_json::from_str(&self.session).map_err(|e| decode("session", e))?;

        Ok(SharedState {
            project_id: project_id.to_string(),
            phase,
            spec,
            spec_draft: serde_json::from_str(&self.draft).map_err(|e| decode("spec draft", e))?,
            manifest,
            completed_tasks: serde_json::from_str(&self.completed)
                .map_err(|e| decode("completed tasks", e))?,
            files_created: serde_json::from_str(&self.files).map_err(|e| decode("files", e))?,
            errors: serde_json::from_str(&self.errors).map_err(|e| decode("errors", e))?,
            swagger_url: self.swagger_url,
            api_url: self.api_url,
            conversation: blob.conversation,
            session: blob.session,
            updated_at: parse_timestamp(&self.updated_at).map_err(|e| corrupt(format!("{e}")))?,
        })
    }
}

fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp '{s}'"))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::shared::Suspension;
    use crate::state::task::{Task, TaskManifest, TaskRole, TaskStatus};

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(PortAllocation::default()).unwrap()
    }

    #[tokio::test]
    async fn create_project_allocates_sequential_ports() {
        let store = store();
        let a = store.create_project("alpha", "first").await.unwrap();
        let b = store.create_project("beta", "").await.unwrap();

        assert_eq!((a.app_port, a.db_port), (8100, 5500));
        assert_eq!((b.app_port, b.db_port), (8101, 5501));
        assert_eq!(a.status, ProjectStatus::Created);

        let listed = store.list_projects().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "alpha");
    }

    #[tokio::test]
    async fn get_missing_project_is_none() {
        assert!(store().get_project("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_status_persists() {
        let store = store();
        let p = store.create_project("alpha", "").await.unwrap();
        store
            .set_project_status(&p.id, ProjectStatus::Building)
            .await
            .unwrap();
        let p = store.get_project(&p.id).await.unwrap().unwrap();
        assert_eq!(p.status, ProjectStatus::Building);
    }

    #[tokio::test]
    async fn state_round_trips_through_sqlite() {
        let store = store();
        let p = store.create_project("alpha", "").await.unwrap();

        let mut state = SharedState::new(&p.id);
        state.phase = Phase::Implementation;
        let mut t1 = Task::new("t1", TaskRole::Scaffold, "scaffold", vec![]);
        t1.status = TaskStatus::Done;
        state.manifest = Some(TaskManifest::new(vec![
            t1,
            Task::new("t2", TaskRole::Api, "routes", vec!["t1".into()]),
        ]));
        state.completed_tasks.insert("t1".into());
        state.files_created.insert("app/main.py".into());
        state.session.suspension = Some(Suspension {
            reason: "boom".into(),
            task_id: None,
        });

        store.save_state(&state).await.unwrap();
        let loaded = store.load_state(&p.id).await.unwrap().unwrap();
        assert_eq!(loaded.phase, Phase::Implementation);
        assert_eq!(loaded.manifest, state.manifest);
        assert_eq!(loaded.completed_tasks, state.completed_tasks);
        assert_eq!(loaded.session, state.session);

        // Upsert replaces the row.
        state.phase = Phase::Validation;
        store.save_state(&state).await.unwrap();
        let loaded = store.load_state(&p.id).await.unwrap().unwrap();
        assert_eq!(loaded.phase, Phase::Validation);
    }

    #[tokio::test]
    async fn delete_state_reports_whether_row_existed() {
        let store = store();
        let p = store.create_project("alpha", "").await.unwrap();
        store.save_state(&SharedState::new(&p.id)).await.unwrap();

        assert!(store.delete_state(&p.id).await.unwrap());
        assert!(!store.delete_state(&p.id).await.unwrap());
        assert!(store.load_state(&p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_database_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/backforge.db");
        let id = {
            let store = SqliteStore::open(&path, PortAllocation::default()).unwrap();
            store.create_project("alpha", "").await.unwrap().id
        };
        let store = SqliteStore::open(&path, PortAllocation::default()).unwrap();
        assert!(store.get_project(&id).await.unwrap().is_some());
    }
}
