//! Scripted capabilities and a session harness for end-to-end tests.
#![allow(dead_code)]

use anyhow::{Result, bail};
use async_trait::async_trait;
use backforge::agents::checkpoint::Checkpointer;
use backforge::agents::planning::Planner;
use backforge::agents::research::{ResearchReply, Researcher};
use backforge::agents::validation::{ValidationFailure, ValidationOutcome, Validator};
use backforge::agents::{AgentContext, AgentRegistry, AgentRunner, ProgressSink};
use backforge::classifier::{Intent, InterruptionClassifier};
use backforge::errors::OrchestratorError;
use backforge::orchestrator::{Capabilities, Inbound, OutboundEvent, Session, SessionSettings};
use backforge::phase::Phase;
use backforge::state::{
    AgentResult, EntitySpec, ErrorDetail, FieldSpec, PortAllocation, Project, ProjectSpec,
    SharedState, SqliteStore, StateStore, Suspension, Task, TaskManifest, TaskRole, TaskStatus,
};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};

// ── agents ────────────────────────────────────────────────────────────

/// One recorded dispatch.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub id: String,
    pub role: TaskRole,
    /// `completed_tasks` as the agent saw it.
    pub completed: BTreeSet<String>,
}

/// Succeeds by default; per-task results and hangs can be scripted.
#[derive(Default)]
pub struct ScriptedRunner {
    dispatches: Mutex<Vec<Dispatch>>,
    scripted: Mutex<HashMap<String, VecDeque<AgentResult>>>,
    hang: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl ScriptedRunner {
    pub fn script(&self, id: &str, results: Vec<AgentResult>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(id.to_string(), results.into());
    }

    pub fn hang_on(&self, id: &str) {
        self.hang.lock().unwrap().insert(id.to_string());
    }

    /// Hold `id` until the returned gate is notified.
    pub fn gate(&self, id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(id.to_string(), gate.clone());
        gate
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches.lock().unwrap().clone()
    }

    pub fn dispatched_ids(&self) -> Vec<String> {
        self.dispatches().into_iter().map(|d| d.id).collect()
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn run(&self, task: &Task, ctx: &AgentContext<'_>) -> Result<AgentResult> {
        self.dispatches.lock().unwrap().push(Dispatch {
            id: task.id.clone(),
            role: task.role,
            completed: ctx.state.completed_tasks.clone(),
        });
        let hangs = self.hang.lock().unwrap().contains(&task.id);
        if hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let gate = self.gates.lock().unwrap().get(&task.id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&task.id)
            .and_then(|q| q.pop_front());
        Ok(scripted.unwrap_or_else(|| AgentResult::success(vec![format!("app/{}.py", task.id)])))
    }
}

pub fn agent_failure(message: &str) -> AgentResult {
    AgentResult::failure(ErrorDetail {
        file: Some("app/models/user.py".into()),
        line: Some(12),
        message: message.into(),
    })
}

// ── classifier, research, planning ────────────────────────────────────

/// Always answers with the same intent; `None` fails every call.
pub struct StubClassifier {
    intent: Mutex<Option<Intent>>,
    calls: Mutex<Vec<String>>,
}

impl StubClassifier {
    pub fn new(intent: Option<Intent>) -> Self {
        Self {
            intent: Mutex::new(intent),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, intent: Option<Intent>) {
        *self.intent.lock().unwrap() = intent;
    }

    /// Messages classified so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl InterruptionClassifier for StubClassifier {
    async fn classify(
        &self,
        message: &str,
        _phase: Phase,
        _summary: &str,
    ) -> Result<Intent, OrchestratorError> {
        self.calls.lock().unwrap().push(message.to_string());
        (*self.intent.lock().unwrap())
            .ok_or_else(|| OrchestratorError::Classification("model unavailable".into()))
    }
}

#[derive(Default)]
pub struct StubResearcher {
    replies: Mutex<VecDeque<ResearchReply>>,
    messages: Mutex<Vec<String>>,
}

impl StubResearcher {
    pub fn push(&self, reply: ResearchReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Researcher for StubResearcher {
    async fn step(&self, _state: &SharedState, message: &str) -> Result<ResearchReply> {
        self.messages.lock().unwrap().push(message.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => Ok(reply),
            None => Ok(ResearchReply::Ask {
                question: "What should the API manage?".into(),
                options: Vec::new(),
            }),
        }
    }
}

/// Queued plans. An empty queue is a planner error.
#[derive(Default)]
pub struct StubPlanner {
    full: Mutex<VecDeque<Result<Vec<Task>>>>,
    delta: Mutex<VecDeque<Result<Vec<Task>>>>,
    requests: Mutex<Vec<String>>,
    specs: Mutex<Vec<ProjectSpec>>,
}

impl StubPlanner {
    pub fn push_full(&self, plan: Result<Vec<Task>>) {
        self.full.lock().unwrap().push_back(plan);
    }

    pub fn push_delta(&self, plan: Result<Vec<Task>>) {
        self.delta.lock().unwrap().push_back(plan);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// The spec handed to each planning call.
    pub fn specs(&self) -> Vec<ProjectSpec> {
        self.specs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for StubPlanner {
    async fn plan(&self, spec: &ProjectSpec) -> Result<Vec<Task>> {
        self.requests.lock().unwrap().push("full".into());
        self.specs.lock().unwrap().push(spec.clone());
        let next = self.full.lock().unwrap().pop_front();
        match next {
            Some(plan) => plan,
            None => bail!("no full plan scripted"),
        }
    }

    async fn plan_delta(
        &self,
        spec: &ProjectSpec,
        _manifest: &TaskManifest,
        request: &str,
    ) -> Result<Vec<Task>> {
        self.requests.lock().unwrap().push(format!("delta: {request}"));
        self.specs.lock().unwrap().push(spec.clone());
        let next = self.delta.lock().unwrap().pop_front();
        match next {
            Some(plan) => plan,
            None => bail!("no delta plan scripted"),
        }
    }
}

// ── validation, checkpoints ───────────────────────────────────────────

/// Queued outcomes; passes with the project's urls once the queue is empty.
#[derive(Default)]
pub struct StubValidator {
    outcomes: Mutex<VecDeque<Result<ValidationOutcome>>>,
    calls: Mutex<u32>,
}

impl StubValidator {
    pub fn fail(&self, failure: ValidationFailure) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Ok(ValidationOutcome::Failed(failure)));
    }

    pub fn broken(&self, message: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!("{message}")));
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Validator for StubValidator {
    async fn validate(
        &self,
        project: &Project,
        _workdir: &Path,
        _progress: &ProgressSink,
    ) -> Result<ValidationOutcome> {
        *self.calls.lock().unwrap() += 1;
        let next = self.outcomes.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(ValidationOutcome::Passed {
                api_url: project.api_url(),
                swagger_url: project.swagger_url(),
            })
        })
    }
}

/// Captures the persisted state at the moment of each checkpoint.
pub struct RecordingCheckpointer {
    store: Arc<dyn StateStore>,
    project_id: String,
    snapshots: Mutex<Vec<Option<SharedState>>>,
    fail: Mutex<bool>,
}

impl RecordingCheckpointer {
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn snapshots(&self) -> Vec<Option<SharedState>> {
        self.snapshots.lock().unwrap().clone()
    }
}

#[async_trait]
impl Checkpointer for RecordingCheckpointer {
    async fn checkpoint(&self, _dir: &Path, _message: &str) -> Result<String> {
        if *self.fail.lock().unwrap() {
            bail!("git index is locked");
        }
        let persisted = self.store.load_state(&self.project_id).await?;
        self.snapshots.lock().unwrap().push(persisted);
        Ok("0123456789abcdef".to_string())
    }
}

// ── fixtures ──────────────────────────────────────────────────────────

pub fn task(id: &str, role: TaskRole, deps: &[&str]) -> Task {
    Task::new(
        id,
        role,
        &format!("generate {id}"),
        deps.iter().map(|d| d.to_string()).collect(),
    )
}

pub fn complete_spec() -> ProjectSpec {
    ProjectSpec {
        project_name: "library".into(),
        description: "Books and authors".into(),
        entities: vec![EntitySpec {
            name: "Book".into(),
            fields: vec![FieldSpec {
                name: "title".into(),
                field_type: "string".into(),
                nullable: false,
                unique: false,
                default: None,
            }],
        }],
        database: Some("postgresql".into()),
        ..Default::default()
    }
}

pub fn events_of<'a>(events: &'a [OutboundEvent], kind: &str) -> Vec<&'a OutboundEvent> {
    events.iter().filter(|e| e.kind() == kind).collect()
}

// ── harness ───────────────────────────────────────────────────────────

pub struct Harness {
    pub store: Arc<SqliteStore>,
    pub project: Project,
    pub runner: Arc<ScriptedRunner>,
    pub classifier: Arc<StubClassifier>,
    pub researcher: Arc<StubResearcher>,
    pub planner: Arc<StubPlanner>,
    pub validator: Arc<StubValidator>,
    pub checkpointer: Arc<RecordingCheckpointer>,
    pub settings: SessionSettings,
    _dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(SqliteStore::open_in_memory(PortAllocation::default()).unwrap());
        let project = store
            .create_project("library", "Books and authors")
            .await
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let dyn_store: Arc<dyn StateStore> = store.clone();
        Self {
            checkpointer: Arc::new(RecordingCheckpointer {
                store: dyn_store,
                project_id: project.id.clone(),
                snapshots: Mutex::new(Vec::new()),
                fail: Mutex::new(false),
            }),
            store,
            project,
            runner: Arc::new(ScriptedRunner::default()),
            classifier: Arc::new(StubClassifier::new(Some(Intent::Unrelated))),
            researcher: Arc::new(StubResearcher::default()),
            planner: Arc::new(StubPlanner::default()),
            validator: Arc::new(StubValidator::default()),
            settings: SessionSettings {
                projects_dir: dir.path().to_path_buf(),
                ..SessionSettings::default()
            },
            _dir: dir,
        }
    }

    pub fn caps(&self) -> Capabilities {
        Capabilities {
            classifier: self.classifier.clone(),
            researcher: self.researcher.clone(),
            planner: self.planner.clone(),
            agents: AgentRegistry::uniform(self.runner.clone()),
            validator: self.validator.clone(),
            checkpointer: self.checkpointer.clone(),
        }
    }

    pub fn state(&self) -> SharedState {
        SharedState::new(&self.project.id)
    }

    /// Research done, plan accepted, nothing dispatched yet.
    pub fn implementing(&self, tasks: Vec<Task>) -> SharedState {
        let mut state = self.state();
        state.phase = Phase::Implementation;
        state.spec = Some(complete_spec());
        state.spec_draft = complete_spec();
        state.manifest = Some(TaskManifest::new(tasks));
        state
    }

    /// Every task in `tasks` already done, in the given phase.
    pub fn finished(&self, tasks: Vec<Task>, phase: Phase) -> SharedState {
        let mut state = self.implementing(tasks);
        state.phase = phase;
        if let Some(manifest) = state.manifest.as_mut() {
            for task in &mut manifest.tasks {
                task.status = TaskStatus::Done;
                state.completed_tasks.insert(task.id.clone());
            }
        }
        if phase == Phase::Complete {
            state.api_url = Some(self.project.api_url());
            state.swagger_url = Some(self.project.swagger_url());
        }
        state
    }

    /// `t6` spent its three attempts and the session is waiting on the user;
    /// `t7` depends on it.
    pub fn escalated(&self) -> SharedState {
        let mut state = self.implementing(vec![
            task("t6", TaskRole::Database, &[]),
            task("t7", TaskRole::Api, &["t6"]),
        ]);
        if let Some(t6) = state.manifest.as_mut().and_then(|m| m.get_mut("t6")) {
            t6.status = TaskStatus::Failed;
            t6.retries = 3;
        }
        state.session.suspension = Some(Suspension {
            reason: "task t6 failed 3 times".into(),
            task_id: Some("t6".into()),
        });
        state
    }

    pub fn session(&self, state: SharedState, events: mpsc::Sender<OutboundEvent>) -> Session {
        Session::new(
            self.project.clone(),
            state,
            self.caps(),
            self.settings.clone(),
            self.store.clone(),
            events,
        )
    }

    /// Persist `state`, queue `inputs`, close the inbox and run the session
    /// until it has nothing left to do.
    pub async fn run(
        &self,
        state: SharedState,
        inputs: Vec<Inbound>,
    ) -> (SharedState, Vec<OutboundEvent>) {
        self.store.save_state(&state).await.unwrap();
        let (inbox_tx, inbox_rx) = mpsc::channel(inputs.len().max(1));
        for input in inputs {
            inbox_tx.send(input).await.unwrap();
        }
        drop(inbox_tx);

        let (event_tx, mut event_rx) = mpsc::channel(1024);
        let session = self.session(state, event_tx);
        let final_state = tokio::time::timeout(Duration::from_secs(10), session.run(inbox_rx))
            .await
            .expect("session did not finish");

        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        (final_state, events)
    }

    pub async fn persisted(&self) -> SharedState {
        self.store
            .load_state(&self.project.id)
            .await
            .unwrap()
            .expect("state was persisted")
    }

    pub async fn project_status(&self) -> backforge::state::ProjectStatus {
        self.store
            .get_project(&self.project.id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

/// Wait for the first event of `kind`, failing after a few seconds.
pub async fn wait_for(events: &mut mpsc::Receiver<OutboundEvent>, kind: &str) -> OutboundEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(event) if event.kind() == kind => return event,
                Some(_) => continue,
                None => panic!("event stream closed before {kind}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
}
