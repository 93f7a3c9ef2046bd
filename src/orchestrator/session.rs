//! One project's control loop.
//!
//! A session owns its [`SharedState`] and processes one thing at a time:
//! a queued user message, or the next unit of work the phase calls for.
//! Long-running work (agent dispatch, research, planning, validation) is
//! raced against the inbox so `stop` is honored mid-flight; user messages that
//! arrive meanwhile are queued and handled between dispatches.

use crate::agents::research::ResearchReply;
use crate::agents::validation::ValidationOutcome;
use crate::agents::{AgentContext, ProgressSink};
use crate::classifier::{InterruptionAction, classify_or_unrelated};
use crate::dag::{ScheduleStatus, TaskScheduler};
use crate::errors::OrchestratorError;
use crate::orchestrator::events::{Inbound, OutboundEvent};
use crate::orchestrator::transition::{self, Transition};
use crate::orchestrator::{Capabilities, SessionSettings};
use crate::phase::Phase;
use crate::state::project::{Project, ProjectStatus};
use crate::state::shared::{PendingQuestion, PlanRequest, QuestionKind, SharedState, Speaker, Suspension};
use crate::state::store::StateStore;
use crate::state::task::{AgentError, AgentResult, ErrorDetail, ErrorKind, Task, TaskRole, TaskStatus};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const CONFIRM_OPTIONS: [&str; 2] = ["Confirm", "Change something"];

/// The next unit of work, if the session is free to do any.
#[derive(Debug, Clone)]
enum Work {
    Task(Task),
    Plan(PlanRequest),
    BeginValidation,
    Validate,
}

enum Race<T> {
    Done(T),
    Message(String),
    Stop,
    Closed,
}

pub struct Session {
    project: Project,
    state: SharedState,
    caps: Capabilities,
    settings: SessionSettings,
    scheduler: TaskScheduler,
    store: Arc<dyn StateStore>,
    events: mpsc::Sender<OutboundEvent>,
    backlog: VecDeque<String>,
    inbox_open: bool,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        project: Project,
        state: SharedState,
        caps: Capabilities,
        settings: SessionSettings,
        store: Arc<dyn StateStore>,
        events: mpsc::Sender<OutboundEvent>,
    ) -> Self {
        Self {
            project,
            state,
            caps,
            scheduler: TaskScheduler::new(settings.max_task_attempts),
            settings,
            store,
            events,
            backlog: VecDeque::new(),
            inbox_open: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Drive the session until the inbox closes with nothing left to do, or
    /// the cancellation token fires. Returns the final state.
    pub async fn run(self, inbox: mpsc::Receiver<Inbound>) -> SharedState {
        let span = tracing::info_span!("session", project_id = %self.project.id);
        self.drive(inbox).instrument(span).await
    }

    async fn drive(mut self, mut inbox: mpsc::Receiver<Inbound>) -> SharedState {
        tracing::info!(phase = %self.state.phase, "session started");
        self.announce().await;
        let cancel = self.cancel.clone();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.drain(&mut inbox).await;

            if let Some(message) = self.backlog.pop_front() {
                self.handle_message(&mut inbox, message).await;
                continue;
            }
            if let Some(work) = self.next_work() {
                self.execute(&mut inbox, work).await;
                continue;
            }
            if !self.inbox_open {
                break;
            }
            tokio::select! {
                inbound = inbox.recv() => match inbound {
                    Some(Inbound::UserMessage(message)) => self.backlog.push_back(message),
                    Some(Inbound::Stop) => self.acknowledge_stop(None).await,
                    None => self.inbox_open = false,
                },
                _ = cancel.cancelled() => break,
            }
        }

        self.persist().await;
        tracing::info!(phase = %self.state.phase, "session ended");
        self.state
    }

    async fn announce(&mut self) {
        self.emit(OutboundEvent::StateUpdate {
            phase: self.state.phase,
            swagger_url: self.state.swagger_url.clone(),
            api_url: self.state.api_url.clone(),
        })
        .await;
        if let Some(question) = self.state.session.pending_question.clone() {
            self.emit(OutboundEvent::AskUser {
                question: question.question,
                options: question.options,
            })
            .await;
        }
        if let Some(suspension) = &self.state.session.suspension {
            let message = format!("Waiting for your input: {}.", suspension.reason);
            self.emit(OutboundEvent::message(message)).await;
        }
    }

    /// Pull whatever is already queued without waiting.
    async fn drain(&mut self, inbox: &mut mpsc::Receiver<Inbound>) {
        while self.inbox_open {
            match inbox.try_recv() {
                Ok(Inbound::UserMessage(message)) => self.backlog.push_back(message),
                Ok(Inbound::Stop) => self.acknowledge_stop(None).await,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.inbox_open = false,
            }
        }
    }

    fn next_work(&self) -> Option<Work> {
        let state = &self.state;
        if state.session.paused || state.is_suspended() || state.session.pending_question.is_some()
        {
            return None;
        }
        if let Some(edit) = state
            .session
            .pending_edits
            .iter()
            .find(|t| t.status == TaskStatus::Pending)
        {
            return Some(Work::Task(edit.clone()));
        }
        match state.phase {
            Phase::Planning => state.session.plan_request.clone().map(Work::Plan),
            Phase::Implementation => match self.scheduler.status(state) {
                ScheduleStatus::Runnable(id) => state.task(&id).cloned().map(Work::Task),
                ScheduleStatus::AllDone => Some(Work::BeginValidation),
                _ => None,
            },
            Phase::Validation => Some(Work::Validate),
            Phase::Research | Phase::Complete => None,
        }
    }

    async fn execute(&mut self, inbox: &mut mpsc::Receiver<Inbound>, work: Work) {
        match work {
            Work::Task(task) => self.run_task(inbox, task).await,
            Work::Plan(request) => self.run_planning(inbox, request).await,
            Work::BeginValidation => {
                let result = transition::begin_validation(&self.state);
                self.apply_result(result).await;
            }
            Work::Validate => self.run_validation(inbox).await,
        }
    }

    /// Race `work` against the inbox. `None` means the work was abandoned
    /// because of `stop` or cancellation.
    async fn supervise<T>(
        &mut self,
        inbox: &mut mpsc::Receiver<Inbound>,
        work: impl Future<Output = T>,
    ) -> Option<T> {
        let cancel = self.cancel.clone();
        tokio::pin!(work);
        loop {
            let open = self.inbox_open;
            let race = tokio::select! {
                out = &mut work => Race::Done(out),
                inbound = inbox.recv(), if open => match inbound {
                    Some(Inbound::UserMessage(message)) => Race::Message(message),
                    Some(Inbound::Stop) => Race::Stop,
                    None => Race::Closed,
                },
                _ = cancel.cancelled() => Race::Stop,
            };
            match race {
                Race::Done(out) => return Some(out),
                Race::Message(message) => {
                    tracing::debug!("message queued until the current step finishes");
                    self.backlog.push_back(message);
                }
                Race::Stop => return None,
                Race::Closed => self.inbox_open = false,
            }
        }
    }

    async fn emit(&self, event: OutboundEvent) {
        self.events.send(event).await.ok();
    }

    async fn persist(&mut self) {
        if let Err(e) = self.store.save_state(&self.state).await {
            tracing::error!(project = %self.project.id, error = %e, "failed to persist state");
            self.emit(OutboundEvent::warning(format!("Couldn't save progress: {e}")))
                .await;
        }
    }

    async fn set_project_status(&mut self, status: ProjectStatus) {
        if self.project.status == status {
            return;
        }
        match self.store.set_project_status(&self.project.id, status).await {
            Ok(()) => self.project.status = status,
            Err(e) => {
                tracing::error!(project = %self.project.id, error = %e, "failed to update project status")
            }
        }
    }

    /// Persist first so anything announced is already durable.
    async fn apply(&mut self, transition: Transition) {
        let before = self.state.phase;
        self.state = transition.state;
        if before != self.state.phase {
            tracing::info!(from = %before, to = %self.state.phase, "phase transition");
        }
        for event in &transition.events {
            if let OutboundEvent::Message { text } = event {
                self.state.record_turn(Speaker::Assistant, text);
            }
        }
        self.persist().await;
        for event in transition.events {
            self.emit(event).await;
        }
    }

    async fn apply_result(&mut self, result: Result<Transition, OrchestratorError>) {
        match result {
            Ok(t) => self.apply(t).await,
            Err(e) => {
                tracing::error!(error = %e, phase = %self.state.phase, "transition rejected");
                self.emit(OutboundEvent::error(e.to_string())).await;
            }
        }
    }

    async fn say(&mut self, text: String) {
        self.state.record_turn(Speaker::Assistant, &text);
        self.emit(OutboundEvent::message(text)).await;
    }

    async fn ask(&mut self, kind: QuestionKind, question: String, options: Vec<String>) {
        self.state.record_turn(Speaker::Assistant, &question);
        self.state.session.pending_question = Some(PendingQuestion {
            kind,
            question: question.clone(),
            options: options.clone(),
        });
        self.persist().await;
        self.emit(OutboundEvent::AskUser { question, options }).await;
    }

    async fn acknowledge_stop(&mut self, running: Option<&str>) {
        if let Some(id) = running {
            match transition::task_released(&self.state, &self.scheduler, id) {
                Ok(t) => self.state = t.state,
                Err(e) => tracing::warn!(task = %id, error = %e, "could not release task"),
            }
        }
        self.state.session.paused = true;
        self.persist().await;
        tracing::info!(project = %self.project.id, task = ?running, "stopped");
        self.emit(OutboundEvent::Stopped).await;
    }

    fn suspend(&mut self, reason: String, task_id: Option<String>) {
        self.state.session.suspension = Some(Suspension { reason, task_id });
        self.state.touch();
    }

    // ── user messages ─────────────────────────────────────────────────

    async fn handle_message(&mut self, inbox: &mut mpsc::Receiver<Inbound>, message: String) {
        self.state.record_turn(Speaker::User, &message);
        self.state.session.paused = false;

        if let Some(question) = self.state.session.pending_question.take() {
            if question.kind == QuestionKind::ConfirmSpec && is_affirmative(&message) {
                self.finalize_spec().await;
            } else {
                self.research(inbox, message).await;
            }
            return;
        }

        match self.state.phase {
            Phase::Research => self.research(inbox, message).await,
            Phase::Planning => self.replan(message).await,
            Phase::Implementation | Phase::Validation | Phase::Complete => {
                self.interruption(inbox, message).await
            }
        }
    }

    async fn finalize_spec(&mut self) {
        match transition::finalize_spec(&self.state) {
            Ok(t) => {
                self.apply(t).await;
                self.set_project_status(ProjectStatus::Generating).await;
            }
            // Recovered locally by asking for what is missing.
            Err(OrchestratorError::SpecIncomplete { missing }) => {
                tracing::debug!(?missing, "spec incomplete at confirmation");
                self.ask_next_missing().await;
            }
            Err(e) => self.apply_result(Err(e)).await,
        }
    }

    async fn ask_next_missing(&mut self) {
        let draft = &self.state.spec_draft;
        match draft.missing_items().into_iter().next() {
            Some(item) => {
                self.ask(QuestionKind::Research, item.question(), item.options())
                    .await
            }
            None => {
                let question = format!(
                    "Here's what I understood:\n{}\nShall I start building?",
                    draft.summary()
                );
                let options = CONFIRM_OPTIONS.iter().map(|s| s.to_string()).collect();
                self.ask(QuestionKind::ConfirmSpec, question, options).await
            }
        }
    }

    async fn research(&mut self, inbox: &mut mpsc::Receiver<Inbound>, message: String) {
        let researcher = self.caps.researcher.clone();
        let snapshot = self.state.clone();
        let work = async move { researcher.step(&snapshot, &message).await };
        let Some(reply) = self.supervise(inbox, work).await else {
            self.acknowledge_stop(None).await;
            return;
        };
        match reply {
            Ok(ResearchReply::Ask { question, options }) => {
                self.ask(QuestionKind::Research, question, options).await
            }
            Ok(ResearchReply::Update { spec }) => {
                self.state.spec_draft.merge(spec);
                self.ask_next_missing().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "research step failed");
                self.persist().await;
                self.emit(OutboundEvent::error(format!(
                    "I couldn't process that: {e}. Could you rephrase?"
                )))
                .await;
            }
        }
    }

    /// A message during Planning amends the pending plan request.
    async fn replan(&mut self, message: String) {
        if self.state.lift_suspension().is_some() {
            tracing::info!("planning suspension lifted by user reply");
        }
        let request = match self.state.session.plan_request.take() {
            Some(PlanRequest::Delta { request }) => PlanRequest::Delta {
                request: format!("{request}\n{message}"),
            },
            None if self.state.manifest.is_some() => PlanRequest::Delta { request: message },
            Some(PlanRequest::Full) | None => {
                if !self.state.session.plan_notes.contains(&message) {
                    self.state.session.plan_notes.push(message);
                }
                PlanRequest::Full
            }
        };
        self.state.session.plan_request = Some(request);
        self.persist().await;
        self.say("Noted. I'll include that in the plan.".to_string())
            .await;
    }

    async fn interruption(&mut self, inbox: &mut mpsc::Receiver<Inbound>, message: String) {
        let summary = self.state.summary();
        let classifier = self.caps.classifier.clone();
        let (intent, warning) =
            classify_or_unrelated(classifier.as_ref(), &message, self.state.phase, &summary).await;
        if let Some(warning) = warning {
            self.emit(OutboundEvent::warning(warning)).await;
        }
        tracing::info!(%intent, phase = %self.state.phase, "interruption classified");

        match intent.action() {
            InterruptionAction::CorrectiveTask => {
                self.lift_suspension();
                self.queue_edit(message).await;
            }
            InterruptionAction::BumpToPlanning => {
                self.lift_suspension();
                let result = transition::bump_to_planning(&self.state, &message);
                self.apply_result(result).await;
            }
            InterruptionAction::CheckpointAndBumpToResearch => {
                self.breaking_change(inbox, message).await
            }
            InterruptionAction::ReplyFromState => {
                let reply = self.state.unrelated_reply();
                self.say(reply).await;
                self.persist().await;
            }
        }
    }

    fn lift_suspension(&mut self) {
        if let Some(lifted) = self.state.lift_suspension() {
            tracing::info!(reason = %lifted.reason, "suspension lifted by user reply");
        }
    }

    async fn queue_edit(&mut self, message: String) {
        self.state.session.edit_seq += 1;
        let id = format!("edit-{}", self.state.session.edit_seq);
        let role = TaskRole::for_edit_request(&message);
        let task = Task::new(&id, role, &message, Vec::new()).with_context(format!(
            "Requested by the user during {}. Keep the change small.",
            self.state.phase
        ));
        tracing::info!(task = %id, %role, "corrective edit queued");
        self.state.session.pending_edits.push(task);
        self.persist().await;
        self.say(format!("On it. Sending that to the {role} agent."))
            .await;
    }

    async fn breaking_change(&mut self, inbox: &mut mpsc::Receiver<Inbound>, message: String) {
        let dir = self.project.directory(&self.settings.projects_dir);
        let label = format!("checkpoint before requirements change: {message}");
        let sha = match self.caps.checkpointer.checkpoint(&dir, &label).await {
            Ok(sha) => sha,
            Err(e) => {
                tracing::error!(error = %e, "checkpoint failed, keeping current state");
                let err = OrchestratorError::Checkpoint(e);
                self.state
                    .errors
                    .push(AgentError::new(ErrorKind::Checkpoint, err.to_string()));
                self.persist().await;
                self.emit(OutboundEvent::error(format!(
                    "{err}. Nothing was reset; try again or rephrase the change."
                )))
                .await;
                return;
            }
        };
        match transition::bump_to_research(&self.state, &sha) {
            Ok(t) => {
                self.apply(t).await;
                self.set_project_status(ProjectStatus::Created).await;
                self.research(inbox, message).await;
            }
            Err(e) => self.apply_result(Err(e)).await,
        }
    }

    // ── work ──────────────────────────────────────────────────────────

    async fn run_planning(&mut self, inbox: &mut mpsc::Receiver<Inbound>, request: PlanRequest) {
        let Some(mut spec) = self.state.spec.clone() else {
            self.state.session.plan_request = None;
            self.persist().await;
            self.emit(OutboundEvent::error("There is no confirmed spec to plan from."))
                .await;
            return;
        };
        // The planner sees later requests on a working copy only.
        for note in &self.state.session.plan_notes {
            if !spec.extra_requirements.contains(note) {
                spec.extra_requirements.push(note.clone());
            }
        }
        let planner = self.caps.planner.clone();
        let manifest = self.state.manifest.clone().unwrap_or_default();
        let delta = request.clone();
        let work = async move {
            match delta {
                PlanRequest::Full => planner.plan(&spec).await,
                PlanRequest::Delta { request } => {
                    planner.plan_delta(&spec, &manifest, &request).await
                }
            }
        };
        let Some(planned) = self.supervise(inbox, work).await else {
            self.acknowledge_stop(None).await;
            return;
        };

        let result = planned
            .map_err(|e| OrchestratorError::PlanningInvalid(format!("{e:#}")))
            .and_then(|tasks| {
                tracing::info!(tasks = tasks.len(), mode = ?request, "plan received");
                match request {
                    PlanRequest::Full => transition::accept_plan(&self.state, tasks),
                    PlanRequest::Delta { .. } => transition::append_delta(&self.state, tasks),
                }
            });
        match result {
            Ok(t) => self.apply(t).await,
            Err(e) => self.planning_failed(e).await,
        }
    }

    async fn planning_failed(&mut self, error: OrchestratorError) {
        self.state.session.planning_failures += 1;
        let failures = self.state.session.planning_failures;
        self.state
            .errors
            .push(AgentError::new(ErrorKind::Planning, error.to_string()));
        tracing::warn!(error = %error, failures, "planning failed");

        if failures <= self.settings.planning_retries {
            self.persist().await;
            self.emit(OutboundEvent::warning(format!("{error}. Retrying planning.")))
                .await;
        } else {
            self.suspend(format!("planning failed {failures} times"), None);
            self.persist().await;
            self.emit(OutboundEvent::error(format!(
                "{error}. Tell me how to adjust the requirements and I'll plan again."
            )))
            .await;
        }
    }

    async fn run_task(&mut self, inbox: &mut mpsc::Receiver<Inbound>, task: Task) {
        let started = transition::task_started(&self.state, &self.scheduler, &task.id);
        match started {
            Ok(t) => self.apply(t).await,
            Err(e) => {
                self.apply_result(Err(e)).await;
                return;
            }
        }
        tracing::info!(task = %task.id, role = %task.role, "dispatching task");

        let agents = self.caps.agents.clone();
        let snapshot = self.state.clone();
        let workdir = self.project.directory(&self.settings.projects_dir);
        let progress = ProgressSink::new(&task.id, self.events.clone());
        let dispatched = task.clone();
        let work = async move {
            let runner = agents.get(dispatched.role)?;
            let ctx = AgentContext {
                state: &snapshot,
                workdir: &workdir,
                progress: &progress,
            };
            runner.run(&dispatched, &ctx).await
        };

        let Some(outcome) = self.supervise(inbox, work).await else {
            self.acknowledge_stop(Some(&task.id)).await;
            return;
        };
        let result = outcome.unwrap_or_else(|e| {
            AgentResult::failure(ErrorDetail {
                file: None,
                message: format!("{e:#}"),
                line: None,
            })
        });

        if result.is_success() {
            let done = transition::task_succeeded(&self.state, &self.scheduler, &task.id, &result);
            self.apply_result(done).await;
            return;
        }
        let detail = result.error.unwrap_or_else(|| ErrorDetail {
            message: "agent reported failure without details".to_string(),
            ..Default::default()
        });
        match transition::task_failed(&self.state, &self.scheduler, &task.id, detail) {
            Ok((t, outcome)) => {
                tracing::warn!(task = %task.id, ?outcome, "task failed");
                self.apply(t).await;
            }
            Err(e) => self.apply_result(Err(e)).await,
        }
    }

    async fn run_validation(&mut self, inbox: &mut mpsc::Receiver<Inbound>) {
        self.set_project_status(ProjectStatus::Building).await;
        let validator = self.caps.validator.clone();
        let project = self.project.clone();
        let workdir = self.project.directory(&self.settings.projects_dir);
        let progress = ProgressSink::new("validation", self.events.clone());
        let work = async move { validator.validate(&project, &workdir, &progress).await };

        let Some(outcome) = self.supervise(inbox, work).await else {
            self.acknowledge_stop(None).await;
            return;
        };
        match outcome {
            Ok(ValidationOutcome::Passed {
                api_url,
                swagger_url,
            }) => {
                let result = transition::complete(&self.state, &api_url, &swagger_url);
                self.apply_result(result).await;
                self.set_project_status(ProjectStatus::Running).await;
            }
            Ok(ValidationOutcome::Failed(failure)) => {
                tracing::warn!(stage = %failure.stage, file = ?failure.file, "validation failed");
                let result = transition::validation_failed(
                    &self.state,
                    &failure,
                    self.settings.validation_budget,
                );
                self.apply_result(result).await;
                if self.state.is_suspended() {
                    self.set_project_status(ProjectStatus::Error).await;
                }
            }
            Err(e) => {
                // The validator itself broke; retrying would fail the same way.
                tracing::error!(error = %e, "validator could not run");
                self.state.errors.push(AgentError::new(
                    ErrorKind::Validation,
                    format!("validator could not run: {e:#}"),
                ));
                self.suspend("the validator could not run".to_string(), None);
                self.persist().await;
                self.set_project_status(ProjectStatus::Error).await;
                self.emit(OutboundEvent::error(format!("Validation could not run: {e:#}")))
                    .await;
            }
        }
    }
}

/// Whether a reply to the confirmation question accepts the summary.
pub fn is_affirmative(reply: &str) -> bool {
    let reply = reply.trim().to_lowercase();
    if reply.starts_with("looks good") || reply.starts_with("sounds good") {
        return true;
    }
    let first = reply
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");
    matches!(
        first,
        "confirm" | "confirmed" | "yes" | "y" | "yep" | "yeah" | "ok" | "okay" | "sure" | "lgtm"
            | "proceed" | "go" | "build"
    )
}
