//! Pure state transitions.
//!
//! Every function takes the current state by reference and returns the next
//! state with the events that announce it. Nothing here performs I/O, so the
//! session can persist before it emits.

use crate::agents::validation::ValidationFailure;
use crate::dag::{FailureOutcome, TaskScheduler, validate_delta, validate_plan};
use crate::errors::OrchestratorError;
use crate::orchestrator::events::OutboundEvent;
use crate::phase::{Phase, TransitionCause};
use crate::state::shared::{PlanRequest, SharedState, Suspension};
use crate::state::task::{
    AgentError, AgentResult, ErrorDetail, ErrorKind, Task, TaskManifest, TaskRole, TaskStatus,
};

pub type TransitionResult = Result<Transition, OrchestratorError>;

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: SharedState,
    pub events: Vec<OutboundEvent>,
}

impl Transition {
    fn stay(state: SharedState) -> Self {
        Self {
            state,
            events: Vec::new(),
        }
    }

    fn emit(mut self, event: OutboundEvent) -> Self {
        self.events.push(event);
        self
    }
}

fn move_phase(state: &SharedState, to: Phase, cause: TransitionCause) -> TransitionResult {
    let from = state.phase;
    if !from.can_transition(to, cause) {
        return Err(OrchestratorError::InvalidTransition { from, to });
    }
    let mut next = state.clone();
    next.phase = to;
    next.touch();
    let update = OutboundEvent::StateUpdate {
        phase: to,
        swagger_url: next.swagger_url.clone(),
        api_url: next.api_url.clone(),
    };
    Ok(Transition::stay(next)
        .emit(OutboundEvent::PhaseTransition { from, to })
        .emit(update))
}

/// Research → Planning once the draft passes the checklist.
pub fn finalize_spec(state: &SharedState) -> TransitionResult {
    let spec = state.spec_draft.finalize()?;
    let mut t = move_phase(state, Phase::Planning, TransitionCause::Advance)?;
    t.state.spec = Some(spec);
    t.state.session.pending_question = None;
    t.state.session.plan_request = Some(PlanRequest::Full);
    t.state.session.planning_failures = 0;
    Ok(t.emit(OutboundEvent::message(
        "Requirements captured! Planning your project structure...",
    )))
}

fn plan_ready(mut t: Transition) -> Transition {
    t.state.session.plan_request = None;
    t.state.session.plan_notes.clear();
    t.state.session.planning_failures = 0;
    t.emit(OutboundEvent::message(
        "Plan ready! Starting implementation...",
    ))
}

/// Planning → Implementation with a freshly planned manifest.
pub fn accept_plan(state: &SharedState, tasks: Vec<Task>) -> TransitionResult {
    validate_plan(&tasks).map_err(|e| OrchestratorError::PlanningInvalid(e.to_string()))?;
    let mut t = move_phase(state, Phase::Implementation, TransitionCause::Advance)?;
    t.state.manifest = Some(TaskManifest::new(tasks));
    t.state.completed_tasks.clear();
    Ok(plan_ready(t))
}

/// Planning → Implementation after a delta plan. Only appends.
pub fn append_delta(state: &SharedState, delta: Vec<Task>) -> TransitionResult {
    let Some(manifest) = state.manifest.as_ref() else {
        return accept_plan(state, delta);
    };
    validate_delta(&manifest.tasks, &delta)
        .map_err(|e| OrchestratorError::PlanningInvalid(e.to_string()))?;
    let mut t = move_phase(state, Phase::Implementation, TransitionCause::Advance)?;
    if delta.is_empty() {
        tracing::info!("delta plan added no tasks");
        t.state.session.plan_request = None;
        t.state.session.plan_notes.clear();
        t.state.session.planning_failures = 0;
        return Ok(t.emit(OutboundEvent::message(
            "That's already covered by the plan. Carrying on...",
        )));
    }
    let added: Vec<String> = delta.iter().map(|t| t.id.clone()).collect();
    if let Some(manifest) = t.state.manifest.as_mut() {
        manifest.append(delta);
    }
    tracing::info!(added = ?added, "delta plan appended");
    Ok(plan_ready(t))
}

/// Implementation → Validation. Every manifest task must be done.
pub fn begin_validation(state: &SharedState) -> TransitionResult {
    let done = state.manifest.as_ref().is_some_and(|m| m.all_done());
    if !done {
        return Err(OrchestratorError::InvalidTransition {
            from: state.phase,
            to: Phase::Validation,
        });
    }
    let t = move_phase(state, Phase::Validation, TransitionCause::Advance)?;
    Ok(t.emit(OutboundEvent::message(
        "All tasks complete! Validating your project...",
    )))
}

/// Validation → Complete.
pub fn complete(state: &SharedState, api_url: &str, swagger_url: &str) -> TransitionResult {
    let mut t = move_phase(state, Phase::Complete, TransitionCause::Advance)?;
    t.state.api_url = Some(api_url.to_string());
    t.state.swagger_url = Some(swagger_url.to_string());
    t.state.session.validation_attempts = 0;
    // The phase-change state_update predates the urls.
    t.events.retain(|e| !matches!(e, OutboundEvent::StateUpdate { .. }));
    Ok(t.emit(OutboundEvent::StateUpdate {
        phase: Phase::Complete,
        swagger_url: Some(swagger_url.to_string()),
        api_url: Some(api_url.to_string()),
    })
    .emit(OutboundEvent::BuildComplete {
        swagger_url: swagger_url.to_string(),
        api_url: api_url.to_string(),
    }))
}

/// Role that should fix a validation failure.
pub fn role_for_failure(failure: &ValidationFailure) -> TaskRole {
    match &failure.file {
        Some(file) => TaskRole::for_file(file),
        None if failure.stage.is_runtime() => TaskRole::Devops,
        None => TaskRole::Scaffold,
    }
}

/// Record a validation failure. Within `budget` failures a corrective task is
/// appended and the session re-enters Implementation; past it the session
/// stays in Validation and suspends.
pub fn validation_failed(
    state: &SharedState,
    failure: &ValidationFailure,
    budget: u32,
) -> TransitionResult {
    if state.phase != Phase::Validation {
        return Err(OrchestratorError::InvalidTransition {
            from: state.phase,
            to: Phase::Implementation,
        });
    }
    let mut error = AgentError::new(ErrorKind::Validation, &failure.message);
    error.file = failure.file.clone();
    error.line = failure.line;

    let attempts = state.session.validation_attempts + 1;
    let location = match (&failure.file, failure.line) {
        (Some(file), Some(line)) => format!(" in {file}:{line}"),
        (Some(file), None) => format!(" in {file}"),
        _ => String::new(),
    };

    if attempts >= budget.max(1) {
        let mut next = state.clone();
        next.errors.push(error);
        next.session.validation_attempts = attempts;
        next.session.suspension = Some(Suspension {
            reason: format!("validation failed {attempts} times"),
            task_id: None,
        });
        next.touch();
        return Ok(Transition::stay(next).emit(OutboundEvent::Error {
            message: format!(
                "Validation failed at the {} stage{location} after {attempts} attempts: {}",
                failure.stage, failure.message
            ),
            task_id: None,
            file: failure.file.clone(),
            line: failure.line,
        }));
    }

    let mut t = move_phase(state, Phase::Implementation, TransitionCause::ValidationRetry)?;
    t.state.errors.push(error);
    t.state.session.validation_attempts = attempts;
    let manifest = t.state.manifest.get_or_insert_with(TaskManifest::default);
    let id = format!("fix-{}", manifest.next_sequence("fix-"));
    let role = role_for_failure(failure);
    let fix = Task::new(
        &id,
        role,
        &format!("Fix the {} failure{location}", failure.stage),
        Vec::new(),
    )
    .with_context(format!(
        "Validation failed at the {} stage{location}:\n{}",
        failure.stage, failure.message
    ));
    manifest.append(vec![fix]);
    tracing::info!(task = %id, %role, attempt = attempts, "corrective task queued");
    Ok(t.emit(OutboundEvent::warning(format!(
        "Validation failed at the {} stage{location}. Sending {id} to the {role} agent (attempt {attempts}/{budget}).",
        failure.stage
    ))))
}

/// ADDITIVE: back to Planning in delta mode.
pub fn bump_to_planning(state: &SharedState, request: &str) -> TransitionResult {
    let mut t = move_phase(state, Phase::Planning, TransitionCause::Additive)?;
    t.state.session.plan_request = Some(if t.state.manifest.is_some() {
        PlanRequest::Delta {
            request: request.to_string(),
        }
    } else {
        t.state.session.plan_notes.push(request.to_string());
        PlanRequest::Full
    });
    t.state.session.planning_failures = 0;
    Ok(t.emit(OutboundEvent::message(
        "Got it. Planning the additional work...",
    )))
}

/// BREAKING: discard spec and plan, back to Research. Call only after the
/// checkpoint succeeded. Files on disk stay, so `files_created` is kept.
pub fn bump_to_research(state: &SharedState, checkpoint: &str) -> TransitionResult {
    let mut t = move_phase(state, Phase::Research, TransitionCause::Breaking)?;
    let next = &mut t.state;
    next.spec = None;
    next.spec_draft = Default::default();
    next.manifest = None;
    next.completed_tasks.clear();
    next.swagger_url = None;
    next.api_url = None;
    next.session.pending_question = None;
    next.session.suspension = None;
    next.session.plan_request = None;
    next.session.plan_notes.clear();
    next.session.pending_edits.clear();
    next.session.planning_failures = 0;
    next.session.validation_attempts = 0;
    let short: String = checkpoint.chars().take(8).collect();
    Ok(t.emit(OutboundEvent::message(format!(
        "That changes the requirements, so I'm starting over. The current code is saved in checkpoint {short}."
    ))))
}

fn find_task<'a>(state: &'a mut SharedState, id: &str) -> Option<&'a mut Task> {
    let in_manifest = state.manifest.as_ref().is_some_and(|m| m.contains(id));
    if in_manifest {
        state.manifest.as_mut().and_then(|m| m.get_mut(id))
    } else {
        state.session.pending_edits.iter_mut().find(|t| t.id == id)
    }
}

fn is_edit(state: &SharedState, id: &str) -> bool {
    state.session.pending_edits.iter().any(|t| t.id == id)
}

pub fn task_started(state: &SharedState, scheduler: &TaskScheduler, id: &str) -> TransitionResult {
    let mut next = state.clone();
    if is_edit(&next, id) {
        let task = find_task(&mut next, id)
            .ok_or_else(|| anyhow::anyhow!("Task '{}' is not queued", id))?;
        task.status = TaskStatus::Running;
        next.touch();
    } else {
        scheduler.mark_running(&mut next, id)?;
    }
    let task = find_task(&mut next, id)
        .ok_or_else(|| anyhow::anyhow!("Task '{}' is not queued", id))?;
    let event = OutboundEvent::TaskStarted {
        task_id: task.id.clone(),
        role: task.role,
        description: task.description.clone(),
    };
    Ok(Transition::stay(next).emit(event))
}

/// A cancelled dispatch: the task goes back to pending, nothing is merged.
pub fn task_released(state: &SharedState, scheduler: &TaskScheduler, id: &str) -> TransitionResult {
    let mut next = state.clone();
    if is_edit(&next, id) {
        if let Some(task) = find_task(&mut next, id)
            && task.status == TaskStatus::Running
        {
            task.status = TaskStatus::Pending;
        }
        next.touch();
    } else {
        scheduler.release(&mut next, id)?;
    }
    Ok(Transition::stay(next))
}

pub fn task_succeeded(
    state: &SharedState,
    scheduler: &TaskScheduler,
    id: &str,
    result: &AgentResult,
) -> TransitionResult {
    let mut next = state.clone();
    if is_edit(&next, id) {
        next.session.pending_edits.retain(|t| t.id != id);
        next.files_created
            .extend(result.files_touched.iter().cloned());
        next.touch();
    } else {
        scheduler.record_success(&mut next, id, result)?;
    }
    Ok(Transition::stay(next).emit(OutboundEvent::TaskCompleted {
        task_id: id.to_string(),
        files: result.files_touched.clone(),
    }))
}

/// Record a failed attempt. On escalation the session is suspended and an
/// `error` event carries the task, file and line.
pub fn task_failed(
    state: &SharedState,
    scheduler: &TaskScheduler,
    id: &str,
    detail: ErrorDetail,
) -> Result<(Transition, FailureOutcome), OrchestratorError> {
    let mut next = state.clone();
    let edit = is_edit(&next, id);
    let error = {
        let task = find_task(&mut next, id)
            .ok_or_else(|| anyhow::anyhow!("Task '{}' is not queued", id))?;
        AgentError::for_task(task, detail.clone())
    };
    let outcome = if edit {
        let task = find_task(&mut next, id)
            .ok_or_else(|| anyhow::anyhow!("Task '{}' is not queued", id))?;
        let outcome = scheduler.register_failure(task);
        next.errors.push(error);
        outcome
    } else {
        scheduler.record_failure(&mut next, id, error)?
    };

    let t = match outcome {
        FailureOutcome::Retry { attempt } => {
            next.touch();
            Transition::stay(next).emit(OutboundEvent::warning(format!(
                "Task {id} failed (attempt {attempt}/{}): {}. Retrying.",
                scheduler.max_attempts(),
                detail.message
            )))
        }
        FailureOutcome::Escalate { attempts } => {
            if edit {
                next.session.pending_edits.retain(|t| t.id != id);
            }
            next.session.suspension = Some(Suspension {
                reason: format!("task {id} failed {attempts} times"),
                task_id: Some(id.to_string()),
            });
            next.touch();
            Transition::stay(next).emit(OutboundEvent::Error {
                message: format!(
                    "Task {id} failed after {attempts} attempts: {}. Tell me how to proceed.",
                    detail.message
                ),
                task_id: Some(id.to_string()),
                file: detail.file,
                line: detail.line,
            })
        }
    };
    Ok((t, outcome))
}
