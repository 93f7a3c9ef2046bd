//! Sequential task scheduler.
//!
//! Picks the next runnable task from a manifest and applies task outcomes to
//! the shared state: success marks the task done, failure re-enqueues it until
//! the attempt budget is spent and then escalates.

use crate::state::shared::SharedState;
use crate::state::task::{AgentError, AgentResult, Task, TaskManifest, TaskStatus};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What happens to a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Back to `pending`; `attempt` failures so far.
    Retry { attempt: u32 },
    /// Budget spent. The task is `failed` and scheduling halts.
    Escalate { attempts: u32 },
}

/// Where the manifest stands, from the scheduler's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleStatus {
    NoManifest,
    Runnable(String),
    /// A task is mid-dispatch.
    Busy(String),
    AllDone,
    /// Nothing runnable; these tasks failed and block the rest.
    Blocked { failed: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct TaskScheduler {
    max_attempts: u32,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl TaskScheduler {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Lowest manifest-order pending task whose dependencies are all completed.
    pub fn next_runnable<'a>(
        &self,
        manifest: &'a TaskManifest,
        completed: &BTreeSet<String>,
    ) -> Option<&'a Task> {
        manifest.tasks.iter().find(|t| {
            t.status == TaskStatus::Pending && t.depends_on.iter().all(|d| completed.contains(d))
        })
    }

    pub fn status(&self, state: &SharedState) -> ScheduleStatus {
        let Some(manifest) = state.manifest.as_ref() else {
            return ScheduleStatus::NoManifest;
        };
        if let Some(running) = manifest
            .tasks
            .iter()
            .find(|t| t.status == TaskStatus::Running)
        {
            return ScheduleStatus::Busy(running.id.clone());
        }
        if let Some(task) = self.next_runnable(manifest, &state.completed_tasks) {
            return ScheduleStatus::Runnable(task.id.clone());
        }
        if manifest.all_done() {
            return ScheduleStatus::AllDone;
        }
        ScheduleStatus::Blocked {
            failed: manifest
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .map(|t| t.id.clone())
                .collect(),
        }
    }

    pub fn mark_running(&self, state: &mut SharedState, id: &str) -> Result<()> {
        let task = manifest_task(state, id)?;
        if task.status != TaskStatus::Pending {
            bail!("Task '{}' is {:?}, not pending", id, task.status);
        }
        task.status = TaskStatus::Running;
        state.touch();
        Ok(())
    }

    /// Cancelled dispatch: the task goes back to `pending` and nothing is merged.
    pub fn release(&self, state: &mut SharedState, id: &str) -> Result<()> {
        let task = manifest_task(state, id)?;
        if task.status == TaskStatus::Running {
            task.status = TaskStatus::Pending;
        }
        state.touch();
        Ok(())
    }

    pub fn record_success(
        &self,
        state: &mut SharedState,
        id: &str,
        result: &AgentResult,
    ) -> Result<()> {
        let task = manifest_task(state, id)?;
        task.status = TaskStatus::Done;
        state.completed_tasks.insert(id.to_string());
        state
            .files_created
            .extend(result.files_touched.iter().cloned());
        state.touch();
        Ok(())
    }

    /// Record the error, then retry or escalate.
    pub fn record_failure(
        &self,
        state: &mut SharedState,
        id: &str,
        error: AgentError,
    ) -> Result<FailureOutcome> {
        let task = manifest_task(state, id)?;
        let outcome = self.register_failure(task);
        state.errors.push(error);
        state.touch();
        Ok(outcome)
    }

    /// Apply one failed attempt to a task.
    pub fn register_failure(&self, task: &mut Task) -> FailureOutcome {
        task.retries += 1;
        if task.retries < self.max_attempts {
            task.status = TaskStatus::Pending;
            FailureOutcome::Retry {
                attempt: task.retries,
            }
        } else {
            task.status = TaskStatus::Failed;
            FailureOutcome::Escalate {
                attempts: task.retries,
            }
        }
    }
}

fn manifest_task<'a>(state: &'a mut SharedState, id: &str) -> Result<&'a mut Task> {
    state
        .manifest
        .as_mut()
        .and_then(|m| m.get_mut(id))
        .ok_or_else(|| anyhow::anyhow!("Task '{}' is not in the manifest", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::task::{ErrorDetail, ErrorKind, TaskRole};

    fn task(id: &str, deps: Vec<&str>) -> Task {
        Task::new(
            id,
            TaskRole::Api,
            id,
            deps.into_iter().map(String::from).collect(),
        )
    }

    fn state(tasks: Vec<Task>) -> SharedState {
        let mut state = SharedState::new("p");
        state.manifest = Some(TaskManifest::new(tasks));
        state
    }

    fn run_to_completion(scheduler: &TaskScheduler, state: &mut SharedState) -> Vec<String> {
        let mut order = Vec::new();
        while let ScheduleStatus::Runnable(id) = scheduler.status(state) {
            scheduler.mark_running(state, &id).unwrap();
            scheduler
                .record_success(state, &id, &AgentResult::success(vec![]))
                .unwrap();
            order.push(id);
        }
        order
    }

    #[test]
    fn diamond_runs_in_manifest_order() {
        let scheduler = TaskScheduler::default();
        let mut state = state(vec![
            task("t1", vec![]),
            task("t2", vec!["t1"]),
            task("t3", vec!["t1"]),
            task("t4", vec!["t2", "t3"]),
        ]);
        let order = run_to_completion(&scheduler, &mut state);
        assert_eq!(order, vec!["t1", "t2", "t3", "t4"]);
        assert_eq!(scheduler.status(&state), ScheduleStatus::AllDone);
    }

    #[test]
    fn lowest_manifest_order_wins_among_runnable() {
        let scheduler = TaskScheduler::default();
        let mut state = state(vec![
            task("a", vec!["c"]),
            task("b", vec![]),
            task("c", vec![]),
        ]);
        let order = run_to_completion(&scheduler, &mut state);
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn no_pending_tasks_means_no_dispatch() {
        let scheduler = TaskScheduler::default();
        let mut state = state(vec![task("t1", vec![])]);
        run_to_completion(&scheduler, &mut state);

        let before = state.clone();
        assert!(
            scheduler
                .next_runnable(state.manifest.as_ref().unwrap(), &state.completed_tasks)
                .is_none()
        );
        assert_eq!(state, before);
    }

    #[test]
    fn running_task_makes_scheduler_busy() {
        let scheduler = TaskScheduler::default();
        let mut state = state(vec![task("t1", vec![]), task("t2", vec![])]);
        scheduler.mark_running(&mut state, "t1").unwrap();
        assert_eq!(scheduler.status(&state), ScheduleStatus::Busy("t1".into()));
        assert!(scheduler.mark_running(&mut state, "t1").is_err());

        scheduler.release(&mut state, "t1").unwrap();
        assert_eq!(
            scheduler.status(&state),
            ScheduleStatus::Runnable("t1".into())
        );
    }

    #[test]
    fn three_failures_escalate() {
        let scheduler = TaskScheduler::default();
        let mut state = state(vec![task("t6", vec![]), task("t7", vec!["t6"])]);
        let err = || {
            AgentError::for_task(
                &task("t6", vec![]),
                ErrorDetail {
                    message: "boom".into(),
                    ..Default::default()
                },
            )
        };

        let mut outcomes = Vec::new();
        for _ in 0..3 {
            scheduler.mark_running(&mut state, "t6").unwrap();
            outcomes.push(scheduler.record_failure(&mut state, "t6", err()).unwrap());
        }
        assert_eq!(
            outcomes,
            vec![
                FailureOutcome::Retry { attempt: 1 },
                FailureOutcome::Retry { attempt: 2 },
                FailureOutcome::Escalate { attempts: 3 },
            ]
        );
        assert_eq!(state.task("t6").unwrap().status, TaskStatus::Failed);
        assert_eq!(state.errors.len(), 3);
        assert_eq!(state.errors[0].kind, ErrorKind::Agent);
        assert_eq!(
            scheduler.status(&state),
            ScheduleStatus::Blocked {
                failed: vec!["t6".into()]
            }
        );
    }

    #[test]
    fn success_merges_files() {
        let scheduler = TaskScheduler::default();
        let mut state = state(vec![task("t1", vec![])]);
        scheduler.mark_running(&mut state, "t1").unwrap();
        scheduler
            .record_success(
                &mut state,
                "t1",
                &AgentResult::success(vec!["app/main.py".into()]),
            )
            .unwrap();
        assert!(state.files_created.contains("app/main.py"));
        assert!(state.completed_tasks.contains("t1"));
    }

    #[test]
    fn unknown_task_is_an_error() {
        let scheduler = TaskScheduler::default();
        let mut state = state(vec![]);
        assert!(scheduler.mark_running(&mut state, "ghost").is_err());
    }
}
