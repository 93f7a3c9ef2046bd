//! Session registry: one spawned control loop per open project.

use crate::errors::OrchestratorError;
use crate::orchestrator::events::{Inbound, OutboundEvent};
use crate::orchestrator::session::Session;
use crate::orchestrator::{Capabilities, SessionSettings};
use crate::state::shared::SharedState;
use crate::state::store::StateStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const INBOX_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 256;

/// Client side of an open session.
pub struct SessionChannels {
    pub inbox: mpsc::Sender<Inbound>,
    pub events: mpsc::Receiver<OutboundEvent>,
}

struct SessionHandle {
    inbox: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
    join: JoinHandle<SharedState>,
}

pub struct Orchestrator {
    caps: Capabilities,
    store: Arc<dyn StateStore>,
    settings: SessionSettings,
    sessions: Mutex<HashMap<String, SessionHandle>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(caps: Capabilities, store: Arc<dyn StateStore>, settings: SessionSettings) -> Self {
        Self {
            caps,
            store,
            settings,
            sessions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Load (or create) the project's state and spawn its session.
    pub async fn open_session(&self, project_id: &str) -> Result<SessionChannels, OrchestratorError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(project_id)
            && !existing.join.is_finished()
        {
            return Err(OrchestratorError::Other(anyhow::anyhow!(
                "A session for project {} is already open",
                project_id
            )));
        }

        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| OrchestratorError::ProjectNotFound {
                id: project_id.to_string(),
            })?;
        let mut state = self
            .store
            .load_state(project_id)
            .await?
            .unwrap_or_else(|| SharedState::new(project_id));
        let recovered = state.recover_interrupted();
        if recovered > 0 {
            tracing::info!(project = %project_id, recovered, "reset interrupted tasks to pending");
        }

        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let cancel = self.shutdown.child_token();
        let session = Session::new(
            project,
            state,
            self.caps.clone(),
            self.settings.clone(),
            self.store.clone(),
            event_tx,
        )
        .with_cancellation(cancel.clone());
        let join = tokio::spawn(session.run(inbox_rx));

        sessions.insert(
            project_id.to_string(),
            SessionHandle {
                inbox: inbox_tx.clone(),
                cancel,
                join,
            },
        );
        tracing::debug!(project = %project_id, "session opened");
        Ok(SessionChannels {
            inbox: inbox_tx,
            events: event_rx,
        })
    }

    pub async fn send(&self, project_id: &str, inbound: Inbound) -> Result<(), OrchestratorError> {
        let inbox = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(project_id)
                .map(|h| h.inbox.clone())
                .ok_or_else(|| OrchestratorError::ProjectNotFound {
                    id: project_id.to_string(),
                })?
        };
        inbox
            .send(inbound)
            .await
            .map_err(|_| OrchestratorError::Cancelled)
    }

    /// Ids of sessions whose loop is still running.
    pub async fn active_sessions(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        let mut ids: Vec<String> = sessions
            .iter()
            .filter(|(_, h)| !h.join.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Cancel one session and wait for its final state.
    pub async fn close_session(
        &self,
        project_id: &str,
    ) -> Result<Option<SharedState>, OrchestratorError> {
        let handle = self.sessions.lock().await.remove(project_id);
        let Some(handle) = handle else {
            return Ok(None);
        };
        handle.cancel.cancel();
        drop(handle.inbox);
        let state = handle
            .join
            .await
            .map_err(|e| anyhow::anyhow!("Session task failed: {}", e))?;
        Ok(Some(state))
    }

    /// Cancel every session and wait for all of them.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<(String, SessionHandle)> =
            self.sessions.lock().await.drain().collect();
        for (id, handle) in handles {
            if let Err(e) = handle.join.await {
                tracing::warn!(project = %id, error = %e, "session task failed during shutdown");
            }
        }
    }
}
