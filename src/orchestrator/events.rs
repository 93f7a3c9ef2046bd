//! Session protocol: outbound events and inbound signals.

use crate::phase::Phase;
use crate::state::task::TaskRole;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events emitted by a session to whoever is attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Phase or deployment info changed.
    StateUpdate {
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        swagger_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_url: Option<String>,
    },
    /// The session needs an answer before it can continue.
    AskUser {
        question: String,
        #[serde(default)]
        options: Vec<String>,
    },
    BuildComplete {
        swagger_url: String,
        api_url: String,
    },
    /// Unrecoverable or escalated failure.
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },
    /// Cancellation acknowledged.
    Stopped,
    /// Agent-level tool activity, passed through.
    ToolProgress {
        task_id: String,
        tool: String,
        arguments: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    PhaseTransition {
        from: Phase,
        to: Phase,
    },
    TaskStarted {
        task_id: String,
        role: TaskRole,
        description: String,
    },
    TaskCompleted {
        task_id: String,
        #[serde(default)]
        files: Vec<String>,
    },
    /// Plain assistant text.
    Message {
        text: String,
    },
    Warning {
        message: String,
    },
}

impl OutboundEvent {
    pub fn message(text: impl Into<String>) -> Self {
        OutboundEvent::Message { text: text.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        OutboundEvent::Warning {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            message: message.into(),
            task_id: None,
            file: None,
            line: None,
        }
    }

    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::StateUpdate { .. } => "state_update",
            OutboundEvent::AskUser { .. } => "ask_user",
            OutboundEvent::BuildComplete { .. } => "build_complete",
            OutboundEvent::Error { .. } => "error",
            OutboundEvent::Stopped => "stopped",
            OutboundEvent::ToolProgress { .. } => "tool_progress",
            OutboundEvent::PhaseTransition { .. } => "phase_transition",
            OutboundEvent::TaskStarted { .. } => "task_started",
            OutboundEvent::TaskCompleted { .. } => "task_completed",
            OutboundEvent::Message { .. } => "message",
            OutboundEvent::Warning { .. } => "warning",
        }
    }
}

/// What a client can send into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    UserMessage(String),
    Stop,
}

#[derive(Deserialize)]
struct InboundPayload {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl Inbound {
    /// Parse a client payload: `{"type": "stop"}` or `{"message": "..."}`.
    pub fn from_json(payload: &str) -> anyhow::Result<Self> {
        let parsed: InboundPayload = serde_json::from_str(payload)
            .map_err(|e| anyhow::anyhow!("Invalid inbound payload: {}", e))?;
        if parsed.kind.as_deref() == Some("stop") {
            return Ok(Inbound::Stop);
        }
        match parsed.message {
            Some(msg) if !msg.trim().is_empty() => Ok(Inbound::UserMessage(msg)),
            _ => anyhow::bail!("Inbound payload has neither a stop signal nor a message"),
        }
    }
}
