//! Interruption classification.
//!
//! A user message that arrives mid-build is sorted into one of four intents.
//! Each intent maps to exactly one control-plane action (see [`Intent::action`]).
//! Classification failures never block a session: [`classify_or_unrelated`]
//! falls back to `Unrelated` and reports a warning.

use crate::errors::OrchestratorError;
use crate::llm::LlmClient;
use crate::phase::Phase;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// Small fix; stay in phase with one corrective task.
    MinorEdit,
    /// New scope; delta planning.
    Additive,
    /// Contradicts the spec; checkpoint and restart research.
    Breaking,
    /// Question or chit-chat; answer from state.
    Unrelated,
}

/// What the control plane does for an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionAction {
    CorrectiveTask,
    BumpToPlanning,
    CheckpointAndBumpToResearch,
    ReplyFromState,
}

impl Intent {
    pub const ALL: [Intent; 4] = [
        Intent::MinorEdit,
        Intent::Additive,
        Intent::Breaking,
        Intent::Unrelated,
    ];

    pub fn action(self) -> InterruptionAction {
        match self {
            Intent::MinorEdit => InterruptionAction::CorrectiveTask,
            Intent::Additive => InterruptionAction::BumpToPlanning,
            Intent::Breaking => InterruptionAction::CheckpointAndBumpToResearch,
            Intent::Unrelated => InterruptionAction::ReplyFromState,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::MinorEdit => "MINOR_EDIT",
            Intent::Additive => "ADDITIVE",
            Intent::Breaking => "BREAKING",
            Intent::Unrelated => "UNRELATED",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = OrchestratorError;

    /// Accepts the label alone or embedded in a short reply
    /// (`"BREAKING"`, `"minor_edit."`, `"Answer: ADDITIVE"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase().replace([' ', '-'], "_");
        let found: Vec<Intent> = Intent::ALL
            .into_iter()
            .filter(|i| upper.contains(i.as_str()))
            .collect();
        match found.as_slice() {
            [one] => Ok(*one),
            [] => Err(OrchestratorError::Classification(format!(
                "unrecognized label '{}'",
                s.trim()
            ))),
            _ => Err(OrchestratorError::Classification(format!(
                "ambiguous label '{}'",
                s.trim()
            ))),
        }
    }
}

#[async_trait]
pub trait InterruptionClassifier: Send + Sync {
    /// `summary` is the condensed shared-state view (see `SharedState::summary`).
    async fn classify(
        &self,
        message: &str,
        phase: Phase,
        summary: &str,
    ) -> Result<Intent, OrchestratorError>;
}

/// Classify, falling back to `Unrelated` on any error.
/// Returns the intent and, on fallback, a warning for the user.
pub async fn classify_or_unrelated(
    classifier: &dyn InterruptionClassifier,
    message: &str,
    phase: Phase,
    summary: &str,
) -> (Intent, Option<String>) {
    match classifier.classify(message, phase, summary).await {
        Ok(intent) => (intent, None),
        Err(e) => {
            tracing::warn!(error = %e, "classification failed, treating message as unrelated");
            (
                Intent::Unrelated,
                Some(format!(
                    "Couldn't tell what kind of change that was ({e}); treating it as a question."
                )),
            )
        }
    }
}

const CLASSIFY_SYSTEM: &str = "You classify user messages sent to a backend-generation assistant \
while it is building. Reply with exactly one word.";

/// Classifier backed by an LLM prompt.
pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn prompt(message: &str, phase: Phase, summary: &str) -> String {
        format!(
            "Current phase: {phase}\n\
             Project state: {summary}\n\n\
             User message: \"{message}\"\n\n\
             Classify the message as one of:\n\
             - MINOR_EDIT: a small fix or tweak to what is already built (rename, change a type, adjust a response)\n\
             - ADDITIVE: new scope that extends the project without contradicting it (a new entity, endpoint or feature)\n\
             - BREAKING: contradicts decisions already made and requires rethinking the spec (different database, remove core entity, change the domain)\n\
             - UNRELATED: a question or comment that needs no code change\n\n\
             Reply with one of MINOR_EDIT, ADDITIVE, BREAKING, UNRELATED."
        )
    }
}

#[async_trait]
impl InterruptionClassifier for LlmClassifier {
    async fn classify(
        &self,
        message: &str,
        phase: Phase,
        summary: &str,
    ) -> Result<Intent, OrchestratorError> {
        let reply = self
            .llm
            .complete(CLASSIFY_SYSTEM, &Self::prompt(message, phase, summary))
            .await
            .map_err(|e| OrchestratorError::Classification(format!("{e:#}")))?;
        reply.parse()
    }
}
