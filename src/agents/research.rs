//! Research agent: turns conversation into a spec draft.

use crate::llm::LlmClient;
use crate::llm::json::parse_reply;
use crate::state::shared::{SharedState, Speaker};
use crate::state::spec::SpecUpdate;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// What the researcher wants to do next.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResearchReply {
    /// Ask the user something before updating the draft.
    Ask {
        question: String,
        #[serde(default)]
        options: Vec<String>,
    },
    /// Fold these details into the draft.
    Update { spec: SpecUpdate },
}

#[async_trait]
pub trait Researcher: Send + Sync {
    /// `message` is the latest user input; the conversation so far is in `state`.
    async fn step(&self, state: &SharedState, message: &str) -> Result<ResearchReply>;
}

const RESEARCH_SYSTEM: &str = "You are the requirements analyst of a backend generator. \
You turn a conversation into a structured spec for a REST API backed by a relational database. \
Reply with a single JSON object and nothing else.";

pub struct LlmResearcher {
    llm: Arc<dyn LlmClient>,
}

impl LlmResearcher {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn prompt(state: &SharedState, message: &str) -> String {
        let draft = serde_json::to_string_pretty(&state.spec_draft).unwrap_or_default();
        let history: Vec<String> = state
            .conversation
            .iter()
            .rev()
            .take(20)
            .rev()
            .map(|t| {
                let who = match t.speaker {
                    Speaker::User => "user",
                    Speaker::Assistant => "assistant",
                };
                format!("{who}: {}", t.text)
            })
            .collect();
        format!(
            "## CURRENT DRAFT\n```json\n{draft}\n```\n\n\
             ## CONVERSATION\n{history}\n\n\
             ## LATEST MESSAGE\n{message}\n\n\
             Extract every entity (with typed fields: string, integer, float, boolean, datetime, text), \
             relationship (one_to_one, one_to_many, many_to_one, many_to_many), database, auth \
             requirement and extra requirement the user has stated.\n\
             If something essential is ambiguous, reply:\n\
             {{\"action\": \"ask\", \"question\": \"...\", \"options\": [\"...\"]}}\n\
             Otherwise reply with the details to merge into the draft:\n\
             {{\"action\": \"update\", \"spec\": {{\"project_name\": \"...\", \"entities\": [...], \
             \"relationships\": [...], \"database\": \"postgresql\", \"auth_required\": false, \
             \"extra_requirements\": []}}}}",
            history = history.join("\n"),
        )
    }
}

#[async_trait]
impl Researcher for LlmResearcher {
    async fn step(&self, state: &SharedState, message: &str) -> Result<ResearchReply> {
        let reply = self
            .llm
            .complete(RESEARCH_SYSTEM, &Self::prompt(state, message))
            .await?;
        parse_reply(&reply, "research")
    }
}
