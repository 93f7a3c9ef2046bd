//! LLM access for the classifier, researcher and planner.
//!
//! Every caller goes through [`LlmClient`] so tests can substitute canned
//! replies. Two backends ship: an OpenAI-compatible HTTP endpoint (OpenRouter
//! by default) and the local `claude` CLI.

pub mod json;

use crate::config::{Config, LlmProvider};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single-turn completion: system instructions plus one user prompt.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Build the client selected in config.
pub fn client_from_config(config: &Config) -> Result<Arc<dyn LlmClient>> {
    let llm = &config.toml.llm;
    let timeout = Duration::from_secs(llm.timeout_secs);
    match llm.provider {
        LlmProvider::Openrouter => {
            let key = config.api_key().with_context(|| {
                format!("{} must be set for the openrouter provider", llm.api_key_env)
            })?;
            Ok(Arc::new(OpenRouterClient::new(
                &llm.base_url,
                &llm.model,
                &key,
                timeout,
            )?))
        }
        LlmProvider::ClaudeCli => Ok(Arc::new(ClaudeCliClient::new(&llm.claude_cmd, timeout))),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct OpenRouterClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenRouterClient {
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("LLM request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("LLM endpoint returned {}: {}", status, body.trim());
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to decode LLM response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("LLM response contained no content")
    }
}

/// Runs `claude --print` with the prompt on stdin.
pub struct ClaudeCliClient {
    cmd: String,
    timeout: Duration,
}

impl ClaudeCliClient {
    pub fn new(cmd: &str, timeout: Duration) -> Self {
        Self {
            cmd: cmd.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl LlmClient for ClaudeCliClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let mut child = Command::new(&self.cmd)
            .args(["--print", "--output-format", "text", "--system-prompt", system])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.cmd))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await.context("Failed to close stdin")?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .with_context(|| format!("{} timed out after {:?}", self.cmd, self.timeout))?
            .context("Failed to wait for claude")?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.cmd,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_url() {
        let client = OpenRouterClient::new(
            "https://openrouter.ai/api/v1/",
            "m",
            "k",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.endpoint,
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[test]
    fn chat_response_decodes_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"ADDITIVE"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("ADDITIVE")
        );
    }

    #[tokio::test]
    async fn missing_cli_binary_is_an_error() {
        let client = ClaudeCliClient::new("/nonexistent/claude-binary", Duration::from_secs(1));
        assert!(client.complete("sys", "hi").await.is_err());
    }
}
