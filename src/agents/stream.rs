//! Parsing of the Claude CLI `stream-json` output.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// One line of `--output-format stream-json`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Assistant {
        message: AssistantMessage,
    },
    User {
        #[serde(default)]
        message: Option<UserMessage>,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    System {
        #[serde(default)]
        subtype: String,
    },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: Vec<UserContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    ToolUse {
        name: String,
        input: Value,
        #[serde(default)]
        id: String,
    },
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Parse a stream line. Non-JSON lines yield `None`.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    serde_json::from_str(line).ok()
}

/// File a tool call writes, relative to `workdir` when it lies inside it.
pub fn touched_file(tool: &str, input: &Value, workdir: &Path) -> Option<String> {
    if !matches!(tool, "Write" | "Edit" | "MultiEdit" | "NotebookEdit") {
        return None;
    }
    let raw = input
        .get("file_path")
        .or_else(|| input.get("notebook_path"))
        .and_then(Value::as_str)?;
    let path = Path::new(raw);
    let relative = path.strip_prefix(workdir).unwrap_or(path);
    Some(relative.to_string_lossy().replace('\\', "/"))
}

/// Short human-readable description of a tool call.
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let str_field = |key: &str| input.get(key).and_then(Value::as_str);
    match name {
        "Read" => format!("Reading {}", str_field("file_path").map(shorten_path).unwrap_or_default()),
        "Write" => format!("Creating {}", str_field("file_path").map(shorten_path).unwrap_or_default()),
        "Edit" | "MultiEdit" => {
            format!("Editing {}", str_field("file_path").map(shorten_path).unwrap_or_default())
        }
        "Bash" => format!(
            "Running {}",
            str_field("command").map(|c| truncate(c, 50)).unwrap_or_default()
        ),
        "Glob" | "Grep" => format!(
            "Searching {}",
            str_field("pattern").map(|p| truncate(p, 30)).unwrap_or_default()
        ),
        _ => name.to_string(),
    }
}

/// Tool result content flattened to text, truncated.
pub fn result_text(content: &Value, max_len: usize) -> Option<String> {
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => return None,
        other => other.to_string(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| truncate(text, max_len))
}

fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
