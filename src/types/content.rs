//! Rich content model rendered to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::context::ExecutionMode;

/// One renderable unit of a turn's output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall(ToolCallPart),
    Reasoning(ReasoningPart),
    AgentEvent(AgentEventPart),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Timestamp used to order non-text parts; text parts have none.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Text { .. } => None,
            Self::ToolCall(part) => Some(part.timestamp),
            Self::Reasoning(part) => Some(part.timestamp),
            Self::AgentEvent(part) => Some(part.timestamp),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallPart> {
        match self {
            Self::ToolCall(part) => Some(part),
            _ => None,
        }
    }

    pub fn as_reasoning(&self) -> Option<&ReasoningPart> {
        match self {
            Self::Reasoning(part) => Some(part),
            _ => None,
        }
    }

    pub fn as_agent_event(&self) -> Option<&AgentEventPart> {
        match self {
            Self::AgentEvent(part) => Some(part),
            _ => None,
        }
    }
}

/// Lifecycle of a tool call as shown in the UI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Complete,
    /// The stream ended before a result arrived.
    Incomplete,
}

/// A tool invocation and, once available, its result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub args_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub result_truncated: bool,
    #[serde(default)]
    pub is_error: bool,
    pub status: ToolCallStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calling_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningPart {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentEventType {
    Start,
    Complete,
    Handoff,
}

/// Multi-agent activity: an agent starting, finishing, or handing off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEventPart {
    pub agent_name: String,
    pub event_type: AgentEventType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Resolved run information attached to the terminal chunk only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    pub trace_id: String,
    pub session_id: String,
    pub run_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
}

/// One emission of the current content list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub content: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RunMetadata>,
}

impl Chunk {
    /// An intermediate chunk; never carries metadata.
    pub fn partial(content: Vec<ContentPart>) -> Self {
        Self {
            content,
            metadata: None,
        }
    }

    /// The terminal chunk of a turn.
    pub fn terminal(content: Vec<ContentPart>, metadata: RunMetadata) -> Self {
        Self {
            content,
            metadata: Some(metadata),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.metadata.is_some()
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("")
    }

    /// Render as one newline-terminated JSON record.
    pub fn to_ndjson_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_parts_use_kebab_case_tags() {
        let part = ContentPart::ToolCall(ToolCallPart {
            tool_call_id: "t1".into(),
            tool_name: "search".into(),
            args: serde_json::json!({"q": "rust"}),
            args_text: r#"{"q":"rust"}"#.into(),
            result: None,
            result_truncated: false,
            is_error: false,
            status: ToolCallStatus::Running,
            timestamp: Utc::now(),
            calling_agent: None,
        });
        let value = serde_json::to_value(&part).expect("serialize part");
        assert_eq!(value["type"], "tool-call");
        assert_eq!(value["status"], "running");
        assert!(value.get("calling_agent").is_none());
    }

    #[test]
    fn partial_chunk_line_has_no_metadata() {
        let line = Chunk::partial(vec![ContentPart::text("hi")])
            .to_ndjson_line()
            .expect("serialize chunk");
        assert!(line.ends_with('\n'));
        assert!(!line.contains("metadata"));
        assert!(line.contains(r#""type":"text""#));
    }
}
