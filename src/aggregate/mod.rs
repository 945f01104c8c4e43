//! Run-scoped accumulation of normalized events into rich content.
//!
//! One [`RichContentAggregator`] exists per turn and is driven by a single
//! consumer. It never re-orders event processing; only the non-text parts
//! are sorted by timestamp when [`RichContentAggregator::build_content`]
//! renders them.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::engine::RawEvent;
use crate::normalize::{normalize, tool_subtype, EventKind, NormalizedEvent};
use crate::types::{
    AgentEventPart, AgentEventType, ContentPart, ReasoningPart, ToolCallPart, ToolCallStatus,
};

/// Display cap for serialized tool results.
pub const MAX_TOOL_RESULT_CHARS: usize = 10_000;

const TOOL_ID_KEYS: [&str; 4] = ["toolUseId", "tool_use_id", "tool_call_id", "id"];
const NESTED_RESULT_KEYS: [&str; 3] = ["result", "toolResult", "content"];
const AGENT_ID_KEYS: [&str; 4] = ["node_id", "node_name", "agent_name", "agent"];
const HANDOFF_MESSAGE_KEYS: [&str; 3] = ["message", "handoff_message", "reason"];

fn thinking_span_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)<(?:thinking|think)>(.*?)</(?:thinking|think)>")
            .expect("thinking span regex must compile")
    })
}

#[derive(Debug, Clone)]
struct Tracked<T> {
    seq: u64,
    part: T,
}

/// Accumulates normalized events into an ordered [`ContentPart`] list.
#[derive(Debug, Default)]
pub struct RichContentAggregator {
    text: String,
    tool_calls: Vec<Tracked<ToolCallPart>>,
    tool_index: HashMap<String, usize>,
    reasoning: Vec<Tracked<ReasoningPart>>,
    agent_events: Vec<Tracked<AgentEventPart>>,
    seen_reasoning: HashSet<String>,
    current_agent: Option<String>,
    last_tool_call_id: Option<String>,
    next_seq: u64,
}

impl RichContentAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event; returns whether the rendered content changed.
    pub fn process(&mut self, event: &NormalizedEvent) -> bool {
        match event.kind {
            EventKind::MultiAgent => self.handle_multiagent(event),
            EventKind::Tool => {
                let Some(payload) = event.payload.as_ref() else {
                    return false;
                };
                match event.subtype() {
                    Some(tool_subtype::START) => self.handle_tool_start(payload),
                    Some(tool_subtype::RESULT) => self.handle_tool_result(payload),
                    _ => false,
                }
            }
            EventKind::Text => self.handle_text(event.text().unwrap_or_default()),
            EventKind::Reasoning => {
                let signature = event
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("signature"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                self.record_reasoning(event.text().unwrap_or_default(), signature)
            }
            _ => false,
        }
    }

    /// Mark every tool call still running as incomplete.
    ///
    /// Called once the engine stream has ended; returns how many changed.
    pub fn finish(&mut self) -> usize {
        let mut changed = 0;
        for tracked in &mut self.tool_calls {
            if tracked.part.status == ToolCallStatus::Running {
                tracked.part.status = ToolCallStatus::Incomplete;
                changed += 1;
            }
        }
        changed
    }

    /// Render the current content without mutating state.
    ///
    /// The merged text comes first; reasoning, tool-call and agent-event
    /// parts follow in timestamp order, ties kept in insertion order.
    pub fn build_content(&self) -> Vec<ContentPart> {
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(ContentPart::text(self.text.clone()));
        }

        let mut ordered: Vec<(DateTime<Utc>, u64, ContentPart)> = Vec::with_capacity(
            self.reasoning.len() + self.tool_calls.len() + self.agent_events.len(),
        );
        ordered.extend(self.reasoning.iter().map(|t| {
            (t.part.timestamp, t.seq, ContentPart::Reasoning(t.part.clone()))
        }));
        ordered.extend(self.tool_calls.iter().map(|t| {
            (t.part.timestamp, t.seq, ContentPart::ToolCall(t.part.clone()))
        }));
        ordered.extend(self.agent_events.iter().map(|t| {
            (t.part.timestamp, t.seq, ContentPart::AgentEvent(t.part.clone()))
        }));
        ordered.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        parts.extend(ordered.into_iter().map(|(_, _, part)| part));
        parts
    }

    /// Full text buffer so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_call(&self, tool_call_id: &str) -> Option<&ToolCallPart> {
        self.tool_index
            .get(tool_call_id)
            .map(|&idx| &self.tool_calls[idx].part)
    }

    pub fn current_agent(&self) -> Option<&str> {
        self.current_agent.as_deref()
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn handle_multiagent(&mut self, event: &NormalizedEvent) -> bool {
        let Some(payload) = event.payload.as_ref() else {
            return false;
        };
        match event.subtype() {
            Some("node_start") => {
                let agent = agent_id(payload).unwrap_or_else(|| "unknown".to_string());
                self.push_agent_event(AgentEventPart {
                    agent_name: agent.clone(),
                    event_type: AgentEventType::Start,
                    from_agents: Vec::new(),
                    to_agents: Vec::new(),
                    handoff_message: None,
                    timestamp: Utc::now(),
                });
                self.current_agent = Some(agent);
                true
            }
            Some("node_stop") => {
                // The start record stays; completion renders as its own part.
                let agent = agent_id(payload).unwrap_or_else(|| "unknown".to_string());
                self.push_agent_event(AgentEventPart {
                    agent_name: agent.clone(),
                    event_type: AgentEventType::Complete,
                    from_agents: Vec::new(),
                    to_agents: Vec::new(),
                    handoff_message: None,
                    timestamp: Utc::now(),
                });
                if self.current_agent.as_deref() == Some(agent.as_str()) {
                    self.current_agent = None;
                }
                true
            }
            Some("handoff") => {
                let from_agents = agent_list(payload, "from_node_ids", "from_node_id");
                let to_agents = agent_list(payload, "to_node_ids", "to_node_id");
                let handoff_message = HANDOFF_MESSAGE_KEYS
                    .iter()
                    .find_map(|key| payload.get(*key).and_then(Value::as_str))
                    .filter(|m| !m.is_empty())
                    .map(str::to_string);
                let agent_name = from_agents
                    .first()
                    .cloned()
                    .or_else(|| self.current_agent.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                self.push_agent_event(AgentEventPart {
                    agent_name,
                    event_type: AgentEventType::Handoff,
                    from_agents,
                    to_agents,
                    handoff_message,
                    timestamp: Utc::now(),
                });
                true
            }
            Some("node_stream") => {
                let Some(inner) = payload.get("event").filter(|v| v.is_object()) else {
                    return false;
                };
                // Nested events are attributed to the streaming node.
                let streaming_agent = agent_id(payload);
                let previous = match &streaming_agent {
                    Some(agent) => self.current_agent.replace(agent.clone()),
                    None => self.current_agent.clone(),
                };
                let mut changed = false;
                for nested in normalize(&RawEvent::from_value(inner.clone())) {
                    changed |= self.process(&nested);
                }
                if streaming_agent.is_some() {
                    self.current_agent = previous;
                }
                changed
            }
            _ => false,
        }
    }

    fn push_agent_event(&mut self, part: AgentEventPart) {
        let seq = self.next_seq();
        self.agent_events.push(Tracked { seq, part });
    }

    fn handle_tool_start(&mut self, payload: &Value) -> bool {
        let Some(name) = payload.get("name").and_then(Value::as_str) else {
            return false;
        };
        let tool_call_id = explicit_tool_id(payload).unwrap_or_else(|| format!("tool-{}", self.next_seq));
        let (args, args_text) = tool_arguments(payload.get("input"));

        if let Some(&idx) = self.tool_index.get(&tool_call_id) {
            let part = &mut self.tool_calls[idx].part;
            if part.status != ToolCallStatus::Running {
                return false;
            }
            let changed = part.tool_name != name || part.args_text != args_text;
            part.tool_name = name.to_string();
            part.args = args;
            part.args_text = args_text;
            part.calling_agent = self.current_agent.clone();
            self.last_tool_call_id = Some(tool_call_id);
            return changed;
        }

        let seq = self.next_seq();
        self.tool_calls.push(Tracked {
            seq,
            part: ToolCallPart {
                tool_call_id: tool_call_id.clone(),
                tool_name: name.to_string(),
                args,
                args_text,
                result: None,
                result_truncated: false,
                is_error: false,
                status: ToolCallStatus::Running,
                timestamp: Utc::now(),
                calling_agent: self.current_agent.clone(),
            },
        });
        self.tool_index
            .insert(tool_call_id.clone(), self.tool_calls.len() - 1);
        self.last_tool_call_id = Some(tool_call_id);
        true
    }

    fn handle_tool_result(&mut self, payload: &Value) -> bool {
        let tool_call_id = explicit_tool_id(payload)
            .or_else(|| {
                NESTED_RESULT_KEYS
                    .iter()
                    .filter_map(|key| payload.get(*key))
                    .filter(|nested| nested.is_object())
                    .find_map(explicit_tool_id)
            })
            .or_else(|| self.outstanding_tool_call());
        let Some(tool_call_id) = tool_call_id else {
            tracing::debug!("tool result without a correlatable tool call");
            return false;
        };
        let Some(&idx) = self.tool_index.get(&tool_call_id) else {
            tracing::debug!(tool_call_id = %tool_call_id, "tool result for unknown tool call");
            return false;
        };

        let part = &mut self.tool_calls[idx].part;
        if part.status != ToolCallStatus::Running {
            return false;
        }
        let result_value = payload
            .get("content")
            .or_else(|| payload.get("result"))
            .unwrap_or(payload);
        let (display, truncated) = truncate_chars(display_result(result_value), MAX_TOOL_RESULT_CHARS);
        part.result = Some(display);
        part.result_truncated = truncated;
        part.is_error = result_is_error(payload);
        part.status = ToolCallStatus::Complete;
        true
    }

    /// Last-writer fallback: the most recently started call, if still running.
    ///
    /// With several calls outstanding and no ids from the engine, a result
    /// can be attributed to the wrong call.
    fn outstanding_tool_call(&self) -> Option<String> {
        let id = self.last_tool_call_id.as_ref()?;
        let idx = *self.tool_index.get(id)?;
        (self.tool_calls[idx].part.status == ToolCallStatus::Running).then(|| id.clone())
    }

    fn handle_text(&mut self, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }
        self.text.push_str(delta);

        let spans: Vec<String> = thinking_span_regex()
            .captures_iter(&self.text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect();
        for span in spans {
            self.record_reasoning(&span, None);
        }
        true
    }

    fn record_reasoning(&mut self, text: &str, signature: Option<String>) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }
        if !self.seen_reasoning.insert(content_hash(trimmed)) {
            return false;
        }
        let seq = self.next_seq();
        self.reasoning.push(Tracked {
            seq,
            part: ReasoningPart {
                text: trimmed.to_string(),
                signature,
                timestamp: Utc::now(),
            },
        });
        true
    }
}

fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

pub(crate) fn explicit_tool_id(value: &Value) -> Option<String> {
    TOOL_ID_KEYS
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn agent_id(payload: &Value) -> Option<String> {
    AGENT_ID_KEYS
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn agent_list(payload: &Value, list_key: &str, single_key: &str) -> Vec<String> {
    if let Some(items) = payload.get(list_key).and_then(Value::as_array) {
        return items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    payload
        .get(single_key)
        .and_then(Value::as_str)
        .map(|id| vec![id.to_string()])
        .unwrap_or_default()
}

/// Structured arguments plus their display text.
///
/// Engines stream tool input as partial JSON text; unparseable text is kept
/// as a string value until it completes.
fn tool_arguments(input: Option<&Value>) -> (Value, String) {
    match input {
        None | Some(Value::Null) => (Value::Object(Default::default()), "{}".to_string()),
        Some(Value::String(text)) => {
            let args = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()));
            (args, text.clone())
        }
        Some(other) => {
            let text = serde_json::to_string(other).unwrap_or_else(|_| other.to_string());
            (other.clone(), text)
        }
    }
}

fn display_result(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(blocks) if !blocks.is_empty() && blocks.iter().all(|b| b.get("text").is_some_and(Value::is_string)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Error flag of a tool result: `status == "error"`, `is_error`, or a truthy `error`.
pub(crate) fn result_is_error(payload: &Value) -> bool {
    if payload.get("status").and_then(Value::as_str) == Some("error") {
        return true;
    }
    if payload.get("is_error").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    match payload.get("error") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(message)) => !message.is_empty(),
        Some(_) => true,
    }
}

fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (text[..byte_idx].to_string(), true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn feed(aggregator: &mut RichContentAggregator, value: Value) -> bool {
        let mut changed = false;
        for event in normalize(&RawEvent::from_value(value)) {
            changed |= aggregator.process(&event);
        }
        changed
    }

    fn tool_start(id: &str, name: &str) -> Value {
        json!({"current_tool_use": {"toolUseId": id, "name": name, "input": {"q": "rust"}}})
    }

    #[test]
    fn tool_start_then_result_completes_exactly_once() {
        let mut agg = RichContentAggregator::new();
        assert!(feed(&mut agg, tool_start("t1", "search")));
        assert_eq!(agg.tool_call("t1").unwrap().status, ToolCallStatus::Running);

        assert!(feed(&mut agg, json!({"tool_result": {"toolUseId": "t1", "status": "success", "content": [{"text": "found"}]}})));
        let part = agg.tool_call("t1").unwrap();
        assert_eq!(part.status, ToolCallStatus::Complete);
        assert_eq!(part.result.as_deref(), Some("found"));
        assert!(!part.is_error);

        assert!(!feed(&mut agg, json!({"tool_result": {"toolUseId": "t1", "content": "again"}})));
        assert_eq!(agg.tool_call("t1").unwrap().result.as_deref(), Some("found"));
        assert!(!feed(&mut agg, tool_start("t1", "search")));
    }

    #[test]
    fn repeated_tool_start_updates_running_call_in_place() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, json!({"current_tool_use": {"toolUseId": "t1", "name": "search", "input": "{\"q\": \"ru"}}));
        assert_eq!(agg.tool_call("t1").unwrap().args, json!("{\"q\": \"ru"));

        assert!(feed(&mut agg, json!({"current_tool_use": {"toolUseId": "t1", "name": "search", "input": "{\"q\": \"rust\"}"}})));
        let part = agg.tool_call("t1").unwrap();
        assert_eq!(part.args, json!({"q": "rust"}));
        assert_eq!(part.args_text, "{\"q\": \"rust\"}");
        assert_eq!(agg.build_content().len(), 1);
    }

    #[test]
    fn result_without_id_attaches_to_outstanding_call() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, tool_start("t1", "search"));
        assert!(feed(&mut agg, json!({"tool_result": {"content": "42", "status": "success"}})));
        let part = agg.tool_call("t1").unwrap();
        assert_eq!(part.status, ToolCallStatus::Complete);
        assert_eq!(part.result.as_deref(), Some("42"));
    }

    #[test]
    fn result_id_can_be_nested_in_result_object() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, tool_start("a", "first"));
        feed(&mut agg, tool_start("b", "second"));
        assert!(feed(&mut agg, json!({"tool_result": {"result": {"tool_use_id": "a", "value": 1}}})));
        assert_eq!(agg.tool_call("a").unwrap().status, ToolCallStatus::Complete);
        assert_eq!(agg.tool_call("b").unwrap().status, ToolCallStatus::Running);
    }

    #[test]
    fn error_results_set_error_flag() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, tool_start("t1", "shell"));
        feed(&mut agg, json!({"tool_result": {"toolUseId": "t1", "status": "error", "content": "exit 1"}}));
        assert!(agg.tool_call("t1").unwrap().is_error);
    }

    #[test]
    fn long_results_are_truncated_and_flagged() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, tool_start("t1", "read"));
        let long = "x".repeat(MAX_TOOL_RESULT_CHARS + 10);
        feed(&mut agg, json!({"tool_result": {"toolUseId": "t1", "content": long}}));
        let part = agg.tool_call("t1").unwrap();
        assert!(part.result_truncated);
        assert_eq!(part.result.as_ref().unwrap().chars().count(), MAX_TOOL_RESULT_CHARS);
    }

    #[test]
    fn repeated_thinking_span_yields_one_reasoning_part() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, json!({"data": "<thinking>plan the answer</thinking>"}));
        feed(&mut agg, json!({"data": "<thinking>plan the answer</thinking>"}));

        let reasoning: Vec<_> = agg
            .build_content()
            .into_iter()
            .filter_map(|p| p.as_reasoning().cloned())
            .collect();
        assert_eq!(reasoning.len(), 1);
        assert_eq!(reasoning[0].text, "plan the answer");
    }

    #[test]
    fn thinking_span_split_across_deltas_is_detected_once_closed() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, json!({"data": "<think>step one"}));
        assert!(agg.build_content().iter().all(|p| p.as_reasoning().is_none()));
        feed(&mut agg, json!({"data": " and two</think> answer"}));
        let content = agg.build_content();
        assert_eq!(content.iter().filter(|p| p.as_reasoning().is_some()).count(), 1);
        assert_eq!(content[0].as_text(), Some("<think>step one and two</think> answer"));
    }

    #[test]
    fn explicit_reasoning_is_deduplicated() {
        let mut agg = RichContentAggregator::new();
        assert!(feed(&mut agg, json!({"reasoning": true, "reasoningText": "hmm"})));
        assert!(!feed(&mut agg, json!({"reasoning": true, "reasoningText": "hmm"})));

        // A thinking span with the same content adds text but no new reasoning part.
        feed(&mut agg, json!({"data": "<thinking>hmm</thinking>"}));
        let reasoning = agg
            .build_content()
            .iter()
            .filter(|p| p.as_reasoning().is_some())
            .count();
        assert_eq!(reasoning, 1);
    }

    #[test]
    fn multi_agent_scenario_renders_in_timestamp_order() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, json!({"type": "multiagent_node_start", "node_id": "A"}));
        feed(&mut agg, json!({
            "type": "multiagent_node_stream",
            "node_id": "A",
            "event": {"current_tool_use": {"toolUseId": "1", "name": "lookup", "input": {}}}
        }));
        feed(&mut agg, json!({
            "type": "multiagent_node_stream",
            "node_id": "A",
            "event": {"tool_result": {"toolUseId": "1", "content": "ok"}}
        }));
        feed(&mut agg, json!({"type": "multiagent_node_stop", "node_id": "A"}));
        feed(&mut agg, json!({"type": "multiagent_node_start", "node_id": "B"}));
        feed(&mut agg, json!({
            "type": "multiagent_handoff",
            "from_node_ids": ["A"],
            "to_node_ids": ["B"],
            "message": "your turn"
        }));
        feed(&mut agg, json!({"data": "done"}));

        let content = agg.build_content();
        assert_eq!(content.len(), 6);
        assert_eq!(content[0].as_text(), Some("done"));

        let start_a = content[1].as_agent_event().unwrap();
        assert_eq!((start_a.agent_name.as_str(), start_a.event_type), ("A", AgentEventType::Start));

        let tool = content[2].as_tool_call().unwrap();
        assert_eq!(tool.calling_agent.as_deref(), Some("A"));
        assert_eq!(tool.status, ToolCallStatus::Complete);

        let complete_a = content[3].as_agent_event().unwrap();
        assert_eq!(
            (complete_a.agent_name.as_str(), complete_a.event_type),
            ("A", AgentEventType::Complete)
        );

        let start_b = content[4].as_agent_event().unwrap();
        assert_eq!((start_b.agent_name.as_str(), start_b.event_type), ("B", AgentEventType::Start));

        let handoff = content[5].as_agent_event().unwrap();
        assert_eq!(handoff.event_type, AgentEventType::Handoff);
        assert_eq!(handoff.handoff_message.as_deref(), Some("your turn"));
    }

    #[test]
    fn text_part_comes_first_and_is_merged() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, tool_start("t1", "search"));
        feed(&mut agg, json!({"data": "Hello, "}));
        feed(&mut agg, json!({"data": "world"}));
        let content = agg.build_content();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0].as_text(), Some("Hello, world"));
        assert!(content[1].as_tool_call().is_some());
    }

    #[test]
    fn build_content_is_idempotent() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, json!({"data": "a"}));
        feed(&mut agg, tool_start("t1", "search"));
        assert_eq!(agg.build_content(), agg.build_content());
    }

    #[test]
    fn node_stop_without_start_emits_standalone_complete() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, json!({"type": "multiagent_node_stop", "node_id": "ghost"}));
        let events: Vec<_> = agg
            .build_content()
            .into_iter()
            .filter_map(|p| p.as_agent_event().cloned())
            .collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].agent_name, "ghost");
        assert_eq!(events[0].event_type, AgentEventType::Complete);
    }

    #[test]
    fn handoff_message_uses_field_priority() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, json!({
            "type": "multiagent_handoff",
            "from_node_ids": ["a"],
            "to_node_ids": ["b", "c"],
            "handoff_message": "second choice",
            "reason": "third choice"
        }));
        let content = agg.build_content();
        let event = content[0].as_agent_event().unwrap();
        assert_eq!(event.event_type, AgentEventType::Handoff);
        assert_eq!(event.to_agents, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(event.handoff_message.as_deref(), Some("second choice"));
    }

    #[test]
    fn node_stream_events_are_attributed_to_streaming_node() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, json!({"type": "multiagent_node_start", "node_id": "planner"}));
        assert!(feed(&mut agg, json!({
            "type": "multiagent_node_stream",
            "node_id": "coder",
            "event": {"current_tool_use": {"toolUseId": "t9", "name": "edit", "input": {}}}
        })));
        assert_eq!(agg.tool_call("t9").unwrap().calling_agent.as_deref(), Some("coder"));
        assert_eq!(agg.current_agent(), Some("planner"));
    }

    #[test]
    fn finish_marks_running_calls_incomplete() {
        let mut agg = RichContentAggregator::new();
        feed(&mut agg, tool_start("t1", "search"));
        feed(&mut agg, tool_start("t2", "fetch"));
        feed(&mut agg, json!({"tool_result": {"toolUseId": "t2", "content": "ok"}}));
        assert_eq!(agg.finish(), 1);
        assert_eq!(agg.tool_call("t1").unwrap().status, ToolCallStatus::Incomplete);
        assert_eq!(agg.tool_call("t2").unwrap().status, ToolCallStatus::Complete);
    }

    #[test]
    fn lifecycle_and_unknown_events_do_not_change_content() {
        let mut agg = RichContentAggregator::new();
        assert!(!feed(&mut agg, json!({"init_event_loop": true})));
        assert!(!feed(&mut agg, json!({"mystery": 1})));
        assert!(agg.build_content().is_empty());
    }
}
