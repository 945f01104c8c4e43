//! Classification of raw engine events into a closed set of kinds.
//!
//! [`normalize`] is the only place that pattern-matches engine field names.
//! Everything downstream works on [`NormalizedEvent`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::{Display, EnumString};

use crate::engine::RawEvent;

/// Multi-agent envelope markers, without the optional `multiagent_` prefix.
pub const MULTIAGENT_MARKERS: [&str; 4] = ["node_start", "node_stream", "node_stop", "handoff"];

const MULTIAGENT_PREFIX: &str = "multiagent_";

/// Stable category of a normalized event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    Lifecycle,
    Text,
    Tool,
    ToolStream,
    Reasoning,
    Metrics,
    #[serde(rename = "multiagent")]
    #[strum(serialize = "multiagent")]
    MultiAgent,
    Unknown,
}

/// Subtypes for [`EventKind::Tool`].
pub mod tool_subtype {
    pub const START: &str = "start";
    pub const RESULT: &str = "result";
}

/// Subtypes for [`EventKind::Lifecycle`].
pub mod lifecycle_subtype {
    pub const INIT: &str = "init";
    pub const START: &str = "start";
    pub const FORCE_STOP: &str = "force_stop";
    pub const COMPLETE: &str = "complete";
}

/// A classified engine event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub raw: RawEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
}

impl NormalizedEvent {
    fn new(kind: EventKind, raw: &RawEvent) -> Self {
        Self {
            kind,
            raw: raw.clone(),
            payload: None,
            subtype: None,
        }
    }

    fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    pub fn is(&self, kind: EventKind, subtype: &str) -> bool {
        self.kind == kind && self.subtype() == Some(subtype)
    }

    /// Text payload of a `text` or `reasoning` event.
    pub fn text(&self) -> Option<&str> {
        self.payload.as_ref()?.get("text")?.as_str()
    }
}

/// Classify one raw event.
///
/// Multi-agent envelopes yield exactly one `multiagent` event. Any other
/// event decomposes in the fixed order lifecycle, text, reasoning, tool,
/// tool_stream, metrics; if nothing matches, a single `unknown` event
/// carries the raw payload.
pub fn normalize(raw: &RawEvent) -> Vec<NormalizedEvent> {
    if let Some(marker) = multiagent_marker(raw) {
        return vec![NormalizedEvent::new(EventKind::MultiAgent, raw)
            .with_subtype(marker)
            .with_payload(raw.to_value())];
    }

    let mut events = Vec::new();
    push_lifecycle(raw, &mut events);

    if let Some(text) = raw.str_field("data") {
        events.push(NormalizedEvent::new(EventKind::Text, raw).with_payload(json!({ "text": text })));
    }

    if raw.flag("reasoning") || raw.contains("reasoningText") {
        let text = raw.str_field("reasoningText").unwrap_or_default();
        let mut payload = json!({ "text": text });
        if let Some(signature) = raw.str_field("reasoning_signature") {
            payload["signature"] = Value::String(signature.to_string());
        }
        events.push(NormalizedEvent::new(EventKind::Reasoning, raw).with_payload(payload));
    }

    push_tool_events(raw, &mut events);

    if let Some(tool_stream) = raw.get("tool_stream_event").filter(|v| !v.is_null()) {
        events.push(NormalizedEvent::new(EventKind::ToolStream, raw).with_payload(tool_stream.clone()));
    }

    if let Some(result) = raw.get("result").filter(|r| r.get("metrics").is_some()) {
        let stop_reason = result
            .get("stop_reason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        events.push(
            NormalizedEvent::new(EventKind::Metrics, raw)
                .with_subtype(stop_reason)
                .with_payload(result.clone()),
        );
    }

    if events.is_empty() {
        events.push(NormalizedEvent::new(EventKind::Unknown, raw).with_payload(raw.to_value()));
    }
    events
}

fn multiagent_marker(raw: &RawEvent) -> Option<&'static str> {
    let marker = raw.str_field("type")?;
    let marker = marker.strip_prefix(MULTIAGENT_PREFIX).unwrap_or(marker);
    MULTIAGENT_MARKERS.into_iter().find(|known| *known == marker)
}

fn push_lifecycle(raw: &RawEvent, events: &mut Vec<NormalizedEvent>) {
    if raw.flag("init_event_loop") {
        events.push(
            NormalizedEvent::new(EventKind::Lifecycle, raw).with_subtype(lifecycle_subtype::INIT),
        );
    }
    if raw.flag("start") || raw.flag("start_event_loop") {
        events.push(
            NormalizedEvent::new(EventKind::Lifecycle, raw).with_subtype(lifecycle_subtype::START),
        );
    }
    if raw.flag("force_stop") {
        let reason = raw
            .get("force_stop_reason")
            .cloned()
            .unwrap_or(Value::Null);
        events.push(
            NormalizedEvent::new(EventKind::Lifecycle, raw)
                .with_subtype(lifecycle_subtype::FORCE_STOP)
                .with_payload(reason),
        );
    }
    if raw.flag("complete") || raw.contains("result") {
        let mut event = NormalizedEvent::new(EventKind::Lifecycle, raw)
            .with_subtype(lifecycle_subtype::COMPLETE);
        if let Some(result) = raw.get("result") {
            event = event.with_payload(result.clone());
        }
        events.push(event);
    }
}

fn push_tool_events(raw: &RawEvent, events: &mut Vec<NormalizedEvent>) {
    if let Some(tool_use) = raw.get("current_tool_use").filter(|v| has_tool_name(v)) {
        events.push(
            NormalizedEvent::new(EventKind::Tool, raw)
                .with_subtype(tool_subtype::START)
                .with_payload(tool_use.clone()),
        );
    }

    if let Some(result) = raw.get("tool_result").filter(|v| !v.is_null()) {
        events.push(
            NormalizedEvent::new(EventKind::Tool, raw)
                .with_subtype(tool_subtype::RESULT)
                .with_payload(result.clone()),
        );
    }

    let message_results = raw
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|block| block.get("toolResult"));
    for result in message_results {
        events.push(
            NormalizedEvent::new(EventKind::Tool, raw)
                .with_subtype(tool_subtype::RESULT)
                .with_payload(result.clone()),
        );
    }
}

fn has_tool_name(value: &Value) -> bool {
    value
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| !name.trim().is_empty())
}
