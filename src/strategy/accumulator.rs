use std::collections::HashSet;

use serde_json::Value;

use crate::aggregate::{explicit_tool_id, result_is_error};
use crate::engine::RawEvent;
use crate::normalize::{normalize, tool_subtype, EventKind, NormalizedEvent};
use crate::snapshot::{ToolEventPhase, ToolEventRecord};

/// Text and tool activity of one turn, kept for the run snapshot.
///
/// Independent of the rich content aggregator: it records every tool start
/// once per id and every tool result as observed, without correlation.
#[derive(Debug, Clone, Default)]
pub struct OutputAccumulator {
    text: String,
    tool_events: Vec<ToolEventRecord>,
    started_ids: HashSet<String>,
    metrics: Option<Value>,
}

impl OutputAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, raw: &RawEvent) {
        self.observe_as(raw, None);
    }

    fn observe_as(&mut self, raw: &RawEvent, agent: Option<&str>) {
        for event in normalize(raw) {
            self.observe_normalized(&event, agent);
        }
    }

    fn observe_normalized(&mut self, event: &NormalizedEvent, agent: Option<&str>) {
        let Some(payload) = event.payload.as_ref() else {
            return;
        };
        match event.kind {
            EventKind::Text => {
                if let Some(text) = event.text() {
                    self.text.push_str(text);
                }
            }
            EventKind::Tool if event.subtype() == Some(tool_subtype::START) => {
                let id = explicit_tool_id(payload);
                if let Some(id) = &id {
                    if !self.started_ids.insert(id.clone()) {
                        return;
                    }
                }
                self.tool_events.push(ToolEventRecord {
                    phase: ToolEventPhase::Start,
                    tool_call_id: id,
                    tool_name: string_field(payload, &["name"]),
                    agent: agent.map(str::to_string),
                    payload: payload.clone(),
                    is_error: false,
                });
            }
            EventKind::Tool if event.subtype() == Some(tool_subtype::RESULT) => {
                self.tool_events.push(ToolEventRecord {
                    phase: ToolEventPhase::Result,
                    tool_call_id: explicit_tool_id(payload),
                    tool_name: None,
                    agent: agent.map(str::to_string),
                    payload: payload.clone(),
                    is_error: result_is_error(payload),
                });
            }
            EventKind::Metrics => {
                self.metrics = payload.get("metrics").cloned();
            }
            EventKind::MultiAgent if event.subtype() == Some("node_stream") => {
                if let Some(inner) = payload.get("event").filter(|v| v.is_object()) {
                    let node = payload.get("node_id").and_then(Value::as_str);
                    self.observe_as(&RawEvent::from_value(inner.clone()), node.or(agent));
                }
            }
            _ => {}
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_events(&self) -> &[ToolEventRecord] {
        &self.tool_events
    }

    pub fn metrics(&self) -> Option<&Value> {
        self.metrics.as_ref()
    }

    /// Move the collected tool events and metrics out.
    pub fn into_parts(self) -> (String, Vec<ToolEventRecord>, Option<Value>) {
        (self.text, self.tool_events, self.metrics)
    }
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
