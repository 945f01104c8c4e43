//! Agent engine seam: raw events and the traits engines implement.
//!
//! The engine performs model calls, tool execution and multi-agent handoff.
//! Weaver only consumes its event stream; nothing here interprets events
//! beyond field access (see [`crate::normalize`] for that).

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::plan::ExecutionPlan;
use crate::types::{ConversationMessage, InvocationState, RunContext};

/// Stream of raw engine events.
pub type RawEventStream<'a> = BoxStream<'a, Result<RawEvent>>;

/// A schema-free event record emitted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(Map<String, Value>);

impl RawEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap any JSON value; non-objects land under a `"value"` key.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self(map)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// True when the field is present and truthy (`true` or a non-empty value).
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Value> for RawEvent {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

/// A single agent whose message history can be mutated before streaming.
pub trait AgentEngine: Send {
    /// The agent's own message list.
    fn messages_mut(&mut self) -> &mut Vec<ConversationMessage>;

    /// Stream raw events for a prompt.
    fn stream<'a>(&'a mut self, prompt: &'a str, state: &'a InvocationState) -> RawEventStream<'a>;
}

/// A multi-agent construct (swarm or graph).
#[async_trait]
pub trait MultiAgentEngine: Send + Sync {
    /// Stream raw events; `None` when the construct cannot stream.
    fn stream<'a>(
        &'a self,
        prompt: &'a str,
        state: &'a InvocationState,
    ) -> Option<RawEventStream<'a>>;

    /// Run to completion and return the whole result.
    async fn invoke(&self, prompt: &str, state: &InvocationState) -> Result<Value>;
}

/// Builds engines for a resolved plan.
pub trait EngineProvider: Send + Sync {
    fn agent(&self, plan: &ExecutionPlan, context: &RunContext) -> Result<Box<dyn AgentEngine>>;

    fn multi_agent(
        &self,
        plan: &ExecutionPlan,
        context: &RunContext,
    ) -> Result<Arc<dyn MultiAgentEngine>>;
}
