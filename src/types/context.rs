//! Per-turn run context and routing types.

use std::collections::BTreeMap;

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Result, WeaverError};

/// How the agent engine executes a turn.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionMode {
    Single,
    Swarm,
    Graph,
}

impl ExecutionMode {
    pub fn is_multi_agent(&self) -> bool {
        matches!(self, Self::Swarm | Self::Graph)
    }
}

/// Opaque string map passed through to the engine and telemetry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct InvocationState(BTreeMap<String, String>);

impl InvocationState {
    pub const THREAD_ID: &'static str = "thread_id";
    pub const MESSAGE_ID: &'static str = "message_id";
    pub const RUN_MODE: &'static str = "run_mode";
    pub const PROFILE_NAME: &'static str = "profile_name";
    pub const RESOURCE_URI: &'static str = "resource_uri";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.get(Self::THREAD_ID)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.get(Self::MESSAGE_ID)
    }

    pub fn resource_uri(&self) -> Option<&str> {
        self.get(Self::RESOURCE_URI)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Configuration and routing for one turn.
///
/// Owned by the call that initiates the turn. Everything is fixed at
/// construction except the resolved mode and entrypoint, which are set
/// exactly once by [`RunContext::resolve`].
///
/// ```
/// use weaver::types::RunContext;
///
/// let ctx = RunContext::builder()
///     .run_mode("research")
///     .session_id("session-1")
///     .build();
/// assert!(ctx.resolved_mode().is_none());
/// ```
#[derive(Debug, Clone, Builder)]
pub struct RunContext {
    #[builder(into)]
    pub run_mode: String,
    #[builder(into)]
    pub session_id: String,
    #[builder(into)]
    pub profile_name: Option<String>,
    #[builder(default)]
    pub invocation_state: InvocationState,
    #[builder(into)]
    pub model_override: Option<String>,
    #[builder(default)]
    pub tool_groups_override: Vec<String>,
    #[builder(skip)]
    resolved_mode: Option<ExecutionMode>,
    #[builder(skip)]
    entrypoint: Option<String>,
}

impl RunContext {
    /// Record the resolved execution mode and entrypoint.
    ///
    /// Fails if the context has already been resolved.
    pub fn resolve(&mut self, mode: ExecutionMode, entrypoint: impl Into<String>) -> Result<()> {
        if self.resolved_mode.is_some() {
            return Err(WeaverError::InvalidState(format!(
                "run context for '{}' already resolved",
                self.run_mode
            )));
        }
        self.resolved_mode = Some(mode);
        self.entrypoint = Some(entrypoint.into());
        Ok(())
    }

    pub fn resolved_mode(&self) -> Option<ExecutionMode> {
        self.resolved_mode
    }

    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref()
    }

    /// Invocation state enriched with the routing keys the engine expects.
    pub fn engine_state(&self) -> InvocationState {
        let mut state = self.invocation_state.clone();
        state.insert(InvocationState::RUN_MODE, self.run_mode.clone());
        if let Some(profile) = &self.profile_name {
            state.insert(InvocationState::PROFILE_NAME, profile.clone());
        }
        state
    }
}
