//! Shared test helpers: scripted engines, a counting evaluator and a runner
//! factory.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;

use weaver::config::{EvaluationSettings, ProfileConfig, WeaverConfig};
use weaver::engine::{AgentEngine, EngineProvider, MultiAgentEngine, RawEvent, RawEventStream};
use weaver::error::{Result, WeaverError};
use weaver::evaluation::{EvaluationJob, EvaluationOutcome, EvaluationService, Sampler};
use weaver::plan::{ExecutionPlan, ProfilePlanResolver};
use weaver::snapshot::{InMemorySnapshotStore, RunSnapshotRecorder};
use weaver::turn::{ChunkStream, TurnRunner};
use weaver::types::{Chunk, ConversationMessage, ExecutionMode, InvocationState, RunContext};

/// One scripted engine step.
#[derive(Debug, Clone)]
pub enum Step {
    Event(Value),
    Fail(String),
    /// Never yields again.
    Hang,
}

pub fn script_stream(steps: Vec<Step>) -> RawEventStream<'static> {
    let hangs = steps.iter().any(|s| matches!(s, Step::Hang));
    let items: Vec<Result<RawEvent>> = steps
        .into_iter()
        .take_while(|s| !matches!(s, Step::Hang))
        .filter_map(|s| match s {
            Step::Event(value) => Some(Ok(RawEvent::from_value(value))),
            Step::Fail(message) => Some(Err(WeaverError::engine(message))),
            Step::Hang => None,
        })
        .collect();
    let head = futures::stream::iter(items);
    if hangs {
        head.chain(futures::stream::pending()).boxed()
    } else {
        head.boxed()
    }
}

/// What the engines saw.
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub prompts: Arc<Mutex<Vec<String>>>,
    pub histories: Arc<Mutex<Vec<Vec<ConversationMessage>>>>,
    pub states: Arc<Mutex<Vec<InvocationState>>>,
}

impl Calls {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn histories(&self) -> Vec<Vec<ConversationMessage>> {
        self.histories.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<InvocationState> {
        self.states.lock().unwrap().clone()
    }
}

/// Single agent replaying a fixed script.
pub struct ScriptedAgent {
    messages: Vec<ConversationMessage>,
    steps: Vec<Step>,
    calls: Calls,
}

impl ScriptedAgent {
    pub fn new(steps: Vec<Step>, calls: Calls) -> Self {
        Self {
            messages: Vec::new(),
            steps,
            calls,
        }
    }
}

impl AgentEngine for ScriptedAgent {
    fn messages_mut(&mut self) -> &mut Vec<ConversationMessage> {
        &mut self.messages
    }

    fn stream<'a>(&'a mut self, prompt: &'a str, state: &'a InvocationState) -> RawEventStream<'a> {
        self.calls.prompts.lock().unwrap().push(prompt.to_string());
        self.calls.histories.lock().unwrap().push(self.messages.clone());
        self.calls.states.lock().unwrap().push(state.clone());
        script_stream(self.steps.clone())
    }
}

/// Multi-agent construct; `steps: None` means it cannot stream.
pub struct ScriptedMultiAgent {
    steps: Option<Vec<Step>>,
    invoke_result: Value,
    calls: Calls,
}

impl ScriptedMultiAgent {
    pub fn new(steps: Option<Vec<Step>>, invoke_result: Value, calls: Calls) -> Self {
        Self {
            steps,
            invoke_result,
            calls,
        }
    }
}

#[async_trait]
impl MultiAgentEngine for ScriptedMultiAgent {
    fn stream<'a>(&'a self, prompt: &'a str, state: &'a InvocationState) -> Option<RawEventStream<'a>> {
        self.calls.prompts.lock().unwrap().push(prompt.to_string());
        self.calls.states.lock().unwrap().push(state.clone());
        self.steps.clone().map(script_stream)
    }

    async fn invoke(&self, prompt: &str, _state: &InvocationState) -> Result<Value> {
        self.calls.prompts.lock().unwrap().push(format!("invoke:{prompt}"));
        Ok(self.invoke_result.clone())
    }
}

/// Hands out scripted engines for every plan.
pub struct ScriptedProvider {
    pub agent_steps: Vec<Step>,
    pub multi_steps: Option<Vec<Step>>,
    pub invoke_result: Value,
    pub calls: Calls,
}

impl ScriptedProvider {
    pub fn single(steps: Vec<Step>) -> Self {
        Self {
            agent_steps: steps,
            multi_steps: None,
            invoke_result: Value::Null,
            calls: Calls::default(),
        }
    }

    pub fn multi(steps: Option<Vec<Step>>, invoke_result: Value) -> Self {
        Self {
            agent_steps: Vec::new(),
            multi_steps: steps,
            invoke_result,
            calls: Calls::default(),
        }
    }
}

impl EngineProvider for ScriptedProvider {
    fn agent(&self, _plan: &ExecutionPlan, _context: &RunContext) -> Result<Box<dyn AgentEngine>> {
        Ok(Box::new(ScriptedAgent::new(self.agent_steps.clone(), self.calls.clone())))
    }

    fn multi_agent(&self, _plan: &ExecutionPlan, _context: &RunContext) -> Result<Arc<dyn MultiAgentEngine>> {
        Ok(Arc::new(ScriptedMultiAgent::new(
            self.multi_steps.clone(),
            self.invoke_result.clone(),
            self.calls.clone(),
        )))
    }
}

/// Counts evaluations; optionally fails, panics or sleeps.
#[derive(Debug, Default)]
pub struct CountingEvaluator {
    pub calls: AtomicUsize,
    pub panic: bool,
    pub fail: bool,
    pub delay_ms: u64,
}

impl CountingEvaluator {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvaluationService for CountingEvaluator {
    async fn evaluate(&self, _job: &EvaluationJob) -> Result<EvaluationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.panic {
            panic!("evaluator exploded");
        }
        if self.fail {
            return Err(WeaverError::Evaluation("judge unavailable".to_string()));
        }
        Ok(EvaluationOutcome {
            score: 1.0,
            notes: Vec::new(),
        })
    }
}

/// Sampler with a fixed answer.
pub struct FixedSampler(pub bool);

impl Sampler for FixedSampler {
    fn sample(&self, _rate: f64) -> bool {
        self.0
    }
}

pub fn enabled_evaluation() -> EvaluationSettings {
    EvaluationSettings {
        enabled: true,
        sample_rate: 1.0,
        queue_capacity: 8,
        timeout_ms: 1_000,
    }
}

pub fn profile(mode: ExecutionMode, entrypoint: &str) -> ProfileConfig {
    ProfileConfig {
        mode,
        entrypoint: entrypoint.to_string(),
        model_id: Some("test-model".to_string()),
        metadata: Default::default(),
    }
}

/// Config with `chat` (single), `team` (swarm) and `flow` (graph) profiles.
pub fn test_config() -> WeaverConfig {
    WeaverConfig::new()
        .with_profile("chat", profile(ExecutionMode::Single, "assistant"))
        .with_profile("team", profile(ExecutionMode::Swarm, "research_team"))
        .with_profile("flow", profile(ExecutionMode::Graph, "pipeline"))
}

pub fn runner_for(provider: Arc<ScriptedProvider>) -> (TurnRunner, Arc<InMemorySnapshotStore>) {
    let store = Arc::new(InMemorySnapshotStore::new());
    let runner = TurnRunner::new(
        Arc::new(ProfilePlanResolver::from_config(&test_config())),
        provider,
        RunSnapshotRecorder::new(store.clone(), 8_000),
    );
    (runner, store)
}

pub fn context(run_mode: &str) -> RunContext {
    RunContext::builder()
        .run_mode(run_mode)
        .session_id("session-1")
        .invocation_state(
            InvocationState::new()
                .with(InvocationState::THREAD_ID, "thread-1")
                .with(InvocationState::RESOURCE_URI, "weaver://threads/thread-1"),
        )
        .build()
}

pub async fn collect(stream: ChunkStream) -> Vec<Chunk> {
    stream.collect().await
}
