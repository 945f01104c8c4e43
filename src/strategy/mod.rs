//! Execution strategies: one streaming contract over single, swarm and
//! graph execution.

mod accumulator;

pub use accumulator::OutputAccumulator;

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};

use crate::compaction::{assemble_multi_agent_prompt, CompactionDecision, ContextCompactor};
use crate::engine::{AgentEngine, EngineProvider, MultiAgentEngine, RawEvent, RawEventStream};
use crate::error::{Result, WeaverError};
use crate::plan::ExecutionPlan;
use crate::types::{ConversationMessage, ExecutionMode, InvocationState, RunContext};

/// Uniform streaming adapter over an execution mode.
///
/// Every event is fed to the accumulator before it is yielded. Engine
/// errors pass through as stream items; nothing here catches them.
pub trait ExecutionStrategy: Send {
    fn mode(&self) -> ExecutionMode;

    fn stream<'a>(
        &'a mut self,
        prompt: &'a str,
        accumulator: &'a mut OutputAccumulator,
        state: &'a InvocationState,
    ) -> RawEventStream<'a>;
}

/// Runs one agent with prior history injected into its message list.
///
/// Each `stream` call appends the history again, so a strategy instance
/// must serve exactly one turn.
pub struct SingleStrategy {
    engine: Box<dyn AgentEngine>,
    history: Vec<ConversationMessage>,
}

impl SingleStrategy {
    pub fn new(engine: Box<dyn AgentEngine>, history: Vec<ConversationMessage>) -> Self {
        Self { engine, history }
    }
}

impl ExecutionStrategy for SingleStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Single
    }

    fn stream<'a>(
        &'a mut self,
        prompt: &'a str,
        accumulator: &'a mut OutputAccumulator,
        state: &'a InvocationState,
    ) -> RawEventStream<'a> {
        let Self { engine, history } = self;
        engine.messages_mut().extend(history.iter().cloned());
        observed(engine.stream(prompt, state), accumulator)
    }
}

/// Hands a compacted, assembled prompt to a swarm.
pub struct SwarmStrategy {
    engine: Arc<dyn MultiAgentEngine>,
    decision: CompactionDecision,
    assembled: String,
}

impl SwarmStrategy {
    pub fn new(engine: Arc<dyn MultiAgentEngine>, decision: CompactionDecision) -> Self {
        Self {
            engine,
            decision,
            assembled: String::new(),
        }
    }

    pub fn compaction(&self) -> &CompactionDecision {
        &self.decision
    }
}

impl ExecutionStrategy for SwarmStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Swarm
    }

    fn stream<'a>(
        &'a mut self,
        prompt: &'a str,
        accumulator: &'a mut OutputAccumulator,
        state: &'a InvocationState,
    ) -> RawEventStream<'a> {
        let Self {
            engine,
            decision,
            assembled,
        } = self;
        *assembled = assemble_multi_agent_prompt(decision, prompt);
        let (engine, assembled) = (&*engine, &*assembled);
        match engine.stream(assembled, state) {
            Some(inner) => observed(inner, accumulator),
            None => futures::stream::once(async {
                Err(WeaverError::UnsupportedOperation(
                    "swarm engine does not support streaming".to_string(),
                ))
            })
            .boxed(),
        }
    }
}

/// Hands a compacted, assembled prompt to a graph; falls back to a
/// blocking invoke when the graph cannot stream.
pub struct GraphStrategy {
    engine: Arc<dyn MultiAgentEngine>,
    decision: CompactionDecision,
    assembled: String,
}

impl GraphStrategy {
    pub fn new(engine: Arc<dyn MultiAgentEngine>, decision: CompactionDecision) -> Self {
        Self {
            engine,
            decision,
            assembled: String::new(),
        }
    }

    pub fn compaction(&self) -> &CompactionDecision {
        &self.decision
    }
}

impl ExecutionStrategy for GraphStrategy {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Graph
    }

    fn stream<'a>(
        &'a mut self,
        prompt: &'a str,
        accumulator: &'a mut OutputAccumulator,
        state: &'a InvocationState,
    ) -> RawEventStream<'a> {
        let Self {
            engine,
            decision,
            assembled,
        } = self;
        *assembled = assemble_multi_agent_prompt(decision, prompt);
        let (engine, assembled) = (&*engine, &*assembled);
        if let Some(inner) = engine.stream(assembled, state) {
            return observed(inner, accumulator);
        }

        tracing::debug!("graph engine cannot stream; invoking to completion");
        let engine = Arc::clone(engine);
        Box::pin(async_stream::stream! {
            match engine.invoke(assembled, state).await {
                Ok(result) => {
                    let event = completion_event(result);
                    accumulator.observe(&event);
                    yield Ok(event);
                }
                Err(err) => yield Err(err),
            }
        })
    }
}

/// The single event synthesized from a blocking graph result.
///
/// The result's text is surfaced as a text delta so it renders like
/// streamed output.
fn completion_event(result: Value) -> RawEvent {
    let text = match &result {
        Value::String(text) => Some(text.clone()),
        Value::Object(fields) => ["text", "output", "content"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    };
    let mut event = json!({ "result": result, "complete": true });
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        event["data"] = Value::String(text);
    }
    RawEvent::from_value(event)
}

fn observed<'a>(
    mut inner: RawEventStream<'a>,
    accumulator: &'a mut OutputAccumulator,
) -> RawEventStream<'a> {
    Box::pin(async_stream::stream! {
        while let Some(item) = inner.next().await {
            if let Ok(event) = &item {
                accumulator.observe(event);
            }
            yield item;
        }
    })
}

/// Build the strategy for a resolved plan.
///
/// Multi-agent modes get compacted history; single mode gets it verbatim.
pub fn build_strategy(
    plan: &ExecutionPlan,
    engines: &dyn EngineProvider,
    context: &RunContext,
    history: Vec<ConversationMessage>,
    compactor: &ContextCompactor,
) -> Result<Box<dyn ExecutionStrategy>> {
    match plan.mode {
        ExecutionMode::Single => {
            let engine = engines.agent(plan, context)?;
            Ok(Box::new(SingleStrategy::new(engine, history)))
        }
        ExecutionMode::Swarm => {
            let engine = engines.multi_agent(plan, context)?;
            Ok(Box::new(SwarmStrategy::new(engine, compactor.compact(&history))))
        }
        ExecutionMode::Graph => {
            let engine = engines.multi_agent(plan, context)?;
            Ok(Box::new(GraphStrategy::new(engine, compactor.compact(&history))))
        }
    }
}
