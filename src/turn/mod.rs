//! Turn driver: route a request, stream engine events into chunks, and
//! record the run.

use std::sync::Arc;

use bon::Builder;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::RichContentAggregator;
use crate::compaction::ContextCompactor;
use crate::config::WeaverConfig;
use crate::engine::{EngineProvider, RawEvent};
use crate::error::{Result, WeaverError};
use crate::evaluation::{EvaluationJob, EvaluationScheduler, HeuristicEvaluator, RandomSampler};
use crate::normalize::{lifecycle_subtype, normalize, EventKind};
use crate::plan::{ExecutionPlan, PlanResolver, ProfilePlanResolver};
use crate::snapshot::{RunSnapshot, RunSnapshotRecorder, RunStatus, ToolEventRecord};
use crate::strategy::{build_strategy, ExecutionStrategy, OutputAccumulator};
use crate::types::{
    Chunk, ContentPart, ConversationMessage, ExecutionMode, RunContext, RunMetadata,
};

/// Chunks of one turn; the last one carries [`RunMetadata`].
pub type ChunkStream = BoxStream<'static, Chunk>;

/// Input for one turn.
#[derive(Debug, Clone, Builder)]
pub struct TurnRequest {
    pub context: RunContext,
    /// The user's input for this turn.
    #[builder(into)]
    pub prompt: String,
    /// Prior conversation, oldest first.
    #[builder(default)]
    pub history: Vec<ConversationMessage>,
    /// Stops pulling engine events when cancelled; the turn still ends with
    /// a terminal chunk and a `canceled` snapshot.
    pub cancellation: Option<CancellationToken>,
}

/// Runs turns against an engine provider.
///
/// ```no_run
/// use std::sync::Arc;
/// use futures::StreamExt;
/// use weaver::prelude::*;
///
/// # async fn example(engines: Arc<dyn EngineProvider>) -> weaver::error::Result<()> {
/// let config = WeaverConfig::from_env()?;
/// let runner = TurnRunner::from_config(&config, engines);
/// let context = RunContext::builder().run_mode("chat").session_id("s-1").build();
/// let mut chunks = runner.run(TurnRequest::builder().context(context).prompt("Hi").build())?;
/// while let Some(chunk) = chunks.next().await {
///     print!("{}", chunk.to_ndjson_line()?);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TurnRunner {
    resolver: Arc<dyn PlanResolver>,
    engines: Arc<dyn EngineProvider>,
    recorder: RunSnapshotRecorder,
    evaluation: Option<Arc<EvaluationScheduler>>,
    compactor: ContextCompactor,
}

impl std::fmt::Debug for TurnRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnRunner")
            .field("recorder", &self.recorder)
            .field("evaluation", &self.evaluation)
            .field("compactor", &self.compactor)
            .finish_non_exhaustive()
    }
}

impl TurnRunner {
    pub fn new(
        resolver: Arc<dyn PlanResolver>,
        engines: Arc<dyn EngineProvider>,
        recorder: RunSnapshotRecorder,
    ) -> Self {
        Self {
            resolver,
            engines,
            recorder,
            evaluation: None,
            compactor: ContextCompactor::default(),
        }
    }

    /// Wire every component from configuration.
    ///
    /// Spawns the evaluation consumer, so it must run inside a Tokio runtime.
    pub fn from_config(config: &WeaverConfig, engines: Arc<dyn EngineProvider>) -> Self {
        let scheduler = EvaluationScheduler::new(
            &config.evaluation,
            Arc::new(HeuristicEvaluator),
            Arc::new(RandomSampler),
        );
        Self::new(
            Arc::new(ProfilePlanResolver::from_config(config)),
            engines,
            RunSnapshotRecorder::from_settings(&config.snapshots),
        )
        .with_compactor(ContextCompactor::from_settings(&config.compaction))
        .with_evaluation(Arc::new(scheduler))
    }

    pub fn with_evaluation(mut self, scheduler: Arc<EvaluationScheduler>) -> Self {
        self.evaluation = Some(scheduler);
        self
    }

    pub fn with_compactor(mut self, compactor: ContextCompactor) -> Self {
        self.compactor = compactor;
        self
    }

    pub fn recorder(&self) -> &RunSnapshotRecorder {
        &self.recorder
    }

    /// Start a turn.
    ///
    /// Fails up front only when no profiles are configured. Every other
    /// failure ends the stream with a single `"Agent error: "` text part.
    pub fn run(&self, request: TurnRequest) -> Result<ChunkStream> {
        if !self.resolver.has_profiles() {
            return Err(WeaverError::NoProfiles);
        }

        let TurnRequest {
            mut context,
            prompt,
            history,
            cancellation,
        } = request;
        let run_id = Uuid::new_v4().to_string();
        let trace_id = Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!(
            "turn",
            run_id = %run_id,
            trace_id = %trace_id,
            run_mode = %context.run_mode
        );
        let runner = self.clone();

        let stream = async_stream::stream! {
            let mut guard = TurnGuard::new(
                runner.recorder.clone(),
                RunFacts::new(&run_id, &context, &prompt, Utc::now()),
            );
            span.in_scope(|| tracing::debug!(session_id = %context.session_id, "turn started"));

            let (plan, mut strategy) = match span.in_scope(|| runner.prepare(&mut context, history)) {
                Ok(prepared) => prepared,
                Err(err) => {
                    span.in_scope(|| tracing::warn!(error = %err, "turn could not be routed"));
                    guard.record(RunStatus::Failed, Some(&err)).await;
                    yield Chunk::terminal(
                        vec![ContentPart::text(err.user_message())],
                        run_metadata(&trace_id, &context, None),
                    );
                    return;
                }
            };
            guard.facts.resolved(&plan);

            let state = context.engine_state();
            let mut aggregator = RichContentAggregator::new();
            let mut failure: Option<WeaverError> = None;
            let mut canceled = false;
            {
                let mut events = strategy.stream(&prompt, &mut guard.accumulator, &state);
                loop {
                    let next = match &cancellation {
                        Some(token) => tokio::select! {
                            biased;
                            _ = token.cancelled() => {
                                canceled = true;
                                None
                            }
                            item = events.next() => item,
                        },
                        None => events.next().await,
                    };
                    let Some(item) = next else {
                        break;
                    };
                    match item {
                        Ok(raw) => {
                            if let Some(chunk) = span.in_scope(|| apply_event(&mut aggregator, &raw)) {
                                yield chunk;
                            }
                        }
                        Err(err) => {
                            span.in_scope(|| {
                                tracing::error!(error = %err, category = ?err.category(), "engine stream failed")
                            });
                            failure = Some(err);
                            break;
                        }
                    }
                }
            }

            let incomplete = aggregator.finish();
            let status = match (&failure, canceled) {
                (Some(_), _) => RunStatus::Failed,
                (None, true) => RunStatus::Canceled,
                (None, false) => RunStatus::Succeeded,
            };
            let content = match &failure {
                Some(err) => vec![ContentPart::text(err.user_message())],
                None => aggregator.build_content(),
            };

            if let Some(scheduler) = &runner.evaluation {
                let output = guard.accumulator.text();
                let eligible = status == RunStatus::Succeeded
                    && !output.trim().is_empty()
                    && !prompt.trim().is_empty();
                if eligible {
                    let job = EvaluationJob {
                        run_id: run_id.clone(),
                        session_id: context.session_id.clone(),
                        run_mode: context.run_mode.clone(),
                        prompt: prompt.clone(),
                        response: output.to_string(),
                        tool_events: guard.accumulator.tool_events().to_vec(),
                        created_at: Utc::now(),
                    };
                    guard.pending_evaluation = Some((Arc::clone(scheduler), job));
                }
            }

            guard.record(status, failure.as_ref()).await;

            span.in_scope(|| {
                tracing::debug!(
                    status = %status,
                    mode = %strategy.mode(),
                    incomplete_tool_calls = incomplete,
                    parts = content.len(),
                    "turn finished"
                )
            });
            yield Chunk::terminal(content, run_metadata(&trace_id, &context, Some(&plan)));
            guard.schedule_evaluation();
        };
        Ok(Box::pin(stream))
    }

    fn prepare(
        &self,
        context: &mut RunContext,
        history: Vec<ConversationMessage>,
    ) -> Result<(ExecutionPlan, Box<dyn ExecutionStrategy>)> {
        let plan = self.resolver.resolve(&context.run_mode)?;
        context.resolve(plan.mode, plan.entrypoint.clone())?;
        let strategy = build_strategy(
            &plan,
            self.engines.as_ref(),
            context,
            history,
            &self.compactor,
        )?;
        tracing::debug!(
            profile = %plan.profile,
            mode = %plan.mode,
            entrypoint = %plan.entrypoint,
            "resolved execution plan"
        );
        Ok((plan, strategy))
    }
}

/// Feed one raw event to the aggregator; a chunk when the content changed.
fn apply_event(aggregator: &mut RichContentAggregator, raw: &RawEvent) -> Option<Chunk> {
    let mut changed = false;
    for event in normalize(raw) {
        match event.kind {
            EventKind::Unknown => {
                tracing::debug!(event = %raw.to_value(), "unrecognized engine event");
            }
            EventKind::Lifecycle if event.subtype() == Some(lifecycle_subtype::FORCE_STOP) => {
                tracing::debug!(reason = ?event.payload, "engine force-stopped the event loop");
            }
            _ => {}
        }
        changed |= aggregator.process(&event);
    }
    changed.then(|| Chunk::partial(aggregator.build_content()))
}

fn run_metadata(trace_id: &str, context: &RunContext, plan: Option<&ExecutionPlan>) -> RunMetadata {
    RunMetadata {
        trace_id: trace_id.to_string(),
        session_id: context.session_id.clone(),
        run_mode: context.run_mode.clone(),
        profile: plan
            .map(|p| p.profile.clone())
            .or_else(|| context.profile_name.clone()),
        model_id: context
            .model_override
            .clone()
            .or_else(|| plan.and_then(|p| p.model_id.clone())),
        execution_mode: context.resolved_mode(),
        entrypoint: context.entrypoint().map(str::to_string),
    }
}

/// Per-turn facts shared by every snapshot outcome.
#[derive(Debug, Clone)]
struct RunFacts {
    run_id: String,
    mode: Option<ExecutionMode>,
    profile: Option<String>,
    session_id: String,
    resource_uri: Option<String>,
    prompt: String,
    started_at: DateTime<Utc>,
}

impl RunFacts {
    fn new(run_id: &str, context: &RunContext, prompt: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            mode: None,
            profile: context.profile_name.clone(),
            session_id: context.session_id.clone(),
            resource_uri: context.invocation_state.resource_uri().map(str::to_string),
            prompt: prompt.to_string(),
            started_at,
        }
    }

    fn resolved(&mut self, plan: &ExecutionPlan) {
        self.mode = Some(plan.mode);
        self.profile = Some(plan.profile.clone());
    }

    fn snapshot(
        &self,
        status: RunStatus,
        output: String,
        tool_events: Vec<ToolEventRecord>,
        metrics: Option<Value>,
        error: Option<&WeaverError>,
    ) -> RunSnapshot {
        RunSnapshot::builder()
            .run_id(self.run_id.clone())
            .maybe_mode(self.mode)
            .maybe_profile(self.profile.clone())
            .session_id(self.session_id.clone())
            .maybe_resource_uri(self.resource_uri.clone())
            .prompt(self.prompt.clone())
            .output(output)
            .tool_events(tool_events)
            .started_at(self.started_at)
            .finished_at(Utc::now())
            .maybe_metrics(metrics)
            .status(status)
            .maybe_error(error.map(|e| e.to_string()))
            .build()
    }
}

/// Owned by the turn stream so a turn is recorded even when the caller
/// stops iterating early.
///
/// Dropped before [`TurnGuard::record`] ran, it writes a `canceled` snapshot
/// from a spawned task. A queued evaluation job is handed to the scheduler
/// on drop if the stream ended before it was scheduled.
struct TurnGuard {
    recorder: RunSnapshotRecorder,
    facts: RunFacts,
    accumulator: OutputAccumulator,
    pending_evaluation: Option<(Arc<EvaluationScheduler>, EvaluationJob)>,
    recorded: bool,
}

impl TurnGuard {
    fn new(recorder: RunSnapshotRecorder, facts: RunFacts) -> Self {
        Self {
            recorder,
            facts,
            accumulator: OutputAccumulator::new(),
            pending_evaluation: None,
            recorded: false,
        }
    }

    fn take_snapshot(&mut self, status: RunStatus, error: Option<&WeaverError>) -> RunSnapshot {
        self.recorded = true;
        let (output, tool_events, metrics) = std::mem::take(&mut self.accumulator).into_parts();
        self.facts.snapshot(status, output, tool_events, metrics, error)
    }

    async fn record(&mut self, status: RunStatus, error: Option<&WeaverError>) {
        let snapshot = self.take_snapshot(status, error);
        self.recorder.record(snapshot).await;
    }

    fn schedule_evaluation(&mut self) {
        if let Some((scheduler, job)) = self.pending_evaluation.take() {
            scheduler.schedule(job);
        }
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.schedule_evaluation();
        if self.recorded {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(run_id = %self.facts.run_id, "turn dropped outside a runtime; snapshot not recorded");
            return;
        };
        tracing::debug!(run_id = %self.facts.run_id, "turn stream dropped before completion");
        let snapshot = self.take_snapshot(RunStatus::Canceled, None);
        let recorder = self.recorder.clone();
        runtime.spawn(async move {
            recorder.record(snapshot).await;
        });
    }
}
