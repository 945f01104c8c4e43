//! Sampled, detached quality scoring of finished turns.
//!
//! Jobs go onto a bounded queue read by one consumer task. Nothing here can
//! block, delay or fail the response stream: a full queue drops the job,
//! and evaluation errors, panics and timeouts are logged and swallowed.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EvaluationSettings;
use crate::error::{Result, WeaverError};
use crate::snapshot::{ToolEventPhase, ToolEventRecord};

/// Everything an evaluator sees about a finished turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationJob {
    pub run_id: String,
    pub session_id: String,
    pub run_mode: String,
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub tool_events: Vec<ToolEventRecord>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    /// Quality score in `[0, 1]`.
    pub score: f64,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[async_trait]
pub trait EvaluationService: Send + Sync {
    async fn evaluate(&self, job: &EvaluationJob) -> Result<EvaluationOutcome>;
}

/// Model-free scoring from prompt coverage, response length and tool errors.
#[derive(Debug, Clone, Default)]
pub struct HeuristicEvaluator;

impl HeuristicEvaluator {
    const MIN_KEYWORD_CHARS: usize = 4;
    const SHORT_RESPONSE_CHARS: usize = 20;
    const TOOL_ERROR_PENALTY: f64 = 0.1;
}

#[async_trait]
impl EvaluationService for HeuristicEvaluator {
    async fn evaluate(&self, job: &EvaluationJob) -> Result<EvaluationOutcome> {
        let response = job.response.to_lowercase();
        let keywords: HashSet<String> = job
            .prompt
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.chars().count() >= Self::MIN_KEYWORD_CHARS)
            .map(str::to_lowercase)
            .collect();

        let mut notes = Vec::new();
        let coverage = if keywords.is_empty() {
            1.0
        } else {
            let covered = keywords.iter().filter(|k| response.contains(k.as_str())).count();
            covered as f64 / keywords.len() as f64
        };
        if coverage < 0.5 {
            notes.push(format!("response covers {:.0}% of prompt keywords", coverage * 100.0));
        }

        let length = if job.response.trim().chars().count() < Self::SHORT_RESPONSE_CHARS {
            notes.push("response is very short".to_string());
            0.5
        } else {
            1.0
        };

        let tool_errors = job
            .tool_events
            .iter()
            .filter(|e| e.phase == ToolEventPhase::Result && e.is_error)
            .count();
        if tool_errors > 0 {
            notes.push(format!("{tool_errors} tool call(s) failed"));
        }

        let score = (0.6 * coverage + 0.4 * length - Self::TOOL_ERROR_PENALTY * tool_errors as f64)
            .clamp(0.0, 1.0);
        Ok(EvaluationOutcome { score, notes })
    }
}

/// Decides whether an eligible run is evaluated.
pub trait Sampler: Send + Sync {
    fn sample(&self, rate: f64) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn sample(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_bool(rate.min(1.0))
    }
}

/// Run ids of jobs queued or in flight; entries remove themselves when done.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, run_id: &str) {
        if let Ok(mut tasks) = self.inner.lock() {
            tasks.insert(run_id.to_string());
        }
    }

    fn complete(&self, run_id: &str) {
        if let Ok(mut tasks) = self.inner.lock() {
            tasks.remove(run_id);
        }
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.inner
            .lock()
            .map(|tasks| tasks.contains(run_id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|tasks| tasks.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owner of the evaluation queue and its consumer task.
///
/// Must be created inside a Tokio runtime.
pub struct EvaluationScheduler {
    sender: mpsc::Sender<EvaluationJob>,
    registry: TaskRegistry,
    enabled: Arc<AtomicBool>,
    shutdown: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EvaluationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationScheduler")
            .field("pending", &self.pending())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl EvaluationScheduler {
    pub fn new(
        settings: &EvaluationSettings,
        service: Arc<dyn EvaluationService>,
        sampler: Arc<dyn Sampler>,
    ) -> Self {
        Self::with_registry(settings, service, sampler, TaskRegistry::new())
    }

    pub fn with_registry(
        settings: &EvaluationSettings,
        service: Arc<dyn EvaluationService>,
        sampler: Arc<dyn Sampler>,
        registry: TaskRegistry,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let enabled = Arc::new(AtomicBool::new(settings.enabled));
        let shutdown = CancellationToken::new();
        let consumer = Consumer {
            receiver,
            service,
            sampler,
            registry: registry.clone(),
            enabled: Arc::clone(&enabled),
            sample_rate: settings.sample_rate,
            timeout: Duration::from_millis(settings.timeout_ms),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(consumer.run());
        Self {
            sender,
            registry,
            enabled,
            shutdown,
            consumer: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a job without waiting; returns whether it was accepted.
    pub fn schedule(&self, job: EvaluationJob) -> bool {
        if self.shutdown.is_cancelled() {
            tracing::warn!(run_id = %job.run_id, "evaluation scheduler is shut down; dropping job");
            return false;
        }
        let run_id = job.run_id.clone();
        self.registry.register(&run_id);
        match self.sender.try_send(job) {
            Ok(()) => {
                tracing::debug!(run_id = %run_id, "evaluation job queued");
                true
            }
            Err(err) => {
                let reason = match err {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "queue closed",
                };
                tracing::warn!(run_id = %run_id, reason, "dropping evaluation job");
                self.registry.complete(&run_id);
                false
            }
        }
    }

    /// Toggle the feature flag checked by the consumer for each job.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Jobs queued or in flight.
    pub fn pending(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Stop accepting jobs, process what is queued, and join the consumer.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let handle = self
            .consumer
            .lock()
            .map_err(|_| WeaverError::Evaluation("consumer handle lock poisoned".to_string()))?
            .take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|err| WeaverError::Evaluation(format!("consumer task failed: {err}")))?;
        }
        Ok(())
    }
}

struct Consumer {
    receiver: mpsc::Receiver<EvaluationJob>,
    service: Arc<dyn EvaluationService>,
    sampler: Arc<dyn Sampler>,
    registry: TaskRegistry,
    enabled: Arc<AtomicBool>,
    sample_rate: f64,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl Consumer {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                job = self.receiver.recv() => match job {
                    Some(job) => self.process(job).await,
                    None => return,
                },
            }
        }

        self.receiver.close();
        while let Some(job) = self.receiver.recv().await {
            self.process(job).await;
        }
    }

    async fn process(&self, job: EvaluationJob) {
        let run_id = job.run_id.clone();
        if !self.enabled.load(Ordering::Relaxed) {
            tracing::debug!(run_id = %run_id, "evaluation disabled; skipping");
        } else if !self.sampler.sample(self.sample_rate) {
            tracing::debug!(run_id = %run_id, sample_rate = self.sample_rate, "run not sampled for evaluation");
        } else {
            let evaluation = AssertUnwindSafe(self.service.evaluate(&job)).catch_unwind();
            match tokio::time::timeout(self.timeout, evaluation).await {
                Ok(Ok(Ok(outcome))) => {
                    tracing::info!(
                        run_id = %run_id,
                        score = outcome.score,
                        notes = ?outcome.notes,
                        "evaluated run"
                    );
                }
                Ok(Ok(Err(err))) => {
                    tracing::warn!(run_id = %run_id, error = %err, "evaluation failed");
                }
                Ok(Err(_panic)) => {
                    tracing::warn!(run_id = %run_id, "evaluation panicked");
                }
                Err(_elapsed) => {
                    let err = WeaverError::Timeout(self.timeout.as_millis() as u64);
                    tracing::warn!(run_id = %run_id, error = %err, "evaluation timed out");
                }
            }
        }
        self.registry.complete(&run_id);
    }
}
