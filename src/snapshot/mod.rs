//! Durable, best-effort record of every turn.
//!
//! A [`RunSnapshot`] is written once per turn, keyed by run id, and never
//! mutated afterwards. Stores refuse to overwrite an existing record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use tokio::io::AsyncWriteExt;

use crate::config::SnapshotSettings;
use crate::error::{Result, WeaverError};
use crate::types::ExecutionMode;

const SNAPSHOT_FILE_VERSION: u32 = 1;

/// How a turn ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToolEventPhase {
    Start,
    Result,
}

/// A tool start or result observed during a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolEventRecord {
    pub phase: ToolEventPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub payload: Value,
    #[serde(default)]
    pub is_error: bool,
}

/// Immutable record of one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Builder)]
pub struct RunSnapshot {
    #[builder(into)]
    pub run_id: String,
    /// `None` when the run mode never resolved.
    pub mode: Option<ExecutionMode>,
    #[builder(into)]
    pub profile: Option<String>,
    #[builder(into)]
    pub session_id: String,
    #[builder(into)]
    pub resource_uri: Option<String>,
    #[builder(into)]
    pub prompt: String,
    #[builder(into, default)]
    pub output: String,
    #[builder(default)]
    #[serde(default)]
    pub output_truncated: bool,
    #[builder(default)]
    #[serde(default)]
    pub tool_events: Vec<ToolEventRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub metrics: Option<Value>,
    pub status: RunStatus,
    #[builder(into)]
    pub error: Option<String>,
}

/// Storage abstraction for run snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist a new snapshot; fails if the run id was already written.
    async fn write(&self, snapshot: &RunSnapshot) -> Result<()>;

    async fn read(&self, run_id: &str) -> Result<Option<RunSnapshot>>;
}

/// File-backed store: one JSON document per run, `<dir>/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    base_dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Store under `~/.weaver/snapshots`.
    pub fn new_default() -> Self {
        Self::new(crate::config::WeaverConfig::default_dir().join("snapshots"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn snapshot_path(&self, run_id: &str) -> Result<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(WeaverError::Storage(format!("invalid run id '{run_id}'")));
        }
        Ok(self.base_dir.join(format!("{run_id}.json")))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn write(&self, snapshot: &RunSnapshot) -> Result<()> {
        let path = self.snapshot_path(&snapshot.run_id)?;
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let file = SnapshotFile {
            version: SNAPSHOT_FILE_VERSION,
            snapshot: snapshot.clone(),
        };
        let serialized = serde_json::to_vec_pretty(&file)?;

        let mut handle = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(handle) => handle,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(WeaverError::Storage(format!(
                    "snapshot for run {} already recorded",
                    snapshot.run_id
                )));
            }
            Err(err) => return Err(WeaverError::Io(err)),
        };
        handle.write_all(&serialized).await?;
        handle.flush().await?;
        Ok(())
    }

    async fn read(&self, run_id: &str) -> Result<Option<RunSnapshot>> {
        let path = self.snapshot_path(run_id)?;
        let raw = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(WeaverError::Io(err)),
        };
        let file: SnapshotFile = serde_json::from_slice(&raw)?;
        Ok(Some(file.snapshot))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    snapshot: RunSnapshot,
}

/// Process-local store, used when no snapshot directory is configured.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    records: Mutex<BTreeMap<String, RunSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<RunSnapshot> {
        self.records
            .lock()
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn write(&self, snapshot: &RunSnapshot) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| WeaverError::Storage("snapshot store lock poisoned".to_string()))?;
        if records.contains_key(&snapshot.run_id) {
            return Err(WeaverError::Storage(format!(
                "snapshot for run {} already recorded",
                snapshot.run_id
            )));
        }
        records.insert(snapshot.run_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn read(&self, run_id: &str) -> Result<Option<RunSnapshot>> {
        let records = self
            .records
            .lock()
            .map_err(|_| WeaverError::Storage("snapshot store lock poisoned".to_string()))?;
        Ok(records.get(run_id).cloned())
    }
}

/// Truncates output and writes snapshots; failures are logged, never raised.
#[derive(Clone)]
pub struct RunSnapshotRecorder {
    store: Arc<dyn SnapshotStore>,
    output_cap_chars: usize,
}

impl std::fmt::Debug for RunSnapshotRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSnapshotRecorder")
            .field("output_cap_chars", &self.output_cap_chars)
            .finish_non_exhaustive()
    }
}

impl RunSnapshotRecorder {
    pub fn new(store: Arc<dyn SnapshotStore>, output_cap_chars: usize) -> Self {
        Self {
            store,
            output_cap_chars,
        }
    }

    /// File store when `dir` is set, in-memory otherwise.
    pub fn from_settings(settings: &SnapshotSettings) -> Self {
        let store: Arc<dyn SnapshotStore> = match &settings.dir {
            Some(dir) => Arc::new(FileSnapshotStore::new(dir.clone())),
            None => Arc::new(InMemorySnapshotStore::new()),
        };
        Self::new(store, settings.output_cap_chars)
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Write the snapshot; returns whether the write succeeded.
    pub async fn record(&self, mut snapshot: RunSnapshot) -> bool {
        if let Some((idx, _)) = snapshot.output.char_indices().nth(self.output_cap_chars) {
            snapshot.output.truncate(idx);
            snapshot.output_truncated = true;
        }
        match self.store.write(&snapshot).await {
            Ok(()) => {
                tracing::debug!(
                    run_id = %snapshot.run_id,
                    status = %snapshot.status,
                    tool_events = snapshot.tool_events.len(),
                    "recorded run snapshot"
                );
                true
            }
            Err(err) => {
                tracing::warn!(run_id = %snapshot.run_id, error = %err, "failed to record run snapshot");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(run_id: &str, output: &str) -> RunSnapshot {
        let now = Utc::now();
        RunSnapshot::builder()
            .run_id(run_id)
            .mode(ExecutionMode::Single)
            .profile("chat")
            .session_id("s-1")
            .prompt("hello")
            .output(output)
            .started_at(now)
            .finished_at(now)
            .status(RunStatus::Succeeded)
            .build()
    }

    #[tokio::test]
    async fn file_store_round_trips_and_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path().join("snapshots"));
        let record = snapshot("run-1", "hi there");

        store.write(&record).await.unwrap();
        assert_eq!(store.read("run-1").await.unwrap(), Some(record.clone()));
        assert!(dir.path().join("snapshots/run-1.json").exists());

        let err = store.write(&record).await.expect_err("second write must fail");
        assert!(matches!(err, WeaverError::Storage(_)));
        assert_eq!(store.read("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_rejects_path_like_run_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(dir.path());
        assert!(store.write(&snapshot("../escape", "")).await.is_err());
    }

    #[tokio::test]
    async fn recorder_truncates_output_to_cap() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let recorder = RunSnapshotRecorder::new(store.clone(), 5);

        assert!(recorder.record(snapshot("run-2", "abcdefghij")).await);
        let stored = store.read("run-2").await.unwrap().unwrap();
        assert_eq!(stored.output, "abcde");
        assert!(stored.output_truncated);
    }

    #[tokio::test]
    async fn recorder_swallows_store_errors() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let recorder = RunSnapshotRecorder::new(store.clone(), 100);
        assert!(recorder.record(snapshot("run-3", "x")).await);
        assert!(!recorder.record(snapshot("run-3", "y")).await);
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshots()[0].output, "x");
    }
}
