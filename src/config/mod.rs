//! Configuration system (layered: code > env > config file).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeaverError};
use crate::types::ExecutionMode;

const CONFIG_FILE_NAME: &str = "weaver.toml";

/// Layered configuration for Weaver.
///
/// Resolution order:
/// 1. Values set in code
/// 2. `WEAVER_*` environment variables (a `.env` file is honored)
/// 3. `weaver.toml` in the config directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaverConfig {
    pub compaction: CompactionSettings,
    pub snapshots: SnapshotSettings,
    pub evaluation: EvaluationSettings,
    pub profiles: BTreeMap<String, ProfileConfig>,
}

/// History trimming applied before multi-agent prompt assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionSettings {
    pub enabled: bool,
    pub keep_recent_tokens: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_recent_tokens: 20_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Directory for file-backed snapshots; `None` keeps them in memory.
    pub dir: Option<PathBuf>,
    /// Maximum characters of final output stored per snapshot.
    pub output_cap_chars: usize,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            dir: None,
            output_cap_chars: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationSettings {
    pub enabled: bool,
    /// Probability in `[0, 1]` that an eligible run is evaluated.
    pub sample_rate: f64,
    pub queue_capacity: usize,
    pub timeout_ms: u64,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: 0.1,
            queue_capacity: 64,
            timeout_ms: 30_000,
        }
    }
}

/// A named profile: how a run mode maps onto the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub mode: ExecutionMode,
    pub entrypoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl WeaverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(WeaverError::Io(err)),
        };
        Self::from_toml_str(&raw)
    }

    /// Load `weaver.toml` from the default directory, then apply env overrides.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::load(&Self::default_dir().join(CONFIG_FILE_NAME))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// `~/.weaver`, or `.weaver` when no home directory is known.
    pub fn default_dir() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".weaver"))
            .unwrap_or_else(|| PathBuf::from(".weaver"))
    }

    /// Apply `WEAVER_*` overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("WEAVER_COMPACTION_ENABLED") {
            self.compaction.enabled = parse_env("WEAVER_COMPACTION_ENABLED", &value)?;
        }
        if let Some(value) = lookup("WEAVER_KEEP_RECENT_TOKENS") {
            self.compaction.keep_recent_tokens = parse_env("WEAVER_KEEP_RECENT_TOKENS", &value)?;
        }
        if let Some(value) = lookup("WEAVER_SNAPSHOT_DIR") {
            self.snapshots.dir = (!value.trim().is_empty()).then(|| PathBuf::from(value));
        }
        if let Some(value) = lookup("WEAVER_SNAPSHOT_OUTPUT_CAP") {
            self.snapshots.output_cap_chars = parse_env("WEAVER_SNAPSHOT_OUTPUT_CAP", &value)?;
        }
        if let Some(value) = lookup("WEAVER_EVAL_ENABLED") {
            self.evaluation.enabled = parse_env("WEAVER_EVAL_ENABLED", &value)?;
        }
        if let Some(value) = lookup("WEAVER_EVAL_SAMPLE_RATE") {
            self.evaluation.sample_rate = parse_env("WEAVER_EVAL_SAMPLE_RATE", &value)?;
        }
        self.validate()
    }

    pub fn with_profile(mut self, name: impl Into<String>, profile: ProfileConfig) -> Self {
        self.profiles.insert(name.into(), profile);
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.evaluation.sample_rate) {
            return Err(WeaverError::Configuration(format!(
                "evaluation.sample_rate must be within [0, 1], got {}",
                self.evaluation.sample_rate
            )));
        }
        if self.evaluation.queue_capacity == 0 {
            return Err(WeaverError::Configuration(
                "evaluation.queue_capacity must be at least 1".to_string(),
            ));
        }
        for (name, profile) in &self.profiles {
            if profile.entrypoint.trim().is_empty() {
                return Err(WeaverError::Configuration(format!(
                    "profile '{name}' has an empty entrypoint"
                )));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| WeaverError::Configuration(format!("invalid value for {key}: '{value}'")))
}
