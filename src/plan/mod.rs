//! Run-mode resolution into an execution plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{ProfileConfig, WeaverConfig};
use crate::error::{Result, WeaverError};
use crate::types::ExecutionMode;

/// Where a run mode routes: execution mode, entrypoint and extra metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub profile: String,
    pub mode: ExecutionMode,
    pub entrypoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Maps a run-mode name to an [`ExecutionPlan`].
pub trait PlanResolver: Send + Sync {
    /// Fails with [`WeaverError::UnknownProfile`] for unmapped run modes.
    fn resolve(&self, run_mode: &str) -> Result<ExecutionPlan>;

    /// Whether any profile is configured at all.
    fn has_profiles(&self) -> bool;
}

/// Resolver backed by the `[profiles]` table of [`WeaverConfig`].
///
/// The run mode is looked up as a profile name, case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ProfilePlanResolver {
    profiles: BTreeMap<String, ProfileConfig>,
}

impl ProfilePlanResolver {
    pub fn new(profiles: BTreeMap<String, ProfileConfig>) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|(name, profile)| (name.trim().to_ascii_lowercase(), profile))
            .collect();
        Self { profiles }
    }

    pub fn from_config(config: &WeaverConfig) -> Self {
        Self::new(config.profiles.clone())
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

impl PlanResolver for ProfilePlanResolver {
    fn resolve(&self, run_mode: &str) -> Result<ExecutionPlan> {
        let key = run_mode.trim().to_ascii_lowercase();
        let profile = self
            .profiles
            .get(&key)
            .ok_or_else(|| WeaverError::UnknownProfile(run_mode.to_string()))?;
        Ok(ExecutionPlan {
            profile: key,
            mode: profile.mode,
            entrypoint: profile.entrypoint.clone(),
            model_id: profile.model_id.clone(),
            metadata: profile.metadata.clone(),
        })
    }

    fn has_profiles(&self) -> bool {
        !self.profiles.is_empty()
    }
}
