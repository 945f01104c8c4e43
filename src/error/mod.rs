//! Error types for Weaver.

pub mod guidance;

pub use guidance::{guidance_for, ProviderGuidance};

use thiserror::Error;

/// Prefix carried by every user-visible error text part.
pub const AGENT_ERROR_PREFIX: &str = "Agent error: ";

/// Primary error type for all Weaver operations.
#[derive(Error, Debug)]
pub enum WeaverError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No agent profiles are configured")]
    NoProfiles,

    #[error("Unknown profile or run mode '{0}'")]
    UnknownProfile(String),

    #[error("Engine error: {message}")]
    Engine {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Broad error category, used to pick how an error reaches the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Run mode or profile could not be resolved.
    Resolution,
    /// The agent engine failed while producing events.
    Engine,
    Configuration,
    Storage,
    Evaluation,
    Timeout,
    Unknown,
}

impl WeaverError {
    /// Create an engine error from a message.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
            source: None,
        }
    }

    /// Create an engine error wrapping an underlying cause.
    pub fn engine_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Engine {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoProfiles | Self::UnknownProfile(_) => ErrorCategory::Resolution,
            Self::Engine { .. } | Self::Stream(_) | Self::UnsupportedOperation(_) => {
                ErrorCategory::Engine
            }
            Self::Configuration(_) | Self::TomlParse(_) => ErrorCategory::Configuration,
            Self::Storage(_) | Self::Io(_) | Self::Serialization(_) => ErrorCategory::Storage,
            Self::Evaluation(_) => ErrorCategory::Evaluation,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error must abort the turn before any chunk is emitted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoProfiles)
    }

    /// Text shown to the user in place of the failed turn's content.
    ///
    /// Known provider capability failures are replaced with guidance on how
    /// to fix the setup; everything else is surfaced verbatim.
    pub fn user_message(&self) -> String {
        let raw = self.to_string();
        match guidance_for(&raw) {
            Some(guidance) => format!("{AGENT_ERROR_PREFIX}{}", guidance.message()),
            None => format!("{AGENT_ERROR_PREFIX}{raw}"),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, WeaverError>;
