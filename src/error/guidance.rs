//! Actionable guidance for known provider capability failures.

use std::sync::OnceLock;

use regex::Regex;

/// A recognized provider failure with a fix the user can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderGuidance {
    /// The model cannot call tools while streaming.
    StreamingToolUse,
    /// The model only accepts requests through a different API surface.
    ResponsesApiRequired,
    /// The model has no tool calling support at all.
    ToolsUnsupported,
    ContextLengthExceeded,
    RateLimited,
    ModelAccessDenied,
}

impl ProviderGuidance {
    /// Replacement text shown to the user.
    pub fn message(&self) -> &'static str {
        match self {
            Self::StreamingToolUse => {
                "The selected model does not support tool use while streaming. \
                 Pick a model with streaming tool support for this run mode, \
                 or disable tools for this profile."
            }
            Self::ResponsesApiRequired => {
                "The selected model must be invoked through the Responses API. \
                 Switch the profile to a responses-capable provider configuration \
                 or choose a chat-completions model."
            }
            Self::ToolsUnsupported => {
                "The selected model does not support tool calling. \
                 Choose a tool-capable model or remove tool groups from this profile."
            }
            Self::ContextLengthExceeded => {
                "The conversation is too long for the selected model's context window. \
                 Start a new thread or lower the compaction keep-recent budget."
            }
            Self::RateLimited => {
                "The model provider is rate limiting requests. Wait a moment and try again."
            }
            Self::ModelAccessDenied => {
                "The configured credentials do not have access to the selected model. \
                 Enable model access with the provider or choose another model."
            }
        }
    }
}

fn patterns() -> &'static [(Regex, ProviderGuidance)] {
    static PATTERNS: OnceLock<Vec<(Regex, ProviderGuidance)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (
                r"(?i)(doesn't|does not) support tool use in streaming mode",
                ProviderGuidance::StreamingToolUse,
            ),
            (
                r"(?i)(only supported in v1/responses|requires the responses api)",
                ProviderGuidance::ResponsesApiRequired,
            ),
            (
                r"(?i)((doesn't|does not) support (tools|tool use|function calling)|tool use is not supported)",
                ProviderGuidance::ToolsUnsupported,
            ),
            (
                r"(?i)(context length|context window|too many (input )?tokens|input is too long)",
                ProviderGuidance::ContextLengthExceeded,
            ),
            (
                r"(?i)(throttlingexception|too many requests|rate limit)",
                ProviderGuidance::RateLimited,
            ),
            (
                r"(?i)(accessdeniedexception|(don't|do not) have access to the model)",
                ProviderGuidance::ModelAccessDenied,
            ),
        ]
        .into_iter()
        .map(|(pattern, guidance)| {
            (
                Regex::new(pattern).expect("provider guidance regex must compile"),
                guidance,
            )
        })
        .collect()
    })
}

/// Match an error message against known provider capability failures.
///
/// Earlier patterns win, so the streaming-specific tool error is reported
/// even though it also mentions tool use.
pub fn guidance_for(message: &str) -> Option<ProviderGuidance> {
    patterns()
        .iter()
        .find(|(regex, _)| regex.is_match(message))
        .map(|(_, guidance)| *guidance)
}
