//! Token-budget trimming of conversation history for multi-agent prompts.
//!
//! Single-agent turns never go through here; their history is injected into
//! the engine's own message list instead.

use serde::{Deserialize, Serialize};

use crate::config::CompactionSettings;
use crate::types::{ConversationMessage, MessageContent, Role};

const MESSAGE_OVERHEAD_TOKENS: usize = 4;
const STRUCTURED_PART_OVERHEAD_TOKENS: usize = 8;

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_text_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

pub fn estimate_message_tokens(message: &ConversationMessage) -> usize {
    let mut tokens = MESSAGE_OVERHEAD_TOKENS;
    for part in &message.content {
        tokens += match part {
            MessageContent::Text { text } => estimate_text_tokens(text),
            MessageContent::ToolCall {
                id,
                name,
                arguments,
            } => {
                let args = serde_json::to_string(arguments).unwrap_or_default();
                estimate_text_tokens(id)
                    + estimate_text_tokens(name)
                    + estimate_text_tokens(&args)
                    + STRUCTURED_PART_OVERHEAD_TOKENS
            }
            MessageContent::ToolResult {
                tool_call_id,
                result,
                ..
            } => {
                let payload = serde_json::to_string(result).unwrap_or_default();
                estimate_text_tokens(tool_call_id)
                    + estimate_text_tokens(&payload)
                    + STRUCTURED_PART_OVERHEAD_TOKENS
            }
        };
    }
    if let Some(name) = &message.name {
        tokens += estimate_text_tokens(name);
    }
    tokens
}

/// Outcome of one compaction pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionDecision {
    pub kept_messages: Vec<ConversationMessage>,
    pub dropped_messages: Vec<ConversationMessage>,
    /// Index of the first kept message; 0 or a user message.
    pub first_kept_index: usize,
    pub tokens_before: usize,
    pub kept_tokens: usize,
}

impl CompactionDecision {
    fn keep_all(messages: &[ConversationMessage], tokens_before: usize) -> Self {
        Self {
            kept_messages: messages.to_vec(),
            dropped_messages: Vec::new(),
            first_kept_index: 0,
            tokens_before,
            kept_tokens: tokens_before,
        }
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped_messages.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCompactor {
    pub keep_recent_tokens: usize,
    pub enabled: bool,
}

impl Default for ContextCompactor {
    fn default() -> Self {
        Self::from_settings(&CompactionSettings::default())
    }
}

impl ContextCompactor {
    pub fn new(keep_recent_tokens: usize) -> Self {
        Self {
            keep_recent_tokens,
            enabled: true,
        }
    }

    pub fn from_settings(settings: &CompactionSettings) -> Self {
        Self {
            keep_recent_tokens: settings.keep_recent_tokens,
            enabled: settings.enabled,
        }
    }

    /// Split history into dropped and kept messages.
    ///
    /// Walks newest to oldest until the kept estimate reaches the budget,
    /// then keeps walking back to a user message so an exchange is never cut.
    pub fn compact(&self, messages: &[ConversationMessage]) -> CompactionDecision {
        let tokens_before: usize = messages.iter().map(estimate_message_tokens).sum();
        if !self.enabled || messages.is_empty() || tokens_before <= self.keep_recent_tokens {
            return CompactionDecision::keep_all(messages, tokens_before);
        }

        let mut kept_tokens = 0usize;
        let mut cut_index = 0usize;
        for idx in (0..messages.len()).rev() {
            kept_tokens += estimate_message_tokens(&messages[idx]);
            if kept_tokens >= self.keep_recent_tokens {
                cut_index = idx;
                break;
            }
        }

        while cut_index > 0 && messages[cut_index].role != Role::User {
            cut_index -= 1;
        }
        if cut_index == 0 {
            return CompactionDecision::keep_all(messages, tokens_before);
        }

        let kept_tokens = messages[cut_index..]
            .iter()
            .map(estimate_message_tokens)
            .sum();
        tracing::debug!(
            tokens_before,
            kept_tokens,
            dropped = cut_index,
            keep_recent_tokens = self.keep_recent_tokens,
            "compacted conversation history"
        );
        CompactionDecision {
            kept_messages: messages[cut_index..].to_vec(),
            dropped_messages: messages[..cut_index].to_vec(),
            first_kept_index: cut_index,
            tokens_before,
            kept_tokens,
        }
    }
}

/// Serialize kept history plus the current request into one prompt string.
pub fn assemble_multi_agent_prompt(decision: &CompactionDecision, prompt: &str) -> String {
    let history: Vec<String> = decision
        .kept_messages
        .iter()
        .filter_map(|message| {
            let text = message.text();
            let text = text.trim();
            (!text.is_empty()).then(|| format!("[{}] {}", message.role.as_str(), text))
        })
        .collect();
    if history.is_empty() && decision.dropped_messages.is_empty() {
        return prompt.to_string();
    }

    let mut out = String::from("Conversation so far:\n");
    if !decision.dropped_messages.is_empty() {
        out.push_str(&format!(
            "({} earlier messages omitted)\n",
            decision.dropped_messages.len()
        ));
    }
    for line in history {
        out.push_str(&line);
        out.push('\n');
    }
    out.push_str("\nCurrent request:\n");
    out.push_str(prompt);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn exchange(n: usize, size: usize) -> Vec<ConversationMessage> {
        (0..n)
            .flat_map(|i| {
                [
                    ConversationMessage::user(format!("q{i} {}", "u".repeat(size))),
                    ConversationMessage::assistant(format!("a{i} {}", "a".repeat(size))),
                ]
            })
            .collect()
    }

    #[test]
    fn estimate_text_tokens_rounds_up() {
        assert_eq!(estimate_text_tokens(""), 0);
        assert_eq!(estimate_text_tokens("abc"), 1);
        assert_eq!(estimate_text_tokens("abcde"), 2);
    }

    #[test]
    fn under_budget_keeps_everything() {
        let messages = exchange(2, 10);
        let decision = ContextCompactor::new(10_000).compact(&messages);
        assert_eq!(decision.kept_messages, messages);
        assert!(decision.dropped_messages.is_empty());
        assert_eq!(decision.first_kept_index, 0);
    }

    #[test]
    fn cut_lands_on_user_message_and_meets_budget() {
        let messages = exchange(10, 200);
        let budget = 150;
        let decision = ContextCompactor::new(budget).compact(&messages);

        assert!(decision.first_kept_index > 0);
        assert!(messages[decision.first_kept_index].is_user());
        assert!(decision.kept_tokens >= budget);
        assert_eq!(
            decision.kept_messages.len() + decision.dropped_messages.len(),
            messages.len()
        );
        assert_eq!(decision.kept_messages[0], messages[decision.first_kept_index]);
    }

    #[test]
    fn kept_tokens_meet_budget_for_varied_budgets() {
        let messages = exchange(8, 120);
        for budget in [0, 1, 40, 100, 333, 700, 5_000] {
            let decision = ContextCompactor::new(budget).compact(&messages);
            let first = decision.first_kept_index;
            assert!(first == 0 || messages[first].is_user(), "budget {budget}");
            assert!(
                decision.kept_tokens >= budget || decision.kept_messages.len() == messages.len(),
                "budget {budget}"
            );
        }
    }

    #[test]
    fn no_user_message_before_cut_keeps_everything() {
        let messages: Vec<_> = (0..6)
            .map(|i| ConversationMessage::assistant(format!("{i} {}", "x".repeat(100))))
            .collect();
        let decision = ContextCompactor::new(40).compact(&messages);
        assert_eq!(decision.first_kept_index, 0);
        assert_eq!(decision.kept_messages.len(), 6);
    }

    #[test]
    fn disabled_compactor_keeps_everything() {
        let messages = exchange(10, 200);
        let compactor = ContextCompactor {
            keep_recent_tokens: 10,
            enabled: false,
        };
        assert_eq!(compactor.compact(&messages).kept_messages.len(), messages.len());
    }

    #[test]
    fn assembled_prompt_lists_history_then_request() {
        let messages = vec![
            ConversationMessage::user("old question"),
            ConversationMessage::assistant("old answer"),
            ConversationMessage::user("recent question"),
            ConversationMessage::assistant("recent answer"),
        ];
        let decision = CompactionDecision {
            kept_messages: messages[2..].to_vec(),
            dropped_messages: messages[..2].to_vec(),
            first_kept_index: 2,
            tokens_before: 0,
            kept_tokens: 0,
        };
        let prompt = assemble_multi_agent_prompt(&decision, "next step?");
        assert_eq!(
            prompt,
            "Conversation so far:\n(2 earlier messages omitted)\n[user] recent question\n[assistant] recent answer\n\nCurrent request:\nnext step?"
        );
    }

    #[test]
    fn empty_history_passes_prompt_through() {
        let decision = ContextCompactor::default().compact(&[]);
        assert_eq!(assemble_multi_agent_prompt(&decision, "hello"), "hello");
    }
}
