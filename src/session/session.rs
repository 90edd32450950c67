use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversationTurn, Metrics, TurnContent};
use crate::llm::ProviderMessage;

/// Fallback system prompt used when none is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to tools.

Your goal is to help users by answering questions and completing tasks. When you need additional information or capabilities beyond your knowledge, use the available tools.

Guidelines:
1. Think step by step and explain your reasoning
2. Use tools when you need current information or specific capabilities
3. Ask for clarification if the user's request is unclear
4. Provide clear, accurate, and helpful responses
5. Be honest about limitations and uncertainties

Available tools will be provided in each request. Use them wisely and only when necessary.";

/// An ordered, append-only conversation log plus its accumulated metrics.
#[derive(Debug, Clone)]
pub struct ConversationState {
    id: String,
    system_prompt: String,
    turns: Vec<ConversationTurn>,
    metrics: Metrics,
    created_at: DateTime<Utc>,
}

/// An immutable copy of a conversation, handed to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: String,
    pub system_prompt: String,
    pub turns: Vec<ConversationTurn>,
    pub metrics: Metrics,
    pub created_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl ConversationState {
    /// Creates an empty conversation with the given system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            system_prompt: system_prompt.into(),
            turns: Vec::new(),
            metrics: Metrics::default(),
            created_at: Utc::now(),
        }
    }

    /// Restores a conversation from a snapshot.
    pub fn from_snapshot(snapshot: ConversationSnapshot) -> Self {
        Self {
            id: snapshot.id,
            system_prompt: snapshot.system_prompt,
            turns: snapshot.turns,
            metrics: snapshot.metrics,
            created_at: snapshot.created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Adds a turn at the end of the log.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Adds several turns at once, preserving their order.
    pub fn append_all(&mut self, turns: impl IntoIterator<Item = ConversationTurn>) {
        self.turns.extend(turns);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Returns the number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent assistant text, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns.iter().rev().find_map(|turn| match &turn.content {
            TurnContent::Assistant { text, .. } => text.as_deref(),
            _ => None,
        })
    }

    /// Projects the log into the message sequence a provider expects.
    pub fn to_provider_format(&self) -> Vec<ProviderMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);

        if !self.system_prompt.is_empty() {
            messages.push(ProviderMessage::System {
                content: self.system_prompt.clone(),
            });
        }

        for turn in &self.turns {
            let message = match &turn.content {
                TurnContent::User { text } => ProviderMessage::User {
                    content: text.clone(),
                },
                TurnContent::Assistant { text, tool_calls } => ProviderMessage::Assistant {
                    content: text.clone(),
                    tool_calls: tool_calls.clone(),
                },
                TurnContent::ToolResult {
                    call_id,
                    tool_name,
                    outcome,
                } => ProviderMessage::Tool {
                    tool_call_id: call_id.clone(),
                    name: tool_name.clone(),
                    content: match outcome {
                        Ok(output) => output.clone(),
                        Err(failure) => format!("Error ({}): {}", failure.kind.as_str(), failure.message),
                    },
                },
            };
            messages.push(message);
        }

        messages
    }

    /// Merges a metrics delta.
    pub fn record_metrics(&mut self, delta: &Metrics) {
        self.metrics.merge(delta);
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Produces an immutable copy for persistence.
    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            id: self.id.clone(),
            system_prompt: self.system_prompt.clone(),
            turns: self.turns.clone(),
            metrics: self.metrics.clone(),
            created_at: self.created_at,
            saved_at: Utc::now(),
        }
    }

    /// Clears turns and metrics, keeping the id and system prompt.
    pub fn reset(&mut self) {
        self.turns.clear();
        self.metrics = Metrics::default();
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ToolCallRequest;
    use crate::tool::ToolFailure;
    use serde_json::json;

    fn sample_turns() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("What's the weather in Oslo?"),
            ConversationTurn::assistant_tool_calls(
                Some("Let me check.".to_string()),
                vec![
                    ToolCallRequest::new("call_1", "get_weather", json!({ "location": "Oslo" })),
                    ToolCallRequest::new("call_2", "delete_file", json!({ "path": "/tmp/x" })),
                ],
            ),
            ConversationTurn::tool_result("call_1", "get_weather", Ok("4°C and raining".to_string())),
            ConversationTurn::tool_result(
                "call_2",
                "delete_file",
                Err(ToolFailure::denied("Tool execution cancelled by user")),
            ),
            ConversationTurn::assistant("It's 4°C and raining in Oslo."),
        ]
    }

    #[test]
    fn provider_format_is_ordered() {
        let mut state = ConversationState::new("Be brief.");
        for turn in sample_turns() {
            state.append(turn);
        }

        let messages = state.to_provider_format();
        assert_eq!(messages.len(), 6);
        assert_eq!(
            messages[0],
            ProviderMessage::System {
                content: "Be brief.".to_string()
            }
        );
        assert!(matches!(&messages[2], ProviderMessage::Assistant { tool_calls, .. } if tool_calls.len() == 2));
        assert_eq!(
            messages[4],
            ProviderMessage::Tool {
                tool_call_id: "call_2".to_string(),
                name: "delete_file".to_string(),
                content: "Error (approval_denied): Tool execution cancelled by user".to_string(),
            }
        );
    }

    #[test]
    fn replayed_turns_reproduce_provider_format() {
        let mut original = ConversationState::new("Be brief.");
        original.append_all(sample_turns());

        let mut replayed = ConversationState::new("Be brief.");
        for turn in original.turns() {
            replayed.append(turn.clone());
        }

        assert_eq!(original.to_provider_format(), replayed.to_provider_format());
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut state = ConversationState::default();
        state.append_all(sample_turns());
        state.record_metrics(&Metrics::tokens(42));

        let json = serde_json::to_string(&state.snapshot()).unwrap();
        let restored = ConversationState::from_snapshot(serde_json::from_str(&json).unwrap());

        assert_eq!(restored.id(), state.id());
        assert_eq!(restored.metrics().total_tokens, 42);
        assert_eq!(restored.to_provider_format(), state.to_provider_format());
    }

    #[test]
    fn reset_clears_turns_and_metrics() {
        let mut state = ConversationState::default();
        state.append_all(sample_turns());
        state.record_metrics(&Metrics::errors(2));

        state.reset();
        assert!(state.is_empty());
        assert_eq!(state.metrics(), &Metrics::default());
        assert_eq!(state.system_prompt(), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn last_assistant_text() {
        let mut state = ConversationState::default();
        state.append_all(sample_turns());
        assert_eq!(state.last_assistant_text(), Some("It's 4°C and raining in Oslo."));
    }
}
