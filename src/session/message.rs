use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tool::ToolOutcome;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call identifier
    pub id: String,
    /// The name of the tool to call
    pub name: String,
    /// The arguments to pass to the tool
    pub arguments: Value,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Unique identifier for the turn
    pub id: String,
    /// Timestamp when the turn was recorded
    pub created_at: DateTime<Utc>,
    /// What was said
    #[serde(flatten)]
    pub content: TurnContent,
}

/// The payload of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum TurnContent {
    /// A user message
    User { text: String },
    /// Model output: a final answer, or text alongside tool-call requests
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    /// The outcome of one tool call
    ToolResult {
        call_id: String,
        tool_name: String,
        outcome: ToolOutcome,
    },
}

impl ConversationTurn {
    fn with_content(content: TurnContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            content,
        }
    }

    /// Creates a new user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_content(TurnContent::User { text: text.into() })
    }

    /// Creates a final-answer assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_content(TurnContent::Assistant {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        })
    }

    /// Creates an assistant turn requesting tool calls.
    pub fn assistant_tool_calls(text: Option<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self::with_content(TurnContent::Assistant { text, tool_calls })
    }

    /// Creates a tool result turn.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        outcome: ToolOutcome,
    ) -> Self {
        Self::with_content(TurnContent::ToolResult {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            outcome,
        })
    }

    /// The text of a user or assistant turn.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::User { text } => Some(text),
            TurnContent::Assistant { text, .. } => text.as_deref(),
            TurnContent::ToolResult { .. } => None,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self.content, TurnContent::ToolResult { .. })
    }
}
