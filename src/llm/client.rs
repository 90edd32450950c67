use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::openai::OpenAiProvider;
use crate::session::ToolCallRequest;
use crate::tool::ToolSchema;

/// One message in the sequence sent to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ProviderMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

/// Configuration for the LLM model. Sampling options pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The model name (e.g., "gpt-4o-mini")
    pub name: String,
    /// Maximum number of tokens to generate
    pub max_tokens: u32,
    /// Temperature for sampling (0.0 to 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Additional model-specific parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<HashMap<String, Value>>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o-mini".to_string(),
            max_tokens: 4096,
            temperature: None,
            extra: None,
        }
    }
}

/// Input for a completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// The model settings
    pub model: ModelConfig,
    /// Full conversation history, system prompt first
    pub messages: Vec<ProviderMessage>,
    /// Available tools for the model
    pub tools: Vec<ToolSchema>,
    /// How long the caller will wait for this request
    pub timeout: Duration,
}

/// What the model answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderReply {
    /// A final answer
    Text(String),
    /// A request to run tools, possibly with some accompanying text
    ToolCalls {
        calls: Vec<ToolCallRequest>,
        partial_text: Option<String>,
    },
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of input tokens
    pub input_tokens: u32,
    /// Number of output tokens
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// Output from a completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub reply: ProviderReply,
    pub usage: Usage,
}

impl CompletionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            reply: ProviderReply::Text(text.into()),
            usage: Usage::default(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            reply: ProviderReply::ToolCalls {
                calls,
                partial_text: None,
            },
            usage: Usage::default(),
        }
    }

    pub fn with_usage(mut self, input_tokens: u32, output_tokens: u32) -> Self {
        self.usage = Usage {
            input_tokens,
            output_tokens,
        };
        self
    }
}

/// A provider failure. The provider decides whether retrying can help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    /// A transient failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A permanent failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// The request did not finish in time.
    pub fn timeout(after: Duration) -> Self {
        Self::retryable(format!("provider timed out after {after:?}"))
    }
}

/// The model-provider collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Sends the history and tool schemas, returning the model's reply.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError>;
}

/// A builder for creating providers.
#[derive(Debug, Default)]
pub struct ProviderBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl ProviderBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Creates an OpenAI-compatible provider.
    pub fn build_openai(self) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let api_key = self
            .api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| ProviderError::fatal("OpenAI API key not provided"))?;
        let base_url = self
            .base_url
            .or_else(|| std::env::var("OPENAI_API_BASE_URL").ok());
        Ok(Arc::new(OpenAiProvider::new(api_key, base_url, self.timeout)?))
    }
}
