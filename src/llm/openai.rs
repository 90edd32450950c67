use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, ModelProvider, ProviderError, ProviderMessage, ProviderReply, Usage};
use crate::session::ToolCallRequest;
use crate::tool::ToolSchema;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI API response for chat completions.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: UsageInfo,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(default)]
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Default, Deserialize)]
struct UsageInfo {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// A provider for OpenAI-compatible chat-completions APIs.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
}

impl OpenAiProvider {
    /// Creates a new OpenAI-compatible provider.
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ProviderError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| ProviderError::fatal(format!("invalid API key header: {e}")))?,
        );
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );

        let mut client_builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder
            .build()
            .map_err(|e| ProviderError::fatal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }

    fn build_body(request: &CompletionRequest) -> ChatRequest {
        let tools: Vec<Value> = request.tools.iter().map(Self::tool_to_function).collect();

        ChatRequest {
            model: request.model.name.clone(),
            messages: request.messages.iter().map(Self::message_to_json).collect(),
            tools: if tools.is_empty() { None } else { Some(tools) },
            max_tokens: request.model.max_tokens,
            temperature: request.model.temperature,
            extra: request
                .model
                .extra
                .clone()
                .map(|extra| extra.into_iter().collect())
                .unwrap_or_default(),
        }
    }

    fn tool_to_function(schema: &ToolSchema) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": schema.name,
                "description": schema.description,
                "parameters": schema.parameters,
            }
        })
    }

    /// Converts one history message into the wire format.
    fn message_to_json(message: &ProviderMessage) -> Value {
        match message {
            ProviderMessage::System { content } => json!({ "role": "system", "content": content }),
            ProviderMessage::User { content } => json!({ "role": "user", "content": content }),
            ProviderMessage::Assistant {
                content,
                tool_calls,
            } if !tool_calls.is_empty() => {
                let calls: Vec<Value> = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string()
                            }
                        })
                    })
                    .collect();
                json!({ "role": "assistant", "content": content, "tool_calls": calls })
            }
            ProviderMessage::Assistant { content, .. } => {
                json!({ "role": "assistant", "content": content.clone().unwrap_or_default() })
            }
            ProviderMessage::Tool {
                tool_call_id,
                content,
                ..
            } => json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content }),
        }
    }

    /// Parses a chat-completions body into a reply.
    fn parse_completion(body: &str) -> Result<CompletionResponse, ProviderError> {
        let response: ChatCompletionResponse = serde_json::from_str(body)
            .map_err(|e| ProviderError::fatal(format!("invalid response: {e}: {body}")))?;

        let usage = Usage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
        };

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::fatal(format!("no choices in response: {body}")))?;

        let text = choice.message.content.filter(|t| !t.is_empty());
        let calls: Vec<ToolCallRequest> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCallRequest {
                id: call.id,
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments),
            })
            .collect();

        let reply = if calls.is_empty() {
            let text = text.ok_or_else(|| {
                ProviderError::fatal(format!(
                    "model returned an empty message (finish_reason: {})",
                    choice.finish_reason.as_deref().unwrap_or("none")
                ))
            })?;
            ProviderReply::Text(text)
        } else {
            ProviderReply::ToolCalls {
                calls,
                partial_text: text,
            }
        };

        Ok(CompletionResponse { reply, usage })
    }
}

/// Tool arguments arrive as a JSON string. Unparseable text is kept verbatim so
/// argument validation can report it back to the model.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn status_error(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("HTTP {}: {}", status.as_u16(), body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::retryable(message)
    } else {
        ProviderError::fatal(message)
    }
}

fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        ProviderError::retryable(format!("request failed: {error}"))
    } else {
        ProviderError::fatal(format!("request failed: {error}"))
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let body = Self::build_body(&request);
        debug!(model = %request.model.name, messages = body.messages.len(), "Sending chat completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        debug!(bytes = text.len(), "Received chat completion response");
        Self::parse_completion(&text)
    }
}
