//! Tools that ship with the crate.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::tool::{DynTool, PropertySchema, StaticSource, Tool, ToolError, ToolSchema};

const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";

/// The built-in tools as a discovery source.
pub fn builtin_source(interactive: bool) -> StaticSource {
    StaticSource::new("builtin")
        .with("ask_user", move || Ok(Arc::new(AskUserTool::new(interactive)) as DynTool))
        .with("search_web", || Ok(Arc::new(WebSearchTool::new()?) as DynTool))
}

/// Asks the human for clarification.
#[derive(Debug, Clone)]
pub struct AskUserTool {
    interactive: bool,
}

impl AskUserTool {
    /// When `interactive` is false the tool answers that no user is available.
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }
}

#[async_trait]
impl Tool for AskUserTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "ask_user",
            "Ask the user for clarification or additional information when the request is unclear",
        )
        .with_property(
            "question",
            PropertySchema::string("A clear, specific question to ask the user"),
            true,
        )
        .read_only()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let question = args["question"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("question is required".to_string()))?;

        if !self.interactive {
            return Ok("User feedback not available in evaluation mode".to_string());
        }

        let prompt = format!("\nAgent question: {question}\nYour answer: ");
        // std's stdin is shared with the rest of the process, so lines queued
        // behind the answer stay readable by the chat prompt.
        tokio::task::spawn_blocking(move || {
            let mut stdout = io::stdout();
            stdout.write_all(prompt.as_bytes())?;
            stdout.flush()?;
            read_answer(&mut io::stdin().lock())
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Error asking user: {e}")))?
        .map_err(|e| ToolError::ExecutionFailed(format!("Error asking user: {e}")))
    }
}

/// Reads exactly one line of answer, leaving anything after it in `reader`.
fn read_answer(reader: &mut impl BufRead) -> io::Result<String> {
    let mut answer = String::new();
    if reader.read_line(&mut answer)? == 0 {
        return Ok("User interaction cancelled".to_string());
    }
    let answer = answer.trim();
    if answer.is_empty() {
        Ok("No response provided".to_string())
    } else {
        Ok(answer.to_string())
    }
}

/// Web lookup through DuckDuckGo's Instant Answer API.
#[derive(Debug, Clone)]
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstantAnswer {
    #[serde(default)]
    answer: Value,
    #[serde(default)]
    r#abstract: String,
    #[serde(default)]
    abstract_text: String,
    #[serde(default)]
    related_topics: Vec<Value>,
}

impl WebSearchTool {
    pub fn new() -> Result<Self, ToolError> {
        Self::with_endpoint(DUCKDUCKGO_URL)
    }

    /// Points the tool at another Instant Answer compatible endpoint.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "search_web",
            "Search the web for current information, news, or facts not in training data",
        )
        .with_property(
            "query",
            PropertySchema::string("Search query - be specific and concise"),
            true,
        )
        .read_only()
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("query is required".to_string()))?;

        debug!(%query, "Searching the web");

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| search_error(query, e))?;

        let answer: InstantAnswer = response
            .json()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Error searching web: {e}")))?;

        Ok(format_results(query, &answer))
    }
}

fn search_error(query: &str, error: reqwest::Error) -> ToolError {
    if error.is_timeout() {
        ToolError::ExecutionFailed(format!("Search timed out for query: {query}"))
    } else {
        ToolError::ExecutionFailed(format!("Search failed: {error}"))
    }
}

fn format_results(query: &str, answer: &InstantAnswer) -> String {
    let mut lines = Vec::new();

    if let Some(direct) = answer.answer.as_str().filter(|a| !a.is_empty()) {
        lines.push(format!("Answer: {direct}"));
    }

    if !answer.r#abstract.is_empty() {
        lines.push(format!("Summary: {}", answer.r#abstract));
    } else if !answer.abstract_text.is_empty() {
        lines.push(format!("Summary: {}", answer.abstract_text));
    }

    if !answer.related_topics.is_empty() {
        lines.push("Related information:".to_string());
        let topics = answer
            .related_topics
            .iter()
            .take(3)
            .filter_map(|topic| topic.get("Text").and_then(Value::as_str));
        for (i, text) in topics.enumerate() {
            lines.push(format!("  {}. {}", i + 1, text));
        }
    }

    if lines.is_empty() {
        format!("No results found for: {query}")
    } else {
        format!("Search results for '{query}':\n\n{}", lines.join("\n"))
    }
}
