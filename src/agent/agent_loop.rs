use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::AgentConfig;
use super::events::{AgentEvent, EventHandler, NoopHandler};
use crate::approval::{ApprovalDecision, ApprovalHandler};
use crate::error::AgentError;
use crate::llm::{CompletionRequest, CompletionResponse, ModelProvider, ProviderError, ProviderReply};
use crate::session::{ConversationState, ConversationTurn, Metrics, ToolCallRequest};
use crate::tool::{ToolInvoker, ToolRegistry, ToolSchema};

/// Assistant text appended when a submit runs out of iterations.
pub const ITERATION_LIMIT_MESSAGE: &str = "I've reached the maximum number of iterations. Please try rephrasing your request or breaking it into smaller parts.";

/// Where the loop is in a submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingModel,
    AwaitingTools,
    Responding,
    Done,
    Failed,
}

/// What a completed submit produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    /// The final assistant text (or the iteration limit notice)
    pub text: String,
    /// Set when the iteration budget ran out
    pub truncated: bool,
    /// Counters for this submit only
    pub metrics: Metrics,
    /// Tools that actually ran, in order
    pub tools_used: Vec<String>,
}

/// A finished round, committed to the conversation as a unit.
struct Round {
    turns: Vec<ConversationTurn>,
    tools_used: Vec<String>,
    metrics: Metrics,
}

/// Drives multi-turn tool-calling conversations.
///
/// One loop owns one conversation. Submits are strictly sequential (they take
/// `&mut self`); the registry behind the invoker may be shared with other loops.
pub struct AgentLoop {
    provider: Arc<dyn ModelProvider>,
    invoker: ToolInvoker,
    conversation: ConversationState,
    config: AgentConfig,
    events: Arc<dyn EventHandler>,
    state: LoopState,
    first_submit: Option<Instant>,
}

impl AgentLoop {
    /// Creates a loop with a fresh conversation.
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        registry: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        let mut invoker =
            ToolInvoker::new(registry, config.approval.clone()).with_timeout(config.tool_timeout);
        if !config.parallel_tool_calls {
            invoker = invoker.sequential();
        }
        Self {
            provider,
            invoker,
            conversation: ConversationState::new(config.system_prompt.clone()),
            config,
            events: Arc::new(NoopHandler),
            state: LoopState::Idle,
            first_submit: None,
        }
    }

    /// Sets the handler asked about calls that need confirmation.
    pub fn with_approver(mut self, approver: Arc<dyn ApprovalHandler>) -> Self {
        self.invoker = self.invoker.with_approver(approver);
        self
    }

    /// Sets the receiver of loop events.
    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    /// Continues an existing conversation, e.g. one restored from a snapshot.
    pub fn with_conversation(mut self, conversation: ConversationState) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// Metrics accumulated over the whole conversation.
    pub fn metrics(&self) -> &Metrics {
        self.conversation.metrics()
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.invoker.registry()
    }

    pub fn into_conversation(self) -> ConversationState {
        self.conversation
    }

    /// Clears the conversation and returns to `Idle`.
    pub fn reset(&mut self) {
        self.conversation.reset();
        self.first_submit = None;
        self.state = LoopState::Idle;
    }

    /// Runs one user message to completion.
    pub async fn submit(&mut self, message: impl Into<String>) -> Result<LoopOutcome, AgentError> {
        self.submit_with_cancel(message, CancellationToken::new()).await
    }

    /// Like [`AgentLoop::submit`], abandoning in-flight work when `cancel` fires.
    ///
    /// An invalid configuration is rejected before the message is recorded.
    ///
    /// A round interrupted by cancellation is discarded whole: neither its
    /// assistant turn nor any of its tool results reach the conversation.
    pub async fn submit_with_cancel(
        &mut self,
        message: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<LoopOutcome, AgentError> {
        self.config.validate()?;

        let started = Instant::now();
        let first_submit = *self.first_submit.get_or_insert(started);

        info!(conversation = %self.conversation.id(), "Processing user message");
        self.conversation.append(ConversationTurn::user(message));

        let mut metrics = Metrics::default();
        let mut tools_used = Vec::new();
        let result = self.drive(&cancel, &mut metrics, &mut tools_used).await;

        metrics.elapsed = started.elapsed();
        if matches!(
            result,
            Err(AgentError::ContractViolation(_) | AgentError::Invariant(_))
        ) {
            metrics.error_count += 1;
        }
        let mut delta = metrics.clone();
        delta.elapsed = first_submit.elapsed();
        self.conversation.record_metrics(&delta);

        match result {
            Ok((text, truncated)) => {
                self.transition(LoopState::Done);
                self.events.on_event(&AgentEvent::Final {
                    text: text.clone(),
                    truncated,
                    metrics: metrics.clone(),
                });
                Ok(LoopOutcome {
                    text,
                    truncated,
                    metrics,
                    tools_used,
                })
            }
            Err(error) => {
                self.transition(LoopState::Failed);
                self.events.on_event(&AgentEvent::Failed {
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    async fn drive(
        &mut self,
        cancel: &CancellationToken,
        metrics: &mut Metrics,
        tools_used: &mut Vec<String>,
    ) -> Result<(String, bool), AgentError> {
        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            self.transition(LoopState::AwaitingModel);
            self.events.on_event(&AgentEvent::RoundStarted {
                iteration: metrics.iteration_count + 1,
            });
            let response = self.call_provider(cancel, metrics).await?;

            match response.reply {
                ProviderReply::Text(text) => {
                    self.transition(LoopState::Responding);
                    self.conversation.append(ConversationTurn::assistant(text.clone()));
                    return Ok((text, false));
                }
                ProviderReply::ToolCalls { calls, .. } if calls.is_empty() => {
                    return Err(AgentError::ContractViolation(
                        "model requested tool calls but supplied none".to_string(),
                    ));
                }
                ProviderReply::ToolCalls {
                    calls,
                    partial_text,
                } => {
                    self.transition(LoopState::AwaitingTools);
                    let round = self.run_round(calls, partial_text, cancel).await?;

                    self.conversation.append_all(round.turns);
                    metrics.merge(&round.metrics);
                    tools_used.extend(round.tools_used);
                    metrics.iteration_count += 1;

                    if metrics.iteration_count >= self.config.max_iterations {
                        self.events.on_event(&AgentEvent::IterationLimitReached {
                            max_iterations: self.config.max_iterations,
                        });
                        self.conversation
                            .append(ConversationTurn::assistant(ITERATION_LIMIT_MESSAGE));
                        return Ok((ITERATION_LIMIT_MESSAGE.to_string(), true));
                    }
                }
            }
        }
    }

    /// Calls the provider, retrying retryable failures with backoff.
    async fn call_provider(
        &self,
        cancel: &CancellationToken,
        metrics: &mut Metrics,
    ) -> Result<CompletionResponse, AgentError> {
        let tools = self.invoker.registry().list_schemas();
        ensure_unique_names(&tools)?;

        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: self.conversation.to_provider_format(),
            tools,
            timeout: self.config.provider_timeout,
        };
        let attempts = self.config.retry.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            metrics.api_calls += 1;
            debug!(attempt, messages = request.messages.len(), "Calling provider");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                result = tokio::time::timeout(request.timeout, self.provider.complete(request.clone())) => {
                    result.unwrap_or_else(|_| Err(ProviderError::timeout(request.timeout)))
                }
            };

            let error = match result {
                Ok(response) => {
                    metrics.total_tokens += response.usage.total();
                    let tool_calls = match &response.reply {
                        ProviderReply::ToolCalls { calls, .. } => calls.len(),
                        ProviderReply::Text(_) => 0,
                    };
                    self.events.on_event(&AgentEvent::ModelResponded {
                        usage: response.usage,
                        tool_calls,
                    });
                    return Ok(response);
                }
                Err(error) => error,
            };

            metrics.error_count += 1;
            if !error.retryable || attempt >= attempts {
                warn!(attempt, retryable = error.retryable, %error, "Provider call failed");
                return Err(AgentError::Provider(error));
            }

            let delay = self.config.retry.delay_for_attempt(attempt - 1);
            self.events.on_event(&AgentEvent::ProviderRetry {
                attempt,
                delay,
                error: error.to_string(),
            });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Decides, then invokes, every call of one round.
    async fn run_round(
        &self,
        calls: Vec<ToolCallRequest>,
        partial_text: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<Round, AgentError> {
        let mut decided = Vec::with_capacity(calls.len());
        for call in &calls {
            self.events.on_event(&AgentEvent::ToolCallProposed { call: call.clone() });
            let decision = self.invoker.propose(call);
            // Invalid calls never reach the policy; their validation failure
            // arrives as the tool result.
            if decision != ApprovalDecision::NotEvaluated {
                self.events.on_event(&AgentEvent::ApprovalDecided {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    decision,
                });
            }
            decided.push((call.clone(), decision));
        }

        let invocations = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(calls = decided.len(), "Cancelled, discarding round");
                return Err(AgentError::Cancelled);
            }
            invocations = self.invoker.invoke_round(&decided) => invocations,
        };

        let mut round = Round {
            turns: Vec::with_capacity(invocations.len() + 1),
            tools_used: Vec::new(),
            metrics: Metrics::default(),
        };
        round
            .turns
            .push(ConversationTurn::assistant_tool_calls(partial_text, calls));

        for invocation in invocations {
            if invocation.executed {
                round.metrics.tool_call_count += 1;
                round.tools_used.push(invocation.call.name.clone());
            }
            if invocation.is_failure() {
                round.metrics.error_count += 1;
            }
            self.events.on_event(&AgentEvent::ToolResult {
                call_id: invocation.call.id.clone(),
                tool_name: invocation.call.name.clone(),
                outcome: invocation.outcome.clone(),
                duration: invocation.duration,
            });
            round.turns.push(invocation.into_turn());
        }

        Ok(round)
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, "Loop state");
        self.state = next;
    }
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("state", &self.state)
            .field("conversation", &self.conversation.id())
            .field("invoker", &self.invoker)
            .field("config", &self.config)
            .finish()
    }
}

fn ensure_unique_names(schemas: &[ToolSchema]) -> Result<(), AgentError> {
    let mut seen = HashSet::with_capacity(schemas.len());
    for schema in schemas {
        if !seen.insert(schema.name.as_str()) {
            return Err(AgentError::Invariant(format!(
                "tool name '{}' is registered more than once",
                schema.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::ChannelHandler;
    use crate::approval::{ApprovalDecision, ApprovalMode, ApprovalPolicy};
    use crate::llm::{MockModelProvider, RetryPolicy};
    use crate::session::TurnContent;
    use crate::tool::{
        DynTool, PropertySchema, PropertyType, Tool, ToolError, ToolErrorKind, ToolFailure,
    };
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Replays canned responses and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<CompletionResponse>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<CompletionResponse>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelProvider for Scripted {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::fatal("script exhausted"))
        }
    }

    /// Asks for one more `add` call, forever.
    #[derive(Default)]
    struct AlwaysTools {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelProvider for AlwaysTools {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse::tool_calls(vec![add_call(&format!("call_{n}"), 1, 2)]).with_usage(10, 5))
        }
    }

    struct Add {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for Add {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("add", "Adds two numbers")
                .with_property("a", PropertySchema::new(PropertyType::Number), true)
                .with_property("b", PropertySchema::new(PropertyType::Number), true)
        }

        async fn execute(&self, args: Value) -> Result<String, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let sum = args["a"].as_f64().unwrap_or_default() + args["b"].as_f64().unwrap_or_default();
            Ok(sum.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("broken", "Always fails")
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            Err(ToolError::ExecutionFailed("backend unavailable".to_string()))
        }
    }

    struct Stalling;

    #[async_trait]
    impl Tool for Stalling {
        fn schema(&self) -> ToolSchema {
            ToolSchema::new("stall", "Never finishes in time")
        }

        async fn execute(&self, _args: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".to_string())
        }
    }

    fn add_call(id: &str, a: i64, b: i64) -> ToolCallRequest {
        ToolCallRequest::new(id, "add", json!({ "a": a, "b": b }))
    }

    fn registry(tools: Vec<DynTool>) -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        Arc::new(registry)
    }

    fn auto_config() -> AgentConfig {
        AgentConfig {
            approval: ApprovalPolicy::new(ApprovalMode::AutoApprove),
            retry: RetryPolicy::immediate(3),
            ..AgentConfig::default()
        }
    }

    fn adder() -> (Arc<ToolRegistry>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(vec![Arc::new(Add {
            calls: calls.clone(),
        })]);
        (registry, calls)
    }

    #[tokio::test]
    async fn plain_answer_without_tools() {
        let provider = Scripted::new(vec![CompletionResponse::text("4")]);
        let mut agent = AgentLoop::new(provider.clone(), registry(vec![]), auto_config());

        let outcome = agent.submit("2+2?").await.unwrap();

        assert_eq!(outcome.text, "4");
        assert!(!outcome.truncated);
        assert_eq!(outcome.metrics.iteration_count, 0);
        assert_eq!(outcome.metrics.tool_call_count, 0);
        assert_eq!(outcome.metrics.api_calls, 1);
        assert!(outcome.tools_used.is_empty());
        assert_eq!(agent.state(), LoopState::Done);
        assert_eq!(agent.conversation().len(), 2);
        assert_eq!(agent.conversation().last_assistant_text(), Some("4"));
        assert!(provider.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn iterations_count_rounds_not_calls() {
        let (registry, calls) = adder();
        let provider = Scripted::new(vec![
            CompletionResponse::tool_calls(vec![
                add_call("c1", 1, 1),
                add_call("c2", 2, 2),
                add_call("c3", 3, 3),
            ])
            .with_usage(100, 20),
            CompletionResponse::tool_calls(vec![add_call("c4", 4, 4)]).with_usage(150, 10),
            CompletionResponse::text("done").with_usage(200, 5),
        ]);
        let mut agent = AgentLoop::new(provider.clone(), registry, auto_config());

        let outcome = agent.submit("add some numbers").await.unwrap();

        assert_eq!(outcome.text, "done");
        assert_eq!(outcome.metrics.iteration_count, 2);
        assert_eq!(outcome.metrics.tool_call_count, 4);
        assert_eq!(outcome.metrics.total_tokens, 485);
        assert_eq!(outcome.tools_used, vec!["add"; 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        // user, assistant+3 results, assistant+1 result, final assistant
        assert_eq!(agent.conversation().len(), 1 + 4 + 2 + 1);

        // The third request carries the results of both rounds, in order.
        let ids: Vec<String> = provider.requests()[2]
            .messages
            .iter()
            .filter_map(|m| match m {
                crate::llm::ProviderMessage::Tool { tool_call_id, .. } => Some(tool_call_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["c1", "c2", "c3", "c4"]);
    }

    #[tokio::test]
    async fn iteration_limit_truncates() {
        let (registry, calls) = adder();
        let provider = Arc::new(AlwaysTools::default());
        let config = AgentConfig {
            max_iterations: 3,
            ..auto_config()
        };
        let mut agent = AgentLoop::new(provider.clone(), registry, config);

        let outcome = agent.submit("loop forever").await.unwrap();

        assert!(outcome.truncated);
        assert_eq!(outcome.text, ITERATION_LIMIT_MESSAGE);
        assert_eq!(outcome.metrics.iteration_count, 3);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(agent.state(), LoopState::Done);
        assert_eq!(
            agent.conversation().last_assistant_text(),
            Some(ITERATION_LIMIT_MESSAGE)
        );
    }

    #[tokio::test]
    async fn failing_tool_still_advances_the_round() {
        let provider = Scripted::new(vec![
            CompletionResponse::tool_calls(vec![ToolCallRequest::new("c1", "broken", json!({}))]),
            CompletionResponse::text("sorry, that failed"),
        ]);
        let mut agent = AgentLoop::new(provider, registry(vec![Arc::new(Broken)]), auto_config());

        let outcome = agent.submit("try it").await.unwrap();

        assert_eq!(outcome.metrics.iteration_count, 1);
        assert_eq!(outcome.metrics.error_count, 1);
        let result = agent
            .conversation()
            .turns()
            .iter()
            .find_map(|turn| match &turn.content {
                TurnContent::ToolResult { outcome, .. } => Some(outcome.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(result, Err(ToolFailure::execution("backend unavailable")));
    }

    #[tokio::test]
    async fn denied_calls_do_not_run() {
        let (registry, calls) = adder();
        let provider = Scripted::new(vec![
            CompletionResponse::tool_calls(vec![add_call("c1", 1, 2)]),
            CompletionResponse::text("ok, I won't"),
        ]);
        let config = AgentConfig {
            approval: ApprovalPolicy::new(ApprovalMode::AlwaysAsk),
            ..auto_config()
        };
        let (handler, mut events) = ChannelHandler::new();
        let mut agent =
            AgentLoop::new(provider, registry, config).with_event_handler(Arc::new(handler));

        let outcome = agent.submit("add 1 and 2").await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(outcome.tools_used.is_empty());
        assert_eq!(outcome.metrics.tool_call_count, 0);
        assert_eq!(outcome.metrics.error_count, 0);
        assert_eq!(outcome.metrics.iteration_count, 1);

        let mut decision = None;
        let mut result_kind = None;
        while let Ok(event) = events.try_recv() {
            match event {
                AgentEvent::ApprovalDecided { decision: d, .. } => decision = Some(d),
                AgentEvent::ToolResult { outcome, .. } => {
                    result_kind = outcome.err().map(|f| f.kind);
                }
                _ => {}
            }
        }
        assert_eq!(decision, Some(ApprovalDecision::UserDenied));
        assert_eq!(result_kind, Some(ToolErrorKind::ApprovalDenied));
    }

    #[tokio::test]
    async fn events_follow_the_loop() {
        let (registry, _) = adder();
        let provider = Scripted::new(vec![
            CompletionResponse::tool_calls(vec![add_call("c1", 1, 2)]),
            CompletionResponse::text("3"),
        ]);
        let (handler, mut events) = ChannelHandler::new();
        let mut agent =
            AgentLoop::new(provider, registry, auto_config()).with_event_handler(Arc::new(handler));

        agent.submit("1+2").await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(match event {
                AgentEvent::RoundStarted { .. } => "round",
                AgentEvent::ModelResponded { .. } => "model",
                AgentEvent::ToolCallProposed { .. } => "proposed",
                AgentEvent::ApprovalDecided { .. } => "approval",
                AgentEvent::ToolResult { .. } => "result",
                AgentEvent::Final { .. } => "final",
                _ => "other",
            });
        }
        assert_eq!(
            names,
            vec!["round", "model", "proposed", "approval", "result", "round", "model", "final"]
        );
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_the_model_is_called() {
        let provider = Scripted::new(vec![CompletionResponse::text("unreachable")]);
        let config = AgentConfig {
            max_iterations: 0,
            ..auto_config()
        };
        let mut agent = AgentLoop::new(provider.clone(), registry(vec![]), config);

        let err = agent.submit("hello").await.unwrap_err();

        assert!(matches!(err, AgentError::Config(_)), "{err}");
        assert!(provider.requests().is_empty());
        assert!(agent.conversation().is_empty());
        assert_eq!(agent.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn invalid_calls_skip_the_approval_event() {
        let (registry, calls) = adder();
        let provider = Scripted::new(vec![
            CompletionResponse::tool_calls(vec![
                ToolCallRequest::new("c1", "missing", json!({})),
                ToolCallRequest::new("c2", "add", json!({ "a": "one" })),
                add_call("c3", 1, 2),
            ]),
            CompletionResponse::text("3"),
        ]);
        let (handler, mut events) = ChannelHandler::new();
        let mut agent =
            AgentLoop::new(provider, registry, auto_config()).with_event_handler(Arc::new(handler));

        agent.submit("1+2").await.unwrap();

        let mut decided = Vec::new();
        let mut failures = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                AgentEvent::ApprovalDecided { call_id, decision, .. } => {
                    decided.push((call_id, decision));
                }
                AgentEvent::ToolResult {
                    call_id,
                    outcome: Err(failure),
                    ..
                } => failures.push((call_id, failure.kind)),
                _ => {}
            }
        }
        assert_eq!(
            decided,
            vec![("c3".to_string(), ApprovalDecision::AutoApproved)]
        );
        assert_eq!(
            failures,
            vec![
                ("c1".to_string(), ToolErrorKind::Validation),
                ("c2".to_string(), ToolErrorKind::Validation),
            ]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let mut provider = MockModelProvider::new();
        provider
            .expect_complete()
            .times(3)
            .returning(|_| Err(ProviderError::retryable("503 Service Unavailable")));
        let mut agent = AgentLoop::new(Arc::new(provider), registry(vec![]), auto_config());

        let err = agent.submit("hello").await.unwrap_err();

        assert!(matches!(err, AgentError::Provider(ref e) if e.retryable));
        assert_eq!(agent.state(), LoopState::Failed);
        assert_eq!(agent.metrics().api_calls, 3);
        assert_eq!(agent.metrics().error_count, 3);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let mut provider = MockModelProvider::new();
        provider.expect_complete().times(2).returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProviderError::retryable("rate limited"))
            } else {
                Ok(CompletionResponse::text("hi"))
            }
        });
        let mut agent = AgentLoop::new(Arc::new(provider), registry(vec![]), auto_config());

        let outcome = agent.submit("hello").await.unwrap();

        assert_eq!(outcome.text, "hi");
        assert_eq!(outcome.metrics.api_calls, 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let mut provider = MockModelProvider::new();
        provider
            .expect_complete()
            .times(1)
            .returning(|_| Err(ProviderError::fatal("401 Unauthorized")));
        let mut agent = AgentLoop::new(Arc::new(provider), registry(vec![]), auto_config());

        let err = agent.submit("hello").await.unwrap_err();

        assert!(matches!(err, AgentError::Provider(ref e) if !e.retryable));
        assert_eq!(agent.state(), LoopState::Failed);
        // The user turn stays; the failure is reported to the caller.
        assert_eq!(agent.conversation().len(), 1);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        struct Slow;

        #[async_trait]
        impl ModelProvider for Slow {
            async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(CompletionResponse::text("late"))
            }
        }

        let config = AgentConfig {
            provider_timeout: Duration::from_millis(20),
            retry: RetryPolicy::immediate(2),
            ..auto_config()
        };
        let mut agent = AgentLoop::new(Arc::new(Slow), registry(vec![]), config);

        let err = agent.submit("hello").await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert_eq!(agent.metrics().api_calls, 2);
    }

    #[tokio::test]
    async fn empty_tool_call_list_is_a_contract_violation() {
        let provider = Scripted::new(vec![CompletionResponse::tool_calls(vec![])]);
        let mut agent = AgentLoop::new(provider, registry(vec![]), auto_config());

        let err = agent.submit("hello").await.unwrap_err();

        assert!(matches!(err, AgentError::ContractViolation(_)));
        assert_eq!(agent.state(), LoopState::Failed);
        assert_eq!(agent.metrics().error_count, 1);
    }

    #[tokio::test]
    async fn cancellation_discards_the_round() {
        let provider = Scripted::new(vec![CompletionResponse::tool_calls(vec![
            ToolCallRequest::new("c1", "stall", json!({})),
        ])]);
        let mut agent = AgentLoop::new(provider, registry(vec![Arc::new(Stalling)]), auto_config());

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = agent.submit_with_cancel("wait", token).await.unwrap_err();

        assert!(matches!(err, AgentError::Cancelled));
        // Only the user turn survives: no assistant tool-call turn, no results.
        assert_eq!(agent.conversation().len(), 1);
        assert_eq!(agent.metrics().iteration_count, 0);
    }

    #[tokio::test]
    async fn cancellation_while_awaiting_the_model() {
        struct Stuck;

        #[async_trait]
        impl ModelProvider for Stuck {
            async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(CompletionResponse::text("late"))
            }
        }

        let config = AgentConfig {
            provider_timeout: Duration::from_secs(60),
            ..auto_config()
        };
        let mut agent = AgentLoop::new(Arc::new(Stuck), registry(vec![]), config);

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = agent.submit_with_cancel("hello", token).await.unwrap_err();

        assert!(matches!(err, AgentError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(agent.state(), LoopState::Failed);
        assert_eq!(agent.conversation().len(), 1);
        assert_eq!(agent.metrics().api_calls, 1);
    }

    #[tokio::test]
    async fn cancellation_drops_finished_results_of_a_half_done_round() {
        struct Quick {
            done: Arc<Notify>,
        }

        #[async_trait]
        impl Tool for Quick {
            fn schema(&self) -> ToolSchema {
                ToolSchema::new("quick", "Finishes at once")
            }

            async fn execute(&self, _args: Value) -> Result<String, ToolError> {
                self.done.notify_one();
                Ok("finished".to_string())
            }
        }

        let done = Arc::new(Notify::new());
        let provider = Scripted::new(vec![CompletionResponse::tool_calls(vec![
            ToolCallRequest::new("c1", "quick", json!({})),
            ToolCallRequest::new("c2", "stall", json!({})),
        ])]);
        let tools: Vec<DynTool> = vec![
            Arc::new(Quick { done: done.clone() }),
            Arc::new(Stalling),
        ];
        let config = AgentConfig {
            parallel_tool_calls: true,
            ..auto_config()
        };
        let mut agent = AgentLoop::new(provider, registry(tools), config);

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            done.notified().await;
            trigger.cancel();
        });

        let err = agent.submit_with_cancel("do both", token).await.unwrap_err();

        assert!(matches!(err, AgentError::Cancelled));
        // The quick result existed, but the round is discarded as a whole.
        assert_eq!(agent.conversation().len(), 1);
        assert!(agent.conversation().turns().iter().all(|turn| {
            !matches!(turn.content, TurnContent::ToolResult { .. })
        }));
        assert_eq!(agent.metrics().iteration_count, 0);
        assert_eq!(agent.metrics().tool_call_count, 0);
    }

    #[tokio::test]
    async fn conversation_carries_across_submits() {
        let provider = Scripted::new(vec![
            CompletionResponse::text("Hello, Ada."),
            CompletionResponse::text("Your name is Ada."),
        ]);
        let mut agent = AgentLoop::new(provider.clone(), registry(vec![]), auto_config());

        agent.submit("My name is Ada.").await.unwrap();
        let outcome = agent.submit("What is my name?").await.unwrap();

        assert_eq!(outcome.text, "Your name is Ada.");
        assert_eq!(agent.conversation().len(), 4);
        // system, user, assistant, user
        assert_eq!(provider.requests()[1].messages.len(), 4);
        assert_eq!(agent.metrics().api_calls, 2);

        agent.reset();
        assert!(agent.conversation().is_empty());
        assert_eq!(agent.state(), LoopState::Idle);
    }
}
