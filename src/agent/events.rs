use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::approval::ApprovalDecision;
use crate::llm::Usage;
use crate::session::{Metrics, ToolCallRequest};
use crate::tool::ToolOutcome;

/// Events from the agent loop during a submit.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The model is about to be called
    RoundStarted { iteration: u32 },
    /// The model answered
    ModelResponded { usage: Usage, tool_calls: usize },
    /// A provider attempt failed and will be retried after `delay`
    ProviderRetry {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The model asked for a tool
    ToolCallProposed { call: ToolCallRequest },
    /// The approval policy (or the user) decided on a call
    ApprovalDecided {
        call_id: String,
        tool_name: String,
        decision: ApprovalDecision,
    },
    /// A call finished, failed, or was refused
    ToolResult {
        call_id: String,
        tool_name: String,
        outcome: ToolOutcome,
        duration: Duration,
    },
    /// The iteration budget ran out before a final answer
    IterationLimitReached { max_iterations: u32 },
    /// The submit finished
    Final {
        text: String,
        truncated: bool,
        metrics: Metrics,
    },
    /// The submit ended abnormally
    Failed { error: String },
}

/// Receives loop events. Called inline, so implementations should not block.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&self, _event: &AgentEvent) {}
}

/// Forwards events into `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::RoundStarted { iteration } => debug!(iteration, "Calling model"),
            AgentEvent::ModelResponded { usage, tool_calls } => debug!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                tool_calls,
                "Model responded"
            ),
            AgentEvent::ProviderRetry {
                attempt,
                delay,
                error,
            } => warn!(attempt, ?delay, %error, "Provider call failed, retrying"),
            AgentEvent::ToolCallProposed { call } => {
                info!(tool = %call.name, call_id = %call.id, "Tool call proposed")
            }
            AgentEvent::ApprovalDecided {
                tool_name,
                decision,
                ..
            } => debug!(tool = %tool_name, %decision, "Approval decided"),
            AgentEvent::ToolResult {
                tool_name,
                outcome,
                duration,
                ..
            } => match outcome {
                Ok(_) => info!(tool = %tool_name, ?duration, "Tool call finished"),
                Err(failure) => warn!(tool = %tool_name, %failure, "Tool call failed"),
            },
            AgentEvent::IterationLimitReached { max_iterations } => {
                warn!(max_iterations, "Iteration limit reached")
            }
            AgentEvent::Final {
                truncated, metrics, ..
            } => info!(
                truncated,
                iterations = metrics.iteration_count,
                tool_calls = metrics.tool_call_count,
                tokens = metrics.total_tokens,
                elapsed = ?metrics.elapsed,
                "Turn complete"
            ),
            AgentEvent::Failed { error } => error!(%error, "Turn failed"),
        }
    }
}

/// Sends a copy of every event down a channel, for consumers that prefer a stream.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    sender: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventHandler for ChannelHandler {
    fn on_event(&self, event: &AgentEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.sender.send(event.clone());
    }
}
