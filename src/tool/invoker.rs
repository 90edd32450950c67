use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::approval::{
    ApprovalDecision, ApprovalHandler, ApprovalPolicy, ApprovalRequest, DenyAll, PolicyVerdict,
};
use crate::session::{ConversationTurn, ToolCallRequest};
use crate::tool::source::panic_message;
use crate::tool::{ToolErrorKind, ToolFailure, ToolOutcome, ToolRegistry};

/// Default per-call timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// The result of one proposed call, whether or not it ran.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub call: ToolCallRequest,
    pub decision: ApprovalDecision,
    pub outcome: ToolOutcome,
    /// Whether the implementation was actually called
    pub executed: bool,
    pub duration: Duration,
}

impl ToolInvocation {
    pub fn is_error(&self) -> bool {
        self.outcome.is_err()
    }

    /// Whether this counts as a failure (denials are a normal outcome).
    pub fn is_failure(&self) -> bool {
        matches!(&self.outcome, Err(f) if f.kind != ToolErrorKind::ApprovalDenied)
    }

    /// Converts into the tool-result turn recorded in the conversation.
    pub fn into_turn(self) -> ConversationTurn {
        ConversationTurn::tool_result(self.call.id, self.call.name, self.outcome)
    }
}

/// Looks up, approves, validates, and executes tool calls.
///
/// Every fault is turned into a [`ToolFailure`]; nothing a tool does can
/// escape as an error or panic into the caller.
#[derive(Clone)]
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    policy: ApprovalPolicy,
    approver: Arc<dyn ApprovalHandler>,
    timeout: Duration,
    concurrent: bool,
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl ToolInvoker {
    /// Creates an invoker that denies anything needing confirmation.
    pub fn new(registry: Arc<ToolRegistry>, policy: ApprovalPolicy) -> Self {
        Self {
            registry,
            policy,
            approver: Arc::new(DenyAll),
            timeout: DEFAULT_TOOL_TIMEOUT,
            concurrent: true,
        }
    }

    /// Sets the handler consulted for interactive approvals.
    pub fn with_approver(mut self, approver: Arc<dyn ApprovalHandler>) -> Self {
        self.approver = approver;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs a round's approved calls one after another instead of concurrently.
    pub fn sequential(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Decides whether a call may run.
    ///
    /// Calls that cannot run (unknown tool, arguments violating the contract)
    /// come back as [`ApprovalDecision::NotEvaluated`] without consulting the
    /// policy or the handler; `invoke` then reports the validation failure.
    pub fn propose(&self, call: &ToolCallRequest) -> ApprovalDecision {
        let Some(registered) = self.registry.get(&call.name) else {
            return ApprovalDecision::NotEvaluated;
        };
        let schema = registered.schema();
        if schema.validate_arguments(&call.arguments).is_err() {
            return ApprovalDecision::NotEvaluated;
        }

        match self.policy.evaluate(schema, &call.arguments) {
            PolicyVerdict::Allow => ApprovalDecision::AutoApproved,
            PolicyVerdict::Deny => ApprovalDecision::PolicyDenied,
            PolicyVerdict::Ask => {
                let request = ApprovalRequest {
                    call_id: &call.id,
                    tool_name: &call.name,
                    arguments: &call.arguments,
                    read_only: schema.read_only,
                };
                if self.approver.request_approval(&request) {
                    ApprovalDecision::UserApproved
                } else {
                    ApprovalDecision::UserDenied
                }
            }
        }
    }

    /// Executes a call under a prior decision.
    pub async fn invoke(&self, call: &ToolCallRequest, decision: ApprovalDecision) -> ToolInvocation {
        let started = Instant::now();
        let (outcome, executed) = self.invoke_inner(call, decision).await;
        let duration = started.elapsed();

        match &outcome {
            Ok(_) => debug!(tool = %call.name, call_id = %call.id, ?duration, "Tool call succeeded"),
            Err(failure) => {
                warn!(tool = %call.name, call_id = %call.id, kind = failure.kind.as_str(), error = %failure.message, "Tool call failed")
            }
        }

        ToolInvocation {
            call: call.clone(),
            decision,
            outcome,
            executed,
            duration,
        }
    }

    /// Proposes and invokes a single call.
    pub async fn run(&self, call: &ToolCallRequest) -> ToolInvocation {
        let decision = self.propose(call);
        self.invoke(call, decision).await
    }

    /// Invokes one round of decided calls. Results come back in request
    /// order, whatever order the calls finish in.
    pub async fn invoke_round(
        &self,
        calls: &[(ToolCallRequest, ApprovalDecision)],
    ) -> Vec<ToolInvocation> {
        if self.concurrent {
            join_all(calls.iter().map(|(call, decision)| self.invoke(call, *decision))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for (call, decision) in calls {
                results.push(self.invoke(call, *decision).await);
            }
            results
        }
    }

    async fn invoke_inner(&self, call: &ToolCallRequest, decision: ApprovalDecision) -> (ToolOutcome, bool) {
        let Some(registered) = self.registry.get(&call.name) else {
            let available = self.registry.names().join(", ");
            return (
                Err(ToolFailure::validation(format!(
                    "Tool '{}' not found. Available tools: [{}]",
                    call.name, available
                ))),
                false,
            );
        };

        if let Err(error) = registered.schema().validate_arguments(&call.arguments) {
            return (Err(ToolFailure::validation(error.to_string())), false);
        }

        if !decision.is_approved() {
            return (
                Err(ToolFailure::denied(format!(
                    "Tool execution cancelled: {decision}"
                ))),
                false,
            );
        }

        let tool = registered.tool().clone();
        let args = call.arguments.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move { tool.execute(args).await }));

        let outcome = match tokio::time::timeout(self.timeout, &mut task.0).await {
            Err(_) => Err(ToolFailure::timeout(format!(
                "Tool '{}' timed out after {:?}",
                call.name, self.timeout
            ))),
            Ok(Err(join_error)) if join_error.is_panic() => Err(ToolFailure::execution(format!(
                "tool panicked: {}",
                panic_message(join_error.into_panic().as_ref())
            ))),
            Ok(Err(join_error)) => Err(ToolFailure::execution(join_error.to_string())),
            Ok(Ok(result)) => result.map_err(ToolFailure::from),
        };

        (outcome, true)
    }
}

impl std::fmt::Debug for ToolInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvoker")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .field("concurrent", &self.concurrent)
            .finish()
    }
}
