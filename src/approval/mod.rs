//! Approval workflow for side-effecting tool calls.
//!
//! An [`ApprovalPolicy`] decides whether a call runs automatically, is refused,
//! or needs confirmation. Confirmation is delegated to an [`ApprovalHandler`]
//! supplied by the UI layer, which must answer before the loop proceeds.

pub mod policy;

pub use policy::{
    ApprovalDecision, ApprovalMode, ApprovalPolicy, ApprovalRule, ParseModeError, PolicyVerdict,
    RuleAction,
};

use serde_json::Value;

/// A call awaiting a human decision.
#[derive(Debug, Clone)]
pub struct ApprovalRequest<'a> {
    pub call_id: &'a str,
    pub tool_name: &'a str,
    pub arguments: &'a Value,
    pub read_only: bool,
}

/// Supplies interactive approval decisions.
pub trait ApprovalHandler: Send + Sync {
    /// Returns `true` to run the call.
    fn request_approval(&self, request: &ApprovalRequest<'_>) -> bool;
}

/// Refuses everything. Used when no interactive handler is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl ApprovalHandler for DenyAll {
    fn request_approval(&self, _request: &ApprovalRequest<'_>) -> bool {
        false
    }
}

/// Approves everything that reaches it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl ApprovalHandler for ApproveAll {
    fn request_approval(&self, _request: &ApprovalRequest<'_>) -> bool {
        true
    }
}

/// Adapts a closure into an [`ApprovalHandler`].
pub struct FnApprovalHandler<F>(F);

impl<F> FnApprovalHandler<F>
where
    F: Fn(&ApprovalRequest<'_>) -> bool + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self(handler)
    }
}

impl<F> ApprovalHandler for FnApprovalHandler<F>
where
    F: Fn(&ApprovalRequest<'_>) -> bool + Send + Sync,
{
    fn request_approval(&self, request: &ApprovalRequest<'_>) -> bool {
        (self.0)(request)
    }
}
