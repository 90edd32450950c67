use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolSchema;

/// How proposed tool calls are approved when no rule matches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalMode {
    /// Every call runs without asking
    AutoApprove,
    /// Read-only tools run without asking; others are confirmed
    AutoApproveReadOnly,
    /// Every call is confirmed
    #[default]
    AlwaysAsk,
}

/// Rule action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Run without asking
    Allow,
    /// Refuse without asking
    Deny,
    /// Confirm with the user
    Ask,
}

/// A per-tool override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRule {
    /// Tool name pattern (supports wildcards)
    pub tool: String,
    /// The action for matching tools
    pub action: RuleAction,
}

/// What the policy says about a call before any user is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyVerdict {
    Allow,
    Deny,
    Ask,
}

/// The decision reached for one proposed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    AutoApproved,
    UserApproved,
    UserDenied,
    /// A deny rule matched; the user was not asked
    PolicyDenied,
    /// The call names an unknown tool or carries invalid arguments, so no
    /// approval question was asked
    NotEvaluated,
}

impl ApprovalDecision {
    pub fn is_approved(self) -> bool {
        matches!(
            self,
            ApprovalDecision::AutoApproved | ApprovalDecision::UserApproved
        )
    }
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ApprovalDecision::AutoApproved => "auto-approved",
            ApprovalDecision::UserApproved => "approved by user",
            ApprovalDecision::UserDenied => "denied by user",
            ApprovalDecision::PolicyDenied => "denied by policy",
            ApprovalDecision::NotEvaluated => "not evaluated",
        };
        f.write_str(text)
    }
}

/// Error for unrecognised approval mode strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown approval policy '{0}' (expected auto, read-only or ask)")]
pub struct ParseModeError(String);

impl FromStr for ApprovalMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "auto-approve" | "always" => Ok(ApprovalMode::AutoApprove),
            "read-only" | "readonly" | "auto-approve-read-only" => {
                Ok(ApprovalMode::AutoApproveReadOnly)
            }
            "ask" | "always-ask" => Ok(ApprovalMode::AlwaysAsk),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Mode plus ordered overrides; the first matching rule wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    pub mode: ApprovalMode,
    #[serde(default)]
    pub rules: Vec<ApprovalRule>,
}

impl ApprovalPolicy {
    pub fn new(mode: ApprovalMode) -> Self {
        Self {
            mode,
            rules: Vec::new(),
        }
    }

    /// Appends an override rule.
    pub fn with_rule(mut self, tool: impl Into<String>, action: RuleAction) -> Self {
        self.rules.push(ApprovalRule {
            tool: tool.into(),
            action,
        });
        self
    }

    /// Evaluates a call against the rules, then the mode.
    pub fn evaluate(&self, schema: &ToolSchema, _args: &Value) -> PolicyVerdict {
        if let Some(rule) = self.rules.iter().find(|r| tool_matches(&r.tool, &schema.name)) {
            return match rule.action {
                RuleAction::Allow => PolicyVerdict::Allow,
                RuleAction::Deny => PolicyVerdict::Deny,
                RuleAction::Ask => PolicyVerdict::Ask,
            };
        }

        match self.mode {
            ApprovalMode::AutoApprove => PolicyVerdict::Allow,
            ApprovalMode::AutoApproveReadOnly if schema.read_only => PolicyVerdict::Allow,
            ApprovalMode::AutoApproveReadOnly | ApprovalMode::AlwaysAsk => PolicyVerdict::Ask,
        }
    }
}

/// Checks if a tool name matches a pattern (supports * wildcards).
fn tool_matches(pattern: &str, tool: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    let regex_pattern = regex::escape(pattern).replace(r"\*", ".*");

    Regex::new(&format!("^{regex_pattern}$"))
        .map(|re| re.is_match(tool))
        .unwrap_or(false)
}
