use std::time::Duration;

use crate::approval::{ApprovalMode, ApprovalPolicy};
use crate::llm::{ModelConfig, RetryPolicy};
use crate::session::DEFAULT_SYSTEM_PROMPT;
use crate::tool::invoker::DEFAULT_TOOL_TIMEOUT;

/// Errors from reading or checking configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model name and pass-through sampling options
    pub model: ModelConfig,
    /// The system prompt for new conversations
    pub system_prompt: String,
    /// Tool round-trips allowed per submit
    pub max_iterations: u32,
    /// Which calls run without confirmation
    pub approval: ApprovalPolicy,
    /// Per tool call
    pub tool_timeout: Duration,
    /// Per provider attempt
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,
    /// Run the calls of one round concurrently
    pub parallel_tool_calls: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: 10,
            approval: ApprovalPolicy::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            provider_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            parallel_tool_calls: true,
        }
    }
}

impl AgentConfig {
    /// Reads configuration from the process environment.
    ///
    /// Recognized variables: `MODEL_NAME`, `MAX_ITERATIONS`, `MAX_RETRIES`,
    /// `TIMEOUT_SECONDS`, `TOOL_TIMEOUT_SECONDS`, `AUTO_APPROVE_TOOLS` and
    /// `APPROVAL_POLICY`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`AgentConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(model) = lookup("MODEL_NAME").filter(|m| !m.trim().is_empty()) {
            config.model.name = model.trim().to_string();
        }
        if let Some(value) = lookup("MAX_ITERATIONS") {
            config.max_iterations = parse_positive("MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = lookup("MAX_RETRIES") {
            config.retry.max_attempts = parse_positive("MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("TIMEOUT_SECONDS") {
            config.provider_timeout = Duration::from_secs(parse_positive("TIMEOUT_SECONDS", &value)?.into());
        }
        if let Some(value) = lookup("TOOL_TIMEOUT_SECONDS") {
            config.tool_timeout =
                Duration::from_secs(parse_positive("TOOL_TIMEOUT_SECONDS", &value)?.into());
        }

        let auto_approve = lookup("AUTO_APPROVE_TOOLS")
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"));
        if auto_approve {
            config.approval.mode = ApprovalMode::AutoApprove;
        }
        if let Some(value) = lookup("APPROVAL_POLICY") {
            config.approval.mode = value
                .parse()
                .map_err(|e: crate::approval::ParseModeError| {
                    ConfigError::invalid("APPROVAL_POLICY", value.clone(), e.to_string())
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks values that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid(
                "max_iterations",
                "0",
                "must be a positive integer",
            ));
        }
        if self.model.name.is_empty() {
            return Err(ConfigError::invalid("model", "", "must not be empty"));
        }
        if self.tool_timeout.is_zero() {
            return Err(ConfigError::invalid("tool_timeout", "0s", "must be positive"));
        }
        if self.provider_timeout.is_zero() {
            return Err(ConfigError::invalid("provider_timeout", "0s", "must be positive"));
        }
        Ok(())
    }
}

fn parse_positive(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    match value.trim().parse::<u32>() {
        Ok(0) => Err(ConfigError::invalid(key, value, "must be a positive integer")),
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::invalid(key, value, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = AgentConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.model.name, "gpt-4o-mini");
        assert_eq!(config.max_iterations, 10);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.provider_timeout, Duration::from_secs(30));
        assert_eq!(config.approval.mode, ApprovalMode::AlwaysAsk);
    }

    #[test]
    fn reads_overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("MODEL_NAME", "gpt-4o"),
            ("MAX_ITERATIONS", "15"),
            ("MAX_RETRIES", "5"),
            ("TIMEOUT_SECONDS", "60"),
            ("AUTO_APPROVE_TOOLS", "true"),
        ]))
        .unwrap();
        assert_eq!(config.model.name, "gpt-4o");
        assert_eq!(config.max_iterations, 15);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.provider_timeout, Duration::from_secs(60));
        assert_eq!(config.approval.mode, ApprovalMode::AutoApprove);
    }

    #[test]
    fn approval_policy_wins_over_auto_approve() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("AUTO_APPROVE_TOOLS", "TRUE"),
            ("APPROVAL_POLICY", "read-only"),
        ]))
        .unwrap();
        assert_eq!(config.approval.mode, ApprovalMode::AutoApproveReadOnly);
    }

    #[test]
    fn rejects_bad_values() {
        let err = AgentConfig::from_lookup(lookup(&[("MAX_ITERATIONS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MAX_ITERATIONS", .. }));

        let err = AgentConfig::from_lookup(lookup(&[("TIMEOUT_SECONDS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TIMEOUT_SECONDS", .. }));

        let err = AgentConfig::from_lookup(lookup(&[("APPROVAL_POLICY", "yolo")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "APPROVAL_POLICY", .. }));
    }
}
