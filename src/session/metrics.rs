use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution counters for a conversation or a single submit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Tokens reported by the provider
    pub total_tokens: u64,
    /// Tool calls that reached an implementation
    pub tool_call_count: u64,
    /// Completed tool round-trips
    pub iteration_count: u32,
    /// Provider attempts, including retries
    pub api_calls: u32,
    /// Failed tool calls, failed provider attempts, and fatal loop errors
    pub error_count: u32,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl Metrics {
    /// Folds a delta in: counters add, `elapsed` keeps the larger value.
    pub fn merge(&mut self, delta: &Metrics) {
        self.total_tokens += delta.total_tokens;
        self.tool_call_count += delta.tool_call_count;
        self.iteration_count += delta.iteration_count;
        self.api_calls += delta.api_calls;
        self.error_count += delta.error_count;
        self.elapsed = self.elapsed.max(delta.elapsed);
    }

    pub fn tokens(total_tokens: u64) -> Self {
        Self {
            total_tokens,
            api_calls: 1,
            ..Default::default()
        }
    }

    pub fn errors(error_count: u32) -> Self {
        Self {
            error_count,
            ..Default::default()
        }
    }

    pub fn elapsed(elapsed: Duration) -> Self {
        Self {
            elapsed,
            ..Default::default()
        }
    }
}
