//! # agent-eval
//!
//! Tool discovery and a multi-turn tool-calling agent loop.
//!
//! ## Features
//!
//! - **Tool discovery**: candidate tools from in-process constructors or a
//!   directory of JSON manifests, validated into a uniquely-named registry
//! - **Tool invocation**: argument validation, approval policy, per-call
//!   timeouts, and containment of every tool fault
//! - **Agent loop**: provider retries with backoff, iteration limits,
//!   cancellation, and per-submit metrics
//! - **OpenAI integration**: an OpenAI-compatible chat-completions provider
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agent_eval::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = ProviderBuilder::new().build_openai()?;
//!
//!     let sources: Vec<Box<dyn ToolSource>> = vec![
//!         Box::new(builtin_source(false)),
//!         Box::new(ManifestDirSource::new("tools")),
//!     ];
//!     let report = ToolRegistry::discover(&sources);
//!     for error in &report.errors {
//!         eprintln!("skipped: {error}");
//!     }
//!
//!     let config = AgentConfig::from_env()?;
//!     let mut agent = AgentLoop::new(provider, Arc::new(report.registry), config);
//!     let outcome = agent.submit("What's new in Rust?").await?;
//!     println!("{}", outcome.text);
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod approval;
pub mod error;
pub mod llm;
pub mod session;
pub mod tool;

// Re-exports for convenient usage
pub use agent::{AgentConfig, AgentEvent, AgentLoop, EventHandler, LoopOutcome, LoopState};
pub use approval::{ApprovalDecision, ApprovalHandler, ApprovalMode, ApprovalPolicy};
pub use error::AgentError;
pub use llm::{ModelProvider, OpenAiProvider, ProviderBuilder, ProviderError, RetryPolicy};
pub use session::{ConversationState, ConversationTurn, Metrics, ToolCallRequest};
pub use tool::{DynTool, Tool, ToolError, ToolRegistry, ToolSchema};

/// Prelude module with commonly used types.
pub mod prelude {
    pub use crate::agent::{AgentConfig, AgentLoop, LoopOutcome};
    pub use crate::approval::{ApprovalMode, ApprovalPolicy};
    pub use crate::error::AgentError;
    pub use crate::llm::{ModelProvider, ProviderBuilder};
    pub use crate::tool::builtin::builtin_source;
    pub use crate::tool::{
        DynTool, ManifestDirSource, PropertySchema, StaticSource, Tool, ToolError, ToolRegistry,
        ToolSchema, ToolSource,
    };
    pub use std::sync::Arc;
}
