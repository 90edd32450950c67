//! The orchestration loop and its configuration.

pub mod agent_loop;
pub mod config;
pub mod events;

pub use agent_loop::{AgentLoop, ITERATION_LIMIT_MESSAGE, LoopOutcome, LoopState};
pub use config::{AgentConfig, ConfigError};
pub use events::{AgentEvent, ChannelHandler, EventHandler, LoggingHandler, NoopHandler};
