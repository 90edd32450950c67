pub mod message;
pub mod metrics;
#[allow(clippy::module_inception)]
pub mod session;

pub use message::{ConversationTurn, ToolCallRequest, TurnContent};
pub use metrics::Metrics;
pub use session::{ConversationSnapshot, ConversationState, DEFAULT_SYSTEM_PROMPT};
