pub mod builtin;
pub mod command;
pub mod invoker;
pub mod registry;
pub mod schema;
pub mod source;

pub use invoker::{ToolInvocation, ToolInvoker};
pub use registry::{DiscoveryError, DiscoveryReport, RegisteredTool, ToolRegistry};
pub use schema::{ArgumentError, ParameterSchema, PropertySchema, PropertyType, SchemaError, ToolSchema};
pub use source::{ManifestDirSource, StaticSource, ToolCandidate, ToolSource};
pub use tool_types::{ToolError, ToolErrorKind, ToolFailure, ToolOutcome};
pub use tool_trait::{DynTool, Tool};

mod tool_types {
    use serde::{Deserialize, Serialize};

    /// Errors a tool implementation reports from `execute`.
    #[derive(Debug, thiserror::Error)]
    pub enum ToolError {
        #[error("Invalid arguments: {0}")]
        InvalidArguments(String),
        #[error("Execution failed: {0}")]
        ExecutionFailed(String),
    }

    /// Classification of a failed tool call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum ToolErrorKind {
        /// Arguments or tool name did not satisfy the contract; nothing ran
        Validation,
        /// The implementation failed or panicked
        Execution,
        /// The call exceeded the per-call timeout
        Timeout,
        /// Approval was refused; nothing ran
        ApprovalDenied,
    }

    /// A structured tool failure carried in a tool-result turn.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ToolFailure {
        pub kind: ToolErrorKind,
        pub message: String,
    }

    /// What a tool call produced.
    pub type ToolOutcome = Result<String, ToolFailure>;

    impl ToolFailure {
        pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
            Self {
                kind,
                message: message.into(),
            }
        }

        pub fn validation(message: impl Into<String>) -> Self {
            Self::new(ToolErrorKind::Validation, message)
        }

        pub fn execution(message: impl Into<String>) -> Self {
            Self::new(ToolErrorKind::Execution, message)
        }

        pub fn timeout(message: impl Into<String>) -> Self {
            Self::new(ToolErrorKind::Timeout, message)
        }

        pub fn denied(message: impl Into<String>) -> Self {
            Self::new(ToolErrorKind::ApprovalDenied, message)
        }
    }

    impl ToolErrorKind {
        pub fn as_str(self) -> &'static str {
            match self {
                ToolErrorKind::Validation => "validation_error",
                ToolErrorKind::Execution => "execution_error",
                ToolErrorKind::Timeout => "timeout_error",
                ToolErrorKind::ApprovalDenied => "approval_denied",
            }
        }
    }

    impl std::fmt::Display for ToolFailure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}: {}", self.kind.as_str(), self.message)
        }
    }

    impl From<ToolError> for ToolFailure {
        fn from(error: ToolError) -> Self {
            match error {
                ToolError::InvalidArguments(message) => ToolFailure::validation(message),
                ToolError::ExecutionFailed(message) => ToolFailure::execution(message),
            }
        }
    }
}

mod tool_trait {
    use super::schema::ToolSchema;
    use super::tool_types::ToolError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    /// A capability the model may invoke mid-conversation.
    ///
    /// The registry only ever sees a tool through this interface: the schema it
    /// declares and the ability to execute with JSON arguments.
    #[async_trait]
    pub trait Tool: Send + Sync {
        /// Returns the tool's declared schema. Checked once at discovery.
        fn schema(&self) -> ToolSchema;

        /// Executes the tool with already-validated arguments.
        async fn execute(&self, args: Value) -> Result<String, ToolError>;
    }

    /// A type alias for a dynamic tool reference.
    pub type DynTool = Arc<dyn Tool>;
}
