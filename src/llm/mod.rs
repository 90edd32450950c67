pub mod client;
pub mod openai;
pub mod retry;

pub use client::{
    CompletionRequest, CompletionResponse, ModelConfig, ModelProvider, ProviderBuilder,
    ProviderError, ProviderMessage, ProviderReply, Usage,
};
#[cfg(test)]
pub use client::MockModelProvider;
pub use openai::OpenAiProvider;
pub use retry::RetryPolicy;
