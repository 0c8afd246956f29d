//! Chat completion backends.

pub mod openai_compatible;
pub mod provider;

use std::sync::Arc;

pub use provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

use crate::config::LlmConfig;

/// Build the configured completion backend.
pub fn create_llm_provider(config: LlmConfig) -> Arc<dyn LlmProvider> {
    Arc::new(openai_compatible::OpenAiCompatibleProvider::new(config))
}
