//! Test doubles shared by unit and integration tests.
//!
//! Provides:
//! - [`StubLlm`]: returns a fixed text response, counts calls
//! - [`ScriptedLlm`]: plays back a queue of scripted turns (tool calls or
//!   text), for driving the tool loop deterministically
//! - [`ScriptedProvider`]: an in-process tool provider with canned tools
//! - [`CrashyProvider`]: a provider that fails every call as if its process
//!   died

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{LlmError, ProviderError};
use crate::llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmProvider, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse,
};
use crate::provider::{ProviderState, ToolDescriptor, ToolProvider, ToolResponse};

/// Fixed-response LLM stub.
pub struct StubLlm {
    model_name: String,
    response: String,
    call_count: AtomicU32,
    should_fail: AtomicBool,
}

impl StubLlm {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            model_name: "stub-model".to_string(),
            response: response.into(),
            call_count: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
        }
    }

    /// Create a stub that always fails.
    pub fn failing() -> Self {
        let stub = Self::new("");
        stub.should_fail.store(true, Ordering::SeqCst);
        stub
    }

    /// Number of completion calls made so far.
    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn respond(&self) -> Result<String, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(LlmError::RequestFailed {
                provider: self.model_name.clone(),
                reason: "stub configured to fail".to_string(),
            });
        }
        Ok(self.response.clone())
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Ok(CompletionResponse {
            content: self.respond()?,
            finish_reason: FinishReason::Stop,
            input_tokens: 0,
            output_tokens: 0,
        })
    }

    async fn complete_with_tools(
        &self,
        _req: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        Ok(ToolCompletionResponse {
            content: Some(self.respond()?),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            input_tokens: 0,
            output_tokens: 0,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Final text reply.
    Text(String),
    /// Request these tool calls.
    Calls(Vec<ToolCall>),
}

impl ScriptedTurn {
    /// A single tool call with auto-generated call id.
    pub fn call(n: usize, tool_id: impl Into<String>, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("call_{n}"),
            name: tool_id.into(),
            arguments,
        }
    }
}

/// Plays back a fixed script of turns. When the script runs out it keeps
/// returning the last turn, so loop-cap tests can script one tool-calling
/// turn and let it repeat forever.
pub struct ScriptedLlm {
    script: Mutex<Vec<ScriptedTurn>>,
    last: Mutex<Option<ScriptedTurn>>,
    call_count: AtomicU32,
}

impl ScriptedLlm {
    pub fn new(script: Vec<ScriptedTurn>) -> Self {
        Self {
            script: Mutex::new(script),
            last: Mutex::new(None),
            call_count: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn next_turn(&self) -> ScriptedTurn {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().await;
        if script.is_empty() {
            let last = self.last.lock().await;
            return last
                .clone()
                .unwrap_or_else(|| ScriptedTurn::Text(String::new()));
        }
        let turn = script.remove(0);
        *self.last.lock().await = Some(turn.clone());
        turn
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let content = match self.next_turn().await {
            ScriptedTurn::Text(text) => text,
            ScriptedTurn::Calls(_) => String::new(),
        };
        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            input_tokens: 0,
            output_tokens: 0,
        })
    }

    async fn complete_with_tools(
        &self,
        _req: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        match self.next_turn().await {
            ScriptedTurn::Text(text) => Ok(ToolCompletionResponse {
                content: Some(text),
                tool_calls: Vec::new(),
                finish_reason: FinishReason::Stop,
                input_tokens: 0,
                output_tokens: 0,
            }),
            ScriptedTurn::Calls(calls) => Ok(ToolCompletionResponse {
                content: None,
                tool_calls: calls,
                finish_reason: FinishReason::ToolUse,
                input_tokens: 0,
                output_tokens: 0,
            }),
        }
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// Canned tool behavior for [`ScriptedProvider`].
type ToolFn = Box<dyn Fn(serde_json::Value) -> Result<ToolResponse, ProviderError> + Send + Sync>;

/// In-process provider with programmable tools.
pub struct ScriptedProvider {
    name: String,
    tools: Vec<ToolDescriptor>,
    handlers: std::collections::HashMap<String, ToolFn>,
    state: tokio::sync::RwLock<ProviderState>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
            handlers: std::collections::HashMap::new(),
            state: tokio::sync::RwLock::new(ProviderState::Spawning),
        }
    }

    /// Add a tool with a fixed descriptor and handler.
    pub fn with_tool(
        mut self,
        name: &str,
        description: &str,
        handler: impl Fn(serde_json::Value) -> Result<ToolResponse, ProviderError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.tools.push(ToolDescriptor::new(name, description));
        self.handlers.insert(name.to_string(), Box::new(handler));
        self
    }
}

#[async_trait]
impl ToolProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test provider"
    }

    async fn state(&self) -> ProviderState {
        *self.state.read().await
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        *self.state.write().await = ProviderState::Ready;
        Ok(())
    }

    async fn shutdown(&self) {
        *self.state.write().await = ProviderState::Terminated;
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        Ok(self.tools.clone())
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResponse, ProviderError> {
        match self.handlers.get(name) {
            Some(handler) => handler(args),
            None => Err(ProviderError::ToolNotFound {
                provider: self.name.clone(),
                tool: name.to_string(),
            }),
        }
    }
}

/// Provider that advertises a catalog but fails every call as if its
/// process had died.
pub struct CrashyProvider {
    name: String,
    state: tokio::sync::RwLock<ProviderState>,
}

impl CrashyProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: tokio::sync::RwLock::new(ProviderState::Spawning),
        }
    }

    /// Flip the provider into the crashed state.
    pub async fn crash(&self) {
        *self.state.write().await = ProviderState::Crashed;
    }
}

#[async_trait]
impl ToolProvider for CrashyProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "provider that dies on use"
    }

    async fn state(&self) -> ProviderState {
        *self.state.read().await
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        *self.state.write().await = ProviderState::Ready;
        Ok(())
    }

    async fn shutdown(&self) {
        *self.state.write().await = ProviderState::Terminated;
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        Ok(vec![ToolDescriptor::new("doomed", "Always fails.")])
    }

    async fn execute_tool(
        &self,
        _name: &str,
        _args: serde_json::Value,
    ) -> Result<ToolResponse, ProviderError> {
        self.crash().await;
        Err(ProviderError::ShuttingDown)
    }
}
