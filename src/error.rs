//! Error types for toolhost.
//!
//! Each domain has its own `thiserror` enum; the top-level [`Error`] wraps
//! them for callers that cross domains (the agent loop, `main`). Everything
//! at or below the registry boundary is converted to a structured
//! `ActionResult` instead of propagating — only model-call failures and
//! setup errors travel as `Err`.

use std::time::Duration;

use thiserror::Error;

/// Top-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration resolution errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {key}")]
    MissingVar { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to read {path}: {reason}")]
    FileRead { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    FileParse { path: String, reason: String },
}

/// LLM provider errors.
///
/// These are the one category allowed to escape the tool loop: if the model
/// itself is unreachable there is no text to answer with.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("{provider} authentication failed")]
    AuthFailed { provider: String },

    #[error("{provider} rate limited")]
    RateLimited {
        provider: String,
        /// Seconds to wait, when the server said so.
        retry_after: Option<u64>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Tool provider errors.
///
/// The registry converts all of these into structured failures; they never
/// cross the registry boundary as `Err`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{name} not found")]
    NotFound { name: String },

    #[error("Tool {tool} not found on provider {provider}")]
    ToolNotFound { provider: String, tool: String },

    #[error("Failed to spawn {command}: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("Handshake with {name} failed: {reason}")]
    HandshakeFailed { name: String, reason: String },

    #[error("Provider {name} is not ready (state: {state})")]
    NotReady { name: String, state: String },

    #[error("provider shutting down")]
    ShuttingDown,

    #[error("Tool execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// JSON-RPC transport errors (bridge-internal).
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Request {method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("RPC error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("provider shutting down")]
    ChannelClosed,

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write to provider stdin: {0}")]
    Write(#[from] std::io::Error),
}

impl RpcError {
    /// Whether this error means the underlying process is gone (as opposed
    /// to a single call failing).
    pub fn is_fatal(&self) -> bool {
        matches!(self, RpcError::ChannelClosed | RpcError::Write(_))
    }
}
