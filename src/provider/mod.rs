//! The ToolProvider contract.
//!
//! Anything that can enumerate and execute tools plugs in here: in-process
//! providers ([`builtin`]) and external processes wrapped by the protocol
//! bridge (`crate::bridge`). The registry only ever sees this trait.

pub mod builtin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Separator between provider and tool in a namespaced identifier.
///
/// Double underscore so that tool names containing single underscores
/// (`read_file`, `memory_search`) round-trip unambiguously.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// A single invocable tool, as advertised by its provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    /// Create a descriptor with a permissive (unconstrained object) schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: permissive_schema(),
        }
    }

    /// Set the input schema.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// The fallback schema used when a provider's tool schema cannot be
/// converted: an object accepting any properties.
pub fn permissive_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "additionalProperties": true
    })
}

/// Structured result of a single tool execution at the provider boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    pub data: serde_json::Value,
}

impl ToolResponse {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::String(message.into()),
        }
    }

    /// Render the payload as text for the model.
    pub fn data_as_text(&self) -> String {
        match &self.data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Lifecycle state of a provider.
///
/// Legal transitions:
/// `Spawning → Initializing → Ready → ShuttingDown → Terminated`, with
/// `Crashed` reachable from `Spawning`, `Initializing`, or `Ready`. A
/// crashed or terminated provider stays registered for visibility, but all
/// calls to it fail until a fresh instance is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Spawning,
    Initializing,
    Ready,
    Crashed,
    ShuttingDown,
    Terminated,
}

impl ProviderState {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: ProviderState) -> bool {
        use ProviderState::*;
        matches!(
            (self, next),
            (Spawning, Initializing)
                | (Initializing, Ready)
                | (Spawning | Initializing | Ready, Crashed)
                | (Spawning | Initializing | Ready | Crashed, ShuttingDown)
                | (ShuttingDown, Terminated)
        )
    }

    /// Whether the provider can accept tool calls.
    pub fn is_ready(self) -> bool {
        self == ProviderState::Ready
    }
}

impl std::fmt::Display for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderState::Spawning => "spawning",
            ProviderState::Initializing => "initializing",
            ProviderState::Ready => "ready",
            ProviderState::Crashed => "crashed",
            ProviderState::ShuttingDown => "shutting_down",
            ProviderState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Trait every tool provider implements, in-process or bridged.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider name. Must be stable; doubles as the registry key and the
    /// namespace prefix.
    fn name(&self) -> &str;

    /// Provider version, if known.
    fn version(&self) -> &str {
        "unknown"
    }

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Current lifecycle state.
    async fn state(&self) -> ProviderState;

    /// Bring the provider up. For bridges this spawns the child process and
    /// runs the protocol handshake. Idempotent for in-process providers.
    async fn initialize(&self) -> Result<(), ProviderError>;

    /// Tear the provider down. Infallible by contract: a provider that is
    /// already dead has nothing left to fail.
    async fn shutdown(&self);

    /// Enumerate the provider's tools.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError>;

    /// Execute one tool by its provider-local name.
    async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResponse, ProviderError>;
}

/// Format a namespaced tool identifier: `provider__tool`.
pub fn namespaced_tool_id(provider: &str, tool: &str) -> String {
    format!("{provider}{NAMESPACE_SEPARATOR}{tool}")
}

/// Parse a namespaced tool identifier back into `(provider, tool)`.
///
/// Requires exactly one `__` separator with non-empty halves; anything else
/// returns `None`.
pub fn parse_tool_id(id: &str) -> Option<(&str, &str)> {
    let (provider, tool) = id.split_once(NAMESPACE_SEPARATOR)?;
    if provider.is_empty() || tool.is_empty() || tool.contains(NAMESPACE_SEPARATOR) {
        return None;
    }
    Some((provider, tool))
}
