//! Built-in in-process providers.
//!
//! These satisfy the same [`ToolProvider`] contract as bridged processes but
//! run inside the host. `echo` is also the canonical smoke-test provider:
//! its `ping` tool returns its arguments verbatim.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::ProviderError;
use crate::provider::{ProviderState, ToolDescriptor, ToolProvider, ToolResponse};

/// Provider with a single `ping` tool that echoes its input.
pub struct EchoProvider {
    state: RwLock<ProviderState>,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ProviderState::Spawning),
        }
    }
}

impl Default for EchoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Echoes tool arguments back unchanged. Useful for connectivity checks."
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
        Ok(vec![
            ToolDescriptor::new("ping", "Return the input arguments verbatim.").with_schema(
                serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": true
                }),
            ),
        ])
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResponse, ProviderError> {
        match name {
            "ping" => Ok(ToolResponse::success(args)),
            other => Err(ProviderError::ToolNotFound {
                provider: self.name().to_string(),
                tool: other.to_string(),
            }),
        }
    }
}

/// Provider exposing the current time in UTC.
pub struct ClockProvider {
    state: RwLock<ProviderState>,
}

impl ClockProvider {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ProviderState::Spawning),
        }
    }
}

impl Default for ClockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolProvider for ClockProvider {
    fn name(&self) -> &str {
        "clock"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Current date and time."
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
        Ok(vec![ToolDescriptor::new(
            "now",
            "Get the current UTC date and time in RFC 3339 format.",
        )
        .with_schema(serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        }))])
    }

    async fn execute_tool(
        &self,
        name: &str,
        _args: serde_json::Value,
    ) -> Result<ToolResponse, ProviderError> {
        match name {
            "now" => Ok(ToolResponse::success(serde_json::json!({
                "utc": Utc::now().to_rfc3339(),
            }))),
            other => Err(ProviderError::ToolNotFound {
                provider: self.name().to_string(),
                tool: other.to_string(),
            }),
        }
    }
}
