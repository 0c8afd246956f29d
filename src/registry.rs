//! Provider registry: one namespace over many tool providers.
//!
//! Providers register under their name; their tools are addressed as
//! `provider__tool`. Execution through the registry never returns `Err`:
//! every failure, including an unknown provider or a crashed bridge, comes
//! back as a structured [`ActionResult`] so one bad provider cannot take
//! down a conversation turn.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::ProviderError;
use crate::provider::{ProviderState, ToolDescriptor, ToolProvider, namespaced_tool_id};

/// Structured outcome of one action execution. Failures carry a message;
/// they are data, not control flow.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }

    /// Render for the model: payload text on success, error message on
    /// failure.
    pub fn as_text(&self) -> String {
        if self.success {
            match &self.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        } else {
            self.error.clone().unwrap_or_else(|| "unknown error".to_string())
        }
    }
}

struct ProviderEntry {
    provider: Arc<dyn ToolProvider>,
    /// Catalog snapshot taken at registration.
    tools: Vec<ToolDescriptor>,
}

#[derive(Default)]
struct Inner {
    /// Registration order, preserved for catalog flattening.
    order: Vec<String>,
    entries: HashMap<String, ProviderEntry>,
}

/// The registry. Cheap to share; all methods take `&self`.
#[derive(Default)]
pub struct ProviderRegistry {
    inner: RwLock<Inner>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, initializing it if it has not been brought up
    /// yet, and snapshot its tool catalog.
    ///
    /// Re-registering under the same name replaces the old entry in place
    /// (the old provider is shut down); registration order is unchanged, so
    /// the flattened catalog stays stable across provider restarts.
    pub async fn register_server(
        &self,
        provider: Arc<dyn ToolProvider>,
    ) -> Result<(), ProviderError> {
        if provider.state().await == ProviderState::Spawning {
            provider.initialize().await?;
        }
        let tools = provider.list_tools().await?;
        let name = provider.name().to_string();

        tracing::info!(
            provider = %name,
            version = provider.version(),
            tools = tools.len(),
            "Registered tool provider"
        );
        for tool in &tools {
            tracing::debug!(
                provider = %name,
                tool = %tool.name,
                id = %namespaced_tool_id(&name, &tool.name),
                "Catalog entry"
            );
        }

        let replaced = {
            let mut inner = self.inner.write().await;
            if !inner.entries.contains_key(&name) {
                inner.order.push(name.clone());
            }
            inner
                .entries
                .insert(name.clone(), ProviderEntry { provider, tools })
                .map(|old| old.provider)
        };
        if let Some(old) = replaced {
            old.shutdown().await;
        }
        Ok(())
    }

    /// All tools across all providers, namespaced, in registration order.
    pub async fn all_tools(&self) -> Vec<(String, ToolDescriptor)> {
        let inner = self.inner.read().await;
        let mut out = Vec::new();
        for name in &inner.order {
            let Some(entry) = inner.entries.get(name) else {
                continue;
            };
            for tool in &entry.tools {
                out.push((namespaced_tool_id(name, &tool.name), tool.clone()));
            }
        }
        out
    }

    /// Names and current lifecycle states of all registered providers.
    pub async fn provider_states(&self) -> Vec<(String, ProviderState)> {
        let providers: Vec<(String, Arc<dyn ToolProvider>)> = {
            let inner = self.inner.read().await;
            inner
                .order
                .iter()
                .filter_map(|name| {
                    inner
                        .entries
                        .get(name)
                        .map(|e| (name.clone(), Arc::clone(&e.provider)))
                })
                .collect()
        };
        let mut out = Vec::with_capacity(providers.len());
        for (name, provider) in providers {
            out.push((name, provider.state().await));
        }
        out
    }

    pub async fn provider_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Execute one action on one provider. Never returns `Err`; all
    /// failures are structured results.
    pub async fn execute_action(
        &self,
        provider_name: &str,
        tool_name: &str,
        args: serde_json::Value,
    ) -> ActionResult {
        // Clone the Arc and release the lock before awaiting the provider.
        let provider = {
            let inner = self.inner.read().await;
            inner.entries.get(provider_name).map(|e| Arc::clone(&e.provider))
        };
        let Some(provider) = provider else {
            return ActionResult::failed(
                ProviderError::NotFound {
                    name: provider_name.to_string(),
                }
                .to_string(),
            );
        };

        match provider.execute_tool(tool_name, args).await {
            Ok(response) if response.success => ActionResult::ok(response.data),
            Ok(response) => ActionResult::failed(response.data_as_text()),
            Err(e) => {
                tracing::warn!(
                    provider = %provider_name,
                    tool = %tool_name,
                    error = %e,
                    "Tool execution failed"
                );
                ActionResult::failed(e.to_string())
            }
        }
    }

    /// Shut down every provider concurrently. Used at host exit.
    pub async fn shutdown_all(&self) {
        let providers: Vec<Arc<dyn ToolProvider>> = {
            let inner = self.inner.read().await;
            inner.entries.values().map(|e| Arc::clone(&e.provider)).collect()
        };
        tracing::info!(providers = providers.len(), "Shutting down all providers");
        join_all(providers.iter().map(|p| p.shutdown())).await;
    }
}
