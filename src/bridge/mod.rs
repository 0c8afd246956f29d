//! Protocol bridge: expose an external process as a [`ToolProvider`].
//!
//! The bridge spawns a configured command, speaks newline-delimited JSON-RPC
//! 2.0 over the child's stdin/stdout, and translates the process's tool
//! catalog and call results into the contract types. One bridge instance
//! wraps one process for its whole life: a crashed bridge is discarded and
//! replaced, never revived in place.

mod protocol;
mod transport;

pub use protocol::PROTOCOL_VERSION;

use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{RwLock, oneshot};

use crate::bridge::protocol::{
    CallToolResult, InitializeResult, ListToolsResult, METHOD_CALL_TOOL, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_LIST_TOOLS, WireTool, concat_text_blocks,
};
use crate::bridge::transport::RpcPeer;
use crate::error::ProviderError;
use crate::provider::{
    ProviderState, ToolDescriptor, ToolProvider, ToolResponse, permissive_schema,
};

/// Default per-request timeout. A slow call fails alone; the process lives.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default budget for spawn + handshake + first catalog fetch.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one bridged process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Provider name; also the namespace prefix for its tools.
    pub name: String,
    /// Command to execute.
    pub command: String,
    /// Arguments to pass.
    pub args: Vec<String>,
    /// Extra environment variables for the child.
    pub env: Vec<(String, String)>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Handshake timeout; exceeding it fails `initialize()`.
    pub startup_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

/// A [`ToolProvider`] backed by a child process speaking JSON-RPC over
/// stdio.
pub struct StdioBridge {
    config: BridgeConfig,
    state: Arc<RwLock<ProviderState>>,
    peer: RwLock<Option<Arc<RpcPeer>>>,
    tools: RwLock<Vec<ToolDescriptor>>,
    server_version: RwLock<Option<String>>,
    kill_tx: StdMutex<Option<oneshot::Sender<()>>>,
}

impl StdioBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ProviderState::Spawning)),
            peer: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            server_version: RwLock::new(None),
            kill_tx: StdMutex::new(None),
        }
    }

    /// Number of requests currently awaiting a response. Exposed for the
    /// shutdown invariant: zero immediately after `shutdown()`.
    pub async fn pending_requests(&self) -> usize {
        match self.peer.read().await.as_ref() {
            Some(peer) => peer.pending_len(),
            None => 0,
        }
    }

    async fn advance_state(&self, next: ProviderState) {
        advance(&self.state, &self.config.name, next).await;
    }

    async fn spawn_child(&self) -> Result<Arc<RpcPeer>, ProviderError> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|e| ProviderError::SpawnFailed {
            command: self.config.command.clone(),
            reason: e.to_string(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| ProviderError::SpawnFailed {
            command: self.config.command.clone(),
            reason: "child stdin not piped".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ProviderError::SpawnFailed {
            command: self.config.command.clone(),
            reason: "child stdout not piped".to_string(),
        })?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(self.config.name.clone(), stderr);
        }

        let peer = Arc::new(RpcPeer::start(
            self.config.name.clone(),
            stdout,
            stdin,
            self.config.request_timeout,
        ));

        let (kill_tx, kill_rx) = oneshot::channel();
        *self.kill_tx.lock().expect("kill channel lock poisoned") = Some(kill_tx);
        tokio::spawn(monitor_child(
            child,
            kill_rx,
            Arc::clone(&peer),
            Arc::clone(&self.state),
            self.config.name.clone(),
        ));

        *self.peer.write().await = Some(Arc::clone(&peer));
        Ok(peer)
    }

    /// Kill the child (via the monitor task) and drop the peer.
    async fn teardown(&self) {
        if let Some(kill) = self.kill_tx.lock().expect("kill channel lock poisoned").take() {
            let _ = kill.send(());
        }
        if let Some(peer) = self.peer.write().await.take() {
            peer.close();
        }
    }
}

#[async_trait]
impl ToolProvider for StdioBridge {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        "External tool provider over stdio JSON-RPC"
    }

    async fn state(&self) -> ProviderState {
        *self.state.read().await
    }

    /// Spawn the process and run the handshake: `initialize` request,
    /// `notifications/initialized`, then `tools/list`. Exceeding the
    /// startup timeout fails with an explicit error; the bridge is never
    /// marked ready.
    async fn initialize(&self) -> Result<(), ProviderError> {
        {
            let state = *self.state.read().await;
            if state != ProviderState::Spawning {
                return Err(ProviderError::HandshakeFailed {
                    name: self.config.name.clone(),
                    reason: format!("bridge already started (state: {state}); create a fresh instance"),
                });
            }
        }

        let peer = match self.spawn_child().await {
            Ok(peer) => peer,
            Err(e) => {
                self.advance_state(ProviderState::Crashed).await;
                return Err(e);
            }
        };
        self.advance_state(ProviderState::Initializing).await;

        let handshake = handshake(&peer, &self.config.name);
        let outcome = match tokio::time::timeout(self.config.startup_timeout, handshake).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::HandshakeFailed {
                name: self.config.name.clone(),
                reason: format!(
                    "handshake did not complete within {:?}",
                    self.config.startup_timeout
                ),
            }),
        };

        match outcome {
            Ok((tools, server_version)) => {
                tracing::info!(
                    provider = %self.config.name,
                    tools = tools.len(),
                    server_version = server_version.as_deref().unwrap_or("unknown"),
                    "Bridge ready"
                );
                *self.tools.write().await = tools;
                *self.server_version.write().await = server_version;
                self.advance_state(ProviderState::Ready).await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(provider = %self.config.name, error = %e, "Bridge handshake failed");
                self.teardown().await;
                self.advance_state(ProviderState::Crashed).await;
                Err(e)
            }
        }
    }

    async fn shutdown(&self) {
        self.advance_state(ProviderState::ShuttingDown).await;
        self.teardown().await;
        self.advance_state(ProviderState::Terminated).await;
    }

    /// Return the catalog snapshot taken during the handshake. The catalog
    /// is not re-polled; a provider wanting a fresh catalog is re-registered
    /// as a fresh bridge.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ProviderError> {
        Ok(self.tools.read().await.clone())
    }

    async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResponse, ProviderError> {
        let state = *self.state.read().await;
        if !state.is_ready() {
            return Err(ProviderError::NotReady {
                name: self.config.name.clone(),
                state: state.to_string(),
            });
        }

        let peer = self
            .peer
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(ProviderError::ShuttingDown)?;

        let params = serde_json::json!({
            "name": name,
            "arguments": args,
        });

        // A fatal transport error means the pipe is gone, not that this one
        // call failed; surface it with the uniform shutdown wording.
        let result = peer
            .request(METHOD_CALL_TOOL, Some(params))
            .await
            .map_err(|e| {
                if e.is_fatal() {
                    ProviderError::ShuttingDown
                } else {
                    ProviderError::Rpc(e)
                }
            })?;

        tool_response_from_result(result)
    }
}

/// Run the protocol handshake against an attached peer. Returns the
/// converted catalog and the server's reported version.
async fn handshake(
    peer: &RpcPeer,
    name: &str,
) -> Result<(Vec<ToolDescriptor>, Option<String>), ProviderError> {
    let init_params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
    });

    let init_result = peer
        .request(METHOD_INITIALIZE, Some(init_params))
        .await
        .map_err(|e| ProviderError::HandshakeFailed {
            name: name.to_string(),
            reason: format!("initialize: {e}"),
        })?;

    // Servers vary in how much of the initialize result they fill in;
    // only the version is worth keeping.
    let init: InitializeResult = serde_json::from_value(init_result).unwrap_or_default();
    let server_version = init.server_info.and_then(|info| info.version);

    peer.notify(METHOD_INITIALIZED, None)
        .await
        .map_err(|e| ProviderError::HandshakeFailed {
            name: name.to_string(),
            reason: format!("initialized notification: {e}"),
        })?;

    let listed = peer
        .request(METHOD_LIST_TOOLS, Some(serde_json::json!({})))
        .await
        .map_err(|e| ProviderError::HandshakeFailed {
            name: name.to_string(),
            reason: format!("tools/list: {e}"),
        })?;

    let listed: ListToolsResult =
        serde_json::from_value(listed).map_err(|e| ProviderError::HandshakeFailed {
            name: name.to_string(),
            reason: format!("tools/list result: {e}"),
        })?;

    // Zero tools is a valid catalog.
    let tools = listed.tools.into_iter().map(descriptor_from_wire).collect();
    Ok((tools, server_version))
}

/// Convert a `tools/call` result into the contract shape: text blocks
/// concatenated, `isError` mapped to failure.
fn tool_response_from_result(result: serde_json::Value) -> Result<ToolResponse, ProviderError> {
    let call: CallToolResult =
        serde_json::from_value(result).map_err(|e| ProviderError::ExecutionFailed {
            reason: format!("malformed tools/call result: {e}"),
        })?;

    let text = concat_text_blocks(&call.content);
    if call.is_error.unwrap_or(false) {
        Ok(ToolResponse::failure(text))
    } else {
        Ok(ToolResponse::success(serde_json::Value::String(text)))
    }
}

/// Convert an advertised tool into a descriptor. A schema that cannot be
/// converted falls back to the permissive schema rather than failing
/// registration.
fn descriptor_from_wire(tool: WireTool) -> ToolDescriptor {
    let input_schema = convert_input_schema(tool.input_schema);
    ToolDescriptor {
        name: tool.name,
        description: tool.description.unwrap_or_default(),
        input_schema,
    }
}

fn convert_input_schema(schema: Option<serde_json::Value>) -> serde_json::Value {
    match schema {
        Some(serde_json::Value::Object(mut obj)) => {
            match obj.get("type").and_then(|t| t.as_str()) {
                Some("object") => serde_json::Value::Object(obj),
                None if obj.contains_key("properties") => {
                    obj.insert("type".to_string(), serde_json::json!("object"));
                    serde_json::Value::Object(obj)
                }
                _ => permissive_schema(),
            }
        }
        _ => permissive_schema(),
    }
}

async fn advance(state: &RwLock<ProviderState>, name: &str, next: ProviderState) {
    let mut guard = state.write().await;
    if guard.can_transition_to(next) {
        tracing::debug!(provider = name, from = %*guard, to = %next, "Bridge state change");
        *guard = next;
    } else if *guard != next {
        tracing::debug!(
            provider = name,
            from = %*guard,
            to = %next,
            "Ignoring illegal state transition"
        );
    }
}

/// Wait on the child. An unexpected exit rejects everything pending and
/// marks the bridge crashed; a kill signal (shutdown path) force-terminates
/// the process.
async fn monitor_child(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    peer: Arc<RpcPeer>,
    state: Arc<RwLock<ProviderState>>,
    name: String,
) {
    tokio::select! {
        status = child.wait() => {
            peer.close();
            let mut guard = state.write().await;
            if guard.can_transition_to(ProviderState::Crashed) {
                *guard = ProviderState::Crashed;
                tracing::warn!(
                    provider = %name,
                    status = ?status.ok(),
                    "Provider process exited unexpectedly"
                );
            }
        }
        _ = kill_rx => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            peer.close();
            tracing::info!(provider = %name, "Provider process terminated");
        }
    }
}

fn spawn_stderr_logger(name: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(provider = %name, "stderr: {line}");
        }
    });
}
