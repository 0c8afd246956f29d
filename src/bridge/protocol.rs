//! Newline-delimited JSON-RPC 2.0 wire protocol.
//!
//! Every line on the child process pipe is one complete JSON-RPC message.
//! Messages are classified into a tagged variant at parse time; nothing
//! downstream pokes at untyped JSON fields.

use serde::Deserialize;
use thiserror::Error;

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";

/// An outbound request. Ids are per-bridge monotonically increasing
/// integers; no id is ever reused within a session.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Option<serde_json::Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to a single wire line (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut obj = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.id,
            "method": self.method,
        });
        if let Some(params) = &self.params {
            obj["params"] = params.clone();
        }
        serde_json::to_string(&obj)
    }
}

/// A one-way notification: no id, no response expected, no pending-request
/// bookkeeping.
#[derive(Debug, Clone)]
pub struct RpcNotification {
    pub method: String,
    pub params: Option<serde_json::Value>,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut obj = serde_json::json!({
            "jsonrpc": "2.0",
            "method": self.method,
        });
        if let Some(params) = &self.params {
            obj["params"] = params.clone();
        }
        serde_json::to_string(&obj)
    }
}

/// An inbound response, carrying either `result` or `error`.
#[derive(Debug, Clone)]
pub struct RpcResponse {
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcErrorObject>,
}

/// The JSON-RPC error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// A parsed wire message.
#[derive(Debug, Clone)]
pub enum RpcMessage {
    Request(RpcRequest),
    Response(RpcResponse),
    Notification(RpcNotification),
}

/// Why a wire line failed to parse. Malformed lines are logged and dropped
/// by the transport; they never abort the stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a JSON-RPC 2.0 message: {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<serde_json::Value>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Parse one wire line into a classified message.
pub fn parse_line(line: &str) -> Result<RpcMessage, FrameError> {
    let raw: RawMessage = serde_json::from_str(line)?;

    if raw.jsonrpc.as_deref() != Some("2.0") {
        return Err(FrameError::Invalid("missing or wrong jsonrpc version"));
    }

    match (raw.method, raw.id) {
        (Some(method), Some(id)) => {
            let id = parse_id(&id)?;
            Ok(RpcMessage::Request(RpcRequest {
                id,
                method,
                params: raw.params,
            }))
        }
        (Some(method), None) => Ok(RpcMessage::Notification(RpcNotification {
            method,
            params: raw.params,
        })),
        (None, Some(id)) => {
            if raw.result.is_none() && raw.error.is_none() {
                return Err(FrameError::Invalid("response with neither result nor error"));
            }
            let id = parse_id(&id)?;
            Ok(RpcMessage::Response(RpcResponse {
                id,
                result: raw.result,
                error: raw.error,
            }))
        }
        (None, None) => Err(FrameError::Invalid("message with neither method nor id")),
    }
}

fn parse_id(id: &serde_json::Value) -> Result<u64, FrameError> {
    id.as_u64()
        .ok_or(FrameError::Invalid("non-integer message id"))
}

// ---------------------------------------------------------------------------
// Typed payloads for the methods the bridge speaks.
// ---------------------------------------------------------------------------

/// Result of the `initialize` request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<WireTool>,
}

/// One tool definition as the provider advertises it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: Option<bool>,
}

/// A typed response content block. Non-text blocks are accepted and skipped
/// during concatenation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Concatenate the text blocks of a tool result into one string.
pub fn concat_text_blocks(content: &[ContentBlock]) -> String {
    let mut out = String::new();
    for block in content {
        if let ContentBlock::Text { text } = block {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_line_includes_id_and_method() {
        let req = RpcRequest::new(7, METHOD_LIST_TOOLS, Some(serde_json::json!({})));
        let line = req.to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "tools/list");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn notification_line_has_no_id() {
        let note = RpcNotification::new(METHOD_INITIALIZED, None);
        let line = note.to_line().unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
    }

    #[test]
    fn parses_result_response() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#).unwrap();
        match msg {
            RpcMessage::Response(resp) => {
                assert_eq!(resp.id, 3);
                assert!(resp.error.is_none());
                assert_eq!(resp.result.unwrap()["ok"], true);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parses_error_response() {
        let msg =
            parse_line(r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601,"message":"nope"}}"#)
                .unwrap();
        match msg {
            RpcMessage::Response(resp) => {
                let err = resp.error.unwrap();
                assert_eq!(err.code, -32601);
                assert_eq!(err.message, "nope");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn parses_server_notification() {
        let msg = parse_line(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#).unwrap();
        assert!(matches!(msg, RpcMessage::Notification(_)));
    }

    #[test]
    fn parses_server_request() {
        let msg =
            parse_line(r#"{"jsonrpc":"2.0","id":1,"method":"sampling/createMessage"}"#).unwrap();
        assert!(matches!(msg, RpcMessage::Request(_)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"id":1,"result":{}}"#).is_err());
        assert!(parse_line(r#"{"jsonrpc":"2.0"}"#).is_err());
        assert!(parse_line(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
        assert!(parse_line(r#"{"jsonrpc":"2.0","id":"abc","result":{}}"#).is_err());
    }

    #[test]
    fn concatenates_only_text_blocks() {
        let result: CallToolResult = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "data": "...", "mimeType": "image/png"},
                {"type": "text", "text": "second"},
            ],
            "isError": false
        }))
        .unwrap();

        assert_eq!(concat_text_blocks(&result.content), "first\nsecond");
        assert_eq!(result.is_error, Some(false));
    }

    #[test]
    fn empty_content_concatenates_to_empty_string() {
        assert_eq!(concat_text_blocks(&[]), "");
    }

    #[test]
    fn wire_tool_tolerates_missing_schema() {
        let listed: ListToolsResult = serde_json::from_value(serde_json::json!({
            "tools": [{"name": "bare"}]
        }))
        .unwrap();
        assert_eq!(listed.tools[0].name, "bare");
        assert!(listed.tools[0].input_schema.is_none());
    }
}
