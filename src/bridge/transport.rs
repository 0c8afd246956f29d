//! Request/response correlation over a byte-stream peer.
//!
//! [`RpcPeer`] owns the write half of the child's stdio and a reader task
//! draining the read half line by line. Outbound requests park a oneshot
//! sender in the pending map keyed by id; the reader task completes them as
//! responses arrive. The peer is transport-agnostic (any `AsyncRead` +
//! `AsyncWrite`), which lets tests drive it over in-memory duplex pipes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::protocol::{self, RpcMessage, RpcNotification, RpcRequest};
use crate::error::RpcError;

type PendingSender = oneshot::Sender<Result<serde_json::Value, RpcError>>;
type PendingMap = Arc<StdMutex<HashMap<u64, PendingSender>>>;

pub(crate) struct RpcPeer {
    /// Provider name, for log context only.
    name: String,
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    default_timeout: Duration,
    closed: Arc<AtomicBool>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
}

impl RpcPeer {
    /// Attach to a peer's read/write halves and start the reader task.
    pub fn start<R, W>(name: impl Into<String>, reader: R, writer: W, default_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.into();
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(read_loop(
            name.clone(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
        ));

        Self {
            name,
            writer: Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(0),
            default_timeout,
            closed,
            reader_task: StdMutex::new(Some(reader_task)),
        }
    }

    /// Send a request and await its response, subject to the default
    /// per-request timeout.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        self.request_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// Send a request with an explicit timeout. On expiry the pending entry
    /// is removed and only this call fails; the peer stays up.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ChannelClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let request = RpcRequest::new(id, method, params);
        let line = request.to_line()?;

        // Register before writing so a fast response can't race the map.
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);

        if let Err(e) = self.write_line(&line).await {
            self.remove_pending(id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                // Sender dropped: the reader task failed everything pending.
                Err(RpcError::ChannelClosed)
            }
            Err(_) => {
                self.remove_pending(id);
                tracing::warn!(
                    provider = %self.name,
                    method,
                    ?timeout,
                    "RPC request timed out"
                );
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Send a one-way notification. Fire-and-forget: nothing is parked in
    /// the pending map and no response will ever arrive.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::ChannelClosed);
        }
        let line = RpcNotification::new(method, params).to_line()?;
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<(), RpcError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    fn remove_pending(&self, id: u64) {
        self.pending.lock().expect("pending map poisoned").remove(&id);
    }

    /// Reject every in-flight request with the uniform shutdown error.
    pub fn fail_all_pending(&self) {
        fail_pending(&self.pending, &self.name);
    }

    /// Number of in-flight requests. Zero immediately after close.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }

    /// Tear the peer down: stop the reader, reject everything pending, and
    /// refuse all further traffic.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.reader_task.lock().expect("reader task lock poisoned").take() {
            task.abort();
        }
        self.fail_all_pending();
    }
}

impl Drop for RpcPeer {
    fn drop(&mut self) {
        self.close();
    }
}

fn fail_pending(pending: &PendingMap, name: &str) {
    let drained: Vec<(u64, PendingSender)> = pending
        .lock()
        .expect("pending map poisoned")
        .drain()
        .collect();
    if !drained.is_empty() {
        tracing::debug!(
            provider = name,
            count = drained.len(),
            "Rejecting in-flight requests"
        );
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(RpcError::ChannelClosed));
    }
}

/// Drain the peer's output stream. `BufReader::lines` buffers raw bytes and
/// yields complete newline-terminated lines, holding any trailing partial
/// line across reads; each line is parsed as one independent message.
async fn read_loop<R>(name: String, reader: R, pending: PendingMap, closed: Arc<AtomicBool>)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!(provider = %name, "Peer output stream closed");
                break;
            }
            Err(e) => {
                tracing::warn!(provider = %name, error = %e, "Peer output stream error");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match protocol::parse_line(&line) {
            Ok(RpcMessage::Response(response)) => {
                let sender = pending
                    .lock()
                    .expect("pending map poisoned")
                    .remove(&response.id);
                match sender {
                    Some(tx) => {
                        let outcome = match response.error {
                            Some(err) => Err(RpcError::Remote {
                                code: err.code,
                                message: err.message,
                            }),
                            None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
                        };
                        let _ = tx.send(outcome);
                    }
                    None => {
                        // Late response to a timed-out or unknown request.
                        tracing::debug!(
                            provider = %name,
                            id = response.id,
                            "Dropping response with no pending request"
                        );
                    }
                }
            }
            Ok(RpcMessage::Notification(note)) => {
                tracing::debug!(
                    provider = %name,
                    method = %note.method,
                    "Ignoring server notification"
                );
            }
            Ok(RpcMessage::Request(request)) => {
                // We never act as a server; drop it rather than hang the peer.
                tracing::debug!(
                    provider = %name,
                    method = %request.method,
                    id = request.id,
                    "Ignoring server-initiated request"
                );
            }
            Err(e) => {
                tracing::warn!(
                    provider = %name,
                    error = %e,
                    line = %truncate_for_log(&line),
                    "Dropping malformed message"
                );
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    fail_pending(&pending, &name);
}

fn truncate_for_log(line: &str) -> &str {
    let max = 200;
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
