//! JSON-RPC 2.0 transport for a Language Server Protocol connection
//! (component C7, §4.7): `Content-Length`-framed stream I/O or one
//! JSON-RPC message per WebSocket frame, a pending-request map keyed by
//! monotonically increasing ids, cooperative cancellation, and
//! disconnect/reconnect bookkeeping.
//!
//! This crate owns the wire; it knows nothing about `initialize`
//! handshakes or document state — that belongs to `core-lsp-client`.

use core_text::CoreError;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Reconnecting,
}

/// A notification or server-initiated request received off the wire.
/// Server-to-client requests are surfaced here too (dispatch, per §4.7,
/// only distinguishes by the presence of `id`); this crate does not answer
/// them, the client layer decides whether to.
#[derive(Debug, Clone)]
pub enum Incoming {
    Notification { method: String, params: Value },
    ServerRequest { id: u64, method: String, params: Value },
}

pub struct NotificationStream(mpsc::UnboundedReceiver<Incoming>);

impl NotificationStream {
    pub async fn recv(&mut self) -> Option<Incoming> {
        self.0.recv().await
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, CoreError>>>>>;

/// Handle to a running JSON-RPC session. Cheap to clone-by-reference
/// (methods take `&self`); the reader/writer tasks run independently.
pub struct Transport {
    next_id: AtomicU64,
    pending: PendingMap,
    outbound: Mutex<mpsc::UnboundedSender<Value>>,
    notifications_tx: mpsc::UnboundedSender<Incoming>,
    state: Arc<Mutex<SessionState>>,
    timeout: Duration,
}

impl Transport {
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Send a request and await its response, or `Timeout` once `timeout`
    /// elapses. The slot stays keyed by `id` until a response arrives, the
    /// caller cancels it, or the transport disconnects.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, CoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let payload = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        if self.send_raw(payload).is_err() {
            self.pending.lock().remove(&id);
            return Err(CoreError::Disconnected);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoreError::Disconnected),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(CoreError::Timeout)
            }
        }
    }

    pub fn notify(&self, method: &str, params: Value) -> Result<(), CoreError> {
        self.send_raw(json!({"jsonrpc": "2.0", "method": method, "params": params}))
    }

    /// Cooperative cancellation: removes the pending slot (so a later
    /// response for `id` is dropped silently) and tells the server.
    pub fn cancel(&self, id: u64) {
        if self.pending.lock().remove(&id).is_some() {
            let _ = self.notify("$/cancelRequest", json!({"id": id}));
        }
    }

    fn send_raw(&self, value: Value) -> Result<(), CoreError> {
        self.outbound.lock().send(value).map_err(|_| CoreError::Disconnected)
    }

    /// Replace the I/O with a fresh stream-framed connection, reusing the
    /// pending map and notification channel. The caller must still drive a
    /// fresh `initialize`/`initialized` handshake before admitting other
    /// requests — that gating lives in the client's state machine.
    pub fn reconnect_stream<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = outbound_tx;
        *self.state.lock() = SessionState::Connected;
        spawn_stream_tasks(
            reader,
            writer,
            outbound_rx,
            self.pending.clone(),
            self.notifications_tx.clone(),
            self.state.clone(),
        );
    }

    pub fn reconnect_websocket<S>(&self, ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.outbound.lock() = outbound_tx;
        *self.state.lock() = SessionState::Connected;
        spawn_websocket_tasks(
            ws,
            outbound_rx,
            self.pending.clone(),
            self.notifications_tx.clone(),
            self.state.clone(),
        );
    }
}

/// Build a transport over a `Content-Length`-framed byte stream (the
/// classic stdio/pipe LSP transport).
pub fn spawn_stream<R, W>(reader: R, writer: W, timeout: Duration) -> (Transport, NotificationStream)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let state = Arc::new(Mutex::new(SessionState::Connected));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (notif_tx, notif_rx) = mpsc::unbounded_channel();

    spawn_stream_tasks(reader, writer, outbound_rx, pending.clone(), notif_tx.clone(), state.clone());

    let transport = Transport {
        next_id: AtomicU64::new(0),
        pending,
        outbound: Mutex::new(outbound_tx),
        notifications_tx: notif_tx,
        state,
        timeout,
    };
    (transport, NotificationStream(notif_rx))
}

/// Build a transport over a WebSocket, one JSON-RPC message per frame.
pub fn spawn_websocket<S>(ws: WebSocketStream<S>, timeout: Duration) -> (Transport, NotificationStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let state = Arc::new(Mutex::new(SessionState::Connected));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (notif_tx, notif_rx) = mpsc::unbounded_channel();

    spawn_websocket_tasks(ws, outbound_rx, pending.clone(), notif_tx.clone(), state.clone());

    let transport = Transport {
        next_id: AtomicU64::new(0),
        pending,
        outbound: Mutex::new(outbound_tx),
        notifications_tx: notif_tx,
        state,
        timeout,
    };
    (transport, NotificationStream(notif_rx))
}

fn spawn_stream_tasks<R, W>(
    reader: R,
    writer: W,
    mut outbound_rx: mpsc::UnboundedReceiver<Value>,
    pending: PendingMap,
    notif_tx: mpsc::UnboundedSender<Incoming>,
    state: Arc<Mutex<SessionState>>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let reader_pending = pending.clone();
    let reader_state = state.clone();
    tokio::spawn(async move {
        let mut buf = BufReader::new(reader);
        loop {
            match read_framed_message(&mut buf).await {
                Ok(Some(value)) => dispatch_incoming(value, &reader_pending, &notif_tx),
                Ok(None) => {
                    debug!(target: "lsp.transport", "stream_closed");
                    break;
                }
                Err(e) => {
                    warn!(target: "lsp.transport", error = %e, "stream_read_error");
                    break;
                }
            }
        }
        disconnect(&reader_pending, &reader_state);
    });

    let writer_pending = pending;
    let writer_state = state;
    tokio::spawn(async move {
        let mut writer = writer;
        while let Some(value) = outbound_rx.recv().await {
            if let Err(e) = write_framed_message(&mut writer, &value).await {
                warn!(target: "lsp.transport", error = %e, "stream_write_error");
                break;
            }
        }
        disconnect(&writer_pending, &writer_state);
    });
}

fn spawn_websocket_tasks<S>(
    ws: WebSocketStream<S>,
    mut outbound_rx: mpsc::UnboundedReceiver<Value>,
    pending: PendingMap,
    notif_tx: mpsc::UnboundedSender<Incoming>,
    state: Arc<Mutex<SessionState>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    let reader_pending = pending.clone();
    let reader_state = state.clone();
    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<Value>(&text) {
                    Ok(value) => dispatch_incoming(value, &reader_pending, &notif_tx),
                    Err(e) => warn!(target: "lsp.transport", error = %e, "websocket_parse_error"),
                },
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "lsp.transport", error = %e, "websocket_read_error");
                    break;
                }
            }
        }
        disconnect(&reader_pending, &reader_state);
    });

    let writer_pending = pending;
    let writer_state = state;
    tokio::spawn(async move {
        while let Some(value) = outbound_rx.recv().await {
            let text = value.to_string();
            if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                warn!(target: "lsp.transport", error = %e, "websocket_write_error");
                break;
            }
        }
        disconnect(&writer_pending, &writer_state);
    });
}

fn disconnect(pending: &PendingMap, state: &Arc<Mutex<SessionState>>) {
    let mut map = pending.lock();
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(CoreError::Disconnected));
    }
    drop(map);
    *state.lock() = SessionState::Reconnecting;
}

fn dispatch_incoming(value: Value, pending: &PendingMap, notif_tx: &mpsc::UnboundedSender<Incoming>) {
    let id = value.get("id").and_then(Value::as_u64);
    let method = value.get("method").and_then(Value::as_str).map(str::to_string);

    match (id, method) {
        (Some(id), None) => {
            let outcome = match value.get("error") {
                Some(err) => {
                    let message = err.get("message").and_then(Value::as_str).unwrap_or("").to_string();
                    let code = err.get("code").and_then(Value::as_i64).unwrap_or(-1);
                    Err(CoreError::ParseError(format!("server error {code}: {message}")))
                }
                None => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            };
            if let Some(tx) = pending.lock().remove(&id) {
                let _ = tx.send(outcome);
            } else {
                trace!(target: "lsp.transport", id, "response_for_unknown_or_cancelled_request");
            }
        }
        (Some(id), Some(method)) => {
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            let _ = notif_tx.send(Incoming::ServerRequest { id, method, params });
        }
        (None, Some(method)) => {
            let params = value.get("params").cloned().unwrap_or(Value::Null);
            let _ = notif_tx.send(Incoming::Notification { method, params });
        }
        (None, None) => {
            warn!(target: "lsp.transport", "message_missing_id_and_method");
        }
    }
}

async fn read_framed_message<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> io::Result<Option<Value>> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(rest) = trimmed.strip_prefix("Content-Length:") {
            content_length = rest.trim().parse().ok();
        }
    }
    let len = content_length
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header"))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    let value = serde_json::from_slice(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

async fn write_framed_message<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(value)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::io::DuplexStream;

    fn pipe_pair() -> (DuplexStream, DuplexStream) {
        tokio::io::duplex(64 * 1024)
    }

    #[tokio::test]
    async fn request_round_trips_through_framing() {
        let (client_io, mut server_io) = pipe_pair();
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let (transport, _notifications) = spawn_stream(client_reader, client_writer, Duration::from_secs(5));

        let server_task = tokio::spawn(async move {
            let msg = read_framed_message(&mut BufReader::new(&mut server_io)).await.unwrap().unwrap();
            assert_eq!(msg["method"], "initialize");
            let response = json!({"jsonrpc": "2.0", "id": msg["id"], "result": {"capabilities": {}}});
            write_framed_message(&mut server_io, &response).await.unwrap();
        });

        let result = transport.request("initialize", json!({})).await.unwrap();
        assert_eq!(result, json!({"capabilities": {}}));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn request_times_out_when_no_response_arrives() {
        let (client_io, _server_io) = pipe_pair();
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let (transport, _notifications) = spawn_stream(client_reader, client_writer, Duration::from_millis(20));

        let err = transport.request("hover", json!({})).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout));
    }

    #[tokio::test]
    async fn disconnect_fails_all_pending_requests() {
        let (client_io, server_io) = pipe_pair();
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let (transport, _notifications) = spawn_stream(client_reader, client_writer, Duration::from_secs(5));
        let transport = Arc::new(transport);

        let req = tokio::spawn({
            let transport = transport.clone();
            async move { transport.request("hover", json!({})).await }
        });
        tokio::task::yield_now().await;
        drop(server_io);

        let err = req.await.unwrap().unwrap_err();
        assert!(matches!(err, CoreError::Disconnected));
    }

    #[tokio::test]
    async fn cancel_drops_later_response_silently() {
        let (client_io, mut server_io) = pipe_pair();
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let (transport, _notifications) = spawn_stream(client_reader, client_writer, Duration::from_secs(5));

        transport.pending.lock().insert(42, oneshot::channel().0);
        transport.cancel(42);
        assert!(!transport.pending.lock().contains_key(&42));

        let cancel_msg = read_framed_message(&mut BufReader::new(&mut server_io)).await.unwrap().unwrap();
        assert_eq!(cancel_msg["method"], "$/cancelRequest");
        assert_eq!(cancel_msg["params"]["id"], 42);
    }

    #[tokio::test]
    async fn notification_without_id_is_delivered_to_listener() {
        let (client_io, mut server_io) = pipe_pair();
        let (client_reader, client_writer) = tokio::io::split(client_io);
        let (_transport, mut notifications) = spawn_stream(client_reader, client_writer, Duration::from_secs(5));

        let note = json!({"jsonrpc": "2.0", "method": "window/showMessage", "params": {"type": 1, "message": "hi"}});
        write_framed_message(&mut server_io, &note).await.unwrap();

        match notifications.recv().await.unwrap() {
            Incoming::Notification { method, params } => {
                assert_eq!(method, "window/showMessage");
                assert_eq!(params["message"], "hi");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
