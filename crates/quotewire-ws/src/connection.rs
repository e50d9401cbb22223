//! Single-attempt feed connections.
//!
//! A [`Connector`] opens one physical socket per call and never retries.
//! Lifecycle is reported as [`ConnectionEvent`]s tagged with the caller's
//! connection id, so a session can tell events from a superseded socket
//! apart from the current one.

use crate::error::{WsError, WsResult};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Close code reported when the socket dies without a close handshake.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Physical socket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// What happened on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    Open,
    Message(String),
    Error(String),
    Close { code: u16, reason: String },
}

/// Socket event tagged with the id the connection was opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub conn_id: u64,
    pub kind: ConnectionEventKind,
}

pub type EventSender = mpsc::UnboundedSender<ConnectionEvent>;

/// Opens connections. Implementations make exactly one physical attempt.
pub trait Connector: Send + Sync {
    /// Start opening `url`.
    ///
    /// Returns immediately; the outcome arrives on `events` as `Open`, or as
    /// `Error` followed by `Close`. Fails synchronously only when the attempt
    /// cannot even be started (malformed URL, unsupported scheme).
    fn open(&self, url: &str, conn_id: u64, events: EventSender)
        -> WsResult<Box<dyn Connection>>;
}

/// Handle to one socket.
pub trait Connection: Send {
    fn id(&self) -> u64;

    fn state(&self) -> SocketState;

    /// Queue a text frame. Fails with [`WsError::SendWhileNotOpen`] unless open.
    fn send(&self, text: &str) -> WsResult<()>;

    /// Request close. Idempotent.
    fn close(&mut self);
}

/// tokio-tungstenite backed connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    /// Disable Nagle's algorithm on the TCP stream.
    pub disable_nagle: bool,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            disable_nagle: true,
        }
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_request(url: &str) -> WsResult<Request> {
    let request = url
        .into_client_request()
        .map_err(|e| WsError::ConnectFailed(format!("invalid url {url:?}: {e}")))?;
    match request.uri().scheme_str() {
        Some("ws") | Some("wss") => Ok(request),
        other => Err(WsError::ConnectFailed(format!(
            "unsupported scheme {other:?} in {url:?}"
        ))),
    }
}

impl Connector for WsConnector {
    fn open(
        &self,
        url: &str,
        conn_id: u64,
        events: EventSender,
    ) -> WsResult<Box<dyn Connection>> {
        let request = parse_request(url)?;

        let state = Arc::new(RwLock::new(SocketState::Connecting));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        info!(conn_id, url = %url, "Opening WebSocket");
        let task = SocketTask {
            conn_id,
            state: state.clone(),
            events,
            cancel: cancel.clone(),
        };
        tokio::spawn(run_socket(request, self.disable_nagle, outbound_rx, task));

        Ok(Box::new(WsConnection {
            id: conn_id,
            state,
            outbound_tx,
            cancel,
        }))
    }
}

/// Handle to a tungstenite socket task. Dropping it closes the socket.
pub struct WsConnection {
    id: u64,
    state: Arc<RwLock<SocketState>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Connection for WsConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn state(&self) -> SocketState {
        *self.state.read()
    }

    fn send(&self, text: &str) -> WsResult<()> {
        if self.state() != SocketState::Open {
            return Err(WsError::SendWhileNotOpen);
        }
        self.outbound_tx
            .send(text.to_string())
            .map_err(|_| WsError::SendWhileNotOpen)
    }

    fn close(&mut self) {
        {
            let mut state = self.state.write();
            if matches!(*state, SocketState::Closing | SocketState::Closed) {
                return;
            }
            *state = SocketState::Closing;
        }
        debug!(conn_id = self.id, "Close requested");
        self.cancel.cancel();
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct SocketTask {
    conn_id: u64,
    state: Arc<RwLock<SocketState>>,
    events: EventSender,
    cancel: CancellationToken,
}

impl SocketTask {
    fn emit(&self, kind: ConnectionEventKind) {
        // Receiver gone means the session has shut down.
        let _ = self.events.send(ConnectionEvent {
            conn_id: self.conn_id,
            kind,
        });
    }

    fn set_state(&self, next: SocketState) {
        *self.state.write() = next;
    }
}

async fn run_socket(
    request: Request,
    disable_nagle: bool,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    task: SocketTask,
) {
    let conn_id = task.conn_id;
    let connect = connect_async_tls_with_config(request, None, disable_nagle, None);

    let ws_stream = tokio::select! {
        biased;
        () = task.cancel.cancelled() => {
            debug!(conn_id, "Closed before handshake completed");
            task.set_state(SocketState::Closed);
            return;
        }
        result = connect => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(conn_id, error = %e, "WebSocket handshake failed");
                task.set_state(SocketState::Closed);
                task.emit(ConnectionEventKind::Error(e.to_string()));
                task.emit(ConnectionEventKind::Close {
                    code: ABNORMAL_CLOSURE,
                    reason: "Handshake failed".to_string(),
                });
                return;
            }
        }
    };

    {
        let mut state = task.state.write();
        if *state != SocketState::Connecting {
            // close() won the race against the handshake.
            *state = SocketState::Closed;
            return;
        }
        *state = SocketState::Open;
    }
    info!(conn_id, "WebSocket connected");
    task.emit(ConnectionEventKind::Open);

    let (mut write, mut read) = ws_stream.split();

    let (code, reason) = loop {
        tokio::select! {
            biased;

            () = task.cancel.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(conn_id, error = %e, "Failed to send Close frame");
                }
                break (1000, "Closed by client".to_string());
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        task.emit(ConnectionEventKind::Message(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        task.emit(ConnectionEventKind::Message(
                            String::from_utf8_lossy(&data).into_owned(),
                        ));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!(conn_id, "Received ping, sending pong");
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            task.emit(ConnectionEventKind::Error(e.to_string()));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        warn!(conn_id, code, %reason, "WebSocket closed by server");
                        break (code, reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(conn_id, error = %e, "WebSocket read error");
                        task.emit(ConnectionEventKind::Error(e.to_string()));
                        break (ABNORMAL_CLOSURE, e.to_string());
                    }
                    None => {
                        warn!(conn_id, "WebSocket stream ended");
                        break (ABNORMAL_CLOSURE, "Stream ended".to_string());
                    }
                }
            }

            Some(text) = outbound_rx.recv() => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(conn_id, error = %e, "WebSocket write error");
                    task.emit(ConnectionEventKind::Error(e.to_string()));
                    break (ABNORMAL_CLOSURE, e.to_string());
                }
            }
        }
    };

    task.set_state(SocketState::Closed);
    task.emit(ConnectionEventKind::Close { code, reason });
}
