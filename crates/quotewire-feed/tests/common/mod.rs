//! Scripted connector for driving a feed session without a network.
//!
//! Every `open()` is recorded; the test then decides what each socket does
//! (accept, fail, drop, push frames) by index in attempt order.

#![allow(dead_code)]

use parking_lot::Mutex;
use quotewire_feed::{ConnectionState, FeedConfig, FeedEvent};
use quotewire_ws::connection::EventSender;
use quotewire_ws::{
    Connection, ConnectionEvent, ConnectionEventKind, Connector, SocketState, WsError, WsResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(60);

pub fn test_config(max_retries: u32) -> FeedConfig {
    FeedConfig {
        max_retries,
        ..FeedConfig::new("ws://feed.test/ws/market")
    }
}

struct ScriptedSocket {
    conn_id: u64,
    events: EventSender,
    state: Arc<Mutex<SocketState>>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    sockets: Arc<Mutex<Vec<ScriptedSocket>>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.sockets.lock().len()
    }

    pub fn conn_id(&self, idx: usize) -> u64 {
        self.sockets.lock()[idx].conn_id
    }

    pub fn socket_state(&self, idx: usize) -> SocketState {
        *self.sockets.lock()[idx].state.lock()
    }

    /// Frames the session sent on socket `idx`.
    pub fn sent(&self, idx: usize) -> Vec<String> {
        self.sockets.lock()[idx].sent.lock().clone()
    }

    fn emit(&self, idx: usize, kind: ConnectionEventKind) {
        let sockets = self.sockets.lock();
        let socket = &sockets[idx];
        // Session may already be gone.
        let _ = socket.events.send(ConnectionEvent {
            conn_id: socket.conn_id,
            kind,
        });
    }

    fn set_state(&self, idx: usize, state: SocketState) {
        *self.sockets.lock()[idx].state.lock() = state;
    }

    pub fn accept(&self, idx: usize) {
        self.set_state(idx, SocketState::Open);
        self.emit(idx, ConnectionEventKind::Open);
    }

    /// Handshake failure: error then abnormal close.
    pub fn fail(&self, idx: usize) {
        self.set_state(idx, SocketState::Closed);
        self.emit(idx, ConnectionEventKind::Error("connection refused".to_string()));
        self.emit(
            idx,
            ConnectionEventKind::Close {
                code: 1006,
                reason: "Handshake failed".to_string(),
            },
        );
    }

    /// Server side close of an open socket.
    pub fn drop_socket(&self, idx: usize, code: u16) {
        self.set_state(idx, SocketState::Closed);
        self.emit(
            idx,
            ConnectionEventKind::Close {
                code,
                reason: "server went away".to_string(),
            },
        );
    }

    pub fn error(&self, idx: usize, cause: &str) {
        self.emit(idx, ConnectionEventKind::Error(cause.to_string()));
    }

    pub fn push(&self, idx: usize, text: &str) {
        self.emit(idx, ConnectionEventKind::Message(text.to_string()));
    }
}

impl Connector for ScriptedConnector {
    fn open(
        &self,
        _url: &str,
        conn_id: u64,
        events: EventSender,
    ) -> WsResult<Box<dyn Connection>> {
        let state = Arc::new(Mutex::new(SocketState::Connecting));
        let sent = Arc::new(Mutex::new(Vec::new()));
        self.sockets.lock().push(ScriptedSocket {
            conn_id,
            events,
            state: state.clone(),
            sent: sent.clone(),
        });
        Ok(Box::new(ScriptedConnection {
            conn_id,
            state,
            sent,
        }))
    }
}

struct ScriptedConnection {
    conn_id: u64,
    state: Arc<Mutex<SocketState>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl Connection for ScriptedConnection {
    fn id(&self) -> u64 {
        self.conn_id
    }

    fn state(&self) -> SocketState {
        *self.state.lock()
    }

    fn send(&self, text: &str) -> WsResult<()> {
        if self.state() != SocketState::Open {
            return Err(WsError::SendWhileNotOpen);
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&mut self) {
        *self.state.lock() = SocketState::Closed;
    }
}

pub async fn next_event(events: &mut broadcast::Receiver<FeedEvent>) -> FeedEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("feed event within timeout")
        .expect("event channel open")
}

/// Next state transition, skipping every other event.
pub async fn next_state(events: &mut broadcast::Receiver<FeedEvent>) -> (ConnectionState, u32) {
    loop {
        if let FeedEvent::ConnectionStateChanged { state, retry_count } = next_event(events).await
        {
            return (state, retry_count);
        }
    }
}

/// Drain everything queued right now without waiting.
pub fn drain(events: &mut broadcast::Receiver<FeedEvent>) -> Vec<FeedEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
