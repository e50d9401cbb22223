//! Feed session state.

use chrono::{DateTime, Utc};
use quotewire_ws::HeartbeatMonitor;
use serde::Serialize;
use std::fmt;

/// Why a session ended up closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CloseReason {
    /// `disconnect()` was called, or every client handle was dropped.
    Disconnected,
    /// The retry ceiling was reached. A later `connect()` restarts the session.
    RetriesExhausted { attempts: u32 },
}

/// Lifecycle state of a feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Constructed, `connect()` not called yet.
    Idle,
    /// A socket attempt is in flight.
    Connecting,
    /// Socket open, heartbeat running.
    Open,
    /// Waiting for the backoff timer before the next attempt.
    Reconnecting,
    Closed(CloseReason),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed(CloseReason::Disconnected) => "closed",
            Self::Closed(CloseReason::RetriesExhausted { .. }) => "retries_exhausted",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// `connect()` starts a new attempt only from these states.
    pub fn accepts_connect(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Closed(CloseReason::RetriesExhausted { .. })
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    /// True while a reconnect cycle is in progress.
    pub reconnecting: bool,
    /// Consecutive unexpected closes since the last successful open.
    pub retry_count: u32,
    /// Physical socket attempts over the session lifetime.
    pub connection_attempts: u64,
    pub last_latency_ms: Option<u64>,
    pub last_pong_at: Option<DateTime<Utc>>,
    pub probe_pending: bool,
    pub abandoned_probes: u64,
    /// Most recent non-fatal transport error while open.
    pub last_transport_error: Option<String>,
}

impl SessionStatus {
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Closed(CloseReason::RetriesExhausted { .. })
        )
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            reconnecting: false,
            retry_count: 0,
            connection_attempts: 0,
            last_latency_ms: None,
            last_pong_at: None,
            probe_pending: false,
            abandoned_probes: 0,
            last_transport_error: None,
        }
    }
}

/// Session bookkeeping owned by the client task.
///
/// Every transition goes through a method here so `reconnecting` and
/// `retry_count` always agree with `state`.
#[derive(Debug)]
pub(crate) struct Session {
    state: ConnectionState,
    reconnecting: bool,
    retry_count: u32,
    connection_attempts: u64,
    last_transport_error: Option<String>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            reconnecting: false,
            retry_count: 0,
            connection_attempts: 0,
            last_transport_error: None,
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub(crate) fn connection_attempts(&self) -> u64 {
        self.connection_attempts
    }

    /// Manual `connect()`: a fresh cycle with a full retry budget.
    pub(crate) fn restart(&mut self) {
        self.retry_count = 0;
        self.reconnecting = false;
    }

    pub(crate) fn begin_attempt(&mut self) {
        self.state = ConnectionState::Connecting;
        self.connection_attempts += 1;
    }

    pub(crate) fn mark_open(&mut self) {
        self.state = ConnectionState::Open;
        self.retry_count = 0;
        self.reconnecting = false;
        self.last_transport_error = None;
    }

    pub(crate) fn schedule_retry(&mut self, attempt: u32) {
        self.state = ConnectionState::Reconnecting;
        self.retry_count = attempt;
        self.reconnecting = true;
    }

    pub(crate) fn exhaust(&mut self, attempts: u32) {
        self.state = ConnectionState::Closed(CloseReason::RetriesExhausted { attempts });
        self.reconnecting = false;
    }

    pub(crate) fn close(&mut self) {
        self.state = ConnectionState::Closed(CloseReason::Disconnected);
        self.reconnecting = false;
    }

    pub(crate) fn record_transport_error(&mut self, cause: String) {
        self.last_transport_error = Some(cause);
    }

    pub(crate) fn status(&self, heartbeat: &HeartbeatMonitor) -> SessionStatus {
        let hb = heartbeat.stats();
        SessionStatus {
            state: self.state,
            reconnecting: self.reconnecting,
            retry_count: self.retry_count,
            connection_attempts: self.connection_attempts,
            last_latency_ms: hb.last_latency_ms,
            last_pong_at: hb.last_pong_at,
            probe_pending: hb.probe_pending,
            abandoned_probes: hb.abandoned_probes,
            last_transport_error: self.last_transport_error.clone(),
        }
    }
}
