//! Market feed client.
//!
//! One background task owns the socket, timers, heartbeat and session state.
//! The public handle only talks to it via commands, so every transition is
//! applied in order and stale socket callbacks never race a newer attempt.

use crate::config::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::events::FeedEvent;
use crate::price_store::PriceStore;
use crate::session::{ConnectionState, Session, SessionStatus};
use parking_lot::Mutex;
use quotewire_ws::connection::EventSender;
use quotewire_ws::{
    classify_frame, Connection, ConnectionEvent, ConnectionEventKind, Connector,
    HeartbeatMonitor, InboundFrame, ProbeOutcome, ReconnectDecision, ReconnectPolicy, WsConnector,
    WsError, PING_FRAME,
};
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

enum Command {
    Connect,
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    Send {
        text: String,
        reply: oneshot::Sender<FeedResult<()>>,
    },
}

struct Shared {
    cmd_tx: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<FeedEvent>,
    status_rx: watch::Receiver<SessionStatus>,
    store: PriceStore,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last handle gone: stop the session, its socket and its timers.
        self.shutdown.cancel();
    }
}

/// Handle to one feed session. Clones share the same session.
#[derive(Clone)]
pub struct MarketFeedClient {
    shared: Arc<Shared>,
}

impl MarketFeedClient {
    /// Create a client for `config.url` using the WebSocket connector.
    ///
    /// Must be called within a Tokio runtime. Nothing connects until
    /// [`connect`](Self::connect).
    pub fn new(config: FeedConfig) -> FeedResult<Self> {
        Self::with_connector(config, Arc::new(WsConnector::new()))
    }

    /// Create a client with a custom connector.
    pub fn with_connector(config: FeedConfig, connector: Arc<dyn Connector>) -> FeedResult<Self> {
        config.validate()?;
        let policy = ReconnectPolicy::new(config.reconnect_config())?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let store = PriceStore::new();
        let shutdown = CancellationToken::new();

        let actor = SessionActor {
            url: config.url.clone(),
            connector,
            policy,
            session: Session::new(),
            heartbeat: HeartbeatMonitor::new(config.ping_interval()),
            store: store.clone(),
            events: events.clone(),
            status_tx,
            connection: None,
            conn_id: 0,
            socket_tx,
            heartbeat_timer: None,
            reconnect_timer: None,
        };
        let task = tokio::spawn(actor.run(cmd_rx, socket_rx, shutdown.clone()));

        Ok(Self {
            shared: Arc::new(Shared {
                cmd_tx,
                events,
                status_rx,
                store,
                shutdown,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Start connecting.
    ///
    /// Ignored while connecting, open or reconnecting. After the retry
    /// ceiling was reached this starts a fresh cycle with a full budget.
    pub fn connect(&self) -> FeedResult<()> {
        self.shared
            .cmd_tx
            .send(Command::Connect)
            .map_err(|_| FeedError::SessionClosed)
    }

    /// Close the socket, cancel every timer and end the session.
    ///
    /// Returns once the final `Closed` state has been published; no events
    /// follow it. Calling it again is a no-op.
    pub async fn disconnect(&self) {
        let (ack, done) = oneshot::channel();
        if self.shared.cmd_tx.send(Command::Disconnect { ack }).is_err() {
            return;
        }
        let _ = done.await;
    }

    /// Send a text frame on the open socket.
    pub async fn send(&self, text: impl Into<String>) -> FeedResult<()> {
        let (reply, result) = oneshot::channel();
        self.shared
            .cmd_tx
            .send(Command::Send {
                text: text.into(),
                reply,
            })
            .map_err(|_| FeedError::SessionClosed)?;
        result.await.map_err(|_| FeedError::SessionClosed)?
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.shared.events.subscribe()
    }

    /// Watch the session status.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status_rx.clone()
    }

    pub fn current_status(&self) -> SessionStatus {
        self.shared.status_rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status_rx.borrow().state
    }

    /// Read handle to the price snapshot.
    pub fn prices(&self) -> PriceStore {
        self.shared.store.clone()
    }

    /// Whether the session task is still alive.
    pub fn is_running(&self) -> bool {
        self.shared
            .task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

struct SessionActor {
    url: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    session: Session,
    heartbeat: HeartbeatMonitor,
    store: PriceStore,
    events: broadcast::Sender<FeedEvent>,
    status_tx: watch::Sender<SessionStatus>,
    /// Current socket, `None` while reconnecting or closed.
    connection: Option<Box<dyn Connection>>,
    /// Id of the most recent attempt. Events tagged otherwise are stale.
    conn_id: u64,
    socket_tx: EventSender,
    heartbeat_timer: Option<Interval>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

async fn next_probe(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(delay) => delay.as_mut().await,
        None => pending().await,
    }
}

impl SessionActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut socket_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
        shutdown: CancellationToken,
    ) {
        debug!(url = %self.url, "Feed session task started");
        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("All feed client handles dropped, closing session");
                    self.close_session();
                    break;
                }

                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Disconnect { ack }) => {
                        self.close_session();
                        let _ = ack.send(());
                        break;
                    }
                    Some(Command::Connect) => self.handle_connect(),
                    Some(Command::Send { text, reply }) => {
                        let _ = reply.send(self.send_text(&text));
                    }
                    None => {
                        self.close_session();
                        break;
                    }
                },

                Some(event) = socket_rx.recv() => self.handle_socket_event(event),

                () = next_probe(&mut self.heartbeat_timer) => self.send_probe(),

                () = reconnect_due(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.start_attempt();
                }
            }
        }
        debug!("Feed session task stopped");
    }

    fn handle_connect(&mut self) {
        let state = self.session.state();
        if !state.accepts_connect() {
            debug!(%state, "connect() ignored");
            return;
        }
        self.session.restart();
        self.start_attempt();
    }

    fn send_text(&self, text: &str) -> FeedResult<()> {
        if !self.session.state().is_open() {
            return Err(FeedError::SendWhileNotOpen);
        }
        let conn = self.connection.as_ref().ok_or(FeedError::SendWhileNotOpen)?;
        conn.send(text).map_err(|e| match e {
            WsError::SendWhileNotOpen => FeedError::SendWhileNotOpen,
            other => other.into(),
        })
    }

    fn start_attempt(&mut self) {
        self.conn_id += 1;
        self.session.begin_attempt();
        self.publish_state();

        info!(
            conn_id = self.conn_id,
            url = %self.url,
            retry_count = self.session.retry_count(),
            attempts = self.session.connection_attempts(),
            "Connecting to market feed"
        );
        match self
            .connector
            .open(&self.url, self.conn_id, self.socket_tx.clone())
        {
            Ok(conn) => self.connection = Some(conn),
            Err(e) => {
                error!(conn_id = self.conn_id, error = %e, "Failed to start connection");
                self.emit(FeedEvent::TransportError(e.to_string()));
                self.on_connection_lost(&e);
            }
        }
    }

    fn handle_socket_event(&mut self, event: ConnectionEvent) {
        if event.conn_id != self.conn_id || self.connection.is_none() {
            trace!(
                conn_id = event.conn_id,
                current = self.conn_id,
                "Ignoring event from superseded connection"
            );
            return;
        }

        let state = self.session.state();
        match event.kind {
            ConnectionEventKind::Open if state == ConnectionState::Connecting => self.on_open(),
            ConnectionEventKind::Message(text) if state.is_open() => self.handle_frame(&text),
            ConnectionEventKind::Error(cause) => {
                warn!(conn_id = event.conn_id, %state, error = %cause, "Feed transport error");
                self.emit(FeedEvent::TransportError(cause.clone()));
                if state.is_open() {
                    self.session.record_transport_error(cause);
                    self.publish_status();
                } else {
                    self.on_connection_lost(&WsError::Transport(cause));
                }
            }
            ConnectionEventKind::Close { code, reason } => {
                warn!(conn_id = event.conn_id, code, %reason, "Feed connection closed unexpectedly");
                self.on_connection_lost(&WsError::UnexpectedClose { code, reason });
            }
            other => trace!(conn_id = event.conn_id, %state, ?other, "Ignoring socket event"),
        }
    }

    fn on_open(&mut self) {
        self.session.mark_open();
        self.heartbeat.stop();
        let period = self.heartbeat.interval();
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat_timer = Some(timer);

        info!(conn_id = self.conn_id, "Market feed connected");
        self.publish_state();
    }

    fn send_probe(&mut self) {
        let Some(conn) = self.connection.as_ref() else {
            self.heartbeat_timer = None;
            return;
        };
        if let Err(e) = conn.send(PING_FRAME) {
            debug!(conn_id = self.conn_id, error = %e, "Skipping heartbeat probe");
            return;
        }
        if let ProbeOutcome::Replaced { .. } = self.heartbeat.record_ping(Instant::now()) {
            debug!(conn_id = self.conn_id, "Heartbeat probe replaced unanswered one");
        }
        self.publish_status();
    }

    fn handle_frame(&mut self, text: &str) {
        match classify_frame(text) {
            InboundFrame::Pong => match self.heartbeat.record_pong(Instant::now()) {
                Some(rtt) => {
                    self.emit(FeedEvent::LatencyChanged {
                        latency_ms: rtt.as_millis() as u64,
                    });
                    self.publish_status();
                }
                None => debug!("Unsolicited pong ignored"),
            },
            InboundFrame::Prices(update) => {
                if self.store.apply(&update) {
                    trace!(instruments = update.len(), "Price update applied");
                    self.emit(FeedEvent::PriceUpdated(update));
                }
            }
            InboundFrame::Raw(payload) => {
                debug!(len = payload.len(), "Forwarding unrecognized frame");
                self.emit(FeedEvent::RawMessage(payload));
            }
        }
    }

    /// The current socket is gone without being asked to close.
    fn on_connection_lost(&mut self, cause: &WsError) {
        self.stop_socket();

        match self.policy.decide(self.session.retry_count()) {
            ReconnectDecision::Retry { attempt, delay } => {
                warn!(
                    attempt,
                    max_retries = self.policy.max_retries(),
                    delay_ms = delay.as_millis() as u64,
                    cause = %cause,
                    "Reconnecting to market feed"
                );
                self.session.schedule_retry(attempt);
                self.reconnect_timer = Some(Box::pin(sleep(delay)));
            }
            ReconnectDecision::GiveUp { attempts } => {
                let terminal = WsError::RetriesExhausted { attempts };
                error!(cause = %cause, error = %terminal, "Giving up on market feed");
                self.session.exhaust(attempts);
            }
        }
        self.publish_state();
    }

    fn stop_socket(&mut self) {
        self.heartbeat_timer = None;
        self.heartbeat.stop();
        if let Some(mut conn) = self.connection.take() {
            conn.close();
        }
    }

    /// Final transition. No timer, socket or event survives this.
    fn close_session(&mut self) {
        self.reconnect_timer = None;
        self.stop_socket();
        self.session.close();
        info!(conn_id = self.conn_id, "Market feed disconnected");
        self.publish_state();
    }

    fn emit(&self, event: FeedEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_state(&self) {
        self.emit(FeedEvent::ConnectionStateChanged {
            state: self.session.state(),
            retry_count: self.session.retry_count(),
        });
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status_tx
            .send_replace(self.session.status(&self.heartbeat));
    }
}
