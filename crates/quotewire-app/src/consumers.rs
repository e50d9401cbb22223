//! Independent feed consumers: metrics recorder and periodic summary.

use chrono::{DateTime, Utc};
use quotewire_feed::{ConnectionState, FeedEvent, PriceSnapshot, PriceStore, SessionStatus};
use quotewire_telemetry::Metrics;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Heartbeat latency as shown to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyHealth {
    /// No sample yet.
    Unknown,
    Healthy,
    /// Above the configured warning threshold.
    Degraded,
}

impl LatencyHealth {
    pub fn classify(latency_ms: Option<u64>, warn_ms: u64) -> Self {
        match latency_ms {
            None => Self::Unknown,
            Some(ms) if ms > warn_ms => Self::Degraded,
            Some(_) => Self::Healthy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
        }
    }
}

/// One summary line worth of session and snapshot state.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSummary {
    pub state: ConnectionState,
    pub retry_count: u32,
    pub instruments: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub health: LatencyHealth,
}

impl FeedSummary {
    pub fn new(status: &SessionStatus, snapshot: &PriceSnapshot, latency_warn_ms: u64) -> Self {
        Self {
            state: status.state,
            retry_count: status.retry_count,
            instruments: snapshot.len(),
            last_updated: snapshot.last_updated(),
            latency_ms: status.last_latency_ms,
            health: LatencyHealth::classify(status.last_latency_ms, latency_warn_ms),
        }
    }

    fn log(&self) {
        info!(
            state = %self.state,
            retry_count = self.retry_count,
            instruments = self.instruments,
            last_updated = ?self.last_updated,
            latency_ms = ?self.latency_ms,
            health = self.health.as_str(),
            "Feed summary"
        );
    }
}

/// Turns feed events into Prometheus metrics.
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    store: PriceStore,
    latency_warn_ms: u64,
}

impl MetricsRecorder {
    pub fn new(store: PriceStore, latency_warn_ms: u64) -> Self {
        Self {
            store,
            latency_warn_ms,
        }
    }

    pub fn record(&self, event: &FeedEvent) {
        match event {
            FeedEvent::ConnectionStateChanged { state, retry_count } => {
                Metrics::feed_state_set(state.as_str());
                if state.is_open() {
                    Metrics::feed_connected();
                } else {
                    Metrics::feed_disconnected();
                }
                if *state == ConnectionState::Reconnecting {
                    Metrics::feed_reconnect("unexpected_close");
                    debug!(retry_count, "Reconnect recorded");
                }
            }
            FeedEvent::LatencyChanged { latency_ms } => {
                Metrics::feed_latency(*latency_ms as f64);
                if LatencyHealth::classify(Some(*latency_ms), self.latency_warn_ms)
                    == LatencyHealth::Degraded
                {
                    warn!(
                        latency_ms,
                        threshold_ms = self.latency_warn_ms,
                        "Feed latency degraded"
                    );
                }
            }
            FeedEvent::PriceUpdated(update) => {
                Metrics::price_frame(update.len());
                Metrics::instruments_tracked(self.store.snapshot().len());
            }
            FeedEvent::RawMessage(_) => Metrics::raw_frame(),
            FeedEvent::TransportError(_) => Metrics::transport_error(),
        }
    }

    /// Record until the event stream ends or `shutdown` fires.
    pub async fn run(self, mut events: broadcast::Receiver<FeedEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => self.record(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Metrics recorder lagged behind feed events");
                        Metrics::events_lagged(skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Metrics recorder stopped");
    }
}

/// Log a [`FeedSummary`] every `every` until `shutdown` fires.
pub async fn run_summary(
    status: watch::Receiver<SessionStatus>,
    store: PriceStore,
    every: Duration,
    latency_warn_ms: u64,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let current = status.borrow().clone();
                FeedSummary::new(&current, &store.snapshot(), latency_warn_ms).log();
            }
        }
    }
}
