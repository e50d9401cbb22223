//! Prometheus metrics for the quotewire feed.
//!
//! # Panics
//!
//! Metric registration unwraps. A failure means a duplicate metric name,
//! which is a programming error and surfaces on first use at startup.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram, register_int_gauge, Counter, CounterVec, Encoder, Gauge, GaugeVec,
    Histogram, IntGauge, TextEncoder,
};

/// Feed socket state (1 = open, 0 = not open).
pub static FEED_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("quotewire_feed_connected", "Feed socket state (1=open)").unwrap()
});

/// Session state machine current state.
/// Labels: state (idle/connecting/open/reconnecting/closed/retries_exhausted)
pub static FEED_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "quotewire_feed_state",
        "Feed session current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Reconnect attempts scheduled after an unexpected close.
pub static FEED_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quotewire_feed_reconnect_total",
        "Total feed reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Heartbeat round-trip in milliseconds.
pub static FEED_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "quotewire_feed_latency_ms",
        "Heartbeat round-trip latency in milliseconds",
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0]
    )
    .unwrap()
});

/// Last heartbeat round-trip in milliseconds.
pub static FEED_LAST_LATENCY_MS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "quotewire_feed_last_latency_ms",
        "Most recent heartbeat round-trip in milliseconds"
    )
    .unwrap()
});

/// Inbound frames by kind (price/raw).
pub static FEED_FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "quotewire_feed_frames_total",
        "Inbound feed frames by kind",
        &["kind"]
    )
    .unwrap()
});

/// Individual instrument prices applied.
pub static PRICE_UPDATES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "quotewire_price_updates_total",
        "Instrument prices merged into the snapshot"
    )
    .unwrap()
});

/// Instruments currently in the price snapshot.
pub static INSTRUMENTS_TRACKED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "quotewire_instruments_tracked",
        "Instruments present in the price snapshot"
    )
    .unwrap()
});

/// Transport errors reported by the socket.
pub static TRANSPORT_ERRORS_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "quotewire_transport_errors_total",
        "Feed transport errors"
    )
    .unwrap()
});

/// Subscriber fell behind and skipped events.
pub static EVENTS_LAGGED_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "quotewire_events_lagged_total",
        "Feed events skipped by a lagging consumer"
    )
    .unwrap()
});

const STATES: [&str; 6] = [
    "idle",
    "connecting",
    "open",
    "reconnecting",
    "closed",
    "retries_exhausted",
];

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn feed_connected() {
        FEED_CONNECTED.set(1.0);
    }

    pub fn feed_disconnected() {
        FEED_CONNECTED.set(0.0);
    }

    /// Set the session state. Only the active state is 1.
    pub fn feed_state_set(state: &str) {
        for s in STATES {
            FEED_STATE.with_label_values(&[s]).set(0.0);
        }
        FEED_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn feed_reconnect(reason: &str) {
        FEED_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn feed_latency(latency_ms: f64) {
        FEED_LATENCY_MS.observe(latency_ms);
        FEED_LAST_LATENCY_MS.set(latency_ms);
    }

    /// Record a merged price frame carrying `instruments` prices.
    pub fn price_frame(instruments: usize) {
        FEED_FRAMES_TOTAL.with_label_values(&["price"]).inc();
        PRICE_UPDATES_TOTAL.inc_by(instruments as f64);
    }

    pub fn raw_frame() {
        FEED_FRAMES_TOTAL.with_label_values(&["raw"]).inc();
    }

    pub fn instruments_tracked(count: usize) {
        INSTRUMENTS_TRACKED.set(count as i64);
    }

    pub fn transport_error() {
        TRANSPORT_ERRORS_TOTAL.inc();
    }

    pub fn events_lagged(skipped: u64) {
        EVENTS_LAGGED_TOTAL.inc_by(skipped as f64);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
