//! Heartbeat probing for feed connections.
//!
//! Tracks the single in-flight probe and turns its round-trip into a latency
//! sample. The monitor is owned by one session task, so it holds plain state
//! and takes the current instant from the caller.
//!
//! A probe still pending when the next interval elapses is abandoned and
//! replaced. During sustained loss this under-reports the true RTT. Missed
//! pongs are not classified here; silence surfaces only when the transport
//! itself closes.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Result of sending a new probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// No probe was in flight.
    Sent,
    /// A previous probe had no reply yet and was discarded.
    Replaced { abandoned_sent_at: Instant },
}

/// Heartbeat monitor for one feed session.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    /// How often to probe while open.
    interval: Duration,
    /// Send time of the probe currently awaiting a pong.
    pending_ping_sent_at: Option<Instant>,
    /// Last measured round-trip.
    last_latency: Option<Duration>,
    /// Wall-clock time of the last accepted pong.
    last_pong_at: Option<DateTime<Utc>>,
    /// Probes discarded because the next interval came first.
    abandoned_probes: u64,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending_ping_sent_at: None,
            last_latency: None,
            last_pong_at: None,
            abandoned_probes: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Drop the in-flight probe (called when the socket goes away).
    ///
    /// Latency history is kept so consumers still see the last sample.
    pub fn stop(&mut self) {
        self.pending_ping_sent_at = None;
    }

    /// Record that a probe was sent at `now`.
    pub fn record_ping(&mut self, now: Instant) -> ProbeOutcome {
        match self.pending_ping_sent_at.replace(now) {
            Some(abandoned_sent_at) => {
                self.abandoned_probes += 1;
                debug!(
                    abandoned_after_ms = now.duration_since(abandoned_sent_at).as_millis() as u64,
                    "Previous probe unanswered, abandoning"
                );
                ProbeOutcome::Replaced { abandoned_sent_at }
            }
            None => ProbeOutcome::Sent,
        }
    }

    /// Record a pong received at `now`.
    ///
    /// Returns the round-trip if a probe was in flight, `None` otherwise.
    pub fn record_pong(&mut self, now: Instant) -> Option<Duration> {
        let sent_at = self.pending_ping_sent_at.take()?;
        let rtt = now.duration_since(sent_at);
        self.last_latency = Some(rtt);
        self.last_pong_at = Some(Utc::now());
        debug!(rtt_ms = rtt.as_millis() as u64, "Received pong");
        Some(rtt)
    }

    pub fn is_probe_pending(&self) -> bool {
        self.pending_ping_sent_at.is_some()
    }

    pub fn pending_ping_sent_at(&self) -> Option<Instant> {
        self.pending_ping_sent_at
    }

    pub fn last_latency(&self) -> Option<Duration> {
        self.last_latency
    }

    pub fn last_latency_ms(&self) -> Option<u64> {
        self.last_latency.map(|d| d.as_millis() as u64)
    }

    pub fn last_pong_at(&self) -> Option<DateTime<Utc>> {
        self.last_pong_at
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            last_latency_ms: self.last_latency_ms(),
            last_pong_at: self.last_pong_at,
            probe_pending: self.is_probe_pending(),
            abandoned_probes: self.abandoned_probes,
        }
    }
}

/// Heartbeat statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub last_latency_ms: Option<u64>,
    pub last_pong_at: Option<DateTime<Utc>>,
    pub probe_pending: bool,
    pub abandoned_probes: u64,
}
