//! Events fanned out to feed subscribers.

use crate::session::ConnectionState;
use quotewire_ws::PriceUpdate;

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Every session state transition, with the retry count at that moment.
    ConnectionStateChanged {
        state: ConnectionState,
        retry_count: u32,
    },
    /// New heartbeat round-trip sample.
    LatencyChanged { latency_ms: u64 },
    /// A price frame was merged; carries only the instruments in that frame.
    PriceUpdated(PriceUpdate),
    /// Inbound frame that was neither a pong nor a price object.
    RawMessage(String),
    /// Socket error. Fatal only while connecting; the session handles that.
    TransportError(String),
}

impl FeedEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionStateChanged { .. } => "connection_state_changed",
            Self::LatencyChanged { .. } => "latency_changed",
            Self::PriceUpdated(_) => "price_updated",
            Self::RawMessage(_) => "raw_message",
            Self::TransportError(_) => "transport_error",
        }
    }
}
