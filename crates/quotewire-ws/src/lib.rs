//! WebSocket transport for the quotewire market-data feed.
//!
//! Provides the building blocks the feed session is composed of:
//! - Single-attempt socket connections with tagged lifecycle events
//! - Heartbeat probing (`"ping"` literal, `{"type":"pong"}` reply) with RTT sampling
//! - Reconnection policy (exponential backoff with jitter and a retry ceiling)
//! - Inbound frame classification (pong / price update / raw)

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod reconnect;

pub use connection::{
    Connection, ConnectionEvent, ConnectionEventKind, Connector, SocketState, WsConnection,
    WsConnector,
};
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatMonitor, HeartbeatStats, ProbeOutcome};
pub use message::{classify_frame, InboundFrame, PongMessage, PriceUpdate, PING_FRAME};
pub use reconnect::{ReconnectConfig, ReconnectDecision, ReconnectPolicy, MAX_JITTER_RATIO};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the ring TLS crypto provider for `wss://` endpoints.
/// Must be called before the first connection is opened.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
