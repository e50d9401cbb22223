//! Market data feed session for quotewire.
//!
//! Composes the transport, heartbeat and reconnection policy from
//! `quotewire-ws` into one resilient session per client, and keeps the
//! latest price per instrument in a shared copy-on-write store.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod price_store;
pub mod session;

pub use client::MarketFeedClient;
pub use config::FeedConfig;
pub use error::{FeedError, FeedResult};
pub use events::FeedEvent;
pub use price_store::{PriceSnapshot, PriceStore};
pub use session::{CloseReason, ConnectionState, SessionStatus};
