//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Send attempted while feed is not open")]
    SendWhileNotOpen,

    #[error("Feed session has shut down")]
    SessionClosed,

    #[error("WebSocket error: {0}")]
    Ws(#[from] quotewire_ws::WsError),
}

pub type FeedResult<T> = Result<T, FeedError>;
