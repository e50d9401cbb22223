//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    /// The initial open failed at the transport level.
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// Error reported while the socket is open. Does not close the session by itself.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed unexpectedly: code={code}, reason={reason}")]
    UnexpectedClose { code: u16, reason: String },

    #[error("Reconnection attempts exhausted after {attempts} retries")]
    RetriesExhausted { attempts: u32 },

    #[error("Send attempted while connection is not open")]
    SendWhileNotOpen,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;
