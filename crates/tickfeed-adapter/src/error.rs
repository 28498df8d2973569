/*
[INPUT]:  Error sources (transport, handshake, decode, serialization, config)
[OUTPUT]: Structured error types with retry and re-auth hints
[POS]:    Error handling layer - unified error type for the entire crate
[UPDATE]: When adding new error sources or improving error messages
*/

use thiserror::Error;

use crate::ws::codec::DecodeError;

/// Main error type for the tickfeed adapter
#[derive(Error, Debug)]
pub enum TickerError {
    /// WebSocket transport failed (socket I/O, protocol violation, handshake)
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Handshake rejected by the server, typically an expired access token
    #[error("authentication rejected (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    /// Binary tick frame could not be decoded
    #[error("frame decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Server pushed an error message over the stream
    #[error("server error: {message}")]
    Server { message: String },

    /// Serialization/deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing failed
    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Configuration error, rejected synchronously at the API boundary
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Reconnect attempt ceiling reached; the client is now closed
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// The client has been stopped and accepts no further calls
    #[error("client is closed")]
    Closed,
}

impl TickerError {
    /// Check if the error is handled by the reconnect/backoff path
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TickerError::Transport(_)
                | TickerError::Authentication { .. }
                | TickerError::Server { .. }
        )
    }

    /// Check if the error indicates the access token should be refreshed
    pub fn is_auth_error(&self) -> bool {
        matches!(self, TickerError::Authentication { .. })
    }
}

/// Result type alias for tickfeed operations
pub type Result<T> = std::result::Result<T, TickerError>;
