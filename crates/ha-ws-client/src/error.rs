//! Error types for the WebSocket client

use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors talking to Home Assistant
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Socket could not be opened or broke; worth retrying
    #[error("transport error: {0}")]
    Transport(String),

    /// The access token was rejected
    #[error("authentication rejected: {0}")]
    AuthInvalid(String),

    /// The connection is gone
    #[error("connection closed")]
    Closed,

    /// Home Assistant answered a command with `success: false`
    #[error("command failed ({code}): {message}")]
    CommandFailed { code: String, message: String },

    /// The readiness probe did not see its own event in time
    #[error("event bus did not dispatch the probe event in time")]
    ReadinessTimeout,

    /// Reconnecting after a drop gave up
    #[error("failed to reconnect after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Unexpected or malformed message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection dropped a command without answering it
    #[error("command cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether reconnecting could fix this
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ClientError::AuthInvalid(_) | ClientError::ReconnectExhausted { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(err.to_string())
    }
}
