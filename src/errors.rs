//! Error types for quakewatch.
//!
//! Uses `thiserror` for library-style error definitions.

use thiserror::Error;

/// Errors that can occur in quakewatch operations.
#[derive(Error, Debug)]
pub enum QuakewatchError {
    /// Websocket transport failed
    #[error("websocket transport failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A recognized frame carried an unusable body
    #[error("Invalid frame: {0}")]
    Decode(String),

    /// The server closed the connection
    #[error("connection closed by server")]
    Closed,
}
