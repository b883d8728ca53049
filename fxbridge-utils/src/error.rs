//! Error types for fxbridge
//!
//! Provides a unified error type used across all fxbridge crates.

/// Main error type for fxbridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // === IO Errors ===

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    // === Transport Errors ===

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    // === Process Errors ===

    #[error("Failed to spawn process: {0}")]
    ProcessSpawn(String),

    // === Internal Errors ===

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a WebSocket error
    pub fn websocket(msg: impl Into<String>) -> Self {
        Self::WebSocket(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a process spawn error
    pub fn spawn(msg: impl Into<String>) -> Self {
        Self::ProcessSpawn(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for errors that only affect a single client connection
    ///
    /// Connection-scoped errors drop that client; everything else is either
    /// fatal at startup (spawn, config) or a server-side bug.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::ConnectionClosed
                | Self::WebSocket(_)
                | Self::InvalidMessage(_)
        )
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
