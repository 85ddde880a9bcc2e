//! Error types for the realtime engine
//!
//! Polling failures never surface here; they are logged and retried on the
//! next tick. These errors only cover parsing values handed in by the UI.

use thiserror::Error;

/// Realtime engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// App state string not recognised
    #[error("unknown app state: {0}")]
    UnknownAppState(String),

    /// Connection state string not recognised
    #[error("unknown connection state: {0}")]
    UnknownConnectionState(String),
}

/// Result type for realtime operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;
