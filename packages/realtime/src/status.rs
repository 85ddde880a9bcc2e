//! Connection status reporting

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{RealtimeError, RealtimeResult};

/// Live-update status shown by "live updates active" indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ConnectionState {
    /// Not initialized, or explicitly disconnected
    #[default]
    Disconnected = 0,
    /// Polling in the foreground
    Connected = 1,
    /// App is backgrounded; ticks are suppressed
    Background = 2,
}

impl ConnectionState {
    /// Whether updates are currently flowing to subscribers
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connected,
            2 => Self::Background,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Background => write!(f, "background"),
        }
    }
}

impl FromStr for ConnectionState {
    type Err = RealtimeError;

    fn from_str(s: &str) -> RealtimeResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "disconnected" => Ok(Self::Disconnected),
            "connected" => Ok(Self::Connected),
            "background" => Ok(Self::Background),
            other => Err(RealtimeError::UnknownConnectionState(other.to_string())),
        }
    }
}

/// Atomically readable connection status
#[derive(Debug, Default)]
pub(crate) struct ConnectionStatus(AtomicU8);

impl ConnectionStatus {
    pub(crate) fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Store a new state, returning the previous one
    pub(crate) fn set(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }
}
