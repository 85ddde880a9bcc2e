//! App foreground/background handling and the shared polling flags
//!
//! [`PollingState`] is the only state shared between channels. The
//! [`LifecycleController`] is its single writer; every poller reads it once
//! per cycle.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use commune_shared_config::clamp_interval_ms;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RealtimeError, RealtimeResult};
use crate::status::{ConnectionState, ConnectionStatus};

/// Application state as reported by the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppState {
    /// In the foreground and receiving input
    Active,
    /// Sent to the background
    Background,
    /// Transitioning, or covered by a system overlay
    Inactive,
}

impl AppState {
    /// Whether polling should be suppressed in this state
    pub fn suppresses_polling(&self) -> bool {
        matches!(self, Self::Background | Self::Inactive)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Background => write!(f, "background"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

impl FromStr for AppState {
    type Err = RealtimeError;

    fn from_str(s: &str) -> RealtimeResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "background" => Ok(Self::Background),
            "inactive" => Ok(Self::Inactive),
            other => Err(RealtimeError::UnknownAppState(other.to_string())),
        }
    }
}

/// Process-wide polling flags shared by every channel of one service
#[derive(Debug)]
pub(crate) struct PollingState {
    backgrounded: AtomicBool,
    interval_ms: AtomicU64,
}

impl PollingState {
    pub(crate) fn new(interval_ms: u64) -> Self {
        Self {
            backgrounded: AtomicBool::new(false),
            interval_ms: AtomicU64::new(clamp_interval_ms(interval_ms)),
        }
    }

    pub(crate) fn is_backgrounded(&self) -> bool {
        self.backgrounded.load(Ordering::Acquire)
    }

    pub(crate) fn set_backgrounded(&self, backgrounded: bool) {
        self.backgrounded.store(backgrounded, Ordering::Release);
    }

    pub(crate) fn interval_ms(&self) -> u64 {
        self.interval_ms.load(Ordering::Acquire)
    }

    /// Base interval used by conversation channels
    pub(crate) fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms())
    }

    /// Store a new base interval, clamped to the supported minimum
    pub(crate) fn set_interval_ms(&self, interval_ms: u64) -> u64 {
        let clamped = clamp_interval_ms(interval_ms);
        self.interval_ms.store(clamped, Ordering::Release);
        clamped
    }
}

/// Adapts polling to the app lifecycle without touching subscriptions
#[derive(Debug, Clone)]
pub(crate) struct LifecycleController {
    polling: Arc<PollingState>,
    status: Arc<ConnectionStatus>,
}

impl LifecycleController {
    pub(crate) fn new(polling: Arc<PollingState>, status: Arc<ConnectionStatus>) -> Self {
        Self { polling, status }
    }

    /// Flip the background flag and report the matching connection state
    ///
    /// Running tasks are left alone: their ticks turn into no-ops while
    /// backgrounded and resume on the next scheduled tick after foregrounding.
    pub(crate) fn on_app_state_change(&self, state: AppState) -> ConnectionState {
        let (backgrounded, connection) = if state.suppresses_polling() {
            (true, ConnectionState::Background)
        } else {
            (false, ConnectionState::Connected)
        };

        self.polling.set_backgrounded(backgrounded);
        let previous = self.status.set(connection);

        if previous != connection {
            info!(
                app_state = %state,
                from = %previous,
                to = %connection,
                "Realtime connection state changed"
            );
        }

        connection
    }

    /// Override the base interval; applies from each poller's next cycle
    pub(crate) fn set_polling_interval_ms(&self, interval_ms: u64) -> u64 {
        let applied = self.polling.set_interval_ms(interval_ms);
        info!(
            requested_ms = interval_ms,
            interval_ms = applied,
            "Polling interval updated"
        );
        applied
    }

    /// Back to foreground polling without recreating any task
    pub(crate) fn resume(&self) {
        self.polling.set_backgrounded(false);
        self.status.set(ConnectionState::Connected);
    }
}
