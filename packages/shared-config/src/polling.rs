//! Realtime polling configuration types

use crate::{parse_env, ConfigError, ConfigResult};

/// Default base polling interval in milliseconds
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 1000;

/// Smallest accepted polling interval; anything lower would busy-loop
pub const MIN_POLLING_INTERVAL_MS: u64 = 100;

/// Default number of messages fetched per conversation poll
pub const DEFAULT_PAGE_SIZE: u32 = 5;

/// Default factor applied to the base interval for the notification feed
pub const DEFAULT_NOTIFICATION_MULTIPLIER: u32 = 2;

/// Smart polling configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Base polling interval for conversation channels (milliseconds)
    pub interval_ms: u64,

    /// Messages requested per conversation poll (newest first)
    pub page_size: u32,

    /// Notification feed interval = base interval x this multiplier
    pub notification_multiplier: u32,
}

impl PollingConfig {
    /// Load polling configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            interval_ms: parse_env("POLLING_INTERVAL_MS", DEFAULT_POLLING_INTERVAL_MS)?,
            page_size: parse_env("POLLING_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            notification_multiplier: parse_env(
                "NOTIFICATION_INTERVAL_MULTIPLIER",
                DEFAULT_NOTIFICATION_MULTIPLIER,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration with a custom base interval (useful for testing)
    pub fn with_interval_ms(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            ..Self::default()
        }
    }

    /// Reject values the poller cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.page_size == 0 {
            return Err(ConfigError::ValidationError(
                "POLLING_PAGE_SIZE must be at least 1".to_string(),
            ));
        }
        if self.notification_multiplier == 0 {
            return Err(ConfigError::ValidationError(
                "NOTIFICATION_INTERVAL_MULTIPLIER must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Base interval clamped to [`MIN_POLLING_INTERVAL_MS`]
    pub fn effective_interval_ms(&self) -> u64 {
        clamp_interval_ms(self.interval_ms)
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLLING_INTERVAL_MS,
            page_size: DEFAULT_PAGE_SIZE,
            notification_multiplier: DEFAULT_NOTIFICATION_MULTIPLIER,
        }
    }
}

/// Clamp a polling interval to the supported minimum
pub fn clamp_interval_ms(interval_ms: u64) -> u64 {
    interval_ms.max(MIN_POLLING_INTERVAL_MS)
}
