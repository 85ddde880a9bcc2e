//! Backend gateway configuration types

use crate::{get_env_or_default, parse_env, ConfigError, ConfigResult};
use std::env;

/// Default backend API base URL
const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// REST backend gateway configuration
#[derive(Clone)]
pub struct GatewayConfig {
    /// Backend API base URL (e.g., https://commune.example.com/api)
    pub url: String,

    /// Bearer token for authenticated requests
    pub api_token: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retry attempts for transient failures within a single request
    ///
    /// Zero by default: a polling caller retries on its next tick anyway.
    pub max_retries: u32,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl GatewayConfig {
    /// Load gateway configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let url = get_env_or_default("COMMUNE_API_URL", DEFAULT_API_URL);
        validate_url("COMMUNE_API_URL", &url)?;

        let api_token = env::var("COMMUNE_API_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());

        Ok(Self {
            url,
            api_token,
            timeout_secs: parse_env("GATEWAY_TIMEOUT", 10)?,
            max_retries: parse_env("GATEWAY_MAX_RETRIES", 0)?,
        })
    }

    /// Create a configuration with a custom URL (useful for testing)
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Get the full URL for a conversation's message listing
    pub fn messages_url(&self, conversation_id: i64) -> String {
        format!(
            "{}/conversations/{}/messages",
            self.url.trim_end_matches('/'),
            conversation_id
        )
    }

    /// Get the full URL for the conversation listing
    pub fn conversations_url(&self) -> String {
        format!("{}/conversations", self.url.trim_end_matches('/'))
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            api_token: None,
            timeout_secs: 10,
            max_retries: 0,
        }
    }
}

fn validate_url(name: &str, value: &str) -> ConfigResult<()> {
    let parsed =
        url::Url::parse(value).map_err(|e| ConfigError::InvalidUrl(name.to_string(), e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUrl(
            name.to_string(),
            format!("unsupported scheme '{}'", other),
        )),
    }
}
