//! Error types for the gateway client

use thiserror::Error;

/// Errors that can occur when talking to the Commune backend
#[derive(Error, Debug)]
pub enum GatewayError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed to parse the response body
    #[error("failed to parse backend response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Backend answered with a non-success HTTP status
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Backend answered 2xx but flagged the envelope as unsuccessful
    #[error("backend reported failure: {0}")]
    Unsuccessful(String),

    /// Request timeout
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Backend not reachable
    #[error("connection refused. Is the backend running at {0}?")]
    ConnectionRefused(String),

    /// All retry attempts exhausted
    #[error("all {attempts} retry attempts failed. Last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl GatewayError {
    /// Check if this error is retryable (transient failure)
    ///
    /// Retries on timeouts, refused connections, rate limiting and
    /// server errors (5xx). Client errors (4xx) and malformed bodies
    /// will not fix themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Timeout(_) | GatewayError::ConnectionRefused(_) => true,
            GatewayError::Status { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Http(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                matches!(e.status(), Some(status) if status.is_server_error())
            }
            _ => false,
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
