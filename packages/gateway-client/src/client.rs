//! HTTP implementation of the message gateway

use std::fmt;
use std::future::Future;
use std::time::Duration;

use commune_shared_config::GatewayConfig;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::MessageGateway;
use crate::models::{ApiEnvelope, Conversation, ConversationId, Message, MessagePage};

/// Maximum error body size kept in error values
const MAX_ERROR_BODY_SIZE: usize = 1000;

/// Default connection timeout in seconds
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Base delay for exponential backoff (milliseconds)
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Upper bound for a single backoff delay (milliseconds)
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Backoff before retry number `attempt` (1-based), capped at [`MAX_RETRY_DELAY_MS`]
fn retry_delay_ms(base_delay_ms: u64, attempt: u32) -> u64 {
    base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(MAX_RETRY_DELAY_MS)
}

/// Commune backend client speaking the REST API
#[derive(Clone)]
pub struct HttpMessageGateway {
    /// HTTP client with connection pool
    http_client: Client,
    /// Configuration
    config: GatewayConfig,
    /// Retries after the first attempt for transient failures
    max_retries: u32,
    /// Base delay for exponential backoff (milliseconds)
    retry_base_delay_ms: u64,
}

impl fmt::Debug for HttpMessageGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMessageGateway")
            .field("config", &self.config)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl HttpMessageGateway {
    /// Create a new gateway client from configuration
    pub fn new(config: &GatewayConfig) -> GatewayResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent("Commune/1.0")
            .build()?;

        Ok(Self::with_client(config, http_client))
    }

    /// Create a client with custom HTTP client (for testing)
    pub fn with_client(config: &GatewayConfig, http_client: Client) -> Self {
        Self {
            http_client,
            config: config.clone(),
            max_retries: config.max_retries,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = base_delay_ms;
        self
    }

    /// Execute an operation with retry logic for transient failures
    async fn with_retry<T, F, Fut>(&self, operation: F) -> GatewayResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay_ms = retry_delay_ms(self.retry_base_delay_ms, attempt);
                    warn!(
                        attempt = attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay_ms,
                        error = %e,
                        "Backend request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(e) if e.is_retryable() && self.max_retries > 0 => {
                    return Err(GatewayError::RetriesExhausted {
                        attempts: attempt + 1,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Truncate error body, respecting UTF-8 boundaries
    fn truncate_error_body(body: String) -> String {
        if body.len() <= MAX_ERROR_BODY_SIZE {
            return body;
        }

        let truncate_at = body
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|i| *i <= MAX_ERROR_BODY_SIZE)
            .last()
            .unwrap_or(0);

        format!("{}... (truncated)", &body[..truncate_at])
    }

    fn map_send_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_connect() {
            GatewayError::ConnectionRefused(self.config.url.clone())
        } else if e.is_timeout() {
            GatewayError::Timeout(self.config.timeout_secs)
        } else {
            GatewayError::Http(e)
        }
    }

    /// Issue a GET and unwrap the backend's `{ success, data }` envelope
    async fn get_envelope<T>(&self, url: &str, query: &[(&str, String)]) -> GatewayResult<T>
    where
        T: DeserializeOwned,
    {
        let mut request = self.http_client.get(url).query(query);
        if let Some(token) = &self.config.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = Self::truncate_error_body(response.text().await.unwrap_or_default());
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await.map_err(|e| self.map_send_error(e))?;
        let envelope: ApiEnvelope<T> = serde_json::from_str(&text)?;

        if !envelope.success {
            return Err(GatewayError::Unsuccessful(
                envelope
                    .message
                    .unwrap_or_else(|| "no message provided".to_string()),
            ));
        }

        envelope.data.ok_or_else(|| {
            GatewayError::Unsuccessful("response is missing its data field".to_string())
        })
    }
}

impl MessageGateway for HttpMessageGateway {
    #[instrument(skip(self))]
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
        per_page: u32,
    ) -> GatewayResult<Vec<Message>> {
        let url = self.config.messages_url(conversation_id);
        let query = [("page", page.to_string()), ("per_page", per_page.to_string())];

        let message_page: MessagePage = self
            .with_retry(|| self.get_envelope(&url, &query))
            .await?;

        debug!(
            conversation_id,
            message_count = message_page.messages.len(),
            "Fetched messages"
        );

        Ok(message_page.messages)
    }

    #[instrument(skip(self))]
    async fn list_conversations(&self) -> GatewayResult<Vec<Conversation>> {
        let url = self.config.conversations_url();

        let conversations: Vec<Conversation> =
            self.with_retry(|| self.get_envelope(&url, &[])).await?;

        debug!(
            conversation_count = conversations.len(),
            "Fetched conversations"
        );

        Ok(conversations)
    }
}
