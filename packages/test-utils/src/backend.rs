//! Mock Commune backend for HTTP gateway tests
//!
//! Provides a [`MockCommuneServer`] that speaks the backend's REST envelope
//! (`{ "success": ..., "data": ... }`) so the HTTP gateway and the polling
//! engine can be exercised end to end.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Mock Commune backend
///
/// Wraps a [`wiremock::MockServer`]. Message endpoints are stateful: once
/// [`serve_messages`](Self::serve_messages) is mounted for a conversation,
/// messages pushed later show up on the next request, newest first and
/// paginated by the `page` / `per_page` query parameters.
///
/// wiremock answers with the first mounted mock that matches, so mount
/// failure mocks before the stateful one they should shadow.
///
/// # Example
///
/// ```rust,ignore
/// use commune_test_utils::MockCommuneServer;
///
/// #[tokio::test]
/// async fn test_messages() {
///     let server = MockCommuneServer::start().await;
///     server.serve_messages(42).await;
///     server.push_messages(42, &[1, 2, 3]);
///
///     // Point GatewayConfig at server.api_url()
/// }
/// ```
pub struct MockCommuneServer {
    server: MockServer,
    messages: Arc<Mutex<HashMap<i64, Vec<Value>>>>,
}

/// Serves the current message store for one conversation
struct MessagesResponder {
    conversation_id: i64,
    messages: Arc<Mutex<HashMap<i64, Vec<Value>>>>,
}

impl Respond for MessagesResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut page = 1usize;
        let mut per_page = 20usize;
        for (key, value) in request.url.query_pairs() {
            match key.as_ref() {
                "page" => page = value.parse().unwrap_or(1),
                "per_page" => per_page = value.parse().unwrap_or(20),
                _ => {}
            }
        }

        let mut messages = self
            .messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&self.conversation_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| std::cmp::Reverse(m["id"].as_i64().unwrap_or(0)));

        let page: Vec<Value> = messages
            .into_iter()
            .skip(page.saturating_sub(1) * per_page)
            .take(per_page)
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "messages": page }
        }))
    }
}

fn messages_path(conversation_id: i64) -> String {
    format!("/api/conversations/{}/messages", conversation_id)
}

impl MockCommuneServer {
    /// Start a new mock backend
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            messages: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Get the server URL
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Base URL of the REST API, suitable for `GatewayConfig::with_url`
    pub fn api_url(&self) -> String {
        format!("{}/api", self.server.uri())
    }

    /// Append messages with the given ids to a conversation's store
    pub fn push_messages(&self, conversation_id: i64, ids: &[i64]) {
        let mut store = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let entry = store.entry(conversation_id).or_default();
        for id in ids {
            entry.push(json!({
                "id": id,
                "body": format!("message {}", id),
                "conversation_id": conversation_id
            }));
        }
    }

    /// Mount the stateful messages endpoint for a conversation
    pub async fn serve_messages(&self, conversation_id: i64) {
        Mock::given(method("GET"))
            .and(path(messages_path(conversation_id)))
            .respond_with(MessagesResponder {
                conversation_id,
                messages: self.messages.clone(),
            })
            .mount(&self.server)
            .await;
    }

    /// Mount an HTTP error for the next `times` message requests
    pub async fn mock_messages_failure(&self, conversation_id: i64, status_code: u16, times: u64) {
        Mock::given(method("GET"))
            .and(path(messages_path(conversation_id)))
            .respond_with(ResponseTemplate::new(status_code).set_body_json(json!({
                "success": false,
                "message": "Internal server error"
            })))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Mount a `success: false` envelope for a conversation's messages
    pub async fn mock_messages_unsuccessful(&self, conversation_id: i64, message: &str) {
        Mock::given(method("GET"))
            .and(path(messages_path(conversation_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": message
            })))
            .mount(&self.server)
            .await;
    }

    /// Mount the conversation list endpoint
    pub async fn mock_conversations(&self, conversations: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/api/conversations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": conversations
            })))
            .mount(&self.server)
            .await;
    }

    /// Number of requests received for a conversation's messages
    pub async fn message_calls(&self, conversation_id: i64) -> usize {
        let target = messages_path(conversation_id);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == target)
            .count()
    }

    /// Get the underlying MockServer for custom mocks
    pub fn inner(&self) -> &MockServer {
        &self.server
    }
}
