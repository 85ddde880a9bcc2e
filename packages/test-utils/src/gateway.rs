//! In-memory message gateway for engine tests
//!
//! Provides an [`InMemoryGateway`] that serves conversations and messages
//! from memory, so polling behaviour can be tested under a paused Tokio
//! clock without any network.
//!
//! # Lock Poisoning Recovery
//!
//! Locks are acquired with `unwrap_or_else(|e| e.into_inner())` so a test
//! that panics while holding one does not cascade into other tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use commune_gateway_client::{
    Conversation, ConversationId, GatewayError, GatewayResult, Message, MessageGateway, MessageId,
};

/// Scriptable in-memory gateway
///
/// Messages are stored per conversation and served newest first, paginated
/// the way the backend does it. Failures and latency can be injected, and
/// every request is counted.
///
/// # Example
///
/// ```rust
/// use commune_test_utils::InMemoryGateway;
///
/// let gateway = InMemoryGateway::new();
/// gateway.push_messages(42, &[1, 2, 3]);
/// gateway.fail_next(1);
///
/// assert_eq!(gateway.message_call_count(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<GatewayState>,
    message_calls: AtomicUsize,
    conversation_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Debug, Default)]
struct GatewayState {
    messages: HashMap<ConversationId, Vec<Message>>,
    conversations: Vec<Conversation>,
    failures_remaining: usize,
    latency: Duration,
    message_requests: Vec<(ConversationId, u32, u32)>,
}

/// Decrements the in-flight counter when a request finishes or is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryGateway {
    /// Create an empty gateway
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a message to a conversation
    pub fn push_message(&self, conversation_id: ConversationId, message: Message) {
        self.state()
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message);
    }

    /// Append bare messages with the given ids to a conversation
    pub fn push_messages(&self, conversation_id: ConversationId, ids: &[MessageId]) {
        for id in ids {
            self.push_message(
                conversation_id,
                Message::new(*id).with_field("body", format!("message {}", id)),
            );
        }
    }

    /// Replace the conversation list
    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        self.state().conversations = conversations;
    }

    /// Make the next `count` requests fail with a connection error
    pub fn fail_next(&self, count: usize) {
        self.state().failures_remaining = count;
    }

    /// Delay every response by `latency` (uses the Tokio clock)
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    /// Total `list_messages` calls
    pub fn message_call_count(&self) -> usize {
        self.message_calls.load(Ordering::SeqCst)
    }

    /// `list_messages` calls for one conversation
    pub fn message_calls_for(&self, conversation_id: ConversationId) -> usize {
        self.state()
            .message_requests
            .iter()
            .filter(|(id, _, _)| *id == conversation_id)
            .count()
    }

    /// Most recent `(conversation_id, page, per_page)` request
    pub fn last_message_request(&self) -> Option<(ConversationId, u32, u32)> {
        self.state().message_requests.last().copied()
    }

    /// Total `list_conversations` calls
    pub fn conversation_call_count(&self) -> usize {
        self.conversation_calls.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were ever in flight at once
    pub fn max_concurrent_requests(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Record a request; returns the latency to apply and whether it fails
    fn begin_request(&self) -> (Duration, bool) {
        let mut state = self.state();
        let fail = state.failures_remaining > 0;
        if fail {
            state.failures_remaining -= 1;
        }
        (state.latency, fail)
    }

    async fn simulate(&self) -> GatewayResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let (latency, fail) = self.begin_request();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if fail {
            return Err(GatewayError::ConnectionRefused("in-memory gateway".to_string()));
        }
        Ok(())
    }
}

impl MessageGateway for InMemoryGateway {
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
        per_page: u32,
    ) -> GatewayResult<Vec<Message>> {
        self.message_calls.fetch_add(1, Ordering::SeqCst);
        self.state()
            .message_requests
            .push((conversation_id, page, per_page));

        self.simulate().await?;

        let state = self.state();
        let mut messages = state
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by(|a, b| b.id.cmp(&a.id));

        let skip = (page.saturating_sub(1) as usize) * per_page as usize;
        Ok(messages
            .into_iter()
            .skip(skip)
            .take(per_page as usize)
            .collect())
    }

    async fn list_conversations(&self) -> GatewayResult<Vec<Conversation>> {
        self.conversation_calls.fetch_add(1, Ordering::SeqCst);

        self.simulate().await?;

        Ok(self.state().conversations.clone())
    }
}
