//! Smart pollers: one repeating task per subscribed channel
//!
//! A conversation poller fetches the newest page of messages each tick and
//! hands the subscriber only the messages above its watermark. The
//! notification poller re-fetches the conversation list at a slower cadence
//! and always forwards it; list refreshes are idempotent on the UI side.
//!
//! Ticks of one channel never overlap: the next sleep is only scheduled once
//! the current fetch has resolved. The period is read from the shared
//! [`PollingState`] at the start of every cycle.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use commune_gateway_client::{Conversation, ConversationId, Message, MessageGateway, MessageId};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::lifecycle::PollingState;
use crate::registry::DeliveryGate;

/// Conversation polls always read the first (newest) page
const FIRST_PAGE: u32 = 1;

/// Subscriber callback for a conversation channel
pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

/// Subscriber callback for the notification channel
pub type NotificationCallback = Arc<dyn Fn(NotificationEvent) + Send + Sync>;

/// Kind of notification feed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Fresh conversation list
    ConversationUpdate,
}

/// Event delivered on the notification channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Event type, serialized as `type`
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// The full conversation list as returned by the backend
    pub data: Vec<Conversation>,
}

impl NotificationEvent {
    pub fn conversation_update(data: Vec<Conversation>) -> Self {
        Self {
            kind: NotificationKind::ConversationUpdate,
            data,
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    /// App is backgrounded; no request was made
    Skipped,
    /// The fetch failed and was logged
    Failed,
    /// Fetch succeeded with nothing new
    Idle,
    /// This many items were handed to the subscriber
    Delivered(usize),
    /// The subscription was cancelled while the fetch was in flight
    Discarded,
}

/// Messages strictly above `watermark`, oldest first, without duplicates
pub(crate) fn select_new_messages(messages: Vec<Message>, watermark: MessageId) -> Vec<Message> {
    let mut fresh: Vec<Message> = messages
        .into_iter()
        .filter(|message| message.id > watermark)
        .collect();
    fresh.sort_by_key(|message| message.id);
    fresh.dedup_by_key(|message| message.id);
    fresh
}

/// Sleep for one period unless cancelled first; `false` means stop
async fn wait_for_next_tick(token: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(period) => !token.is_cancelled(),
    }
}

/// Polling task state for one conversation channel
pub(crate) struct ConversationPoller<G> {
    pub(crate) conversation_id: ConversationId,
    pub(crate) gateway: Arc<G>,
    pub(crate) polling: Arc<PollingState>,
    pub(crate) page_size: u32,
    pub(crate) watermark: Arc<AtomicI64>,
    pub(crate) on_message: MessageCallback,
    pub(crate) token: CancellationToken,
    pub(crate) gate: DeliveryGate,
}

impl<G: MessageGateway> ConversationPoller<G> {
    pub(crate) async fn run(self) {
        debug!(
            conversation_id = self.conversation_id,
            "Conversation poller started"
        );

        while wait_for_next_tick(&self.token, self.polling.interval()).await {
            self.tick().await;
        }

        debug!(
            conversation_id = self.conversation_id,
            "Conversation poller stopped"
        );
    }

    pub(crate) async fn tick(&self) -> TickOutcome {
        if self.polling.is_backgrounded() {
            return TickOutcome::Skipped;
        }

        let result = self
            .gateway
            .list_messages(self.conversation_id, FIRST_PAGE, self.page_size)
            .await;

        if self.token.is_cancelled() {
            return TickOutcome::Discarded;
        }

        let messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                warn!(
                    conversation_id = self.conversation_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Conversation poll failed, retrying next tick"
                );
                return TickOutcome::Failed;
            }
        };

        let watermark = self.watermark.load(Ordering::Acquire);
        let fresh = select_new_messages(messages, watermark);
        let Some(newest) = fresh.last().map(|message| message.id) else {
            return TickOutcome::Idle;
        };

        self.watermark.fetch_max(newest, Ordering::AcqRel);

        let count = fresh.len();
        debug!(
            conversation_id = self.conversation_id,
            new_messages = count,
            watermark = newest,
            "Delivering new messages"
        );

        for message in fresh {
            if !self
                .gate
                .deliver(&self.token, || (self.on_message)(message))
            {
                return TickOutcome::Discarded;
            }
        }

        TickOutcome::Delivered(count)
    }
}

/// Polling task state for the global notification channel
pub(crate) struct NotificationPoller<G> {
    pub(crate) gateway: Arc<G>,
    pub(crate) polling: Arc<PollingState>,
    pub(crate) interval_multiplier: u32,
    pub(crate) on_update: NotificationCallback,
    pub(crate) token: CancellationToken,
    pub(crate) gate: DeliveryGate,
}

impl<G: MessageGateway> NotificationPoller<G> {
    pub(crate) async fn run(self) {
        debug!("Notification poller started");

        while wait_for_next_tick(&self.token, self.period()).await {
            self.tick().await;
        }

        debug!("Notification poller stopped");
    }

    fn period(&self) -> Duration {
        self.polling.interval() * self.interval_multiplier
    }

    pub(crate) async fn tick(&self) -> TickOutcome {
        if self.polling.is_backgrounded() {
            return TickOutcome::Skipped;
        }

        let result = self.gateway.list_conversations().await;

        if self.token.is_cancelled() {
            return TickOutcome::Discarded;
        }

        match result {
            Ok(conversations) => {
                let count = conversations.len();
                let event = NotificationEvent::conversation_update(conversations);
                if self.gate.deliver(&self.token, || (self.on_update)(event)) {
                    TickOutcome::Delivered(count)
                } else {
                    TickOutcome::Discarded
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retryable = e.is_retryable(),
                    "Conversation list poll failed, retrying next tick"
                );
                TickOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commune_test_utils::InMemoryGateway;
    use serde_json::json;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    fn ids(messages: &[Message]) -> Vec<MessageId> {
        messages.iter().map(|message| message.id).collect()
    }

    fn messages(ids: &[MessageId]) -> Vec<Message> {
        ids.iter().map(|id| Message::new(*id)).collect()
    }

    struct Harness {
        gateway: Arc<InMemoryGateway>,
        polling: Arc<PollingState>,
        delivered: Arc<Mutex<Vec<MessageId>>>,
        poller: ConversationPoller<InMemoryGateway>,
    }

    fn conversation_harness(conversation_id: ConversationId) -> Harness {
        let gateway = Arc::new(InMemoryGateway::new());
        let polling = Arc::new(PollingState::new(1000));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = delivered.clone();

        let poller = ConversationPoller {
            conversation_id,
            gateway: gateway.clone(),
            polling: polling.clone(),
            page_size: 5,
            watermark: Arc::new(AtomicI64::new(0)),
            on_message: Arc::new(move |message: Message| sink.lock().unwrap().push(message.id)),
            token: CancellationToken::new(),
            gate: DeliveryGate::default(),
        };

        Harness {
            gateway,
            polling,
            delivered,
            poller,
        }
    }

    #[test]
    fn test_select_new_messages_orders_ascending() {
        let fresh = select_new_messages(messages(&[103, 102, 101, 100, 99]), 100);
        assert_eq!(ids(&fresh), vec![101, 102, 103]);
    }

    #[test]
    fn test_select_new_messages_nothing_above_watermark() {
        assert!(select_new_messages(messages(&[5, 4, 3]), 5).is_empty());
        assert!(select_new_messages(Vec::new(), 0).is_empty());
    }

    #[test]
    fn test_select_new_messages_drops_duplicates() {
        let fresh = select_new_messages(messages(&[8, 8, 7]), 0);
        assert_eq!(ids(&fresh), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_first_tick_delivers_page_in_ascending_order() {
        let h = conversation_harness(42);
        h.gateway.push_messages(42, &[1, 2, 3, 4, 5]);

        assert_eq!(h.poller.tick().await, TickOutcome::Delivered(5));
        assert_eq!(*h.delivered.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(h.poller.watermark.load(Ordering::Acquire), 5);

        assert_eq!(h.poller.tick().await, TickOutcome::Idle);
        assert_eq!(h.delivered.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_requests_first_page_with_page_size() {
        let h = conversation_harness(9);
        h.poller.tick().await;

        assert_eq!(h.gateway.last_message_request(), Some((9, 1, 5)));
    }

    #[tokio::test]
    async fn test_empty_page_leaves_watermark() {
        let h = conversation_harness(1);

        assert_eq!(h.poller.tick().await, TickOutcome::Idle);
        assert_eq!(h.poller.watermark.load(Ordering::Acquire), 0);
        assert!(h.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backgrounded_tick_makes_no_request() {
        let h = conversation_harness(1);
        h.gateway.push_messages(1, &[1]);
        h.polling.set_backgrounded(true);

        assert_eq!(h.poller.tick().await, TickOutcome::Skipped);
        assert_eq!(h.gateway.message_call_count(), 0);
        assert!(h.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failed_fetch_is_logged_and_swallowed() {
        let h = conversation_harness(3);
        h.gateway.push_messages(3, &[10]);
        h.gateway.fail_next(1);

        assert_eq!(h.poller.tick().await, TickOutcome::Failed);
        assert!(logs_contain("Conversation poll failed"));
        assert_eq!(h.poller.watermark.load(Ordering::Acquire), 0);

        assert_eq!(h.poller.tick().await, TickOutcome::Delivered(1));
        assert_eq!(*h.delivered.lock().unwrap(), vec![10]);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_discards_result() {
        let h = conversation_harness(4);
        h.gateway.push_messages(4, &[1, 2]);
        h.poller.token.cancel();

        assert_eq!(h.poller.tick().await, TickOutcome::Discarded);
        assert!(h.delivered.lock().unwrap().is_empty());
        assert_eq!(h.poller.watermark.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn test_notification_tick_forwards_full_list() {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.set_conversations(vec![json!({ "id": 1 }), json!({ "id": 2 })]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();

        let poller = NotificationPoller {
            gateway: gateway.clone(),
            polling: Arc::new(PollingState::new(1000)),
            interval_multiplier: 2,
            on_update: Arc::new(move |event: NotificationEvent| sink.lock().unwrap().push(event)),
            token: CancellationToken::new(),
            gate: DeliveryGate::default(),
        };

        assert_eq!(poller.period(), Duration::from_millis(2000));
        assert_eq!(poller.tick().await, TickOutcome::Delivered(2));
        assert_eq!(poller.tick().await, TickOutcome::Delivered(2));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, NotificationKind::ConversationUpdate);
        assert_eq!(events[0].data.len(), 2);
    }

    #[test]
    fn test_notification_event_wire_shape() {
        let event = NotificationEvent::conversation_update(vec![json!({ "id": 1 })]);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "type": "conversation_update", "data": [{ "id": 1 }] })
        );
    }
}
