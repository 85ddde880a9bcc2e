//! The realtime service handed to UI screens

use std::sync::atomic::AtomicI64;
use std::sync::Arc;
use std::time::Duration;

use commune_gateway_client::{ConversationId, Message, MessageGateway, MessageId};
use commune_shared_config::PollingConfig;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::lifecycle::{AppState, LifecycleController, PollingState};
use crate::poller::{ConversationPoller, NotificationEvent, NotificationPoller};
use crate::registry::{ChannelKey, SubscriptionHandle, SubscriptionRegistry};
use crate::status::{ConnectionState, ConnectionStatus};

/// Polling-based replacement for a push connection
///
/// One instance is built at startup and cloned into every consumer; clones
/// share the same registry and flags. Independent instances share nothing.
///
/// Polling tasks run on the Tokio runtime the service was built on, so
/// subscribe calls may come from any thread. A service built outside a
/// runtime (and not given one through [`with_runtime`](Self::with_runtime))
/// starts a private single-worker runtime on first subscribe. Nothing on
/// this type returns an error: fetch failures are logged and retried on the
/// next tick.
pub struct RealtimeService<G> {
    inner: Arc<Inner<G>>,
}

struct Inner<G> {
    gateway: Arc<G>,
    config: PollingConfig,
    polling: Arc<PollingState>,
    status: Arc<ConnectionStatus>,
    lifecycle: LifecycleController,
    registry: SubscriptionRegistry,
}

impl<G> Clone for RealtimeService<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G> std::fmt::Debug for RealtimeService<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeService")
            .field("connection_state", &self.inner.status.get())
            .field("interval_ms", &self.inner.polling.interval_ms())
            .field("backgrounded", &self.inner.polling.is_backgrounded())
            .finish()
    }
}

impl<G: MessageGateway> RealtimeService<G> {
    /// Create a service polling through `gateway`
    pub fn new(gateway: G, config: PollingConfig) -> Self {
        Self::with_shared_gateway(Arc::new(gateway), config)
    }

    /// Create a service around a gateway that is also used elsewhere
    ///
    /// Captures the current Tokio runtime, if any, for spawning pollers.
    pub fn with_shared_gateway(gateway: Arc<G>, config: PollingConfig) -> Self {
        Self::build(gateway, config, Handle::try_current().ok())
    }

    /// Create a service whose pollers run on `runtime`
    pub fn with_runtime(gateway: Arc<G>, config: PollingConfig, runtime: Handle) -> Self {
        Self::build(gateway, config, Some(runtime))
    }

    fn build(gateway: Arc<G>, config: PollingConfig, runtime: Option<Handle>) -> Self {
        let polling = Arc::new(PollingState::new(config.interval_ms));
        let status = Arc::new(ConnectionStatus::default());
        let lifecycle = LifecycleController::new(polling.clone(), status.clone());

        Self {
            inner: Arc::new(Inner {
                gateway,
                config,
                polling,
                status,
                lifecycle,
                registry: SubscriptionRegistry::new(runtime),
            }),
        }
    }

    /// Mark the service as connected; safe to call repeatedly
    pub fn initialize(&self) -> bool {
        let previous = self.inner.status.set(ConnectionState::Connected);
        if previous != ConnectionState::Connected {
            info!(
                interval_ms = self.inner.polling.interval_ms(),
                "Realtime polling initialized"
            );
        }
        true
    }

    /// Start delivering new messages of `conversation_id` to `on_message`
    ///
    /// Replaces any existing subscription for the same conversation. The
    /// watermark starts at zero, so the first successful tick delivers the
    /// newest page.
    pub fn subscribe_to_conversation<F>(
        &self,
        conversation_id: ConversationId,
        on_message: F,
    ) -> SubscriptionHandle
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let watermark = Arc::new(AtomicI64::new(0));
        let gateway = self.inner.gateway.clone();
        let polling = self.inner.polling.clone();
        let page_size = self.inner.config.page_size;
        let task_watermark = watermark.clone();

        debug!(conversation_id, "Subscribing to conversation");

        self.inner.registry.register(
            ChannelKey::Conversation(conversation_id),
            Some(watermark),
            move |token, gate| {
                ConversationPoller {
                    conversation_id,
                    gateway,
                    polling,
                    page_size,
                    watermark: task_watermark,
                    on_message: Arc::new(on_message),
                    token,
                    gate,
                }
                .run()
            },
        )
    }

    /// Stop polling `conversation_id`; no-op when not subscribed
    ///
    /// When this returns, the callback is not running and will not run
    /// again. A callback may unsubscribe its own conversation.
    pub fn unsubscribe_from_conversation(&self, conversation_id: ConversationId) {
        if self
            .inner
            .registry
            .remove(ChannelKey::Conversation(conversation_id))
        {
            debug!(conversation_id, "Unsubscribed from conversation");
        }
    }

    /// Start delivering conversation-list refreshes to `on_update`
    pub fn subscribe_to_notifications<F>(&self, on_update: F) -> SubscriptionHandle
    where
        F: Fn(NotificationEvent) + Send + Sync + 'static,
    {
        let gateway = self.inner.gateway.clone();
        let polling = self.inner.polling.clone();
        let interval_multiplier = self.inner.config.notification_multiplier.max(1);

        debug!("Subscribing to notifications");

        self.inner
            .registry
            .register(ChannelKey::Notifications, None, move |token, gate| {
                NotificationPoller {
                    gateway,
                    polling,
                    interval_multiplier,
                    on_update: Arc::new(on_update),
                    token,
                    gate,
                }
                .run()
            })
    }

    /// Stop the notification feed; no-op when not subscribed
    pub fn unsubscribe_from_notifications(&self) {
        if self.inner.registry.remove(ChannelKey::Notifications) {
            debug!("Unsubscribed from notifications");
        }
    }

    /// Forward a platform app-state transition
    pub fn handle_app_state_change(&self, next_state: AppState) {
        self.inner.lifecycle.on_app_state_change(next_state);
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.status.get()
    }

    /// Change the base polling interval in milliseconds
    ///
    /// Running pollers pick the new value up when they schedule their next
    /// cycle; the sleep already in progress is not cut short. Values below
    /// 100 ms are raised to 100 ms.
    pub fn set_polling_frequency(&self, interval_ms: u64) {
        self.inner.lifecycle.set_polling_interval_ms(interval_ms);
    }

    /// Cancel every subscription and report `disconnected`
    pub fn disconnect(&self) {
        let cancelled = self.inner.registry.clear();
        self.inner.status.set(ConnectionState::Disconnected);
        info!(cancelled, "Realtime polling disconnected");
    }

    /// Report `connected` again and clear the background flag
    ///
    /// Does not recreate subscriptions dropped by [`disconnect`](Self::disconnect);
    /// screens subscribe again as they mount.
    pub fn reconnect(&self) {
        self.inner.lifecycle.resume();
        info!("Realtime polling reconnected");
    }

    /// Whether `conversation_id` currently has a subscription
    pub fn is_subscribed(&self, conversation_id: ConversationId) -> bool {
        self.inner
            .registry
            .contains(ChannelKey::Conversation(conversation_id))
    }

    /// Whether the notification feed currently has a subscription
    pub fn has_notification_subscription(&self) -> bool {
        self.inner.registry.contains(ChannelKey::Notifications)
    }

    /// Highest message id delivered for `conversation_id`, if subscribed
    pub fn watermark(&self, conversation_id: ConversationId) -> Option<MessageId> {
        self.inner.registry.watermark(conversation_id)
    }

    /// Number of subscribed conversations
    pub fn active_conversation_count(&self) -> usize {
        self.inner.registry.conversation_count()
    }

    /// Current base polling interval
    pub fn polling_interval(&self) -> Duration {
        self.inner.polling.interval()
    }

    /// Whether ticks are currently suppressed
    pub fn is_backgrounded(&self) -> bool {
        self.inner.polling.is_backgrounded()
    }
}
