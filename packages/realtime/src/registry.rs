//! Subscription registry
//!
//! Single source of truth for which channels are being polled. The registry
//! is the only place polling tasks are spawned or cancelled, and it keeps at
//! most one task per channel key.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use commune_gateway_client::{ConversationId, MessageId};
use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Logical stream of updates a screen can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// New messages in one conversation
    Conversation(ConversationId),
    /// The global conversation-list feed
    Notifications,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation:{}", id),
            Self::Notifications => write!(f, "notifications"),
        }
    }
}

/// Returned to the subscriber; reports whether the subscription is still live
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    channel: ChannelKey,
    token: CancellationToken,
}

impl SubscriptionHandle {
    /// The channel this handle belongs to
    pub fn channel(&self) -> ChannelKey {
        self.channel
    }

    /// False once the subscription was replaced, unsubscribed or disconnected
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

/// Serialises subscriber callbacks against cancellation
///
/// A poller delivers through [`deliver`](Self::deliver), which re-checks the
/// token while holding the gate. Removal cancels the token and then
/// [`close`](Self::close)s the gate, so once removal returns no callback of
/// that subscription is running or will run. The lock is reentrant: a
/// callback may unsubscribe its own channel.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeliveryGate(Arc<ReentrantMutex<()>>);

impl DeliveryGate {
    /// Run `deliver` unless `token` is cancelled; `false` means it was
    pub(crate) fn deliver(&self, token: &CancellationToken, deliver: impl FnOnce()) -> bool {
        let _guard = self.0.lock();
        if token.is_cancelled() {
            return false;
        }
        deliver();
        true
    }

    /// Wait for a delivery running on another thread to finish
    pub(crate) fn close(&self) {
        drop(self.0.lock());
    }
}

/// One registered channel and the task polling it
struct Subscription {
    token: CancellationToken,
    gate: DeliveryGate,
    watermark: Option<Arc<AtomicI64>>,
}

impl Subscription {
    /// Must not be called while a map shard lock is held
    fn shutdown(self) {
        self.token.cancel();
        self.gate.close();
    }
}

/// Tracks the active subscription for every channel key
pub(crate) struct SubscriptionRegistry {
    subscriptions: DashMap<ChannelKey, Subscription>,
    /// Runtime the service was built on, if any
    runtime: Option<Handle>,
    /// Started on first use when no runtime is available at all
    fallback: OnceLock<Runtime>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(runtime: Option<Handle>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            runtime,
            fallback: OnceLock::new(),
        }
    }

    /// Handle to spawn polling tasks on
    ///
    /// Prefers the runtime captured at construction, then the caller's
    /// runtime, then a private single-worker runtime.
    fn runtime_handle(&self) -> Option<Handle> {
        if let Some(handle) = &self.runtime {
            return Some(handle.clone());
        }
        if let Ok(handle) = Handle::try_current() {
            return Some(handle);
        }
        if self.fallback.get().is_none() {
            let runtime = Builder::new_multi_thread()
                .worker_threads(1)
                .thread_name("commune-realtime")
                .enable_all()
                .build();
            match runtime {
                Ok(runtime) => {
                    debug!("Started background runtime for polling");
                    // Losing a race here just drops the extra runtime
                    let _ = self.fallback.set(runtime);
                }
                Err(e) => {
                    error!(error = %e, "Failed to start background runtime for polling");
                    return None;
                }
            }
        }
        self.fallback.get().map(|runtime| runtime.handle().clone())
    }

    /// Replace whatever is registered under `channel` with a freshly spawned task
    ///
    /// `start` receives the new subscription's token and delivery gate and
    /// returns the polling task. The previous task (if any) is cancelled, and
    /// its in-progress callback finished, before the new one starts.
    pub(crate) fn register<S, F>(
        &self,
        channel: ChannelKey,
        watermark: Option<Arc<AtomicI64>>,
        start: S,
    ) -> SubscriptionHandle
    where
        S: FnOnce(CancellationToken, DeliveryGate) -> F,
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some((_, previous)) = self.subscriptions.remove(&channel) {
            previous.shutdown();
            debug!(channel = %channel, "Replaced existing subscription");
        }

        let token = CancellationToken::new();
        let gate = DeliveryGate::default();

        let Some(runtime) = self.runtime_handle() else {
            token.cancel();
            warn!(channel = %channel, "No runtime available, subscription not started");
            return SubscriptionHandle { channel, token };
        };

        runtime.spawn(start(token.clone(), gate.clone()));

        let subscription = Subscription {
            token: token.clone(),
            gate,
            watermark,
        };

        // A concurrent register for the same key may have slipped in between
        if let Some(raced) = self.subscriptions.insert(channel, subscription) {
            raced.shutdown();
        }

        debug!(
            channel = %channel,
            active = self.subscriptions.len(),
            "Subscription registered"
        );

        SubscriptionHandle { channel, token }
    }

    /// Cancel and forget the subscription for `channel`; no-op when absent
    ///
    /// Blocks while a callback of that subscription is running on another
    /// thread.
    pub(crate) fn remove(&self, channel: ChannelKey) -> bool {
        match self.subscriptions.remove(&channel) {
            Some((_, subscription)) => {
                subscription.shutdown();
                debug!(
                    channel = %channel,
                    active = self.subscriptions.len(),
                    "Subscription removed"
                );
                true
            }
            None => false,
        }
    }

    /// Cancel every task and clear all state; returns how many were cancelled
    pub(crate) fn clear(&self) -> usize {
        let channels: Vec<ChannelKey> = self
            .subscriptions
            .iter()
            .map(|entry| *entry.key())
            .collect();

        let mut cancelled = 0;
        for channel in channels {
            if let Some((_, subscription)) = self.subscriptions.remove(&channel) {
                subscription.shutdown();
                cancelled += 1;
            }
        }
        cancelled
    }

    pub(crate) fn contains(&self, channel: ChannelKey) -> bool {
        self.subscriptions.contains_key(&channel)
    }

    pub(crate) fn watermark(&self, conversation_id: ConversationId) -> Option<MessageId> {
        self.subscriptions
            .get(&ChannelKey::Conversation(conversation_id))
            .and_then(|entry| {
                entry
                    .watermark
                    .as_ref()
                    .map(|watermark| watermark.load(Ordering::Acquire))
            })
    }

    pub(crate) fn conversation_count(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|entry| matches!(entry.key(), ChannelKey::Conversation(_)))
            .count()
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        self.clear();
        if let Some(runtime) = self.fallback.take() {
            runtime.shutdown_background();
        }
    }
}
