//! Scheduling tests for the realtime service
//!
//! Run on a paused Tokio clock: sleeping in the test advances virtual time,
//! so every assertion is deterministic. With the default 1000 ms interval a
//! conversation's ticks land at t = 1000, 2000, 3000, ...

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use commune_realtime::{
    AppState, ConnectionState, Message, MessageId, NotificationEvent, RealtimeService,
};
use commune_shared_config::PollingConfig;
use commune_test_utils::InMemoryGateway;
use rstest::rstest;
use serde_json::json;

type Delivered = Arc<Mutex<Vec<MessageId>>>;

fn service() -> (RealtimeService<InMemoryGateway>, Arc<InMemoryGateway>) {
    let gateway = Arc::new(InMemoryGateway::new());
    let service = RealtimeService::with_shared_gateway(gateway.clone(), PollingConfig::default());
    service.initialize();
    (service, gateway)
}

fn collector() -> (Delivered, impl Fn(Message) + Send + Sync + 'static) {
    let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    (delivered, move |message: Message| {
        sink.lock().unwrap().push(message.id)
    })
}

async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[tokio::test(start_paused = true)]
async fn test_delivers_page_then_only_newer_messages() {
    let (service, gateway) = service();
    gateway.push_messages(42, &[1, 2, 3, 4, 5]);

    let (delivered, on_message) = collector();
    service.subscribe_to_conversation(42, on_message);

    advance_ms(1500).await;
    assert_eq!(*delivered.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(service.watermark(42), Some(5));

    gateway.push_messages(42, &[6]);
    advance_ms(1000).await;
    assert_eq!(*delivered.lock().unwrap(), vec![1, 2, 3, 4, 5, 6]);

    advance_ms(1000).await;
    assert_eq!(delivered.lock().unwrap().len(), 6);
    assert_eq!(gateway.message_calls_for(42), 3);
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_delivered_in_ascending_order() {
    let (service, gateway) = service();
    gateway.push_messages(7, &[100]);

    let (delivered, on_message) = collector();
    service.subscribe_to_conversation(7, on_message);
    advance_ms(1500).await;

    gateway.push_messages(7, &[103, 101, 102]);
    advance_ms(1000).await;

    assert_eq!(*delivered.lock().unwrap(), vec![100, 101, 102, 103]);
    assert_eq!(service.watermark(7), Some(103));
}

#[tokio::test(start_paused = true)]
async fn test_background_suppresses_requests_until_foregrounded() {
    let (service, gateway) = service();
    gateway.push_messages(1, &[1, 2]);

    let (delivered, on_message) = collector();
    service.subscribe_to_conversation(1, on_message);
    service.handle_app_state_change(AppState::Background);
    assert_eq!(service.connection_state(), ConnectionState::Background);

    advance_ms(3500).await;
    assert_eq!(gateway.message_call_count(), 0);
    assert!(delivered.lock().unwrap().is_empty());
    assert!(service.is_subscribed(1));

    service.handle_app_state_change(AppState::Active);
    assert_eq!(gateway.message_call_count(), 0);

    advance_ms(1000).await;
    assert_eq!(gateway.message_call_count(), 1);
    assert_eq!(*delivered.lock().unwrap(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_inactive_counts_as_background() {
    let (service, gateway) = service();
    service.subscribe_to_notifications(|_| {});
    service.handle_app_state_change(AppState::Inactive);

    advance_ms(5000).await;
    assert_eq!(gateway.conversation_call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_replaces_callback_and_task() {
    let (service, gateway) = service();
    gateway.push_messages(5, &[1, 2]);

    let (first, on_first) = collector();
    let (second, on_second) = collector();
    let old = service.subscribe_to_conversation(5, on_first);
    let new = service.subscribe_to_conversation(5, on_second);

    assert!(!old.is_active());
    assert!(new.is_active());

    advance_ms(1500).await;
    assert!(first.lock().unwrap().is_empty());
    assert_eq!(*second.lock().unwrap(), vec![1, 2]);
    assert_eq!(service.active_conversation_count(), 1);
    assert_eq!(gateway.message_calls_for(5), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_requests_and_is_idempotent() {
    let (service, gateway) = service();
    let handle = service.subscribe_to_conversation(3, |_| {});

    advance_ms(1500).await;
    assert_eq!(gateway.message_calls_for(3), 1);

    service.unsubscribe_from_conversation(3);
    service.unsubscribe_from_conversation(3);
    service.unsubscribe_from_conversation(999);

    advance_ms(5000).await;
    assert_eq!(gateway.message_calls_for(3), 1);
    assert!(!handle.is_active());
    assert!(!service.is_subscribed(3));
    assert_eq!(service.watermark(3), None);
}

#[tokio::test(start_paused = true)]
async fn test_failed_tick_recovers_on_next_tick() {
    let (service, gateway) = service();
    gateway.push_messages(9, &[10, 11]);
    gateway.fail_next(1);

    let (delivered, on_message) = collector();
    service.subscribe_to_conversation(9, on_message);

    advance_ms(1500).await;
    assert_eq!(gateway.message_call_count(), 1);
    assert!(delivered.lock().unwrap().is_empty());
    assert_eq!(service.watermark(9), Some(0));
    assert_eq!(service.connection_state(), ConnectionState::Connected);

    advance_ms(1000).await;
    assert_eq!(*delivered.lock().unwrap(), vec![10, 11]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_fetch_never_overlaps() {
    let (service, gateway) = service();
    gateway.set_latency(Duration::from_millis(2500));
    service.subscribe_to_conversation(1, |_| {});

    // Fetches start at 1000, 4500 and 8000
    advance_ms(10_000).await;

    assert_eq!(gateway.message_call_count(), 3);
    assert_eq!(gateway.max_concurrent_requests(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_interval_change_applies_from_next_cycle() {
    let (service, gateway) = service();
    service.subscribe_to_conversation(1, |_| {});

    advance_ms(1500).await;
    assert_eq!(gateway.message_call_count(), 1);

    service.set_polling_frequency(3000);
    assert_eq!(service.polling_interval(), Duration::from_millis(3000));

    // The sleep scheduled at t=1000 still fires at t=2000
    advance_ms(1000).await;
    assert_eq!(gateway.message_call_count(), 2);

    // Next fetch follows the new interval: t=5000
    advance_ms(2000).await;
    assert_eq!(gateway.message_call_count(), 2);
    advance_ms(1000).await;
    assert_eq!(gateway.message_call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_notifications_poll_at_twice_the_interval() {
    let (service, gateway) = service();
    gateway.set_conversations(vec![json!({ "id": 1 }), json!({ "id": 2 })]);

    let events: Arc<Mutex<Vec<NotificationEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    service.subscribe_to_notifications(move |event| sink.lock().unwrap().push(event));

    advance_ms(1500).await;
    assert_eq!(gateway.conversation_call_count(), 0);

    advance_ms(1000).await;
    assert_eq!(gateway.conversation_call_count(), 1);

    advance_ms(2000).await;
    assert_eq!(gateway.conversation_call_count(), 2);

    // Unchanged lists are still forwarded every tick
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].data, vec![json!({ "id": 1 }), json!({ "id": 2 })]);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
#[tokio::test(start_paused = true)]
async fn test_notification_multiplier(#[case] multiplier: u32) {
    let gateway = Arc::new(InMemoryGateway::new());
    let config = PollingConfig {
        notification_multiplier: multiplier,
        ..PollingConfig::default()
    };
    let service = RealtimeService::with_shared_gateway(gateway.clone(), config);
    service.subscribe_to_notifications(|_| {});

    let period = 1000 * u64::from(multiplier);
    advance_ms(period - 100).await;
    assert_eq!(gateway.conversation_call_count(), 0);

    advance_ms(200).await;
    assert_eq!(gateway.conversation_call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_every_channel() {
    let (service, gateway) = service();
    let a = service.subscribe_to_conversation(1, |_| {});
    let b = service.subscribe_to_conversation(2, |_| {});
    let n = service.subscribe_to_notifications(|_| {});

    // The test, the service and each of the three pollers hold the gateway
    assert_eq!(Arc::strong_count(&gateway), 5);

    advance_ms(2500).await;
    let messages_before = gateway.message_call_count();
    let conversations_before = gateway.conversation_call_count();
    assert_eq!(messages_before, 4);
    assert_eq!(conversations_before, 1);

    service.disconnect();
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
    assert!(!a.is_active() && !b.is_active() && !n.is_active());

    advance_ms(10_000).await;
    assert_eq!(gateway.message_call_count(), messages_before);
    assert_eq!(gateway.conversation_call_count(), conversations_before);
    assert_eq!(service.active_conversation_count(), 0);
    assert!(!service.has_notification_subscription());

    // Every poller task has exited and dropped its gateway clone
    assert_eq!(Arc::strong_count(&gateway), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_allows_new_subscriptions() {
    let (service, gateway) = service();
    gateway.push_messages(4, &[1]);
    service.subscribe_to_conversation(4, |_| {});
    service.disconnect();

    service.reconnect();
    assert_eq!(service.connection_state(), ConnectionState::Connected);
    assert!(!service.is_subscribed(4));

    let (delivered, on_message) = collector();
    service.subscribe_to_conversation(4, on_message);
    advance_ms(1500).await;
    assert_eq!(*delivered.lock().unwrap(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_during_fetch_drops_result() {
    let (service, gateway) = service();
    gateway.push_messages(8, &[1, 2, 3]);
    gateway.set_latency(Duration::from_millis(500));

    let (delivered, on_message) = collector();
    service.subscribe_to_conversation(8, on_message);

    // Fetch is in flight between t=1000 and t=1500
    advance_ms(1200).await;
    assert_eq!(gateway.message_call_count(), 1);
    service.unsubscribe_from_conversation(8);

    advance_ms(2000).await;
    assert!(delivered.lock().unwrap().is_empty());
    assert_eq!(gateway.message_call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_during_fetch_keeps_only_new_callback() {
    let (service, gateway) = service();
    gateway.push_messages(8, &[1, 2]);
    gateway.set_latency(Duration::from_millis(500));

    let (stale, on_stale) = collector();
    service.subscribe_to_conversation(8, on_stale);
    advance_ms(1200).await;

    let (fresh, on_fresh) = collector();
    service.subscribe_to_conversation(8, on_fresh);

    // New task ticks at t=2200 and resolves at t=2700
    advance_ms(2000).await;
    assert!(stale.lock().unwrap().is_empty());
    assert_eq!(*fresh.lock().unwrap(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_conversations_keep_separate_watermarks() {
    let (service, gateway) = service();
    gateway.push_messages(1, &[10, 11]);
    gateway.push_messages(2, &[500]);

    let (one, on_one) = collector();
    let (two, on_two) = collector();
    service.subscribe_to_conversation(1, on_one);
    service.subscribe_to_conversation(2, on_two);

    advance_ms(1500).await;
    assert_eq!(*one.lock().unwrap(), vec![10, 11]);
    assert_eq!(*two.lock().unwrap(), vec![500]);
    assert_matches!(service.watermark(1), Some(11));
    assert_matches!(service.watermark(2), Some(500));
    assert_eq!(service.active_conversation_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_page_size_limits_first_delivery() {
    let (service, gateway) = service();
    gateway.push_messages(6, &[1, 2, 3, 4, 5, 6, 7, 8]);

    let (delivered, on_message) = collector();
    service.subscribe_to_conversation(6, on_message);

    advance_ms(1500).await;
    assert_eq!(*delivered.lock().unwrap(), vec![4, 5, 6, 7, 8]);
    assert_eq!(gateway.last_message_request(), Some((6, 1, 5)));
}
