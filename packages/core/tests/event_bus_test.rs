//! Integration tests for the event bus
//!
//! Tests cover:
//! - Synchronous in-order delivery
//! - Subscription filters (namespace/source/node ID)
//! - Trailing debounce and per-subscription batching
//! - Error isolation across handlers
//! - wait_for with and without a deadline
//! - History, metrics, subscriber counts, and reset lifecycle

use canopy_core::{
    BatchingConfig, Event, EventBus, EventBusError, EventDraft, EventFilter, EventPayload,
    EventType, SubscribeOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::time::Duration;

fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .try_init();
    });
}

fn created(node_id: &str) -> EventPayload {
    EventPayload::NodeCreated {
        node_id: node_id.to_string(),
    }
}

fn status_changed(node_id: &str, status: &str) -> EventPayload {
    EventPayload::NodeStatusChanged {
        node_id: node_id.to_string(),
        status: status.to_string(),
    }
}

fn recorder() -> (Arc<Mutex<Vec<Event>>>, impl Fn(&Event) -> anyhow::Result<()>) {
    let seen: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = move |event: &Event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    };
    (seen, handler)
}

// =========================================================================
// Synchronous delivery
// =========================================================================

#[test]
fn test_three_emissions_deliver_three_times_in_order() {
    init_test_logging();
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let _sub = bus.subscribe(EventType::NodeCreated, handler, SubscribeOptions::default());

    bus.emit(created("n1"));
    bus.emit(created("n2"));
    bus.emit(created("n3"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3, "handler should run once per emission");
    let ids: Vec<_> = seen.iter().filter_map(Event::node_id).collect();
    assert_eq!(ids, vec!["n1", "n2", "n3"], "delivery must follow emission order");
}

#[test]
fn test_unsubscribed_handler_receives_nothing_further() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let sub = bus.subscribe(EventType::NodeCreated, handler, SubscribeOptions::default());

    bus.emit(created("n1"));
    sub.unsubscribe();
    bus.emit(created("n2"));

    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_once_self_unsubscribes_after_first_delivery() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let _sub = bus.once(EventType::NodeDeleted, handler);

    bus.emit(EventPayload::NodeDeleted {
        node_id: "n1".to_string(),
    });
    bus.emit(EventPayload::NodeDeleted {
        node_id: "n2".to_string(),
    });

    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(bus.get_subscriber_counts().is_empty());
}

#[test]
fn test_subscribe_multiple_detaches_with_single_unsubscribe() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let sub = bus.subscribe_multiple(&[EventType::NodeCreated, EventType::NodeDeleted], handler);

    bus.emit(created("n1"));
    bus.emit(EventPayload::NodeDeleted {
        node_id: "n1".to_string(),
    });
    // Not in the subscribed set
    bus.emit(status_changed("n1", "done"));
    assert_eq!(seen.lock().unwrap().len(), 2);

    sub.unsubscribe();
    bus.emit(created("n2"));
    bus.emit(EventPayload::NodeDeleted {
        node_id: "n2".to_string(),
    });
    assert_eq!(seen.lock().unwrap().len(), 2, "both types must be detached");
}

// =========================================================================
// Filters
// =========================================================================

#[test]
fn test_filter_criteria_restrict_delivery() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let _sub = bus.subscribe(
        EventType::NodeCreated,
        handler,
        SubscribeOptions::filtered(EventFilter::for_namespace("editor").node_id("n1")),
    );

    bus.emit(EventDraft::new(created("n1")).namespace("editor"));
    bus.emit(EventDraft::new(created("n1")).namespace("sync"));
    bus.emit(EventDraft::new(created("n2")).namespace("editor"));
    bus.emit(created("n1")); // no namespace at all

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1, "only the event matching every criterion is delivered");
    assert_eq!(seen[0].namespace.as_deref(), Some("editor"));
}

// =========================================================================
// Debounce
// =========================================================================

#[tokio::test]
async fn test_trailing_debounce_collapses_burst_to_last_event() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let _sub = bus.subscribe(
        EventType::NodeStatusChanged,
        handler,
        SubscribeOptions::debounced(50),
    );

    bus.emit(status_changed("task-1", "todo"));
    bus.emit(status_changed("task-1", "in-progress"));
    bus.emit(status_changed("task-1", "done"));

    assert_eq!(seen.lock().unwrap().len(), 0, "no delivery inside the window");

    tokio::time::sleep(Duration::from_millis(120)).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1, "burst collapses to a single delivery");
    match &seen[0].payload {
        EventPayload::NodeStatusChanged { status, .. } => assert_eq!(status, "done"),
        other => panic!("expected status payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_debounce_window_restarts_on_each_emission() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let _sub = bus.subscribe(
        EventType::NodeStatusChanged,
        handler,
        SubscribeOptions::debounced(60),
    );

    bus.emit(status_changed("t", "a"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    // Still inside the window: restarts it
    bus.emit(status_changed("t", "b"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(seen.lock().unwrap().len(), 0, "window restarted, not yet elapsed");

    tokio::time::sleep(Duration::from_millis(80)).await;
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    match &seen[0].payload {
        EventPayload::NodeStatusChanged { status, .. } => assert_eq!(status, "b"),
        other => panic!("expected status payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unsubscribe_cancels_pending_debounce_timer() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let sub = bus.subscribe(
        EventType::NodeStatusChanged,
        handler,
        SubscribeOptions::debounced(30),
    );

    bus.emit(status_changed("t", "a"));
    sub.unsubscribe();
    tokio::time::sleep(Duration::from_millis(90)).await;

    assert_eq!(
        seen.lock().unwrap().len(),
        0,
        "handler must not fire after the caller detached"
    );
}

// =========================================================================
// Batching
// =========================================================================

#[tokio::test]
async fn test_batch_flushes_synchronously_at_max_size() {
    let bus = EventBus::new();
    bus.configure_batching(BatchingConfig {
        max_batch_size: 3,
        time_window_ms: 10_000,
        enable_for_types: vec![EventType::NodeCreated],
    });
    let (seen, handler) = recorder();
    let _sub = bus.subscribe(EventType::NodeCreated, handler, SubscribeOptions::default());

    bus.emit(created("n1"));
    bus.emit(created("n2"));
    assert_eq!(seen.lock().unwrap().len(), 0, "below max size, nothing delivered");

    bus.emit(created("n3"));
    // Size threshold flushes before emit returns, no waiting on the window
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    let ids: Vec<_> = seen.iter().filter_map(Event::node_id).collect();
    assert_eq!(ids, vec!["n1", "n2", "n3"], "flush preserves arrival order");
}

#[tokio::test]
async fn test_batch_flushes_after_time_window() {
    let bus = EventBus::new();
    bus.configure_batching(BatchingConfig {
        max_batch_size: 100,
        time_window_ms: 50,
        enable_for_types: vec![EventType::NodeCreated],
    });
    let (seen, handler) = recorder();
    let _sub = bus.subscribe(EventType::NodeCreated, handler, SubscribeOptions::default());

    bus.emit(created("n1"));
    bus.emit(created("n2"));
    assert_eq!(seen.lock().unwrap().len(), 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    let ids: Vec<String> = seen
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| e.node_id().map(str::to_string))
        .collect();
    assert_eq!(ids, vec!["n1", "n2"]);
}

#[tokio::test]
async fn test_unbatched_types_still_deliver_synchronously() {
    let bus = EventBus::new();
    bus.configure_batching(BatchingConfig {
        max_batch_size: 10,
        time_window_ms: 10_000,
        enable_for_types: vec![EventType::NodeCreated],
    });
    let (seen, handler) = recorder();
    let _sub = bus.subscribe(EventType::NodeDeleted, handler, SubscribeOptions::default());

    bus.emit(EventPayload::NodeDeleted {
        node_id: "n1".to_string(),
    });
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_once_subscription_is_exempt_from_batching() {
    let bus = EventBus::new();
    bus.configure_batching(BatchingConfig {
        max_batch_size: 3,
        time_window_ms: 10_000,
        enable_for_types: vec![EventType::NodeCreated],
    });
    let hits = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&hits);
    let _sub = bus.once(EventType::NodeCreated, move |_| {
        observed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    bus.emit(created("n1"));
    bus.emit(created("n2"));
    bus.emit(created("n3"));

    assert_eq!(
        hits.load(Ordering::SeqCst),
        1,
        "once must see exactly the first matching event, never a batch"
    );
    assert!(bus.get_subscriber_counts().is_empty());
}

// =========================================================================
// Error isolation
// =========================================================================

#[test]
fn test_failing_handler_does_not_stop_fanout() {
    init_test_logging();
    let bus = EventBus::new();

    let _failing = bus.subscribe(
        EventType::NodeCreated,
        |_| Err(anyhow::anyhow!("handler exploded")),
        SubscribeOptions::default(),
    );
    let delivered = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&delivered);
    let _second = bus.subscribe(
        EventType::NodeCreated,
        move |_| {
            observed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
        SubscribeOptions::default(),
    );

    // emit is infallible; the failing handler is contained at dispatch
    bus.emit(created("n1"));
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
}

// =========================================================================
// wait_for
// =========================================================================

#[tokio::test]
async fn test_wait_for_resolves_on_matching_event() {
    let bus = EventBus::new();
    let emitter = bus.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        emitter.emit(EventDraft::new(created("other")).namespace("sync"));
        emitter.emit(EventDraft::new(created("target")).namespace("editor"));
    });

    let event = bus
        .wait_for(
            EventType::NodeCreated,
            Some(EventFilter::for_namespace("editor")),
            Some(Duration::from_millis(500)),
        )
        .await
        .expect("matching event should arrive before the deadline");
    assert_eq!(event.node_id(), Some("target"));
}

#[tokio::test]
async fn test_wait_for_times_out_with_typed_error() {
    let bus = EventBus::new();
    let result = bus
        .wait_for(EventType::NodeDeleted, None, Some(Duration::from_millis(30)))
        .await;

    match result {
        Err(EventBusError::WaitTimeout { event_type, .. }) => {
            assert_eq!(event_type, EventType::NodeDeleted);
        }
        other => panic!("expected WaitTimeout, got {other:?}"),
    }
    // The internal subscription is cleaned up on timeout
    assert!(bus.get_subscriber_counts().is_empty());
}

// =========================================================================
// History, metrics, reset
// =========================================================================

#[test]
fn test_recent_events_honor_filters() {
    let bus = EventBus::new();
    bus.emit(EventDraft::new(created("n1")).source("ops"));
    bus.emit(EventDraft::new(created("n2")).source("import"));

    assert_eq!(bus.get_recent_events(None).len(), 2);
    let filtered = bus.get_recent_events(Some(&EventFilter::for_source("ops")));
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].node_id(), Some("n1"));
}

#[test]
fn test_metrics_track_events_and_handlers() {
    let bus = EventBus::new();
    let _a = bus.subscribe(EventType::NodeCreated, |_| Ok(()), SubscribeOptions::default());
    let _b = bus.subscribe_any(|_| Ok(()), SubscribeOptions::default());

    bus.emit(created("n1"));
    bus.emit(created("n2"));

    let metrics = bus.get_metrics();
    assert_eq!(metrics.total_events, 2);
    assert_eq!(metrics.total_handlers, 2);
    assert!(metrics.average_processing_time_ms >= 0.0);
}

#[test]
fn test_reset_returns_bus_to_initial_state() {
    let bus = EventBus::new();
    let _sub = bus.subscribe(EventType::NodeCreated, |_| Ok(()), SubscribeOptions::default());
    bus.emit(created("n1"));

    assert!(!bus.get_subscriber_counts().is_empty());
    assert!(!bus.get_recent_events(None).is_empty());

    bus.reset();

    assert!(bus.get_subscriber_counts().is_empty());
    assert!(bus.get_recent_events(None).is_empty());
    assert_eq!(bus.get_metrics().total_events, 0);
    assert_eq!(bus.get_metrics().average_processing_time_ms, 0.0);
}

#[tokio::test]
async fn test_reset_cancels_pending_debounce_deliveries() {
    let bus = EventBus::new();
    let (seen, handler) = recorder();
    let _sub = bus.subscribe(
        EventType::NodeStatusChanged,
        handler,
        SubscribeOptions::debounced(30),
    );

    bus.emit(status_changed("t", "a"));
    bus.reset();
    tokio::time::sleep(Duration::from_millis(90)).await;

    assert_eq!(seen.lock().unwrap().len(), 0);
}
