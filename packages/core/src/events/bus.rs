//! Typed event bus
//!
//! Delivers domain events to subscribers with filtering, trailing debounce,
//! per-subscription batching, isolated failure handling, bounded history, and
//! introspection (metrics, subscriber counts).
//!
//! # Architecture
//!
//! The bus is an explicit instance owned by the composition root; cloning it
//! yields another handle to the same subscription state. `reset()` returns the
//! bus to its just-constructed state and is used for teardown and test
//! isolation.
//!
//! # Dispatch model
//!
//! `emit` stamps the event and delivers synchronously, in emission order, to
//! every matching subscription that is neither debounced nor batched. Debounce
//! and batch-window deliveries are scheduled on the Tokio timer queue and run
//! later on the same runtime; `unsubscribe` aborts any timer owned by the
//! subscription so a handler is never invoked after the caller detached.
//! Handlers run outside the bus lock, so they may freely subscribe, emit, or
//! unsubscribe re-entrantly.
//!
//! # Failure semantics
//!
//! A handler returning an error is logged at the dispatch site and never
//! prevents delivery to the remaining subscribers; `emit` itself is
//! infallible.

use super::types::{Event, EventDraft, EventFilter, EventType};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Bounded history capacity; older events are dropped first.
const EVENT_HISTORY_CAPACITY: usize = 100;

/// Handler invoked for each delivered event.
///
/// Errors are caught at the dispatch boundary and logged; they never
/// propagate to the emitter or to other subscribers.
pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Errors surfaced by the event bus. The only caller-visible failure mode is
/// an explicit [`wait_for`](EventBus::wait_for) outcome.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// The `wait_for` deadline elapsed before a matching event arrived.
    #[error("timed out after {timeout_ms}ms waiting for '{event_type}' event")]
    WaitTimeout {
        event_type: EventType,
        timeout_ms: u64,
    },

    /// The bus was reset while a `wait_for` call was pending.
    #[error("event bus was reset while waiting for '{event_type}' event")]
    Cancelled { event_type: EventType },
}

/// Per-subscription delivery options.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Restrict delivery to events matching these criteria.
    pub filter: Option<EventFilter>,
    /// Trailing debounce window: a burst of matching events collapses into a
    /// single delivery of the most recent one, fired after the window elapses
    /// with no further emissions.
    pub debounce_ms: Option<u64>,
    /// Handlers for one event run in descending priority (ties in
    /// subscription order); delivery order is otherwise unspecified.
    pub priority: i32,
}

impl SubscribeOptions {
    /// Options with only a filter set.
    pub fn filtered(filter: EventFilter) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }

    /// Options with only a trailing debounce window set.
    pub fn debounced(debounce_ms: u64) -> Self {
        Self {
            debounce_ms: Some(debounce_ms),
            ..Default::default()
        }
    }
}

/// Bus-wide batching configuration.
///
/// For the listed event types, matching events accumulate per subscription
/// instead of being delivered synchronously. A buffer flushes when it reaches
/// `max_batch_size` (synchronously, no delay) or when `time_window_ms` has
/// elapsed since its first unflushed event (asynchronously). Flushing
/// delivers each accumulated event individually, in arrival order.
///
/// Debounced and `once` subscriptions are exempt: debounce keeps its own
/// window, and `once` must see exactly one event, so both deliver on their
/// usual paths.
#[derive(Debug, Clone)]
pub struct BatchingConfig {
    pub max_batch_size: usize,
    pub time_window_ms: u64,
    pub enable_for_types: Vec<EventType>,
}

/// Bus metrics snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBusMetrics {
    /// Events emitted since construction or the last `reset()`.
    pub total_events: u64,
    /// Currently registered subscriptions.
    pub total_handlers: usize,
    /// Mean synchronous dispatch time per emit, in milliseconds.
    pub average_processing_time_ms: f64,
}

/// Which event types a subscription listens to.
#[derive(Debug, Clone)]
enum Selector {
    /// Wildcard: matches any event type.
    Any,
    One(EventType),
    Many(Vec<EventType>),
}

impl Selector {
    fn matches(&self, event_type: EventType) -> bool {
        match self {
            Selector::Any => true,
            Selector::One(t) => *t == event_type,
            Selector::Many(types) => types.contains(&event_type),
        }
    }

    /// Keys under which this subscription is counted, `"*"` for wildcard.
    fn count_keys(&self) -> Vec<&'static str> {
        match self {
            Selector::Any => vec!["*"],
            Selector::One(t) => vec![t.as_str()],
            Selector::Many(types) => types.iter().map(EventType::as_str).collect(),
        }
    }
}

struct SubscriptionEntry {
    selector: Selector,
    handler: EventHandler,
    filter: Option<EventFilter>,
    debounce_ms: Option<u64>,
    priority: i32,
    once: bool,

    // Trailing-debounce state: the last event of the current burst plus a
    // generation counter so a stale timer can detect it was superseded.
    pending_debounce: Option<Event>,
    debounce_generation: u64,
    debounce_timer: Option<JoinHandle<()>>,

    // Batch state: accumulated events and the window timer armed by the
    // first unflushed event.
    batch_buffer: Vec<Event>,
    batch_timer: Option<JoinHandle<()>>,
}

impl SubscriptionEntry {
    fn abort_timers(&mut self) {
        if let Some(timer) = self.debounce_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.batch_timer.take() {
            timer.abort();
        }
        self.pending_debounce = None;
        self.batch_buffer.clear();
    }
}

#[derive(Default)]
struct BusInner {
    subscriptions: BTreeMap<u64, SubscriptionEntry>,
    next_id: u64,
    history: VecDeque<Event>,
    batching: Option<BatchingConfig>,
    total_events: u64,
    dispatch_count: u64,
    dispatch_time_total: Duration,
}

/// Handle returned by the subscribe family of methods.
///
/// Calling [`unsubscribe`](Subscription::unsubscribe) detaches the handler
/// and aborts any pending debounce timer or un-flushed batch buffer owned by
/// the subscription. Dropping the handle without unsubscribing leaves the
/// subscription active.
pub struct Subscription {
    id: u64,
    inner: Arc<Mutex<BusInner>>,
}

impl Subscription {
    /// Detach the handler and cancel its pending timers.
    pub fn unsubscribe(self) {
        remove_subscription(&self.inner, self.id);
    }
}

/// Typed, filterable publish/subscribe bus with debounce, batching, bounded
/// history, and metrics.
///
/// Cheap to clone; clones share subscription state.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    /// Create an independent bus instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler to one event type.
    pub fn subscribe<H>(&self, event_type: EventType, handler: H, options: SubscribeOptions) -> Subscription
    where
        H: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_inner(Selector::One(event_type), Arc::new(handler), options, false)
    }

    /// Subscribe a handler to every event type (wildcard).
    pub fn subscribe_any<H>(&self, handler: H, options: SubscribeOptions) -> Subscription
    where
        H: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_inner(Selector::Any, Arc::new(handler), options, false)
    }

    /// Subscribe one handler across several event types; a single
    /// `unsubscribe` detaches it from all of them.
    pub fn subscribe_multiple<H>(&self, event_types: &[EventType], handler: H) -> Subscription
    where
        H: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_inner(
            Selector::Many(event_types.to_vec()),
            Arc::new(handler),
            SubscribeOptions::default(),
            false,
        )
    }

    /// Subscribe a handler that self-unsubscribes after the first matching
    /// delivery.
    pub fn once<H>(&self, event_type: EventType, handler: H) -> Subscription
    where
        H: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_inner(
            Selector::One(event_type),
            Arc::new(handler),
            SubscribeOptions::default(),
            true,
        )
    }

    fn subscribe_inner(
        &self,
        selector: Selector,
        handler: EventHandler,
        options: SubscribeOptions,
        once: bool,
    ) -> Subscription {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscriptions.insert(
            id,
            SubscriptionEntry {
                selector,
                handler,
                filter: options.filter,
                debounce_ms: options.debounce_ms,
                priority: options.priority,
                once,
                pending_debounce: None,
                debounce_generation: 0,
                debounce_timer: None,
                batch_buffer: Vec::new(),
                batch_timer: None,
            },
        );
        Subscription {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Enable batching for the listed event types.
    ///
    /// Applies to events emitted after this call; a subscription's own
    /// debounce window takes precedence over type-level batching, and `once`
    /// subscriptions always deliver synchronously.
    pub fn configure_batching(&self, config: BatchingConfig) {
        let mut inner = self.lock();
        inner.batching = Some(config);
    }

    /// Stamp and publish an event.
    ///
    /// Matching non-debounced, non-batched subscriptions are invoked before
    /// this method returns, in emission order across consecutive calls.
    /// Handler errors are logged and swallowed; `emit` never fails.
    ///
    /// Debounce and batch-window scheduling require a Tokio runtime context;
    /// a bus used without timers works on any thread.
    pub fn emit(&self, draft: impl Into<EventDraft>) {
        let event = draft.into().stamp(Utc::now());
        let started = Instant::now();

        // (priority, id, handler, once) for synchronous delivery
        let mut immediate: Vec<(i32, u64, EventHandler, bool)> = Vec::new();
        // (handler, events) for size-triggered batch flushes
        let mut flushes: Vec<(EventHandler, Vec<Event>)> = Vec::new();

        {
            let mut inner = self.lock();
            inner.total_events += 1;
            if inner.history.len() == EVENT_HISTORY_CAPACITY {
                inner.history.pop_front();
            }
            inner.history.push_back(event.clone());

            let batching = inner.batching.clone();
            let inner_arc = Arc::clone(&self.inner);
            let ids: Vec<u64> = inner.subscriptions.keys().copied().collect();
            for id in ids {
                let Some(entry) = inner.subscriptions.get_mut(&id) else {
                    continue;
                };
                if !entry.selector.matches(event.event_type()) {
                    continue;
                }
                if entry.filter.as_ref().is_some_and(|f| !f.matches(&event)) {
                    continue;
                }

                if let Some(debounce_ms) = entry.debounce_ms {
                    // Restart the trailing window with this event as the
                    // candidate payload.
                    entry.pending_debounce = Some(event.clone());
                    entry.debounce_generation += 1;
                    let generation = entry.debounce_generation;
                    if let Some(timer) = entry.debounce_timer.take() {
                        timer.abort();
                    }
                    entry.debounce_timer = Some(spawn_debounce_timer(
                        Arc::clone(&inner_arc),
                        id,
                        generation,
                        Duration::from_millis(debounce_ms),
                    ));
                } else if let Some(cfg) = batching
                    .as_ref()
                    .filter(|cfg| !entry.once && cfg.enable_for_types.contains(&event.event_type()))
                {
                    entry.batch_buffer.push(event.clone());
                    if entry.batch_buffer.len() >= cfg.max_batch_size.max(1) {
                        if let Some(timer) = entry.batch_timer.take() {
                            timer.abort();
                        }
                        let events = std::mem::take(&mut entry.batch_buffer);
                        flushes.push((Arc::clone(&entry.handler), events));
                    } else if entry.batch_timer.is_none() {
                        entry.batch_timer = Some(spawn_batch_timer(
                            Arc::clone(&inner_arc),
                            id,
                            Duration::from_millis(cfg.time_window_ms),
                        ));
                    }
                } else {
                    immediate.push((entry.priority, id, Arc::clone(&entry.handler), entry.once));
                }
            }
        }

        // Handlers run outside the lock so they may re-enter the bus.
        immediate.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let mut spent: Vec<u64> = Vec::new();
        for (_, id, handler, once) in &immediate {
            invoke_handler(handler, &event);
            if *once {
                spent.push(*id);
            }
        }
        for (handler, events) in &flushes {
            for batched in events {
                invoke_handler(handler, batched);
            }
        }
        for id in spent {
            remove_subscription(&self.inner, id);
        }

        let elapsed = started.elapsed();
        let mut inner = self.lock();
        inner.dispatch_count += 1;
        inner.dispatch_time_total += elapsed;
    }

    /// Resolve with the next event of the given type that satisfies the
    /// filter, or fail with [`EventBusError::WaitTimeout`] once the deadline
    /// elapses.
    pub async fn wait_for(
        &self,
        event_type: EventType,
        filter: Option<EventFilter>,
        timeout: Option<Duration>,
    ) -> Result<Event, EventBusError> {
        let (tx, rx) = tokio::sync::oneshot::channel::<Event>();

        // The sender lives inside the subscription; dropping the entry (via
        // `reset` or unsubscribe) drops it and wakes the receiver.
        let slot = Mutex::new(Some(tx));
        let subscription = self.subscribe_inner(
            Selector::One(event_type),
            Arc::new(move |event: &Event| {
                if let Some(tx) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
                    // Receiver may already be gone (timeout raced the event).
                    let _ = tx.send(event.clone());
                }
                Ok(())
            }),
            SubscribeOptions {
                filter,
                ..Default::default()
            },
            true,
        );

        match timeout {
            Some(deadline) => match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(_)) => Err(EventBusError::Cancelled { event_type }),
                Err(_) => {
                    subscription.unsubscribe();
                    Err(EventBusError::WaitTimeout {
                        event_type,
                        timeout_ms: deadline.as_millis() as u64,
                    })
                }
            },
            None => rx.await.map_err(|_| EventBusError::Cancelled { event_type }),
        }
    }

    /// Bounded history of recent events, oldest first, optionally filtered by
    /// the same criteria as subscriptions.
    pub fn get_recent_events(&self, filter: Option<&EventFilter>) -> Vec<Event> {
        let inner = self.lock();
        inner
            .history
            .iter()
            .filter(|event| filter.map_or(true, |f| f.matches(event)))
            .cloned()
            .collect()
    }

    /// Snapshot of bus metrics.
    pub fn get_metrics(&self) -> EventBusMetrics {
        let inner = self.lock();
        let average_processing_time_ms = if inner.dispatch_count == 0 {
            0.0
        } else {
            inner.dispatch_time_total.as_secs_f64() * 1000.0 / inner.dispatch_count as f64
        };
        EventBusMetrics {
            total_events: inner.total_events,
            total_handlers: inner.subscriptions.len(),
            average_processing_time_ms,
        }
    }

    /// Number of subscriptions per event-type name (`"*"` for wildcard).
    pub fn get_subscriber_counts(&self) -> HashMap<String, usize> {
        let inner = self.lock();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for entry in inner.subscriptions.values() {
            for key in entry.selector.count_keys() {
                *counts.entry(key.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Drop every subscription, abort pending timers, and clear history,
    /// metrics, and batching configuration. The bus returns to its
    /// just-constructed state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        for entry in inner.subscriptions.values_mut() {
            entry.abort_timers();
        }
        inner.subscriptions.clear();
        inner.history.clear();
        inner.batching = None;
        inner.total_events = 0;
        inner.dispatch_count = 0;
        inner.dispatch_time_total = Duration::ZERO;
        tracing::debug!("event bus reset");
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_inner(inner: &Mutex<BusInner>) -> MutexGuard<'_, BusInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

fn invoke_handler(handler: &EventHandler, event: &Event) {
    if let Err(error) = handler(event) {
        tracing::warn!(
            event_type = event.event_type().as_str(),
            %error,
            "event handler failed; continuing dispatch"
        );
    }
}

fn remove_subscription(inner: &Mutex<BusInner>, id: u64) {
    let entry = lock_inner(inner).subscriptions.remove(&id);
    if let Some(mut entry) = entry {
        entry.abort_timers();
    }
}

/// Fire a debounced delivery once the quiet window elapses, unless a newer
/// emission superseded this timer in the meantime.
fn spawn_debounce_timer(
    inner: Arc<Mutex<BusInner>>,
    id: u64,
    generation: u64,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;

        let delivery = {
            let mut guard = lock_inner(&inner);
            match guard.subscriptions.get_mut(&id) {
                Some(entry) if entry.debounce_generation == generation => {
                    entry.debounce_timer = None;
                    entry
                        .pending_debounce
                        .take()
                        .map(|event| (Arc::clone(&entry.handler), event, entry.once))
                }
                // Superseded by a newer emission or unsubscribed: stand down.
                _ => None,
            }
        };

        if let Some((handler, event, once)) = delivery {
            invoke_handler(&handler, &event);
            if once {
                remove_subscription(&inner, id);
            }
        }
    })
}

/// Flush whatever has accumulated for a subscription once the batch time
/// window elapses.
fn spawn_batch_timer(inner: Arc<Mutex<BusInner>>, id: u64, window: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(window).await;

        let delivery = {
            let mut guard = lock_inner(&inner);
            match guard.subscriptions.get_mut(&id) {
                Some(entry) if !entry.batch_buffer.is_empty() => {
                    entry.batch_timer = None;
                    let events = std::mem::take(&mut entry.batch_buffer);
                    Some((Arc::clone(&entry.handler), events))
                }
                Some(entry) => {
                    // Size-triggered flush already drained the buffer.
                    entry.batch_timer = None;
                    None
                }
                None => None,
            }
        };

        if let Some((handler, events)) = delivery {
            for event in &events {
                invoke_handler(&handler, event);
            }
        }
    })
}
