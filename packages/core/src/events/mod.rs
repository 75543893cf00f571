//! Event System
//!
//! Typed domain events and the publish/subscribe bus that delivers them.
//! The hierarchy service keeps its caches coherent exclusively through this
//! module; nothing else couples the cache layer to the mutation layer.

pub mod bus;
pub mod types;

pub use bus::{
    BatchingConfig, EventBus, EventBusError, EventBusMetrics, EventHandler, SubscribeOptions,
    Subscription,
};
pub use types::{
    Event, EventDraft, EventFilter, EventPayload, EventType, HierarchyChangeKind, NodeUpdateKind,
};
