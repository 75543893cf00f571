//! Canopy Core Coordination Layer
//!
//! This crate provides the in-memory coordination layer for the Canopy outline
//! editor: a typed event bus and a cached hierarchy service over a tree of
//! nodes linked by parent and single-pointer sibling references.
//!
//! # Architecture
//!
//! - **Write-then-notify**: the node store is mutated only by the operations
//!   layer, which emits a domain event after every mutation
//! - **Derived state only**: the hierarchy service maintains recomputable
//!   caches (depth, children, siblings) and never writes to the store
//! - **Explicit bus instance**: the event bus is constructed at the composition
//!   root and passed by reference; `reset()` returns it to its initial state
//!
//! # Modules
//!
//! - [`models`] - Node data structure
//! - [`store`] - Read-only node store trait and in-memory implementation
//! - [`events`] - Event vocabulary and the event bus
//! - [`services`] - Cached hierarchy queries with event-driven invalidation
//! - [`operations`] - Node mutations that keep store and bus in sync

pub mod events;
pub mod models;
pub mod operations;
pub mod services;
pub mod store;

// Re-export commonly used types
pub use events::{
    BatchingConfig, Event, EventBus, EventBusError, EventBusMetrics, EventDraft, EventFilter,
    EventPayload, EventType, HierarchyChangeKind, NodeUpdateKind, SubscribeOptions, Subscription,
};
pub use models::Node;
pub use operations::{CreateNodeParams, NodeOperationError, NodeOperations};
pub use services::{CachePerformance, CacheStats, HierarchyService, NodePath};
pub use store::{InMemoryNodeStore, NodeStore};
