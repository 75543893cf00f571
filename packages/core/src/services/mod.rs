//! Coordination Services
//!
//! - `HierarchyService` - cached depth/children/sibling/path queries with
//!   event-driven invalidation
//!
//! Services consume the node store read-only and react to bus events; they
//! never originate mutations themselves.

pub mod hierarchy;

pub use hierarchy::{CachePerformance, CacheStats, HierarchyService, NodePath};
