//! Node Store
//!
//! The authoritative node state lives outside the coordination layer; the
//! hierarchy service only needs a read-only view of it. [`NodeStore`] is that
//! view: point lookup by ID plus enumeration of all nodes (used when resolving
//! the children of a parent).
//!
//! [`InMemoryNodeStore`] is the reference implementation backing the
//! operations layer and the test suites.

use crate::models::Node;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read-only view of the externally-owned node collection.
///
/// Implementations must be cheap to query: the hierarchy service calls
/// `find_node` on every upward walk and `all_nodes` once per uncached
/// children resolution.
pub trait NodeStore: Send + Sync {
    /// Look up a single node by ID.
    fn find_node(&self, id: &str) -> Option<Node>;

    /// Enumerate every node in the store.
    fn all_nodes(&self) -> Vec<Node>;
}

/// In-memory node store keyed by node ID.
///
/// Writes go through the operations layer, which emits the matching domain
/// event after each mutation (write-then-notify). Reads are lock-cheap clones.
#[derive(Default)]
pub struct InMemoryNodeStore {
    nodes: RwLock<HashMap<String, Node>>,
}

impl InMemoryNodeStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert or replace a node.
    pub fn insert(&self, node: Node) {
        self.write().insert(node.id.clone(), node);
    }

    /// Remove a node, returning it if present.
    pub fn remove(&self, id: &str) -> Option<Node> {
        self.write().remove(id)
    }

    /// Apply an in-place update to a node. Returns false when the ID is
    /// unknown.
    pub fn update<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Node),
    {
        match self.write().get_mut(id) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        }
    }

    /// Number of nodes currently stored.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Node>> {
        // Recover from poisoning: node data stays usable even if a holder
        // panicked mid-read.
        self.nodes.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Node>> {
        self.nodes.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl NodeStore for InMemoryNodeStore {
    fn find_node(&self, id: &str) -> Option<Node> {
        self.read().get(id).cloned()
    }

    fn all_nodes(&self) -> Vec<Node> {
        self.read().values().cloned().collect()
    }
}
