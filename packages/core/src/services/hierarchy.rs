//! Hierarchy Service
//!
//! Fast, cached structural queries over the externally-owned node tree.
//!
//! # Architecture
//!
//! The underlying tree is a linked structure: each node points at its parent
//! and at its previous sibling, so a naive depth query is O(depth) and a naive
//! children query is O(n). This service memoizes three indexes — depth per
//! node, ordered children per parent, ordered siblings per node — turning
//! repeated queries into amortized O(1) map lookups.
//!
//! # Cache Invalidation
//!
//! Coherence is event-driven: construction subscribes to `node:updated`
//! (hierarchy updates only) and `hierarchy:changed` on the bus, and handlers
//! invalidate the affected entries. Bulk changes clear everything. Queries
//! recompute lazily and re-cache.
//!
//! # Defensive traversal
//!
//! The sibling chain invariant (exactly one head per parent) is not trusted:
//! broken and cyclic chains are resolved with a visited-set and a
//! deterministic lowest-ID head tie-break, never by looping or failing.
//! Unknown IDs return defensive defaults (`0`, empty list, empty path) so a
//! UI racing a deletion never crashes.

use crate::events::{EventBus, EventPayload, EventType, SubscribeOptions, Subscription};
use crate::store::NodeStore;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Root-to-node path with the depth of every step.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePath {
    /// IDs from the root down to the queried node.
    pub node_ids: Vec<String>,
    /// Depth of each entry in `node_ids`.
    pub depths: Vec<usize>,
    /// Depth of the queried node.
    pub total_depth: usize,
}

/// Raw hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePerformance {
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// Snapshot of cache sizes and effectiveness.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub depth_cache_size: usize,
    pub children_cache_size: usize,
    pub siblings_cache_size: usize,
    /// Hits over total lookups; 0.0 before the first lookup.
    pub hit_ratio: f64,
    pub performance: CachePerformance,
}

#[derive(Default)]
struct HierarchyCaches {
    /// node id → depth (root = 0)
    depth: HashMap<String, usize>,
    /// parent key (None = roots) → ordered child ids
    children: HashMap<Option<String>, Vec<String>>,
    /// node id → ordered ids of all nodes sharing its parent, self included
    siblings: HashMap<String, Vec<String>>,
    hits: u64,
    misses: u64,
}

/// Cached structural queries with event-driven invalidation.
///
/// Caches start empty, fill on demand, and are discarded on drop. The service
/// never mutates the store.
pub struct HierarchyService {
    store: Arc<dyn NodeStore>,
    caches: Arc<Mutex<HierarchyCaches>>,
    subscriptions: Vec<Subscription>,
}

impl HierarchyService {
    /// Create a service over the given store and wire its invalidation
    /// handlers to the bus.
    pub fn new(store: Arc<dyn NodeStore>, bus: &EventBus) -> Self {
        let caches = Arc::new(Mutex::new(HierarchyCaches::default()));

        let updated_store = Arc::clone(&store);
        let updated_caches = Arc::clone(&caches);
        let on_updated = bus.subscribe(
            EventType::NodeUpdated,
            move |event| {
                if let EventPayload::NodeUpdated {
                    node_id,
                    update_type,
                    ..
                } = &event.payload
                {
                    // Content/property updates leave the structure untouched.
                    if update_type.is_structural() {
                        Self::invalidate_entry(&updated_store, &updated_caches, node_id);
                    }
                }
                Ok(())
            },
            SubscribeOptions::default(),
        );

        let changed_store = Arc::clone(&store);
        let changed_caches = Arc::clone(&caches);
        let on_changed = bus.subscribe(
            EventType::HierarchyChanged,
            move |event| {
                if let EventPayload::HierarchyChanged {
                    affected_nodes,
                    change_type,
                } = &event.payload
                {
                    if change_type.is_bulk() {
                        Self::clear_all(&changed_caches);
                    } else {
                        for node_id in affected_nodes {
                            Self::invalidate_entry(&changed_store, &changed_caches, node_id);
                        }
                    }
                }
                Ok(())
            },
            SubscribeOptions::default(),
        );

        Self {
            store,
            caches,
            subscriptions: vec![on_updated, on_changed],
        }
    }

    /// Depth of a node: parent hops to its root (root = 0, unknown id = 0).
    ///
    /// On a cache miss the full ancestor chain is walked once and every
    /// intermediate depth is cached, so subsequent queries for any ancestor
    /// are O(1).
    pub fn get_node_depth(&self, id: &str) -> usize {
        {
            let mut caches = self.lock();
            if let Some(&depth) = caches.depth.get(id) {
                caches.hits += 1;
                return depth;
            }
            caches.misses += 1;
        }

        let Some(mut node) = self.store.find_node(id) else {
            return 0;
        };

        // Walk upward until a root, a cached ancestor, a dangling parent, or
        // a parent cycle ends the chain.
        let mut chain: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cached_ancestor_depth: Option<usize> = None;
        loop {
            if !seen.insert(node.id.clone()) {
                break;
            }
            chain.push(node.id.clone());
            let Some(parent_id) = node.parent_id.clone() else {
                break;
            };
            if let Some(&depth) = self.lock().depth.get(&parent_id) {
                cached_ancestor_depth = Some(depth);
                break;
            }
            match self.store.find_node(&parent_id) {
                Some(parent) => node = parent,
                None => break,
            }
        }

        let start = cached_ancestor_depth.map_or(0, |depth| depth + 1);
        let mut caches = self.lock();
        let mut depth = start;
        for node_id in chain.iter().rev() {
            caches.depth.insert(node_id.clone(), depth);
            depth += 1;
        }
        start + chain.len() - 1
    }

    /// Ordered children of a node, in sibling-chain (reading) order.
    /// Unknown ids and leaves both return an empty list.
    pub fn get_children(&self, id: &str) -> Vec<String> {
        self.children_of_key(Some(id))
    }

    /// Ordered root nodes (nodes with no parent).
    pub fn get_root_nodes(&self) -> Vec<String> {
        self.children_of_key(None)
    }

    /// All descendants of a node in breadth-first order: every node at one
    /// level precedes any node of the next level.
    pub fn get_descendants(&self, id: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut queue: VecDeque<String> = self.get_children(id).into();
        let mut seen: HashSet<String> = queue.iter().cloned().collect();
        seen.insert(id.to_string());

        while let Some(current) = queue.pop_front() {
            for child in self.get_children(&current) {
                if seen.insert(child.clone()) {
                    queue.push_back(child);
                }
            }
            result.push(current);
        }
        result
    }

    /// All nodes sharing this node's parent, self included, in sibling-chain
    /// order. Unknown ids return an empty list.
    pub fn get_siblings(&self, id: &str) -> Vec<String> {
        {
            let mut caches = self.lock();
            if let Some(order) = caches.siblings.get(id).cloned() {
                caches.hits += 1;
                return order;
            }
            caches.misses += 1;
        }

        let Some(node) = self.store.find_node(id) else {
            return Vec::new();
        };
        let order = self.children_of_key(node.parent_id.as_deref());
        self.lock().siblings.insert(id.to_string(), order.clone());
        order
    }

    /// Zero-based position of a node within its sibling order (0 when
    /// unknown).
    pub fn get_sibling_position(&self, id: &str) -> usize {
        self.get_siblings(id)
            .iter()
            .position(|sibling| sibling == id)
            .unwrap_or(0)
    }

    /// The sibling immediately after this node, if any.
    pub fn get_next_sibling(&self, id: &str) -> Option<String> {
        let siblings = self.get_siblings(id);
        let position = siblings.iter().position(|sibling| sibling == id)?;
        siblings.get(position + 1).cloned()
    }

    /// The sibling immediately before this node, if any.
    pub fn get_previous_sibling(&self, id: &str) -> Option<String> {
        let siblings = self.get_siblings(id);
        let position = siblings.iter().position(|sibling| sibling == id)?;
        position.checked_sub(1).and_then(|p| siblings.get(p)).cloned()
    }

    /// Root-first path from the node's root down to the node itself.
    /// Unknown ids return an empty path.
    pub fn get_node_path(&self, id: &str) -> NodePath {
        if self.store.find_node(id).is_none() {
            return NodePath::default();
        }

        let mut node_ids: Vec<String> = Vec::new();
        let mut depths: Vec<usize> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor = Some(id.to_string());
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                break;
            }
            let Some(node) = self.store.find_node(&current) else {
                break;
            };
            depths.push(self.get_node_depth(&current));
            node_ids.push(current);
            cursor = node.parent_id;
        }

        node_ids.reverse();
        depths.reverse();
        let total_depth = depths.last().copied().unwrap_or(0);
        NodePath {
            node_ids,
            depths,
            total_depth,
        }
    }

    /// Drop the cached depth for a node plus the children/sibling orders it
    /// participates in. The next query for any of them is a cache miss.
    ///
    /// Descendant depths are left in place: they only become wrong when the
    /// ancestor chain itself changes, in which case the emitter names those
    /// nodes in `affected_nodes` too.
    pub fn invalidate_node_cache(&self, id: &str) {
        Self::invalidate_entry(&self.store, &self.caches, id);
    }

    /// Drop every cached entry. Used for bulk operations where the affected
    /// set cannot be determined cheaply.
    pub fn invalidate_all_caches(&self) {
        Self::clear_all(&self.caches);
    }

    /// Snapshot of cache sizes and hit/miss counters.
    pub fn get_cache_stats(&self) -> CacheStats {
        let caches = self.lock();
        let total = caches.hits + caches.misses;
        let hit_ratio = if total == 0 {
            0.0
        } else {
            caches.hits as f64 / total as f64
        };
        CacheStats {
            depth_cache_size: caches.depth.len(),
            children_cache_size: caches.children.len(),
            siblings_cache_size: caches.siblings.len(),
            hit_ratio,
            performance: CachePerformance {
                cache_hits: caches.hits,
                cache_misses: caches.misses,
            },
        }
    }

    fn children_of_key(&self, parent_key: Option<&str>) -> Vec<String> {
        let owned_key = parent_key.map(str::to_string);
        {
            let mut caches = self.lock();
            if let Some(order) = caches.children.get(&owned_key).cloned() {
                caches.hits += 1;
                return order;
            }
            caches.misses += 1;
        }

        let order = resolve_sibling_chain(self.store.as_ref(), parent_key);
        self.lock().children.insert(owned_key, order.clone());
        order
    }

    fn invalidate_entry(
        store: &Arc<dyn NodeStore>,
        caches: &Mutex<HierarchyCaches>,
        id: &str,
    ) {
        // Resolve the parent before taking the lock; store reads are
        // independent of cache state.
        let parent_key = store.find_node(id).map(|node| node.parent_id);

        let mut caches = caches.lock().unwrap_or_else(|e| e.into_inner());
        caches.depth.remove(id);

        let mut dropped_members: Vec<String> = Vec::new();
        if let Some(order) = caches.children.remove(&Some(id.to_string())) {
            dropped_members.extend(order);
        }
        match parent_key {
            Some(parent_key) => {
                if let Some(order) = caches.children.remove(&parent_key) {
                    dropped_members.extend(order);
                }
            }
            None => {
                // Node no longer resolvable (deleted): drop any cached order
                // that still mentions it.
                let stale_keys: Vec<Option<String>> = caches
                    .children
                    .iter()
                    .filter(|(_, order)| order.iter().any(|member| member == id))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in stale_keys {
                    if let Some(order) = caches.children.remove(&key) {
                        dropped_members.extend(order);
                    }
                }
            }
        }

        caches.siblings.remove(id);
        for member in &dropped_members {
            caches.siblings.remove(member);
        }
        tracing::debug!(node_id = id, "hierarchy cache entries invalidated");
    }

    fn clear_all(caches: &Mutex<HierarchyCaches>) {
        let mut caches = caches.lock().unwrap_or_else(|e| e.into_inner());
        caches.depth.clear();
        caches.children.clear();
        caches.siblings.clear();
        tracing::debug!("all hierarchy caches invalidated");
    }

    fn lock(&self) -> MutexGuard<'_, HierarchyCaches> {
        self.caches.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for HierarchyService {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        Self::clear_all(&self.caches);
    }
}

/// Resolve the ordered children of a parent by walking its sibling chain.
///
/// Collects every node whose `parent_id` matches, indexes
/// `before_sibling_id → node`, starts from the head (the candidate whose
/// back-pointer is absent or points outside the set), and follows the index
/// forward with a visited-set so cycles and dangling references terminate.
/// When a fragment ends with candidates unreached (broken or cyclic chain)
/// the head rule is re-applied to the remainder; headless cycles break to
/// the lowest ID. The result is deterministic for any input.
fn resolve_sibling_chain(store: &dyn NodeStore, parent_key: Option<&str>) -> Vec<String> {
    let mut candidates: Vec<(String, Option<String>)> = store
        .all_nodes()
        .into_iter()
        .filter(|node| node.parent_id.as_deref() == parent_key)
        .map(|node| (node.id, node.before_sibling_id))
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }
    // Lowest-ID-first makes head selection and duplicate back-pointer
    // resolution independent of store iteration order.
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let id_set: HashSet<&str> = candidates.iter().map(|(id, _)| id.as_str()).collect();
    let mut next_of: HashMap<&str, &str> = HashMap::new();
    for (id, before) in &candidates {
        if let Some(before) = before.as_deref() {
            next_of.entry(before).or_insert(id.as_str());
        }
    }

    let mut order: Vec<String> = Vec::with_capacity(candidates.len());
    let mut visited: HashSet<&str> = HashSet::new();
    while visited.len() < candidates.len() {
        let head = candidates
            .iter()
            .find(|(id, before)| {
                !visited.contains(id.as_str())
                    && before.as_deref().map_or(true, |b| !id_set.contains(b))
            })
            .or_else(|| {
                candidates
                    .iter()
                    .find(|(id, _)| !visited.contains(id.as_str()))
            });
        let Some((head_id, _)) = head else {
            break;
        };

        let mut cursor = head_id.as_str();
        while visited.insert(cursor) {
            order.push(cursor.to_string());
            match next_of.get(cursor) {
                Some(&next) if !visited.contains(next) => cursor = next,
                _ => break,
            }
        }
    }
    order
}
