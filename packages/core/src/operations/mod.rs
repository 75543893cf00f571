//! Node Operations
//!
//! The single write path for the node store. Every mutation follows the
//! write-then-notify discipline the cache layer depends on: apply the change
//! to the store first, then emit the matching domain event on the bus. The
//! hierarchy service subscribes to those events and invalidates its caches;
//! nothing here touches a cache directly.
//!
//! Sibling chains are spliced here: creating, moving, reordering, or deleting
//! a node repairs the `before_sibling_id` pointers of the neighbors so the
//! per-parent linked list stays closed.

pub mod error;

pub use error::NodeOperationError;

use crate::events::{EventBus, EventDraft, EventPayload, HierarchyChangeKind, NodeUpdateKind};
use crate::models::Node;
use crate::store::{InMemoryNodeStore, NodeStore};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Source tag stamped on every event emitted by this layer.
const EVENT_SOURCE: &str = "node-operations";

/// Parameters for creating a node.
#[derive(Debug, Clone)]
pub struct CreateNodeParams {
    /// Optional ID for the node. If None, a UUID is generated.
    pub id: Option<String>,
    /// Type of the node (text, task, document, ...)
    pub node_type: String,
    /// Content of the node
    pub content: String,
    /// Optional parent node ID (None creates a root)
    pub parent_id: Option<String>,
    /// Optional previous sibling: the new node is placed directly after it.
    /// None places the node at the head of its parent's sibling chain.
    pub before_sibling_id: Option<String>,
    /// Additional node properties as JSON
    pub properties: Value,
}

/// Mutations over the in-memory node store that keep the event bus in sync.
pub struct NodeOperations {
    store: Arc<InMemoryNodeStore>,
    bus: EventBus,
}

impl NodeOperations {
    /// Create an operations layer over the given store and bus.
    pub fn new(store: Arc<InMemoryNodeStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Shared store handle (read-only use by collaborators).
    pub fn store(&self) -> Arc<InMemoryNodeStore> {
        Arc::clone(&self.store)
    }

    /// Create a node, splice it into its parent's sibling chain, and emit
    /// `node:created`. Returns the new node's ID.
    pub fn create_node(&self, params: CreateNodeParams) -> Result<String, NodeOperationError> {
        if let Some(ref parent_id) = params.parent_id {
            if self.store.find_node(parent_id).is_none() {
                return Err(NodeOperationError::invalid_parent(parent_id));
            }
        }
        if let Some(ref sibling_id) = params.before_sibling_id {
            let sibling = self
                .store
                .find_node(sibling_id)
                .ok_or_else(|| NodeOperationError::node_not_found(sibling_id))?;
            if sibling.parent_id != params.parent_id {
                return Err(NodeOperationError::sibling_mismatch(sibling_id));
            }
        }

        let id = params
            .id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // The node currently occupying the target slot now follows the new
        // node.
        if let Some(successor) = self.successor_in_chain(
            params.parent_id.as_deref(),
            params.before_sibling_id.as_deref(),
            Some(id.as_str()),
        ) {
            self.store
                .update(&successor, |n| n.before_sibling_id = Some(id.clone()));
        }

        let node = Node::new_with_id(
            id.clone(),
            params.node_type,
            params.content,
            params.parent_id,
            params.properties,
        )
        .with_before_sibling(params.before_sibling_id);
        self.store.insert(node);

        self.emit(EventPayload::NodeCreated {
            node_id: id.clone(),
        });
        Ok(id)
    }

    /// Replace a node's content and emit `node:updated` with
    /// `update_type = content`.
    pub fn update_content(&self, id: &str, content: &str) -> Result<(), NodeOperationError> {
        let node = self
            .store
            .find_node(id)
            .ok_or_else(|| NodeOperationError::node_not_found(id))?;
        let previous = node.content;

        self.store.update(id, |n| {
            n.content = content.to_string();
            n.modified_at = Utc::now();
        });

        self.emit(EventPayload::NodeUpdated {
            node_id: id.to_string(),
            update_type: NodeUpdateKind::Content,
            previous_value: Some(json!(previous)),
            new_value: Some(json!(content)),
        });
        Ok(())
    }

    /// Set the `status` property of a node and emit `node:status-changed`.
    pub fn update_status(&self, id: &str, status: &str) -> Result<(), NodeOperationError> {
        if self.store.find_node(id).is_none() {
            return Err(NodeOperationError::node_not_found(id));
        }

        self.store.update(id, |n| {
            if let Some(map) = n.properties.as_object_mut() {
                map.insert("status".to_string(), json!(status));
            } else {
                n.properties = json!({ "status": status });
            }
            n.modified_at = Utc::now();
        });

        self.emit(EventPayload::NodeStatusChanged {
            node_id: id.to_string(),
            status: status.to_string(),
        });
        Ok(())
    }

    /// Change a node's position under the same parent and emit
    /// `node:updated` with `update_type = hierarchy`.
    ///
    /// `before_sibling_id = None` moves the node to the head of the chain.
    pub fn reorder_node(
        &self,
        id: &str,
        before_sibling_id: Option<&str>,
    ) -> Result<(), NodeOperationError> {
        let node = self
            .store
            .find_node(id)
            .ok_or_else(|| NodeOperationError::node_not_found(id))?;
        if before_sibling_id == Some(id) {
            return Err(NodeOperationError::circular_reference(format!(
                "node {id} cannot follow itself"
            )));
        }
        if let Some(sibling_id) = before_sibling_id {
            let sibling = self
                .store
                .find_node(sibling_id)
                .ok_or_else(|| NodeOperationError::node_not_found(sibling_id))?;
            if sibling.parent_id != node.parent_id {
                return Err(NodeOperationError::sibling_mismatch(sibling_id));
            }
        }

        let previous = node.before_sibling_id.clone();
        if previous.as_deref() == before_sibling_id {
            return Ok(());
        }

        let parent = node.parent_id.as_deref();
        self.splice_out(parent, id, previous.as_deref());
        self.splice_in(parent, id, before_sibling_id);
        self.store.update(id, |n| {
            n.before_sibling_id = before_sibling_id.map(str::to_string);
            n.modified_at = Utc::now();
        });

        self.emit(EventPayload::NodeUpdated {
            node_id: id.to_string(),
            update_type: NodeUpdateKind::Hierarchy,
            previous_value: Some(json!({ "beforeSiblingId": previous })),
            new_value: Some(json!({ "beforeSiblingId": before_sibling_id })),
        });
        Ok(())
    }

    /// Move a node (and implicitly its subtree) under a new parent and emit
    /// `hierarchy:changed` naming the node, its subtree, and both parents.
    ///
    /// Rejects moves that would place a node under itself or one of its
    /// descendants.
    pub fn move_node(
        &self,
        id: &str,
        new_parent_id: Option<&str>,
        before_sibling_id: Option<&str>,
    ) -> Result<(), NodeOperationError> {
        let node = self
            .store
            .find_node(id)
            .ok_or_else(|| NodeOperationError::node_not_found(id))?;
        if let Some(parent_id) = new_parent_id {
            if self.store.find_node(parent_id).is_none() {
                return Err(NodeOperationError::invalid_parent(parent_id));
            }
            if self.is_same_or_descendant(parent_id, id) {
                return Err(NodeOperationError::circular_reference(format!(
                    "cannot move {id} under its own subtree ({parent_id})"
                )));
            }
        }
        if let Some(sibling_id) = before_sibling_id {
            let sibling = self
                .store
                .find_node(sibling_id)
                .ok_or_else(|| NodeOperationError::node_not_found(sibling_id))?;
            if sibling.parent_id.as_deref() != new_parent_id {
                return Err(NodeOperationError::sibling_mismatch(sibling_id));
            }
        }

        let old_parent = node.parent_id.clone();
        let old_before = node.before_sibling_id.clone();

        self.splice_out(old_parent.as_deref(), id, old_before.as_deref());
        self.splice_in(new_parent_id, id, before_sibling_id);
        self.store.update(id, |n| {
            n.parent_id = new_parent_id.map(str::to_string);
            n.before_sibling_id = before_sibling_id.map(str::to_string);
            n.modified_at = Utc::now();
        });

        // Depths of the whole subtree changed along with both parents'
        // child orders, so the affected set names them all.
        let mut affected = vec![id.to_string()];
        affected.extend(self.collect_subtree(id));
        affected.extend(old_parent.clone());
        affected.extend(new_parent_id.map(str::to_string));

        self.emit(EventPayload::HierarchyChanged {
            affected_nodes: affected,
            change_type: HierarchyChangeKind::Move,
        });
        Ok(())
    }

    /// Delete a node and its subtree, splice the sibling chain closed, and
    /// emit `node:deleted` plus `hierarchy:changed`.
    ///
    /// Returns the IDs of every removed node (the target first).
    pub fn delete_node(&self, id: &str) -> Result<Vec<String>, NodeOperationError> {
        let node = self
            .store
            .find_node(id)
            .ok_or_else(|| NodeOperationError::node_not_found(id))?;

        self.splice_out(node.parent_id.as_deref(), id, node.before_sibling_id.as_deref());

        let mut removed = vec![id.to_string()];
        removed.extend(self.collect_subtree(id));
        for removed_id in &removed {
            self.store.remove(removed_id);
        }

        self.emit(EventPayload::NodeDeleted {
            node_id: id.to_string(),
        });
        let mut affected = removed.clone();
        affected.extend(node.parent_id.clone());
        self.emit(EventPayload::HierarchyChanged {
            affected_nodes: affected,
            change_type: HierarchyChangeKind::Delete,
        });
        Ok(removed)
    }

    /// Bulk-insert pre-linked nodes (e.g., a document import) and emit a
    /// single broad `hierarchy:changed` with `change_type = bulk-import`.
    pub fn import_nodes(&self, nodes: Vec<Node>) -> usize {
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let count = nodes.len();
        for node in nodes {
            self.store.insert(node);
        }
        self.emit(EventPayload::HierarchyChanged {
            affected_nodes: ids,
            change_type: HierarchyChangeKind::BulkImport,
        });
        count
    }

    fn emit(&self, payload: EventPayload) {
        self.bus.emit(EventDraft::new(payload).source(EVENT_SOURCE));
    }

    /// The node whose `before_sibling_id` equals `slot` under `parent`, i.e.
    /// the current occupant of the position directly after `slot`.
    fn successor_in_chain(
        &self,
        parent: Option<&str>,
        slot: Option<&str>,
        exclude: Option<&str>,
    ) -> Option<String> {
        self.store
            .all_nodes()
            .into_iter()
            .filter(|n| n.parent_id.as_deref() == parent)
            .filter(|n| Some(n.id.as_str()) != exclude)
            .find(|n| n.before_sibling_id.as_deref() == slot)
            .map(|n| n.id)
    }

    /// Close the chain around a departing node: its successor now points at
    /// its predecessor.
    fn splice_out(&self, parent: Option<&str>, id: &str, predecessor: Option<&str>) {
        if let Some(successor) = self.successor_in_chain(parent, Some(id), None) {
            let predecessor = predecessor.map(str::to_string);
            self.store
                .update(&successor, |n| n.before_sibling_id = predecessor);
        }
    }

    /// Point the current occupant of the target slot at the arriving node.
    fn splice_in(&self, parent: Option<&str>, id: &str, slot: Option<&str>) {
        if let Some(successor) = self.successor_in_chain(parent, slot, Some(id)) {
            let id = id.to_string();
            self.store
                .update(&successor, |n| n.before_sibling_id = Some(id));
        }
    }

    /// Whether `candidate` is `ancestor` itself or lies in its subtree.
    fn is_same_or_descendant(&self, candidate: &str, ancestor: &str) -> bool {
        if candidate == ancestor {
            return true;
        }
        self.collect_subtree(ancestor)
            .iter()
            .any(|id| id == candidate)
    }

    /// Breadth-first IDs of every node strictly below `id`, cycle-safe.
    fn collect_subtree(&self, id: &str) -> Vec<String> {
        let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
        for node in self.store.all_nodes() {
            if let Some(parent_id) = node.parent_id {
                children_of.entry(parent_id).or_default().push(node.id);
            }
        }

        let mut result = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(id.to_string());
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.extend(children_of.get(id).cloned().unwrap_or_default());
        while let Some(current) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            queue.extend(children_of.get(&current).cloned().unwrap_or_default());
            result.push(current);
        }
        result
    }
}
