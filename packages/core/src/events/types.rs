//! Domain event vocabulary
//!
//! Events are the only mechanism by which tree mutations reach the hierarchy
//! caches. Each event is a variant of a closed sum type tagged by `type`, so
//! dispatch code matches exhaustively instead of inspecting untyped payloads.
//!
//! # Wire format
//!
//! Payloads serialize internally tagged with camelCase fields, e.g.
//! `{"type":"node:updated","nodeId":"...","updateType":"hierarchy"}`.
//! The contract tests below pin this format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What aspect of a node a `node:updated` event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeUpdateKind {
    /// Textual content changed; structure untouched.
    Content,
    /// Parent or sibling links changed (reparent, reorder).
    Hierarchy,
    /// Entity-specific properties changed.
    Properties,
}

impl NodeUpdateKind {
    /// Whether the update moved the node within the tree. Only structural
    /// updates invalidate hierarchy caches.
    pub fn is_structural(&self) -> bool {
        matches!(self, NodeUpdateKind::Hierarchy)
    }
}

/// What kind of structural change a `hierarchy:changed` event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HierarchyChangeKind {
    /// A node moved to a different parent.
    Move,
    /// Siblings were reordered under the same parent.
    Reorder,
    /// A subtree was deleted.
    Delete,
    /// Many nodes changed at once; affected set not cheaply determinable.
    BulkImport,
}

impl HierarchyChangeKind {
    /// Broad changes invalidate every cache instead of per-node entries.
    pub fn is_bulk(&self) -> bool {
        matches!(self, HierarchyChangeKind::BulkImport)
    }
}

/// Type-specific payload of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    /// A new node was created.
    #[serde(rename = "node:created", rename_all = "camelCase")]
    NodeCreated { node_id: String },

    /// An existing node was updated.
    #[serde(rename = "node:updated", rename_all = "camelCase")]
    NodeUpdated {
        node_id: String,
        update_type: NodeUpdateKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous_value: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_value: Option<serde_json::Value>,
    },

    /// A node was deleted.
    #[serde(rename = "node:deleted", rename_all = "camelCase")]
    NodeDeleted { node_id: String },

    /// A node's status property changed (e.g., task completion).
    #[serde(rename = "node:status-changed", rename_all = "camelCase")]
    NodeStatusChanged { node_id: String, status: String },

    /// The tree structure changed for a set of nodes.
    #[serde(rename = "hierarchy:changed", rename_all = "camelCase")]
    HierarchyChanged {
        affected_nodes: Vec<String>,
        change_type: HierarchyChangeKind,
    },
}

impl EventPayload {
    /// The tag-only type of this payload.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::NodeCreated { .. } => EventType::NodeCreated,
            EventPayload::NodeUpdated { .. } => EventType::NodeUpdated,
            EventPayload::NodeDeleted { .. } => EventType::NodeDeleted,
            EventPayload::NodeStatusChanged { .. } => EventType::NodeStatusChanged,
            EventPayload::HierarchyChanged { .. } => EventType::HierarchyChanged,
        }
    }

    /// The single node this payload concerns, when it concerns exactly one.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            EventPayload::NodeCreated { node_id }
            | EventPayload::NodeUpdated { node_id, .. }
            | EventPayload::NodeDeleted { node_id }
            | EventPayload::NodeStatusChanged { node_id, .. } => Some(node_id),
            EventPayload::HierarchyChanged { .. } => None,
        }
    }
}

/// Tag-only mirror of [`EventPayload`], used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    NodeCreated,
    NodeUpdated,
    NodeDeleted,
    NodeStatusChanged,
    HierarchyChanged,
}

impl EventType {
    /// Wire name of the event type, matching the serde tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::NodeCreated => "node:created",
            EventType::NodeUpdated => "node:updated",
            EventType::NodeDeleted => "node:deleted",
            EventType::NodeStatusChanged => "node:status-changed",
            EventType::HierarchyChanged => "hierarchy:changed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-stamped domain event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Optional logical grouping (e.g., "editor", "sync").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Optional originating component (e.g., "node-operations").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Stamped by the bus at emission time.
    pub timestamp: DateTime<Utc>,

    /// Type-specific payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// The tag-only type of this event.
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// The single node this event concerns, when it concerns exactly one.
    pub fn node_id(&self) -> Option<&str> {
        self.payload.node_id()
    }
}

/// An event as handed to [`emit`](crate::events::EventBus::emit): everything
/// but the timestamp, which the bus stamps on emission.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub namespace: Option<String>,
    pub source: Option<String>,
    pub payload: EventPayload,
}

impl EventDraft {
    /// Create a draft with no namespace/source metadata.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            namespace: None,
            source: None,
            payload,
        }
    }

    /// Set the namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the source.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub(crate) fn stamp(self, timestamp: DateTime<Utc>) -> Event {
        Event {
            namespace: self.namespace,
            source: self.source,
            timestamp,
            payload: self.payload,
        }
    }
}

impl From<EventPayload> for EventDraft {
    fn from(payload: EventPayload) -> Self {
        EventDraft::new(payload)
    }
}

/// Subscription-time predicate restricting which events reach a handler.
///
/// All supplied criteria must match (logical AND); absent criteria are not
/// checked. A `node_id` criterion never matches events that concern no single
/// node (e.g., `hierarchy:changed`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl EventFilter {
    /// Filter matching events in the given namespace.
    pub fn for_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    /// Filter matching events from the given source.
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    /// Filter matching events concerning the given node.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            ..Default::default()
        }
    }

    /// Add a namespace criterion.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Add a source criterion.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add a node ID criterion.
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Whether the given event satisfies every supplied criterion.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref ns) = self.namespace {
            if event.namespace.as_deref() != Some(ns.as_str()) {
                return false;
            }
        }
        if let Some(ref src) = self.source {
            if event.source.as_deref() != Some(src.as_str()) {
                return false;
            }
        }
        if let Some(ref node_id) = self.node_id {
            if event.node_id() != Some(node_id.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped(draft: EventDraft) -> Event {
        draft.stamp(Utc::now())
    }

    /// Contract test: pins the exact JSON format consumed by frontend layers.
    ///
    /// Serde's `#[serde(tag = "type")]` produces an INTERNALLY-TAGGED format
    /// where the discriminator field is merged with the payload fields (NOT
    /// nested).
    #[test]
    fn test_event_serialization_contract() {
        let event = stamped(
            EventDraft::new(EventPayload::NodeUpdated {
                node_id: "node-123".to_string(),
                update_type: NodeUpdateKind::Hierarchy,
                previous_value: None,
                new_value: Some(serde_json::json!({ "parentId": "p2" })),
            })
            .namespace("editor")
            .source("node-operations"),
        );

        let parsed: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed.get("type").unwrap(), "node:updated");
        assert_eq!(parsed.get("nodeId").unwrap(), "node-123");
        assert_eq!(parsed.get("updateType").unwrap(), "hierarchy");
        assert_eq!(parsed.get("namespace").unwrap(), "editor");
        assert_eq!(parsed.get("source").unwrap(), "node-operations");
        assert!(parsed.get("timestamp").is_some());
        // Flat, not nested under a payload key
        assert!(parsed.get("payload").is_none());
        // Omitted optional fields must not appear at all
        assert!(parsed.get("previousValue").is_none());
    }

    #[test]
    fn test_hierarchy_changed_serialization_contract() {
        let event = stamped(EventDraft::new(EventPayload::HierarchyChanged {
            affected_nodes: vec!["a".to_string(), "b".to_string()],
            change_type: HierarchyChangeKind::BulkImport,
        }));

        let parsed = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed.get("type").unwrap(), "hierarchy:changed");
        assert_eq!(parsed.get("changeType").unwrap(), "bulk-import");
        assert_eq!(parsed["affectedNodes"][0], "a");
    }

    #[test]
    fn test_event_deserialization_round_trip() {
        let event = stamped(EventDraft::new(EventPayload::NodeStatusChanged {
            node_id: "task-1".to_string(),
            status: "done".to_string(),
        }));

        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.event_type(), EventType::NodeStatusChanged);
        assert_eq!(back.node_id(), Some("task-1"));
    }

    #[test]
    fn test_event_type_names_match_wire_tags() {
        assert_eq!(EventType::NodeCreated.as_str(), "node:created");
        assert_eq!(EventType::NodeStatusChanged.as_str(), "node:status-changed");
        assert_eq!(EventType::HierarchyChanged.as_str(), "hierarchy:changed");
    }

    #[test]
    fn test_filter_criteria_are_anded() {
        let event = stamped(
            EventDraft::new(EventPayload::NodeDeleted {
                node_id: "n1".to_string(),
            })
            .namespace("editor")
            .source("ops"),
        );

        assert!(EventFilter::default().matches(&event));
        assert!(EventFilter::for_namespace("editor").matches(&event));
        assert!(EventFilter::for_namespace("editor")
            .source("ops")
            .node_id("n1")
            .matches(&event));
        assert!(!EventFilter::for_namespace("editor")
            .node_id("other")
            .matches(&event));
        assert!(!EventFilter::for_namespace("sync").matches(&event));
    }

    #[test]
    fn test_node_id_filter_never_matches_multi_node_events() {
        let event = stamped(EventDraft::new(EventPayload::HierarchyChanged {
            affected_nodes: vec!["n1".to_string()],
            change_type: HierarchyChangeKind::Move,
        }));
        assert!(!EventFilter::for_node("n1").matches(&event));
    }
}
