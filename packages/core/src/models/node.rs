//! Node data structure
//!
//! The node is the unit of the document tree. Structural position is encoded
//! by two pointers: `parent_id` (None means root) and `before_sibling_id`,
//! a backward reference to the previous sibling under the same parent. The
//! nodes sharing a parent therefore form a singly linked list with exactly one
//! head (`before_sibling_id = None`) under correct operation.
//!
//! The coordination layer consumes nodes read-only; all writes flow through
//! the operations layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Universal node structure for all content types in the outline.
///
/// # Fields
///
/// - `id`: Unique identifier (UUID v4)
/// - `node_type`: Type identifier (e.g., "text", "task", "document")
/// - `content`: Primary content/text of the node
/// - `parent_id`: Optional reference to the parent node (None means root)
/// - `before_sibling_id`: Optional reference to the previous sibling
/// - `created_at` / `modified_at`: Timestamps
/// - `properties`: JSON object with entity-specific fields
///
/// # Examples
///
/// ```rust
/// # use canopy_core::models::Node;
/// # use serde_json::json;
/// let root = Node::new("document".to_string(), "Notes".to_string(), None, json!({}));
/// let child = Node::new(
///     "text".to_string(),
///     "First line".to_string(),
///     Some(root.id.clone()),
///     json!({}),
/// );
/// assert!(root.is_root());
/// assert!(!child.is_root());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier
    pub id: String,

    /// Node type (e.g., "text", "task", "document")
    pub node_type: String,

    /// Primary content/text of the node
    pub content: String,

    /// Parent node ID (None means this node is a root)
    pub parent_id: Option<String>,

    /// Sibling ordering reference (single-pointer linked list, points backward)
    pub before_sibling_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,

    /// Entity-specific fields as a JSON object
    pub properties: serde_json::Value,
}

impl Node {
    /// Create a new node with an auto-generated UUID.
    ///
    /// The node is created as the head of its parent's sibling chain
    /// (`before_sibling_id = None`); the operations layer splices it into the
    /// correct position.
    pub fn new(
        node_type: String,
        content: String,
        parent_id: Option<String>,
        properties: serde_json::Value,
    ) -> Self {
        Self::new_with_id(
            Uuid::new_v4().to_string(),
            node_type,
            content,
            parent_id,
            properties,
        )
    }

    /// Create a new node with an explicit ID.
    ///
    /// Used when the caller pre-generates IDs (e.g., a frontend tracking
    /// optimistic updates) or in tests that need predictable identifiers.
    pub fn new_with_id(
        id: String,
        node_type: String,
        content: String,
        parent_id: Option<String>,
        properties: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            node_type,
            content,
            parent_id,
            before_sibling_id: None,
            created_at: now,
            modified_at: now,
            properties,
        }
    }

    /// Whether this node is a root (has no parent).
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Builder-style helper to set the sibling ordering reference.
    pub fn with_before_sibling(mut self, before_sibling_id: Option<String>) -> Self {
        self.before_sibling_id = before_sibling_id;
        self
    }
}
