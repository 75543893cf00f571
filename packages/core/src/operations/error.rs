//! Operations Layer Error Types

use thiserror::Error;

/// Errors surfaced by node mutations.
///
/// Queries on the hierarchy service are infallible by design (unknown ids get
/// defensive defaults); mutations are where invalid references are rejected.
#[derive(Error, Debug)]
pub enum NodeOperationError {
    /// Node not found by ID
    #[error("Node not found: {id}")]
    NodeNotFound { id: String },

    /// Invalid parent reference
    #[error("Invalid parent node: {parent_id}")]
    InvalidParent { parent_id: String },

    /// Sibling reference under a different parent
    #[error("Sibling {sibling_id} does not share the target parent")]
    SiblingParentMismatch { sibling_id: String },

    /// Circular reference detected
    #[error("Circular reference detected: {context}")]
    CircularReference { context: String },
}

impl NodeOperationError {
    /// Create a node not found error
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    /// Create an invalid parent error
    pub fn invalid_parent(parent_id: impl Into<String>) -> Self {
        Self::InvalidParent {
            parent_id: parent_id.into(),
        }
    }

    /// Create a sibling mismatch error
    pub fn sibling_mismatch(sibling_id: impl Into<String>) -> Self {
        Self::SiblingParentMismatch {
            sibling_id: sibling_id.into(),
        }
    }

    /// Create a circular reference error
    pub fn circular_reference(context: impl Into<String>) -> Self {
        Self::CircularReference {
            context: context.into(),
        }
    }
}
