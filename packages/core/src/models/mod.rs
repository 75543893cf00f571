//! Data Models
//!
//! Core data structures shared across the coordination layer.

pub mod node;

pub use node::Node;
