//! Error types for the `posture-graph` crate.
//!
//! All fallible operations in this crate return [`GraphError`] through the
//! standard [`Result`] type alias.

use posture_types::{ObjectId, SlotRef};

use crate::graph::NodeId;

/// Errors that can occur during world-model and graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// A node is not present in the graph.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// An object is not present in the world model.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// An object with the same ID already exists.
    #[error("duplicate object: {0}")]
    DuplicateObject(ObjectId),

    /// A slot index is out of range for its surface.
    #[error("slot {} not found on {}", .0.index, .0.object)]
    SlotNotFound(SlotRef),

    /// A slot already holds another item.
    #[error("slot {} on {} is occupied by {occupant}", .slot.index, .slot.object)]
    SlotOccupied {
        /// The requested slot.
        slot: SlotRef,
        /// The item already in it.
        occupant: ObjectId,
    },

    /// An object cannot be placed relative to itself or its own descendant.
    #[error("object {0} cannot be placed inside itself")]
    PlacementCycle(ObjectId),

    /// The two neutral marker nodes are permanent.
    #[error("cannot remove neutral marker node {0}")]
    CannotRemoveNeutral(NodeId),

    /// An edge is missing from one of its endpoints' adjacency sets.
    #[error("asymmetric edge {from} -> {to}")]
    AsymmetricEdge {
        /// Edge source.
        from: NodeId,
        /// Edge destination.
        to: NodeId,
    },

    /// An edge references a node that no longer exists.
    #[error("dangling edge {from} -> {to}")]
    DanglingEdge {
        /// Edge source.
        from: NodeId,
        /// Edge destination.
        to: NodeId,
    },

    /// Two nodes hold structurally equal state specs.
    #[error("duplicate canonical node for {0}")]
    DuplicateCanonical(NodeId),

    /// Failed to write a diagnostics export.
    #[error("export I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to serialize a diagnostics export.
    #[error("export serialization error: {source}")]
    Json {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}
