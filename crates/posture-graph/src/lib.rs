//! Posture transition graph: world model, graph store, and maintenance.
//!
//! Nodes are canonical agent states (posture, surface, carry); edges are
//! bundles of atomic operations between them. The graph is built against a
//! [`WorldState`] and kept in step with it as objects appear, move, and
//! disappear.
//!
//! # Modules
//!
//! - [`builder`] -- Full rebuild and localized incremental expansion.
//! - [`config`] -- Operation costs and graph tuning.
//! - [`error`] -- Error types for world and graph operations.
//! - [`export`] -- GraphML and JSON node-link diagnostics export.
//! - [`graph`] -- The [`PostureGraph`] store with its canonical map,
//!   adjacency, and candidate queries.
//! - [`index`] -- Attribute value -> node set index.
//! - [`maintenance`] -- [`GraphMaintainer`]: bulk-edit and deferred-build
//!   modes on top of the builder.
//! - [`operation`] -- Atomic [`Operation`]s and [`Edge`] bundles.
//! - [`spatial`] -- Per-floor quadtree over node anchor footprints.
//! - [`world`] -- Objects, placements, slots.

pub mod builder;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod index;
pub mod maintenance;
pub mod operation;
pub mod spatial;
pub mod world;

// Re-export primary types at crate root.
pub use builder::BuildStats;
pub use config::{GraphConfig, OperationCosts};
pub use error::GraphError;
pub use graph::{EdgeInsert, NodeId, PostureGraph};
pub use maintenance::GraphMaintainer;
pub use operation::{Edge, Operation, ValidationContext};
pub use world::{Placement, Slot, WorldObject, WorldState};
