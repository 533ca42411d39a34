//! Shared type definitions for the posture transition planner.
//!
//! This crate is the single source of truth for the vocabulary shared by the
//! graph store, the planner, and the binary.
//!
//! # Modules
//!
//! - [`cost`] -- Fixed-point planning cost shared by edges, goals, and routes
//! - [`ids`] -- Type-safe UUID wrappers for agents, objects, and plans
//! - [`enums`] -- Postures, slot types, hands, priorities, transition kinds
//! - [`geometry`] -- Points, boxes, regions, and spatial constraints
//! - [`spec`] -- State specs, destination patterns, and variable bindings

pub mod cost;
pub mod enums;
pub mod geometry;
pub mod ids;
pub mod spec;

pub use cost::Cost;
pub use enums::{Hand, PostureKind, Priority, SequenceTag, SlotType, TransitionKind};
pub use geometry::{Aabb, Location, Region, SpatialConstraint, Vec2};
pub use ids::{AgentId, ObjectId, PlanId};
pub use spec::{
    BodySpec, CarryPattern, CarrySpec, CarryTarget, SlotRef, SlotTarget, StatePattern, StateSpec,
    SurfacePattern, SurfaceSpec, TargetPattern, VarBinding,
};

/// What an agent's body can do, independent of where it is.
///
/// Used by edge validators: an edge whose operations need a posture or a
/// carry the body lacks is never offered to that agent.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BodyCapabilities {
    /// Whether the body can hold items.
    pub can_carry: bool,
    /// Postures the body can assume.
    pub postures: std::collections::BTreeSet<PostureKind>,
}

impl BodyCapabilities {
    /// Whether the body can assume `posture`.
    pub fn supports(&self, posture: PostureKind) -> bool {
        self.postures.contains(&posture)
    }
}

impl Default for BodyCapabilities {
    fn default() -> Self {
        Self {
            can_carry: true,
            postures: PostureKind::ALL.into_iter().collect(),
        }
    }
}
