//! Structural error types for the planner.
//!
//! Planning outcomes such as "no route" or "blocked" are not errors; they
//! are [`PlanFailure`](crate::failure::PlanFailure) values. The types here
//! cover misuse and broken collaborators.

use posture_graph::GraphError;
use posture_types::{PlanId, StateSpec};

/// Errors raised by planner operations.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// The graph store rejected an operation.
    #[error("graph error: {source}")]
    Graph {
        /// The underlying graph error.
        #[from]
        source: GraphError,
    },

    /// The router rejected a request.
    #[error("router error: {source}")]
    Router {
        /// The underlying router error.
        #[from]
        source: RouterError,
    },

    /// The actor's current state cannot exist in the world.
    #[error("actor state {0} is not a valid posture graph node")]
    UnknownSourceState(StateSpec),

    /// A completed plan was modified.
    #[error("plan {0} is complete and can no longer change")]
    PlanSealed(PlanId),

    /// A transition index is outside the plan.
    #[error("plan {plan} has no transition {index}")]
    TransitionOutOfRange {
        /// The plan.
        plan: PlanId,
        /// The requested index.
        index: usize,
    },
}

/// Errors raised by a [`Router`](crate::router::Router).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// The ticket was never issued, already collected, or canceled.
    #[error("unknown route ticket {0}")]
    UnknownTicket(u64),

    /// The request cannot be routed at all.
    #[error("invalid route request: {0}")]
    InvalidRequest(String),
}
