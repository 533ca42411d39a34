//! Posture path planning over the posture graph.
//!
//! A request names a goal: postures on objects, surfaces to stand at, items
//! to carry, and places to be. The planner splits the search into a left
//! segment leaving the current state, optional middle segments that pick
//! up or put down an item, and a right segment ending at a destination.
//! Routes between segments come from an external [`Router`], and the
//! cheapest whole path is assembled into a [`PathSpec`] that executes as a
//! list of [`SubAction`]s under exclusive reservations.
//!
//! # Modules
//!
//! - [`actor`] -- The [`PlanningActor`] seam and a plain snapshot actor.
//! - [`config`] -- YAML-backed [`PlannerConfig`].
//! - [`constraint`] -- [`GoalConstraint`]: destinations, carry, geometry.
//! - [`context`] -- [`PlannerContext`]: one zone's world, graph, router,
//!   reservations, and failure log.
//! - [`error`] -- Structural errors.
//! - [`failure`] -- Planning failures and the failure log.
//! - [`grid`] -- [`GridRouter`], a reference occupancy-grid router.
//! - [`handles`] -- Connectivity handles between segments.
//! - [`path`] -- The assembled [`PathSpec`].
//! - [`reservation`] -- Priority-arbitrated object and slot reservations.
//! - [`router`] -- The [`Router`] trait and route types.
//! - [`search`] -- Resumable best-first graph search.
//! - [`segment`] -- Left, middle, and right segment discovery.
//! - [`selector`] -- Route requests and final path choice.
//! - [`task`] -- Suspendable planning and plan execution.
//! - [`transition`] -- Sub-actions derived from a plan.

pub mod actor;
pub mod config;
pub mod constraint;
pub mod context;
pub mod error;
pub mod failure;
pub mod grid;
pub mod handles;
pub mod path;
pub mod reservation;
pub mod router;
pub mod search;
pub mod segment;
pub mod selector;
pub mod task;
pub mod transition;

// Re-export primary types at crate root.
pub use actor::{ActorSnapshot, PlanningActor};
pub use config::{ConfigError, PlannerConfig};
pub use constraint::{CarryRequirement, GoalConstraint};
pub use context::PlannerContext;
pub use error::{PlannerError, RouterError};
pub use failure::{FailureLog, FailureReason, FailureRecord, FailureSink, PlanFailure};
pub use grid::GridRouter;
pub use path::{PathSpec, PlanCost, TransitionSpec};
pub use reservation::{Reservation, ReservationConflict, ReservationKey, ReservationManager};
pub use router::{RouteOutcome, RoutePlan, RouteRequest, RouteTicket, Router, RoutingGoal};
pub use selector::{PathSelector, Planned};
pub use task::{ExecutionStatus, PlanExecution, PlanTask, TaskPoll};
pub use transition::{SubAction, TransitionAction, sub_actions};
