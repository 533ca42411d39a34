//! The route planner seam.
//!
//! The planner never walks a navmesh itself. It asks a [`Router`] to turn
//! spatial constraints into goals, to check line of sight, to estimate
//! distances for search heuristics, and to compute routes. Route requests
//! are asynchronous: [`Router::submit`] returns a ticket and
//! [`Router::poll`] reports the outcome on some later tick.

use posture_graph::WorldState;
use posture_types::{Cost, Location, ObjectId, SpatialConstraint};
use serde::{Deserialize, Serialize};

use crate::error::RouterError;

/// A weighted place a route may end at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutingGoal {
    /// Where the route ends.
    pub location: Location,
    /// Extra cost of ending here.
    pub cost: Cost,
    /// Whether the goal is only valid with line of sight to its anchor.
    pub requires_los: bool,
}

impl RoutingGoal {
    /// Goal at `location` with the given cost.
    pub const fn new(location: Location, cost: Cost) -> Self {
        Self {
            location,
            cost,
            requires_los: false,
        }
    }
}

/// A weighted place a route may start from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteOrigin {
    /// Where the route starts.
    pub location: Location,
    /// Extra cost of starting here.
    pub cost: Cost,
}

/// Result of a line-of-sight test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineOfSight {
    /// Nothing in the way.
    Clear,
    /// Blocked, by the given object when one is known.
    Blocked(Option<ObjectId>),
}

/// One route computation: any origin to any goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    /// Candidate start points.
    pub origins: Vec<RouteOrigin>,
    /// Candidate end points.
    pub goals: Vec<RoutingGoal>,
}

/// Handle for an outstanding route request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteTicket(pub u64);

/// A computed route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    /// Index of the chosen origin in the request.
    pub origin: usize,
    /// Index of the chosen goal in the request.
    pub goal: usize,
    /// Points to walk through, origin first, goal last.
    pub waypoints: Vec<Location>,
    /// Planar length walked, in metres.
    pub length: f64,
    /// Cost of walking the route, excluding origin and goal costs.
    pub cost: Cost,
}

impl RoutePlan {
    /// Zero-length route standing at `location`.
    pub fn stationary(location: Location) -> Self {
        Self {
            origin: 0,
            goal: 0,
            waypoints: vec![location],
            length: 0.0,
            cost: Cost::ZERO,
        }
    }

    /// Where the route ends.
    pub fn end(&self) -> Option<Location> {
        self.waypoints.last().copied()
    }

    /// Where the route starts.
    pub fn start(&self) -> Option<Location> {
        self.waypoints.first().copied()
    }
}

/// State of a submitted route request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouteOutcome {
    /// Still computing.
    Pending,
    /// A route was found.
    Found(RoutePlan),
    /// No goal is reachable from any origin.
    NotFound,
}

/// Spatial capabilities the planner consumes.
pub trait Router {
    /// Concrete goals inside `constraint`. `reference` is the point the
    /// goals are about (the anchor object's position), used to weight them.
    fn goals_for(&self, constraint: &SpatialConstraint, reference: Option<Location>) -> Vec<RoutingGoal>;

    /// Line of sight from `from` to `to`, ignoring `ignore`.
    fn line_of_sight(&self, from: &Location, to: &Location, ignore: Option<ObjectId>) -> LineOfSight;

    /// Cheap distance estimate in metres.
    fn estimate_distance(&self, from: &Location, to: &Location) -> f64;

    /// Start computing a route.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidRequest`] if the request has no
    /// origins or no goals.
    fn submit(&mut self, request: RouteRequest) -> Result<RouteTicket, RouterError>;

    /// Check on a submitted request. A finished request is forgotten once
    /// its outcome has been reported.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnknownTicket`] for a ticket that is not
    /// outstanding.
    fn poll(&mut self, ticket: RouteTicket) -> Result<RouteOutcome, RouterError>;

    /// Abandon a request. Unknown tickets are ignored.
    fn cancel(&mut self, ticket: RouteTicket);

    /// The world's obstacles changed.
    fn world_changed(&mut self, _world: &WorldState) {}
}
