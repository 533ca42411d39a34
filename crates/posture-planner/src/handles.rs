//! Connectivity handles: segment endpoints turned into routable goals.
//!
//! Every routed candidate gets a source handle (where the agent starts
//! walking), a destination handle (where it must stand to enter the right
//! segment), and, for pick-ups away from the agent, a middle handle. Each
//! handle resolves its spatial constraint, intersects it with the goal
//! geometry where the endpoint is a free-standing state, asks the router for
//! goals, and files goals without line of sight to the anchor separately
//! together with the object in the way.

use posture_graph::{NodeId, PostureGraph, WorldState};
use posture_types::{Cost, Location, ObjectId, Region, SpatialConstraint, StateSpec};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actor::PlanningActor;
use crate::config::PlannerConfig;
use crate::constraint::GoalConstraint;
use crate::failure::FailureReason;
use crate::router::{LineOfSight, Router, RoutingGoal};
use crate::segment::{SegmentedPath, Segments};

/// A goal that failed a line-of-sight check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockedGoal {
    /// The goal, with its shaped cost.
    pub goal: RoutingGoal,
    /// What blocks the view.
    pub blocker: ObjectId,
}

/// Spatial goals for one segment endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityHandle {
    /// The endpoint node, if the handle belongs to one.
    pub node: Option<NodeId>,
    /// Object the endpoint is about.
    pub anchor: Option<ObjectId>,
    /// Resolved spatial constraints; a goal may lie in any of them.
    pub constraints: Vec<SpatialConstraint>,
    /// Valid goals, shaped so the cheapest costs zero.
    pub goals: Vec<RoutingGoal>,
    /// Goals that lack line of sight, shaped the same way.
    pub blocked: Vec<BlockedGoal>,
    /// Whether any location will do; the route then ends where it starts.
    pub anywhere: bool,
}

impl ConnectivityHandle {
    /// Handle with a single goal at `location`.
    pub fn at(location: Location) -> Self {
        Self {
            node: None,
            anchor: None,
            constraints: vec![SpatialConstraint::new(location.floor, Region::circle(location.position, 0.0))],
            goals: vec![RoutingGoal::new(location, Cost::ZERO)],
            blocked: Vec::new(),
            anywhere: false,
        }
    }

    /// The cheapest valid goal.
    pub fn best_goal(&self) -> Option<&RoutingGoal> {
        self.goals.iter().min_by_key(|g| g.cost)
    }

    /// The cheapest blocked goal.
    pub fn best_blocked(&self) -> Option<&BlockedGoal> {
        self.blocked.iter().min_by_key(|b| b.goal.cost)
    }

    /// Whether the handle can be routed to.
    pub fn is_routable(&self) -> bool {
        self.anywhere || !self.goals.is_empty()
    }
}

/// Handles for one routed candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateHandles {
    /// The segmented path the handles belong to.
    pub path: SegmentedPath,
    /// Where the agent starts walking.
    pub source: ConnectivityHandle,
    /// Where the agent picks up, for routed middles.
    pub middle: Option<ConnectivityHandle>,
    /// Where the agent enters the right segment.
    pub destination: ConnectivityHandle,
}

/// Handle sets for every candidate of one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Connectivity {
    /// The route-free path, if any.
    pub complete: Option<SegmentedPath>,
    /// Routed candidates, best ranked first.
    pub candidates: Vec<CandidateHandles>,
}

/// Builds connectivity handles for one request.
pub struct HandleGenerator<'a, R: ?Sized> {
    graph: &'a PostureGraph,
    world: &'a WorldState,
    router: &'a R,
    config: &'a PlannerConfig,
    constraint: &'a GoalConstraint,
}

impl<'a, R: Router + ?Sized> HandleGenerator<'a, R> {
    /// Generator over the given collaborators.
    pub const fn new(
        graph: &'a PostureGraph,
        world: &'a WorldState,
        router: &'a R,
        config: &'a PlannerConfig,
        constraint: &'a GoalConstraint,
    ) -> Self {
        Self {
            graph,
            world,
            router,
            config,
            constraint,
        }
    }

    /// Handles for every candidate in `segments`.
    ///
    /// Candidates touching an object the actor may not reserve are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::NoValidIntersection`] when no complete path
    /// exists and every candidate's endpoint constraint misses the goal
    /// geometry, or [`FailureReason::NoDestinationNode`] when every
    /// candidate's anchor object is gone from the world.
    pub fn connectivity<A: PlanningActor + ?Sized>(
        &self,
        actor: &A,
        segments: Segments,
    ) -> Result<Connectivity, FailureReason> {
        let complete = segments
            .complete
            .filter(|path| self.may_reserve_path(actor, path));
        let source = self.source_handle(actor);
        let mut candidates = Vec::new();
        let mut missed = 0_usize;
        let mut vanished = 0_usize;
        for path in segments.candidates {
            if !self.may_reserve_path(actor, &path) {
                debug!(destination = %path.destination, "candidate touches a forbidden object");
                continue;
            }
            let destination = match self.destination_handle(&path, &source) {
                Ok(handle) => handle,
                Err(reason) => {
                    debug!(destination = %path.destination, %reason, "candidate has no goals");
                    missed = missed.saturating_add(1);
                    if reason == FailureReason::NoDestinationNode {
                        vanished = vanished.saturating_add(1);
                    }
                    continue;
                }
            };
            let middle = path
                .middle
                .as_ref()
                .and_then(|m| m.route.as_ref())
                .map(|route| {
                    let reference = route
                        .anchor
                        .and_then(|a| self.world.location_of(a));
                    self.handle(None, route.anchor, vec![route.constraint.clone()], reference, false)
                });
            candidates.push(CandidateHandles {
                path,
                source: source.clone(),
                middle,
                destination,
            });
        }
        if complete.is_none() && candidates.is_empty() && missed > 0 {
            if vanished == missed {
                return Err(FailureReason::NoDestinationNode);
            }
            return Err(FailureReason::NoValidIntersection);
        }
        Ok(Connectivity {
            complete,
            candidates,
        })
    }

    /// Where the agent starts walking: in front of its stationary anchor, or
    /// where it stands.
    pub fn source_handle<A: PlanningActor + ?Sized>(&self, actor: &A) -> ConnectivityHandle {
        let state = actor.state();
        let location = state
            .body
            .target
            .filter(|_| state.is_stationary())
            .and_then(|t| self.world.front_of(t, self.config.handles.approach_offset))
            .unwrap_or_else(|| actor.location());
        ConnectivityHandle::at(location)
    }

    fn may_reserve_path<A: PlanningActor + ?Sized>(&self, actor: &A, path: &SegmentedPath) -> bool {
        let nodes = path
            .right
            .as_ref()
            .map_or(path.left.nodes.as_slice(), |r| r.nodes.as_slice());
        nodes
            .iter()
            .filter_map(|n| self.graph.spec(*n))
            .flat_map(StateSpec::referenced_objects)
            .all(|object| actor.may_reserve(object))
    }

    fn destination_handle(
        &self,
        path: &SegmentedPath,
        source: &ConnectivityHandle,
    ) -> Result<ConnectivityHandle, FailureReason> {
        let entry = path.right_entry();
        let spec = entry.and_then(|n| self.graph.spec(n)).copied();
        let geometry = &self.constraint.geometry;

        let Some((constraint, anchor)) = spec.and_then(|s| self.endpoint_constraint(&s)) else {
            if spec.and_then(|s| s.anchor()).is_some() {
                return Err(FailureReason::NoDestinationNode);
            }
            if geometry.is_empty() {
                return Ok(ConnectivityHandle {
                    node: entry,
                    anchor: None,
                    constraints: Vec::new(),
                    goals: Vec::new(),
                    blocked: Vec::new(),
                    anywhere: true,
                });
            }
            let reference = source.best_goal().map(|g| g.location);
            return Ok(self.handle(entry, None, geometry.clone(), reference, true));
        };

        let free_standing = spec.is_some_and(|s| !s.is_stationary());
        let constraints = if free_standing && !geometry.is_empty() {
            let ring = self.config.router.sample_ring;
            let overlaps: Vec<SpatialConstraint> = geometry
                .iter()
                .filter_map(|g| constraint.intersect(g))
                .filter(|c| c.is_satisfiable(ring))
                .collect();
            if overlaps.is_empty() {
                return Err(FailureReason::NoValidIntersection);
            }
            overlaps
        } else {
            vec![constraint]
        };
        let reference = anchor.and_then(|a| self.world.location_of(a));
        Ok(self.handle(entry, anchor, constraints, reference, true))
    }

    /// The region an agent must stand in to enter `spec`, and the object it
    /// is about. `None` for states with no anchor.
    fn endpoint_constraint(&self, spec: &StateSpec) -> Option<(SpatialConstraint, Option<ObjectId>)> {
        let handles = &self.config.handles;
        if let Some(target) = spec.body.target {
            let front = self.world.front_of(target, handles.approach_offset)?;
            return Some((
                SpatialConstraint::new(front.floor, Region::circle(front.position, handles.approach_radius)),
                Some(target),
            ));
        }
        let surface = spec.surface?.target;
        let centre = self.world.location_of(surface)?;
        let half = self.world.get(surface)?.half_extents;
        let radius = half.x.max(half.y) + handles.reach_distance;
        Some((
            SpatialConstraint::new(centre.floor, Region::circle(centre.position, radius)),
            Some(surface),
        ))
    }

    /// Ask the router for goals and sort them by line of sight.
    fn handle(
        &self,
        node: Option<NodeId>,
        anchor: Option<ObjectId>,
        constraints: Vec<SpatialConstraint>,
        reference: Option<Location>,
        destination: bool,
    ) -> ConnectivityHandle {
        let anchor_at = anchor.and_then(|a| self.world.location_of(a).map(|l| (a, l)));
        let sight = if destination {
            self.constraint
                .line_of_sight
                .and_then(|o| self.world.location_of(o).map(|l| (o, l)))
        } else {
            None
        };

        let mut goals = Vec::new();
        let mut blocked = Vec::new();
        for constraint in &constraints {
            for mut goal in self.router.goals_for(constraint, reference) {
                goal.requires_los = anchor_at.is_some() || sight.is_some();
                match self.first_blocker(&goal.location, anchor_at, sight) {
                    Ok(()) => goals.push(goal),
                    Err(Some(blocker)) => blocked.push(BlockedGoal { goal, blocker }),
                    Err(None) => {}
                }
            }
        }
        shape(goals.iter_mut());
        shape(blocked.iter_mut().map(|b| &mut b.goal));
        debug!(
            anchor = ?anchor,
            goals = goals.len(),
            blocked = blocked.len(),
            "connectivity handle resolved"
        );
        ConnectivityHandle {
            node,
            anchor,
            constraints,
            goals,
            blocked,
            anywhere: false,
        }
    }

    /// `Ok` when every required view is clear; otherwise the blocker, if
    /// known.
    fn first_blocker(
        &self,
        from: &Location,
        anchor: Option<(ObjectId, Location)>,
        sight: Option<(ObjectId, Location)>,
    ) -> Result<(), Option<ObjectId>> {
        for (object, at) in [anchor, sight].into_iter().flatten() {
            if let LineOfSight::Blocked(blocker) = self.router.line_of_sight(from, &at, Some(object)) {
                return Err(blocker);
            }
        }
        Ok(())
    }
}

/// Shift goal costs so the cheapest is zero, preserving order.
fn shape<'g>(goals: impl Iterator<Item = &'g mut RoutingGoal>) {
    let goals: Vec<&mut RoutingGoal> = goals.collect();
    let Some(least) = goals.iter().map(|g| g.cost).min() else {
        return;
    };
    for goal in goals {
        goal.cost = goal.cost.saturating_sub(least);
    }
}
