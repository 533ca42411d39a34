//! Segment path finding.
//!
//! A plan is searched in segments joined at the two neutral markers:
//!
//! - **left**: from the agent's current node forward to the neutral marker
//!   with the same carry state, without picking up or putting down;
//! - **right**: backward from the destination nodes to a neutral marker,
//!   guided by a routing-distance heuristic to each node's anchor object;
//! - **middle**: when the item in hand at the left marker differs from the
//!   item the right segment needs, a put-down, a pick-up, or both;
//! - **complete**: when the agent is in a stationary posture, a direct
//!   search over stationary nodes of the same anchor that needs no route.
//!
//! Item choice for pick-up middles happens here as well, using memoized
//! router distance estimates from the agent's location.

use std::collections::{BTreeMap, BTreeSet};

use posture_graph::{NodeId, Placement, PostureGraph, ValidationContext, WorldState};
use posture_types::{
    AgentId, BodyCapabilities, CarrySpec, CarryTarget, Cost, Hand, Location, ObjectId,
    PostureKind, Region, SlotRef, SlotType, SpatialConstraint, StateSpec, VarBinding,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actor::PlanningActor;
use crate::config::PlannerConfig;
use crate::constraint::GoalConstraint;
use crate::failure::FailureReason;
use crate::router::{LineOfSight, Router};
use crate::search::{Direction, DistanceEstimator, GraphPath, PathStream, SearchSpace};

/// Spatial requirement of a routed middle segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddleRoute {
    /// Index into the middle path of the state entered after walking.
    pub at: usize,
    /// Where the agent must stand.
    pub constraint: SpatialConstraint,
    /// Object the agent must be able to see from there.
    pub anchor: Option<ObjectId>,
}

/// Connects the left marker to the right marker when the item in hand has
/// to change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiddleSegment {
    /// Left marker to right marker, in walking order.
    pub path: GraphPath,
    /// Item put down first, if any.
    pub dropped: Option<ObjectId>,
    /// Item picked up, if any.
    pub picked: Option<ObjectId>,
    /// Index in `path.nodes` where the pick-up part begins.
    pub pickup_start: usize,
    /// Bindings for the pick-up part (slot target of a slotted item).
    pub binding: VarBinding,
    /// Where the agent has to walk to pick up, if anywhere.
    pub route: Option<MiddleRoute>,
    /// Ranking surcharge for the item choice (storage preference).
    pub selection_cost: Cost,
}

impl MiddleSegment {
    /// Whether the middle needs its own route.
    pub const fn is_routed(&self) -> bool {
        self.route.is_some()
    }
}

/// One candidate decomposition of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentedPath {
    /// The agent's current node.
    pub source: NodeId,
    /// Whether `left` alone reaches the destination without routing.
    pub complete: bool,
    /// Source to left marker, or source to destination when complete.
    pub left: GraphPath,
    /// Bindings while on the left segment.
    pub left_binding: VarBinding,
    /// Item swap between the markers.
    pub middle: Option<MiddleSegment>,
    /// Right marker to destination.
    pub right: Option<GraphPath>,
    /// Bindings while on the right segment.
    pub binding: VarBinding,
    /// Destination node reached.
    pub destination: NodeId,
    /// Terminal cost of that destination.
    pub destination_cost: Cost,
}

impl SegmentedPath {
    /// Sum of every edge on every segment.
    pub fn edge_cost(&self) -> Cost {
        let mut cost = self.left.edge_cost;
        if let Some(middle) = &self.middle {
            cost = cost.saturating_add(middle.path.edge_cost);
        }
        if let Some(right) = &self.right {
            cost = cost.saturating_add(right.edge_cost);
        }
        cost
    }

    /// Edges plus terminal cost: everything but routes.
    pub fn fixed_cost(&self) -> Cost {
        self.edge_cost().saturating_add(self.destination_cost)
    }

    /// Search ranking: fixed cost, the right search's route estimate, and
    /// the item choice surcharge.
    pub fn ranking(&self) -> Cost {
        let estimate = self.right.as_ref().map_or(Cost::ZERO, |r| r.terminal_cost);
        let selection = self.middle.as_ref().map_or(Cost::ZERO, |m| m.selection_cost);
        self.fixed_cost().saturating_add(estimate).saturating_add(selection)
    }

    /// First node of the right segment after the marker; `None` when the
    /// right segment is the marker alone.
    pub fn right_entry(&self) -> Option<NodeId> {
        self.right.as_ref().and_then(|r| r.nodes.get(1).copied())
    }

    /// The right segment's marker.
    pub fn right_marker(&self) -> Option<NodeId> {
        self.right.as_ref().and_then(GraphPath::first)
    }

    /// Whether the middle needs a route of its own.
    pub fn has_routed_middle(&self) -> bool {
        self.middle.as_ref().is_some_and(MiddleSegment::is_routed)
    }
}

/// Everything the segment search produced for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segments {
    /// A route-free path, if the agent can reach a destination without
    /// standing up.
    pub complete: Option<SegmentedPath>,
    /// Routed candidates, best ranked first.
    pub candidates: Vec<SegmentedPath>,
}

// ---------------------------------------------------------------------------
// Search spaces
// ---------------------------------------------------------------------------

/// Forward toward one marker, never changing what is held.
struct LeftSpace<'a> {
    graph: &'a PostureGraph,
    capabilities: &'a BodyCapabilities,
    binding: VarBinding,
    target: NodeId,
}

impl SearchSpace for LeftSpace<'_> {
    fn neighbors(&mut self, node: NodeId) -> Vec<(NodeId, Cost)> {
        let ctx = ValidationContext {
            capabilities: self.capabilities,
            binding: &self.binding,
        };
        let empty = BTreeSet::new();
        self.graph
            .successors_or(node, &empty)
            .iter()
            .filter_map(|next| {
                let edge = self.graph.edge(node, *next)?;
                (!edge.changes_carry() && edge.validate(&ctx)).then_some((*next, edge.cost))
            })
            .collect()
    }

    fn terminal(&mut self, node: NodeId, _from: Option<NodeId>) -> Option<Cost> {
        (node == self.target).then_some(Cost::ZERO)
    }
}

/// Forward over stationary nodes of one anchor, ending at a destination.
struct CompleteSpace<'a> {
    graph: &'a PostureGraph,
    capabilities: &'a BodyCapabilities,
    binding: VarBinding,
    body_target: Option<ObjectId>,
    destinations: &'a BTreeMap<NodeId, Cost>,
    pickup_reachable: bool,
}

impl SearchSpace for CompleteSpace<'_> {
    fn neighbors(&mut self, node: NodeId) -> Vec<(NodeId, Cost)> {
        let ctx = ValidationContext {
            capabilities: self.capabilities,
            binding: &self.binding,
        };
        let empty = BTreeSet::new();
        self.graph
            .successors_or(node, &empty)
            .iter()
            .filter_map(|next| {
                let spec = self.graph.spec(*next)?;
                if !spec.is_stationary() || spec.body.target != self.body_target {
                    return None;
                }
                let edge = self.graph.edge(node, *next)?;
                if edge.picks_up() && !self.pickup_reachable {
                    return None;
                }
                edge.validate(&ctx).then_some((*next, edge.cost))
            })
            .collect()
    }

    fn terminal(&mut self, node: NodeId, _from: Option<NodeId>) -> Option<Cost> {
        self.destinations.get(&node).copied()
    }
}

/// Backward from destinations to an allowed marker.
struct RightSpace<'a, 'r, R: ?Sized> {
    graph: &'a PostureGraph,
    capabilities: &'a BodyCapabilities,
    binding: VarBinding,
    empty_marker: bool,
    carrying_marker: bool,
    estimator: DistanceEstimator<'r, R>,
    cost_per_metre: f64,
    slack: f64,
}

impl<R: Router + ?Sized> RightSpace<'_, '_, R> {
    fn marker_allowed(&self, node: NodeId) -> bool {
        (node == self.graph.neutral() && self.empty_marker)
            || (node == self.graph.neutral_carrying() && self.carrying_marker)
    }

    fn anchor_distance(&mut self, node: NodeId) -> Option<f64> {
        let anchor = self.graph.spec(node)?.anchor()?;
        self.estimator.to_object(anchor)
    }
}

impl<R: Router + ?Sized> SearchSpace for RightSpace<'_, '_, R> {
    fn neighbors(&mut self, node: NodeId) -> Vec<(NodeId, Cost)> {
        let ctx = ValidationContext {
            capabilities: self.capabilities,
            binding: &self.binding,
        };
        let empty = BTreeSet::new();
        self.graph
            .predecessors_or(node, &empty)
            .iter()
            .filter_map(|prev| {
                if self.graph.is_neutral(*prev) && !self.marker_allowed(*prev) {
                    return None;
                }
                let edge = self.graph.edge(*prev, node)?;
                (!edge.picks_up() && edge.validate(&ctx)).then_some((*prev, edge.cost))
            })
            .collect()
    }

    fn heuristic(&mut self, node: NodeId) -> Cost {
        if self.graph.is_neutral(node) {
            return Cost::ZERO;
        }
        self.anchor_distance(node).map_or(Cost::ZERO, |d| {
            Cost::new((d - self.slack).max(0.0) * self.cost_per_metre)
        })
    }

    fn terminal(&mut self, node: NodeId, from: Option<NodeId>) -> Option<Cost> {
        if !self.graph.is_neutral(node) {
            return None;
        }
        if !self.marker_allowed(node) {
            return None;
        }
        let estimate = from
            .and_then(|f| self.anchor_distance(f))
            .map_or(Cost::ZERO, |d| Cost::new(d * self.cost_per_metre));
        Some(estimate)
    }
}

/// Between the markers: pick up and/or put down, optionally via one surface
/// at a given slot type.
struct MarkerSpace<'a> {
    graph: &'a PostureGraph,
    capabilities: &'a BodyCapabilities,
    binding: VarBinding,
    target: NodeId,
    allow_pickup: bool,
    allow_putdown: bool,
    via_surface: Option<(ObjectId, SlotType)>,
}

impl MarkerSpace<'_> {
    fn node_allowed(&self, node: NodeId) -> bool {
        if self.graph.is_neutral(node) {
            return true;
        }
        let (Some((surface, _)), Some(spec)) = (self.via_surface, self.graph.spec(node)) else {
            return false;
        };
        spec.body.posture == PostureKind::Stand
            && spec.body.target.is_none()
            && spec.surface.is_some_and(|s| s.target == surface)
    }

    fn pickup_allowed_from(&self, node: NodeId) -> bool {
        if !self.allow_pickup {
            return false;
        }
        match self.via_surface {
            None => true,
            Some((surface, slot_type)) => self.graph.spec(node).is_some_and(|spec| {
                spec.surface
                    .is_some_and(|s| s.target == surface && s.slot_type == Some(slot_type))
            }),
        }
    }
}

impl SearchSpace for MarkerSpace<'_> {
    fn neighbors(&mut self, node: NodeId) -> Vec<(NodeId, Cost)> {
        let ctx = ValidationContext {
            capabilities: self.capabilities,
            binding: &self.binding,
        };
        let empty = BTreeSet::new();
        self.graph
            .successors_or(node, &empty)
            .iter()
            .filter_map(|next| {
                if !self.node_allowed(*next) {
                    return None;
                }
                let edge = self.graph.edge(node, *next)?;
                if edge.picks_up() && !self.pickup_allowed_from(node) {
                    return None;
                }
                if edge.puts_down() && !self.allow_putdown {
                    return None;
                }
                edge.validate(&ctx).then_some((*next, edge.cost))
            })
            .collect()
    }

    fn terminal(&mut self, node: NodeId, _from: Option<NodeId>) -> Option<Cost> {
        (node == self.target).then_some(Cost::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Finder
// ---------------------------------------------------------------------------

/// Where a pick-up item is and how to get at it.
#[derive(Debug, Clone, Copy)]
enum ItemAccess {
    /// In the agent's own inventory or hand.
    Personal,
    /// Loose, at a location.
    Loose(Location),
    /// In a surface slot.
    Slotted(SlotRef, SlotType, Location),
    /// Inside a storage object.
    Stored(ObjectId, Location),
}

/// What is in hand at the left marker before a pick-up middle.
#[derive(Debug, Clone, Copy)]
enum Hands {
    Empty,
    /// Holding something, possibly not yet bound to an object.
    Holding(Option<ObjectId>),
}

/// Runs the segment searches for one request.
pub struct SegmentFinder<'a, R: ?Sized> {
    graph: &'a PostureGraph,
    world: &'a WorldState,
    router: &'a R,
    config: &'a PlannerConfig,
    constraint: &'a GoalConstraint,
    capabilities: &'a BodyCapabilities,
    agent: AgentId,
    hand: Hand,
    state: StateSpec,
    location: Location,
    source: NodeId,
}

impl<'a, R: Router + ?Sized> SegmentFinder<'a, R> {
    /// Finder for `actor`, whose current node is `source`.
    pub fn new<A: PlanningActor + ?Sized>(
        graph: &'a PostureGraph,
        world: &'a WorldState,
        router: &'a R,
        config: &'a PlannerConfig,
        actor: &'a A,
        constraint: &'a GoalConstraint,
        source: NodeId,
    ) -> Self {
        Self {
            graph,
            world,
            router,
            config,
            constraint,
            capabilities: actor.capabilities(),
            agent: actor.id(),
            hand: actor.hand(),
            state: actor.state(),
            location: actor.location(),
            source,
        }
    }

    /// Destination nodes with their terminal costs: nodes matching any
    /// destination pattern and touching the goal geometry.
    pub fn destinations(&self) -> BTreeMap<NodeId, Cost> {
        let in_geometry = self
            .graph
            .nodes_matching_constraint_geometry(&self.constraint.geometry);
        let mut found: BTreeMap<NodeId, Cost> = BTreeMap::new();
        for destination in &self.constraint.destinations {
            for node in self.graph.nodes_matching(&destination.pattern) {
                if !in_geometry.contains(&node) {
                    continue;
                }
                found
                    .entry(node)
                    .and_modify(|c| *c = (*c).min(destination.cost))
                    .or_insert(destination.cost);
            }
        }
        found
    }

    /// Run every segment search.
    ///
    /// # Errors
    ///
    /// Returns [`FailureReason::NoDestinationNode`] when no node satisfies
    /// the goal, and [`FailureReason::NoRouteFound`] when the agent cannot
    /// get back to a neutral marker.
    pub fn find(&self) -> Result<Segments, FailureReason> {
        let destinations = self.destinations();
        if destinations.is_empty() {
            return Err(FailureReason::NoDestinationNode);
        }
        let mut estimator = DistanceEstimator::new(self.router, self.world, self.location);
        let carried = self.carried();
        let right_item = self.right_item(&mut estimator, carried);

        let complete = if self.state.is_stationary() {
            self.complete(&destinations, carried, right_item)
        } else {
            None
        };

        let left_binding = self.base_binding().with_carry_target(carried);
        let Some(left) = self.left(left_binding) else {
            debug!(source = %self.source, "no path back to a neutral marker");
            return match complete {
                Some(path) => Ok(Segments {
                    complete: Some(path),
                    candidates: Vec::new(),
                }),
                None => Err(FailureReason::NoRouteFound),
            };
        };

        let right_binding = self.base_binding().with_carry_target(right_item);
        let rights = self.right(&destinations, right_binding, right_item.is_some(), estimator);
        let mut candidates = Vec::new();
        for right in rights {
            let Some(candidate) = self.assemble(&left, left_binding, right, right_binding, carried, right_item)
            else {
                continue;
            };
            candidates.push(candidate);
        }
        candidates.sort_by_key(SegmentedPath::ranking);
        debug!(
            source = %self.source,
            destinations = destinations.len(),
            candidates = candidates.len(),
            complete = complete.is_some(),
            "segment search finished"
        );
        Ok(Segments {
            complete,
            candidates,
        })
    }

    const fn base_binding(&self) -> VarBinding {
        VarBinding {
            carry_target: None,
            hand: self.hand,
            slot_type: self.constraint.slot_type,
            slot_target: None,
            interaction_target: self.constraint.interaction_target,
        }
    }

    const fn carried(&self) -> Option<ObjectId> {
        match self.state.carry {
            CarrySpec::Holding(CarryTarget::Object(item)) => Some(item),
            CarrySpec::Nothing | CarrySpec::Holding(CarryTarget::Variable) => None,
        }
    }

    /// Item the right segment holds at its marker: the agent's own item if
    /// it satisfies the goal (or the goal names none), else the best
    /// candidate for the carry requirement.
    fn right_item<E: Router + ?Sized>(
        &self,
        estimator: &mut DistanceEstimator<'_, E>,
        carried: Option<ObjectId>,
    ) -> Option<ObjectId> {
        let Some(requirement) = &self.constraint.carry else {
            return carried;
        };
        if let Some(item) = carried
            && requirement.accepts(self.world, item)
        {
            return Some(item);
        }
        self.constraint
            .carry_candidates(self.world, self.agent)
            .into_iter()
            .filter_map(|item| {
                let access = self.access(item)?;
                let score = self.access_score(estimator, access)?;
                Some((score, item))
            })
            .min_by_key(|(score, _)| *score)
            .map(|(_, item)| item)
    }

    fn access(&self, item: ObjectId) -> Option<ItemAccess> {
        let object = self.world.get(item)?;
        match object.placement {
            Placement::Inventory(agent) | Placement::Carried(agent) => {
                (agent == self.agent).then_some(ItemAccess::Personal)
            }
            Placement::Slot(slot) => {
                let slot_type = self.world.slot(slot)?.slot_type;
                Some(ItemAccess::Slotted(slot, slot_type, self.world.slot_location(slot)?))
            }
            Placement::Stored(container) => {
                let front = self
                    .world
                    .front_of(container, self.config.handles.approach_offset)?;
                Some(ItemAccess::Stored(container, front))
            }
            Placement::World(_) | Placement::Part { .. } => {
                Some(ItemAccess::Loose(self.world.location_of(item)?))
            }
        }
    }

    fn access_score<E: Router + ?Sized>(
        &self,
        estimator: &mut DistanceEstimator<'_, E>,
        access: ItemAccess,
    ) -> Option<Cost> {
        let per_metre = self.config.routing.cost_per_metre;
        match access {
            ItemAccess::Personal => Some(Cost::ZERO),
            ItemAccess::Loose(at) | ItemAccess::Slotted(_, _, at) => {
                Some(Cost::new(estimator.to_location(&at) * per_metre))
            }
            ItemAccess::Stored(container, _) => estimator.to_object(container).map(|d| {
                Cost::new(d * per_metre).saturating_add(Cost::new(self.config.search.storage_penalty))
            }),
        }
    }

    /// Whether the agent can take `item` without standing up.
    fn reachable_in_place(&self, item: ObjectId) -> bool {
        let body_target = self.state.body.target;
        let linked = body_target
            .and_then(|t| self.world.get(t))
            .and_then(|o| o.linked_surface);
        match self.world.get(item).map(|o| o.placement) {
            Some(Placement::Inventory(agent) | Placement::Carried(agent)) => agent == self.agent,
            Some(Placement::Slot(slot)) => {
                Some(slot.object) == body_target || Some(slot.object) == linked || self.within_reach(item)
            }
            Some(Placement::World(_) | Placement::Part { .. }) => self.within_reach(item),
            Some(Placement::Stored(_)) | None => false,
        }
    }

    fn within_reach(&self, item: ObjectId) -> bool {
        let Some(at) = self.world.location_of(item) else {
            return false;
        };
        at.floor == self.location.floor
            && at.planar_distance(&self.location) <= self.config.search.pickup_reach
            && self.router.line_of_sight(&self.location, &at, Some(item)) == LineOfSight::Clear
    }

    fn complete(
        &self,
        destinations: &BTreeMap<NodeId, Cost>,
        carried: Option<ObjectId>,
        right_item: Option<ObjectId>,
    ) -> Option<SegmentedPath> {
        let item = carried.or(right_item);
        let pickup_reachable = carried.is_none() && item.is_some_and(|i| self.reachable_in_place(i));
        let binding = self.base_binding().with_carry_target(item);
        let space = CompleteSpace {
            graph: self.graph,
            capabilities: self.capabilities,
            binding,
            body_target: self.state.body.target,
            destinations,
            pickup_reachable,
        };
        let mut stream = PathStream::new(
            space,
            Direction::Forward,
            &[(self.source, Cost::ZERO)],
            self.config.search.max_visits_per_node,
        );
        let path = stream.next()?;
        let destination = path.last()?;
        let destination_cost = path.terminal_cost;
        Some(SegmentedPath {
            source: self.source,
            complete: true,
            left: path,
            left_binding: binding,
            middle: None,
            right: None,
            binding,
            destination,
            destination_cost,
        })
    }

    fn left(&self, binding: VarBinding) -> Option<GraphPath> {
        let target = self.graph.neutral_for(self.state.is_carrying());
        if self.source == target {
            return Some(GraphPath::single(target));
        }
        let space = LeftSpace {
            graph: self.graph,
            capabilities: self.capabilities,
            binding,
            target,
        };
        PathStream::new(
            space,
            Direction::Forward,
            &[(self.source, Cost::ZERO)],
            self.config.search.max_visits_per_node,
        )
        .next()
    }

    fn right(
        &self,
        destinations: &BTreeMap<NodeId, Cost>,
        binding: VarBinding,
        item_known: bool,
        estimator: DistanceEstimator<'_, R>,
    ) -> Vec<GraphPath> {
        let roots: Vec<(NodeId, Cost)> = destinations.iter().map(|(n, c)| (*n, *c)).collect();
        let space = RightSpace {
            graph: self.graph,
            capabilities: self.capabilities,
            binding,
            empty_marker: self.constraint.carry.is_none(),
            carrying_marker: item_known,
            estimator,
            cost_per_metre: self.config.routing.cost_per_metre,
            slack: self.config.search.heuristic_slack,
        };
        PathStream::new(
            space,
            Direction::Reverse,
            &roots,
            self.config.search.max_visits_per_node,
        )
        .take(self.config.search.max_candidates)
        .collect()
    }

    fn assemble(
        &self,
        left: &GraphPath,
        left_binding: VarBinding,
        right: GraphPath,
        right_binding: VarBinding,
        carried: Option<ObjectId>,
        right_item: Option<ObjectId>,
    ) -> Option<SegmentedPath> {
        let left_marker = left.last()?;
        let right_marker = right.first()?;
        let destination = right.last()?;
        let left_carrying = left_marker == self.graph.neutral_carrying();
        let right_carrying = right_marker == self.graph.neutral_carrying();
        let right_binding = if right_carrying {
            right_binding
        } else {
            right_binding.with_carry_target(None)
        };

        let middle = match (left_carrying, right_carrying) {
            (false, false) => None,
            (true, true) if carried.is_some() && carried == right_item => None,
            (true, false) => Some(self.put_down_middle(carried)?),
            (false, true) => Some(self.pick_up_middle(right_item?, Hands::Empty)?),
            (true, true) => Some(self.pick_up_middle(right_item?, Hands::Holding(carried))?),
        };

        Some(SegmentedPath {
            source: self.source,
            complete: false,
            left: left.clone(),
            left_binding,
            middle,
            destination_cost: right.root_cost,
            right: Some(right),
            binding: right_binding,
            destination,
        })
    }

    fn marker_path(
        &self,
        from: NodeId,
        to: NodeId,
        binding: VarBinding,
        pickup: bool,
        via_surface: Option<(ObjectId, SlotType)>,
    ) -> Option<GraphPath> {
        let space = MarkerSpace {
            graph: self.graph,
            capabilities: self.capabilities,
            binding,
            target: to,
            allow_pickup: pickup,
            allow_putdown: !pickup,
            via_surface,
        };
        PathStream::new(
            space,
            Direction::Forward,
            &[(from, Cost::ZERO)],
            self.config.search.max_visits_per_node,
        )
        .next()
    }

    fn put_down_middle(&self, dropped: Option<ObjectId>) -> Option<MiddleSegment> {
        let binding = self.base_binding().with_carry_target(dropped);
        let path = self.marker_path(
            self.graph.neutral_carrying(),
            self.graph.neutral(),
            binding,
            false,
            None,
        )?;
        let pickup_start = path.len();
        Some(MiddleSegment {
            path,
            dropped,
            picked: None,
            pickup_start,
            binding,
            route: None,
            selection_cost: Cost::ZERO,
        })
    }

    /// Pick up `item`, first putting down whatever is in hand.
    fn pick_up_middle(&self, item: ObjectId, hands: Hands) -> Option<MiddleSegment> {
        let access = self.access(item)?;
        let reach = self.config.search.pickup_reach;
        let (via_surface, slot, route) = match access {
            ItemAccess::Personal => (None, None, None),
            ItemAccess::Loose(at) => (None, None, Some((circle(at, reach), Some(item)))),
            ItemAccess::Slotted(slot, slot_type, at) => (
                Some((slot.object, slot_type)),
                Some(slot),
                Some((circle(at, reach), Some(slot.object))),
            ),
            ItemAccess::Stored(container, front) => (
                None,
                None,
                Some((circle(front, self.config.handles.approach_radius), Some(container))),
            ),
        };
        let binding = self
            .base_binding()
            .with_carry_target(Some(item))
            .with_slot_target(slot);
        let pickup = self.marker_path(
            self.graph.neutral(),
            self.graph.neutral_carrying(),
            binding,
            true,
            via_surface,
        )?;

        let (path, dropped, pickup_start) = match hands {
            Hands::Empty => (pickup, None, 0),
            Hands::Holding(dropped) => {
                let first = self.put_down_middle(dropped)?.path;
                let start = first.len();
                (join(first, &pickup), dropped, start)
            }
        };
        let selection_cost = match access {
            ItemAccess::Stored(..) => Cost::new(self.config.search.storage_penalty),
            ItemAccess::Personal | ItemAccess::Loose(_) | ItemAccess::Slotted(..) => Cost::ZERO,
        };
        Some(MiddleSegment {
            path,
            dropped,
            picked: Some(item),
            pickup_start,
            binding,
            route: route.map(|(constraint, anchor)| MiddleRoute {
                at: pickup_start.saturating_add(1),
                constraint,
                anchor,
            }),
            selection_cost,
        })
    }
}

fn circle(at: Location, radius: f64) -> SpatialConstraint {
    SpatialConstraint::new(at.floor, Region::circle(at.position, radius))
}

/// Concatenate two paths sharing a join node.
fn join(first: GraphPath, second: &GraphPath) -> GraphPath {
    let mut nodes = first.nodes;
    nodes.extend(second.nodes.iter().skip(1).copied());
    GraphPath {
        nodes,
        edge_cost: first.edge_cost.saturating_add(second.edge_cost),
        root_cost: first.root_cost,
        terminal_cost: second.terminal_cost,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use posture_graph::{GraphConfig, GraphMaintainer, WorldObject};
    use posture_types::{PostureKind, Region, StateSpec, Vec2};

    use super::*;
    use crate::actor::ActorSnapshot;
    use crate::constraint::CarryRequirement;
    use crate::grid::GridRouter;

    struct Zone {
        world: WorldState,
        maintainer: GraphMaintainer,
        config: PlannerConfig,
    }

    impl Zone {
        fn new(objects: Vec<WorldObject>) -> Self {
            let mut world = WorldState::new();
            for object in objects {
                world.add_object(object).unwrap();
            }
            let mut maintainer = GraphMaintainer::new(GraphConfig::default());
            maintainer.rebuild(&world).unwrap();
            Self {
                world,
                maintainer,
                config: PlannerConfig::default(),
            }
        }

        fn find(&self, actor: &ActorSnapshot, goal: &GoalConstraint) -> Result<Segments, FailureReason> {
            let router = GridRouter::new(&self.world, &self.config.router, 1.0, 20.0);
            let graph = self.maintainer.graph();
            let source = graph.node_for(&actor.state).unwrap();
            SegmentFinder::new(graph, &self.world, &router, &self.config, actor, goal, source).find()
        }
    }

    fn chair(x: f64) -> WorldObject {
        WorldObject::new("chair", Placement::World(Location::new(x, 0.0, 0))).with_posture(PostureKind::Sit)
    }

    #[test]
    fn goal_outside_the_geometry_has_no_destination() {
        let seat = chair(2.0);
        let id = seat.id;
        let zone = Zone::new(vec![seat]);
        let far = SpatialConstraint::new(0, Region::circle(Vec2::new(15.0, 15.0), 1.0));
        let goal = GoalConstraint::posture_on(PostureKind::Sit, id).within(far);
        let actor = ActorSnapshot::standing_at(Location::new(0.0, 0.0, 0));

        assert_eq!(zone.find(&actor, &goal).unwrap_err(), FailureReason::NoDestinationNode);
    }

    #[test]
    fn standing_agent_gets_a_routed_candidate() {
        let seat = chair(2.0);
        let id = seat.id;
        let zone = Zone::new(vec![seat]);
        let goal = GoalConstraint::posture_on(PostureKind::Sit, id);
        let actor = ActorSnapshot::standing_at(Location::new(0.0, 0.0, 0));

        let segments = zone.find(&actor, &goal).unwrap();

        assert!(segments.complete.is_none());
        let best = segments.candidates.first().unwrap();
        let seated = zone
            .maintainer
            .graph()
            .node_for(&StateSpec::posed(PostureKind::Sit, id))
            .unwrap();
        assert_eq!(best.destination, seated);
        assert_eq!(best.right_entry(), Some(seated));
        assert!(best.middle.is_none());
        assert_eq!(best.left.nodes, vec![zone.maintainer.graph().neutral()]);
    }

    #[test]
    fn seated_agent_already_there_has_a_complete_path() {
        let seat = chair(2.0);
        let id = seat.id;
        let zone = Zone::new(vec![seat]);
        let goal = GoalConstraint::posture_on(PostureKind::Sit, id);
        let actor = ActorSnapshot::standing_at(Location::new(2.0, 0.0, 0))
            .in_state(StateSpec::posed(PostureKind::Sit, id));

        let segments = zone.find(&actor, &goal).unwrap();

        let complete = segments.complete.unwrap();
        assert!(complete.complete);
        assert!(complete.left.is_empty());
        assert_eq!(complete.left.nodes.len(), 1);
        assert_eq!(complete.fixed_cost(), Cost::ZERO);
    }

    #[test]
    fn fetching_a_loose_item_adds_a_routed_pickup_middle() {
        let cup = WorldObject::new("cup", Placement::World(Location::new(3.0, 0.0, 0)))
            .as_carryable()
            .with_tag("cup");
        let cup_id = cup.id;
        let zone = Zone::new(vec![cup]);
        let area = SpatialConstraint::new(0, Region::circle(Vec2::new(-3.0, 0.0), 1.0));
        let goal = GoalConstraint::carry_to(CarryRequirement::Tagged("cup".to_owned()), area);
        let actor = ActorSnapshot::standing_at(Location::new(0.0, 0.0, 0));

        let segments = zone.find(&actor, &goal).unwrap();

        let best = segments.candidates.first().unwrap();
        assert_eq!(best.right_marker(), Some(zone.maintainer.graph().neutral_carrying()));
        let middle = best.middle.as_ref().unwrap();
        assert_eq!(middle.picked, Some(cup_id));
        assert_eq!(middle.dropped, None);
        assert_eq!(middle.pickup_start, 0);
        let route = middle.route.as_ref().unwrap();
        assert_eq!(route.anchor, Some(cup_id));
        assert!(route.constraint.contains(&Location::new(3.0, 0.0, 0)));
        assert!(best.has_routed_middle());
    }
}
