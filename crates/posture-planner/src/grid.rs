//! Reference [`Router`] over a per-floor occupancy grid.
//!
//! Obstacle objects block every grid cell their footprint overlaps. Routes
//! are found with a multi-origin, multi-goal A* over 8-connected cells (no
//! corner cutting), with configured portals joining floors. Goal costs are
//! folded in by pushing a sink entry when a goal cell is settled, so the
//! first sink popped is the cheapest origin-to-goal combination overall.
//! Results are held back for a configurable number of polls to exercise the
//! planner's asynchronous path.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::SQRT_2;

use posture_graph::WorldState;
use posture_types::{Cost, Location, ObjectId, SpatialConstraint, Vec2};
use tracing::debug;

use crate::config::GridConfig;
use crate::error::RouterError;
use crate::router::{LineOfSight, RouteOutcome, RoutePlan, RouteRequest, RouteTicket, Router, RoutingGoal};

/// A grid cell: floor and integer coordinates.
type Cell = (i32, i64, i64);

/// 8-connected neighbour offsets.
const DIRECTIONS: [(i64, i64); 8] = [
    (1, 0),
    (-1, 0),
    (0, 1),
    (0, -1),
    (1, 1),
    (1, -1),
    (-1, 1),
    (-1, -1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Entry {
    Cell(Cell),
    Sink { goal: usize, cell: Cell },
}

#[derive(Debug, Clone)]
struct PendingRoute {
    remaining: u32,
    outcome: RouteOutcome,
}

/// Occupancy-grid router.
#[derive(Debug, Clone)]
pub struct GridRouter {
    config: GridConfig,
    cost_per_metre: f64,
    half_extent: f64,
    blocked: BTreeMap<Cell, ObjectId>,
    portals: BTreeMap<Cell, Vec<Cell>>,
    next_ticket: u64,
    pending: BTreeMap<u64, PendingRoute>,
}

impl GridRouter {
    /// Router over the obstacles of `world`, covering `half_extent` metres
    /// around the origin on every floor.
    pub fn new(world: &WorldState, config: &GridConfig, cost_per_metre: f64, half_extent: f64) -> Self {
        let mut router = Self {
            config: config.clone(),
            cost_per_metre,
            half_extent,
            blocked: BTreeMap::new(),
            portals: BTreeMap::new(),
            next_ticket: 1,
            pending: BTreeMap::new(),
        };
        for portal in &config.portals {
            let a = router.cell_of(&portal.from);
            let b = router.cell_of(&portal.to);
            router.portals.entry(a).or_default().push(b);
            router.portals.entry(b).or_default().push(a);
        }
        router.rebuild(world);
        router
    }

    /// Recompute blocked cells from the world's obstacles.
    pub fn rebuild(&mut self, world: &WorldState) {
        self.blocked.clear();
        let inset = Vec2::new(1e-6, 1e-6);
        for (id, floor, bounds) in world.obstacles() {
            let (_, x0, y0) = self.cell_of(&Location::at(bounds.min + inset, floor));
            let (_, x1, y1) = self.cell_of(&Location::at(bounds.max - inset, floor));
            for ix in x0..=x1 {
                for iy in y0..=y1 {
                    self.blocked.entry((floor, ix, iy)).or_insert(id);
                }
            }
        }
        debug!(cells = self.blocked.len(), "grid router obstacles rasterized");
    }

    /// Obstacle occupying the cell at `location`, if any.
    pub fn blocker_at(&self, location: &Location) -> Option<ObjectId> {
        self.blocked.get(&self.cell_of(location)).copied()
    }

    /// Requests submitted but not yet reported.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn cell_of(&self, location: &Location) -> Cell {
        let size = self.config.cell_size.max(0.01);
        (
            location.floor,
            (location.position.x / size).floor() as i64,
            (location.position.y / size).floor() as i64,
        )
    }

    #[allow(clippy::cast_precision_loss)]
    fn centre(&self, cell: Cell) -> Location {
        let size = self.config.cell_size.max(0.01);
        let (floor, ix, iy) = cell;
        Location::new((ix as f64 + 0.5) * size, (iy as f64 + 0.5) * size, floor)
    }

    fn in_bounds(&self, cell: Cell) -> bool {
        let c = self.centre(cell).position;
        c.x.abs() <= self.half_extent && c.y.abs() <= self.half_extent
    }

    fn is_open(&self, cell: Cell) -> bool {
        self.in_bounds(cell) && !self.blocked.contains_key(&cell)
    }

    fn step_cost(&self, diagonal: bool) -> Cost {
        let metres = if diagonal {
            self.config.cell_size * SQRT_2
        } else {
            self.config.cell_size
        };
        Cost::new(metres * self.cost_per_metre)
    }

    fn neighbours(&self, cell: Cell) -> Vec<(Cell, Cost)> {
        let (floor, x, y) = cell;
        let mut out = Vec::with_capacity(DIRECTIONS.len());
        for (dx, dy) in DIRECTIONS {
            let next = (floor, x.saturating_add(dx), y.saturating_add(dy));
            if !self.is_open(next) {
                continue;
            }
            let diagonal = dx != 0 && dy != 0;
            if diagonal
                && (!self.is_open((floor, x.saturating_add(dx), y))
                    || !self.is_open((floor, x, y.saturating_add(dy))))
            {
                continue;
            }
            out.push((next, self.step_cost(diagonal)));
        }
        if let Some(links) = self.portals.get(&cell) {
            let cost = Cost::new(self.config.floor_change_cost);
            out.extend(links.iter().filter(|c| self.is_open(**c)).map(|c| (*c, cost)));
        }
        out
    }

    fn heuristic(&self, cell: Cell, goals: &[RoutingGoal]) -> Cost {
        let here = self.centre(cell);
        goals
            .iter()
            .map(|g| {
                let floors = if g.location.floor == here.floor {
                    0.0
                } else {
                    self.config.floor_change_cost
                };
                Cost::new(here.planar_distance(&g.location) * self.cost_per_metre * 0.5 + floors)
                    .saturating_add(g.cost)
            })
            .min()
            .unwrap_or(Cost::ZERO)
    }

    /// Run the search synchronously.
    fn route(&self, request: &RouteRequest) -> RouteOutcome {
        let mut goal_cells: BTreeMap<Cell, Vec<usize>> = BTreeMap::new();
        for (index, goal) in request.goals.iter().enumerate() {
            let cell = self.cell_of(&goal.location);
            if self.is_open(cell) {
                goal_cells.entry(cell).or_default().push(index);
            }
        }
        if goal_cells.is_empty() {
            return RouteOutcome::NotFound;
        }

        let mut dist: BTreeMap<Cell, Cost> = BTreeMap::new();
        let mut prev: BTreeMap<Cell, Cell> = BTreeMap::new();
        let mut origin_of: BTreeMap<Cell, usize> = BTreeMap::new();
        let mut queue: BTreeSet<(Cost, Cost, u64, Entry)> = BTreeSet::new();
        let mut seq: u64 = 0;

        for (index, origin) in request.origins.iter().enumerate() {
            let cell = self.cell_of(&origin.location);
            if dist.get(&cell).is_some_and(|d| *d <= origin.cost) {
                continue;
            }
            dist.insert(cell, origin.cost);
            prev.remove(&cell);
            origin_of.insert(cell, index);
            let f = origin.cost.saturating_add(self.heuristic(cell, &request.goals));
            queue.insert((f, origin.cost, seq, Entry::Cell(cell)));
            seq = seq.saturating_add(1);
        }

        while let Some(first) = queue.pop_first() {
            let (_, g, _, entry) = first;
            let cell = match entry {
                Entry::Sink { goal, cell } => {
                    return self.reconstruct(request, &prev, &origin_of, cell, goal);
                }
                Entry::Cell(cell) => cell,
            };
            if dist.get(&cell).is_some_and(|d| *d < g) {
                continue;
            }
            if let Some(indices) = goal_cells.get(&cell) {
                for goal in indices {
                    let extra = request.goals.get(*goal).map_or(Cost::ZERO, |gl| gl.cost);
                    let total = g.saturating_add(extra);
                    queue.insert((total, total, seq, Entry::Sink { goal: *goal, cell }));
                    seq = seq.saturating_add(1);
                }
            }
            for (next, step) in self.neighbours(cell) {
                let candidate = g.saturating_add(step);
                if dist.get(&next).is_some_and(|d| *d <= candidate) {
                    continue;
                }
                dist.insert(next, candidate);
                prev.insert(next, cell);
                origin_of.remove(&next);
                let f = candidate.saturating_add(self.heuristic(next, &request.goals));
                queue.insert((f, candidate, seq, Entry::Cell(next)));
                seq = seq.saturating_add(1);
            }
        }
        RouteOutcome::NotFound
    }

    fn reconstruct(
        &self,
        request: &RouteRequest,
        prev: &BTreeMap<Cell, Cell>,
        origin_of: &BTreeMap<Cell, usize>,
        end: Cell,
        goal: usize,
    ) -> RouteOutcome {
        let mut cells = vec![end];
        let mut current = end;
        while let Some(p) = prev.get(&current) {
            if cells.len() > prev.len() {
                break;
            }
            cells.push(*p);
            current = *p;
        }
        cells.reverse();
        let Some(origin) = origin_of.get(&current).copied() else {
            return RouteOutcome::NotFound;
        };
        let (Some(start), Some(finish)) = (request.origins.get(origin), request.goals.get(goal)) else {
            return RouteOutcome::NotFound;
        };

        let mut waypoints = vec![start.location];
        let interior = cells.len().saturating_sub(1);
        waypoints.extend(cells.iter().skip(1).take(interior.saturating_sub(1)).map(|c| self.centre(*c)));
        waypoints.push(finish.location);

        let mut length = 0.0;
        let mut floor_changes: u32 = 0;
        for (a, b) in waypoints.iter().zip(waypoints.iter().skip(1)) {
            if a.floor == b.floor {
                length += a.planar_distance(b);
            } else {
                floor_changes = floor_changes.saturating_add(1);
            }
        }
        let cost = Cost::new(
            length * self.cost_per_metre + f64::from(floor_changes) * self.config.floor_change_cost,
        );
        RouteOutcome::Found(RoutePlan {
            origin,
            goal,
            waypoints,
            length,
            cost,
        })
    }
}

impl Router for GridRouter {
    fn goals_for(&self, constraint: &SpatialConstraint, reference: Option<Location>) -> Vec<RoutingGoal> {
        let samples = if constraint.is_unbounded() {
            reference
                .filter(|r| r.floor == constraint.floor)
                .into_iter()
                .collect()
        } else {
            constraint.sample_locations(self.config.sample_ring)
        };
        samples
            .into_iter()
            .filter(|l| self.is_open(self.cell_of(l)))
            .map(|location| RoutingGoal {
                location,
                cost: reference.map_or(Cost::ZERO, |r| {
                    Cost::new(location.planar_distance(&r) * self.config.goal_distance_weight)
                }),
                requires_los: reference.is_some(),
            })
            .collect()
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn line_of_sight(&self, from: &Location, to: &Location, ignore: Option<ObjectId>) -> LineOfSight {
        if from.floor != to.floor {
            return LineOfSight::Blocked(None);
        }
        let step = (self.config.cell_size * 0.5).max(0.01);
        let samples = (from.planar_distance(to) / step).ceil().max(1.0) as u32;
        let ends = [self.cell_of(from), self.cell_of(to)];
        for k in 1..samples {
            let t = f64::from(k) / f64::from(samples);
            let point = Location::at(from.position.lerp(to.position, t), from.floor);
            let cell = self.cell_of(&point);
            if ends.contains(&cell) {
                continue;
            }
            if let Some(blocker) = self.blocked.get(&cell)
                && Some(*blocker) != ignore
            {
                return LineOfSight::Blocked(Some(*blocker));
            }
        }
        LineOfSight::Clear
    }

    fn estimate_distance(&self, from: &Location, to: &Location) -> f64 {
        let floors = f64::from(from.floor.abs_diff(to.floor));
        from.planar_distance(to) + floors * self.config.floor_change_cost
    }

    fn submit(&mut self, request: RouteRequest) -> Result<RouteTicket, RouterError> {
        if request.origins.is_empty() {
            return Err(RouterError::InvalidRequest("no origins".to_owned()));
        }
        if request.goals.is_empty() {
            return Err(RouterError::InvalidRequest("no goals".to_owned()));
        }
        let outcome = self.route(&request);
        let ticket = RouteTicket(self.next_ticket);
        self.next_ticket = self.next_ticket.saturating_add(1);
        self.pending.insert(
            ticket.0,
            PendingRoute {
                remaining: self.config.latency_ticks,
                outcome,
            },
        );
        debug!(
            ticket = ticket.0,
            origins = request.origins.len(),
            goals = request.goals.len(),
            "route request submitted"
        );
        Ok(ticket)
    }

    fn poll(&mut self, ticket: RouteTicket) -> Result<RouteOutcome, RouterError> {
        let Some(pending) = self.pending.get_mut(&ticket.0) else {
            return Err(RouterError::UnknownTicket(ticket.0));
        };
        if pending.remaining > 0 {
            pending.remaining = pending.remaining.saturating_sub(1);
            return Ok(RouteOutcome::Pending);
        }
        self.pending
            .remove(&ticket.0)
            .map(|p| p.outcome)
            .ok_or(RouterError::UnknownTicket(ticket.0))
    }

    fn cancel(&mut self, ticket: RouteTicket) {
        self.pending.remove(&ticket.0);
    }

    fn world_changed(&mut self, world: &WorldState) {
        self.rebuild(world);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use posture_graph::{Placement, WorldObject};
    use posture_types::{Aabb, Region};

    use super::*;
    use crate::router::RouteOrigin;

    fn wall(world: &mut WorldState, x: f64, y: f64, half_x: f64, half_y: f64) -> ObjectId {
        let wall = WorldObject::new("wall", Placement::World(Location::new(x, y, 0)))
            .with_extents(half_x, half_y)
            .as_obstacle();
        let id = wall.id;
        world.add_object(wall).unwrap();
        id
    }

    fn router(world: &WorldState, latency: u32) -> GridRouter {
        let config = GridConfig {
            latency_ticks: latency,
            ..GridConfig::default()
        };
        GridRouter::new(world, &config, 1.0, 20.0)
    }

    fn request(from: Location, to: Location) -> RouteRequest {
        RouteRequest {
            origins: vec![RouteOrigin {
                location: from,
                cost: Cost::ZERO,
            }],
            goals: vec![RoutingGoal::new(to, Cost::ZERO)],
        }
    }

    fn found(outcome: RouteOutcome) -> Option<RoutePlan> {
        match outcome {
            RouteOutcome::Found(plan) => Some(plan),
            RouteOutcome::Pending | RouteOutcome::NotFound => None,
        }
    }

    fn run(router: &mut GridRouter, request: RouteRequest) -> RouteOutcome {
        let ticket = router.submit(request).unwrap();
        loop {
            match router.poll(ticket).unwrap() {
                RouteOutcome::Pending => {}
                outcome => return outcome,
            }
        }
    }

    #[test]
    fn routes_around_a_wall() {
        let mut world = WorldState::new();
        wall(&mut world, 0.0, 0.0, 0.25, 3.0);
        let mut router = router(&world, 0);
        let plan = found(run(
            &mut router,
            request(Location::new(-2.0, 0.0, 0), Location::new(2.0, 0.0, 0)),
        ))
        .unwrap();
        assert!(plan.length > 4.0);
        assert_eq!(plan.waypoints.first(), Some(&Location::new(-2.0, 0.0, 0)));
        assert_eq!(plan.end(), Some(Location::new(2.0, 0.0, 0)));
        assert!(plan.waypoints.iter().all(|w| router.blocker_at(w).is_none()));
    }

    #[test]
    fn enclosed_goal_is_not_found() {
        let mut world = WorldState::new();
        wall(&mut world, 5.0, 3.0, 2.5, 0.25);
        wall(&mut world, 5.0, 7.0, 2.5, 0.25);
        wall(&mut world, 3.0, 5.0, 0.25, 2.5);
        wall(&mut world, 7.0, 5.0, 0.25, 2.5);
        let mut router = router(&world, 0);
        let outcome = run(
            &mut router,
            request(Location::new(-3.0, 0.0, 0), Location::new(5.0, 5.0, 0)),
        );
        assert_eq!(outcome, RouteOutcome::NotFound);
    }

    #[test]
    fn cheaper_goal_wins_over_nearer_goal() {
        let world = WorldState::new();
        let mut router = router(&world, 0);
        let origin = Location::new(0.0, 0.0, 0);
        let req = RouteRequest {
            origins: vec![RouteOrigin {
                location: origin,
                cost: Cost::ZERO,
            }],
            goals: vec![
                RoutingGoal::new(Location::new(1.0, 0.0, 0), Cost::from_units(10)),
                RoutingGoal::new(Location::new(3.0, 0.0, 0), Cost::ZERO),
            ],
        };
        let plan = found(run(&mut router, req)).unwrap();
        assert_eq!(plan.goal, 1);
    }

    #[test]
    fn latency_delays_the_outcome() {
        let world = WorldState::new();
        let mut router = router(&world, 2);
        let ticket = router
            .submit(request(Location::new(0.0, 0.0, 0), Location::new(1.0, 1.0, 0)))
            .unwrap();
        assert_eq!(router.poll(ticket).unwrap(), RouteOutcome::Pending);
        assert_eq!(router.poll(ticket).unwrap(), RouteOutcome::Pending);
        assert!(matches!(router.poll(ticket).unwrap(), RouteOutcome::Found(_)));
        assert_eq!(router.poll(ticket), Err(RouterError::UnknownTicket(ticket.0)));
        assert_eq!(router.outstanding(), 0);
    }

    #[test]
    fn canceled_tickets_are_forgotten() {
        let world = WorldState::new();
        let mut router = router(&world, 5);
        let ticket = router
            .submit(request(Location::new(0.0, 0.0, 0), Location::new(1.0, 1.0, 0)))
            .unwrap();
        router.cancel(ticket);
        assert!(router.poll(ticket).is_err());
    }

    #[test]
    fn empty_requests_are_rejected() {
        let world = WorldState::new();
        let mut router = router(&world, 0);
        let result = router.submit(RouteRequest {
            origins: Vec::new(),
            goals: vec![RoutingGoal::new(Location::default(), Cost::ZERO)],
        });
        assert!(matches!(result, Err(RouterError::InvalidRequest(_))));
    }

    #[test]
    fn line_of_sight_reports_the_blocker() {
        let mut world = WorldState::new();
        let blocker = wall(&mut world, 0.0, 0.0, 0.25, 2.0);
        let router = router(&world, 0);
        let from = Location::new(-2.0, 0.0, 0);
        let to = Location::new(2.0, 0.0, 0);
        assert_eq!(router.line_of_sight(&from, &to, None), LineOfSight::Blocked(Some(blocker)));
        assert_eq!(router.line_of_sight(&from, &to, Some(blocker)), LineOfSight::Clear);
        assert_eq!(
            router.line_of_sight(&from, &Location::new(-2.0, 3.0, 0), None),
            LineOfSight::Clear
        );
    }

    #[test]
    fn goals_skip_blocked_samples() {
        let mut world = WorldState::new();
        wall(&mut world, 0.0, 0.0, 0.5, 0.5);
        let router = router(&world, 0);
        let area = SpatialConstraint::new(0, Region::rect(Aabb::square(Vec2::ZERO, 2.0)));
        let goals = router.goals_for(&area, Some(Location::default()));
        assert!(!goals.is_empty());
        assert!(goals.iter().all(|g| router.blocker_at(&g.location).is_none()));
        assert!(goals.iter().all(|g| g.requires_los));
    }

    #[test]
    fn portals_join_floors() {
        let world = WorldState::new();
        let config = GridConfig {
            latency_ticks: 0,
            portals: vec![crate::config::PortalConfig {
                from: Location::new(4.0, 0.0, 0),
                to: Location::new(4.0, 0.0, 1),
            }],
            ..GridConfig::default()
        };
        let mut router = GridRouter::new(&world, &config, 1.0, 20.0);
        let plan = found(run(
            &mut router,
            request(Location::new(0.0, 0.0, 0), Location::new(0.0, 0.0, 1)),
        ))
        .unwrap();
        assert!(plan.cost >= Cost::new(config.floor_change_cost));
        assert_eq!(plan.end().map(|l| l.floor), Some(1));
    }
}
