//! Path selection: route the candidates, keep the cheapest, assemble.
//!
//! A [`PathSelector`] turns a [`Connectivity`] into a queue of route jobs.
//! Candidates without a routed middle share one pooled request: every
//! source goal is an origin and every destination goal a target, weighted
//! by its shaped cost plus the candidate's edge and terminal cost, so the
//! router picks the globally cheapest pairing. Candidates with a routed
//! middle are routed in two legs. Whoever drives the router feeds each
//! outcome back through [`PathSelector::resolve`]; once the queue is empty
//! [`PathSelector::assemble`] builds the [`PathSpec`].
//!
//! When nothing can be reached but some goals failed only their
//! line-of-sight check, one more request routes to the best blocked goal so
//! the caller can show the agent walking up to the obstruction.

use std::collections::{BTreeMap, VecDeque};

use posture_graph::{PostureGraph, WorldState};
use posture_types::{
    AgentId, Cost, Location, ObjectId, PlanId, SequenceTag, SlotRef, SlotTarget, SlotType, Vec2,
    VarBinding,
};
use tracing::{debug, info};

use crate::error::PlannerError;
use crate::failure::{FailureReason, PlanFailure};
use crate::handles::{CandidateHandles, Connectivity, ConnectivityHandle};
use crate::path::{PathSpec, PlanCost};
use crate::router::{RouteOrigin, RoutePlan, RouteRequest, RoutingGoal};
use crate::segment::SegmentedPath;

/// A planning result: a plan, or why there is none.
pub type Planned = Result<PathSpec, PlanFailure>;

/// One outstanding route request and what its answer means.
#[derive(Debug, Clone, PartialEq)]
enum Job {
    /// Shared request; `owners[goal]` is the candidate a goal belongs to.
    Pooled {
        request: RouteRequest,
        owners: Vec<usize>,
    },
    /// Source to the pick-up place of one candidate.
    Middle { request: RouteRequest, candidate: usize },
    /// Pick-up place to the destination of one candidate.
    Destination {
        request: RouteRequest,
        candidate: usize,
        first: RoutePlan,
        spent: Cost,
    },
    /// Feedback route to a blocked goal; `blockers[goal]` is what is in the
    /// way.
    Failure {
        request: RouteRequest,
        blockers: Vec<ObjectId>,
    },
}

impl Job {
    const fn request(&self) -> &RouteRequest {
        match self {
            Self::Pooled { request, .. }
            | Self::Middle { request, .. }
            | Self::Destination { request, .. }
            | Self::Failure { request, .. } => request,
        }
    }
}

/// The best plan found so far.
#[derive(Debug, Clone, PartialEq)]
struct Choice {
    /// Candidate index; `None` for the complete path.
    candidate: Option<usize>,
    middle: Option<RoutePlan>,
    destination: Option<RoutePlan>,
    /// Ranking: routes, shaped goal costs, edges, terminal.
    score: Cost,
}

/// Routes the candidates of one request and assembles the winner.
#[derive(Debug, Clone)]
pub struct PathSelector {
    connectivity: Connectivity,
    jobs: VecDeque<Job>,
    best: Option<Choice>,
    failure: Option<PlanFailure>,
    failure_tried: bool,
}

impl PathSelector {
    /// Queue the route jobs for `connectivity`.
    pub fn new(connectivity: Connectivity) -> Self {
        let mut selector = Self {
            connectivity,
            jobs: VecDeque::new(),
            best: None,
            failure: None,
            failure_tried: false,
        };
        if let Some(complete) = &selector.connectivity.complete {
            selector.best = Some(Choice {
                candidate: None,
                middle: None,
                destination: None,
                score: complete.fixed_cost(),
            });
        }
        selector.queue_candidates();
        selector.settle_if_idle();
        debug!(
            jobs = selector.jobs.len(),
            complete = selector.connectivity.complete.is_some(),
            candidates = selector.connectivity.candidates.len(),
            "path selection started"
        );
        selector
    }

    /// The request to send next, if any.
    pub fn request(&self) -> Option<&RouteRequest> {
        self.jobs.front().map(Job::request)
    }

    /// Whether every job has been answered.
    pub fn is_settled(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Record the router's answer to [`PathSelector::request`]; `None` means
    /// no route was found.
    pub fn resolve(&mut self, outcome: Option<RoutePlan>) {
        let Some(job) = self.jobs.pop_front() else {
            return;
        };
        match job {
            Job::Pooled { request, owners } => {
                if let Some(plan) = outcome
                    && let Some(candidate) = owners.get(plan.goal).copied()
                {
                    let score = plan.cost.saturating_add(goal_cost(&request, plan.goal));
                    self.offer(Choice {
                        candidate: Some(candidate),
                        middle: None,
                        destination: Some(plan),
                        score,
                    });
                }
            }
            Job::Middle { request, candidate } => {
                if let Some(plan) = outcome {
                    let spent = plan.cost.saturating_add(goal_cost(&request, plan.goal));
                    self.continue_from_middle(candidate, plan, spent);
                }
            }
            Job::Destination {
                request,
                candidate,
                first,
                spent,
            } => {
                if let Some(plan) = outcome
                    && let Some(fixed) = self.fixed_cost(candidate)
                {
                    let score = spent
                        .saturating_add(plan.cost)
                        .saturating_add(goal_cost(&request, plan.goal))
                        .saturating_add(fixed);
                    self.offer(Choice {
                        candidate: Some(candidate),
                        middle: Some(first),
                        destination: Some(plan),
                        score,
                    });
                }
            }
            Job::Failure { blockers, .. } => {
                // Only a route that reaches a blocked goal names its blocker.
                let failure = outcome.and_then(|plan| {
                    blockers.get(plan.goal).map(|blocker| PlanFailure {
                        reason: FailureReason::BlockedBy(*blocker),
                        failure_route: Some(plan),
                    })
                });
                self.failure =
                    Some(failure.unwrap_or_else(|| PlanFailure::new(FailureReason::NoRouteFound)));
            }
        }
        self.settle_if_idle();
    }

    /// Build the plan from the best choice.
    ///
    /// `origin` is where the agent stands; it locates slot choices for
    /// plans that never walk.
    ///
    /// # Errors
    ///
    /// Returns a [`PlannerError`] when the chosen path no longer matches
    /// the graph. Planning failures are the inner `Err`.
    pub fn assemble(
        self,
        graph: &PostureGraph,
        world: &WorldState,
        plan: PlanId,
        agent: AgentId,
        origin: Location,
    ) -> Result<Planned, PlannerError> {
        let Some(choice) = self.best else {
            let failure = self
                .failure
                .unwrap_or_else(|| PlanFailure::new(FailureReason::NoRouteFound));
            return Ok(Err(failure));
        };
        let path = match choice.candidate {
            None => self.connectivity.complete,
            Some(index) => self
                .connectivity
                .candidates
                .into_iter()
                .nth(index)
                .map(|c| c.path),
        };
        let Some(path) = path else {
            return Ok(Err(PlanFailure::new(FailureReason::NoRouteFound)));
        };

        let mut spec = PathSpec::new(plan, agent);
        push_segments(&mut spec, graph, &path, choice.middle, choice.destination)?;
        let end = spec.routes().last().and_then(RoutePlan::end).unwrap_or(origin);
        if let Err(surface) = resolve_slots(&mut spec, graph, world, &end)? {
            return Ok(Err(PlanFailure::new(FailureReason::NoFreeSlot(surface))));
        }
        let routes = spec
            .routes()
            .fold(Cost::ZERO, |acc, r| acc.saturating_add(r.cost));
        spec.cost = PlanCost {
            edges: spec.edge_cost(),
            terminal: path.destination_cost,
            routes,
        };
        spec.mark_complete();
        info!(
            plan = %plan,
            agent = %agent,
            transitions = spec.len(),
            cost = %spec.cost,
            complete = path.complete,
            "posture plan assembled"
        );
        Ok(Ok(spec))
    }

    // -----------------------------------------------------------------------
    // Job bookkeeping
    // -----------------------------------------------------------------------

    fn queue_candidates(&mut self) {
        let bound = self.best.as_ref().map(|c| c.score);
        let Some(source) = self.connectivity.candidates.first().map(|c| c.source.clone()) else {
            return;
        };
        let origins = origins(&source);
        let mut goals = Vec::new();
        let mut owners = Vec::new();
        let mut immediate = Vec::new();
        let mut middles = Vec::new();

        for (index, candidate) in self.connectivity.candidates.iter().enumerate() {
            let fixed = candidate.path.fixed_cost();
            if bound.is_some_and(|b| fixed >= b) {
                continue;
            }
            if candidate.path.has_routed_middle() {
                if let Some(middle) = candidate.middle.as_ref().filter(|m| !m.goals.is_empty()) {
                    middles.push(Job::Middle {
                        request: RouteRequest {
                            origins: origins.clone(),
                            goals: middle.goals.clone(),
                        },
                        candidate: index,
                    });
                }
                continue;
            }
            if candidate.destination.anywhere {
                immediate.push((index, fixed));
                continue;
            }
            for goal in &candidate.destination.goals {
                goals.push(RoutingGoal {
                    cost: goal.cost.saturating_add(fixed),
                    ..*goal
                });
                owners.push(index);
            }
        }

        for (index, fixed) in immediate {
            self.offer(Choice {
                candidate: Some(index),
                middle: None,
                destination: None,
                score: fixed,
            });
        }
        if !goals.is_empty() {
            self.jobs.push_back(Job::Pooled {
                request: RouteRequest { origins, goals },
                owners,
            });
        }
        self.jobs.extend(middles);
    }

    fn continue_from_middle(&mut self, candidate: usize, first: RoutePlan, spent: Cost) {
        let Some(handles) = self.connectivity.candidates.get(candidate) else {
            return;
        };
        let fixed = handles.path.fixed_cost();
        let Some(end) = first.end() else {
            return;
        };
        if handles.destination.anywhere {
            self.offer(Choice {
                candidate: Some(candidate),
                middle: Some(first),
                destination: None,
                score: spent.saturating_add(fixed),
            });
            return;
        }
        if handles.destination.goals.is_empty() {
            return;
        }
        let request = RouteRequest {
            origins: vec![RouteOrigin {
                location: end,
                cost: Cost::ZERO,
            }],
            goals: handles.destination.goals.clone(),
        };
        self.jobs.push_front(Job::Destination {
            request,
            candidate,
            first,
            spent,
        });
    }

    fn offer(&mut self, choice: Choice) {
        if self.best.as_ref().is_some_and(|b| b.score <= choice.score) {
            return;
        }
        debug!(candidate = ?choice.candidate, score = %choice.score, "new best plan candidate");
        self.best = Some(choice);
    }

    fn fixed_cost(&self, candidate: usize) -> Option<Cost> {
        self.connectivity
            .candidates
            .get(candidate)
            .map(|c| c.path.fixed_cost())
    }

    /// With nothing left to route and nothing found, queue the feedback
    /// route or give up.
    fn settle_if_idle(&mut self) {
        if !self.jobs.is_empty() || self.best.is_some() || self.failure.is_some() {
            return;
        }
        if self.failure_tried {
            self.failure = Some(PlanFailure::new(FailureReason::NoRouteFound));
            return;
        }
        self.failure_tried = true;
        let Some(source) = self.connectivity.candidates.first().map(|c| c.source.clone()) else {
            self.failure = Some(PlanFailure::new(FailureReason::NoRouteFound));
            return;
        };
        let mut goals = Vec::new();
        let mut blockers = Vec::new();
        for handle in self.connectivity.candidates.iter().flat_map(blocked_handles) {
            for blocked in &handle.blocked {
                goals.push(RoutingGoal {
                    requires_los: false,
                    ..blocked.goal
                });
                blockers.push(blocked.blocker);
            }
        }
        if goals.is_empty() {
            self.failure = Some(PlanFailure::new(FailureReason::NoRouteFound));
            return;
        }
        debug!(blocked = goals.len(), "only blocked goals remain, routing for feedback");
        self.jobs.push_back(Job::Failure {
            request: RouteRequest {
                origins: origins(&source),
                goals,
            },
            blockers,
        });
    }
}

fn blocked_handles(candidate: &CandidateHandles) -> impl Iterator<Item = &ConnectivityHandle> {
    candidate.middle.iter().chain(std::iter::once(&candidate.destination))
}

fn origins(source: &ConnectivityHandle) -> Vec<RouteOrigin> {
    source
        .goals
        .iter()
        .map(|g| RouteOrigin {
            location: g.location,
            cost: g.cost,
        })
        .collect()
}

fn goal_cost(request: &RouteRequest, goal: usize) -> Cost {
    request.goals.get(goal).map_or(Cost::ZERO, |g| g.cost)
}

/// Whether a route actually moves the agent.
fn walks(route: &RoutePlan) -> bool {
    route.waypoints.len() > 1
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

fn push_segments(
    spec: &mut PathSpec,
    graph: &PostureGraph,
    path: &SegmentedPath,
    middle_route: Option<RoutePlan>,
    destination_route: Option<RoutePlan>,
) -> Result<(), PlannerError> {
    for node in &path.left.nodes {
        spec.push(graph, *node, path.left_binding, SequenceTag::Default, None)?;
    }
    if path.complete {
        return Ok(());
    }

    if let Some(middle) = &path.middle {
        let mut middle_route = middle_route.filter(walks);
        let at = middle.route.as_ref().map(|r| r.at);
        for (index, node) in middle.path.nodes.iter().enumerate().skip(1) {
            let (binding, sequence) = if index < middle.pickup_start {
                (path.left_binding, SequenceTag::Putdown)
            } else {
                (middle.binding, SequenceTag::Pickup)
            };
            let route = if Some(index) == at { middle_route.take() } else { None };
            spec.push(graph, *node, binding, sequence, route)?;
        }
    }

    let Some(right) = &path.right else {
        return Ok(());
    };
    let mut destination_route = destination_route.filter(walks);
    let Some((marker, rest)) = right.nodes.split_first() else {
        return Ok(());
    };
    spec.push(graph, *marker, path.binding, SequenceTag::Default, None)?;
    if rest.is_empty() {
        if let Some(route) = destination_route.take() {
            spec.push(graph, *marker, path.binding, SequenceTag::Default, Some(route))?;
        }
        return Ok(());
    }
    for node in rest {
        spec.push(graph, *node, path.binding, SequenceTag::Default, destination_route.take())?;
    }
    Ok(())
}

/// Bind every unresolved slot to the nearest free slot facing `end`.
///
/// The inner `Err` names a surface with no usable slot.
fn resolve_slots(
    spec: &mut PathSpec,
    graph: &PostureGraph,
    world: &WorldState,
    end: &Location,
) -> Result<Result<(), ObjectId>, PlannerError> {
    let mut chosen: BTreeMap<(ObjectId, SlotType), SlotRef> = BTreeMap::new();
    let pending: Vec<(usize, ObjectId, SlotType, VarBinding)> = spec
        .transitions()
        .iter()
        .enumerate()
        .filter_map(|(index, t)| {
            let surface = t.state.surface?;
            (surface.slot_target == Some(SlotTarget::Variable))
                .then_some((index, surface.target, surface.slot_type?, t.binding))
        })
        .collect();
    for (index, surface, slot_type, binding) in pending {
        let slot = if let Some(slot) = chosen.get(&(surface, slot_type)) {
            *slot
        } else {
            let Some(slot) = nearest_free_slot(world, surface, slot_type, end) else {
                debug!(%surface, slot_type = slot_type.as_str(), "no usable slot");
                return Ok(Err(surface));
            };
            chosen.insert((surface, slot_type), slot);
            slot
        };
        spec.rebind(graph, index, binding.with_slot_target(Some(slot)))?;
    }
    Ok(Ok(()))
}

/// Nearest free slot of `slot_type` on `surface` whose facing side `from`
/// is on.
pub fn nearest_free_slot(
    world: &WorldState,
    surface: ObjectId,
    slot_type: SlotType,
    from: &Location,
) -> Option<SlotRef> {
    world
        .free_slots(surface, slot_type)
        .into_iter()
        .filter_map(|slot| {
            let at = world.slot_location(slot)?;
            let facing = Vec2::from_angle(world.slot(slot)?.facing);
            let toward = from.position - at.position;
            (at.floor == from.floor && facing.dot(toward) >= 0.0)
                .then(|| (Cost::new(at.planar_distance(from)), slot))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, slot)| slot)
}
