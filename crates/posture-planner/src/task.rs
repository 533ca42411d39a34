//! Suspendable planning and execution.
//!
//! Both halves of a plan's life span several simulation ticks, so both are
//! explicit state machines the caller drives once per tick:
//!
//! 1. [`PlanTask`] runs the graph searches when it starts, then feeds the
//!    selector's route requests to the router and waits for the answers.
//! 2. [`PlanExecution`] steps through the plan's sub-actions, taking each
//!    leg's reservations when the agent comes within reach of it and
//!    noticing when a higher-priority plan displaced it.

use posture_graph::{NodeId, PostureGraph, WorldState};
use posture_types::{AgentId, Location, PlanId, Priority};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::actor::PlanningActor;
use crate::config::PlannerConfig;
use crate::constraint::GoalConstraint;
use crate::error::PlannerError;
use crate::failure::{FailureReason, PlanFailure};
use crate::handles::HandleGenerator;
use crate::path::PathSpec;
use crate::reservation::{Reservation, ReservationManager};
use crate::router::{RouteOutcome, RouteTicket, Router};
use crate::segment::SegmentFinder;
use crate::selector::{PathSelector, Planned};
use crate::transition::{SubAction, sub_actions};

/// What one poll of a [`PlanTask`] produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPoll {
    /// Still waiting on the router.
    Pending,
    /// Finished.
    Ready(Planned),
}

#[derive(Debug, Clone)]
enum Stage {
    Routing {
        selector: Box<PathSelector>,
        ticket: Option<RouteTicket>,
    },
    Ready(Planned),
}

/// One planning request in flight.
#[derive(Debug, Clone)]
pub struct PlanTask {
    id: PlanId,
    agent: AgentId,
    origin: Location,
    stage: Stage,
    waited: u32,
    max_wait: u32,
    reported: bool,
}

impl PlanTask {
    /// Run the graph searches for `actor`, whose current node is `source`,
    /// and queue the route requests.
    ///
    /// An actor that already satisfies the goal gets a plan that stays put.
    pub fn start<R, A>(
        graph: &PostureGraph,
        world: &WorldState,
        router: &R,
        config: &PlannerConfig,
        actor: &A,
        constraint: &GoalConstraint,
        source: NodeId,
    ) -> Self
    where
        R: Router + ?Sized,
        A: PlanningActor + ?Sized,
    {
        let id = PlanId::new();
        let agent = actor.id();
        let origin = actor.location();
        let stage = Self::prepare(graph, world, router, config, actor, constraint, source, id);
        debug!(plan = %id, %agent, %source, "plan task started");
        Self {
            id,
            agent,
            origin,
            stage,
            waited: 0,
            max_wait: config.routing.max_poll_ticks,
            reported: false,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn prepare<R, A>(
        graph: &PostureGraph,
        world: &WorldState,
        router: &R,
        config: &PlannerConfig,
        actor: &A,
        constraint: &GoalConstraint,
        source: NodeId,
        id: PlanId,
    ) -> Stage
    where
        R: Router + ?Sized,
        A: PlanningActor + ?Sized,
    {
        let state = actor.state();
        if constraint.is_satisfied_by(world, &state, &actor.location()) {
            debug!(plan = %id, "goal already satisfied");
            return Stage::Ready(Ok(PathSpec::stay(id, actor.id(), source, state)));
        }
        let segments = match SegmentFinder::new(graph, world, router, config, actor, constraint, source).find() {
            Ok(segments) => segments,
            Err(reason) => return Stage::Ready(Err(reason.into())),
        };
        let connectivity = match HandleGenerator::new(graph, world, router, config, constraint)
            .connectivity(actor, segments)
        {
            Ok(connectivity) => connectivity,
            Err(reason) => return Stage::Ready(Err(reason.into())),
        };
        Stage::Routing {
            selector: Box::new(PathSelector::new(connectivity)),
            ticket: None,
        }
    }

    /// The plan id the result will carry.
    pub const fn id(&self) -> PlanId {
        self.id
    }

    /// The agent being planned for.
    pub const fn agent(&self) -> AgentId {
        self.agent
    }

    /// Whether the result is available.
    pub const fn is_ready(&self) -> bool {
        matches!(self.stage, Stage::Ready(_))
    }

    /// Whether the result is being seen for the first time. Marks it seen.
    pub(crate) fn first_report(&mut self) -> bool {
        self.is_ready() && !std::mem::replace(&mut self.reported, true)
    }

    /// Advance: submit the next route request or collect an answer. Answers
    /// already available are consumed in the same poll.
    ///
    /// # Errors
    ///
    /// Returns a [`PlannerError`] when assembly finds the graph out of step
    /// with the searched paths. Router errors are planning failures.
    pub fn poll<R: Router + ?Sized>(
        &mut self,
        graph: &PostureGraph,
        world: &WorldState,
        router: &mut R,
    ) -> Result<TaskPoll, PlannerError> {
        loop {
            let Stage::Routing { selector, ticket } = &mut self.stage else {
                break;
            };
            if selector.is_settled() {
                let Stage::Routing { selector, .. } = std::mem::replace(
                    &mut self.stage,
                    Stage::Ready(Err(FailureReason::RoutingFailed.into())),
                ) else {
                    break;
                };
                let planned = selector.assemble(graph, world, self.id, self.agent, self.origin)?;
                self.stage = Stage::Ready(planned);
                break;
            }
            let Some(current) = *ticket else {
                let Some(request) = selector.request().cloned() else {
                    break;
                };
                match router.submit(request) {
                    Ok(issued) => *ticket = Some(issued),
                    Err(error) => {
                        warn!(plan = %self.id, %error, "route request rejected");
                        self.stage = Stage::Ready(Err(FailureReason::RoutingFailed.into()));
                    }
                }
                continue;
            };
            match router.poll(current) {
                Ok(RouteOutcome::Pending) => {
                    self.waited = self.waited.saturating_add(1);
                    if self.waited > self.max_wait {
                        router.cancel(current);
                        warn!(plan = %self.id, waited = self.waited, "router did not answer in time");
                        self.stage = Stage::Ready(Err(FailureReason::RoutingFailed.into()));
                        break;
                    }
                    return Ok(TaskPoll::Pending);
                }
                Ok(RouteOutcome::Found(route)) => {
                    *ticket = None;
                    selector.resolve(Some(route));
                }
                Ok(RouteOutcome::NotFound) => {
                    *ticket = None;
                    selector.resolve(None);
                }
                Err(error) => {
                    warn!(plan = %self.id, %error, "route poll failed");
                    self.stage = Stage::Ready(Err(FailureReason::RoutingFailed.into()));
                }
            }
        }
        match &self.stage {
            Stage::Ready(planned) => Ok(TaskPoll::Ready(planned.clone())),
            Stage::Routing { .. } => Ok(TaskPoll::Pending),
        }
    }

    /// Abandon the request, canceling any outstanding route ticket.
    pub fn cancel<R: Router + ?Sized>(&mut self, router: &mut R) {
        if let Stage::Routing {
            ticket: Some(ticket),
            ..
        } = &self.stage
        {
            router.cancel(*ticket);
        }
        if !self.is_ready() {
            debug!(plan = %self.id, "plan task canceled");
            self.stage = Stage::Ready(Err(FailureReason::Canceled.into()));
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Where a running plan stands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Still going.
    Running,
    /// Every sub-action finished.
    Complete,
    /// Stopped; all reservations were released.
    Failed(PlanFailure),
}

/// A plan being carried out.
#[derive(Debug, Clone)]
pub struct PlanExecution {
    path: PathSpec,
    actions: Vec<SubAction>,
    step: usize,
    progress: f64,
    reserved_until: usize,
    priority: Priority,
    approach_distance: f64,
    status: ExecutionStatus,
}

impl PlanExecution {
    /// Begin executing `path`, reserving everything needed before the first
    /// walk.
    ///
    /// # Errors
    ///
    /// Returns a [`FailureReason::ReservationConflict`] failure when the
    /// first leg cannot be reserved; nothing stays reserved in that case.
    pub fn start(
        path: PathSpec,
        priority: Priority,
        config: &PlannerConfig,
        reservations: &mut ReservationManager,
    ) -> Result<Self, PlanFailure> {
        let actions = sub_actions(&path);
        let mut execution = Self {
            path,
            actions,
            step: 0,
            progress: 0.0,
            reserved_until: 0,
            priority,
            approach_distance: config.routing.reserve_approach_distance,
            status: ExecutionStatus::Running,
        };
        execution.reserve_leg(0, reservations)?;
        info!(
            plan = %execution.path.id,
            agent = %execution.path.agent,
            actions = execution.actions.len(),
            "plan execution started"
        );
        Ok(execution)
    }

    /// The plan.
    pub const fn path(&self) -> &PathSpec {
        &self.path
    }

    /// Its sub-actions.
    pub fn actions(&self) -> &[SubAction] {
        &self.actions
    }

    /// The sub-action in progress.
    pub fn current(&self) -> Option<&SubAction> {
        self.actions.get(self.step)
    }

    /// Current status.
    pub const fn status(&self) -> &ExecutionStatus {
        &self.status
    }

    /// Advance by one tick in which the agent walked `walked` metres.
    pub fn tick(&mut self, reservations: &mut ReservationManager, walked: f64) -> &ExecutionStatus {
        if self.status != ExecutionStatus::Running {
            return &self.status;
        }
        if reservations.take_displaced(self.path.id) {
            info!(plan = %self.path.id, "plan displaced by a higher-priority reservation");
            return self.fail(reservations, FailureReason::ReservationConflict);
        }

        let Some(action) = self.actions.get(self.step) else {
            return self.finish(reservations);
        };
        let index = action.transition_index();
        let walk_length = match action {
            SubAction::Walk { route, .. } => Some(route.length),
            SubAction::Transition(transition) => {
                debug!(
                    plan = %self.path.id,
                    transition = index,
                    kind = transition.kind.as_str(),
                    "transition finished"
                );
                None
            }
        };
        self.seek(index);
        let next = self.step.saturating_add(1);
        if let Some(length) = walk_length {
            self.progress += walked.max(0.0);
            let remaining = (length - self.progress).max(0.0);
            if self.reserved_until <= self.step
                && remaining <= self.approach_distance
                && let Err(failure) = self.reserve_leg(next, reservations)
            {
                self.status = ExecutionStatus::Failed(failure);
                return &self.status;
            }
            if remaining <= f64::EPSILON {
                debug!(plan = %self.path.id, transition = index, "walk finished");
                self.progress = 0.0;
                self.step = next;
            }
        } else {
            self.step = next;
            let leaving = self
                .actions
                .get(next)
                .is_none_or(|a| a.transition_index() != index);
            if leaving {
                reservations.release_transition(self.path.id, index);
            }
        }
        if self.step >= self.actions.len() {
            return self.finish(reservations);
        }
        &self.status
    }

    /// Stop executing and release every reservation.
    pub fn cancel(&mut self, reservations: &mut ReservationManager) -> &ExecutionStatus {
        if self.status != ExecutionStatus::Running {
            return &self.status;
        }
        self.fail(reservations, FailureReason::Canceled)
    }

    /// Reserve the actions from `from` up to the next walk.
    fn reserve_leg(&mut self, from: usize, reservations: &mut ReservationManager) -> Result<(), PlanFailure> {
        let mut until = from;
        for action in self.actions.iter().skip(from).take_while(|a| !a.is_walk()) {
            let keys = action.reservations();
            until = until.saturating_add(1);
            if keys.is_empty() {
                continue;
            }
            let holder = Reservation {
                plan: self.path.id,
                agent: self.path.agent,
                priority: self.priority,
                transition: action.transition_index(),
            };
            if let Err(conflict) = reservations.try_reserve(keys, holder) {
                info!(plan = %self.path.id, %conflict, "reservation failed");
                reservations.release_plan(self.path.id);
                return Err(FailureReason::ReservationConflict.into());
            }
        }
        self.reserved_until = until;
        Ok(())
    }

    fn seek(&mut self, index: usize) {
        while self.path.cursor() < index && !self.path.is_finished() {
            self.path.advance();
        }
    }

    fn finish(&mut self, reservations: &mut ReservationManager) -> &ExecutionStatus {
        while !self.path.is_finished() {
            self.path.advance();
        }
        reservations.release_plan(self.path.id);
        info!(plan = %self.path.id, "plan execution complete");
        self.status = ExecutionStatus::Complete;
        &self.status
    }

    fn fail(&mut self, reservations: &mut ReservationManager, reason: FailureReason) -> &ExecutionStatus {
        reservations.release_plan(self.path.id);
        self.status = ExecutionStatus::Failed(reason.into());
        &self.status
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use posture_graph::{GraphConfig, GraphMaintainer, Placement, WorldObject};
    use posture_types::{Cost, ObjectId, PostureKind, SequenceTag, StateSpec, VarBinding};

    use super::*;
    use crate::reservation::ReservationKey;
    use crate::router::RoutePlan;

    fn walk(length: f64) -> RoutePlan {
        RoutePlan {
            origin: 0,
            goal: 0,
            waypoints: vec![Location::new(2.0, 1.0 + length, 0), Location::new(2.0, 1.0, 0)],
            length,
            cost: Cost::new(length),
        }
    }

    fn seat_plan(length: f64) -> (PathSpec, ObjectId) {
        let mut world = WorldState::new();
        let chair = WorldObject::new("chair", Placement::World(Location::new(2.0, 0.0, 0)))
            .with_posture(PostureKind::Sit);
        let chair_id = chair.id;
        world.add_object(chair).unwrap();
        let mut maintainer = GraphMaintainer::new(GraphConfig::default());
        maintainer.rebuild(&world).unwrap();
        let graph = maintainer.graph();
        let seated = graph
            .node_for(&StateSpec::posed(PostureKind::Sit, chair_id))
            .unwrap();
        let mut path = PathSpec::new(PlanId::new(), AgentId::new());
        let binding = VarBinding::default();
        path.push(graph, graph.neutral(), binding, SequenceTag::Default, None)
            .unwrap();
        path.push(graph, seated, binding, SequenceTag::Default, Some(walk(length)))
            .unwrap();
        path.mark_complete();
        (path, chair_id)
    }

    #[test]
    fn chair_is_reserved_only_when_close() {
        let (path, chair) = seat_plan(5.0);
        let plan = path.id;
        let mut reservations = ReservationManager::new();
        let config = PlannerConfig::default();
        let mut execution = PlanExecution::start(path, Priority::Normal, &config, &mut reservations).unwrap();
        assert!(reservations.is_empty());

        assert_eq!(execution.tick(&mut reservations, 1.0), &ExecutionStatus::Running);
        assert!(reservations.holder(&ReservationKey::Object(chair)).is_none());

        execution.tick(&mut reservations, 2.5);
        assert_eq!(
            reservations.holder(&ReservationKey::Object(chair)).map(|r| r.plan),
            Some(plan)
        );

        execution.tick(&mut reservations, 1.5);
        assert!(matches!(execution.current(), Some(SubAction::Transition(_))));
        assert_eq!(execution.tick(&mut reservations, 0.0), &ExecutionStatus::Complete);
        assert!(reservations.is_empty());
        assert!(execution.path().is_finished());
    }

    #[test]
    fn displaced_execution_fails_and_holds_nothing() {
        let (path, chair) = seat_plan(1.0);
        let mut reservations = ReservationManager::new();
        let config = PlannerConfig::default();
        let mut execution = PlanExecution::start(path, Priority::Low, &config, &mut reservations).unwrap();
        execution.tick(&mut reservations, 0.5);
        assert!(reservations.holder(&ReservationKey::Object(chair)).is_some());

        let rival = Reservation {
            plan: PlanId::new(),
            agent: AgentId::new(),
            priority: Priority::High,
            transition: 1,
        };
        reservations
            .try_reserve(&[ReservationKey::Object(chair)], rival)
            .unwrap();
        let status = execution.tick(&mut reservations, 0.5).clone();
        assert_eq!(
            status,
            ExecutionStatus::Failed(FailureReason::ReservationConflict.into())
        );
        assert_eq!(reservations.keys_of(execution.path().id), Vec::new());
        assert_eq!(reservations.len(), 1);
    }

    #[test]
    fn contested_leg_fails_without_leaking() {
        let (path, chair) = seat_plan(0.5);
        let mut reservations = ReservationManager::new();
        let holder = Reservation {
            plan: PlanId::new(),
            agent: AgentId::new(),
            priority: Priority::Normal,
            transition: 1,
        };
        reservations
            .try_reserve(&[ReservationKey::Object(chair)], holder)
            .unwrap();
        let config = PlannerConfig::default();
        let mut execution = PlanExecution::start(path, Priority::Normal, &config, &mut reservations).unwrap();
        let status = execution.tick(&mut reservations, 0.1).clone();
        assert_eq!(
            status,
            ExecutionStatus::Failed(FailureReason::ReservationConflict.into())
        );
        assert_eq!(reservations.len(), 1);
    }

    #[test]
    fn cancel_releases_everything() {
        let (path, _) = seat_plan(1.0);
        let mut reservations = ReservationManager::new();
        let config = PlannerConfig::default();
        let mut execution = PlanExecution::start(path, Priority::Normal, &config, &mut reservations).unwrap();
        execution.tick(&mut reservations, 0.2);
        assert_eq!(reservations.len(), 1);
        assert_eq!(
            execution.cancel(&mut reservations),
            &ExecutionStatus::Failed(FailureReason::Canceled.into())
        );
        assert!(reservations.is_empty());
    }
}
