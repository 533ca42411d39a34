//! Per-zone planner context.
//!
//! A [`PlannerContext`] owns everything one zone plans against: the world,
//! the graph maintainer, the router, the reservation manager, and the
//! failure log. World edits go through it so the graph and the router stay
//! in step with the world.

use std::io::Write;

use posture_graph::{GraphMaintainer, Placement, PostureGraph, WorldObject, WorldState, export};
use posture_types::{AgentId, ObjectId, PlanId, Priority};
use tracing::{debug, info, warn};

use crate::actor::PlanningActor;
use crate::config::PlannerConfig;
use crate::constraint::GoalConstraint;
use crate::error::PlannerError;
use crate::failure::{FailureLog, FailureReason, FailureRecord, FailureSink, PlanFailure};
use crate::path::PathSpec;
use crate::reservation::ReservationManager;
use crate::router::Router;
use crate::selector::Planned;
use crate::task::{ExecutionStatus, PlanExecution, PlanTask, TaskPoll};

/// Planning state for one zone.
#[derive(Debug)]
pub struct PlannerContext<R> {
    world: WorldState,
    maintainer: GraphMaintainer,
    router: R,
    reservations: ReservationManager,
    failures: FailureLog,
    config: PlannerConfig,
}

impl<R: Router> PlannerContext<R> {
    /// Context over `world`, building its graph.
    ///
    /// # Errors
    ///
    /// Propagates graph errors from the initial build.
    pub fn new(world: WorldState, mut router: R, config: PlannerConfig) -> Result<Self, PlannerError> {
        let mut maintainer = GraphMaintainer::new(config.graph.clone());
        let stats = maintainer.rebuild(&world)?;
        router.world_changed(&world);
        info!(
            objects = world.len(),
            nodes = stats.nodes_created,
            "planner context ready"
        );
        Ok(Self {
            world,
            maintainer,
            router,
            reservations: ReservationManager::new(),
            failures: FailureLog::new(config.logging.failure_log_capacity),
            config,
        })
    }

    /// The world.
    pub const fn world(&self) -> &WorldState {
        &self.world
    }

    /// The posture graph.
    pub const fn graph(&self) -> &PostureGraph {
        self.maintainer.graph()
    }

    /// The graph maintainer.
    pub const fn maintainer(&self) -> &GraphMaintainer {
        &self.maintainer
    }

    /// The router.
    pub const fn router(&self) -> &R {
        &self.router
    }

    /// The router, mutably.
    pub const fn router_mut(&mut self) -> &mut R {
        &mut self.router
    }

    /// Current reservations.
    pub const fn reservations(&self) -> &ReservationManager {
        &self.reservations
    }

    /// Recent planning failures.
    pub const fn failures(&self) -> &FailureLog {
        &self.failures
    }

    /// The configuration.
    pub const fn config(&self) -> &PlannerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // World edits
    // -----------------------------------------------------------------------

    /// Add an object and expand the graph for it.
    ///
    /// # Errors
    ///
    /// Returns a graph error if the world rejects the object.
    pub fn add_object(&mut self, object: WorldObject) -> Result<ObjectId, PlannerError> {
        let id = object.id;
        self.world.add_object(object)?;
        self.maintainer.object_added(&self.world, id)?;
        self.router.world_changed(&self.world);
        debug!(object = %id, "object added");
        Ok(id)
    }

    /// Remove an object and everything on or in it. Reservations on the
    /// removed objects are left to their plans, which fail when they reach
    /// them.
    ///
    /// # Errors
    ///
    /// Returns [`posture_graph::GraphError::ObjectNotFound`] for an unknown
    /// object.
    pub fn remove_object(&mut self, id: ObjectId) -> Result<Vec<ObjectId>, PlannerError> {
        let removed = self.world.remove_object(id)?;
        self.maintainer.objects_removed(&removed)?;
        self.router.world_changed(&self.world);
        debug!(object = %id, removed = removed.len(), "object removed");
        Ok(removed)
    }

    /// Move an object, carrying its parts and contents along.
    ///
    /// # Errors
    ///
    /// Returns a graph error if the placement is invalid.
    pub fn move_object(&mut self, id: ObjectId, placement: Placement) -> Result<(), PlannerError> {
        self.world.move_object(id, placement)?;
        let mut affected = vec![id];
        affected.extend(self.world.descendants(id));
        self.maintainer.object_moved(&self.world, id, &affected)?;
        self.router.world_changed(&self.world);
        debug!(object = %id, affected = affected.len(), "object moved");
        Ok(())
    }

    /// Run `edit` with graph building deferred until it returns.
    ///
    /// # Errors
    ///
    /// Returns the edit's error, or a graph error from the deferred build.
    pub fn with_building_disabled<T>(
        &mut self,
        edit: impl FnOnce(&mut Self) -> Result<T, PlannerError>,
    ) -> Result<T, PlannerError> {
        self.maintainer.disable_building();
        let outcome = edit(self);
        self.maintainer.enable_building(&self.world)?;
        outcome
    }

    /// Enter bulk-edit mode.
    pub const fn begin_bulk_edit(&mut self) {
        self.maintainer.begin_bulk_edit();
    }

    /// Leave bulk-edit mode, rebuilding if the edits overflowed.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn end_bulk_edit(&mut self) -> Result<(), PlannerError> {
        self.maintainer.end_bulk_edit(&self.world)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// Start planning for `actor` towards `constraint`.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::UnknownSourceState`] when the actor's state
    /// cannot be a graph node in the current world.
    pub fn start_plan<A: PlanningActor + ?Sized>(
        &mut self,
        actor: &A,
        constraint: &GoalConstraint,
    ) -> Result<PlanTask, PlannerError> {
        let state = actor.state();
        let Some(source) = self.maintainer.ensure_node(&self.world, &state)? else {
            return Err(PlannerError::UnknownSourceState(state));
        };
        Ok(PlanTask::start(
            self.maintainer.graph(),
            &self.world,
            &self.router,
            &self.config,
            actor,
            constraint,
            source,
        ))
    }

    /// Advance a planning task. Failures are recorded in the failure log.
    ///
    /// # Errors
    ///
    /// Propagates structural errors from plan assembly.
    pub fn poll_plan(&mut self, task: &mut PlanTask) -> Result<TaskPoll, PlannerError> {
        let poll = task.poll(self.maintainer.graph(), &self.world, &mut self.router)?;
        if task.first_report()
            && let TaskPoll::Ready(Err(failure)) = &poll
        {
            self.record(task.agent(), task.id(), failure.clone());
        }
        Ok(poll)
    }

    /// Abandon a planning task.
    pub fn cancel_plan(&mut self, task: &mut PlanTask) {
        task.cancel(&mut self.router);
    }

    /// Plan to completion, polling the router until it answers.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::start_plan`] and [`Self::poll_plan`].
    pub fn plan_blocking<A: PlanningActor + ?Sized>(
        &mut self,
        actor: &A,
        constraint: &GoalConstraint,
    ) -> Result<Planned, PlannerError> {
        let mut task = self.start_plan(actor, constraint)?;
        let budget = self.config.routing.max_poll_ticks.saturating_add(2);
        for _ in 0..budget {
            if let TaskPoll::Ready(planned) = self.poll_plan(&mut task)? {
                return Ok(planned);
            }
        }
        warn!(plan = %task.id(), "planning stalled; canceling");
        self.cancel_plan(&mut task);
        let failure = PlanFailure::new(FailureReason::RoutingFailed);
        self.record(task.agent(), task.id(), failure.clone());
        Ok(Err(failure))
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Begin executing `path` at `priority`.
    ///
    /// # Errors
    ///
    /// Returns the failure when the first leg cannot be reserved; it is
    /// also recorded.
    pub fn start_execution(&mut self, path: PathSpec, priority: Priority) -> Result<PlanExecution, PlanFailure> {
        let (agent, plan) = (path.agent, path.id);
        PlanExecution::start(path, priority, &self.config, &mut self.reservations).inspect_err(|failure| {
            self.failures.record(FailureRecord {
                agent,
                plan,
                failure: failure.clone(),
            });
        })
    }

    /// Advance an execution by one tick in which the agent walked `walked`
    /// metres.
    pub fn tick_execution(&mut self, execution: &mut PlanExecution, walked: f64) -> ExecutionStatus {
        let was_running = *execution.status() == ExecutionStatus::Running;
        let status = execution.tick(&mut self.reservations, walked).clone();
        if was_running && let ExecutionStatus::Failed(failure) = &status {
            self.record(execution.path().agent, execution.path().id, failure.clone());
        }
        status
    }

    /// Stop an execution, releasing its reservations.
    pub fn cancel_execution(&mut self, execution: &mut PlanExecution) -> ExecutionStatus {
        execution.cancel(&mut self.reservations).clone()
    }

    /// Forget everything `agent` holds, as when it is reset or despawned.
    pub fn reset_agent(&mut self, agent: AgentId) -> usize {
        let released = self.reservations.release_agent(agent);
        info!(%agent, released, "agent reservations reset");
        released
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// The graph as node-link JSON.
    ///
    /// # Errors
    ///
    /// Propagates serialization errors.
    pub fn export_json(&self) -> Result<String, PlannerError> {
        Ok(export::to_json(self.maintainer.graph())?)
    }

    /// Write the graph as GraphML.
    ///
    /// # Errors
    ///
    /// Propagates write errors.
    pub fn export_graphml<W: Write>(&self, out: &mut W) -> Result<(), PlannerError> {
        export::write_graphml(self.maintainer.graph(), out)?;
        Ok(())
    }

    fn record(&mut self, agent: AgentId, plan: PlanId, failure: PlanFailure) {
        self.failures.record(FailureRecord { agent, plan, failure });
    }
}
