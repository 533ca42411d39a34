//! Executable plans: path specs and their transition specs.
//!
//! A [`PathSpec`] is the ordered list of resolved states an agent moves
//! through. A transition's route is walked before entering its state. Once
//! assembly marks a path complete its transitions can no longer change;
//! only the progress cursor moves.

use std::collections::BTreeMap;
use std::fmt;

use posture_graph::{GraphError, NodeId, PostureGraph};
use posture_types::{
    AgentId, CarrySpec, CarryTarget, Cost, PlanId, SequenceTag, SlotTarget, StateSpec, VarBinding,
};
use serde::{Deserialize, Serialize};

use crate::error::PlannerError;
use crate::router::RoutePlan;

/// Cost breakdown of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanCost {
    /// Sum of graph edge costs.
    pub edges: Cost,
    /// Destination desirability cost.
    pub terminal: Cost,
    /// Sum of route costs.
    pub routes: Cost,
}

impl PlanCost {
    /// All components summed.
    pub const fn total(&self) -> Cost {
        self.edges.saturating_add(self.terminal).saturating_add(self.routes)
    }
}

impl fmt::Display for PlanCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (edges {}, terminal {}, routes {})",
            self.total(),
            self.edges,
            self.terminal,
            self.routes
        )
    }
}

/// One state of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    /// The state with concrete carry and slot targets.
    pub state: StateSpec,
    /// Graph node of the state.
    pub node: NodeId,
    /// Bindings the state was resolved with.
    pub binding: VarBinding,
    /// Route walked before entering the state.
    pub route: Option<RoutePlan>,
    /// Animation parameters fixed at planning time.
    pub locked_params: BTreeMap<String, String>,
    /// Which part of the plan the transition belongs to.
    pub sequence: SequenceTag,
    /// Owning plan.
    pub plan: PlanId,
    /// Cost of the edge into this state.
    pub edge_cost: Cost,
}

impl TransitionSpec {
    fn lock_params(&mut self) {
        self.locked_params.clear();
        if let CarrySpec::Holding(CarryTarget::Object(item)) = self.state.carry {
            self.locked_params
                .insert("hand".to_owned(), self.binding.hand.as_str().to_owned());
            self.locked_params.insert("carry".to_owned(), item.to_string());
        }
        if let Some(target) = self.state.body.target {
            self.locked_params.insert("target".to_owned(), target.to_string());
        }
        if let Some(surface) = self.state.surface {
            self.locked_params
                .insert("surface".to_owned(), surface.target.to_string());
            if let Some(SlotTarget::Slot(slot)) = surface.slot_target {
                self.locked_params
                    .insert("slot".to_owned(), format!("{}:{}", slot.object, slot.index));
            }
        }
        if let Some(target) = self.binding.interaction_target {
            self.locked_params
                .insert("interaction_target".to_owned(), target.to_string());
        }
    }
}

/// An executable plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSpec {
    /// Plan id, shared with transitions and reservations.
    pub id: PlanId,
    /// Agent the plan is for.
    pub agent: AgentId,
    /// Cost breakdown.
    pub cost: PlanCost,
    transitions: Vec<TransitionSpec>,
    cursor: usize,
    complete: bool,
}

impl PathSpec {
    /// Empty plan.
    pub fn new(id: PlanId, agent: AgentId) -> Self {
        Self {
            id,
            agent,
            cost: PlanCost::default(),
            transitions: Vec::new(),
            cursor: 0,
            complete: false,
        }
    }

    /// A plan that stays in `state`: one transition, no cost.
    pub fn stay(id: PlanId, agent: AgentId, node: NodeId, state: StateSpec) -> Self {
        let mut path = Self::new(id, agent);
        let mut transition = TransitionSpec {
            state,
            node,
            binding: VarBinding::default(),
            route: None,
            locked_params: BTreeMap::new(),
            sequence: SequenceTag::Default,
            plan: id,
            edge_cost: Cost::ZERO,
        };
        transition.lock_params();
        path.transitions.push(transition);
        path.complete = true;
        path
    }

    fn ensure_open(&self) -> Result<(), PlannerError> {
        if self.complete {
            return Err(PlannerError::PlanSealed(self.id));
        }
        Ok(())
    }

    /// Append the state of `node` resolved with `binding`. A state equal to
    /// the last one is skipped unless it carries a route.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::PlanSealed`] once the plan is complete, or a
    /// graph error if `node` is unknown.
    pub fn push(
        &mut self,
        graph: &PostureGraph,
        node: NodeId,
        binding: VarBinding,
        sequence: SequenceTag,
        route: Option<RoutePlan>,
    ) -> Result<(), PlannerError> {
        self.ensure_open()?;
        let spec = graph
            .spec(node)
            .ok_or(GraphError::NodeNotFound(node))?;
        let state = spec.resolve(&binding);
        let last = self.transitions.last();
        if route.is_none() && last.is_some_and(|t| t.node == node && t.state == state) {
            return Ok(());
        }
        let edge_cost = last
            .filter(|t| t.node != node)
            .and_then(|t| graph.edge(t.node, node))
            .map_or(Cost::ZERO, |e| e.cost);
        let mut transition = TransitionSpec {
            state,
            node,
            binding,
            route,
            locked_params: BTreeMap::new(),
            sequence,
            plan: self.id,
            edge_cost,
        };
        transition.lock_params();
        self.transitions.push(transition);
        Ok(())
    }

    /// Attach a route to transition `index`.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::PlanSealed`] once complete and
    /// [`PlannerError::TransitionOutOfRange`] for a bad index.
    pub fn attach_route(&mut self, index: usize, route: RoutePlan) -> Result<(), PlannerError> {
        self.transition_mut(index)?.route = Some(route);
        Ok(())
    }

    /// Replace the binding of transition `index` and re-resolve its state.
    ///
    /// # Errors
    ///
    /// As [`PathSpec::attach_route`].
    pub fn rebind(
        &mut self,
        graph: &PostureGraph,
        index: usize,
        binding: VarBinding,
    ) -> Result<(), PlannerError> {
        let transition = self.transition_mut(index)?;
        let spec = graph
            .spec(transition.node)
            .ok_or(GraphError::NodeNotFound(transition.node))?;
        transition.state = spec.resolve(&binding);
        transition.binding = binding;
        transition.lock_params();
        Ok(())
    }

    fn transition_mut(&mut self, index: usize) -> Result<&mut TransitionSpec, PlannerError> {
        self.ensure_open()?;
        let plan = self.id;
        self.transitions
            .get_mut(index)
            .ok_or(PlannerError::TransitionOutOfRange { plan, index })
    }

    /// Seal the plan.
    pub const fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Whether assembly has finished.
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// All transitions in order.
    pub fn transitions(&self) -> &[TransitionSpec] {
        &self.transitions
    }

    /// Transition `index`.
    pub fn transition(&self, index: usize) -> Option<&TransitionSpec> {
        self.transitions.get(index)
    }

    /// Number of transitions.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Whether the plan has no transitions.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Index of the transition being executed.
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// The transition being executed.
    pub fn current(&self) -> Option<&TransitionSpec> {
        self.transitions.get(self.cursor)
    }

    /// Move the cursor forward. Returns the new current transition.
    pub fn advance(&mut self) -> Option<&TransitionSpec> {
        if self.cursor < self.transitions.len() {
            self.cursor = self.cursor.saturating_add(1);
        }
        self.current()
    }

    /// Whether the cursor has passed the last transition.
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.transitions.len()
    }

    /// The state the plan ends in.
    pub fn final_state(&self) -> Option<&StateSpec> {
        self.transitions.last().map(|t| &t.state)
    }

    /// Every attached route in order.
    pub fn routes(&self) -> impl Iterator<Item = &RoutePlan> {
        self.transitions.iter().filter_map(|t| t.route.as_ref())
    }

    /// Sum of edge costs along the transitions.
    pub fn edge_cost(&self) -> Cost {
        self.transitions
            .iter()
            .fold(Cost::ZERO, |acc, t| acc.saturating_add(t.edge_cost))
    }
}
