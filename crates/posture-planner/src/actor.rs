//! The planner's view of the agent it plans for.

use std::collections::BTreeSet;

use posture_types::{
    AgentId, BodyCapabilities, CarrySpec, CarryTarget, Hand, Location, ObjectId, Priority,
    StateSpec,
};
use serde::{Deserialize, Serialize};

/// What the planner needs to know about an agent.
///
/// Simulations implement this on their own character type; tests and the
/// binary use [`ActorSnapshot`].
pub trait PlanningActor {
    /// The agent's id.
    fn id(&self) -> AgentId;

    /// Current discrete state, with concrete carry and slot targets.
    fn state(&self) -> StateSpec;

    /// Current position.
    fn location(&self) -> Location;

    /// Reservation priority of the agent's current activity.
    fn priority(&self) -> Priority;

    /// What the agent's body can do.
    fn capabilities(&self) -> &BodyCapabilities;

    /// Hand used for carrying.
    fn hand(&self) -> Hand {
        Hand::Right
    }

    /// The item currently in hand.
    fn carried(&self) -> Option<ObjectId> {
        match self.state().carry {
            CarrySpec::Holding(CarryTarget::Object(item)) => Some(item),
            CarrySpec::Nothing | CarrySpec::Holding(CarryTarget::Variable) => None,
        }
    }

    /// Whether the agent may reserve `object` (ownership, social rules).
    fn may_reserve(&self, object: ObjectId) -> bool {
        let _ = object;
        true
    }
}

/// A plain-data actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    /// Agent id.
    pub id: AgentId,
    /// Current state.
    pub state: StateSpec,
    /// Current position.
    pub location: Location,
    /// Reservation priority.
    pub priority: Priority,
    /// Body capabilities.
    pub capabilities: BodyCapabilities,
    /// Carrying hand.
    pub hand: Hand,
    /// Objects this agent may not reserve.
    pub forbidden: BTreeSet<ObjectId>,
}

impl ActorSnapshot {
    /// Neutral, empty-handed agent at `location` with normal priority.
    pub fn standing_at(location: Location) -> Self {
        Self {
            id: AgentId::new(),
            state: StateSpec::neutral(),
            location,
            priority: Priority::Normal,
            capabilities: BodyCapabilities::default(),
            hand: Hand::Right,
            forbidden: BTreeSet::new(),
        }
    }

    /// Copy in a different state.
    #[must_use]
    pub const fn in_state(mut self, state: StateSpec) -> Self {
        self.state = state;
        self
    }

    /// Copy holding `item`.
    #[must_use]
    pub const fn carrying(mut self, item: ObjectId) -> Self {
        self.state.carry = CarrySpec::Holding(CarryTarget::Object(item));
        self
    }

    /// Copy with a different priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl PlanningActor for ActorSnapshot {
    fn id(&self) -> AgentId {
        self.id
    }

    fn state(&self) -> StateSpec {
        self.state
    }

    fn location(&self) -> Location {
        self.location
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn capabilities(&self) -> &BodyCapabilities {
        &self.capabilities
    }

    fn hand(&self) -> Hand {
        self.hand
    }

    fn may_reserve(&self, object: ObjectId) -> bool {
        !self.forbidden.contains(&object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carried_reads_concrete_item_only() {
        let item = ObjectId::new();
        let actor = ActorSnapshot::standing_at(Location::default());
        assert_eq!(actor.carried(), None);
        assert_eq!(actor.clone().carrying(item).carried(), Some(item));
        let variable = actor.in_state(StateSpec::neutral_carrying());
        assert_eq!(variable.carried(), None);
    }

    #[test]
    fn forbidden_objects_cannot_be_reserved() {
        let bed = ObjectId::new();
        let mut actor = ActorSnapshot::standing_at(Location::default());
        assert!(actor.may_reserve(bed));
        actor.forbidden.insert(bed);
        assert!(!actor.may_reserve(bed));
    }
}
