//! Goal constraints: what end states an intended action accepts.
//!
//! A [`GoalConstraint`] combines weighted destination patterns with goal
//! geometry (a union of per-floor region intersections), an optional carry
//! requirement, a slot type for put-down goals, and an optional
//! line-of-sight reference object.

use posture_graph::{Placement, WorldState};
use posture_types::{
    AgentId, CarryPattern, CarrySpec, CarryTarget, Cost, Location, ObjectId, PostureKind, SlotType,
    SpatialConstraint, StatePattern, StateSpec,
};
use serde::{Deserialize, Serialize};

/// An acceptable end state and how desirable it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Which states qualify.
    pub pattern: StatePattern,
    /// Terminal cost charged when the plan ends here.
    pub cost: Cost,
}

/// The item a goal needs in hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarryRequirement {
    /// A specific item.
    Object(ObjectId),
    /// Any carryable item with this tag.
    Tagged(String),
}

impl CarryRequirement {
    /// Whether `item` satisfies the requirement.
    pub fn accepts(&self, world: &WorldState, item: ObjectId) -> bool {
        match self {
            Self::Object(id) => *id == item,
            Self::Tagged(tag) => world
                .get(item)
                .is_some_and(|o| o.carryable && o.tags.contains(tag)),
        }
    }
}

/// Geometric and semantic description of acceptable end states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalConstraint {
    /// Weighted destination patterns; any one suffices.
    pub destinations: Vec<Destination>,
    /// Goal geometry; a location must satisfy at least one entry. Empty
    /// means anywhere.
    pub geometry: Vec<SpatialConstraint>,
    /// Item the agent must bring.
    pub carry: Option<CarryRequirement>,
    /// Slot type a put-down must use.
    pub slot_type: Option<SlotType>,
    /// Object the final position must see.
    pub line_of_sight: Option<ObjectId>,
    /// Object the requesting interaction is about.
    pub interaction_target: Option<ObjectId>,
}

impl GoalConstraint {
    /// Constraint with one zero-cost destination and nothing else.
    pub fn new(pattern: StatePattern) -> Self {
        Self {
            destinations: vec![Destination {
                pattern,
                cost: Cost::ZERO,
            }],
            geometry: Vec::new(),
            carry: None,
            slot_type: None,
            line_of_sight: None,
            interaction_target: None,
        }
    }

    /// Sit (or lie, or occupy) on `target`, empty-handed.
    pub fn posture_on(posture: PostureKind, target: ObjectId) -> Self {
        Self::new(StatePattern::posed_on(posture, target).with_carry(CarryPattern::Nothing))
            .targeting(target)
    }

    /// Stand at `surface`, optionally at a slot of `slot_type`.
    pub fn at_surface(surface: ObjectId, slot_type: Option<SlotType>) -> Self {
        Self::new(StatePattern::at_surface(surface, slot_type)).targeting(surface)
    }

    /// Stand anywhere inside `area` holding an item matching `carry`.
    pub fn carry_to(carry: CarryRequirement, area: SpatialConstraint) -> Self {
        Self::new(StatePattern::standing().with_carry(CarryPattern::Holding))
            .with_carry(carry)
            .within(area)
    }

    /// Stand anywhere inside `area`.
    pub fn stand_in(area: SpatialConstraint) -> Self {
        Self::new(StatePattern::standing()).within(area)
    }

    /// Add another acceptable destination.
    #[must_use]
    pub fn or(mut self, pattern: StatePattern, cost: Cost) -> Self {
        self.destinations.push(Destination { pattern, cost });
        self
    }

    /// Add a goal geometry entry.
    #[must_use]
    pub fn within(mut self, area: SpatialConstraint) -> Self {
        self.geometry.push(area);
        self
    }

    /// Require an item in hand.
    #[must_use]
    pub fn with_carry(mut self, carry: CarryRequirement) -> Self {
        self.carry = Some(carry);
        self
    }

    /// Require a slot type for put-downs.
    #[must_use]
    pub const fn with_slot_type(mut self, slot_type: SlotType) -> Self {
        self.slot_type = Some(slot_type);
        self
    }

    /// Require line of sight to `object`.
    #[must_use]
    pub const fn seeing(mut self, object: ObjectId) -> Self {
        self.line_of_sight = Some(object);
        self
    }

    /// Record the interaction target.
    #[must_use]
    pub const fn targeting(mut self, object: ObjectId) -> Self {
        self.interaction_target = Some(object);
        self
    }

    /// Lowest terminal cost among destinations matching `spec`.
    pub fn destination_cost(&self, spec: &StateSpec) -> Option<Cost> {
        self.destinations
            .iter()
            .filter(|d| d.pattern.matches(spec))
            .map(|d| d.cost)
            .min()
    }

    /// Whether `location` satisfies the goal geometry.
    pub fn contains_location(&self, location: &Location) -> bool {
        self.geometry.is_empty() || self.geometry.iter().any(|g| g.contains(location))
    }

    /// Whether an agent in `state` at `location` already satisfies the
    /// constraint. `state` must be resolved (concrete carry target).
    pub fn is_satisfied_by(&self, world: &WorldState, state: &StateSpec, location: &Location) -> bool {
        if self.destination_cost(&state.canonical()).is_none() {
            return false;
        }
        if !self.contains_location(location) {
            return false;
        }
        match &self.carry {
            None => true,
            Some(requirement) => match state.carry {
                CarrySpec::Holding(CarryTarget::Object(item)) => requirement.accepts(world, item),
                CarrySpec::Nothing | CarrySpec::Holding(CarryTarget::Variable) => false,
            },
        }
    }

    /// Candidate items for the carry requirement, excluding items held by
    /// other agents.
    pub fn carry_candidates(&self, world: &WorldState, agent: AgentId) -> Vec<ObjectId> {
        let Some(requirement) = &self.carry else {
            return Vec::new();
        };
        let ids = match requirement {
            CarryRequirement::Object(id) => vec![*id],
            CarryRequirement::Tagged(tag) => world.objects_with_tag(tag),
        };
        ids.into_iter()
            .filter(|id| {
                world.get(*id).is_some_and(|o| {
                    o.carryable
                        && match o.placement {
                            Placement::Inventory(holder) | Placement::Carried(holder) => holder == agent,
                            Placement::World(_)
                            | Placement::Part { .. }
                            | Placement::Slot(_)
                            | Placement::Stored(_) => true,
                        }
                })
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use posture_graph::WorldObject;
    use posture_types::{Region, Vec2};

    use super::*;

    #[test]
    fn destination_cost_takes_cheapest_match() {
        let chair = ObjectId::new();
        let constraint = GoalConstraint::posture_on(PostureKind::Sit, chair)
            .or(StatePattern::standing(), Cost::from_units(3));
        let seated = StateSpec::posed(PostureKind::Sit, chair);
        assert_eq!(constraint.destination_cost(&seated), Some(Cost::ZERO));
        assert_eq!(
            constraint.destination_cost(&StateSpec::neutral()),
            Some(Cost::from_units(3))
        );
        assert_eq!(
            constraint.destination_cost(&StateSpec::posed(PostureKind::Lie, chair)),
            None
        );
    }

    #[test]
    fn satisfaction_checks_geometry_and_carry() {
        let mut world = WorldState::new();
        let book = WorldObject::new("book", Placement::World(Location::new(0.0, 0.0, 0)))
            .with_tag("book")
            .as_carryable();
        let book_id = book.id;
        world.add_object(book).unwrap();

        let area = SpatialConstraint::new(0, Region::circle(Vec2::new(10.0, 0.0), 2.0));
        let constraint = GoalConstraint::carry_to(CarryRequirement::Tagged("book".to_owned()), area);
        let inside = Location::new(10.5, 0.0, 0);
        let outside = Location::new(0.0, 0.0, 0);
        let holding = StateSpec::neutral().with_carry(CarrySpec::Holding(CarryTarget::Object(book_id)));

        assert!(constraint.is_satisfied_by(&world, &holding, &inside));
        assert!(!constraint.is_satisfied_by(&world, &holding, &outside));
        assert!(!constraint.is_satisfied_by(&world, &StateSpec::neutral(), &inside));
    }

    #[test]
    fn carry_candidates_skip_items_held_by_others() {
        let mut world = WorldState::new();
        let me = AgentId::new();
        let other = AgentId::new();
        let mine = WorldObject::new("cup", Placement::Inventory(me)).with_tag("cup").as_carryable();
        let theirs = WorldObject::new("cup", Placement::Carried(other))
            .with_tag("cup")
            .as_carryable();
        let mine_id = mine.id;
        world.add_object(mine).unwrap();
        world.add_object(theirs).unwrap();

        let constraint = GoalConstraint::stand_in(SpatialConstraint::whole_floor(0))
            .with_carry(CarryRequirement::Tagged("cup".to_owned()));
        assert_eq!(constraint.carry_candidates(&world, me), vec![mine_id]);
    }
}
