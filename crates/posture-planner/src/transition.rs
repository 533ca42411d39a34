//! Sub-actions materialized from a finished plan.
//!
//! Only some state changes are animated. Stepping up to or away from a
//! surface is free; picking up, putting down, and moving between postures
//! are not. Each consecutive pair of plan states yields, in order: a walk
//! along the attached route, leaving the old posture, the carry change, and
//! entering the new posture.

use std::collections::BTreeMap;

use posture_types::{
    CarrySpec, CarryTarget, ObjectId, PostureKind, SequenceTag, SlotRef, SlotTarget, StateSpec,
    TransitionKind,
};
use serde::{Deserialize, Serialize};

use crate::path::{PathSpec, TransitionSpec};
use crate::reservation::ReservationKey;
use crate::router::RoutePlan;

/// One animated transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionAction {
    /// Index of the plan transition this action enters.
    pub index: usize,
    /// What happens.
    pub kind: TransitionKind,
    /// Posture object involved, for posture changes.
    pub target: Option<ObjectId>,
    /// Slot involved, for carry changes.
    pub slot: Option<SlotRef>,
    /// Item involved, for carry changes.
    pub item: Option<ObjectId>,
    /// Keys that must be held while the action plays.
    pub reservations: Vec<ReservationKey>,
    /// Plan part the action belongs to.
    pub sequence: SequenceTag,
    /// Locked animation parameters of the entered state.
    pub params: BTreeMap<String, String>,
}

/// One step an interaction executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubAction {
    /// Walk a route before entering transition `transition`.
    Walk {
        /// Index of the plan transition the route belongs to.
        transition: usize,
        /// The route.
        route: RoutePlan,
    },
    /// Play an animated transition.
    Transition(TransitionAction),
}

impl SubAction {
    /// Plan transition the step belongs to.
    pub const fn transition_index(&self) -> usize {
        match self {
            Self::Walk { transition, .. } => *transition,
            Self::Transition(action) => action.index,
        }
    }

    /// Keys the step needs.
    pub fn reservations(&self) -> &[ReservationKey] {
        match self {
            Self::Walk { .. } => &[],
            Self::Transition(action) => &action.reservations,
        }
    }

    /// Whether the step is a walk.
    pub const fn is_walk(&self) -> bool {
        matches!(self, Self::Walk { .. })
    }
}

/// Every sub-action of `path`, in execution order.
pub fn sub_actions(path: &PathSpec) -> Vec<SubAction> {
    let transitions = path.transitions();
    let mut actions = Vec::new();
    let mut previous: Option<&TransitionSpec> = None;
    for (index, current) in transitions.iter().enumerate() {
        if let Some(route) = &current.route {
            actions.push(SubAction::Walk {
                transition: index,
                route: route.clone(),
            });
        }
        if let Some(before) = previous {
            actions.extend(
                between(&before.state, current)
                    .into_iter()
                    .map(|kind| action(index, kind, &before.state, current))
                    .map(SubAction::Transition),
            );
        }
        previous = Some(current);
    }
    actions
}

/// Animated transition kinds between two consecutive states.
fn between(from: &StateSpec, to: &TransitionSpec) -> Vec<TransitionKind> {
    let to_state = &to.state;
    let mut kinds = Vec::new();
    let body_changed = from.body != to_state.body;
    if body_changed && !from.body.posture.is_mobile() {
        kinds.push(match from.body.posture {
            PostureKind::Occupy => TransitionKind::Exit,
            PostureKind::Stand | PostureKind::Sit | PostureKind::Lie => TransitionKind::Stand,
        });
    }
    match (from.is_carrying(), to_state.is_carrying()) {
        (false, true) => kinds.push(TransitionKind::PickUp),
        (true, false) => kinds.push(TransitionKind::PutDown),
        (true, true) | (false, false) => {}
    }
    if body_changed {
        match to_state.body.posture {
            PostureKind::Sit => kinds.push(TransitionKind::Sit),
            PostureKind::Lie => kinds.push(TransitionKind::LieDown),
            PostureKind::Occupy => kinds.push(TransitionKind::Enter),
            PostureKind::Stand => {}
        }
    }
    kinds
}

fn action(index: usize, kind: TransitionKind, from: &StateSpec, to: &TransitionSpec) -> TransitionAction {
    let (target, slot, item) = match kind {
        TransitionKind::Stand | TransitionKind::Exit => (from.body.target, None, None),
        TransitionKind::Sit | TransitionKind::LieDown | TransitionKind::Enter => {
            (to.state.body.target, None, None)
        }
        TransitionKind::PickUp => (None, slot_of(from), carried(&to.state)),
        TransitionKind::PutDown => (None, slot_of(&to.state), carried(from)),
    };
    let mut reservations = Vec::new();
    match kind {
        TransitionKind::Sit | TransitionKind::LieDown | TransitionKind::Enter => {
            reservations.extend(target.map(ReservationKey::Object));
        }
        TransitionKind::PickUp => {
            reservations.extend(item.map(ReservationKey::Object));
            reservations.extend(slot.map(ReservationKey::Slot));
        }
        TransitionKind::PutDown => reservations.extend(slot.map(ReservationKey::Slot)),
        TransitionKind::Stand | TransitionKind::Exit => {}
    }
    TransitionAction {
        index,
        kind,
        target,
        slot,
        item,
        reservations,
        sequence: to.sequence,
        params: to.locked_params.clone(),
    }
}

fn slot_of(state: &StateSpec) -> Option<SlotRef> {
    match state.surface?.slot_target? {
        SlotTarget::Slot(slot) => Some(slot),
        SlotTarget::Variable => None,
    }
}

const fn carried(state: &StateSpec) -> Option<ObjectId> {
    match state.carry {
        CarrySpec::Holding(CarryTarget::Object(item)) => Some(item),
        CarrySpec::Nothing | CarrySpec::Holding(CarryTarget::Variable) => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use posture_graph::{GraphConfig, GraphMaintainer, Placement, Slot, WorldObject, WorldState};
    use posture_types::{AgentId, Location, PlanId, SlotType, SurfaceSpec, VarBinding, Vec2};

    use super::*;

    struct Room {
        world: WorldState,
        maintainer: GraphMaintainer,
        chair: ObjectId,
        table: ObjectId,
    }

    fn room() -> Room {
        let mut world = WorldState::new();
        let chair = WorldObject::new("chair", Placement::World(Location::new(2.0, 0.0, 0)))
            .with_posture(PostureKind::Sit);
        let table = WorldObject::new("table", Placement::World(Location::new(-2.0, 0.0, 0)))
            .with_extents(0.6, 0.4)
            .as_surface()
            .with_slot(Slot::new(SlotType::Small, Vec2::new(0.2, 0.0), 0.0));
        let (chair_id, table_id) = (chair.id, table.id);
        world.add_object(chair).unwrap();
        world.add_object(table).unwrap();
        let mut maintainer = GraphMaintainer::new(GraphConfig::default());
        maintainer.rebuild(&world).unwrap();
        Room {
            world,
            maintainer,
            chair: chair_id,
            table: table_id,
        }
    }

    fn node(room: &Room, spec: &StateSpec) -> posture_graph::NodeId {
        room.maintainer.graph().node_for(spec).unwrap()
    }

    fn animated(actions: &[SubAction]) -> Vec<&TransitionAction> {
        actions
            .iter()
            .filter_map(|a| match a {
                SubAction::Transition(t) => Some(t),
                SubAction::Walk { .. } => None,
            })
            .collect()
    }

    #[test]
    fn walking_to_a_chair_sits_once() {
        let room = room();
        let graph = room.maintainer.graph();
        let mut path = PathSpec::new(PlanId::new(), AgentId::new());
        let binding = VarBinding::default();
        path.push(graph, graph.neutral(), binding, SequenceTag::Default, None)
            .unwrap();
        let route = RoutePlan::stationary(Location::new(2.0, 1.0, 0));
        let seated = node(&room, &StateSpec::posed(PostureKind::Sit, room.chair));
        path.push(graph, seated, binding, SequenceTag::Default, Some(route))
            .unwrap();

        let actions = sub_actions(&path);
        assert_eq!(actions.len(), 2);
        assert!(actions.first().unwrap().is_walk());
        let animated = animated(&actions);
        assert_eq!(animated.len(), 1);
        let sit = animated[0];
        assert_eq!(sit.kind, TransitionKind::Sit);
        assert_eq!(sit.target, Some(room.chair));
        assert_eq!(sit.reservations, vec![ReservationKey::Object(room.chair)]);
    }

    #[test]
    fn getting_up_to_fetch_an_item_stands_then_picks_up() {
        let room = room();
        let graph = room.maintainer.graph();
        let item = ObjectId::new();
        let mut path = PathSpec::new(PlanId::new(), AgentId::new());
        let seated = node(&room, &StateSpec::posed(PostureKind::Sit, room.chair));
        path.push(graph, seated, VarBinding::default(), SequenceTag::Default, None)
            .unwrap();
        path.push(graph, graph.neutral(), VarBinding::default(), SequenceTag::Default, None)
            .unwrap();
        let binding = VarBinding::default().with_carry_target(Some(item));
        path.push(graph, graph.neutral_carrying(), binding, SequenceTag::Pickup, None)
            .unwrap();

        let actions = sub_actions(&path);
        let kinds: Vec<TransitionKind> = animated(&actions).iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TransitionKind::Stand, TransitionKind::PickUp]);
        let pickup = sub_actions(&path).pop().unwrap();
        assert_eq!(pickup.reservations(), &[ReservationKey::Object(item)]);
        assert_eq!(pickup.transition_index(), 2);
    }

    #[test]
    fn put_down_reserves_the_resolved_slot() {
        let room = room();
        let graph = room.maintainer.graph();
        let item = ObjectId::new();
        let slot = SlotRef {
            object: room.table,
            index: 0,
        };
        let holding = VarBinding::default().with_carry_target(Some(item));
        let at_table = StateSpec::neutral_carrying().with_surface(Some(SurfaceSpec {
            target: room.table,
            slot_type: None,
            slot_target: None,
        }));
        let placed = StateSpec::neutral().with_surface(Some(SurfaceSpec {
            target: room.table,
            slot_type: Some(SlotType::Small),
            slot_target: Some(SlotTarget::Variable),
        }));
        let mut path = PathSpec::new(PlanId::new(), AgentId::new());
        path.push(graph, graph.neutral_carrying(), holding, SequenceTag::Default, None)
            .unwrap();
        path.push(graph, node(&room, &at_table), holding, SequenceTag::Default, None)
            .unwrap();
        path.push(
            graph,
            node(&room, &placed),
            holding.with_slot_target(Some(slot)),
            SequenceTag::Putdown,
            None,
        )
        .unwrap();

        let actions = sub_actions(&path);
        assert_eq!(actions.len(), 1);
        let put = animated(&actions)[0];
        assert_eq!(put.kind, TransitionKind::PutDown);
        assert_eq!(put.item, Some(item));
        assert_eq!(put.slot, Some(slot));
        assert_eq!(put.reservations, vec![ReservationKey::Slot(slot)]);
        assert_eq!(put.sequence, SequenceTag::Putdown);
        assert_eq!(room.world.free_slots(room.table, SlotType::Small).len(), 1);
    }
}
