//! World model: the objects the posture graph is built against.
//!
//! A [`WorldState`] is a flat `BTreeMap` of [`WorldObject`]s. Objects form a
//! forest through their [`Placement`]: parts hang off their parent, items
//! rest in a surface slot or sit in a storage container's inventory. Only
//! objects placed directly in the world have a location of their own; all
//! other locations are derived by walking up the placement chain.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use posture_types::{AgentId, Aabb, Location, ObjectId, PostureKind, SlotRef, SlotType, Vec2};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GraphError;

/// Upper bound on placement chain depth, guarding against malformed input.
const MAX_PLACEMENT_DEPTH: usize = 32;

/// Where an object is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Placement {
    /// Free-standing in the world, centred at a location.
    World(Location),
    /// A rigid part of another object (a sofa cushion, a desk drawer).
    Part {
        /// The owning object.
        parent: ObjectId,
        /// Offset of the part's centre from the parent's centre.
        offset: Vec2,
    },
    /// Resting in a surface slot.
    Slot(SlotRef),
    /// Inside a storage object's inventory.
    Stored(ObjectId),
    /// In an agent's personal inventory.
    Inventory(AgentId),
    /// In an agent's hand.
    Carried(AgentId),
}

/// A place on a surface where an item can be put down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// What kind of item fits.
    pub slot_type: SlotType,
    /// Offset of the slot from the surface centre.
    pub offset: Vec2,
    /// Direction the slot faces, in radians. An agent must stand on the
    /// facing side to use it.
    pub facing: f64,
    /// The item currently in the slot.
    pub occupant: Option<ObjectId>,
}

impl Slot {
    /// Empty slot.
    pub const fn new(slot_type: SlotType, offset: Vec2, facing: f64) -> Self {
        Self {
            slot_type,
            offset,
            facing,
            occupant: None,
        }
    }
}

/// An object in the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldObject {
    /// Unique identifier.
    pub id: ObjectId,
    /// Human-readable name.
    pub name: String,
    /// Free-form tags used by carry requirements ("book", "plate").
    pub tags: BTreeSet<String>,
    /// Where the object is.
    pub placement: Placement,
    /// Half the footprint size along x and y.
    pub half_extents: Vec2,
    /// Direction the front of the object faces, in radians.
    pub facing: f64,
    /// Stationary postures this object provides.
    pub postures: BTreeSet<PostureKind>,
    /// Surface slots.
    pub slots: Vec<Slot>,
    /// Whether agents can work at this object without using a slot.
    pub surface: bool,
    /// Whether the object stores items in an inventory.
    pub storage: bool,
    /// Whether agents can pick the object up.
    pub carryable: bool,
    /// Surface an agent is automatically at while in one of this object's
    /// postures (a dining chair's table).
    pub linked_surface: Option<ObjectId>,
    /// Whether the object blocks walking and line of sight.
    pub obstacle: bool,
    /// Agent that owns the object, if any.
    pub owner: Option<AgentId>,
}

impl WorldObject {
    /// Plain object with the given name and placement and nothing else.
    pub fn new(name: impl Into<String>, placement: Placement) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.into(),
            tags: BTreeSet::new(),
            placement,
            half_extents: Vec2::new(0.25, 0.25),
            facing: 0.0,
            postures: BTreeSet::new(),
            slots: Vec::new(),
            surface: false,
            storage: false,
            carryable: false,
            linked_surface: None,
            obstacle: false,
            owner: None,
        }
    }

    /// Set the footprint half extents.
    #[must_use]
    pub const fn with_extents(mut self, half_x: f64, half_y: f64) -> Self {
        self.half_extents = Vec2::new(half_x, half_y);
        self
    }

    /// Set the facing direction in radians.
    #[must_use]
    pub const fn facing(mut self, radians: f64) -> Self {
        self.facing = radians;
        self
    }

    /// Add a provided posture.
    #[must_use]
    pub fn with_posture(mut self, posture: PostureKind) -> Self {
        self.postures.insert(posture);
        self
    }

    /// Add a slot.
    #[must_use]
    pub fn with_slot(mut self, slot: Slot) -> Self {
        self.slots.push(slot);
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Mark as a work surface.
    #[must_use]
    pub const fn as_surface(mut self) -> Self {
        self.surface = true;
        self
    }

    /// Mark as a storage container.
    #[must_use]
    pub const fn as_storage(mut self) -> Self {
        self.storage = true;
        self
    }

    /// Mark as carryable.
    #[must_use]
    pub const fn as_carryable(mut self) -> Self {
        self.carryable = true;
        self
    }

    /// Mark as an obstacle.
    #[must_use]
    pub const fn as_obstacle(mut self) -> Self {
        self.obstacle = true;
        self
    }

    /// Link the surface used while in this object's postures.
    #[must_use]
    pub const fn linked_to(mut self, surface: ObjectId) -> Self {
        self.linked_surface = Some(surface);
        self
    }

    /// Set the owning agent.
    #[must_use]
    pub const fn owned_by(mut self, agent: AgentId) -> Self {
        self.owner = Some(agent);
        self
    }

    /// Whether agents can stand at this object as a surface.
    pub fn is_surface(&self) -> bool {
        self.surface || self.storage || !self.slots.is_empty()
    }

    /// Whether this object provides `posture`.
    pub fn provides(&self, posture: PostureKind) -> bool {
        self.postures.contains(&posture)
    }

    /// Whether this object has a slot of `slot_type`.
    pub fn has_slot_type(&self, slot_type: SlotType) -> bool {
        self.slots.iter().any(|s| s.slot_type == slot_type)
    }

    /// Distinct slot types, in order.
    pub fn slot_types(&self) -> BTreeSet<SlotType> {
        self.slots.iter().map(|s| s.slot_type).collect()
    }

    /// The object's own parent, if it is not free-standing.
    pub const fn parent(&self) -> Option<ObjectId> {
        match self.placement {
            Placement::Part { parent, .. } => Some(parent),
            Placement::Slot(slot) => Some(slot.object),
            Placement::Stored(storage) => Some(storage),
            Placement::World(_) | Placement::Inventory(_) | Placement::Carried(_) => None,
        }
    }
}

/// All objects in one zone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldState {
    objects: BTreeMap<ObjectId, WorldObject>,
}

impl WorldState {
    /// Create an empty world.
    pub const fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
        }
    }

    // -------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------

    /// Add an object.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateObject`] if the ID exists,
    /// [`GraphError::ObjectNotFound`] if the placement names a missing
    /// parent, or a slot error if the placement slot is unusable.
    pub fn add_object(&mut self, object: WorldObject) -> Result<(), GraphError> {
        if self.objects.contains_key(&object.id) {
            return Err(GraphError::DuplicateObject(object.id));
        }
        if let Some(parent) = object.parent()
            && !self.objects.contains_key(&parent)
        {
            return Err(GraphError::ObjectNotFound(parent));
        }
        if let Placement::Slot(slot) = object.placement {
            self.claim_slot(slot, object.id)?;
        }
        self.objects.insert(object.id, object);
        Ok(())
    }

    /// Remove an object together with everything placed on or in it.
    ///
    /// Returns the removed IDs, the requested object first.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ObjectNotFound`] if the object does not exist.
    pub fn remove_object(&mut self, id: ObjectId) -> Result<Vec<ObjectId>, GraphError> {
        if !self.objects.contains_key(&id) {
            return Err(GraphError::ObjectNotFound(id));
        }
        let mut removed = vec![id];
        removed.extend(self.descendants(id));
        if let Some(Placement::Slot(slot)) = self.objects.get(&id).map(|o| o.placement) {
            self.release_slot(slot);
        }
        for object in &removed {
            self.objects.remove(object);
        }
        Ok(removed)
    }

    /// Move an object to a new placement.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::ObjectNotFound`] for a missing object or
    /// parent, [`GraphError::PlacementCycle`] when placing an object inside
    /// itself, or a slot error if the target slot is unusable.
    pub fn move_object(&mut self, id: ObjectId, placement: Placement) -> Result<(), GraphError> {
        let Some(old) = self.objects.get(&id).map(|o| o.placement) else {
            return Err(GraphError::ObjectNotFound(id));
        };
        let probe = WorldObject::new("", placement);
        if let Some(parent) = probe.parent() {
            if !self.objects.contains_key(&parent) {
                return Err(GraphError::ObjectNotFound(parent));
            }
            if parent == id || self.ancestors(parent).contains(&id) {
                return Err(GraphError::PlacementCycle(id));
            }
        }
        if let Placement::Slot(slot) = old {
            self.release_slot(slot);
        }
        if let Placement::Slot(slot) = placement
            && let Err(e) = self.claim_slot(slot, id)
        {
            if let Placement::Slot(previous) = old
                && let Err(rollback) = self.claim_slot(previous, id)
            {
                warn!(object = %id, error = %rollback, "could not restore the previous slot after a failed move");
            }
            return Err(e);
        }
        if let Some(object) = self.objects.get_mut(&id) {
            object.placement = placement;
        }
        Ok(())
    }

    fn claim_slot(&mut self, slot: SlotRef, item: ObjectId) -> Result<(), GraphError> {
        let surface = self
            .objects
            .get_mut(&slot.object)
            .ok_or(GraphError::ObjectNotFound(slot.object))?;
        let entry = surface
            .slots
            .get_mut(usize::from(slot.index))
            .ok_or(GraphError::SlotNotFound(slot))?;
        if let Some(occupant) = entry.occupant
            && occupant != item
        {
            return Err(GraphError::SlotOccupied { slot, occupant });
        }
        entry.occupant = Some(item);
        Ok(())
    }

    fn release_slot(&mut self, slot: SlotRef) {
        if let Some(entry) = self
            .objects
            .get_mut(&slot.object)
            .and_then(|o| o.slots.get_mut(usize::from(slot.index)))
        {
            entry.occupant = None;
        }
    }

    // -------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------

    /// Get an object.
    pub fn get(&self, id: ObjectId) -> Option<&WorldObject> {
        self.objects.get(&id)
    }

    /// Whether the object exists.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Iterate over all objects.
    pub fn objects(&self) -> impl Iterator<Item = &WorldObject> {
        self.objects.values()
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the world holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Chain of parents from the immediate parent up to the root.
    pub fn ancestors(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut chain = Vec::new();
        let mut current = self.objects.get(&id).and_then(WorldObject::parent);
        while let Some(parent) = current {
            if chain.contains(&parent) || chain.len() >= MAX_PLACEMENT_DEPTH {
                break;
            }
            chain.push(parent);
            current = self.objects.get(&parent).and_then(WorldObject::parent);
        }
        chain
    }

    /// Objects whose immediate parent is `id`.
    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|o| o.parent() == Some(id))
            .map(|o| o.id)
            .collect()
    }

    /// Every object below `id` in the placement forest, breadth first.
    pub fn descendants(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut found = Vec::new();
        let mut queue: VecDeque<ObjectId> = self.children(id).into();
        while let Some(next) = queue.pop_front() {
            if found.contains(&next) {
                continue;
            }
            found.push(next);
            queue.extend(self.children(next));
        }
        found
    }

    /// Rigid parts of `id` (descendants placed as parts), recursively.
    pub fn parts(&self, id: ObjectId) -> Vec<ObjectId> {
        self.descendants(id)
            .into_iter()
            .filter(|d| {
                self.objects
                    .get(d)
                    .is_some_and(|o| matches!(o.placement, Placement::Part { .. }))
            })
            .collect()
    }

    /// World location of an object's centre, if it is in the world at all.
    ///
    /// Items in an agent's inventory or hand have no location of their own.
    pub fn location_of(&self, id: ObjectId) -> Option<Location> {
        let mut offset = Vec2::ZERO;
        let mut current = id;
        for _ in 0..MAX_PLACEMENT_DEPTH {
            let object = self.objects.get(&current)?;
            match object.placement {
                Placement::World(location) => {
                    return Some(Location::at(location.position + offset, location.floor));
                }
                Placement::Part { parent, offset: part } => {
                    offset = offset + part;
                    current = parent;
                }
                Placement::Slot(slot) => {
                    offset = offset + self.slot(slot)?.offset;
                    current = slot.object;
                }
                Placement::Stored(storage) => current = storage,
                Placement::Inventory(_) | Placement::Carried(_) => return None,
            }
        }
        None
    }

    /// Floor and footprint of an object.
    pub fn bounds_of(&self, id: ObjectId) -> Option<(i32, Aabb)> {
        let object = self.objects.get(&id)?;
        let location = self.location_of(id)?;
        Some((location.floor, Aabb::around(location.position, object.half_extents)))
    }

    /// Point `distance` metres in front of the object's front edge.
    pub fn front_of(&self, id: ObjectId, distance: f64) -> Option<Location> {
        let object = self.objects.get(&id)?;
        let location = self.location_of(id)?;
        let reach = object.half_extents.y + distance;
        Some(Location::at(
            location.position + Vec2::from_angle(object.facing) * reach,
            location.floor,
        ))
    }

    /// Agent holding the object, if it is in an inventory or a hand.
    pub fn holder_of(&self, id: ObjectId) -> Option<AgentId> {
        match self.objects.get(&id)?.placement {
            Placement::Inventory(agent) | Placement::Carried(agent) => Some(agent),
            _ => None,
        }
    }

    /// A slot definition.
    pub fn slot(&self, slot: SlotRef) -> Option<&Slot> {
        self.objects
            .get(&slot.object)?
            .slots
            .get(usize::from(slot.index))
    }

    /// World location of a slot.
    pub fn slot_location(&self, slot: SlotRef) -> Option<Location> {
        let surface = self.location_of(slot.object)?;
        let offset = self.slot(slot)?.offset;
        Some(Location::at(surface.position + offset, surface.floor))
    }

    /// Free slots of `slot_type` on `surface`, in index order.
    pub fn free_slots(&self, surface: ObjectId, slot_type: SlotType) -> Vec<SlotRef> {
        let Some(object) = self.objects.get(&surface) else {
            return Vec::new();
        };
        object
            .slots
            .iter()
            .zip(0_u16..)
            .filter(|(s, _)| s.slot_type == slot_type && s.occupant.is_none())
            .map(|(_, index)| SlotRef {
                object: surface,
                index,
            })
            .collect()
    }

    /// Objects carrying `tag`.
    pub fn objects_with_tag(&self, tag: &str) -> Vec<ObjectId> {
        self.objects
            .values()
            .filter(|o| o.tags.contains(tag))
            .map(|o| o.id)
            .collect()
    }

    /// Obstacle objects with their floor and footprint.
    pub fn obstacles(&self) -> Vec<(ObjectId, i32, Aabb)> {
        self.objects
            .values()
            .filter(|o| o.obstacle)
            .filter_map(|o| self.bounds_of(o.id).map(|(floor, b)| (o.id, floor, b)))
            .collect()
    }

    /// Whether the object can anchor graph nodes: it provides a posture or
    /// a surface and is located in the world.
    pub fn is_planning_object(&self, id: ObjectId) -> bool {
        self.objects
            .get(&id)
            .is_some_and(|o| (!o.postures.is_empty() || o.is_surface()) && !o.carryable)
            && self.location_of(id).is_some()
    }

    /// All planning objects, in ID order.
    pub fn planning_objects(&self) -> Vec<ObjectId> {
        self.objects
            .keys()
            .copied()
            .filter(|id| self.is_planning_object(*id))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn table_with_slots(world: &mut WorldState) -> ObjectId {
        let table = WorldObject::new("table", Placement::World(Location::new(4.0, 0.0, 0)))
            .with_extents(1.0, 0.5)
            .with_slot(Slot::new(SlotType::Small, Vec2::new(-0.5, 0.0), 0.0))
            .with_slot(Slot::new(SlotType::Small, Vec2::new(0.5, 0.0), 0.0))
            .with_slot(Slot::new(SlotType::Eat, Vec2::new(0.0, 0.3), 0.0));
        let id = table.id;
        world.add_object(table).unwrap();
        id
    }

    #[test]
    fn add_rejects_duplicates_and_missing_parents() {
        let mut world = WorldState::new();
        let sofa = WorldObject::new("sofa", Placement::World(Location::new(0.0, 0.0, 0)));
        let sofa_id = sofa.id;
        world.add_object(sofa.clone()).unwrap();
        assert!(matches!(world.add_object(sofa), Err(GraphError::DuplicateObject(_))));

        let orphan = WorldObject::new(
            "cushion",
            Placement::Part {
                parent: ObjectId::new(),
                offset: Vec2::ZERO,
            },
        );
        assert!(matches!(world.add_object(orphan), Err(GraphError::ObjectNotFound(_))));
        assert_eq!(world.len(), 1);
        assert!(world.contains(sofa_id));
    }

    #[test]
    fn part_location_follows_parent() {
        let mut world = WorldState::new();
        let sofa = WorldObject::new("sofa", Placement::World(Location::new(2.0, 3.0, 1)));
        let sofa_id = sofa.id;
        world.add_object(sofa).unwrap();
        let cushion = WorldObject::new(
            "cushion",
            Placement::Part {
                parent: sofa_id,
                offset: Vec2::new(0.5, 0.0),
            },
        );
        let cushion_id = cushion.id;
        world.add_object(cushion).unwrap();

        let location = world.location_of(cushion_id).unwrap();
        assert!((location.position.x - 2.5).abs() < 1e-9);
        assert_eq!(location.floor, 1);
        assert_eq!(world.ancestors(cushion_id), vec![sofa_id]);
        assert_eq!(world.parts(sofa_id), vec![cushion_id]);
    }

    #[test]
    fn slots_track_occupants() {
        let mut world = WorldState::new();
        let table = table_with_slots(&mut world);
        assert_eq!(world.free_slots(table, SlotType::Small).len(), 2);

        let cup = WorldObject::new("cup", Placement::Slot(SlotRef { object: table, index: 0 }))
            .as_carryable();
        let cup_id = cup.id;
        world.add_object(cup).unwrap();
        assert_eq!(world.free_slots(table, SlotType::Small).len(), 1);

        let plate = WorldObject::new("plate", Placement::Slot(SlotRef { object: table, index: 0 }));
        assert!(matches!(world.add_object(plate), Err(GraphError::SlotOccupied { .. })));

        world
            .move_object(cup_id, Placement::Slot(SlotRef { object: table, index: 1 }))
            .unwrap();
        assert_eq!(
            world.free_slots(table, SlotType::Small),
            vec![SlotRef { object: table, index: 0 }]
        );
    }

    #[test]
    fn failed_slot_move_keeps_the_old_slot() {
        let mut world = WorldState::new();
        let table = table_with_slots(&mut world);
        let cup = WorldObject::new("cup", Placement::Slot(SlotRef { object: table, index: 0 }));
        let cup_id = cup.id;
        world.add_object(cup).unwrap();
        let plate = WorldObject::new("plate", Placement::Slot(SlotRef { object: table, index: 1 }));
        world.add_object(plate).unwrap();

        let moved = world.move_object(cup_id, Placement::Slot(SlotRef { object: table, index: 1 }));
        assert!(matches!(moved, Err(GraphError::SlotOccupied { .. })));
        assert!(world.free_slots(table, SlotType::Small).is_empty());
        assert_eq!(
            world.get(cup_id).map(|o| o.placement),
            Some(Placement::Slot(SlotRef { object: table, index: 0 }))
        );
    }

    #[test]
    fn remove_takes_descendants_along() {
        let mut world = WorldState::new();
        let table = table_with_slots(&mut world);
        let cup = WorldObject::new("cup", Placement::Slot(SlotRef { object: table, index: 2 }));
        let cup_id = cup.id;
        world.add_object(cup).unwrap();

        let removed = world.remove_object(table).unwrap();
        assert_eq!(removed, vec![table, cup_id]);
        assert!(world.is_empty());
    }

    #[test]
    fn move_rejects_cycles() {
        let mut world = WorldState::new();
        let crate_a = WorldObject::new("crate", Placement::World(Location::new(0.0, 0.0, 0)))
            .as_storage();
        let a = crate_a.id;
        world.add_object(crate_a).unwrap();
        let crate_b = WorldObject::new("inner", Placement::Stored(a)).as_storage();
        let b = crate_b.id;
        world.add_object(crate_b).unwrap();
        assert!(matches!(
            world.move_object(a, Placement::Stored(b)),
            Err(GraphError::PlacementCycle(_))
        ));
    }

    #[test]
    fn inventory_items_have_no_location() {
        let mut world = WorldState::new();
        let agent = AgentId::new();
        let book = WorldObject::new("book", Placement::Inventory(agent)).as_carryable();
        let id = book.id;
        world.add_object(book).unwrap();
        assert!(world.location_of(id).is_none());
        assert_eq!(world.holder_of(id), Some(agent));
        assert!(!world.is_planning_object(id));
    }
}
