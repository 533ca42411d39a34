//! Attribute index: attribute value -> set of nodes holding it.
//!
//! Every node is filed under one key per state-spec attribute. A lookup with
//! several keys intersects the matching sets smallest first, so narrowing
//! costs roughly the size of the smallest set rather than a full scan.

use std::collections::{BTreeMap, BTreeSet};

use posture_types::{
    CarryPattern, CarrySpec, ObjectId, PostureKind, SlotType, StatePattern, StateSpec,
    SurfacePattern, TargetPattern,
};

use crate::graph::NodeId;

/// One indexed attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKey {
    /// Body posture.
    Posture(PostureKind),
    /// Body target (`None` for free standing).
    BodyTarget(Option<ObjectId>),
    /// Surface target (`None` for no surface).
    SurfaceTarget(Option<ObjectId>),
    /// Slot type of the surface slot in use.
    SlotType(Option<SlotType>),
    /// Whether a slot target is set.
    SlotTarget(bool),
    /// Whether the agent carries something.
    Carry(bool),
}

impl AttributeKey {
    /// Every key a node with `spec` is filed under.
    pub fn for_spec(spec: &StateSpec) -> [Self; 6] {
        let surface = spec.surface;
        [
            Self::Posture(spec.body.posture),
            Self::BodyTarget(spec.body.target),
            Self::SurfaceTarget(surface.map(|s| s.target)),
            Self::SlotType(surface.and_then(|s| s.slot_type)),
            Self::SlotTarget(surface.is_some_and(|s| s.slot_target.is_some())),
            Self::Carry(spec.carry != CarrySpec::Nothing),
        ]
    }

    /// Keys a node must hold to possibly match `pattern`.
    pub fn for_pattern(pattern: &StatePattern) -> Vec<Self> {
        let mut keys = Vec::new();
        if let Some(posture) = pattern.posture {
            keys.push(Self::Posture(posture));
        }
        match pattern.target {
            TargetPattern::Any => {}
            TargetPattern::NoTarget => keys.push(Self::BodyTarget(None)),
            TargetPattern::Object(id) => keys.push(Self::BodyTarget(Some(id))),
        }
        match pattern.surface {
            SurfacePattern::Any => {}
            SurfacePattern::NoSurface => keys.push(Self::SurfaceTarget(None)),
            SurfacePattern::At { target, slot_type } => {
                keys.push(Self::SurfaceTarget(Some(target)));
                if let Some(st) = slot_type {
                    keys.push(Self::SlotType(Some(st)));
                }
            }
        }
        match pattern.carry {
            CarryPattern::Any => {}
            CarryPattern::Nothing => keys.push(Self::Carry(false)),
            CarryPattern::Holding => keys.push(Self::Carry(true)),
        }
        keys
    }
}

/// Attribute value -> node set.
#[derive(Debug, Clone, Default)]
pub struct AttributeIndex {
    sets: BTreeMap<AttributeKey, BTreeSet<NodeId>>,
}

impl AttributeIndex {
    /// Empty index.
    pub const fn new() -> Self {
        Self {
            sets: BTreeMap::new(),
        }
    }

    /// File a node under every key of its spec.
    pub fn insert(&mut self, id: NodeId, spec: &StateSpec) {
        for key in AttributeKey::for_spec(spec) {
            self.sets.entry(key).or_default().insert(id);
        }
    }

    /// Remove a node from every subset it was filed under.
    pub fn remove(&mut self, id: NodeId, spec: &StateSpec) {
        for key in AttributeKey::for_spec(spec) {
            if let Some(set) = self.sets.get_mut(&key) {
                set.remove(&id);
                if set.is_empty() {
                    self.sets.remove(&key);
                }
            }
        }
    }

    /// Nodes filed under `key`.
    pub fn get(&self, key: &AttributeKey) -> Option<&BTreeSet<NodeId>> {
        self.sets.get(key)
    }

    /// Nodes filed under every key, or `None` when `keys` is empty (no
    /// narrowing possible).
    pub fn narrow(&self, keys: &[AttributeKey]) -> Option<BTreeSet<NodeId>> {
        let mut sets = Vec::with_capacity(keys.len());
        for key in keys {
            match self.sets.get(key) {
                Some(set) => sets.push(set),
                None => return Some(BTreeSet::new()),
            }
        }
        sets.sort_by_key(|s| s.len());
        let mut iter = sets.into_iter();
        let first = iter.next()?;
        let mut result = first.clone();
        for set in iter {
            result.retain(|id| set.contains(id));
            if result.is_empty() {
                break;
            }
        }
        Some(result)
    }

    /// Whether `id` is filed anywhere.
    pub fn contains(&self, id: NodeId) -> bool {
        self.sets.values().any(|s| s.contains(&id))
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.sets.clear();
    }
}
