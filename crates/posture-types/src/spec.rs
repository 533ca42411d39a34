//! State specs, destination patterns, and variable bindings.
//!
//! A [`StateSpec`] describes an agent's discrete physical situation: the
//! posture and what it is anchored to, the surface the agent is working at,
//! and what it carries. Graph nodes never name a concrete carried item or
//! slot; they use the [`CarryTarget::Variable`] and [`SlotTarget::Variable`]
//! placeholders, which a [`VarBinding`] resolves per planning request. That
//! keeps the graph independent of how many carryable items the world holds.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::enums::{Hand, PostureKind, SlotType};
use crate::ids::ObjectId;

/// What an agent holds in its hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CarryTarget {
    /// The item named by [`VarBinding::carry_target`].
    Variable,
    /// A concrete item (only in resolved plan states).
    Object(ObjectId),
}

/// The carry component of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CarrySpec {
    /// Empty-handed.
    Nothing,
    /// Holding an item.
    Holding(CarryTarget),
}

/// A concrete slot on a surface object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotRef {
    /// The surface object that owns the slot.
    pub object: ObjectId,
    /// Index into the object's slot list.
    pub index: u16,
}

/// The slot an item was placed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlotTarget {
    /// The slot named by [`VarBinding::slot_target`].
    Variable,
    /// A concrete slot (only in resolved plan states).
    Slot(SlotRef),
}

/// The body component of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BodySpec {
    /// Posture the body is in.
    pub posture: PostureKind,
    /// Object providing the posture; `None` for free standing.
    pub target: Option<ObjectId>,
}

/// The surface component of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SurfaceSpec {
    /// The surface object the agent works at.
    pub target: ObjectId,
    /// Slot type of the slot in use, if any.
    pub slot_type: Option<SlotType>,
    /// The slot in use, if any.
    pub slot_target: Option<SlotTarget>,
}

/// A discrete agent state: body, surface, carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateSpec {
    /// Posture and its anchor.
    pub body: BodySpec,
    /// Surface the agent is at, if any.
    pub surface: Option<SurfaceSpec>,
    /// What the agent holds.
    pub carry: CarrySpec,
}

impl StateSpec {
    /// Standing, at no surface, empty-handed.
    pub const fn neutral() -> Self {
        Self {
            body: BodySpec {
                posture: PostureKind::Stand,
                target: None,
            },
            surface: None,
            carry: CarrySpec::Nothing,
        }
    }

    /// Standing, at no surface, holding the bound carry target.
    pub const fn neutral_carrying() -> Self {
        Self {
            body: BodySpec {
                posture: PostureKind::Stand,
                target: None,
            },
            surface: None,
            carry: CarrySpec::Holding(CarryTarget::Variable),
        }
    }

    /// Sitting (or otherwise posed) on `target`, empty-handed.
    pub const fn posed(posture: PostureKind, target: ObjectId) -> Self {
        Self {
            body: BodySpec {
                posture,
                target: Some(target),
            },
            surface: None,
            carry: CarrySpec::Nothing,
        }
    }

    /// Whether this is one of the two neutral markers.
    pub fn is_neutral_marker(&self) -> bool {
        self.body.posture == PostureKind::Stand && self.body.target.is_none() && self.surface.is_none()
    }

    /// Whether the body is in a stationary (non-mobile) posture.
    pub const fn is_stationary(&self) -> bool {
        !self.body.posture.is_mobile()
    }

    /// Whether the agent holds something.
    pub const fn is_carrying(&self) -> bool {
        matches!(self.carry, CarrySpec::Holding(_))
    }

    /// The object the state is spatially anchored to: the body target,
    /// falling back to the surface target.
    pub fn anchor(&self) -> Option<ObjectId> {
        self.body.target.or_else(|| self.surface.map(|s| s.target))
    }

    /// Every concrete object the state names.
    pub fn referenced_objects(&self) -> Vec<ObjectId> {
        let mut objects = Vec::new();
        if let Some(target) = self.body.target {
            objects.push(target);
        }
        if let Some(surface) = self.surface {
            objects.push(surface.target);
            if let Some(SlotTarget::Slot(slot)) = surface.slot_target {
                objects.push(slot.object);
            }
        }
        if let CarrySpec::Holding(CarryTarget::Object(item)) = self.carry {
            objects.push(item);
        }
        objects
    }

    /// The graph form of this state: concrete carry and slot targets are
    /// replaced with their variables.
    #[must_use]
    pub fn canonical(&self) -> Self {
        let mut spec = *self;
        if let CarrySpec::Holding(_) = spec.carry {
            spec.carry = CarrySpec::Holding(CarryTarget::Variable);
        }
        if let Some(surface) = spec.surface.as_mut()
            && surface.slot_target.is_some()
        {
            surface.slot_target = Some(SlotTarget::Variable);
        }
        spec
    }

    /// Substitute bound variables with the binding's concrete values.
    #[must_use]
    pub fn resolve(&self, binding: &VarBinding) -> Self {
        let mut spec = *self;
        if let (CarrySpec::Holding(CarryTarget::Variable), Some(item)) = (spec.carry, binding.carry_target) {
            spec.carry = CarrySpec::Holding(CarryTarget::Object(item));
        }
        if let Some(surface) = spec.surface.as_mut()
            && surface.slot_target == Some(SlotTarget::Variable)
            && let Some(slot) = binding.slot_target
        {
            surface.slot_target = Some(SlotTarget::Slot(slot));
        }
        spec
    }

    /// Copy with a different carry component.
    #[must_use]
    pub const fn with_carry(mut self, carry: CarrySpec) -> Self {
        self.carry = carry;
        self
    }

    /// Copy with a different surface component.
    #[must_use]
    pub const fn with_surface(mut self, surface: Option<SurfaceSpec>) -> Self {
        self.surface = surface;
        self
    }
}

impl Default for StateSpec {
    fn default() -> Self {
        Self::neutral()
    }
}

/// First eight hex digits of an object id, for compact display.
fn short(id: ObjectId) -> String {
    id.to_string().chars().take(8).collect()
}

impl fmt::Display for StateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.body.posture.as_str())?;
        if let Some(target) = self.body.target {
            write!(f, "@{}", short(target))?;
        }
        if let Some(surface) = self.surface {
            write!(f, " surface@{}", short(surface.target))?;
            if let Some(slot_type) = surface.slot_type {
                write!(f, "[{}]", slot_type.as_str())?;
            }
        }
        match self.carry {
            CarrySpec::Nothing => Ok(()),
            CarrySpec::Holding(CarryTarget::Variable) => write!(f, " carry=$item"),
            CarrySpec::Holding(CarryTarget::Object(item)) => write!(f, " carry={}", short(item)),
        }
    }
}

/// Per-request values for the variables a graph node can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VarBinding {
    /// The item meant by [`CarryTarget::Variable`].
    pub carry_target: Option<ObjectId>,
    /// Hand used to carry.
    pub hand: Hand,
    /// Slot type the goal wants an item placed into.
    pub slot_type: Option<SlotType>,
    /// The slot meant by [`SlotTarget::Variable`].
    pub slot_target: Option<SlotRef>,
    /// Object the requesting interaction targets.
    pub interaction_target: Option<ObjectId>,
}

impl VarBinding {
    /// Copy with a different carry target.
    #[must_use]
    pub const fn with_carry_target(mut self, item: Option<ObjectId>) -> Self {
        self.carry_target = item;
        self
    }

    /// Copy with a different slot target.
    #[must_use]
    pub const fn with_slot_target(mut self, slot: Option<SlotRef>) -> Self {
        self.slot_target = slot;
        self
    }
}

// ---------------------------------------------------------------------------
// Destination patterns
// ---------------------------------------------------------------------------

/// Which body target a pattern accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPattern {
    /// Any target, or none.
    Any,
    /// Only states with no body target.
    NoTarget,
    /// Only states anchored to this object.
    Object(ObjectId),
}

/// Which surface a pattern accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurfacePattern {
    /// Any surface, or none.
    Any,
    /// Only states at no surface.
    NoSurface,
    /// Only states at `target`, optionally using a slot of `slot_type`.
    At {
        /// Required surface.
        target: ObjectId,
        /// Required slot type of the slot in use.
        slot_type: Option<SlotType>,
    },
}

/// Which carry state a pattern accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CarryPattern {
    /// Either.
    Any,
    /// Empty-handed only.
    Nothing,
    /// Holding the bound carry target.
    Holding,
}

/// A destination description with wildcards, matched against graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePattern {
    /// Required posture; `None` accepts any.
    pub posture: Option<PostureKind>,
    /// Required body target.
    pub target: TargetPattern,
    /// Required surface.
    pub surface: SurfacePattern,
    /// Required carry state.
    pub carry: CarryPattern,
}

impl StatePattern {
    /// Accepts every state.
    pub const fn any() -> Self {
        Self {
            posture: None,
            target: TargetPattern::Any,
            surface: SurfacePattern::Any,
            carry: CarryPattern::Any,
        }
    }

    /// `posture` on `target`, with any surface or carry.
    pub const fn posed_on(posture: PostureKind, target: ObjectId) -> Self {
        Self {
            posture: Some(posture),
            target: TargetPattern::Object(target),
            surface: SurfacePattern::Any,
            carry: CarryPattern::Any,
        }
    }

    /// Free standing at no surface, with any carry.
    pub const fn standing() -> Self {
        Self {
            posture: Some(PostureKind::Stand),
            target: TargetPattern::NoTarget,
            surface: SurfacePattern::NoSurface,
            carry: CarryPattern::Any,
        }
    }

    /// Standing at `surface`, optionally using a slot of `slot_type`.
    pub const fn at_surface(surface: ObjectId, slot_type: Option<SlotType>) -> Self {
        Self {
            posture: Some(PostureKind::Stand),
            target: TargetPattern::NoTarget,
            surface: SurfacePattern::At {
                target: surface,
                slot_type,
            },
            carry: CarryPattern::Any,
        }
    }

    /// Copy with a different carry requirement.
    #[must_use]
    pub const fn with_carry(mut self, carry: CarryPattern) -> Self {
        self.carry = carry;
        self
    }

    /// Copy with a different surface requirement.
    #[must_use]
    pub const fn with_surface(mut self, surface: SurfacePattern) -> Self {
        self.surface = surface;
        self
    }

    /// Whether `spec` satisfies the pattern.
    pub fn matches(&self, spec: &StateSpec) -> bool {
        if self.posture.is_some_and(|p| p != spec.body.posture) {
            return false;
        }
        let target_ok = match self.target {
            TargetPattern::Any => true,
            TargetPattern::NoTarget => spec.body.target.is_none(),
            TargetPattern::Object(id) => spec.body.target == Some(id),
        };
        let surface_ok = match self.surface {
            SurfacePattern::Any => true,
            SurfacePattern::NoSurface => spec.surface.is_none(),
            SurfacePattern::At { target, slot_type } => spec.surface.is_some_and(|s| {
                s.target == target && slot_type.is_none_or(|st| s.slot_type == Some(st))
            }),
        };
        let carry_ok = match self.carry {
            CarryPattern::Any => true,
            CarryPattern::Nothing => spec.carry == CarrySpec::Nothing,
            CarryPattern::Holding => spec.is_carrying(),
        };
        target_ok && surface_ok && carry_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_markers_differ_only_in_carry() {
        let empty = StateSpec::neutral();
        let carrying = StateSpec::neutral_carrying();
        assert!(empty.is_neutral_marker());
        assert!(carrying.is_neutral_marker());
        assert_ne!(empty, carrying);
        assert_eq!(empty.with_carry(carrying.carry), carrying);
    }

    #[test]
    fn canonical_form_erases_concrete_targets() {
        let item = ObjectId::new();
        let table = ObjectId::new();
        let spec = StateSpec::neutral()
            .with_carry(CarrySpec::Holding(CarryTarget::Object(item)))
            .with_surface(Some(SurfaceSpec {
                target: table,
                slot_type: Some(SlotType::Small),
                slot_target: Some(SlotTarget::Slot(SlotRef { object: table, index: 2 })),
            }));
        let canonical = spec.canonical();
        assert_eq!(canonical.carry, CarrySpec::Holding(CarryTarget::Variable));
        assert_eq!(
            canonical.surface.and_then(|s| s.slot_target),
            Some(SlotTarget::Variable)
        );
        assert_eq!(canonical.canonical(), canonical);
    }

    #[test]
    fn resolve_fills_bound_variables_only() {
        let item = ObjectId::new();
        let binding = VarBinding::default().with_carry_target(Some(item));
        let resolved = StateSpec::neutral_carrying().resolve(&binding);
        assert_eq!(resolved.carry, CarrySpec::Holding(CarryTarget::Object(item)));
        let unbound = StateSpec::neutral_carrying().resolve(&VarBinding::default());
        assert_eq!(unbound, StateSpec::neutral_carrying());
    }

    #[test]
    fn pattern_matching() {
        let chair = ObjectId::new();
        let table = ObjectId::new();
        let sitting = StateSpec::posed(PostureKind::Sit, chair).with_surface(Some(SurfaceSpec {
            target: table,
            slot_type: None,
            slot_target: None,
        }));
        assert!(StatePattern::posed_on(PostureKind::Sit, chair).matches(&sitting));
        assert!(!StatePattern::posed_on(PostureKind::Lie, chair).matches(&sitting));
        assert!(!StatePattern::standing().matches(&sitting));
        assert!(
            StatePattern::any()
                .with_surface(SurfacePattern::At { target: table, slot_type: None })
                .matches(&sitting)
        );
        assert!(
            !StatePattern::any()
                .with_carry(CarryPattern::Holding)
                .matches(&sitting)
        );
    }

    #[test]
    fn anchor_prefers_body_target() {
        let chair = ObjectId::new();
        let table = ObjectId::new();
        let surface = Some(SurfaceSpec {
            target: table,
            slot_type: None,
            slot_target: None,
        });
        let sitting = StateSpec::posed(PostureKind::Sit, chair).with_surface(surface);
        assert_eq!(sitting.anchor(), Some(chair));
        assert_eq!(StateSpec::neutral().with_surface(surface).anchor(), Some(table));
        assert_eq!(StateSpec::neutral().anchor(), None);
    }
}
