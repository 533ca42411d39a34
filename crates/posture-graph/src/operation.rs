//! Atomic operations and the edges (operation bundles) built from them.
//!
//! An [`Operation`] is a pure state transform: it maps one [`StateSpec`] to
//! another or fails. Whether the result is a valid node in the current world
//! is decided by the graph when the edge is added; whether a particular agent
//! may traverse the edge is decided by [`Edge::validate`] at search time.

use posture_types::{
    BodyCapabilities, BodySpec, CarrySpec, CarryTarget, Cost, ObjectId, PostureKind, SlotTarget,
    SlotType, StateSpec, SurfaceSpec, VarBinding,
};
use serde::{Deserialize, Serialize};

use crate::config::OperationCosts;

/// One atomic change to an agent's discrete state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Assume a posture. Stationary postures are only entered from free
    /// standing; the mobile posture can be returned to from anywhere.
    Body {
        /// The posture to assume.
        posture: PostureKind,
        /// Object providing it.
        target: Option<ObjectId>,
    },
    /// Step up to a surface, optionally at a slot of a given type.
    Surface {
        /// The surface object.
        target: ObjectId,
        /// Slot type the agent works with.
        slot_type: Option<SlotType>,
    },
    /// Leave the current surface while keeping a stationary posture.
    ForgetSurface,
    /// Take the bound item into the hand.
    PickUp,
    /// Release the held item, into a slot of the current surface when a
    /// slot type is given.
    PutDown {
        /// Slot type the item goes into.
        slot_type: Option<SlotType>,
    },
}

/// What an edge validator sees.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// The requesting agent's body.
    pub capabilities: &'a BodyCapabilities,
    /// Variable bindings of the current request.
    pub binding: &'a VarBinding,
}

impl Operation {
    /// Apply to `state`, or `None` if the operation does not apply.
    pub fn apply(&self, state: &StateSpec) -> Option<StateSpec> {
        match *self {
            Self::Body { posture, target } => apply_body(state, posture, target),
            Self::Surface { target, slot_type } => {
                if state.surface.is_some() {
                    return None;
                }
                if slot_type.is_some() && state.is_carrying() {
                    return None;
                }
                if state.body.posture.is_mobile() && state.body.target.is_some() {
                    return None;
                }
                Some(state.with_surface(Some(SurfaceSpec {
                    target,
                    slot_type,
                    slot_target: slot_type.map(|_| SlotTarget::Variable),
                })))
            }
            Self::ForgetSurface => {
                if state.surface.is_none() || state.body.posture.is_mobile() {
                    return None;
                }
                Some(state.with_surface(None))
            }
            Self::PickUp => {
                if state.is_carrying() || !state.body.posture.supports_carry() {
                    return None;
                }
                let surface = state.surface.map(|s| SurfaceSpec {
                    slot_type: None,
                    slot_target: None,
                    ..s
                });
                Some(
                    state
                        .with_surface(surface)
                        .with_carry(CarrySpec::Holding(CarryTarget::Variable)),
                )
            }
            Self::PutDown { slot_type } => {
                if !state.is_carrying() {
                    return None;
                }
                let surface = match (slot_type, state.surface) {
                    (None, surface) => surface,
                    (Some(st), Some(s)) if s.slot_type.is_none() => Some(SurfaceSpec {
                        slot_type: Some(st),
                        slot_target: Some(SlotTarget::Variable),
                        ..s
                    }),
                    (Some(_), _) => return None,
                };
                Some(state.with_surface(surface).with_carry(CarrySpec::Nothing))
            }
        }
    }

    /// Cost of applying to `from`.
    pub const fn cost(&self, from: &StateSpec, costs: &OperationCosts) -> Cost {
        match *self {
            Self::Body { posture, .. } => {
                if !posture.is_mobile() {
                    costs.posture(posture)
                } else if from.body.posture.is_mobile() {
                    costs.forget_surface
                } else {
                    costs.stand
                }
            }
            Self::Surface { .. } => costs.surface,
            Self::ForgetSurface => costs.forget_surface,
            Self::PickUp => costs.pick_up,
            Self::PutDown { .. } => costs.put_down,
        }
    }

    /// Whether an agent with the given body and bindings may perform it.
    pub fn validate(&self, ctx: &ValidationContext<'_>) -> bool {
        match *self {
            Self::Body { posture, .. } => ctx.capabilities.supports(posture),
            Self::Surface { .. } | Self::ForgetSurface => true,
            Self::PickUp => ctx.capabilities.can_carry && ctx.binding.carry_target.is_some(),
            Self::PutDown { slot_type: None } => true,
            Self::PutDown {
                slot_type: Some(st),
            } => ctx.binding.slot_type.is_none_or(|wanted| wanted == st),
        }
    }

    /// Whether the operation changes what the agent holds.
    pub const fn changes_carry(&self) -> bool {
        matches!(self, Self::PickUp | Self::PutDown { .. })
    }

    /// Compact label used in diagnostics export.
    pub fn label(&self) -> String {
        match *self {
            Self::Body { posture, target } => match target {
                Some(t) => format!("body({}@{t})", posture.as_str()),
                None => format!("body({})", posture.as_str()),
            },
            Self::Surface { target, slot_type } => match slot_type {
                Some(st) => format!("surface({target}[{}])", st.as_str()),
                None => format!("surface({target})"),
            },
            Self::ForgetSurface => "forget_surface".to_owned(),
            Self::PickUp => "pick_up".to_owned(),
            Self::PutDown { slot_type } => match slot_type {
                Some(st) => format!("put_down[{}]", st.as_str()),
                None => "put_down".to_owned(),
            },
        }
    }
}

fn apply_body(state: &StateSpec, posture: PostureKind, target: Option<ObjectId>) -> Option<StateSpec> {
    let body = BodySpec { posture, target };
    if posture.is_mobile() {
        let unchanged = state.body == body && state.surface.is_none();
        if unchanged {
            return None;
        }
        return Some(StateSpec {
            body,
            surface: None,
            carry: state.carry,
        });
    }
    let free_standing =
        state.body.posture.is_mobile() && state.body.target.is_none() && state.surface.is_none();
    if !free_standing || target.is_none() {
        return None;
    }
    if state.is_carrying() && !posture.supports_carry() {
        return None;
    }
    Some(StateSpec {
        body,
        surface: None,
        carry: state.carry,
    })
}

/// A directed graph edge: an ordered bundle of operations with its summed
/// cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Operations in application order.
    pub operations: Vec<Operation>,
    /// Sum of the operations' costs along the bundle.
    pub cost: Cost,
}

impl Edge {
    /// Apply every operation in order, accumulating cost. `None` if any
    /// operation fails or the bundle leaves the state unchanged.
    pub fn from_bundle(
        from: &StateSpec,
        operations: &[Operation],
        costs: &OperationCosts,
    ) -> Option<(StateSpec, Self)> {
        let mut state = *from;
        let mut cost = Cost::ZERO;
        for op in operations {
            cost = cost.saturating_add(op.cost(&state, costs));
            state = op.apply(&state)?;
        }
        if state == *from {
            return None;
        }
        Some((
            state,
            Self {
                operations: operations.to_vec(),
                cost,
            },
        ))
    }

    /// Whether every operation validates.
    pub fn validate(&self, ctx: &ValidationContext<'_>) -> bool {
        self.operations.iter().all(|op| op.validate(ctx))
    }

    /// Whether the edge picks up or puts down an item.
    pub fn changes_carry(&self) -> bool {
        self.operations.iter().any(Operation::changes_carry)
    }

    /// Whether the edge contains a pick-up.
    pub fn picks_up(&self) -> bool {
        self.operations.contains(&Operation::PickUp)
    }

    /// Whether the edge contains a put-down.
    pub fn puts_down(&self) -> bool {
        self.operations
            .iter()
            .any(|op| matches!(op, Operation::PutDown { .. }))
    }
}
