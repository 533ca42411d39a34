//! Enumeration types for the posture planner.
//!
//! Postures, slot types, hands, plan sequence tags, reservation priorities,
//! and the kinds of animated transitions a plan can contain.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Postures
// ---------------------------------------------------------------------------

/// A body posture an agent can be in.
///
/// [`PostureKind::Stand`] is the only mobile posture: an agent must be
/// standing to walk a route. Every other posture is stationary and is
/// always anchored to the object that provides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PostureKind {
    /// Standing upright. Mobile; may route.
    Stand,
    /// Seated on a chair, sofa cushion, stool, or bench.
    Sit,
    /// Lying on a bed or couch.
    Lie,
    /// Occupying a container slot (bathtub, vehicle seat, booth).
    Occupy,
}

impl PostureKind {
    /// Every posture, in declaration order.
    pub const ALL: [Self; 4] = [Self::Stand, Self::Sit, Self::Lie, Self::Occupy];

    /// Whether an agent in this posture can walk a route.
    pub const fn is_mobile(self) -> bool {
        matches!(self, Self::Stand)
    }

    /// Whether this posture must be anchored to a providing object.
    pub const fn requires_target(self) -> bool {
        !self.is_mobile()
    }

    /// Whether the agent can hold an item in this posture.
    pub const fn supports_carry(self) -> bool {
        matches!(self, Self::Stand | Self::Sit)
    }

    /// Short lowercase name used in diagnostics export.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stand => "stand",
            Self::Sit => "sit",
            Self::Lie => "lie",
            Self::Occupy => "occupy",
        }
    }
}

// ---------------------------------------------------------------------------
// Slots and hands
// ---------------------------------------------------------------------------

/// The type of a surface slot an item can be placed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SlotType {
    /// Small decorative or handheld items.
    Small,
    /// Medium items such as plates or books.
    Medium,
    /// Large items such as boxes or platters.
    Large,
    /// Dining slots in front of a seat.
    Eat,
}

impl SlotType {
    /// Short lowercase name used in diagnostics export.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Eat => "eat",
        }
    }
}

/// The hand an agent uses to carry an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Hand {
    /// Left hand.
    Left,
    /// Right hand (the default carry hand).
    #[default]
    Right,
}

impl Hand {
    /// Short lowercase name used in locked animation parameters.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

/// Groups the transitions of a plan that belong to one object-handling
/// interlude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum SequenceTag {
    /// Ordinary posture transitions.
    #[default]
    Default,
    /// Transitions that fetch the item the goal needs.
    Pickup,
    /// Transitions that get rid of the item currently held.
    Putdown,
}

/// Reservation priority of a plan.
///
/// Ordering matters: a reservation held at a priority greater than or equal
/// to the requester's blocks it, a strictly lower one is displaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
    /// Autonomous, low-interest activity.
    Low,
    /// Regular autonomous activity.
    #[default]
    Normal,
    /// Player-directed activity.
    High,
    /// Scripted activity that must not be interrupted.
    Critical,
}

/// The kind of an animated transition between two consecutive plan states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransitionKind {
    /// Take an item into the hand.
    PickUp,
    /// Release the held item onto a slot, the floor, or the inventory.
    PutDown,
    /// Sit down on the target.
    Sit,
    /// Lie down on the target.
    LieDown,
    /// Enter a container slot.
    Enter,
    /// Stand up from a seated or lying posture.
    Stand,
    /// Leave a container slot.
    Exit,
}

impl TransitionKind {
    /// Short lowercase name used in logs and plan output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PickUp => "pick_up",
            Self::PutDown => "put_down",
            Self::Sit => "sit",
            Self::LieDown => "lie_down",
            Self::Enter => "enter",
            Self::Stand => "stand",
            Self::Exit => "exit",
        }
    }
}
