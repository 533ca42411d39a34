//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Agents, world objects, and plans each get a strongly-typed ID so that an
//! object id can never be passed where a plan id is expected. All IDs use
//! UUID v7 (time-ordered), which keeps `BTreeMap` iteration roughly in
//! creation order.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for an agent (a character whose postures are planned).
    AgentId
}

define_id! {
    /// Unique identifier for a world object (furniture, parts, carryables, walls).
    ObjectId
}

define_id! {
    /// Unique identifier for one planning result (a path spec).
    ///
    /// Transition specs and reservations refer back to their plan through
    /// this id instead of holding a reference to it.
    PlanId
}
