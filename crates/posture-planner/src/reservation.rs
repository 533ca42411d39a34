//! Priority-arbitrated exclusive reservations on objects and slots.
//!
//! A plan reserves the objects and slots its next transitions use. A
//! request is tested against every key before anything is taken:
//!
//! 1. a key free or already held by the requesting plan is granted;
//! 2. a key held by another plan at a priority greater than or equal to the
//!    requester's fails the whole request with a [`ReservationConflict`];
//! 3. a key held at a strictly lower priority is taken over, and every
//!    reservation of the displaced plan is released. Displaced plans are
//!    remembered until their execution collects the news with
//!    [`ReservationManager::take_displaced`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use posture_types::{AgentId, ObjectId, PlanId, Priority, SlotRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Something a plan can hold exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReservationKey {
    /// A whole object (a chair, a bed, an item).
    Object(ObjectId),
    /// One slot of a surface.
    Slot(SlotRef),
}

impl fmt::Display for ReservationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(id) => write!(f, "object {id}"),
            Self::Slot(slot) => write!(f, "slot {} of {}", slot.index, slot.object),
        }
    }
}

/// Who holds a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Holding plan.
    pub plan: PlanId,
    /// Agent executing the plan.
    pub agent: AgentId,
    /// Priority the plan reserves at.
    pub priority: Priority,
    /// Index of the transition the key is for.
    pub transition: usize,
}

/// A refused reservation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{key} is held by plan {} at {priority:?} priority", .holder)]
pub struct ReservationConflict {
    /// The contested key.
    pub key: ReservationKey,
    /// The plan holding it.
    pub holder: PlanId,
    /// The holder's priority.
    pub priority: Priority,
}

/// Tracks every reservation in a zone.
#[derive(Debug, Clone, Default)]
pub struct ReservationManager {
    held: BTreeMap<ReservationKey, Reservation>,
    displaced: BTreeSet<PlanId>,
}

impl ReservationManager {
    /// No reservations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve every key for `holder`, or nothing.
    ///
    /// Returns the plans displaced to make room.
    ///
    /// # Errors
    ///
    /// Returns the first key held by another plan at equal or higher
    /// priority. Nothing changes in that case.
    pub fn try_reserve(
        &mut self,
        keys: &[ReservationKey],
        holder: Reservation,
    ) -> Result<Vec<PlanId>, ReservationConflict> {
        let mut losers: BTreeSet<PlanId> = BTreeSet::new();
        for key in keys {
            let Some(current) = self.held.get(key) else {
                continue;
            };
            if current.plan == holder.plan {
                continue;
            }
            if current.priority >= holder.priority {
                debug!(%key, holder = %current.plan, requester = %holder.plan, "reservation refused");
                return Err(ReservationConflict {
                    key: *key,
                    holder: current.plan,
                    priority: current.priority,
                });
            }
            losers.insert(current.plan);
        }

        for loser in &losers {
            self.release_plan(*loser);
            self.displaced.insert(*loser);
            info!(displaced = %loser, by = %holder.plan, "reservation preempted");
        }
        for key in keys {
            self.held.insert(*key, holder);
        }
        Ok(losers.into_iter().collect())
    }

    /// Release every key held by `plan`. Returns how many were released.
    pub fn release_plan(&mut self, plan: PlanId) -> usize {
        let before = self.held.len();
        self.held.retain(|_, r| r.plan != plan);
        before.saturating_sub(self.held.len())
    }

    /// Release the keys `plan` holds for one transition.
    pub fn release_transition(&mut self, plan: PlanId, transition: usize) -> usize {
        let before = self.held.len();
        self.held
            .retain(|_, r| r.plan != plan || r.transition != transition);
        before.saturating_sub(self.held.len())
    }

    /// Release everything held by `agent`, and forget its displacements.
    pub fn release_agent(&mut self, agent: AgentId) -> usize {
        let plans: BTreeSet<PlanId> = self
            .held
            .values()
            .filter(|r| r.agent == agent)
            .map(|r| r.plan)
            .collect();
        let before = self.held.len();
        self.held.retain(|_, r| r.agent != agent);
        for plan in plans {
            self.displaced.remove(&plan);
        }
        before.saturating_sub(self.held.len())
    }

    /// Current holder of `key`.
    pub fn holder(&self, key: &ReservationKey) -> Option<&Reservation> {
        self.held.get(key)
    }

    /// Keys held by `plan`.
    pub fn keys_of(&self, plan: PlanId) -> Vec<ReservationKey> {
        self.held
            .iter()
            .filter(|(_, r)| r.plan == plan)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Whether `plan` was displaced since the last call; clears the flag.
    pub fn take_displaced(&mut self, plan: PlanId) -> bool {
        self.displaced.remove(&plan)
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Whether nothing is held.
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn holder(priority: Priority) -> Reservation {
        Reservation {
            plan: PlanId::new(),
            agent: AgentId::new(),
            priority,
            transition: 0,
        }
    }

    #[test]
    fn free_keys_are_granted() {
        let mut manager = ReservationManager::new();
        let chair = ReservationKey::Object(ObjectId::new());
        let a = holder(Priority::Normal);
        assert_eq!(manager.try_reserve(&[chair], a).unwrap(), Vec::new());
        assert_eq!(manager.holder(&chair).map(|r| r.plan), Some(a.plan));
    }

    #[test]
    fn equal_priority_fails_and_changes_nothing() {
        let mut manager = ReservationManager::new();
        let chair = ReservationKey::Object(ObjectId::new());
        let table = ReservationKey::Object(ObjectId::new());
        let a = holder(Priority::Normal);
        let b = holder(Priority::Normal);
        manager.try_reserve(&[chair], a).unwrap();
        let err = manager.try_reserve(&[table, chair], b).unwrap_err();
        assert_eq!(err.key, chair);
        assert_eq!(err.holder, a.plan);
        assert!(manager.holder(&table).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn higher_priority_preempts_everything_of_the_loser() {
        let mut manager = ReservationManager::new();
        let chair = ReservationKey::Object(ObjectId::new());
        let cup = ReservationKey::Object(ObjectId::new());
        let low = holder(Priority::Low);
        let high = holder(Priority::High);
        manager.try_reserve(&[chair, cup], low).unwrap();
        let displaced = manager.try_reserve(&[chair], high).unwrap();
        assert_eq!(displaced, vec![low.plan]);
        assert!(manager.holder(&cup).is_none());
        assert_eq!(manager.holder(&chair).map(|r| r.plan), Some(high.plan));
        assert!(manager.take_displaced(low.plan));
        assert!(!manager.take_displaced(low.plan));
    }

    #[test]
    fn reentrant_for_the_same_plan() {
        let mut manager = ReservationManager::new();
        let slot = ReservationKey::Slot(SlotRef {
            object: ObjectId::new(),
            index: 1,
        });
        let a = holder(Priority::Low);
        manager.try_reserve(&[slot], a).unwrap();
        let again = Reservation { transition: 3, ..a };
        assert!(manager.try_reserve(&[slot], again).is_ok());
        assert_eq!(manager.release_transition(a.plan, 3), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn release_by_agent_leaves_others() {
        let mut manager = ReservationManager::new();
        let a = holder(Priority::Normal);
        let b = holder(Priority::Normal);
        manager
            .try_reserve(&[ReservationKey::Object(ObjectId::new())], a)
            .unwrap();
        manager
            .try_reserve(&[ReservationKey::Object(ObjectId::new())], b)
            .unwrap();
        assert_eq!(manager.release_agent(a.agent), 1);
        assert_eq!(manager.keys_of(b.plan).len(), 1);
        assert_eq!(manager.release_plan(b.plan), 1);
        assert!(manager.is_empty());
    }
}
