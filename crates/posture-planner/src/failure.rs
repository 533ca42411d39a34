//! Planning failures and the sink that collects them.

use std::collections::VecDeque;
use std::fmt;

use posture_types::{AgentId, ObjectId, PlanId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::router::RoutePlan;

/// Why a planning request produced no plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// No graph node satisfies the goal's destinations and geometry.
    NoDestinationNode,
    /// Destination nodes exist but none can be reached.
    NoRouteFound,
    /// Every reachable goal is blocked from seeing its anchor.
    BlockedBy(ObjectId),
    /// An endpoint's spatial constraint does not overlap the goal geometry.
    NoValidIntersection,
    /// A reservation was refused or lost to a higher-priority plan.
    ReservationConflict,
    /// The router never answered, or answered with an error.
    RoutingFailed,
    /// The put-down surface has no free slot facing the agent.
    NoFreeSlot(ObjectId),
    /// The request was canceled.
    Canceled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDestinationNode => write!(f, "no destination node"),
            Self::NoRouteFound => write!(f, "no route found"),
            Self::BlockedBy(object) => write!(f, "blocked by {object}"),
            Self::NoValidIntersection => write!(f, "no valid constraint intersection"),
            Self::ReservationConflict => write!(f, "reservation conflict"),
            Self::RoutingFailed => write!(f, "routing failed"),
            Self::NoFreeSlot(surface) => write!(f, "no free slot on {surface}"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// A failed planning request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFailure {
    /// What went wrong.
    pub reason: FailureReason,
    /// For [`FailureReason::BlockedBy`], the route the agent could walk to
    /// the best blocked goal, for feedback.
    pub failure_route: Option<RoutePlan>,
}

impl PlanFailure {
    /// Failure without a feedback route.
    pub const fn new(reason: FailureReason) -> Self {
        Self {
            reason,
            failure_route: None,
        }
    }
}

impl From<FailureReason> for PlanFailure {
    fn from(reason: FailureReason) -> Self {
        Self::new(reason)
    }
}

impl fmt::Display for PlanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Agent the plan was for.
    pub agent: AgentId,
    /// The plan that failed.
    pub plan: PlanId,
    /// The failure.
    pub failure: PlanFailure,
}

/// Receives planning failures for diagnostics.
pub trait FailureSink {
    /// Record a failure.
    fn record(&mut self, record: FailureRecord);
}

/// Bounded in-memory failure log; the oldest records are dropped first.
#[derive(Debug, Clone, Default)]
pub struct FailureLog {
    capacity: usize,
    records: VecDeque<FailureRecord>,
}

impl FailureLog {
    /// Log keeping at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &FailureRecord> {
        self.records.iter()
    }

    /// Most recent record for `agent`.
    pub fn last_for(&self, agent: AgentId) -> Option<&FailureRecord> {
        self.records.iter().rev().find(|r| r.agent == agent)
    }

    /// Number of records kept.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FailureSink for FailureLog {
    fn record(&mut self, record: FailureRecord) {
        warn!(
            agent = %record.agent,
            plan = %record.plan,
            reason = %record.failure.reason,
            "posture plan failed"
        );
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
}
