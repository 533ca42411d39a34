//! Lazy best-first path streaming over the posture graph.
//!
//! A [`PathStream`] runs a multi-root best-first search and yields one
//! [`GraphPath`] per accepted terminal, cheapest first. What counts as a
//! neighbour, a heuristic, and a terminal is supplied by a [`SearchSpace`],
//! so the same stream drives forward searches toward a neutral marker and
//! reverse searches back from the destination set.
//!
//! The search keeps every label it creates in an arena, so a node can be
//! reached along more than one path. Each non-terminal node is expanded at
//! most `max_visits` times and a label never revisits one of its own
//! ancestors. Terminals are not capped: every distinct way of reaching one
//! is a separate result.

use std::collections::{BTreeMap, BTreeSet};

use posture_graph::{NodeId, WorldState};
use posture_types::{Cost, Location, ObjectId};
use serde::{Deserialize, Serialize};

use crate::router::Router;

/// The graph view a [`PathStream`] searches.
pub trait SearchSpace {
    /// Nodes reachable from `node` in search order, with step costs.
    fn neighbors(&mut self, node: NodeId) -> Vec<(NodeId, Cost)>;

    /// Lower bound on the remaining cost from `node`.
    fn heuristic(&mut self, node: NodeId) -> Cost {
        let _ = node;
        Cost::ZERO
    }

    /// Extra cost of ending at `node` when it is a terminal, reached from
    /// `from` (`None` for a root). `None` means `node` is not a terminal.
    /// Terminals are never expanded.
    fn terminal(&mut self, node: NodeId, from: Option<NodeId>) -> Option<Cost>;
}

/// Which way the stream walks edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Along edges: roots are path starts.
    Forward,
    /// Against edges: roots are path ends.
    Reverse,
}

/// A path through the graph, always stored in walking order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphPath {
    /// Nodes in the order the agent passes through them.
    pub nodes: Vec<NodeId>,
    /// Sum of the edge costs along the path.
    pub edge_cost: Cost,
    /// Initial cost of the root the path grew from.
    pub root_cost: Cost,
    /// Extra cost charged at the terminal.
    pub terminal_cost: Cost,
}

impl GraphPath {
    /// A single-node path with no cost.
    pub fn single(node: NodeId) -> Self {
        Self {
            nodes: vec![node],
            edge_cost: Cost::ZERO,
            root_cost: Cost::ZERO,
            terminal_cost: Cost::ZERO,
        }
    }

    /// Every cost component summed. This is the search ranking, not the
    /// plan cost.
    pub const fn total(&self) -> Cost {
        self.edge_cost
            .saturating_add(self.root_cost)
            .saturating_add(self.terminal_cost)
    }

    /// First node.
    pub fn first(&self) -> Option<NodeId> {
        self.nodes.first().copied()
    }

    /// Last node.
    pub fn last(&self) -> Option<NodeId> {
        self.nodes.last().copied()
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    /// Whether the path has no edges.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Label {
    node: NodeId,
    parent: Option<usize>,
    root_cost: Cost,
    edge_cost: Cost,
    terminal_cost: Option<Cost>,
}

/// Streams cheapest paths lazily. See the module docs.
#[derive(Debug)]
pub struct PathStream<S> {
    space: S,
    direction: Direction,
    labels: Vec<Label>,
    queue: BTreeSet<(Cost, u64, usize)>,
    visits: BTreeMap<NodeId, u32>,
    max_visits: u32,
    seq: u64,
}

impl<S: SearchSpace> PathStream<S> {
    /// Start a search from `roots`, each with an initial cost.
    pub fn new(space: S, direction: Direction, roots: &[(NodeId, Cost)], max_visits: u32) -> Self {
        let mut stream = Self {
            space,
            direction,
            labels: Vec::new(),
            queue: BTreeSet::new(),
            visits: BTreeMap::new(),
            max_visits: max_visits.max(1),
            seq: 0,
        };
        for &(node, cost) in roots {
            let h = stream.space.heuristic(node);
            stream.push(
                Label {
                    node,
                    parent: None,
                    root_cost: cost,
                    edge_cost: Cost::ZERO,
                    terminal_cost: None,
                },
                cost.saturating_add(h),
            );
        }
        stream
    }

    /// Borrow the search space.
    pub const fn space(&self) -> &S {
        &self.space
    }

    /// Labels created so far.
    pub fn labels_created(&self) -> usize {
        self.labels.len()
    }

    fn push(&mut self, label: Label, priority: Cost) {
        let index = self.labels.len();
        self.labels.push(label);
        self.queue.insert((priority, self.seq, index));
        self.seq = self.seq.saturating_add(1);
    }

    fn is_ancestor(&self, mut index: Option<usize>, node: NodeId) -> bool {
        while let Some(i) = index {
            let Some(label) = self.labels.get(i) else {
                return false;
            };
            if label.node == node {
                return true;
            }
            index = label.parent;
        }
        false
    }

    fn trace(&self, index: usize) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            let Some(label) = self.labels.get(i) else {
                break;
            };
            nodes.push(label.node);
            current = label.parent;
        }
        if self.direction == Direction::Forward {
            nodes.reverse();
        }
        nodes
    }
}

impl<S: SearchSpace> Iterator for PathStream<S> {
    type Item = GraphPath;

    fn next(&mut self) -> Option<GraphPath> {
        while let Some((_, _, index)) = self.queue.pop_first() {
            let Some(label) = self.labels.get(index).copied() else {
                continue;
            };
            if let Some(terminal_cost) = label.terminal_cost {
                return Some(GraphPath {
                    nodes: self.trace(index),
                    edge_cost: label.edge_cost,
                    root_cost: label.root_cost,
                    terminal_cost,
                });
            }

            let from = label
                .parent
                .and_then(|p| self.labels.get(p))
                .map(|l| l.node);
            if let Some(extra) = self.space.terminal(label.node, from) {
                let finished = Label {
                    terminal_cost: Some(extra),
                    ..label
                };
                let priority = label
                    .root_cost
                    .saturating_add(label.edge_cost)
                    .saturating_add(extra);
                self.push(finished, priority);
                continue;
            }

            let visits = self.visits.entry(label.node).or_insert(0);
            if *visits >= self.max_visits {
                continue;
            }
            *visits = visits.saturating_add(1);

            for (next, step) in self.space.neighbors(label.node) {
                if self.is_ancestor(Some(index), next) {
                    continue;
                }
                let edge_cost = label.edge_cost.saturating_add(step);
                let h = self.space.heuristic(next);
                let priority = label.root_cost.saturating_add(edge_cost).saturating_add(h);
                self.push(
                    Label {
                        node: next,
                        parent: Some(index),
                        root_cost: label.root_cost,
                        edge_cost,
                        terminal_cost: None,
                    },
                    priority,
                );
            }
        }
        None
    }
}

/// Memoized router distance estimates from one origin, for the duration of
/// one planning attempt.
#[derive(Debug)]
pub struct DistanceEstimator<'a, R: ?Sized> {
    router: &'a R,
    world: &'a WorldState,
    origin: Location,
    memo: BTreeMap<ObjectId, Option<f64>>,
}

impl<'a, R: Router + ?Sized> DistanceEstimator<'a, R> {
    /// Estimator measuring from `origin`.
    pub const fn new(router: &'a R, world: &'a WorldState, origin: Location) -> Self {
        Self {
            router,
            world,
            origin,
            memo: BTreeMap::new(),
        }
    }

    /// The origin all estimates are measured from.
    pub const fn origin(&self) -> Location {
        self.origin
    }

    /// Estimated distance from the origin to `object`, if it has a location.
    pub fn to_object(&mut self, object: ObjectId) -> Option<f64> {
        if let Some(known) = self.memo.get(&object) {
            return *known;
        }
        let estimate = self
            .world
            .location_of(object)
            .map(|l| self.router.estimate_distance(&self.origin, &l));
        self.memo.insert(object, estimate);
        estimate
    }

    /// Estimated distance from the origin to `location`. Not memoized.
    pub fn to_location(&self, location: &Location) -> f64 {
        self.router.estimate_distance(&self.origin, location)
    }

    /// Distinct objects estimated so far.
    pub fn cached(&self) -> usize {
        self.memo.len()
    }
}
