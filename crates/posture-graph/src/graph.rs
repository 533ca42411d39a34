//! The posture graph store.
//!
//! Nodes are canonical [`StateSpec`]s held in an arena keyed by [`NodeId`];
//! a canonical map guarantees that structurally equal specs always resolve
//! to the same node. Edges are keyed by `(from, to)` and every node keeps
//! predecessor and successor sets that mirror the edge map exactly.
//!
//! Two secondary indices narrow candidate sets without scanning every node:
//! an [`AttributeIndex`] keyed by state-spec attribute values and a
//! per-floor [`SpatialIndex`] keyed by the footprint of each node's anchor
//! object.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use posture_types::{
    Aabb, Location, ObjectId, SpatialConstraint, StatePattern, StateSpec, Vec2,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{GraphConfig, OperationCosts};
use crate::error::GraphError;
use crate::index::{AttributeIndex, AttributeKey};
use crate::operation::{Edge, Operation};
use crate::spatial::{QuadTreeParams, SpatialIndex};
use crate::world::WorldState;

/// Handle to a node in a [`PostureGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A stored node: its canonical spec and adjacency.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    spec: StateSpec,
    predecessors: BTreeSet<NodeId>,
    successors: BTreeSet<NodeId>,
}

impl NodeEntry {
    const fn new(spec: StateSpec) -> Self {
        Self {
            spec,
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
        }
    }

    /// The canonical state spec.
    pub const fn spec(&self) -> &StateSpec {
        &self.spec
    }

    /// Nodes with an edge into this one.
    pub const fn predecessors(&self) -> &BTreeSet<NodeId> {
        &self.predecessors
    }

    /// Nodes this one has an edge to.
    pub const fn successors(&self) -> &BTreeSet<NodeId> {
        &self.successors
    }
}

/// Outcome of [`PostureGraph::add_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeInsert {
    /// The bundle does not apply, or its result is not a valid node.
    Rejected,
    /// The edge leads to a node that already existed.
    Existing(NodeId),
    /// The edge created a new node.
    Created(NodeId),
}

/// The posture transition graph.
#[derive(Debug, Clone)]
pub struct PostureGraph {
    nodes: BTreeMap<NodeId, NodeEntry>,
    canonical: BTreeMap<StateSpec, NodeId>,
    edges: BTreeMap<(NodeId, NodeId), Edge>,
    attributes: AttributeIndex,
    spatial: SpatialIndex,
    next_id: u32,
    neutral: NodeId,
    neutral_carrying: NodeId,
}

impl PostureGraph {
    /// Graph holding only the two neutral markers.
    pub fn new(config: &GraphConfig) -> Self {
        let params = QuadTreeParams {
            max_items: config.quadtree_max_items.max(1),
            max_depth: config.quadtree_max_depth,
            half_extent: config.zone_half_extent,
        };
        let mut graph = Self {
            nodes: BTreeMap::new(),
            canonical: BTreeMap::new(),
            edges: BTreeMap::new(),
            attributes: AttributeIndex::new(),
            spatial: SpatialIndex::new(params),
            next_id: 0,
            neutral: NodeId(0),
            neutral_carrying: NodeId(1),
        };
        graph.neutral = graph.insert_node(StateSpec::neutral(), None);
        graph.neutral_carrying = graph.insert_node(StateSpec::neutral_carrying(), None);
        graph
    }

    fn insert_node(&mut self, spec: StateSpec, footprint: Option<(i32, Aabb)>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        debug_assert!(!self.canonical.contains_key(&spec), "duplicate canonical node");
        self.canonical.insert(spec, id);
        self.attributes.insert(id, &spec);
        self.spatial.insert(id, footprint);
        self.nodes.insert(id, NodeEntry::new(spec));
        id
    }

    // -------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------

    /// The empty-handed neutral marker.
    pub const fn neutral(&self) -> NodeId {
        self.neutral
    }

    /// The carrying neutral marker.
    pub const fn neutral_carrying(&self) -> NodeId {
        self.neutral_carrying
    }

    /// The neutral marker with the given carry state.
    pub const fn neutral_for(&self, carrying: bool) -> NodeId {
        if carrying {
            self.neutral_carrying
        } else {
            self.neutral
        }
    }

    /// Whether `id` is one of the neutral markers.
    pub fn is_neutral(&self, id: NodeId) -> bool {
        id == self.neutral || id == self.neutral_carrying
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether the node exists.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Canonical spec of a node.
    pub fn spec(&self, id: NodeId) -> Option<&StateSpec> {
        self.nodes.get(&id).map(NodeEntry::spec)
    }

    /// Node for a spec, after canonicalization.
    pub fn node_for(&self, spec: &StateSpec) -> Option<NodeId> {
        self.canonical.get(&spec.canonical()).copied()
    }

    /// All nodes in ID order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &StateSpec)> {
        self.nodes.iter().map(|(id, entry)| (*id, entry.spec()))
    }

    /// All edges in `(from, to)` order.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId, &Edge)> {
        self.edges.iter().map(|((from, to), edge)| (*from, *to, edge))
    }

    /// The edge `from -> to`.
    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<&Edge> {
        self.edges.get(&(from, to))
    }

    /// Successors of a node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node is absent.
    pub fn successors(&self, id: NodeId) -> Result<&BTreeSet<NodeId>, GraphError> {
        self.nodes
            .get(&id)
            .map(NodeEntry::successors)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Successors of a node, or `default` if it is absent.
    pub fn successors_or<'a>(&'a self, id: NodeId, default: &'a BTreeSet<NodeId>) -> &'a BTreeSet<NodeId> {
        self.nodes.get(&id).map_or(default, NodeEntry::successors)
    }

    /// Predecessors of a node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node is absent.
    pub fn predecessors(&self, id: NodeId) -> Result<&BTreeSet<NodeId>, GraphError> {
        self.nodes
            .get(&id)
            .map(NodeEntry::predecessors)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Predecessors of a node, or `default` if it is absent.
    pub fn predecessors_or<'a>(
        &'a self,
        id: NodeId,
        default: &'a BTreeSet<NodeId>,
    ) -> &'a BTreeSet<NodeId> {
        self.nodes.get(&id).map_or(default, NodeEntry::predecessors)
    }

    /// Floor and anchor footprint of a node with a fixed target.
    pub fn footprint(&self, id: NodeId) -> Option<(i32, Aabb)> {
        self.spatial.footprint(id)
    }

    // -------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------

    /// Whether `spec` names a state that can exist in `world`.
    ///
    /// Rejects stationary postures without a providing target, mobile
    /// postures anchored to an attached object, surfaces without the named
    /// slot type, surfaces a seated agent cannot reach, and carrying in a
    /// posture that cannot hold items.
    pub fn is_valid_spec(spec: &StateSpec, world: &WorldState) -> bool {
        let posture = spec.body.posture;
        let body_ok = match spec.body.target {
            None => posture.is_mobile(),
            Some(target) => world.get(target).is_some_and(|o| {
                o.provides(posture)
                    && (!posture.is_mobile() || o.parent().is_none())
                    && world.is_planning_object(target)
            }),
        };
        if !body_ok {
            return false;
        }
        if let Some(surface) = spec.surface {
            let Some(object) = world.get(surface.target) else {
                return false;
            };
            if !object.is_surface() || world.location_of(surface.target).is_none() {
                return false;
            }
            if surface.slot_type.is_some_and(|st| !object.has_slot_type(st)) {
                return false;
            }
            if !posture.is_mobile() {
                let linked = spec
                    .body
                    .target
                    .and_then(|t| world.get(t))
                    .and_then(|o| o.linked_surface);
                if linked != Some(surface.target) {
                    return false;
                }
            }
        }
        !spec.is_carrying() || posture.supports_carry()
    }

    /// Canonical node for `spec`, creating it if it is valid and new.
    ///
    /// Returns the node and whether it was created, or `None` when the spec
    /// is not valid in `world`.
    pub fn intern(&mut self, spec: &StateSpec, world: &WorldState) -> Option<(NodeId, bool)> {
        let canonical = spec.canonical();
        if let Some(id) = self.canonical.get(&canonical) {
            return Some((*id, false));
        }
        if !Self::is_valid_spec(&canonical, world) {
            return None;
        }
        let footprint = canonical.anchor().and_then(|a| world.bounds_of(a));
        Some((self.insert_node(canonical, footprint), true))
    }

    /// Apply an operation bundle to `from` and record the resulting edge.
    ///
    /// When the edge already exists the cheaper bundle is kept.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if `from` is absent.
    pub fn add_edge(
        &mut self,
        from: NodeId,
        operations: &[Operation],
        world: &WorldState,
        costs: &OperationCosts,
    ) -> Result<EdgeInsert, GraphError> {
        let Some(from_spec) = self.spec(from).copied() else {
            return Err(GraphError::NodeNotFound(from));
        };
        let Some((next, edge)) = Edge::from_bundle(&from_spec, operations, costs) else {
            return Ok(EdgeInsert::Rejected);
        };
        let Some((to, created)) = self.intern(&next, world) else {
            return Ok(EdgeInsert::Rejected);
        };
        if to == from {
            return Ok(EdgeInsert::Rejected);
        }
        let keep_existing = self
            .edges
            .get(&(from, to))
            .is_some_and(|existing| existing.cost <= edge.cost);
        if !keep_existing {
            self.edges.insert((from, to), edge);
        }
        if let Some(entry) = self.nodes.get_mut(&from) {
            entry.successors.insert(to);
        }
        if let Some(entry) = self.nodes.get_mut(&to) {
            entry.predecessors.insert(from);
        }
        Ok(if created {
            EdgeInsert::Created(to)
        } else {
            EdgeInsert::Existing(to)
        })
    }

    /// Remove a node from every index and sever its edges.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CannotRemoveNeutral`] for a neutral marker or
    /// [`GraphError::NodeNotFound`] if the node is absent.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        if self.is_neutral(id) {
            return Err(GraphError::CannotRemoveNeutral(id));
        }
        let entry = self.nodes.remove(&id).ok_or(GraphError::NodeNotFound(id))?;
        for succ in &entry.successors {
            self.edges.remove(&(id, *succ));
            if let Some(next) = self.nodes.get_mut(succ) {
                next.predecessors.remove(&id);
            }
        }
        for pred in &entry.predecessors {
            self.edges.remove(&(*pred, id));
            if let Some(prev) = self.nodes.get_mut(pred) {
                prev.successors.remove(&id);
            }
        }
        self.canonical.remove(&entry.spec);
        self.attributes.remove(id, &entry.spec);
        self.spatial.remove(id);
        Ok(())
    }

    /// Remove every node referencing any of `objects`. Returns how many
    /// nodes were removed.
    pub fn remove_nodes_referencing(&mut self, objects: &[ObjectId]) -> usize {
        let doomed = self.nodes_referencing(objects);
        let mut removed: usize = 0;
        for id in doomed {
            if self.remove_node(id).is_ok() {
                removed = removed.saturating_add(1);
            }
        }
        if removed > 0 {
            debug!(removed, objects = objects.len(), "removed nodes for objects");
        }
        removed
    }

    /// Drop every node except the neutral markers.
    pub fn clear(&mut self) {
        let doomed: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| !self.is_neutral(*id))
            .collect();
        for id in doomed {
            if let Err(e) = self.remove_node(id) {
                debug!(node = %id, error = %e, "node vanished while clearing");
            }
        }
        self.edges.clear();
        for entry in self.nodes.values_mut() {
            entry.predecessors.clear();
            entry.successors.clear();
        }
    }

    // -------------------------------------------------------------------
    // Candidate queries
    // -------------------------------------------------------------------

    /// Nodes whose body or surface target is any of `objects`, looked up in
    /// the attribute index alone.
    pub fn nodes_referencing(&self, objects: &[ObjectId]) -> BTreeSet<NodeId> {
        let mut found = BTreeSet::new();
        for object in objects {
            for key in [
                AttributeKey::BodyTarget(Some(*object)),
                AttributeKey::SurfaceTarget(Some(*object)),
            ] {
                if let Some(set) = self.attributes.get(&key) {
                    found.extend(set.iter().copied());
                }
            }
        }
        found
    }

    /// Nodes whose body or surface target is `object` or one of its parts.
    pub fn nodes_for_object(&self, world: &WorldState, object: ObjectId) -> BTreeSet<NodeId> {
        let mut objects = vec![object];
        objects.extend(world.parts(object));
        self.nodes_referencing(&objects)
    }

    /// Nodes matching `pattern`, narrowed through the attribute index.
    pub fn nodes_matching(&self, pattern: &StatePattern) -> BTreeSet<NodeId> {
        let keys = AttributeKey::for_pattern(pattern);
        let candidates = self
            .attributes
            .narrow(&keys)
            .unwrap_or_else(|| self.nodes.keys().copied().collect());
        candidates
            .into_iter()
            .filter(|id| self.spec(*id).is_some_and(|s| pattern.matches(s)))
            .collect()
    }

    /// Nodes whose anchor footprint touches any of `constraints`, floor by
    /// floor, together with every node that has no fixed target. An empty
    /// constraint list accepts every node.
    pub fn nodes_matching_constraint_geometry(
        &self,
        constraints: &[SpatialConstraint],
    ) -> BTreeSet<NodeId> {
        if constraints.is_empty() {
            return self.nodes.keys().copied().collect();
        }
        let mut found = self.spatial.untargeted().clone();
        for constraint in constraints {
            let candidates = match constraint.bounds() {
                Some(area) => self.spatial.query(constraint.floor, &area),
                None => self.spatial.on_floor(constraint.floor),
            };
            found.extend(candidates.into_iter().filter(|id| {
                self.spatial
                    .footprint(*id)
                    .is_some_and(|(_, area)| footprint_touches(constraint, &area))
            }));
        }
        found
    }

    // -------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------

    /// Check the symmetry invariant and canonical uniqueness.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn verify_symmetry(&self) -> Result<(), GraphError> {
        for &(from, to) in self.edges.keys() {
            let (Some(a), Some(b)) = (self.nodes.get(&from), self.nodes.get(&to)) else {
                return Err(GraphError::DanglingEdge { from, to });
            };
            if !a.successors.contains(&to) || !b.predecessors.contains(&from) {
                return Err(GraphError::AsymmetricEdge { from, to });
            }
        }
        for (id, entry) in &self.nodes {
            for succ in &entry.successors {
                if !self.edges.contains_key(&(*id, *succ)) {
                    return Err(GraphError::AsymmetricEdge { from: *id, to: *succ });
                }
            }
            for pred in &entry.predecessors {
                if !self.edges.contains_key(&(*pred, *id)) {
                    return Err(GraphError::AsymmetricEdge { from: *pred, to: *id });
                }
            }
            if self.canonical.get(&entry.spec) != Some(id) {
                return Err(GraphError::DuplicateCanonical(*id));
            }
        }
        if self.canonical.len() != self.nodes.len() {
            return Err(GraphError::DuplicateCanonical(self.neutral));
        }
        Ok(())
    }
}

/// Whether the footprint centre or any corner satisfies the constraint.
fn footprint_touches(constraint: &SpatialConstraint, area: &Aabb) -> bool {
    if constraint.is_unbounded() {
        return true;
    }
    let probes = [
        area.center(),
        area.min,
        area.max,
        Vec2::new(area.min.x, area.max.y),
        Vec2::new(area.max.x, area.min.y),
    ];
    probes
        .into_iter()
        .any(|p| constraint.contains(&Location::at(p, constraint.floor)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use posture_types::{PostureKind, Region};

    use super::*;
    use crate::world::{Placement, WorldObject};

    fn chair_world() -> (WorldState, ObjectId) {
        let mut world = WorldState::new();
        let chair = WorldObject::new("chair", Placement::World(Location::new(3.0, 0.0, 0)))
            .with_posture(PostureKind::Sit);
        let id = chair.id;
        world.add_object(chair).unwrap();
        (world, id)
    }

    fn sit_on(chair: ObjectId) -> [Operation; 1] {
        [Operation::Body {
            posture: PostureKind::Sit,
            target: Some(chair),
        }]
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let (world, chair) = chair_world();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        let first = graph
            .add_edge(graph.neutral(), &sit_on(chair), &world, &config.costs)
            .unwrap();
        let second = graph
            .add_edge(graph.neutral(), &sit_on(chair), &world, &config.costs)
            .unwrap();
        let node = graph.node_for(&StateSpec::posed(PostureKind::Sit, chair)).unwrap();
        assert_eq!(first, EdgeInsert::Created(node));
        assert_eq!(second, EdgeInsert::Existing(node));
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn invalid_targets_are_rejected() {
        let (world, chair) = chair_world();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        let lie = [Operation::Body {
            posture: PostureKind::Lie,
            target: Some(chair),
        }];
        let result = graph.add_edge(graph.neutral(), &lie, &world, &config.costs).unwrap();
        assert_eq!(result, EdgeInsert::Rejected);
        let ghost = [Operation::Body {
            posture: PostureKind::Sit,
            target: Some(ObjectId::new()),
        }];
        let result = graph.add_edge(graph.neutral(), &ghost, &world, &config.costs).unwrap();
        assert_eq!(result, EdgeInsert::Rejected);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn clear_keeps_only_the_neutral_markers() {
        let (world, chair) = chair_world();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        graph
            .add_edge(graph.neutral(), &sit_on(chair), &world, &config.costs)
            .unwrap();
        assert_eq!(graph.node_count(), 3);

        graph.clear();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.nodes_referencing(&[chair]).is_empty());
        assert!(graph.successors(graph.neutral()).unwrap().is_empty());
    }

    #[test]
    fn adjacency_queries_fail_for_missing_nodes() {
        let graph = PostureGraph::new(&GraphConfig::default());
        assert!(matches!(
            graph.successors(NodeId(99)),
            Err(GraphError::NodeNotFound(NodeId(99)))
        ));
        let fallback = BTreeSet::from([NodeId(5)]);
        assert_eq!(graph.predecessors_or(NodeId(99), &fallback), &fallback);
    }

    #[test]
    fn remove_node_severs_edges_and_indices() {
        let (world, chair) = chair_world();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        graph
            .add_edge(graph.neutral(), &sit_on(chair), &world, &config.costs)
            .unwrap();
        let seated = graph.node_for(&StateSpec::posed(PostureKind::Sit, chair)).unwrap();
        let stand = [Operation::Body {
            posture: PostureKind::Stand,
            target: None,
        }];
        graph.add_edge(seated, &stand, &world, &config.costs).unwrap();
        assert_eq!(graph.edge_count(), 2);
        graph.verify_symmetry().unwrap();

        assert_eq!(graph.remove_nodes_referencing(&[chair]), 1);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.successors(graph.neutral()).unwrap().is_empty());
        assert!(graph.nodes_referencing(&[chair]).is_empty());
        assert!(graph.footprint(seated).is_none());
        graph.verify_symmetry().unwrap();
    }

    #[test]
    fn neutral_markers_are_permanent() {
        let mut graph = PostureGraph::new(&GraphConfig::default());
        let neutral = graph.neutral();
        assert!(matches!(
            graph.remove_node(neutral),
            Err(GraphError::CannotRemoveNeutral(_))
        ));
    }

    #[test]
    fn geometry_query_filters_by_floor_and_region() {
        let (world, chair) = chair_world();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        graph
            .add_edge(graph.neutral(), &sit_on(chair), &world, &config.costs)
            .unwrap();
        let seated = graph.node_for(&StateSpec::posed(PostureKind::Sit, chair)).unwrap();

        let near = SpatialConstraint::new(0, Region::circle(Vec2::new(3.0, 0.0), 1.0));
        let far = SpatialConstraint::new(0, Region::circle(Vec2::new(-9.0, 0.0), 1.0));
        let upstairs = SpatialConstraint::new(1, Region::circle(Vec2::new(3.0, 0.0), 1.0));

        assert!(graph.nodes_matching_constraint_geometry(&[near]).contains(&seated));
        let far_nodes = graph.nodes_matching_constraint_geometry(&[far]);
        assert!(!far_nodes.contains(&seated));
        assert!(far_nodes.contains(&graph.neutral()));
        assert!(!graph.nodes_matching_constraint_geometry(&[upstairs]).contains(&seated));
    }

    #[test]
    fn pattern_query_uses_attributes() {
        let (world, chair) = chair_world();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        graph
            .add_edge(graph.neutral(), &sit_on(chair), &world, &config.costs)
            .unwrap();
        let found = graph.nodes_matching(&StatePattern::posed_on(PostureKind::Sit, chair));
        assert_eq!(found.len(), 1);
        let standing = graph.nodes_matching(&StatePattern::standing());
        assert_eq!(
            standing,
            BTreeSet::from([graph.neutral(), graph.neutral_carrying()])
        );
    }
}
