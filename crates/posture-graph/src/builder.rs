//! Graph construction: full rebuild and localized incremental expansion.
//!
//! Expansion is a breadth-first sweep. Each open node is offered a list of
//! operation bundles; every bundle that yields a valid node records an edge,
//! and nodes created along the way are opened with the complete bundle list.
//! A full rebuild seeds the sweep with the two neutral markers and offers
//! every bundle. An incremental add seeds it with the neutral markers and
//! the already-built nodes near the new objects, offering only the new
//! objects' bundles to those existing nodes.

use std::collections::{BTreeSet, VecDeque};

use posture_types::{ObjectId, PostureKind, SlotType};
use tracing::{debug, info};

use crate::config::{GraphConfig, OperationCosts};
use crate::error::GraphError;
use crate::graph::{EdgeInsert, NodeId, PostureGraph};
use crate::operation::Operation;
use crate::world::WorldState;

/// An ordered list of operations forming one edge.
pub type Bundle = Vec<Operation>;

/// Counters reported by a build step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Nodes created.
    pub nodes_created: usize,
    /// Nodes expanded.
    pub nodes_expanded: usize,
    /// Bundles offered across all expanded nodes.
    pub bundles_tried: usize,
}

/// Bundles available from any state regardless of world objects: return to
/// neutral, forget the surface, pick up the bound item, and put it down
/// anywhere or into a slot of each type.
pub fn universal_bundles() -> Vec<Bundle> {
    let mut bundles = vec![
        vec![Operation::Body {
            posture: PostureKind::Stand,
            target: None,
        }],
        vec![Operation::ForgetSurface],
        vec![Operation::PickUp],
        vec![Operation::PutDown { slot_type: None }],
    ];
    for slot_type in [SlotType::Small, SlotType::Medium, SlotType::Large, SlotType::Eat] {
        bundles.push(vec![Operation::PutDown {
            slot_type: Some(slot_type),
        }]);
    }
    bundles
}

/// Bundles contributed by one planning object: each stationary posture it
/// provides (alone, and together with its linked surface), and stepping up
/// to it as a surface, plain or at each of its slot types.
pub fn object_bundles(world: &WorldState, object: ObjectId) -> Vec<Bundle> {
    let Some(obj) = world.get(object) else {
        return Vec::new();
    };
    let mut bundles = Vec::new();
    for posture in obj.postures.iter().copied().filter(|p| !p.is_mobile()) {
        let body = Operation::Body {
            posture,
            target: Some(object),
        };
        bundles.push(vec![body]);
        if let Some(surface) = obj.linked_surface {
            bundles.push(vec![
                body,
                Operation::Surface {
                    target: surface,
                    slot_type: None,
                },
            ]);
        }
    }
    if obj.is_surface() {
        bundles.push(vec![Operation::Surface {
            target: object,
            slot_type: None,
        }]);
        for slot_type in obj.slot_types() {
            bundles.push(vec![Operation::Surface {
                target: object,
                slot_type: Some(slot_type),
            }]);
        }
    }
    bundles
}

/// Universal bundles plus the bundles of every planning object.
pub fn all_bundles(world: &WorldState) -> Vec<Bundle> {
    let mut bundles = universal_bundles();
    for object in world.planning_objects() {
        bundles.extend(object_bundles(world, object));
    }
    bundles
}

/// Breadth-first expansion. Seeds flagged `true` (and every node created
/// during the sweep) are offered `all`; other seeds only `local`.
fn expand(
    graph: &mut PostureGraph,
    world: &WorldState,
    costs: &OperationCosts,
    seeds: impl IntoIterator<Item = (NodeId, bool)>,
    local: &[Bundle],
    all: &[Bundle],
) -> Result<BuildStats, GraphError> {
    let mut stats = BuildStats::default();
    let mut open: VecDeque<(NodeId, bool)> = seeds.into_iter().collect();
    let mut closed: BTreeSet<NodeId> = BTreeSet::new();
    while let Some((node, full)) = open.pop_front() {
        if !closed.insert(node) {
            continue;
        }
        stats.nodes_expanded = stats.nodes_expanded.saturating_add(1);
        let bundles = if full { all } else { local };
        for bundle in bundles {
            stats.bundles_tried = stats.bundles_tried.saturating_add(1);
            if let EdgeInsert::Created(next) = graph.add_edge(node, bundle, world, costs)? {
                stats.nodes_created = stats.nodes_created.saturating_add(1);
                open.push_back((next, true));
            }
        }
    }
    Ok(stats)
}

/// Discard every non-neutral node and rebuild from the neutral markers.
///
/// # Errors
///
/// Propagates graph errors from edge insertion.
pub fn rebuild(
    graph: &mut PostureGraph,
    world: &WorldState,
    config: &GraphConfig,
) -> Result<BuildStats, GraphError> {
    graph.clear();
    let bundles = all_bundles(world);
    let seeds = [(graph.neutral(), true), (graph.neutral_carrying(), true)];
    let stats = expand(graph, world, &config.costs, seeds, &bundles, &bundles)?;
    info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        bundles = bundles.len(),
        "posture graph rebuilt"
    );
    Ok(stats)
}

/// Expand the graph for a newly added object and its planning parts.
///
/// Only nodes that reference an ancestor of a new object, or a posture
/// object linked to one, are re-expanded, and only with the new objects'
/// bundles.
///
/// # Errors
///
/// Propagates graph errors from edge insertion.
pub fn object_added(
    graph: &mut PostureGraph,
    world: &WorldState,
    config: &GraphConfig,
    object: ObjectId,
) -> Result<BuildStats, GraphError> {
    let mut new_objects = vec![object];
    new_objects.extend(world.descendants(object));
    new_objects.retain(|o| world.is_planning_object(*o));
    if new_objects.is_empty() {
        return Ok(BuildStats::default());
    }

    let mut relevant: BTreeSet<ObjectId> = BTreeSet::new();
    for new in &new_objects {
        relevant.extend(world.ancestors(*new));
    }
    relevant.extend(
        world
            .objects()
            .filter(|o| o.linked_surface.is_some_and(|s| new_objects.contains(&s)))
            .map(|o| o.id),
    );
    let relevant: Vec<ObjectId> = relevant.into_iter().collect();

    let local: Vec<Bundle> = new_objects
        .iter()
        .flat_map(|o| object_bundles(world, *o))
        .collect();
    let all = all_bundles(world);

    let mut seeds = vec![(graph.neutral(), false), (graph.neutral_carrying(), false)];
    seeds.extend(
        graph
            .nodes_referencing(&relevant)
            .into_iter()
            .map(|n| (n, false)),
    );
    let stats = expand(graph, world, &config.costs, seeds, &local, &all)?;
    debug!(
        %object,
        new_objects = new_objects.len(),
        created = stats.nodes_created,
        "incremental expansion"
    );
    Ok(stats)
}

/// Remove every node referencing any of the removed objects.
pub fn object_removed(graph: &mut PostureGraph, removed: &[ObjectId]) -> usize {
    graph.remove_nodes_referencing(removed)
}

/// Fully expand a single node that was interned outside a build step.
///
/// # Errors
///
/// Propagates graph errors from edge insertion.
pub fn expand_node(
    graph: &mut PostureGraph,
    world: &WorldState,
    config: &GraphConfig,
    node: NodeId,
) -> Result<BuildStats, GraphError> {
    let all = all_bundles(world);
    expand(graph, world, &config.costs, [(node, true)], &all, &all)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use posture_types::{Location, StatePattern, StateSpec, SurfaceSpec, Vec2};

    use super::*;
    use crate::world::{Placement, Slot, WorldObject};

    fn dining_world() -> (WorldState, ObjectId, ObjectId) {
        let mut world = WorldState::new();
        let table = WorldObject::new("table", Placement::World(Location::new(5.0, 0.0, 0)))
            .with_extents(1.0, 0.5)
            .with_slot(Slot::new(SlotType::Eat, Vec2::new(0.0, -0.3), 0.0));
        let table_id = table.id;
        world.add_object(table).unwrap();
        let chair = WorldObject::new("chair", Placement::World(Location::new(5.0, -1.0, 0)))
            .with_posture(PostureKind::Sit)
            .linked_to(table_id);
        let chair_id = chair.id;
        world.add_object(chair).unwrap();
        (world, table_id, chair_id)
    }

    fn specs(graph: &PostureGraph) -> BTreeSet<StateSpec> {
        graph.nodes().map(|(_, s)| *s).collect()
    }

    #[test]
    fn rebuild_reaches_seated_at_table() {
        let (world, table, chair) = dining_world();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        rebuild(&mut graph, &world, &config).unwrap();
        graph.verify_symmetry().unwrap();

        let at_table = Some(SurfaceSpec {
            target: table,
            slot_type: None,
            slot_target: None,
        });
        let seated_at_table = StateSpec::posed(PostureKind::Sit, chair).with_surface(at_table);
        let node = graph.node_for(&seated_at_table).unwrap();
        assert!(graph.successors(graph.neutral()).unwrap().contains(&node));
        assert!(graph.successors(node).unwrap().contains(&graph.neutral()));

        let placed = graph.nodes_matching(&StatePattern::posed_on(PostureKind::Sit, chair).with_surface(
            posture_types::SurfacePattern::At {
                target: table,
                slot_type: Some(SlotType::Eat),
            },
        ));
        assert_eq!(placed.len(), 1);
    }

    #[test]
    fn incremental_add_matches_rebuild() {
        let (world, _, chair) = dining_world();
        let config = GraphConfig::default();

        let mut full = PostureGraph::new(&config);
        rebuild(&mut full, &world, &config).unwrap();

        let mut partial_world = world.clone();
        partial_world.remove_object(chair).unwrap();
        let mut incremental = PostureGraph::new(&config);
        rebuild(&mut incremental, &partial_world, &config).unwrap();
        object_added(&mut incremental, &world, &config, chair).unwrap();

        incremental.verify_symmetry().unwrap();
        assert_eq!(specs(&incremental), specs(&full));
    }

    #[test]
    fn removal_drops_every_referencing_node() {
        let (mut world, table, chair) = dining_world();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        rebuild(&mut graph, &world, &config).unwrap();
        let before = graph.node_count();

        let removed = world.remove_object(table).unwrap();
        let dropped = object_removed(&mut graph, &removed);
        assert!(dropped > 0);
        assert_eq!(graph.node_count(), before.saturating_sub(dropped));
        assert!(graph.nodes_referencing(&[table]).is_empty());
        assert!(
            graph
                .nodes()
                .all(|(_, s)| s.surface.is_none_or(|surface| surface.target != table))
        );
        assert!(!graph.nodes_referencing(&[chair]).is_empty());
        graph.verify_symmetry().unwrap();
    }

    #[test]
    fn carrying_nodes_exist_only_where_posture_allows() {
        let mut world = WorldState::new();
        let bed = WorldObject::new("bed", Placement::World(Location::new(0.0, 4.0, 0)))
            .with_posture(PostureKind::Lie);
        let bed_id = bed.id;
        world.add_object(bed).unwrap();
        let config = GraphConfig::default();
        let mut graph = PostureGraph::new(&config);
        rebuild(&mut graph, &world, &config).unwrap();

        let lying = graph.nodes_matching(&StatePattern::posed_on(PostureKind::Lie, bed_id));
        assert_eq!(lying.len(), 1);
        assert!(lying
            .iter()
            .all(|n| graph.spec(*n).is_some_and(|s| !s.is_carrying())));
    }
}
