//! Per-floor spatial index over node anchor footprints.
//!
//! Each floor gets a bounding-box quadtree. Items are stored in the deepest
//! cell that fully encloses them, so a large footprint straddling a split
//! line stays in the parent cell. Footprints outside the zone square go into
//! an overflow list that every query scans. Nodes without a fixed target
//! (free standing) live in a separate set and are not part of any tree.

use std::collections::{BTreeMap, BTreeSet};

use posture_types::{Aabb, Vec2};

use crate::graph::NodeId;

/// Quadtree tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadTreeParams {
    /// Items a cell holds before it splits.
    pub max_items: usize,
    /// Maximum depth below the root.
    pub max_depth: u32,
    /// Half size of the root square.
    pub half_extent: f64,
}

#[derive(Debug, Clone)]
struct Cell {
    bounds: Aabb,
    depth: u32,
    items: Vec<(NodeId, Aabb)>,
    children: Option<Box<[Cell; 4]>>,
}

impl Cell {
    const fn new(bounds: Aabb, depth: u32) -> Self {
        Self {
            bounds,
            depth,
            items: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, id: NodeId, area: Aabb, params: &QuadTreeParams) {
        if let Some(children) = self.children.as_mut() {
            if let Some(child) = children.iter_mut().find(|c| c.bounds.encloses(&area)) {
                child.insert(id, area, params);
            } else {
                self.items.push((id, area));
            }
            return;
        }
        self.items.push((id, area));
        if self.items.len() > params.max_items && self.depth < params.max_depth {
            self.split();
        }
    }

    fn split(&mut self) {
        let depth = self.depth.saturating_add(1);
        let [a, b, c, d] = self.bounds.quadrants();
        let mut children = Box::new([
            Self::new(a, depth),
            Self::new(b, depth),
            Self::new(c, depth),
            Self::new(d, depth),
        ]);
        for (id, area) in std::mem::take(&mut self.items) {
            if let Some(child) = children.iter_mut().find(|c| c.bounds.encloses(&area)) {
                child.items.push((id, area));
            } else {
                self.items.push((id, area));
            }
        }
        self.children = Some(children);
    }

    fn remove(&mut self, id: NodeId, area: &Aabb) -> bool {
        if let Some(pos) = self.items.iter().position(|(item, _)| *item == id) {
            self.items.swap_remove(pos);
            return true;
        }
        self.children.as_mut().is_some_and(|children| {
            children
                .iter_mut()
                .filter(|c| c.bounds.encloses(area))
                .any(|c| c.remove(id, area))
        })
    }

    fn query(&self, area: &Aabb, out: &mut BTreeSet<NodeId>) {
        if !self.bounds.intersects(area) {
            return;
        }
        out.extend(
            self.items
                .iter()
                .filter(|(_, b)| b.intersects(area))
                .map(|(id, _)| *id),
        );
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.query(area, out);
            }
        }
    }

    fn count(&self) -> usize {
        let below = self
            .children
            .as_ref()
            .map_or(0, |children| children.iter().map(Self::count).sum());
        self.items.len().saturating_add(below)
    }
}

/// A bounding-box quadtree for one floor.
#[derive(Debug, Clone)]
pub struct QuadTree {
    root: Cell,
    overflow: Vec<(NodeId, Aabb)>,
    params: QuadTreeParams,
}

impl QuadTree {
    /// Empty tree covering the zone square centred on the origin.
    pub fn new(params: QuadTreeParams) -> Self {
        let bounds = Aabb::square(Vec2::ZERO, params.half_extent);
        Self {
            root: Cell::new(bounds, 0),
            overflow: Vec::new(),
            params,
        }
    }

    /// Insert a footprint.
    pub fn insert(&mut self, id: NodeId, area: Aabb) {
        if self.root.bounds.encloses(&area) {
            self.root.insert(id, area, &self.params);
        } else {
            self.overflow.push((id, area));
        }
    }

    /// Remove a footprint previously inserted with the same box.
    pub fn remove(&mut self, id: NodeId, area: &Aabb) -> bool {
        if let Some(pos) = self.overflow.iter().position(|(item, _)| *item == id) {
            self.overflow.swap_remove(pos);
            return true;
        }
        self.root.remove(id, area)
    }

    /// Nodes whose footprint intersects `area`.
    pub fn query(&self, area: &Aabb) -> BTreeSet<NodeId> {
        let mut out = BTreeSet::new();
        self.root.query(area, &mut out);
        out.extend(
            self.overflow
                .iter()
                .filter(|(_, b)| b.intersects(area))
                .map(|(id, _)| *id),
        );
        out
    }

    /// Number of stored footprints.
    pub fn len(&self) -> usize {
        self.root.count().saturating_add(self.overflow.len())
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spatial index: one quadtree per floor plus the untargeted node set.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    floors: BTreeMap<i32, QuadTree>,
    placed: BTreeMap<NodeId, (i32, Aabb)>,
    untargeted: BTreeSet<NodeId>,
    params: QuadTreeParams,
}

impl SpatialIndex {
    /// Empty index.
    pub const fn new(params: QuadTreeParams) -> Self {
        Self {
            floors: BTreeMap::new(),
            placed: BTreeMap::new(),
            untargeted: BTreeSet::new(),
            params,
        }
    }

    /// Index a node by its anchor footprint, or as untargeted.
    pub fn insert(&mut self, id: NodeId, footprint: Option<(i32, Aabb)>) {
        match footprint {
            Some((floor, area)) => {
                self.floors
                    .entry(floor)
                    .or_insert_with(|| QuadTree::new(self.params))
                    .insert(id, area);
                self.placed.insert(id, (floor, area));
            }
            None => {
                self.untargeted.insert(id);
            }
        }
    }

    /// Drop a node from the index.
    pub fn remove(&mut self, id: NodeId) {
        self.untargeted.remove(&id);
        if let Some((floor, area)) = self.placed.remove(&id)
            && let Some(tree) = self.floors.get_mut(&floor)
        {
            tree.remove(id, &area);
        }
    }

    /// Nodes on `floor` whose footprint intersects `area`.
    pub fn query(&self, floor: i32, area: &Aabb) -> BTreeSet<NodeId> {
        self.floors
            .get(&floor)
            .map(|tree| tree.query(area))
            .unwrap_or_default()
    }

    /// Every placed node on `floor`.
    pub fn on_floor(&self, floor: i32) -> BTreeSet<NodeId> {
        self.placed
            .iter()
            .filter(|(_, (f, _))| *f == floor)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Floor and footprint of a placed node.
    pub fn footprint(&self, id: NodeId) -> Option<(i32, Aabb)> {
        self.placed.get(&id).copied()
    }

    /// Nodes with no fixed target.
    pub const fn untargeted(&self) -> &BTreeSet<NodeId> {
        &self.untargeted
    }

    /// Whether the node is indexed at all.
    pub fn contains(&self, id: NodeId) -> bool {
        self.untargeted.contains(&id) || self.placed.contains_key(&id)
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.floors.clear();
        self.placed.clear();
        self.untargeted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> QuadTreeParams {
        QuadTreeParams {
            max_items: 2,
            max_depth: 4,
            half_extent: 16.0,
        }
    }

    fn boxed(x: f64, y: f64) -> Aabb {
        Aabb::around(Vec2::new(x, y), Vec2::new(0.25, 0.25))
    }

    #[test]
    fn split_keeps_every_item_queryable() {
        let mut tree = QuadTree::new(params());
        for i in 0..10_u32 {
            tree.insert(NodeId(i), boxed(f64::from(i) - 5.0, f64::from(i) - 5.0));
        }
        assert_eq!(tree.len(), 10);
        let everything = tree.query(&Aabb::square(Vec2::ZERO, 100.0));
        assert_eq!(everything.len(), 10);
        let near_origin = tree.query(&Aabb::square(Vec2::ZERO, 0.5));
        assert!(near_origin.contains(&NodeId(5)));
        assert!(!near_origin.contains(&NodeId(9)));
    }

    #[test]
    fn overflow_items_are_found() {
        let mut tree = QuadTree::new(params());
        tree.insert(NodeId(1), boxed(40.0, 40.0));
        assert!(tree.query(&boxed(40.0, 40.0)).contains(&NodeId(1)));
        assert!(tree.remove(NodeId(1), &boxed(40.0, 40.0)));
        assert!(tree.is_empty());
    }

    #[test]
    fn index_separates_floors_and_untargeted() {
        let mut index = SpatialIndex::new(params());
        index.insert(NodeId(1), Some((0, boxed(1.0, 1.0))));
        index.insert(NodeId(2), Some((1, boxed(1.0, 1.0))));
        index.insert(NodeId(3), None);

        assert_eq!(index.query(0, &boxed(1.0, 1.0)), BTreeSet::from([NodeId(1)]));
        assert_eq!(index.query(1, &boxed(1.0, 1.0)), BTreeSet::from([NodeId(2)]));
        assert!(index.untargeted().contains(&NodeId(3)));

        index.remove(NodeId(1));
        index.remove(NodeId(3));
        assert!(index.query(0, &boxed(1.0, 1.0)).is_empty());
        assert!(!index.contains(NodeId(3)));
    }
}
