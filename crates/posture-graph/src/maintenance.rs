//! Incremental graph maintenance with bulk-edit and deferred-build modes.
//!
//! The [`GraphMaintainer`] owns the graph and decides, per world edit,
//! whether to expand incrementally, queue the edit, or fall back to a full
//! rebuild.
//!
//! - While building is disabled (a counted scope, so scopes nest), additions
//!   and moves are queued and applied when the outermost scope ends. Node
//!   removal always happens immediately, so the graph never names an object
//!   that is gone from the world.
//! - In bulk-edit mode every incremental edit is counted. Once the count
//!   exceeds the configured threshold incremental work stops and a single
//!   full rebuild runs when bulk mode ends. Removals still take effect
//!   immediately.

use posture_types::{ObjectId, StateSpec};
use tracing::{debug, info, warn};

use crate::builder::{self, BuildStats};
use crate::config::GraphConfig;
use crate::error::GraphError;
use crate::graph::{NodeId, PostureGraph};
use crate::world::WorldState;

/// Owns the posture graph and keeps it in step with the world.
#[derive(Debug, Clone)]
pub struct GraphMaintainer {
    graph: PostureGraph,
    config: GraphConfig,
    disabled_depth: u32,
    pending: Vec<ObjectId>,
    bulk: bool,
    bulk_edits: u32,
    rebuild_pending: bool,
}

impl GraphMaintainer {
    /// Maintainer with an unbuilt graph.
    pub fn new(config: GraphConfig) -> Self {
        Self {
            graph: PostureGraph::new(&config),
            config,
            disabled_depth: 0,
            pending: Vec::new(),
            bulk: false,
            bulk_edits: 0,
            rebuild_pending: false,
        }
    }

    /// The maintained graph.
    pub const fn graph(&self) -> &PostureGraph {
        &self.graph
    }

    /// Active graph settings.
    pub const fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Whether graph building currently runs on each edit.
    pub const fn is_building_enabled(&self) -> bool {
        self.disabled_depth == 0
    }

    /// Whether bulk-edit mode is active.
    pub const fn in_bulk_edit(&self) -> bool {
        self.bulk
    }

    /// Incremental edits counted in the current bulk-edit session.
    pub const fn bulk_edit_count(&self) -> u32 {
        self.bulk_edits
    }

    /// Object additions waiting for building to be re-enabled.
    pub fn pending_edits(&self) -> usize {
        self.pending.len()
    }

    /// Full rebuild.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn rebuild(&mut self, world: &WorldState) -> Result<BuildStats, GraphError> {
        let stats = builder::rebuild(&mut self.graph, world, &self.config)?;
        self.pending.clear();
        self.rebuild_pending = false;
        self.verify()?;
        Ok(stats)
    }

    /// Record that `object` was added to `world`.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn object_added(&mut self, world: &WorldState, object: ObjectId) -> Result<(), GraphError> {
        if !self.is_building_enabled() {
            self.pending.push(object);
            return Ok(());
        }
        if !self.count_edit() {
            return Ok(());
        }
        builder::object_added(&mut self.graph, world, &self.config, object)?;
        self.verify()
    }

    /// Record that `removed` objects were taken out of the world.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn objects_removed(&mut self, removed: &[ObjectId]) -> Result<(), GraphError> {
        self.pending.retain(|p| !removed.contains(p));
        builder::object_removed(&mut self.graph, removed);
        if self.is_building_enabled() {
            self.count_edit();
        }
        self.verify()
    }

    /// Record that `object` (with `affected` parts and contents) moved.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn object_moved(
        &mut self,
        world: &WorldState,
        object: ObjectId,
        affected: &[ObjectId],
    ) -> Result<(), GraphError> {
        builder::object_removed(&mut self.graph, affected);
        if !self.is_building_enabled() {
            self.pending.push(object);
            return Ok(());
        }
        if !self.count_edit() {
            return Ok(());
        }
        builder::object_added(&mut self.graph, world, &self.config, object)?;
        self.verify()
    }

    /// Enter a building-disabled scope.
    pub const fn disable_building(&mut self) {
        self.disabled_depth = self.disabled_depth.saturating_add(1);
    }

    /// Leave a building-disabled scope. When the outermost scope ends the
    /// queued additions are applied, or a full rebuild runs if more edits
    /// were queued than the bulk threshold allows.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn enable_building(&mut self, world: &WorldState) -> Result<(), GraphError> {
        if self.disabled_depth == 0 {
            warn!("enable_building called while building was already enabled");
            return Ok(());
        }
        self.disabled_depth = self.disabled_depth.saturating_sub(1);
        if self.disabled_depth > 0 {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.threshold() {
            info!(queued = pending.len(), "queued edits exceed threshold, rebuilding");
            self.rebuild(world)?;
            return Ok(());
        }
        for object in pending {
            if world.contains(object) {
                self.object_added(world, object)?;
            }
        }
        Ok(())
    }

    /// Enter bulk-edit mode and reset the edit counter.
    pub const fn begin_bulk_edit(&mut self) {
        self.bulk = true;
        self.bulk_edits = 0;
    }

    /// Leave bulk-edit mode, rebuilding if the counter overflowed.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn end_bulk_edit(&mut self, world: &WorldState) -> Result<(), GraphError> {
        self.bulk = false;
        let edits = self.bulk_edits;
        self.bulk_edits = 0;
        if self.rebuild_pending {
            info!(edits, "bulk edit overflowed, rebuilding posture graph");
            self.rebuild(world)?;
        }
        Ok(())
    }

    /// Canonical node for `spec`, interning and fully expanding it if it is
    /// valid but not yet in the graph.
    ///
    /// # Errors
    ///
    /// Propagates graph errors.
    pub fn ensure_node(
        &mut self,
        world: &WorldState,
        spec: &StateSpec,
    ) -> Result<Option<NodeId>, GraphError> {
        let Some((node, created)) = self.graph.intern(spec, world) else {
            return Ok(None);
        };
        if created {
            let stats = builder::expand_node(&mut self.graph, world, &self.config, node)?;
            debug!(%node, created = stats.nodes_created, "expanded node on demand");
            self.verify()?;
        }
        Ok(Some(node))
    }

    fn threshold(&self) -> usize {
        usize::try_from(self.config.bulk_rebuild_threshold).unwrap_or(usize::MAX)
    }

    /// Count an edit. Returns `false` when incremental work should be
    /// skipped because a rebuild is already due.
    const fn count_edit(&mut self) -> bool {
        if !self.bulk {
            return true;
        }
        if self.rebuild_pending {
            return false;
        }
        self.bulk_edits = self.bulk_edits.saturating_add(1);
        if self.bulk_edits > self.config.bulk_rebuild_threshold {
            self.rebuild_pending = true;
            return false;
        }
        true
    }

    fn verify(&self) -> Result<(), GraphError> {
        if self.config.verify_after_build {
            self.graph.verify_symmetry()?;
        }
        debug_assert!(self.graph.verify_symmetry().is_ok(), "posture graph symmetry violated");
        Ok(())
    }
}
