//! Graph construction settings.
//!
//! Embedded in the planner's YAML configuration under the `graph` key.

use posture_types::{Cost, PostureKind};
use serde::{Deserialize, Serialize};

/// Costs charged for each atomic operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCosts {
    /// Sitting down.
    #[serde(default = "default_sit")]
    pub sit: Cost,

    /// Lying down.
    #[serde(default = "default_lie")]
    pub lie: Cost,

    /// Entering a container slot.
    #[serde(default = "default_occupy")]
    pub occupy: Cost,

    /// Standing up or leaving a container.
    #[serde(default = "default_stand")]
    pub stand: Cost,

    /// Stepping up to a surface.
    #[serde(default = "default_surface")]
    pub surface: Cost,

    /// Stepping away from a surface while staying in posture.
    #[serde(default = "default_forget_surface")]
    pub forget_surface: Cost,

    /// Picking an item up.
    #[serde(default = "default_pick_up")]
    pub pick_up: Cost,

    /// Putting an item down.
    #[serde(default = "default_put_down")]
    pub put_down: Cost,
}

impl OperationCosts {
    /// Cost of assuming `posture`.
    pub const fn posture(&self, posture: PostureKind) -> Cost {
        match posture {
            PostureKind::Stand => self.stand,
            PostureKind::Sit => self.sit,
            PostureKind::Lie => self.lie,
            PostureKind::Occupy => self.occupy,
        }
    }
}

impl Default for OperationCosts {
    fn default() -> Self {
        Self {
            sit: default_sit(),
            lie: default_lie(),
            occupy: default_occupy(),
            stand: default_stand(),
            surface: default_surface(),
            forget_surface: default_forget_surface(),
            pick_up: default_pick_up(),
            put_down: default_put_down(),
        }
    }
}

/// Graph store and builder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Per-operation costs.
    #[serde(default)]
    pub costs: OperationCosts,

    /// Incremental edits tolerated in bulk-edit mode (or queued while
    /// building is disabled) before a full rebuild is used instead.
    #[serde(default = "default_bulk_rebuild_threshold")]
    pub bulk_rebuild_threshold: u32,

    /// Items a quadtree cell holds before it splits.
    #[serde(default = "default_quadtree_max_items")]
    pub quadtree_max_items: usize,

    /// Maximum quadtree depth.
    #[serde(default = "default_quadtree_max_depth")]
    pub quadtree_max_depth: u32,

    /// Half size of the square each floor's quadtree covers, in metres.
    /// Nodes outside it are kept in an overflow list.
    #[serde(default = "default_zone_half_extent")]
    pub zone_half_extent: f64,

    /// Run the full symmetry check after every build step.
    #[serde(default = "default_verify")]
    pub verify_after_build: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            costs: OperationCosts::default(),
            bulk_rebuild_threshold: default_bulk_rebuild_threshold(),
            quadtree_max_items: default_quadtree_max_items(),
            quadtree_max_depth: default_quadtree_max_depth(),
            zone_half_extent: default_zone_half_extent(),
            verify_after_build: default_verify(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_sit() -> Cost {
    Cost::new(1.0)
}

fn default_lie() -> Cost {
    Cost::new(2.0)
}

fn default_occupy() -> Cost {
    Cost::new(1.5)
}

fn default_stand() -> Cost {
    Cost::new(1.0)
}

fn default_surface() -> Cost {
    Cost::new(0.5)
}

fn default_forget_surface() -> Cost {
    Cost::new(0.1)
}

fn default_pick_up() -> Cost {
    Cost::new(1.0)
}

fn default_put_down() -> Cost {
    Cost::new(1.0)
}

const fn default_bulk_rebuild_threshold() -> u32 {
    32
}

const fn default_quadtree_max_items() -> usize {
    8
}

const fn default_quadtree_max_depth() -> u32 {
    6
}

const fn default_zone_half_extent() -> f64 {
    128.0
}

const fn default_verify() -> bool {
    cfg!(debug_assertions)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "costs:\n  sit: 2.5\nbulk_rebuild_threshold: 4\n";
        let config: GraphConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.costs.sit, Cost::new(2.5));
        assert_eq!(config.costs.lie, Cost::new(2.0));
        assert_eq!(config.bulk_rebuild_threshold, 4);
        assert_eq!(config.quadtree_max_items, 8);
    }

    #[test]
    fn posture_cost_lookup() {
        let costs = OperationCosts::default();
        assert_eq!(costs.posture(PostureKind::Lie), costs.lie);
        assert_eq!(costs.posture(PostureKind::Stand), costs.stand);
    }
}
