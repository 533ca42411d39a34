//! Configuration loading and typed config structures for the planner.
//!
//! The canonical configuration lives in `posture-config.yaml` at the
//! workspace root. Every section and field has a default, so a missing file
//! section (or a missing file, at the binary's discretion) falls back to the
//! values below.

use std::path::Path;

use posture_graph::GraphConfig;
use posture_types::Location;
use serde::{Deserialize, Serialize};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level planner configuration.
///
/// Mirrors the structure of `posture-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Graph store and builder settings.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Segment search limits.
    #[serde(default)]
    pub search: SearchConfig,

    /// Connectivity handle geometry.
    #[serde(default)]
    pub handles: HandleConfig,

    /// Route costing and execution settings.
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Reference grid router settings.
    #[serde(default)]
    pub router: GridConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PlannerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }
}

/// Segment search limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// How many times one node may be expanded by a single search.
    #[serde(default = "default_max_visits_per_node")]
    pub max_visits_per_node: u32,

    /// Right-hand candidates pulled from the search stream per request.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Metres subtracted from crow-flight estimates before they are used as
    /// a search heuristic.
    #[serde(default = "default_heuristic_slack")]
    pub heuristic_slack: f64,

    /// Extra cost charged when choosing an item that sits in another
    /// object's storage.
    #[serde(default = "default_storage_penalty")]
    pub storage_penalty: f64,

    /// How close an item must be to be picked up without walking.
    #[serde(default = "default_pickup_reach")]
    pub pickup_reach: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_visits_per_node: default_max_visits_per_node(),
            max_candidates: default_max_candidates(),
            heuristic_slack: default_heuristic_slack(),
            storage_penalty: default_storage_penalty(),
            pickup_reach: default_pickup_reach(),
        }
    }
}

/// Geometry of the spatial constraints generated for segment endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandleConfig {
    /// Distance in front of a posture object's front edge where the
    /// approach region is centred.
    #[serde(default = "default_approach_offset")]
    pub approach_offset: f64,

    /// Radius of the approach region.
    #[serde(default = "default_approach_radius")]
    pub approach_radius: f64,

    /// Distance beyond a surface's footprint within which it can be used.
    #[serde(default = "default_reach_distance")]
    pub reach_distance: f64,
}

impl Default for HandleConfig {
    fn default() -> Self {
        Self {
            approach_offset: default_approach_offset(),
            approach_radius: default_approach_radius(),
            reach_distance: default_reach_distance(),
        }
    }
}

/// Route costing and plan execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Cost charged per metre walked.
    #[serde(default = "default_cost_per_metre")]
    pub cost_per_metre: f64,

    /// Ticks a plan task may wait on the router before giving up.
    #[serde(default = "default_max_poll_ticks")]
    pub max_poll_ticks: u32,

    /// Remaining walk distance at which the next leg's reservations are
    /// taken.
    #[serde(default = "default_reserve_approach_distance")]
    pub reserve_approach_distance: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            cost_per_metre: default_cost_per_metre(),
            max_poll_ticks: default_max_poll_ticks(),
            reserve_approach_distance: default_reserve_approach_distance(),
        }
    }
}

/// A stair or lift connecting two floors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortalConfig {
    /// One end.
    pub from: Location,
    /// The other end.
    pub to: Location,
}

/// Reference grid router settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Grid cell edge length in metres.
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,

    /// Polls a route request stays pending before its result is reported.
    #[serde(default = "default_latency_ticks")]
    pub latency_ticks: u32,

    /// Cost of taking a portal between floors.
    #[serde(default = "default_floor_change_cost")]
    pub floor_change_cost: f64,

    /// Points sampled around a region when turning it into goals.
    #[serde(default = "default_sample_ring")]
    pub sample_ring: u32,

    /// Goal cost per metre of distance from the constraint's reference
    /// point.
    #[serde(default = "default_goal_distance_weight")]
    pub goal_distance_weight: f64,

    /// Floor connections.
    #[serde(default)]
    pub portals: Vec<PortalConfig>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            latency_ticks: default_latency_ticks(),
            floor_change_cost: default_floor_change_cost(),
            sample_ring: default_sample_ring(),
            goal_distance_weight: default_goal_distance_weight(),
            portals: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub json: bool,

    /// Planning failures kept in the context's failure log.
    #[serde(default = "default_failure_log_capacity")]
    pub failure_log_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            failure_log_capacity: default_failure_log_capacity(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_max_visits_per_node() -> u32 {
    2
}

const fn default_max_candidates() -> usize {
    4
}

const fn default_heuristic_slack() -> f64 {
    0.5
}

const fn default_storage_penalty() -> f64 {
    2.0
}

const fn default_pickup_reach() -> f64 {
    1.5
}

const fn default_approach_offset() -> f64 {
    0.6
}

const fn default_approach_radius() -> f64 {
    0.4
}

const fn default_reach_distance() -> f64 {
    0.9
}

const fn default_cost_per_metre() -> f64 {
    1.0
}

const fn default_max_poll_ticks() -> u32 {
    256
}

const fn default_reserve_approach_distance() -> f64 {
    2.0
}

const fn default_cell_size() -> f64 {
    0.5
}

const fn default_latency_ticks() -> u32 {
    1
}

const fn default_floor_change_cost() -> f64 {
    5.0
}

const fn default_sample_ring() -> u32 {
    8
}

const fn default_goal_distance_weight() -> f64 {
    0.25
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_failure_log_capacity() -> usize {
    64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = PlannerConfig::default();
        assert_eq!(config.search.max_visits_per_node, 2);
        assert_eq!(config.routing.max_poll_ticks, 256);
        assert_eq!(config.router.sample_ring, 8);
        assert_eq!(config.logging.level, "info");
        assert!(config.router.portals.is_empty());
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r"
search:
  max_candidates: 6
router:
  cell_size: 0.25
  portals:
    - from: { position: { x: 1.0, y: 1.0 }, floor: 0 }
      to: { position: { x: 1.0, y: 1.0 }, floor: 1 }
logging:
  json: true
";
        let config = PlannerConfig::parse(yaml).unwrap();
        assert_eq!(config.search.max_candidates, 6);
        assert_eq!(config.search.max_visits_per_node, 2);
        assert!((config.router.cell_size - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.router.portals.len(), 1);
        assert!(config.logging.json);
        assert_eq!(config.graph, GraphConfig::default());
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let config = PlannerConfig::parse("{}").unwrap();
        assert_eq!(config, PlannerConfig::default());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let result = PlannerConfig::parse("search: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
