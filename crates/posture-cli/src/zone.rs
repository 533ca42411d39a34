//! Seeded demo zone generation.
//!
//! The demo zone is a square room with randomly placed chairs, tables with
//! slots, cups (on tables where there is room, otherwise on the floor),
//! and wall segments. Each agent gets one errand, cycling through sitting
//! down, fetching a cup, and walking up to a table.

use std::f64::consts::TAU;
use std::path::PathBuf;

use posture_graph::{Placement, Slot, WorldObject, WorldState};
use posture_planner::{ActorSnapshot, CarryRequirement, GoalConstraint};
use posture_types::{
    Location, ObjectId, PostureKind, Priority, Region, SlotRef, SlotType, SpatialConstraint, Vec2,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CliError;

/// Tag carried by every demo cup.
const CUP_TAG: &str = "cup";

// -----------------------------------------------------------------------
// Configuration
// -----------------------------------------------------------------------

/// The `demo` section of `posture-config.yaml`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DemoConfig {
    /// RNG seed for the layout.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Chairs to place.
    #[serde(default = "default_chairs")]
    pub chairs: u32,

    /// Tables to place, each with three slots.
    #[serde(default = "default_tables")]
    pub tables: u32,

    /// Cups to place.
    #[serde(default = "default_cups")]
    pub cups: u32,

    /// Wall segments to place.
    #[serde(default = "default_walls")]
    pub walls: u32,

    /// Agents to plan for.
    #[serde(default = "default_agents")]
    pub agents: u32,

    /// Metres walked per execution tick.
    #[serde(default = "default_walk_speed")]
    pub walk_speed: f64,

    /// Execution ticks before the demo gives up.
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u32,

    /// Where to write the GraphML export, if anywhere.
    #[serde(default)]
    pub graphml_path: Option<PathBuf>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            chairs: default_chairs(),
            tables: default_tables(),
            cups: default_cups(),
            walls: default_walls(),
            agents: default_agents(),
            walk_speed: default_walk_speed(),
            max_ticks: default_max_ticks(),
            graphml_path: None,
        }
    }
}

const fn default_seed() -> u64 {
    7
}

const fn default_chairs() -> u32 {
    4
}

const fn default_tables() -> u32 {
    2
}

const fn default_cups() -> u32 {
    3
}

const fn default_walls() -> u32 {
    2
}

const fn default_agents() -> u32 {
    5
}

const fn default_walk_speed() -> f64 {
    1.4
}

const fn default_max_ticks() -> u32 {
    400
}

/// Read the `demo` section out of the raw configuration text. A missing
/// section yields defaults.
///
/// # Errors
///
/// Returns [`CliError::Demo`] when the YAML or the section is malformed.
pub fn parse_demo_config(yaml: &str) -> Result<DemoConfig, CliError> {
    let raw: serde_yml::Value = serde_yml::from_str(yaml).map_err(|e| CliError::Demo {
        message: format!("failed to parse config YAML: {e}"),
    })?;
    let Some(section) = raw.get("demo") else {
        return Ok(DemoConfig::default());
    };
    serde_yml::from_value(section.clone()).map_err(|e| CliError::Demo {
        message: format!("failed to parse demo section: {e}"),
    })
}

// -----------------------------------------------------------------------
// Errands
// -----------------------------------------------------------------------

/// What an agent is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Errand {
    /// Sit on a chair.
    Sit(ObjectId),
    /// Bring any cup into a circle.
    Fetch {
        /// Circle centre.
        centre: Location,
        /// Circle radius.
        radius: f64,
    },
    /// Stand at a table.
    VisitTable(ObjectId),
}

impl Errand {
    /// The goal constraint for this errand.
    pub fn constraint(&self) -> GoalConstraint {
        match self {
            Self::Sit(chair) => GoalConstraint::posture_on(PostureKind::Sit, *chair),
            Self::Fetch { centre, radius } => GoalConstraint::carry_to(
                CarryRequirement::Tagged(CUP_TAG.to_owned()),
                SpatialConstraint::new(centre.floor, Region::circle(centre.position, *radius)),
            ),
            Self::VisitTable(table) => GoalConstraint::at_surface(*table, None),
        }
    }

    /// Short name for reports.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Sit(_) => "sit",
            Self::Fetch { .. } => "fetch",
            Self::VisitTable(_) => "visit_table",
        }
    }
}

// -----------------------------------------------------------------------
// Generation
// -----------------------------------------------------------------------

/// A generated zone and the agents working in it.
#[derive(Debug, Clone)]
pub struct DemoZone {
    /// The world.
    pub world: WorldState,
    /// Agents and their errands.
    pub agents: Vec<(ActorSnapshot, Errand)>,
}

/// Build the demo zone. `half_extent` bounds the room.
///
/// # Errors
///
/// Returns a graph error if an object cannot be placed.
pub fn generate(config: &DemoConfig, half_extent: f64) -> Result<DemoZone, CliError> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let room = half_extent.clamp(2.0, 8.0);
    let mut world = WorldState::new();

    let mut chairs = Vec::new();
    for _ in 0..config.chairs {
        let chair = WorldObject::new("chair", Placement::World(random_location(&mut rng, room)))
            .facing(rng.random_range(0.0..TAU))
            .with_posture(PostureKind::Sit);
        chairs.push(chair.id);
        world.add_object(chair)?;
    }

    let mut tables = Vec::new();
    let mut free_slots = Vec::new();
    for _ in 0..config.tables {
        let facing = rng.random_range(0.0..TAU);
        let table = WorldObject::new("table", Placement::World(random_location(&mut rng, room)))
            .with_extents(0.6, 0.4)
            .facing(facing)
            .as_surface()
            .with_slot(Slot::new(SlotType::Small, Vec2::new(-0.3, 0.0), facing))
            .with_slot(Slot::new(SlotType::Small, Vec2::new(0.3, 0.0), facing))
            .with_slot(Slot::new(SlotType::Medium, Vec2::ZERO, facing));
        free_slots.extend([0_u16, 1].map(|index| SlotRef {
            object: table.id,
            index,
        }));
        tables.push(table.id);
        world.add_object(table)?;
    }

    for _ in 0..config.cups {
        let placement = free_slots
            .pop()
            .map_or_else(|| Placement::World(random_location(&mut rng, room)), Placement::Slot);
        let cup = WorldObject::new("cup", placement).as_carryable().with_tag(CUP_TAG);
        world.add_object(cup)?;
    }

    for _ in 0..config.walls {
        let long = rng.random_range(1.0..2.5);
        let (half_x, half_y) = if rng.random_bool(0.5) { (long, 0.1) } else { (0.1, long) };
        let wall = WorldObject::new("wall", Placement::World(random_location(&mut rng, room)))
            .with_extents(half_x, half_y)
            .as_obstacle();
        world.add_object(wall)?;
    }

    let mut agents = Vec::new();
    for index in 0..config.agents {
        let mut actor = ActorSnapshot::standing_at(random_location(&mut rng, room));
        if rng.random_bool(0.2) {
            actor = actor.with_priority(Priority::High);
        }
        let errand = match (index % 3, pick(&mut rng, &chairs), pick(&mut rng, &tables)) {
            (0, Some(chair), _) => Errand::Sit(chair),
            (2, _, Some(table)) => Errand::VisitTable(table),
            _ => Errand::Fetch {
                centre: random_location(&mut rng, room),
                radius: 1.5,
            },
        };
        agents.push((actor, errand));
    }

    info!(
        seed = config.seed,
        objects = world.len(),
        agents = agents.len(),
        "demo zone generated"
    );
    Ok(DemoZone { world, agents })
}

fn random_location(rng: &mut StdRng, room: f64) -> Location {
    Location::new(rng.random_range(-room..room), rng.random_range(-room..room), 0)
}

fn pick(rng: &mut StdRng, ids: &[ObjectId]) -> Option<ObjectId> {
    if ids.is_empty() {
        return None;
    }
    ids.get(rng.random_range(0..ids.len())).copied()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_zone() {
        let config = DemoConfig::default();
        let a = generate(&config, 8.0).unwrap();
        let b = generate(&config, 8.0).unwrap();
        let places = |zone: &DemoZone| -> Vec<Location> {
            zone.agents.iter().map(|(actor, _)| actor.location).collect()
        };
        assert_eq!(places(&a), places(&b));
        assert_eq!(a.world.len(), b.world.len());
    }

    #[test]
    fn zone_has_everything_requested() {
        let config = DemoConfig {
            chairs: 3,
            tables: 1,
            cups: 4,
            walls: 1,
            agents: 6,
            ..DemoConfig::default()
        };
        let zone = generate(&config, 8.0).unwrap();
        assert_eq!(zone.world.len(), 9);
        assert_eq!(zone.world.objects_with_tag(CUP_TAG).len(), 4);
        assert_eq!(zone.agents.len(), 6);
        let labels: Vec<&str> = zone.agents.iter().map(|(_, e)| e.label()).collect();
        assert_eq!(labels[..3], ["sit", "fetch", "visit_table"]);
    }

    #[test]
    fn demo_section_is_optional() {
        let config = parse_demo_config("routing:\n  cost_per_metre: 2.0\n").unwrap();
        assert_eq!(config, DemoConfig::default());
        let config = parse_demo_config("demo:\n  seed: 11\n  agents: 2\n").unwrap();
        assert_eq!(config.seed, 11);
        assert_eq!(config.agents, 2);
        assert_eq!(config.chairs, default_chairs());
    }

    #[test]
    fn malformed_demo_section_is_an_error() {
        assert!(matches!(
            parse_demo_config("demo:\n  seed: many\n"),
            Err(CliError::Demo { .. })
        ));
    }
}
