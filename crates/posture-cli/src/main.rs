//! Demo binary for the posture planner.
//!
//! Generates a seeded zone, plans every agent's errand against the grid
//! router, executes the plans side by side so their reservations contend,
//! and prints a JSON run report to stdout. Logs go to stderr.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `posture-config.yaml` (or the path given as
//!    the first argument)
//! 2. Initialize structured logging (tracing) from the `logging` section
//! 3. Generate the demo zone from the `demo` section
//! 4. Build the planner context (graph and router)
//! 5. Plan every errand
//! 6. Execute the plans tick by tick
//! 7. Export the graph and print the report

mod error;
mod zone;

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use posture_planner::{
    ExecutionStatus, GridRouter, PlanExecution, PlannerConfig, PlannerContext,
    config::LoggingConfig,
};
use posture_types::AgentId;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::CliError;
use crate::zone::{DemoConfig, Errand};

/// Default configuration file, relative to the working directory.
const CONFIG_PATH: &str = "posture-config.yaml";

/// Outcome of one agent's errand.
#[derive(Debug, Clone, Serialize)]
struct AgentReport {
    agent: AgentId,
    errand: Errand,
    /// `complete`, `running`, or the failure reason.
    outcome: String,
    cost: Option<f64>,
    transitions: usize,
    actions: usize,
    ticks: u32,
}

/// The printed report.
#[derive(Debug, Clone, Serialize)]
struct RunReport {
    seed: u64,
    nodes: usize,
    edges: usize,
    agents: Vec<AgentReport>,
    failures_logged: usize,
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, zone generation, planning, or export
/// fails. Individual plan failures are reported, not returned.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(CONFIG_PATH), PathBuf::from);
    let (config, demo) = load_config(&path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(path = %path.display(), seed = demo.seed, "posture-plan starting");

    // 3. Generate the demo zone.
    let zone = zone::generate(&demo, config.graph.zone_half_extent)?;

    // 4. Build the planner context.
    let router = GridRouter::new(
        &zone.world,
        &config.router,
        config.routing.cost_per_metre,
        config.graph.zone_half_extent,
    );
    let mut ctx = PlannerContext::new(zone.world, router, config).map_err(CliError::from)?;
    info!(
        nodes = ctx.graph().node_count(),
        edges = ctx.graph().edge_count(),
        "planner context built"
    );

    // 5. Plan every errand.
    let mut reports = Vec::new();
    let mut runs: Vec<(usize, PlanExecution)> = Vec::new();
    for (actor, errand) in &zone.agents {
        let mut report = AgentReport {
            agent: actor.id,
            errand: errand.clone(),
            outcome: String::new(),
            cost: None,
            transitions: 0,
            actions: 0,
            ticks: 0,
        };
        match ctx.plan_blocking(actor, &errand.constraint()).map_err(CliError::from)? {
            Ok(path) => {
                report.cost = Some(path.cost.total().units());
                report.transitions = path.len();
                info!(agent = %actor.id, errand = errand.label(), cost = %path.cost, "errand planned");
                match ctx.start_execution(path, actor.priority) {
                    Ok(run) => {
                        report.actions = run.actions().len();
                        report.outcome = "running".to_owned();
                        runs.push((reports.len(), run));
                    }
                    Err(failure) => report.outcome = failure.to_string(),
                }
            }
            Err(failure) => {
                warn!(agent = %actor.id, errand = errand.label(), %failure, "errand could not be planned");
                report.outcome = failure.to_string();
            }
        }
        reports.push(report);
    }

    // 6. Execute the plans side by side.
    execute(&mut ctx, &mut runs, &mut reports, &demo);

    // 7. Export and report.
    if let Some(out) = &demo.graphml_path {
        write_graphml(&ctx, out)?;
        info!(path = %out.display(), "graph exported");
    }
    let report = RunReport {
        seed: demo.seed,
        nodes: ctx.graph().node_count(),
        edges: ctx.graph().edge_count(),
        agents: reports,
        failures_logged: ctx.failures().len(),
    };
    println!("{}", serde_json::to_string_pretty(&report).map_err(CliError::from)?);
    info!("posture-plan finished");
    Ok(())
}

/// Load the planner configuration and the `demo` section. A missing file
/// yields defaults for both.
fn load_config(path: &Path) -> Result<(PlannerConfig, DemoConfig), CliError> {
    if !path.exists() {
        return Ok((PlannerConfig::default(), DemoConfig::default()));
    }
    let config = PlannerConfig::from_file(path)?;
    let contents = std::fs::read_to_string(path).map_err(|e| CliError::Demo {
        message: format!("failed to read config file: {e}"),
    })?;
    Ok((config, zone::parse_demo_config(&contents)?))
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Tick every running plan until all finish or the tick budget runs out.
fn execute(
    ctx: &mut PlannerContext<GridRouter>,
    runs: &mut [(usize, PlanExecution)],
    reports: &mut [AgentReport],
    demo: &DemoConfig,
) {
    for tick in 0..demo.max_ticks {
        let mut running = 0_usize;
        for (index, run) in runs.iter_mut() {
            if *run.status() != ExecutionStatus::Running {
                continue;
            }
            let status = ctx.tick_execution(run, demo.walk_speed);
            let Some(report) = reports.get_mut(*index) else {
                continue;
            };
            report.ticks = tick.saturating_add(1);
            match status {
                ExecutionStatus::Running => running = running.saturating_add(1),
                ExecutionStatus::Complete => report.outcome = "complete".to_owned(),
                ExecutionStatus::Failed(failure) => report.outcome = failure.to_string(),
            }
        }
        if running == 0 {
            info!(ticks = tick.saturating_add(1), "all plans finished");
            return;
        }
    }
    warn!(max_ticks = demo.max_ticks, "tick budget exhausted with plans still running");
}

fn write_graphml(ctx: &PlannerContext<GridRouter>, path: &Path) -> Result<(), CliError> {
    let file = File::create(path).map_err(|source| CliError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = BufWriter::new(file);
    ctx.export_graphml(&mut out)?;
    Ok(())
}
