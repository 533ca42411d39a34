//! Error types for the demo binary.
//!
//! [`CliError`] wraps every failure mode of startup, zone generation,
//! planning, and export so `main` can propagate with `?`.

use std::path::PathBuf;

/// Top-level error for the demo binary.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: posture_planner::ConfigError,
    },

    /// The `demo` section could not be parsed.
    #[error("demo config error: {message}")]
    Demo {
        /// Description of the problem.
        message: String,
    },

    /// Zone generation failed.
    #[error("world error: {source}")]
    World {
        /// The underlying graph error.
        #[from]
        source: posture_graph::GraphError,
    },

    /// The planner reported a structural error.
    #[error("planner error: {source}")]
    Planner {
        /// The underlying planner error.
        #[from]
        source: posture_planner::PlannerError,
    },

    /// An output file could not be written.
    #[error("failed to write {path}: {source}")]
    Output {
        /// The file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The run report could not be serialized.
    #[error("report serialization failed: {source}")]
    Report {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}
