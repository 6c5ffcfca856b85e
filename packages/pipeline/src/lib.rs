#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! County-tile orchestration for nighttime-light rasters.
//!
//! The [`RunDriver`] walks a worklist of county codes one at a time. For
//! each county the [`CountyOrchestrator`] exports the county polygon,
//! locates the satellite tiles it overlaps, fans the tiles out to a
//! bounded pool of [`TileRunner`]s, merges the per-tile fishnets and wide
//! tables into county outputs and records the county in the
//! [`ProgressStore`]. Raster work is delegated to the capability traits
//! in [`capability`]; [`CommandToolkit`] implements them with external
//! programs.

pub mod capability;
pub mod config;
pub mod county;
pub mod driver;
pub mod progress;
pub mod runner;
pub mod store;
pub mod tile;
pub mod toolkit;
pub mod worker;

pub use capability::{
    Capabilities, CapabilityError, ExtractRequest, GeospatialSession, NullSession,
    RasterExtractor, ZonalReducer, ZoneGridBuilder,
};
pub use config::{Config, ConfigError, Isolation};
pub use county::{CountyOrchestrator, RunPaths, TileSettings};
pub use driver::{RunDriver, RunPlan, RunSummary, load_worklist};
pub use runner::{InProcessRunner, SubprocessRunner, TileRunner, run_tiles};
pub use store::ProgressStore;
pub use tile::{TileLayout, TileProcessor, find_products};
pub use toolkit::CommandToolkit;
pub use worker::serve_tile_task;

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while orchestrating a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Vector layer error.
    #[error(transparent)]
    Spatial(#[from] county_lights_spatial::SpatialError),

    /// Table error.
    #[error(transparent)]
    Table(#[from] county_lights_table::TableError),

    /// Capability call failed.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Identifier parse error.
    #[error(transparent)]
    Model(#[from] county_lights_models::ModelError),

    /// JSON encoding of a task or outcome failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The raw archive path is not a valid glob pattern.
    #[error("Invalid archive pattern: {0}")]
    Glob(#[from] glob::PatternError),

    /// Malformed worklist CSV.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// CSV file.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// The worklist has no such column.
    #[error("Column {column:?} not found in {path}")]
    MissingColumn {
        /// CSV file.
        path: PathBuf,
        /// Column that was expected.
        column: String,
    },

    /// Another worker holds the lock on this artifact.
    #[error("Another worker is producing {0}")]
    Locked(PathBuf),

    /// A step reported success without leaving a complete output.
    #[error("Output {0} missing or empty")]
    MissingOutput(PathBuf),
}
