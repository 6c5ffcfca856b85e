#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Core identifiers and outcome types for the county lights pipeline.
//!
//! Everything that crosses a crate or process boundary lives here: county
//! codes, tile ids, the `YYYYDDD` date codes embedded in raster product
//! names, fishnet zone keys, and the tagged outcomes returned by tile and
//! county work units. Tile tasks and outcomes are serde values so that they
//! can be handed to worker subprocesses as JSON. The [`artifact`] helpers
//! give every crate the same write-then-rename discipline for outputs whose
//! existence gates re-work.

pub mod artifact;
pub mod code;
pub mod date;
pub mod outcome;
pub mod zone;

pub use code::{CountyCode, TileId};
pub use date::DateCode;
pub use outcome::{CountyOutcome, TileArtifacts, TileOutcome, TileTask};

use thiserror::Error;

/// Errors raised when parsing identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// A county code was empty, non-numeric, or too long.
    #[error("Invalid county code {raw:?}: {reason}")]
    InvalidCountyCode {
        /// The rejected input.
        raw: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A tile id was empty or contained path separators.
    #[error("Invalid tile id {raw:?}")]
    InvalidTileId {
        /// The rejected input.
        raw: String,
    },

    /// A date code was not a valid `YYYYDDD` value.
    #[error("Invalid date code {raw:?}")]
    InvalidDateCode {
        /// The rejected input.
        raw: String,
    },
}
