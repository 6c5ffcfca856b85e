//! Work-unit values and their tagged outcomes.
//!
//! A [`TileTask`] carries everything a worker needs and nothing it could
//! mutate behind the orchestrator's back, so it can be serialized to a
//! worker subprocess. Outcomes are structured; they only become strings at
//! the logging boundary through their `Display` impls.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{CountyCode, TileId};

/// One (county, tile) unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileTask {
    /// County whose polygon is the cutline.
    pub county: CountyCode,
    /// Tile to process.
    pub tile: TileId,
    /// Exported county polygon layer used as the clipping cutline.
    pub cutline: PathBuf,
    /// Root of the raw raster product archive.
    pub raw_archive: PathBuf,
    /// Exclusive scratch directory for this tile (`<county>/tile_<id>`).
    pub work_dir: PathBuf,
    /// Nodata value written by the extractor for masked pixels.
    pub nodata: f64,
    /// Keep per-date zonal tables after they are pivoted.
    pub keep_intermediate: bool,
}

impl TileTask {
    /// Log prefix identifying this unit (`06079/h08v05`).
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}/{}", self.county, self.tile)
    }
}

/// Artifacts produced by a successful tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileArtifacts {
    /// The tile's fishnet zone layer.
    pub zone_layer: PathBuf,
    /// The tile's wide table (zones × dates).
    pub wide_table: PathBuf,
    /// Number of date columns in the wide table.
    pub dates: usize,
}

/// Result of processing one tile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TileOutcome {
    /// The tile produced a fishnet and a wide table.
    Succeeded(TileArtifacts),
    /// Nothing to do: no raw products, or none survived extraction.
    Skipped {
        /// Why the tile was skipped.
        reason: String,
    },
    /// The tile could not be completed.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl TileOutcome {
    /// Convenience constructor for [`TileOutcome::Skipped`].
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`TileOutcome::Failed`].
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Returns the artifacts if the tile succeeded.
    #[must_use]
    pub const fn artifacts(&self) -> Option<&TileArtifacts> {
        match self {
            Self::Succeeded(artifacts) => Some(artifacts),
            Self::Skipped { .. } | Self::Failed { .. } => None,
        }
    }
}

impl fmt::Display for TileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded(artifacts) => write!(f, "succeeded ({} dates)", artifacts.dates),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Result of processing one county.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountyOutcome {
    /// Outputs were written and progress recorded.
    Completed {
        /// Tiles that contributed to the outputs, in submission order.
        tiles: Vec<TileId>,
        /// Merged county fishnet.
        zone_layer: PathBuf,
        /// Merged county wide table.
        wide_table: PathBuf,
    },
    /// Input absent (no polygon, no intersecting tile).
    Skipped {
        /// Why the county was skipped.
        reason: String,
    },
    /// A structural failure, or no tile succeeded.
    Failed {
        /// What went wrong.
        reason: String,
    },
}

impl CountyOutcome {
    /// Convenience constructor for [`CountyOutcome::Skipped`].
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`CountyOutcome::Failed`].
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    /// Whether the county completed and was marked done.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

impl fmt::Display for CountyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { tiles, .. } => {
                write!(f, "completed with {} tile(s)", tiles.len())
            }
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}
