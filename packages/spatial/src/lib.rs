#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Vector side of the county lights pipeline.
//!
//! Reads the master county layer and the global tile grid (both `GeoJSON`),
//! exports a county's polygon as a clipping cutline, locates the tiles a
//! county overlaps with an R-tree prefilter plus a positive-area polygon
//! intersection, and verifies/merges fishnet zone layers.

pub mod county;
pub mod fishnet;
pub mod layer;
pub mod tiles;

pub use county::{CountyLayer, read_cutline};
pub use fishnet::{ZoneLayerMerge, ensure_zone_fields, merge_zone_layers};
pub use tiles::{TileGrid, intersects, locate_tiles};

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing vector layers.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid `GeoJSON`.
    #[error("GeoJSON error in {path}: {source}")]
    GeoJson {
        /// Layer being read.
        path: PathBuf,
        /// Underlying parse error.
        source: geojson::Error,
    },

    /// JSON serialization failed while writing a layer.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The layer has no feature carrying the requested attribute.
    #[error("Field {field:?} not found in {path}")]
    MissingField {
        /// Layer being read.
        path: PathBuf,
        /// Attribute that was expected.
        field: String,
    },

    /// The layer holds no usable features.
    #[error("Layer {path} has no usable features")]
    EmptyLayer {
        /// Layer being read.
        path: PathBuf,
    },

    /// The layer's top-level object is not a feature collection.
    #[error("Layer {path} is not a FeatureCollection")]
    NotFeatureCollection {
        /// Layer being read.
        path: PathBuf,
    },
}
