//! Delegated raster capabilities.
//!
//! The pipeline never touches pixels itself. Decoding, clipping and
//! masking raw products, building a fishnet from a sample raster, and the
//! zonal mean reduction are all provided behind these traits. Every call
//! receives the [`GeospatialSession`] it runs in, so a backend with a
//! process-wide workspace cache can share and clear it explicitly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use county_lights_table::{TableError, ZonalRecord};
use thiserror::Error;

/// Errors raised by a capability call.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The external program could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The external program exited unsuccessfully.
    #[error("{program} exited with {status}: {stderr}")]
    Exit {
        /// Program name.
        program: String,
        /// Exit status as displayed by the OS.
        status: String,
        /// Trailing standard error output.
        stderr: String,
    },

    /// The call reported success but its output is missing or empty.
    #[error("Expected output {0} was not produced")]
    MissingOutput(PathBuf),

    /// The reducer's table could not be read.
    #[error("Reducer output unreadable: {0}")]
    Table(#[from] TableError),

    /// I/O error around the call.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

/// Handle on the shared workspace/cache of the geospatial engine.
pub trait GeospatialSession: Send + Sync {
    /// Drops any cached state (open datasets, workspace locks).
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError`] if the cache could not be cleared;
    /// callers treat this as best-effort.
    fn clear_cache(&self) -> Result<(), CapabilityError>;
}

/// A session with nothing to clear.
pub struct NullSession;

impl GeospatialSession for NullSession {
    fn clear_cache(&self) -> Result<(), CapabilityError> {
        Ok(())
    }
}

/// Inputs of one extraction.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    /// Raw tile product.
    pub product: &'a Path,
    /// County polygon layer to clip with.
    pub cutline: &'a Path,
    /// Where the filtered, clipped raster must be written.
    pub output: &'a Path,
    /// Value written for masked pixels.
    pub nodata: f64,
}

/// Raw product → filtered, clipped raster.
pub trait RasterExtractor: Send + Sync {
    /// Decodes `request.product`, applies quality filtering, clips it to
    /// the cutline and writes the result to `request.output`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError`] if no raster was produced.
    fn extract_and_clip(
        &self,
        session: &dyn GeospatialSession,
        request: &ExtractRequest<'_>,
    ) -> Result<(), CapabilityError>;
}

/// Sample raster → fishnet zone layer.
pub trait ZoneGridBuilder: Send + Sync {
    /// Writes one polygon per pixel of `template` to `output`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError`] if the layer could not be built.
    fn build_zone_grid(
        &self,
        session: &dyn GeospatialSession,
        template: &Path,
        output: &Path,
    ) -> Result<(), CapabilityError>;
}

/// Raster + zone layer → one mean per zone.
pub trait ZonalReducer: Send + Sync {
    /// Computes the mean of `raster` over each zone of `zones`, keyed on
    /// the `key_field` attribute.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError`] if the reduction failed.
    fn reduce_zonal_mean(
        &self,
        session: &dyn GeospatialSession,
        raster: &Path,
        zones: &Path,
        key_field: &str,
    ) -> Result<Vec<ZonalRecord>, CapabilityError>;
}

/// The three raster capabilities a tile needs.
#[derive(Clone)]
pub struct Capabilities {
    /// Extraction backend.
    pub extractor: Arc<dyn RasterExtractor>,
    /// Fishnet backend.
    pub grid: Arc<dyn ZoneGridBuilder>,
    /// Reduction backend.
    pub reducer: Arc<dyn ZonalReducer>,
}

impl Capabilities {
    /// Uses one backend for all three capabilities.
    #[must_use]
    pub fn from_backend<T>(backend: Arc<T>) -> Self
    where
        T: RasterExtractor + ZoneGridBuilder + ZonalReducer + 'static,
    {
        Self {
            extractor: backend.clone(),
            grid: backend.clone(),
            reducer: backend,
        }
    }
}
