//! Global tile grid and county → tile location.

use std::path::Path;

use county_lights_models::TileId;
use geo::{Area, BooleanOps, BoundingRect, MultiPolygon};
use rstar::{AABB, RTree, RTreeObject};

use crate::SpatialError;
use crate::county::read_cutline;
use crate::layer::{property_string, read_features, to_multipolygon};

/// A tile footprint stored in the R-tree.
struct TileEntry {
    id: TileId,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for TileEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// The global tile grid, indexed by footprint envelope.
///
/// Loaded once per run and shared read-only by every county.
pub struct TileGrid {
    tiles: RTree<TileEntry>,
}

impl TileGrid {
    /// Loads the tile grid layer.
    ///
    /// Features with a null or non-polygon geometry, or without a valid
    /// tile id, are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the layer cannot be read, no feature
    /// carries `field`, or no usable tile remains.
    pub fn load(path: &Path, field: &str) -> Result<Self, SpatialError> {
        let features = read_features(path)?;

        if !features.iter().any(|f| f.contains_property(field)) {
            return Err(SpatialError::MissingField {
                path: path.to_path_buf(),
                field: field.to_string(),
            });
        }

        let mut entries = Vec::with_capacity(features.len());
        for (i, feature) in features.iter().enumerate() {
            let Some(id) = property_string(feature, field).and_then(|s| TileId::new(&s).ok())
            else {
                log::warn!("{}: feature {i} has no valid {field}", path.display());
                continue;
            };
            let Some(polygon) = to_multipolygon(feature) else {
                log::warn!(
                    "{}: tile {id} has a null or non-polygon geometry",
                    path.display()
                );
                continue;
            };
            entries.push(TileEntry {
                id,
                envelope: compute_envelope(&polygon),
                polygon,
            });
        }

        if entries.is_empty() {
            return Err(SpatialError::EmptyLayer {
                path: path.to_path_buf(),
            });
        }

        let tiles = RTree::bulk_load(entries);
        log::info!(
            "Loaded {} tiles from {} into the grid index",
            tiles.size(),
            path.display()
        );

        Ok(Self { tiles })
    }

    /// Builds a grid from in-memory footprints.
    #[must_use]
    pub fn from_tiles(tiles: Vec<(TileId, MultiPolygon<f64>)>) -> Self {
        let entries = tiles
            .into_iter()
            .map(|(id, polygon)| TileEntry {
                id,
                envelope: compute_envelope(&polygon),
                polygon,
            })
            .collect();
        Self {
            tiles: RTree::bulk_load(entries),
        }
    }

    /// Number of tiles in the grid.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.size()
    }

    /// Whether the grid is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.size() == 0
    }

    /// Tiles whose footprint overlaps `county` with positive area, sorted
    /// ascending without duplicates.
    #[must_use]
    pub fn find_tiles(&self, county: &MultiPolygon<f64>) -> Vec<TileId> {
        let Some(rect) = county.bounding_rect() else {
            return Vec::new();
        };
        let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);

        let mut found: Vec<TileId> = self
            .tiles
            .locate_in_envelope_intersecting(&query)
            .filter(|entry| intersects(county, &entry.polygon))
            .map(|entry| entry.id.clone())
            .collect();

        found.sort();
        found.dedup();
        found
    }
}

/// Whether `a` and `b` overlap with strictly positive area.
///
/// Shared edges and single touching points do not count.
#[must_use]
pub fn intersects(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
    let (Some(ra), Some(rb)) = (a.bounding_rect(), b.bounding_rect()) else {
        return false;
    };
    if ra.max().x <= rb.min().x
        || rb.max().x <= ra.min().x
        || ra.max().y <= rb.min().y
        || rb.max().y <= ra.min().y
    {
        return false;
    }

    a.0.iter()
        .any(|part| MultiPolygon(vec![part.clone()]).intersection(b).unsigned_area() > 0.0)
}

/// Reads an exported cutline and finds the tiles it overlaps.
///
/// # Errors
///
/// Returns [`SpatialError`] if the cutline cannot be read or holds no
/// polygon.
pub fn locate_tiles(cutline: &Path, grid: &TileGrid) -> Result<Vec<TileId>, SpatialError> {
    let county = read_cutline(cutline)?;
    Ok(grid.find_tiles(&county))
}

fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}
