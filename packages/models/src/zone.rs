//! Fishnet zone keys and the field names shared by zone layers and tables.

/// Zone key attribute on fishnet features and first column of every table.
pub const ZONE_KEY_FIELD: &str = "xy_id";

/// Integer sequence attribute on fishnet features.
pub const ZONE_INDEX_FIELD: &str = "index";

/// Column holding the zonal mean in per-date tables.
pub const MEAN_FIELD: &str = "MEAN";

/// Formats the zone key for a cell centre.
///
/// Hemisphere letter followed by the absolute coordinate with five
/// decimals, longitude first: `(-121.995833, 37.004167)` becomes
/// `W121.99583N37.00417`.
#[must_use]
pub fn zone_key(lon: f64, lat: f64) -> String {
    let ew = if lon < 0.0 { 'W' } else { 'E' };
    let ns = if lat < 0.0 { 'S' } else { 'N' };
    format!("{ew}{:.5}{ns}{:.5}", lon.abs(), lat.abs())
}
