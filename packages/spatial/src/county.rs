//! Master county layer: code lookup and cutline export.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use county_lights_models::CountyCode;
use geo::MultiPolygon;
use geojson::{JsonObject, JsonValue};

use crate::SpatialError;
use crate::layer::{polygon_feature, property_string, read_features, to_multipolygon, write_features};

/// Attribute written on exported cutline features.
pub const CUTLINE_CODE_FIELD: &str = "code";

/// The master county polygon layer, indexed by normalized code.
///
/// A code may own several features (islands stored as separate records);
/// all of them are kept and exported together.
pub struct CountyLayer {
    path: PathBuf,
    polygons: BTreeMap<CountyCode, Vec<MultiPolygon<f64>>>,
}

impl CountyLayer {
    /// Loads the layer, normalizing each feature's `field` value.
    ///
    /// Features whose code cannot be normalized, or whose geometry is null
    /// or not areal, are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::MissingField`] if no feature carries `field`,
    /// or an I/O/parse error if the layer cannot be read.
    pub fn load(path: &Path, field: &str) -> Result<Self, SpatialError> {
        let features = read_features(path)?;

        if !features.is_empty() && !features.iter().any(|f| f.contains_property(field)) {
            return Err(SpatialError::MissingField {
                path: path.to_path_buf(),
                field: field.to_string(),
            });
        }

        let mut polygons: BTreeMap<CountyCode, Vec<MultiPolygon<f64>>> = BTreeMap::new();
        let mut skipped = 0usize;

        for (i, feature) in features.iter().enumerate() {
            let Some(raw) = property_string(feature, field) else {
                skipped += 1;
                continue;
            };
            let code = match CountyCode::parse(&raw) {
                Ok(code) => code,
                Err(e) => {
                    log::warn!("{}: feature {i}: {e}", path.display());
                    skipped += 1;
                    continue;
                }
            };
            let Some(polygon) = to_multipolygon(feature) else {
                log::warn!(
                    "{}: feature {i} (code {code}) has no polygon geometry",
                    path.display()
                );
                skipped += 1;
                continue;
            };
            polygons.entry(code).or_default().push(polygon);
        }

        log::info!(
            "Loaded {} counties from {} ({skipped} feature(s) skipped)",
            polygons.len(),
            path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            polygons,
        })
    }

    /// Path the layer was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of distinct county codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    /// Whether the layer holds no counties.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    /// Whether `code` exists in the layer.
    #[must_use]
    pub fn contains(&self, code: &CountyCode) -> bool {
        self.polygons.contains_key(code)
    }

    /// All codes, ascending.
    pub fn codes(&self) -> impl Iterator<Item = &CountyCode> {
        self.polygons.keys()
    }

    /// Polygons recorded for `code` (empty if unknown).
    #[must_use]
    pub fn polygons(&self, code: &CountyCode) -> &[MultiPolygon<f64>] {
        self.polygons.get(code).map_or(&[], Vec::as_slice)
    }

    /// Writes every polygon of `code` to `out` as a cutline layer,
    /// replacing any stale export.
    ///
    /// Returns the number of features written; `0` means the code has no
    /// polygon and nothing was written.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the layer cannot be written.
    pub fn export_cutline(&self, code: &CountyCode, out: &Path) -> Result<usize, SpatialError> {
        let polygons = self.polygons(code);
        if polygons.is_empty() {
            return Ok(0);
        }

        if out.exists() {
            if let Err(e) = std::fs::remove_file(out) {
                log::warn!("[{code}] Failed to remove stale {}: {e}", out.display());
            }
        }

        let features = polygons
            .iter()
            .map(|polygon| {
                let mut props = JsonObject::new();
                props.insert(
                    CUTLINE_CODE_FIELD.to_string(),
                    JsonValue::from(code.as_str()),
                );
                polygon_feature(polygon, props)
            })
            .collect();

        write_features(out, features)?;
        Ok(polygons.len())
    }
}

/// Reads an exported cutline back as a single multi-part polygon.
///
/// # Errors
///
/// Returns [`SpatialError::EmptyLayer`] if the layer holds no polygon.
pub fn read_cutline(path: &Path) -> Result<MultiPolygon<f64>, SpatialError> {
    let parts: Vec<_> = read_features(path)?
        .iter()
        .filter_map(to_multipolygon)
        .flat_map(|mp| mp.0)
        .collect();

    if parts.is_empty() {
        return Err(SpatialError::EmptyLayer {
            path: path.to_path_buf(),
        });
    }

    Ok(MultiPolygon(parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "county_lights_county_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn square_json(code: &str, x0: f64) -> String {
        format!(
            r#"{{"type":"Feature","properties":{{"CTFIPS":{code}}},"geometry":{{"type":"Polygon","coordinates":[[[{x0},0.0],[{x1},0.0],[{x1},1.0],[{x0},1.0],[{x0},0.0]]]}}}}"#,
            x1 = x0 + 1.0
        )
    }

    fn write_layer(dir: &Path, features: &[String]) -> PathBuf {
        let path = dir.join("counties.geojson");
        std::fs::write(
            &path,
            format!(
                r#"{{"type":"FeatureCollection","features":[{}]}}"#,
                features.join(",")
            ),
        )
        .unwrap();
        path
    }

    #[test]
    fn short_codes_match_padded_lookup() {
        let dir = scratch("pad");
        let path = write_layer(&dir, &[square_json("\"6079\"", 0.0), square_json("6081", 2.0)]);

        let layer = CountyLayer::load(&path, "CTFIPS").unwrap();
        assert_eq!(layer.len(), 2);
        assert!(layer.contains(&CountyCode::parse("06079").unwrap()));
        assert!(layer.contains(&CountyCode::parse("6081").unwrap()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_field_is_an_error() {
        let dir = scratch("field");
        let path = write_layer(&dir, &[square_json("\"06079\"", 0.0)]);

        assert!(matches!(
            CountyLayer::load(&path, "code"),
            Err(SpatialError::MissingField { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn export_collects_all_parts() {
        let dir = scratch("export");
        let path = write_layer(
            &dir,
            &[square_json("\"06075\"", 0.0), square_json("\"6075\"", 5.0)],
        );
        let layer = CountyLayer::load(&path, "CTFIPS").unwrap();
        let code = CountyCode::parse("06075").unwrap();

        let out = dir.join("06075/06075.geojson");
        assert_eq!(layer.export_cutline(&code, &out).unwrap(), 2);

        let cutline = read_cutline(&out).unwrap();
        assert_eq!(cutline.0.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn export_of_unknown_code_writes_nothing() {
        let dir = scratch("unknown");
        let path = write_layer(&dir, &[square_json("\"06075\"", 0.0)]);
        let layer = CountyLayer::load(&path, "CTFIPS").unwrap();

        let out = dir.join("99999.geojson");
        let code = CountyCode::parse("99999").unwrap();
        assert_eq!(layer.export_cutline(&code, &out).unwrap(), 0);
        assert!(!out.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
