//! Fishnet zone layers: field verification and county-level merge.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use county_lights_models::artifact::copy_atomic;
use county_lights_models::zone::{ZONE_INDEX_FIELD, ZONE_KEY_FIELD, zone_key};
use geo::Centroid;
use geojson::JsonValue;

use crate::SpatialError;
use crate::layer::{property_string, read_features, to_multipolygon, write_features};

/// Summary of a zone layer merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneLayerMerge {
    /// Features written to the merged layer.
    pub features: usize,
    /// Features whose zone key was already present in an earlier input.
    pub duplicate_keys: usize,
}

/// Verifies that every feature of a fishnet carries `xy_id` and `index`,
/// filling in whatever is missing.
///
/// `xy_id` is derived from the cell centroid and `index` from the feature
/// position. The layer is rewritten only when something was added.
/// Returns the feature count.
///
/// # Errors
///
/// Returns [`SpatialError::EmptyLayer`] if the layer has no features, or
/// an I/O/parse error.
pub fn ensure_zone_fields(path: &Path) -> Result<usize, SpatialError> {
    let mut features = read_features(path)?;
    if features.is_empty() {
        return Err(SpatialError::EmptyLayer {
            path: path.to_path_buf(),
        });
    }

    let mut changed = 0usize;
    for (i, feature) in features.iter_mut().enumerate() {
        if !feature.contains_property(ZONE_KEY_FIELD) {
            let Some(centre) = to_multipolygon(feature).and_then(|mp| mp.centroid()) else {
                log::warn!(
                    "{}: feature {i} has no areal geometry for a zone key",
                    path.display()
                );
                continue;
            };
            feature.set_property(ZONE_KEY_FIELD, zone_key(centre.x(), centre.y()));
            changed += 1;
        }
        if !feature.contains_property(ZONE_INDEX_FIELD) {
            feature.set_property(ZONE_INDEX_FIELD, JsonValue::from(i));
            changed += 1;
        }
    }

    let count = features.len();
    if changed > 0 {
        log::debug!("{}: added {changed} zone field value(s)", path.display());
        write_features(path, features)?;
    }

    Ok(count)
}

/// Merges per-tile fishnets into one county layer at `output`.
///
/// A single input is copied as is; several are concatenated in order.
/// Features are never deduplicated: zone keys already seen in an earlier
/// input are only counted.
///
/// # Errors
///
/// Returns [`SpatialError`] if an input cannot be read or the output
/// cannot be written.
pub fn merge_zone_layers(
    inputs: &[PathBuf],
    output: &Path,
) -> Result<ZoneLayerMerge, SpatialError> {
    let mut seen = BTreeSet::new();
    let mut duplicate_keys = 0usize;
    let mut merged = Vec::new();

    for input in inputs {
        let features = read_features(input)?;
        for feature in &features {
            let Some(key) = property_string(feature, ZONE_KEY_FIELD) else {
                continue;
            };
            if !seen.insert(key) {
                duplicate_keys += 1;
            }
        }
        merged.extend(features);
    }

    let features = merged.len();
    match inputs {
        [single] => copy_atomic(single, output)?,
        _ => write_features(output, merged)?,
    }

    Ok(ZoneLayerMerge {
        features,
        duplicate_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "county_lights_fishnet_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cell(x0: f64, y0: f64, props: &str) -> String {
        format!(
            r#"{{"type":"Feature","properties":{{{props}}},"geometry":{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}}}"#,
            x1 = x0 + 0.5,
            y1 = y0 + 0.5,
        )
    }

    fn write_layer(path: &Path, cells: &[String]) {
        std::fs::write(
            path,
            format!(
                r#"{{"type":"FeatureCollection","features":[{}]}}"#,
                cells.join(",")
            ),
        )
        .unwrap();
    }

    #[test]
    fn missing_fields_are_added() {
        let dir = scratch("ensure");
        let path = dir.join("fishnet_h09v06.geojson");
        write_layer(&path, &[cell(-122.0, 37.0, ""), cell(-121.5, 37.0, r#""index":7"#)]);

        assert_eq!(ensure_zone_fields(&path).unwrap(), 2);

        let features = read_features(&path).unwrap();
        assert_eq!(
            property_string(&features[0], ZONE_KEY_FIELD).as_deref(),
            Some("W121.75000N37.25000")
        );
        assert_eq!(
            property_string(&features[0], ZONE_INDEX_FIELD).as_deref(),
            Some("0")
        );
        assert_eq!(
            property_string(&features[1], ZONE_INDEX_FIELD).as_deref(),
            Some("7")
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn complete_layer_is_left_untouched() {
        let dir = scratch("untouched");
        let path = dir.join("fishnet.geojson");
        write_layer(&path, &[cell(0.0, 0.0, r#""xy_id":"E0.25000N0.25000","index":0"#)]);
        let before = std::fs::read_to_string(&path).unwrap();

        ensure_zone_fields(&path).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_fishnet_is_an_error() {
        let dir = scratch("empty");
        let path = dir.join("fishnet.geojson");
        write_layer(&path, &[]);

        assert!(matches!(
            ensure_zone_fields(&path),
            Err(SpatialError::EmptyLayer { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn merge_concatenates_and_counts_duplicates() {
        let dir = scratch("merge");
        let a = dir.join("a.geojson");
        let b = dir.join("b.geojson");
        write_layer(
            &a,
            &[
                cell(0.0, 0.0, r#""xy_id":"a1","index":0"#),
                cell(0.5, 0.0, r#""xy_id":"shared","index":1"#),
            ],
        );
        write_layer(
            &b,
            &[
                cell(1.0, 0.0, r#""xy_id":"shared","index":0"#),
                cell(1.5, 0.0, r#""xy_id":"b2","index":1"#),
            ],
        );

        let out = dir.join("fishnet/06079.geojson");
        let merge = merge_zone_layers(&[a, b], &out).unwrap();

        assert_eq!(
            merge,
            ZoneLayerMerge {
                features: 4,
                duplicate_keys: 1
            }
        );
        assert_eq!(read_features(&out).unwrap().len(), 4);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn single_input_is_copied() {
        let dir = scratch("single");
        let a = dir.join("a.geojson");
        write_layer(&a, &[cell(0.0, 0.0, r#""xy_id":"a1","index":0"#)]);

        let out = dir.join("out.geojson");
        let merge = merge_zone_layers(std::slice::from_ref(&a), &out).unwrap();

        assert_eq!(merge.features, 1);
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            std::fs::read_to_string(&a).unwrap()
        );

        let _ = std::fs::remove_dir_all(&dir);
    }
}
