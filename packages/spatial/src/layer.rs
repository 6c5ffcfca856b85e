//! `GeoJSON` feature collection I/O.

use std::io::Write as _;
use std::path::Path;

use county_lights_models::artifact::write_atomic;
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};

use crate::SpatialError;

/// Reads every feature of a `GeoJSON` layer.
///
/// A bare `Feature` document is accepted as a one-feature layer.
///
/// # Errors
///
/// Returns [`SpatialError`] if the file cannot be read or parsed, or holds a
/// bare geometry.
pub fn read_features(path: &Path) -> Result<Vec<Feature>, SpatialError> {
    let text = std::fs::read_to_string(path)?;
    let geojson: GeoJson = text.parse().map_err(|source| SpatialError::GeoJson {
        path: path.to_path_buf(),
        source,
    })?;

    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc.features),
        GeoJson::Feature(feature) => Ok(vec![feature]),
        GeoJson::Geometry(_) => Err(SpatialError::NotFeatureCollection {
            path: path.to_path_buf(),
        }),
    }
}

/// Writes `features` as a feature collection, replacing `path` atomically.
///
/// # Errors
///
/// Returns [`SpatialError`] on serialization or I/O failure.
pub fn write_features(path: &Path, features: Vec<Feature>) -> Result<(), SpatialError> {
    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };

    write_atomic(path, |writer| {
        serde_json::to_writer(&mut *writer, &collection)?;
        writer.write_all(b"\n")?;
        Ok::<_, SpatialError>(())
    })
}

/// Reads an attribute as a string.
///
/// Numeric attributes are rendered without a fractional part when they are
/// whole numbers, so a code stored as `6079` or `6079.0` reads as `"6079"`.
#[must_use]
pub fn property_string(feature: &Feature, field: &str) -> Option<String> {
    match feature.property(field)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 {
                        format!("{f:.0}")
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        _ => None,
    }
}

/// Converts a feature's geometry into a [`MultiPolygon`].
///
/// Returns `None` for null geometries and non-areal geometry types.
#[must_use]
pub fn to_multipolygon(feature: &Feature) -> Option<MultiPolygon<f64>> {
    let geometry = feature.geometry.clone()?;
    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Builds a polygon feature with the given attributes.
#[must_use]
pub fn polygon_feature(polygon: &MultiPolygon<f64>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(polygon))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "county_lights_layer_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![geo::Polygon::new(
            geo::LineString::from(vec![
                (x0, y0),
                (x0 + size, y0),
                (x0 + size, y0 + size),
                (x0, y0 + size),
                (x0, y0),
            ]),
            vec![],
        )])
    }

    #[test]
    fn numeric_codes_read_as_integers() {
        let mut props = JsonObject::new();
        props.insert("a".into(), JsonValue::from(6079));
        props.insert("b".into(), JsonValue::from(6079.0));
        props.insert("c".into(), JsonValue::from("06079"));
        props.insert("d".into(), JsonValue::Null);
        let feature = polygon_feature(&square(0.0, 0.0, 1.0), props);

        assert_eq!(property_string(&feature, "a").as_deref(), Some("6079"));
        assert_eq!(property_string(&feature, "b").as_deref(), Some("6079"));
        assert_eq!(property_string(&feature, "c").as_deref(), Some("06079"));
        assert_eq!(property_string(&feature, "d"), None);
        assert_eq!(property_string(&feature, "missing"), None);
    }

    #[test]
    fn write_then_read_layer() {
        let dir = scratch("rw");
        let path = dir.join("layer.geojson");

        let mut props = JsonObject::new();
        props.insert("tile_id".into(), JsonValue::from("h09v06"));
        write_features(&path, vec![polygon_feature(&square(0.0, 0.0, 1.0), props)]).unwrap();

        let features = read_features(&path).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(
            property_string(&features[0], "tile_id").as_deref(),
            Some("h09v06")
        );
        let mp = to_multipolygon(&features[0]).unwrap();
        assert_eq!(mp.0.len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bare_geometry_is_rejected() {
        let dir = scratch("bare");
        let path = dir.join("point.geojson");
        std::fs::write(&path, r#"{"type":"Point","coordinates":[1.0,2.0]}"#).unwrap();

        assert!(matches!(
            read_features(&path),
            Err(SpatialError::NotFeatureCollection { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn point_geometry_is_not_areal() {
        let feature: Feature = r#"{"type":"Feature","geometry":{"type":"Point","coordinates":[1.0,2.0]},"properties":{}}"#
            .parse::<GeoJson>()
            .ok()
            .and_then(|g| Feature::try_from(g).ok())
            .unwrap();
        assert!(to_multipolygon(&feature).is_none());
    }
}
