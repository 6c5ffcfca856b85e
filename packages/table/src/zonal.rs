//! Per-date zonal mean tables.

use std::path::Path;

use county_lights_models::artifact::write_atomic;
use serde::{Deserialize, Serialize};

use crate::TableError;

/// One zone's mean for one date.
///
/// Reads both the stored `xy_id,MEAN` layout and the reducer's raw
/// `zone,mean` output. A zone with no valid pixel has no mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalRecord {
    /// Zone key.
    #[serde(rename = "xy_id", alias = "zone")]
    pub zone: String,
    /// Mean radiance over the zone's valid pixels.
    #[serde(rename = "MEAN", alias = "mean")]
    pub mean: Option<f64>,
}

/// Reads a zonal table.
///
/// # Errors
///
/// Returns [`TableError::Csv`] if the file is missing or malformed.
pub fn read_zonal_table(path: &Path) -> Result<Vec<ZonalRecord>, TableError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| TableError::csv(path, e))?;

    reader
        .deserialize::<ZonalRecord>()
        .map(|record| record.map_err(|e| TableError::csv(path, e)))
        .collect()
}

/// Writes `records` as `xy_id,MEAN`, replacing `path` atomically.
///
/// # Errors
///
/// Returns [`TableError`] on I/O or serialization failure.
pub fn write_zonal_table(path: &Path, records: &[ZonalRecord]) -> Result<(), TableError> {
    write_atomic(path, |writer| {
        let mut csv_writer = csv::Writer::from_writer(&mut *writer);
        for record in records {
            csv_writer
                .serialize(record)
                .map_err(|e| TableError::csv(path, e))?;
        }
        csv_writer.flush()?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "county_lights_zonal_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn reducer_output_reads_with_empty_means() {
        let dir = scratch("reducer");
        let path = dir.join("out.csv");
        std::fs::write(&path, "zone,mean\nW1.00000N1.00000,3.5\nW2.00000N1.00000,\n").unwrap();

        let records = read_zonal_table(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].mean, Some(3.5));
        assert_eq!(records[1].mean, None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stored_layout_has_fixed_header() {
        let dir = scratch("stored");
        let path = dir.join("tables/d2018153.csv");
        write_zonal_table(
            &path,
            &[ZonalRecord {
                zone: "a1".into(),
                mean: Some(1.25),
            }],
        )
        .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "xy_id,MEAN\na1,1.25\n");
        assert_eq!(read_zonal_table(&path).unwrap()[0].zone, "a1");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
