#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Tabular side of the county lights pipeline.
//!
//! A zonal reduction produces one small table per raster date
//! (`d<YYYYDDD>.csv`, columns `xy_id,MEAN`). Those are pivoted into a
//! per-tile wide table (one row per zone, one ISO date column per date)
//! and the per-tile wide tables are row-concatenated into the county
//! output. Missing cells are written empty, never as zero.

pub mod wide;
pub mod zonal;

pub use wide::{WideRow, WideTable};
pub use zonal::{ZonalRecord, read_zonal_table, write_zonal_table};

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or writing tables.
#[derive(Debug, Error)]
pub enum TableError {
    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV content.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// Table being read or written.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// The header row is missing or does not start with the zone key.
    #[error("Table {path} has an unexpected header: {header}")]
    BadHeader {
        /// Table being read.
        path: PathBuf,
        /// The offending header cell or row.
        header: String,
    },

    /// A cell could not be parsed as a number.
    #[error("Table {path}, row {row}: invalid value {value:?}")]
    BadValue {
        /// Table being read.
        path: PathBuf,
        /// 1-based data row.
        row: usize,
        /// The offending cell.
        value: String,
    },
}

impl TableError {
    fn csv(path: &std::path::Path, source: csv::Error) -> Self {
        Self::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}
