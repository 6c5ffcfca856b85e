//! Wide tables: one row per zone, one column per date.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use county_lights_models::DateCode;
use county_lights_models::artifact::write_atomic;
use county_lights_models::zone::ZONE_KEY_FIELD;

use crate::{TableError, ZonalRecord};

/// One zone's values across dates.
#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    /// Zone key.
    pub zone: String,
    /// Mean per date; absent dates are empty cells.
    pub cells: BTreeMap<DateCode, f64>,
}

/// Zones × dates table.
///
/// Columns are the union of dates of all rows, always written in
/// ascending order after the `xy_id` column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WideTable {
    dates: BTreeSet<DateCode>,
    rows: Vec<WideRow>,
}

impl WideTable {
    /// Pivots per-date zonal tables into a table sorted by zone key.
    ///
    /// `base` (typically an existing wide table for the same tile) is
    /// folded in first, so dates already pivoted are kept and later
    /// tables overwrite matching cells.
    #[must_use]
    pub fn pivot(
        base: Option<Self>,
        tables: impl IntoIterator<Item = (DateCode, Vec<ZonalRecord>)>,
    ) -> Self {
        let mut dates = BTreeSet::new();
        let mut by_zone: BTreeMap<String, BTreeMap<DateCode, f64>> = BTreeMap::new();

        if let Some(base) = base {
            dates.extend(base.dates);
            for row in base.rows {
                by_zone.entry(row.zone).or_default().extend(row.cells);
            }
        }

        for (date, records) in tables {
            dates.insert(date);
            for record in records {
                let cells = by_zone.entry(record.zone).or_default();
                match record.mean {
                    Some(mean) => {
                        cells.insert(date, mean);
                    }
                    None => {
                        cells.remove(&date);
                    }
                }
            }
        }

        Self {
            dates,
            rows: by_zone
                .into_iter()
                .map(|(zone, cells)| WideRow { zone, cells })
                .collect(),
        }
    }

    /// Stacks tables row-wise in the given order.
    ///
    /// Rows are not deduplicated; the column set is the union of all
    /// inputs.
    #[must_use]
    pub fn concat(tables: impl IntoIterator<Item = Self>) -> Self {
        let mut merged = Self::default();
        for table in tables {
            merged.dates.extend(table.dates);
            merged.rows.extend(table.rows);
        }
        merged
    }

    /// Date columns, ascending.
    #[must_use]
    pub const fn dates(&self) -> &BTreeSet<DateCode> {
        &self.dates
    }

    /// Rows in table order.
    #[must_use]
    pub fn rows(&self) -> &[WideRow] {
        &self.rows
    }

    /// Whether `date` is a column.
    #[must_use]
    pub fn has_date(&self, date: DateCode) -> bool {
        self.dates.contains(&date)
    }

    /// Reads a wide table written by [`WideTable::write`].
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] if the file is missing, the header is not
    /// `xy_id` followed by ISO dates, or a cell is not a number.
    pub fn read(path: &Path) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|e| TableError::csv(path, e))?;

        let headers = reader
            .headers()
            .map_err(|e| TableError::csv(path, e))?
            .clone();

        let mut columns = headers.iter();
        match columns.next() {
            Some(first) if first.trim_start_matches('\u{feff}') == ZONE_KEY_FIELD => {}
            other => {
                return Err(TableError::BadHeader {
                    path: path.to_path_buf(),
                    header: other.unwrap_or_default().to_string(),
                });
            }
        }

        let columns = columns
            .map(|h| {
                DateCode::from_iso(h).ok_or_else(|| TableError::BadHeader {
                    path: path.to_path_buf(),
                    header: h.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| TableError::csv(path, e))?;
            let zone = record.get(0).unwrap_or_default().to_string();

            let mut cells = BTreeMap::new();
            for (date, value) in columns.iter().zip(record.iter().skip(1)) {
                if value.is_empty() {
                    continue;
                }
                let mean = value.parse::<f64>().map_err(|_| TableError::BadValue {
                    path: path.to_path_buf(),
                    row: i + 1,
                    value: value.to_string(),
                })?;
                cells.insert(*date, mean);
            }
            rows.push(WideRow { zone, cells });
        }

        Ok(Self {
            dates: columns.into_iter().collect(),
            rows,
        })
    }

    /// Writes the table as CSV, replacing `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`TableError`] on I/O or serialization failure.
    pub fn write(&self, path: &Path) -> Result<(), TableError> {
        write_atomic(path, |writer| {
            let mut csv_writer = csv::Writer::from_writer(&mut *writer);

            let mut header = vec![ZONE_KEY_FIELD.to_string()];
            header.extend(self.dates.iter().map(|d| d.iso()));
            csv_writer
                .write_record(&header)
                .map_err(|e| TableError::csv(path, e))?;

            for row in &self.rows {
                let mut record = Vec::with_capacity(self.dates.len() + 1);
                record.push(row.zone.clone());
                record.extend(
                    self.dates
                        .iter()
                        .map(|d| row.cells.get(d).map(ToString::to_string).unwrap_or_default()),
                );
                csv_writer
                    .write_record(&record)
                    .map_err(|e| TableError::csv(path, e))?;
            }

            csv_writer.flush()?;
            Ok(())
        })
    }
}
