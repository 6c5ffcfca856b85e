//! `YYYYDDD` acquisition date codes.
//!
//! Black Marble style product names embed the acquisition date as
//! `.A<year><day-of-year>.` (e.g. `VNP46A2.A2018153.h09v06.001.h5`). The
//! code names the per-date zonal table (`d2018153.csv`) and becomes an ISO
//! date column (`2018-06-02`) in the wide table.

use std::fmt;
use std::sync::LazyLock;

use chrono::{Datelike as _, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ModelError;

static PRODUCT_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.A([0-9]{7})\.").unwrap_or_else(|_| unreachable!()));

static TABLE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^d([0-9]{7})\.csv$").unwrap_or_else(|_| unreachable!()));

/// A validated year + day-of-year pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DateCode {
    year: i32,
    ordinal: u32,
}

impl DateCode {
    /// Parses a 7-digit `YYYYDDD` code.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidDateCode`] if the input is not seven
    /// digits or names a day that does not exist in that year.
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let invalid = || ModelError::InvalidDateCode {
            raw: raw.to_string(),
        };

        if raw.len() != 7 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let year: i32 = raw[..4].parse().map_err(|_| invalid())?;
        let ordinal: u32 = raw[4..].parse().map_err(|_| invalid())?;

        NaiveDate::from_yo_opt(year, ordinal).ok_or_else(invalid)?;

        Ok(Self { year, ordinal })
    }

    /// Extracts the date code embedded in a raw product file name.
    #[must_use]
    pub fn from_product_name(name: &str) -> Option<Self> {
        PRODUCT_DATE_RE
            .captures(name)
            .and_then(|caps| Self::parse(&caps[1]).ok())
    }

    /// Recovers the date code from a per-date table file name.
    #[must_use]
    pub fn from_table_name(name: &str) -> Option<Self> {
        TABLE_NAME_RE
            .captures(name)
            .and_then(|caps| Self::parse(&caps[1]).ok())
    }

    /// Builds a date code from a calendar date.
    #[must_use]
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            ordinal: date.ordinal(),
        }
    }

    /// Parses an ISO `YYYY-MM-DD` wide-table column header.
    #[must_use]
    pub fn from_iso(header: &str) -> Option<Self> {
        NaiveDate::parse_from_str(header.trim(), "%Y-%m-%d")
            .ok()
            .map(Self::from_date)
    }

    /// Year part.
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// Day of year, 1-based.
    #[must_use]
    pub const fn ordinal(self) -> u32 {
        self.ordinal
    }

    /// Calendar date of this code.
    #[must_use]
    pub fn date(self) -> NaiveDate {
        NaiveDate::from_yo_opt(self.year, self.ordinal).unwrap_or_else(|| unreachable!())
    }

    /// ISO date string used as the wide-table column header.
    #[must_use]
    pub fn iso(self) -> String {
        self.date().format("%Y-%m-%d").to_string()
    }

    /// File name of the per-date zonal table (`d2018153.csv`).
    #[must_use]
    pub fn table_name(self) -> String {
        format!("d{self}.csv")
    }
}

impl fmt::Display for DateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:03}", self.year, self.ordinal)
    }
}

impl TryFrom<String> for DateCode {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DateCode> for String {
    fn from(code: DateCode) -> Self {
        code.to_string()
    }
}
