//! County codes and tile identifiers.
//!
//! County codes are FIPS-style numeric strings. Worklists and attribute
//! tables frequently drop the leading zero of the state part (`"6079"` for
//! San Mateo, CA), so every code is normalized to the canonical 5-digit
//! zero-padded form before any lookup or comparison.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// A canonical 5-digit county code (e.g. `"06079"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountyCode(String);

impl CountyCode {
    /// Width of a canonical county code.
    pub const WIDTH: usize = 5;

    /// Parses and zero-pads a county code.
    ///
    /// Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidCountyCode`] if the trimmed input is
    /// empty, contains anything other than ASCII digits, or is longer than
    /// [`Self::WIDTH`].
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let trimmed = raw.trim();

        let reject = |reason| ModelError::InvalidCountyCode {
            raw: raw.to_string(),
            reason,
        };

        if trimmed.is_empty() {
            return Err(reject("empty"));
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(reject("not numeric"));
        }
        if trimmed.len() > Self::WIDTH {
            return Err(reject("more than 5 digits"));
        }

        Ok(Self(format!("{trimmed:0>width$}", width = Self::WIDTH)))
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-digit state part of the code.
    #[must_use]
    pub fn state_fips(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for CountyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CountyCode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CountyCode {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CountyCode> for String {
    fn from(code: CountyCode) -> Self {
        code.0
    }
}

impl AsRef<str> for CountyCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a cell in the global tile grid (e.g. `"h09v06"`).
///
/// Tile ids are used verbatim in scratch directory and file names, so
/// they must be non-empty and free of path separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileId(String);

impl TileId {
    /// Validates a tile id.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidTileId`] if the trimmed input is empty
    /// or contains `/`, `\` or `..`.
    pub fn new(raw: &str) -> Result<Self, ModelError> {
        let trimmed = raw.trim();
        if trimmed.is_empty()
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed.contains("..")
        {
            return Err(ModelError::InvalidTileId {
                raw: raw.to_string(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TileId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TileId {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<TileId> for String {
    fn from(tile: TileId) -> Self {
        tile.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_four_digit_code() {
        assert_eq!(CountyCode::parse("6079").unwrap().as_str(), "06079");
    }

    #[test]
    fn keeps_canonical_code() {
        assert_eq!(CountyCode::parse("06079").unwrap().as_str(), "06079");
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(CountyCode::parse("  12071 \n").unwrap().as_str(), "12071");
    }

    #[test]
    fn rejects_bad_codes() {
        assert!(CountyCode::parse("").is_err());
        assert!(CountyCode::parse("   ").is_err());
        assert!(CountyCode::parse("06O79").is_err());
        assert!(CountyCode::parse("123456").is_err());
        assert!(CountyCode::parse("-6079").is_err());
    }

    #[test]
    fn state_part() {
        assert_eq!(CountyCode::parse("6079").unwrap().state_fips(), "06");
    }

    #[test]
    fn county_code_serde_normalizes() {
        let code: CountyCode = serde_json::from_str("\"6079\"").unwrap();
        assert_eq!(code.as_str(), "06079");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"06079\"");
    }

    #[test]
    fn tile_id_validation() {
        assert_eq!(TileId::new(" h09v06 ").unwrap().as_str(), "h09v06");
        assert!(TileId::new("").is_err());
        assert!(TileId::new("../etc").is_err());
        assert!(TileId::new("h09/v06").is_err());
    }

    #[test]
    fn tile_ids_sort_lexically() {
        let mut tiles = vec![
            TileId::new("h09v05").unwrap(),
            TileId::new("h08v05").unwrap(),
            TileId::new("h08v04").unwrap(),
        ];
        tiles.sort();
        let ids: Vec<&str> = tiles.iter().map(TileId::as_str).collect();
        assert_eq!(ids, ["h08v04", "h08v05", "h09v05"]);
    }
}
