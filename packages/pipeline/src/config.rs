//! Run configuration loaded from a TOML file.
//!
//! ```toml
//! [paths]
//! county_layer = "data/counties.geojson"
//! tile_grid = "data/black_marble_tiles.geojson"
//! worklist = "data/ca_counties.csv"
//! raw_archive = "/mnt/viirs/california"
//! output_root = "out"
//!
//! [fields]
//! county_code = "CTFIPS"
//!
//! [processing]
//! tile_concurrency = 4
//! isolation = "process"
//!
//! [tools.extract]
//! program = "viirs-clip"
//! args = ["{input}", "{cutline}", "{output}", "--nodata", "{nodata}"]
//!
//! [tools.grid]
//! program = "raster-fishnet"
//! args = ["{template}", "{output}"]
//!
//! [tools.reduce]
//! program = "zonal-mean"
//! args = ["{raster}", "{zones}", "{key}", "{output}"]
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "COUNTY_LIGHTS_CONFIG";

/// File looked up in the working directory as a last resort.
pub const DEFAULT_CONFIG_FILE: &str = "county_lights.toml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file was given and none was found.
    #[error("No config file: pass --config, set {CONFIG_ENV}, or create ./{DEFAULT_CONFIG_FILE}")]
    NotFound,

    /// The config file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Config file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`Config`].
    #[error("Failed to parse {path}: {source}")]
    Parse {
        /// Config file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A value is out of range or inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Whole-run configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Input and output locations.
    pub paths: PathsConfig,
    /// Attribute and column names.
    #[serde(default)]
    pub fields: FieldsConfig,
    /// Tile-level processing knobs.
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// External capability commands.
    pub tools: ToolsConfig,
}

/// Input and output locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Master county polygon layer (`GeoJSON`).
    pub county_layer: PathBuf,
    /// Global tile grid layer (`GeoJSON`).
    pub tile_grid: PathBuf,
    /// CSV listing the counties to process.
    pub worklist: PathBuf,
    /// Root of the raw raster product archive.
    pub raw_archive: PathBuf,
    /// Root for county outputs, the progress file and the process log.
    pub output_root: PathBuf,
    /// Root for per-county scratch directories; defaults to `output_root`.
    pub scratch_root: Option<PathBuf>,
}

/// Attribute and column names.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldsConfig {
    /// County code attribute in the master layer.
    pub county_code: String,
    /// Tile id attribute in the tile grid.
    pub tile_id: String,
    /// County code column in the worklist CSV.
    pub worklist_code: String,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            county_code: "code".to_string(),
            tile_id: "tile_id".to_string(),
            worklist_code: "countyCode".to_string(),
        }
    }
}

/// How tile tasks are isolated from each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Each tile runs in a `tile-worker` subprocess.
    #[default]
    Process,
    /// Tiles run on blocking threads of this process.
    Thread,
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Process => "process",
            Self::Thread => "thread",
        })
    }
}

impl FromStr for Isolation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "thread" => Ok(Self::Thread),
            other => Err(ConfigError::Invalid(format!(
                "isolation must be \"process\" or \"thread\", got {other:?}"
            ))),
        }
    }
}

/// Tile-level processing knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum tiles processed concurrently within one county.
    pub tile_concurrency: usize,
    /// Keep per-date zonal tables after pivoting.
    pub keep_intermediate: bool,
    /// Nodata value passed to the extractor.
    pub nodata: f64,
    /// Tile isolation mode.
    pub isolation: Isolation,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            tile_concurrency: 4,
            keep_intermediate: false,
            nodata: -9999.0,
            isolation: Isolation::Process,
        }
    }
}

/// An external program and its argument template.
///
/// Arguments may contain `{name}` placeholders that are filled in per
/// call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCommand {
    /// Executable name or path.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
}

/// External capability commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    /// Raster extraction: `{input}`, `{cutline}`, `{output}`, `{nodata}`.
    pub extract: ToolCommand,
    /// Fishnet construction: `{template}`, `{output}`.
    pub grid: ToolCommand,
    /// Zonal mean: `{raster}`, `{zones}`, `{key}`, `{output}`; writes a
    /// `zone,mean` CSV.
    pub reduce: ToolCommand,
    /// Optional engine cache clearing, run around each county.
    pub clear_cache: Option<ToolCommand>,
}

impl Config {
    /// Finds the config file: the explicit path, then [`CONFIG_ENV`], then
    /// [`DEFAULT_CONFIG_FILE`] in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if none applies.
    pub fn locate(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(path));
        }
        let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
        if fallback.is_file() {
            return Ok(fallback);
        }
        Err(ConfigError::NotFound)
    }

    /// Reads, resolves and validates a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        config.validate()?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Makes every relative path absolute against `base`.
    pub fn resolve_relative(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.paths.county_layer);
        resolve(&mut self.paths.tile_grid);
        resolve(&mut self.paths.worklist);
        resolve(&mut self.paths.raw_archive);
        resolve(&mut self.paths.output_root);
        if let Some(scratch) = self.paths.scratch_root.as_mut() {
            resolve(scratch);
        }
    }

    /// Checks ranges and required values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.tile_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "processing.tile_concurrency must be at least 1".to_string(),
            ));
        }
        if !self.processing.nodata.is_finite() {
            return Err(ConfigError::Invalid(
                "processing.nodata must be a finite number".to_string(),
            ));
        }

        let tools = [
            ("extract", Some(&self.tools.extract)),
            ("grid", Some(&self.tools.grid)),
            ("reduce", Some(&self.tools.reduce)),
            ("clear_cache", self.tools.clear_cache.as_ref()),
        ];
        for (name, tool) in tools {
            if tool.is_some_and(|t| t.program.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "tools.{name}.program must not be empty"
                )));
            }
        }

        for (name, value) in [
            ("county_code", &self.fields.county_code),
            ("tile_id", &self.fields.tile_id),
            ("worklist_code", &self.fields.worklist_code),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "fields.{name} must not be empty"
                )));
            }
        }

        Ok(())
    }

    /// Root for per-county scratch directories.
    #[must_use]
    pub fn scratch_root(&self) -> &Path {
        self.paths
            .scratch_root
            .as_deref()
            .unwrap_or(&self.paths.output_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[paths]
county_layer = "counties.geojson"
tile_grid = "tiles.geojson"
worklist = "worklist.csv"
raw_archive = "/data/raw"
output_root = "out"

[tools.extract]
program = "clip"
args = ["{input}", "{output}"]

[tools.grid]
program = "fishnet"

[tools.reduce]
program = "zonal"
"#;

    #[test]
    fn defaults_apply() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.fields.county_code, "code");
        assert_eq!(config.fields.worklist_code, "countyCode");
        assert_eq!(config.processing.tile_concurrency, 4);
        assert!(!config.processing.keep_intermediate);
        assert!((config.processing.nodata + 9999.0).abs() < f64::EPSILON);
        assert_eq!(config.processing.isolation, Isolation::Process);
        assert!(config.tools.clear_cache.is_none());
        assert_eq!(config.scratch_root(), Path::new("out"));
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.resolve_relative(Path::new("/etc/lights"));

        assert_eq!(
            config.paths.county_layer,
            PathBuf::from("/etc/lights/counties.geojson")
        );
        assert_eq!(config.paths.raw_archive, PathBuf::from("/data/raw"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let text = format!("{MINIMAL}\n[processing]\ntile_concurrency = 0\n");
        let config: Config = toml::from_str(&text).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn isolation_parses() {
        assert_eq!("thread".parse::<Isolation>().unwrap(), Isolation::Thread);
        assert_eq!(" Process ".parse::<Isolation>().unwrap(), Isolation::Process);
        assert!("fork".parse::<Isolation>().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{MINIMAL}\n[processing]\nworkers = 2\n");
        assert!(toml::from_str::<Config>(&text).is_err());
    }
}
