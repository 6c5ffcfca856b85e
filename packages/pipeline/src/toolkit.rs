//! Capabilities backed by configured external programs.

use std::path::Path;
use std::process::Command;

use county_lights_models::artifact::{is_complete, temp_sibling};
use county_lights_table::{ZonalRecord, read_zonal_table};

use crate::capability::{
    CapabilityError, ExtractRequest, GeospatialSession, RasterExtractor, ZonalReducer,
    ZoneGridBuilder,
};
use crate::config::{ToolCommand, ToolsConfig};

const STDERR_TAIL: usize = 2000;

/// Runs each capability as an external command built from an argument
/// template.
///
/// Placeholders:
///
/// * extract: `{input}`, `{cutline}`, `{output}`, `{nodata}`
/// * grid: `{template}`, `{output}`
/// * reduce: `{raster}`, `{zones}`, `{key}`, `{output}`
///
/// The reduce command must write a CSV with a header and two columns
/// (zone key, mean) to `{output}`.
#[derive(Debug, Clone)]
pub struct CommandToolkit {
    tools: ToolsConfig,
}

impl CommandToolkit {
    /// Creates a toolkit from the `[tools]` config section.
    #[must_use]
    pub const fn new(tools: ToolsConfig) -> Self {
        Self { tools }
    }

    fn run(tool: &ToolCommand, vars: &[(&str, String)]) -> Result<(), CapabilityError> {
        let args: Vec<String> = tool.args.iter().map(|a| render(a, vars)).collect();
        log::debug!("Running {} {}", tool.program, args.join(" "));

        let output = Command::new(&tool.program)
            .args(&args)
            .output()
            .map_err(|source| CapabilityError::Spawn {
                program: tool.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let trimmed = stderr.trim();
            let tail_start = trimmed
                .char_indices()
                .rev()
                .nth(STDERR_TAIL)
                .map_or(0, |(i, _)| i);
            return Err(CapabilityError::Exit {
                program: tool.program.clone(),
                status: output.status.to_string(),
                stderr: trimmed[tail_start..].to_string(),
            });
        }

        Ok(())
    }
}

/// Replaces every `{name}` in `template` with its value.
fn render(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

fn path_var(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

impl GeospatialSession for CommandToolkit {
    fn clear_cache(&self) -> Result<(), CapabilityError> {
        match &self.tools.clear_cache {
            Some(tool) => Self::run(tool, &[]),
            None => Ok(()),
        }
    }
}

impl RasterExtractor for CommandToolkit {
    fn extract_and_clip(
        &self,
        _session: &dyn GeospatialSession,
        request: &ExtractRequest<'_>,
    ) -> Result<(), CapabilityError> {
        Self::run(
            &self.tools.extract,
            &[
                ("input", path_var(request.product)),
                ("cutline", path_var(request.cutline)),
                ("output", path_var(request.output)),
                ("nodata", request.nodata.to_string()),
            ],
        )?;

        if !is_complete(request.output) {
            return Err(CapabilityError::MissingOutput(request.output.to_path_buf()));
        }
        Ok(())
    }
}

impl ZoneGridBuilder for CommandToolkit {
    fn build_zone_grid(
        &self,
        _session: &dyn GeospatialSession,
        template: &Path,
        output: &Path,
    ) -> Result<(), CapabilityError> {
        Self::run(
            &self.tools.grid,
            &[("template", path_var(template)), ("output", path_var(output))],
        )?;

        if !is_complete(output) {
            return Err(CapabilityError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

impl ZonalReducer for CommandToolkit {
    fn reduce_zonal_mean(
        &self,
        _session: &dyn GeospatialSession,
        raster: &Path,
        zones: &Path,
        key_field: &str,
    ) -> Result<Vec<ZonalRecord>, CapabilityError> {
        let stem = raster
            .file_stem()
            .map_or_else(|| "zonal".into(), |s| s.to_string_lossy().into_owned());
        let output = temp_sibling(&raster.with_file_name(format!("{stem}_zonal.csv")));

        let result = Self::run(
            &self.tools.reduce,
            &[
                ("raster", path_var(raster)),
                ("zones", path_var(zones)),
                ("key", key_field.to_string()),
                ("output", path_var(&output)),
            ],
        )
        .and_then(|()| {
            if is_complete(&output) {
                Ok(read_zonal_table(&output)?)
            } else {
                Err(CapabilityError::MissingOutput(output.clone()))
            }
        });

        let _ = std::fs::remove_file(&output);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_filled() {
        let vars = [
            ("input", "/raw/a.h5".to_string()),
            ("output", "/clip/a.tif".to_string()),
        ];
        assert_eq!(render("--in={input}", &vars), "--in=/raw/a.h5");
        assert_eq!(render("{input}:{output}", &vars), "/raw/a.h5:/clip/a.tif");
        assert_eq!(render("{unknown}", &vars), "{unknown}");
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_reports_exit() {
        let toolkit = CommandToolkit::new(ToolsConfig {
            extract: ToolCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo nope >&2; exit 3".to_string()],
            },
            grid: ToolCommand {
                program: "true".to_string(),
                args: vec![],
            },
            reduce: ToolCommand {
                program: "true".to_string(),
                args: vec![],
            },
            clear_cache: None,
        });

        let request = ExtractRequest {
            product: Path::new("/raw/a.h5"),
            cutline: Path::new("/c.geojson"),
            output: Path::new("/nonexistent/a.tif"),
            nodata: -9999.0,
        };
        let err = toolkit
            .extract_and_clip(&toolkit, &request)
            .unwrap_err();
        match err {
            CapabilityError::Exit { stderr, .. } => assert_eq!(stderr, "nope"),
            other => panic!("unexpected error: {other}"),
        }

        toolkit.clear_cache().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn reducer_output_is_parsed_and_removed() {
        let dir = std::env::temp_dir().join(format!(
            "county_lights_toolkit_reduce_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let raster = dir.join("a_clip_filtered.tif");

        let toolkit = CommandToolkit::new(ToolsConfig {
            extract: ToolCommand {
                program: "true".to_string(),
                args: vec![],
            },
            grid: ToolCommand {
                program: "true".to_string(),
                args: vec![],
            },
            reduce: ToolCommand {
                program: "sh".to_string(),
                args: vec![
                    "-c".to_string(),
                    "printf '{key},mean\\nz1,1.5\\nz2,\\n' > \"$0\"".to_string(),
                    "{output}".to_string(),
                ],
            },
            clear_cache: None,
        });

        let records = toolkit
            .reduce_zonal_mean(&toolkit, &raster, Path::new("z.geojson"), "zone")
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].mean, Some(1.5));
        assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
