//! Builds the orchestrator and its collaborators from a loaded config.

use std::path::Path;
use std::sync::Arc;

use county_lights_pipeline::{
    Capabilities, CommandToolkit, Config, ConfigError, CountyOrchestrator, GeospatialSession,
    InProcessRunner, Isolation, ProgressStore, RunPaths, SubprocessRunner, TileProcessor,
    TileRunner, TileSettings,
};
use county_lights_spatial::{CountyLayer, TileGrid};

/// Flags that override values from the config file.
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub concurrency: Option<usize>,
    pub isolation: Option<Isolation>,
    pub keep_intermediate: bool,
}

impl Overrides {
    /// Applies the flags to `config` and validates the result.
    pub fn apply(self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(concurrency) = self.concurrency {
            config.processing.tile_concurrency = concurrency;
        }
        if let Some(isolation) = self.isolation {
            config.processing.isolation = isolation;
        }
        if self.keep_intermediate {
            config.processing.keep_intermediate = true;
        }
        config.validate()
    }
}

/// A tile processor backed by the configured external tools.
pub fn tile_processor(config: &Config) -> TileProcessor {
    let toolkit = Arc::new(CommandToolkit::new(config.tools.clone()));
    let session: Arc<dyn GeospatialSession> = toolkit.clone();
    TileProcessor::new(Capabilities::from_backend(toolkit), session)
}

/// Loads both master layers and wires up the orchestrator.
///
/// Missing layers or fields are setup errors and abort the run.
pub fn orchestrator(
    config: &Config,
    config_path: &Path,
) -> Result<CountyOrchestrator, Box<dyn std::error::Error>> {
    let counties = CountyLayer::load(&config.paths.county_layer, &config.fields.county_code)?;
    let grid = TileGrid::load(&config.paths.tile_grid, &config.fields.tile_id)?;

    let paths = RunPaths {
        raw_archive: config.paths.raw_archive.clone(),
        output_root: config.paths.output_root.clone(),
        scratch_root: config.scratch_root().to_path_buf(),
    };
    std::fs::create_dir_all(&paths.output_root)?;

    let session: Arc<dyn GeospatialSession> = Arc::new(CommandToolkit::new(config.tools.clone()));

    let runner: Arc<dyn TileRunner> = match config.processing.isolation {
        Isolation::Process => {
            let args = vec![
                "--config".to_string(),
                std::path::absolute(config_path)?.display().to_string(),
                "tile-worker".to_string(),
            ];
            Arc::new(SubprocessRunner::new(std::env::current_exe()?, args))
        }
        Isolation::Thread => Arc::new(InProcessRunner::new(Arc::new(tile_processor(config)))),
    };
    log::info!(
        "Tiles run with {} isolation, up to {} at a time",
        config.processing.isolation,
        config.processing.tile_concurrency
    );

    let store = Arc::new(ProgressStore::new(paths.progress_file()));
    let settings = TileSettings {
        concurrency: config.processing.tile_concurrency,
        nodata: config.processing.nodata,
        keep_intermediate: config.processing.keep_intermediate,
    };

    Ok(CountyOrchestrator::new(
        Arc::new(counties),
        Arc::new(grid),
        runner,
        session,
        store,
        paths,
        settings,
    ))
}
