//! Per-county orchestration.
//!
//! A county moves through
//! `EXPORT_POLYGON → LOCATE_TILES → PROCESS_TILES → MERGE →
//! PERSIST_PROGRESS → CLEANUP`. Cleanup always runs, and the geospatial
//! session cache is cleared before the county starts and after it ends.
//! Nothing that goes wrong inside one county escapes it: every error ends
//! as [`CountyOutcome::Failed`] or [`CountyOutcome::Skipped`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use county_lights_models::artifact::sweep_stale;
use county_lights_models::{CountyCode, CountyOutcome, TileId, TileOutcome, TileTask};
use county_lights_spatial::{CountyLayer, TileGrid, locate_tiles, merge_zone_layers};
use county_lights_table::WideTable;

use crate::PipelineError;
use crate::capability::GeospatialSession;
use crate::runner::{TileRunner, run_tiles};
use crate::store::ProgressStore;

/// Where county scratch space and outputs live.
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// Root of the raw raster product archive.
    pub raw_archive: PathBuf,
    /// Root of county outputs.
    pub output_root: PathBuf,
    /// Root of per-county scratch directories.
    pub scratch_root: PathBuf,
}

impl RunPaths {
    /// Scratch directory of one county, deleted when the county ends.
    #[must_use]
    pub fn county_scratch(&self, code: &CountyCode) -> PathBuf {
        self.scratch_root.join(code.as_str())
    }

    /// Exported county polygon.
    #[must_use]
    pub fn cutline(&self, code: &CountyCode) -> PathBuf {
        self.county_scratch(code).join(format!("{code}.geojson"))
    }

    /// Scratch directory of one tile of one county.
    #[must_use]
    pub fn tile_dir(&self, code: &CountyCode, tile: &TileId) -> PathBuf {
        self.county_scratch(code).join(format!("tile_{tile}"))
    }

    /// Merged county fishnet.
    #[must_use]
    pub fn zone_layer(&self, code: &CountyCode) -> PathBuf {
        self.output_root
            .join("fishnet")
            .join(format!("{code}.geojson"))
    }

    /// Merged county wide table.
    #[must_use]
    pub fn wide_table(&self, code: &CountyCode) -> PathBuf {
        self.output_root
            .join("lighting_csv")
            .join(format!("{code}.csv"))
    }

    /// Completed-county log.
    #[must_use]
    pub fn progress_file(&self) -> PathBuf {
        self.output_root.join("progress.txt")
    }

    /// Timestamped process log.
    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.output_root.join("process.log")
    }
}

/// Tile-level settings shared by every county of a run.
#[derive(Debug, Clone, Copy)]
pub struct TileSettings {
    /// Maximum tiles in flight per county.
    pub concurrency: usize,
    /// Nodata value for extraction.
    pub nodata: f64,
    /// Keep per-date tables after pivoting.
    pub keep_intermediate: bool,
}

impl Default for TileSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            nodata: -9999.0,
            keep_intermediate: false,
        }
    }
}

/// Drives one county at a time through its stages.
pub struct CountyOrchestrator {
    counties: Arc<CountyLayer>,
    grid: Arc<TileGrid>,
    runner: Arc<dyn TileRunner>,
    session: Arc<dyn GeospatialSession>,
    store: Arc<ProgressStore>,
    paths: RunPaths,
    settings: TileSettings,
}

impl CountyOrchestrator {
    /// Assembles an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        counties: Arc<CountyLayer>,
        grid: Arc<TileGrid>,
        runner: Arc<dyn TileRunner>,
        session: Arc<dyn GeospatialSession>,
        store: Arc<ProgressStore>,
        paths: RunPaths,
        settings: TileSettings,
    ) -> Self {
        Self {
            counties,
            grid,
            runner,
            session,
            store,
            paths,
            settings,
        }
    }

    /// Output and scratch locations.
    #[must_use]
    pub const fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Master county layer.
    #[must_use]
    pub fn counties(&self) -> &CountyLayer {
        &self.counties
    }

    /// Progress store the orchestrator marks completed counties in.
    #[must_use]
    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Exports `code` into a throwaway directory and lists the tiles it
    /// overlaps.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the polygon cannot be exported or read
    /// back.
    pub fn tiles_for(&self, code: &CountyCode) -> Result<Vec<TileId>, PipelineError> {
        let scratch = self.paths.county_scratch(code);
        let result = self.export_and_locate(code);
        remove_scratch(code, &scratch);
        result
    }

    fn export_and_locate(&self, code: &CountyCode) -> Result<Vec<TileId>, PipelineError> {
        let cutline = self.paths.cutline(code);
        if self.counties.export_cutline(code, &cutline)? == 0 {
            return Ok(Vec::new());
        }
        Ok(locate_tiles(&cutline, &self.grid)?)
    }

    /// Runs every stage for one county.
    pub async fn process_county(&self, code: &CountyCode) -> CountyOutcome {
        log::info!("[{code}] === Start ===");
        self.clear_cache(code, "start");

        let scratch = self.paths.county_scratch(code);
        let outcome = self
            .run_stages(code, &scratch)
            .await
            .unwrap_or_else(|e| CountyOutcome::failed(e.to_string()));

        remove_scratch(code, &scratch);
        self.clear_cache(code, "end");

        match &outcome {
            CountyOutcome::Completed { tiles, .. } => {
                log::info!("[{code}] Completed successfully with {} tile(s)", tiles.len());
            }
            CountyOutcome::Skipped { reason } => log::warn!("[{code}] Skipped: {reason}"),
            CountyOutcome::Failed { reason } => log::error!("[{code}] FAILED: {reason}"),
        }
        outcome
    }

    async fn run_stages(
        &self,
        code: &CountyCode,
        scratch: &Path,
    ) -> Result<CountyOutcome, PipelineError> {
        std::fs::create_dir_all(scratch)?;

        // Counties run one at a time, so anything claimed under this
        // county's scratch was left by an interrupted run.
        let stale = sweep_stale(scratch)?;
        if stale > 0 {
            log::warn!("[{code}] Removed {stale} stale lock/temp file(s) from an earlier run");
        }

        // EXPORT_POLYGON
        let cutline = self.paths.cutline(code);
        let parts = self.counties.export_cutline(code, &cutline)?;
        if parts == 0 {
            return Ok(CountyOutcome::skipped("no polygon in the county layer"));
        }
        log::info!("[{code}] Exported {parts} polygon feature(s)");

        // LOCATE_TILES
        let tiles = match locate_tiles(&cutline, &self.grid) {
            Ok(tiles) => tiles,
            Err(e) => {
                log::error!("[{code}] Tile location failed: {e}");
                return Ok(CountyOutcome::skipped(format!("tile location failed: {e}")));
            }
        };
        if tiles.is_empty() {
            return Ok(CountyOutcome::skipped("no tile found"));
        }
        let ids: Vec<&str> = tiles.iter().map(TileId::as_str).collect();
        log::info!("[{code}] Tiles: {ids:?}");

        // PROCESS_TILES
        let tasks = tiles
            .into_iter()
            .map(|tile| TileTask {
                county: code.clone(),
                work_dir: self.paths.tile_dir(code, &tile),
                tile,
                cutline: cutline.clone(),
                raw_archive: self.paths.raw_archive.clone(),
                nodata: self.settings.nodata,
                keep_intermediate: self.settings.keep_intermediate,
            })
            .collect();
        let results = run_tiles(self.runner.as_ref(), tasks, self.settings.concurrency).await;

        let mut succeeded = Vec::new();
        for (task, outcome) in results {
            match outcome {
                TileOutcome::Succeeded(artifacts) => succeeded.push((task.tile, artifacts)),
                TileOutcome::Skipped { reason } => {
                    log::warn!("[{code}] Tile {} skipped: {reason}", task.tile);
                }
                TileOutcome::Failed { reason } => {
                    log::error!("[{code}] Tile {} failed: {reason}", task.tile);
                }
            }
        }
        if succeeded.is_empty() {
            return Ok(CountyOutcome::failed("no tile succeeded"));
        }

        // MERGE
        let zone_layer = self.paths.zone_layer(code);
        let fishnets: Vec<PathBuf> = succeeded
            .iter()
            .map(|(_, a)| a.zone_layer.clone())
            .collect();
        let merge = merge_zone_layers(&fishnets, &zone_layer)?;
        if merge.duplicate_keys > 0 {
            log::warn!(
                "[{code}] {} zone key(s) appear in more than one tile fishnet",
                merge.duplicate_keys
            );
        }

        let wide_table = self.paths.wide_table(code);
        let tables = succeeded
            .iter()
            .map(|(_, a)| WideTable::read(&a.wide_table))
            .collect::<Result<Vec<_>, _>>()?;
        let merged = WideTable::concat(tables);
        merged.write(&wide_table)?;
        log::info!(
            "[{code}] Merged {} zones × {} dates from {} tile(s)",
            merged.rows().len(),
            merged.dates().len(),
            succeeded.len()
        );

        // PERSIST_PROGRESS
        self.store.mark_done(code)?;

        Ok(CountyOutcome::Completed {
            tiles: succeeded.into_iter().map(|(tile, _)| tile).collect(),
            zone_layer,
            wide_table,
        })
    }

    fn clear_cache(&self, code: &CountyCode, when: &str) {
        match self.session.clear_cache() {
            Ok(()) => log::debug!("[{code}] Cleared workspace cache at {when}"),
            Err(e) => log::warn!("[{code}] Failed to clear workspace cache at {when}: {e}"),
        }
    }
}

fn remove_scratch(code: &CountyCode, scratch: &Path) {
    if !scratch.exists() {
        return;
    }
    match std::fs::remove_dir_all(scratch) {
        Ok(()) => log::info!("[{code}] Temp folder deleted"),
        Err(e) => log::warn!("[{code}] Failed to delete temp folder: {e}"),
    }
}
