//! One (county, tile) work unit: extract → grid → reduce → pivot.
//!
//! Every step looks for its finished output before doing anything, so a
//! tile can be re-run after a crash and a complete tile costs no
//! capability call at all.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use county_lights_models::artifact::{UnitLock, is_complete, promote, temp_sibling};
use county_lights_models::zone::ZONE_KEY_FIELD;
use county_lights_models::{DateCode, TileArtifacts, TileId, TileOutcome, TileTask};
use county_lights_spatial::ensure_zone_fields;
use county_lights_table::{WideTable, read_zonal_table, write_zonal_table};

use crate::PipelineError;
use crate::capability::{Capabilities, ExtractRequest, GeospatialSession};

/// File layout inside a tile's scratch directory.
#[derive(Debug, Clone)]
pub struct TileLayout {
    /// Filtered, clipped rasters (`<stem>_clip_filtered.tif`).
    pub clip_dir: PathBuf,
    /// Per-date zonal tables (`d<YYYYDDD>.csv`).
    pub tables_dir: PathBuf,
    /// The tile's fishnet.
    pub fishnet: PathBuf,
    /// The tile's wide table.
    pub wide_table: PathBuf,
}

impl TileLayout {
    /// Layout rooted at `work_dir`.
    #[must_use]
    pub fn new(work_dir: &Path, tile: &TileId) -> Self {
        Self {
            clip_dir: work_dir.join("clip"),
            tables_dir: work_dir.join("tables"),
            fishnet: work_dir.join(format!("fishnet_{tile}.geojson")),
            wide_table: work_dir.join(format!("csv_{tile}.csv")),
        }
    }

    /// Clipped raster path for a raw product.
    #[must_use]
    pub fn clipped(&self, product: &Path) -> PathBuf {
        let stem = product
            .file_stem()
            .map_or_else(String::new, |s| s.to_string_lossy().into_owned());
        self.clip_dir.join(format!("{stem}_clip_filtered.tif"))
    }
}

/// Raw products for `tile` under `root`: any file whose name contains the
/// tile id and whose extension starts with `h` (`.h5`, `.hdf`), sorted.
///
/// # Errors
///
/// Returns [`PipelineError::Glob`] if the archive path cannot be turned
/// into a pattern.
pub fn find_products(root: &Path, tile: &TileId) -> Result<Vec<PathBuf>, PipelineError> {
    let pattern = format!(
        "{}/**/*{}*.h*",
        glob::Pattern::escape(&root.to_string_lossy()),
        glob::Pattern::escape(tile.as_str())
    );

    let mut products = Vec::new();
    for entry in glob::glob(&pattern)? {
        match entry {
            Ok(path) => {
                let is_product = path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext.to_string_lossy().to_ascii_lowercase().starts_with('h'));
                if is_product {
                    products.push(path);
                }
            }
            Err(e) => log::warn!("Unreadable archive entry: {e}"),
        }
    }

    products.sort();
    Ok(products)
}

/// Runs tile tasks against a set of capabilities.
pub struct TileProcessor {
    capabilities: Capabilities,
    session: Arc<dyn GeospatialSession>,
}

impl TileProcessor {
    /// Creates a processor whose capability calls all run in `session`.
    #[must_use]
    pub fn new(capabilities: Capabilities, session: Arc<dyn GeospatialSession>) -> Self {
        Self {
            capabilities,
            session,
        }
    }

    /// Processes one tile. Never panics on capability failure: every
    /// error becomes [`TileOutcome::Failed`].
    #[must_use]
    pub fn process_tile(&self, task: &TileTask) -> TileOutcome {
        let label = task.label();
        log::info!("[{label}] Tile start");

        let outcome = self
            .run(task, &label)
            .unwrap_or_else(|e| TileOutcome::failed(e.to_string()));

        match &outcome {
            TileOutcome::Succeeded(artifacts) => {
                log::info!("[{label}] Tile done ({} dates)", artifacts.dates);
            }
            TileOutcome::Skipped { reason } => log::warn!("[{label}] Tile skipped: {reason}"),
            TileOutcome::Failed { reason } => log::error!("[{label}] Tile failed: {reason}"),
        }
        outcome
    }

    fn run(&self, task: &TileTask, label: &str) -> Result<TileOutcome, PipelineError> {
        let layout = TileLayout::new(&task.work_dir, &task.tile);
        std::fs::create_dir_all(&layout.clip_dir)?;

        let products = find_products(&task.raw_archive, &task.tile)?;
        if products.is_empty() {
            return Ok(TileOutcome::skipped("no raw products found"));
        }
        log::info!("[{label}] {} raw product(s)", products.len());

        let clipped = self.extract_all(task, &layout, &products, label)?;
        if clipped.is_empty() {
            return Ok(TileOutcome::skipped("no product survived extraction"));
        }

        let Some(template) = clipped.values().min() else {
            return Ok(TileOutcome::skipped("no product survived extraction"));
        };
        self.ensure_fishnet(&layout, template, label)?;

        let existing = if is_complete(&layout.wide_table) {
            match WideTable::read(&layout.wide_table) {
                Ok(table) => Some(table),
                Err(e) => {
                    log::warn!("[{label}] Existing wide table unusable, rebuilding: {e}");
                    None
                }
            }
        } else {
            None
        };

        self.reduce_all(&layout, &clipped, existing.as_ref(), label)?;
        Self::pivot(task, &layout, existing, label)
    }

    /// Clips every product that has no complete clipped raster yet.
    /// Returns the complete clipped rasters keyed by date.
    ///
    /// A failed extraction drops that product only. A product whose
    /// output is locked by another claimant fails the whole tile, so the
    /// county cannot complete without that date.
    fn extract_all(
        &self,
        task: &TileTask,
        layout: &TileLayout,
        products: &[PathBuf],
        label: &str,
    ) -> Result<BTreeMap<DateCode, PathBuf>, PipelineError> {
        let mut clipped: BTreeMap<DateCode, PathBuf> = BTreeMap::new();

        for product in products {
            let name = product
                .file_name()
                .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
            let Some(date) = DateCode::from_product_name(&name) else {
                log::warn!("[{label}] {name}: no date code in file name, skipped");
                continue;
            };

            if let Some(previous) = clipped.get(&date) {
                log::warn!(
                    "[{label}] {name}: date {date} already provided by {}, ignored",
                    previous.display()
                );
                continue;
            }

            let output = layout.clipped(product);
            if !is_complete(&output) {
                let result = produce(&output, |temp| {
                    let request = ExtractRequest {
                        product,
                        cutline: &task.cutline,
                        output: temp,
                        nodata: task.nodata,
                    };
                    self.capabilities
                        .extractor
                        .extract_and_clip(self.session.as_ref(), &request)?;
                    Ok(())
                });
                match result {
                    Ok(()) => {}
                    Err(e @ PipelineError::Locked(_)) => return Err(e),
                    Err(e) => {
                        log::warn!("[{label}] {name}: extraction failed: {e}");
                        continue;
                    }
                }
            }

            clipped.insert(date, output);
        }

        Ok(clipped)
    }

    fn ensure_fishnet(
        &self,
        layout: &TileLayout,
        template: &Path,
        label: &str,
    ) -> Result<(), PipelineError> {
        if is_complete(&layout.fishnet) {
            match ensure_zone_fields(&layout.fishnet) {
                Ok(zones) => {
                    log::debug!("[{label}] Reusing fishnet with {zones} zones");
                    return Ok(());
                }
                Err(e) => {
                    log::warn!("[{label}] Existing fishnet unusable, rebuilding: {e}");
                    std::fs::remove_file(&layout.fishnet)?;
                }
            }
        }

        let mut zones = 0;
        produce(&layout.fishnet, |temp| {
            self.capabilities
                .grid
                .build_zone_grid(self.session.as_ref(), template, temp)?;
            zones = ensure_zone_fields(temp)?;
            Ok(())
        })?;

        log::info!("[{label}] Built fishnet with {zones} zones");
        Ok(())
    }

    /// Reduces every date that is neither a per-date table nor already a
    /// column of the existing wide table.
    fn reduce_all(
        &self,
        layout: &TileLayout,
        clipped: &BTreeMap<DateCode, PathBuf>,
        existing: Option<&WideTable>,
        label: &str,
    ) -> Result<(), PipelineError> {
        std::fs::create_dir_all(&layout.tables_dir)?;

        for (date, raster) in clipped {
            let table = layout.tables_dir.join(date.table_name());
            if is_complete(&table) || existing.is_some_and(|t| t.has_date(*date)) {
                continue;
            }

            match self.capabilities.reducer.reduce_zonal_mean(
                self.session.as_ref(),
                raster,
                &layout.fishnet,
                ZONE_KEY_FIELD,
            ) {
                Ok(records) if records.is_empty() => {
                    log::warn!("[{label}] {date}: reducer returned no zones");
                }
                Ok(records) => {
                    if let Err(e) = write_zonal_table(&table, &records) {
                        log::warn!("[{label}] {date}: failed to write zonal table: {e}");
                    }
                }
                Err(e) => log::warn!("[{label}] {date}: zonal reduction failed: {e}"),
            }
        }

        Ok(())
    }

    fn pivot(
        task: &TileTask,
        layout: &TileLayout,
        existing: Option<WideTable>,
        label: &str,
    ) -> Result<TileOutcome, PipelineError> {
        let tables = date_tables(&layout.tables_dir)?;

        let mut loaded = Vec::with_capacity(tables.len());
        for (date, path) in &tables {
            match read_zonal_table(path) {
                Ok(records) => loaded.push((*date, records)),
                Err(e) => log::warn!("[{label}] {date}: unreadable zonal table: {e}"),
            }
        }

        let artifacts = |dates: usize| {
            TileOutcome::Succeeded(TileArtifacts {
                zone_layer: layout.fishnet.clone(),
                wide_table: layout.wide_table.clone(),
                dates,
            })
        };

        if loaded.is_empty() {
            return Ok(match existing {
                Some(table) => artifacts(table.dates().len()),
                None => TileOutcome::failed("no zonal table was produced"),
            });
        }

        let wide = WideTable::pivot(existing, loaded);
        wide.write(&layout.wide_table)?;
        log::info!(
            "[{label}] Wrote wide table with {} zones × {} dates",
            wide.rows().len(),
            wide.dates().len()
        );

        if !task.keep_intermediate {
            for (_, path) in &tables {
                if let Err(e) = std::fs::remove_file(path) {
                    log::warn!("[{label}] Failed to remove {}: {e}", path.display());
                }
            }
        }

        Ok(artifacts(wide.dates().len()))
    }
}

/// Produces `output` through a temporary sibling under an exclusive lock.
///
/// `call` receives the temporary path and must leave a complete file
/// there. If another claimant holds the lock, [`PipelineError::Locked`]
/// is returned; if the output appeared meanwhile, nothing is done.
fn produce(
    output: &Path,
    call: impl FnOnce(&Path) -> Result<(), PipelineError>,
) -> Result<(), PipelineError> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let Some(_lock) = UnitLock::try_acquire(output)? else {
        return Err(PipelineError::Locked(output.to_path_buf()));
    };
    if is_complete(output) {
        return Ok(());
    }

    let temp = temp_sibling(output);
    let result = call(&temp).and_then(|()| {
        if is_complete(&temp) {
            Ok(())
        } else {
            Err(PipelineError::MissingOutput(output.to_path_buf()))
        }
    });

    match result {
        Ok(()) => Ok(promote(&temp, output)?),
        Err(e) => {
            let _ = std::fs::remove_file(&temp);
            Err(e)
        }
    }
}

/// Per-date tables present in `dir`, ordered by date.
fn date_tables(dir: &Path) -> Result<Vec<(DateCode, PathBuf)>, PipelineError> {
    let mut tables = Vec::new();
    if !dir.is_dir() {
        return Ok(tables);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let date = path
            .file_name()
            .and_then(|n| DateCode::from_table_name(&n.to_string_lossy()));
        if let Some(date) = date
            && is_complete(&path)
        {
            tables.push((date, path));
        }
    }

    tables.sort();
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "county_lights_tile_{name}_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn products_match_tile_and_h_extension() {
        let dir = scratch("products");
        let nested = dir.join("2018/153");
        std::fs::create_dir_all(&nested).unwrap();
        for name in [
            "VNP46A2.A2018153.h09v06.001.h5",
            "VNP46A2.A2018154.h09v06.001.hdf",
            "VNP46A2.A2018153.h10v06.001.h5",
            "VNP46A2.A2018153.h09v06.001.txt",
        ] {
            std::fs::write(nested.join(name), b"x").unwrap();
        }
        std::fs::write(dir.join("VNP46A2.A2018155.h09v06.001.h5"), b"x").unwrap();

        let products = find_products(&dir, &TileId::new("h09v06").unwrap()).unwrap();
        let names: Vec<String> = products
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            names,
            vec![
                "VNP46A2.A2018153.h09v06.001.h5",
                "VNP46A2.A2018154.h09v06.001.hdf",
                "VNP46A2.A2018155.h09v06.001.h5",
            ]
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn clipped_name_uses_product_stem() {
        let layout = TileLayout::new(Path::new("/s/tile_h09v06"), &TileId::new("h09v06").unwrap());
        assert_eq!(
            layout.clipped(Path::new("/raw/VNP46A2.A2018153.h09v06.001.h5")),
            PathBuf::from("/s/tile_h09v06/clip/VNP46A2.A2018153.h09v06.001_clip_filtered.tif")
        );
        assert_eq!(layout.fishnet, PathBuf::from("/s/tile_h09v06/fishnet_h09v06.geojson"));
        assert_eq!(layout.wide_table, PathBuf::from("/s/tile_h09v06/csv_h09v06.csv"));
    }

    #[test]
    fn produce_promotes_and_refuses_held_lock() {
        let dir = scratch("produce");
        let output = dir.join("clip/a.tif");

        produce(&output, |temp| Ok(std::fs::write(temp, b"raster")?)).unwrap();
        assert!(is_complete(&output));

        let other = dir.join("clip/b.tif");
        let _held = UnitLock::try_acquire(&other).unwrap().unwrap();
        assert!(matches!(
            produce(&other, |temp| Ok(std::fs::write(temp, b"raster")?)),
            Err(PipelineError::Locked(_))
        ));
        assert!(!other.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn produce_rejects_empty_output() {
        let dir = scratch("empty");
        let output = dir.join("fishnet.geojson");

        let result = produce(&output, |temp| Ok(std::fs::write(temp, b"")?));

        assert!(matches!(result, Err(PipelineError::MissingOutput(_))));
        assert!(!output.exists());
        let leftovers = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(leftovers, 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
