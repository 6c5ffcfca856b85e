//! Worklist loading and the sequential county loop.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use county_lights_models::{CountyCode, CountyOutcome};

use crate::PipelineError;
use crate::county::CountyOrchestrator;
use crate::progress::ProgressCallback;

/// Reads county codes from `column` of a worklist CSV.
///
/// Codes are normalized to five digits and deduplicated; blank cells are
/// ignored and malformed ones logged.
///
/// # Errors
///
/// Returns [`PipelineError`] if the file cannot be read or has no such
/// column.
pub fn load_worklist(path: &Path, column: &str) -> Result<BTreeSet<CountyCode>, PipelineError> {
    let csv_error = |source| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_error)?;

    let index = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .position(|h| h.trim_start_matches('\u{feff}') == column)
        .ok_or_else(|| PipelineError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })?;

    let mut codes = BTreeSet::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(csv_error)?;
        let raw = record.get(index).unwrap_or_default();
        if raw.is_empty() {
            continue;
        }
        match CountyCode::parse(raw) {
            Ok(code) => {
                codes.insert(code);
            }
            Err(e) => log::warn!("{}:{}: {e}", path.display(), i + 2),
        }
    }

    Ok(codes)
}

/// What a run will do, before doing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunPlan {
    /// Distinct codes in the worklist.
    pub requested: usize,
    /// Worklist codes absent from the county layer.
    pub unmatched: Vec<CountyCode>,
    /// Matched codes already recorded as done.
    pub already_done: Vec<CountyCode>,
    /// Matched codes still to process, ascending.
    pub pending: Vec<CountyCode>,
}

impl RunPlan {
    /// Worklist codes present in the county layer.
    #[must_use]
    pub const fn matched(&self) -> usize {
        self.already_done.len() + self.pending.len()
    }
}

/// Counts for a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Distinct codes in the worklist.
    pub requested: usize,
    /// Codes present in the county layer.
    pub matched: usize,
    /// Codes absent from the county layer.
    pub unmatched: usize,
    /// Codes skipped because they were already done.
    pub already_done: usize,
    /// Counties completed in this run.
    pub completed: usize,
    /// Counties skipped for lack of input.
    pub skipped: usize,
    /// Counties that failed.
    pub failed: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} requested, {} matched, {} unmatched, {} already done; \
             {} completed, {} skipped, {} failed",
            self.requested,
            self.matched,
            self.unmatched,
            self.already_done,
            self.completed,
            self.skipped,
            self.failed
        )
    }
}

/// Processes a worklist one county at a time.
pub struct RunDriver {
    orchestrator: CountyOrchestrator,
    progress: Arc<dyn ProgressCallback>,
}

impl RunDriver {
    /// Creates a driver reporting one progress unit per county.
    #[must_use]
    pub fn new(orchestrator: CountyOrchestrator, progress: Arc<dyn ProgressCallback>) -> Self {
        Self {
            orchestrator,
            progress,
        }
    }

    /// The orchestrator counties are handed to.
    #[must_use]
    pub const fn orchestrator(&self) -> &CountyOrchestrator {
        &self.orchestrator
    }

    /// Splits `worklist` into unmatched, already done and pending codes.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the progress file cannot be read.
    pub fn plan(&self, worklist: &BTreeSet<CountyCode>) -> Result<RunPlan, PipelineError> {
        let done = self.orchestrator.store().load_done_set()?;
        let counties = self.orchestrator.counties();

        let mut plan = RunPlan {
            requested: worklist.len(),
            ..RunPlan::default()
        };
        for code in worklist {
            if !counties.contains(code) {
                plan.unmatched.push(code.clone());
            } else if done.contains(code) {
                plan.already_done.push(code.clone());
            } else {
                plan.pending.push(code.clone());
            }
        }
        Ok(plan)
    }

    /// Processes every pending county of `worklist` sequentially.
    ///
    /// County failures are counted, never returned.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] only if the progress file cannot be read.
    pub async fn run(&self, worklist: &BTreeSet<CountyCode>) -> Result<RunSummary, PipelineError> {
        let plan = self.plan(worklist)?;

        for code in &plan.unmatched {
            log::warn!(
                "[{code}] Not in {}, skipped",
                self.orchestrator.counties().path().display()
            );
        }
        log::info!(
            "{} counties requested; {} matched in the county layer; {} already done, {} pending",
            plan.requested,
            plan.matched(),
            plan.already_done.len(),
            plan.pending.len()
        );

        let mut summary = RunSummary {
            requested: plan.requested,
            matched: plan.matched(),
            unmatched: plan.unmatched.len(),
            already_done: plan.already_done.len(),
            ..RunSummary::default()
        };

        self.progress.set_total(plan.pending.len() as u64);
        for code in &plan.pending {
            self.progress.set_message(format!("county {code}"));
            match self.orchestrator.process_county(code).await {
                CountyOutcome::Completed { .. } => summary.completed += 1,
                CountyOutcome::Skipped { .. } => summary.skipped += 1,
                CountyOutcome::Failed { .. } => summary.failed += 1,
            }
            self.progress.inc(1);
        }
        self.progress.finish(format!(
            "{} completed, {} skipped, {} failed",
            summary.completed, summary.skipped, summary.failed
        ));

        log::info!("Run finished: {summary}");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worklist_codes_are_normalized() {
        let dir = std::env::temp_dir().join(format!(
            "county_lights_worklist_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("counties.csv");
        std::fs::write(
            &path,
            "\u{feff}countyName,countyCode\nSan Mateo, 6081\nMonterey,06053\nBad,x1\nEmpty,\nAgain,6081\n",
        )
        .unwrap();

        let codes = load_worklist(&path, "countyCode").unwrap();
        let codes: Vec<&str> = codes.iter().map(CountyCode::as_str).collect();
        assert_eq!(codes, vec!["06053", "06081"]);

        assert!(matches!(
            load_worklist(&path, "fips"),
            Err(PipelineError::MissingColumn { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn summary_display() {
        let summary = RunSummary {
            requested: 3,
            matched: 2,
            unmatched: 1,
            already_done: 1,
            completed: 1,
            skipped: 0,
            failed: 0,
        };
        assert_eq!(
            summary.to_string(),
            "3 requested, 2 matched, 1 unmatched, 1 already done; 1 completed, 0 skipped, 0 failed"
        );
    }
}
