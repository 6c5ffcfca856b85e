//! Tile runners and the bounded tile pool.
//!
//! A county fans its tiles out through [`run_tiles`], which keeps at most
//! `concurrency` tasks in flight and yields outcomes in submission order.
//! Where a task actually runs is up to the [`TileRunner`]: on a blocking
//! thread of this process, or in a `tile-worker` subprocess that owns its
//! own geospatial session.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use county_lights_models::{TileOutcome, TileTask};
use futures::stream::{self, StreamExt as _};
use tokio::io::AsyncWriteExt as _;

use crate::tile::TileProcessor;

/// Executes one tile task to completion.
#[async_trait]
pub trait TileRunner: Send + Sync {
    /// Runs `task`. Failures are reported through the outcome, never as a
    /// panic or error.
    async fn run(&self, task: TileTask) -> TileOutcome;
}

/// Runs tasks on tokio's blocking thread pool.
///
/// Only suitable when the capability backend is thread-safe.
pub struct InProcessRunner {
    processor: Arc<TileProcessor>,
}

impl InProcessRunner {
    /// Creates a runner around a shared processor.
    #[must_use]
    pub const fn new(processor: Arc<TileProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl TileRunner for InProcessRunner {
    async fn run(&self, task: TileTask) -> TileOutcome {
        let processor = Arc::clone(&self.processor);
        let label = task.label();

        tokio::task::spawn_blocking(move || processor.process_tile(&task))
            .await
            .unwrap_or_else(|e| {
                log::error!("[{label}] Tile task aborted: {e}");
                TileOutcome::failed(format!("tile task aborted: {e}"))
            })
    }
}

/// Runs each task in a child process.
///
/// The child is started as `program args...`, receives the task as JSON
/// on stdin and must print the outcome as JSON on stdout. Its stderr is
/// inherited so worker logs reach the console.
pub struct SubprocessRunner {
    program: PathBuf,
    args: Vec<String>,
}

impl SubprocessRunner {
    /// Creates a runner that starts `program` with `args`.
    #[must_use]
    pub const fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    async fn spawn(&self, task: &TileTask) -> Result<TileOutcome, String> {
        let payload = serde_json::to_vec(task).map_err(|e| format!("encode task: {e}"))?;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn {}: {e}", self.program.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .map_err(|e| format!("write task: {e}"))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| format!("close stdin: {e}"))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("wait for worker: {e}"))?;

        if !output.status.success() {
            return Err(format!("worker exited with {}", output.status));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| format!("decode outcome: {e}"))
    }
}

#[async_trait]
impl TileRunner for SubprocessRunner {
    async fn run(&self, task: TileTask) -> TileOutcome {
        match self.spawn(&task).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                log::error!("[{}] Tile worker failed: {reason}", task.label());
                TileOutcome::failed(reason)
            }
        }
    }
}

/// Runs `tasks` with at most `concurrency` in flight and returns each task
/// with its outcome, in submission order. Waits for every task; nothing is
/// cancelled when one fails.
pub async fn run_tiles(
    runner: &dyn TileRunner,
    tasks: Vec<TileTask>,
    concurrency: usize,
) -> Vec<(TileTask, TileOutcome)> {
    let concurrency = concurrency.max(1);
    log::debug!(
        "Running {} tile task(s), concurrency={concurrency}",
        tasks.len()
    );

    stream::iter(tasks.into_iter().map(|task| async move {
        let outcome = runner.run(task.clone()).await;
        (task, outcome)
    }))
    .buffered(concurrency)
    .collect()
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use county_lights_models::{CountyCode, TileId};

    use super::*;

    struct SlowRunner {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TileRunner for SlowRunner {
        async fn run(&self, task: TileTask) -> TileOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            // Later tiles finish first.
            let delay = 40 - u64::from(task.tile.as_str().as_bytes()[1] - b'0') * 5;
            tokio::time::sleep(Duration::from_millis(delay)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if task.tile.as_str() == "h3v0" {
                TileOutcome::failed("boom")
            } else {
                TileOutcome::skipped(task.tile.to_string())
            }
        }
    }

    fn task(tile: &str) -> TileTask {
        TileTask {
            county: CountyCode::parse("06079").unwrap(),
            tile: TileId::new(tile).unwrap(),
            cutline: PathBuf::from("c.geojson"),
            raw_archive: PathBuf::from("raw"),
            work_dir: PathBuf::from(format!("work/tile_{tile}")),
            nodata: -9999.0,
            keep_intermediate: false,
        }
    }

    #[tokio::test]
    async fn pool_is_bounded_and_ordered() {
        let runner = SlowRunner {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let tasks: Vec<_> = (0..6).map(|i| task(&format!("h{i}v0"))).collect();

        let results = run_tiles(&runner, tasks, 2).await;

        let tiles: Vec<&str> = results.iter().map(|(t, _)| t.tile.as_str()).collect();
        assert_eq!(tiles, vec!["h0v0", "h1v0", "h2v0", "h3v0", "h4v0", "h5v0"]);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(results[3].1, TileOutcome::failed("boom"));
        assert_eq!(results[4].1, TileOutcome::skipped("h4v0"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn subprocess_outcome_is_decoded() {
        let runner = SubprocessRunner::new(
            PathBuf::from("sh"),
            vec![
                "-c".to_string(),
                r#"cat > /dev/null; echo '{"status":"skipped","reason":"no raw products found"}'"#
                    .to_string(),
            ],
        );

        let outcome = runner.run(task("h9v0")).await;
        assert_eq!(outcome, TileOutcome::skipped("no raw products found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn crashed_worker_is_a_failed_tile() {
        let runner = SubprocessRunner::new(
            PathBuf::from("sh"),
            vec!["-c".to_string(), "cat > /dev/null; exit 7".to_string()],
        );

        let outcome = runner.run(task("h9v0")).await;
        assert!(matches!(outcome, TileOutcome::Failed { .. }));
    }
}
