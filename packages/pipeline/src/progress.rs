//! Run progress reporting.
//!
//! The driver reports one unit per county through [`ProgressCallback`];
//! the CLI renders it as an `indicatif` bar, tests pass [`null_progress`].

use std::sync::Arc;

/// Receives progress updates from a run.
///
/// Shared across tokio tasks, hence `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// Sets the number of counties that will be processed.
    fn set_total(&self, total: u64);

    /// Advances by `delta` counties.
    fn inc(&self, delta: u64);

    /// Shows the county currently being processed.
    fn set_message(&self, msg: String);

    /// Finishes with a summary message.
    fn finish(&self, msg: String);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// A shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
