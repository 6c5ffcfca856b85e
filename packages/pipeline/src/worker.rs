//! Worker side of [`SubprocessRunner`](crate::runner::SubprocessRunner).

use std::io::{Read, Write};

use county_lights_models::{TileOutcome, TileTask};

use crate::PipelineError;
use crate::tile::TileProcessor;

/// Reads one [`TileTask`] as JSON from `input`, processes it and writes the
/// [`TileOutcome`] as JSON to `output`.
///
/// # Errors
///
/// Returns [`PipelineError`] if the task cannot be decoded or the outcome
/// cannot be written. Tile failures are reported in the outcome.
pub fn serve_tile_task(
    processor: &TileProcessor,
    input: impl Read,
    mut output: impl Write,
) -> Result<TileOutcome, PipelineError> {
    let task: TileTask = serde_json::from_reader(input)?;
    let outcome = processor.process_tile(&task);

    serde_json::to_writer(&mut output, &outcome)?;
    writeln!(output)?;
    output.flush()?;

    Ok(outcome)
}
