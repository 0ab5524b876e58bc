//! Batch command: illustrate pending items of one table.

use anyhow::{Context, Result};
use illustrator_core::{BatchProgress, PipelineOrchestrator};

use super::progress::BatchProgressBar;
use super::{determine_exit_outcome, outcome_line};
use crate::ProcessExit;

pub(crate) async fn run_batch_command(
    pipeline: &PipelineOrchestrator,
    table: &str,
    limit: usize,
    json_output: bool,
    show_progress: bool,
) -> Result<ProcessExit> {
    let mut bar = BatchProgressBar::new(show_progress);
    let outcomes = pipeline
        .process_batch_observed(table, limit, &mut |event: BatchProgress<'_>| match event {
            BatchProgress::Started { total } => bar.start(total),
            BatchProgress::ItemFinished { outcome, .. } => bar.advance(outcome),
        })
        .await
        .with_context(|| format!("batch run over {table} failed"))?;
    bar.finish();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            println!("{}", outcome_line(outcome));
        }
    }
    Ok(determine_exit_outcome(&outcomes))
}
