//! Process command: illustrate one item.

use std::time::Instant;

use anyhow::Result;
use illustrator_core::{PipelineOrchestrator, item_outcome};

use super::{determine_exit_outcome, outcome_line};
use crate::ProcessExit;

pub(crate) async fn run_process_command(
    pipeline: &PipelineOrchestrator,
    id: &str,
    table: Option<&str>,
    json_output: bool,
) -> Result<ProcessExit> {
    let started = Instant::now();
    let result = pipeline.process_item(id, table).await;
    let outcome = item_outcome(id, started.elapsed(), result);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("{}", outcome_line(&outcome));
    }
    Ok(determine_exit_outcome(std::slice::from_ref(&outcome)))
}
