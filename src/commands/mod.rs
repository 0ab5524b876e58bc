//! CLI command handlers.

mod batch;
mod context;
mod process;
mod progress;
mod tables;

pub(crate) use batch::run_batch_command;
pub(crate) use context::build_pipeline;
pub(crate) use process::run_process_command;
pub(crate) use tables::run_tables_command;

use illustrator_core::ItemOutcome;

use crate::ProcessExit;

/// Exit outcome for a set of item outcomes: success when anything succeeded.
pub(crate) fn determine_exit_outcome(outcomes: &[ItemOutcome]) -> ProcessExit {
    if outcomes.iter().any(ItemOutcome::is_success) {
        ProcessExit::Success
    } else {
        ProcessExit::Failure
    }
}

/// One human-readable line per outcome.
pub(crate) fn outcome_line(outcome: &ItemOutcome) -> String {
    let secs = outcome.elapsed.as_secs_f64();
    match (&outcome.image_url, &outcome.error) {
        (Some(url), _) => format!("{} {} ({secs:.2}s) {url}", outcome.id, outcome.status),
        (None, Some(error)) => format!("{} {} ({secs:.2}s) {error}", outcome.id, outcome.status),
        (None, None) => format!("{} {} ({secs:.2}s)", outcome.id, outcome.status),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_exit_outcome_success_when_any_succeeded() {
        let outcomes = [
            ItemOutcome::failed("1", Duration::ZERO),
            ItemOutcome::success("2", Duration::ZERO, "https://store/x.jpg"),
        ];
        assert_eq!(determine_exit_outcome(&outcomes), ProcessExit::Success);
    }

    #[test]
    fn test_exit_outcome_failure_when_none_succeeded() {
        let outcomes = [
            ItemOutcome::failed("1", Duration::ZERO),
            ItemOutcome::error("2", Duration::ZERO, "boom"),
        ];
        assert_eq!(determine_exit_outcome(&outcomes), ProcessExit::Failure);
        assert_eq!(determine_exit_outcome(&[]), ProcessExit::Failure);
    }

    #[test]
    fn test_outcome_line_formats() {
        let line = outcome_line(&ItemOutcome::success("7", Duration::from_millis(1500), "https://store/x.jpg"));
        assert_eq!(line, "7 success (1.50s) https://store/x.jpg");
        let line = outcome_line(&ItemOutcome::error("8", Duration::ZERO, "offline"));
        assert_eq!(line, "8 error (0.00s) offline");
        let line = outcome_line(&ItemOutcome::failed("9", Duration::ZERO));
        assert_eq!(line, "9 failed (0.00s)");
    }
}
