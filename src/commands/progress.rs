//! Progress bar for batch runs.

use indicatif::{ProgressBar, ProgressStyle};
use illustrator_core::ItemOutcome;

/// Item-level progress; a no-op when the terminal should stay quiet.
pub(crate) struct BatchProgressBar {
    enabled: bool,
    bar: Option<ProgressBar>,
    succeeded: usize,
}

impl BatchProgressBar {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            bar: None,
            succeeded: 0,
        }
    }

    pub(crate) fn start(&mut self, total: usize) {
        if !self.enabled || total == 0 {
            return;
        }
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.bar = Some(bar);
    }

    pub(crate) fn advance(&mut self, outcome: &ItemOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
        }
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{} illustrated, last {} {}", self.succeeded, outcome.id, outcome.status));
            bar.inc(1);
        }
    }

    pub(crate) fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_disabled_bar_still_counts() {
        let mut bar = BatchProgressBar::new(false);
        bar.start(2);
        assert!(bar.bar.is_none());
        bar.advance(&ItemOutcome::success("1", Duration::ZERO, "https://store/x.jpg"));
        bar.advance(&ItemOutcome::failed("2", Duration::ZERO));
        assert_eq!(bar.succeeded, 1);
        bar.finish();
    }

    #[test]
    fn test_enabled_bar_tracks_position() {
        let mut bar = BatchProgressBar::new(true);
        bar.start(3);
        bar.advance(&ItemOutcome::failed("1", Duration::ZERO));
        assert_eq!(bar.bar.as_ref().map(ProgressBar::position), Some(1));
        bar.finish();
        assert!(bar.bar.is_none());
    }
}
