//! Progress bar for check runs

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use super::OutputMode;

/// Progress across the targets of one run
///
/// Hidden unless the output mode allows progress, so callers can tick
/// it unconditionally.
pub struct RunProgress {
    bar: Option<ProgressBar>,
    failed: u64,
}

impl RunProgress {
    pub fn new(mode: OutputMode, total: usize) -> Self {
        if !mode.progress_enabled() || total == 0 {
            return Self {
                bar: None,
                failed: 0,
            };
        }

        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.cyan} {bar:40.cyan/dim} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .progress_chars("━━─");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            bar: Some(bar),
            failed: 0,
        }
    }

    /// Record one finished check
    pub fn record(&mut self, target: &str, ok: bool) {
        if !ok {
            self.failed += 1;
        }
        if let Some(bar) = &self.bar {
            bar.inc(1);
            if self.failed > 0 {
                bar.set_message(format!("{} ({} failed)", target, self.failed));
            } else {
                bar.set_message(target.to_string());
            }
        }
    }

    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl Drop for RunProgress {
    fn drop(&mut self) {
        if let Some(bar) = &self.bar {
            if !bar.is_finished() {
                bar.finish_and_clear();
            }
        }
    }
}
