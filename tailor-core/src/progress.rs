//! Progress reporting for long-running pipeline stages.
//!
//! The CLI uses `IndicatifReporter` for user-visible progress bars.
//! Library callers and tests use `NoopReporter`.

use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Trait for reporting progress of pipeline stages (encoding, epochs, ...).
pub trait ProgressReporter: Send + Sync {
    /// Begin a new stage with an optional total count.
    fn start(&self, stage: &str, total: Option<u64>);

    /// Advance progress by the given amount.
    fn advance(&self, amount: u64);

    /// Mark the current stage as finished.
    fn finish(&self);

    /// Display an informational message above the bar.
    fn message(&self, msg: &str);
}

/// No-op reporter for library callers that don't need progress output.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn start(&self, _stage: &str, _total: Option<u64>) {}
    fn advance(&self, _amount: u64) {}
    fn finish(&self) {}
    fn message(&self, _msg: &str) {}
}

/// Reporter backed by an `indicatif` progress bar on stderr.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: ProgressBar,
    completed: AtomicU64,
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl IndicatifReporter {
    /// `visible = false` keeps the bar hidden (quiet mode, non-tty output).
    pub fn new(visible: bool) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_draw_target(if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        });
        Self {
            bar,
            completed: AtomicU64::new(0),
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

fn counted_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})")
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn open_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg} {pos}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

impl ProgressReporter for IndicatifReporter {
    fn start(&self, stage: &str, total: Option<u64>) {
        self.completed.store(0, Ordering::Relaxed);
        match total {
            Some(total) => {
                self.bar.set_length(total);
                self.bar.set_style(counted_style());
            }
            None => {
                self.bar.set_length(0);
                self.bar.set_style(open_style());
            }
        }
        self.bar.set_message(stage.to_string());
        self.bar.reset();
    }

    fn advance(&self, amount: u64) {
        self.completed.fetch_add(amount, Ordering::Relaxed);
        self.bar.inc(amount);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn message(&self, msg: &str) {
        self.bar.println(msg);
    }
}
