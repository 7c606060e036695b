// SPDX-License-Identifier: MIT OR Apache-2.0

//! Progress reporting for embedding runs.
//!
//! The runner and backends only talk to [`ProgressSink`]; whether that ends up
//! as a terminal progress bar or nothing at all is decided by the caller.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Observer for per-provider progress
pub trait ProgressSink: Send + Sync {
    /// A provider starts; `done` texts are already in its checkpoint.
    fn start(&self, provider: &str, total: u64, done: u64);

    /// `n` more texts have been embedded.
    fn advance(&self, n: u64);

    /// The provider finished successfully.
    fn finish(&self, message: &str);

    /// The provider stopped early.
    fn abandon(&self, message: &str);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn start(&self, _provider: &str, _total: u64, _done: u64) {}
    fn advance(&self, _n: u64) {}
    fn finish(&self, _message: &str) {}
    fn abandon(&self, _message: &str) {}
}

/// Renders one indicatif bar per provider
#[derive(Default)]
pub struct TerminalProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }

    fn take_bar(&self) -> Option<ProgressBar> {
        self.bar.lock().ok().and_then(|mut guard| guard.take())
    }
}

impl ProgressSink for TerminalProgress {
    fn start(&self, provider: &str, total: u64, done: u64) {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} texts ({eta}) {msg}")
                .expect("valid progress bar template")
                .progress_chars("##."),
        );
        bar.set_message(provider.to_string());
        bar.set_position(done);
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(previous) = guard.replace(bar) {
                previous.finish_and_clear();
            }
        }
    }

    fn advance(&self, n: u64) {
        self.with_bar(|bar| bar.inc(n));
    }

    fn finish(&self, message: &str) {
        if let Some(bar) = self.take_bar() {
            bar.finish_with_message(message.to_string());
        }
    }

    fn abandon(&self, message: &str) {
        if let Some(bar) = self.take_bar() {
            bar.abandon_with_message(message.to_string());
        }
    }
}
