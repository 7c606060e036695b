// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output and color utilities for consistent terminal formatting
//!
//! Provides shared color functions respecting NO_COLOR environment variable,
//! and the text rendering of run summaries and status reports.

use colored::Colorize;
use std::fmt::Write;
use std::time::Duration;

use crate::checkpoint::ProviderStatus;
use crate::coordinator::{ProviderOutcome, RunSummary, StatusReport};

/// Check if colors should be used (respects NO_COLOR env var)
pub fn use_colors() -> bool {
    std::env::var("NO_COLOR").is_err()
}

/// Colorize file path (cyan)
pub fn colorize_path(text: &str, use_color: bool) -> String {
    if use_color {
        text.cyan().to_string()
    } else {
        text.to_string()
    }
}

/// Colorize counts (yellow)
pub fn colorize_count(num: usize, use_color: bool) -> String {
    if use_color {
        num.to_string().yellow().to_string()
    } else {
        num.to_string()
    }
}

/// Colorize provider name (bold)
pub fn colorize_name(text: &str, use_color: bool) -> String {
    if use_color {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

fn mark_ok(use_color: bool) -> String {
    if use_color {
        "✓".green().to_string()
    } else {
        "ok".to_string()
    }
}

fn mark_skip(use_color: bool) -> String {
    if use_color {
        "-".dimmed().to_string()
    } else {
        "skip".to_string()
    }
}

fn mark_fail(use_color: bool) -> String {
    if use_color {
        "✗".red().to_string()
    } else {
        "FAIL".to_string()
    }
}

fn seconds(elapsed: Duration) -> String {
    format!("{:.1}s", elapsed.as_secs_f64())
}

/// Renders the per-provider outcome of a run.
pub fn format_summary(summary: &RunSummary, use_color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\nEmbedded {} rows into {}",
        colorize_count(summary.corpus_rows, use_color),
        colorize_path(&summary.output_dir.display().to_string(), use_color)
    );

    for result in &summary.results {
        let name = colorize_name(&result.provider, use_color);
        let _ = match &result.outcome {
            ProviderOutcome::Completed(report) => {
                let resumed = if report.resumed_from > 0 {
                    format!(", resumed at {}", report.resumed_from)
                } else {
                    String::new()
                };
                writeln!(
                    out,
                    "  {} {} {} x {} in {}{} -> {}",
                    mark_ok(use_color),
                    name,
                    colorize_count(report.artifact.rows, use_color),
                    report.artifact.dim,
                    seconds(report.elapsed),
                    resumed,
                    colorize_path(&report.path().display().to_string(), use_color)
                )
            }
            ProviderOutcome::Skipped { path } => writeln!(
                out,
                "  {} {} already done ({}), use --force to redo",
                mark_skip(use_color),
                name,
                colorize_path(&path.display().to_string(), use_color)
            ),
            ProviderOutcome::Failed { error, elapsed } => writeln!(
                out,
                "  {} {} failed during {} after {}: {}",
                mark_fail(use_color),
                name,
                error.phase(),
                seconds(*elapsed),
                error
            ),
        };
    }

    let failures = summary.failures();
    if failures > 0 {
        let _ = writeln!(
            out,
            "\n{} of {} providers failed; re-run to resume from the last checkpoint",
            failures,
            summary.results.len()
        );
    }
    out
}

/// Renders what exists on disk for each provider.
pub fn format_status(report: &StatusReport, use_color: bool) -> String {
    let mut out = String::new();
    let total = report
        .corpus_rows
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string());
    let _ = writeln!(
        out,
        "Output: {} (corpus: {} rows)",
        colorize_path(&report.output_dir.display().to_string(), use_color),
        total
    );

    for (provider, status) in &report.providers {
        let name = colorize_name(provider, use_color);
        let _ = match status {
            ProviderStatus::Complete { rows, dim } => writeln!(
                out,
                "  {} {} complete ({} x {})",
                mark_ok(use_color),
                name,
                colorize_count(*rows, use_color),
                dim
            ),
            ProviderStatus::Partial { rows } => writeln!(
                out,
                "  {} {} partial ({}/{})",
                mark_skip(use_color),
                name,
                colorize_count(*rows, use_color),
                total
            ),
            ProviderStatus::Missing => writeln!(out, "  {} {} missing", mark_fail(use_color), name),
        };
    }
    out
}
