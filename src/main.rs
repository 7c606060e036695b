// SPDX-License-Identifier: MIT OR Apache-2.0

//! vectorize - Resumable batch embedding
//!
//! Turns a text column into one vector file per configured model, with
//! per-batch checkpoints so interrupted runs resume instead of restarting.

mod cli;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use vectorize::config::Config;
use vectorize::coordinator::{self, RunOptions};
use vectorize::output::{format_status, format_summary, use_colors};
use vectorize::progress::{ProgressSink, SilentProgress, TerminalProgress};

fn main() -> Result<ExitCode> {
    // Initialize tracing with VECTORIZE_LOG env var (e.g., VECTORIZE_LOG=debug vectorize run)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VECTORIZE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            model,
            force,
            batch_size,
            quiet,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            let options = RunOptions {
                model,
                force,
                batch_size,
            };
            let progress: Box<dyn ProgressSink> = if quiet {
                Box::new(SilentProgress)
            } else {
                Box::new(TerminalProgress::new())
            };

            let summary = coordinator::run(&config, &options, progress.as_ref())?;
            print!("{}", format_summary(&summary, use_colors()));
            if summary.has_failures() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status => {
            let config = Config::load(cli.config.as_deref())?;
            let report = coordinator::status(&config);
            print!("{}", format_status(&report, use_colors()));
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "vectorize", &mut std::io::stdout());
        }
    }

    Ok(ExitCode::SUCCESS)
}
