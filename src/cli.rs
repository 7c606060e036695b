// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// vectorize - Resumable batch embedding
///
/// Embeds one text column of a table with every configured model. Progress
/// is checkpointed per batch, so an interrupted run picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "vectorize")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./vectorize.toml, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed the corpus with every configured model
    Run {
        /// Only run the model with this name
        #[arg(short, long)]
        model: Option<String>,

        /// Discard existing vectors and checkpoints first
        #[arg(short, long)]
        force: bool,

        /// Texts per batch (overrides VECTORIZE_BATCH_SIZE and the config file)
        #[arg(short, long, value_parser = clap::value_parser!(usize))]
        batch_size: Option<usize>,

        /// No progress bars
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show which models are complete, partial or missing
    Status,

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
