// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for the embedding engine.
//!
//! Every variant that carries a `provider` is scoped to that provider: the
//! coordinator records it and moves on to the next provider.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorizeError {
    /// The backend could not be constructed or failed its `prepare` step.
    #[error("provider '{provider}' is unavailable: {source:#}")]
    BackendUnavailable {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    /// A batch failed to embed; the checkpoint keeps every earlier batch.
    #[error("provider '{provider}' failed to embed rows {batch_start}..{end}: {source:#}", end = .batch_start + .batch_len)]
    Embed {
        provider: String,
        batch_start: usize,
        batch_len: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Partial state could not be trusted. Only ever logged by the store.
    #[error("checkpoint {} is corrupt: {reason}", path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    /// The rename onto the final artifact failed and no final artifact exists.
    #[error("provider '{provider}' could not be finalized: {source}")]
    FinalizeConflict {
        provider: String,
        #[source]
        source: std::io::Error,
    },

    /// Any other checkpoint I/O failure.
    #[error("checkpoint for provider '{provider}' failed: {source:#}")]
    Checkpoint {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The output directory or the shared metadata could not be written.
    #[error("failed to prepare output {}: {source:#}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The input corpus could not be loaded; no provider can run.
    #[error("failed to load corpus {}: {source:#}", path.display())]
    Corpus {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl VectorizeError {
    /// Short label of the phase the error belongs to.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::BackendUnavailable { .. } => "prepare",
            Self::Embed { .. } => "embed",
            Self::CheckpointCorrupt { .. } => "resume",
            Self::FinalizeConflict { .. } => "finalize",
            Self::Checkpoint { .. } => "checkpoint",
            Self::Config(_) => "config",
            Self::Corpus { .. } => "corpus",
            Self::Output { .. } => "output",
        }
    }
}

pub type Result<T> = std::result::Result<T, VectorizeError>;
