// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run coordinator - loads the corpus once and walks the configured providers.
//!
//! Providers run one after another. A provider whose final artifact already
//! exists is skipped without building its backend; a provider that fails is
//! recorded and the next one still runs.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::checkpoint::{CheckpointStore, ProviderStatus};
use crate::config::{Config, ProviderDescriptor};
use crate::corpus::{write_metadata_once, Corpus};
use crate::embedding::{build_backend, EmbeddingBackend};
use crate::errors::{Result, VectorizeError};
use crate::progress::ProgressSink;
use crate::runner::{BatchRunner, RunReport};

/// Per-invocation options from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only run the provider with this name
    pub model: Option<String>,
    /// Discard existing artifacts and start over
    pub force: bool,
    /// Overrides the configured batch size
    pub batch_size: Option<usize>,
}

#[derive(Debug)]
pub enum ProviderOutcome {
    Completed(RunReport),
    Skipped { path: PathBuf },
    Failed { error: VectorizeError, elapsed: Duration },
}

#[derive(Debug)]
pub struct ProviderResult {
    pub provider: String,
    pub outcome: ProviderOutcome,
}

/// Everything a run did, one entry per selected provider
#[derive(Debug)]
pub struct RunSummary {
    pub corpus_rows: usize,
    pub output_dir: PathBuf,
    pub metadata_written: bool,
    pub results: Vec<ProviderResult>,
}

impl RunSummary {
    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ProviderOutcome::Failed { .. }))
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failures() > 0
    }
}

/// On-disk state of every configured provider
#[derive(Debug)]
pub struct StatusReport {
    pub output_dir: PathBuf,
    /// `None` when the corpus could not be read
    pub corpus_rows: Option<usize>,
    pub providers: Vec<(String, ProviderStatus)>,
}

/// Runs the selected providers with backends from [`build_backend`].
pub fn run(config: &Config, options: &RunOptions, progress: &dyn ProgressSink) -> Result<RunSummary> {
    run_with(config, options, progress, build_backend)
}

/// Runs the selected providers, building backends with `factory`.
pub fn run_with<F>(
    config: &Config,
    options: &RunOptions,
    progress: &dyn ProgressSink,
    mut factory: F,
) -> Result<RunSummary>
where
    F: FnMut(&ProviderDescriptor) -> anyhow::Result<Box<dyn EmbeddingBackend>>,
{
    let batch_size = config
        .batch_size(options.batch_size)
        .map_err(|e| VectorizeError::Config(format!("{:#}", e)))?;
    let selected = select_providers(config, options.model.as_deref())?;

    let input = config.input_file();
    let corpus = Corpus::load(&input, config.text_column(), config.metadata_columns())
        .map_err(|source| VectorizeError::Corpus {
            path: input.clone(),
            source,
        })?;
    tracing::info!(rows = corpus.len(), input = %input.display(), "corpus loaded");

    let output_dir = config.output_dir();
    let output_err = |source: anyhow::Error| VectorizeError::Output {
        path: output_dir.clone(),
        source,
    };
    let store = CheckpointStore::open(&output_dir)
        .map_err(output_err)?
        .with_fingerprint(corpus.fingerprint());
    let metadata_written = write_metadata_once(&output_dir, &corpus.records).map_err(output_err)?;

    let runner = BatchRunner::new(&store, batch_size, progress);
    let mut results = Vec::with_capacity(selected.len());

    for descriptor in selected {
        let provider = descriptor.name.as_str();
        let outcome = run_provider(&store, &runner, descriptor, &corpus, options.force, &mut factory);
        if let ProviderOutcome::Failed { error, .. } = &outcome {
            tracing::error!(provider, phase = error.phase(), "provider failed: {}", error);
        }
        results.push(ProviderResult {
            provider: provider.to_string(),
            outcome,
        });
    }

    Ok(RunSummary {
        corpus_rows: corpus.len(),
        output_dir,
        metadata_written,
        results,
    })
}

fn run_provider<F>(
    store: &CheckpointStore,
    runner: &BatchRunner<'_>,
    descriptor: &ProviderDescriptor,
    corpus: &Corpus,
    force: bool,
    factory: &mut F,
) -> ProviderOutcome
where
    F: FnMut(&ProviderDescriptor) -> anyhow::Result<Box<dyn EmbeddingBackend>>,
{
    let provider = descriptor.name.as_str();
    let start = Instant::now();
    let failed = |error: VectorizeError| ProviderOutcome::Failed {
        error,
        elapsed: start.elapsed(),
    };

    if force {
        tracing::info!(provider, "forced run, discarding existing artifacts");
        if let Err(source) = store.discard(provider) {
            return failed(VectorizeError::Checkpoint {
                provider: provider.to_string(),
                source,
            });
        }
    } else if store.has_final(provider) {
        let path = store.final_path(provider);
        tracing::info!(provider, path = %path.display(), "final artifact exists, skipping");
        return ProviderOutcome::Skipped { path };
    }

    tracing::info!(provider, kind = descriptor.kind.as_str(), "running provider");
    let mut backend = match factory(descriptor) {
        Ok(backend) => backend,
        Err(source) => {
            return failed(VectorizeError::BackendUnavailable {
                provider: provider.to_string(),
                source,
            })
        }
    };

    match runner.run(provider, &corpus.texts, backend.as_mut()) {
        Ok(report) => ProviderOutcome::Completed(report),
        Err(error) => failed(error),
    }
}

fn select_providers<'c>(config: &'c Config, model: Option<&str>) -> Result<Vec<&'c ProviderDescriptor>> {
    match model {
        None => Ok(config.models().iter().collect()),
        Some(name) => match config.model(name) {
            Some(descriptor) => Ok(vec![descriptor]),
            None => {
                let available: Vec<&str> = config.models().iter().map(|m| m.name.as_str()).collect();
                Err(VectorizeError::Config(format!(
                    "unknown model '{}'; available: {}",
                    name,
                    available.join(", ")
                )))
            }
        },
    }
}

/// Reports artifacts on disk without embedding or writing anything.
pub fn status(config: &Config) -> StatusReport {
    let output_dir = config.output_dir();
    let store = CheckpointStore::new(&output_dir);

    let corpus_rows = match Corpus::load(&config.input_file(), config.text_column(), config.metadata_columns()) {
        Ok(corpus) => Some(corpus.len()),
        Err(err) => {
            tracing::warn!("cannot read corpus for status: {:#}", err);
            None
        }
    };

    let providers = config
        .models()
        .iter()
        .map(|m| (m.name.clone(), store.status(&m.name)))
        .collect();

    StatusReport {
        output_dir,
        corpus_rows,
        providers,
    }
}
