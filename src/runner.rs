// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch runner - drives one provider from its checkpoint to a final artifact.
//!
//! ```text
//! Resuming -> Embedding -> Finalizing -> Done
//!     |           |
//!     +-----------+-> Failed
//! ```
//!
//! Each batch is embedded, validated, then appended to the checkpoint before
//! the next one starts. Whatever happens, the checkpoint holds a prefix of
//! the corpus made of whole batches.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::checkpoint::{CheckpointStore, FinalArtifact};
use crate::embedding::{validate_batch, EmbeddingBackend};
use crate::errors::{Result, VectorizeError};
use crate::progress::ProgressSink;

/// Lifecycle of one provider run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Resuming,
    Embedding,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Resuming => "resuming",
            Self::Embedding => "embedding",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome of a completed provider run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub provider: String,
    /// Corpus size
    pub total: usize,
    /// Rows already in the checkpoint when the run started
    pub resumed_from: usize,
    /// Rows embedded by this run
    pub embedded: usize,
    /// Backend calls made by this run
    pub batches: usize,
    pub elapsed: Duration,
    pub artifact: FinalArtifact,
}

impl RunReport {
    pub fn path(&self) -> &Path {
        &self.artifact.path
    }
}

pub struct BatchRunner<'a> {
    store: &'a CheckpointStore,
    batch_size: usize,
    progress: &'a dyn ProgressSink,
}

impl<'a> BatchRunner<'a> {
    /// `batch_size` of zero is treated as one.
    pub fn new(store: &'a CheckpointStore, batch_size: usize, progress: &'a dyn ProgressSink) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            progress,
        }
    }

    /// Embeds `texts[k..]` where `k` is the checkpointed prefix, then finalizes.
    pub fn run(
        &self,
        provider: &str,
        texts: &[String],
        backend: &mut dyn EmbeddingBackend,
    ) -> Result<RunReport> {
        let start = Instant::now();
        let total = texts.len();
        let mut state = RunState::Resuming;
        tracing::debug!(provider, %state, total, "starting provider run");

        let mut checkpoint = self.store.load(provider);
        if checkpoint.len() > total {
            tracing::error!(
                provider,
                checkpoint_rows = checkpoint.len(),
                total,
                "checkpoint is longer than the corpus; discarding it and re-embedding from the first row"
            );
            self.store
                .discard_partial(provider)
                .map_err(|source| VectorizeError::Checkpoint {
                    provider: provider.to_string(),
                    source,
                })?;
            checkpoint = Default::default();
        }
        let resumed_from = checkpoint.len();
        if resumed_from > 0 {
            tracing::info!(provider, resumed_from, total, "resuming from checkpoint");
        }

        self.progress.start(provider, total as u64, resumed_from as u64);
        let mut embedded = 0;
        let mut batches = 0;

        if resumed_from < total {
            state = RunState::Embedding;
            tracing::debug!(provider, %state, remaining = total - resumed_from, "preparing backend");

            if let Err(source) = backend.prepare() {
                return Err(self.fail(provider, VectorizeError::BackendUnavailable {
                    provider: provider.to_string(),
                    source,
                }));
            }

            let per_text = backend.reports_per_text();
            let mut dim = checkpoint.dim;
            let mut batch_start = resumed_from;
            for batch in texts[resumed_from..].chunks(self.batch_size) {
                let embed_err = |source: anyhow::Error| VectorizeError::Embed {
                    provider: provider.to_string(),
                    batch_start,
                    batch_len: batch.len(),
                    source,
                };

                let vectors = match backend
                    .embed_batch(batch, self.progress)
                    .and_then(|vectors| validate_batch(&vectors, batch.len(), dim).map(|_| vectors))
                {
                    Ok(vectors) => vectors,
                    Err(source) => return Err(self.fail(provider, embed_err(source))),
                };
                batches += 1;

                if let Err(source) = self.store.append(provider, &vectors) {
                    return Err(self.fail(provider, VectorizeError::Checkpoint {
                        provider: provider.to_string(),
                        source,
                    }));
                }
                dim = dim.or_else(|| vectors.first().map(Vec::len));
                if !per_text {
                    self.progress.advance(batch.len() as u64);
                }

                embedded += batch.len();
                batch_start += batch.len();
                tracing::debug!(provider, done = batch_start, total, "batch checkpointed");
            }
        }

        state = RunState::Finalizing;
        tracing::debug!(provider, %state, "finalizing");
        let artifact = match self.store.finalize(provider, total) {
            Ok(artifact) => artifact,
            Err(err) => return Err(self.fail(provider, err)),
        };

        state = RunState::Done;
        let elapsed = start.elapsed();
        tracing::info!(
            provider,
            %state,
            rows = artifact.rows,
            dim = artifact.dim,
            embedded,
            elapsed_ms = elapsed.as_millis() as u64,
            "provider complete"
        );
        self.progress.finish(&format!("{} done", provider));

        Ok(RunReport {
            provider: provider.to_string(),
            total,
            resumed_from,
            embedded,
            batches,
            elapsed,
            artifact,
        })
    }

    fn fail(&self, provider: &str, err: VectorizeError) -> VectorizeError {
        tracing::warn!(provider, state = %RunState::Failed, phase = err.phase(), "{}", err);
        self.progress.abandon(&format!("{} failed", provider));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DummyBackend;
    use crate::progress::testing::RecordingProgress;
    use crate::progress::SilentProgress;
    use anyhow::{anyhow, Result as AnyResult};
    use tempfile::TempDir;

    /// Dummy vectors with knobs for failures and call accounting.
    struct ScriptedBackend {
        inner: DummyBackend,
        prepared: usize,
        calls: Vec<Vec<String>>,
        fail_on_call: Option<usize>,
        fail_prepare: bool,
        malformed_on_call: Option<usize>,
        per_text: bool,
    }

    impl ScriptedBackend {
        fn new() -> Self {
            Self {
                inner: DummyBackend::new(4),
                prepared: 0,
                calls: Vec::new(),
                fail_on_call: None,
                fail_prepare: false,
                malformed_on_call: None,
                per_text: false,
            }
        }

        fn failing_on(call: usize) -> Self {
            Self {
                fail_on_call: Some(call),
                ..Self::new()
            }
        }
    }

    impl EmbeddingBackend for ScriptedBackend {
        fn model_id(&self) -> &str {
            "scripted"
        }

        fn reports_per_text(&self) -> bool {
            self.per_text
        }

        fn prepare(&mut self) -> AnyResult<()> {
            self.prepared += 1;
            if self.fail_prepare {
                return Err(anyhow!("service unreachable"));
            }
            Ok(())
        }

        fn embed_batch(&mut self, texts: &[String], progress: &dyn ProgressSink) -> AnyResult<Vec<Vec<f32>>> {
            let call = self.calls.len();
            self.calls.push(texts.to_vec());
            if self.fail_on_call == Some(call) {
                return Err(anyhow!("boom on call {}", call));
            }
            let mut vectors = Vec::new();
            for text in texts {
                vectors.push(self.inner.vector_for(text));
                if self.per_text {
                    progress.advance(1);
                }
            }
            if self.malformed_on_call == Some(call) {
                vectors[0] = Vec::new();
            }
            Ok(vectors)
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn expected(items: &[String]) -> Vec<Vec<f32>> {
        let dummy = DummyBackend::new(4);
        items.iter().map(|t| dummy.vector_for(t)).collect()
    }

    fn setup() -> (TempDir, CheckpointStore) {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn fresh_run_produces_final_artifact() {
        let (_dir, store) = setup();
        let corpus = texts(&["a", "b", "c", "d", "e"]);
        let mut backend = ScriptedBackend::new();

        let report = BatchRunner::new(&store, 2, &SilentProgress)
            .run("p", &corpus, &mut backend)
            .unwrap();

        assert_eq!(report.total, 5);
        assert_eq!(report.resumed_from, 0);
        assert_eq!(report.embedded, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(backend.prepared, 1);
        assert_eq!(store.read_final("p").unwrap(), expected(&corpus));
        assert!(!store.partial_path("p").exists());
    }

    #[test]
    fn resumes_after_failed_second_batch() {
        let (_dir, store) = setup();
        let corpus = texts(&["t0", "t1", "t2", "t3"]);

        let mut failing = ScriptedBackend::failing_on(1);
        let err = BatchRunner::new(&store, 2, &SilentProgress)
            .run("p", &corpus, &mut failing)
            .unwrap_err();
        match err {
            VectorizeError::Embed {
                batch_start,
                batch_len,
                ..
            } => {
                assert_eq!(batch_start, 2);
                assert_eq!(batch_len, 2);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(store.load("p").vectors, expected(&corpus[..2]));
        assert!(!store.has_final("p"));

        let mut backend = ScriptedBackend::new();
        let report = BatchRunner::new(&store, 2, &SilentProgress)
            .run("p", &corpus, &mut backend)
            .unwrap();
        assert_eq!(report.resumed_from, 2);
        assert_eq!(report.embedded, 2);
        assert_eq!(backend.calls, vec![texts(&["t2", "t3"])]);
        assert_eq!(store.read_final("p").unwrap(), expected(&corpus));
    }

    #[test]
    fn checkpoint_is_whole_batch_prefix_at_every_failure_point() {
        let corpus: Vec<String> = (0..7).map(|i| format!("text {}", i)).collect();
        let batch_size = 2;
        let batch_count = corpus.len().div_ceil(batch_size);

        for fail_at in 0..batch_count {
            let (_dir, store) = setup();
            let mut failing = ScriptedBackend::failing_on(fail_at);
            assert!(BatchRunner::new(&store, batch_size, &SilentProgress)
                .run("p", &corpus, &mut failing)
                .is_err());

            let done = fail_at * batch_size;
            assert_eq!(store.load("p").vectors, expected(&corpus[..done]), "fail_at={}", fail_at);

            let mut backend = ScriptedBackend::new();
            let report = BatchRunner::new(&store, batch_size, &SilentProgress)
                .run("p", &corpus, &mut backend)
                .unwrap();
            assert_eq!(report.resumed_from, done);
            assert_eq!(store.read_final("p").unwrap(), expected(&corpus), "fail_at={}", fail_at);
        }
    }

    #[test]
    fn malformed_batch_is_not_checkpointed() {
        let (_dir, store) = setup();
        let corpus = texts(&["a", "b", "c", "d"]);
        let mut backend = ScriptedBackend {
            malformed_on_call: Some(1),
            ..ScriptedBackend::new()
        };

        let err = BatchRunner::new(&store, 2, &SilentProgress)
            .run("p", &corpus, &mut backend)
            .unwrap_err();
        assert!(matches!(err, VectorizeError::Embed { batch_start: 2, .. }));
        assert_eq!(store.load("p").len(), 2);
    }

    #[test]
    fn empty_corpus_finalizes_without_backend() {
        let (_dir, store) = setup();
        let mut backend = ScriptedBackend::new();

        let report = BatchRunner::new(&store, 8, &SilentProgress)
            .run("p", &[], &mut backend)
            .unwrap();
        assert_eq!(report.artifact.rows, 0);
        assert_eq!(backend.prepared, 0);
        assert!(backend.calls.is_empty());
        assert!(store.has_final("p"));
    }

    #[test]
    fn complete_checkpoint_skips_prepare() {
        let (_dir, store) = setup();
        let corpus = texts(&["a", "b"]);
        store.append("p", &expected(&corpus)).unwrap();

        let mut backend = ScriptedBackend::new();
        let report = BatchRunner::new(&store, 8, &SilentProgress)
            .run("p", &corpus, &mut backend)
            .unwrap();
        assert_eq!(report.embedded, 0);
        assert_eq!(backend.prepared, 0);
        assert!(backend.calls.is_empty());
        assert_eq!(store.read_final("p").unwrap(), expected(&corpus));
    }

    #[test]
    fn oversized_checkpoint_restarts() {
        let (_dir, store) = setup();
        let corpus = texts(&["a", "b"]);
        store
            .append("p", &expected(&texts(&["x", "y", "z"])))
            .unwrap();

        let mut backend = ScriptedBackend::new();
        let report = BatchRunner::new(&store, 8, &SilentProgress)
            .run("p", &corpus, &mut backend)
            .unwrap();
        assert_eq!(report.resumed_from, 0);
        assert_eq!(store.read_final("p").unwrap(), expected(&corpus));
    }

    #[test]
    fn prepare_failure_is_backend_unavailable() {
        let (_dir, store) = setup();
        let mut backend = ScriptedBackend {
            fail_prepare: true,
            ..ScriptedBackend::new()
        };
        let progress = RecordingProgress::default();

        let err = BatchRunner::new(&store, 2, &progress)
            .run("p", &texts(&["a"]), &mut backend)
            .unwrap_err();
        assert!(matches!(err, VectorizeError::BackendUnavailable { .. }));
        assert!(backend.calls.is_empty());
        assert!(!store.partial_path("p").exists());
        assert_eq!(progress.events().last().map(String::as_str), Some("abandon"));
    }

    #[test]
    fn progress_counts_each_text_once() {
        let corpus = texts(&["a", "b", "c"]);

        for per_text in [false, true] {
            let (_dir, store) = setup();
            let progress = RecordingProgress::default();
            let mut backend = ScriptedBackend {
                per_text,
                ..ScriptedBackend::new()
            };
            BatchRunner::new(&store, 2, &progress)
                .run("p", &corpus, &mut backend)
                .unwrap();

            let events = progress.events();
            assert_eq!(events.first().map(String::as_str), Some("start:p:3:0"));
            assert_eq!(events.last().map(String::as_str), Some("finish"));
            assert_eq!(progress.advanced(), 3);
        }
    }

    #[test]
    fn zero_batch_size_means_one() {
        let (_dir, store) = setup();
        let mut backend = ScriptedBackend::new();
        let report = BatchRunner::new(&store, 0, &SilentProgress)
            .run("p", &texts(&["a", "b"]), &mut backend)
            .unwrap();
        assert_eq!(report.batches, 2);
    }
}
