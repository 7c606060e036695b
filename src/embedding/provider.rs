// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding backend interface.
//!
//! A backend turns texts into vectors. Backends differ in lifecycle: a local
//! model pays its load cost in [`EmbeddingBackend::prepare`], a remote service
//! uses it for a warm-up call, and both then serve any number of batches.

use anyhow::{bail, Result};

use crate::config::{BackendKind, ProviderDescriptor};
use crate::embedding::{DummyBackend, LocalBackend, RemoteBackend};
use crate::progress::ProgressSink;

/// Trait for embedding backends.
pub trait EmbeddingBackend: Send {
    /// Returns the model identifier.
    fn model_id(&self) -> &str;

    /// Whether `embed_batch` reports progress per text itself. Backends that
    /// return `false` are credited per batch by the caller.
    fn reports_per_text(&self) -> bool {
        false
    }

    /// Makes the backend ready. Called once before the first batch.
    fn prepare(&mut self) -> Result<()>;

    /// Generates one embedding per input text, in input order.
    fn embed_batch(&mut self, texts: &[String], progress: &dyn ProgressSink) -> Result<Vec<Vec<f32>>>;
}

/// Builds the backend a provider descriptor selects. Construction is cheap;
/// model loading and network traffic happen in `prepare`.
pub fn build_backend(descriptor: &ProviderDescriptor) -> Result<Box<dyn EmbeddingBackend>> {
    let params = &descriptor.params;
    let backend: Box<dyn EmbeddingBackend> = match descriptor.kind {
        BackendKind::Local => Box::new(LocalBackend::new(
            params.huggingface_name(&descriptor.name),
            params.max_chars(),
            params.normalize(),
            params.cache_dir.clone(),
        )),
        BackendKind::Remote => Box::new(RemoteBackend::new(
            params.base_url(),
            params.model(&descriptor.name),
            params.timeout(),
            params.warmup_timeout(),
            params.max_retries(),
        )?),
        BackendKind::Dummy => Box::new(DummyBackend::new(params.dimension())),
    };
    Ok(backend)
}

/// Checks a batch returned by a backend.
///
/// Every vector must be non-empty and finite, there must be one vector per
/// input, and all vectors must share `expected_dim` when it is known.
pub fn validate_batch(
    vectors: &[Vec<f32>],
    expected_len: usize,
    expected_dim: Option<usize>,
) -> Result<()> {
    if vectors.len() != expected_len {
        bail!(
            "backend returned {} vectors for {} texts",
            vectors.len(),
            expected_len
        );
    }

    let dim = expected_dim.or_else(|| vectors.first().map(Vec::len));
    for (i, vector) in vectors.iter().enumerate() {
        if vector.is_empty() {
            bail!("backend returned an empty vector at batch offset {}", i);
        }
        if let Some(dim) = dim {
            if vector.len() != dim {
                bail!(
                    "dimension mismatch at batch offset {}: got {} expected {}",
                    i,
                    vector.len(),
                    dim
                );
            }
        }
        if vector.iter().any(|v| !v.is_finite()) {
            bail!("backend returned a non-finite value at batch offset {}", i);
        }
    }
    Ok(())
}

pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
