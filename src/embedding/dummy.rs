// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deterministic backend that needs neither a model nor a network.

use anyhow::Result;

use super::provider::EmbeddingBackend;
use crate::progress::ProgressSink;

/// Dummy backend that derives vectors from a BLAKE3 hash of each text.
pub struct DummyBackend {
    model: String,
    dimension: usize,
}

impl DummyBackend {
    /// Creates a new dummy backend with specified dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            model: "dummy".to_string(),
            dimension,
        }
    }

    /// Same text, same vector. Values lie in [-1, 1].
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut bytes = vec![0u8; self.dimension * 2];
        blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof()
            .fill(&mut bytes);

        bytes
            .chunks_exact(2)
            .map(|pair| {
                let raw = u16::from_le_bytes([pair[0], pair[1]]);
                (f32::from(raw) / f32::from(u16::MAX)) * 2.0 - 1.0
            })
            .collect()
    }
}

impl EmbeddingBackend for DummyBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn embed_batch(&mut self, texts: &[String], _progress: &dyn ProgressSink) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}
