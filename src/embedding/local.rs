// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process embedding backend built on fastembed (ONNX runtime).

use anyhow::{anyhow, Context, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::borrow::Cow;
use std::path::PathBuf;

use super::provider::{l2_normalize, EmbeddingBackend};
use crate::progress::ProgressSink;

/// Model loaded once per run and fed whole batches.
pub struct LocalBackend {
    model_name: String,
    max_chars: usize,
    normalize: bool,
    cache_dir: Option<PathBuf>,
    embedder: Option<TextEmbedding>,
}

impl LocalBackend {
    pub fn new(
        model_name: impl Into<String>,
        max_chars: usize,
        normalize: bool,
        cache_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            max_chars,
            normalize,
            cache_dir,
            embedder: None,
        }
    }
}

impl EmbeddingBackend for LocalBackend {
    fn model_id(&self) -> &str {
        &self.model_name
    }

    fn prepare(&mut self) -> Result<()> {
        if self.embedder.is_some() {
            return Ok(());
        }

        let model = resolve_model(&self.model_name)?;
        tracing::info!(model = %self.model_name, "loading local embedding model");

        let mut init = InitOptions::new(model).with_show_download_progress(true);
        if let Some(dir) = &self.cache_dir {
            init = init.with_cache_dir(dir.clone());
        }
        let embedder = TextEmbedding::try_new(init)
            .with_context(|| format!("Failed to initialize fastembed model {}", self.model_name))?;

        self.embedder = Some(embedder);
        Ok(())
    }

    fn embed_batch(&mut self, texts: &[String], _progress: &dyn ProgressSink) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embedder = self
            .embedder
            .as_mut()
            .ok_or_else(|| anyhow!("local model {} is not loaded", self.model_name))?;

        let prepared = truncate_texts(texts, self.max_chars);
        let mut embeddings = embedder.embed(&prepared, Some(texts.len()))?;

        if self.normalize {
            for embedding in embeddings.iter_mut() {
                l2_normalize(embedding);
            }
        }

        Ok(embeddings)
    }
}

/// Maps a model identifier (e.g. a Hugging Face repo name) onto a fastembed
/// model. Matching ignores case and, failing an exact hit, the organisation
/// prefix, so `intfloat/multilingual-e5-large` and `multilingual-e5-large`
/// resolve the same way.
fn resolve_model(name: &str) -> Result<EmbeddingModel> {
    let wanted = name.trim().to_lowercase();
    if matches!(
        wanted.as_str(),
        "minilm" | "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2"
    ) {
        return Ok(EmbeddingModel::AllMiniLML6V2);
    }

    let supported = TextEmbedding::list_supported_models();
    if let Some(info) = supported
        .iter()
        .find(|info| info.model_code.to_lowercase() == wanted)
    {
        return Ok(info.model.clone());
    }

    let short = short_name(&wanted);
    supported
        .iter()
        .find(|info| short_name(&info.model_code.to_lowercase()) == short)
        .map(|info| info.model.clone())
        .ok_or_else(|| anyhow!("Unsupported local model '{}'", name))
}

fn short_name(code: &str) -> &str {
    code.rsplit('/').next().unwrap_or(code)
}

fn truncate_texts(texts: &[String], max_chars: usize) -> Vec<Cow<'_, str>> {
    texts
        .iter()
        .map(|text| truncate_to_chars(text.as_str(), max_chars))
        .collect()
}

fn truncate_to_chars(input: &str, max_chars: usize) -> Cow<'_, str> {
    if max_chars == 0 {
        return Cow::Borrowed("");
    }

    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(input[..idx].to_string()),
        None => Cow::Borrowed(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;

    #[test]
    fn truncate_counts_chars_not_bytes() {
        assert_eq!(truncate_to_chars("hello", 2), Cow::<str>::Owned("he".to_string()));
        assert_eq!(truncate_to_chars("hello", 5), Cow::Borrowed("hello"));
        assert_eq!(truncate_to_chars("日本語テキスト", 3), Cow::<str>::Owned("日本語".to_string()));
    }

    #[test]
    fn short_name_drops_org() {
        assert_eq!(short_name("intfloat/multilingual-e5-large"), "multilingual-e5-large");
        assert_eq!(short_name("plain"), "plain");
    }

    #[test]
    fn resolves_alias_and_rejects_unknown() {
        assert!(matches!(
            resolve_model("MiniLM").unwrap(),
            EmbeddingModel::AllMiniLML6V2
        ));
        assert!(resolve_model("no-such-model-anywhere").is_err());
    }

    #[test]
    fn embed_before_prepare_fails() {
        let mut backend = LocalBackend::new("minilm", 100, false, None);
        let err = backend
            .embed_batch(&["x".to_string()], &SilentProgress)
            .unwrap_err();
        assert!(err.to_string().contains("not loaded"));
    }
}
