// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote embedding backend for an Ollama-compatible HTTP service.
//!
//! The service is asked for one text per request. `prepare` sends a throwaway
//! text so that the server loads the model before the first real batch and so
//! that an unreachable server fails the provider immediately.

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::thread;
use std::time::Duration;

use super::provider::EmbeddingBackend;
use crate::progress::ProgressSink;

const WARMUP_TEXT: &str = "warm up";
const RETRY_BACKOFF_MS: u64 = 500;

/// Stateless HTTP backend, one request per text
pub struct RemoteBackend {
    base_url: String,
    model: String,
    timeout: Duration,
    warmup_timeout: Duration,
    max_retries: u32,
    client: Client,
}

impl RemoteBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
        warmup_timeout: Duration,
        max_retries: u32,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            warmup_timeout,
            max_retries,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url)
    }

    fn request(&self, text: &str, timeout: Duration) -> Result<Vec<f32>> {
        let payload = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(self.endpoint())
            .timeout(timeout)
            .json(&payload)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("request to {} timed out after {:?}", self.base_url, timeout)
                } else {
                    anyhow!(e).context(format!("HTTP request to {} failed", self.base_url))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("embedding service returned {}: {}", status, body.trim());
        }

        let body: Value = response
            .json()
            .context("Failed to parse embedding response as JSON")?;
        parse_embedding(&body)
    }

    /// Bounded retry for transport failures that are likely to be transient.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut attempt = 0;
        loop {
            match self.request(text, self.timeout) {
                Ok(vector) => return Ok(vector),
                Err(err) if attempt < self.max_retries && is_transient(&err) => {
                    attempt += 1;
                    tracing::warn!(
                        model = %self.model,
                        attempt,
                        max = self.max_retries,
                        error = %err,
                        "transient embedding failure, retrying"
                    );
                    thread::sleep(Duration::from_millis(RETRY_BACKOFF_MS * u64::from(attempt)));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl EmbeddingBackend for RemoteBackend {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn reports_per_text(&self) -> bool {
        true
    }

    fn prepare(&mut self) -> Result<()> {
        tracing::info!(model = %self.model, url = %self.base_url, "warming up remote model");
        self.request(WARMUP_TEXT, self.warmup_timeout)
            .with_context(|| format!("Warm-up for model {} failed", self.model))?;
        Ok(())
    }

    fn embed_batch(&mut self, texts: &[String], progress: &dyn ProgressSink) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_one(text)?);
            progress.advance(1);
        }
        Ok(vectors)
    }
}

fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|e| e.is_timeout() || e.is_connect())
            .unwrap_or(false)
    }) || err.to_string().contains("timed out")
}

/// Accepts both the `/api/embed` shape (`embeddings: [[..]]`) and the older
/// `/api/embeddings` shape (`embedding: [..]`).
fn parse_embedding(body: &Value) -> Result<Vec<f32>> {
    let row = if let Some(rows) = body.get("embeddings").and_then(Value::as_array) {
        rows.first()
            .ok_or_else(|| anyhow!("response contains no embeddings"))?
    } else if let Some(row) = body.get("embedding") {
        row
    } else if let Some(err) = body.get("error").and_then(Value::as_str) {
        bail!("embedding service error: {}", err);
    } else {
        bail!("response is missing an 'embeddings' field");
    };

    row.as_array()
        .ok_or_else(|| anyhow!("embedding must be a JSON array"))?
        .iter()
        .map(|value| {
            value
                .as_f64()
                .ok_or_else(|| anyhow!("embedding value must be a number"))
                .map(|v| v as f32)
        })
        .collect()
}
