// SPDX-License-Identifier: MIT OR Apache-2.0

//! Input table loading and the shared metadata artifact.
//!
//! A corpus is read from a CSV file with a header row or from a JSON array of
//! records. The text column becomes the ordered, index-stable list of texts;
//! the metadata columns are kept row-aligned for `metadata.json`.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::utils::metadata_path;

/// Texts and row-aligned metadata records
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    /// Text to embed for every row; missing values are empty strings
    pub texts: Vec<String>,
    /// One record per row holding the configured metadata columns
    pub records: Vec<Map<String, Value>>,
}

impl Corpus {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// BLAKE3 over the texts in order; ties a checkpoint to this input set
    pub fn fingerprint(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.texts.len() as u64).to_le_bytes());
        for text in &self.texts {
            hasher.update(&(text.len() as u64).to_le_bytes());
            hasher.update(text.as_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    /// Load a corpus, picking the format from the file extension
    pub fn load(path: &Path, text_column: &str, metadata_columns: &[String]) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?;
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let corpus = if is_json {
            Self::from_json_str(content, text_column, metadata_columns)
        } else {
            Self::from_csv_str(content, text_column, metadata_columns)
        };
        corpus.with_context(|| format!("Failed to load corpus from {}", path.display()))
    }

    /// Parse CSV content with a header row
    pub fn from_csv_str(content: &str, text_column: &str, metadata_columns: &[String]) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers = reader.headers().context("Failed to read CSV header")?.clone();
        let position = |name: &str| headers.iter().position(|h| h.trim() == name);

        let text_idx = match position(text_column) {
            Some(idx) => idx,
            None => bail!("text column '{}' not found in input", text_column),
        };
        let mut meta_idx = Vec::with_capacity(metadata_columns.len());
        for column in metadata_columns {
            match position(column) {
                Some(idx) => meta_idx.push((column.clone(), idx)),
                None => bail!("metadata column '{}' not found in input", column),
            }
        }

        let mut corpus = Self::default();
        for (row, record) in reader.records().enumerate() {
            let record = record.with_context(|| format!("Failed to parse CSV row {}", row + 1))?;
            corpus
                .texts
                .push(record.get(text_idx).unwrap_or_default().to_string());

            let mut meta = Map::new();
            for (column, idx) in &meta_idx {
                meta.insert(column.clone(), infer_value(record.get(*idx).unwrap_or_default()));
            }
            corpus.records.push(meta);
        }
        Ok(corpus)
    }

    /// Parse a JSON array of objects
    pub fn from_json_str(content: &str, text_column: &str, metadata_columns: &[String]) -> Result<Self> {
        let rows: Vec<Map<String, Value>> =
            serde_json::from_str(content).context("Input JSON must be an array of objects")?;

        if !rows.is_empty() && !rows.iter().any(|r| r.contains_key(text_column)) {
            bail!("text column '{}' not found in input", text_column);
        }
        for column in metadata_columns {
            if !rows.is_empty() && !rows.iter().any(|r| r.contains_key(column)) {
                bail!("metadata column '{}' not found in input", column);
            }
        }

        let mut corpus = Self::default();
        for row in rows {
            let text = match row.get(text_column) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            corpus.texts.push(text);

            let meta = metadata_columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                .collect();
            corpus.records.push(meta);
        }
        Ok(corpus)
    }
}

/// CSV cells are untyped; keep numbers as numbers and empty cells as null.
fn infer_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

/// Write `metadata.json` unless it already exists.
///
/// Returns `true` when the file was written by this call. The file is written
/// to a temporary name first and moved into place without overwriting, so a
/// concurrent or earlier writer always wins.
pub fn write_metadata_once(output_dir: &Path, records: &[Map<String, Value>]) -> Result<bool> {
    let path = metadata_path(output_dir);
    if path.exists() {
        tracing::debug!(path = %path.display(), "metadata already present, leaving it alone");
        return Ok(false);
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let mut tmp = NamedTempFile::new_in(output_dir)
        .with_context(|| format!("Failed to create temp file in {}", output_dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, records).context("Failed to serialize metadata")?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(&path) {
        Ok(_) => Ok(true),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err.error)
            .with_context(|| format!("Failed to write metadata: {}", path.display())),
    }
}
