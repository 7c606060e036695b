// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for vectorize
//!
//! Loads configuration from an explicit path, `vectorize.toml` in the current
//! directory, or `<config dir>/vectorize/config.toml`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{safe_model_name, vector_file_name};

/// Config file looked up in the current directory
pub const LOCAL_CONFIG_FILE: &str = "vectorize.toml";

/// Environment variable overriding the batch size from the config file
pub const BATCH_SIZE_ENV: &str = "VECTORIZE_BATCH_SIZE";

const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_OUTPUT_DIR: &str = "output";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_WARMUP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_LOCAL_MAX_CHARS: usize = 2000;
const DEFAULT_DUMMY_DIMENSION: usize = 8;

/// Which kind of backend a provider uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Model loaded into this process
    #[serde(alias = "sentence-transformers", alias = "fastembed")]
    Local,
    /// Embedding service reached over HTTP
    #[serde(alias = "ollama")]
    Remote,
    /// Deterministic hash-derived vectors, no model
    Dummy,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Dummy => "dummy",
        }
    }
}

/// One embedding provider: a name plus the backend it selects
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique name, used for output naming
    pub name: String,
    /// Backend kind (`type` in the config file)
    #[serde(rename = "type", alias = "kind")]
    pub kind: BackendKind,
    /// Backend parameters, all optional
    #[serde(flatten)]
    pub params: BackendParams,
}

impl ProviderDescriptor {
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            params: BackendParams::default(),
        }
    }
}

/// Backend parameters
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendParams {
    /// Model identifier for local backends
    pub huggingface_name: Option<String>,
    /// Model identifier for remote backends
    pub model: Option<String>,
    /// Base URL of the remote service
    pub base_url: Option<String>,
    /// Per-request timeout in seconds
    pub timeout: Option<u64>,
    /// Timeout for the warm-up request in seconds
    pub warmup_timeout: Option<u64>,
    /// Retries for transient transport errors, per text
    pub max_retries: Option<u32>,
    /// Truncate input texts to this many characters
    pub max_chars: Option<usize>,
    /// L2-normalize output vectors
    pub normalize: Option<bool>,
    /// Model download cache directory
    pub cache_dir: Option<PathBuf>,
    /// Vector dimension of the dummy backend
    pub dimension: Option<usize>,
}

impl BackendParams {
    /// Get the local model identifier (defaults to the provider name)
    pub fn huggingface_name<'a>(&'a self, provider: &'a str) -> &'a str {
        self.huggingface_name.as_deref().unwrap_or(provider)
    }

    /// Get the remote model identifier (defaults to the provider name)
    pub fn model<'a>(&'a self, provider: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(provider)
    }

    /// Get base URL (defaults to $OLLAMA_HOST, then localhost:11434)
    pub fn base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.clone();
        }
        match env::var("OLLAMA_HOST") {
            Ok(host) if !host.trim().is_empty() => normalize_host(host.trim()),
            _ => DEFAULT_OLLAMA_URL.to_string(),
        }
    }

    /// Get request timeout (defaults to 120s)
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_REMOTE_TIMEOUT_SECS))
    }

    /// Get warm-up timeout (defaults to 300s, never shorter than the request timeout)
    pub fn warmup_timeout(&self) -> Duration {
        let secs = self.warmup_timeout.unwrap_or(DEFAULT_WARMUP_TIMEOUT_SECS);
        Duration::from_secs(secs).max(self.timeout())
    }

    /// Get retry count (defaults to 0)
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(0)
    }

    /// Get max chars (defaults to 2000)
    pub fn max_chars(&self) -> usize {
        match self.max_chars {
            Some(0) | None => DEFAULT_LOCAL_MAX_CHARS,
            Some(n) => n,
        }
    }

    /// Get normalize flag (defaults to false)
    pub fn normalize(&self) -> bool {
        self.normalize.unwrap_or(false)
    }

    /// Get dummy dimension (defaults to 8)
    pub fn dimension(&self) -> usize {
        match self.dimension {
            Some(0) | None => DEFAULT_DUMMY_DIMENSION,
            Some(n) => n,
        }
    }
}

/// `OLLAMA_HOST` may be given without a scheme, e.g. `0.0.0.0:11434`
fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    }
}

/// Configuration loaded from a TOML file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input table (CSV or JSON records)
    pub input_file: Option<PathBuf>,
    /// Column holding the texts to embed
    pub text_column: Option<String>,
    /// Columns copied into metadata.json
    pub metadata_columns: Vec<String>,
    /// Directory receiving vector and metadata artifacts
    pub output_dir: Option<PathBuf>,
    /// Texts per batch
    pub batch_size: Option<usize>,
    /// Providers, processed in order
    pub models: Vec<ProviderDescriptor>,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Config {
    /// Load configuration
    ///
    /// Precedence (highest to lowest):
    /// 1. explicit path
    /// 2. vectorize.toml in current directory
    /// 3. <config dir>/vectorize/config.toml
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Self::load_from_path(&local);
        }

        if let Some(dir) = dirs::config_dir() {
            let path = dir.join("vectorize").join("config.toml");
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        bail!(
            "No configuration found. Create {} or pass --config <path>",
            LOCAL_CONFIG_FILE
        )
    }

    /// Load and validate a config file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.base_dir = base_dir;
        Ok(config)
    }

    /// Parse and validate config from a TOML string. Paths stay relative to
    /// the current directory.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.input_file.is_none() {
            bail!("'input_file' is required");
        }
        if self.text_column.as_deref().map_or(true, str::is_empty) {
            bail!("'text_column' is required");
        }
        if self.batch_size == Some(0) {
            bail!("'batch_size' must be a positive integer");
        }
        if self.models.is_empty() {
            bail!("at least one [[models]] entry is required");
        }

        // Providers must not share artifact files.
        let mut seen: HashMap<String, &str> = HashMap::new();
        for model in &self.models {
            if model.name.trim().is_empty() {
                bail!("model entries need a non-empty 'name'");
            }
            if let Some(other) = seen.insert(safe_model_name(&model.name), &model.name) {
                if other == model.name {
                    bail!("duplicate model name '{}'", model.name);
                }
                bail!(
                    "model names '{}' and '{}' map to the same output file {}",
                    other,
                    model.name,
                    vector_file_name(&model.name)
                );
            }
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Get input file, resolved against the config directory
    pub fn input_file(&self) -> PathBuf {
        // validate() guarantees presence
        self.resolve(self.input_file.as_deref().unwrap_or(Path::new("")))
    }

    /// Get text column
    pub fn text_column(&self) -> &str {
        self.text_column.as_deref().unwrap_or_default()
    }

    /// Get metadata columns
    pub fn metadata_columns(&self) -> &[String] {
        &self.metadata_columns
    }

    /// Get output directory (defaults to "output")
    pub fn output_dir(&self) -> PathBuf {
        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        self.resolve(&dir)
    }

    /// Merge batch size sources (CLI wins, then environment, then file)
    pub fn batch_size(&self, cli_value: Option<usize>) -> Result<usize> {
        let value = match cli_value {
            Some(v) => v,
            None => match parse_usize_env(BATCH_SIZE_ENV)? {
                Some(v) => v,
                None => self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            },
        };
        if value == 0 {
            bail!("batch size must be a positive integer");
        }
        Ok(value)
    }

    /// Get providers
    pub fn models(&self) -> &[ProviderDescriptor] {
        &self.models
    }

    /// Find a provider by name
    pub fn model(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.models.iter().find(|m| m.name == name)
    }
}

fn parse_usize_env(name: &str) -> Result<Option<usize>> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim();
            if value.is_empty() {
                Ok(None)
            } else {
                value
                    .parse::<usize>()
                    .map(Some)
                    .with_context(|| format!("Invalid {} value: {}", name, value))
            }
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", name)),
    }
}
