// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output naming helpers for vectorize
//!
//! Every artifact name is derived from the provider name alone, so the
//! functions here are pure and can be called from anywhere.

use std::path::{Path, PathBuf};

/// Shared metadata artifact, one per output directory
pub const METADATA_FILE: &str = "metadata.json";

/// Suffix that marks the in-progress checkpoint of a provider
pub const PARTIAL_SUFFIX: &str = ".tmp";

/// Turn a provider name into a string that is safe as a file name component.
///
/// `/` becomes `__` so that `org/model` stays distinguishable from
/// `org_model`; `.` becomes `_`; any other character that is unsafe on common
/// filesystems becomes `_`.
pub fn safe_model_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        match ch {
            '/' => out.push_str("__"),
            '.' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            c if c.is_whitespace() || c.is_control() => out.push('_'),
            c => out.push(c),
        }
    }
    out
}

/// File name of the final vector artifact for a provider
pub fn vector_file_name(provider: &str) -> String {
    format!("vectors_{}.npy", safe_model_name(provider))
}

/// File name of the partial (resumable) artifact for a provider
pub fn partial_file_name(provider: &str) -> String {
    format!("{}{}", vector_file_name(provider), PARTIAL_SUFFIX)
}

/// Path of the final vector artifact inside `output_dir`
pub fn vector_path(output_dir: impl AsRef<Path>, provider: &str) -> PathBuf {
    output_dir.as_ref().join(vector_file_name(provider))
}

/// Path of the partial artifact inside `output_dir`
pub fn partial_path(output_dir: impl AsRef<Path>, provider: &str) -> PathBuf {
    output_dir.as_ref().join(partial_file_name(provider))
}

/// Path of the shared metadata artifact inside `output_dir`
pub fn metadata_path(output_dir: impl AsRef<Path>) -> PathBuf {
    output_dir.as_ref().join(METADATA_FILE)
}
