// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding module - pluggable backends that turn texts into vectors
//!
//! Three backends share one trait: a local fastembed model, a remote
//! Ollama-compatible service, and a deterministic dummy used for smoke runs.

pub mod dummy;
pub mod local;
pub mod provider;
pub mod remote;

pub use dummy::DummyBackend;
pub use local::LocalBackend;
pub use provider::{build_backend, validate_batch, EmbeddingBackend};
pub use remote::RemoteBackend;
