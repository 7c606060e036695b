// SPDX-License-Identifier: MIT OR Apache-2.0

//! vectorize - Resumable batch embedding library
//!
//! Shared modules for the vectorize CLI tool.

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod corpus;
pub mod embedding;
pub mod errors;
pub mod output;
pub mod progress;
pub mod runner;
pub mod utils;
