//! cratekeeper: a streaming cleanup engine for chaotic music libraries
//!
//! The pipeline discovers audio files, analyzes and quality-scores them,
//! filters out corrupted material, groups duplicates, and atomically
//! relocates the best version of everything into a genre/decade tree.
//! Originals are never destroyed: the default mode copies, every
//! filesystem mutation goes through a logged transaction, and any
//! interruption is recoverable from the last checkpoint.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod models;
pub mod services;
pub mod utils;

pub use config::CleanupConfig;
pub use error::{CleanupError, Result};
pub use services::orchestrator::{CleanupOrchestrator, ExtractorSet, RunSummary};
