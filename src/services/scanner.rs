//! Discovery producer
//!
//! Depth-first traversal of the configured source roots, yielding
//! candidates over a bounded channel so discovery never outruns the
//! analyzer by more than the channel capacity. Symlinks are not
//! followed. Protected prefixes are pruned before descent, so protected
//! files are never even opened.

use crate::config::CleanupConfig;
use crate::models::DiscoveredFile;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// System clutter never worth probing
const IGNORE_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", ".git", ".svn", "node_modules"];

#[derive(Debug, Default, Clone)]
pub struct ScanStats {
    pub emitted: u64,
    pub skipped_protected: u64,
    pub skipped_filtered: u64,
    pub errors: Vec<String>,
}

pub struct DiscoveryProducer {
    source_roots: Vec<PathBuf>,
    protected_roots: Vec<PathBuf>,
    /// The engine's own output trees, never ingested as input
    excluded_roots: Vec<PathBuf>,
    extensions: HashSet<String>,
    min_size_bytes: u64,
    max_size_bytes: u64,
}

impl DiscoveryProducer {
    pub fn from_config(config: &CleanupConfig) -> Self {
        Self {
            source_roots: config.source_roots.clone(),
            protected_roots: config.protected_roots.clone(),
            excluded_roots: vec![
                config.target_root.clone(),
                config.rejected_root.clone(),
                config.workspace_dir.join("backups"),
            ],
            extensions: config
                .supported_extensions
                .iter()
                .map(|e| e.to_lowercase())
                .collect(),
            min_size_bytes: config.min_size_bytes,
            max_size_bytes: config.max_size_bytes,
        }
    }

    /// Run the traversal on the blocking pool, emitting candidates into
    /// `tx`. Stops early when the receiver is dropped.
    pub fn spawn_stream(
        self,
        tx: mpsc::Sender<DiscoveredFile>,
    ) -> tokio::task::JoinHandle<ScanStats> {
        tokio::task::spawn_blocking(move || self.scan_into(tx))
    }

    fn scan_into(&self, tx: mpsc::Sender<DiscoveredFile>) -> ScanStats {
        let mut stats = ScanStats::default();

        for root in &self.source_roots {
            if !root.exists() {
                let msg = format!("source root does not exist: {}", root.display());
                tracing::warn!("{msg}");
                stats.errors.push(msg);
                continue;
            }

            let walker = WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    let path = entry.path();
                    if self.protected_roots.iter().any(|p| path.starts_with(p)) {
                        return false;
                    }
                    if self.excluded_roots.iter().any(|p| path.starts_with(p)) {
                        return false;
                    }
                    let name = entry.file_name().to_string_lossy();
                    !IGNORE_NAMES.iter().any(|ignored| name == *ignored)
                });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable entry");
                        stats.errors.push(e.to_string());
                        continue;
                    }
                };

                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();

                // filter_entry prunes protected directories; a file directly
                // matching a protected prefix is counted here
                if self.protected_roots.iter().any(|p| path.starts_with(p)) {
                    stats.skipped_protected += 1;
                    continue;
                }

                if !self.extension_supported(path) {
                    stats.skipped_filtered += 1;
                    continue;
                }

                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "cannot stat file");
                        stats.errors.push(format!("{}: {e}", path.display()));
                        continue;
                    }
                };

                let size = metadata.len();
                // Inclusive bounds: a file exactly at either limit passes
                if size < self.min_size_bytes || size > self.max_size_bytes {
                    stats.skipped_filtered += 1;
                    continue;
                }

                let modified_time: DateTime<Utc> = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());

                let candidate = DiscoveredFile {
                    path: path.to_path_buf(),
                    size_bytes: size,
                    modified_time,
                };

                if tx.blocking_send(candidate).is_err() {
                    // Receiver gone: cancellation or downstream failure
                    tracing::debug!("discovery receiver closed, stopping traversal");
                    return stats;
                }
                stats.emitted += 1;
            }
        }

        stats
    }

    fn extension_supported(&self, path: &std::path::Path) -> bool {
        path.extension()
            .map(|ext| self.extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }
}
