//! Shared fixtures for the integration tests
//!
//! Extractor stubs keyed by file name stand in for the external
//! fingerprinter, tag reader, and defect detector, so end-to-end runs
//! are fully deterministic without real audio files.

use async_trait::async_trait;
use cratekeeper::config::CleanupConfig;
use cratekeeper::error::ExtractorError;
use cratekeeper::extractors::{
    AudioFingerprint, DefectDetector, Fingerprinter, HealthReport, MetadataReader, MetadataWriter,
    ScoreTags, TagMetadata,
};
use cratekeeper::services::orchestrator::ExtractorSet;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn file_key(path: &Path) -> String {
    path.file_name().unwrap_or_default().to_string_lossy().to_string()
}

#[derive(Default)]
pub struct StubReader {
    pub by_name: HashMap<String, TagMetadata>,
}

#[async_trait]
impl MetadataReader for StubReader {
    async fn read(&self, path: &Path) -> Result<TagMetadata, ExtractorError> {
        Ok(self.by_name.get(&file_key(path)).cloned().unwrap_or_default())
    }
}

/// Fingerprint strings are `<recording>:<rendition>`. Similarity: equal
/// strings 1.0; same recording 0.97; recordings marked "near" 0.85;
/// anything else 0.0.
#[derive(Default)]
pub struct StubFingerprinter {
    pub by_name: HashMap<String, AudioFingerprint>,
}

#[async_trait]
impl Fingerprinter for StubFingerprinter {
    async fn fingerprint(&self, path: &Path) -> Result<AudioFingerprint, ExtractorError> {
        self.by_name
            .get(&file_key(path))
            .cloned()
            .ok_or_else(|| ExtractorError::Unsupported(path.to_path_buf()))
    }

    fn similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let rec_a = a.split(':').next().unwrap_or_default();
        let rec_b = b.split(':').next().unwrap_or_default();
        if rec_a == rec_b && !rec_a.is_empty() {
            if rec_a.starts_with("near") {
                0.85
            } else {
                0.97
            }
        } else {
            0.0
        }
    }
}

#[derive(Default)]
pub struct StubDetector {
    pub by_name: HashMap<String, HealthReport>,
}

#[async_trait]
impl DefectDetector for StubDetector {
    async fn probe(&self, path: &Path, _sample: f64) -> Result<HealthReport, ExtractorError> {
        Ok(self.by_name.get(&file_key(path)).cloned().unwrap_or(HealthReport {
            health_score: 100,
            defects: vec![],
            clipping_ratio: Some(0.0),
            silence_ratio: Some(0.0),
            duration_sec: Some(200.0),
        }))
    }
}

pub struct NoopWriter;

#[async_trait]
impl MetadataWriter for NoopWriter {
    async fn write_score_tags(&self, _path: &Path, _tags: ScoreTags) -> Result<(), ExtractorError> {
        Ok(())
    }
}

pub fn fingerprint(recording: &str, rendition: &str, codec: &str, bitrate: u32) -> AudioFingerprint {
    AudioFingerprint {
        fingerprint: format!("{recording}:{rendition}"),
        duration_sec: 200.0,
        sample_rate_hz: 44_100,
        bit_depth: None,
        channels: 2,
        codec: codec.to_string(),
        bitrate_kbps: bitrate,
    }
}

pub fn tags(artist: &str, title: &str, genre: &str, year: i64) -> TagMetadata {
    TagMetadata {
        artist: Some(artist.to_string()),
        title: Some(title.to_string()),
        album: None,
        year: Some(year),
        genre: Some(genre.to_string()),
        track_number: None,
        disc_number: None,
    }
}

/// A source tree plus ready-to-run config pointing at tempdir outputs
pub struct TestLibrary {
    pub dir: tempfile::TempDir,
    pub config: CleanupConfig,
}

impl TestLibrary {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CleanupConfig {
            source_roots: vec![dir.path().join("in")],
            target_root: dir.path().join("organized"),
            rejected_root: dir.path().join("rejected"),
            workspace_dir: dir.path().join("workspace"),
            min_size_bytes: 1,
            batch_size: 10,
            checkpoint_interval_sec: 0,
            ..Default::default()
        };
        std::fs::create_dir_all(dir.path().join("in")).expect("mkdir in");
        Self { dir, config }
    }

    pub fn add_source(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.path().join("in").join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(&path, content).expect("write source");
        path
    }

    /// Recursive (path, content) snapshot of the whole tempdir. The
    /// workspace and the exported manifest sidecars are excluded: those
    /// are reports about the library, not part of it.
    pub fn snapshot(&self) -> Vec<(String, Vec<u8>)> {
        let mut out = Vec::new();
        let workspace = self.dir.path().join("workspace");
        for entry in walkdir(self.dir.path()) {
            if entry.starts_with(&workspace) {
                continue;
            }
            let name = entry.file_name().unwrap_or_default().to_string_lossy();
            if name == "rejected_manifest.json" || name == "rejection_analysis.csv" {
                continue;
            }
            let content = std::fs::read(&entry).unwrap_or_default();
            out.push((entry.to_string_lossy().to_string(), content));
        }
        out.sort();
        out
    }
}

fn walkdir(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files
}

pub fn extractor_set(
    reader: StubReader,
    fingerprinter: StubFingerprinter,
    detector: StubDetector,
) -> ExtractorSet {
    ExtractorSet {
        metadata_reader: Arc::new(reader),
        fingerprinter: Arc::new(fingerprinter),
        defect_detector: Arc::new(detector),
        reference_lookup: None,
        tag_writer: Arc::new(NoopWriter),
    }
}
