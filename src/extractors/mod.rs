//! External interfaces the core consumes
//!
//! Fingerprinting, tag reading/writing, defect detection, and reference
//! lookup are collaborators behind narrow traits. The bundled
//! implementations are deliberately tag-level (lofty properties, header
//! probes); a chromaprint-style fingerprinter or a DSP defect analyzer
//! plugs in through the same seams.

pub mod defect_probe;
pub mod filename_parser;
pub mod fingerprint;
pub mod tag_reader;
pub mod tag_writer;

pub use defect_probe::HeaderProbeDetector;
pub use filename_parser::FilenameParser;
pub use fingerprint::{NoopFingerprinter, TagFingerprinter};
pub use tag_reader::LoftyMetadataReader;
pub use tag_writer::LoftyTagWriter;

use crate::error::ExtractorError;
use async_trait::async_trait;
use std::path::Path;

/// Technical facts derived from audio content; deterministic for
/// identical file content.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFingerprint {
    pub fingerprint: String,
    pub duration_sec: f64,
    pub sample_rate_hz: u32,
    pub bit_depth: Option<u8>,
    pub channels: u8,
    pub codec: String,
    pub bitrate_kbps: u32,
}

/// Tag-level metadata for one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub genre: Option<String>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
}

impl TagMetadata {
    pub fn is_empty(&self) -> bool {
        self.artist.is_none()
            && self.title.is_none()
            && self.album.is_none()
            && self.year.is_none()
            && self.genre.is_none()
    }

    /// Fill holes in `self` from `other` without overwriting known fields
    pub fn merge_missing_from(&mut self, other: &TagMetadata) {
        if self.artist.is_none() {
            self.artist = other.artist.clone();
        }
        if self.title.is_none() {
            self.title = other.title.clone();
        }
        if self.album.is_none() {
            self.album = other.album.clone();
        }
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.genre.is_none() {
            self.genre = other.genre.clone();
        }
        if self.track_number.is_none() {
            self.track_number = other.track_number;
        }
        if self.disc_number.is_none() {
            self.disc_number = other.disc_number;
        }
    }
}

/// Health facts from defect detection; lower score means more defective
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub health_score: u8,
    pub defects: Vec<String>,
    pub clipping_ratio: Option<f64>,
    pub silence_ratio: Option<f64>,
    pub duration_sec: Option<f64>,
}

/// One known reference version of a recording
#[derive(Debug, Clone)]
pub struct ReferenceVersion {
    pub format: String,
    pub bitrate_kbps: u32,
    pub quality_class: String,
}

/// Score/grade payload stamped onto organized files
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScoreTags {
    pub final_score: f64,
    pub grade: String,
}

/// Maps a file to a fingerprint string plus technical attributes
#[async_trait]
pub trait Fingerprinter: Send + Sync {
    /// False disables acoustic grouping entirely (hash-only mode)
    fn is_enabled(&self) -> bool {
        true
    }

    async fn fingerprint(&self, path: &Path) -> Result<AudioFingerprint, ExtractorError>;

    /// Opaque similarity in [0, 1] between two fingerprint strings
    fn similarity(&self, a: &str, b: &str) -> f64;
}

/// Reads tag-level metadata from a file
#[async_trait]
pub trait MetadataReader: Send + Sync {
    async fn read(&self, path: &Path) -> Result<TagMetadata, ExtractorError>;
}

/// Writes score tags via temp-plus-rename; never called on protected paths
#[async_trait]
pub trait MetadataWriter: Send + Sync {
    async fn write_score_tags(&self, path: &Path, tags: ScoreTags) -> Result<(), ExtractorError>;
}

/// Probes a file for defects and a health score in [0, 100]
#[async_trait]
pub trait DefectDetector: Send + Sync {
    async fn probe(
        &self,
        path: &Path,
        sample_duration_sec: f64,
    ) -> Result<HealthReport, ExtractorError>;
}

/// Optional lookup of known reference versions by fingerprint
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    async fn lookup(&self, fingerprint: &str) -> Result<Vec<ReferenceVersion>, ExtractorError>;
}
