//! Bundled fingerprinter implementations
//!
//! `NoopFingerprinter` disables acoustic grouping (hash-only mode).
//! `TagFingerprinter` derives a stable identity string from the file's
//! technical properties; it is a stand-in for an external chromaprint
//! implementation and deliberately conservative: its similarity crosses
//! the grouping threshold only for identical identities.

use crate::error::ExtractorError;
use crate::extractors::{AudioFingerprint, Fingerprinter};
use async_trait::async_trait;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Disabled fingerprinter: grouping falls back to content hash only
pub struct NoopFingerprinter;

#[async_trait]
impl Fingerprinter for NoopFingerprinter {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn fingerprint(&self, path: &Path) -> Result<AudioFingerprint, ExtractorError> {
        Err(ExtractorError::Unsupported(path.to_path_buf()))
    }

    fn similarity(&self, _a: &str, _b: &str) -> f64 {
        0.0
    }
}

/// Tag-derived fingerprinter
///
/// The fingerprint string encodes duration (deciseconds), sample rate,
/// channels, codec, and bitrate, plus a short digest for opacity.
/// Deterministic for identical file content.
pub struct TagFingerprinter;

impl TagFingerprinter {
    pub fn new() -> Self {
        Self
    }

    fn fingerprint_blocking(path: &Path) -> Result<AudioFingerprint, ExtractorError> {
        let tagged_file = Probe::open(path)
            .map_err(|e| ExtractorError::Io(std::io::Error::other(e)))?
            .read()
            .map_err(|e| ExtractorError::Parse(format!("cannot read audio properties: {e}")))?;

        let properties = tagged_file.properties();
        let duration_sec = properties.duration().as_secs_f64();
        let sample_rate_hz = properties.sample_rate().unwrap_or(0);
        let channels = properties.channels().unwrap_or(0);
        let bit_depth = properties.bit_depth();
        let bitrate_kbps = properties.audio_bitrate().unwrap_or(0);
        let codec = codec_name(&tagged_file, path);

        if duration_sec <= 0.0 {
            return Err(ExtractorError::Parse(format!(
                "no decodable duration in {}",
                path.display()
            )));
        }

        let identity = format!(
            "d={};sr={};ch={};c={};br={}",
            (duration_sec * 10.0).round() as u64,
            sample_rate_hz,
            channels,
            codec,
            bitrate_kbps,
        );
        let digest = Sha256::digest(identity.as_bytes());
        let fingerprint = format!("tk1:{identity};x={:x}", digest)
            .chars()
            .take(96)
            .collect();

        Ok(AudioFingerprint {
            fingerprint,
            duration_sec,
            sample_rate_hz,
            bit_depth,
            channels,
            codec,
            bitrate_kbps,
        })
    }

    fn parse_duration_ds(fingerprint: &str) -> Option<u64> {
        let rest = fingerprint.strip_prefix("tk1:")?;
        let field = rest.split(';').find(|f| f.starts_with("d="))?;
        field[2..].parse().ok()
    }

    fn parse_channels(fingerprint: &str) -> Option<u64> {
        let rest = fingerprint.strip_prefix("tk1:")?;
        let field = rest.split(';').find(|f| f.starts_with("ch="))?;
        field[3..].parse().ok()
    }
}

impl Default for TagFingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

fn codec_name(tagged_file: &lofty::file::TaggedFile, path: &Path) -> String {
    use lofty::file::FileType;
    match tagged_file.file_type() {
        FileType::Mpeg => "mp3".to_string(),
        FileType::Flac => "flac".to_string(),
        FileType::Wav => "wav".to_string(),
        FileType::Vorbis => "ogg".to_string(),
        FileType::Opus => "opus".to_string(),
        FileType::Mp4 => "m4a".to_string(),
        FileType::Aac => "aac".to_string(),
        FileType::Aiff => "aiff".to_string(),
        _ => path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

#[async_trait]
impl Fingerprinter for TagFingerprinter {
    async fn fingerprint(&self, path: &Path) -> Result<AudioFingerprint, ExtractorError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::fingerprint_blocking(&path))
            .await
            .map_err(|e| ExtractorError::Parse(format!("fingerprint task failed: {e}")))?
    }

    /// Identical identities are 1.0. Same channel count within half a
    /// second of duration is 0.85, below any sane grouping threshold.
    /// Everything else is 0.0.
    fn similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        let (Some(da), Some(db)) = (Self::parse_duration_ds(a), Self::parse_duration_ds(b)) else {
            return 0.0;
        };
        let (Some(ca), Some(cb)) = (Self::parse_channels(a), Self::parse_channels(b)) else {
            return 0.0;
        };
        if ca == cb && da.abs_diff(db) <= 5 {
            0.85
        } else {
            0.0
        }
    }
}
