//! Header-level defect detection
//!
//! A fast structural probe, not a DSP analysis: magic bytes, declared vs
//! actual size, readable tags. Deeper detectors (decode checks, silence
//! and clipping analysis) implement the same trait.
//!
//! Penalties: corrupted header 60, truncation 50, unreadable metadata 25,
//! zero-length 100. Health score is 100 minus the sum, floored at 0.

use crate::error::ExtractorError;
use crate::extractors::{DefectDetector, HealthReport};
use async_trait::async_trait;
use lofty::prelude::*;
use lofty::probe::Probe;
use std::io::Read;
use std::path::Path;

/// Declared size may exceed actual by 10% before we call it truncated
const SIZE_MISMATCH_TOLERANCE: f64 = 0.9;

pub struct HeaderProbeDetector;

impl HeaderProbeDetector {
    pub fn new() -> Self {
        Self
    }

    fn probe_blocking(path: &Path) -> Result<HealthReport, ExtractorError> {
        let mut defects = Vec::new();
        let mut penalty = 0u32;

        let actual_size = std::fs::metadata(path)?.len();
        if actual_size == 0 {
            return Ok(HealthReport {
                health_score: 0,
                defects: vec!["header_corruption".into(), "truncation".into()],
                clipping_ratio: None,
                silence_ratio: None,
                duration_sec: None,
            });
        }

        if !has_valid_magic(path)? {
            defects.push("header_corruption".into());
            penalty += 60;
        }

        // Tag-level probe: declared duration and bitrate let us estimate
        // the expected payload size
        let mut duration_sec = None;
        match Probe::open(path)
            .map_err(|e| ExtractorError::Io(std::io::Error::other(e)))?
            .read()
        {
            Ok(tagged_file) => {
                let properties = tagged_file.properties();
                let duration = properties.duration().as_secs_f64();
                if duration > 0.0 {
                    duration_sec = Some(duration);
                }

                if let (Some(bitrate_kbps), Some(duration)) =
                    (properties.audio_bitrate(), duration_sec)
                {
                    let expected_bytes = (bitrate_kbps as f64) * 1000.0 / 8.0 * duration;
                    if expected_bytes > 0.0
                        && (actual_size as f64) < expected_bytes * SIZE_MISMATCH_TOLERANCE
                    {
                        defects.push("truncation".into());
                        penalty += 50;
                    }
                }
            }
            Err(e) => {
                tracing::debug!(file = %path.display(), error = %e, "tags unreadable during probe");
                defects.push("metadata_unreadable".into());
                penalty += 25;
            }
        }

        Ok(HealthReport {
            health_score: 100u32.saturating_sub(penalty).min(100) as u8,
            defects,
            clipping_ratio: None,
            silence_ratio: None,
            duration_sec,
        })
    }
}

impl Default for HeaderProbeDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// First-bytes signature check for the supported audio containers.
/// Also used by the transaction manager's deep verification after copies.
pub(crate) fn has_valid_magic(path: &Path) -> Result<bool, ExtractorError> {
    let mut file = std::fs::File::open(path)?;
    let mut buffer = [0u8; 12];
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read < 4 {
        return Ok(false);
    }

    let ok = match &buffer[..bytes_read.min(12)] {
        // MP3 frame sync or ID3 tag
        [0xFF, 0xFB, ..] | [0xFF, 0xF3, ..] | [0xFF, 0xF2, ..] => true,
        [b'I', b'D', b'3', ..] => true,
        // FLAC
        [b'f', b'L', b'a', b'C', ..] => true,
        // OGG (Vorbis/Opus)
        [b'O', b'g', b'g', b'S', ..] => true,
        // MP4 container (M4A/AAC)
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => true,
        // WAV / AIFF
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E'] => true,
        [b'F', b'O', b'R', b'M', _, _, _, _, b'A', b'I', b'F', b'F'] => true,
        // WMA (ASF header GUID prefix)
        [0x30, 0x26, 0xB2, 0x75, ..] => true,
        _ => false,
    };

    Ok(ok)
}

#[async_trait]
impl DefectDetector for HeaderProbeDetector {
    async fn probe(
        &self,
        path: &Path,
        _sample_duration_sec: f64,
    ) -> Result<HealthReport, ExtractorError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::probe_blocking(&path))
            .await
            .map_err(|e| ExtractorError::Parse(format!("defect probe task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_garbage_bytes_flag_header_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mp3");
        std::fs::write(&path, vec![0x00u8; 4096]).unwrap();

        let report = HeaderProbeDetector::new().probe(&path, 30.0).await.unwrap();
        assert!(report.defects.iter().any(|d| d == "header_corruption"));
        assert!(report.health_score < 50);
    }

    #[tokio::test]
    async fn test_empty_file_scores_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp3");
        std::fs::write(&path, b"").unwrap();

        let report = HeaderProbeDetector::new().probe(&path, 30.0).await.unwrap();
        assert_eq!(report.health_score, 0);
        assert!(report.defects.iter().any(|d| d == "truncation"));
    }

    #[tokio::test]
    async fn test_id3_magic_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tagged.mp3");
        // ID3 header followed by junk: magic passes, tag parse fails
        let mut bytes = b"ID3".to_vec();
        bytes.extend_from_slice(&[0u8; 512]);
        std::fs::write(&path, bytes).unwrap();

        let report = HeaderProbeDetector::new().probe(&path, 30.0).await.unwrap();
        assert!(!report.defects.iter().any(|d| d == "header_corruption"));
    }
}
