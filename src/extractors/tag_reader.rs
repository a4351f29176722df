//! Tag-only metadata reader over lofty
//!
//! Reads ID3v2/ID3v1, Vorbis comments, MP4 atoms, and APE tags. Missing
//! fields come back as None; the analyzer applies the filename-parse and
//! service fallbacks.

use crate::error::ExtractorError;
use crate::extractors::{MetadataReader, TagMetadata};
use async_trait::async_trait;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::Path;
use tracing::debug;

pub struct LoftyMetadataReader;

impl LoftyMetadataReader {
    pub fn new() -> Self {
        Self
    }

    fn read_blocking(path: &Path) -> Result<TagMetadata, ExtractorError> {
        let tagged_file = Probe::open(path)
            .map_err(|e| ExtractorError::Io(std::io::Error::other(e)))?
            .read()
            .map_err(|e| ExtractorError::Parse(format!("cannot read tags: {e}")))?;

        let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
            debug!(file = %path.display(), "no tags present");
            return Ok(TagMetadata::default());
        };

        Ok(TagMetadata {
            artist: tag.artist().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            title: tag.title().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            album: tag.album().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            year: tag.year().map(|y| y as i64),
            genre: tag.genre().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            track_number: tag.track().map(|t| t as i64),
            disc_number: tag.disk().map(|d| d as i64),
        })
    }
}

impl Default for LoftyMetadataReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataReader for LoftyMetadataReader {
    async fn read(&self, path: &Path) -> Result<TagMetadata, ExtractorError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::read_blocking(&path))
            .await
            .map_err(|e| ExtractorError::Parse(format!("tag read task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreadable_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_audio.mp3");
        std::fs::write(&path, b"plainly not an mp3").unwrap();

        let reader = LoftyMetadataReader::new();
        let result = reader.read(&path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let reader = LoftyMetadataReader::new();
        let result = reader.read(Path::new("/definitely/missing.mp3")).await;
        assert!(matches!(result, Err(ExtractorError::Io(_))));
    }
}
