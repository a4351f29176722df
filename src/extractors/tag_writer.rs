//! Score tag write-back
//!
//! Stamps an organized file with its quality score and grade. The write
//! is temp-plus-rename: the file is copied to a sibling temp path, tags
//! are written there, the temp is fsynced and atomically renamed over the
//! original. The transaction manager guarantees this is never invoked on
//! a protected path.

use crate::error::ExtractorError;
use crate::extractors::{MetadataWriter, ScoreTags};
use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagItem};
use std::path::Path;

pub struct LoftyTagWriter;

impl LoftyTagWriter {
    pub fn new() -> Self {
        Self
    }

    fn write_blocking(path: &Path, tags: ScoreTags) -> Result<(), ExtractorError> {
        let file_name = path
            .file_name()
            .ok_or_else(|| ExtractorError::Unsupported(path.to_path_buf()))?
            .to_string_lossy();
        let tmp_path = path.with_file_name(format!(".{file_name}.cktmp"));

        std::fs::copy(path, &tmp_path)?;

        let result = Self::stamp(&tmp_path, tags);
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
            return result;
        }

        let tmp_file = std::fs::File::open(&tmp_path)?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn stamp(path: &Path, tags: ScoreTags) -> Result<(), ExtractorError> {
        let tagged_file = Probe::open(path)
            .map_err(|e| ExtractorError::Io(std::io::Error::other(e)))?
            .read()
            .map_err(|e| ExtractorError::Parse(format!("cannot read tags: {e}")))?;

        let tag_type = tagged_file.primary_tag_type();
        let mut tag = tagged_file
            .primary_tag()
            .cloned()
            .unwrap_or_else(|| Tag::new(tag_type));

        tag.insert(TagItem::new(
            ItemKey::Unknown("QUALITY_SCORE".to_string()),
            ItemValue::Text(format!("{:.1}", tags.final_score)),
        ));
        tag.insert(TagItem::new(
            ItemKey::Unknown("QUALITY_GRADE".to_string()),
            ItemValue::Text(tags.grade.clone()),
        ));

        tag.save_to_path(path, WriteOptions::default())
            .map_err(|e| ExtractorError::Parse(format!("cannot write tags: {e}")))
    }
}

impl Default for LoftyTagWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetadataWriter for LoftyTagWriter {
    async fn write_score_tags(&self, path: &Path, tags: ScoreTags) -> Result<(), ExtractorError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::write_blocking(&path, tags))
            .await
            .map_err(|e| ExtractorError::Parse(format!("tag write task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_write_leaves_original_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.mp3");
        std::fs::write(&path, b"not actually audio").unwrap();
        let before = std::fs::read(&path).unwrap();

        let writer = LoftyTagWriter::new();
        let result = writer
            .write_score_tags(
                &path,
                ScoreTags {
                    final_score: 88.0,
                    grade: "A-".to_string(),
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), before);
        // No temp file left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
