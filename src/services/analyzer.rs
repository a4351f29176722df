//! Per-file analysis
//!
//! Attaches to each discovered file the facts scoring and grouping need:
//! content hash, metadata (tag → filename-parse fallback), fingerprint,
//! defect report, and the quality score. Results are persisted with
//! fingerprint/metadata interning; the file row advances to `analyzed`.
//!
//! Failure semantics: hash failure is fatal for the file. Metadata and
//! fingerprint failures degrade capabilities but the file continues.
//! Defect-detection failure counts as health 0, which routes the file to
//! quarantine at the filter.

use crate::config::CleanupConfig;
use crate::db::{files, fingerprints, quality};
use crate::error::AnalyzerError;
use crate::extractors::{
    DefectDetector, FilenameParser, Fingerprinter, HealthReport, MetadataReader, ReferenceLookup,
    TagMetadata,
};
use crate::models::{FileRecord, FingerprintRow, MetadataRow, MetadataSource};
use crate::services::{hashing, scoring};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Result of one successful analysis
#[derive(Debug, Clone)]
pub struct AnalyzedFile {
    pub file_id: i64,
    pub final_score: f64,
    pub fingerprint_failed: bool,
}

pub struct FileAnalyzer {
    db: SqlitePool,
    config: CleanupConfig,
    metadata_reader: Arc<dyn MetadataReader>,
    fingerprinter: Arc<dyn Fingerprinter>,
    defect_detector: Arc<dyn DefectDetector>,
    reference_lookup: Option<Arc<dyn ReferenceLookup>>,
    filename_parser: FilenameParser,
    extractor_timeout: Duration,
}

impl FileAnalyzer {
    pub fn new(
        db: SqlitePool,
        config: CleanupConfig,
        metadata_reader: Arc<dyn MetadataReader>,
        fingerprinter: Arc<dyn Fingerprinter>,
        defect_detector: Arc<dyn DefectDetector>,
        reference_lookup: Option<Arc<dyn ReferenceLookup>>,
    ) -> Self {
        let filename_parser = FilenameParser::new(&config.filename_patterns);
        let extractor_timeout = Duration::from_secs(config.extractor_timeout_sec);
        Self {
            db,
            config,
            metadata_reader,
            fingerprinter,
            defect_detector,
            reference_lookup,
            filename_parser,
            extractor_timeout,
        }
    }

    /// Analyze one file and persist everything. The caller records the
    /// error kind on the file row when this fails.
    pub async fn analyze_file(&self, file: &FileRecord) -> Result<AnalyzedFile, AnalyzerError> {
        let path = Path::new(&file.path);

        // 1. Content hash; fatal on failure, the file cannot be grouped
        let content_hash = hashing::hash_file(path, self.config.hash_algorithm)
            .await
            .map_err(|e| AnalyzerError::Hash(format!("{}: {e}", file.path)))?;

        // 2. Metadata, tag first, filename parse filling the holes
        let metadata = self.resolve_metadata(path).await;

        // 3. Fingerprint; failure disables acoustic grouping for this file
        let (fingerprint, fingerprint_failed) = if self.fingerprinter.is_enabled() {
            match tokio::time::timeout(self.extractor_timeout, self.fingerprinter.fingerprint(path))
                .await
            {
                Ok(Ok(fp)) => (Some(fp), false),
                Ok(Err(e)) => {
                    tracing::warn!(file = %file.path, error = %e, "fingerprint failed");
                    (None, true)
                }
                Err(_) => {
                    tracing::warn!(
                        file = %file.path,
                        timeout_s = self.extractor_timeout.as_secs(),
                        "fingerprinter timed out"
                    );
                    (None, true)
                }
            }
        } else {
            (None, false)
        };

        // 4. Defect detection; a detector failure means health 0
        let health = match tokio::time::timeout(
            self.extractor_timeout,
            self.defect_detector.probe(path, 30.0),
        )
        .await
        {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                tracing::warn!(file = %file.path, error = %e, "defect detection failed");
                HealthReport {
                    health_score: 0,
                    defects: vec!["decode_failure".to_string()],
                    ..Default::default()
                }
            }
            Err(_) => HealthReport {
                health_score: 0,
                defects: vec!["decode_failure".to_string()],
                ..Default::default()
            },
        };

        // 5. Quality score from the recorded facts
        let references = self.fetch_references(fingerprint.as_ref().map(|f| f.fingerprint.as_str())).await;
        let (codec, bitrate_kbps, sample_rate_hz) = match &fingerprint {
            Some(fp) => (fp.codec.clone(), fp.bitrate_kbps, fp.sample_rate_hz),
            None => (
                path.extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_else(|| "unknown".to_string()),
                0,
                0,
            ),
        };
        let fidelity = scoring::FidelityInputs {
            clipping_ratio: health.clipping_ratio,
            silence_ratio: health.silence_ratio,
            ..Default::default()
        };
        let analysis = scoring::analyze(
            &self.config.quality_weights,
            file.id,
            &codec,
            bitrate_kbps,
            sample_rate_hz,
            &fidelity,
            health.defects.clone(),
            health.health_score as i64,
            references.as_deref(),
        );

        // 6. Persist, interning shared rows
        let fingerprint_id = match &fingerprint {
            Some(fp) => Some(
                fingerprints::intern_fingerprint(
                    &self.db,
                    &FingerprintRow {
                        id: 0,
                        fingerprint: fp.fingerprint.clone(),
                        duration_sec: fp.duration_sec,
                        sample_rate_hz: fp.sample_rate_hz as i64,
                        bit_depth: fp.bit_depth.map(|b| b as i64),
                        channels: fp.channels as i64,
                        codec: fp.codec.clone(),
                        bitrate_kbps: fp.bitrate_kbps as i64,
                    },
                )
                .await?,
            ),
            None => None,
        };

        let metadata_id = match metadata {
            Some((tags, source)) => Some(
                fingerprints::intern_metadata(
                    &self.db,
                    &MetadataRow {
                        id: 0,
                        artist: tags.artist,
                        title: tags.title,
                        album: tags.album,
                        year: tags.year,
                        genre: tags.genre,
                        track_number: tags.track_number,
                        disc_number: tags.disc_number,
                        source,
                    },
                )
                .await?,
            ),
            None => None,
        };

        quality::upsert_analysis(&self.db, &analysis).await?;
        files::set_analyzed(
            &self.db,
            file.id,
            &content_hash,
            fingerprint_id,
            metadata_id,
            analysis.final_score,
        )
        .await?;

        tracing::debug!(
            file = %file.path,
            score = analysis.final_score,
            grade = analysis.grade.as_str(),
            health = health.health_score,
            "file analyzed"
        );

        Ok(AnalyzedFile {
            file_id: file.id,
            final_score: analysis.final_score,
            fingerprint_failed,
        })
    }

    /// Tag read with filename-parse fallback. The identity source is
    /// whichever supplied artist+title; a pure fallback merge keeps the
    /// tag source when tags contributed anything.
    async fn resolve_metadata(&self, path: &Path) -> Option<(TagMetadata, MetadataSource)> {
        let tag_result = tokio::time::timeout(self.extractor_timeout, self.metadata_reader.read(path))
            .await
            .ok()
            .and_then(|r| match r {
                Ok(tags) => Some(tags),
                Err(e) => {
                    tracing::debug!(file = %path.display(), error = %e, "tag read failed");
                    None
                }
            });

        let parsed = path
            .file_stem()
            .map(|s| s.to_string_lossy())
            .and_then(|stem| self.filename_parser.parse(&stem));

        match (tag_result, parsed) {
            (Some(mut tags), Some(parsed)) if !tags.is_empty() => {
                tags.merge_missing_from(&parsed);
                Some((tags, MetadataSource::Tag))
            }
            (Some(tags), None) if !tags.is_empty() => Some((tags, MetadataSource::Tag)),
            (_, Some(parsed)) => Some((parsed, MetadataSource::FilenameParse)),
            // Tags readable but empty, nothing parseable
            _ => None,
        }
    }

    async fn fetch_references(
        &self,
        fingerprint: Option<&str>,
    ) -> Option<Vec<crate::extractors::ReferenceVersion>> {
        let lookup = self.reference_lookup.as_ref()?;
        let fingerprint = fingerprint?;
        match tokio::time::timeout(self.extractor_timeout, lookup.lookup(fingerprint)).await {
            Ok(Ok(versions)) if !versions.is_empty() => Some(versions),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "reference lookup failed");
                None
            }
            Err(_) => {
                tracing::debug!("reference lookup timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_store;
    use crate::error::ExtractorError;
    use crate::extractors::AudioFingerprint;
    use crate::models::{DiscoveredFile, FileStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::PathBuf;

    struct StubReader(Option<TagMetadata>);

    #[async_trait]
    impl MetadataReader for StubReader {
        async fn read(&self, _path: &Path) -> Result<TagMetadata, ExtractorError> {
            self.0
                .clone()
                .ok_or_else(|| ExtractorError::Parse("no tags".into()))
        }
    }

    struct StubFingerprinter {
        result: Option<AudioFingerprint>,
    }

    #[async_trait]
    impl Fingerprinter for StubFingerprinter {
        async fn fingerprint(&self, path: &Path) -> Result<AudioFingerprint, ExtractorError> {
            self.result
                .clone()
                .ok_or_else(|| ExtractorError::Unsupported(path.to_path_buf()))
        }
        fn similarity(&self, a: &str, b: &str) -> f64 {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
    }

    struct StubDetector(HealthReport);

    #[async_trait]
    impl DefectDetector for StubDetector {
        async fn probe(&self, _path: &Path, _sample: f64) -> Result<HealthReport, ExtractorError> {
            Ok(self.0.clone())
        }
    }

    fn good_fingerprint() -> AudioFingerprint {
        AudioFingerprint {
            fingerprint: "tk1:d=2000;sr=44100;ch=2;c=mp3;br=320;x=aa".into(),
            duration_sec: 200.0,
            sample_rate_hz: 44_100,
            bit_depth: None,
            channels: 2,
            codec: "mp3".into(),
            bitrate_kbps: 320,
        }
    }

    fn healthy_report() -> HealthReport {
        HealthReport {
            health_score: 98,
            defects: vec![],
            clipping_ratio: Some(0.0),
            silence_ratio: Some(0.05),
            duration_sec: Some(200.0),
        }
    }

    async fn seed_file(pool: &SqlitePool, dir: &Path, name: &str) -> FileRecord {
        let path = dir.join(name);
        std::fs::write(&path, b"audio-ish bytes for hashing").unwrap();
        let (id, _) = files::upsert_discovered(
            pool,
            &DiscoveredFile {
                path: path.clone(),
                size_bytes: 27,
                modified_time: Utc::now(),
            },
        )
        .await
        .unwrap();
        files::get_by_id(pool, id).await.unwrap().unwrap()
    }

    fn analyzer(
        pool: &SqlitePool,
        reader: StubReader,
        fingerprinter: StubFingerprinter,
        detector: StubDetector,
    ) -> FileAnalyzer {
        let config = CleanupConfig {
            source_roots: vec![PathBuf::from("/in")],
            ..Default::default()
        };
        FileAnalyzer::new(
            pool.clone(),
            config,
            Arc::new(reader),
            Arc::new(fingerprinter),
            Arc::new(detector),
            None,
        )
    }

    #[tokio::test]
    async fn test_full_analysis_persists_everything() {
        let pool = open_memory_store().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = seed_file(&pool, dir.path(), "track.mp3").await;

        let tags = TagMetadata {
            artist: Some("Jeff Mills".into()),
            title: Some("The Bells".into()),
            year: Some(1997),
            genre: Some("Techno".into()),
            ..Default::default()
        };
        let analyzer = analyzer(
            &pool,
            StubReader(Some(tags)),
            StubFingerprinter { result: Some(good_fingerprint()) },
            StubDetector(healthy_report()),
        );

        let result = analyzer.analyze_file(&file).await.unwrap();
        assert!(!result.fingerprint_failed);
        assert!(result.final_score > 0.0);

        let updated = files::get_by_id(&pool, file.id).await.unwrap().unwrap();
        assert_eq!(updated.status, FileStatus::Analyzed);
        assert!(updated.content_hash.is_some());
        assert!(updated.fingerprint_id.is_some());
        assert!(updated.metadata_id.is_some());
        assert_eq!(updated.quality_score, Some(result.final_score));

        let analysis = quality::get_for_file(&pool, file.id).await.unwrap().unwrap();
        assert_eq!(analysis.health_score, 98);
    }

    #[tokio::test]
    async fn test_fingerprint_failure_is_not_fatal() {
        let pool = open_memory_store().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = seed_file(&pool, dir.path(), "track.mp3").await;

        let analyzer = analyzer(
            &pool,
            StubReader(None),
            StubFingerprinter { result: None },
            StubDetector(healthy_report()),
        );

        let result = analyzer.analyze_file(&file).await.unwrap();
        assert!(result.fingerprint_failed);

        let updated = files::get_by_id(&pool, file.id).await.unwrap().unwrap();
        assert_eq!(updated.status, FileStatus::Analyzed);
        assert!(updated.fingerprint_id.is_none());
    }

    #[tokio::test]
    async fn test_hash_failure_is_fatal() {
        let pool = open_memory_store().await.unwrap();
        let (id, _) = files::upsert_discovered(
            &pool,
            &DiscoveredFile {
                path: PathBuf::from("/gone/missing.mp3"),
                size_bytes: 1,
                modified_time: Utc::now(),
            },
        )
        .await
        .unwrap();
        let file = files::get_by_id(&pool, id).await.unwrap().unwrap();

        let analyzer = analyzer(
            &pool,
            StubReader(None),
            StubFingerprinter { result: None },
            StubDetector(healthy_report()),
        );

        let err = analyzer.analyze_file(&file).await.unwrap_err();
        assert!(matches!(err, AnalyzerError::Hash(_)));
    }

    #[tokio::test]
    async fn test_detector_failure_means_health_zero() {
        struct FailingDetector;
        #[async_trait]
        impl DefectDetector for FailingDetector {
            async fn probe(&self, path: &Path, _s: f64) -> Result<HealthReport, ExtractorError> {
                Err(ExtractorError::Unsupported(path.to_path_buf()))
            }
        }

        let pool = open_memory_store().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = seed_file(&pool, dir.path(), "track.mp3").await;

        let config = CleanupConfig {
            source_roots: vec![PathBuf::from("/in")],
            ..Default::default()
        };
        let analyzer = FileAnalyzer::new(
            pool.clone(),
            config,
            Arc::new(StubReader(None)),
            Arc::new(StubFingerprinter { result: Some(good_fingerprint()) }),
            Arc::new(FailingDetector),
            None,
        );

        analyzer.analyze_file(&file).await.unwrap();
        let analysis = quality::get_for_file(&pool, file.id).await.unwrap().unwrap();
        assert_eq!(analysis.health_score, 0);
        assert!(analysis.defects.contains(&"decode_failure".to_string()));
    }

    #[tokio::test]
    async fn test_filename_fallback_when_tags_empty() {
        let pool = open_memory_store().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let file = seed_file(&pool, dir.path(), "Carl Craig - At Les.mp3").await;

        let analyzer = analyzer(
            &pool,
            StubReader(Some(TagMetadata::default())),
            StubFingerprinter { result: None },
            StubDetector(healthy_report()),
        );
        analyzer.analyze_file(&file).await.unwrap();

        let updated = files::get_by_id(&pool, file.id).await.unwrap().unwrap();
        let meta = fingerprints::get_metadata(&pool, updated.metadata_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.artist.as_deref(), Some("Carl Craig"));
        assert_eq!(meta.title.as_deref(), Some("At Les"));
        assert_eq!(meta.source, MetadataSource::FilenameParse);
    }
}
