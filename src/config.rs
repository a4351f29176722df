//! Configuration for the cleanup engine
//!
//! `CleanupConfig` is deserialized from a TOML file; every field has a
//! default so a minimal file only needs `source_roots` and `target_root`.
//! Resolution priority for the config path: command-line argument →
//! `CRATEKEEPER_CONFIG` environment variable → `./cratekeeper.toml`.

use crate::error::CleanupError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How a destination conflict is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Same content already present: skip; different content: rename with `_dupN`
    SkipIfSameHash,
    /// Always rename with `_dupN`
    Rename,
    /// Abort the transaction
    Fail,
}

/// What to do with a group's non-primary members and quarantined files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateAction {
    /// Relocate (copy + verify + remove source)
    Move,
    /// Copy only; sources are never removed
    Copy,
    /// Hard-link into the destination tree
    Link,
}

/// Depth of post-operation verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityLevel {
    /// Size and existence checks only
    Basic,
    /// Re-hash destinations after copy
    Checksum,
    /// Checksum plus re-probe of audio headers
    Deep,
    /// Deep plus fsync of parent directories
    Paranoid,
}

/// Content-hash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Sha256,
    Blake3,
}

/// Weights for the quality-score components; must sum to 1.0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityWeights {
    pub technical: f64,
    pub fidelity: f64,
    pub integrity: f64,
    pub reference: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            technical: 0.25,
            fidelity: 0.25,
            integrity: 0.15,
            reference: 0.35,
        }
    }
}

/// One genre category with its match keywords; order matters, first match wins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenreCategory {
    pub name: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Roots scanned by discovery
    pub source_roots: Vec<PathBuf>,
    /// Path prefixes never written to, never even staged
    pub protected_roots: Vec<PathBuf>,
    /// Root of the organized tree
    pub target_root: PathBuf,
    /// Root of the rejected tree
    pub rejected_root: PathBuf,
    /// Workspace directory holding the store file
    pub workspace_dir: PathBuf,

    /// Lowercased extensions discovery accepts
    pub supported_extensions: Vec<String>,
    pub min_size_bytes: u64,
    pub max_size_bytes: u64,

    pub batch_size: usize,
    pub max_workers: usize,
    /// Soft cap that throttles prefetch
    pub memory_limit_bytes: u64,

    pub hash_algorithm: HashAlgorithm,
    pub enable_fingerprinting: bool,
    pub duplicate_similarity_threshold: f64,

    pub min_health_score: u8,
    pub critical_defects: Vec<String>,
    pub min_duration_sec: f64,
    pub max_duration_sec: f64,

    pub quality_weights: QualityWeights,
    /// Preferred formats for primary-selection tie-breaks, best first
    pub format_priority: Vec<String>,

    /// Destination filename template
    pub organize_pattern: String,
    pub max_filename_len: usize,
    pub handle_conflicts: ConflictPolicy,
    pub duplicate_action: DuplicateAction,
    pub integrity_level: IntegrityLevel,
    /// Stamp organized primaries with score/grade tags
    pub write_quality_tags: bool,

    pub checkpoint_interval_sec: u64,
    /// External-call timeout for fingerprinter and metadata reads
    pub extractor_timeout_sec: u64,
    /// Orchestrator retries for a failed transaction
    pub transaction_retries: u32,
    pub dry_run: bool,

    /// Ordered category → keywords mapping; first match wins
    pub genre_categories: Vec<GenreCategory>,
    /// Filename-parse fallback patterns, tried in order
    pub filename_patterns: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            source_roots: Vec::new(),
            protected_roots: Vec::new(),
            target_root: PathBuf::from("organized"),
            rejected_root: PathBuf::from("rejected"),
            workspace_dir: PathBuf::from("."),
            supported_extensions: vec![
                "mp3".into(),
                "flac".into(),
                "wav".into(),
                "m4a".into(),
                "aac".into(),
                "ogg".into(),
                "opus".into(),
                "aiff".into(),
                "wma".into(),
            ],
            min_size_bytes: 64 * 1024,
            max_size_bytes: 2 * 1024 * 1024 * 1024,
            batch_size: 100,
            max_workers: num_cpus::get().min(8),
            memory_limit_bytes: 512 * 1024 * 1024,
            hash_algorithm: HashAlgorithm::Sha256,
            enable_fingerprinting: true,
            duplicate_similarity_threshold: 0.90,
            min_health_score: 50,
            critical_defects: vec![
                "header_corruption".into(),
                "truncation".into(),
                "complete_silence".into(),
                "metadata_unreadable".into(),
                "decode_failure".into(),
                "sync_errors".into(),
            ],
            min_duration_sec: 10.0,
            max_duration_sec: 3600.0,
            quality_weights: QualityWeights::default(),
            format_priority: vec![
                "flac".into(),
                "wav".into(),
                "alac".into(),
                "aiff".into(),
                "mp3".into(),
                "ogg".into(),
                "aac".into(),
                "opus".into(),
                "wma".into(),
            ],
            organize_pattern: "{year} - {artist} - {title} [QS{score}%]".into(),
            max_filename_len: 180,
            handle_conflicts: ConflictPolicy::SkipIfSameHash,
            duplicate_action: DuplicateAction::Copy,
            integrity_level: IntegrityLevel::Checksum,
            write_quality_tags: false,
            checkpoint_interval_sec: 30,
            extractor_timeout_sec: 30,
            transaction_retries: 2,
            dry_run: false,
            genre_categories: default_genre_categories(),
            filename_patterns: default_filename_patterns(),
        }
    }
}

/// Default category → keyword mapping; consumed as data, overridable in TOML
fn default_genre_categories() -> Vec<GenreCategory> {
    fn cat(name: &str, keywords: &[&str]) -> GenreCategory {
        GenreCategory {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
    vec![
        cat("House", &["house", "deep house", "tech house", "electro house"]),
        cat("Techno", &["techno", "minimal", "detroit"]),
        cat("Trance", &["trance", "psytrance", "uplifting"]),
        cat("Drum & Bass", &["drum & bass", "drum and bass", "dnb", "jungle"]),
        cat("Electronic", &["electronic", "electronica", "edm", "dance", "idm", "ambient"]),
        cat("Hip-Hop", &["hip-hop", "hip hop", "rap", "trap"]),
        cat("Rock", &["rock", "metal", "punk", "grunge", "indie"]),
        cat("Pop", &["pop", "synthpop", "disco"]),
        cat("Funk & Soul", &["funk", "soul", "r&b", "rnb", "motown"]),
        cat("Jazz", &["jazz", "swing", "bebop"]),
        cat("Classical", &["classical", "orchestral", "opera", "baroque"]),
        cat("Reggae", &["reggae", "dub", "dancehall", "ska"]),
        cat("Latin", &["latin", "salsa", "bossa", "cumbia", "reggaeton"]),
    ]
}

/// DJ-library filename shapes, highest priority first
fn default_filename_patterns() -> Vec<String> {
    vec![
        // "128 - Artist - Title (Remix) [Label]"
        r"^(?P<bpm>\d{2,3})\s*-\s*(?P<artist>.+?)\s*-\s*(?P<title>.+?)(?P<version>\s*\([^)]*\))?(?P<label>\s*\[[^\]]*\])?$".into(),
        // "01. Artist - Title"
        r"^(?P<track>\d{1,3})\.\s*(?P<artist>.+?)\s*-\s*(?P<title>.+?)(?P<version>\s*\([^)]*\))?$".into(),
        // "Artist_-_Title_[Label]"
        r"^(?P<artist>.+?)_-_(?P<title>.+?)(?P<label>_\[[^\]]*\])?$".into(),
        // "Artist - Title (Extended Mix) [Label]"
        r"^(?P<artist>.+?)\s*-\s*(?P<title>.+?)(?P<version>\s*\([^)]*\))?(?P<label>\s*\[[^\]]*\])?$".into(),
    ]
}

impl CleanupConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, CleanupError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CleanupError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: CleanupConfig = toml::from_str(&content)
            .map_err(|e| CleanupError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path: CLI argument → environment → default
    pub fn resolve_path(cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var("CRATEKEEPER_CONFIG") {
            return PathBuf::from(path);
        }
        PathBuf::from("cratekeeper.toml")
    }

    /// Sanity checks that would otherwise surface mid-pipeline
    pub fn validate(&self) -> Result<(), CleanupError> {
        if self.source_roots.is_empty() {
            return Err(CleanupError::Config("source_roots is empty".into()));
        }
        if self.min_size_bytes > self.max_size_bytes {
            return Err(CleanupError::Config(
                "min_size_bytes exceeds max_size_bytes".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.duplicate_similarity_threshold) {
            return Err(CleanupError::Config(
                "duplicate_similarity_threshold must be in [0, 1]".into(),
            ));
        }
        let w = &self.quality_weights;
        let sum = w.technical + w.fidelity + w.integrity + w.reference;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(CleanupError::Config(format!(
                "quality_weights must sum to 1.0, got {sum}"
            )));
        }
        if self.batch_size == 0 || self.max_workers == 0 {
            return Err(CleanupError::Config(
                "batch_size and max_workers must be positive".into(),
            ));
        }
        for root in &self.source_roots {
            if self.is_protected(root) {
                tracing::warn!(root = %root.display(), "source root is under a protected prefix; it will be scanned read-only");
            }
        }
        if self.is_protected(&self.target_root) || self.is_protected(&self.rejected_root) {
            return Err(CleanupError::Config(
                "target_root / rejected_root may not lie under a protected prefix".into(),
            ));
        }
        Ok(())
    }

    /// True when `path` lies under any protected prefix
    pub fn is_protected(&self, path: &Path) -> bool {
        self.protected_roots
            .iter()
            .any(|root| path.starts_with(root))
    }

    /// Store file path inside the workspace directory
    pub fn store_path(&self) -> PathBuf {
        self.workspace_dir.join("music_cleanup.db")
    }

    /// Channel capacity between pipeline stages
    pub fn channel_capacity(&self) -> usize {
        self.batch_size * 2
    }

    /// Analyzer pool size after the soft memory cap. Each in-flight
    /// analysis is budgeted at 8 MiB (hash chunk, tag buffers, probe
    /// window), so a small memory_limit_bytes throttles prefetch.
    pub fn effective_workers(&self) -> usize {
        const PER_WORKER_BUDGET: u64 = 8 * 1024 * 1024;
        let by_memory = (self.memory_limit_bytes / PER_WORKER_BUDGET).max(1) as usize;
        self.max_workers.min(by_memory).max(1)
    }

    /// Serialized snapshot used for the `system_config` drift check
    pub fn snapshot_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> CleanupConfig {
        CleanupConfig {
            source_roots: vec![PathBuf::from("/music/in")],
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        minimal().validate().expect("defaults should validate");
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = QualityWeights::default();
        assert!((w.technical + w.fidelity + w.integrity + w.reference - 1.0).abs() < 1e-9);
        assert_eq!(w.reference, 0.35);
    }

    #[test]
    fn test_rejects_swapped_size_bounds() {
        let mut config = minimal();
        config.min_size_bytes = 10;
        config.max_size_bytes = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_protected_prefix_check() {
        let mut config = minimal();
        config.protected_roots = vec![PathBuf::from("/music/masters")];
        assert!(config.is_protected(Path::new("/music/masters/vault/a.flac")));
        assert!(!config.is_protected(Path::new("/music/in/a.flac")));
    }

    #[test]
    fn test_protected_target_rejected() {
        let mut config = minimal();
        config.protected_roots = vec![PathBuf::from("/srv/out")];
        config.target_root = PathBuf::from("/srv/out/organized");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = minimal();
        let text = toml::to_string(&config).unwrap();
        let back: CleanupConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.batch_size, config.batch_size);
        assert_eq!(back.duplicate_action, DuplicateAction::Copy);
        assert_eq!(back.handle_conflicts, ConflictPolicy::SkipIfSameHash);
    }

    #[test]
    fn test_memory_limit_throttles_workers() {
        let mut config = minimal();
        config.max_workers = 8;
        config.memory_limit_bytes = 16 * 1024 * 1024;
        assert_eq!(config.effective_workers(), 2);
        config.memory_limit_bytes = 1;
        assert_eq!(config.effective_workers(), 1);
        config.memory_limit_bytes = 512 * 1024 * 1024;
        assert_eq!(config.effective_workers(), 8);
    }

    #[test]
    fn test_genre_categories_ordered() {
        let config = minimal();
        assert_eq!(config.genre_categories[0].name, "House");
        // "house" must match House before Electronic's broader keywords
        let first = config
            .genre_categories
            .iter()
            .find(|c| c.keywords.iter().any(|k| "deep house".contains(k.as_str())))
            .unwrap();
        assert_eq!(first.name, "House");
    }
}
