//! Core records mirroring the unified store schema
//!
//! The store's schema is authoritative; these types are its in-memory
//! mirror. Enum variants map to the TEXT values the CHECK constraints
//! accept, via `as_str`/`parse` pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle status of a file row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Discovered,
    Analyzed,
    Healthy,
    Quarantined,
    Organized,
    Rejected,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Discovered => "discovered",
            FileStatus::Analyzed => "analyzed",
            FileStatus::Healthy => "healthy",
            FileStatus::Quarantined => "quarantined",
            FileStatus::Organized => "organized",
            FileStatus::Rejected => "rejected",
            FileStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "discovered" => FileStatus::Discovered,
            "analyzed" => FileStatus::Analyzed,
            "healthy" => FileStatus::Healthy,
            "quarantined" => FileStatus::Quarantined,
            "organized" => FileStatus::Organized,
            "rejected" => FileStatus::Rejected,
            "failed" => FileStatus::Failed,
            _ => return None,
        })
    }
}

/// A row in the `files` table
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    /// Absolute path; unique and stable. After organization it reflects
    /// the destination.
    pub path: String,
    pub content_hash: Option<String>,
    pub size_bytes: i64,
    pub modified_time: DateTime<Utc>,
    pub fingerprint_id: Option<i64>,
    pub metadata_id: Option<i64>,
    pub quality_score: Option<f64>,
    pub status: FileStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Content-addressed fingerprint row, shared across files
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintRow {
    pub id: i64,
    pub fingerprint: String,
    pub duration_sec: f64,
    pub sample_rate_hz: i64,
    pub bit_depth: Option<i64>,
    pub channels: i64,
    pub codec: String,
    pub bitrate_kbps: i64,
}

/// Where a metadata field set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Tag,
    Service,
    FilenameParse,
}

impl MetadataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataSource::Tag => "tag",
            MetadataSource::Service => "service",
            MetadataSource::FilenameParse => "filename-parse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "tag" => MetadataSource::Tag,
            "service" => MetadataSource::Service,
            "filename-parse" => MetadataSource::FilenameParse,
            _ => return None,
        })
    }
}

/// Deduplicated metadata row
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    pub id: i64,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<i64>,
    pub genre: Option<String>,
    pub track_number: Option<i64>,
    pub disc_number: Option<i64>,
    pub source: MetadataSource,
}

impl MetadataRow {
    /// True when artist and title are both present and non-placeholder.
    /// Placeholder values never reach the organized tree.
    pub fn has_usable_identity(&self) -> bool {
        fn usable(v: &Option<String>) -> bool {
            match v {
                Some(s) => {
                    let t = s.trim();
                    !t.is_empty()
                        && !t.eq_ignore_ascii_case("unknown")
                        && !t.eq_ignore_ascii_case("unknown artist")
                        && !t.eq_ignore_ascii_case("unknown title")
                        && !t.eq_ignore_ascii_case("various")
                        && !t.eq_ignore_ascii_case("untitled")
                }
                None => false,
            }
        }
        usable(&self.artist) && usable(&self.title)
    }
}

/// Letter grade on the fixed step mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    APlus,
    A,
    AMinus,
    BPlus,
    B,
    BMinus,
    CPlus,
    C,
    CMinus,
    D,
    F,
}

impl Grade {
    /// Fixed step mapping on the final score
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            Grade::APlus
        } else if score >= 90.0 {
            Grade::A
        } else if score >= 85.0 {
            Grade::AMinus
        } else if score >= 80.0 {
            Grade::BPlus
        } else if score >= 75.0 {
            Grade::B
        } else if score >= 70.0 {
            Grade::BMinus
        } else if score >= 65.0 {
            Grade::CPlus
        } else if score >= 60.0 {
            Grade::C
        } else if score >= 55.0 {
            Grade::CMinus
        } else if score >= 50.0 {
            Grade::D
        } else {
            Grade::F
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::BMinus => "B-",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::CMinus => "C-",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "A+" => Grade::APlus,
            "A" => Grade::A,
            "A-" => Grade::AMinus,
            "B+" => Grade::BPlus,
            "B" => Grade::B,
            "B-" => Grade::BMinus,
            "C+" => Grade::CPlus,
            "C" => Grade::C,
            "C-" => Grade::CMinus,
            "D" => Grade::D,
            "F" => Grade::F,
            _ => return None,
        })
    }
}

/// What the scorer recommends doing with a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedAction {
    Keep,
    Replace,
    Quarantine,
    DeleteDuplicate,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::Keep => "keep",
            RecommendedAction::Replace => "replace",
            RecommendedAction::Quarantine => "quarantine",
            RecommendedAction::DeleteDuplicate => "delete_duplicate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "keep" => RecommendedAction::Keep,
            "replace" => RecommendedAction::Replace,
            "quarantine" => RecommendedAction::Quarantine,
            "delete_duplicate" => RecommendedAction::DeleteDuplicate,
            _ => return None,
        })
    }
}

/// Quality analysis for one file; sub-scores all in [0, 100]
#[derive(Debug, Clone)]
pub struct QualityAnalysis {
    pub id: i64,
    pub file_id: i64,
    pub technical_score: f64,
    pub audio_fidelity_score: f64,
    pub integrity_score: f64,
    pub reference_score: Option<f64>,
    pub final_score: f64,
    pub grade: Grade,
    pub recommended_action: RecommendedAction,
    pub defects: Vec<String>,
    /// Detector health score in [0, 100]; drives the corruption filter
    pub health_score: i64,
    pub clipping_ratio: Option<f64>,
    pub silence_ratio: Option<f64>,
}

/// How a duplicate group was keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKeyKind {
    Hash,
    Fingerprint,
}

impl GroupKeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupKeyKind::Hash => "hash",
            GroupKeyKind::Fingerprint => "fingerprint",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "hash" => GroupKeyKind::Hash,
            "fingerprint" => GroupKeyKind::Fingerprint,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    pub id: i64,
    pub key_kind: GroupKeyKind,
    pub key_value: String,
    pub primary_file_id: i64,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct DuplicateMember {
    pub id: i64,
    pub group_id: i64,
    pub file_id: i64,
    pub is_primary: bool,
    pub similarity: f64,
}

/// Staged filesystem mutation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Copy,
    /// Finalizes a copy+verify relocation by removing the source
    Move,
    Link,
    WriteTag,
    CreateDir,
    Rename,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Copy => "copy",
            OperationKind::Move => "move",
            OperationKind::Link => "link",
            OperationKind::WriteTag => "write-tag",
            OperationKind::CreateDir => "create-dir",
            OperationKind::Rename => "rename",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "copy" => OperationKind::Copy,
            "move" => OperationKind::Move,
            "link" => OperationKind::Link,
            "write-tag" => OperationKind::WriteTag,
            "create-dir" => OperationKind::CreateDir,
            "rename" => OperationKind::Rename,
            _ => return None,
        })
    }

    /// True for kinds that mutate the filesystem at the source path
    pub fn writes_source(&self) -> bool {
        matches!(
            self,
            OperationKind::Move | OperationKind::WriteTag | OperationKind::Rename
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Performed,
    Committed,
    RolledBack,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Performed => "performed",
            OperationStatus::Committed => "committed",
            OperationStatus::RolledBack => "rolled-back",
            OperationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => OperationStatus::Pending,
            "performed" => OperationStatus::Performed,
            "committed" => OperationStatus::Committed,
            "rolled-back" => OperationStatus::RolledBack,
            "failed" => OperationStatus::Failed,
            _ => return None,
        })
    }
}

/// A row in the append-only operation log
#[derive(Debug, Clone)]
pub struct FileOperation {
    pub id: i64,
    pub file_id: Option<i64>,
    pub transaction_id: String,
    pub kind: OperationKind,
    pub source_path: String,
    pub destination_path: Option<String>,
    /// Source content hash recorded at staging time for copy/move verification
    pub content_hash: Option<String>,
    /// Kind-specific payload (e.g. score tags for write-tag)
    pub payload: Option<String>,
    pub status: OperationStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Open,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Open => "open",
            TransactionStatus::Committing => "committing",
            TransactionStatus::Committed => "committed",
            TransactionStatus::RollingBack => "rolling-back",
            TransactionStatus::RolledBack => "rolled-back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "open" => TransactionStatus::Open,
            "committing" => TransactionStatus::Committing,
            "committed" => TransactionStatus::Committed,
            "rolling-back" => TransactionStatus::RollingBack,
            "rolled-back" => TransactionStatus::RolledBack,
            _ => return None,
        })
    }
}

/// A group of operations that commit or roll back as one
#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub id: String,
    pub status: TransactionStatus,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
}

/// Pipeline phases in their fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Discovery,
    Analysis,
    CorruptionFilter,
    Grouping,
    Organization,
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Discovery => "discovery",
            Phase::Analysis => "analysis",
            Phase::CorruptionFilter => "corruption-filter",
            Phase::Grouping => "grouping",
            Phase::Organization => "organization",
            Phase::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "discovery" => Phase::Discovery,
            "analysis" => Phase::Analysis,
            "corruption-filter" => Phase::CorruptionFilter,
            "grouping" => Phase::Grouping,
            "organization" => Phase::Organization,
            "complete" => Phase::Complete,
            _ => return None,
        })
    }
}

/// Progress counters persisted with every checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub discovered: u64,
    pub analyzed: u64,
    pub quarantined: u64,
    pub grouped: u64,
    pub organized: u64,
    pub rejected: u64,
    pub failed: u64,
    pub bytes_processed: u64,
}

/// A recovery checkpoint row
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: i64,
    pub phase: Phase,
    pub last_batch_id: i64,
    pub counters: Counters,
    pub open_transaction_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Why a file was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionCategory {
    Duplicate,
    LowQuality,
    Corrupted,
    Unsupported,
    InvalidMetadata,
    Error,
}

impl RejectionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::Duplicate => "duplicate",
            RejectionCategory::LowQuality => "low_quality",
            RejectionCategory::Corrupted => "corrupted",
            RejectionCategory::Unsupported => "unsupported",
            RejectionCategory::InvalidMetadata => "invalid_metadata",
            RejectionCategory::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "duplicate" => RejectionCategory::Duplicate,
            "low_quality" => RejectionCategory::LowQuality,
            "corrupted" => RejectionCategory::Corrupted,
            "unsupported" => RejectionCategory::Unsupported,
            "invalid_metadata" => RejectionCategory::InvalidMetadata,
            "error" => RejectionCategory::Error,
            _ => return None,
        })
    }

    /// Subfolder of the rejected root this category lands in
    pub fn subfolder(&self) -> &'static str {
        match self {
            RejectionCategory::Duplicate => "duplicates",
            RejectionCategory::LowQuality => "low_quality",
            RejectionCategory::Corrupted => "corrupted",
            RejectionCategory::Unsupported => "unsupported",
            RejectionCategory::InvalidMetadata => "invalid_metadata",
            RejectionCategory::Error => "error",
        }
    }
}

/// Audit record for a file that was analyzed but not organized
#[derive(Debug, Clone)]
pub struct RejectionEntry {
    pub id: i64,
    pub file_id: i64,
    pub category: RejectionCategory,
    pub chosen_file_id: Option<i64>,
    pub group_id: Option<i64>,
    /// Path the file held before rejection; restore target
    pub original_path: String,
    /// Current location under the rejected root
    pub rejected_path: String,
    /// Content hash captured at rejection time, verified on restore
    pub content_hash: Option<String>,
    pub reason_text: String,
    pub rejected_at: DateTime<Utc>,
}

/// Planned destination for an organized file
#[derive(Debug, Clone)]
pub struct OrganizationTarget {
    pub id: i64,
    pub file_id: i64,
    pub genre: String,
    pub decade: String,
    pub final_path: String,
    pub pattern_used: String,
}

/// A file waiting on operator attention before it can be organized
#[derive(Debug, Clone)]
pub struct MetadataQueueEntry {
    pub id: i64,
    pub file_id: i64,
    pub reason: String,
    pub queued_at: DateTime<Utc>,
}

/// One discovered candidate emitted by the scanner
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_steps() {
        assert_eq!(Grade::from_score(97.0), Grade::APlus);
        assert_eq!(Grade::from_score(95.0), Grade::APlus);
        assert_eq!(Grade::from_score(94.9), Grade::A);
        assert_eq!(Grade::from_score(90.0), Grade::A);
        assert_eq!(Grade::from_score(87.0), Grade::AMinus);
        assert_eq!(Grade::from_score(80.0), Grade::BPlus);
        assert_eq!(Grade::from_score(77.5), Grade::B);
        assert_eq!(Grade::from_score(70.0), Grade::BMinus);
        assert_eq!(Grade::from_score(66.0), Grade::CPlus);
        assert_eq!(Grade::from_score(61.0), Grade::C);
        assert_eq!(Grade::from_score(55.0), Grade::CMinus);
        assert_eq!(Grade::from_score(52.0), Grade::D);
        assert_eq!(Grade::from_score(49.9), Grade::F);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            FileStatus::Discovered,
            FileStatus::Analyzed,
            FileStatus::Healthy,
            FileStatus::Quarantined,
            FileStatus::Organized,
            FileStatus::Rejected,
            FileStatus::Failed,
        ] {
            assert_eq!(FileStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(FileStatus::parse("bogus"), None);
    }

    #[test]
    fn test_usable_identity_rejects_placeholders() {
        let mut meta = MetadataRow {
            id: 1,
            artist: Some("Daft Punk".into()),
            title: Some("Around the World".into()),
            album: None,
            year: Some(1997),
            genre: Some("House".into()),
            track_number: None,
            disc_number: None,
            source: MetadataSource::Tag,
        };
        assert!(meta.has_usable_identity());

        meta.artist = Some("Unknown Artist".into());
        assert!(!meta.has_usable_identity());

        meta.artist = Some("Daft Punk".into());
        meta.title = Some("  ".into());
        assert!(!meta.has_usable_identity());
    }

    #[test]
    fn test_operation_kind_round_trip() {
        for kind in [
            OperationKind::Copy,
            OperationKind::Move,
            OperationKind::Link,
            OperationKind::WriteTag,
            OperationKind::CreateDir,
            OperationKind::Rename,
        ] {
            assert_eq!(OperationKind::parse(kind.as_str()), Some(kind));
        }
    }
}
