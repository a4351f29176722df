//! Organization planning
//!
//! Turns analysis results into staged filesystem operations: primaries
//! (and healthy singletons) get a destination under
//! `{target_root}/{category}/{decade}/`, non-primaries get a categorized
//! spot under the rejected root, and anything without usable identity,
//! genre category, or year goes to the needs-review queue instead of an
//! "Unknown" folder. All plans flow through the transaction manager;
//! nothing here touches the filesystem directly.
//!
//! Planning returns rejection entries as data; the caller records them
//! in the manifest only after the transaction commits, so a failed or
//! retried transaction leaves no phantom audit rows.

use crate::config::{CleanupConfig, ConflictPolicy, DuplicateAction};
use crate::db::{rejections, targets};
use crate::error::{CleanupError, TransactionError};
use crate::extractors::ScoreTags;
use crate::models::{
    FileRecord, MetadataRow, OperationKind, QualityAnalysis, RejectionCategory,
};
use crate::services::transactions::{StagedOp, TransactionManager};
use crate::utils::paths;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

/// A rejection decided at planning time, recorded after commit
#[derive(Debug, Clone)]
pub struct PlannedRejection {
    pub file_id: i64,
    pub category: RejectionCategory,
    pub chosen_file_id: Option<i64>,
    pub group_id: Option<i64>,
    pub original_path: String,
    pub rejected_path: PathBuf,
    pub content_hash: Option<String>,
    pub reason_text: String,
}

/// Destinations already claimed by earlier plans in the same batch.
/// The filesystem only learns about a destination at perform time, so
/// without this two same-named files planned together would collide.
#[derive(Debug, Default)]
pub struct PlanContext {
    reserved: std::collections::HashSet<PathBuf>,
}

impl PlanContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What planning decided for a primary file
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    Planned {
        destination: PathBuf,
        /// Audit entry for a forced `_dupN` rename at the destination
        conflict_entry: Option<PlannedRejection>,
    },
    NeedsReview {
        reason: String,
    },
}

pub struct Organizer {
    db: SqlitePool,
    config: CleanupConfig,
}

impl Organizer {
    pub fn new(db: SqlitePool, config: CleanupConfig) -> Self {
        Self { db, config }
    }

    /// First category whose keyword appears in the lowercased genre wins
    pub fn resolve_category(&self, genre: &str) -> Option<String> {
        let genre = genre.to_lowercase();
        self.config
            .genre_categories
            .iter()
            .find(|category| category.keywords.iter().any(|k| genre.contains(k.as_str())))
            .map(|category| category.name.clone())
    }

    /// Plan the organize operations for a primary (or singleton) file.
    /// Returns NeedsReview instead of planning when identity, category,
    /// or year is missing; those files never land in an Unknown folder.
    pub async fn plan_primary(
        &self,
        txn_manager: &TransactionManager,
        txn_id: &str,
        file: &FileRecord,
        metadata: Option<&MetadataRow>,
        analysis: &QualityAnalysis,
        ctx: &mut PlanContext,
    ) -> Result<PlanOutcome, CleanupError> {
        let Some(metadata) = metadata else {
            return self.review(file, "no metadata available").await;
        };
        if !metadata.has_usable_identity() {
            return self.review(file, "unknown or placeholder artist/title").await;
        }
        let Some(genre) = metadata.genre.as_deref().filter(|g| !g.trim().is_empty()) else {
            return self.review(file, "no genre").await;
        };
        let Some(category) = self.resolve_category(genre) else {
            return self
                .review(file, &format!("no category matches genre '{genre}'"))
                .await;
        };
        let Some(year) = metadata.year else {
            return self.review(file, "no year").await;
        };

        let decade = paths::decade_for_year(year);
        let filename = self.render_filename(file, metadata, analysis, year);
        let dir = self.config.target_root.join(&category).join(&decade);
        let desired = dir.join(&filename);

        let (destination, conflict_note) = self.resolve_conflict(&desired, file, ctx).await?;

        self.stage_relocation(txn_manager, txn_id, file, &destination).await?;

        if self.config.write_quality_tags {
            let payload = serde_json::to_string(&ScoreTags {
                final_score: analysis.final_score,
                grade: analysis.grade.as_str().to_string(),
            })
            .map_err(|e| CleanupError::Config(e.to_string()))?;
            txn_manager
                .stage(
                    txn_id,
                    StagedOp {
                        kind: OperationKind::WriteTag,
                        file_id: Some(file.id),
                        source: destination.clone(),
                        destination: None,
                        content_hash: None,
                        payload: Some(payload),
                    },
                )
                .await?;
        }

        targets::upsert_target(
            &self.db,
            file.id,
            &category,
            &decade,
            &destination.to_string_lossy(),
            &self.config.organize_pattern,
        )
        .await?;

        // A same-name different-content file was already in place: the
        // renamed destination goes into the manifest so the operator can
        // audit the collision.
        let conflict_entry = conflict_note.map(|note| PlannedRejection {
            file_id: file.id,
            category: RejectionCategory::Duplicate,
            chosen_file_id: None,
            group_id: None,
            original_path: file.path.clone(),
            rejected_path: destination.clone(),
            content_hash: file.content_hash.clone(),
            reason_text: note,
        });

        Ok(PlanOutcome::Planned {
            destination,
            conflict_entry,
        })
    }

    /// Plan the rejection of a non-primary group member. Rank is the
    /// position in the group sorted by descending final score; the
    /// primary holds rank 1 and is never rejected.
    #[allow(clippy::too_many_arguments)]
    pub async fn plan_duplicate_rejection(
        &self,
        txn_manager: &TransactionManager,
        txn_id: &str,
        file: &FileRecord,
        rank: usize,
        group_id: i64,
        chosen: &FileRecord,
        reason_text: &str,
        ctx: &mut PlanContext,
    ) -> Result<PlannedRejection, CleanupError> {
        let source = Path::new(&file.path);
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        let ext = source
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        let dir = self
            .config
            .rejected_root
            .join(RejectionCategory::Duplicate.subfolder());
        let desired = dir.join(format!("{stem}_duplicate_{rank}{ext}"));
        let (destination, _) = self.resolve_conflict(&desired, file, ctx).await?;

        self.stage_relocation(txn_manager, txn_id, file, &destination).await?;

        Ok(PlannedRejection {
            file_id: file.id,
            category: RejectionCategory::Duplicate,
            chosen_file_id: Some(chosen.id),
            group_id: Some(group_id),
            original_path: file.path.clone(),
            rejected_path: destination,
            content_hash: file.content_hash.clone(),
            reason_text: reason_text.to_string(),
        })
    }

    /// Plan moving a critically corrupted (or otherwise rejected) file
    /// into its categorized spot under the rejected root.
    pub async fn plan_quarantine(
        &self,
        txn_manager: &TransactionManager,
        txn_id: &str,
        file: &FileRecord,
        category: RejectionCategory,
        reason_text: &str,
        ctx: &mut PlanContext,
    ) -> Result<PlannedRejection, CleanupError> {
        let source = Path::new(&file.path);
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("file-{}", file.id));

        let dir = self.config.rejected_root.join(category.subfolder());
        let (destination, _) = self.resolve_conflict(&dir.join(&name), file, ctx).await?;

        self.stage_relocation(txn_manager, txn_id, file, &destination).await?;

        Ok(PlannedRejection {
            file_id: file.id,
            category,
            chosen_file_id: None,
            group_id: None,
            original_path: file.path.clone(),
            rejected_path: destination,
            content_hash: file.content_hash.clone(),
            reason_text: reason_text.to_string(),
        })
    }

    /// Persist a planned rejection after its transaction committed
    pub async fn record_rejection(&self, planned: &PlannedRejection) -> Result<i64, CleanupError> {
        let id = rejections::insert_entry(
            &self.db,
            planned.file_id,
            planned.category,
            planned.chosen_file_id,
            planned.group_id,
            &planned.original_path,
            &planned.rejected_path.to_string_lossy(),
            planned.content_hash.as_deref(),
            &planned.reason_text,
        )
        .await?;
        Ok(id)
    }

    async fn review(&self, file: &FileRecord, reason: &str) -> Result<PlanOutcome, CleanupError> {
        tracing::info!(file = %file.path, reason, "routed to needs-review");
        rejections::queue_for_review(&self.db, file.id, reason).await?;
        Ok(PlanOutcome::NeedsReview {
            reason: reason.to_string(),
        })
    }

    fn render_filename(
        &self,
        file: &FileRecord,
        metadata: &MetadataRow,
        analysis: &QualityAnalysis,
        year: i64,
    ) -> String {
        let artist = paths::sanitize_component(metadata.artist.as_deref().unwrap_or("-"));
        let title = paths::sanitize_component(metadata.title.as_deref().unwrap_or("-"));
        let album = paths::sanitize_component(metadata.album.as_deref().unwrap_or(""));
        let score_pct = analysis.final_score.round() as i64;
        let track = metadata
            .track_number
            .map(|t| format!("{t:02}"))
            .unwrap_or_default();

        let stem = self
            .config
            .organize_pattern
            .replace("{year}", &year.to_string())
            .replace("{artist}", &artist)
            .replace("{title}", &title)
            .replace("{album}", &album)
            .replace("{track}", &track)
            .replace("{score}", &score_pct.to_string());
        let stem = paths::sanitize_component(&stem);

        let ext = Path::new(&file.path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let stem = paths::cap_stem(&stem, ext.len(), self.config.max_filename_len);
        format!("{stem}{ext}")
    }

    /// Apply the conflict policy at a desired destination, considering
    /// both the filesystem and destinations reserved earlier in the same
    /// batch. Returns the final destination plus an audit note when a
    /// rename was forced by different pre-existing content.
    async fn resolve_conflict(
        &self,
        desired: &Path,
        file: &FileRecord,
        ctx: &mut PlanContext,
    ) -> Result<(PathBuf, Option<String>), CleanupError> {
        if !desired.exists() && !ctx.reserved.contains(desired) {
            ctx.reserved.insert(desired.to_path_buf());
            return Ok((desired.to_path_buf(), None));
        }

        match self.config.handle_conflicts {
            ConflictPolicy::Fail => Err(CleanupError::Transaction(TransactionError::Prepare(
                format!("destination already exists: {}", desired.display()),
            ))),
            ConflictPolicy::SkipIfSameHash => {
                // Only an on-disk file can satisfy the identical-content
                // skip; a same-batch reservation is always different
                // content (identical content would have hash-grouped)
                if desired.exists() {
                    if let (Some(own_hash), Ok(existing_hash)) = (
                        file.content_hash.as_deref(),
                        crate::services::hashing::hash_file(desired, self.config.hash_algorithm)
                            .await,
                    ) {
                        if own_hash == existing_hash {
                            // Identical content: keep the name, the
                            // transaction manager classifies the op as a skip
                            ctx.reserved.insert(desired.to_path_buf());
                            return Ok((desired.to_path_buf(), None));
                        }
                    }
                }
                let renamed = self.next_free_dup_name(desired, ctx)?;
                let note = format!(
                    "name conflict with pre-existing {} holding different content",
                    desired.display()
                );
                ctx.reserved.insert(renamed.clone());
                Ok((renamed, Some(note)))
            }
            ConflictPolicy::Rename => {
                let renamed = self.next_free_dup_name(desired, ctx)?;
                ctx.reserved.insert(renamed.clone());
                Ok((renamed, None))
            }
        }
    }

    /// Smallest N such that `stem _dupN.ext` is neither on disk nor
    /// reserved by this batch
    fn next_free_dup_name(
        &self,
        desired: &Path,
        ctx: &PlanContext,
    ) -> Result<PathBuf, CleanupError> {
        let stem = desired
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());
        let ext = desired
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let dir = desired.parent().unwrap_or_else(|| Path::new("."));

        for n in 2..10_000 {
            let candidate = dir.join(format!("{stem} _dup{n}{ext}"));
            if !candidate.exists() && !ctx.reserved.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(CleanupError::Config(format!(
            "cannot find free duplicate name for {}",
            desired.display()
        )))
    }

    /// Stage create-dir plus the configured relocation kind
    async fn stage_relocation(
        &self,
        txn_manager: &TransactionManager,
        txn_id: &str,
        file: &FileRecord,
        destination: &Path,
    ) -> Result<(), CleanupError> {
        if let Some(parent) = destination.parent() {
            txn_manager
                .stage(
                    txn_id,
                    StagedOp {
                        kind: OperationKind::CreateDir,
                        file_id: None,
                        source: parent.to_path_buf(),
                        destination: Some(parent.to_path_buf()),
                        content_hash: None,
                        payload: None,
                    },
                )
                .await?;
        }

        let source = PathBuf::from(&file.path);
        match self.config.duplicate_action {
            DuplicateAction::Copy => {
                txn_manager
                    .stage(
                        txn_id,
                        StagedOp {
                            kind: OperationKind::Copy,
                            file_id: Some(file.id),
                            source,
                            destination: Some(destination.to_path_buf()),
                            content_hash: file.content_hash.clone(),
                            payload: None,
                        },
                    )
                    .await?;
            }
            DuplicateAction::Move => {
                // copy + verify + remove-source, each staged
                txn_manager
                    .stage(
                        txn_id,
                        StagedOp {
                            kind: OperationKind::Copy,
                            file_id: Some(file.id),
                            source: source.clone(),
                            destination: Some(destination.to_path_buf()),
                            content_hash: file.content_hash.clone(),
                            payload: None,
                        },
                    )
                    .await?;
                txn_manager
                    .stage(
                        txn_id,
                        StagedOp {
                            kind: OperationKind::Move,
                            file_id: Some(file.id),
                            source,
                            destination: Some(destination.to_path_buf()),
                            content_hash: file.content_hash.clone(),
                            payload: None,
                        },
                    )
                    .await?;
            }
            DuplicateAction::Link => {
                txn_manager
                    .stage(
                        txn_id,
                        StagedOp {
                            kind: OperationKind::Link,
                            file_id: Some(file.id),
                            source,
                            destination: Some(destination.to_path_buf()),
                            content_hash: file.content_hash.clone(),
                            payload: None,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
