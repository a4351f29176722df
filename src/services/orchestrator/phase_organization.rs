//! Organization phase
//!
//! Consumes duplicate groups and healthy singletons: each group's
//! primary (and every singleton) is planned into the organized tree,
//! non-primaries into the rejected tree. One transaction per batch of
//! units; a failed transaction is retried up to the configured bound,
//! then its files are marked failed and the run records the rollback.

use super::{CleanupOrchestrator, RunState};
use crate::db::{duplicates, files, fingerprints, quality};
use crate::error::CleanupError;
use crate::models::{FileRecord, FileStatus, MetadataRow, Phase, QualityAnalysis};
use crate::services::organizer::{PlanContext, PlanOutcome, PlannedRejection};
use crate::services::transactions::CommitOutcome;

/// One schedulable unit: a primary with its losing siblings, or a
/// singleton with no siblings at all.
struct OrganizeUnit {
    primary: FileRecord,
    metadata: Option<MetadataRow>,
    analysis: QualityAnalysis,
    group_id: Option<i64>,
    /// (file, rank, reason) for each non-primary, rank 2..
    rejects: Vec<(FileRecord, usize, String)>,
}

/// What one committed unit decided, applied to the store post-commit
enum UnitResult {
    Organized {
        destination: std::path::PathBuf,
        conflict: Option<PlannedRejection>,
    },
    NeedsReview,
}

impl CleanupOrchestrator {
    pub(super) async fn phase_organization(&self, state: &mut RunState) -> Result<(), CleanupError> {
        let units = self.collect_units().await?;
        tracing::info!(units = units.len(), "organization planning");

        for chunk in units.chunks(self.config.batch_size.max(1)) {
            self.organize_batch(state, chunk).await?;

            state.batch_id += 1;
            self.checkpointer
                .force_checkpoint(Phase::Organization, state.batch_id, &state.counters)
                .await?;

            if self.cancelled() {
                break;
            }
        }
        Ok(())
    }

    /// Plan and commit one batch of units, retrying the whole batch on
    /// transaction failure up to the configured bound.
    async fn organize_batch(
        &self,
        state: &mut RunState,
        units: &[OrganizeUnit],
    ) -> Result<(), CleanupError> {
        let attempts = self.config.transaction_retries.max(0) + 1;

        for attempt in 1..=attempts {
            let txn = self.txn_manager.begin("organize batch").await?;
            let mut ctx = PlanContext::new();
            let mut unit_results: Vec<UnitResult> = Vec::with_capacity(units.len());
            let mut rejections: Vec<PlannedRejection> = Vec::new();
            let mut plan_failed = None;

            for unit in units {
                match self
                    .organizer
                    .plan_primary(
                        &self.txn_manager,
                        &txn,
                        &unit.primary,
                        unit.metadata.as_ref(),
                        &unit.analysis,
                        &mut ctx,
                    )
                    .await
                {
                    Ok(PlanOutcome::Planned { destination, conflict_entry }) => {
                        unit_results.push(UnitResult::Organized {
                            destination,
                            conflict: conflict_entry,
                        });
                    }
                    Ok(PlanOutcome::NeedsReview { .. }) => {
                        unit_results.push(UnitResult::NeedsReview);
                    }
                    Err(e) => {
                        plan_failed = Some(e);
                        break;
                    }
                }

                for (reject, rank, reason) in &unit.rejects {
                    match self
                        .organizer
                        .plan_duplicate_rejection(
                            &self.txn_manager,
                            &txn,
                            reject,
                            *rank,
                            unit.group_id.unwrap_or_default(),
                            &unit.primary,
                            reason,
                            &mut ctx,
                        )
                        .await
                    {
                        Ok(planned) => rejections.push(planned),
                        Err(e) => {
                            plan_failed = Some(e);
                            break;
                        }
                    }
                }
                if plan_failed.is_some() {
                    break;
                }
            }

            if let Some(e) = plan_failed {
                self.txn_manager.rollback(&txn).await?;
                tracing::error!(error = %e, attempt, "planning failed, batch rolled back");
                if attempt == attempts {
                    state.rolled_back = true;
                    self.fail_batch(state, units, &e.to_string()).await?;
                    return Ok(());
                }
                continue;
            }

            match self.txn_manager.commit(&txn).await {
                Ok(CommitOutcome::DryRun { planned }) => {
                    tracing::info!(planned, "dry-run batch planned");
                    return Ok(());
                }
                Ok(CommitOutcome::Committed { .. }) => {
                    self.apply_batch(state, units, unit_results, rejections).await?;
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "batch transaction failed");
                    if attempt == attempts {
                        state.rolled_back = true;
                        self.fail_batch(state, units, &e.to_string()).await?;
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    /// Post-commit bookkeeping: statuses, paths, manifest entries
    async fn apply_batch(
        &self,
        state: &mut RunState,
        units: &[OrganizeUnit],
        unit_results: Vec<UnitResult>,
        rejections: Vec<PlannedRejection>,
    ) -> Result<(), CleanupError> {
        for (unit, result) in units.iter().zip(unit_results) {
            match result {
                UnitResult::Organized { destination, conflict } => {
                    files::update_path(
                        &self.db,
                        unit.primary.id,
                        &destination.to_string_lossy(),
                        FileStatus::Organized,
                    )
                    .await?;
                    state.counters.organized += 1;
                    if let Some(conflict) = conflict {
                        self.organizer.record_rejection(&conflict).await?;
                    }
                }
                UnitResult::NeedsReview => {}
            }
        }

        for rejection in rejections {
            self.organizer.record_rejection(&rejection).await?;
            files::update_path(
                &self.db,
                rejection.file_id,
                &rejection.rejected_path.to_string_lossy(),
                FileStatus::Rejected,
            )
            .await?;
            state.counters.rejected += 1;
        }
        Ok(())
    }

    async fn fail_batch(
        &self,
        state: &mut RunState,
        units: &[OrganizeUnit],
        error: &str,
    ) -> Result<(), CleanupError> {
        for unit in units {
            files::set_failed(&self.db, unit.primary.id, "organize", error).await?;
            state.counters.failed += 1;
            for (reject, _, _) in &unit.rejects {
                files::set_failed(&self.db, reject.id, "organize", error).await?;
                state.counters.failed += 1;
            }
        }
        Ok(())
    }

    /// Build the work list: one unit per duplicate group, one per
    /// healthy singleton.
    async fn collect_units(&self) -> Result<Vec<OrganizeUnit>, CleanupError> {
        let mut units = Vec::new();

        for group in duplicates::list_groups(&self.db).await? {
            // Members were persisted in election order: rank = position + 1
            let members = duplicates::members_of(&self.db, group.id).await?;
            let mut primary: Option<FileRecord> = None;
            let mut rejects = Vec::new();

            for (position, member) in members.iter().enumerate() {
                let Some(file) = files::get_by_id(&self.db, member.file_id).await? else {
                    continue;
                };
                // A member already organized or rejected by a previous
                // (checkpointed) run is done
                if matches!(file.status, FileStatus::Organized | FileStatus::Rejected) {
                    if member.is_primary {
                        primary = None;
                        rejects.clear();
                        break;
                    }
                    continue;
                }
                if member.is_primary {
                    primary = Some(file);
                } else {
                    rejects.push((file, position + 1, member.similarity));
                }
            }

            let Some(primary) = primary else {
                continue;
            };
            let Some(analysis) = quality::get_for_file(&self.db, primary.id).await? else {
                tracing::warn!(file = %primary.path, "group primary without analysis; skipping group");
                continue;
            };
            let metadata = self.metadata_for(&primary).await?;

            let rejects = {
                let mut out = Vec::with_capacity(rejects.len());
                for (file, rank, similarity) in rejects {
                    let loser_score = file.quality_score.unwrap_or(0.0);
                    let reason = format!(
                        "duplicate of {} (score {loser_score:.1} vs {:.1}, similarity {similarity:.2})",
                        primary.path, analysis.final_score
                    );
                    out.push((file, rank, reason));
                }
                out
            };

            units.push(OrganizeUnit {
                primary,
                metadata,
                analysis,
                group_id: Some(group.id),
                rejects,
            });
        }

        // Healthy singletons: no group membership
        let mut after_id = 0i64;
        loop {
            let batch =
                files::list_by_status(&self.db, FileStatus::Healthy, after_id, self.config.batch_size)
                    .await?;
            if batch.is_empty() {
                break;
            }
            after_id = batch.last().map(|f| f.id).unwrap_or(after_id);

            for file in batch {
                if duplicates::is_grouped(&self.db, file.id).await? {
                    continue;
                }
                let Some(analysis) = quality::get_for_file(&self.db, file.id).await? else {
                    tracing::warn!(file = %file.path, "healthy file without analysis; skipping");
                    continue;
                };
                let metadata = self.metadata_for(&file).await?;
                units.push(OrganizeUnit {
                    primary: file,
                    metadata,
                    analysis,
                    group_id: None,
                    rejects: Vec::new(),
                });
            }
        }

        Ok(units)
    }

    async fn metadata_for(&self, file: &FileRecord) -> Result<Option<MetadataRow>, CleanupError> {
        match file.metadata_id {
            Some(id) => Ok(fingerprints::get_metadata(&self.db, id).await?),
            None => Ok(None),
        }
    }
}
