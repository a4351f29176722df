//! Corruption-filter phase
//!
//! Classifies every analyzed file. Healthy files advance to grouping;
//! critically corrupted files are quarantined into the rejected tree
//! through one transaction per batch, so the grouper only ever sees
//! healthy input.

use super::{CleanupOrchestrator, RunState};
use crate::db::{files, fingerprints, quality};
use crate::error::CleanupError;
use crate::models::{FileRecord, FileStatus, Phase, RejectionCategory};
use crate::services::corruption_filter::FilterVerdict;

impl CleanupOrchestrator {
    pub(super) async fn phase_filtering(&self, state: &mut RunState) -> Result<(), CleanupError> {
        let mut after_id = 0i64;

        loop {
            let batch =
                files::list_by_status(&self.db, FileStatus::Analyzed, after_id, self.config.batch_size)
                    .await?;
            if batch.is_empty() {
                break;
            }
            after_id = batch.last().map(|f| f.id).unwrap_or(after_id);

            let mut quarantine: Vec<(FileRecord, Vec<String>)> = Vec::new();

            for file in batch {
                let Some(analysis) = quality::get_for_file(&self.db, file.id).await? else {
                    tracing::warn!(file = %file.path, "analyzed file without analysis row; failing it");
                    files::set_failed(&self.db, file.id, "analysis", "missing analysis row").await?;
                    state.counters.failed += 1;
                    continue;
                };

                let duration = match file.fingerprint_id {
                    Some(fp_id) => fingerprints::get_fingerprint(&self.db, fp_id)
                        .await?
                        .map(|fp| fp.duration_sec),
                    None => None,
                };

                match self.filter.classify(&analysis, duration) {
                    FilterVerdict::Healthy => {
                        files::set_status(&self.db, file.id, FileStatus::Healthy).await?;
                    }
                    FilterVerdict::Quarantine(reasons) => {
                        quarantine.push((file, reasons));
                    }
                }
            }

            if !quarantine.is_empty() {
                self.quarantine_batch(state, &quarantine).await?;
            }

            state.batch_id += 1;
            self.checkpointer
                .force_checkpoint(Phase::CorruptionFilter, state.batch_id, &state.counters)
                .await?;

            if self.cancelled() {
                break;
            }
        }

        Ok(())
    }

    async fn quarantine_batch(
        &self,
        state: &mut RunState,
        quarantine: &[(FileRecord, Vec<String>)],
    ) -> Result<(), CleanupError> {
        let txn = self.txn_manager.begin("quarantine corrupted files").await?;
        let mut ctx = crate::services::organizer::PlanContext::new();
        let mut planned = Vec::with_capacity(quarantine.len());

        for (file, reasons) in quarantine {
            planned.push(
                self.organizer
                    .plan_quarantine(
                        &self.txn_manager,
                        &txn,
                        file,
                        RejectionCategory::Corrupted,
                        &reasons.join("; "),
                        &mut ctx,
                    )
                    .await?,
            );
        }

        match self.txn_manager.commit(&txn).await {
            Ok(_) => {
                if self.txn_manager.is_dry_run() {
                    return Ok(());
                }
                for ((file, _), rejection) in quarantine.iter().zip(&planned) {
                    self.organizer.record_rejection(rejection).await?;
                    files::update_path(
                        &self.db,
                        file.id,
                        &rejection.rejected_path.to_string_lossy(),
                        FileStatus::Quarantined,
                    )
                    .await?;
                    state.counters.quarantined += 1;
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "quarantine transaction failed; files marked failed");
                state.rolled_back = true;
                for (file, _) in quarantine {
                    files::set_failed(&self.db, file.id, "quarantine", &e.to_string()).await?;
                    state.counters.failed += 1;
                }
                Ok(())
            }
        }
    }
}
