//! Grouping phase
//!
//! Thin wrapper over the duplicate grouper: one global pass over the
//! healthy set, then a checkpoint.

use super::{CleanupOrchestrator, RunState};
use crate::error::CleanupError;

impl CleanupOrchestrator {
    pub(super) async fn phase_grouping(&self, state: &mut RunState) -> Result<(), CleanupError> {
        let outcome = self.grouper.group_healthy_files().await?;
        state.counters.grouped += outcome.files_grouped as u64;
        state.batch_id += 1;
        Ok(())
    }
}
