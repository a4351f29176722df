//! Analysis phase
//!
//! Walks discovered files in id order, analyzing each batch with a
//! bounded worker pool. Per-file failures are recorded on the file row
//! and never block the batch.

use super::{CleanupOrchestrator, RunState};
use crate::db::files;
use crate::error::CleanupError;
use crate::models::{FileStatus, Phase};
use futures::stream::{FuturesUnordered, StreamExt};

impl CleanupOrchestrator {
    pub(super) async fn phase_analysis(&self, state: &mut RunState) -> Result<(), CleanupError> {
        let mut after_id = 0i64;

        loop {
            let batch =
                files::list_by_status(&self.db, FileStatus::Discovered, after_id, self.config.batch_size)
                    .await?;
            if batch.is_empty() {
                break;
            }
            after_id = batch.last().map(|f| f.id).unwrap_or(after_id);

            // Bounded fan-out: at most max_workers files in flight
            let analyze = |file: crate::models::FileRecord| async move {
                let outcome = self.analyzer.analyze_file(&file).await;
                (file, outcome)
            };
            let mut pending = FuturesUnordered::new();
            let mut queue = batch.into_iter();

            for file in queue.by_ref().take(self.config.effective_workers()) {
                pending.push(analyze(file));
            }

            while let Some((file, outcome)) = pending.next().await {
                if let Some(next_file) = queue.next() {
                    pending.push(analyze(next_file));
                }

                match outcome {
                    Ok(_) => {
                        state.counters.analyzed += 1;
                        state.counters.bytes_processed += file.size_bytes.max(0) as u64;
                    }
                    // Store failures abort the pipeline to the last
                    // checkpoint; everything else stays per-file
                    Err(crate::error::AnalyzerError::Store(e)) => {
                        return Err(CleanupError::Store(e));
                    }
                    Err(e) => {
                        tracing::warn!(file = %file.path, error = %e, "analysis failed");
                        files::set_failed(&self.db, file.id, e.kind(), &e.to_string()).await?;
                        state.counters.failed += 1;
                    }
                }
            }

            state.batch_id += 1;
            self.checkpointer
                .force_checkpoint(Phase::Analysis, state.batch_id, &state.counters)
                .await?;

            if self.cancelled() {
                break;
            }
        }

        Ok(())
    }
}
