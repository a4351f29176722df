//! Discovery phase
//!
//! Streams candidates from the producer over a bounded channel and
//! upserts them in batches. Re-running is harmless: already-discovered
//! paths are ignored by the upsert.

use super::{CleanupOrchestrator, RunState};
use crate::db::files;
use crate::error::CleanupError;
use crate::models::Phase;
use crate::services::scanner::DiscoveryProducer;
use tokio::sync::mpsc;

impl CleanupOrchestrator {
    pub(super) async fn phase_discovery(&self, state: &mut RunState) -> Result<(), CleanupError> {
        let producer = DiscoveryProducer::from_config(&self.config);
        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity());
        let walker = producer.spawn_stream(tx);

        let mut in_batch = 0usize;
        while let Some(candidate) = rx.recv().await {
            let (_, inserted) = files::upsert_discovered(&self.db, &candidate).await?;
            if inserted {
                state.counters.discovered += 1;
            }
            in_batch += 1;

            if in_batch >= self.config.batch_size {
                in_batch = 0;
                state.batch_id += 1;
                self.checkpointer
                    .force_checkpoint(Phase::Discovery, state.batch_id, &state.counters)
                    .await?;

                if self.cancelled() {
                    // Closing the channel stops the walker
                    rx.close();
                    break;
                }
            }
        }

        let stats = walker
            .await
            .map_err(|e| CleanupError::Config(format!("discovery task panicked: {e}")))?;
        for error in &stats.errors {
            tracing::warn!(error = %error, "discovery error (skipped)");
        }
        tracing::info!(
            emitted = stats.emitted,
            skipped_protected = stats.skipped_protected,
            skipped_filtered = stats.skipped_filtered,
            "discovery finished"
        );
        Ok(())
    }
}
