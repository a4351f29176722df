//! Checkpointing and shutdown coordination
//!
//! A checkpoint records phase, last completed batch, counters, and the
//! ids of transactions still open. Written on a configured interval AND
//! at every batch boundary; the signal listener trips a cancellation
//! token, and the orchestrator forces a final checkpoint before the
//! process surrenders.

use crate::db::checkpoints;
use crate::error::StoreError;
use crate::models::{Counters, Phase};
use parking_lot::Mutex;
use sqlx::SqlitePool;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct Checkpointer {
    db: SqlitePool,
    interval: Duration,
    last_write: Mutex<Instant>,
}

impl Checkpointer {
    pub fn new(db: SqlitePool, interval_sec: u64) -> Self {
        Self {
            db,
            interval: Duration::from_secs(interval_sec),
            last_write: Mutex::new(Instant::now()),
        }
    }

    /// Interval-driven checkpoint; no-op when the interval has not elapsed
    pub async fn maybe_checkpoint(
        &self,
        phase: Phase,
        last_batch_id: i64,
        counters: &Counters,
    ) -> Result<Option<i64>, StoreError> {
        {
            let last = self.last_write.lock();
            if last.elapsed() < self.interval {
                return Ok(None);
            }
        }
        let id = self.force_checkpoint(phase, last_batch_id, counters).await?;
        Ok(Some(id))
    }

    /// Unconditional checkpoint: batch boundaries, phase boundaries, and
    /// shutdown all land here
    pub async fn force_checkpoint(
        &self,
        phase: Phase,
        last_batch_id: i64,
        counters: &Counters,
    ) -> Result<i64, StoreError> {
        let open_ids = self.open_transaction_ids().await?;
        let id = checkpoints::write_checkpoint(&self.db, phase, last_batch_id, counters, &open_ids)
            .await?;
        *self.last_write.lock() = Instant::now();

        tracing::debug!(
            checkpoint = id,
            phase = phase.as_str(),
            last_batch_id,
            open_transactions = open_ids.len(),
            "checkpoint written"
        );
        Ok(id)
    }

    async fn open_transaction_ids(&self) -> Result<Vec<String>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM transactions WHERE status IN ('open', 'committing') ORDER BY created_at",
        )
        .fetch_all(&self.db)
        .await
        .map_err(StoreError::from)?;
        Ok(ids)
    }
}

/// Install interrupt/termination handlers that trip the token. The
/// signal path is the only thing allowed to set it besides an operator
/// command; workers observe it at batch boundaries.
pub fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "cannot install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::warn!("interrupt received, finishing current files then stopping");
                }
                _ = sigterm.recv() => {
                    tracing::warn!("termination requested, finishing current files then stopping");
                }
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::warn!("interrupt received, finishing current files then stopping");
        }
        token.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_memory_store, operations};

    #[tokio::test]
    async fn test_force_checkpoint_records_open_transactions() {
        let pool = open_memory_store().await.unwrap();
        operations::create_transaction(&pool, "txn-a", "test").await.unwrap();

        let checkpointer = Checkpointer::new(pool.clone(), 3600);
        checkpointer
            .force_checkpoint(Phase::Organization, 7, &Counters::default())
            .await
            .unwrap();

        let latest = checkpoints::latest_checkpoint(&pool).await.unwrap().unwrap();
        assert_eq!(latest.phase, Phase::Organization);
        assert_eq!(latest.last_batch_id, 7);
        assert_eq!(latest.open_transaction_ids, vec!["txn-a".to_string()]);
    }

    #[tokio::test]
    async fn test_maybe_checkpoint_respects_interval() {
        let pool = open_memory_store().await.unwrap();
        let checkpointer = Checkpointer::new(pool.clone(), 3600);

        // Interval not elapsed: skipped
        let skipped = checkpointer
            .maybe_checkpoint(Phase::Analysis, 1, &Counters::default())
            .await
            .unwrap();
        assert!(skipped.is_none());

        // Zero interval: always writes
        let eager = Checkpointer::new(pool.clone(), 0);
        let written = eager
            .maybe_checkpoint(Phase::Analysis, 2, &Counters::default())
            .await
            .unwrap();
        assert!(written.is_some());
    }

    #[tokio::test]
    async fn test_checkpoint_ids_increase() {
        let pool = open_memory_store().await.unwrap();
        let checkpointer = Checkpointer::new(pool.clone(), 0);
        let a = checkpointer
            .force_checkpoint(Phase::Discovery, 1, &Counters::default())
            .await
            .unwrap();
        let b = checkpointer
            .force_checkpoint(Phase::Discovery, 2, &Counters::default())
            .await
            .unwrap();
        assert!(b > a);
    }
}
