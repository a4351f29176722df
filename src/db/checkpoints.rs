//! Checkpoint persistence
//!
//! Checkpoint ids are strictly monotonic (AUTOINCREMENT); recovery always
//! reads the maximum id.

use crate::db::files::parse_ts;
use crate::error::StoreError;
use crate::models::{Checkpoint, Counters, Phase};
use sqlx::{Row, SqlitePool};

pub async fn write_checkpoint(
    pool: &SqlitePool,
    phase: Phase,
    last_batch_id: i64,
    counters: &Counters,
    open_transaction_ids: &[String],
) -> Result<i64, StoreError> {
    let counters_json =
        serde_json::to_string(counters).map_err(|e| StoreError::Io(e.to_string()))?;
    let txn_json =
        serde_json::to_string(open_transaction_ids).map_err(|e| StoreError::Io(e.to_string()))?;

    let result = sqlx::query(
        "INSERT INTO checkpoints (phase, last_batch_id, counters, open_transaction_ids) VALUES (?, ?, ?, ?)",
    )
    .bind(phase.as_str())
    .bind(last_batch_id)
    .bind(counters_json)
    .bind(txn_json)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;

    Ok(result.last_insert_rowid())
}

pub async fn latest_checkpoint(pool: &SqlitePool) -> Result<Option<Checkpoint>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, phase, last_batch_id, counters, open_transaction_ids, created_at
        FROM checkpoints ORDER BY id DESC LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;

    row.map(|row| {
        let phase_raw: String = row.get("phase");
        let counters_raw: String = row.get("counters");
        let txn_raw: String = row.get("open_transaction_ids");
        let created_raw: String = row.get("created_at");
        Ok(Checkpoint {
            id: row.get("id"),
            phase: Phase::parse(&phase_raw)
                .ok_or_else(|| StoreError::Integrity(format!("unknown phase '{phase_raw}'")))?,
            last_batch_id: row.get("last_batch_id"),
            counters: serde_json::from_str(&counters_raw).unwrap_or_default(),
            open_transaction_ids: serde_json::from_str(&txn_raw).unwrap_or_default(),
            created_at: parse_ts(&created_raw),
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_store;

    #[tokio::test]
    async fn test_latest_wins() {
        let pool = open_memory_store().await.unwrap();
        assert!(latest_checkpoint(&pool).await.unwrap().is_none());

        let counters = Counters {
            discovered: 10,
            ..Default::default()
        };
        let first = write_checkpoint(&pool, Phase::Discovery, 1, &counters, &[]).await.unwrap();
        let second = write_checkpoint(
            &pool,
            Phase::Analysis,
            2,
            &counters,
            &["txn-9".to_string()],
        )
        .await
        .unwrap();
        assert!(second > first);

        let latest = latest_checkpoint(&pool).await.unwrap().unwrap();
        assert_eq!(latest.id, second);
        assert_eq!(latest.phase, Phase::Analysis);
        assert_eq!(latest.last_batch_id, 2);
        assert_eq!(latest.counters.discovered, 10);
        assert_eq!(latest.open_transaction_ids, vec!["txn-9".to_string()]);
    }
}
