//! Operation log and transaction rows
//!
//! The log is append-only: staged operations are never deleted, only
//! advanced through pending → performed → committed / rolled-back /
//! failed. Readers never block the writer.

use crate::db::files::parse_ts;
use crate::error::StoreError;
use crate::models::{
    FileOperation, OperationKind, OperationStatus, TransactionRow, TransactionStatus,
};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

pub async fn create_transaction(
    pool: &SqlitePool,
    id: &str,
    reason: &str,
) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO transactions (id, status, reason) VALUES (?, 'open', ?)")
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

pub async fn set_transaction_status(
    pool: &SqlitePool,
    id: &str,
    status: TransactionStatus,
) -> Result<(), StoreError> {
    let committed_at = match status {
        TransactionStatus::Committed => Some(Utc::now().to_rfc3339()),
        _ => None,
    };
    sqlx::query("UPDATE transactions SET status = ?, committed_at = COALESCE(?, committed_at) WHERE id = ?")
        .bind(status.as_str())
        .bind(committed_at)
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

pub async fn get_transaction(
    pool: &SqlitePool,
    id: &str,
) -> Result<Option<TransactionRow>, StoreError> {
    let row = sqlx::query(
        "SELECT id, status, reason, created_at, committed_at FROM transactions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;

    row.map(map_transaction_row).transpose()
}

fn map_transaction_row(row: sqlx::sqlite::SqliteRow) -> Result<TransactionRow, StoreError> {
    let status_raw: String = row.get("status");
    let created_raw: String = row.get("created_at");
    let committed_raw: Option<String> = row.get("committed_at");
    Ok(TransactionRow {
        id: row.get("id"),
        status: TransactionStatus::parse(&status_raw).ok_or_else(|| {
            StoreError::Integrity(format!("unknown transaction status '{status_raw}'"))
        })?,
        reason: row.get("reason"),
        created_at: parse_ts(&created_raw),
        committed_at: committed_raw.as_deref().map(parse_ts),
    })
}

/// Transactions a recovery run must roll back: anything not terminal
pub async fn incomplete_transactions(pool: &SqlitePool) -> Result<Vec<TransactionRow>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT id, status, reason, created_at, committed_at
        FROM transactions
        WHERE status IN ('open', 'committing', 'rolling-back')
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;

    rows.into_iter().map(map_transaction_row).collect()
}

/// Append a pending operation to a transaction's log
#[allow(clippy::too_many_arguments)]
pub async fn stage_operation(
    pool: &SqlitePool,
    transaction_id: &str,
    file_id: Option<i64>,
    kind: OperationKind,
    source_path: &str,
    destination_path: Option<&str>,
    content_hash: Option<&str>,
    payload: Option<&str>,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO file_operations
            (transaction_id, file_id, kind, source_path, destination_path, content_hash, payload, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'pending')
        "#,
    )
    .bind(transaction_id)
    .bind(file_id)
    .bind(kind.as_str())
    .bind(source_path)
    .bind(destination_path)
    .bind(content_hash)
    .bind(payload)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(result.last_insert_rowid())
}

fn map_operation_row(row: sqlx::sqlite::SqliteRow) -> Result<FileOperation, StoreError> {
    let kind_raw: String = row.get("kind");
    let status_raw: String = row.get("status");
    let started_raw: Option<String> = row.get("started_at");
    let finished_raw: Option<String> = row.get("finished_at");
    Ok(FileOperation {
        id: row.get("id"),
        file_id: row.get("file_id"),
        transaction_id: row.get("transaction_id"),
        kind: OperationKind::parse(&kind_raw)
            .ok_or_else(|| StoreError::Integrity(format!("unknown operation kind '{kind_raw}'")))?,
        source_path: row.get("source_path"),
        destination_path: row.get("destination_path"),
        content_hash: row.get("content_hash"),
        payload: row.get("payload"),
        status: OperationStatus::parse(&status_raw).ok_or_else(|| {
            StoreError::Integrity(format!("unknown operation status '{status_raw}'"))
        })?,
        started_at: started_raw.as_deref().map(parse_ts),
        finished_at: finished_raw.as_deref().map(parse_ts),
        error: row.get("error"),
    })
}

const OP_COLS: &str = "id, file_id, transaction_id, kind, source_path, destination_path, \
                       content_hash, payload, status, started_at, finished_at, error";

/// All operations of a transaction in insertion (= perform) order
pub async fn ops_for_transaction(
    pool: &SqlitePool,
    transaction_id: &str,
) -> Result<Vec<FileOperation>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {OP_COLS} FROM file_operations WHERE transaction_id = ? ORDER BY id"
    ))
    .bind(transaction_id)
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;

    rows.into_iter().map(map_operation_row).collect()
}

/// Operations of a transaction in a given status, insertion order
pub async fn ops_with_status(
    pool: &SqlitePool,
    transaction_id: &str,
    status: OperationStatus,
) -> Result<Vec<FileOperation>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {OP_COLS} FROM file_operations WHERE transaction_id = ? AND status = ? ORDER BY id"
    ))
    .bind(transaction_id)
    .bind(status.as_str())
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;

    rows.into_iter().map(map_operation_row).collect()
}

pub async fn mark_op_started(pool: &SqlitePool, op_id: i64) -> Result<(), StoreError> {
    sqlx::query("UPDATE file_operations SET started_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(op_id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

pub async fn set_op_status(
    pool: &SqlitePool,
    op_id: i64,
    status: OperationStatus,
    error: Option<&str>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE file_operations SET status = ?, finished_at = ?, error = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(error)
        .bind(op_id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

/// Flip every performed operation of a transaction to committed
pub async fn mark_performed_committed(
    pool: &SqlitePool,
    transaction_id: &str,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE file_operations SET status = 'committed' WHERE transaction_id = ? AND status = 'performed'",
    )
    .bind(transaction_id)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_store;

    #[tokio::test]
    async fn test_transaction_lifecycle_rows() {
        let pool = open_memory_store().await.unwrap();
        create_transaction(&pool, "txn-1", "organize batch 3").await.unwrap();

        let txn = get_transaction(&pool, "txn-1").await.unwrap().unwrap();
        assert_eq!(txn.status, TransactionStatus::Open);
        assert!(txn.committed_at.is_none());

        set_transaction_status(&pool, "txn-1", TransactionStatus::Committing).await.unwrap();
        set_transaction_status(&pool, "txn-1", TransactionStatus::Committed).await.unwrap();

        let txn = get_transaction(&pool, "txn-1").await.unwrap().unwrap();
        assert_eq!(txn.status, TransactionStatus::Committed);
        assert!(txn.committed_at.is_some());
    }

    #[tokio::test]
    async fn test_ops_preserve_insertion_order() {
        let pool = open_memory_store().await.unwrap();
        create_transaction(&pool, "txn-1", "test").await.unwrap();

        for i in 0..3 {
            stage_operation(
                &pool,
                "txn-1",
                None,
                OperationKind::Copy,
                &format!("/src/{i}"),
                Some(&format!("/dst/{i}")),
                Some("hash"),
                None,
            )
            .await
            .unwrap();
        }

        let ops = ops_for_transaction(&pool, "txn-1").await.unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].source_path, "/src/0");
        assert_eq!(ops[2].source_path, "/src/2");
        assert!(ops.iter().all(|op| op.status == OperationStatus::Pending));
    }

    #[tokio::test]
    async fn test_incomplete_transactions_excludes_terminal() {
        let pool = open_memory_store().await.unwrap();
        create_transaction(&pool, "open", "a").await.unwrap();
        create_transaction(&pool, "committing", "b").await.unwrap();
        create_transaction(&pool, "done", "c").await.unwrap();
        set_transaction_status(&pool, "committing", TransactionStatus::Committing).await.unwrap();
        set_transaction_status(&pool, "done", TransactionStatus::Committed).await.unwrap();

        let incomplete = incomplete_transactions(&pool).await.unwrap();
        let ids: Vec<_> = incomplete.iter().map(|t| t.id.as_str()).collect();
        assert!(ids.contains(&"open"));
        assert!(ids.contains(&"committing"));
        assert!(!ids.contains(&"done"));
    }

    #[tokio::test]
    async fn test_mark_performed_committed_only_touches_performed() {
        let pool = open_memory_store().await.unwrap();
        create_transaction(&pool, "txn-1", "test").await.unwrap();
        let a = stage_operation(&pool, "txn-1", None, OperationKind::Copy, "/a", Some("/b"), None, None)
            .await
            .unwrap();
        let _b = stage_operation(&pool, "txn-1", None, OperationKind::Copy, "/c", Some("/d"), None, None)
            .await
            .unwrap();

        set_op_status(&pool, a, OperationStatus::Performed, None).await.unwrap();
        let flipped = mark_performed_committed(&pool, "txn-1").await.unwrap();
        assert_eq!(flipped, 1);

        let committed = ops_with_status(&pool, "txn-1", OperationStatus::Committed).await.unwrap();
        let pending = ops_with_status(&pool, "txn-1", OperationStatus::Pending).await.unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(pending.len(), 1);
    }
}
