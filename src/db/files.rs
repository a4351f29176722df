//! File row persistence
//!
//! Files are upserted by discovery, enriched by the analyzer, and walked
//! in id order by the downstream phases (keyset pagination keeps memory
//! at O(batch_size)).

use crate::error::StoreError;
use crate::models::{DiscoveredFile, FileRecord, FileStatus};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Row, SqlitePool};

/// Parse timestamps written either by us (RFC 3339) or by SQLite's
/// CURRENT_TIMESTAMP default.
pub(crate) fn parse_ts(raw: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

fn map_file_row(row: &sqlx::sqlite::SqliteRow) -> Result<FileRecord, StoreError> {
    let status_raw: String = row.get("status");
    let status = FileStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Integrity(format!("unknown file status '{status_raw}'")))?;
    let modified_raw: String = row.get("modified_time");
    let created_raw: String = row.get("created_at");
    let updated_raw: String = row.get("updated_at");

    Ok(FileRecord {
        id: row.get("id"),
        path: row.get("path"),
        content_hash: row.get("content_hash"),
        size_bytes: row.get("size_bytes"),
        modified_time: parse_ts(&modified_raw),
        fingerprint_id: row.get("fingerprint_id"),
        metadata_id: row.get("metadata_id"),
        quality_score: row.get("quality_score"),
        status,
        last_error: row.get("last_error"),
        created_at: parse_ts(&created_raw),
        updated_at: parse_ts(&updated_raw),
    })
}

const SELECT_COLS: &str = "id, path, content_hash, size_bytes, modified_time, fingerprint_id, \
                           metadata_id, quality_score, status, last_error, created_at, updated_at";

/// Insert a discovered candidate; an existing path is left untouched.
/// Returns (file id, whether the row is new).
pub async fn upsert_discovered(
    pool: &SqlitePool,
    file: &DiscoveredFile,
) -> Result<(i64, bool), StoreError> {
    let path = file.path.to_string_lossy();
    let result = sqlx::query(
        r#"
        INSERT INTO files (path, size_bytes, modified_time, status)
        VALUES (?, ?, ?, 'discovered')
        ON CONFLICT(path) DO NOTHING
        "#,
    )
    .bind(path.as_ref())
    .bind(file.size_bytes as i64)
    .bind(file.modified_time.to_rfc3339())
    .execute(pool)
    .await
    .map_err(StoreError::from)?;

    let inserted = result.rows_affected() == 1;
    let id: i64 = sqlx::query_scalar("SELECT id FROM files WHERE path = ?")
        .bind(path.as_ref())
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)?;

    Ok((id, inserted))
}

pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<FileRecord>, StoreError> {
    let row = sqlx::query(&format!("SELECT {SELECT_COLS} FROM files WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?;
    row.as_ref().map(map_file_row).transpose()
}

pub async fn get_by_path(pool: &SqlitePool, path: &str) -> Result<Option<FileRecord>, StoreError> {
    let row = sqlx::query(&format!("SELECT {SELECT_COLS} FROM files WHERE path = ?"))
        .bind(path)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?;
    row.as_ref().map(map_file_row).transpose()
}

/// Files in `status`, ids strictly greater than `after_id`, capped at `limit`
pub async fn list_by_status(
    pool: &SqlitePool,
    status: FileStatus,
    after_id: i64,
    limit: usize,
) -> Result<Vec<FileRecord>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {SELECT_COLS} FROM files WHERE status = ? AND id > ? ORDER BY id LIMIT ?"
    ))
    .bind(status.as_str())
    .bind(after_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;

    rows.iter().map(map_file_row).collect()
}

pub async fn count_by_status(pool: &SqlitePool, status: FileStatus) -> Result<i64, StoreError> {
    sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE status = ?")
        .bind(status.as_str())
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)
}

/// Attach analysis results and advance the row to `analyzed`
pub async fn set_analyzed(
    pool: &SqlitePool,
    file_id: i64,
    content_hash: &str,
    fingerprint_id: Option<i64>,
    metadata_id: Option<i64>,
    quality_score: f64,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE files
        SET content_hash = ?, fingerprint_id = ?, metadata_id = ?,
            quality_score = ?, status = 'analyzed', last_error = NULL
        WHERE id = ?
        "#,
    )
    .bind(content_hash)
    .bind(fingerprint_id)
    .bind(metadata_id)
    .bind(quality_score)
    .bind(file_id)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(())
}

pub async fn set_status(
    pool: &SqlitePool,
    file_id: i64,
    status: FileStatus,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE files SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(file_id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

/// Mark a file failed with its error kind; the batch continues without it
pub async fn set_failed(
    pool: &SqlitePool,
    file_id: i64,
    error_kind: &str,
    detail: &str,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE files SET status = 'failed', last_error = ? WHERE id = ?")
        .bind(format!("{error_kind}: {detail}"))
        .bind(file_id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

/// Point a row at its new absolute path after a committed relocation.
/// When another row already holds the destination path (a re-discovered
/// source whose copy was organized by an earlier run), only the status
/// advances; the established destination row stays canonical.
pub async fn update_path(
    pool: &SqlitePool,
    file_id: i64,
    new_path: &str,
    status: FileStatus,
) -> Result<(), StoreError> {
    let occupied: Option<i64> = sqlx::query_scalar("SELECT id FROM files WHERE path = ? AND id != ?")
        .bind(new_path)
        .bind(file_id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?;

    if occupied.is_some() {
        tracing::debug!(
            file_id,
            path = new_path,
            "destination path already tracked; advancing status only"
        );
        return set_status(pool, file_id, status).await;
    }

    sqlx::query("UPDATE files SET path = ?, status = ? WHERE id = ?")
        .bind(new_path)
        .bind(status.as_str())
        .bind(file_id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_store;
    use std::path::PathBuf;

    fn candidate(path: &str, size: u64) -> DiscoveredFile {
        DiscoveredFile {
            path: PathBuf::from(path),
            size_bytes: size,
            modified_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_path() {
        let pool = open_memory_store().await.unwrap();

        let (id1, new1) = upsert_discovered(&pool, &candidate("/in/a.mp3", 100))
            .await
            .unwrap();
        let (id2, new2) = upsert_discovered(&pool, &candidate("/in/a.mp3", 100))
            .await
            .unwrap();

        assert!(new1);
        assert!(!new2);
        assert_eq!(id1, id2);
        assert_eq!(count_by_status(&pool, FileStatus::Discovered).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_analysis_transition() {
        let pool = open_memory_store().await.unwrap();
        let (id, _) = upsert_discovered(&pool, &candidate("/in/a.mp3", 100))
            .await
            .unwrap();

        set_analyzed(&pool, id, "deadbeef", None, None, 82.5)
            .await
            .unwrap();

        let record = get_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Analyzed);
        assert_eq!(record.content_hash.as_deref(), Some("deadbeef"));
        assert_eq!(record.quality_score, Some(82.5));
    }

    #[tokio::test]
    async fn test_keyset_pagination() {
        let pool = open_memory_store().await.unwrap();
        for i in 0..5 {
            upsert_discovered(&pool, &candidate(&format!("/in/{i}.mp3"), 100))
                .await
                .unwrap();
        }

        let first = list_by_status(&pool, FileStatus::Discovered, 0, 2)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        let next = list_by_status(&pool, FileStatus::Discovered, first[1].id, 10)
            .await
            .unwrap();
        assert_eq!(next.len(), 3);
        assert!(next[0].id > first[1].id);
    }

    #[tokio::test]
    async fn test_set_failed_records_kind() {
        let pool = open_memory_store().await.unwrap();
        let (id, _) = upsert_discovered(&pool, &candidate("/in/bad.mp3", 100))
            .await
            .unwrap();

        set_failed(&pool, id, "hash", "permission denied").await.unwrap();

        let record = get_by_id(&pool, id).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Failed);
        assert!(record.last_error.unwrap().starts_with("hash:"));
    }
}
