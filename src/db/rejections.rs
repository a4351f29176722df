//! Rejection entries and the needs-review metadata queue

use crate::db::files::parse_ts;
use crate::error::StoreError;
use crate::models::{MetadataQueueEntry, RejectionCategory, RejectionEntry};
use sqlx::{Row, SqlitePool};

#[allow(clippy::too_many_arguments)]
pub async fn insert_entry(
    pool: &SqlitePool,
    file_id: i64,
    category: RejectionCategory,
    chosen_file_id: Option<i64>,
    group_id: Option<i64>,
    original_path: &str,
    rejected_path: &str,
    content_hash: Option<&str>,
    reason_text: &str,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO rejection_entries
            (file_id, category, chosen_file_id, group_id, original_path,
             rejected_path, content_hash, reason_text)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(file_id)
    .bind(category.as_str())
    .bind(chosen_file_id)
    .bind(group_id)
    .bind(original_path)
    .bind(rejected_path)
    .bind(content_hash)
    .bind(reason_text)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(result.last_insert_rowid())
}

fn map_entry(row: sqlx::sqlite::SqliteRow) -> Result<RejectionEntry, StoreError> {
    let category_raw: String = row.get("category");
    let rejected_raw: String = row.get("rejected_at");
    Ok(RejectionEntry {
        id: row.get("id"),
        file_id: row.get("file_id"),
        category: RejectionCategory::parse(&category_raw).ok_or_else(|| {
            StoreError::Integrity(format!("unknown rejection category '{category_raw}'"))
        })?,
        chosen_file_id: row.get("chosen_file_id"),
        group_id: row.get("group_id"),
        original_path: row.get("original_path"),
        rejected_path: row.get("rejected_path"),
        content_hash: row.get("content_hash"),
        reason_text: row.get("reason_text"),
        rejected_at: parse_ts(&rejected_raw),
    })
}

const ENTRY_COLS: &str = "id, file_id, category, chosen_file_id, group_id, original_path, \
                          rejected_path, content_hash, reason_text, rejected_at";

pub async fn get_entry(pool: &SqlitePool, id: i64) -> Result<Option<RejectionEntry>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {ENTRY_COLS} FROM rejection_entries WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;
    row.map(map_entry).transpose()
}

pub async fn list_entries(pool: &SqlitePool) -> Result<Vec<RejectionEntry>, StoreError> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLS} FROM rejection_entries ORDER BY id"
    ))
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;
    rows.into_iter().map(map_entry).collect()
}

pub async fn count_entries(pool: &SqlitePool) -> Result<i64, StoreError> {
    sqlx::query_scalar("SELECT COUNT(*) FROM rejection_entries")
        .fetch_one(pool)
        .await
        .map_err(StoreError::from)
}

/// Remove an entry after a successful restore
pub async fn delete_entry(pool: &SqlitePool, id: i64) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM rejection_entries WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

/// Queue a file for operator review; repeated queuing updates the reason
pub async fn queue_for_review(
    pool: &SqlitePool,
    file_id: i64,
    reason: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO metadata_queue (file_id, reason)
        VALUES (?, ?)
        ON CONFLICT(file_id) DO UPDATE SET reason = excluded.reason
        "#,
    )
    .bind(file_id)
    .bind(reason)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(())
}

pub async fn list_review_queue(pool: &SqlitePool) -> Result<Vec<MetadataQueueEntry>, StoreError> {
    let rows = sqlx::query("SELECT id, file_id, reason, queued_at FROM metadata_queue ORDER BY id")
        .fetch_all(pool)
        .await
        .map_err(StoreError::from)?;

    Ok(rows
        .iter()
        .map(|row| {
            let queued_raw: String = row.get("queued_at");
            MetadataQueueEntry {
                id: row.get("id"),
                file_id: row.get("file_id"),
                reason: row.get("reason"),
                queued_at: parse_ts(&queued_raw),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{files, open_memory_store};
    use crate::models::DiscoveredFile;
    use chrono::Utc;
    use std::path::PathBuf;

    async fn seed_file(pool: &SqlitePool, path: &str) -> i64 {
        files::upsert_discovered(
            pool,
            &DiscoveredFile {
                path: PathBuf::from(path),
                size_bytes: 1,
                modified_time: Utc::now(),
            },
        )
        .await
        .unwrap()
        .0
    }

    #[tokio::test]
    async fn test_entry_round_trip_and_delete() {
        let pool = open_memory_store().await.unwrap();
        let file_id = seed_file(&pool, "/in/b.mp3").await;
        let chosen = seed_file(&pool, "/in/a.mp3").await;

        let id = insert_entry(
            &pool,
            file_id,
            RejectionCategory::Duplicate,
            Some(chosen),
            None,
            "/in/b.mp3",
            "/rejected/duplicates/b_duplicate_2.mp3",
            Some("cafe"),
            "duplicate of a.mp3 (score 91.0 vs 72.5)",
        )
        .await
        .unwrap();

        let entry = get_entry(&pool, id).await.unwrap().unwrap();
        assert_eq!(entry.category, RejectionCategory::Duplicate);
        assert_eq!(entry.chosen_file_id, Some(chosen));
        assert!(entry.rejected_path.contains("duplicates"));

        delete_entry(&pool, id).await.unwrap();
        assert!(get_entry(&pool, id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_review_queue_upserts() {
        let pool = open_memory_store().await.unwrap();
        let file_id = seed_file(&pool, "/in/m.mp3").await;

        queue_for_review(&pool, file_id, "no genre match").await.unwrap();
        queue_for_review(&pool, file_id, "missing year").await.unwrap();

        let queue = list_review_queue(&pool).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].reason, "missing year");
    }
}
