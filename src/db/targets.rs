//! Organization target persistence

use crate::error::StoreError;
use crate::models::OrganizationTarget;
use sqlx::{Row, SqlitePool};

pub async fn upsert_target(
    pool: &SqlitePool,
    file_id: i64,
    genre: &str,
    decade: &str,
    final_path: &str,
    pattern_used: &str,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO organization_targets (file_id, genre, decade, final_path, pattern_used)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(file_id) DO UPDATE SET
            genre = excluded.genre,
            decade = excluded.decade,
            final_path = excluded.final_path,
            pattern_used = excluded.pattern_used
        "#,
    )
    .bind(file_id)
    .bind(genre)
    .bind(decade)
    .bind(final_path)
    .bind(pattern_used)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(())
}

pub async fn get_target(
    pool: &SqlitePool,
    file_id: i64,
) -> Result<Option<OrganizationTarget>, StoreError> {
    let row = sqlx::query(
        "SELECT id, file_id, genre, decade, final_path, pattern_used FROM organization_targets WHERE file_id = ?",
    )
    .bind(file_id)
    .fetch_optional(pool)
    .await
    .map_err(StoreError::from)?;

    Ok(row.map(|row| OrganizationTarget {
        id: row.get("id"),
        file_id: row.get("file_id"),
        genre: row.get("genre"),
        decade: row.get("decade"),
        final_path: row.get("final_path"),
        pattern_used: row.get("pattern_used"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{files, open_memory_store};
    use crate::models::DiscoveredFile;
    use chrono::Utc;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_target_upsert_replaces() {
        let pool = open_memory_store().await.unwrap();
        let (file_id, _) = files::upsert_discovered(
            &pool,
            &DiscoveredFile {
                path: PathBuf::from("/a.mp3"),
                size_bytes: 1,
                modified_time: Utc::now(),
            },
        )
        .await
        .unwrap();

        upsert_target(&pool, file_id, "House", "1990s", "/out/House/1990s/x.mp3", "{artist}")
            .await
            .unwrap();
        upsert_target(&pool, file_id, "House", "2000s", "/out/House/2000s/x.mp3", "{artist}")
            .await
            .unwrap();

        let target = get_target(&pool, file_id).await.unwrap().unwrap();
        assert_eq!(target.decade, "2000s");
    }
}
