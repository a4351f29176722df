//! Duplicate group persistence
//!
//! A group and its members are written in one store transaction so the
//! exactly-one-primary invariant can never be observed half-built.

use crate::error::StoreError;
use crate::models::{DuplicateGroup, DuplicateMember, GroupKeyKind};
use sqlx::{Row, SqlitePool};

/// A member to persist: (file_id, is_primary, similarity)
pub type MemberSpec = (i64, bool, f64);

/// Create a group with its members atomically. Exactly one member must be
/// primary and it must match `primary_file_id`.
pub async fn create_group(
    pool: &SqlitePool,
    key_kind: GroupKeyKind,
    key_value: &str,
    primary_file_id: i64,
    members: &[MemberSpec],
) -> Result<i64, StoreError> {
    let primaries = members.iter().filter(|(_, primary, _)| *primary).count();
    if primaries != 1 || !members.iter().any(|(id, p, _)| *p && *id == primary_file_id) {
        return Err(StoreError::Integrity(format!(
            "group must have exactly one primary matching primary_file_id (got {primaries})"
        )));
    }

    let mut tx = pool.begin().await.map_err(StoreError::from)?;

    let result = sqlx::query(
        "INSERT INTO duplicate_groups (key_kind, key_value, primary_file_id, size) VALUES (?, ?, ?, ?)",
    )
    .bind(key_kind.as_str())
    .bind(key_value)
    .bind(primary_file_id)
    .bind(members.len() as i64)
    .execute(&mut *tx)
    .await
    .map_err(StoreError::from)?;
    let group_id = result.last_insert_rowid();

    for (file_id, is_primary, similarity) in members {
        sqlx::query(
            "INSERT INTO duplicate_members (group_id, file_id, is_primary, similarity) VALUES (?, ?, ?, ?)",
        )
        .bind(group_id)
        .bind(file_id)
        .bind(*is_primary as i64)
        .bind(similarity)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;
    }

    tx.commit().await.map_err(StoreError::from)?;
    Ok(group_id)
}

pub async fn list_groups(pool: &SqlitePool) -> Result<Vec<DuplicateGroup>, StoreError> {
    let rows = sqlx::query(
        "SELECT id, key_kind, key_value, primary_file_id, size FROM duplicate_groups ORDER BY id",
    )
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;

    rows.iter()
        .map(|row| {
            let kind_raw: String = row.get("key_kind");
            Ok(DuplicateGroup {
                id: row.get("id"),
                key_kind: GroupKeyKind::parse(&kind_raw)
                    .ok_or_else(|| StoreError::Integrity(format!("unknown key kind '{kind_raw}'")))?,
                key_value: row.get("key_value"),
                primary_file_id: row.get("primary_file_id"),
                size: row.get("size"),
            })
        })
        .collect()
}

pub async fn members_of(
    pool: &SqlitePool,
    group_id: i64,
) -> Result<Vec<DuplicateMember>, StoreError> {
    let rows = sqlx::query(
        "SELECT id, group_id, file_id, is_primary, similarity FROM duplicate_members WHERE group_id = ? ORDER BY id",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;

    Ok(rows
        .iter()
        .map(|row| DuplicateMember {
            id: row.get("id"),
            group_id: row.get("group_id"),
            file_id: row.get("file_id"),
            is_primary: row.get::<i64, _>("is_primary") != 0,
            similarity: row.get("similarity"),
        })
        .collect())
}

/// True when the file belongs to any duplicate group
pub async fn is_grouped(pool: &SqlitePool, file_id: i64) -> Result<bool, StoreError> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM duplicate_members WHERE file_id = ?")
            .bind(file_id)
            .fetch_one(pool)
            .await
            .map_err(StoreError::from)?;
    Ok(count > 0)
}

pub async fn delete_group(pool: &SqlitePool, group_id: i64) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM duplicate_groups WHERE id = ?")
        .bind(group_id)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
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
    async fn test_create_group_with_members() {
        let pool = open_memory_store().await.unwrap();
        let a = seed_file(&pool, "/a.mp3").await;
        let b = seed_file(&pool, "/b.mp3").await;

        let group_id = create_group(
            &pool,
            GroupKeyKind::Hash,
            "h1",
            a,
            &[(a, true, 1.0), (b, false, 1.0)],
        )
        .await
        .unwrap();

        let members = members_of(&pool, group_id).await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members.iter().filter(|m| m.is_primary).count(), 1);
        assert!(is_grouped(&pool, a).await.unwrap());
        assert!(is_grouped(&pool, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_zero_or_two_primaries() {
        let pool = open_memory_store().await.unwrap();
        let a = seed_file(&pool, "/a.mp3").await;
        let b = seed_file(&pool, "/b.mp3").await;

        let none = create_group(&pool, GroupKeyKind::Hash, "h", a, &[(a, false, 1.0), (b, false, 1.0)]).await;
        assert!(matches!(none, Err(StoreError::Integrity(_))));

        let two = create_group(&pool, GroupKeyKind::Hash, "h", a, &[(a, true, 1.0), (b, true, 1.0)]).await;
        assert!(matches!(two, Err(StoreError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_duplicate_membership_rejected() {
        let pool = open_memory_store().await.unwrap();
        let a = seed_file(&pool, "/a.mp3").await;

        let result = create_group(
            &pool,
            GroupKeyKind::Fingerprint,
            "fp",
            a,
            &[(a, true, 1.0), (a, false, 0.95)],
        )
        .await;
        assert!(result.is_err());
        // Failed creation must leave nothing behind
        assert_eq!(list_groups(&pool).await.unwrap().len(), 0);
    }
}
