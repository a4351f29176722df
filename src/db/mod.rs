//! Unified store access
//!
//! One SQLite file holds every core entity; all components share a single
//! pool opened in WAL mode with foreign keys enforced. Sub-modules are
//! per-entity query functions taking `&SqlitePool`, so callers compose
//! them inside their own transactions where needed.

pub mod checkpoints;
pub mod duplicates;
pub mod files;
pub mod fingerprints;
pub mod migrations;
pub mod operations;
pub mod quality;
pub mod rejections;
pub mod retry;
pub mod schema;
pub mod targets;

use crate::error::StoreError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Default bound for busy-retry loops, milliseconds
pub const DEFAULT_BUSY_WAIT_MS: u64 = 5000;

/// Open (creating if missing) the unified store and bring its schema up
/// to date, folding in any legacy sidecar stores found next to it.
pub async fn open_store(db_path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .map_err(StoreError::from)?;

    migrations::run_migrations(&pool, db_path).await?;

    tracing::info!(db = %db_path.display(), "unified store ready");
    Ok(pool)
}

/// In-memory store with the full schema, for tests
pub async fn open_memory_store() -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    // A single connection: each in-memory connection is its own database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(StoreError::from)?;

    schema::create_schema(&pool).await?;
    migrations::mark_current_version(&pool).await?;
    Ok(pool)
}

/// Read a value from the `system_config` table
pub async fn get_system_config(pool: &SqlitePool, key: &str) -> Result<Option<String>, StoreError> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM system_config WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from)?;
    Ok(value)
}

/// Upsert a value into the `system_config` table
pub async fn set_system_config(pool: &SqlitePool, key: &str, value: &str) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO system_config (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .map_err(StoreError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_store_has_schema() {
        let pool = open_memory_store().await.unwrap();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='files'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_system_config_round_trip() {
        let pool = open_memory_store().await.unwrap();
        assert_eq!(get_system_config(&pool, "missing").await.unwrap(), None);
        set_system_config(&pool, "k", "v1").await.unwrap();
        set_system_config(&pool, "k", "v2").await.unwrap();
        assert_eq!(
            get_system_config(&pool, "k").await.unwrap(),
            Some("v2".to_string())
        );
    }
}
