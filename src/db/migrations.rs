//! Versioned schema migrations
//!
//! Version 0 is an empty database; v1 installs the unified schema; v2
//! folds legacy per-concern sidecar stores (fingerprint cache, operation
//! log, progress tracker) into the unified store and archives them.
//! Migrations are idempotent and never modified once shipped; schema
//! changes get a new version.

use crate::db::schema;
use crate::error::StoreError;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

/// Increment when adding a migration
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Legacy sidecar store names folded in by v2
const LEGACY_STORES: &[(&str, &str)] = &[
    ("fingerprints.db", "fingerprints"),
    ("operations.db", "file_operations"),
    ("progress.db", "checkpoints"),
];

async fn get_schema_version(pool: &SqlitePool) -> Result<i32, StoreError> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
    )
    .fetch_one(pool)
    .await
    .map_err(StoreError::from)?;

    if !table_exists {
        return Ok(0);
    }

    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await
            .map_err(StoreError::from)?;
    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    Ok(())
}

/// Stamp a freshly created schema as current without running migrations.
/// Used by test stores that call `create_schema` directly.
pub async fn mark_current_version(pool: &SqlitePool) -> Result<(), StoreError> {
    if get_schema_version(pool).await? < CURRENT_SCHEMA_VERSION {
        set_schema_version(pool, CURRENT_SCHEMA_VERSION).await?;
    }
    Ok(())
}

/// Run all pending migrations for the store at `db_path`
pub async fn run_migrations(pool: &SqlitePool, db_path: &Path) -> Result<(), StoreError> {
    let current = get_schema_version(pool).await?;

    if current == CURRENT_SCHEMA_VERSION {
        info!("store schema is up to date (v{current})");
        return Ok(());
    }
    if current > CURRENT_SCHEMA_VERSION {
        warn!(
            "store schema version ({current}) is newer than this build ({CURRENT_SCHEMA_VERSION}); proceeding read-compatible"
        );
        return Ok(());
    }

    info!("migrating store schema v{current} -> v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("migration v1 complete");
    }

    if current < 2 {
        migrate_v2(pool, db_path).await?;
        set_schema_version(pool, 2).await?;
        info!("migration v2 complete");
    }

    Ok(())
}

/// v1: install the unified schema
async fn migrate_v1(pool: &SqlitePool) -> Result<(), StoreError> {
    schema::create_schema(pool).await
}

/// v2: fold legacy sidecar stores into the unified store
///
/// Each sidecar is attached, its rows copied with INSERT OR IGNORE, then
/// the file is renamed to `<name>.archived`. Missing sidecars and missing
/// tables inside them are skipped. ATTACH cannot run inside a transaction,
/// so each sidecar's copy is its own atomic INSERT..SELECT.
async fn migrate_v2(pool: &SqlitePool, db_path: &Path) -> Result<(), StoreError> {
    let Some(workspace) = db_path.parent() else {
        return Ok(());
    };

    for (file_name, table) in LEGACY_STORES {
        let legacy_path = workspace.join(file_name);
        if !legacy_path.exists() {
            continue;
        }

        info!(legacy = %legacy_path.display(), table, "folding legacy store into unified store");

        let attach = format!(
            "ATTACH DATABASE '{}' AS legacy",
            legacy_path.display().to_string().replace('\'', "''")
        );
        sqlx::query(&attach)
            .execute(pool)
            .await
            .map_err(StoreError::from)?;

        let merge_result = merge_legacy_table(pool, table).await;

        // Always detach, even if the merge failed
        let detach_result = sqlx::query("DETACH DATABASE legacy").execute(pool).await;
        merge_result?;
        detach_result.map_err(StoreError::from)?;

        let archived = legacy_path.with_extension("db.archived");
        std::fs::rename(&legacy_path, &archived).map_err(|e| StoreError::Io(e.to_string()))?;
        info!(archived = %archived.display(), "legacy store archived");
    }

    Ok(())
}

async fn merge_legacy_table(pool: &SqlitePool, table: &str) -> Result<(), StoreError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM legacy.sqlite_master WHERE type='table' AND name=?)",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .map_err(StoreError::from)?;

    if !exists {
        warn!(table, "legacy store has no such table, skipping");
        return Ok(());
    }

    // Copy only columns both schemas share
    let unified_cols: Vec<String> =
        sqlx::query_scalar(&format!("SELECT name FROM pragma_table_info('{table}')"))
            .fetch_all(pool)
            .await
            .map_err(StoreError::from)?;
    let legacy_cols: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT name FROM legacy.pragma_table_info('{table}')"
    ))
    .fetch_all(pool)
    .await
    .map_err(StoreError::from)?;

    let shared: Vec<String> = legacy_cols
        .into_iter()
        .filter(|c| unified_cols.contains(c) && c != "id")
        .collect();
    if shared.is_empty() {
        warn!(table, "no shared columns with legacy table, skipping");
        return Ok(());
    }

    let column_list = shared.join(", ");
    let sql = format!(
        "INSERT OR IGNORE INTO {table} ({column_list}) SELECT {column_list} FROM legacy.{table}"
    );
    let result = sqlx::query(&sql)
        .execute(pool)
        .await
        .map_err(StoreError::from)?;
    info!(table, rows = result.rows_affected(), "legacy rows merged");
    Ok(())
}
