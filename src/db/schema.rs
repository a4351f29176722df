//! Unified store schema
//!
//! Every table the engine persists, with enforced foreign keys. Deleting
//! a duplicate group cascades to its members; deleting a file cascades to
//! its quality analysis, organization target, rejection entries, queue
//! rows, and group memberships. An `updated_at` trigger keeps file rows
//! honest on every update.

use crate::error::StoreError;
use sqlx::SqlitePool;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS fingerprints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        fingerprint TEXT UNIQUE NOT NULL,
        duration_sec REAL NOT NULL,
        sample_rate_hz INTEGER NOT NULL,
        bit_depth INTEGER,
        channels INTEGER NOT NULL,
        codec TEXT NOT NULL,
        bitrate_kbps INTEGER NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        artist TEXT,
        title TEXT,
        album TEXT,
        year INTEGER,
        genre TEXT,
        track_number INTEGER,
        disc_number INTEGER,
        source TEXT NOT NULL CHECK(source IN ('tag', 'service', 'filename-parse')),
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT UNIQUE NOT NULL,
        content_hash TEXT,
        size_bytes INTEGER NOT NULL,
        modified_time TEXT NOT NULL,
        fingerprint_id INTEGER,
        metadata_id INTEGER,
        quality_score REAL,
        status TEXT NOT NULL DEFAULT 'discovered'
            CHECK(status IN ('discovered', 'analyzed', 'healthy', 'quarantined',
                             'organized', 'rejected', 'failed')),
        last_error TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (fingerprint_id) REFERENCES fingerprints(id) ON DELETE SET NULL,
        FOREIGN KEY (metadata_id) REFERENCES metadata(id) ON DELETE SET NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS quality_analysis (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL UNIQUE,
        technical_score REAL NOT NULL,
        audio_fidelity_score REAL NOT NULL,
        integrity_score REAL NOT NULL,
        reference_score REAL,
        final_score REAL NOT NULL,
        grade TEXT NOT NULL,
        recommended_action TEXT NOT NULL
            CHECK(recommended_action IN ('keep', 'replace', 'quarantine', 'delete_duplicate')),
        defects TEXT NOT NULL DEFAULT '[]',
        health_score INTEGER NOT NULL DEFAULT 100,
        clipping_ratio REAL,
        silence_ratio REAL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS duplicate_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key_kind TEXT NOT NULL CHECK(key_kind IN ('hash', 'fingerprint')),
        key_value TEXT NOT NULL,
        primary_file_id INTEGER NOT NULL,
        size INTEGER NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (primary_file_id) REFERENCES files(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS duplicate_members (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        group_id INTEGER NOT NULL,
        file_id INTEGER NOT NULL,
        is_primary INTEGER NOT NULL DEFAULT 0,
        similarity REAL NOT NULL DEFAULT 1.0,
        UNIQUE(group_id, file_id),
        FOREIGN KEY (group_id) REFERENCES duplicate_groups(id) ON DELETE CASCADE,
        FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL DEFAULT 'open'
            CHECK(status IN ('open', 'committing', 'committed', 'rolling-back', 'rolled-back')),
        reason TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        committed_at TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS file_operations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER,
        transaction_id TEXT NOT NULL,
        kind TEXT NOT NULL
            CHECK(kind IN ('copy', 'move', 'link', 'write-tag', 'create-dir', 'rename')),
        source_path TEXT NOT NULL,
        destination_path TEXT,
        content_hash TEXT,
        payload TEXT,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK(status IN ('pending', 'performed', 'committed', 'rolled-back', 'failed')),
        started_at TEXT,
        finished_at TEXT,
        error TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE SET NULL,
        FOREIGN KEY (transaction_id) REFERENCES transactions(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS checkpoints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        phase TEXT NOT NULL,
        last_batch_id INTEGER NOT NULL DEFAULT 0,
        counters TEXT NOT NULL DEFAULT '{}',
        open_transaction_ids TEXT NOT NULL DEFAULT '[]',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rejection_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL,
        category TEXT NOT NULL
            CHECK(category IN ('duplicate', 'low_quality', 'corrupted', 'unsupported',
                               'invalid_metadata', 'error')),
        chosen_file_id INTEGER,
        group_id INTEGER,
        original_path TEXT NOT NULL,
        rejected_path TEXT NOT NULL,
        content_hash TEXT,
        reason_text TEXT NOT NULL,
        rejected_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE,
        FOREIGN KEY (chosen_file_id) REFERENCES files(id) ON DELETE SET NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS organization_targets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL UNIQUE,
        genre TEXT NOT NULL,
        decade TEXT NOT NULL,
        final_path TEXT NOT NULL,
        pattern_used TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metadata_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL UNIQUE,
        reason TEXT NOT NULL,
        queued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS system_config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_files_hash ON files(content_hash)",
    "CREATE INDEX IF NOT EXISTS idx_files_status ON files(status)",
    "CREATE INDEX IF NOT EXISTS idx_members_file ON duplicate_members(file_id)",
    "CREATE INDEX IF NOT EXISTS idx_ops_txn_status ON file_operations(transaction_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_rejections_file ON rejection_entries(file_id)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_status ON transactions(status)",
];

const TRIGGERS: &[&str] = &[
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_files_updated_at
    AFTER UPDATE ON files
    FOR EACH ROW
    BEGIN
        UPDATE files SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
    END
    "#,
];

/// Create all tables, indexes, and triggers. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    let mut tx = pool.begin().await.map_err(StoreError::from)?;

    for statement in TABLES.iter().chain(INDEXES).chain(TRIGGERS) {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;
    }

    tx.commit().await.map_err(StoreError::from)?;
    Ok(())
}
