//! Rejection manifest
//!
//! Every rejected file keeps a full audit trail: where it came from,
//! where it went, why, and which sibling won. The manifest is
//! re-exportable to JSON and CSV sidecars inside the rejected root, and
//! any entry can be restored to its original path through the
//! transaction manager.

use crate::config::{CleanupConfig, HashAlgorithm};
use crate::db::{files, rejections};
use crate::error::CleanupError;
use crate::models::{FileStatus, OperationKind, RejectionEntry};
use crate::services::hashing;
use crate::services::transactions::{StagedOp, TransactionManager};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

const MANIFEST_NAME: &str = "rejected_manifest.json";
const ANALYSIS_CSV_NAME: &str = "rejection_analysis.csv";

#[derive(Serialize)]
struct ManifestRow<'a> {
    id: i64,
    category: &'a str,
    original_path: &'a str,
    rejected_path: &'a str,
    chosen_file_id: Option<i64>,
    group_id: Option<i64>,
    content_hash: Option<&'a str>,
    reason: &'a str,
    rejected_at: String,
}

pub struct RejectionManifest {
    db: SqlitePool,
    rejected_root: PathBuf,
    hash_algorithm: HashAlgorithm,
}

impl RejectionManifest {
    pub fn new(db: SqlitePool, config: &CleanupConfig) -> Self {
        Self {
            db,
            rejected_root: config.rejected_root.clone(),
            hash_algorithm: config.hash_algorithm,
        }
    }

    /// Rewrite both sidecars from the store. Idempotent: exporting twice
    /// yields identical files for identical store state.
    pub async fn export(&self) -> Result<(PathBuf, PathBuf), CleanupError> {
        let entries = rejections::list_entries(&self.db).await?;
        std::fs::create_dir_all(&self.rejected_root)?;

        let json_path = self.rejected_root.join(MANIFEST_NAME);
        let csv_path = self.rejected_root.join(ANALYSIS_CSV_NAME);

        let rows: Vec<ManifestRow> = entries
            .iter()
            .map(|entry| ManifestRow {
                id: entry.id,
                category: entry.category.as_str(),
                original_path: &entry.original_path,
                rejected_path: &entry.rejected_path,
                chosen_file_id: entry.chosen_file_id,
                group_id: entry.group_id,
                content_hash: entry.content_hash.as_deref(),
                reason: &entry.reason_text,
                rejected_at: entry.rejected_at.to_rfc3339(),
            })
            .collect();

        let json = serde_json::to_string_pretty(&rows)
            .map_err(|e| CleanupError::Config(format!("manifest serialization failed: {e}")))?;
        std::fs::write(&json_path, json)?;

        let mut writer = csv::Writer::from_path(&csv_path)
            .map_err(|e| CleanupError::Config(format!("cannot open {}: {e}", csv_path.display())))?;
        writer
            .write_record([
                "id",
                "category",
                "original_path",
                "rejected_path",
                "chosen_file_id",
                "group_id",
                "content_hash",
                "reason",
                "rejected_at",
            ])
            .map_err(|e| CleanupError::Config(e.to_string()))?;
        for entry in &entries {
            writer
                .write_record([
                    entry.id.to_string(),
                    entry.category.as_str().to_string(),
                    entry.original_path.clone(),
                    entry.rejected_path.clone(),
                    entry.chosen_file_id.map(|id| id.to_string()).unwrap_or_default(),
                    entry.group_id.map(|id| id.to_string()).unwrap_or_default(),
                    entry.content_hash.clone().unwrap_or_default(),
                    entry.reason_text.clone(),
                    entry.rejected_at.to_rfc3339(),
                ])
                .map_err(|e| CleanupError::Config(e.to_string()))?;
        }
        writer
            .flush()
            .map_err(|e| CleanupError::Config(e.to_string()))?;

        tracing::info!(
            entries = entries.len(),
            manifest = %json_path.display(),
            "rejection manifest exported"
        );
        Ok((json_path, csv_path))
    }

    /// Move a rejected file back to its original path. Verifies the
    /// rejected copy still holds the recorded content, relocates it
    /// atomically, then deletes the entry.
    pub async fn restore(
        &self,
        entry_id: i64,
        txn_manager: &TransactionManager,
    ) -> Result<PathBuf, CleanupError> {
        let entry = rejections::get_entry(&self.db, entry_id)
            .await?
            .ok_or_else(|| {
                CleanupError::Recovery(format!("no rejection entry with id {entry_id}"))
            })?;

        let rejected_path = PathBuf::from(&entry.rejected_path);
        let original_path = PathBuf::from(&entry.original_path);

        if !rejected_path.exists() {
            return Err(CleanupError::Recovery(format!(
                "rejected file missing: {}",
                rejected_path.display()
            )));
        }
        self.verify_recorded_hash(&entry, &rejected_path).await?;

        let txn = txn_manager
            .begin(&format!("restore rejection entry {entry_id}"))
            .await?;
        txn_manager
            .stage(
                &txn,
                StagedOp {
                    kind: OperationKind::CreateDir,
                    file_id: Some(entry.file_id),
                    source: original_path
                        .parent()
                        .unwrap_or_else(|| Path::new("."))
                        .to_path_buf(),
                    destination: Some(
                        original_path
                            .parent()
                            .unwrap_or_else(|| Path::new("."))
                            .to_path_buf(),
                    ),
                    content_hash: None,
                    payload: None,
                },
            )
            .await?;
        txn_manager
            .stage(
                &txn,
                StagedOp {
                    kind: OperationKind::Copy,
                    file_id: Some(entry.file_id),
                    source: rejected_path.clone(),
                    destination: Some(original_path.clone()),
                    content_hash: entry.content_hash.clone(),
                    payload: None,
                },
            )
            .await?;
        txn_manager
            .stage(
                &txn,
                StagedOp {
                    kind: OperationKind::Move,
                    file_id: Some(entry.file_id),
                    source: rejected_path.clone(),
                    destination: Some(original_path.clone()),
                    content_hash: entry.content_hash.clone(),
                    payload: None,
                },
            )
            .await?;
        txn_manager.commit(&txn).await?;

        files::update_path(
            &self.db,
            entry.file_id,
            &original_path.to_string_lossy(),
            FileStatus::Healthy,
        )
        .await?;
        rejections::delete_entry(&self.db, entry_id).await?;

        tracing::info!(
            entry = entry_id,
            restored_to = %original_path.display(),
            "rejected file restored"
        );
        Ok(original_path)
    }

    async fn verify_recorded_hash(
        &self,
        entry: &RejectionEntry,
        rejected_path: &Path,
    ) -> Result<(), CleanupError> {
        let Some(expected) = entry.content_hash.as_deref() else {
            return Ok(());
        };
        let actual = hashing::hash_file(rejected_path, self.hash_algorithm).await?;
        if actual != expected {
            return Err(CleanupError::Recovery(format!(
                "rejected file {} no longer matches its recorded hash",
                rejected_path.display()
            )));
        }
        Ok(())
    }
}
