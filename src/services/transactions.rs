//! Atomic filesystem transactions
//!
//! A transaction is a group of staged filesystem operations that either
//! all reach their target state or none do. The log row is written
//! before anything touches the disk, so a crash at any point leaves
//! enough information to roll back.
//!
//! Protocol: begin → stage → (prepare → perform → commit) inside
//! `commit()`, with rollback on any failure. Copies land via a sibling
//! temp file, fsync, then atomic rename. A MOVE relocation is staged as
//! a copy plus a finalizing `move` op that verifies the destination hash
//! and removes the source; rolling back a performed `move` copies the
//! verified destination back.
//!
//! Sources are never removed by a copy. No operation is ever staged
//! against a protected prefix.

use crate::config::{HashAlgorithm, IntegrityLevel};
use crate::db::operations;
use crate::error::TransactionError;
use crate::extractors::{MetadataWriter, ScoreTags};
use crate::models::{FileOperation, OperationKind, OperationStatus, TransactionStatus};
use crate::services::hashing;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// One staged mutation, pre-persistence
#[derive(Debug, Clone)]
pub struct StagedOp {
    pub kind: OperationKind,
    pub file_id: Option<i64>,
    pub source: PathBuf,
    pub destination: Option<PathBuf>,
    /// Source content hash for copy/move verification
    pub content_hash: Option<String>,
    /// Kind-specific payload (score tags for write-tag)
    pub payload: Option<String>,
}

/// What `commit` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Operations performed and committed
    Committed { performed: usize, skipped: usize },
    /// Dry-run: everything stays pending for inspection
    DryRun { planned: usize },
}

/// Per-op prepare decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Execute,
    /// Destination already holds identical content
    SkipExisting,
}

pub struct TransactionManager {
    db: SqlitePool,
    protected_roots: Vec<PathBuf>,
    integrity_level: IntegrityLevel,
    hash_algorithm: HashAlgorithm,
    dry_run: bool,
    backup_dir: PathBuf,
    tag_writer: Arc<dyn MetadataWriter>,
}

impl TransactionManager {
    pub fn new(
        db: SqlitePool,
        protected_roots: Vec<PathBuf>,
        integrity_level: IntegrityLevel,
        hash_algorithm: HashAlgorithm,
        dry_run: bool,
        workspace_dir: &Path,
        tag_writer: Arc<dyn MetadataWriter>,
    ) -> Self {
        Self {
            db,
            protected_roots,
            integrity_level,
            hash_algorithm,
            dry_run,
            backup_dir: workspace_dir.join("backups"),
            tag_writer,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Step 1: open a transaction, returning its id
    pub async fn begin(&self, reason: &str) -> Result<String, TransactionError> {
        let id = Uuid::new_v4().to_string();
        operations::create_transaction(&self.db, &id, reason).await?;
        tracing::debug!(txn = %id, reason, "transaction opened");
        Ok(id)
    }

    /// Step 2: append an intended mutation to the log
    pub async fn stage(&self, txn_id: &str, op: StagedOp) -> Result<i64, TransactionError> {
        self.check_protected(&op)?;

        let op_id = operations::stage_operation(
            &self.db,
            txn_id,
            op.file_id,
            op.kind,
            &op.source.to_string_lossy(),
            op.destination.as_ref().map(|d| d.to_string_lossy()).as_deref(),
            op.content_hash.as_deref(),
            op.payload.as_deref(),
        )
        .await?;
        Ok(op_id)
    }

    /// Writes under a protected prefix are refused at staging time, so a
    /// protected file can never appear in the log as a write target.
    fn check_protected(&self, op: &StagedOp) -> Result<(), TransactionError> {
        if op.kind.writes_source() && self.is_protected(&op.source) {
            return Err(TransactionError::ProtectedPath(op.source.clone()));
        }
        if let Some(dest) = &op.destination {
            if self.is_protected(dest) {
                return Err(TransactionError::ProtectedPath(dest.clone()));
            }
        }
        Ok(())
    }

    fn is_protected(&self, path: &Path) -> bool {
        self.protected_roots.iter().any(|root| path.starts_with(root))
    }

    /// Steps 3–5: prepare, perform in insertion order, then commit. Any
    /// failure rolls the transaction back before the error surfaces.
    pub async fn commit(&self, txn_id: &str) -> Result<CommitOutcome, TransactionError> {
        let txn = operations::get_transaction(&self.db, txn_id)
            .await?
            .ok_or_else(|| TransactionError::Prepare(format!("unknown transaction {txn_id}")))?;
        if txn.status != TransactionStatus::Open {
            return Err(TransactionError::Prepare(format!(
                "transaction {txn_id} is {}, not open",
                txn.status.as_str()
            )));
        }

        let ops = operations::ops_with_status(&self.db, txn_id, OperationStatus::Pending).await?;

        if self.dry_run {
            tracing::info!(txn = %txn_id, planned = ops.len(), "dry-run: operations stay pending");
            return Ok(CommitOutcome::DryRun { planned: ops.len() });
        }

        // Step 3: prepare. Nothing has been performed, so failure only
        // needs to mark the transaction rolled back.
        let mut decisions = Vec::with_capacity(ops.len());
        for op in &ops {
            match self.prepare_op(op).await {
                Ok(decision) => decisions.push(decision),
                Err(e) => {
                    tracing::warn!(txn = %txn_id, error = %e, "prepare failed, transaction aborted");
                    self.rollback(txn_id).await?;
                    return Err(e);
                }
            }
        }

        // Step 4: perform in declared order
        let mut performed = 0usize;
        let mut skipped = 0usize;
        for (op, decision) in ops.iter().zip(&decisions) {
            if *decision == Decision::SkipExisting {
                skipped += 1;
                continue;
            }

            operations::mark_op_started(&self.db, op.id).await?;
            match self.perform_op(op).await {
                Ok(()) => {
                    operations::set_op_status(&self.db, op.id, OperationStatus::Performed, None)
                        .await?;
                    performed += 1;
                }
                Err(e) => {
                    operations::set_op_status(
                        &self.db,
                        op.id,
                        OperationStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
                    tracing::error!(txn = %txn_id, op = op.id, error = %e, "perform failed, rolling back");
                    self.rollback(txn_id).await?;
                    return Err(e);
                }
            }
        }

        // Step 5: two-phase commit marker
        operations::set_transaction_status(&self.db, txn_id, TransactionStatus::Committing).await?;
        operations::mark_performed_committed(&self.db, txn_id).await?;
        for (op, decision) in ops.iter().zip(&decisions) {
            if *decision == Decision::SkipExisting {
                operations::set_op_status(&self.db, op.id, OperationStatus::Committed, None)
                    .await?;
            }
        }
        self.discard_backups(&ops);
        operations::set_transaction_status(&self.db, txn_id, TransactionStatus::Committed).await?;

        tracing::info!(txn = %txn_id, performed, skipped, "transaction committed");
        Ok(CommitOutcome::Committed { performed, skipped })
    }

    /// Step 6: reverse performed operations in inverse order
    pub async fn rollback(&self, txn_id: &str) -> Result<(), TransactionError> {
        operations::set_transaction_status(&self.db, txn_id, TransactionStatus::RollingBack)
            .await?;

        let all_ops = operations::ops_for_transaction(&self.db, txn_id).await?;
        let mut reversible: Vec<&FileOperation> = all_ops
            .iter()
            .filter(|op| {
                // `committed` ops are reversed only when the transaction
                // itself never reached committed (crash mid-commit)
                matches!(
                    op.status,
                    OperationStatus::Performed | OperationStatus::Committed
                )
            })
            .collect();
        reversible.reverse();

        for op in reversible {
            if let Err(e) = self.reverse_op(op).await {
                // Surface loudly: manual intervention territory
                tracing::error!(txn = %txn_id, op = op.id, error = %e, "rollback step failed");
                return Err(TransactionError::Rollback(format!(
                    "op {} ({}): {e}",
                    op.id,
                    op.kind.as_str()
                )));
            }
            operations::set_op_status(&self.db, op.id, OperationStatus::RolledBack, None).await?;
        }

        // Pending ops were never executed
        for op in all_ops.iter().filter(|op| op.status == OperationStatus::Pending) {
            operations::set_op_status(&self.db, op.id, OperationStatus::RolledBack, None).await?;
        }

        operations::set_transaction_status(&self.db, txn_id, TransactionStatus::RolledBack).await?;
        tracing::info!(txn = %txn_id, "transaction rolled back");
        Ok(())
    }

    /// Startup recovery: any transaction found open, committing, or
    /// mid-rollback is rolled back. Returns the ids handled.
    pub async fn recover_incomplete(&self) -> Result<Vec<String>, TransactionError> {
        let incomplete = operations::incomplete_transactions(&self.db).await?;
        let mut rolled_back = Vec::with_capacity(incomplete.len());
        for txn in incomplete {
            tracing::warn!(txn = %txn.id, status = txn.status.as_str(), "recovering incomplete transaction");
            self.rollback(&txn.id).await?;
            rolled_back.push(txn.id);
        }
        Ok(rolled_back)
    }

    async fn prepare_op(&self, op: &FileOperation) -> Result<Decision, TransactionError> {
        let source = PathBuf::from(&op.source_path);
        let destination = op.destination_path.as_ref().map(PathBuf::from);

        match op.kind {
            OperationKind::CreateDir => Ok(Decision::Execute),
            OperationKind::WriteTag => {
                if !source.exists() {
                    return Err(TransactionError::Prepare(format!(
                        "write-tag source missing: {}",
                        source.display()
                    )));
                }
                Ok(Decision::Execute)
            }
            OperationKind::Copy | OperationKind::Rename | OperationKind::Link => {
                if !source.exists() {
                    return Err(TransactionError::Prepare(format!(
                        "source missing: {}",
                        source.display()
                    )));
                }
                if self.integrity_level != IntegrityLevel::Basic {
                    if let Some(expected) = &op.content_hash {
                        let actual = hashing::hash_file(&source, self.hash_algorithm)
                            .await
                            .map_err(|e| {
                                TransactionError::Prepare(format!(
                                    "cannot hash source {}: {e}",
                                    source.display()
                                ))
                            })?;
                        if &actual != expected {
                            return Err(TransactionError::Prepare(format!(
                                "source changed since staging: {}",
                                source.display()
                            )));
                        }
                    }
                }

                let Some(dest) = &destination else {
                    return Err(TransactionError::Prepare(format!(
                        "{} op without destination",
                        op.kind.as_str()
                    )));
                };
                if dest.exists() {
                    // Identical content already in place: idempotent skip
                    if let Some(expected) = &op.content_hash {
                        let existing = hashing::hash_file(dest, self.hash_algorithm)
                            .await
                            .map_err(|e| {
                                TransactionError::Prepare(format!(
                                    "cannot hash existing destination {}: {e}",
                                    dest.display()
                                ))
                            })?;
                        if &existing == expected {
                            return Ok(Decision::SkipExisting);
                        }
                    }
                    return Err(TransactionError::Prepare(format!(
                        "destination exists with different content: {}",
                        dest.display()
                    )));
                }
                Ok(Decision::Execute)
            }
            OperationKind::Move => {
                // Finalizer of a copy+verify pair; destination is created
                // by the preceding copy in the same transaction.
                if !source.exists() {
                    return Ok(Decision::SkipExisting);
                }
                Ok(Decision::Execute)
            }
        }
    }

    async fn perform_op(&self, op: &FileOperation) -> Result<(), TransactionError> {
        let source = PathBuf::from(&op.source_path);
        let destination = op.destination_path.as_ref().map(PathBuf::from);

        match op.kind {
            OperationKind::CreateDir => {
                let dir = destination.unwrap_or_else(|| source.clone());
                tokio::task::spawn_blocking(move || std::fs::create_dir_all(dir))
                    .await
                    .map_err(|e| TransactionError::Perform(e.to_string()))??;
                Ok(())
            }
            OperationKind::Copy => {
                let dest = destination.ok_or_else(|| {
                    TransactionError::Perform("copy op without destination".into())
                })?;
                let paranoid = self.integrity_level == IntegrityLevel::Paranoid;
                let op_id = op.id;
                let src = source.clone();
                let dest_clone = dest.clone();
                tokio::task::spawn_blocking(move || {
                    copy_via_temp(&src, &dest_clone, op_id, paranoid)
                })
                .await
                .map_err(|e| TransactionError::Perform(e.to_string()))??;

                if self.integrity_level != IntegrityLevel::Basic {
                    if let Some(expected) = &op.content_hash {
                        let actual = hashing::hash_file(&dest, self.hash_algorithm)
                            .await
                            .map_err(|e| TransactionError::Perform(e.to_string()))?;
                        if &actual != expected {
                            let _ = std::fs::remove_file(&dest);
                            return Err(TransactionError::HashMismatch {
                                path: dest,
                                expected: expected.clone(),
                                actual,
                            });
                        }
                    }
                }
                if matches!(
                    self.integrity_level,
                    IntegrityLevel::Deep | IntegrityLevel::Paranoid
                ) {
                    // Deep verification re-probes the copied audio header
                    let probe_dest = dest.clone();
                    let header_ok = tokio::task::spawn_blocking(move || {
                        crate::extractors::defect_probe::has_valid_magic(&probe_dest)
                    })
                    .await
                    .map_err(|e| TransactionError::Perform(e.to_string()))?
                    .map_err(|e| TransactionError::Perform(e.to_string()))?;
                    if !header_ok {
                        let _ = std::fs::remove_file(&dest);
                        return Err(TransactionError::Perform(format!(
                            "copied file has no recognizable audio header: {}",
                            dest.display()
                        )));
                    }
                }
                Ok(())
            }
            OperationKind::Move => {
                // Verify the copied destination, then remove the source
                let dest = destination.ok_or_else(|| {
                    TransactionError::Perform("move op without destination".into())
                })?;
                if !dest.exists() {
                    return Err(TransactionError::Perform(format!(
                        "move finalize: destination missing: {}",
                        dest.display()
                    )));
                }
                if self.integrity_level != IntegrityLevel::Basic {
                    if let Some(expected) = &op.content_hash {
                        let actual = hashing::hash_file(&dest, self.hash_algorithm)
                            .await
                            .map_err(|e| TransactionError::Perform(e.to_string()))?;
                        if &actual != expected {
                            return Err(TransactionError::HashMismatch {
                                path: dest,
                                expected: expected.clone(),
                                actual,
                            });
                        }
                    }
                }
                tokio::task::spawn_blocking(move || std::fs::remove_file(source))
                    .await
                    .map_err(|e| TransactionError::Perform(e.to_string()))??;
                Ok(())
            }
            OperationKind::Rename => {
                let dest = destination.ok_or_else(|| {
                    TransactionError::Perform("rename op without destination".into())
                })?;
                tokio::task::spawn_blocking(move || std::fs::rename(source, dest))
                    .await
                    .map_err(|e| TransactionError::Perform(e.to_string()))??;
                Ok(())
            }
            OperationKind::Link => {
                let dest = destination.ok_or_else(|| {
                    TransactionError::Perform("link op without destination".into())
                })?;
                tokio::task::spawn_blocking(move || {
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::hard_link(source, dest)
                })
                .await
                .map_err(|e| TransactionError::Perform(e.to_string()))??;
                Ok(())
            }
            OperationKind::WriteTag => {
                let tags: ScoreTags = serde_json::from_str(op.payload.as_deref().unwrap_or("{}"))
                    .map_err(|e| {
                        TransactionError::Perform(format!("bad write-tag payload: {e}"))
                    })?;

                // Backup first so rollback can restore the exact bytes
                let backup = self.backup_path(op.id);
                let backup_dir = self.backup_dir.clone();
                let src = source.clone();
                let backup_clone = backup.clone();
                tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                    std::fs::create_dir_all(&backup_dir)?;
                    std::fs::copy(&src, &backup_clone)?;
                    Ok(())
                })
                .await
                .map_err(|e| TransactionError::Perform(e.to_string()))??;

                self.tag_writer
                    .write_score_tags(&source, tags)
                    .await
                    .map_err(|e| TransactionError::Perform(format!("tag write failed: {e}")))?;
                Ok(())
            }
        }
    }

    async fn reverse_op(&self, op: &FileOperation) -> Result<(), std::io::Error> {
        let source = PathBuf::from(&op.source_path);
        let destination = op.destination_path.as_ref().map(PathBuf::from);
        let op_id = op.id;
        let kind = op.kind;
        let backup = self.backup_path(op.id);

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            match kind {
                // Shared directories stay; removing them could race other writers
                OperationKind::CreateDir => Ok(()),
                OperationKind::Copy | OperationKind::Link => {
                    if let Some(dest) = destination {
                        if dest.exists() {
                            std::fs::remove_file(dest)?;
                        }
                    }
                    Ok(())
                }
                OperationKind::Move => {
                    // Source was removed after a verified copy: restore it
                    if let Some(dest) = destination {
                        if !source.exists() && dest.exists() {
                            let tmp = source.with_file_name(format!(
                                ".{}.ckrestore-{op_id}",
                                source.file_name().unwrap_or_default().to_string_lossy()
                            ));
                            std::fs::copy(&dest, &tmp)?;
                            let tmp_file = std::fs::File::open(&tmp)?;
                            tmp_file.sync_all()?;
                            drop(tmp_file);
                            std::fs::rename(&tmp, &source)?;
                        }
                    }
                    Ok(())
                }
                OperationKind::Rename => {
                    if let Some(dest) = destination {
                        if dest.exists() && !source.exists() {
                            std::fs::rename(dest, source)?;
                        }
                    }
                    Ok(())
                }
                OperationKind::WriteTag => {
                    if backup.exists() {
                        std::fs::rename(&backup, &source)?;
                    }
                    Ok(())
                }
            }
        })
        .await
        .map_err(std::io::Error::other)?
    }

    fn backup_path(&self, op_id: i64) -> PathBuf {
        self.backup_dir.join(format!("op-{op_id}.bak"))
    }

    /// Committed write-tag backups are no longer needed
    fn discard_backups(&self, ops: &[FileOperation]) {
        for op in ops.iter().filter(|op| op.kind == OperationKind::WriteTag) {
            let _ = std::fs::remove_file(self.backup_path(op.id));
        }
    }
}

/// Copy through a sibling temp file: write, fsync, atomic rename.
/// The destination name only ever appears fully written.
fn copy_via_temp(source: &Path, dest: &Path, op_id: i64, paranoid: bool) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dest_name = dest.file_name().unwrap_or_default().to_string_lossy();
    let tmp = dest.with_file_name(format!(".{dest_name}.cktmp-{op_id}"));

    std::fs::copy(source, &tmp)?;
    let tmp_file = std::fs::File::open(&tmp)?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    std::fs::rename(&tmp, dest)?;

    if paranoid {
        if let Some(parent) = dest.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }
    }
    Ok(())
}
