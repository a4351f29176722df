//! Interruption, checkpointing, and crash-recovery scenarios

mod helpers;

use cratekeeper::config::{HashAlgorithm, IntegrityLevel};
use cratekeeper::db;
use cratekeeper::models::{OperationKind, OperationStatus, Phase, TransactionStatus};
use cratekeeper::services::orchestrator::CleanupOrchestrator;
use cratekeeper::services::transactions::{StagedOp, TransactionManager};
use helpers::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn stubs_for_two_tracks() -> (StubReader, StubFingerprinter) {
    let mut reader = StubReader::default();
    reader.by_name.insert("a.mp3".into(), tags("Artist", "Alpha", "House", 2010));
    reader.by_name.insert("b.mp3".into(), tags("Artist", "Beta", "House", 2012));
    let mut fp = StubFingerprinter::default();
    fp.by_name.insert("a.mp3".into(), fingerprint("recA", "x", "mp3", 320));
    fp.by_name.insert("b.mp3".into(), fingerprint("recB", "x", "mp3", 320));
    (reader, fp)
}

#[tokio::test]
async fn test_cancelled_run_checkpoints_and_resumes_to_completion() {
    let library = TestLibrary::new();
    library.add_source("a.mp3", b"alpha bytes");
    library.add_source("b.mp3", b"beta bytes");

    let pool = db::open_memory_store().await.unwrap();

    // A token cancelled before the run starts: the orchestrator writes a
    // checkpoint and surrenders without processing anything
    let token = CancellationToken::new();
    token.cancel();
    let (reader, fp) = stubs_for_two_tracks();
    let orchestrator = CleanupOrchestrator::new(
        pool.clone(),
        library.config.clone(),
        extractor_set(reader, fp, StubDetector::default()),
        token,
    );
    let summary = orchestrator.run().await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.counters.organized, 0);

    let checkpoint = db::checkpoints::latest_checkpoint(&pool).await.unwrap().unwrap();
    assert_ne!(checkpoint.phase, Phase::Complete);

    // Resume with a live token finishes the pipeline
    let (reader, fp) = stubs_for_two_tracks();
    let orchestrator = CleanupOrchestrator::new(
        pool.clone(),
        library.config.clone(),
        extractor_set(reader, fp, StubDetector::default()),
        CancellationToken::new(),
    );
    let summary = orchestrator.resume().await.unwrap();
    assert!(!summary.cancelled);
    assert_eq!(summary.counters.organized, 2);

    let checkpoint = db::checkpoints::latest_checkpoint(&pool).await.unwrap().unwrap();
    assert_eq!(checkpoint.phase, Phase::Complete);
}

#[tokio::test]
async fn test_resume_refuses_config_drift() {
    let library = TestLibrary::new();
    library.add_source("a.mp3", b"alpha bytes");

    let pool = db::open_memory_store().await.unwrap();

    let (reader, fp) = stubs_for_two_tracks();
    let orchestrator = CleanupOrchestrator::new(
        pool.clone(),
        library.config.clone(),
        extractor_set(reader, fp, StubDetector::default()),
        CancellationToken::new(),
    );
    orchestrator.run().await.unwrap();

    // Same store, different target tree
    let mut drifted = library.config.clone();
    drifted.target_root = library.dir.path().join("elsewhere");

    let (reader, fp) = stubs_for_two_tracks();
    let orchestrator = CleanupOrchestrator::new(
        pool.clone(),
        drifted,
        extractor_set(reader, fp, StubDetector::default()),
        CancellationToken::new(),
    );
    let err = orchestrator.resume().await.unwrap_err();
    assert!(err.to_string().contains("configuration changed"));
}

#[tokio::test]
async fn test_startup_rolls_back_crashed_transaction() {
    let library = TestLibrary::new();
    let source = library.add_source("a.mp3", b"crash test bytes");

    let pool = db::open_memory_store().await.unwrap();
    let manager = TransactionManager::new(
        pool.clone(),
        vec![],
        IntegrityLevel::Checksum,
        HashAlgorithm::Sha256,
        false,
        library.dir.path(),
        Arc::new(NoopWriter),
    );

    // Simulate a crash between Perform and Commit: the copy hit the
    // disk, the op row says performed, the transaction row stays open
    let dest = library.config.target_root.join("stray.mp3");
    let txn = manager.begin("doomed").await.unwrap();
    let op_id = manager
        .stage(
            &txn,
            StagedOp {
                kind: OperationKind::Copy,
                file_id: None,
                source: source.clone(),
                destination: Some(dest.clone()),
                content_hash: None,
                payload: None,
            },
        )
        .await
        .unwrap();
    std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
    std::fs::copy(&source, &dest).unwrap();
    db::operations::set_op_status(&pool, op_id, OperationStatus::Performed, None)
        .await
        .unwrap();

    let snapshot_before = library.snapshot();

    // A fresh orchestrator run recovers first: the stray destination is
    // removed before any new work begins
    let (reader, fp) = stubs_for_two_tracks();
    let orchestrator = CleanupOrchestrator::new(
        pool.clone(),
        library.config.clone(),
        extractor_set(reader, fp, StubDetector::default()),
        CancellationToken::new(),
    );
    orchestrator.run().await.unwrap();

    assert!(!dest.exists() || {
        // The pipeline may have legitimately organized a.mp3 elsewhere,
        // but never under the stray name
        !files_contain(&library.config.target_root, "stray.mp3")
    });
    let txn_row = db::operations::get_transaction(&pool, &txn).await.unwrap().unwrap();
    assert_eq!(txn_row.status, TransactionStatus::RolledBack);

    // Source untouched through all of it
    assert!(source.exists());
    assert!(snapshot_before
        .iter()
        .any(|(path, content)| path.ends_with("a.mp3") && content == b"crash test bytes"));
}

fn files_contain(dir: &std::path::Path, name: &str) -> bool {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&d) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name().map(|n| n == name).unwrap_or(false) {
                return true;
            }
        }
    }
    false
}

#[tokio::test]
async fn test_restore_after_full_pipeline() {
    let library = TestLibrary::new();
    library.add_source("a.mp3", b"identical bytes");
    library.add_source("b.mp3", b"identical bytes");

    let mut reader = StubReader::default();
    reader.by_name.insert("a.mp3".into(), tags("Artist", "Title", "House", 2011));
    reader.by_name.insert("b.mp3".into(), tags("Artist", "Title", "House", 2011));
    let mut fp = StubFingerprinter::default();
    fp.by_name.insert("a.mp3".into(), fingerprint("rec1", "a", "mp3", 320));
    fp.by_name.insert("b.mp3".into(), fingerprint("rec1", "a", "mp3", 320));

    let pool = db::open_memory_store().await.unwrap();
    let orchestrator = CleanupOrchestrator::new(
        pool.clone(),
        library.config.clone(),
        extractor_set(reader, fp, StubDetector::default()),
        CancellationToken::new(),
    );
    orchestrator.run().await.unwrap();

    let entries = db::rejections::list_entries(&pool).await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    let rejected_path = std::path::PathBuf::from(&entry.rejected_path);
    assert!(rejected_path.exists());

    // In COPY mode the original source still exists at original_path, so
    // restore is a no-op fs-wise (identical content already in place)
    let manager = TransactionManager::new(
        pool.clone(),
        vec![],
        IntegrityLevel::Checksum,
        HashAlgorithm::Sha256,
        false,
        library.dir.path(),
        Arc::new(NoopWriter),
    );
    let manifest =
        cratekeeper::services::rejection_manifest::RejectionManifest::new(pool.clone(), &library.config);
    let restored_to = manifest.restore(entry.id, &manager).await.unwrap();

    assert!(restored_to.exists());
    assert_eq!(std::fs::read(&restored_to).unwrap(), b"identical bytes");
    assert!(db::rejections::get_entry(&pool, entry.id).await.unwrap().is_none());
}
