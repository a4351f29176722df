//! Pipeline orchestrator
//!
//! Owns the fixed phase sequence
//! discovery → analysis → corruption-filter → grouping → organization,
//! drives batching, routes per-file errors, and writes checkpoints at
//! batch and phase boundaries. Collaborators are injected at
//! construction and their lifecycle is owned here; the cancellation
//! token is only ever set by the signal listener or an operator command.
//!
//! Each phase lives in its own `phase_*` module.

mod phase_analysis;
mod phase_discovery;
mod phase_filtering;
mod phase_grouping;
mod phase_organization;

use crate::config::CleanupConfig;
use crate::db;
use crate::error::CleanupError;
use crate::extractors::{
    DefectDetector, Fingerprinter, MetadataReader, MetadataWriter, ReferenceLookup,
};
use crate::models::{Counters, Phase};
use crate::services::analyzer::FileAnalyzer;
use crate::services::checkpointer::Checkpointer;
use crate::services::corruption_filter::CorruptionFilter;
use crate::services::grouper::DuplicateGrouper;
use crate::services::organizer::Organizer;
use crate::services::rejection_manifest::RejectionManifest;
use crate::services::transactions::TransactionManager;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Key under which the effective config snapshot is stored
const CONFIG_SNAPSHOT_KEY: &str = "effective_config";

/// External collaborators handed to the orchestrator
pub struct ExtractorSet {
    pub metadata_reader: Arc<dyn MetadataReader>,
    pub fingerprinter: Arc<dyn Fingerprinter>,
    pub defect_detector: Arc<dyn DefectDetector>,
    pub reference_lookup: Option<Arc<dyn ReferenceLookup>>,
    pub tag_writer: Arc<dyn MetadataWriter>,
}

/// Mutable per-run state threaded through the phases
pub(crate) struct RunState {
    pub counters: Counters,
    pub batch_id: i64,
    pub rolled_back: bool,
    pub cancelled: bool,
}

impl RunState {
    fn new() -> Self {
        Self {
            counters: Counters::default(),
            batch_id: 0,
            rolled_back: false,
            cancelled: false,
        }
    }

    fn from_checkpoint(counters: Counters, batch_id: i64) -> Self {
        Self {
            counters,
            batch_id,
            rolled_back: false,
            cancelled: false,
        }
    }
}

/// Final accounting for a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub counters: Counters,
    pub cancelled: bool,
    pub rolled_back: bool,
    pub dry_run: bool,
}

impl RunSummary {
    /// Exit-code mapping: 0 clean, 2 completed with per-file failures,
    /// 3 no work found, 4 rollback occurred. Fatal store errors never
    /// reach a summary; the binary maps those to 1.
    pub fn exit_code(&self) -> i32 {
        if self.rolled_back {
            4
        } else if self.counters.discovered == 0 {
            3
        } else if self.counters.failed > 0 {
            2
        } else {
            0
        }
    }
}

pub struct CleanupOrchestrator {
    pub(crate) db: SqlitePool,
    pub(crate) config: CleanupConfig,
    pub(crate) analyzer: FileAnalyzer,
    pub(crate) grouper: DuplicateGrouper,
    pub(crate) organizer: Organizer,
    pub(crate) txn_manager: TransactionManager,
    pub(crate) checkpointer: Checkpointer,
    pub(crate) filter: CorruptionFilter,
    pub(crate) manifest: RejectionManifest,
    pub(crate) cancel_token: CancellationToken,
}

impl CleanupOrchestrator {
    pub fn new(
        db: SqlitePool,
        config: CleanupConfig,
        extractors: ExtractorSet,
        cancel_token: CancellationToken,
    ) -> Self {
        let analyzer = FileAnalyzer::new(
            db.clone(),
            config.clone(),
            extractors.metadata_reader,
            extractors.fingerprinter.clone(),
            extractors.defect_detector,
            extractors.reference_lookup,
        );
        let grouper = DuplicateGrouper::new(db.clone(), extractors.fingerprinter, &config);
        let organizer = Organizer::new(db.clone(), config.clone());
        let txn_manager = TransactionManager::new(
            db.clone(),
            config.protected_roots.clone(),
            config.integrity_level,
            config.hash_algorithm,
            config.dry_run,
            &config.workspace_dir,
            extractors.tag_writer,
        );
        let checkpointer = Checkpointer::new(db.clone(), config.checkpoint_interval_sec);
        let filter = CorruptionFilter::from_config(&config);
        let manifest = RejectionManifest::new(db.clone(), &config);

        Self {
            db,
            config,
            analyzer,
            grouper,
            organizer,
            txn_manager,
            checkpointer,
            filter,
            manifest,
            cancel_token,
        }
    }

    /// Run the full pipeline from the top
    pub async fn run(&self) -> Result<RunSummary, CleanupError> {
        self.startup().await?;
        let mut state = RunState::new();
        self.run_phases_from(Phase::Discovery, &mut state).await?;
        self.finish(state).await
    }

    /// Resume from the most recent checkpoint. Refuses to resume when
    /// the effective configuration has drifted since the checkpoint was
    /// written.
    pub async fn resume(&self) -> Result<RunSummary, CleanupError> {
        let checkpoint = db::checkpoints::latest_checkpoint(&self.db)
            .await?
            .ok_or_else(|| CleanupError::Recovery("no checkpoint to resume from".into()))?;

        if let Some(stored) = db::get_system_config(&self.db, CONFIG_SNAPSHOT_KEY).await? {
            if stored != self.config.snapshot_json() {
                return Err(CleanupError::Recovery(
                    "configuration changed since the last checkpoint; \
                     a resumed run would target a different tree. Start a fresh run instead."
                        .into(),
                ));
            }
        }

        self.startup().await?;
        tracing::info!(
            phase = checkpoint.phase.as_str(),
            last_batch_id = checkpoint.last_batch_id,
            "resuming from checkpoint"
        );

        let mut state =
            RunState::from_checkpoint(checkpoint.counters.clone(), checkpoint.last_batch_id);
        let start_phase = match checkpoint.phase {
            Phase::Complete => {
                tracing::info!("last run completed; nothing to resume");
                return self.finish(state).await;
            }
            phase => phase,
        };
        self.run_phases_from(start_phase, &mut state).await?;
        self.finish(state).await
    }

    /// Roll back anything a previous process left incomplete and record
    /// the effective configuration.
    async fn startup(&self) -> Result<(), CleanupError> {
        let recovered = self.txn_manager.recover_incomplete().await?;
        if !recovered.is_empty() {
            tracing::warn!(count = recovered.len(), "rolled back incomplete transactions from a prior run");
        }
        db::set_system_config(&self.db, CONFIG_SNAPSHOT_KEY, &self.config.snapshot_json()).await?;
        Ok(())
    }

    async fn run_phases_from(
        &self,
        start: Phase,
        state: &mut RunState,
    ) -> Result<(), CleanupError> {
        let phases = [
            Phase::Discovery,
            Phase::Analysis,
            Phase::CorruptionFilter,
            Phase::Grouping,
            Phase::Organization,
        ];

        for phase in phases.into_iter().filter(|p| *p >= start) {
            if self.cancel_token.is_cancelled() {
                state.cancelled = true;
                // Final checkpoint before surrendering the process
                self.checkpointer
                    .force_checkpoint(phase, state.batch_id, &state.counters)
                    .await?;
                break;
            }

            tracing::info!(phase = phase.as_str(), "phase starting");
            match phase {
                Phase::Discovery => self.phase_discovery(state).await?,
                Phase::Analysis => self.phase_analysis(state).await?,
                Phase::CorruptionFilter => self.phase_filtering(state).await?,
                Phase::Grouping => self.phase_grouping(state).await?,
                Phase::Organization => self.phase_organization(state).await?,
                Phase::Complete => unreachable!(),
            }

            // Phase-boundary checkpoint. When the phase was interrupted
            // mid-way, the checkpoint names the interrupted phase so a
            // resume re-enters it; its per-file work is status-driven
            // and idempotent.
            self.checkpointer
                .force_checkpoint(phase, state.batch_id, &state.counters)
                .await?;

            if self.cancel_token.is_cancelled() {
                state.cancelled = true;
                break;
            }
        }
        Ok(())
    }

    async fn finish(&self, state: RunState) -> Result<RunSummary, CleanupError> {
        self.manifest.export().await?;

        if state.cancelled {
            // The interrupted phase already wrote its final checkpoint
            tracing::warn!("run interrupted; state checkpointed for resume");
        } else {
            self.checkpointer
                .force_checkpoint(Phase::Complete, state.batch_id, &state.counters)
                .await?;
        }

        let summary = RunSummary {
            counters: state.counters,
            cancelled: state.cancelled,
            rolled_back: state.rolled_back,
            dry_run: self.config.dry_run,
        };
        tracing::info!(
            discovered = summary.counters.discovered,
            analyzed = summary.counters.analyzed,
            quarantined = summary.counters.quarantined,
            organized = summary.counters.organized,
            rejected = summary.counters.rejected,
            failed = summary.counters.failed,
            cancelled = summary.cancelled,
            "run finished"
        );
        Ok(summary)
    }

    /// Shared cancellation check used inside phase batch loops
    pub(crate) fn cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}
