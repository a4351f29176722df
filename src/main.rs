//! cratekeeper command-line entry point
//!
//! Thin shell over the library: resolve configuration, open the store,
//! wire up the bundled extractor implementations, run the requested
//! subcommand, and map the outcome to an exit code.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cratekeeper::config::CleanupConfig;
use cratekeeper::db;
use cratekeeper::extractors::{
    HeaderProbeDetector, LoftyMetadataReader, LoftyTagWriter, NoopFingerprinter, TagFingerprinter,
};
use cratekeeper::services::checkpointer::spawn_signal_listener;
use cratekeeper::services::orchestrator::{CleanupOrchestrator, ExtractorSet};
use cratekeeper::services::rejection_manifest::RejectionManifest;
use cratekeeper::services::transactions::TransactionManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cratekeeper", version, about = "Clean up a chaotic music library")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full cleanup pipeline
    Run {
        /// Plan everything but perform no filesystem operations
        #[arg(long)]
        dry_run: bool,
    },
    /// Resume an interrupted run from the last checkpoint
    Recover,
    /// Restore a rejected file to its original location
    Restore {
        /// Rejection entry id (see the exported manifest)
        entry_id: i64,
    },
    /// Re-export the rejection manifest and print the review queue
    ExportManifest,
}

fn load_config(cli_path: Option<&PathBuf>) -> Result<CleanupConfig> {
    let path = CleanupConfig::resolve_path(cli_path.map(|p| p.as_path()));
    let config = CleanupConfig::load(&path)?;
    info!(config = %path.display(), "configuration loaded");
    Ok(config)
}

fn build_extractors(config: &CleanupConfig) -> ExtractorSet {
    let fingerprinter: Arc<dyn cratekeeper::extractors::Fingerprinter> =
        if config.enable_fingerprinting {
            Arc::new(TagFingerprinter::new())
        } else {
            Arc::new(NoopFingerprinter)
        };
    ExtractorSet {
        metadata_reader: Arc::new(LoftyMetadataReader::new()),
        fingerprinter,
        defect_detector: Arc::new(HeaderProbeDetector::new()),
        reference_lookup: None,
        tag_writer: Arc::new(LoftyTagWriter::new()),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "fatal error");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run { dry_run } => {
            let mut config = load_config(cli.config.as_ref())?;
            config.dry_run = config.dry_run || dry_run;

            let pool = db::open_store(&config.store_path()).await?;
            let token = CancellationToken::new();
            spawn_signal_listener(token.clone());

            let extractors = build_extractors(&config);
            let orchestrator = CleanupOrchestrator::new(pool, config, extractors, token);
            let summary = orchestrator.run().await?;
            report(&summary);
            Ok(summary.exit_code())
        }
        Command::Recover => {
            let config = load_config(cli.config.as_ref())?;
            let pool = db::open_store(&config.store_path()).await?;
            let token = CancellationToken::new();
            spawn_signal_listener(token.clone());

            let extractors = build_extractors(&config);
            let orchestrator = CleanupOrchestrator::new(pool, config, extractors, token);
            let summary = orchestrator.resume().await?;
            report(&summary);
            Ok(summary.exit_code())
        }
        Command::Restore { entry_id } => {
            let config = load_config(cli.config.as_ref())?;
            let pool = db::open_store(&config.store_path()).await?;

            let manager = TransactionManager::new(
                pool.clone(),
                config.protected_roots.clone(),
                config.integrity_level,
                config.hash_algorithm,
                false,
                &config.workspace_dir,
                Arc::new(LoftyTagWriter::new()),
            );
            let manifest = RejectionManifest::new(pool, &config);
            let restored_to = manifest.restore(entry_id, &manager).await?;
            println!("restored to {}", restored_to.display());
            Ok(0)
        }
        Command::ExportManifest => {
            let config = load_config(cli.config.as_ref())?;
            let pool = db::open_store(&config.store_path()).await?;

            let manifest = RejectionManifest::new(pool.clone(), &config);
            let (json_path, csv_path) = manifest.export().await?;
            println!("manifest: {}", json_path.display());
            println!("analysis: {}", csv_path.display());

            let queue = db::rejections::list_review_queue(&pool).await?;
            if !queue.is_empty() {
                println!("\n{} file(s) waiting for review:", queue.len());
                for entry in queue {
                    let path = db::files::get_by_id(&pool, entry.file_id)
                        .await?
                        .map(|f| f.path)
                        .unwrap_or_else(|| format!("file #{}", entry.file_id));
                    println!("  {path}: {}", entry.reason);
                }
            }
            Ok(0)
        }
    }
}

fn report(summary: &cratekeeper::RunSummary) {
    let counters = &summary.counters;
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    println!(
        "discovered {} | analyzed {} | quarantined {} | grouped {} | organized {} | rejected {} | failed {}{mode}",
        counters.discovered,
        counters.analyzed,
        counters.quarantined,
        counters.grouped,
        counters.organized,
        counters.rejected,
        counters.failed,
    );
    if summary.cancelled {
        println!("interrupted: progress checkpointed, run `cratekeeper recover` to continue");
    }
}
