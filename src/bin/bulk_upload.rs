use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use matchcast::batch::{BatchOptions, BatchUploader};
use matchcast::identity::resolve_timezone;
use matchcast::logging::{init_logging, LogArgs};
use matchcast::publish::{MetadataBuilder, Publisher};
use matchcast::reconcile::LegacyReconciler;
use matchcast::store::{JsonMatchStore, MatchStore};
use matchcast::MatchcastConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Subdirectory holding recordings set aside for a later upload run
const DEFERRED_DIR: &str = "forlater";

#[derive(Parser, Debug)]
#[command(name = "bulk-upload")]
#[command(about = "Publish match videos that are already on disk")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "matchcast.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Directories to scan (defaults to the artifact directory and its forlater subdirectory)
    #[arg(long = "directory", value_name = "DIR")]
    directories: Vec<PathBuf>,

    /// Report what would be published without touching the host, queue or quota
    #[arg(long)]
    dry_run: bool,

    /// Publish again even if a match already has a video URL
    #[arg(long)]
    force: bool,

    /// Skip matches that already have a video URL
    #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    skip_uploaded: bool,

    /// Do not add videos to a collection
    #[arg(long, conflicts_with = "collection")]
    no_collection: bool,

    /// Collection to add videos to (overrides the configured one)
    #[arg(long, value_name = "NAME")]
    collection: Option<String>,

    /// Put tasks that failed in an earlier run back in the queue
    #[arg(long)]
    retry_failed: bool,

    #[command(flatten)]
    log: LogArgs,
}

impl Args {
    fn collection_override(&self) -> Option<Option<String>> {
        if self.no_collection {
            Some(None)
        } else {
            self.collection.clone().map(Some)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_guard = init_logging(&args.log, "bulk-upload.log")?;

    let config = MatchcastConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    config.validate().context("Invalid configuration")?;

    let directories = if args.directories.is_empty() {
        let base = config.artifacts.base_dir();
        vec![base.clone(), base.join(DEFERRED_DIR)]
    } else {
        args.directories.clone()
    };

    let store: Arc<dyn MatchStore> = Arc::new(
        JsonMatchStore::open(Path::new(&config.store.path))
            .await
            .context("Failed to open match store")?,
    );
    let publisher = Arc::new(
        Publisher::open(&config.publisher, Arc::clone(&store), args.dry_run)
            .await
            .context("Failed to set up publisher")?,
    );

    let timezone = resolve_timezone(&config.artifacts.timezone);
    let reconciler =
        LegacyReconciler::new(Arc::clone(&store), config.reconciler.tolerance_seconds, timezone);
    let mut metadata = MetadataBuilder::new(&config.publisher, timezone);
    if let Some(collection) = args.collection_override() {
        metadata = metadata.with_collection(collection);
    }

    let uploader = BatchUploader::new(publisher, reconciler, metadata, &config.artifacts);
    let options = BatchOptions {
        force: args.force || !args.skip_uploaded,
        retry_failed: args.retry_failed,
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current upload");
            ctrl_c.cancel();
        }
    });

    if args.dry_run {
        info!("Dry run: nothing will be uploaded or recorded");
    }
    info!(
        "Scanning {}",
        directories
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let summary = match uploader.run(&directories, &options, &cancel).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Batch upload failed: {}", e);
            return Err(e.into());
        }
    };

    println!("{}", summary);

    let exit_code = if summary.failed > 0 { 1 } else { 0 };
    drop(log_guard);
    std::process::exit(exit_code);
}
