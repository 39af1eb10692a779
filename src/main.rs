use anyhow::Result;
use clap::Parser;
use matchcast::logging::{init_logging, LogArgs};
use matchcast::{MatchcastConfig, MatchcastOrchestrator};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "matchcast")]
#[command(about = "Console match recorder with ratings and quota-aware video publishing")]
#[command(version)]
#[command(long_about = "Watches a classified frame stream, cuts it into per-match video \
artifacts with a result-screen clip, records match stats and player ratings, and publishes \
finished matches to a video host within its daily quota.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "matchcast.toml", help = "Path to TOML configuration file")]
    config: String,

    #[command(flatten)]
    log: LogArgs,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - initialize but don't start components
    #[arg(long, help = "Perform dry run - initialize components but don't start them")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args.log, "matchcast.log")?;

    info!("Starting matchcast v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match MatchcastConfig::load_from_file(&args.config) {
        Ok(config) => {
            info!("Configuration loaded successfully from: {}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }
    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut orchestrator = MatchcastOrchestrator::new(config).await.map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    orchestrator.initialize().await.map_err(|e| {
        error!("Failed to initialize system: {}", e);
        e
    })?;

    if args.dry_run {
        info!("Dry run mode - components initialized but not started");
        println!("✓ Dry run completed successfully - all components initialized");
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start system: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("Matchcast exited with code: {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Matchcast configuration file");
    println!("# Every option with its default value. Any key can be overridden with a");
    println!("# MATCHCAST_<SECTION>__<KEY> environment variable.");
    println!("#");
    println!("# [source]     path is a frame stream file, or \"-\" for stdin");
    println!("# [detector]   boundary debounce and match/result-screen durations");
    println!("# [artifacts]  where videos and result clips are written, and the local");
    println!("#              time zone used in their names");
    println!("# [extractor]  stat extraction service; leave endpoint unset to record");
    println!("#              matches without stats");
    println!("# [publisher]  video host endpoint, credentials file and daily quota");
    println!();
    println!("{}", toml::to_string_pretty(&MatchcastConfig::default())?);
    Ok(())
}
