use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repowatch::dispatch::Messenger;
use repowatch::tokens::CredentialStore;
use repowatch::{Config, GitHubFetcher, Monitor, TelegramNotifier, TokenDb, TrackerDb};

#[derive(Parser)]
#[command(name = "repowatch")]
#[command(about = "GitHub change notification daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Start the polling daemon (Ctrl+C for clean shutdown)
    Run,

    /// Run exactly one poll pass and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;
    info!("Starting RepoWatch v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Init => cmd_init(cli.config),
        Commands::Run => {
            let config = load_config(cli.config)?;
            cmd_run(&config).await
        }
        Commands::Check => {
            let config = load_config(cli.config)?;
            cmd_check(&config).await
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from the specified path or the default location
fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Write a default configuration file
fn cmd_init(config_path: Option<PathBuf>) -> Result<()> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if path.exists() {
        println!("⚠️  Configuration already exists: {:?}", path);
        println!("   Edit it directly, or delete it and run 'repowatch init' again");
        return Ok(());
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let config = Config::default();
    config.save(&path)?;

    println!("✅ RepoWatch initialized successfully!");
    println!("   Config: {:?}", path);
    println!("   Next: set telegram.bot_token (or BOT_TOKEN) and run 'repowatch run'");

    Ok(())
}

/// Assemble the full monitoring stack from configuration
fn build_monitor(config: &Config) -> Result<Monitor> {
    let store = Arc::new(TrackerDb::open_at(PathBuf::from(
        &config.storage.tracking_db,
    ))?);
    let tokens = Arc::new(TokenDb::open_at(PathBuf::from(&config.storage.token_db))?);
    let client = Arc::new(GitHubFetcher::new());
    let notifier = Arc::new(TelegramNotifier::new(config.bot_token()?)?);

    Ok(Monitor::new(
        store,
        client,
        tokens as Arc<dyn CredentialStore>,
        notifier as Arc<dyn Messenger>,
        config.monitor.clone(),
    ))
}

/// Start the polling daemon
async fn cmd_run(config: &Config) -> Result<()> {
    let monitor = Arc::new(build_monitor(config)?);

    println!("🚀 Starting RepoWatch daemon");
    println!("   Poll interval: {}", config.monitor.interval);
    println!("   Tracking database: {}", config.storage.tracking_db);
    println!("   Press Ctrl+C to stop");

    let shutdown_monitor = Arc::clone(&monitor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
            shutdown_monitor.shutdown();
        }
    });

    monitor.run().await
}

/// Run a single poll pass and report the outcome
async fn cmd_check(config: &Config) -> Result<()> {
    let monitor = build_monitor(config)?;

    println!("🔍 Running one poll pass...");
    let summary = monitor.run_pass().await?;

    println!("\n📈 Pass Summary:");
    println!("   ✅ Items checked: {}", summary.items_checked);
    println!("   📨 Notifications sent: {}", summary.notifications_sent);
    println!(
        "   ⏭️  Skipped (no credential): {}",
        summary.skipped_no_credential
    );
    println!("   🛑 Items removed: {}", summary.items_removed);
    println!("   ❌ Failed checks: {}", summary.failed_checks);

    Ok(())
}
