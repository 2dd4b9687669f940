//! EPG Sync CLI - Command line interface for guide synchronization.
//!
//! This tool drives the sync engine against the built-in sample source and
//! inspects the resulting guide store.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use epgsync_common::{InputId, SystemClock, UtcMillis, HOUR_MS};
use epgsync_source::SampleSource;
use epgsync_storage::{create_default_registry, Store};
use epgsync_sync::{check_period, SyncConfig, SyncReport, SyncScheduler, SyncStatus, SyncStatusEvent};

#[derive(Parser)]
#[command(name = "epgsync")]
#[command(about = "EPG Sync - Keep a program guide store in step with its source")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Store backend: "sqlite" or "memory".
    #[arg(short, long, default_value = "sqlite")]
    store: String,

    /// SQLite database file (default: in the user data directory).
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync now and print its report.
    Sync {
        /// Input to sync.
        #[arg(short, long, default_value = "sample")]
        input: String,

        /// Window length in hours (default: from configuration).
        #[arg(long)]
        hours: Option<i64>,
    },

    /// Sync periodically until interrupted.
    Watch {
        /// Input to sync.
        #[arg(short, long, default_value = "sample")]
        input: String,

        /// Window length in hours (default: from configuration).
        #[arg(long)]
        hours: Option<i64>,

        /// Minutes between syncs (default: from configuration).
        #[arg(long)]
        every: Option<u64>,
    },

    /// List the stored channels of an input.
    Channels {
        /// Input to inspect.
        #[arg(short, long, default_value = "sample")]
        input: String,
    },

    /// List the stored programs of a channel.
    Programs {
        /// Input to inspect.
        #[arg(short, long, default_value = "sample")]
        input: String,

        /// External id of the channel.
        #[arg(long)]
        channel: String,

        /// Maximum number of programs to show.
        #[arg(short, long, default_value = "24")]
        limit: usize,
    },

    /// Print the effective configuration.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };

    if let Commands::Config = cli.command {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let store = open_store(&cli.store, cli.db.as_deref())?;

    match cli.command {
        Commands::Sync { input, hours } => cmd_sync(store, config, &input, hours).await,

        Commands::Watch {
            input,
            hours,
            every,
        } => cmd_watch(store, config, &input, hours, every).await,

        Commands::Channels { input } => cmd_channels(store, &input).await,

        Commands::Programs {
            input,
            channel,
            limit,
        } => cmd_programs(store, &input, &channel, limit).await,

        Commands::Config => Ok(()),
    }
}

/// Default database location.
fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .context("Could not determine the user data directory")?
        .join("epgsync");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir.join("guide.db"))
}

/// Resolve the store backend.
fn open_store(backend: &str, db: Option<&Path>) -> Result<Arc<dyn Store>> {
    let store_config = match backend {
        "sqlite" => {
            let path = match db {
                Some(path) => path.to_path_buf(),
                None => default_db_path()?,
            };
            info!("Using guide database at: {}", path.display());
            serde_json::json!({ "path": path.to_string_lossy() })
        }
        _ => serde_json::json!({}),
    };

    create_default_registry()
        .resolve(backend, store_config)
        .with_context(|| format!("Failed to open '{}' store", backend))
}

fn parse_input(input: &str) -> Result<InputId> {
    InputId::new(input).context("Invalid input name")
}

fn window_ms(hours: Option<i64>, default_ms: i64) -> Result<i64> {
    let ms = match hours {
        Some(h) if h <= 0 => anyhow::bail!("Window length must be at least one hour"),
        Some(h) => match h.checked_mul(HOUR_MS) {
            Some(ms) => ms,
            None => anyhow::bail!("Window length of {} hours is too long", h),
        },
        None => default_ms,
    };
    check_period(ms).context("Invalid window length")?;
    Ok(ms)
}

/// Start a scheduler serving the sample source for `input`.
async fn start_scheduler(
    store: Arc<dyn Store>,
    config: SyncConfig,
    input: &InputId,
) -> Result<(SyncScheduler, tokio::task::JoinHandle<()>)> {
    let (scheduler, handle) = SyncScheduler::new(store, Arc::new(SystemClock), config);
    let worker = tokio::spawn(handle.run());

    scheduler
        .register_source(input.clone(), Arc::new(SampleSource::new()))
        .await
        .context("Failed to register source")?;

    Ok((scheduler, worker))
}

/// Wait for the terminal status of `input`.
async fn wait_for_terminal(
    rx: &mut broadcast::Receiver<SyncStatusEvent>,
    input: &InputId,
) -> Result<SyncStatus> {
    loop {
        match rx.recv().await {
            Ok(event) if &event.input_id == input => {
                print_status(&event.status);
                if event.status.is_terminal() {
                    return Ok(event.status);
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Missed {} status events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => {
                anyhow::bail!("Scheduler stopped before the sync finished");
            }
        }
    }
}

fn print_status(status: &SyncStatus) {
    match status {
        SyncStatus::Scanned {
            channels_scanned,
            channel_count,
            display_name,
        } => println!("  [{}/{}] {}", channels_scanned, channel_count, display_name),
        other => println!("{}", other),
    }
}

fn print_report(report: &SyncReport) {
    println!("Sync Report:");
    println!("  Run: {}", report.run_id);
    println!("  Input: {}", report.input);
    println!("  Window: {}", report.window);
    println!(
        "  Channels: {} synced, {} failed, {} written, {} removed",
        report.channels_synced, report.channels_failed, report.channels_written, report.channels_deleted
    );
    println!(
        "  Programs: {} inserted, {} updated, {} deleted, {} unchanged",
        report.programs_inserted, report.programs_updated, report.programs_deleted, report.programs_unchanged
    );
    println!("  Duration: {:?}", report.duration);
    if report.cancelled {
        println!("  (cancelled)");
    }
}

fn format_time(ms: UtcMillis) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Run one sync now.
async fn cmd_sync(store: Arc<dyn Store>, config: SyncConfig, input: &str, hours: Option<i64>) -> Result<()> {
    let input = parse_input(input)?;
    let period_ms = window_ms(hours, config.immediate_window_ms)?;
    info!("Syncing {} hours of guide data for: {}", period_ms / HOUR_MS, input);

    let (scheduler, worker) = start_scheduler(store, config, &input).await?;
    let mut rx = scheduler.subscribe();

    scheduler
        .request_immediate_sync(&input, period_ms)
        .await
        .context("Failed to request sync")?;
    let status = wait_for_terminal(&mut rx, &input).await?;

    if let Some(report) = scheduler.last_report(&input).await {
        print_report(&report);
    }

    scheduler.shutdown().await;
    worker.await.context("Scheduler task failed")?;

    if let SyncStatus::Error(reason) = status {
        anyhow::bail!("Sync failed: {:?}", reason);
    }
    Ok(())
}

/// Sync periodically until Ctrl-C.
async fn cmd_watch(
    store: Arc<dyn Store>,
    config: SyncConfig,
    input: &str,
    hours: Option<i64>,
    every: Option<u64>,
) -> Result<()> {
    let input = parse_input(input)?;
    let period_ms = window_ms(hours, config.periodic_window_ms)?;
    let every = match every {
        Some(0) => anyhow::bail!("Interval must be at least one minute"),
        Some(minutes) => Duration::from_secs(minutes * 60),
        None => config.sync_interval()?,
    };

    let (scheduler, worker) = start_scheduler(store, config, &input).await?;
    let mut rx = scheduler.subscribe();

    // Fill the guide right away, then keep it fresh.
    scheduler.request_immediate_sync(&input, period_ms).await?;
    scheduler
        .request_periodic_sync_every(&input, period_ms, every)
        .await
        .context("Failed to register periodic sync")?;
    println!("Watching {} (every {:?}), press Ctrl-C to stop", input, every);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    print_status(&event.status);
                    if event.status == SyncStatus::Finished {
                        if let Some(report) = scheduler.last_report(&input).await {
                            print_report(&report);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {} status events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                println!("\nStopping...");
                break;
            }
        }
    }

    scheduler.cancel_all_sync_requests(&input).await;
    scheduler.shutdown().await;
    worker.await.context("Scheduler task failed")?;

    Ok(())
}

/// List the channels of an input.
async fn cmd_channels(store: Arc<dyn Store>, input: &str) -> Result<()> {
    let input = parse_input(input)?;
    let channels = store
        .get_channels(&input)
        .await
        .context("Failed to read channels")?;

    if channels.is_empty() {
        println!("No channels for {}. Run 'epgsync sync' first.", input);
        return Ok(());
    }

    println!("Channels of {}:", input);
    for channel in channels {
        let programs = match channel.id {
            Some(id) => store.get_programs(id).await?.len(),
            None => 0,
        };
        println!(
            "  {:>6}  {:<20} {:<24} {:>5} programs{}",
            channel.display_number.as_deref().unwrap_or("-"),
            channel.external_id,
            channel.display_name,
            programs,
            if channel.repeatable { "  (repeating)" } else { "" }
        );
    }

    Ok(())
}

/// List the programs of a channel.
async fn cmd_programs(store: Arc<dyn Store>, input: &str, channel: &str, limit: usize) -> Result<()> {
    let input = parse_input(input)?;
    let channels = store
        .get_channels(&input)
        .await
        .context("Failed to read channels")?;

    let found = channels
        .iter()
        .find(|c| c.external_id == channel)
        .with_context(|| format!("Channel not found: {}", channel))?;
    let id = found
        .id
        .with_context(|| format!("Channel {} has no store id", channel))?;

    let programs = store
        .get_programs(id)
        .await
        .context("Failed to read programs")?;

    println!("Programs of {} ({} total):", found.display_name, programs.len());
    for program in programs.iter().take(limit) {
        let episode = program
            .episode_title
            .as_deref()
            .map(|e| format!(" - {}", e))
            .unwrap_or_default();
        println!(
            "  {}  {}  {}{}",
            format_time(program.start_time_utc_ms),
            format_time(program.end_time_utc_ms),
            program.title,
            episode
        );
    }
    if programs.len() > limit {
        println!("  ... {} more", programs.len() - limit);
    }

    Ok(())
}
