//! Hydrate Dial - command-line host for the offline cache and daily tally.
//!
//! Drives the offline cache manager against the on-disk cache store and the
//! configured origin, and exposes the daily tally for scripting.

mod cli;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hydrate_core::tally::{FileStore, Tally};
use hydrate_core::{
    CacheStorage, Config, DiskStorage, FetchOutcome, FetchRequest, HostSignal, HttpNetwork,
    OfflineCacheManager,
};

use cli::{Cli, Command, TallyAction};

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for the host signal channel. The manager sends at most two.
const SIGNAL_CHANNEL_SIZE: usize = 8;

/// File holding the tally key-value store inside the data directory
const TALLY_STORE_FILE: &str = "local-storage.json";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let config = Config::load()?;
    info!(origin = %config.origin, version = %config.cache_version, "hydrate-dial starting");

    match cli.command {
        Command::Init => init_config(&config),
        Command::Install => {
            let manifest = config.asset_manifest()?;
            let manager = build_manager(&config, open_storage(&config)?)?;
            manager.install(&manifest).await?;
            println!("Installed {} ({} assets)", manager.version(), manifest.len());
            Ok(())
        }
        Command::Activate => {
            let manifest = config.asset_manifest()?;
            let manager = build_manager(&config, open_storage(&config)?)?;
            manager
                .resume_installed(&manifest)
                .await
                .with_context(|| format!("{} is not installed, run install first", manager.version()))?;
            manager.activate().await?;
            println!("Activated {}", manager.version());
            Ok(())
        }
        Command::Update => {
            let manifest = config.asset_manifest()?;
            let manager = build_manager(&config, open_storage(&config)?)?;
            manager.install(&manifest).await?;
            manager.activate().await?;
            println!("Activated {}", manager.version());
            Ok(())
        }
        Command::Fetch { path, method } => fetch(&config, &path, &method).await,
        Command::Generations => list_generations(&config).await,
        Command::Tally { action } => tally(&config, action),
    }
}

fn init_config(config: &Config) -> Result<()> {
    config.save().context("Failed to write config")?;
    println!("Wrote default configuration for {}", config.origin);
    Ok(())
}

fn open_storage(config: &Config) -> Result<Arc<dyn CacheStorage>> {
    let storage = DiskStorage::new(config.cache_dir()?).context("Failed to open cache store")?;
    Ok(Arc::new(storage))
}

/// Manager for the configured origin. The manifest is resolved separately,
/// only by the commands that install.
fn build_manager(config: &Config, storage: Arc<dyn CacheStorage>) -> Result<OfflineCacheManager> {
    let origin = config.origin_url()?;
    let network = HttpNetwork::with_timeout(origin.clone(), config.request_timeout())?;

    let (tx, mut rx) = mpsc::channel(SIGNAL_CHANNEL_SIZE);
    tokio::spawn(async move {
        while let Some(signal) = rx.recv().await {
            match signal {
                HostSignal::SkipWaiting => info!("Host: activating new generation immediately"),
                HostSignal::ClaimClients => info!("Host: claiming open clients"),
            }
        }
    });

    Ok(OfflineCacheManager::new(
        config.cache_version.clone(),
        origin,
        storage,
        Arc::new(network),
    )
    .with_signals(tx))
}

async fn fetch(config: &Config, path: &str, method: &str) -> Result<()> {
    let outcome = resolve(config, open_storage(config)?, path, method).await?;

    eprintln!(
        "{} {} ({:?}, {} bytes)",
        outcome.response.status,
        outcome.response.url,
        outcome.source,
        outcome.response.body.len()
    );
    io::stdout().write_all(&outcome.response.body)?;
    Ok(())
}

async fn resolve(
    config: &Config,
    storage: Arc<dyn CacheStorage>,
    path: &str,
    method: &str,
) -> Result<FetchOutcome> {
    let manager = build_manager(config, storage)?;
    let url = config
        .origin_url()?
        .join(path)
        .with_context(|| format!("Invalid path: {}", path))?;

    let outcome = manager.fetch(FetchRequest::new(method, url)).await?;
    manager.wait_for_pending_writes().await;
    Ok(outcome)
}

async fn list_generations(config: &Config) -> Result<()> {
    let storage = DiskStorage::new(config.cache_dir()?)?;
    let names = storage.keys().await?;
    if names.is_empty() {
        println!("No cache generations in {}", storage.cache_dir().display());
        return Ok(());
    }
    for name in names {
        let entries = storage.open(&name).await?.keys().await?.len();
        let marker = if name == config.cache_version { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, entries);
    }
    Ok(())
}

fn tally(config: &Config, action: TallyAction) -> Result<()> {
    let store = FileStore::open(config.data_dir()?.join(TALLY_STORE_FILE))?;
    let today = chrono::Utc::now().date_naive();
    let mut tally = Tally::open(store, today)?;

    match action {
        TallyAction::Show => println!("{} {}", tally.record().date, tally.count()),
        TallyAction::Inc => println!("{}", tally.increment()?),
        TallyAction::Dec => println!("{}", tally.decrement()?),
        TallyAction::Reset => {
            tally.reset()?;
            println!("0");
        }
        TallyAction::History => {
            for record in tally.history()? {
                println!("{} {}", record.date, record.count);
            }
            println!("{} {} (today)", tally.record().date, tally.count());
        }
    }
    Ok(())
}
