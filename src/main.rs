//! Tagminer main entry point
//!
//! This is the command-line interface for the Tagminer hashtag harvester.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tagminer::config::{load_config_with_hash, Config};
use tagminer::credentials::{CookieFileSource, CredentialSource};
use tagminer::daemon::Daemon;
use tagminer::stats::{load_statistics, print_statistics};
use tagminer::{open_storage, FeedClient, FeedTab, Harvester};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Tagminer: an incremental hashtag feed harvester
///
/// Tagminer walks hashtag feeds and comment threads, storing posts, users
/// and comments idempotently so repeated runs only add what is new.
#[derive(Parser, Debug)]
#[command(name = "tagminer")]
#[command(version = "1.0.0")]
#[command(about = "An incremental hashtag feed harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest one or more hashtags once
    Scrape {
        /// Hashtags, with or without the leading '#'
        #[arg(required = true)]
        tags: Vec<String>,

        /// Page budget per hashtag
        #[arg(long, default_value_t = 5)]
        pages: u32,

        /// Feed tab to walk
        #[arg(long, default_value = "top")]
        tab: FeedTab,

        /// Do not download media
        #[arg(long)]
        no_images: bool,

        /// Do not fetch author profiles
        #[arg(long)]
        no_enrich: bool,
    },

    /// Back-fill comments for stored posts that have none
    Comments {
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },

    /// Run the harvest daemon until interrupted
    Daemon {
        /// Override the configured stored-post target
        #[arg(long)]
        target: Option<u64>,

        /// Do not download media
        #[arg(long)]
        no_images: bool,
    },

    /// Show statistics from storage and exit
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Scrape {
            tags,
            pages,
            tab,
            no_images,
            no_enrich,
        } => handle_scrape(&config, &tags, pages, tab, !no_images, !no_enrich).await,
        Command::Comments { limit } => handle_comments(&config, limit).await,
        Command::Daemon { target, no_images } => handle_daemon(config, target, no_images).await,
        Command::Stats => handle_stats(&config).await,
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("tagminer=info,warn"),
            1 => EnvFilter::new("tagminer=debug,info"),
            2 => EnvFilter::new("tagminer=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Opens storage and the feed client; missing credentials are fatal
async fn build_harvester(
    config: &Config,
) -> anyhow::Result<(Harvester, Arc<CookieFileSource>, Arc<tagminer::Credentials>)> {
    let source = Arc::new(CookieFileSource::from_config(&config.credentials));
    let credentials = source.load().await.with_context(|| {
        format!(
            "Cannot start without a session: check {}",
            config.credentials.cookie_file
        )
    })?;
    tracing::info!("Session loaded ({})", credentials.session_hint());

    let storage = open_storage(&config.storage).context("Failed to open storage")?;
    let feed = FeedClient::new(&config.feed, config.pacing.clone())
        .context("Failed to build feed client")?;
    Ok((Harvester::new(feed, storage), source, credentials))
}

async fn handle_scrape(
    config: &Config,
    tags: &[String],
    pages: u32,
    tab: FeedTab,
    download_images: bool,
    enrich_users: bool,
) -> anyhow::Result<()> {
    let (harvester, _source, credentials) = build_harvester(config).await?;

    let mut total = 0;
    for tag in tags {
        let tag = tag.trim_start_matches('#');
        match harvester
            .scrape_hashtag(&credentials, tag, tab, pages, download_images, enrich_users)
            .await
        {
            Ok(stored) => total += stored,
            Err(e) => tracing::error!("#{} failed: {}", tag, e),
        }
    }

    harvester.storage().close().await.context("Failed to close storage")?;
    println!("Stored {} new posts across {} hashtags", total, tags.len());
    Ok(())
}

async fn handle_comments(config: &Config, limit: usize) -> anyhow::Result<()> {
    let (harvester, _source, credentials) = build_harvester(config).await?;

    let result = harvester.scrape_comments_batch(&credentials, limit).await;
    harvester.storage().close().await.context("Failed to close storage")?;

    let stored = result.context("Comment pass failed")?;
    println!("Stored {} comments", stored);
    Ok(())
}

async fn handle_daemon(
    mut config: Config,
    target: Option<u64>,
    no_images: bool,
) -> anyhow::Result<()> {
    if let Some(target) = target {
        config.daemon.target = target;
    }
    if no_images {
        config.daemon.download_images = false;
    }

    let (harvester, source, credentials) = build_harvester(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown requested, finishing current hashtag");
        let _ = shutdown_tx.send(true);
    });

    let mut daemon = Daemon::new(
        config.daemon.clone(),
        config.pacing.clone(),
        harvester,
        source,
        credentials,
        shutdown_rx,
    );
    daemon.run().await.context("Daemon failed")?;
    tracing::info!("Daemon stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let storage = open_storage(&config.storage).context("Failed to open storage")?;
    let stats = load_statistics(storage.as_ref())
        .await
        .context("Failed to load statistics")?;
    print_statistics(&stats);
    Ok(())
}
