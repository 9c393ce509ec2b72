use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use preprint_repo_archiver::archiver::{run_archive_pass, PassKind};
use preprint_repo_archiver::config::Config;
use preprint_repo_archiver::constants::USER_AGENT;
use preprint_repo_archiver::crawler::{CatalogCrawler, CrawlMode};
use preprint_repo_archiver::db::{store_summary, Database};
use preprint_repo_archiver::harvest::{run_extraction_pass, ArticleHarvester};
use preprint_repo_archiver::links::LinkExtractor;
use preprint_repo_archiver::pdf::HttpPdfSource;
use preprint_repo_archiver::swh::{ArchiveService, SoftwareHeritageClient};

/// Find code repositories cited by preprints and archive them in Software Heritage.
#[derive(Parser, Debug)]
#[command(name = "preprint-repo-archiver")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new articles from the preprint catalog
    Crawl {
        /// Number of listing pages to visit (defaults to CRAWL_PAGES)
        #[arg(long)]
        pages: Option<u32>,

        /// Keep going past articles that are already stored
        #[arg(long)]
        full: bool,
    },
    /// Extract repository links from unprocessed articles
    Extract,
    /// Check and submit repositories that are not yet archived
    Archive,
    /// Re-check repositories whose submission is pending
    Recheck,
    /// Print store counts as JSON
    Stats,
    /// Run crawl, extract, archive and recheck in order
    All {
        /// Number of listing pages to visit (defaults to CRAWL_PAGES)
        #[arg(long)]
        pages: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        database = %config.database_path.display(),
        workers = config.worker_concurrency,
        policy = ?config.source_policy,
        "Configuration loaded"
    );

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }

    // One connection per worker plus one for work-list queries.
    let max_connections = u32::try_from(config.worker_concurrency + 1).unwrap_or(u32::MAX);
    let db = Database::new(&config.database_path, max_connections)
        .await
        .context("Failed to initialize database")?;

    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(config.http_timeout)
        .build()
        .context("Failed to build HTTP client")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested, finishing in-flight work");
        signal_cancel.cancel();
    });

    match cli.command {
        Command::Crawl { pages, full } => {
            let mode = if full { CrawlMode::Full } else { CrawlMode::Incremental };
            crawl(&config, &db, &client, pages, mode, &cancel).await?;
        }
        Command::Extract => extract(&config, &db, &client, &cancel).await?,
        Command::Archive => archive(&config, &db, &client, PassKind::Reconcile, &cancel).await?,
        Command::Recheck => archive(&config, &db, &client, PassKind::Recheck, &cancel).await?,
        Command::Stats => {
            let mut conn = db.acquire().await?;
            let summary = store_summary(&mut conn).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::All { pages } => {
            crawl(&config, &db, &client, pages, CrawlMode::Incremental, &cancel).await?;
            extract(&config, &db, &client, &cancel).await?;
            archive(&config, &db, &client, PassKind::Reconcile, &cancel).await?;
            archive(&config, &db, &client, PassKind::Recheck, &cancel).await?;
        }
    }

    if cancel.is_cancelled() {
        info!("Stopped early on shutdown signal");
    }

    Ok(())
}

async fn crawl(
    config: &Config,
    db: &Database,
    client: &reqwest::Client,
    pages: Option<u32>,
    mode: CrawlMode,
    cancel: &CancellationToken,
) -> Result<()> {
    let crawler = CatalogCrawler::from_config(client.clone(), config)?;
    crawler
        .crawl(db, pages.unwrap_or(config.crawl_pages), mode, cancel)
        .await?;
    Ok(())
}

async fn extract(
    config: &Config,
    db: &Database,
    client: &reqwest::Client,
    cancel: &CancellationToken,
) -> Result<()> {
    let harvester = ArticleHarvester::new(
        Arc::new(LinkExtractor::new(config.trusted_hosts.clone())),
        Arc::new(HttpPdfSource::new(client.clone())),
        config.source_policy,
        config.pdf_scan_budget,
    );
    run_extraction_pass(db, Arc::new(harvester), config.worker_concurrency, cancel).await?;
    Ok(())
}

async fn archive(
    config: &Config,
    db: &Database,
    client: &reqwest::Client,
    kind: PassKind,
    cancel: &CancellationToken,
) -> Result<()> {
    let service: Arc<dyn ArchiveService> =
        Arc::new(SoftwareHeritageClient::from_config(client.clone(), config));
    run_archive_pass(db, service, config, kind, cancel).await?;
    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,preprint_repo_archiver=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
