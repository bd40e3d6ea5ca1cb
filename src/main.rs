use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use taggy::aggregator::Aggregator;
use taggy::config::Config;
use taggy::fetchers::{RedditFetcher, SavedFeed, XFetcher};
use taggy::store::{KvStore, SqliteStore};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting taggy sync");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let store: Arc<dyn KvStore> = Arc::new(
        SqliteStore::open(&config.database_path)
            .await
            .context("Failed to open store")?,
    );
    info!(path = %config.database_path.display(), "Store initialized");

    let feeds: Vec<Box<dyn SavedFeed>> = vec![
        Box::new(
            RedditFetcher::new(config.clone(), Arc::clone(&store))
                .context("Failed to build Reddit fetcher")?,
        ),
        Box::new(
            XFetcher::new(config.clone(), Arc::clone(&store))
                .context("Failed to build X fetcher")?,
        ),
    ];
    let aggregator = Aggregator::new(store, feeds);

    let outcome = aggregator.load_all().await.context("Load failed")?;

    for source in outcome
        .posts
        .iter()
        .map(|p| p.source)
        .collect::<std::collections::BTreeSet<_>>()
    {
        let count = outcome.posts.iter().filter(|p| p.source == source).count();
        info!(%source, count, "Synced saved posts");
    }
    for (source, fetch_error) in &outcome.errors {
        warn!(%source, error = %fetch_error, "Platform not synced");
    }
    if let Some(prompt) = outcome.connect_prompt() {
        info!("{prompt}");
    }
    info!(
        total = outcome.posts.len(),
        pending_cursors = outcome.cursors.len(),
        "Sync complete"
    );

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,taggy=debug"));

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
