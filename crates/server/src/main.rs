//! Sitemap service binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use sitemaps_core::config::AppConfig;
use sitemaps_server::bootstrap::seed_storage;
use sitemaps_server::{AppState, create_router};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// sitemapsd - sharded sitemap hierarchy service
#[derive(Parser, Debug)]
#[command(name = "sitemapsd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SITEMAPS_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    /// Run every sweep once and exit instead of serving
    #[arg(long)]
    run_once: bool,
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}, using defaults and environment", path);
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("SITEMAPS_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("sitemapsd v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    sitemaps_server::metrics::register_metrics();

    let storage = sitemaps_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend ready");

    let metadata = sitemaps_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    metadata
        .migrate()
        .await
        .context("failed to run metadata migrations")?;
    tracing::info!("Metadata store ready");

    let seeded = seed_storage(storage.as_ref(), &config.sitemaps).await?;
    tracing::debug!(?seeded, "Storage seeding finished");

    let notifier = sitemaps_server::notify::from_config(&config.notify)
        .context("failed to initialize crawler notifier")?;

    let state = AppState::new(config.clone(), storage, metadata, notifier);

    if args.run_once {
        let stats = state.scheduler.run_all().await;
        tracing::info!(
            groups = stats.groups,
            succeeded = stats.succeeded,
            skipped = stats.skipped,
            failed = stats.failed,
            records = stats.records,
            "Single run finished"
        );
        return Ok(());
    }

    if config.scheduler.enabled {
        let handles = state.scheduler.clone().spawn();
        tracing::info!(
            jobs = handles.len(),
            interval_secs = config.scheduler.interval_secs,
            "Sweep scheduler started"
        );
    } else {
        tracing::info!("Sweep scheduler disabled");
    }

    let app = create_router(state);
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
