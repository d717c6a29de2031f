use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use vale_intel::catalog::TypeCatalog;
use vale_intel::config::Config;
use vale_intel::fit_catalog::JsonFitCatalog;
use vale_intel::pipeline::Pipeline;
use vale_intel::scrapers::{HistoryFetcher, OrderFetcher, PriceAugmenter};
use vale_intel::sinks::LogSink;
use vale_intel::store::Store;
use vale_intel::token::StaticTokenProvider;

/// Structure order book ingestion, history tracking, and doctrine-stock
/// monitoring for a single market.
#[derive(Debug, Parser)]
#[command(name = "vale-intel", version)]
struct Cli {
    /// Run a single cycle and exit instead of looping.
    #[arg(long)]
    once: bool,

    /// Seconds to sleep between cycles when looping.
    #[arg(long, default_value_t = 300)]
    interval_seconds: u64,

    /// ESI access token. In production this comes from an SSO refresh
    /// flow (out of scope here); a static token is accepted directly.
    #[arg(long, env = "ESI_ACCESS_TOKEN")]
    access_token: String,

    /// Force a history refetch this run, overriding FRESH_HISTORY.
    #[arg(long)]
    fresh_history: bool,

    /// Path to the JSON fit catalog, overriding FIT_CATALOG_PATH.
    #[arg(long)]
    config_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if cli.fresh_history {
        config.fresh_history = true;
    }
    if let Some(path) = &cli.config_path {
        config.fit_catalog_path = path.clone();
    }
    info!(structure_id = config.structure_id, region_id = config.region_id, "starting vale-intel");

    let store = Store::open(&config.database_path)?;
    let types = store.load_type_catalog().await?;
    let catalog = TypeCatalog::new(types);

    let tokens = Box::new(StaticTokenProvider::new(cli.access_token));
    let fits = Box::new(JsonFitCatalog::new(config.fit_catalog_path.clone()));

    let order_fetcher = OrderFetcher::new(
        config.esi_base_url.clone(),
        config.structure_id,
        config.user_agent.clone(),
        Duration::from_secs(config.request_timeout_seconds),
        config.max_retries_per_page,
        Duration::from_secs(config.retry_backoff_seconds),
    )?;
    let history_fetcher = HistoryFetcher::new(
        config.esi_base_url.clone(),
        config.region_id,
        config.user_agent.clone(),
        config.history_concurrency,
        Duration::from_secs(config.request_timeout_seconds),
    )?;
    let price_augmenter = PriceAugmenter::new(
        config.comparator_base_url.clone(),
        config.comparator_region_id,
        config.user_agent.clone(),
        Duration::from_secs(config.request_timeout_seconds),
    )?;

    let pipeline = Pipeline::new(
        config,
        store,
        catalog,
        tokens,
        fits,
        order_fetcher,
        history_fetcher,
        price_augmenter,
        Box::new(LogSink),
        Box::new(LogSink),
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("shutdown signal received, finishing current cycle then exiting");
                cancel.store(true, std::sync::atomic::Ordering::Release);
            }
        });
    }

    loop {
        match pipeline.run_cycle(&cancel).await {
            Ok(report) => info!(?report, "cycle finished"),
            Err(e) => error!(error = %e, "cycle failed"),
        }

        if cli.once || cancel.load(std::sync::atomic::Ordering::Acquire) {
            break;
        }

        tokio::time::sleep(Duration::from_secs(cli.interval_seconds)).await;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vale_intel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
