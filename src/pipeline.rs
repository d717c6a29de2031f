//! Pipeline (C8): orchestrates one update cycle end to end.
//!
//! Grounded on the teacher's `main.rs` cycle loop (`parallel_data_collection`
//! plus its outer `loop { ... sleep(poll_ms) }`): sequential steps with
//! `tracing` at each stage, and a single-holder guard so overlapping cycles
//! never run concurrently (spec.md §5's single-holder mutex requirement).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::aggregator;
use crate::catalog::TypeCatalog;
use crate::config::Config;
use crate::doctrine;
use crate::errors::PipelineError;
use crate::fit_catalog::FitCatalog;
use crate::scrapers::{HistoryFetcher, OrderFetcher, PriceAugmenter};
use crate::sinks::{DoctrineSink, StatsSink};
use crate::store::Store;
use crate::token::TokenProvider;

/// Summary of one completed cycle, returned to the caller for logging.
#[derive(Debug)]
pub struct CycleReport {
    pub orders_fetched: usize,
    pub failed_pages: usize,
    pub stats_rows: usize,
    pub doctrine_rows: usize,
    pub elapsed_ms: u64,
}

pub struct Pipeline {
    config: Config,
    store: Store,
    catalog: Arc<TypeCatalog>,
    tokens: Box<dyn TokenProvider>,
    fits: Box<dyn FitCatalog>,
    order_fetcher: OrderFetcher,
    history_fetcher: HistoryFetcher,
    price_augmenter: PriceAugmenter,
    stats_sink: Box<dyn StatsSink>,
    doctrine_sink: Box<dyn DoctrineSink>,
    busy: AtomicBool,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        store: Store,
        catalog: TypeCatalog,
        tokens: Box<dyn TokenProvider>,
        fits: Box<dyn FitCatalog>,
        order_fetcher: OrderFetcher,
        history_fetcher: HistoryFetcher,
        price_augmenter: PriceAugmenter,
        stats_sink: Box<dyn StatsSink>,
        doctrine_sink: Box<dyn DoctrineSink>,
    ) -> Self {
        Self {
            config,
            store,
            catalog: Arc::new(catalog),
            tokens,
            fits,
            order_fetcher,
            history_fetcher,
            price_augmenter,
            stats_sink,
            doctrine_sink,
            busy: AtomicBool::new(false),
        }
    }

    /// Runs one cycle. Returns `CycleBusy` immediately if another cycle is
    /// already in flight, never blocking (spec.md §5).
    pub async fn run_cycle(&self, cancel: &AtomicBool) -> Result<CycleReport, PipelineError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::CycleBusy);
        }

        let result = self.run_cycle_inner(cancel).await;
        self.busy.store(false, Ordering::Release);
        result
    }

    async fn run_cycle_inner(&self, cancel: &AtomicBool) -> Result<CycleReport, PipelineError> {
        let t0 = Instant::now();
        self.catalog.reset_cycle();

        let mut watchlist = self.store.read_watchlist().await?;
        let fits = self.fits.fits().await?;
        let referenced = referenced_types(&fits);
        self.store.merge_watchlist(referenced.clone(), &self.catalog).await?;
        watchlist.extend(referenced);

        if is_cancelled(cancel) {
            return Err(PipelineError::Cancelled);
        }

        let (orders, telemetry) = self.order_fetcher.fetch_orders(self.tokens.as_ref()).await?;
        if !telemetry.failed_pages.is_empty() {
            warn!(failed_pages = ?telemetry.failed_pages, "some order pages failed, continuing with partial data");
        }
        self.store.replace_orders(orders.clone()).await?;

        if is_cancelled(cancel) {
            return Err(PipelineError::Cancelled);
        }

        let history = if self.config.fresh_history {
            let points = self
                .history_fetcher
                .fetch_history(
                    &watchlist.iter().copied().collect::<Vec<_>>(),
                    self.catalog.clone(),
                    None,
                )
                .await;
            self.store.upsert_history(points.clone()).await?;
            points
        } else {
            self.store.read_history(self.config.history_lookback_days).await?
        };

        if is_cancelled(cancel) {
            return Err(PipelineError::Cancelled);
        }

        let mut stats = aggregator::aggregate(&orders, &history, &watchlist, &self.catalog);
        self.price_augmenter.enrich(&mut stats).await;
        self.store.replace_stats(stats.clone()).await?;

        if is_cancelled(cancel) {
            return Err(PipelineError::Cancelled);
        }

        let doctrines = doctrine::evaluate(&fits, &stats, self.config.doctrine_target, &self.catalog);
        self.store.replace_doctrines(doctrines.clone()).await?;

        self.stats_sink.publish_stats(&stats).await;
        self.doctrine_sink.publish_doctrines(&doctrines).await;

        let elapsed_ms = t0.elapsed().as_millis() as u64;
        info!(
            orders_fetched = orders.len(),
            failed_pages = telemetry.failed_pages.len(),
            stats_rows = stats.len(),
            doctrine_rows = doctrines.len(),
            elapsed_ms,
            "cycle complete"
        );

        Ok(CycleReport {
            orders_fetched: orders.len(),
            failed_pages: telemetry.failed_pages.len(),
            stats_rows: stats.len(),
            doctrine_rows: doctrines.len(),
            elapsed_ms,
        })
    }
}

fn referenced_types(fits: &[crate::models::Fit]) -> HashSet<i64> {
    let mut out = HashSet::new();
    for fit in fits {
        out.insert(fit.ship_type_id);
        for component in &fit.components {
            out.insert(component.type_id);
        }
    }
    out
}

fn is_cancelled(cancel: &AtomicBool) -> bool {
    cancel.load(Ordering::Acquire)
}
