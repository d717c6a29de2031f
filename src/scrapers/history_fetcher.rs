//! HistoryFetcher (C4): per-item daily trade history with bounded
//! concurrency.
//!
//! The only genuine parallelism in the system (spec.md §5): up to
//! `concurrency` items are in flight at once, gated by a `tokio::sync::
//! Semaphore`, mirroring how the teacher bounds concurrent work in its
//! scrapers without saturating the one exchange connection it owns.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use crate::catalog::TypeCatalog;
use crate::errors::PipelineError;
use crate::models::HistoryPoint;

#[derive(Debug, Deserialize)]
struct RawHistoryEntry {
    date: chrono::NaiveDate,
    #[serde(with = "rust_decimal::serde::float")]
    average: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    highest: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    lowest: Decimal,
    volume: i64,
    order_count: i64,
}

/// Progress update emitted as each item's fetch completes (spec.md §4.4).
#[derive(Debug, Clone)]
pub struct HistoryProgress {
    pub items_completed: usize,
    pub items_total: usize,
    pub current_type_id: i64,
    pub current_type_name: String,
}

pub struct HistoryFetcher {
    client: Client,
    base_url: String,
    region_id: i64,
    user_agent: String,
    concurrency: usize,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HistoryFetcher {
    pub fn new(
        base_url: String,
        region_id: i64,
        user_agent: String,
        concurrency: usize,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build http client: {e}"))?;

        Ok(Self {
            client,
            base_url,
            region_id,
            user_agent,
            concurrency: concurrency.min(16),
            max_attempts: 5,
            retry_delay: Duration::from_secs(3),
        })
    }

    /// Fetches history for every type id, optionally reporting progress.
    /// Items whose endpoint errors out after all retries, or returns an
    /// empty array, contribute no rows and are not treated as failures.
    pub async fn fetch_history(
        &self,
        type_ids: &[i64],
        catalog: Arc<TypeCatalog>,
        progress: Option<mpsc::UnboundedSender<HistoryProgress>>,
    ) -> Vec<HistoryPoint> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let total = type_ids.len();
        let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut joins = tokio::task::JoinSet::new();

        for type_id in type_ids.iter().copied() {
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let progress = progress.clone();
            let catalog = catalog.clone();
            let client = self.client.clone();
            let url = format!("{}/markets/{}/history/", self.base_url, self.region_id);
            let user_agent = self.user_agent.clone();
            let max_attempts = self.max_attempts;
            let retry_delay = self.retry_delay;

            joins.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let rows = fetch_one(&client, &url, type_id, &user_agent, max_attempts, retry_delay).await;

                let done = completed.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
                if let Some(tx) = &progress {
                    let current_type_name = catalog.lookup_or_blank(type_id).type_name;
                    let _ = tx.send(HistoryProgress {
                        items_completed: done,
                        items_total: total,
                        current_type_id: type_id,
                        current_type_name,
                    });
                }

                rows
            });
        }

        let mut out = Vec::new();
        while let Some(result) = joins.join_next().await {
            out.extend(result.unwrap_or_default());
        }
        out
    }
}

async fn fetch_one(
    client: &Client,
    url: &str,
    type_id: i64,
    user_agent: &str,
    max_attempts: u32,
    retry_delay: Duration,
) -> Vec<HistoryPoint> {
    for attempt in 0..max_attempts {
        let result = client
            .get(url)
            .query(&[("type_id", type_id)])
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await;

        let resp = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(_) if attempt + 1 < max_attempts => {
                tokio::time::sleep(retry_delay).await;
                continue;
            }
            Ok(r) => {
                let status = r.status();
                let err = if status.is_server_error() {
                    PipelineError::FetchTransient { detail: format!("http {status}") }
                } else {
                    PipelineError::FetchFatal { detail: format!("http {status}") }
                };
                warn!(type_id, error = %err, "history fetch failed after retries, skipping item");
                return Vec::new();
            }
            Err(_) if attempt + 1 < max_attempts => {
                tokio::time::sleep(retry_delay).await;
                continue;
            }
            Err(e) => {
                let err = PipelineError::FetchTransient { detail: e.to_string() };
                warn!(type_id, error = %err, "history fetch failed after retries, skipping item");
                return Vec::new();
            }
        };

        match resp.json::<Vec<RawHistoryEntry>>().await {
            Ok(entries) => {
                return entries
                    .into_iter()
                    .map(|e| HistoryPoint {
                        date: e.date,
                        type_id,
                        average: e.average,
                        highest: e.highest,
                        lowest: e.lowest,
                        volume: e.volume,
                        order_count: e.order_count,
                    })
                    .collect();
            }
            Err(_) if attempt + 1 < max_attempts => {
                tokio::time::sleep(retry_delay).await;
            }
            Err(e) => {
                let err = PipelineError::FetchFatal { detail: e.to_string() };
                warn!(type_id, error = %err, "history response malformed after retries, skipping item");
                return Vec::new();
            }
        }
    }
    Vec::new()
}
