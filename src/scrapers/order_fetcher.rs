//! OrderFetcher (C3): paginated fetch of a structure's order book.
//!
//! Grounded on the teacher's `DomeRestClient` (`dome_rest.rs`) for the
//! `reqwest::Client` construction and per-request error shaping. Unlike the
//! Dome client, ESI pagination is sequential and rate-budget aware: the
//! total page count isn't known until page 1 returns, and the server's
//! `X-ESI-Error-Limit-Remain` header can force an immediate halt.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::models::Order;
use crate::token::TokenProvider;

#[derive(Debug, Deserialize)]
struct RawOrder {
    order_id: i64,
    type_id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    price: Decimal,
    volume_remain: i64,
    volume_total: i64,
    is_buy_order: bool,
    issued: chrono::DateTime<chrono::Utc>,
    duration: i32,
    range: String,
}

impl From<RawOrder> for Order {
    fn from(r: RawOrder) -> Self {
        Order {
            order_id: r.order_id,
            type_id: r.type_id,
            is_buy_order: r.is_buy_order,
            price: r.price,
            volume_remain: r.volume_remain,
            volume_total: r.volume_total,
            issued: r.issued,
            duration: r.duration,
            range: r.range,
        }
    }
}

/// Per-cycle telemetry for one `fetch_orders` call (spec.md §4.3).
#[derive(Debug, Clone, Default)]
pub struct FetchTelemetry {
    pub pages_fetched: u32,
    pub max_pages_reported: u32,
    pub failed_pages: Vec<u32>,
    pub min_error_limit_remain: Option<i64>,
    pub elapsed: Duration,
}

pub struct OrderFetcher {
    client: Client,
    base_url: String,
    structure_id: i64,
    user_agent: String,
    max_retries_per_page: u32,
    retry_backoff: Duration,
}

impl OrderFetcher {
    pub fn new(
        base_url: String,
        structure_id: i64,
        user_agent: String,
        request_timeout: Duration,
        max_retries_per_page: u32,
        retry_backoff: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build http client: {e}"))?;

        Ok(Self {
            client,
            base_url,
            structure_id,
            user_agent,
            max_retries_per_page,
            retry_backoff,
        })
    }

    pub async fn fetch_orders(
        &self,
        tokens: &dyn TokenProvider,
    ) -> Result<(Vec<Order>, FetchTelemetry), PipelineError> {
        let started = Instant::now();
        let mut telemetry = FetchTelemetry::default();
        let mut orders = Vec::new();
        let mut token = tokens.token().await?;
        let mut reauthenticated = false;

        let mut page: u32 = 1;
        let mut total_pages: u32 = 1;

        while page <= total_pages {
            let (result, retried_auth) = self
                .fetch_page(page, &token, &mut telemetry, reauthenticated)
                .await?;
            reauthenticated = reauthenticated || retried_auth;

            match result {
                PageOutcome::Halt => {
                    warn!(
                        page,
                        min_error_limit_remain = ?telemetry.min_error_limit_remain,
                        "error-limit-remain reached 0, aborting cycle before any write"
                    );
                    return Err(PipelineError::RateBudgetExhausted);
                }
                PageOutcome::AuthFailed => {
                    if reauthenticated {
                        return Err(PipelineError::Auth(format!(
                            "401 on page {page} after token refresh"
                        )));
                    }
                    token = tokens.refresh().await?;
                    reauthenticated = true;
                    continue;
                }
                PageOutcome::Failed => {
                    telemetry.failed_pages.push(page);
                    page += 1;
                }
                PageOutcome::Success { rows, reported_total } => {
                    if let Some(t) = reported_total {
                        total_pages = t;
                        telemetry.max_pages_reported = telemetry.max_pages_reported.max(t);
                    }
                    orders.extend(rows.into_iter().map(Order::from));
                    telemetry.pages_fetched += 1;
                    page += 1;
                }
            }
        }

        telemetry.elapsed = started.elapsed();
        info!(
            pages_fetched = telemetry.pages_fetched,
            max_pages = telemetry.max_pages_reported,
            failed_pages = telemetry.failed_pages.len(),
            min_error_limit_remain = ?telemetry.min_error_limit_remain,
            elapsed_ms = telemetry.elapsed.as_millis() as u64,
            "order fetch complete"
        );

        Ok((orders, telemetry))
    }

    /// Fetches one page with up to `max_retries_per_page` attempts.
    /// Returns whether a fresh auth attempt was already spent this call.
    async fn fetch_page(
        &self,
        page: u32,
        token: &str,
        telemetry: &mut FetchTelemetry,
        already_reauthenticated: bool,
    ) -> Result<(PageOutcome, bool), PipelineError> {
        let url = format!(
            "{}/markets/structures/{}/?page={}",
            self.base_url, self.structure_id, page
        );

        for attempt in 0..=self.max_retries_per_page {
            let resp = self
                .client
                .get(&url)
                .header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .send()
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(_) if attempt < self.max_retries_per_page => {
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }
                Err(e) => {
                    let err = PipelineError::FetchTransient { detail: e.to_string() };
                    warn!(page, error = %err, "page fetch failed after all retries, skipping page");
                    return Ok((PageOutcome::Failed, already_reauthenticated));
                }
            };

            if resp.status() == StatusCode::UNAUTHORIZED {
                return Ok((PageOutcome::AuthFailed, already_reauthenticated));
            }

            if let Some(remain) = parse_header_i64(resp.headers(), "x-esi-error-limit-remain") {
                telemetry.min_error_limit_remain = Some(
                    telemetry
                        .min_error_limit_remain
                        .map_or(remain, |m| m.min(remain)),
                );
                if remain <= 0 {
                    return Ok((PageOutcome::Halt, already_reauthenticated));
                }
                if remain < 10 {
                    warn!(remain, "ESI error-limit-remain running low");
                }
            }

            if !resp.status().is_success() {
                if attempt < self.max_retries_per_page {
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }
                let status = resp.status();
                let err = if status.is_server_error() {
                    PipelineError::FetchTransient { detail: format!("http {status}") }
                } else {
                    PipelineError::FetchFatal { detail: format!("http {status}") }
                };
                warn!(page, error = %err, "page fetch failed after all retries, skipping page");
                return Ok((PageOutcome::Failed, already_reauthenticated));
            }

            let reported_total = parse_header_u32(resp.headers(), "x-pages");
            match resp.json::<Vec<RawOrder>>().await {
                Ok(rows) => {
                    return Ok((
                        PageOutcome::Success {
                            rows,
                            reported_total,
                        },
                        already_reauthenticated,
                    ))
                }
                Err(_) if attempt < self.max_retries_per_page => {
                    tokio::time::sleep(self.retry_backoff).await;
                    continue;
                }
                Err(e) => {
                    let err = PipelineError::FetchFatal { detail: e.to_string() };
                    warn!(page, error = %err, "page response malformed after all retries, skipping page");
                    return Ok((PageOutcome::Failed, already_reauthenticated));
                }
            }
        }

        Ok((PageOutcome::Failed, already_reauthenticated))
    }
}

enum PageOutcome {
    Success {
        rows: Vec<RawOrder>,
        reported_total: Option<u32>,
    },
    Failed,
    AuthFailed,
    Halt,
}

fn parse_header_i64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn parse_header_u32(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}
