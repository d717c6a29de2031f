//! PriceAugmenter (C7): enriches stats with a comparator market's
//! percentile prices.
//!
//! Grounded on `original_source/get_jita_prices.py`'s comma-joined
//! type_id/region query against the Fuzzworks aggregate endpoint. Failure
//! here is explicitly non-fatal (spec.md §4.7): any error leaves the
//! comparator columns unset and the cycle proceeds.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

use crate::models::Stat;

#[derive(Debug, Deserialize)]
struct ComparatorSide {
    #[serde(with = "rust_decimal::serde::float")]
    percentile: Decimal,
}

#[derive(Debug, Deserialize)]
struct ComparatorEntry {
    buy: Option<ComparatorSide>,
    sell: Option<ComparatorSide>,
}

pub struct PriceAugmenter {
    client: Client,
    base_url: String,
    region_id: i64,
    user_agent: String,
}

impl PriceAugmenter {
    pub fn new(
        base_url: String,
        region_id: i64,
        user_agent: String,
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
        })
    }

    /// Left-joins comparator prices onto `stats` in place. Never fails:
    /// any error along the way just leaves comparator columns unset.
    pub async fn enrich(&self, stats: &mut [Stat]) {
        if stats.is_empty() {
            return;
        }

        let csv = stats
            .iter()
            .map(|s| s.type_id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let url = format!("{}/aggregates/", self.base_url);
        let result = self
            .client
            .get(&url)
            .query(&[("region", self.region_id.to_string()), ("types", csv)])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await;

        let resp = match result {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                warn!(status = %r.status(), "comparator endpoint returned non-success, skipping enrichment");
                return;
            }
            Err(e) => {
                warn!(error = %e, "comparator endpoint request failed, skipping enrichment");
                return;
            }
        };

        let parsed: HashMap<String, ComparatorEntry> = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "comparator response malformed, skipping enrichment");
                return;
            }
        };

        for stat in stats.iter_mut() {
            if let Some(entry) = parsed.get(&stat.type_id.to_string()) {
                stat.comparator_buy = entry.buy.as_ref().map(|s| s.percentile);
                stat.comparator_sell = entry.sell.as_ref().map(|s| s.percentile);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sample_stat(type_id: i64) -> Stat {
        Stat {
            type_id,
            total_volume_remain: 0,
            min_price: dec!(0),
            price_low_percentile: dec!(0),
            avg_of_avg_price: dec!(0),
            avg_daily_volume: dec!(0),
            days_remaining: dec!(0),
            type_name: String::new(),
            group_id: 0,
            group_name: String::new(),
            category_id: 0,
            category_name: String::new(),
            comparator_sell: None,
            comparator_buy: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enrich_is_a_no_op_on_empty_stats() {
        let augmenter = PriceAugmenter::new(
            "https://example.invalid".to_string(),
            10_000_002,
            "test-agent".to_string(),
            Duration::from_secs(10),
        )
        .unwrap();
        let mut stats = Vec::<Stat>::new();
        augmenter.enrich(&mut stats).await;
        assert!(stats.is_empty());
    }

    #[tokio::test]
    async fn enrich_leaves_comparator_fields_unset_on_network_failure() {
        let augmenter = PriceAugmenter::new(
            "https://comparator.invalid.example".to_string(),
            10_000_002,
            "test-agent".to_string(),
            Duration::from_secs(10),
        )
        .unwrap();
        let mut stats = vec![sample_stat(100)];
        augmenter.enrich(&mut stats).await;
        assert!(stats[0].comparator_sell.is_none());
        assert!(stats[0].comparator_buy.is_none());
    }
}
