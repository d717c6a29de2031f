//! StatsAggregator (C5): joins live order book reductions to a 30-day
//! history rollup into one row per watchlisted type.
//!
//! The percentile here is the continuous (linear-interpolation) order
//! statistic pandas' `.quantile()` uses, confirmed against
//! `original_source/Doctrine_check.py`'s sell-only percentile call — not the
//! nearest-rank percentile a naive implementation would reach for.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::catalog::TypeCatalog;
use crate::models::{HistoryPoint, Order, Stat};

const HISTORY_WINDOW_DAYS: i64 = 30;
const PERCENTILE: f64 = 0.05;

struct OrderReduction {
    total_volume_remain: i64,
    min_price: Decimal,
    price_low_percentile: Decimal,
}

struct HistoryReduction {
    avg_of_avg_price: Decimal,
    avg_daily_volume: Decimal,
}

pub fn aggregate(
    orders: &[Order],
    history: &[HistoryPoint],
    watchlist: &HashSet<i64>,
    catalog: &TypeCatalog,
) -> Vec<Stat> {
    let order_reductions = reduce_orders(orders, watchlist);
    let history_reductions = reduce_history(history, watchlist);
    let timestamp = Utc::now();

    let mut rows = Vec::with_capacity(watchlist.len());
    for &type_id in watchlist {
        let info = catalog.lookup_or_blank(type_id);
        let orders_side = order_reductions.get(&type_id);
        let history_side = history_reductions.get(&type_id);

        let total_volume_remain = orders_side.map_or(0, |o| o.total_volume_remain);
        let min_price = orders_side.map_or(Decimal::ZERO, |o| o.min_price);
        let price_low_percentile = orders_side.map_or(Decimal::ZERO, |o| o.price_low_percentile);
        let avg_of_avg_price = history_side.map_or(Decimal::ZERO, |h| h.avg_of_avg_price);
        let avg_daily_volume = history_side.map_or(Decimal::ZERO, |h| h.avg_daily_volume);

        let days_remaining = if avg_daily_volume > Decimal::ZERO {
            (Decimal::from(total_volume_remain) / avg_daily_volume).round_dp(1)
        } else {
            Decimal::ZERO
        };

        rows.push(Stat {
            type_id,
            total_volume_remain,
            min_price,
            price_low_percentile,
            avg_of_avg_price,
            avg_daily_volume,
            days_remaining,
            type_name: info.type_name,
            group_id: info.group_id,
            group_name: info.group_name,
            category_id: info.category_id,
            category_name: info.category_name,
            comparator_sell: None,
            comparator_buy: None,
            timestamp,
        });
    }

    rows
}

fn reduce_orders(orders: &[Order], watchlist: &HashSet<i64>) -> HashMap<i64, OrderReduction> {
    let mut by_type: HashMap<i64, Vec<&Order>> = HashMap::new();
    for order in orders {
        if !order.is_buy_order && watchlist.contains(&order.type_id) {
            by_type.entry(order.type_id).or_default().push(order);
        }
    }

    by_type
        .into_iter()
        .map(|(type_id, rows)| {
            let total_volume_remain: i64 = rows.iter().map(|o| o.volume_remain).sum();
            let mut prices: Vec<Decimal> = rows.iter().map(|o| o.price).collect();
            prices.sort();
            let min_price = prices.first().copied().unwrap_or(Decimal::ZERO);
            let price_low_percentile = percentile(&prices, PERCENTILE);

            (
                type_id,
                OrderReduction {
                    total_volume_remain,
                    min_price,
                    price_low_percentile,
                },
            )
        })
        .collect()
}

fn reduce_history(history: &[HistoryPoint], watchlist: &HashSet<i64>) -> HashMap<i64, HistoryReduction> {
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(HISTORY_WINDOW_DAYS);
    let mut by_type: HashMap<i64, Vec<&HistoryPoint>> = HashMap::new();
    for point in history {
        if point.date >= cutoff && watchlist.contains(&point.type_id) {
            by_type.entry(point.type_id).or_default().push(point);
        }
    }

    by_type
        .into_iter()
        .map(|(type_id, points)| {
            let n = Decimal::from(points.len() as i64);
            let avg_of_avg_price = (points.iter().map(|p| p.average).sum::<Decimal>() / n).round_dp(2);
            let avg_daily_volume =
                (points.iter().map(|p| Decimal::from(p.volume)).sum::<Decimal>() / n).round_dp(2);

            (
                type_id,
                HistoryReduction {
                    avg_of_avg_price,
                    avg_daily_volume,
                },
            )
        })
        .collect()
}

/// Continuous (linear-interpolation) percentile over an ascending-sorted
/// slice, matching pandas' default `.quantile()` behavior.
fn percentile(sorted_values: &[Decimal], q: f64) -> Decimal {
    if sorted_values.is_empty() {
        return Decimal::ZERO;
    }
    if sorted_values.len() == 1 {
        return sorted_values[0];
    }

    let n = sorted_values.len();
    let rank = q * (n - 1) as f64;
    let lower_idx = rank.floor() as usize;
    let upper_idx = rank.ceil() as usize;
    let frac = Decimal::from_f64(rank - rank.floor()).unwrap_or(Decimal::ZERO);

    let lower = sorted_values[lower_idx];
    let upper = sorted_values[upper_idx.min(n - 1)];
    lower + (upper - lower) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TypeInfo;
    use rust_decimal_macros::dec;

    fn order(type_id: i64, is_buy: bool, price: Decimal, qty: i64) -> Order {
        Order {
            order_id: rand_id(),
            type_id,
            is_buy_order: is_buy,
            price,
            volume_remain: qty,
            volume_total: qty,
            issued: Utc::now(),
            duration: 90,
            range: "region".to_string(),
        }
    }

    fn rand_id() -> i64 {
        use std::sync::atomic::{AtomicI64, Ordering};
        static NEXT: AtomicI64 = AtomicI64::new(1);
        NEXT.fetch_add(1, Ordering::Relaxed)
    }

    fn empty_catalog() -> TypeCatalog {
        TypeCatalog::new(vec![TypeInfo {
            type_id: 100,
            type_name: "Widget".into(),
            ..Default::default()
        }])
    }

    #[test]
    fn degenerate_single_order_matches_e1() {
        let orders = vec![order(100, false, dec!(5.0), 10)];
        let watchlist = HashSet::from([100]);
        let catalog = empty_catalog();

        let stats = aggregate(&orders, &[], &watchlist, &catalog);
        let stat = stats.iter().find(|s| s.type_id == 100).unwrap();

        assert_eq!(stat.total_volume_remain, 10);
        assert_eq!(stat.min_price, dec!(5.0));
        assert_eq!(stat.price_low_percentile, dec!(5.0));
        assert_eq!(stat.avg_of_avg_price, Decimal::ZERO);
        assert_eq!(stat.avg_daily_volume, Decimal::ZERO);
        assert_eq!(stat.days_remaining, Decimal::ZERO);
    }

    #[test]
    fn hundred_orders_match_e2_percentile() {
        let orders: Vec<Order> = (1..=100)
            .map(|p| order(200, false, Decimal::from(p), 1))
            .collect();
        let watchlist = HashSet::from([200]);
        let catalog = TypeCatalog::new(vec![]);

        let stats = aggregate(&orders, &[], &watchlist, &catalog);
        let stat = stats.iter().find(|s| s.type_id == 200).unwrap();

        assert_eq!(stat.min_price, dec!(1.0));
        assert_eq!(stat.price_low_percentile, dec!(5.95));
        assert_eq!(stat.total_volume_remain, 100);
    }

    #[test]
    fn buy_orders_are_excluded_from_reduction() {
        let orders = vec![
            order(300, false, dec!(10), 5),
            order(300, true, dec!(9), 99),
        ];
        let watchlist = HashSet::from([300]);
        let catalog = TypeCatalog::new(vec![]);

        let stats = aggregate(&orders, &[], &watchlist, &catalog);
        let stat = stats.iter().find(|s| s.type_id == 300).unwrap();

        assert_eq!(stat.total_volume_remain, 5);
        assert_eq!(stat.min_price, dec!(10));
    }

    #[test]
    fn watchlisted_type_with_no_data_is_all_zero() {
        let watchlist = HashSet::from([100]);
        let catalog = empty_catalog();

        let stats = aggregate(&[], &[], &watchlist, &catalog);
        let stat = &stats[0];

        assert_eq!(stat.total_volume_remain, 0);
        assert_eq!(stat.type_name, "Widget");
        assert_eq!(stat.days_remaining, Decimal::ZERO);
    }
}
