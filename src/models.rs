//! Domain entities for the ingestion/aggregation/doctrine pipeline.
//!
//! Field names and shapes are taken directly from the specification's data
//! model (orders, history, stats, doctrine rows) and from
//! `original_source/models.py`'s SQLAlchemy table definitions, which confirm
//! the exact column set each entity needs. Prices are `Decimal` rather than
//! `f64` to avoid binary-float drift when summing across large order books.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Denormalized identity lookup for a market type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub type_id: i64,
    pub type_name: String,
    pub group_id: i64,
    pub group_name: String,
    pub category_id: i64,
    pub category_name: String,
}

/// A single live order in a structure's order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: i64,
    pub type_id: i64,
    pub is_buy_order: bool,
    pub price: Decimal,
    pub volume_remain: i64,
    pub volume_total: i64,
    pub issued: DateTime<Utc>,
    pub duration: i32,
    pub range: String,
}

/// One day's trade aggregate for one type, keyed by `(date, type_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub type_id: i64,
    pub average: Decimal,
    pub highest: Decimal,
    pub lowest: Decimal,
    pub volume: i64,
    pub order_count: i64,
}

/// Per-item market statistics, fully rebuilt each cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub type_id: i64,
    pub total_volume_remain: i64,
    pub min_price: Decimal,
    pub price_low_percentile: Decimal,
    pub avg_of_avg_price: Decimal,
    pub avg_daily_volume: Decimal,
    pub days_remaining: Decimal,
    pub type_name: String,
    pub group_id: i64,
    pub group_name: String,
    pub category_id: i64,
    pub category_name: String,
    pub comparator_sell: Option<Decimal>,
    pub comparator_buy: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

/// A required component of a fit: `quantity` units of `type_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitComponent {
    pub type_id: i64,
    pub quantity: i64,
}

/// A named ship configuration read from the (external) fitting catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fit {
    pub fit_id: i64,
    pub fit_name: String,
    pub ship_type_id: i64,
    pub ship_type_name: String,
    pub doctrine_id: i64,
    pub doctrine_name: String,
    pub components: Vec<FitComponent>,
}

/// One `(fit_id, type_id)` row of doctrine availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctrineRow {
    pub fit_id: i64,
    pub type_id: i64,
    pub doctrine_id: i64,
    pub doctrine_name: String,
    pub fit_name: String,
    pub ship_type_id: i64,
    pub ship_type_name: String,
    pub type_name: String,
    pub category_id: i64,
    pub category_name: String,
    pub group_id: i64,
    pub group_name: String,
    pub quantity_required: i64,
    pub stock: i64,
    pub fits_on_market: i64,
    pub delta: i64,
    pub price_low_percentile: Decimal,
    pub avg_daily_volume: Decimal,
    pub avg_of_avg_price: Decimal,
    pub days_remaining: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// The per-fit binding-constraint summary: the minimum `fits_on_market`
/// across all of a fit's components (including the hull).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoctrineSummary {
    pub fit_id: i64,
    pub doctrine_name_is_known: bool,
    pub min_fits_on_market: i64,
}
