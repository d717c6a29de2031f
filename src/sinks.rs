//! Sinks (C11): best-effort delivery of finished cycle output to the
//! outside world.
//!
//! The original system pushes to a Google Sheet (`google_sheet_updater.py`),
//! which is out of scope here. `StatsSink`/`DoctrineSink` keep the seam so a
//! real external sink can be added without touching the pipeline; `LogSink`
//! is the one concrete implementation, grounded on the teacher's structured
//! `tracing` summary logging at the end of `backtest.rs` runs.

use async_trait::async_trait;
use tracing::info;

use crate::models::{DoctrineRow, Stat};

#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn publish_stats(&self, stats: &[Stat]);
}

#[async_trait]
pub trait DoctrineSink: Send + Sync {
    async fn publish_doctrines(&self, rows: &[DoctrineRow]);
}

/// Logs a one-line summary of each cycle's output. Never fails: sinks are
/// explicitly best-effort (spec.md §4.8 step 12) and must not abort a cycle
/// that otherwise succeeded.
pub struct LogSink;

#[async_trait]
impl StatsSink for LogSink {
    async fn publish_stats(&self, stats: &[Stat]) {
        let low_stock = stats.iter().filter(|s| s.days_remaining < rust_decimal::Decimal::from(7)).count();
        info!(
            type_count = stats.len(),
            low_stock_count = low_stock,
            "stats cycle complete"
        );
    }
}

#[async_trait]
impl DoctrineSink for LogSink {
    async fn publish_doctrines(&self, rows: &[DoctrineRow]) {
        let shortfalls = rows.iter().filter(|r| r.delta < 0).count();
        info!(
            row_count = rows.len(),
            shortfall_count = shortfalls,
            "doctrine cycle complete"
        );
    }
}
