//! Store (C2): embedded relational persistence and schema owner.
//!
//! Grounded on the teacher's `signals/db_storage.rs` (`DbSignalStorage`):
//! `rusqlite` opened with `SQLITE_OPEN_NO_MUTEX` (our own locking via
//! `parking_lot::Mutex`), WAL journal mode, and heavier writes wrapped in
//! `tokio::task::spawn_blocking`. All `replace_*` operations run inside a
//! single transaction (truncate + bulk insert), satisfying the
//! all-or-nothing contract in spec.md §4.2; bulk inserts use multi-row
//! `INSERT` statements chunked at 500 rows to amortize overhead while
//! staying inside that one transaction.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{info, warn};

use crate::errors::PipelineError;
use crate::models::{DoctrineRow, HistoryPoint, Order, Stat, TypeInfo};

const CHUNK_SIZE: usize = 500;
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS type_catalog (
    type_id INTEGER PRIMARY KEY,
    type_name TEXT NOT NULL,
    group_id INTEGER NOT NULL,
    group_name TEXT NOT NULL,
    category_id INTEGER NOT NULL,
    category_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS watchlist (
    type_id INTEGER PRIMARY KEY,
    type_name TEXT,
    group_id INTEGER,
    group_name TEXT,
    category_id INTEGER,
    category_name TEXT
);

CREATE TABLE IF NOT EXISTS market_order (
    order_id INTEGER PRIMARY KEY,
    type_id INTEGER NOT NULL,
    type_name TEXT,
    volume_remain INTEGER NOT NULL,
    price TEXT NOT NULL,
    issued TEXT NOT NULL,
    duration INTEGER NOT NULL,
    is_buy_order INTEGER NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_market_order_type ON market_order(type_id, is_buy_order);

CREATE TABLE IF NOT EXISTS market_history (
    date TEXT NOT NULL,
    type_id INTEGER NOT NULL,
    type_name TEXT,
    average TEXT NOT NULL,
    highest TEXT NOT NULL,
    lowest TEXT NOT NULL,
    order_count INTEGER NOT NULL,
    volume INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    PRIMARY KEY (date, type_id)
);

CREATE TABLE IF NOT EXISTS market_stats (
    type_id INTEGER PRIMARY KEY,
    total_volume_remain INTEGER NOT NULL,
    min_price TEXT NOT NULL,
    price_low_percentile TEXT NOT NULL,
    avg_of_avg_price TEXT NOT NULL,
    avg_daily_volume TEXT NOT NULL,
    group_id INTEGER NOT NULL,
    type_name TEXT,
    group_name TEXT,
    category_id INTEGER NOT NULL,
    category_name TEXT,
    days_remaining TEXT NOT NULL,
    comparator_sell TEXT,
    comparator_buy TEXT,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS doctrines (
    fit_id INTEGER NOT NULL,
    type_id INTEGER NOT NULL,
    category TEXT,
    fit TEXT NOT NULL,
    ship TEXT,
    item TEXT,
    qty INTEGER NOT NULL,
    stock INTEGER NOT NULL,
    fits INTEGER NOT NULL,
    days TEXT NOT NULL,
    price_low TEXT NOT NULL,
    avg_vol TEXT NOT NULL,
    avg_price TEXT NOT NULL,
    delta INTEGER NOT NULL,
    doctrine TEXT NOT NULL,
    "group" TEXT,
    cat_id INTEGER NOT NULL,
    grp_id INTEGER NOT NULL,
    doc_id INTEGER NOT NULL,
    ship_id INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    PRIMARY KEY (fit_id, type_id)
);
"#;

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| anyhow::anyhow!("failed to open store at {path}: {e}"))?;
        conn.execute_batch(SCHEMA_SQL)?;
        info!(path, "store initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Preloaded reference data for TypeCatalog (populated out-of-band).
    pub async fn load_type_catalog(&self) -> Result<Vec<TypeInfo>, PipelineError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn.prepare(
                "SELECT type_id, type_name, group_id, group_name, category_id, category_name \
                 FROM type_catalog",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(TypeInfo {
                        type_id: row.get(0)?,
                        type_name: row.get(1)?,
                        group_id: row.get(2)?,
                        group_name: row.get(3)?,
                        category_id: row.get(4)?,
                        category_name: row.get(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| PipelineError::Store(format!("join error: {e}")))?
    }

    pub async fn read_watchlist(&self) -> Result<HashSet<i64>, PipelineError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn.prepare("SELECT type_id FROM watchlist")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<HashSet<_>>>()?;
            Ok(ids)
        })
        .await
        .map_err(|e| PipelineError::Store(format!("join error: {e}")))?
    }

    /// Merges additional type ids (e.g. every type a loaded Fit references)
    /// into the persisted watchlist so they remain watched next cycle.
    pub async fn merge_watchlist(
        &self,
        ids: HashSet<i64>,
        catalog: &crate::catalog::TypeCatalog,
    ) -> Result<(), PipelineError> {
        if ids.is_empty() {
            return Ok(());
        }
        let rows: Vec<TypeInfo> = ids.into_iter().map(|id| catalog.lookup_or_blank(id)).collect();
        let conn = self.conn.clone();
        with_retry(move || {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            for chunk in rows.chunks(CHUNK_SIZE) {
                for row in chunk {
                    tx.execute(
                        "INSERT INTO watchlist (type_id, type_name, group_id, group_name, category_id, category_name) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                         ON CONFLICT(type_id) DO UPDATE SET type_name=excluded.type_name",
                        params![
                            row.type_id,
                            row.type_name,
                            row.group_id,
                            row.group_name,
                            row.category_id,
                            row.category_name,
                        ],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn replace_orders(&self, orders: Vec<Order>) -> Result<(), PipelineError> {
        let conn = self.conn.clone();
        with_retry(move || {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM market_order", [])?;
            let now = Utc::now().to_rfc3339();
            for chunk in orders.chunks(CHUNK_SIZE) {
                for o in chunk {
                    tx.execute(
                        "INSERT INTO market_order \
                         (order_id, type_id, volume_remain, price, issued, duration, is_buy_order, timestamp) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            o.order_id,
                            o.type_id,
                            o.volume_remain,
                            o.price.to_string(),
                            o.issued.to_rfc3339(),
                            o.duration,
                            o.is_buy_order as i64,
                            now,
                        ],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_history(&self, points: Vec<HistoryPoint>) -> Result<(), PipelineError> {
        let conn = self.conn.clone();
        with_retry(move || {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();
            for chunk in points.chunks(CHUNK_SIZE) {
                for p in chunk {
                    tx.execute(
                        "INSERT INTO market_history (date, type_id, average, highest, lowest, order_count, volume, timestamp) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                         ON CONFLICT(date, type_id) DO UPDATE SET \
                            average=excluded.average, highest=excluded.highest, lowest=excluded.lowest, \
                            order_count=excluded.order_count, volume=excluded.volume, timestamp=excluded.timestamp",
                        params![
                            p.date.to_string(),
                            p.type_id,
                            p.average.to_string(),
                            p.highest.to_string(),
                            p.lowest.to_string(),
                            p.order_count,
                            p.volume,
                            now,
                        ],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn read_history(&self, lookback_days: i64) -> Result<Vec<HistoryPoint>, PipelineError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let cutoff = (Utc::now().date_naive() - chrono::Duration::days(lookback_days)).to_string();
            let mut stmt = conn.prepare(
                "SELECT date, type_id, average, highest, lowest, order_count, volume \
                 FROM market_history WHERE date >= ?1",
            )?;
            let rows = stmt
                .query_map(params![cutoff], |row| {
                    let date_str: String = row.get(0)?;
                    let average: String = row.get(2)?;
                    let highest: String = row.get(3)?;
                    let lowest: String = row.get(4)?;
                    Ok(HistoryPoint {
                        date: date_str.parse::<NaiveDate>().unwrap_or_default(),
                        type_id: row.get(1)?,
                        average: average.parse().unwrap_or_default(),
                        highest: highest.parse().unwrap_or_default(),
                        lowest: lowest.parse().unwrap_or_default(),
                        order_count: row.get(5)?,
                        volume: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(|e| PipelineError::Store(format!("join error: {e}")))?
    }

    pub async fn replace_stats(&self, stats: Vec<Stat>) -> Result<(), PipelineError> {
        let conn = self.conn.clone();
        with_retry(move || {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM market_stats", [])?;
            for chunk in stats.chunks(CHUNK_SIZE) {
                for s in chunk {
                    tx.execute(
                        "INSERT INTO market_stats \
                         (type_id, total_volume_remain, min_price, price_low_percentile, avg_of_avg_price, \
                          avg_daily_volume, group_id, type_name, group_name, category_id, category_name, \
                          days_remaining, comparator_sell, comparator_buy, timestamp) \
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                        params![
                            s.type_id,
                            s.total_volume_remain,
                            s.min_price.to_string(),
                            s.price_low_percentile.to_string(),
                            s.avg_of_avg_price.to_string(),
                            s.avg_daily_volume.to_string(),
                            s.group_id,
                            s.type_name,
                            s.group_name,
                            s.category_id,
                            s.category_name,
                            s.days_remaining.to_string(),
                            s.comparator_sell.map(|d| d.to_string()),
                            s.comparator_buy.map(|d| d.to_string()),
                            s.timestamp.to_rfc3339(),
                        ],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn replace_doctrines(&self, rows: Vec<DoctrineRow>) -> Result<(), PipelineError> {
        let conn = self.conn.clone();
        with_retry(move || {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM doctrines", [])?;
            for chunk in rows.chunks(CHUNK_SIZE) {
                for r in chunk {
                    tx.execute(
                        r#"INSERT INTO doctrines
                           (fit_id, type_id, category, fit, ship, item, qty, stock, fits, days,
                            price_low, avg_vol, avg_price, delta, doctrine, "group", cat_id, grp_id,
                            doc_id, ship_id, timestamp)
                           VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)"#,
                        params![
                            r.fit_id,
                            r.type_id,
                            r.category_name,
                            r.fit_name,
                            r.ship_type_name,
                            r.type_name,
                            r.quantity_required,
                            r.stock,
                            r.fits_on_market,
                            r.days_remaining.to_string(),
                            r.price_low_percentile.to_string(),
                            r.avg_daily_volume.to_string(),
                            r.avg_of_avg_price.to_string(),
                            r.delta,
                            r.doctrine_name,
                            r.group_name,
                            r.category_id,
                            r.group_id,
                            r.doctrine_id,
                            r.ship_type_id,
                            r.timestamp.to_rfc3339(),
                        ],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

/// Runs a blocking closure on a worker thread with bounded retry/backoff
/// (250ms * 2^n, max 3 attempts) per spec.md §4.2/§7: transient store I/O
/// retries, integrity violations are programmer errors and are not retried.
async fn with_retry<F>(f: F) -> Result<(), PipelineError>
where
    F: Fn() -> rusqlite::Result<()> + Send + 'static,
{
    let f = Arc::new(f);
    for attempt in 0..MAX_RETRIES {
        let f = f.clone();
        let result = tokio::task::spawn_blocking(move || f())
            .await
            .map_err(|e| PipelineError::Store(format!("join error: {e}")))?;

        match result {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) && attempt + 1 < MAX_RETRIES => {
                let backoff = BACKOFF_BASE_MS * 2u64.pow(attempt);
                warn!(attempt, backoff, error = %e, "store write failed, retrying");
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => return Err(PipelineError::Store(e.to_string())),
        }
    }
    unreachable!("with_retry loop always returns within MAX_RETRIES iterations")
}

fn is_transient(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_order(order_id: i64, type_id: i64, is_buy: bool, price: rust_decimal::Decimal, volume: i64) -> Order {
        Order {
            order_id,
            type_id,
            is_buy_order: is_buy,
            price,
            volume_remain: volume,
            volume_total: volume,
            issued: Utc::now(),
            duration: 90,
            range: "region".to_string(),
        }
    }

    #[tokio::test]
    async fn replace_orders_is_truncate_and_replace() {
        let store = Store::open_in_memory().unwrap();
        store
            .replace_orders(vec![sample_order(1, 100, false, dec!(5.0), 10)])
            .await
            .unwrap();
        store
            .replace_orders(vec![sample_order(2, 200, false, dec!(6.0), 20)])
            .await
            .unwrap();

        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM market_order", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn upsert_history_twice_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let point = HistoryPoint {
            date: "2024-01-01".parse().unwrap(),
            type_id: 500,
            average: dec!(7.0),
            highest: dec!(8.0),
            lowest: dec!(6.0),
            volume: 100,
            order_count: 5,
        };
        store.upsert_history(vec![point.clone()]).await.unwrap();
        store.upsert_history(vec![point]).await.unwrap();

        let conn = store.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM market_history", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn read_history_respects_lookback_window() {
        let store = Store::open_in_memory().unwrap();
        let old_point = HistoryPoint {
            date: (Utc::now().date_naive() - chrono::Duration::days(60)),
            type_id: 1,
            average: dec!(1.0),
            highest: dec!(1.0),
            lowest: dec!(1.0),
            volume: 1,
            order_count: 1,
        };
        let recent_point = HistoryPoint {
            date: Utc::now().date_naive(),
            type_id: 2,
            average: dec!(2.0),
            highest: dec!(2.0),
            lowest: dec!(2.0),
            volume: 2,
            order_count: 2,
        };
        store
            .upsert_history(vec![old_point, recent_point])
            .await
            .unwrap();

        let rows = store.read_history(30).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].type_id, 2);
    }
}
