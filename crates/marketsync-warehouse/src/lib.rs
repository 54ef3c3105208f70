//! # Marketsync Warehouse
//!
//! DuckDB-backed local store for synchronized market data.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `bars_daily` / `bars_weekly` / `bars_monthly` | Period bars keyed by symbol and timestamp |
//! | `bars_minute` | Intraday bars keyed by symbol, interval and timestamp |
//! | `sync_watermarks` | Newest stored timestamp per symbol and dataset |
//! | `instruments` | Persisted instrument universe |
//! | `financials` | Annual and quarterly financial statements |
//! | `ingest_log` | One row per write batch or failed task |
//!
//! Every bar batch and its watermark advance are written in one transaction,
//! so a crash never leaves a watermark pointing past stored data.
//!
//! ```rust,no_run
//! use marketsync_warehouse::{BarDataset, Warehouse};
//!
//! let warehouse = Warehouse::open_default()?;
//! let newest = warehouse.watermark("005930", BarDataset::Daily)?;
//! println!("{newest:?}");
//! # Ok::<(), marketsync_warehouse::WarehouseError>(())
//! ```

pub mod duckdb;
pub mod migrations;
pub mod views;

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{Connection, OptionalExt, ToSql};
use serde::Serialize;
use thiserror::Error;

pub use duckdb::{AccessMode, DuckDbConnectionManager, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error while preparing the database directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A write batch was rejected before reaching the database.
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for marketsync data.
    pub marketsync_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept per access mode.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let marketsync_home = resolve_marketsync_home();
        let db_path = marketsync_home.join("warehouse.duckdb");
        Self {
            marketsync_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// Bar table selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarDataset {
    Daily,
    Weekly,
    Monthly,
    /// Intraday bars sharing one table, partitioned by bar length.
    Minute { interval: u16 },
}

impl BarDataset {
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Daily => "bars_daily",
            Self::Weekly => "bars_weekly",
            Self::Monthly => "bars_monthly",
            Self::Minute { .. } => "bars_minute",
        }
    }

    /// Dataset label stored in `sync_watermarks` and `ingest_log`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Minute { .. } => "minute",
        }
    }

    #[must_use]
    pub const fn interval_min(self) -> i32 {
        match self {
            Self::Minute { interval } => interval as i32,
            _ => 0,
        }
    }
}

impl fmt::Display for BarDataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minute { interval } => write!(f, "minute/{interval}"),
            other => f.write_str(other.name()),
        }
    }
}

/// A stored bar row. Timestamps use `YYYY-MM-DD HH:MM:SS` in market-local time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarRecord {
    pub symbol: String,
    pub ts: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub trading_value: Option<i64>,
    pub change_rate: Option<f64>,
}

/// A persisted instrument universe entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentRecord {
    pub symbol: String,
    pub name: String,
    pub market: String,
}

/// A financial statement row keyed by symbol, base date and quarter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialRecord {
    pub symbol: String,
    /// `YYYY-MM-DD`.
    pub base_date: String,
    pub quarter: i32,
    pub sales: Option<f64>,
    pub operating_profit: Option<f64>,
    pub net_profit: Option<f64>,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub roe: Option<f64>,
    pub debt_ratio: Option<f64>,
}

/// Audit entry appended to `ingest_log`.
#[derive(Debug, Clone)]
pub struct IngestEntry<'a> {
    pub request_id: &'a str,
    pub symbol: Option<&'a str>,
    pub source: &'a str,
    pub dataset: &'a str,
    pub status: &'a str,
    pub row_count: Option<i64>,
    pub latency_ms: Option<u64>,
}

/// Result of a committed bar batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarWriteSummary {
    pub rows_written: usize,
    /// Watermark after the commit, if any rows exist for the series.
    pub watermark: Option<String>,
}

/// The main warehouse interface for market data storage.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse, creating the parent directory and schema as needed.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply pending migrations and refresh views.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub fn marketsync_home(&self) -> &Path {
        self.config.marketsync_home.as_path()
    }

    /// Newest stored timestamp for a series.
    ///
    /// Falls back to the bar table itself when no watermark row exists, which
    /// covers databases populated before watermarks were tracked.
    pub fn watermark(
        &self,
        symbol: &str,
        dataset: BarDataset,
    ) -> Result<Option<String>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        if let Some(watermark) = stored_watermark(&connection, symbol, dataset)? {
            return Ok(Some(watermark));
        }

        let sql = format!(
            "SELECT CAST(MAX(ts) AS VARCHAR) FROM {table} WHERE symbol = ? AND interval_min = ?",
            table = dataset.table()
        );
        let interval = dataset.interval_min();
        let params: [&dyn ToSql; 2] = [&symbol, &interval];
        let newest: Option<String> =
            connection.query_row(sql.as_str(), params.as_slice(), |row| row.get(0))?;
        Ok(newest)
    }

    /// Close of the newest stored bar strictly before `before`.
    pub fn prior_close(
        &self,
        symbol: &str,
        dataset: BarDataset,
        before: &str,
    ) -> Result<Option<f64>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT close FROM {table} \
             WHERE symbol = ? AND interval_min = ? AND ts < CAST(? AS TIMESTAMP) \
             ORDER BY ts DESC LIMIT 1",
            table = dataset.table()
        );
        let interval = dataset.interval_min();
        let params: [&dyn ToSql; 3] = [&symbol, &interval, &before];
        let close = connection
            .query_row(sql.as_str(), params.as_slice(), |row| row.get::<_, f64>(0))
            .optional()?;
        Ok(close)
    }

    /// Upsert a batch of bars and advance each symbol's watermark in one transaction.
    ///
    /// Rows are keyed by `(symbol, interval_min, ts)`; existing rows are replaced.
    /// The watermark only ever moves forward.
    pub fn upsert_bars(
        &self,
        source: &str,
        dataset: BarDataset,
        request_id: &str,
        rows: &[BarRecord],
        latency_ms: u64,
    ) -> Result<BarWriteSummary, WarehouseError> {
        if rows.is_empty() {
            return Ok(BarWriteSummary {
                rows_written: 0,
                watermark: None,
            });
        }
        if let Some(row) = rows.iter().find(|row| row.symbol.trim().is_empty()) {
            return Err(WarehouseError::Rejected(format!(
                "bar at '{}' has an empty symbol",
                row.ts
            )));
        }

        let interval = dataset.interval_min();
        let dataset_name = dataset.name();
        let insert_sql = format!(
            "INSERT OR REPLACE INTO {table} \
             (symbol, interval_min, ts, open, high, low, close, volume, trading_value, change_rate, source, updated_at) \
             VALUES (?, ?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
            table = dataset.table()
        );

        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<BarWriteSummary, WarehouseError> {
            let mut newest: Vec<(&str, &str)> = Vec::new();
            for row in rows {
                let params: [&dyn ToSql; 11] = [
                    &row.symbol,
                    &interval,
                    &row.ts,
                    &row.open,
                    &row.high,
                    &row.low,
                    &row.close,
                    &row.volume,
                    &row.trading_value,
                    &row.change_rate,
                    &source,
                ];
                connection.execute(insert_sql.as_str(), params.as_slice())?;

                match newest.iter_mut().find(|(symbol, _)| *symbol == row.symbol) {
                    Some(entry) if entry.1 < row.ts.as_str() => entry.1 = row.ts.as_str(),
                    Some(_) => {}
                    None => newest.push((row.symbol.as_str(), row.ts.as_str())),
                }
            }

            let mut watermark = None;
            for (symbol, candidate) in &newest {
                let current = stored_watermark(&connection, symbol, dataset)?;
                let advanced = match current {
                    Some(current) if current.as_str() >= *candidate => current,
                    _ => {
                        let params: [&dyn ToSql; 4] =
                            [symbol, &dataset_name, &interval, candidate];
                        connection.execute(
                            "INSERT OR REPLACE INTO sync_watermarks \
                             (symbol, dataset, interval_min, watermark, updated_at) \
                             VALUES (?, ?, ?, CAST(? AS TIMESTAMP), CURRENT_TIMESTAMP)",
                            params.as_slice(),
                        )?;
                        (*candidate).to_string()
                    }
                };

                let row_count = rows.iter().filter(|row| row.symbol == *symbol).count() as i64;
                insert_ingest_entry(
                    &connection,
                    &IngestEntry {
                        request_id,
                        symbol: Some(*symbol),
                        source,
                        dataset: dataset.table(),
                        status: "ok",
                        row_count: Some(row_count),
                        latency_ms: Some(latency_ms),
                    },
                )?;
                watermark = Some(advanced);
            }

            Ok(BarWriteSummary {
                rows_written: rows.len(),
                watermark,
            })
        })();

        finalize_transaction(&connection, result)
    }

    /// Bars for `symbol` with `start <= ts <= end`, oldest first.
    pub fn read_bars(
        &self,
        symbol: &str,
        dataset: BarDataset,
        start: &str,
        end: &str,
    ) -> Result<Vec<BarRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let sql = format!(
            "SELECT symbol, CAST(ts AS VARCHAR), open, high, low, close, volume, trading_value, change_rate \
             FROM {table} \
             WHERE symbol = ? AND interval_min = ? \
               AND ts >= CAST(? AS TIMESTAMP) AND ts <= CAST(? AS TIMESTAMP) \
             ORDER BY ts",
            table = dataset.table()
        );
        let interval = dataset.interval_min();
        let params: [&dyn ToSql; 4] = [&symbol, &interval, &start, &end];
        let mut statement = connection.prepare(sql.as_str())?;
        let rows = statement.query_map(params.as_slice(), |row| {
            Ok(BarRecord {
                symbol: row.get(0)?,
                ts: row.get(1)?,
                open: row.get(2)?,
                high: row.get(3)?,
                low: row.get(4)?,
                close: row.get(5)?,
                volume: row.get(6)?,
                trading_value: row.get(7)?,
                change_rate: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Replace the stored universe entries for the given instruments.
    pub fn upsert_instruments(
        &self,
        source: &str,
        rows: &[InstrumentRecord],
    ) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for row in rows {
                let params: [&dyn ToSql; 4] = [&row.symbol, &row.name, &row.market, &source];
                connection.execute(
                    "INSERT OR REPLACE INTO instruments (symbol, name, market, source, updated_at) \
                     VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }
            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Stored instruments ordered by symbol, optionally limited to one market.
    pub fn instruments(&self, market: Option<&str>) -> Result<Vec<InstrumentRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let map_row = |row: &::duckdb::Row<'_>| {
            Ok::<_, ::duckdb::Error>(InstrumentRecord {
                symbol: row.get(0)?,
                name: row.get(1)?,
                market: row.get(2)?,
            })
        };

        let rows = match market {
            Some(market) => {
                let mut statement = connection.prepare(
                    "SELECT symbol, name, market FROM instruments WHERE market = ? ORDER BY symbol",
                )?;
                let params: [&dyn ToSql; 1] = [&market];
                let rows = statement
                    .query_map(params.as_slice(), map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut statement = connection
                    .prepare("SELECT symbol, name, market FROM instruments ORDER BY symbol")?;
                let rows = statement
                    .query_map([], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Upsert financial rows keyed by `(symbol, base_date, quarter)`.
    pub fn upsert_financials(
        &self,
        source: &str,
        request_id: &str,
        rows: &[FinancialRecord],
        latency_ms: u64,
    ) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            for row in rows {
                let params: [&dyn ToSql; 11] = [
                    &row.symbol,
                    &row.base_date,
                    &row.quarter,
                    &row.sales,
                    &row.operating_profit,
                    &row.net_profit,
                    &row.per,
                    &row.pbr,
                    &row.roe,
                    &row.debt_ratio,
                    &source,
                ];
                connection.execute(
                    "INSERT OR REPLACE INTO financials \
                     (symbol, base_date, quarter, sales, operating_profit, net_profit, per, pbr, roe, debt_ratio, source, updated_at) \
                     VALUES (?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }

            if let Some(first) = rows.first() {
                insert_ingest_entry(
                    &connection,
                    &IngestEntry {
                        request_id,
                        symbol: Some(first.symbol.as_str()),
                        source,
                        dataset: "financials",
                        status: "ok",
                        row_count: Some(rows.len() as i64),
                        latency_ms: Some(latency_ms),
                    },
                )?;
            }
            Ok(rows.len())
        })();

        finalize_transaction(&connection, result)
    }

    /// Stored financial rows for a symbol, oldest first.
    pub fn financials(&self, symbol: &str) -> Result<Vec<FinancialRecord>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let mut statement = connection.prepare(
            "SELECT symbol, CAST(base_date AS VARCHAR), quarter, sales, operating_profit, net_profit, per, pbr, roe, debt_ratio \
             FROM financials WHERE symbol = ? ORDER BY base_date, quarter",
        )?;
        let params: [&dyn ToSql; 1] = [&symbol];
        let rows = statement.query_map(params.as_slice(), |row| {
            Ok(FinancialRecord {
                symbol: row.get(0)?,
                base_date: row.get(1)?,
                quarter: row.get(2)?,
                sales: row.get(3)?,
                operating_profit: row.get(4)?,
                net_profit: row.get(5)?,
                per: row.get(6)?,
                pbr: row.get(7)?,
                roe: row.get(8)?,
                debt_ratio: row.get(9)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Append a standalone audit row, e.g. for a failed task.
    pub fn record_ingest(&self, entry: &IngestEntry<'_>) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        insert_ingest_entry(&connection, entry)?;
        Ok(())
    }

    /// Audit statuses recorded for `symbol`, oldest first.
    pub fn ingest_statuses(&self, symbol: &str) -> Result<Vec<String>, WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadOnly)?;
        let mut statement = connection.prepare(
            "SELECT status FROM ingest_log WHERE symbol = ? ORDER BY timestamp, request_id",
        )?;
        let params: [&dyn ToSql; 1] = [&symbol];
        let rows = statement.query_map(params.as_slice(), |row| row.get::<_, String>(0))?;
        let mut statuses = Vec::new();
        for status in rows {
            statuses.push(status?);
        }
        Ok(statuses)
    }
}

fn stored_watermark(
    connection: &Connection,
    symbol: &str,
    dataset: BarDataset,
) -> Result<Option<String>, ::duckdb::Error> {
    let interval = dataset.interval_min();
    let dataset_name = dataset.name();
    let params: [&dyn ToSql; 3] = [&symbol, &dataset_name, &interval];
    connection
        .query_row(
            "SELECT CAST(watermark AS VARCHAR) FROM sync_watermarks \
             WHERE symbol = ? AND dataset = ? AND interval_min = ?",
            params.as_slice(),
            |row| row.get(0),
        )
        .optional()
}

fn insert_ingest_entry(
    connection: &Connection,
    entry: &IngestEntry<'_>,
) -> Result<(), ::duckdb::Error> {
    let latency_ms = entry.latency_ms.map(|value| value.min(i64::MAX as u64) as i64);
    let params: [&dyn ToSql; 7] = [
        &entry.request_id,
        &entry.symbol,
        &entry.source,
        &entry.dataset,
        &entry.status,
        &entry.row_count,
        &latency_ms,
    ];
    connection.execute(
        "INSERT INTO ingest_log \
         (request_id, symbol, source, dataset, status, row_count, latency_ms, timestamp) \
         VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
        params.as_slice(),
    )?;
    Ok(())
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Resolve the marketsync home directory from environment or default.
pub fn resolve_marketsync_home() -> PathBuf {
    if let Some(path) = env::var_os("MARKETSYNC_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".marketsync");
    }

    PathBuf::from(".marketsync")
}
