//! Persistence gateway used by the orchestrator.
//!
//! [`BarStore`] is synchronous; the orchestrator runs every call on the
//! blocking pool. [`Warehouse`] is the production implementation.

use marketsync_warehouse::{
    BarDataset, BarRecord, FinancialRecord, IngestEntry, InstrumentRecord, Warehouse,
    WarehouseError,
};
use thiserror::Error;

use crate::{Bar, BarTime, FinancialStatement, Granularity, Instrument, InstrumentCode};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("stored value is invalid: {0}")]
    Corrupt(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Provenance attached to every write.
#[derive(Debug, Clone)]
pub struct WriteContext {
    pub source: &'static str,
    pub request_id: String,
    pub latency_ms: u64,
}

pub trait BarStore: Send + Sync {
    /// Timestamp of the newest persisted bar for the series.
    fn watermark(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
    ) -> Result<Option<BarTime>, StoreError>;

    /// Close of the newest persisted bar strictly before `before`.
    fn prior_close(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        before: BarTime,
    ) -> Result<Option<f64>, StoreError>;

    /// Atomically upsert an ascending batch and advance the watermark.
    fn upsert_bars(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        bars: &[Bar],
        context: &WriteContext,
    ) -> Result<usize, StoreError>;

    /// Persisted bars with `start <= ts <= end`, oldest first.
    fn read_bars(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        start: BarTime,
        end: BarTime,
    ) -> Result<Vec<Bar>, StoreError>;

    fn upsert_instruments(
        &self,
        instruments: &[Instrument],
        context: &WriteContext,
    ) -> Result<usize, StoreError>;

    fn upsert_financials(
        &self,
        statements: &[FinancialStatement],
        context: &WriteContext,
    ) -> Result<usize, StoreError>;

    /// Audit a task that ended without writing.
    fn record_failure(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        reason: &str,
        context: &WriteContext,
    ) -> Result<(), StoreError>;
}

pub fn dataset(granularity: Granularity) -> BarDataset {
    match granularity {
        Granularity::Daily => BarDataset::Daily,
        Granularity::Weekly => BarDataset::Weekly,
        Granularity::Monthly => BarDataset::Monthly,
        Granularity::Minute(interval) => BarDataset::Minute { interval },
    }
}

fn to_record(code: &InstrumentCode, bar: &Bar) -> BarRecord {
    BarRecord {
        symbol: code.as_str().to_owned(),
        ts: bar.ts.to_storage_string(),
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: i64::try_from(bar.volume).unwrap_or(i64::MAX),
        trading_value: bar
            .trading_value
            .map(|value| i64::try_from(value).unwrap_or(i64::MAX)),
        change_rate: bar.change_rate,
    }
}

fn from_record(record: BarRecord) -> Result<Bar, StoreError> {
    let ts = BarTime::parse(&record.ts).map_err(|error| StoreError::Corrupt(error.to_string()))?;
    Ok(Bar {
        ts,
        open: record.open,
        high: record.high,
        low: record.low,
        close: record.close,
        volume: u64::try_from(record.volume).unwrap_or(0),
        trading_value: record
            .trading_value
            .map(|value| u64::try_from(value).unwrap_or(0)),
        change_rate: record.change_rate,
    })
}

fn parse_stored(value: Option<String>) -> Result<Option<BarTime>, StoreError> {
    value
        .map(|value| {
            BarTime::parse(&value).map_err(|error| StoreError::Corrupt(error.to_string()))
        })
        .transpose()
}

impl BarStore for Warehouse {
    fn watermark(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
    ) -> Result<Option<BarTime>, StoreError> {
        parse_stored(Warehouse::watermark(self, code.as_str(), dataset(granularity))?)
    }

    fn prior_close(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        before: BarTime,
    ) -> Result<Option<f64>, StoreError> {
        Ok(Warehouse::prior_close(
            self,
            code.as_str(),
            dataset(granularity),
            &before.to_storage_string(),
        )?)
    }

    fn upsert_bars(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        bars: &[Bar],
        context: &WriteContext,
    ) -> Result<usize, StoreError> {
        let records: Vec<BarRecord> = bars.iter().map(|bar| to_record(code, bar)).collect();
        let summary = Warehouse::upsert_bars(
            self,
            context.source,
            dataset(granularity),
            &context.request_id,
            &records,
            context.latency_ms,
        )?;
        Ok(summary.rows_written)
    }

    fn read_bars(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        start: BarTime,
        end: BarTime,
    ) -> Result<Vec<Bar>, StoreError> {
        Warehouse::read_bars(
            self,
            code.as_str(),
            dataset(granularity),
            &start.to_storage_string(),
            &end.to_storage_string(),
        )?
        .into_iter()
        .map(from_record)
        .collect()
    }

    fn upsert_instruments(
        &self,
        instruments: &[Instrument],
        context: &WriteContext,
    ) -> Result<usize, StoreError> {
        let records: Vec<InstrumentRecord> = instruments
            .iter()
            .map(|instrument| InstrumentRecord {
                symbol: instrument.code.as_str().to_owned(),
                name: instrument.name.clone(),
                market: instrument.market.as_str().to_owned(),
            })
            .collect();
        Ok(Warehouse::upsert_instruments(self, context.source, &records)?)
    }

    fn upsert_financials(
        &self,
        statements: &[FinancialStatement],
        context: &WriteContext,
    ) -> Result<usize, StoreError> {
        let records: Vec<FinancialRecord> = statements
            .iter()
            .map(|statement| FinancialRecord {
                symbol: statement.code.as_str().to_owned(),
                base_date: statement.base_date.to_string(),
                quarter: i32::from(statement.quarter),
                sales: statement.sales,
                operating_profit: statement.operating_profit,
                net_profit: statement.net_profit,
                per: statement.per,
                pbr: statement.pbr,
                roe: statement.roe,
                debt_ratio: statement.debt_ratio,
            })
            .collect();
        Ok(Warehouse::upsert_financials(
            self,
            context.source,
            &context.request_id,
            &records,
            context.latency_ms,
        )?)
    }

    fn record_failure(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        reason: &str,
        context: &WriteContext,
    ) -> Result<(), StoreError> {
        let status = format!("failed: {reason}");
        Warehouse::record_ingest(
            self,
            &IngestEntry {
                request_id: &context.request_id,
                symbol: Some(code.as_str()),
                source: context.source,
                dataset: dataset(granularity).table(),
                status: &status,
                row_count: Some(0),
                latency_ms: Some(context.latency_ms),
            },
        )?;
        Ok(())
    }
}
