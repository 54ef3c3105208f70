//! # Record Normalizer
//!
//! Maps raw provider rows onto [`Bar`], orders series, trims them to a
//! planned window and derives change rates.

use time::{Date, Month};
use tracing::warn;

use crate::domain::date_from_yyyymmdd;
use crate::provider::{RawFinancialRow, RawRow};
use crate::{
    Bar, BarTime, FinancialPeriod, FinancialStatement, Granularity, InstrumentCode,
    ValidationError,
};

/// Provider field ids.
pub mod field {
    pub const DATE: u8 = 0;
    pub const TIME: u8 = 1;
    pub const OPEN: u8 = 2;
    pub const HIGH: u8 = 3;
    pub const LOW: u8 = 4;
    pub const CLOSE: u8 = 5;
    pub const VOLUME: u8 = 8;
    pub const TRADING_VALUE: u8 = 9;
}

const PERIOD_FIELDS: [u8; 7] = [
    field::DATE,
    field::OPEN,
    field::HIGH,
    field::LOW,
    field::CLOSE,
    field::VOLUME,
    field::TRADING_VALUE,
];

const INTRADAY_FIELDS: [u8; 7] = [
    field::DATE,
    field::TIME,
    field::OPEN,
    field::HIGH,
    field::LOW,
    field::CLOSE,
    field::VOLUME,
];

/// Field ids requested for `granularity`, in row order.
pub const fn field_ids(granularity: Granularity) -> &'static [u8] {
    if granularity.is_intraday() {
        &INTRADAY_FIELDS
    } else {
        &PERIOD_FIELDS
    }
}

/// Parse one row whose values follow `fields`.
pub fn parse_row(fields: &[u8], row: &RawRow) -> Result<Bar, ValidationError> {
    if row.0.len() != fields.len() {
        return Err(ValidationError::RowArity {
            expected: fields.len(),
            actual: row.0.len(),
        });
    }

    let value = |id: u8| {
        fields
            .iter()
            .position(|field| *field == id)
            .map(|index| row.0[index])
    };

    let date = whole(value(field::DATE), "date")?.ok_or(ValidationError::RowArity {
        expected: fields.len(),
        actual: row.0.len(),
    })?;
    let hhmm = whole(value(field::TIME), "time")?;
    let ts = BarTime::from_wire(narrow(date, "date")?, hhmm.map(|t| narrow(t, "time")).transpose()?)?;

    Ok(Bar {
        ts,
        open: price(value(field::OPEN), "open")?,
        high: price(value(field::HIGH), "high")?,
        low: price(value(field::LOW), "low")?,
        close: price(value(field::CLOSE), "close")?,
        volume: whole(value(field::VOLUME), "volume")?.unwrap_or(0),
        trading_value: whole(value(field::TRADING_VALUE), "trading_value")?,
        change_rate: None,
    })
}

fn price(value: Option<f64>, field: &'static str) -> Result<f64, ValidationError> {
    let value = value.unwrap_or(0.0);
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(value)
}

fn whole(value: Option<f64>, field: &'static str) -> Result<Option<u64>, ValidationError> {
    value
        .map(|value| {
            if !value.is_finite() {
                return Err(ValidationError::NonFiniteValue { field });
            }
            if value < 0.0 {
                return Err(ValidationError::NegativeValue { field });
            }
            Ok(value.trunc() as u64)
        })
        .transpose()
}

fn narrow(value: u64, field: &'static str) -> Result<u32, ValidationError> {
    u32::try_from(value).map_err(|_| ValidationError::InvalidTimestamp {
        value: format!("{field}={value}"),
    })
}

/// Parse every row of one page. Malformed rows are dropped with a warning.
pub fn parse_page(code: &InstrumentCode, fields: &[u8], rows: &[RawRow]) -> Vec<Bar> {
    rows.iter()
        .filter_map(|row| match parse_row(fields, row) {
            Ok(bar) => Some(bar),
            Err(error) => {
                warn!(code = %code, error = %error, row = ?row.0, "dropping malformed row");
                None
            }
        })
        .collect()
}

/// Sort ascending by timestamp and drop repeated timestamps, keeping the
/// first occurrence in arrival order.
pub fn order_series(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|bar| bar.ts);
    bars.dedup_by_key(|bar| bar.ts);
    bars
}

/// Keep only bars with `start <= ts <= end`.
pub fn trim_to_window(bars: Vec<Bar>, start: BarTime, end: BarTime) -> Vec<Bar> {
    bars.into_iter()
        .filter(|bar| bar.ts >= start && bar.ts <= end)
        .collect()
}

/// Percentage change rounded to two decimals; `0.0` when the base is zero.
pub fn change_rate(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    round2((current - previous) / previous * 100.0)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Fill `change_rate` on an ascending series. The first bar uses
/// `prior_close` when one is known, otherwise it gets `0.0`.
pub fn apply_change_rates(bars: &mut [Bar], prior_close: Option<f64>) {
    let mut previous = prior_close;
    for bar in bars.iter_mut() {
        bar.change_rate = Some(match previous {
            Some(previous) => change_rate(previous, bar.close),
            None => 0.0,
        });
        previous = Some(bar.close);
    }
}

/// Canonicalize a fetched series for persistence.
pub fn normalize(
    bars: Vec<Bar>,
    granularity: Granularity,
    start: BarTime,
    end: BarTime,
    prior_close: Option<f64>,
) -> Vec<Bar> {
    let mut bars = trim_to_window(order_series(bars), start, end);
    if !granularity.is_intraday() {
        apply_change_rates(&mut bars, prior_close);
    }
    bars
}

/// Map provider statement rows to dated statements, oldest first.
///
/// Annual rows land on Dec 31 with quarter 4. Quarterly rows land on the
/// quarter-end date of their settlement month; other months are dropped.
pub fn financial_statements(
    code: &InstrumentCode,
    period: FinancialPeriod,
    rows: &[RawFinancialRow],
) -> Vec<FinancialStatement> {
    let mut statements: Vec<FinancialStatement> = rows
        .iter()
        .filter_map(|row| {
            let dated = match period {
                FinancialPeriod::Annual => annual_base_date(row.settlement).map(|date| (date, 4)),
                FinancialPeriod::Quarter => {
                    quarter_end_date(row.settlement).map(|date| (date, row.quarter))
                }
            };
            match dated {
                Ok((base_date, quarter)) => Some(FinancialStatement {
                    code: code.clone(),
                    base_date,
                    quarter,
                    sales: row.sales,
                    operating_profit: row.operating_profit,
                    net_profit: row.net_profit,
                    per: row.per,
                    pbr: row.pbr,
                    roe: row.roe,
                    debt_ratio: row.debt_ratio,
                }),
                Err(error) => {
                    warn!(
                        code = %code,
                        period = %period,
                        settlement = row.settlement,
                        error = %error,
                        "dropping financial row with unusable settlement month"
                    );
                    None
                }
            }
        })
        .collect();

    statements.sort_by(|left, right| {
        (left.base_date, left.quarter).cmp(&(right.base_date, right.quarter))
    });
    statements
}

fn annual_base_date(settlement: u32) -> Result<Date, ValidationError> {
    let year = i32::try_from(settlement / 100).map_err(|_| invalid_settlement(settlement))?;
    Date::from_calendar_date(year, Month::December, 31).map_err(|_| invalid_settlement(settlement))
}

fn quarter_end_date(settlement: u32) -> Result<Date, ValidationError> {
    let day = match settlement % 100 {
        3 | 12 => 31,
        6 | 9 => 30,
        _ => return Err(invalid_settlement(settlement)),
    };
    date_from_yyyymmdd(settlement * 100 + day)
}

fn invalid_settlement(settlement: u32) -> ValidationError {
    ValidationError::InvalidDate {
        value: settlement.to_string(),
    }
}
