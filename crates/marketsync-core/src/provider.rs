//! # Provider Contract
//!
//! Request/response value types for the remote market-data provider and the
//! async traits adapters implement.
//!
//! The provider's stateful "set inputs, block, read outputs by index" call is
//! modeled as one [`SeriesQuery`] in and one [`FetchPage`] out per round-trip.
//! Paging state travels in an opaque [`PageCursor`].

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{
    BarTime, FinancialPeriod, Granularity, Instrument, InstrumentCode, MarketSegment, QuotaClass,
    QuotaStatus,
};

/// Round-trip completed normally.
pub const STATUS_OK: i32 = 0;
/// Provider has no rows for the requested range.
pub const STATUS_NO_DATA: i32 = 5;

/// Boxed future returned by provider calls.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Provider-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// No live session with the provider.
    NotConnected,
    /// The call could not be delivered or answered.
    Transport,
    /// The provider answered with something that could not be decoded.
    Protocol,
}

/// Structured provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
}

impl ProviderError {
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::NotConnected,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transport,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Protocol,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn is_connectivity(&self) -> bool {
        matches!(self.kind, ProviderErrorKind::NotConnected)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ProviderErrorKind::NotConnected => "provider.not_connected",
            ProviderErrorKind::Transport => "provider.transport",
            ProviderErrorKind::Protocol => "provider.protocol",
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ProviderError {}

/// One logical series request. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub code: InstrumentCode,
    pub granularity: Granularity,
    pub start: BarTime,
    pub end: BarTime,
    pub adjusted: bool,
}

/// Wire form of a chart query sent on every round-trip of one page loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesQuery {
    pub code: InstrumentCode,
    /// `D`, `W`, `M` or `m`.
    pub period: char,
    /// Bar length in minutes; only meaningful for `m`.
    pub interval: u16,
    /// `YYYYMMDD`, inclusive.
    pub from_date: u32,
    /// `YYYYMMDD`, inclusive.
    pub to_date: u32,
    /// Requested provider field ids; every returned row follows this order.
    pub fields: Vec<u8>,
    pub adjusted: bool,
    pub page_size: u32,
}

impl SeriesQuery {
    pub fn from_request(request: &SeriesRequest, fields: &[u8], page_size: u32) -> Self {
        Self {
            code: request.code.clone(),
            period: request.granularity.period_code(),
            interval: request.granularity.interval(),
            from_date: request.start.wire_date(),
            to_date: request.end.wire_date(),
            fields: fields.to_vec(),
            adjusted: request.adjusted,
            page_size,
        }
    }
}

/// Opaque continuation token handed back by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Provider values of one row, ordered as [`SeriesQuery::fields`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRow(pub Vec<f64>);

/// One round-trip's worth of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPage {
    pub status: i32,
    pub message: String,
    pub rows: Vec<RawRow>,
    /// Present when more pages remain.
    pub continuation: Option<PageCursor>,
}

impl FetchPage {
    pub fn ok(rows: Vec<RawRow>, continuation: Option<PageCursor>) -> Self {
        Self {
            status: STATUS_OK,
            message: String::new(),
            rows,
            continuation,
        }
    }

    pub fn status(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            rows: Vec::new(),
            continuation: None,
        }
    }
}

/// Financial statement query for one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinancialQuery {
    pub code: InstrumentCode,
    pub period: FinancialPeriod,
    pub count: u32,
}

/// Statement row as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFinancialRow {
    /// Settlement year-month, `YYYYMM`.
    pub settlement: u32,
    pub quarter: u8,
    pub sales: Option<f64>,
    pub operating_profit: Option<f64>,
    pub net_profit: Option<f64>,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub roe: Option<f64>,
    pub debt_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialPage {
    pub status: i32,
    pub message: String,
    pub rows: Vec<RawFinancialRow>,
}

/// Remote market-data provider.
///
/// Implementations must be `Send + Sync`; the engine shares one instance
/// across worker tasks and serializes page loops itself.
pub trait MarketDataProvider: Send + Sync {
    /// Short label stored with every persisted row.
    fn id(&self) -> &'static str;

    /// Connect probe.
    fn is_connected<'a>(&'a self) -> ProviderFuture<'a, bool>;

    /// One chart round-trip. `cursor` is `None` for the first page.
    fn series_page<'a>(
        &'a self,
        query: &'a SeriesQuery,
        cursor: Option<&'a PageCursor>,
    ) -> ProviderFuture<'a, FetchPage>;

    /// Every instrument listed on `market`.
    fn instrument_directory<'a>(
        &'a self,
        market: MarketSegment,
    ) -> ProviderFuture<'a, Vec<Instrument>>;

    fn financials<'a>(&'a self, query: &'a FinancialQuery) -> ProviderFuture<'a, FinancialPage>;
}

/// Source of quota counters consulted by the admission governor.
pub trait QuotaSource: Send + Sync {
    fn quota_status<'a>(&'a self, class: QuotaClass) -> ProviderFuture<'a, QuotaStatus>;
}
