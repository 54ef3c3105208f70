//! # Domain Models
//!
//! Canonical value types shared by the synchronization engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`InstrumentCode`] | Validated exchange code |
//! | [`Instrument`] | Directory metadata used by the universe classifier |
//! | [`Granularity`] | Daily, weekly, monthly or N-minute sampling |
//! | [`BarTime`] | Market-local bar timestamp |
//! | [`Bar`] | One OHLCV sample |
//! | [`QuotaClass`] / [`QuotaStatus`] | Provider request pools and counters |
//! | [`FinancialStatement`] | Annual or quarterly statement row |

mod bar;
mod financial;
mod granularity;
mod instrument;
mod quota;

pub use bar::{Bar, BarTime};
pub(crate) use bar::date_from_yyyymmdd;
pub use financial::{FinancialPeriod, FinancialStatement};
pub use granularity::Granularity;
pub use instrument::{
    ControlKind, Instrument, InstrumentCode, MarketSegment, SectionKind, SupervisionKind,
    TradingStatus,
};
pub use quota::{QuotaClass, QuotaStatus};
