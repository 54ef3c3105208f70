use thiserror::Error;

use crate::provider::ProviderError;
use crate::store::StoreError;

/// Validation and contract errors exposed by `marketsync-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("instrument code cannot be empty")]
    EmptyCode,
    #[error("instrument code length {len} exceeds max {max}")]
    CodeTooLong { len: usize, max: usize },
    #[error("instrument code contains invalid character '{ch}' at index {index}")]
    CodeInvalidChar { ch: char, index: usize },

    #[error("invalid granularity '{value}', expected one of 1d, 1w, 1mo, <n>m")]
    InvalidGranularity { value: String },
    #[error("minute interval must be between 1 and {max}: '{value}'")]
    InvalidMinuteInterval { value: String, max: u16 },

    #[error("invalid market segment '{value}', expected kospi or kosdaq")]
    InvalidMarket { value: String },
    #[error("invalid quota class '{value}', expected order, quote or realtime")]
    InvalidQuotaClass { value: String },
    #[error("invalid financial period '{value}', expected annual or quarter")]
    InvalidFinancialPeriod { value: String },

    #[error("invalid date '{value}'")]
    InvalidDate { value: String },
    #[error("invalid timestamp '{value}', expected YYYY-MM-DD or YYYY-MM-DD HH:MM[:SS]")]
    InvalidTimestamp { value: String },
    #[error("range start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("row has {actual} values, expected {expected}")]
    RowArity { expected: usize, actual: usize },
    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
}

/// Run-level failures that stop a synchronization command before any task starts.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connectivity category: the provider never reported a live session.
    #[error("provider is not connected after {attempts} attempt(s)")]
    NotConnected { attempts: u32 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
