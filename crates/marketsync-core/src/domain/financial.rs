use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::Serialize;
use time::Date;

use crate::{InstrumentCode, ValidationError};

/// Reporting cadence of a financial statement query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinancialPeriod {
    Annual,
    Quarter,
}

impl FinancialPeriod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Quarter => "quarter",
        }
    }

    /// Period code understood by the provider.
    pub const fn code(self) -> char {
        match self {
            Self::Annual => 'Y',
            Self::Quarter => 'Q',
        }
    }
}

impl Display for FinancialPeriod {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FinancialPeriod {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "annual" | "year" | "y" => Ok(Self::Annual),
            "quarter" | "quarterly" | "q" => Ok(Self::Quarter),
            other => Err(ValidationError::InvalidFinancialPeriod {
                value: other.to_owned(),
            }),
        }
    }
}

/// Normalized statement row keyed by `(code, base_date, quarter)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialStatement {
    pub code: InstrumentCode,
    pub base_date: Date,
    pub quarter: u8,
    pub sales: Option<f64>,
    pub operating_profit: Option<f64>,
    pub net_profit: Option<f64>,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub roe: Option<f64>,
    pub debt_ratio: Option<f64>,
}
