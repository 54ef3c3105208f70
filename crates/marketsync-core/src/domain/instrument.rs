use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_CODE_LEN: usize = 12;

/// Normalized exchange instrument code, e.g. `A005930`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentCode(String);

impl InstrumentCode {
    /// Parse and normalize a code to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyCode);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_CODE_LEN {
            return Err(ValidationError::CodeTooLong {
                len,
                max: MAX_CODE_LEN,
            });
        }

        for (index, ch) in normalized.chars().enumerate() {
            if !ch.is_ascii_alphanumeric() {
                return Err(ValidationError::CodeInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing digit of the code, if the code ends in one.
    pub fn last_digit(&self) -> Option<u32> {
        self.0.chars().last().and_then(|ch| ch.to_digit(10))
    }
}

impl Display for InstrumentCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for InstrumentCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for InstrumentCode {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<InstrumentCode> for String {
    fn from(value: InstrumentCode) -> Self {
        value.0
    }
}

/// Exchange board an instrument is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketSegment {
    /// Primary board.
    Kospi,
    /// Secondary board.
    Kosdaq,
}

impl MarketSegment {
    /// Rebuild order: primary board first.
    pub const ALL: [Self; 2] = [Self::Kospi, Self::Kosdaq];

    pub const fn code(self) -> u8 {
        match self {
            Self::Kospi => 1,
            Self::Kosdaq => 2,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Kospi),
            2 => Some(Self::Kosdaq),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kospi => "KOSPI",
            Self::Kosdaq => "KOSDAQ",
        }
    }
}

impl Display for MarketSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketSegment {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "kospi" | "1" => Ok(Self::Kospi),
            "kosdaq" | "2" => Ok(Self::Kosdaq),
            other => Err(ValidationError::InvalidMarket {
                value: other.to_owned(),
            }),
        }
    }
}

/// Listing section reported by the instrument directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Common,
    Preferred,
    MutualFund,
    Etf,
    Etn,
    Elw,
    Warrant,
    Spac,
    Reits,
    Other(u8),
}

impl SectionKind {
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Common,
            1 => Self::Preferred,
            2 => Self::MutualFund,
            3 => Self::Etf,
            4 => Self::Etn,
            5 => Self::Elw,
            6 => Self::Warrant,
            7 => Self::Spac,
            8 => Self::Reits,
            other => Self::Other(other),
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Common => 0,
            Self::Preferred => 1,
            Self::MutualFund => 2,
            Self::Etf => 3,
            Self::Etn => 4,
            Self::Elw => 5,
            Self::Warrant => 6,
            Self::Spac => 7,
            Self::Reits => 8,
            Self::Other(code) => code,
        }
    }
}

/// Administrative control flag (e.g. caution or warning designation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Normal,
    Flagged(u8),
}

impl ControlKind {
    pub const fn from_code(code: u8) -> Self {
        if code == 0 {
            Self::Normal
        } else {
            Self::Flagged(code)
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Flagged(code) => code,
        }
    }
}

/// Supervision (managed issue) flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisionKind {
    Normal,
    Flagged(u8),
}

impl SupervisionKind {
    pub const fn from_code(code: u8) -> Self {
        if code == 0 {
            Self::Normal
        } else {
            Self::Flagged(code)
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Flagged(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStatus {
    Normal,
    Halted,
    Suspended,
    Other(u8),
}

impl TradingStatus {
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Normal,
            2 => Self::Halted,
            3 => Self::Suspended,
            other => Self::Other(other),
        }
    }

    pub const fn code(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Halted => 2,
            Self::Suspended => 3,
            Self::Other(code) => code,
        }
    }

    pub const fn is_tradable(self) -> bool {
        !matches!(self, Self::Halted | Self::Suspended)
    }
}

/// Instrument metadata as reported by the directory query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instrument {
    pub code: InstrumentCode,
    pub name: String,
    pub market: MarketSegment,
    pub section: SectionKind,
    pub control: ControlKind,
    pub supervision: SupervisionKind,
    pub status: TradingStatus,
}

impl Instrument {
    /// An ordinary common share with all status flags normal.
    pub fn common(code: InstrumentCode, name: impl Into<String>, market: MarketSegment) -> Self {
        Self {
            code,
            name: name.into(),
            market,
            section: SectionKind::Common,
            control: ControlKind::Normal,
            supervision: SupervisionKind::Normal,
            status: TradingStatus::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_code() {
        let code = InstrumentCode::parse(" a005930 ").expect("code should parse");
        assert_eq!(code.as_str(), "A005930");
        assert_eq!(code.last_digit(), Some(0));
    }

    #[test]
    fn rejects_punctuation() {
        let err = InstrumentCode::parse("A0059-30").expect_err("must fail");
        assert!(matches!(err, ValidationError::CodeInvalidChar { ch: '-', .. }));
    }

    #[test]
    fn rejects_overlong_code() {
        let err = InstrumentCode::parse("A0123456789012").expect_err("must fail");
        assert!(matches!(err, ValidationError::CodeTooLong { .. }));
    }

    #[test]
    fn section_codes_round_trip_through_other() {
        assert_eq!(SectionKind::from_code(8), SectionKind::Reits);
        assert_eq!(SectionKind::from_code(14), SectionKind::Other(14));
        assert_eq!(SectionKind::Other(14).code(), 14);
    }

    #[test]
    fn halted_and_suspended_are_not_tradable() {
        assert!(!TradingStatus::from_code(2).is_tradable());
        assert!(!TradingStatus::from_code(3).is_tradable());
        assert!(TradingStatus::from_code(1).is_tradable());
    }
}
