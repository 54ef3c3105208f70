use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::ValidationError;

const MAX_MINUTE_INTERVAL: u16 = 720;

/// Sampling unit of a bar series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
    /// Intraday bars of `n` minutes.
    Minute(u16),
}

impl Granularity {
    pub fn minute(interval: u16) -> Result<Self, ValidationError> {
        if interval == 0 || interval > MAX_MINUTE_INTERVAL {
            return Err(ValidationError::InvalidMinuteInterval {
                value: interval.to_string(),
                max: MAX_MINUTE_INTERVAL,
            });
        }
        Ok(Self::Minute(interval))
    }

    pub const fn is_intraday(self) -> bool {
        matches!(self, Self::Minute(_))
    }

    /// Period code understood by the provider chart query.
    pub const fn period_code(self) -> char {
        match self {
            Self::Daily => 'D',
            Self::Weekly => 'W',
            Self::Monthly => 'M',
            Self::Minute(_) => 'm',
        }
    }

    /// Bar length in minutes for intraday series, `1` otherwise.
    pub const fn interval(self) -> u16 {
        match self {
            Self::Minute(interval) => interval,
            _ => 1,
        }
    }

    /// Smallest step between two stored samples.
    pub fn step(self) -> Duration {
        match self {
            Self::Minute(interval) => Duration::minutes(i64::from(interval.max(1))),
            _ => Duration::days(1),
        }
    }
}

impl Display for Granularity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => f.write_str("1d"),
            Self::Weekly => f.write_str("1w"),
            Self::Monthly => f.write_str("1mo"),
            Self::Minute(interval) => write!(f, "{interval}m"),
        }
    }
}

impl FromStr for Granularity {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "1d" | "d" | "daily" => return Ok(Self::Daily),
            "1w" | "w" | "weekly" => return Ok(Self::Weekly),
            "1mo" | "mo" | "monthly" => return Ok(Self::Monthly),
            _ => {}
        }

        let Some(digits) = normalized.strip_suffix('m') else {
            return Err(ValidationError::InvalidGranularity { value: normalized });
        };
        let interval = digits
            .parse::<u16>()
            .map_err(|_| ValidationError::InvalidGranularity {
                value: normalized.clone(),
            })?;
        Self::minute(interval)
    }
}

impl TryFrom<String> for Granularity {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Granularity> for String {
    fn from(value: Granularity) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_period_and_minute_forms() {
        assert_eq!(Granularity::from_str("1d").expect("daily"), Granularity::Daily);
        assert_eq!(Granularity::from_str("1MO").expect("monthly"), Granularity::Monthly);
        assert_eq!(Granularity::from_str("5m").expect("5m"), Granularity::Minute(5));
        assert_eq!(Granularity::Minute(15).to_string(), "15m");
    }

    #[test]
    fn rejects_zero_minute_interval() {
        let err = Granularity::from_str("0m").expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidMinuteInterval { .. }));
    }

    #[test]
    fn rejects_unknown_unit() {
        let err = Granularity::from_str("2h").expect_err("must fail");
        assert!(matches!(err, ValidationError::InvalidGranularity { .. }));
    }

    #[test]
    fn step_matches_unit() {
        assert_eq!(Granularity::Weekly.step(), Duration::days(1));
        assert_eq!(Granularity::Minute(3).step(), Duration::minutes(3));
    }
}
