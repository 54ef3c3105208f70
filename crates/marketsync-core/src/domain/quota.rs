use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Provider-side request pool with independent per-second and per-minute limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaClass {
    Order,
    Quote,
    Realtime,
}

impl QuotaClass {
    pub const ALL: [Self; 3] = [Self::Order, Self::Quote, Self::Realtime];

    pub const fn code(self) -> u8 {
        match self {
            Self::Order => 0,
            Self::Quote => 1,
            Self::Realtime => 2,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Quote => "quote",
            Self::Realtime => "realtime",
        }
    }

    pub(crate) const fn index(self) -> usize {
        self.code() as usize
    }
}

impl Display for QuotaClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaClass {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "order" | "0" => Ok(Self::Order),
            "quote" | "1" => Ok(Self::Quote),
            "realtime" | "2" => Ok(Self::Realtime),
            other => Err(ValidationError::InvalidQuotaClass {
                value: other.to_owned(),
            }),
        }
    }
}

/// Snapshot of the provider's counters for one quota class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub remaining_per_second: u32,
    pub remaining_per_minute: u32,
    /// Time until the per-second window rolls over.
    pub second_reset: Duration,
    /// Time until the per-minute window rolls over.
    pub minute_reset: Duration,
}

impl QuotaStatus {
    /// A snapshot with both windows open.
    pub const fn available(per_second: u32, per_minute: u32) -> Self {
        Self {
            remaining_per_second: per_second,
            remaining_per_minute: per_minute,
            second_reset: Duration::from_secs(1),
            minute_reset: Duration::from_secs(60),
        }
    }
}
