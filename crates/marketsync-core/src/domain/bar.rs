use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::macros::{format_description, offset, time};
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time};

use crate::ValidationError;

/// Naive market-local timestamp of a bar. Daily and longer bars sit at midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BarTime(PrimitiveDateTime);

impl BarTime {
    pub const fn new(value: PrimitiveDateTime) -> Self {
        Self(value)
    }

    pub const fn from_date(date: Date) -> Self {
        Self(PrimitiveDateTime::new(date, Time::MIDNIGHT))
    }

    /// Current wall-clock time on the exchange (UTC+9), truncated to the minute.
    pub fn now_market() -> Self {
        let now = OffsetDateTime::now_utc().to_offset(offset!(+9));
        let minute = Time::from_hms(now.hour(), now.minute(), 0).unwrap_or(Time::MIDNIGHT);
        Self(PrimitiveDateTime::new(now.date(), minute))
    }

    /// Build a timestamp from provider wire values: `YYYYMMDD` and optional `HHMM`.
    pub fn from_wire(date: u32, hhmm: Option<u32>) -> Result<Self, ValidationError> {
        let date = date_from_yyyymmdd(date)?;
        let time = match hhmm {
            None => Time::MIDNIGHT,
            Some(hhmm) => {
                let hour = u8::try_from(hhmm / 100).ok();
                let minute = u8::try_from(hhmm % 100).ok();
                hour.zip(minute)
                    .and_then(|(hour, minute)| Time::from_hms(hour, minute, 0).ok())
                    .ok_or_else(|| ValidationError::InvalidTimestamp {
                        value: format!("{date} {hhmm:04}"),
                    })?
            }
        };
        Ok(Self(PrimitiveDateTime::new(date, time)))
    }

    /// Parse `YYYY-MM-DD`, `YYYYMMDD`, `YYYY-MM-DD HH:MM` or `YYYY-MM-DD HH:MM:SS`.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let value = input.trim().replace('T', " ");
        let invalid = || ValidationError::InvalidTimestamp {
            value: input.trim().to_owned(),
        };

        if let Ok(parsed) = PrimitiveDateTime::parse(
            &value,
            format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        ) {
            return Ok(Self(parsed));
        }
        if let Ok(parsed) = PrimitiveDateTime::parse(
            &value,
            format_description!("[year]-[month]-[day] [hour]:[minute]"),
        ) {
            return Ok(Self(parsed));
        }
        if let Ok(date) = Date::parse(&value, format_description!("[year]-[month]-[day]")) {
            return Ok(Self::from_date(date));
        }
        if value.len() == 8 && value.bytes().all(|byte| byte.is_ascii_digit()) {
            let digits = value.parse::<u32>().map_err(|_| invalid())?;
            return Self::from_wire(digits, None).map_err(|_| invalid());
        }
        Err(invalid())
    }

    pub const fn date(self) -> Date {
        self.0.date()
    }

    pub const fn time(self) -> Time {
        self.0.time()
    }

    pub const fn value(self) -> PrimitiveDateTime {
        self.0
    }

    pub fn is_midnight(self) -> bool {
        self.0.time() == Time::MIDNIGHT
    }

    /// Midnight of the same day.
    pub const fn start_of_day(self) -> Self {
        Self::from_date(self.0.date())
    }

    /// Last whole minute of the same day.
    pub const fn end_of_day(self) -> Self {
        Self(PrimitiveDateTime::new(self.0.date(), time!(23:59)))
    }

    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        self.0.checked_add(duration).map(Self)
    }

    pub fn checked_sub(self, duration: Duration) -> Option<Self> {
        self.0.checked_sub(duration).map(Self)
    }

    /// Date in provider wire form, `YYYYMMDD`.
    pub fn wire_date(self) -> u32 {
        let date = self.0.date();
        date.year().max(0) as u32 * 10_000 + u32::from(u8::from(date.month())) * 100 + u32::from(date.day())
    }

    /// `HHMM` in provider wire form.
    pub fn wire_time(self) -> u32 {
        u32::from(self.0.hour()) * 100 + u32::from(self.0.minute())
    }

    /// Storage form, `YYYY-MM-DD HH:MM:SS`.
    pub fn to_storage_string(self) -> String {
        let date = self.0.date();
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            date.year(),
            u8::from(date.month()),
            date.day(),
            self.0.hour(),
            self.0.minute(),
            self.0.second()
        )
    }
}

impl Display for BarTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_storage_string())
    }
}

impl TryFrom<String> for BarTime {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BarTime> for String {
    fn from(value: BarTime) -> Self {
        value.to_storage_string()
    }
}

pub(crate) fn date_from_yyyymmdd(value: u32) -> Result<Date, ValidationError> {
    let invalid = || ValidationError::InvalidDate {
        value: value.to_string(),
    };
    let year = i32::try_from(value / 10_000).map_err(|_| invalid())?;
    let month = u8::try_from(value / 100 % 100)
        .ok()
        .and_then(|month| Month::try_from(month).ok())
        .ok_or_else(invalid)?;
    let day = u8::try_from(value % 100).map_err(|_| invalid())?;
    Date::from_calendar_date(year, month, day).map_err(|_| invalid())
}

/// One OHLCV sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: BarTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trading_value: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_rate: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn builds_from_wire_values() {
        let daily = BarTime::from_wire(20240102, None).expect("date");
        assert_eq!(daily, BarTime::from_date(date!(2024 - 01 - 02)));

        let minute = BarTime::from_wire(20240102, Some(930)).expect("minute");
        assert_eq!(minute.value(), datetime!(2024-01-02 09:30));
        assert_eq!(minute.wire_time(), 930);
        assert_eq!(minute.wire_date(), 20240102);
    }

    #[test]
    fn rejects_impossible_wire_values() {
        assert!(BarTime::from_wire(20240231, None).is_err());
        assert!(BarTime::from_wire(20240102, Some(2561)).is_err());
    }

    #[test]
    fn parses_cli_and_storage_forms() {
        let date_only = BarTime::parse("2024-01-10").expect("date");
        assert!(date_only.is_midnight());

        let storage = BarTime::parse("2024-01-10 09:05:00").expect("storage");
        assert_eq!(storage.to_storage_string(), "2024-01-10 09:05:00");

        let compact = BarTime::parse("20240110").expect("compact");
        assert_eq!(compact, date_only);

        assert!(BarTime::parse("yesterday").is_err());
    }
}
