//! # Sync Window Planner
//!
//! Computes the smallest range that brings one series up to date.

use serde::Serialize;
use time::Duration;

use crate::{BarTime, Granularity};

/// Range to fetch for one (instrument, granularity) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "window", rename_all = "snake_case")]
pub enum SyncWindow {
    /// Nothing newer than the watermark can exist yet.
    AlreadyCurrent,
    /// Inclusive bounds.
    Range { start: BarTime, end: BarTime },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindowPlanner {
    daily_lookback: Duration,
    intraday_lookback: Duration,
}

impl Default for SyncWindowPlanner {
    fn default() -> Self {
        Self::new(1_825, 7)
    }
}

impl SyncWindowPlanner {
    /// Look-back defaults used when a series has never been stored.
    pub fn new(daily_lookback_days: u32, intraday_lookback_days: u32) -> Self {
        Self {
            daily_lookback: Duration::days(i64::from(daily_lookback_days)),
            intraday_lookback: Duration::days(i64::from(intraday_lookback_days)),
        }
    }

    /// Plan the fetch window.
    ///
    /// A stored watermark always wins over an earlier explicit start: the
    /// window never begins before `watermark + granularity.step()`.
    pub fn plan(
        &self,
        granularity: Granularity,
        watermark: Option<BarTime>,
        explicit_start: Option<BarTime>,
        explicit_end: Option<BarTime>,
        now: BarTime,
    ) -> SyncWindow {
        let end = resolve_end(granularity, explicit_end, now);

        let start = match watermark {
            Some(watermark) => {
                let Some(next) = watermark.checked_add(granularity.step()) else {
                    return SyncWindow::AlreadyCurrent;
                };
                match explicit_start {
                    Some(explicit) => next.max(align(granularity, explicit)),
                    None => next,
                }
            }
            None => match explicit_start {
                Some(explicit) => align(granularity, explicit),
                None => self.default_start(granularity, now),
            },
        };

        if start > end {
            SyncWindow::AlreadyCurrent
        } else {
            SyncWindow::Range { start, end }
        }
    }

    fn default_start(&self, granularity: Granularity, now: BarTime) -> BarTime {
        let lookback = if granularity.is_intraday() {
            self.intraday_lookback
        } else {
            self.daily_lookback
        };
        now.start_of_day()
            .checked_sub(lookback)
            .unwrap_or_else(|| now.start_of_day())
    }
}

/// Daily and longer series work in whole days.
fn align(granularity: Granularity, value: BarTime) -> BarTime {
    if granularity.is_intraday() {
        value
    } else {
        value.start_of_day()
    }
}

/// `end` defaults to now; a date-only end on an intraday series covers the whole day.
fn resolve_end(granularity: Granularity, explicit_end: Option<BarTime>, now: BarTime) -> BarTime {
    match (granularity.is_intraday(), explicit_end) {
        (true, Some(end)) if end.is_midnight() => end.end_of_day(),
        (true, Some(end)) => end,
        (true, None) => now,
        (false, Some(end)) => end.start_of_day(),
        (false, None) => now.start_of_day(),
    }
}
