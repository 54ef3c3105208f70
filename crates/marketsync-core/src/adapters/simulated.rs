//! Deterministic in-memory provider.
//!
//! Serves scripted series newest-first in fixed-size pages, optionally
//! repeating the boundary row of each page at the top of the next one.
//! Backs `--mock` runs and the test suites.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use time::{Duration, Weekday};

use crate::normalizer::{self, field};
use crate::provider::{
    FetchPage, FinancialPage, FinancialQuery, MarketDataProvider, PageCursor, ProviderError,
    ProviderFuture, QuotaSource, RawFinancialRow, RawRow, SeriesQuery, STATUS_NO_DATA,
};
use crate::{
    Bar, BarTime, FinancialPeriod, Granularity, Instrument, InstrumentCode, MarketSegment,
    QuotaClass, QuotaStatus, SectionKind, SupervisionKind,
};

const DEFAULT_PAGE_SIZE: usize = 500;

type SeriesKey = (String, char, u16);

fn series_key(code: &str, period: char, interval: u16) -> SeriesKey {
    (code.trim().to_ascii_uppercase(), period, interval)
}

fn code_key(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[derive(Debug, Default)]
struct SimulatedState {
    connected: bool,
    probes: usize,
    series_calls: usize,
    rows_served: usize,
    quota_calls: usize,
    call_log: Vec<String>,
}

#[derive(Debug)]
pub struct SimulatedProvider {
    page_size: usize,
    overlap: bool,
    connect_after: usize,
    disconnect_after: Option<usize>,
    series: BTreeMap<SeriesKey, Vec<Bar>>,
    statuses: BTreeMap<String, (i32, String)>,
    directory: BTreeMap<MarketSegment, Vec<Instrument>>,
    financials: BTreeMap<String, Vec<RawFinancialRow>>,
    quota_script: Mutex<VecDeque<Result<QuotaStatus, ProviderError>>>,
    page_script: Mutex<VecDeque<FetchPage>>,
    state: Mutex<SimulatedState>,
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            overlap: false,
            connect_after: 0,
            disconnect_after: None,
            series: BTreeMap::new(),
            statuses: BTreeMap::new(),
            directory: BTreeMap::new(),
            financials: BTreeMap::new(),
            quota_script: Mutex::new(VecDeque::new()),
            page_script: Mutex::new(VecDeque::new()),
            state: Mutex::new(SimulatedState {
                connected: true,
                ..SimulatedState::default()
            }),
        }
    }

    /// Largest number of rows served per round-trip.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Repeat the last row of each page as the first row of the next.
    pub fn with_overlap(mut self, overlap: bool) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_series(mut self, code: &str, granularity: Granularity, bars: Vec<Bar>) -> Self {
        let mut bars = bars;
        bars.sort_by_key(|bar| bar.ts);
        self.series.insert(
            series_key(code, granularity.period_code(), granularity.interval()),
            bars,
        );
        self
    }

    /// Answer every chart request for `code` with `status`.
    pub fn with_status(mut self, code: &str, status: i32, message: impl Into<String>) -> Self {
        self.statuses.insert(code_key(code), (status, message.into()));
        self
    }

    pub fn with_instruments(mut self, market: MarketSegment, instruments: Vec<Instrument>) -> Self {
        self.directory.entry(market).or_default().extend(instruments);
        self
    }

    pub fn with_financials(mut self, code: &str, rows: Vec<RawFinancialRow>) -> Self {
        self.financials.entry(code_key(code)).or_default().extend(rows);
        self
    }

    /// Quota snapshots handed out in order before falling back to open windows.
    pub fn with_quota_script(self, script: Vec<Result<QuotaStatus, ProviderError>>) -> Self {
        *lock(&self.quota_script) = script.into();
        self
    }

    /// Chart pages answered verbatim, one per round-trip, before any series
    /// or status lookup.
    pub fn with_page_script(self, pages: Vec<FetchPage>) -> Self {
        *lock(&self.page_script) = pages.into();
        self
    }

    /// Report disconnected for the first `probes` connect probes.
    pub fn with_connect_after(mut self, probes: usize) -> Self {
        self.connect_after = probes;
        self
    }

    /// Drop the session once `calls` chart round-trips have been served.
    pub fn with_disconnect_after(mut self, calls: usize) -> Self {
        self.disconnect_after = Some(calls);
        self
    }

    pub fn set_connected(&self, connected: bool) {
        lock(&self.state).connected = connected;
    }

    pub fn series_calls(&self) -> usize {
        lock(&self.state).series_calls
    }

    pub fn rows_served(&self) -> usize {
        lock(&self.state).rows_served
    }

    pub fn quota_calls(&self) -> usize {
        lock(&self.state).quota_calls
    }

    pub fn connect_probes(&self) -> usize {
        lock(&self.state).probes
    }

    /// Instrument code of every chart round-trip, in call order.
    pub fn call_log(&self) -> Vec<String> {
        lock(&self.state).call_log.clone()
    }

    fn serve_page(
        &self,
        query: &SeriesQuery,
        cursor: Option<&PageCursor>,
    ) -> Result<FetchPage, ProviderError> {
        {
            let mut state = lock(&self.state);
            if !state.connected {
                return Err(ProviderError::not_connected("simulated session is down"));
            }
            if self
                .disconnect_after
                .is_some_and(|limit| state.series_calls >= limit)
            {
                state.connected = false;
                return Err(ProviderError::not_connected("simulated session dropped"));
            }
            state.series_calls += 1;
            state.call_log.push(query.code.as_str().to_owned());
        }

        if let Some(page) = lock(&self.page_script).pop_front() {
            lock(&self.state).rows_served += page.rows.len();
            return Ok(page);
        }

        if let Some((status, message)) = self.statuses.get(query.code.as_str()) {
            return Ok(FetchPage::status(*status, message.clone()));
        }

        let key = series_key(query.code.as_str(), query.period, query.interval);
        let Some(series) = self.series.get(&key) else {
            return Ok(FetchPage::status(STATUS_NO_DATA, "no data for requested range"));
        };

        let newest_first: Vec<&Bar> = series
            .iter()
            .rev()
            .filter(|bar| {
                let date = bar.ts.wire_date();
                date >= query.from_date && date <= query.to_date
            })
            .collect();
        if newest_first.is_empty() {
            return Ok(FetchPage::status(STATUS_NO_DATA, "no data for requested range"));
        }

        let offset = match cursor {
            None => 0,
            Some(cursor) => cursor.as_str().parse::<usize>().map_err(|_| {
                ProviderError::protocol(format!("unknown continuation '{}'", cursor.as_str()))
            })?,
        };
        let page_size = self.page_size.min(query.page_size.max(1) as usize);
        let end = (offset + page_size).min(newest_first.len());
        let rows: Vec<RawRow> = newest_first
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|bar| encode_row(&query.fields, bar))
            .collect();

        let continuation = (end < newest_first.len()).then(|| {
            let next = if self.overlap { end - 1 } else { end };
            PageCursor::new(next.max(offset + 1).to_string())
        });

        lock(&self.state).rows_served += rows.len();
        Ok(FetchPage::ok(rows, continuation))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rows for `bars` in the field order requested for `granularity`.
pub fn encode_rows(granularity: Granularity, bars: &[Bar]) -> Vec<RawRow> {
    let fields = normalizer::field_ids(granularity);
    bars.iter().map(|bar| encode_row(fields, bar)).collect()
}

fn encode_row(fields: &[u8], bar: &Bar) -> RawRow {
    RawRow(
        fields
            .iter()
            .map(|id| match *id {
                field::DATE => f64::from(bar.ts.wire_date()),
                field::TIME => f64::from(bar.ts.wire_time()),
                field::OPEN => bar.open,
                field::HIGH => bar.high,
                field::LOW => bar.low,
                field::CLOSE => bar.close,
                field::VOLUME => bar.volume as f64,
                field::TRADING_VALUE => bar.trading_value.unwrap_or(0) as f64,
                _ => 0.0,
            })
            .collect(),
    )
}

impl MarketDataProvider for SimulatedProvider {
    fn id(&self) -> &'static str {
        "simulated"
    }

    fn is_connected<'a>(&'a self) -> ProviderFuture<'a, bool> {
        let connected = {
            let mut state = lock(&self.state);
            state.probes += 1;
            state.connected && state.probes > self.connect_after
        };
        Box::pin(async move { Ok(connected) })
    }

    fn series_page<'a>(
        &'a self,
        query: &'a SeriesQuery,
        cursor: Option<&'a PageCursor>,
    ) -> ProviderFuture<'a, FetchPage> {
        let page = self.serve_page(query, cursor);
        Box::pin(async move { page })
    }

    fn instrument_directory<'a>(
        &'a self,
        market: MarketSegment,
    ) -> ProviderFuture<'a, Vec<Instrument>> {
        let result = if lock(&self.state).connected {
            Ok(self.directory.get(&market).cloned().unwrap_or_default())
        } else {
            Err(ProviderError::not_connected("simulated session is down"))
        };
        Box::pin(async move { result })
    }

    fn financials<'a>(&'a self, query: &'a FinancialQuery) -> ProviderFuture<'a, FinancialPage> {
        let result = if lock(&self.state).connected {
            let mut rows: Vec<RawFinancialRow> = self
                .financials
                .get(query.code.as_str())
                .map(|rows| {
                    rows.iter()
                        .filter(|row| {
                            query.period == FinancialPeriod::Quarter || row.settlement % 100 == 12
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            rows.sort_by_key(|row| std::cmp::Reverse(row.settlement));
            rows.truncate(query.count as usize);
            Ok(FinancialPage {
                status: 0,
                message: String::new(),
                rows,
            })
        } else {
            Err(ProviderError::not_connected("simulated session is down"))
        };
        Box::pin(async move { result })
    }
}

impl QuotaSource for SimulatedProvider {
    fn quota_status<'a>(&'a self, _class: QuotaClass) -> ProviderFuture<'a, QuotaStatus> {
        lock(&self.state).quota_calls += 1;
        let next = lock(&self.quota_script)
            .pop_front()
            .unwrap_or(Ok(QuotaStatus::available(20, 1_000)));
        Box::pin(async move { next })
    }
}

/// Demo market used by `--mock`: a handful of listings on both boards, some
/// of which the universe filter rejects, with daily and one-minute history
/// ending at `today`.
pub fn demo_provider(today: BarTime) -> SimulatedProvider {
    let listings = [
        (MarketSegment::Kospi, "A005930", "삼성전자"),
        (MarketSegment::Kospi, "A005935", "삼성전자우"),
        (MarketSegment::Kospi, "A000660", "SK하이닉스"),
        (MarketSegment::Kospi, "A005380", "현대차"),
        (MarketSegment::Kospi, "A330590", "롯데리츠"),
        (MarketSegment::Kosdaq, "A035720", "카카오"),
        (MarketSegment::Kosdaq, "A247540", "에코프로비엠"),
        (MarketSegment::Kosdaq, "A475240", "대신밸런스제17호스팩"),
        (MarketSegment::Kosdaq, "A000020", "동화약품"),
    ];

    let mut provider = SimulatedProvider::new().with_page_size(200).with_overlap(true);
    for (market, code, name) in listings {
        let Ok(parsed) = InstrumentCode::parse(code) else {
            continue;
        };
        let mut instrument = Instrument::common(parsed, name, market);
        if code == "A000020" {
            instrument.supervision = SupervisionKind::from_code(1);
        }
        if code == "A330590" {
            instrument.section = SectionKind::Reits;
        }

        let seed = code_seed(code);
        provider = provider
            .with_instruments(market, vec![instrument])
            .with_series(code, Granularity::Daily, demo_daily(seed, today, 400))
            .with_series(code, Granularity::Minute(1), demo_minutes(seed, today, 2))
            .with_financials(code, demo_financials(seed, today));
    }
    provider
}

fn code_seed(code: &str) -> u64 {
    code.bytes()
        .fold(17_u64, |seed, byte| seed.wrapping_mul(31).wrapping_add(u64::from(byte)))
}

fn demo_price(seed: u64, step: i64) -> f64 {
    let base = 10_000.0 + (seed % 90_000) as f64;
    let wave = ((step as f64) * 0.21 + (seed % 7) as f64).sin() * 0.04;
    let drift = (step as f64) * 0.0004;
    (base * (1.0 + wave + drift)).round()
}

fn demo_bar(seed: u64, step: i64, ts: BarTime) -> Bar {
    let close = demo_price(seed, step);
    let open = demo_price(seed, step - 1);
    let volume = 50_000 + (seed.wrapping_add(step.unsigned_abs()) % 40_000);
    Bar {
        ts,
        open,
        high: open.max(close) * 1.01,
        low: open.min(close) * 0.99,
        close,
        volume,
        trading_value: Some((close * volume as f64) as u64),
        change_rate: None,
    }
}

fn is_weekday(ts: BarTime) -> bool {
    !matches!(ts.date().weekday(), Weekday::Saturday | Weekday::Sunday)
}

fn demo_daily(seed: u64, today: BarTime, days: i64) -> Vec<Bar> {
    let today = today.start_of_day();
    (0..days)
        .rev()
        .filter_map(|back| today.checked_sub(Duration::days(back)).map(|ts| (back, ts)))
        .filter(|(_, ts)| is_weekday(*ts))
        .map(|(back, ts)| demo_bar(seed, days - back, ts))
        .collect()
}

/// 09:00 through 15:30 on each of the last `sessions` weekdays.
fn demo_minutes(seed: u64, today: BarTime, sessions: usize) -> Vec<Bar> {
    let mut days = Vec::new();
    let mut cursor = today.start_of_day();
    while days.len() < sessions {
        if is_weekday(cursor) {
            days.push(cursor);
        }
        match cursor.checked_sub(Duration::days(1)) {
            Some(previous) => cursor = previous,
            None => break,
        }
    }
    days.reverse();

    let mut bars = Vec::new();
    let mut step = 0_i64;
    for day in days {
        for minute in 0..=390_i64 {
            if let Some(ts) = day.checked_add(Duration::minutes(9 * 60 + minute)) {
                bars.push(demo_bar(seed, step, ts));
                step += 1;
            }
        }
    }
    bars
}

fn demo_financials(seed: u64, today: BarTime) -> Vec<RawFinancialRow> {
    let year = u32::try_from(today.date().year()).unwrap_or(2024);
    let scale = (seed % 500) as f64 + 100.0;
    let mut rows = Vec::new();
    for (settlement, quarter) in [
        ((year - 2) * 100 + 12, 4),
        ((year - 1) * 100 + 3, 1),
        ((year - 1) * 100 + 6, 2),
        ((year - 1) * 100 + 9, 3),
        ((year - 1) * 100 + 12, 4),
    ] {
        let factor = f64::from(quarter) / 4.0;
        rows.push(RawFinancialRow {
            settlement,
            quarter,
            sales: Some((scale * 10.0 * factor).round()),
            operating_profit: Some((scale * factor).round()),
            net_profit: Some((scale * 0.8 * factor).round()),
            per: Some(12.5),
            pbr: Some(1.3),
            roe: Some(8.4),
            debt_ratio: Some(45.0),
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::SeriesRequest;
    use time::macros::date;

    fn query(code: &str, page_size: u32) -> SeriesQuery {
        let request = SeriesRequest {
            code: InstrumentCode::parse(code).expect("code"),
            granularity: Granularity::Daily,
            start: BarTime::from_date(date!(2024 - 01 - 01)),
            end: BarTime::from_date(date!(2024 - 12 - 31)),
            adjusted: true,
        };
        SeriesQuery::from_request(&request, crate::normalizer::field_ids(Granularity::Daily), page_size)
    }

    #[tokio::test]
    async fn pages_are_newest_first_with_overlap() {
        let today = BarTime::from_date(date!(2024 - 06 - 28));
        let provider = SimulatedProvider::new()
            .with_page_size(3)
            .with_overlap(true)
            .with_series("A005930", Granularity::Daily, demo_daily(1, today, 7));
        let query = query("A005930", 2_000);

        let first = provider.series_page(&query, None).await.expect("first");
        assert_eq!(first.rows.len(), 3);
        assert!(first.rows[0].0[0] > first.rows[2].0[0]);

        let cursor = first.continuation.expect("more pages");
        let second = provider
            .series_page(&query, Some(&cursor))
            .await
            .expect("second");
        assert_eq!(second.rows[0], first.rows[2]);
        assert!(second.continuation.is_none());
    }

    #[tokio::test]
    async fn connect_probe_flips_after_configured_attempts() {
        let provider = SimulatedProvider::new().with_connect_after(2);

        assert!(!provider.is_connected().await.expect("probe"));
        assert!(!provider.is_connected().await.expect("probe"));
        assert!(provider.is_connected().await.expect("probe"));
        assert_eq!(provider.connect_probes(), 3);
    }

    #[tokio::test]
    async fn session_drops_after_call_budget() {
        let today = BarTime::from_date(date!(2024 - 06 - 28));
        let provider = SimulatedProvider::new()
            .with_disconnect_after(1)
            .with_series("A005930", Granularity::Daily, demo_daily(1, today, 3));
        let query = query("A005930", 2_000);

        assert!(provider.series_page(&query, None).await.is_ok());
        let error = provider
            .series_page(&query, None)
            .await
            .expect_err("session dropped");
        assert!(error.is_connectivity());
    }

    #[test]
    fn demo_market_skips_weekends_and_covers_both_boards() {
        let provider = demo_provider(BarTime::from_date(date!(2024 - 06 - 28)));

        assert!(provider.directory[&MarketSegment::Kospi].len() >= 4);
        assert!(provider.directory[&MarketSegment::Kosdaq].len() >= 3);
        let daily = &provider.series[&series_key("A005930", 'D', 1)];
        assert!(daily.iter().all(|bar| is_weekday(bar.ts)));
        assert_eq!(
            daily.last().map(|bar| bar.ts),
            Some(BarTime::from_date(date!(2024 - 06 - 28)))
        );
    }
}
