//! # Synchronization Orchestrator
//!
//! Drives one task per (instrument, granularity) pair through
//! `Planned -> Fetching -> Normalizing -> Persisting -> Done`, with `Failed`
//! reachable from fetching or persisting. Tasks run concurrently up to the
//! configured worker count; each is gated by the shared admission governor.
//!
//! A failed task never aborts the run. Losing the provider session is the one
//! exception that spreads: once a task sees it, every task that has not
//! started yet is reported as failed without touching the provider.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::fetcher::{ContinuationFetcher, FetchError};
use crate::governor::AdmissionGovernor;
use crate::normalizer;
use crate::planner::{SyncWindow, SyncWindowPlanner};
use crate::provider::{MarketDataProvider, QuotaSource, SeriesRequest};
use crate::store::{BarStore, StoreError, WriteContext};
use crate::universe::Universe;
use crate::{
    Bar, BarTime, FinancialPeriod, Granularity, InstrumentCode, MarketSegment, SyncError,
    ValidationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Planned,
    Fetching,
    Normalizing,
    Persisting,
    Done,
    Failed,
}

impl TaskState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::Fetching => "fetching",
            Self::Normalizing => "normalizing",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Non-zero, non-empty-range provider status.
    ProviderRejected { status: i32, message: String },
    /// The provider session went away during the run.
    ConnectivityLost,
    /// Transport or protocol failure talking to the provider.
    Provider { message: String },
    Storage { message: String },
    /// The task itself did not complete.
    Aborted { message: String },
}

impl FailureReason {
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::ConnectivityLost)
    }

    fn from_fetch(error: FetchError) -> Self {
        match error {
            FetchError::Rejected { status, message } => Self::ProviderRejected { status, message },
            FetchError::Provider(error) if error.is_connectivity() => Self::ConnectivityLost,
            FetchError::Provider(error) => Self::Provider {
                message: error.to_string(),
            },
        }
    }

    fn from_store(error: StoreError) -> Self {
        Self::Storage {
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProviderRejected { status, message } => {
                write!(f, "provider rejected request with status {status}: {message}")
            }
            Self::ConnectivityLost => f.write_str("connectivity lost"),
            Self::Provider { message } => write!(f, "provider error: {message}"),
            Self::Storage { message } => write!(f, "storage error: {message}"),
            Self::Aborted { message } => write!(f, "task aborted: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    /// Nothing new was available; includes empty provider ranges.
    UpToDate,
    Updated,
    Failed { reason: FailureReason },
}

impl SyncStatus {
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    const fn as_str(&self) -> &'static str {
        match self {
            Self::UpToDate => "up_to_date",
            Self::Updated => "updated",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub bars_fetched: usize,
    #[serde(flatten)]
    pub status: SyncStatus,
}

impl SyncOutcome {
    const fn up_to_date(bars_fetched: usize) -> Self {
        Self {
            bars_fetched,
            status: SyncStatus::UpToDate,
        }
    }

    const fn failed(bars_fetched: usize, reason: FailureReason) -> Self {
        Self {
            bars_fetched,
            status: SyncStatus::Failed { reason },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportCounts {
    pub total: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub failed: usize,
}

/// Per-instrument result of one synchronization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub granularity: Granularity,
    pub outcomes: BTreeMap<InstrumentCode, SyncOutcome>,
}

impl SyncReport {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            outcomes: BTreeMap::new(),
        }
    }

    pub fn get(&self, code: &InstrumentCode) -> Option<&SyncOutcome> {
        self.outcomes.get(code)
    }

    pub fn counts(&self) -> ReportCounts {
        self.outcomes
            .values()
            .fold(ReportCounts::default(), |mut counts, outcome| {
                counts.total += 1;
                match outcome.status {
                    SyncStatus::Updated => counts.updated += 1,
                    SyncStatus::UpToDate => counts.up_to_date += 1,
                    SyncStatus::Failed { .. } => counts.failed += 1,
                }
                counts
            })
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.values().any(|outcome| outcome.status.is_failed())
    }
}

/// Result of a financial statement pull for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinancialOutcome {
    pub statements: usize,
    #[serde(flatten)]
    pub status: SyncStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunOptions {
    workers: usize,
    adjusted: bool,
    connect_attempts: u32,
    connect_interval: Duration,
}

/// Owns the engine components and runs synchronization tasks.
#[derive(Clone)]
pub struct SyncOrchestrator {
    provider: Arc<dyn MarketDataProvider>,
    fetcher: ContinuationFetcher,
    store: Arc<dyn BarStore>,
    planner: SyncWindowPlanner,
    options: RunOptions,
    fixed_now: Option<BarTime>,
}

impl SyncOrchestrator {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        quota: Arc<dyn QuotaSource>,
        store: Arc<dyn BarStore>,
        config: &SyncConfig,
    ) -> Self {
        let governor = Arc::new(AdmissionGovernor::new(quota, config.governor_policy()));
        let fetcher =
            ContinuationFetcher::new(Arc::clone(&provider), governor, config.sync.page_size);
        Self {
            provider,
            fetcher,
            store,
            planner: config.planner(),
            options: RunOptions {
                workers: config.sync.workers.max(1),
                adjusted: config.sync.adjusted,
                connect_attempts: config.provider.connect_attempts.max(1),
                connect_interval: config.connect_interval(),
            },
            fixed_now: None,
        }
    }

    /// Build from one value that is both the provider and its quota source.
    pub fn from_provider<P>(provider: Arc<P>, store: Arc<dyn BarStore>, config: &SyncConfig) -> Self
    where
        P: MarketDataProvider + QuotaSource + 'static,
    {
        let quota: Arc<dyn QuotaSource> = provider.clone();
        Self::new(provider, quota, store, config)
    }

    /// Pin "now" instead of reading the exchange clock.
    pub fn with_now(mut self, now: BarTime) -> Self {
        self.fixed_now = Some(now);
        self
    }

    /// Label of the provider behind this engine.
    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    fn now(&self) -> BarTime {
        self.fixed_now.unwrap_or_else(BarTime::now_market)
    }

    /// Poll the connect probe until the provider reports a live session.
    pub async fn ensure_connected(&self) -> Result<(), SyncError> {
        let attempts = self.options.connect_attempts;
        for attempt in 1..=attempts {
            match self.provider.is_connected().await {
                Ok(true) => {
                    debug!(attempt, "provider connected");
                    return Ok(());
                }
                Ok(false) => info!(
                    attempt,
                    attempts,
                    wait_ms = self.options.connect_interval.as_millis() as u64,
                    "provider not connected yet"
                ),
                Err(error) => warn!(attempt, attempts, error = %error, "connect probe failed"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.options.connect_interval).await;
            }
        }

        error!(attempts, "provider never reported a live session");
        Err(SyncError::NotConnected { attempts })
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn BarStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || operation(store.as_ref()))
            .await
            .map_err(|error| StoreError::Task(error.to_string()))?
    }

    fn write_context(&self, request_id: &str, started: Instant) -> WriteContext {
        WriteContext {
            source: self.fetcher.provider_id(),
            request_id: request_id.to_owned(),
            latency_ms: started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64,
        }
    }

    /// Bring one series up to date. Never fails; failures are part of the outcome.
    pub async fn synchronize(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        start: Option<BarTime>,
        end: Option<BarTime>,
    ) -> SyncOutcome {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let transition = |state: TaskState| {
            debug!(code = %code, granularity = %granularity, state = state.as_str(), "task state");
        };

        transition(TaskState::Planned);
        let watermark = {
            let code = code.clone();
            self.blocking(move |store| store.watermark(&code, granularity))
                .await
        };
        let watermark = match watermark {
            Ok(watermark) => watermark,
            Err(error) => {
                let reason = FailureReason::from_store(error);
                return self
                    .fail(code, granularity, &request_id, started, 0, reason)
                    .await;
            }
        };

        let (window_start, window_end) =
            match self.planner.plan(granularity, watermark, start, end, self.now()) {
                SyncWindow::AlreadyCurrent => {
                    transition(TaskState::Done);
                    info!(
                        code = %code,
                        granularity = %granularity,
                        watermark = ?watermark.map(|value| value.to_string()),
                        "series already current"
                    );
                    return SyncOutcome::up_to_date(0);
                }
                SyncWindow::Range { start, end } => (start, end),
            };

        transition(TaskState::Fetching);
        let request = SeriesRequest {
            code: code.clone(),
            granularity,
            start: window_start,
            end: window_end,
            adjusted: self.options.adjusted,
        };
        let fetched = match self.fetcher.fetch(&request).await {
            Ok(bars) => bars,
            Err(error) => {
                let reason = FailureReason::from_fetch(error);
                return self
                    .fail(code, granularity, &request_id, started, 0, reason)
                    .await;
            }
        };
        let bars_fetched = fetched.len();
        if fetched.is_empty() {
            transition(TaskState::Done);
            info!(code = %code, granularity = %granularity, "no new bars");
            return SyncOutcome::up_to_date(0);
        }

        transition(TaskState::Normalizing);
        let prior_close = if granularity.is_intraday() {
            None
        } else {
            let code = code.clone();
            match self
                .blocking(move |store| store.prior_close(&code, granularity, window_start))
                .await
            {
                Ok(close) => close,
                Err(error) => {
                    warn!(
                        code = %request.code,
                        error = %error,
                        "prior close unavailable; first change rate defaults to 0"
                    );
                    None
                }
            }
        };
        let bars = normalizer::normalize(fetched, granularity, window_start, window_end, prior_close);
        if bars.is_empty() {
            transition(TaskState::Done);
            info!(code = %code, granularity = %granularity, bars_fetched, "fetched bars fell outside the window");
            return SyncOutcome::up_to_date(0);
        }

        transition(TaskState::Persisting);
        let context = self.write_context(&request_id, started);
        let written = {
            let code = code.clone();
            self.blocking(move |store| store.upsert_bars(&code, granularity, &bars, &context))
                .await
        };
        match written {
            Ok(rows) => {
                transition(TaskState::Done);
                info!(
                    code = %code,
                    granularity = %granularity,
                    bars_fetched,
                    rows_written = rows,
                    request_id = %request_id,
                    "series synchronized"
                );
                SyncOutcome {
                    bars_fetched,
                    status: SyncStatus::Updated,
                }
            }
            Err(error) => {
                let reason = FailureReason::from_store(error);
                self.fail(code, granularity, &request_id, started, bars_fetched, reason)
                    .await
            }
        }
    }

    async fn fail(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        request_id: &str,
        started: Instant,
        bars_fetched: usize,
        reason: FailureReason,
    ) -> SyncOutcome {
        debug!(code = %code, granularity = %granularity, state = TaskState::Failed.as_str(), "task state");
        warn!(code = %code, granularity = %granularity, reason = %reason, "synchronization task failed");

        let context = self.write_context(request_id, started);
        let audit = {
            let code = code.clone();
            let text = reason.to_string();
            self.blocking(move |store| store.record_failure(&code, granularity, &text, &context))
                .await
        };
        if let Err(error) = audit {
            warn!(code = %code, error = %error, "failed to audit task failure");
        }

        SyncOutcome::failed(bars_fetched, reason)
    }

    /// Synchronize every code concurrently and report per-instrument outcomes.
    pub async fn run(
        &self,
        codes: &[InstrumentCode],
        granularity: Granularity,
        start: Option<BarTime>,
        end: Option<BarTime>,
    ) -> SyncReport {
        let permits = Arc::new(Semaphore::new(self.options.workers));
        let connectivity_lost = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        for code in codes {
            let orchestrator = self.clone();
            let permits = Arc::clone(&permits);
            let connectivity_lost = Arc::clone(&connectivity_lost);
            let code = code.clone();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    let reason = FailureReason::Aborted {
                        message: String::from("worker pool closed"),
                    };
                    return (code, SyncOutcome::failed(0, reason));
                };
                if connectivity_lost.load(Ordering::SeqCst) {
                    return (code, SyncOutcome::failed(0, FailureReason::ConnectivityLost));
                }

                let outcome = orchestrator.synchronize(&code, granularity, start, end).await;
                if let SyncStatus::Failed { reason } = &outcome.status {
                    if reason.is_connectivity() {
                        connectivity_lost.store(true, Ordering::SeqCst);
                    }
                }
                (code, outcome)
            });
        }

        let mut report = SyncReport::new(granularity);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((code, outcome)) => {
                    report.outcomes.insert(code, outcome);
                }
                Err(error) => error!(error = %error, "synchronization task did not complete"),
            }
        }

        for code in codes {
            report.outcomes.entry(code.clone()).or_insert_with(|| {
                SyncOutcome::failed(
                    0,
                    FailureReason::Aborted {
                        message: String::from("task panicked or was cancelled"),
                    },
                )
            });
        }

        let counts = report.counts();
        info!(
            granularity = %granularity,
            total = counts.total,
            updated = counts.updated,
            up_to_date = counts.up_to_date,
            failed = counts.failed,
            "synchronization run finished"
        );
        report
    }

    /// Pull the instrument directory for both boards and classify it.
    pub async fn rebuild_universe(&self) -> Result<Universe, SyncError> {
        let mut listed = Vec::new();
        for market in MarketSegment::ALL {
            let instruments = self.provider.instrument_directory(market).await?;
            debug!(market = %market, listed = instruments.len(), "instrument directory loaded");
            listed.extend(instruments);
        }
        Ok(Universe::build(listed))
    }

    /// Upsert every included instrument with its market segment.
    pub async fn persist_universe(&self, universe: &Universe) -> Result<usize, SyncError> {
        let instruments: Vec<_> = universe.instruments().cloned().collect();
        let context = self.write_context(&Uuid::new_v4().to_string(), Instant::now());
        let written = self
            .blocking(move |store| store.upsert_instruments(&instruments, &context))
            .await?;
        info!(instruments = written, "universe persisted");
        Ok(written)
    }

    /// Fetch and store financial statements for each code, one at a time.
    pub async fn sync_financials(
        &self,
        codes: &[InstrumentCode],
        period: FinancialPeriod,
        count: u32,
    ) -> BTreeMap<InstrumentCode, FinancialOutcome> {
        let mut outcomes = BTreeMap::new();
        let mut connectivity_lost = false;

        for code in codes {
            let outcome = if connectivity_lost {
                FinancialOutcome {
                    statements: 0,
                    status: SyncStatus::Failed {
                        reason: FailureReason::ConnectivityLost,
                    },
                }
            } else {
                self.sync_financials_for(code, period, count).await
            };
            if let SyncStatus::Failed { reason } = &outcome.status {
                connectivity_lost |= reason.is_connectivity();
            }
            outcomes.insert(code.clone(), outcome);
        }
        outcomes
    }

    async fn sync_financials_for(
        &self,
        code: &InstrumentCode,
        period: FinancialPeriod,
        count: u32,
    ) -> FinancialOutcome {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let statements = match self.fetcher.fetch_financials(code, period, count).await {
            Ok(statements) => statements,
            Err(error) => {
                let reason = FailureReason::from_fetch(error);
                warn!(code = %code, period = %period, reason = %reason, "financial statement pull failed");
                return FinancialOutcome {
                    statements: 0,
                    status: SyncStatus::Failed { reason },
                };
            }
        };
        if statements.is_empty() {
            return FinancialOutcome {
                statements: 0,
                status: SyncStatus::UpToDate,
            };
        }

        let fetched = statements.len();
        let context = self.write_context(&request_id, started);
        match self
            .blocking(move |store| store.upsert_financials(&statements, &context))
            .await
        {
            Ok(written) => {
                info!(code = %code, period = %period, statements = written, "financials synchronized");
                FinancialOutcome {
                    statements: fetched,
                    status: SyncStatus::Updated,
                }
            }
            Err(error) => FinancialOutcome {
                statements: fetched,
                status: SyncStatus::Failed {
                    reason: FailureReason::from_store(error),
                },
            },
        }
    }

    /// Persisted bars for one series, oldest first.
    pub async fn read_bars(
        &self,
        code: &InstrumentCode,
        granularity: Granularity,
        start: BarTime,
        end: BarTime,
    ) -> Result<Vec<Bar>, SyncError> {
        let end = if granularity.is_intraday() && end.is_midnight() {
            end.end_of_day()
        } else {
            end
        };
        if start > end {
            return Err(ValidationError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            }
            .into());
        }

        let code = code.clone();
        Ok(self
            .blocking(move |store| store.read_bars(&code, granularity, start, end))
            .await?)
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("provider", &self.provider.id())
            .field("planner", &self.planner)
            .field("workers", &self.options.workers)
            .finish()
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::simulated::{demo_provider, encode_rows, SimulatedProvider};
    use crate::provider::FetchPage;
    use crate::QuotaStatus;
    use marketsync_warehouse::{Warehouse, WarehouseConfig};
    use time::macros::{date, datetime};

    fn open_warehouse(temp: &tempfile::TempDir) -> Arc<Warehouse> {
        let warehouse = Warehouse::open(WarehouseConfig {
            marketsync_home: temp.path().to_path_buf(),
            db_path: temp.path().join("warehouse.duckdb"),
            max_pool_size: 2,
        })
        .expect("open warehouse");
        warehouse.initialize().expect("initialize");
        Arc::new(warehouse)
    }

    fn code(value: &str) -> InstrumentCode {
        InstrumentCode::parse(value).expect("code")
    }

    fn daily(first: time::Date, days: i64) -> Vec<Bar> {
        (0..days)
            .map(|offset| {
                let close = 100.0 + offset as f64;
                Bar {
                    ts: BarTime::from_date(first + time::Duration::days(offset)),
                    open: close - 1.0,
                    high: close + 1.0,
                    low: close - 2.0,
                    close,
                    volume: 1_000,
                    trading_value: Some(100_000),
                    change_rate: None,
                }
            })
            .collect()
    }

    fn orchestrator(
        provider: Arc<SimulatedProvider>,
        warehouse: Arc<Warehouse>,
        workers: usize,
    ) -> SyncOrchestrator {
        let mut config = SyncConfig::default();
        config.sync.workers = workers;
        config.provider.connect_attempts = 3;
        SyncOrchestrator::from_provider(provider, warehouse, &config)
            .with_now(BarTime::new(datetime!(2024-01-10 15:40)))
    }

    #[tokio::test]
    async fn second_run_is_up_to_date_without_fetching() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = open_warehouse(&temp);
        let provider = Arc::new(
            SimulatedProvider::new()
                .with_page_size(6)
                .with_overlap(true)
                .with_series("A005930", Granularity::Daily, daily(date!(2024 - 01 - 01), 10)),
        );
        let engine = orchestrator(provider.clone(), warehouse.clone(), 2);
        let start = Some(BarTime::from_date(date!(2024 - 01 - 01)));

        let first = engine
            .synchronize(&code("A005930"), Granularity::Daily, start, None)
            .await;
        assert_eq!(first.status, SyncStatus::Updated);
        assert_eq!(first.bars_fetched, 10);
        let watermark = warehouse
            .watermark("A005930", marketsync_warehouse::BarDataset::Daily)
            .expect("watermark");
        assert_eq!(watermark.as_deref(), Some("2024-01-10 00:00:00"));

        let calls = provider.series_calls();
        let second = engine
            .synchronize(&code("A005930"), Granularity::Daily, start, None)
            .await;
        assert_eq!(second, SyncOutcome::up_to_date(0));
        assert_eq!(provider.series_calls(), calls);
        assert_eq!(
            warehouse
                .watermark("A005930", marketsync_warehouse::BarDataset::Daily)
                .expect("watermark"),
            watermark
        );
    }

    #[tokio::test]
    async fn incremental_run_continues_change_rate_from_stored_close() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = open_warehouse(&temp);
        let seeded = Arc::new(SimulatedProvider::new().with_series(
            "A000660",
            Granularity::Daily,
            daily(date!(2024 - 01 - 01), 10),
        ));
        let start = Some(BarTime::from_date(date!(2024 - 01 - 01)));
        orchestrator(seeded, warehouse.clone(), 1)
            .synchronize(&code("A000660"), Granularity::Daily, start, None)
            .await;

        let extended = Arc::new(SimulatedProvider::new().with_series(
            "A000660",
            Granularity::Daily,
            daily(date!(2024 - 01 - 01), 11),
        ));
        let outcome = orchestrator(extended, warehouse.clone(), 1)
            .with_now(BarTime::new(datetime!(2024-01-11 16:00)))
            .synchronize(&code("A000660"), Granularity::Daily, start, None)
            .await;
        assert_eq!(outcome.status, SyncStatus::Updated);
        assert_eq!(outcome.bars_fetched, 1);

        let engine = orchestrator(Arc::new(SimulatedProvider::new()), warehouse, 1);
        let bars = engine
            .read_bars(
                &code("A000660"),
                Granularity::Daily,
                BarTime::from_date(date!(2024 - 01 - 01)),
                BarTime::from_date(date!(2024 - 01 - 11)),
            )
            .await
            .expect("read");
        assert_eq!(bars.len(), 11);
        assert_eq!(bars[0].change_rate, Some(0.0));
        // 110 after 109
        assert_eq!(bars[10].change_rate, Some(0.92));
    }

    #[tokio::test]
    async fn rejection_fails_one_task_and_spares_the_rest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = open_warehouse(&temp);
        let provider = Arc::new(
            SimulatedProvider::new()
                .with_series("A005930", Granularity::Daily, daily(date!(2024 - 01 - 01), 10))
                .with_series("A035720", Granularity::Daily, daily(date!(2024 - 01 - 01), 10))
                .with_status("A035720", 3, "invalid instrument"),
        );
        let engine = orchestrator(provider, warehouse.clone(), 2);
        let start = Some(BarTime::from_date(date!(2024 - 01 - 01)));

        let report = engine
            .run(
                &[code("A005930"), code("A035720"), code("A000660")],
                Granularity::Daily,
                start,
                None,
            )
            .await;

        let counts = report.counts();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.updated, 1);
        // No series scripted for A000660: the provider reports an empty range.
        assert_eq!(counts.up_to_date, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(
            report.get(&code("A035720")).map(|outcome| outcome.status.clone()),
            Some(SyncStatus::Failed {
                reason: FailureReason::ProviderRejected {
                    status: 3,
                    message: String::from("invalid instrument"),
                }
            })
        );
        let audit = warehouse.ingest_statuses("A035720").expect("audit");
        assert_eq!(audit.len(), 1);
        assert!(audit[0].starts_with("failed: provider rejected"), "{audit:?}");
        assert!(warehouse
            .watermark("A035720", marketsync_warehouse::BarDataset::Daily)
            .expect("watermark")
            .is_none());
    }

    #[tokio::test]
    async fn lost_session_fails_every_remaining_task() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = open_warehouse(&temp);
        let mut provider = SimulatedProvider::new().with_disconnect_after(1);
        for listed in ["A005930", "A000660", "A035720"] {
            provider = provider.with_series(listed, Granularity::Daily, daily(date!(2024 - 01 - 01), 5));
        }
        let engine = orchestrator(Arc::new(provider), warehouse, 1);

        let report = engine
            .run(
                &[code("A005930"), code("A000660"), code("A035720")],
                Granularity::Daily,
                Some(BarTime::from_date(date!(2024 - 01 - 01))),
                None,
            )
            .await;

        let counts = report.counts();
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.failed, 2);
        assert!(report
            .outcomes
            .values()
            .filter(|outcome| outcome.status.is_failed())
            .all(|outcome| outcome.status
                == SyncStatus::Failed {
                    reason: FailureReason::ConnectivityLost
                }));
    }

    #[tokio::test]
    async fn bars_trimmed_outside_window_count_as_nothing_fetched() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = open_warehouse(&temp);
        let stale = daily(date!(2024 - 01 - 01), 3);
        let provider = Arc::new(SimulatedProvider::new().with_page_script(vec![
            FetchPage::ok(encode_rows(Granularity::Daily, &stale), None),
        ]));
        let engine = orchestrator(provider.clone(), warehouse.clone(), 1);

        let outcome = engine
            .synchronize(
                &code("A005930"),
                Granularity::Daily,
                Some(BarTime::from_date(date!(2024 - 01 - 05))),
                None,
            )
            .await;

        assert_eq!(outcome, SyncOutcome::up_to_date(0));
        assert_eq!(provider.rows_served(), 3);
        assert_eq!(
            warehouse
                .watermark("A005930", marketsync_warehouse::BarDataset::Daily)
                .expect("watermark"),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_waits_out_exhausted_second_window_before_fetching() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = open_warehouse(&temp);
        let exhausted = QuotaStatus {
            remaining_per_second: 0,
            remaining_per_minute: 50,
            second_reset: Duration::from_secs(1),
            minute_reset: Duration::from_secs(30),
        };
        let provider = Arc::new(
            SimulatedProvider::new()
                .with_series("A005930", Granularity::Daily, daily(date!(2024 - 01 - 01), 10))
                .with_quota_script(vec![Ok(exhausted), Ok(QuotaStatus::available(5, 49))]),
        );
        let engine = orchestrator(provider.clone(), warehouse, 1);

        let started = tokio::time::Instant::now();
        let report = engine
            .run(
                &[code("A005930")],
                Granularity::Daily,
                Some(BarTime::from_date(date!(2024 - 01 - 01))),
                None,
            )
            .await;

        // 1s reset plus the 500ms second-window margin.
        assert!(started.elapsed() >= Duration::from_millis(1_500));
        assert!(provider.quota_calls() >= 2);
        let outcome = report.get(&code("A005930")).expect("outcome");
        assert_eq!(outcome.status, SyncStatus::Updated);
        assert_eq!(outcome.bars_fetched, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_probe_retries_then_gives_up() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = open_warehouse(&temp);

        let late = Arc::new(SimulatedProvider::new().with_connect_after(2));
        orchestrator(late.clone(), warehouse.clone(), 1)
            .ensure_connected()
            .await
            .expect("connects on third probe");
        assert_eq!(late.connect_probes(), 3);

        let never = Arc::new(SimulatedProvider::new().with_connect_after(10));
        let error = orchestrator(never.clone(), warehouse, 1)
            .ensure_connected()
            .await
            .expect_err("must give up");
        assert!(matches!(error, SyncError::NotConnected { attempts: 3 }));
        assert_eq!(never.connect_probes(), 3);
    }

    #[tokio::test]
    async fn universe_rebuild_persists_only_eligible_instruments() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = open_warehouse(&temp);
        let provider = Arc::new(demo_provider(BarTime::from_date(date!(2024 - 01 - 10))));
        let engine = orchestrator(provider, warehouse.clone(), 1);

        let universe = engine.rebuild_universe().await.expect("universe");
        assert!(universe.contains(&code("A005930")));
        assert!(!universe.contains(&code("A005935")));
        assert!(!universe.contains(&code("A330590")));
        assert!(!universe.contains(&code("A475240")));
        assert!(!universe.contains(&code("A000020")));

        let written = engine.persist_universe(&universe).await.expect("persist");
        assert_eq!(written, universe.len());
        let kosdaq = warehouse.instruments(Some("KOSDAQ")).expect("instruments");
        assert_eq!(kosdaq.len(), universe.in_market(MarketSegment::Kosdaq).count());
    }

    #[tokio::test]
    async fn financials_are_stored_per_period() {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = open_warehouse(&temp);
        let provider = Arc::new(demo_provider(BarTime::from_date(date!(2024 - 06 - 28))));
        let engine = orchestrator(provider, warehouse.clone(), 1);

        let outcomes = engine
            .sync_financials(&[code("A005930")], FinancialPeriod::Quarter, 4)
            .await;

        let outcome = &outcomes[&code("A005930")];
        assert_eq!(outcome.status, SyncStatus::Updated);
        assert_eq!(outcome.statements, 4);
        let stored = warehouse.financials("A005930").expect("financials");
        assert_eq!(stored.len(), 4);
        assert_eq!(stored.last().map(|row| row.base_date.as_str()), Some("2023-12-31"));
    }

    #[tokio::test]
    async fn read_bars_rejects_inverted_range() {
        let temp = tempfile::tempdir().expect("tempdir");
        let engine = orchestrator(Arc::new(SimulatedProvider::new()), open_warehouse(&temp), 1);

        let error = engine
            .read_bars(
                &code("A005930"),
                Granularity::Daily,
                BarTime::from_date(date!(2024 - 02 - 01)),
                BarTime::from_date(date!(2024 - 01 - 01)),
            )
            .await
            .expect_err("inverted");
        assert!(matches!(error, SyncError::Validation(ValidationError::InvalidRange { .. })));
    }
}
