//! # Marketsync Core
//!
//! Incremental market-data synchronization against a quota-limited provider.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`adapters`] | Bridge and simulated providers |
//! | [`config`] | TOML configuration |
//! | [`domain`] | Instruments, granularities, bars, quotas, statements |
//! | [`error`] | Core error types |
//! | [`fetcher`] | Paged, governor-gated series retrieval |
//! | [`governor`] | Per-class admission against provider quota counters |
//! | [`http_client`] | HTTP transport abstraction |
//! | [`normalizer`] | Row parsing, ordering, trimming and change rates |
//! | [`orchestrator`] | Per-instrument task state machine and run scheduling |
//! | [`planner`] | Watermark-driven fetch windows |
//! | [`provider`] | Provider contract |
//! | [`store`] | Persistence gateway contract |
//! | [`universe`] | Eligibility rules and lookup maps |
//!
//! ## Flow
//!
//! ```text
//! planner ──▶ fetcher ──▶ normalizer ──▶ store
//!               │
//!               ▼
//!            governor ──▶ provider
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod governor;
pub mod http_client;
pub mod normalizer;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod store;
pub mod universe;

pub use adapters::{BridgeAdapter, SimulatedProvider};
pub use config::{ConfigError, SyncConfig};
pub use domain::{
    Bar, BarTime, ControlKind, FinancialPeriod, FinancialStatement, Granularity, Instrument,
    InstrumentCode, MarketSegment, QuotaClass, QuotaStatus, SectionKind, SupervisionKind,
    TradingStatus,
};
pub use error::{SyncError, ValidationError};
pub use fetcher::{ContinuationFetcher, FetchError};
pub use governor::{AdmissionGovernor, AdmissionPermit, GovernorPolicy};
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient,
};
pub use orchestrator::{
    FailureReason, FinancialOutcome, ReportCounts, SyncOrchestrator, SyncOutcome, SyncReport,
    SyncStatus,
};
pub use planner::{SyncWindow, SyncWindowPlanner};
pub use provider::{MarketDataProvider, ProviderError, ProviderErrorKind, QuotaSource};
pub use store::{BarStore, StoreError};
pub use universe::{Classification, ExclusionReason, Universe};

pub use marketsync_warehouse::{Warehouse, WarehouseConfig, WarehouseError};
