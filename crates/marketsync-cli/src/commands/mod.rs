mod bars;
mod financials;
mod sync;
mod universe;

use std::sync::Arc;
use std::time::Instant;

use marketsync_core::adapters::simulated::demo_provider;
use marketsync_core::{
    BarStore, BarTime, BridgeAdapter, InstrumentCode, SyncConfig, SyncOrchestrator, Warehouse,
};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub latency_ms: u64,
    pub source: String,
    /// At least one per-instrument task failed; the process exits with 3.
    pub has_failures: bool,
}

impl CommandResult {
    pub fn ok(data: Value, source: impl Into<String>) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            latency_ms: 0,
            source: source.into(),
            has_failures: false,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings.extend(warnings);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_failures(mut self, has_failures: bool) -> Self {
        self.has_failures = has_failures;
        self
    }
}

pub async fn run(cli: &Cli, config: &SyncConfig) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let warehouse = Warehouse::open(config.warehouse_config())?;
    let store: Arc<dyn BarStore> = Arc::new(warehouse);
    let orchestrator = build_orchestrator(cli.mock, store, config);

    let result = match &cli.command {
        Command::Universe(args) => universe::run(args, &orchestrator).await?,
        Command::Sync(args) => sync::run(args, &orchestrator).await?,
        Command::Financials(args) => financials::run(args, &orchestrator).await?,
        Command::Bars(args) => bars::run(args, &orchestrator).await?,
    };

    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    Ok(result.with_latency(elapsed))
}

fn build_orchestrator(mock: bool, store: Arc<dyn BarStore>, config: &SyncConfig) -> SyncOrchestrator {
    if mock {
        let today = BarTime::now_market();
        return SyncOrchestrator::from_provider(Arc::new(demo_provider(today)), store, config)
            .with_now(today);
    }

    let bridge = BridgeAdapter::new(config.provider.bridge_url.as_str())
        .with_token(config.provider.bridge_token.clone())
        .with_timeout_ms(config.provider.timeout_ms);
    SyncOrchestrator::from_provider(Arc::new(bridge), store, config)
}

fn parse_codes(raw: &[String]) -> Result<Vec<InstrumentCode>, CliError> {
    let codes = raw
        .iter()
        .filter(|value| !value.trim().is_empty())
        .map(|value| InstrumentCode::parse(value))
        .collect::<Result<Vec<_>, _>>()?;
    if codes.is_empty() {
        return Err(CliError::Command(String::from(
            "at least one instrument code is required",
        )));
    }
    Ok(codes)
}

fn parse_time(raw: Option<&str>) -> Result<Option<BarTime>, CliError> {
    raw.map(BarTime::parse).transpose().map_err(CliError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_normalized_and_blank_entries_skipped() {
        let codes = parse_codes(&[String::from(" a005930"), String::new(), String::from("A000660")])
            .expect("codes");
        assert_eq!(
            codes.iter().map(InstrumentCode::as_str).collect::<Vec<_>>(),
            vec!["A005930", "A000660"]
        );
    }

    #[test]
    fn empty_selection_is_a_command_error() {
        let error = parse_codes(&[String::from("  ")]).expect_err("must fail");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn malformed_timestamp_is_a_validation_error() {
        let error = parse_time(Some("2024/01/02")).expect_err("must fail");
        assert!(matches!(error, CliError::Validation(_)));
        assert_eq!(parse_time(None).expect("absent"), None);
    }
}
