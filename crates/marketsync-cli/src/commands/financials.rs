use std::collections::BTreeMap;

use serde::Serialize;

use marketsync_core::{
    FinancialOutcome, FinancialPeriod, InstrumentCode, SyncOrchestrator, SyncStatus,
};

use crate::cli::FinancialsArgs;
use crate::error::CliError;

use super::{parse_codes, CommandResult};

#[derive(Debug, Serialize)]
struct FinancialsResponseData {
    period: FinancialPeriod,
    outcomes: BTreeMap<InstrumentCode, FinancialOutcome>,
}

pub async fn run(
    args: &FinancialsArgs,
    orchestrator: &SyncOrchestrator,
) -> Result<CommandResult, CliError> {
    let period: FinancialPeriod = args.period.parse()?;
    if args.count == 0 {
        return Err(CliError::Command(String::from("--count must be at least 1")));
    }
    let codes = parse_codes(&args.codes)?;

    orchestrator.ensure_connected().await?;
    let outcomes = orchestrator.sync_financials(&codes, period, args.count).await;

    let warnings = outcomes
        .iter()
        .filter_map(|(code, outcome)| match &outcome.status {
            SyncStatus::Failed { reason } => Some(format!("{code}: {reason}")),
            _ => None,
        })
        .collect();
    let has_failures = outcomes.values().any(|outcome| outcome.status.is_failed());

    let data = serde_json::to_value(FinancialsResponseData { period, outcomes })?;
    Ok(CommandResult::ok(data, orchestrator.provider_id())
        .with_warnings(warnings)
        .with_failures(has_failures))
}
