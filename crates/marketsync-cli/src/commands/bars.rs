use serde::Serialize;

use marketsync_core::{Bar, BarTime, Granularity, InstrumentCode, SyncOrchestrator};

use crate::cli::BarsArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct BarsResponseData {
    code: InstrumentCode,
    granularity: Granularity,
    bars: Vec<Bar>,
}

/// Reads only the warehouse; the provider is never contacted.
pub async fn run(args: &BarsArgs, orchestrator: &SyncOrchestrator) -> Result<CommandResult, CliError> {
    let code = InstrumentCode::parse(&args.code)?;
    let granularity: Granularity = args.granularity.parse()?;
    let start = BarTime::parse(&args.start)?;
    let end = BarTime::parse(&args.end)?;

    let bars = orchestrator.read_bars(&code, granularity, start, end).await?;
    let warning = bars
        .is_empty()
        .then(|| format!("no stored {granularity} bars for {code} in range"));

    let data = serde_json::to_value(BarsResponseData {
        code,
        granularity,
        bars,
    })?;
    let result = CommandResult::ok(data, "warehouse");
    Ok(match warning {
        Some(warning) => result.with_warning(warning),
        None => result,
    })
}
