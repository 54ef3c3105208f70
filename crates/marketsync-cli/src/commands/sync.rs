use serde::Serialize;

use marketsync_core::{
    Granularity, InstrumentCode, ReportCounts, SyncOrchestrator, SyncReport, SyncStatus,
};

use crate::cli::SyncArgs;
use crate::error::CliError;

use super::{parse_codes, parse_time, CommandResult};

#[derive(Debug, Serialize)]
struct SyncResponseData<'a> {
    counts: ReportCounts,
    report: &'a SyncReport,
}

pub async fn run(args: &SyncArgs, orchestrator: &SyncOrchestrator) -> Result<CommandResult, CliError> {
    let granularity: Granularity = args.granularity.parse()?;
    let start = parse_time(args.start.as_deref())?;
    let end = parse_time(args.end.as_deref())?;
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(marketsync_core::ValidationError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            }
            .into());
        }
    }

    orchestrator.ensure_connected().await?;
    let codes: Vec<InstrumentCode> = if args.all {
        let universe = orchestrator.rebuild_universe().await?;
        universe.codes().cloned().collect()
    } else {
        parse_codes(&args.codes)?
    };

    let report = orchestrator.run(&codes, granularity, start, end).await;
    let counts = report.counts();
    let warnings = report
        .outcomes
        .iter()
        .filter_map(|(code, outcome)| match &outcome.status {
            SyncStatus::Failed { reason } => Some(format!("{code}: {reason}")),
            _ => None,
        })
        .collect();

    let has_failures = report.has_failures();
    let data = serde_json::to_value(SyncResponseData {
        counts,
        report: &report,
    })?;
    Ok(CommandResult::ok(data, orchestrator.provider_id())
        .with_warnings(warnings)
        .with_failures(has_failures))
}
