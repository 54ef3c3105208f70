use serde::Serialize;

use marketsync_core::universe::{Exclusion, NameCollision};
use marketsync_core::{Instrument, SyncOrchestrator};

use crate::cli::UniverseArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct UniverseResponseData<'a> {
    included: usize,
    excluded: usize,
    persisted: Option<usize>,
    instruments: Vec<&'a Instrument>,
    exclusions: &'a [Exclusion],
    collisions: &'a [NameCollision],
}

pub async fn run(
    args: &UniverseArgs,
    orchestrator: &SyncOrchestrator,
) -> Result<CommandResult, CliError> {
    orchestrator.ensure_connected().await?;
    let universe = orchestrator.rebuild_universe().await?;

    let persisted = if args.persist {
        Some(orchestrator.persist_universe(&universe).await?)
    } else {
        None
    };

    let warnings = universe
        .collisions()
        .iter()
        .map(|collision| {
            format!(
                "name '{}' shared by {} and {}; kept {}",
                collision.name, collision.dropped, collision.kept, collision.kept
            )
        })
        .collect();

    let data = serde_json::to_value(UniverseResponseData {
        included: universe.len(),
        excluded: universe.exclusions().len(),
        persisted,
        instruments: universe.instruments().collect(),
        exclusions: universe.exclusions(),
        collisions: universe.collisions(),
    })?;
    Ok(CommandResult::ok(data, orchestrator.provider_id()).with_warnings(warnings))
}
