mod cli;
mod commands;
mod error;
mod obs;
mod output;

use clap::Parser;
use std::process::ExitCode;

use marketsync_core::SyncConfig;

use crate::cli::Cli;
use crate::error::CliError;
use crate::output::{Envelope, RequestId};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(error = %error, "command failed");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CliError> {
    let cli = Cli::parse();
    obs::init_tracing(&cli.log_level, cli.log_format).map_err(CliError::Logging)?;

    let config = SyncConfig::load(cli.config.as_deref())?;
    let request_id = RequestId::new_v4();
    tracing::debug!(request_id = %request_id, mock = cli.mock, "configuration loaded");

    let result = commands::run(&cli, &config).await?;
    let has_failures = result.has_failures;
    output::render(&Envelope::from_result(request_id, result), cli.pretty)?;

    if has_failures {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}
