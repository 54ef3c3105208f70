//! CLI argument definitions for marketsync.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `universe` | Rebuild the eligible instrument universe |
//! | `sync` | Incrementally synchronize bar series |
//! | `financials` | Pull annual or quarterly financial statements |
//! | `bars` | Read persisted bars from the warehouse |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$MARKETSYNC_HOME/config.toml` | TOML configuration file |
//! | `--mock` | `false` | Use the built-in simulated provider |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-level` | `info` | Log filter when `MARKETSYNC_LOG` is unset |
//! | `--log-format` | `text` | `text` or `json` logs on stderr |
//!
//! # Examples
//!
//! ```bash
//! marketsync universe --persist
//! marketsync sync --granularity 1d --all
//! marketsync sync --granularity 5m --codes A005930,A000660 --start 2024-01-02
//! marketsync bars A005930 --granularity 1d --start 2024-01-01 --end 2024-03-31 --pretty
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Incremental market-data synchronization for exchange-listed instruments.
#[derive(Debug, Parser)]
#[command(
    name = "marketsync",
    author,
    version,
    about = "Quota-aware incremental market-data synchronization",
    long_about = "marketsync keeps a local DuckDB warehouse in step with a quota-limited \
market-data provider. Each run fetches only what is newer than the stored watermark \
and never exceeds the provider's per-second and per-minute request quotas.\n\
\n\
Use 'marketsync <command> --help' for command-specific help."
)]
pub struct Cli {
    /// Configuration file. Defaults to `$MARKETSYNC_HOME/config.toml` when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use the built-in simulated provider instead of the bridge.
    #[arg(long, global = true, default_value_t = false)]
    pub mock: bool,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log filter used when `MARKETSYNC_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log line format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Rebuild the instrument universe from both boards' directories.
    ///
    /// # Examples
    ///
    ///   marketsync universe
    ///   marketsync universe --persist --pretty
    Universe(UniverseArgs),

    /// Synchronize bar series up to now (or `--end`).
    ///
    /// Each series is fetched from one step past its stored watermark.
    /// A run always completes; failed instruments are listed in the
    /// report and the process exits with code 3.
    ///
    /// # Examples
    ///
    ///   marketsync sync --granularity 1d --codes A005930
    ///   marketsync sync --granularity 1m --all
    Sync(SyncArgs),

    /// Pull financial statements and store them by base date.
    ///
    /// # Examples
    ///
    ///   marketsync financials --codes A005930 --period quarter --count 8
    Financials(FinancialsArgs),

    /// Read persisted bars for one instrument.
    ///
    /// # Examples
    ///
    ///   marketsync bars A005930 --granularity 1d --start 2024-01-01 --end 2024-01-31
    Bars(BarsArgs),
}

#[derive(Debug, Args)]
pub struct UniverseArgs {
    /// Upsert the included instruments into the warehouse.
    #[arg(long, default_value_t = false)]
    pub persist: bool,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Bar granularity: 1d, 1w, 1mo or <n>m.
    #[arg(long)]
    pub granularity: String,

    /// Comma-separated instrument codes.
    #[arg(long, value_delimiter = ',', conflicts_with = "all", required_unless_present = "all")]
    pub codes: Vec<String>,

    /// Synchronize every instrument in the rebuilt universe.
    #[arg(long, default_value_t = false)]
    pub all: bool,

    /// Earliest timestamp to fetch when no later watermark exists.
    #[arg(long)]
    pub start: Option<String>,

    /// Latest timestamp to fetch. Defaults to now.
    #[arg(long)]
    pub end: Option<String>,
}

#[derive(Debug, Args)]
pub struct FinancialsArgs {
    /// Comma-separated instrument codes.
    #[arg(long, value_delimiter = ',', required = true)]
    pub codes: Vec<String>,

    /// annual or quarter.
    #[arg(long, default_value = "annual")]
    pub period: String,

    /// Number of most recent periods to request.
    #[arg(long, default_value_t = 5)]
    pub count: u32,
}

#[derive(Debug, Args)]
pub struct BarsArgs {
    /// Instrument code, e.g. A005930.
    pub code: String,

    /// Bar granularity: 1d, 1w, 1mo or <n>m.
    #[arg(long, default_value = "1d")]
    pub granularity: String,

    #[arg(long)]
    pub start: String,

    #[arg(long)]
    pub end: String,
}
