use ::duckdb::{Connection, ToSql};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_core_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS instruments (
    symbol TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    market TEXT NOT NULL,
    source TEXT,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS bars_daily (
    symbol TEXT NOT NULL,
    interval_min INTEGER NOT NULL,
    ts TIMESTAMP NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    trading_value BIGINT,
    change_rate DOUBLE,
    source TEXT,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, interval_min, ts)
);

CREATE TABLE IF NOT EXISTS bars_weekly (
    symbol TEXT NOT NULL,
    interval_min INTEGER NOT NULL,
    ts TIMESTAMP NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    trading_value BIGINT,
    change_rate DOUBLE,
    source TEXT,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, interval_min, ts)
);

CREATE TABLE IF NOT EXISTS bars_monthly (
    symbol TEXT NOT NULL,
    interval_min INTEGER NOT NULL,
    ts TIMESTAMP NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    trading_value BIGINT,
    change_rate DOUBLE,
    source TEXT,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, interval_min, ts)
);

CREATE TABLE IF NOT EXISTS bars_minute (
    symbol TEXT NOT NULL,
    interval_min INTEGER NOT NULL,
    ts TIMESTAMP NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    trading_value BIGINT,
    change_rate DOUBLE,
    source TEXT,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, interval_min, ts)
);

CREATE TABLE IF NOT EXISTS sync_watermarks (
    symbol TEXT NOT NULL,
    dataset TEXT NOT NULL,
    interval_min INTEGER NOT NULL,
    watermark TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, dataset, interval_min)
);

CREATE TABLE IF NOT EXISTS financials (
    symbol TEXT NOT NULL,
    base_date DATE NOT NULL,
    quarter INTEGER NOT NULL,
    sales DOUBLE,
    operating_profit DOUBLE,
    net_profit DOUBLE,
    per DOUBLE,
    pbr DOUBLE,
    roe DOUBLE,
    debt_ratio DOUBLE,
    source TEXT,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(symbol, base_date, quarter)
);

CREATE TABLE IF NOT EXISTS ingest_log (
    request_id TEXT NOT NULL,
    symbol TEXT,
    source TEXT NOT NULL,
    dataset TEXT NOT NULL,
    status TEXT NOT NULL,
    row_count BIGINT,
    latency_ms BIGINT,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_bars_daily_symbol_ts ON bars_daily(symbol, ts);
CREATE INDEX IF NOT EXISTS idx_bars_minute_symbol_ts ON bars_minute(symbol, interval_min, ts);
CREATE INDEX IF NOT EXISTS idx_financials_symbol_date ON financials(symbol, base_date);
CREATE INDEX IF NOT EXISTS idx_ingest_log_source_dataset_ts ON ingest_log(source, dataset, timestamp);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let params: [&dyn ToSql; 1] = [&migration.version];
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params.as_slice(),
            )?;
        }
    }

    Ok(())
}

pub fn applied_versions(connection: &Connection) -> Result<Vec<String>, ::duckdb::Error> {
    let mut statement =
        connection.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}
