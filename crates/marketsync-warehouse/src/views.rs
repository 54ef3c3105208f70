//! Database views over synchronized data.

use ::duckdb::Connection;

/// Create reporting views.
///
/// - `vw_sync_coverage`: watermark plus stored row count per symbol and dataset
///
/// # Errors
/// Returns an error if the view creation SQL fails to execute.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW vw_sync_coverage AS
WITH stored AS (
    SELECT symbol, 'daily' AS dataset, interval_min, COUNT(*) AS row_count, MIN(ts) AS first_ts FROM bars_daily GROUP BY symbol, interval_min
    UNION ALL
    SELECT symbol, 'weekly', interval_min, COUNT(*), MIN(ts) FROM bars_weekly GROUP BY symbol, interval_min
    UNION ALL
    SELECT symbol, 'monthly', interval_min, COUNT(*), MIN(ts) FROM bars_monthly GROUP BY symbol, interval_min
    UNION ALL
    SELECT symbol, 'minute', interval_min, COUNT(*), MIN(ts) FROM bars_minute GROUP BY symbol, interval_min
)
SELECT
    w.symbol,
    w.dataset,
    w.interval_min,
    s.first_ts,
    w.watermark,
    COALESCE(s.row_count, 0) AS row_count,
    w.updated_at
FROM sync_watermarks w
LEFT JOIN stored s
    ON s.symbol = w.symbol AND s.dataset = w.dataset AND s.interval_min = w.interval_min;
",
    )?;

    Ok(())
}
