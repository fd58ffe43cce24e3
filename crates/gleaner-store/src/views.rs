//! Diagnostic views over the store relations.

use ::duckdb::Connection;

/// Create the diagnostic views.
///
/// - `vw_store_stats`: row count and newest collection time per source and region
/// - `vw_source_outcomes`: attempt outcome counts per source from `fetch_log`
///
/// # Errors
/// Returns an error if the view creation SQL fails to execute.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW vw_store_stats AS
SELECT
    source,
    'volatile' AS region,
    COUNT(*)::BIGINT AS row_count,
    MAX(collected_at_ms)::BIGINT AS newest_collected_at_ms
FROM cache_entries
GROUP BY source
UNION ALL
SELECT
    source,
    'history' AS region,
    COUNT(*)::BIGINT AS row_count,
    MAX(collected_at_ms)::BIGINT AS newest_collected_at_ms
FROM history_records
GROUP BY source;

CREATE OR REPLACE VIEW vw_source_outcomes AS
SELECT
    source,
    COUNT(*) FILTER (WHERE outcome = 'success')::BIGINT AS successes,
    COUNT(*) FILTER (WHERE outcome <> 'success')::BIGINT AS failures,
    AVG(duration_ms)::DOUBLE AS avg_duration_ms
FROM fetch_log
GROUP BY source;
",
    )?;

    Ok(())
}
