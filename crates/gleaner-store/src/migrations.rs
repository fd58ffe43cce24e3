use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_cache_and_history",
        sql: r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    source TEXT NOT NULL,
    canonical_query TEXT NOT NULL,
    payload TEXT NOT NULL,
    ttl_class TEXT NOT NULL,
    business_date DATE NOT NULL,
    collected_at_ms BIGINT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(source, canonical_query)
);

CREATE TABLE IF NOT EXISTS history_records (
    source TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    business_date DATE NOT NULL,
    collected_at_ms BIGINT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(source, natural_key)
);

CREATE TABLE IF NOT EXISTS history_staging (
    source TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    business_date TEXT NOT NULL,
    collected_at_ms BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_fetch_log",
        sql: r#"
CREATE TABLE IF NOT EXISTS fetch_log (
    request_id TEXT NOT NULL,
    dataset TEXT NOT NULL,
    source TEXT NOT NULL,
    outcome TEXT NOT NULL,
    error_category TEXT,
    message TEXT,
    duration_ms BIGINT,
    timestamp TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_fetch_log_source_ts ON fetch_log(source, timestamp);
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
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            tracing::debug!(version = migration.version, "applying store migration");
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}
