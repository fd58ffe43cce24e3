//! # Gleaner Store
//!
//! Embedded `DuckDB` persistence for the gleaner acquisition core.
//!
//! ## Overview
//!
//! The store holds two relations with different durability classes:
//!
//! - **Volatile** (`cache_entries`): one row per `(source, canonical_query)`,
//!   superseded on every refresh. Freshness is decided by the caller.
//! - **History** (`history_records`): one row per `(source, natural_key)`,
//!   never deleted, upserted in place.
//!
//! Every public operation goes through a single connection guarded by a mutex,
//! so callers never coordinate locking themselves.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gleaner_store::{HistoryRow, Store, StoreConfig};
//! use time::macros::date;
//!
//! fn main() -> Result<(), gleaner_store::StoreError> {
//!     let store = Store::open(StoreConfig::default())?;
//!     store.upsert_history(&HistoryRow {
//!         source: "usda".to_string(),
//!         natural_key: "corn:2025-10-01".to_string(),
//!         payload: r#"{"price": 4.1}"#.to_string(),
//!         business_date: date!(2025 - 10 - 01),
//!         collected_at_ms: 1_759_300_000_000,
//!     })?;
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `cache_entries` | Volatile region, keyed by `(source, canonical_query)` |
//! | `history_records` | Permanent region, keyed by `(source, natural_key)` |
//! | `history_staging` | Scratch table for set-based bulk upserts |
//! | `fetch_log` | Per-attempt audit log |
//!
//! ## Views
//!
//! | View | Description |
//! |------|-------------|
//! | `vw_store_stats` | Row counts per source and region |
//! | `vw_source_outcomes` | Attempt outcomes per source |

pub mod duckdb;
pub mod migrations;
pub mod views;

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::{params, Connection, ToSql};
use serde::Serialize;
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::Date;

pub use crate::duckdb::ConnectionHandle;

const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A row read back from the store could not be decoded.
    #[error("invalid stored data: {0}")]
    InvalidData(String),

    /// A previous holder of the connection lock panicked.
    #[error("store connection lock is poisoned")]
    LockPoisoned,
}

/// Location of the store on disk.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory for gleaner data.
    pub gleaner_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_home(resolve_gleaner_home())
    }
}

impl StoreConfig {
    /// Standard layout under a given home directory.
    pub fn in_home(gleaner_home: impl Into<PathBuf>) -> Self {
        let gleaner_home = gleaner_home.into();
        let db_path = gleaner_home.join("cache").join("gleaner.duckdb");
        Self {
            gleaner_home,
            db_path,
        }
    }
}

/// A row of the volatile region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatileRow {
    pub source: String,
    pub canonical_query: String,
    /// Serialized payload, opaque to the store.
    pub payload: String,
    /// Label of the freshness policy the entry was written under.
    pub ttl_class: String,
    pub business_date: Date,
    pub collected_at_ms: i64,
}

/// A row of the permanent history region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRow {
    pub source: String,
    pub natural_key: String,
    pub payload: String,
    pub business_date: Date,
    pub collected_at_ms: i64,
}

/// One attempt written to `fetch_log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchLogRow {
    pub request_id: String,
    pub dataset: String,
    pub source: String,
    pub outcome: String,
    pub error_category: Option<String>,
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Row counts for one source and region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionStats {
    pub source: String,
    pub region: String,
    pub row_count: u64,
    pub newest_collected_at_ms: Option<i64>,
}

/// Aggregated attempt outcomes for one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceOutcomes {
    pub source: String,
    pub successes: u64,
    pub failures: u64,
    pub avg_duration_ms: Option<f64>,
}

/// The volatile + history store.
#[derive(Clone)]
pub struct Store {
    config: StoreConfig,
    handle: ConnectionHandle,
}

impl Store {
    /// Open a store, creating the database and schema when missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let handle = ConnectionHandle::open(config.db_path.clone())?;
        let store = Self { config, handle };
        store.initialize()?;
        tracing::debug!(db_path = %store.db_path().display(), "store opened");
        Ok(store)
    }

    /// Apply migrations and (re)create views.
    pub fn initialize(&self) -> Result<(), StoreError> {
        self.handle.with_connection(|connection| {
            migrations::apply_migrations(connection)?;
            views::create_views(connection)?;
            Ok(())
        })
    }

    /// Path to the database file.
    pub fn db_path(&self) -> &Path {
        self.handle.db_path()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Look up the volatile entry for `(source, canonical_query)`.
    ///
    /// When `cutoff` is set, entries whose business date is after it are
    /// treated as absent.
    pub fn get_entry(
        &self,
        source: &str,
        canonical_query: &str,
        cutoff: Option<Date>,
    ) -> Result<Option<VolatileRow>, StoreError> {
        let mut sql = String::from(
            "SELECT source, canonical_query, payload, ttl_class, CAST(business_date AS VARCHAR), collected_at_ms \
             FROM cache_entries WHERE source = ? AND canonical_query = ?",
        );
        let cutoff = cutoff.map(format_date);
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(3);
        params.push(&source);
        params.push(&canonical_query);
        if let Some(cutoff) = cutoff.as_ref() {
            sql.push_str(" AND business_date <= CAST(? AS DATE)");
            params.push(cutoff);
        }

        let raw = self.handle.with_connection(|connection| {
            let raw = connection.query_row(sql.as_str(), params.as_slice(), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            });
            match raw {
                Ok(raw) => Ok(Some(raw)),
                Err(::duckdb::Error::QueryReturnedNoRows) => Ok(None),
                Err(error) => Err(StoreError::DuckDb(error)),
            }
        })?;

        raw.map(
            |(source, canonical_query, payload, ttl_class, business_date, collected_at_ms)| {
                Ok(VolatileRow {
                    source,
                    canonical_query,
                    payload,
                    ttl_class,
                    business_date: parse_date(business_date.as_str())?,
                    collected_at_ms,
                })
            },
        )
        .transpose()
    }

    /// Upsert the volatile entry for the row's key.
    pub fn put_entry(&self, row: &VolatileRow) -> Result<(), StoreError> {
        let business_date = format_date(row.business_date);
        self.handle.with_connection(|connection| {
            let params: [&dyn ToSql; 6] = [
                &row.source,
                &row.canonical_query,
                &row.payload,
                &row.ttl_class,
                &business_date,
                &row.collected_at_ms,
            ];
            connection.execute(
                "INSERT OR REPLACE INTO cache_entries \
                 (source, canonical_query, payload, ttl_class, business_date, collected_at_ms, updated_at) \
                 VALUES (?, ?, ?, ?, CAST(? AS DATE), ?, CURRENT_TIMESTAMP)",
                params.as_slice(),
            )?;
            Ok(())
        })
    }

    /// Remove volatile entries collected before `collected_before_ms`.
    ///
    /// History is never touched.
    pub fn purge_volatile_before(&self, collected_before_ms: i64) -> Result<usize, StoreError> {
        self.handle.with_connection(|connection| {
            Ok(connection.execute(
                "DELETE FROM cache_entries WHERE collected_at_ms < ?",
                [collected_before_ms],
            )?)
        })
    }

    /// Drop every volatile entry. History is never touched.
    pub fn clear_volatile(&self) -> Result<usize, StoreError> {
        self.handle.with_connection(|connection| {
            Ok(connection.execute("DELETE FROM cache_entries", [])?)
        })
    }

    /// Upsert one history row. Repeating the call leaves exactly one row.
    pub fn upsert_history(&self, row: &HistoryRow) -> Result<(), StoreError> {
        let business_date = format_date(row.business_date);
        self.handle.with_connection(|connection| {
            let params: [&dyn ToSql; 5] = [
                &row.source,
                &row.natural_key,
                &row.payload,
                &business_date,
                &row.collected_at_ms,
            ];
            connection.execute(
                "INSERT OR REPLACE INTO history_records \
                 (source, natural_key, payload, business_date, collected_at_ms, updated_at) \
                 VALUES (?, ?, ?, CAST(? AS DATE), ?, CURRENT_TIMESTAMP)",
                params.as_slice(),
            )?;
            Ok(())
        })
    }

    /// Upsert many history rows with one set-based merge.
    ///
    /// Rows are appended to `history_staging` and merged into
    /// `history_records` by a single `INSERT OR REPLACE ... SELECT`, all in
    /// one transaction. When the batch repeats a key, the last row wins.
    /// Returns the number of distinct keys written.
    pub fn bulk_upsert_history(&self, rows: &[HistoryRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let distinct = dedupe_last_wins(rows);
        let written = distinct.len();

        self.handle.with_transaction(|connection| {
            connection.execute_batch("DELETE FROM history_staging")?;
            stage_history(connection, &distinct)?;
            connection.execute_batch(
                "INSERT OR REPLACE INTO history_records \
                 (source, natural_key, payload, business_date, collected_at_ms, updated_at) \
                 SELECT source, natural_key, payload, CAST(business_date AS DATE), collected_at_ms, CURRENT_TIMESTAMP \
                 FROM history_staging; \
                 DELETE FROM history_staging;",
            )?;
            Ok(())
        })?;

        tracing::debug!(rows = rows.len(), distinct = written, "bulk history upsert merged");
        Ok(written)
    }

    /// Look up the history row for `(source, natural_key)`.
    pub fn get_history(
        &self,
        source: &str,
        natural_key: &str,
        cutoff: Option<Date>,
    ) -> Result<Option<HistoryRow>, StoreError> {
        let mut sql = String::from(
            "SELECT source, natural_key, payload, CAST(business_date AS VARCHAR), collected_at_ms \
             FROM history_records WHERE source = ? AND natural_key = ?",
        );
        let cutoff = cutoff.map(format_date);
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(3);
        params.push(&source);
        params.push(&natural_key);
        if let Some(cutoff) = cutoff.as_ref() {
            sql.push_str(" AND business_date <= CAST(? AS DATE)");
            params.push(cutoff);
        }

        let mut rows = self.query_history(sql.as_str(), params.as_slice())?;
        Ok(rows.pop())
    }

    /// List history rows of one source, newest business date first.
    pub fn scan_history(
        &self,
        source: &str,
        cutoff: Option<Date>,
        limit: usize,
    ) -> Result<Vec<HistoryRow>, StoreError> {
        let mut sql = String::from(
            "SELECT source, natural_key, payload, CAST(business_date AS VARCHAR), collected_at_ms \
             FROM history_records WHERE source = ?",
        );
        let cutoff = cutoff.map(format_date);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(3);
        params.push(&source);
        if let Some(cutoff) = cutoff.as_ref() {
            sql.push_str(" AND business_date <= CAST(? AS DATE)");
            params.push(cutoff);
        }
        sql.push_str(" ORDER BY business_date DESC, natural_key LIMIT ?");
        params.push(&limit);

        self.query_history(sql.as_str(), params.as_slice())
    }

    /// Number of history rows held for `source`.
    pub fn history_count(&self, source: &str) -> Result<u64, StoreError> {
        self.handle.with_connection(|connection| {
            let count: i64 = connection.query_row(
                "SELECT COUNT(*) FROM history_records WHERE source = ?",
                [source],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
    }

    /// Append attempts to the audit log.
    pub fn log_attempts(&self, rows: &[FetchLogRow]) -> Result<(), StoreError> {
        if rows.is_empty() {
            return Ok(());
        }

        self.handle.with_transaction(|connection| {
            for row in rows {
                let duration_ms = i64::try_from(row.duration_ms).unwrap_or(i64::MAX);
                let params: [&dyn ToSql; 7] = [
                    &row.request_id,
                    &row.dataset,
                    &row.source,
                    &row.outcome,
                    &row.error_category,
                    &row.message,
                    &duration_ms,
                ];
                connection.execute(
                    "INSERT INTO fetch_log \
                     (request_id, dataset, source, outcome, error_category, message, duration_ms, timestamp) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }
            Ok(())
        })
    }

    /// Row counts per source and region.
    pub fn stats(&self) -> Result<Vec<RegionStats>, StoreError> {
        self.handle.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT source, region, row_count, newest_collected_at_ms \
                 FROM vw_store_stats ORDER BY source, region",
            )?;
            let rows = statement.query_map([], |row| {
                Ok(RegionStats {
                    source: row.get(0)?,
                    region: row.get(1)?,
                    row_count: u64::try_from(row.get::<_, i64>(2)?).unwrap_or_default(),
                    newest_collected_at_ms: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Attempt outcomes per source, from the audit log.
    pub fn source_outcomes(&self) -> Result<Vec<SourceOutcomes>, StoreError> {
        self.handle.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT source, successes, failures, avg_duration_ms \
                 FROM vw_source_outcomes ORDER BY source",
            )?;
            let rows = statement.query_map([], |row| {
                Ok(SourceOutcomes {
                    source: row.get(0)?,
                    successes: u64::try_from(row.get::<_, i64>(1)?).unwrap_or_default(),
                    failures: u64::try_from(row.get::<_, i64>(2)?).unwrap_or_default(),
                    avg_duration_ms: row.get(3)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn query_history(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Vec<HistoryRow>, StoreError> {
        let raw = self.handle.with_connection(|connection| {
            let mut statement = connection.prepare(sql)?;
            let rows = statement.query_map(params, |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })?;

        raw.into_iter()
            .map(
                |(source, natural_key, payload, business_date, collected_at_ms)| {
                    Ok(HistoryRow {
                        source,
                        natural_key,
                        payload,
                        business_date: parse_date(business_date.as_str())?,
                        collected_at_ms,
                    })
                },
            )
            .collect()
    }
}

/// Delete the database file (and its write-ahead log) so the store can be
/// rebuilt from scratch. Missing files are not an error.
pub fn remove_store_files(db_path: &Path) -> Result<(), StoreError> {
    let mut wal = db_path.as_os_str().to_owned();
    wal.push(".wal");
    for path in [db_path.to_path_buf(), PathBuf::from(wal)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(StoreError::Io(error)),
        }
    }
    Ok(())
}

/// Format a business date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT)
        .unwrap_or_else(|_| date.to_string())
}

/// Parse a `YYYY-MM-DD` business date.
pub fn parse_date(value: &str) -> Result<Date, StoreError> {
    Date::parse(value.trim(), DATE_FORMAT)
        .map_err(|_| StoreError::InvalidData(format!("invalid business date '{value}'")))
}

fn stage_history(connection: &Connection, rows: &[&HistoryRow]) -> Result<(), StoreError> {
    let mut appender = connection.appender("history_staging")?;
    for row in rows {
        appender.append_row(params![
            row.source.as_str(),
            row.natural_key.as_str(),
            row.payload.as_str(),
            format_date(row.business_date),
            row.collected_at_ms,
        ])?;
    }
    appender.flush()?;
    Ok(())
}

fn dedupe_last_wins(rows: &[HistoryRow]) -> Vec<&HistoryRow> {
    let mut seen = HashSet::with_capacity(rows.len());
    let mut output: Vec<&HistoryRow> = rows
        .iter()
        .rev()
        .filter(|row| seen.insert((row.source.as_str(), row.natural_key.as_str())))
        .collect();
    output.reverse();
    output
}

/// Resolve the gleaner home directory from environment or default.
fn resolve_gleaner_home() -> PathBuf {
    if let Some(path) = env::var_os("GLEANER_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".gleaner");
    }

    PathBuf::from(".gleaner")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::macros::date;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let temp = tempdir().expect("tempdir");
        let store = Store::open(StoreConfig::in_home(temp.path())).expect("store open");
        (temp, store)
    }

    fn history(key: &str, payload: &str, business_date: Date) -> HistoryRow {
        HistoryRow {
            source: String::from("usda"),
            natural_key: key.to_string(),
            payload: payload.to_string(),
            business_date,
            collected_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn volatile_entry_is_superseded_not_duplicated() {
        let (_temp, store) = open_temp();
        let mut row = VolatileRow {
            source: String::from("usda"),
            canonical_query: String::from("prices?crop=corn"),
            payload: String::from("[1]"),
            ttl_class: String::from("ttl:3600s"),
            business_date: date!(2025 - 10 - 01),
            collected_at_ms: 1,
        };
        store.put_entry(&row).expect("first put");
        row.payload = String::from("[2]");
        row.collected_at_ms = 2;
        store.put_entry(&row).expect("second put");

        let stored = store
            .get_entry("usda", "prices?crop=corn", None)
            .expect("get")
            .expect("present");
        assert_eq!(stored.payload, "[2]");
        assert_eq!(stored.collected_at_ms, 2);

        let stats = store.stats().expect("stats");
        let volatile = stats
            .iter()
            .find(|entry| entry.region == "volatile")
            .expect("volatile stats");
        assert_eq!(volatile.row_count, 1);
    }

    #[test]
    fn cutoff_hides_entries_after_the_snapshot() {
        let (_temp, store) = open_temp();
        store
            .put_entry(&VolatileRow {
                source: String::from("usda"),
                canonical_query: String::from("q"),
                payload: String::from("{}"),
                ttl_class: String::from("permanent"),
                business_date: date!(2026 - 01 - 05),
                collected_at_ms: 1,
            })
            .expect("put");

        assert!(store
            .get_entry("usda", "q", Some(date!(2025 - 12 - 31)))
            .expect("get")
            .is_none());
        assert!(store
            .get_entry("usda", "q", Some(date!(2026 - 01 - 05)))
            .expect("get")
            .is_some());
    }

    #[test]
    fn repeated_history_upsert_keeps_one_row() {
        let (_temp, store) = open_temp();
        let row = history("corn:2025-10-01", "{\"p\":1}", date!(2025 - 10 - 01));
        store.upsert_history(&row).expect("first");
        store.upsert_history(&row).expect("second");

        assert_eq!(store.history_count("usda").expect("count"), 1);
    }

    #[test]
    fn bulk_upsert_merges_and_last_duplicate_wins() {
        let (_temp, store) = open_temp();
        store
            .upsert_history(&history("a", "old", date!(2025 - 01 - 01)))
            .expect("seed");

        let written = store
            .bulk_upsert_history(&[
                history("a", "new", date!(2025 - 01 - 01)),
                history("b", "first", date!(2025 - 01 - 02)),
                history("b", "second", date!(2025 - 01 - 02)),
            ])
            .expect("bulk");

        assert_eq!(written, 2);
        assert_eq!(store.history_count("usda").expect("count"), 2);
        let a = store.get_history("usda", "a", None).expect("get").expect("a");
        let b = store.get_history("usda", "b", None).expect("get").expect("b");
        assert_eq!(a.payload, "new");
        assert_eq!(b.payload, "second");
    }

    #[test]
    fn scan_history_respects_cutoff_and_order() {
        let (_temp, store) = open_temp();
        store
            .bulk_upsert_history(&[
                history("d1", "1", date!(2025 - 12 - 30)),
                history("d2", "2", date!(2025 - 12 - 31)),
                history("d3", "3", date!(2026 - 01 - 02)),
            ])
            .expect("bulk");

        let rows = store
            .scan_history("usda", Some(date!(2025 - 12 - 31)), 10)
            .expect("scan");
        let keys: Vec<&str> = rows.iter().map(|row| row.natural_key.as_str()).collect();
        assert_eq!(keys, vec!["d2", "d1"]);
    }

    #[test]
    fn fetch_log_feeds_outcome_view() {
        let (_temp, store) = open_temp();
        store
            .log_attempts(&[
                FetchLogRow {
                    request_id: String::from("req-1"),
                    dataset: String::from("prices"),
                    source: String::from("usda"),
                    outcome: String::from("failure"),
                    error_category: Some(String::from("network")),
                    message: Some(String::from("timeout")),
                    duration_ms: 10,
                },
                FetchLogRow {
                    request_id: String::from("req-1"),
                    dataset: String::from("prices"),
                    source: String::from("usda"),
                    outcome: String::from("success"),
                    error_category: None,
                    message: None,
                    duration_ms: 30,
                },
            ])
            .expect("log");

        let outcomes = store.source_outcomes().expect("outcomes");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].successes, 1);
        assert_eq!(outcomes[0].failures, 1);
    }

    #[test]
    fn purge_only_touches_volatile_region() {
        let (_temp, store) = open_temp();
        store
            .put_entry(&VolatileRow {
                source: String::from("usda"),
                canonical_query: String::from("q"),
                payload: String::from("{}"),
                ttl_class: String::from("ttl:1s"),
                business_date: date!(2025 - 01 - 01),
                collected_at_ms: 10,
            })
            .expect("put");
        store
            .upsert_history(&history("k", "{}", date!(2025 - 01 - 01)))
            .expect("history");

        assert_eq!(store.purge_volatile_before(100).expect("purge"), 1);
        assert_eq!(store.history_count("usda").expect("count"), 1);
    }

    #[test]
    fn remove_store_files_allows_rebuild() {
        let temp = tempdir().expect("tempdir");
        let config = StoreConfig::in_home(temp.path());
        {
            let store = Store::open(config.clone()).expect("open");
            store
                .upsert_history(&history("k", "{}", date!(2025 - 01 - 01)))
                .expect("history");
        }
        remove_store_files(config.db_path.as_path()).expect("remove");

        let rebuilt = Store::open(config).expect("reopen");
        assert_eq!(rebuilt.history_count("usda").expect("count"), 0);
    }

    #[test]
    fn dates_round_trip_through_text() {
        let parsed = parse_date("2025-12-31").expect("parse");
        assert_eq!(parsed, date!(2025 - 12 - 31));
        assert_eq!(format_date(parsed), "2025-12-31");
        assert!(parse_date("31/12/2025").is_err());
    }
}
