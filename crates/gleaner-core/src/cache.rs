//! Volatile cache and permanent history, with freshness policy.
//!
//! [`CacheStore`] is the async policy layer over [`gleaner_store::Store`].
//! It decides freshness, applies the execution context (bypass, snapshot
//! cutoff, write suppression) and moves every blocking `DuckDB` call onto
//! `spawn_blocking`.
//!
//! # Degradation
//!
//! A store that cannot be opened or fails with an engine or I/O error is
//! marked degraded. Every later call fails fast with
//! [`CacheError::Degraded`] and the orchestrator keeps serving from the
//! network. An operator recovers with [`CacheStore::rebuild`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use gleaner_store::{
    remove_store_files, FetchLogRow, HistoryRow, RegionStats, SourceOutcomes, Store, StoreConfig,
    StoreError, VolatileRow,
};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, Time, UtcOffset};
use tokio::sync::RwLock;

use crate::context::ExecutionContext;
use crate::query::CacheKey;
use crate::source::SourceId;
use crate::{CacheError, ValidationError};

/// Defines how a request interacts with the volatile cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Serve a fresh entry when present; otherwise fetch and write through. (Default)
    #[default]
    Use,
    /// Skip the fresh-entry lookup, fetch, and write the new result.
    Refresh,
    /// Never read from or write to the store.
    Bypass,
}

/// Pluggable freshness decision for sources with unusual publication rules.
pub trait FreshnessRule: Send + Sync + Debug {
    fn is_fresh(&self, collected_at: OffsetDateTime, now: OffsetDateTime) -> bool;

    /// Stored with each entry as its `ttl_class`.
    fn label(&self) -> String;
}

/// Daily publication boundary, `HH:MM` at a fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    time: Time,
    offset: UtcOffset,
}

impl TimeOfDay {
    pub fn parse(value: &str, offset: UtcOffset) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidTimeOfDay {
            value: value.to_owned(),
        };

        let (hour, minute) = value.trim().split_once(':').ok_or_else(invalid)?;
        if hour.len() != 2 || minute.len() != 2 {
            return Err(invalid());
        }
        let hour: u8 = hour.parse().map_err(|_| invalid())?;
        let minute: u8 = minute.parse().map_err(|_| invalid())?;
        let time = Time::from_hms(hour, minute, 0).map_err(|_| invalid())?;

        Ok(Self { time, offset })
    }

    /// First boundary strictly after `instant`.
    pub fn next_after(&self, instant: OffsetDateTime) -> OffsetDateTime {
        let local = instant.to_offset(self.offset);
        let candidate = local.replace_time(self.time);
        if candidate > local {
            candidate
        } else {
            candidate + time::Duration::DAY
        }
    }

    fn label(&self) -> String {
        let (hours, minutes, _) = self.offset.as_hms();
        format!(
            "until:{:02}:{:02}{:+03}:{:02}",
            self.time.hour(),
            self.time.minute(),
            hours,
            minutes.unsigned_abs()
        )
    }
}

/// Per-source freshness policy for volatile entries.
#[derive(Debug, Clone)]
pub enum FreshnessPolicy {
    /// Fresh for a fixed duration after collection.
    Ttl(Duration),
    /// Fresh until the next daily publication boundary after collection.
    FreshUntil(TimeOfDay),
    /// Never expires.
    Permanent,
    Custom(Arc<dyn FreshnessRule>),
}

impl FreshnessPolicy {
    /// `HH:MM` boundary in UTC.
    pub fn fresh_until(value: &str) -> Result<Self, ValidationError> {
        TimeOfDay::parse(value, UtcOffset::UTC).map(Self::FreshUntil)
    }

    pub fn is_fresh(&self, collected_at: OffsetDateTime, now: OffsetDateTime) -> bool {
        match self {
            Self::Ttl(ttl) => {
                let age_ms = (now - collected_at).whole_milliseconds();
                age_ms < i128::try_from(ttl.as_millis()).unwrap_or(i128::MAX)
            }
            Self::FreshUntil(boundary) => now < boundary.next_after(collected_at),
            Self::Permanent => true,
            Self::Custom(rule) => rule.is_fresh(collected_at, now),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Ttl(ttl) => format!("ttl:{}s", ttl.as_secs()),
            Self::FreshUntil(boundary) => boundary.label(),
            Self::Permanent => String::from("permanent"),
            Self::Custom(rule) => rule.label(),
        }
    }
}

/// A volatile entry as seen by one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub key: CacheKey,
    pub payload: String,
    pub is_fresh: bool,
    pub ttl_class: String,
    pub business_date: Date,
    pub collected_at: OffsetDateTime,
}

/// A permanent history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub source: SourceId,
    pub natural_key: String,
    pub payload: String,
    pub business_date: Date,
    pub collected_at: OffsetDateTime,
}

/// One history upsert. Missing timestamps default to now; a missing
/// business date defaults to the UTC date of collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryWrite {
    pub source: SourceId,
    pub natural_key: String,
    pub payload: String,
    pub business_date: Option<Date>,
    pub collected_at: Option<OffsetDateTime>,
}

impl HistoryWrite {
    pub fn new(source: SourceId, natural_key: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            source,
            natural_key: natural_key.into(),
            payload: payload.into(),
            business_date: None,
            collected_at: None,
        }
    }

    pub fn with_business_date(mut self, business_date: Date) -> Self {
        self.business_date = Some(business_date);
        self
    }

    pub fn with_collected_at(mut self, collected_at: OffsetDateTime) -> Self {
        self.collected_at = Some(collected_at);
        self
    }

    fn into_row(self, now: OffsetDateTime) -> HistoryRow {
        let collected_at = self.collected_at.unwrap_or(now);
        HistoryRow {
            source: String::from(self.source),
            natural_key: self.natural_key,
            payload: self.payload,
            business_date: self
                .business_date
                .unwrap_or_else(|| collected_at.to_offset(UtcOffset::UTC).date()),
            collected_at_ms: unix_millis(collected_at),
        }
    }
}

enum StoreState {
    Ready(Store),
    Degraded { reason: String },
}

struct CacheInner {
    config: StoreConfig,
    state: RwLock<StoreState>,
}

/// Thread-safe handle to the volatile and history regions.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<CacheInner>,
}

impl CacheStore {
    /// Open the store at `config`. Never fails: an unusable store starts degraded.
    pub async fn open(config: StoreConfig) -> Self {
        let opened = {
            let config = config.clone();
            tokio::task::spawn_blocking(move || Store::open(config)).await
        };

        let state = match opened {
            Ok(Ok(store)) => StoreState::Ready(store),
            Ok(Err(error)) => {
                tracing::warn!(
                    db_path = %config.db_path.display(),
                    error = %error,
                    "cache store unavailable, running network-only"
                );
                StoreState::Degraded {
                    reason: error.to_string(),
                }
            }
            Err(error) => StoreState::Degraded {
                reason: format!("store open task failed: {error}"),
            },
        };

        Self {
            inner: Arc::new(CacheInner {
                config,
                state: RwLock::new(state),
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub async fn is_degraded(&self) -> bool {
        matches!(&*self.inner.state.read().await, StoreState::Degraded { .. })
    }

    /// Look up the volatile entry for `key`.
    ///
    /// Returns stale entries too, with `is_fresh == false`; the caller decides
    /// whether stale data is acceptable. Entries past the snapshot cutoff are
    /// treated as absent.
    pub async fn get(
        &self,
        key: &CacheKey,
        policy: &FreshnessPolicy,
        context: &ExecutionContext,
    ) -> Result<Option<CachedEntry>, CacheError> {
        if context.cache_mode() == CacheMode::Bypass {
            return Ok(None);
        }

        let source = key.source.as_str().to_owned();
        let canonical_query = key.canonical_query.clone();
        let cutoff = context.cutoff();
        let row = self
            .run("get", move |store| {
                store.get_entry(source.as_str(), canonical_query.as_str(), cutoff)
            })
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let collected_at = from_unix_millis(row.collected_at_ms)?;
        Ok(Some(CachedEntry {
            key: key.clone(),
            is_fresh: policy.is_fresh(collected_at, OffsetDateTime::now_utc()),
            payload: row.payload,
            ttl_class: row.ttl_class,
            business_date: row.business_date,
            collected_at,
        }))
    }

    /// Upsert the volatile entry for `key`. Returns `false` when the context
    /// suppresses writes.
    pub async fn put(
        &self,
        key: &CacheKey,
        payload: String,
        policy: &FreshnessPolicy,
        business_date: Option<Date>,
        context: &ExecutionContext,
    ) -> Result<bool, CacheError> {
        if !context.writes_allowed() {
            return Ok(false);
        }

        let now = OffsetDateTime::now_utc();
        let row = VolatileRow {
            source: key.source.as_str().to_owned(),
            canonical_query: key.canonical_query.clone(),
            payload,
            ttl_class: policy.label(),
            business_date: business_date.unwrap_or_else(|| now.date()),
            collected_at_ms: unix_millis(now),
        };
        self.run("put", move |store| store.put_entry(&row)).await?;
        Ok(true)
    }

    /// Upsert one permanent record. Idempotent for repeated identical calls.
    pub async fn append_history(
        &self,
        write: HistoryWrite,
        context: &ExecutionContext,
    ) -> Result<bool, CacheError> {
        if !context.writes_allowed() {
            return Ok(false);
        }

        let row = write.into_row(OffsetDateTime::now_utc());
        self.run("append_history", move |store| store.upsert_history(&row))
            .await?;
        Ok(true)
    }

    /// Upsert many permanent records with one set-based merge. Returns the
    /// number of distinct keys written.
    pub async fn bulk_append_history(
        &self,
        writes: Vec<HistoryWrite>,
        context: &ExecutionContext,
    ) -> Result<usize, CacheError> {
        if writes.is_empty() || !context.writes_allowed() {
            return Ok(0);
        }

        let now = OffsetDateTime::now_utc();
        let rows: Vec<HistoryRow> = writes.into_iter().map(|write| write.into_row(now)).collect();
        self.run("bulk_append_history", move |store| {
            store.bulk_upsert_history(rows.as_slice())
        })
        .await
    }

    pub async fn history_get(
        &self,
        source: &SourceId,
        natural_key: &str,
        context: &ExecutionContext,
    ) -> Result<Option<HistoryEntry>, CacheError> {
        if context.cache_mode() == CacheMode::Bypass {
            return Ok(None);
        }

        let source_name = source.as_str().to_owned();
        let natural_key = natural_key.to_owned();
        let cutoff = context.cutoff();
        let row = self
            .run("history_get", move |store| {
                store.get_history(source_name.as_str(), natural_key.as_str(), cutoff)
            })
            .await?;

        row.map(history_entry).transpose()
    }

    /// History of one source, newest business date first.
    pub async fn history_scan(
        &self,
        source: &SourceId,
        context: &ExecutionContext,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, CacheError> {
        if context.cache_mode() == CacheMode::Bypass {
            return Ok(Vec::new());
        }

        let source_name = source.as_str().to_owned();
        let cutoff = context.cutoff();
        let rows = self
            .run("history_scan", move |store| {
                store.scan_history(source_name.as_str(), cutoff, limit)
            })
            .await?;

        rows.into_iter().map(history_entry).collect()
    }

    pub async fn history_count(&self, source: &SourceId) -> Result<u64, CacheError> {
        let source_name = source.as_str().to_owned();
        self.run("history_count", move |store| {
            store.history_count(source_name.as_str())
        })
        .await
    }

    /// Drop volatile entries collected more than `older_than` ago.
    pub async fn purge_expired(&self, older_than: Duration) -> Result<usize, CacheError> {
        let older_than_ms = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let threshold = unix_millis(OffsetDateTime::now_utc()).saturating_sub(older_than_ms);
        let purged = self
            .run("purge_expired", move |store| store.purge_volatile_before(threshold))
            .await?;
        tracing::info!(purged, "expired volatile entries purged");
        Ok(purged)
    }

    /// Operator action: drop every volatile entry. History is kept.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let cleared = self.run("clear", Store::clear_volatile).await?;
        tracing::info!(cleared, "volatile cache cleared");
        Ok(cleared)
    }

    /// Operator action: delete the database files and recreate an empty
    /// store. Leaves the degraded state on success. History is lost.
    pub async fn rebuild(&self) -> Result<(), CacheError> {
        let mut state = self.inner.state.write().await;
        *state = StoreState::Degraded {
            reason: String::from("rebuild in progress"),
        };

        let config = self.inner.config.clone();
        let rebuilt = tokio::task::spawn_blocking(move || {
            remove_store_files(config.db_path.as_path())?;
            Store::open(config)
        })
        .await
        .map_err(|error| CacheError::Unavailable(format!("store rebuild task failed: {error}")))?;

        match rebuilt {
            Ok(store) => {
                tracing::info!(db_path = %store.db_path().display(), "cache store rebuilt");
                *state = StoreState::Ready(store);
                Ok(())
            }
            Err(error) => {
                tracing::error!(error = %error, "cache store rebuild failed");
                *state = StoreState::Degraded {
                    reason: error.to_string(),
                };
                Err(CacheError::from(error))
            }
        }
    }

    pub async fn log_attempts(&self, rows: Vec<FetchLogRow>) -> Result<(), CacheError> {
        if rows.is_empty() {
            return Ok(());
        }
        self.run("log_attempts", move |store| store.log_attempts(rows.as_slice()))
            .await
    }

    pub async fn stats(&self) -> Result<Vec<RegionStats>, CacheError> {
        self.run("stats", Store::stats).await
    }

    pub async fn source_outcomes(&self) -> Result<Vec<SourceOutcomes>, CacheError> {
        self.run("source_outcomes", Store::source_outcomes).await
    }

    async fn ready_store(&self) -> Result<Store, CacheError> {
        match &*self.inner.state.read().await {
            StoreState::Ready(store) => Ok(store.clone()),
            StoreState::Degraded { reason } => Err(CacheError::Degraded {
                reason: reason.clone(),
            }),
        }
    }

    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.ready_store().await?;
        let result = tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|error| CacheError::Unavailable(format!("store task failed: {error}")))?;

        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                if degrades_store(&error) {
                    self.mark_degraded(operation, &error).await;
                }
                Err(CacheError::from(error))
            }
        }
    }

    async fn mark_degraded(&self, operation: &'static str, error: &StoreError) {
        let mut state = self.inner.state.write().await;
        if matches!(&*state, StoreState::Ready(_)) {
            tracing::warn!(
                operation,
                error = %error,
                "cache store degraded, running network-only until rebuilt"
            );
            *state = StoreState::Degraded {
                reason: error.to_string(),
            };
        }
    }
}

// A single undecodable row is not a reason to stop using the store.
fn degrades_store(error: &StoreError) -> bool {
    !matches!(error, StoreError::InvalidData(_))
}

fn history_entry(row: HistoryRow) -> Result<HistoryEntry, CacheError> {
    Ok(HistoryEntry {
        source: SourceId::parse(row.source.as_str())
            .map_err(|error| CacheError::Decode(error.to_string()))?,
        natural_key: row.natural_key,
        payload: row.payload,
        business_date: row.business_date,
        collected_at: from_unix_millis(row.collected_at_ms)?,
    })
}

pub(crate) fn unix_millis(instant: OffsetDateTime) -> i64 {
    i64::try_from(instant.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

pub(crate) fn from_unix_millis(millis: i64) -> Result<OffsetDateTime, CacheError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(|error| CacheError::Decode(format!("invalid collection timestamp {millis}: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use time::macros::{date, datetime, offset};

    use crate::query::Query;

    fn key(source: &str) -> CacheKey {
        let query = Query::new("prices").expect("query").with_param("crop", "corn");
        CacheKey::new(SourceId::parse(source).expect("id"), &query)
    }

    async fn open_temp() -> (tempfile::TempDir, CacheStore) {
        let temp = tempdir().expect("tempdir");
        let cache = CacheStore::open(StoreConfig::in_home(temp.path())).await;
        assert!(!cache.is_degraded().await);
        (temp, cache)
    }

    #[test]
    fn ttl_policy_expires_after_duration() {
        let policy = FreshnessPolicy::Ttl(Duration::from_secs(60));
        let collected = datetime!(2025-10-01 12:00 UTC);

        assert!(policy.is_fresh(collected, datetime!(2025-10-01 12:00:59 UTC)));
        assert!(!policy.is_fresh(collected, datetime!(2025-10-01 12:01 UTC)));
        assert_eq!(policy.label(), "ttl:60s");
    }

    #[test]
    fn fresh_until_policy_expires_at_next_boundary() {
        let policy = FreshnessPolicy::fresh_until("10:00").expect("policy");

        let before_release = datetime!(2025-10-01 09:00 UTC);
        assert!(policy.is_fresh(before_release, datetime!(2025-10-01 09:59 UTC)));
        assert!(!policy.is_fresh(before_release, datetime!(2025-10-01 10:00 UTC)));

        let after_release = datetime!(2025-10-01 10:30 UTC);
        assert!(policy.is_fresh(after_release, datetime!(2025-10-02 09:59 UTC)));
        assert!(!policy.is_fresh(after_release, datetime!(2025-10-02 10:00 UTC)));
    }

    #[test]
    fn fresh_until_respects_offset() {
        let boundary = TimeOfDay::parse("10:00", offset!(-3)).expect("time of day");
        let next = boundary.next_after(datetime!(2025-10-01 12:00 UTC));
        assert_eq!(next, datetime!(2025-10-01 13:00 UTC));
        assert_eq!(FreshnessPolicy::FreshUntil(boundary).label(), "until:10:00-03:00");
    }

    #[test]
    fn malformed_time_of_day_is_rejected() {
        for value in ["25:00", "10", "10:60", "1:00", "ab:cd"] {
            assert!(
                FreshnessPolicy::fresh_until(value).is_err(),
                "{value} should be rejected"
            );
        }
    }

    #[derive(Debug)]
    struct WeekdaysOnly;

    impl FreshnessRule for WeekdaysOnly {
        fn is_fresh(&self, _collected_at: OffsetDateTime, now: OffsetDateTime) -> bool {
            !matches!(now.weekday(), time::Weekday::Saturday | time::Weekday::Sunday)
        }

        fn label(&self) -> String {
            String::from("custom:weekdays")
        }
    }

    #[test]
    fn custom_rule_is_consulted() {
        let policy = FreshnessPolicy::Custom(Arc::new(WeekdaysOnly));
        let collected = datetime!(2025-10-01 00:00 UTC);
        assert!(policy.is_fresh(collected, datetime!(2025-10-03 12:00 UTC)));
        assert!(!policy.is_fresh(collected, datetime!(2025-10-04 12:00 UTC)));
        assert_eq!(policy.label(), "custom:weekdays");
    }

    #[tokio::test]
    async fn put_then_get_reports_freshness() {
        let (_temp, cache) = open_temp().await;
        let context = ExecutionContext::live();
        let key = key("usda");

        let written = cache
            .put(&key, String::from("[1,2]"), &FreshnessPolicy::Permanent, None, &context)
            .await
            .expect("put");
        assert!(written);

        let entry = cache
            .get(&key, &FreshnessPolicy::Permanent, &context)
            .await
            .expect("get")
            .expect("entry present");
        assert_eq!(entry.payload, "[1,2]");
        assert!(entry.is_fresh);
        assert_eq!(entry.ttl_class, "permanent");

        let expired = cache
            .get(&key, &FreshnessPolicy::Ttl(Duration::ZERO), &context)
            .await
            .expect("get")
            .expect("stale entry still returned");
        assert!(!expired.is_fresh);
    }

    #[tokio::test]
    async fn bypass_mode_neither_reads_nor_writes() {
        let (_temp, cache) = open_temp().await;
        let key = key("usda");
        let bypass = ExecutionContext::live().with_cache_mode(CacheMode::Bypass);

        let written = cache
            .put(&key, String::from("[]"), &FreshnessPolicy::Permanent, None, &bypass)
            .await
            .expect("put");
        assert!(!written);

        cache
            .put(&key, String::from("[]"), &FreshnessPolicy::Permanent, None, &ExecutionContext::live())
            .await
            .expect("put");
        assert!(cache
            .get(&key, &FreshnessPolicy::Permanent, &bypass)
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn snapshot_scope_suppresses_writes_and_filters_reads() {
        let (_temp, cache) = open_temp().await;
        let source = SourceId::parse("conab").expect("id");
        let live = ExecutionContext::live();
        let snapshot = ExecutionContext::deterministic(date!(2025 - 12 - 31), "close");

        cache
            .append_history(
                HistoryWrite::new(source.clone(), "soy:2026-01-02", "{}")
                    .with_business_date(date!(2026 - 01 - 02)),
                &live,
            )
            .await
            .expect("append");
        let suppressed = cache
            .append_history(HistoryWrite::new(source.clone(), "soy:2025-06-01", "{}"), &snapshot)
            .await
            .expect("append");

        assert!(!suppressed);
        assert_eq!(cache.history_count(&source).await.expect("count"), 1);
        assert!(cache
            .history_get(&source, "soy:2026-01-02", &snapshot)
            .await
            .expect("get")
            .is_none());
        assert!(cache
            .history_get(&source, "soy:2026-01-02", &live)
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn unusable_path_degrades_to_network_only() {
        let temp = tempdir().expect("tempdir");
        let config = StoreConfig {
            gleaner_home: temp.path().to_path_buf(),
            db_path: temp.path().to_path_buf(),
        };

        let cache = CacheStore::open(config).await;
        assert!(cache.is_degraded().await);

        let error = cache
            .get(&key("usda"), &FreshnessPolicy::Permanent, &ExecutionContext::live())
            .await
            .expect_err("degraded store refuses reads");
        assert!(matches!(error, CacheError::Degraded { .. }));
    }

    #[tokio::test]
    async fn rebuild_recreates_an_empty_store() {
        let (_temp, cache) = open_temp().await;
        let context = ExecutionContext::live();
        let key = key("usda");
        cache
            .put(&key, String::from("[]"), &FreshnessPolicy::Permanent, None, &context)
            .await
            .expect("put");

        cache.rebuild().await.expect("rebuild");

        assert!(!cache.is_degraded().await);
        assert!(cache
            .get(&key, &FreshnessPolicy::Permanent, &context)
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn clear_keeps_history() {
        let (_temp, cache) = open_temp().await;
        let context = ExecutionContext::live();
        let key = key("usda");
        cache
            .put(&key, String::from("[]"), &FreshnessPolicy::Permanent, None, &context)
            .await
            .expect("put");
        cache
            .append_history(HistoryWrite::new(key.source.clone(), "corn", "[]"), &context)
            .await
            .expect("append");

        assert_eq!(cache.clear().await.expect("clear"), 1);
        assert_eq!(cache.history_count(&key.source).await.expect("count"), 1);
    }

    #[test]
    fn millis_round_trip() {
        let instant = datetime!(2025-10-01 12:34:56.789 UTC);
        let restored = from_unix_millis(unix_millis(instant)).expect("valid");
        assert_eq!(restored, instant);
    }
}
