//! Source fallback orchestration.
//!
//! One request walks an explicit list of [`FallbackStep`]s in a single loop:
//!
//! 1. fresh volatile entry (skipped in refresh mode)
//! 2. every live source, strictly by ascending priority
//! 3. stale volatile entry and permanent history, in [`StaleFallbackOrder`]
//!
//! The first step that yields records wins. Live steps are skipped entirely
//! when the context forbids the network (offline or snapshot scope). Only
//! live sources produce [`FetchAttempt`]s.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gleaner_store::FetchLogRow;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::cache::{CacheMode, CacheStore, HistoryWrite};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakers};
use crate::collaborator::ContractValidator;
use crate::config::GleanerConfig;
use crate::context::ExecutionContext;
use crate::fingerprint::{FingerprintMonitor, GateOutcome};
use crate::provenance::{FetchAttempt, Fetched, Provenance, ServedFrom, Warning};
use crate::query::{CacheKey, Query};
use crate::retry::RetryExecutor;
use crate::source::{Source, SourceId};
use crate::throttling::RateLimiter;
use crate::{CacheError, ErrorCategory, FetchError, ValidationError};

/// Which cached region to try first once every live source has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleFallbackOrder {
    /// Expired volatile entry first; it is usually the more recent data. (Default)
    #[default]
    StaleCacheFirst,
    HistoryFirst,
}

impl StaleFallbackOrder {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StaleCacheFirst => "stale_cache_first",
            Self::HistoryFirst => "history_first",
        }
    }
}

impl FromStr for StaleFallbackOrder {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stale_cache_first" | "stale-cache-first" => Ok(Self::StaleCacheFirst),
            "history_first" | "history-first" => Ok(Self::HistoryFirst),
            other => Err(ValidationError::InvalidStaleOrder {
                value: other.to_owned(),
            }),
        }
    }
}

/// One step of the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStep {
    FreshCache,
    /// Index into the plan's priority-sorted sources.
    Live(usize),
    StaleCache,
    History,
}

/// Permanent-history identity of one parsed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    pub natural_key: String,
    pub business_date: Option<Date>,
}

type RecordKeyFn<T> = Arc<dyn Fn(&T) -> Option<RecordKey> + Send + Sync>;
type BusinessDateFn<T> = Arc<dyn Fn(&T) -> Option<Date> + Send + Sync>;

/// Ordered, non-empty source list for one dataset.
pub struct DatasetPlan<T> {
    name: String,
    sources: Vec<Source<T>>,
    validator: Option<Arc<dyn ContractValidator<T>>>,
    record_key: Option<RecordKeyFn<T>>,
    business_date: Option<BusinessDateFn<T>>,
}

impl<T> DatasetPlan<T> {
    /// Sources are sorted by ascending priority; ties keep declaration order.
    ///
    /// # Errors
    /// An empty list or a repeated source id is a configuration error.
    pub fn new(name: impl Into<String>, mut sources: Vec<Source<T>>) -> Result<Self, FetchError> {
        let name = name.into();
        if sources.is_empty() {
            return Err(FetchError::configuration(format!(
                "dataset '{name}' has no sources"
            )));
        }

        let mut seen = HashSet::with_capacity(sources.len());
        if let Some(duplicate) = sources.iter().find(|source| !seen.insert(source.id().clone())) {
            return Err(FetchError::configuration(format!(
                "dataset '{name}' lists source '{}' more than once",
                duplicate.id()
            )));
        }

        sources.sort_by_key(|source| source.priority());
        Ok(Self {
            name,
            sources,
            validator: None,
            record_key: None,
            business_date: None,
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn ContractValidator<T>>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Upsert every parsed record into history under the extracted key.
    pub fn with_record_key<F>(mut self, extract: F) -> Self
    where
        F: Fn(&T) -> Option<RecordKey> + Send + Sync + 'static,
    {
        self.record_key = Some(Arc::new(extract));
        self
    }

    /// Per-record business date, used to drop records past a snapshot cutoff.
    pub fn with_business_date<F>(mut self, extract: F) -> Self
    where
        F: Fn(&T) -> Option<Date> + Send + Sync + 'static,
    {
        self.business_date = Some(Arc::new(extract));
        self
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn sources(&self) -> &[Source<T>] {
        self.sources.as_slice()
    }
}

struct Served<T> {
    source: SourceId,
    records: Vec<T>,
    served_from: ServedFrom,
    fetched_at: OffsetDateTime,
    cache_key: Option<CacheKey>,
    warnings: Vec<Warning>,
}

/// Drives one dataset request through its fallback chain.
pub struct FallbackOrchestrator {
    cache: CacheStore,
    limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakers>,
    fingerprints: Option<Arc<FingerprintMonitor>>,
    stale_order: StaleFallbackOrder,
}

impl FallbackOrchestrator {
    pub fn new(cache: CacheStore) -> Self {
        Self {
            cache,
            limiter: Arc::new(RateLimiter::new(Duration::ZERO)),
            breakers: Arc::new(CircuitBreakers::default()),
            fingerprints: None,
            stale_order: StaleFallbackOrder::default(),
        }
    }

    /// Orchestrator over the configured store, baseline directory and fallback order.
    pub async fn from_config(config: &GleanerConfig) -> Self {
        let cache = CacheStore::open(config.store.clone()).await;
        Self::new(cache)
            .with_fingerprint_monitor(Arc::new(FingerprintMonitor::new(config.baseline_dir.clone())))
            .with_stale_order(config.stale_order)
    }

    /// Share one limiter across orchestrators so pacing holds process-wide.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_circuit_breakers(mut self, config: CircuitBreakerConfig) -> Self {
        self.breakers = Arc::new(CircuitBreakers::new(config));
        self
    }

    pub fn with_fingerprint_monitor(mut self, monitor: Arc<FingerprintMonitor>) -> Self {
        self.fingerprints = Some(monitor);
        self
    }

    pub fn with_stale_order(mut self, order: StaleFallbackOrder) -> Self {
        self.stale_order = order;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The ordered steps a request with `context` will evaluate.
    pub fn steps<T>(&self, plan: &DatasetPlan<T>, context: &ExecutionContext) -> Vec<FallbackStep> {
        let mode = context.cache_mode();
        let mut steps = Vec::with_capacity(plan.sources.len() + 3);

        if context.network_allowed() {
            if mode == CacheMode::Use {
                steps.push(FallbackStep::FreshCache);
            }
            steps.extend((0..plan.sources.len()).map(FallbackStep::Live));
        }

        if mode != CacheMode::Bypass {
            match self.stale_order {
                StaleFallbackOrder::StaleCacheFirst => {
                    steps.extend([FallbackStep::StaleCache, FallbackStep::History]);
                }
                StaleFallbackOrder::HistoryFirst => {
                    steps.extend([FallbackStep::History, FallbackStep::StaleCache]);
                }
            }
        }

        steps
    }

    /// Fetch `query` for `plan`.
    ///
    /// # Errors
    /// [`FetchError::SourceUnavailable`] with every live attempt when no step
    /// produced records.
    pub async fn fetch<T>(
        &self,
        plan: &DatasetPlan<T>,
        query: &Query,
        context: &ExecutionContext,
    ) -> Result<Fetched<T>, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let started = Instant::now();
        let steps = self.steps(plan, context);
        let mut attempts: Vec<FetchAttempt> = Vec::new();
        tracing::debug!(
            dataset = plan.name(),
            request_id = context.request_id(),
            steps = steps.len(),
            offline = context.is_offline(),
            snapshot = ?context.cutoff(),
            "fetch started"
        );

        for step in steps {
            let served = match step {
                FallbackStep::FreshCache => self.from_volatile(plan, query, context, true).await,
                FallbackStep::StaleCache => self.from_volatile(plan, query, context, false).await,
                FallbackStep::History => self.from_history(plan, query, context).await,
                FallbackStep::Live(index) => {
                    let source = &plan.sources[index];
                    match self.fetch_live(plan, source, query).await {
                        Ok((served, attempt)) => {
                            attempts.push(attempt);
                            self.write_through(plan, source, query, context, served.records.as_slice())
                                .await;
                            Some(served)
                        }
                        Err(attempt) => {
                            attempts.push(attempt);
                            None
                        }
                    }
                }
            };

            if let Some(served) = served {
                self.record_attempts(plan, context, &attempts).await;
                return Ok(self.finish(plan, context, served, attempts, started));
            }
        }

        self.record_attempts(plan, context, &attempts).await;
        tracing::error!(
            dataset = plan.name(),
            request_id = context.request_id(),
            attempts = attempts.len(),
            "every fallback step failed"
        );
        Err(FetchError::SourceUnavailable {
            dataset: plan.name.clone(),
            attempts,
        })
    }

    async fn fetch_live<T>(
        &self,
        plan: &DatasetPlan<T>,
        source: &Source<T>,
        query: &Query,
    ) -> Result<(Served<T>, FetchAttempt), FetchAttempt> {
        let id = source.id();
        let started_at = OffsetDateTime::now_utc();
        let clock = Instant::now();

        let breaker = self.breakers.get(id);
        if !breaker.allow_request() {
            let error = FetchError::network_fatal(format!("circuit open for source '{id}'"));
            tracing::warn!(source = %id, dataset = plan.name(), "circuit open, skipping source");
            return Err(FetchAttempt::failure(id.clone(), started_at, &error, 0));
        }

        match self.run_source(plan, source, query).await {
            Ok((records, warnings)) => {
                breaker.record_success();
                let duration_ms = elapsed_ms(clock);
                tracing::info!(
                    source = %id,
                    dataset = plan.name(),
                    records = records.len(),
                    duration_ms,
                    "live fetch succeeded"
                );
                let served = Served {
                    source: id.clone(),
                    records,
                    served_from: ServedFrom::Live,
                    fetched_at: OffsetDateTime::now_utc(),
                    cache_key: Some(CacheKey::new(id.clone(), query)),
                    warnings,
                };
                Ok((served, FetchAttempt::success(id.clone(), started_at, duration_ms)))
            }
            Err(error) => {
                if error.category() == ErrorCategory::Network && breaker.record_failure() {
                    tracing::warn!(source = %id, "circuit opened after repeated network failures");
                }
                tracing::warn!(
                    source = %id,
                    dataset = plan.name(),
                    category = error.category().as_str(),
                    error = %error,
                    "source failed, falling back"
                );
                Err(FetchAttempt::failure(id.clone(), started_at, &error, elapsed_ms(clock)))
            }
        }
    }

    async fn run_source<T>(
        &self,
        plan: &DatasetPlan<T>,
        source: &Source<T>,
        query: &Query,
    ) -> Result<(Vec<T>, Vec<Warning>), FetchError> {
        let spec = source.spec();
        let id = &spec.id;
        let limiter = self.limiter.as_ref();
        let fetcher = source.fetcher();
        limiter.register(id, spec.rate_limit_interval);

        let attempt_timeout = spec.attempt_timeout;

        let executor = RetryExecutor::new(spec.retry.clone());
        let document = executor
            .execute(|attempt| async move {
                let _slot = limiter.acquire(id).await;
                tracing::debug!(source = %id, attempt, "fetch attempt");
                match attempt_timeout {
                    Some(limit) => tokio::time::timeout(limit, fetcher.fetch(query))
                        .await
                        .unwrap_or_else(|_| {
                            Err(FetchError::network(format!(
                                "fetch attempt timed out after {}ms",
                                limit.as_millis()
                            )))
                        }),
                    None => fetcher.fetch(query).await,
                }
            })
            .await?;

        let mut warnings = Vec::new();
        if spec.fingerprint_gate {
            match self.fingerprints.as_ref() {
                Some(monitor) => {
                    if let GateOutcome::Warn(fingerprint) = monitor.gate(id, &document)? {
                        warnings.push(Warning::LayoutChange {
                            source: id.clone(),
                            similarity: fingerprint.similarity,
                        });
                    }
                }
                None => tracing::debug!(source = %id, "fingerprint gate requested without a monitor"),
            }
        }

        let parsed = source.parser().parse(&document)?;
        if let Some(validator) = plan.validator.as_ref() {
            let contract = spec.contract.as_deref().unwrap_or(plan.name());
            validator.validate(parsed.records.as_slice(), contract)?;
        }

        if let Some(reason) = parsed.partial {
            tracing::warn!(source = %id, reason = reason.as_str(), "partial data parsed");
            warnings.push(Warning::PartialData {
                source: id.clone(),
                reason,
            });
        }
        if let Some(parser) = parsed.parser_fallback {
            tracing::warn!(source = %id, parser = parser.as_str(), "parser fallback used");
            warnings.push(Warning::ParserFallback {
                source: id.clone(),
                parser,
            });
        }

        Ok((parsed.records, warnings))
    }

    async fn from_volatile<T>(
        &self,
        plan: &DatasetPlan<T>,
        query: &Query,
        context: &ExecutionContext,
        fresh_only: bool,
    ) -> Option<Served<T>>
    where
        T: DeserializeOwned,
    {
        for source in &plan.sources {
            let spec = source.spec();
            let key = CacheKey::new(spec.id.clone(), query);
            let entry = match self.cache.get(&key, &spec.freshness, context).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(error) => {
                    log_cache_error("volatile lookup", &error);
                    return None;
                }
            };

            if fresh_only && !entry.is_fresh {
                continue;
            }

            let records: Vec<T> = match serde_json::from_str(entry.payload.as_str()) {
                Ok(records) => records,
                Err(error) => {
                    tracing::warn!(cache_key = %key, error = %error, "cached payload undecodable, skipping");
                    continue;
                }
            };

            let mut warnings = Vec::new();
            let served_from = if entry.is_fresh {
                ServedFrom::FreshCache
            } else {
                if context.network_allowed() {
                    warnings.push(stale_warning(&spec.id, ServedFrom::StaleCache, entry.collected_at));
                }
                tracing::warn!(
                    source = %spec.id,
                    dataset = plan.name(),
                    ttl_class = entry.ttl_class.as_str(),
                    "serving expired cache entry"
                );
                ServedFrom::StaleCache
            };

            return Some(Served {
                source: spec.id.clone(),
                records: self.within_cutoff(plan, context, records),
                served_from,
                fetched_at: entry.collected_at,
                cache_key: Some(key),
                warnings,
            });
        }
        None
    }

    async fn from_history<T>(
        &self,
        plan: &DatasetPlan<T>,
        query: &Query,
        context: &ExecutionContext,
    ) -> Option<Served<T>>
    where
        T: DeserializeOwned,
    {
        let natural_key = query.natural_key()?;

        for source in &plan.sources {
            let id = source.id();
            let entry = match self.cache.history_get(id, natural_key, context).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(error) => {
                    log_cache_error("history lookup", &error);
                    return None;
                }
            };

            let Some(records) = decode_history::<T>(entry.payload.as_str()) else {
                tracing::warn!(source = %id, natural_key, "history payload undecodable, skipping");
                continue;
            };

            let mut warnings = Vec::new();
            if context.network_allowed() {
                warnings.push(stale_warning(id, ServedFrom::History, entry.collected_at));
            }
            tracing::warn!(source = %id, dataset = plan.name(), natural_key, "serving permanent history");

            return Some(Served {
                source: id.clone(),
                records: self.within_cutoff(plan, context, records),
                served_from: ServedFrom::History,
                fetched_at: entry.collected_at,
                cache_key: None,
                warnings,
            });
        }
        None
    }

    async fn write_through<T>(
        &self,
        plan: &DatasetPlan<T>,
        source: &Source<T>,
        query: &Query,
        context: &ExecutionContext,
        records: &[T],
    ) where
        T: Serialize,
    {
        if !context.writes_allowed() {
            return;
        }

        let spec = source.spec();
        let payload = match serde_json::to_string(records) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(source = %spec.id, error = %error, "records not serializable, skipping cache write");
                return;
            }
        };

        let key = CacheKey::new(spec.id.clone(), query);
        if let Err(error) = self
            .cache
            .put(&key, payload.clone(), &spec.freshness, query.business_date(), context)
            .await
        {
            log_cache_error("volatile write", &error);
        }

        if let Some(natural_key) = query.natural_key() {
            let mut write = HistoryWrite::new(spec.id.clone(), natural_key, payload);
            if let Some(business_date) = query.business_date() {
                write = write.with_business_date(business_date);
            }
            if let Err(error) = self.cache.append_history(write, context).await {
                log_cache_error("history write", &error);
            }
        }

        if let Some(extract) = plan.record_key.as_ref() {
            let writes: Vec<HistoryWrite> = records
                .iter()
                .filter_map(|record| {
                    let key = extract(record)?;
                    let payload = serde_json::to_string(record).ok()?;
                    let write = HistoryWrite::new(spec.id.clone(), key.natural_key, payload);
                    Some(match key.business_date {
                        Some(business_date) => write.with_business_date(business_date),
                        None => write,
                    })
                })
                .collect();

            match self.cache.bulk_append_history(writes, context).await {
                Ok(written) => tracing::debug!(source = %spec.id, written, "record history merged"),
                Err(error) => log_cache_error("record history write", &error),
            }
        }
    }

    async fn record_attempts<T>(
        &self,
        plan: &DatasetPlan<T>,
        context: &ExecutionContext,
        attempts: &[FetchAttempt],
    ) {
        let rows = attempts
            .iter()
            .map(|attempt| FetchLogRow {
                request_id: context.request_id().to_owned(),
                dataset: plan.name.clone(),
                source: attempt.source_name.to_string(),
                outcome: attempt.outcome.as_str().to_owned(),
                error_category: attempt
                    .error_category
                    .map(|category| category.as_str().to_owned()),
                message: attempt.message.clone(),
                duration_ms: attempt.duration_ms,
            })
            .collect::<Vec<_>>();

        if let Err(error) = self.cache.log_attempts(rows).await {
            log_cache_error("attempt log", &error);
        }
    }

    fn within_cutoff<T>(&self, plan: &DatasetPlan<T>, context: &ExecutionContext, mut records: Vec<T>) -> Vec<T> {
        if let (Some(cutoff), Some(extract)) = (context.cutoff(), plan.business_date.as_ref()) {
            let before = records.len();
            records.retain(|record| extract(record).is_none_or(|date| date <= cutoff));
            if records.len() != before {
                tracing::debug!(dropped = before - records.len(), "records past snapshot cutoff dropped");
            }
        }
        records
    }

    fn finish<T>(
        &self,
        plan: &DatasetPlan<T>,
        context: &ExecutionContext,
        served: Served<T>,
        attempts: Vec<FetchAttempt>,
        started: Instant,
    ) -> Fetched<T> {
        let failed = attempts.iter().filter(|attempt| !attempt.succeeded()).count();
        if failed > 0 {
            tracing::info!(
                dataset = plan.name(),
                source = %served.source,
                served_from = ?served.served_from,
                failed_attempts = failed,
                "request satisfied after fallback"
            );
        }

        let provenance = Provenance {
            request_id: context.request_id().to_owned(),
            dataset: plan.name.clone(),
            selected_source: served.source,
            attempted: attempts,
            fetched_at: served.fetched_at,
            from_cache: served.served_from.is_cached(),
            served_from: served.served_from,
            cache_key: served.cache_key,
            records_count: served.records.len(),
            duration_ms: elapsed_ms(started),
            warnings: served.warnings,
        };

        Fetched {
            records: served.records,
            provenance,
        }
    }
}

fn decode_history<T: DeserializeOwned>(payload: &str) -> Option<Vec<T>> {
    serde_json::from_str::<Vec<T>>(payload)
        .ok()
        .or_else(|| serde_json::from_str::<T>(payload).ok().map(|record| vec![record]))
}

fn stale_warning(source: &SourceId, served_from: ServedFrom, collected_at: OffsetDateTime) -> Warning {
    let age = OffsetDateTime::now_utc() - collected_at;
    Warning::StaleData {
        source: source.clone(),
        served_from,
        age_secs: u64::try_from(age.whole_seconds()).unwrap_or(0),
    }
}

fn log_cache_error(operation: &'static str, error: &CacheError) {
    match error {
        CacheError::Degraded { .. } => tracing::debug!(operation, error = %error, "cache skipped"),
        _ => tracing::warn!(operation, error = %error, "cache operation failed"),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
