//! Shared fixtures for the behavior suites.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use gleaner_core::{
    CacheStore, FetchError, FetchFuture, Fetcher, FreshnessPolicy, Parsed, Query, RawDocument,
    RetryConfig, Source, SourceId, SourceSpec, StoreConfig,
};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use time::Date;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub state: String,
    pub price: f64,
    pub date: Date,
}

impl PriceRow {
    pub fn new(state: &str, price: f64, date: Date) -> Self {
        Self {
            state: state.to_owned(),
            price,
            date,
        }
    }
}

pub fn document(rows: &[PriceRow]) -> RawDocument {
    RawDocument::from_text(serde_json::to_string(rows).expect("serialize rows"))
        .with_content_type("application/json")
}

pub fn parse_prices(document: &RawDocument) -> Result<Parsed<PriceRow>, FetchError> {
    serde_json::from_slice(document.bytes.as_slice())
        .map(Parsed::complete)
        .map_err(|error| FetchError::parse(format!("invalid price payload: {error}")))
}

/// Fetcher that replays scripted results, then repeats `fallback`.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<RawDocument, FetchError>>>,
    fallback: Result<RawDocument, FetchError>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn always(result: Result<RawDocument, FetchError>) -> Arc<Self> {
        Self::scripted(Vec::new(), result)
    }

    pub fn scripted(
        script: Vec<Result<RawDocument, FetchError>>,
        fallback: Result<RawDocument, FetchError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn slow(result: Result<RawDocument, FetchError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: result,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next(&self) -> Result<RawDocument, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch<'a>(&'a self, _query: &'a Query) -> FetchFuture<'a> {
        Box::pin(async move {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = self.next();
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

pub fn id(value: &str) -> SourceId {
    SourceId::parse(value).expect("source id")
}

/// Spec with no pacing and near-instant retries.
pub fn fast_spec(name: &str, priority: u32) -> SourceSpec {
    SourceSpec::new(id(name), priority)
        .with_rate_limit_interval(Duration::ZERO)
        .with_retry(RetryConfig::fixed(Duration::from_millis(1), 2))
        .with_freshness(FreshnessPolicy::Ttl(Duration::from_secs(3_600)))
}

pub fn source(spec: SourceSpec, fetcher: Arc<ScriptedFetcher>) -> Source<PriceRow> {
    Source::new(spec, fetcher, Arc::new(parse_prices))
}

pub async fn open_store() -> (TempDir, CacheStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let cache = CacheStore::open(StoreConfig::in_home(temp.path())).await;
    assert!(!cache.is_degraded().await, "fresh store must open cleanly");
    (temp, cache)
}

pub fn unavailable() -> Result<RawDocument, FetchError> {
    Err(FetchError::http_status(503, None))
}
