//! # Gleaner Core
//!
//! Resilient collection of public datasets from unreliable upstream sources.
//!
//! ## Overview
//!
//! A dataset is served by several interchangeable sources. For each request
//! this crate:
//!
//! - **Routes** through sources in priority order and falls back on failure
//! - **Retries** transient failures with backoff, honoring `Retry-After`
//! - **Paces** requests per source so concurrent callers never burst
//! - **Caches** results in a volatile region and a permanent history region
//! - **Serves stale data** when every live source fails, flagged as stale
//! - **Detects layout drift** before a parser sees a changed document
//! - **Records provenance** for every result
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Freshness policies and the two-region store facade |
//! | [`circuit_breaker`] | Per-source circuit breaker |
//! | [`collaborator`] | Fetcher, parser and contract validator seams |
//! | [`config`] | File and environment configuration |
//! | [`context`] | Live, offline and snapshot execution contexts |
//! | [`error`] | Error taxonomy |
//! | [`fingerprint`] | Structural fingerprinting and drift gate |
//! | [`http_client`] | reqwest-backed fetcher |
//! | [`provenance`] | Attempts, warnings and provenance records |
//! | [`query`] | Queries and cache keys |
//! | [`retry`] | Backoff policies and the retry executor |
//! | [`routing`] | Dataset plans and the fallback orchestrator |
//! | [`source`] | Source identifiers and specs |
//! | [`telemetry`] | Tracing setup |
//! | [`throttling`] | Per-source rate limiting |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gleaner_core::{
//!     DatasetPlan, ExecutionContext, FallbackOrchestrator, GleanerConfig, HttpFetcher, Query,
//!     Source, SourceId,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     gleaner_core::telemetry::init_tracing();
//!     let config = GleanerConfig::load()?;
//!     let orchestrator = FallbackOrchestrator::from_config(&config).await;
//!
//!     let usda = SourceId::parse("usda")?;
//!     let spec = config.source(&usda).cloned().ok_or("usda not configured")?;
//!     let fetcher = HttpFetcher::new("https://example.test/prices/{crop}")?;
//!     let plan = DatasetPlan::new(
//!         "crop_prices",
//!         vec![Source::new(spec, Arc::new(fetcher), Arc::new(parse_prices))],
//!     )?;
//!
//!     let query = Query::new("crop_prices")?.with_param("crop", "corn");
//!     let fetched = orchestrator.fetch(&plan, &query, &config.execution_context()).await?;
//!     println!("{} rows from {}", fetched.records.len(), fetched.provenance.selected_source);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every failure is a [`FetchError`] with a stable [`FetchError::code`] and an
//! [`ErrorCategory`]:
//!
//! ```rust
//! use gleaner_core::{ErrorCategory, FetchError};
//!
//! fn handle_error(error: &FetchError) {
//!     match error.category() {
//!         ErrorCategory::Network => {
//!             // Upstream trouble; all sources and caches were exhausted
//!         }
//!         ErrorCategory::Parse | ErrorCategory::Contract => {
//!             // The upstream changed shape
//!         }
//!         ErrorCategory::Unexpected => {}
//!     }
//! }
//! ```

pub mod cache;
pub mod circuit_breaker;
pub mod collaborator;
pub mod config;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod http_client;
pub mod provenance;
pub mod query;
pub mod retry;
pub mod routing;
pub mod source;
pub mod telemetry;
pub mod throttling;

// Caching
pub use cache::{
    CacheMode, CacheStore, CachedEntry, FreshnessPolicy, FreshnessRule, HistoryEntry,
    HistoryWrite, TimeOfDay,
};
pub use gleaner_store::{RegionStats, SourceOutcomes, StoreConfig};

// Resilience
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{Backoff, RetryConfig, RetryExecutor};
pub use throttling::{RateLimiter, RateSlot};

// Collaborators
pub use collaborator::{ContractValidator, FetchFuture, Fetcher, Parsed, Parser, RawDocument};
pub use http_client::{HttpAuth, HttpFetcher, HttpTimeouts};

// Configuration and context
pub use config::{ConfigError, GleanerConfig, SourceSettings};
pub use context::{DeterministicContext, ExecutionContext};

// Errors
pub use error::{CacheError, ErrorCategory, FetchError, ValidationError};

// Drift detection
pub use fingerprint::{
    Baseline, BaselineStore, Feature, FeatureScores, FeatureWeights, Fingerprint,
    FingerprintMonitor, GateOutcome, StructuralFeatures, Thresholds, Verdict,
};

// Requests and results
pub use provenance::{AttemptOutcome, FetchAttempt, Fetched, Provenance, ServedFrom, Warning};
pub use query::{CacheKey, Query};
pub use routing::{DatasetPlan, FallbackOrchestrator, FallbackStep, RecordKey, StaleFallbackOrder};
pub use source::{Source, SourceId, SourceSpec};
