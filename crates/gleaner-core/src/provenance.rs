//! Provenance records returned with every result.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{ErrorCategory, FetchError};
use crate::query::CacheKey;
use crate::source::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

impl AttemptOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// One live source tried during a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchAttempt {
    pub source_name: SourceId,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub outcome: AttemptOutcome,
    pub error_category: Option<ErrorCategory>,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl FetchAttempt {
    pub fn success(source_name: SourceId, started_at: OffsetDateTime, duration_ms: u64) -> Self {
        Self {
            source_name,
            started_at,
            outcome: AttemptOutcome::Success,
            error_category: None,
            message: None,
            duration_ms,
        }
    }

    pub fn failure(
        source_name: SourceId,
        started_at: OffsetDateTime,
        error: &FetchError,
        duration_ms: u64,
    ) -> Self {
        Self {
            source_name,
            started_at,
            outcome: AttemptOutcome::Failure,
            error_category: Some(error.category()),
            message: Some(error.to_string()),
            duration_ms,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Where the returned records came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedFrom {
    Live,
    FreshCache,
    StaleCache,
    History,
}

impl ServedFrom {
    pub const fn is_cached(self) -> bool {
        !matches!(self, Self::Live)
    }
}

/// Non-fatal conditions attached to an otherwise successful result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Expired data served after the live refresh failed.
    StaleData {
        source: SourceId,
        served_from: ServedFrom,
        age_secs: u64,
    },
    PartialData { source: SourceId, reason: String },
    LayoutChange { source: SourceId, similarity: f64 },
    ParserFallback { source: SourceId, parser: String },
}

impl Warning {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::StaleData { .. } => "warning.stale_data",
            Self::PartialData { .. } => "warning.partial_data",
            Self::LayoutChange { .. } => "warning.layout_change",
            Self::ParserFallback { .. } => "warning.parser_fallback",
        }
    }
}

/// Record of which source satisfied a request and what was attempted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub request_id: String,
    pub dataset: String,
    pub selected_source: SourceId,
    pub attempted: Vec<FetchAttempt>,
    /// Collection time of the returned data.
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    pub from_cache: bool,
    pub served_from: ServedFrom,
    pub cache_key: Option<CacheKey>,
    pub records_count: usize,
    pub duration_ms: u64,
    pub warnings: Vec<Warning>,
}

impl Provenance {
    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|warning| warning.code() == code)
    }

    pub fn is_stale(&self) -> bool {
        self.has_warning("warning.stale_data")
    }
}

/// Records plus their provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fetched<T> {
    pub records: Vec<T>,
    pub provenance: Provenance,
}
