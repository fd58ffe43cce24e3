use std::time::Duration;

use gleaner_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provenance::FetchAttempt;

/// Validation errors for identifiers, policies, and configuration values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("source id cannot be empty")]
    EmptySourceId,
    #[error("source id '{value}' may only contain lowercase ASCII letters, digits, '-' and '_'")]
    InvalidSourceId { value: String },

    #[error("dataset name cannot be empty")]
    EmptyDataset,

    #[error("invalid time of day '{value}', expected HH:MM")]
    InvalidTimeOfDay { value: String },
    #[error("invalid snapshot date '{value}', expected YYYY-MM-DD")]
    InvalidSnapshotDate { value: String },
    #[error("invalid stale fallback order '{value}', expected stale_cache_first or history_first")]
    InvalidStaleOrder { value: String },
    #[error("source '{source_name}' sets both ttl_secs and fresh_until")]
    ConflictingFreshness { source_name: String },

    #[error("feature weights must be non-negative and sum to 1.0 (got {sum})")]
    InvalidWeights { sum: f64 },
    #[error("thresholds must satisfy 0 <= reject_below <= proceed_above <= 1")]
    InvalidThresholds,
}

/// Failure category recorded on every fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Parse,
    Contract,
    Unexpected,
}

impl ErrorCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Parse => "parse",
            Self::Contract => "contract",
            Self::Unexpected => "unexpected",
        }
    }
}

/// Local store failure. The process keeps running network-only.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache store is degraded ({reason}); running network-only until rebuilt")]
    Degraded { reason: String },
    #[error("cached payload could not be decoded: {0}")]
    Decode(String),
}

impl From<StoreError> for CacheError {
    fn from(error: StoreError) -> Self {
        Self::Unavailable(error.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

/// Error taxonomy of the acquisition core.
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    /// Transport-level failure. Only retryable network errors are retried.
    #[error("network error: {message}")]
    Network {
        message: String,
        retryable: bool,
        status: Option<u16>,
        retry_after: Option<Duration>,
    },

    /// The document could not be read by its parser.
    #[error("parse error: {0}")]
    Parse(String),

    /// Parsed records failed their contract.
    #[error("contract '{contract}' violated: {message}")]
    ContractViolation { contract: String, message: String },

    /// The raw document drifted too far from its baseline to be parsed safely.
    #[error("layout of '{source_name}' drifted: similarity {similarity:.3} is below {threshold:.2}")]
    FingerprintMismatch {
        source_name: String,
        similarity: f64,
        threshold: f64,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Every step of the fallback chain was exhausted.
    #[error("all sources failed for dataset '{dataset}': {}", summarize_attempts(attempts))]
    SourceUnavailable {
        dataset: String,
        attempts: Vec<FetchAttempt>,
    },

    /// Invalid plan or collaborator setup. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl FetchError {
    /// Retryable network failure (timeout, DNS, connection reset).
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
            status: None,
            retry_after: None,
        }
    }

    /// Network failure that must not be retried.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
            status: None,
            retry_after: None,
        }
    }

    /// Classify an HTTP status: 429 and 5xx are retryable, other codes are not.
    pub fn http_status(status: u16, retry_after: Option<Duration>) -> Self {
        let retryable = status == 429 || (500..600).contains(&status);
        Self::Network {
            message: format!("upstream responded with HTTP {status}"),
            retryable,
            status: Some(status),
            retry_after,
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn contract(contract: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            contract: contract.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } => ErrorCategory::Network,
            Self::Parse(_) | Self::FingerprintMismatch { .. } => ErrorCategory::Parse,
            Self::ContractViolation { .. } => ErrorCategory::Contract,
            Self::Cache(_)
            | Self::SourceUnavailable { .. }
            | Self::Configuration(_)
            | Self::Unexpected(_) => ErrorCategory::Unexpected,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "fetch.network",
            Self::Parse(_) => "fetch.parse",
            Self::ContractViolation { .. } => "fetch.contract_violation",
            Self::FingerprintMismatch { .. } => "fetch.fingerprint_mismatch",
            Self::Cache(_) => "fetch.cache",
            Self::SourceUnavailable { .. } => "fetch.source_unavailable",
            Self::Configuration(_) => "fetch.configuration",
            Self::Unexpected(_) => "fetch.unexpected",
        }
    }

    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { retryable: true, .. })
    }

    /// Upstream hint for how long to wait before the next attempt.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Network { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Attempts carried by a [`FetchError::SourceUnavailable`].
    pub fn attempts(&self) -> &[FetchAttempt] {
        match self {
            Self::SourceUnavailable { attempts, .. } => attempts.as_slice(),
            _ => &[],
        }
    }

    /// Prefix the message of a network error with retry context.
    pub(crate) fn into_exhausted(self, attempts: u32) -> Self {
        match self {
            Self::Network {
                message,
                retryable,
                status,
                retry_after,
            } => Self::Network {
                message: format!("gave up after {attempts} attempt(s): {message}"),
                retryable,
                status,
                retry_after,
            },
            other => other,
        }
    }
}

fn summarize_attempts(attempts: &[FetchAttempt]) -> String {
    if attempts.is_empty() {
        return String::from("no source was attempted");
    }

    attempts
        .iter()
        .map(|attempt| {
            let category = attempt
                .error_category
                .map(ErrorCategory::as_str)
                .unwrap_or("ok");
            match &attempt.message {
                Some(message) => format!("{} ({category}: {message})", attempt.source_name),
                None => format!("{} ({category})", attempt.source_name),
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}
