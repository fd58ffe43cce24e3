//! Source model.
//!
//! A [`Source`] is one logical external provider registered for a dataset:
//! an immutable [`SourceSpec`] (priority, pacing, retry, freshness) plus the
//! fetch and parse collaborators that do the source-specific work.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::FreshnessPolicy;
use crate::collaborator::{Fetcher, Parser};
use crate::retry::RetryConfig;
use crate::ValidationError;

/// Validated source identifier: lowercase ASCII letters, digits, `-` and `_`.
///
/// The identifier is used as a store key and as a baseline file name, so the
/// character set is deliberately narrow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    pub fn parse(value: impl AsRef<str>) -> Result<Self, ValidationError> {
        let value = value.as_ref().trim();
        if value.is_empty() {
            return Err(ValidationError::EmptySourceId);
        }

        let valid = value
            .bytes()
            .all(|byte| byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' || byte == b'_');
        if !valid {
            return Err(ValidationError::InvalidSourceId {
                value: value.to_owned(),
            });
        }

        Ok(Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for SourceId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SourceId> for String {
    fn from(value: SourceId) -> Self {
        value.0
    }
}

/// Immutable per-source policy.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub id: SourceId,
    /// Lower is tried first.
    pub priority: u32,
    /// Minimum spacing between two calls to this source.
    pub rate_limit_interval: Duration,
    pub retry: RetryConfig,
    pub freshness: FreshnessPolicy,
    /// Score raw documents against the saved baseline before parsing.
    pub fingerprint_gate: bool,
    /// Contract name handed to the validation collaborator.
    pub contract: Option<String>,
    /// Upper bound on one fetch attempt. Expiry is a retryable network failure.
    pub attempt_timeout: Option<Duration>,
}

impl SourceSpec {
    /// Spec with one second pacing, default retry policy and a one hour TTL.
    pub fn new(id: SourceId, priority: u32) -> Self {
        Self {
            id,
            priority,
            rate_limit_interval: Duration::from_secs(1),
            retry: RetryConfig::default(),
            freshness: FreshnessPolicy::Ttl(Duration::from_secs(3600)),
            fingerprint_gate: false,
            contract: None,
            attempt_timeout: None,
        }
    }

    pub fn with_rate_limit_interval(mut self, interval: Duration) -> Self {
        self.rate_limit_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_freshness(mut self, freshness: FreshnessPolicy) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_fingerprint_gate(mut self, enabled: bool) -> Self {
        self.fingerprint_gate = enabled;
        self
    }

    pub fn with_contract(mut self, contract: impl Into<String>) -> Self {
        self.contract = Some(contract.into());
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// A source registered for records of type `T`.
pub struct Source<T> {
    spec: SourceSpec,
    fetcher: Arc<dyn Fetcher>,
    parser: Arc<dyn Parser<T>>,
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            fetcher: Arc::clone(&self.fetcher),
            parser: Arc::clone(&self.parser),
        }
    }
}

impl<T> Source<T> {
    pub fn new(spec: SourceSpec, fetcher: Arc<dyn Fetcher>, parser: Arc<dyn Parser<T>>) -> Self {
        Self {
            spec,
            fetcher,
            parser,
        }
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    pub fn id(&self) -> &SourceId {
        &self.spec.id
    }

    pub fn priority(&self) -> u32 {
        self.spec.priority
    }

    pub fn fetcher(&self) -> &dyn Fetcher {
        self.fetcher.as_ref()
    }

    pub fn parser(&self) -> &dyn Parser<T> {
        self.parser.as_ref()
    }
}

impl<T> std::fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("spec", &self.spec).finish_non_exhaustive()
    }
}
