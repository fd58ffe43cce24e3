//! Execution-scoped context.
//!
//! Offline and snapshot behaviour are properties of one request, never of the
//! process. Two concurrent requests with different cutoffs each carry their
//! own [`ExecutionContext`].

use serde::Serialize;
use time::Date;
use uuid::Uuid;

use crate::cache::CacheMode;

/// Reproducible-read scope: reads are pinned to `snapshot_cutoff` and the
/// network is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeterministicContext {
    pub snapshot_cutoff: Date,
    /// Free-form label of the run that owns this scope.
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    request_id: String,
    offline: bool,
    deterministic: Option<DeterministicContext>,
    cache_mode: CacheMode,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::live()
    }
}

impl ExecutionContext {
    /// Normal operation: cache first, network allowed.
    pub fn live() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            offline: false,
            deterministic: None,
            cache_mode: CacheMode::Use,
        }
    }

    /// Serve whatever the store holds, fresh or not, without touching the network.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::live()
        }
    }

    pub fn deterministic(snapshot_cutoff: Date, scope: impl Into<String>) -> Self {
        Self {
            deterministic: Some(DeterministicContext {
                snapshot_cutoff,
                scope: scope.into(),
            }),
            ..Self::live()
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_cache_mode(mut self, cache_mode: CacheMode) -> Self {
        self.cache_mode = cache_mode;
        self
    }

    pub fn request_id(&self) -> &str {
        self.request_id.as_str()
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn deterministic_scope(&self) -> Option<&DeterministicContext> {
        self.deterministic.as_ref()
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    /// Business-date cutoff applied to every read, if any.
    pub fn cutoff(&self) -> Option<Date> {
        self.deterministic
            .as_ref()
            .map(|deterministic| deterministic.snapshot_cutoff)
    }

    pub fn network_allowed(&self) -> bool {
        !self.offline && self.deterministic.is_none()
    }

    /// Store writes are suppressed inside a snapshot so the scope stays reproducible.
    pub fn writes_allowed(&self) -> bool {
        self.deterministic.is_none() && self.cache_mode != CacheMode::Bypass
    }
}
