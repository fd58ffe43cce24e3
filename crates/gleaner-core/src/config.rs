//! Typed configuration, resolved once at startup.
//!
//! Sources, in increasing precedence:
//!
//! 1. built-in defaults
//! 2. TOML file at `GLEANER_CONFIG` (or `./gleaner.toml` when present)
//! 3. environment, after loading `.env`
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `GLEANER_HOME` | Data root (default `~/.gleaner`) |
//! | `GLEANER_DB_PATH` | Store file (default `$GLEANER_HOME/cache/gleaner.duckdb`) |
//! | `GLEANER_OFFLINE` | `1`/`true` serves only from the store |
//! | `GLEANER_SNAPSHOT_DATE` | `YYYY-MM-DD` snapshot cutoff |
//! | `GLEANER_STALE_ORDER` | `stale_cache_first` or `history_first` |
//! | `GLEANER_BASELINE_DIR` | Fingerprint baselines (default `$GLEANER_HOME/baselines`) |
//!
//! ```toml
//! offline = false
//! stale_order = "stale_cache_first"
//!
//! [sources.usda]
//! priority = 1
//! rate_limit_ms = 2000
//! max_retries = 3
//! fresh_until = "10:00"
//! fingerprint = true
//! timeout_ms = 45000
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gleaner_store::StoreConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::Date;

use crate::cache::FreshnessPolicy;
use crate::context::ExecutionContext;
use crate::retry::RetryConfig;
use crate::routing::StaleFallbackOrder;
use crate::source::{SourceId, SourceSpec};
use crate::ValidationError;

const DEFAULT_CONFIG_FILE: &str = "gleaner.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("environment variable {name} has invalid value '{value}'")]
    InvalidEnv { name: &'static str, value: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Per-source settings as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSettings {
    pub priority: u32,
    pub rate_limit_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub ttl_secs: Option<u64>,
    /// Daily `HH:MM` UTC publication boundary.
    pub fresh_until: Option<String>,
    pub fingerprint: bool,
    pub contract: Option<String>,
    /// Per-attempt fetch deadline in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            priority: 100,
            rate_limit_ms: 1_000,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            ttl_secs: None,
            fresh_until: None,
            fingerprint: false,
            contract: None,
            timeout_ms: None,
        }
    }
}

impl SourceSettings {
    pub fn to_spec(&self, id: SourceId) -> Result<SourceSpec, ValidationError> {
        let freshness = match (self.ttl_secs, self.fresh_until.as_deref()) {
            (Some(_), Some(_)) => {
                return Err(ValidationError::ConflictingFreshness {
                    source_name: id.to_string(),
                })
            }
            (Some(0), None) => FreshnessPolicy::Permanent,
            (Some(secs), None) => FreshnessPolicy::Ttl(Duration::from_secs(secs)),
            (None, Some(boundary)) => FreshnessPolicy::fresh_until(boundary)?,
            (None, None) => FreshnessPolicy::Ttl(Duration::from_secs(3_600)),
        };

        let mut spec = SourceSpec::new(id, self.priority)
            .with_rate_limit_interval(Duration::from_millis(self.rate_limit_ms))
            .with_retry(RetryConfig::exponential(
                self.max_retries,
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            ))
            .with_freshness(freshness)
            .with_fingerprint_gate(self.fingerprint);
        if let Some(contract) = self.contract.as_deref() {
            spec = spec.with_contract(contract);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            spec = spec.with_attempt_timeout(Duration::from_millis(timeout_ms));
        }
        Ok(spec)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    home: Option<PathBuf>,
    db_path: Option<PathBuf>,
    baseline_dir: Option<PathBuf>,
    offline: bool,
    snapshot_date: Option<String>,
    stale_order: Option<String>,
    sources: BTreeMap<String, SourceSettings>,
}

/// Resolved configuration handed to the core by reference.
#[derive(Debug, Clone)]
pub struct GleanerConfig {
    pub store: StoreConfig,
    pub baseline_dir: PathBuf,
    pub offline: bool,
    pub snapshot_date: Option<Date>,
    pub stale_order: StaleFallbackOrder,
    pub sources: BTreeMap<SourceId, SourceSpec>,
}

impl Default for GleanerConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            baseline_dir: store.gleaner_home.join("baselines"),
            store,
            offline: false,
            snapshot_date: None,
            stale_order: StaleFallbackOrder::default(),
            sources: BTreeMap::new(),
        }
    }
}

impl GleanerConfig {
    /// Load `.env`, the optional TOML file, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let path = match env::var_os("GLEANER_CONFIG") {
            Some(path) => Some(PathBuf::from(path)),
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|path| path.exists()),
        };

        let file = match path {
            Some(path) => read_file(path.as_path())?,
            None => FileConfig::default(),
        };

        Self::resolve(file, |name| env::var(name).ok())
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::resolve(toml::from_str(text)?, |_| None)
    }

    /// Like [`GleanerConfig::from_toml_str`] with an explicit variable lookup.
    pub fn from_toml_with_env(
        text: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        Self::resolve(toml::from_str(text)?, lookup)
    }

    pub fn source(&self, id: &SourceId) -> Option<&SourceSpec> {
        self.sources.get(id)
    }

    /// Context for requests that follow the configured offline and snapshot settings.
    pub fn execution_context(&self) -> ExecutionContext {
        match self.snapshot_date {
            Some(cutoff) => ExecutionContext::deterministic(cutoff, "config"),
            None if self.offline => ExecutionContext::offline(),
            None => ExecutionContext::live(),
        }
    }

    fn resolve(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let home = non_empty("GLEANER_HOME").map(PathBuf::from).or(file.home);
        let mut store = match home {
            Some(home) => StoreConfig::in_home(home),
            None => StoreConfig::default(),
        };
        if let Some(db_path) = non_empty("GLEANER_DB_PATH").map(PathBuf::from).or(file.db_path) {
            store.db_path = db_path;
        }

        let baseline_dir = non_empty("GLEANER_BASELINE_DIR")
            .map(PathBuf::from)
            .or(file.baseline_dir)
            .unwrap_or_else(|| store.gleaner_home.join("baselines"));

        let offline = match non_empty("GLEANER_OFFLINE") {
            Some(value) => parse_flag("GLEANER_OFFLINE", value.as_str())?,
            None => file.offline,
        };

        let snapshot_date = match non_empty("GLEANER_SNAPSHOT_DATE").or(file.snapshot_date) {
            Some(value) => Some(gleaner_store::parse_date(value.as_str()).map_err(|_| {
                ValidationError::InvalidSnapshotDate {
                    value: value.clone(),
                }
            })?),
            None => None,
        };

        let stale_order = match non_empty("GLEANER_STALE_ORDER").or(file.stale_order) {
            Some(value) => value.parse()?,
            None => StaleFallbackOrder::default(),
        };

        let mut sources = BTreeMap::new();
        for (name, settings) in file.sources {
            let id = SourceId::parse(name.as_str())?;
            let spec = settings.to_spec(id.clone())?;
            sources.insert(id, spec);
        }

        Ok(Self {
            store,
            baseline_dir,
            offline,
            snapshot_date,
            stale_order,
            sources,
        })
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "configuration file loaded");
    Ok(toml::from_str(text.as_str())?)
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name,
            value: value.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use time::macros::date;

    const SAMPLE: &str = r#"
home = "/srv/gleaner"
stale_order = "history_first"

[sources.usda]
priority = 1
rate_limit_ms = 2000
max_retries = 2
base_delay_ms = 500
max_delay_ms = 8000
fresh_until = "10:00"
fingerprint = true
timeout_ms = 45000

[sources.conab]
priority = 2
ttl_secs = 0
"#;

    fn id(value: &str) -> SourceId {
        SourceId::parse(value).expect("id")
    }

    #[test]
    fn file_settings_become_typed_specs() {
        let config = GleanerConfig::from_toml_str(SAMPLE).expect("config");

        assert_eq!(config.store.db_path, PathBuf::from("/srv/gleaner/cache/gleaner.duckdb"));
        assert_eq!(config.baseline_dir, PathBuf::from("/srv/gleaner/baselines"));
        assert_eq!(config.stale_order, StaleFallbackOrder::HistoryFirst);

        let usda = config.source(&id("usda")).expect("usda");
        assert_eq!(usda.priority, 1);
        assert_eq!(usda.rate_limit_interval, Duration::from_secs(2));
        assert_eq!(usda.retry.max_retries, 2);
        assert_eq!(usda.retry.delay_for_attempt(1, None), Duration::from_secs(1));
        assert!(usda.fingerprint_gate);
        assert_eq!(usda.freshness.label(), "until:10:00+00:00");
        assert_eq!(usda.attempt_timeout, Some(Duration::from_secs(45)));

        let conab = config.source(&id("conab")).expect("conab");
        assert_eq!(conab.freshness.label(), "permanent");
        assert_eq!(conab.attempt_timeout, None);
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("GLEANER_HOME", "/data/g"),
            ("GLEANER_DB_PATH", "/fast/store.duckdb"),
            ("GLEANER_OFFLINE", "true"),
            ("GLEANER_SNAPSHOT_DATE", "2025-12-31"),
            ("GLEANER_STALE_ORDER", "stale_cache_first"),
        ]);
        let config = GleanerConfig::from_toml_with_env(SAMPLE, |name| {
            env.get(name).map(|value| (*value).to_owned())
        })
        .expect("config");

        assert_eq!(config.store.gleaner_home, PathBuf::from("/data/g"));
        assert_eq!(config.store.db_path, PathBuf::from("/fast/store.duckdb"));
        assert!(config.offline);
        assert_eq!(config.snapshot_date, Some(date!(2025 - 12 - 31)));
        assert_eq!(config.stale_order, StaleFallbackOrder::StaleCacheFirst);

        let context = config.execution_context();
        assert_eq!(context.cutoff(), Some(date!(2025 - 12 - 31)));
        assert!(!context.network_allowed());
    }

    #[test]
    fn invalid_values_are_reported() {
        let bad_flag = GleanerConfig::from_toml_with_env("", |name| {
            (name == "GLEANER_OFFLINE").then(|| String::from("maybe"))
        });
        assert!(matches!(bad_flag, Err(ConfigError::InvalidEnv { name: "GLEANER_OFFLINE", .. })));

        let bad_date = GleanerConfig::from_toml_str("snapshot_date = \"31/12/2025\"");
        assert!(matches!(
            bad_date,
            Err(ConfigError::Validation(ValidationError::InvalidSnapshotDate { .. }))
        ));

        let conflicting = GleanerConfig::from_toml_str(
            "[sources.usda]\nttl_secs = 60\nfresh_until = \"10:00\"\n",
        );
        assert!(matches!(
            conflicting,
            Err(ConfigError::Validation(ValidationError::ConflictingFreshness { .. }))
        ));

        assert!(matches!(
            GleanerConfig::from_toml_str("[sources.usda]\nprio = 1\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
