//! Structural drift detection.
//!
//! A raw document is reduced to [`StructuralFeatures`] and compared against
//! the baseline captured for its source. The weighted composite similarity
//! decides whether the parser may see the document:
//!
//! | Similarity | Verdict |
//! |------------|---------|
//! | `> 0.85` | [`Verdict::Proceed`] |
//! | `0.70 ..= 0.85` | [`Verdict::Warn`], a layout-change warning is attached |
//! | `< 0.70` | [`Verdict::Reject`], [`FetchError::FingerprintMismatch`] |
//!
//! Baselines change only through [`FingerprintMonitor::capture_baseline`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::collaborator::RawDocument;
use crate::source::SourceId;
use crate::{FetchError, ValidationError};

const HEADER_SELECTOR: &str = "title, h1, h2, h3, h4, h5, h6, th, caption, legend";
const COUNTED_TAGS: &[&str] = &[
    "table", "thead", "th", "form", "input", "select", "h1", "h2", "h3", "h4", "ul", "ol", "nav",
    "section", "article", "iframe",
];
const MAX_PATH_DEPTH: usize = 8;
const WEIGHT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    HeaderText,
    StructureHash,
    ClassPresence,
    KeyIdentifiers,
    ElementCounts,
}

/// Relative weight of each feature in the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights {
    pub header_text: f64,
    pub structure_hash: f64,
    pub class_presence: f64,
    pub key_identifiers: f64,
    pub element_counts: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            header_text: 0.30,
            structure_hash: 0.25,
            class_presence: 0.20,
            key_identifiers: 0.15,
            element_counts: 0.10,
        }
    }
}

impl FeatureWeights {
    pub fn new(
        header_text: f64,
        structure_hash: f64,
        class_presence: f64,
        key_identifiers: f64,
        element_counts: f64,
    ) -> Result<Self, ValidationError> {
        let weights = Self {
            header_text,
            structure_hash,
            class_presence,
            key_identifiers,
            element_counts,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let values = self.values();
        let sum: f64 = values.iter().sum();
        let non_negative = values.iter().all(|weight| weight.is_finite() && *weight >= 0.0);
        if !non_negative || (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(ValidationError::InvalidWeights { sum });
        }
        Ok(())
    }

    fn values(&self) -> [f64; 5] {
        [
            self.header_text,
            self.structure_hash,
            self.class_presence,
            self.key_identifiers,
            self.element_counts,
        ]
    }
}

/// Similarity cut points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Strictly above this, the document proceeds silently.
    pub proceed_above: f64,
    /// Strictly below this, the document is rejected.
    pub reject_below: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            proceed_above: 0.85,
            reject_below: 0.70,
        }
    }
}

impl Thresholds {
    pub fn new(proceed_above: f64, reject_below: f64) -> Result<Self, ValidationError> {
        let valid = (0.0..=1.0).contains(&reject_below)
            && (0.0..=1.0).contains(&proceed_above)
            && reject_below <= proceed_above;
        if !valid {
            return Err(ValidationError::InvalidThresholds);
        }
        Ok(Self {
            proceed_above,
            reject_below,
        })
    }

    pub fn classify(&self, similarity: f64) -> Verdict {
        if similarity > self.proceed_above {
            Verdict::Proceed
        } else if similarity >= self.reject_below {
            Verdict::Warn
        } else {
            Verdict::Reject
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Proceed,
    Warn,
    Reject,
}

/// Structural signature of one document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuralFeatures {
    /// Normalized header texts, digits stripped so dates and figures do not count.
    pub header_texts: BTreeSet<String>,
    /// SHA-256 over the sorted distinct tag paths.
    pub structure_hash: String,
    pub tag_paths: BTreeSet<String>,
    pub classes: BTreeSet<String>,
    /// Element ids (`#id`) and form field names (`@name`), or column names.
    pub key_identifiers: BTreeSet<String>,
    pub element_counts: BTreeMap<String, usize>,
}

impl StructuralFeatures {
    pub fn extract(document: &RawDocument) -> Self {
        let text = document.text();
        if is_json(document, text.as_ref()) {
            if let Ok(value) = serde_json::from_str::<Value>(text.as_ref()) {
                return Self::from_json(&value);
            }
        }
        if is_delimited(document, text.as_ref()) {
            Self::from_delimited(text.as_ref())
        } else {
            Self::from_html(text.as_ref())
        }
    }

    fn from_html(text: &str) -> Self {
        let html = Html::parse_document(text);
        let mut features = Self::default();

        if let Ok(selector) = Selector::parse(HEADER_SELECTOR) {
            for element in html.select(&selector) {
                if let Some(header) = normalize_header(element.text()) {
                    features.header_texts.insert(header);
                }
            }
        }

        for element in html.root_element().descendants().filter_map(ElementRef::wrap) {
            let value = element.value();
            let name = value.name();

            features.tag_paths.insert(tag_path(element));
            for class in value.classes() {
                features.classes.insert(class.to_owned());
            }
            if let Some(id) = value.id() {
                features.key_identifiers.insert(format!("#{id}"));
            }
            if let Some(field) = value.attr("name") {
                features.key_identifiers.insert(format!("@{field}"));
            }
            if COUNTED_TAGS.contains(&name) {
                *features.element_counts.entry(name.to_owned()).or_default() += 1;
            }
        }

        features.structure_hash = hash_paths(&features.tag_paths);
        features
    }

    /// Key paths stand in for tag paths; array items share one path so the
    /// signature does not depend on row count.
    fn from_json(value: &Value) -> Self {
        let mut features = Self::default();
        collect_json(value, "$", &mut features);
        features
            .element_counts
            .insert(String::from("fields"), features.key_identifiers.len());
        features.structure_hash = hash_paths(&features.tag_paths);
        features
    }

    fn from_delimited(text: &str) -> Self {
        let mut features = Self::default();
        let Some(header_line) = text.lines().map(str::trim).find(|line| !line.is_empty()) else {
            features.structure_hash = hash_paths(&features.tag_paths);
            return features;
        };

        let delimiter = detect_delimiter(header_line);
        let columns: Vec<&str> = header_line.split(delimiter).collect();
        for (index, column) in columns.iter().enumerate() {
            let column = column.trim().trim_matches('"');
            features.tag_paths.insert(format!("column[{index}]"));
            if let Some(header) = normalize_header(std::iter::once(column)) {
                features.key_identifiers.insert(column.to_owned());
                features.header_texts.insert(header);
            }
        }
        features
            .element_counts
            .insert(String::from("columns"), columns.len());
        features.structure_hash = hash_paths(&features.tag_paths);
        features
    }
}

/// Per-feature similarity in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureScores {
    pub header_text: f64,
    pub structure_hash: f64,
    pub class_presence: f64,
    pub key_identifiers: f64,
    pub element_counts: f64,
}

impl FeatureScores {
    pub fn compare(baseline: &StructuralFeatures, observed: &StructuralFeatures) -> Self {
        let structure_hash = if baseline.structure_hash == observed.structure_hash {
            1.0
        } else {
            jaccard(&baseline.tag_paths, &observed.tag_paths)
        };

        Self {
            header_text: jaccard(&baseline.header_texts, &observed.header_texts),
            structure_hash,
            class_presence: jaccard(&baseline.classes, &observed.classes),
            key_identifiers: recall(&baseline.key_identifiers, &observed.key_identifiers),
            element_counts: count_similarity(&baseline.element_counts, &observed.element_counts),
        }
    }

    /// Weighted mean, normalized by the weight total and clamped to `[0, 1]`.
    pub fn composite(&self, weights: &FeatureWeights) -> f64 {
        let scores = self.values();
        let weights = weights.values();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = weights
            .iter()
            .zip(scores.iter())
            .map(|(weight, score)| weight * score)
            .sum();
        (weighted / total).clamp(0.0, 1.0)
    }

    pub fn to_map(&self) -> BTreeMap<Feature, f64> {
        BTreeMap::from([
            (Feature::HeaderText, self.header_text),
            (Feature::StructureHash, self.structure_hash),
            (Feature::ClassPresence, self.class_presence),
            (Feature::KeyIdentifiers, self.key_identifiers),
            (Feature::ElementCounts, self.element_counts),
        ])
    }

    fn values(&self) -> [f64; 5] {
        [
            self.header_text,
            self.structure_hash,
            self.class_presence,
            self.key_identifiers,
            self.element_counts,
        ]
    }
}

/// Deliberately captured reference signature of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub source: SourceId,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub features: StructuralFeatures,
}

impl Baseline {
    /// Short reference recorded in every fingerprint scored against this baseline.
    pub fn reference(&self) -> String {
        let hash = self.features.structure_hash.as_str();
        let short = hash.get(..12).unwrap_or(hash);
        format!("{}@{}#{}", self.source, self.captured_at.unix_timestamp(), short)
    }
}

/// Score of one observed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub source: SourceId,
    pub feature_scores: BTreeMap<Feature, f64>,
    pub baseline_ref: String,
    pub similarity: f64,
    pub verdict: Verdict,
}

/// Result of gating a document that was not rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// No baseline exists yet; nothing to compare against.
    NoBaseline,
    Proceed(Fingerprint),
    Warn(Fingerprint),
}

/// Baselines persisted as one JSON file per source.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    pub fn load(&self, source: &SourceId) -> Result<Option<Baseline>, FetchError> {
        let path = self.path_for(source);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(FetchError::unexpected(format!(
                    "failed to read baseline {}: {error}",
                    path.display()
                )))
            }
        };

        serde_json::from_str(text.as_str()).map(Some).map_err(|error| {
            FetchError::configuration(format!("corrupt baseline {}: {error}", path.display()))
        })
    }

    pub fn save(&self, baseline: &Baseline) -> Result<(), FetchError> {
        let io_error = |error: std::io::Error| {
            FetchError::unexpected(format!("failed to write baseline for '{}': {error}", baseline.source))
        };

        fs::create_dir_all(&self.dir).map_err(io_error)?;
        let json = serde_json::to_string_pretty(baseline)
            .map_err(|error| FetchError::unexpected(error.to_string()))?;

        let path = self.path_for(&baseline.source);
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, json).map_err(io_error)?;
        fs::rename(&staging, &path).map_err(io_error)
    }

    /// Modification time of the stored baseline, `None` when absent.
    pub fn modified(&self, source: &SourceId) -> Option<SystemTime> {
        fs::metadata(self.path_for(source))
            .and_then(|metadata| metadata.modified())
            .ok()
    }

    fn path_for(&self, source: &SourceId) -> PathBuf {
        self.dir.join(format!("{source}.json"))
    }
}

#[derive(Debug)]
struct LoadedBaseline {
    baseline: Arc<Baseline>,
    modified: Option<SystemTime>,
}

/// Scores documents against per-source baselines.
///
/// Loaded baselines are kept in memory and reloaded whenever the file on
/// disk changes, so a recapture by another process is picked up.
#[derive(Debug)]
pub struct FingerprintMonitor {
    store: BaselineStore,
    weights: FeatureWeights,
    thresholds: Thresholds,
    loaded: RwLock<HashMap<SourceId, LoadedBaseline>>,
}

impl FingerprintMonitor {
    pub fn new(baseline_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: BaselineStore::new(baseline_dir),
            weights: FeatureWeights::default(),
            thresholds: Thresholds::default(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_weights(mut self, weights: FeatureWeights) -> Result<Self, ValidationError> {
        weights.validate()?;
        self.weights = weights;
        Ok(self)
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn weights(&self) -> &FeatureWeights {
        &self.weights
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Maintainer action: record `document` as the reference layout of `source`.
    /// Replaces any previous baseline.
    pub fn capture_baseline(
        &self,
        source: &SourceId,
        document: &RawDocument,
    ) -> Result<Arc<Baseline>, FetchError> {
        let baseline = Arc::new(Baseline {
            source: source.clone(),
            captured_at: OffsetDateTime::now_utc(),
            features: StructuralFeatures::extract(document),
        });
        self.store.save(&baseline)?;

        self.remember(source, Arc::clone(&baseline));
        tracing::info!(source = %source, baseline = %baseline.reference(), "fingerprint baseline captured");
        Ok(baseline)
    }

    pub fn baseline(&self, source: &SourceId) -> Result<Option<Arc<Baseline>>, FetchError> {
        let modified = self.store.modified(source);
        if modified.is_none() {
            self.loaded
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(source);
            return Ok(None);
        }

        if let Some(loaded) = self
            .loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source)
        {
            if loaded.modified == modified {
                return Ok(Some(Arc::clone(&loaded.baseline)));
            }
        }

        let Some(baseline) = self.store.load(source)? else {
            return Ok(None);
        };
        tracing::debug!(source = %source, "fingerprint baseline loaded from disk");
        let baseline = Arc::new(baseline);
        self.remember(source, Arc::clone(&baseline));
        Ok(Some(baseline))
    }

    fn remember(&self, source: &SourceId, baseline: Arc<Baseline>) {
        let modified = self.store.modified(source);
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source.clone(), LoadedBaseline { baseline, modified });
    }

    /// Composite similarity of two signatures under this monitor's weights.
    pub fn similarity(&self, baseline: &StructuralFeatures, observed: &StructuralFeatures) -> f64 {
        FeatureScores::compare(baseline, observed).composite(&self.weights)
    }

    /// Score `document` against the baseline of `source`. `None` when no
    /// baseline was captured. Never modifies the baseline.
    pub fn score(
        &self,
        source: &SourceId,
        document: &RawDocument,
    ) -> Result<Option<Fingerprint>, FetchError> {
        let Some(baseline) = self.baseline(source)? else {
            return Ok(None);
        };

        let observed = StructuralFeatures::extract(document);
        let scores = FeatureScores::compare(&baseline.features, &observed);
        let similarity = scores.composite(&self.weights);
        Ok(Some(Fingerprint {
            source: source.clone(),
            feature_scores: scores.to_map(),
            baseline_ref: baseline.reference(),
            similarity,
            verdict: self.thresholds.classify(similarity),
        }))
    }

    /// Decide whether `document` may reach the parser.
    pub fn gate(&self, source: &SourceId, document: &RawDocument) -> Result<GateOutcome, FetchError> {
        let Some(fingerprint) = self.score(source, document)? else {
            tracing::warn!(source = %source, "no fingerprint baseline captured, parsing unchecked");
            return Ok(GateOutcome::NoBaseline);
        };

        match fingerprint.verdict {
            Verdict::Proceed => {
                tracing::debug!(source = %source, similarity = fingerprint.similarity, "layout matches baseline");
                Ok(GateOutcome::Proceed(fingerprint))
            }
            Verdict::Warn => {
                tracing::warn!(
                    source = %source,
                    similarity = fingerprint.similarity,
                    baseline = %fingerprint.baseline_ref,
                    "layout drifted from baseline"
                );
                Ok(GateOutcome::Warn(fingerprint))
            }
            Verdict::Reject => {
                tracing::error!(
                    source = %source,
                    similarity = fingerprint.similarity,
                    baseline = %fingerprint.baseline_ref,
                    "layout drift past threshold, document rejected"
                );
                Err(FetchError::FingerprintMismatch {
                    source_name: source.to_string(),
                    similarity: fingerprint.similarity,
                    threshold: self.thresholds.reject_below,
                })
            }
        }
    }
}

fn collect_json(value: &Value, path: &str, features: &mut StructuralFeatures) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = format!("{path}.{key}");
                features.tag_paths.insert(child_path.clone());
                features.key_identifiers.insert(key.clone());
                if let Some(header) = normalize_header(std::iter::once(key.as_str())) {
                    features.header_texts.insert(header);
                }
                collect_json(child, child_path.as_str(), features);
            }
        }
        Value::Array(items) => {
            let item_path = format!("{path}[]");
            features.tag_paths.insert(item_path.clone());
            for item in items {
                collect_json(item, item_path.as_str(), features);
            }
        }
        _ => {}
    }
}

fn is_json(document: &RawDocument, text: &str) -> bool {
    let declared = document
        .content_type
        .as_deref()
        .is_some_and(|content_type| content_type.to_ascii_lowercase().contains("json"));
    declared || text.trim_start().starts_with(['{', '['])
}

fn is_delimited(document: &RawDocument, text: &str) -> bool {
    let declared = document.content_type.as_deref().is_some_and(|content_type| {
        let content_type = content_type.to_ascii_lowercase();
        content_type.contains("csv") || content_type.contains("tab-separated")
    });
    if declared {
        return true;
    }

    let trimmed = text.trim_start();
    !trimmed.starts_with(['<', '{', '['])
        && trimmed
            .lines()
            .next()
            .is_some_and(|line| line.contains([',', ';', '\t', '|']))
}

fn detect_delimiter(line: &str) -> char {
    [',', ';', '\t', '|']
        .into_iter()
        .max_by_key(|candidate| line.matches(*candidate).count())
        .unwrap_or(',')
}

fn normalize_header<'a>(parts: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined: String = parts.collect::<Vec<_>>().join(" ");
    let normalized = joined
        .chars()
        .filter(|character| !character.is_ascii_digit())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!normalized.is_empty()).then_some(normalized)
}

fn tag_path(element: ElementRef<'_>) -> String {
    let mut names: Vec<&str> = element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .map(|ancestor| ancestor.value().name())
        .collect();
    names.reverse();
    names.push(element.value().name());

    let skip = names.len().saturating_sub(MAX_PATH_DEPTH);
    names[skip..].join(">")
}

fn hash_paths(paths: &BTreeSet<String>) -> String {
    let mut hasher = Sha256::new();
    for path in paths {
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

fn jaccard(left: &BTreeSet<String>, right: &BTreeSet<String>) -> f64 {
    let union = left.union(right).count();
    if union == 0 {
        return 1.0;
    }
    left.intersection(right).count() as f64 / union as f64
}

fn recall(expected: &BTreeSet<String>, observed: &BTreeSet<String>) -> f64 {
    if expected.is_empty() {
        return 1.0;
    }
    expected.intersection(observed).count() as f64 / expected.len() as f64
}

fn count_similarity(left: &BTreeMap<String, usize>, right: &BTreeMap<String, usize>) -> f64 {
    let keys: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
    if keys.is_empty() {
        return 1.0;
    }

    let total: f64 = keys
        .iter()
        .map(|key| {
            let a = left.get(*key).copied().unwrap_or(0);
            let b = right.get(*key).copied().unwrap_or(0);
            let high = a.max(b);
            if high == 0 {
                1.0
            } else {
                a.min(b) as f64 / high as f64
            }
        })
        .sum();
    total / keys.len() as f64
}
