use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::source::SourceId;
use crate::ValidationError;

/// One logical "fetch a dataset" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    dataset: String,
    params: BTreeMap<String, String>,
    /// Key of the permanent history record this request maps to.
    natural_key: Option<String>,
    /// Business date of the requested data, when known up front.
    business_date: Option<Date>,
}

impl Query {
    pub fn new(dataset: impl Into<String>) -> Result<Self, ValidationError> {
        let dataset = dataset.into().trim().to_owned();
        if dataset.is_empty() {
            return Err(ValidationError::EmptyDataset);
        }

        Ok(Self {
            dataset,
            params: BTreeMap::new(),
            natural_key: None,
            business_date: None,
        })
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_natural_key(mut self, natural_key: impl Into<String>) -> Self {
        self.natural_key = Some(natural_key.into());
        self
    }

    pub fn with_business_date(mut self, business_date: Date) -> Self {
        self.business_date = Some(business_date);
        self
    }

    pub fn dataset(&self) -> &str {
        self.dataset.as_str()
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn natural_key(&self) -> Option<&str> {
        self.natural_key.as_deref()
    }

    pub fn business_date(&self) -> Option<Date> {
        self.business_date
    }

    /// Stable cache key text: `dataset?k1=v1&k2=v2` with keys sorted and
    /// both keys and values percent-encoded. Insertion order never matters.
    pub fn canonical(&self) -> String {
        let mut canonical = urlencoding::encode(self.dataset.as_str()).into_owned();
        if self.params.is_empty() {
            return canonical;
        }

        canonical.push('?');
        let pairs = self
            .params
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    urlencoding::encode(key.as_str()),
                    urlencoding::encode(value.as_str())
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        canonical.push_str(pairs.as_str());
        canonical
    }
}

/// Volatile region key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub source: SourceId,
    pub canonical_query: String,
}

impl CacheKey {
    pub fn new(source: SourceId, query: &Query) -> Self {
        Self {
            source,
            canonical_query: query.canonical(),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source, self.canonical_query)
    }
}
