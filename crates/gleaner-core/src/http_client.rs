//! Stock HTTP [`Fetcher`] backed by reqwest.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_TYPE, RETRY_AFTER};
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

use crate::collaborator::{FetchFuture, Fetcher, RawDocument};
use crate::query::Query;
use crate::FetchError;

const USER_AGENT: &str = concat!("gleaner/", env!("CARGO_PKG_VERSION"));

/// Authentication strategy applied to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    BearerToken(String),
    Header { name: String, value: String },
    Cookie(String),
}

impl HttpAuth {
    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            Self::None => {}
            Self::BearerToken(token) => {
                headers.insert(String::from("authorization"), format!("Bearer {token}"));
            }
            Self::Header { name, value } => {
                headers.insert(name.to_ascii_lowercase(), value.clone());
            }
            Self::Cookie(cookie) => {
                headers.insert(String::from("cookie"), cookie.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(30),
        }
    }
}

/// GET fetcher over a URL template.
///
/// `{dataset}` and every `{param}` placeholder are replaced with the
/// percent-encoded query values; parameters without a placeholder are
/// appended as a query string.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    url_template: String,
    headers: BTreeMap<String, String>,
}

impl HttpFetcher {
    pub fn new(url_template: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_timeouts(url_template, HttpTimeouts::default())
    }

    pub fn with_timeouts(
        url_template: impl Into<String>,
        timeouts: HttpTimeouts,
    ) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .map_err(|error| FetchError::configuration(format!("http client: {error}")))?;

        Ok(Self {
            client,
            url_template: url_template.into(),
            headers: BTreeMap::new(),
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    /// URL the fetcher would request for `query`.
    pub fn render_url(&self, query: &Query) -> Result<String, FetchError> {
        let mut url = self
            .url_template
            .replace("{dataset}", &urlencoding::encode(query.dataset()));
        let mut extra = Vec::new();

        for (key, value) in query.params() {
            let placeholder = format!("{{{key}}}");
            if url.contains(placeholder.as_str()) {
                url = url.replace(placeholder.as_str(), &urlencoding::encode(value));
            } else {
                extra.push(format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)));
            }
        }

        if let Some(start) = url.find('{') {
            let missing = url[start..]
                .split_once('}')
                .map_or(&url[start..], |(name, _)| name)
                .trim_start_matches('{');
            return Err(FetchError::configuration(format!(
                "query for '{}' has no value for url placeholder '{missing}'",
                query.dataset()
            )));
        }

        if !extra.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(extra.join("&").as_str());
        }
        Ok(url)
    }

    async fn get(&self, query: &Query) -> Result<RawDocument, FetchError> {
        let url = self.render_url(query)?;
        let mut builder = self.client.get(url.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                FetchError::network(format!("request timeout: {error}"))
            } else if error.is_connect() {
                FetchError::network(format!("connection failed: {error}"))
            } else {
                FetchError::network(format!("request failed: {error}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            tracing::debug!(url = url.as_str(), status = status.as_u16(), "upstream returned error status");
            return Err(FetchError::http_status(status.as_u16(), retry_after));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let bytes = response
            .bytes()
            .await
            .map_err(|error| FetchError::network(format!("failed to read response body: {error}")))?;

        let mut document = RawDocument::new(bytes.to_vec());
        if let Some(content_type) = content_type {
            if let Some(charset) = charset(content_type.as_str()) {
                document = document.with_encoding(charset);
            }
            document = document.with_content_type(content_type);
        }
        Ok(document)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch<'a>(&'a self, query: &'a Query) -> FetchFuture<'a> {
        Box::pin(self.get(query))
    }
}

/// `Retry-After` as delta-seconds or an HTTP date.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = OffsetDateTime::parse(value, &Rfc2822).ok()?;
    let wait = at - OffsetDateTime::now_utc();
    Some(Duration::try_from(wait).unwrap_or(Duration::ZERO))
}

fn charset(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|parameter| {
        let (name, value) = parameter.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    })
}
