//! Collaborator contracts.
//!
//! The core never knows how a source is fetched or parsed. It calls these
//! narrow traits and treats their results as opaque until a parser turns
//! bytes into records.
//!
//! | Trait | Input | Output |
//! |-------|-------|--------|
//! | [`Fetcher`] | [`Query`] | [`RawDocument`] |
//! | [`Parser`] | [`RawDocument`] | [`Parsed<T>`] |
//! | [`ContractValidator`] | `&[T]` + contract name | `()` |

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;

use crate::{FetchError, Query};

/// Future returned by [`Fetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<RawDocument, FetchError>> + Send + 'a>>;

/// Raw payload of one fetch: opaque bytes plus declared or detected encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub bytes: Vec<u8>,
    pub encoding: Option<String>,
    pub content_type: Option<String>,
}

impl RawDocument {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            encoding: None,
            content_type: None,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            encoding: Some(String::from("utf-8")),
            content_type: None,
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Lossy UTF-8 view. Transcoding other charsets is the fetcher's job.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.bytes.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Parser output. A parser may report that it read only part of the
/// document or that it fell back to a secondary extraction path.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub partial: Option<String>,
    pub parser_fallback: Option<String>,
}

impl<T> Parsed<T> {
    pub fn complete(records: Vec<T>) -> Self {
        Self {
            records,
            partial: None,
            parser_fallback: None,
        }
    }

    pub fn partial(records: Vec<T>, reason: impl Into<String>) -> Self {
        Self {
            records,
            partial: Some(reason.into()),
            parser_fallback: None,
        }
    }

    pub fn with_parser_fallback(mut self, parser: impl Into<String>) -> Self {
        self.parser_fallback = Some(parser.into());
        self
    }
}

/// Source-specific network access.
///
/// Implementations return [`FetchError::Network`] for transport failures and
/// mark them retryable when a later attempt may succeed.
pub trait Fetcher: Send + Sync {
    fn fetch<'a>(&'a self, query: &'a Query) -> FetchFuture<'a>;
}

/// Turns a raw document into typed records.
pub trait Parser<T>: Send + Sync {
    fn parse(&self, document: &RawDocument) -> Result<Parsed<T>, FetchError>;
}

impl<T, F> Parser<T> for F
where
    F: Fn(&RawDocument) -> Result<Parsed<T>, FetchError> + Send + Sync,
{
    fn parse(&self, document: &RawDocument) -> Result<Parsed<T>, FetchError> {
        self(document)
    }
}

/// Schema check run between parse and cache write.
pub trait ContractValidator<T>: Send + Sync {
    fn validate(&self, records: &[T], contract: &str) -> Result<(), FetchError>;
}

impl<T, F> ContractValidator<T> for F
where
    F: Fn(&[T], &str) -> Result<(), FetchError> + Send + Sync,
{
    fn validate(&self, records: &[T], contract: &str) -> Result<(), FetchError> {
        self(records, contract)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_act_as_parsers() {
        let parser = |document: &RawDocument| -> Result<Parsed<String>, FetchError> {
            Ok(Parsed::complete(
                document.text().lines().map(str::to_owned).collect(),
            ))
        };

        let parsed = parser
            .parse(&RawDocument::from_text("a\nb"))
            .expect("parse");
        assert_eq!(parsed.records, vec![String::from("a"), String::from("b")]);
        assert!(parsed.partial.is_none());
    }

    #[test]
    fn partial_and_fallback_markers_are_kept() {
        let parsed = Parsed::partial(vec![1, 2], "footer table missing").with_parser_fallback("legacy-xls");
        assert_eq!(parsed.partial.as_deref(), Some("footer table missing"));
        assert_eq!(parsed.parser_fallback.as_deref(), Some("legacy-xls"));
    }

    #[test]
    fn text_view_is_lossy_for_foreign_bytes() {
        let document = RawDocument::new(vec![b'S', b'\xe3', b'o']).with_encoding("iso-8859-1");
        assert_eq!(document.text(), "S\u{fffd}o");
        assert_eq!(document.encoding.as_deref(), Some("iso-8859-1"));
    }
}
