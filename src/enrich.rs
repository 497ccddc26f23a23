//! Span enrichment from the HTTP exchange.
//!
//! At request start and again at request end, the fetch asks its
//! [`Enrichment`] for attributes to set on the active span. The default
//! copies every header into `http.request.header.<name>` and
//! `http.response.header.<name>`.
//!
//! # Example
//!
//! ```no_run
//! use otel_fetch::{EnrichEvent, Enrichment};
//! use opentelemetry::KeyValue;
//!
//! let enrichment = Enrichment::custom(|event| match event {
//!     EnrichEvent::Stop(response) => {
//!         vec![KeyValue::new("http.response.remote", format!("{:?}", response.remote_addr()))]
//!     }
//!     EnrichEvent::Start(_) => Vec::new(),
//! });
//! ```

use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::attribute::HTTP_RESPONSE_STATUS_CODE;
use reqwest::header::HeaderMap;
use reqwest::{Request, Response};
use std::fmt;
use std::sync::Arc;

/// Prefix for request header attributes.
pub const REQUEST_HEADER_PREFIX: &str = "http.request.header.";

/// Prefix for response header attributes.
pub const RESPONSE_HEADER_PREFIX: &str = "http.response.header.";

/// The point in the HTTP exchange at which enrichment runs.
#[derive(Debug)]
pub enum EnrichEvent<'a> {
    /// The request is built and about to be sent.
    Start(&'a Request),
    /// Response headers have arrived; the body is not yet read.
    Stop(&'a Response),
}

impl EnrichEvent<'_> {
    /// Conventional name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "OnStartActivity",
            Self::Stop(_) => "OnStopActivity",
        }
    }
}

/// Produces span attributes from an HTTP exchange.
pub trait Enricher: Send + Sync {
    /// Returns the attributes to set on the fetch span for `event`.
    fn enrich(&self, event: &EnrichEvent<'_>) -> Vec<KeyValue>;
}

/// Enrichment strategy applied by the instrumented client.
#[derive(Clone, Default)]
pub enum Enrichment {
    /// Leave the span as is.
    None,

    /// Copy request and response headers into span attributes.
    ///
    /// Also records `http.response.status_code` at request end.
    #[default]
    Headers,

    /// Use a custom enricher.
    Custom(Arc<dyn Enricher>),
}

impl Enrichment {
    /// Creates a custom enrichment from a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&EnrichEvent<'_>) -> Vec<KeyValue> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(ClosureEnricher(f)))
    }

    /// Returns the attributes this strategy produces for `event`.
    pub fn attributes(&self, event: &EnrichEvent<'_>) -> Vec<KeyValue> {
        match self {
            Self::None => Vec::new(),
            Self::Headers => match event {
                EnrichEvent::Start(request) => {
                    header_attributes(REQUEST_HEADER_PREFIX, request.headers())
                }
                EnrichEvent::Stop(response) => {
                    let mut attributes =
                        header_attributes(RESPONSE_HEADER_PREFIX, response.headers());
                    attributes.push(KeyValue::new(
                        HTTP_RESPONSE_STATUS_CODE,
                        i64::from(response.status().as_u16()),
                    ));
                    attributes
                }
            },
            Self::Custom(enricher) => enricher.enrich(event),
        }
    }
}

impl fmt::Debug for Enrichment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Headers => write!(f, "Headers"),
            Self::Custom(_) => write!(f, "Custom(...)"),
        }
    }
}

struct ClosureEnricher<F>(F);

impl<F> Enricher for ClosureEnricher<F>
where
    F: Fn(&EnrichEvent<'_>) -> Vec<KeyValue> + Send + Sync,
{
    fn enrich(&self, event: &EnrichEvent<'_>) -> Vec<KeyValue> {
        (self.0)(event)
    }
}

/// Turns every header into a `<prefix><name>` attribute.
///
/// Names keep the lowercase form the `http` crate stores. Repeated headers
/// are joined with `,`; non-UTF-8 bytes are replaced.
pub fn header_attributes(prefix: &str, headers: &HeaderMap) -> Vec<KeyValue> {
    headers
        .keys()
        .map(|name| {
            let value = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            KeyValue::new(format!("{prefix}{}", name.as_str()), value)
        })
        .collect()
}
