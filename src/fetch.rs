//! The instrumented HTTP GET.
//!
//! [`InstrumentedClient`] wraps a `reqwest::Client` with a tracer and a
//! request counter. Every fetch produces one client span with two events,
//! one counter increment, header enrichment and a pair of log lines
//! emitted inside the span's context.

use crate::enrich::{EnrichEvent, Enrichment};
use crate::error::FetchError;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::trace::{SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_http::HeaderInjector;
use opentelemetry_semantic_conventions::attribute::{HTTP_REQUEST_METHOD, URL_FULL};
use std::borrow::Cow;

/// Name of the span opened around each fetch.
pub const FETCH_SPAN_NAME: &str = "fetch";

/// Event recorded just before the request goes out.
pub const CALLING_EVENT: &str = "Calling API.";

/// Event recorded just before the body is read.
pub const PARSING_EVENT: &str = "Parsing response.";

/// HTTP client whose GETs are traced, counted and logged.
///
/// The tracer and meter are injected, so tests can hand in SDK providers
/// with in-memory exporters while the binary uses the globally installed
/// ones.
///
/// # Example
///
/// ```no_run
/// use otel_fetch::{InstrumentedClient, TelemetryBuilder};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let guard = TelemetryBuilder::new().build()?;
/// let client = InstrumentedClient::new(guard.tracer(), &guard.meter(), "SampleApp-counter");
/// let body = client.fetch("http://numbersapi.com/random/math?json").await?;
/// println!("{body}");
/// # Ok(())
/// # }
/// ```
pub struct InstrumentedClient<T> {
    http: reqwest::Client,
    tracer: T,
    request_counter: Counter<u64>,
    enrichment: Enrichment,
    propagate_context: bool,
}

impl<T> InstrumentedClient<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    /// Creates a client with a default `reqwest::Client`, header enrichment
    /// and context propagation.
    ///
    /// The request counter is created on `meter` under `counter_name`.
    pub fn new(tracer: T, meter: &Meter, counter_name: impl Into<Cow<'static, str>>) -> Self {
        let request_counter = meter
            .u64_counter(counter_name)
            .with_description("Number of outbound fetch requests")
            .build();

        Self {
            http: reqwest::Client::new(),
            tracer,
            request_counter,
            enrichment: Enrichment::default(),
            propagate_context: true,
        }
    }

    /// Replaces the underlying HTTP client.
    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Sets the enrichment strategy.
    #[must_use]
    pub fn with_enrichment(mut self, enrichment: Enrichment) -> Self {
        self.enrichment = enrichment;
        self
    }

    /// Enables or disables W3C trace context injection into requests.
    #[must_use]
    pub fn with_context_propagation(mut self, propagate: bool) -> Self {
        self.propagate_context = propagate;
        self
    }

    /// Fetches `url` as a child of the current context.
    ///
    /// # Errors
    ///
    /// See [`fetch_with_context`](Self::fetch_with_context).
    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parent = Context::current();
        self.fetch_with_context(url, &parent).await
    }

    /// Fetches `url` inside a new client span parented on `parent`.
    ///
    /// The span is ended on every path. A failed call records the error on
    /// the span and sets its status before ending it; dropping the future
    /// early ends the span through its drop.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Http`] for an invalid URL, a transport failure,
    /// a non-2xx status, or a body that cannot be read.
    pub async fn fetch_with_context(
        &self,
        url: &str,
        parent: &Context,
    ) -> Result<String, FetchError> {
        let span = self
            .tracer
            .span_builder(FETCH_SPAN_NAME)
            .with_kind(SpanKind::Client)
            .with_attributes([
                KeyValue::new(URL_FULL, url.to_string()),
                KeyValue::new(HTTP_REQUEST_METHOD, "GET"),
            ])
            .start_with_context(&self.tracer, parent);
        let cx = parent.with_span(span);

        // Attached only around the log lines; the guard is not Send.
        {
            let _attached = cx.clone().attach();
            tracing::info!(url, "Starting fetch");
        }

        self.request_counter.add(1, &[]);
        cx.span().add_event(CALLING_EVENT, Vec::new());

        let result = self.exchange(&cx, url).await;

        let span = cx.span();
        if let Err(ref err) = result {
            span.record_error(err);
            span.set_status(Status::error(err.to_string()));
        }

        {
            let _attached = cx.clone().attach();
            match &result {
                Ok(body) => tracing::info!(url, bytes = body.len(), "Ending fetch"),
                Err(err) => tracing::warn!(url, error = %err, "Fetch failed"),
            }
        }
        span.end();

        result
    }

    async fn exchange(&self, cx: &Context, url: &str) -> Result<String, FetchError> {
        let mut request = self.http.get(url).build()?;

        if self.propagate_context {
            global::get_text_map_propagator(|propagator| {
                propagator.inject_context(cx, &mut HeaderInjector(request.headers_mut()));
            });
        }

        self.enrich(cx, &EnrichEvent::Start(&request));
        let response = self.http.execute(request).await?;
        self.enrich(cx, &EnrichEvent::Stop(&response));

        let response = response.error_for_status()?;

        cx.span().add_event(PARSING_EVENT, Vec::new());
        Ok(response.text().await?)
    }

    fn enrich(&self, cx: &Context, event: &EnrichEvent<'_>) {
        let attributes = self.enrichment.attributes(event);
        if !attributes.is_empty() {
            cx.span().set_attributes(attributes);
        }
    }
}

impl<T> std::fmt::Debug for InstrumentedClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedClient")
            .field("enrichment", &self.enrichment)
            .field("propagate_context", &self.propagate_context)
            .finish_non_exhaustive()
    }
}
