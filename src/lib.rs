//! One HTTP GET, instrumented with OpenTelemetry traces, metrics and logs.
//!
//! [`TelemetryBuilder`] layers configuration and installs tracer, meter and
//! logger providers with console and OTLP exporters. [`InstrumentedClient`]
//! wraps each GET in a client span, counts it, enriches the span from the
//! request and response headers, and logs around it.
//!
//! # Example
//!
//! ```no_run
//! use opentelemetry::trace::{TraceContextExt, Tracer};
//! use otel_fetch::{InstrumentedClient, TelemetryBuilder};
//!
//! # async fn run() -> Result<(), otel_fetch::Error> {
//! let guard = TelemetryBuilder::new().with_standard_env().build()?;
//! let config = otel_fetch::AppConfig::default();
//!
//! let tracer = guard.tracer();
//! let client = InstrumentedClient::new(guard.tracer(), &guard.meter(), config.counter_name());
//!
//! let cx = opentelemetry::Context::current_with_span(tracer.start("main"));
//! let body = client.fetch_with_context(otel_fetch::DEFAULT_URL, &cx).await;
//! cx.span().end();
//! println!("{}", body?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod builder;
pub mod cli;
mod config;
mod enrich;
mod error;
mod fetch;
mod guard;

pub use builder::TelemetryBuilder;
pub use config::{
    AppConfig, BatchConfig, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_VERSION, DEFAULT_URL,
    EndpointConfig, FetchConfig, Protocol, ResourceConfig, SignalConfig,
};
pub use enrich::{
    EnrichEvent, Enricher, Enrichment, REQUEST_HEADER_PREFIX, RESPONSE_HEADER_PREFIX,
    header_attributes,
};
pub use error::{Error, FetchError, TelemetryError};
pub use fetch::{CALLING_EVENT, FETCH_SPAN_NAME, InstrumentedClient, PARSING_EVENT};
pub use guard::TelemetryGuard;

/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry;
/// Re-exported for version compatibility with this crate's dependencies.
pub use opentelemetry_sdk;
/// Re-exported for version compatibility with this crate's dependencies.
pub use tracing;

/// Re-exported for users who want to construct custom configuration providers.
pub use figment;
