//! Command-line interface.

use crate::config::{AppConfig, FetchConfig};
use crate::error::Error;
use crate::fetch::InstrumentedClient;
use crate::guard::TelemetryGuard;
use clap::Parser;
use opentelemetry::Context;
use opentelemetry::trace::{TraceContextExt, Tracer};
use tokio::io::AsyncBufReadExt;

/// Fetch a URL with OpenTelemetry tracing, metrics and logging.
///
/// Telemetry is configured through `otel-fetch.toml`, `OTEL_FETCH_*` and the
/// standard `OTEL_*` environment variables.
#[derive(Debug, Parser)]
#[command(name = "otel-fetch", version, about)]
pub struct Cli {
    /// URL to fetch. Defaults to the configured default URL.
    #[arg(value_name = "URL")]
    pub url: Option<String>,
}

impl Cli {
    /// The URL to fetch: the argument if given, else `config.default_url`.
    pub fn target_url(&self, config: &FetchConfig) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| config.default_url.clone())
    }

    /// Runs the fetch on a current-thread runtime, then shuts `guard` down.
    ///
    /// Call this outside any tokio runtime: the OTLP HTTP exporter flushes
    /// through a blocking client. A failed telemetry shutdown is logged and
    /// does not change the result, which is the outcome of the fetch.
    ///
    /// # Errors
    ///
    /// Returns the fetch error, or an I/O error from the runtime or stdin.
    pub fn execute(&self, config: &AppConfig, guard: TelemetryGuard) -> Result<(), Error> {
        let result = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::from)
            .and_then(|runtime| runtime.block_on(self.run(config, &guard)));

        if let Err(ref err) = result {
            tracing::error!(error = %err, "otel-fetch failed");
        }
        if let Err(err) = guard.shutdown() {
            tracing::error!(target: "otel_lifecycle", error = %err, "Failed to shut down telemetry");
        }
        result
    }

    async fn run(&self, config: &AppConfig, guard: &TelemetryGuard) -> Result<(), Error> {
        let url = self.target_url(&config.fetch);
        let tracer = guard.tracer();
        let client =
            InstrumentedClient::new(guard.tracer(), &guard.meter(), config.counter_name())
                .with_context_propagation(config.fetch.propagate_context);

        let cx = Context::current_with_span(tracer.start("main"));
        let body = client.fetch_with_context(&url, &cx).await;
        if let Ok(ref text) = body {
            println!("{text}");
        }
        cx.span().end();
        body?;

        if config.fetch.wait_for_input {
            let mut line = String::new();
            tokio::io::BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await?;
        }

        Ok(())
    }
}
