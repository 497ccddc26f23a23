//! Layered configuration builder.
//!
//! Sources are merged in order, later sources taking precedence:
//! 1. Compiled defaults
//! 2. Configuration files (TOML)
//! 3. Environment variables
//! 4. Programmatic overrides

use crate::config::{AppConfig, Protocol};
use crate::error::TelemetryError;
use crate::guard::TelemetryGuard;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use opentelemetry_sdk::Resource;
use std::collections::HashMap;
use std::path::Path;

/// Builder for the application configuration and telemetry pipeline.
///
/// # Example
///
/// ```no_run
/// use otel_fetch::{TelemetryBuilder, TelemetryError};
///
/// fn main() -> Result<(), TelemetryError> {
///     let _guard = TelemetryBuilder::new()
///         .with_file("otel-fetch.toml")
///         .with_env("OTEL_FETCH_")
///         .with_standard_env()
///         .endpoint("http://jaeger:4318")
///         .build()?;
///
///     tracing::info!("telemetry ready");
///     Ok(())
/// }
/// ```
#[must_use = "builders do nothing unless .build() is called"]
pub struct TelemetryBuilder {
    figment: Figment,
    custom_resource: Option<Resource>,
    resource_attributes: HashMap<String, String>,
}

impl TelemetryBuilder {
    /// Creates a builder seeded with [`AppConfig::default`].
    ///
    /// Defaults include:
    /// - Service `SampleApp` version `1.0.0.0`
    /// - Traces to console and to OTLP over HTTP/protobuf at `http://localhost:4318`
    /// - Metrics and logs to console only
    /// - Tracing subscriber initialisation enabled
    pub fn new() -> Self {
        Self::from_figment(Figment::from(Serialized::defaults(AppConfig::default())))
    }

    /// Creates a builder from an existing figment.
    pub fn from_figment(figment: Figment) -> Self {
        Self {
            figment,
            custom_resource: None,
            resource_attributes: HashMap::new(),
        }
    }

    /// Merges configuration from a TOML file. Missing files are skipped.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            self.figment = self.figment.merge(Toml::file(path));
        }
        self
    }

    /// Merges configuration from environment variables with the given prefix.
    ///
    /// Nesting is expressed with a double underscore, so field names keep
    /// their single underscores. With prefix `OTEL_FETCH_`:
    /// - `OTEL_FETCH_ENDPOINT__URL` → `endpoint.url`
    /// - `OTEL_FETCH_METRICS__OTLP` → `metrics.otlp`
    /// - `OTEL_FETCH_FETCH__WAIT_FOR_INPUT` → `fetch.wait_for_input`
    pub fn with_env(mut self, prefix: &str) -> Self {
        self.figment = self.figment.merge(Env::prefixed(prefix).split("__"));
        self
    }

    /// Merges the standard OpenTelemetry environment variables:
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT` → endpoint URL
    /// - `OTEL_EXPORTER_OTLP_PROTOCOL` → protocol (grpc, http/protobuf, http/json)
    /// - `OTEL_SERVICE_NAME` → service name
    /// - `OTEL_TRACES_EXPORTER` / `OTEL_METRICS_EXPORTER` / `OTEL_LOGS_EXPORTER`
    ///   → the sinks of that signal, a comma-separated list of `otlp` and
    ///   `console`; `none` exports nothing and installs no provider
    pub fn with_standard_env(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
            self = self.set("endpoint.url", endpoint);
        }

        if let Ok(protocol) = std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL") {
            let protocol = match protocol.as_str() {
                "grpc" => Protocol::Grpc,
                "http/json" => Protocol::HttpJson,
                _ => Protocol::HttpBinary,
            };
            self = self.protocol(protocol);
        }

        if let Ok(service_name) = std::env::var("OTEL_SERVICE_NAME") {
            self = self.service_name(service_name);
        }

        for (var, signal) in [
            ("OTEL_TRACES_EXPORTER", "traces"),
            ("OTEL_METRICS_EXPORTER", "metrics"),
            ("OTEL_LOGS_EXPORTER", "logs"),
        ] {
            if let Ok(exporters) = std::env::var(var) {
                let has = |name: &str| exporters.split(',').any(|e| e.trim() == name);
                self = self
                    .set(&format!("{signal}.otlp"), has("otlp"))
                    .set(&format!("{signal}.console"), has("console"));
            }
        }

        self
    }

    /// Sets the OTLP collector endpoint.
    ///
    /// For HTTP protocols, `/v1/traces`, `/v1/metrics` and `/v1/logs` are
    /// appended per signal.
    pub fn endpoint(self, url: impl Into<String>) -> Self {
        self.set("endpoint.url", url.into())
    }

    /// Sets the OTLP export protocol.
    pub fn protocol(self, protocol: Protocol) -> Self {
        self.set("endpoint.protocol", protocol.as_config_str())
    }

    /// Adds an HTTP header (or gRPC metadata entry) to every export request.
    pub fn header(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = format!("endpoint.headers.{}", key.into());
        self.set(&key, value.into())
    }

    /// Sets the service name. Also names the request counter.
    pub fn service_name(self, name: impl Into<String>) -> Self {
        self.set("resource.service_name", name.into())
    }

    /// Sets the service version.
    pub fn service_version(self, version: impl Into<String>) -> Self {
        self.set("resource.service_version", version.into())
    }

    /// Adds a resource attribute.
    pub fn resource_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_attributes.insert(key.into(), value.into());
        self
    }

    /// Provides a pre-built resource, replacing the configured one.
    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.custom_resource = Some(resource);
        self
    }

    /// Enables or disables the tracer provider.
    pub fn traces(self, enabled: bool) -> Self {
        self.set("traces.enabled", enabled)
    }

    /// Enables or disables the meter provider.
    pub fn metrics(self, enabled: bool) -> Self {
        self.set("metrics.enabled", enabled)
    }

    /// Enables or disables the logger provider.
    pub fn logs(self, enabled: bool) -> Self {
        self.set("logs.enabled", enabled)
    }

    /// Toggles OTLP export of traces. Default: on.
    pub fn traces_otlp(self, enabled: bool) -> Self {
        self.set("traces.otlp", enabled)
    }

    /// Toggles OTLP export of metrics. Default: off.
    pub fn metrics_otlp(self, enabled: bool) -> Self {
        self.set("metrics.otlp", enabled)
    }

    /// Toggles OTLP export of logs. Default: off.
    pub fn logs_otlp(self, enabled: bool) -> Self {
        self.set("logs.otlp", enabled)
    }

    /// Toggles the stdout exporters of all three signals. Default: on.
    pub fn console(self, enabled: bool) -> Self {
        self.set("traces.console", enabled)
            .set("metrics.console", enabled)
            .set("logs.console", enabled)
    }

    /// Sets the URL fetched when no argument is given.
    pub fn default_url(self, url: impl Into<String>) -> Self {
        self.set("fetch.default_url", url.into())
    }

    /// Whether the binary waits for a line on stdin before exiting.
    pub fn wait_for_input(self, wait: bool) -> Self {
        self.set("fetch.wait_for_input", wait)
    }

    /// Whether W3C trace context is injected into outgoing requests.
    pub fn propagate_context(self, propagate: bool) -> Self {
        self.set("fetch.propagate_context", propagate)
    }

    /// Disables automatic tracing subscriber initialisation.
    ///
    /// Without the subscriber, `tracing` log lines do not reach the logger
    /// provider.
    pub fn without_tracing_subscriber(self) -> Self {
        self.set("init_tracing_subscriber", false)
    }

    fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.figment = self.figment.merge(Serialized::default(key, value));
        self
    }

    /// Extracts the merged configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction fails or the endpoint URL is not http(s).
    pub fn extract_config(&self) -> Result<AppConfig, TelemetryError> {
        let mut config: AppConfig = self
            .figment
            .extract()
            .map_err(|e| TelemetryError::Config(Box::new(e)))?;

        // Attributes added one by one do not go through figment
        config
            .resource
            .attributes
            .extend(self.resource_attributes.clone());

        if let Some(ref url) = config.endpoint.url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(TelemetryError::InvalidEndpoint { url: url.clone() });
        }

        Ok(config)
    }

    /// Extracts the configuration and installs the telemetry pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration extraction fails
    /// - An OTLP exporter cannot be built
    /// - Tracing subscriber initialisation fails
    pub fn build(self) -> Result<TelemetryGuard, TelemetryError> {
        let config = self.extract_config()?;
        TelemetryGuard::install_with_resource(&config, self.custom_resource)
    }
}

impl Default for TelemetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
