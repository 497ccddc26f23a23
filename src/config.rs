//! Configuration types for telemetry and the fetch itself.
//!
//! These types are deserialised through figment, so every struct carries
//! `#[serde(default)]` and any layer may set only the keys it cares about.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// URL fetched when none is given on the command line.
pub const DEFAULT_URL: &str = "http://numbersapi.com/random/math?json";

/// Service name used for the resource, the instrumentation scope and the
/// request counter prefix.
pub const DEFAULT_SERVICE_NAME: &str = "SampleApp";

/// Service version used for the resource and the instrumentation scope.
pub const DEFAULT_SERVICE_VERSION: &str = "1.0.0.0";

/// OTLP export protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// gRPC protocol (default port 4317).
    Grpc,
    /// HTTP with Protocol Buffers encoding (default port 4318).
    #[default]
    #[serde(alias = "http_binary", alias = "http-binary")]
    HttpBinary,
    /// HTTP with JSON encoding (default port 4318).
    #[serde(alias = "http_json", alias = "http-json")]
    HttpJson,
}

impl Protocol {
    /// Returns the default collector endpoint for this protocol.
    #[must_use]
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Protocol::Grpc => "http://localhost:4317",
            Protocol::HttpBinary | Protocol::HttpJson => "http://localhost:4318",
        }
    }

    /// Returns the lowercase key figment expects for this protocol.
    #[must_use]
    pub(crate) fn as_config_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::HttpBinary => "httpbinary",
            Protocol::HttpJson => "httpjson",
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Collector endpoint used by the OTLP exporters.
    pub endpoint: EndpointConfig,

    /// Resource configuration.
    pub resource: ResourceConfig,

    /// Traces configuration. Console and OTLP export on by default.
    pub traces: SignalConfig,

    /// Metrics configuration. Console export only by default.
    pub metrics: SignalConfig,

    /// Logs configuration. Console export only by default.
    pub logs: SignalConfig,

    /// Whether to initialise the tracing subscriber and log bridge.
    pub init_tracing_subscriber: bool,

    /// Behaviour of the fetch itself.
    pub fetch: FetchConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            resource: ResourceConfig::default(),
            traces: SignalConfig::console_and_otlp(),
            metrics: SignalConfig::console_only(),
            logs: SignalConfig::console_only(),
            init_tracing_subscriber: true,
            fetch: FetchConfig::default(),
        }
    }
}

impl AppConfig {
    /// Returns the effective endpoint URL, using protocol defaults if not specified.
    #[must_use]
    pub fn effective_endpoint(&self) -> String {
        self.endpoint
            .url
            .clone()
            .unwrap_or_else(|| self.endpoint.protocol.default_endpoint().to_string())
    }

    /// Returns the endpoint URL for a specific signal type.
    ///
    /// HTTP protocols get the signal path appended; gRPC uses the base URL.
    #[must_use]
    pub fn signal_endpoint(&self, signal_path: &str) -> String {
        let base = self.effective_endpoint();
        let base = base.trim_end_matches('/');

        match self.endpoint.protocol {
            Protocol::Grpc => base.to_string(),
            Protocol::HttpBinary | Protocol::HttpJson => format!("{base}{signal_path}"),
        }
    }

    /// Name of the request counter, `<service name>-counter`.
    #[must_use]
    pub fn counter_name(&self) -> String {
        format!("{}-counter", self.resource.service_name)
    }
}

/// Endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// OTLP endpoint URL. Falls back to the protocol's default.
    pub url: Option<String>,

    /// Export protocol.
    pub protocol: Protocol,

    /// Export request timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Headers sent with every export request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            protocol: Protocol::default(),
            timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }
}

/// Resource configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Service name.
    pub service_name: String,

    /// Service version.
    pub service_version: String,

    /// Additional resource attributes.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_version: DEFAULT_SERVICE_VERSION.to_string(),
            attributes: HashMap::new(),
        }
    }
}

/// Configuration for an individual signal (traces, metrics, logs).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Whether a provider is installed for this signal at all.
    pub enabled: bool,

    /// Export to stdout.
    pub console: bool,

    /// Export to the OTLP collector endpoint.
    pub otlp: bool,

    /// Batch export configuration for the OTLP exporter.
    pub batch: BatchConfig,
}

impl SignalConfig {
    /// Enabled, exporting to both the console and the collector.
    #[must_use]
    pub fn console_and_otlp() -> Self {
        Self {
            enabled: true,
            console: true,
            otlp: true,
            batch: BatchConfig::default(),
        }
    }

    /// Enabled, exporting to the console only.
    #[must_use]
    pub fn console_only() -> Self {
        Self {
            enabled: true,
            console: true,
            otlp: false,
            batch: BatchConfig::default(),
        }
    }

    /// True when the signal is enabled and has somewhere to go.
    #[must_use]
    pub fn has_exporter(&self) -> bool {
        self.enabled && (self.console || self.otlp)
    }
}

/// Batch exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum queue size.
    pub max_queue_size: usize,

    /// Maximum batch size for export.
    pub max_export_batch_size: usize,

    /// Delay between exports. Also the metric reader interval.
    #[serde(with = "humantime_serde")]
    pub scheduled_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
        }
    }
}

/// Behaviour of the instrumented fetch and the binary around it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// URL used when no positional argument is given.
    pub default_url: String,

    /// Block on a line from stdin after printing the body.
    pub wait_for_input: bool,

    /// Inject W3C trace context headers into the outgoing request.
    pub propagate_context: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            default_url: DEFAULT_URL.to_string(),
            wait_for_input: true,
            propagate_context: true,
        }
    }
}
