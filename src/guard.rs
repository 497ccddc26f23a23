//! Telemetry provider lifecycle management.
//!
//! The [`TelemetryGuard`] owns the tracer, meter and logger providers. When
//! dropped, it flushes pending data and shuts the providers down.

use crate::config::{AppConfig, Protocol};
use crate::error::TelemetryError;
use opentelemetry::metrics::Meter;
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::{InstrumentationScope, KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{
    BatchConfigBuilder as LogBatchConfigBuilder, BatchLogProcessor, SdkLoggerProvider,
};
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder as TraceBatchConfigBuilder, BatchSpanProcessor, SdkTracerProvider,
};
use opentelemetry_semantic_conventions::resource::SERVICE_VERSION;
use std::collections::HashMap;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Targets whose events never reach the log bridge. Exporting them would
/// feed the exporter its own output.
const EXPORTER_TARGETS: &[&str] = &["opentelemetry", "reqwest", "hyper", "h2", "tonic", "tower"];

/// Guard that manages telemetry provider lifecycle.
///
/// On drop, flushes pending telemetry and shuts down providers.
/// Use [`shutdown()`](Self::shutdown) for explicit error handling.
pub struct TelemetryGuard {
    scope: InstrumentationScope,
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl TelemetryGuard {
    /// Installs providers, propagators and the subscriber described by `config`.
    ///
    /// Providers are registered globally so [`tracer()`](Self::tracer) and
    /// [`meter()`](Self::meter) hand out instruments bound to them.
    ///
    /// # Errors
    ///
    /// Fails if an OTLP exporter cannot be built or a global subscriber is
    /// already installed.
    pub fn install(config: &AppConfig) -> Result<Self, TelemetryError> {
        Self::install_with_resource(config, None)
    }

    pub(crate) fn install_with_resource(
        config: &AppConfig,
        custom_resource: Option<Resource>,
    ) -> Result<Self, TelemetryError> {
        let resource = custom_resource.unwrap_or_else(|| build_resource(config));

        let tracer_provider = if config.traces.has_exporter() {
            Some(build_tracer_provider(config, resource.clone())?)
        } else {
            None
        };

        let meter_provider = if config.metrics.has_exporter() {
            Some(build_meter_provider(config, resource.clone())?)
        } else {
            None
        };

        let logger_provider = if config.logs.has_exporter() {
            Some(build_logger_provider(config, resource)?)
        } else {
            None
        };

        if let Some(ref provider) = tracer_provider {
            global::set_tracer_provider(provider.clone());
        }
        if let Some(ref provider) = meter_provider {
            global::set_meter_provider(provider.clone());
        }

        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);
        global::set_text_map_propagator(propagator);

        if config.init_tracing_subscriber {
            init_subscriber(logger_provider.as_ref())?;
        }

        tracing::debug!(
            target: "otel_lifecycle",
            endpoint = %config.effective_endpoint(),
            traces = config.traces.enabled,
            metrics = config.metrics.enabled,
            logs = config.logs.enabled,
            "Telemetry installed"
        );

        Ok(Self {
            scope: InstrumentationScope::builder(config.resource.service_name.clone())
                .with_version(config.resource.service_version.clone())
                .build(),
            tracer_provider,
            meter_provider,
            logger_provider,
        })
    }

    /// Returns a tracer scoped to the service name and version.
    ///
    /// Falls back to the current global provider when this guard installed
    /// no tracer provider.
    pub fn tracer(&self) -> global::BoxedTracer {
        global::tracer_with_scope(self.scope.clone())
    }

    /// Returns a meter scoped to the service name and version.
    ///
    /// Falls back to the current global provider when this guard installed
    /// no meter provider.
    pub fn meter(&self) -> Meter {
        global::meter_with_scope(self.scope.clone())
    }

    /// Returns the tracer provider if configured.
    pub fn tracer_provider(&self) -> Option<&SdkTracerProvider> {
        self.tracer_provider.as_ref()
    }

    /// Returns the meter provider if configured.
    pub fn meter_provider(&self) -> Option<&SdkMeterProvider> {
        self.meter_provider.as_ref()
    }

    /// Returns the logger provider if configured.
    pub fn logger_provider(&self) -> Option<&SdkLoggerProvider> {
        self.logger_provider.as_ref()
    }

    /// Flushes all configured providers. Errors are logged but not returned.
    pub fn flush(&self) {
        if let Some(provider) = &self.tracer_provider
            && let Err(e) = provider.force_flush()
        {
            tracing::error!(target: "otel_lifecycle", error = %e, "Failed to flush tracer provider");
        }

        if let Some(provider) = &self.meter_provider
            && let Err(e) = provider.force_flush()
        {
            tracing::error!(target: "otel_lifecycle", error = %e, "Failed to flush meter provider");
        }

        if let Some(provider) = &self.logger_provider
            && let Err(e) = provider.force_flush()
        {
            tracing::error!(target: "otel_lifecycle", error = %e, "Failed to flush logger provider");
        }
    }

    /// Shuts down all configured providers, returning the first error if any.
    ///
    /// Every provider is flushed and shut down even when an earlier one
    /// fails.
    pub fn shutdown(mut self) -> Result<(), TelemetryError> {
        let mut first_error = None;

        if let Some(provider) = self.tracer_provider.take() {
            let flushed = provider.force_flush().map_err(TelemetryError::Flush);
            let stopped = provider.shutdown().map_err(TelemetryError::Shutdown);
            keep_first(&mut first_error, flushed.and(stopped));
        }

        if let Some(provider) = self.logger_provider.take() {
            let flushed = provider.force_flush().map_err(TelemetryError::Flush);
            let stopped = provider.shutdown().map_err(TelemetryError::Shutdown);
            keep_first(&mut first_error, flushed.and(stopped));
        }

        if let Some(provider) = self.meter_provider.take() {
            let flushed = provider.force_flush().map_err(TelemetryError::Flush);
            let stopped = provider.shutdown().map_err(TelemetryError::Shutdown);
            keep_first(&mut first_error, flushed.and(stopped));
        }

        first_error.map_or(Ok(()), Err)
    }
}

fn keep_first(first: &mut Option<TelemetryError>, outcome: Result<(), TelemetryError>) {
    if let Err(e) = outcome
        && first.is_none()
    {
        *first = Some(e);
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            let _ = provider.force_flush();
            if let Err(e) = provider.shutdown() {
                tracing::error!(target: "otel_lifecycle", error = %e, "Failed to shut down tracer provider");
            }
        }

        if let Some(provider) = self.logger_provider.take() {
            let _ = provider.force_flush();
            if let Err(e) = provider.shutdown() {
                tracing::error!(target: "otel_lifecycle", error = %e, "Failed to shut down logger provider");
            }
        }

        if let Some(provider) = self.meter_provider.take() {
            let _ = provider.force_flush();
            if let Err(e) = provider.shutdown() {
                tracing::error!(target: "otel_lifecycle", error = %e, "Failed to shut down meter provider");
            }
        }
    }
}

fn build_resource(config: &AppConfig) -> Resource {
    let mut attributes: Vec<KeyValue> = config
        .resource
        .attributes
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
        .collect();

    attributes.push(KeyValue::new(
        SERVICE_VERSION,
        config.resource.service_version.clone(),
    ));

    Resource::builder()
        .with_service_name(config.resource.service_name.clone())
        .with_attributes(attributes)
        .build()
}

fn build_tonic_metadata(headers: &HashMap<String, String>) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (key, value) in headers {
        if let (Ok(k), Ok(v)) = (
            key.to_lowercase().parse::<MetadataKey<_>>(),
            value.parse::<MetadataValue<_>>(),
        ) {
            metadata.insert(k, v);
        }
    }
    metadata
}

macro_rules! build_otlp_exporter {
    ($config:expr, $exporter_type:ident, $signal_path:expr, $error_variant:ident) => {{
        let headers = &$config.endpoint.headers;
        match $config.endpoint.protocol {
            Protocol::Grpc => {
                let mut builder = opentelemetry_otlp::$exporter_type::builder()
                    .with_tonic()
                    .with_endpoint($config.effective_endpoint())
                    .with_timeout($config.endpoint.timeout);
                if !headers.is_empty() {
                    builder = builder.with_metadata(build_tonic_metadata(headers));
                }
                builder.build().map_err(TelemetryError::$error_variant)?
            }
            Protocol::HttpBinary | Protocol::HttpJson => {
                let protocol = if $config.endpoint.protocol == Protocol::HttpJson {
                    opentelemetry_otlp::Protocol::HttpJson
                } else {
                    opentelemetry_otlp::Protocol::HttpBinary
                };
                let mut builder = opentelemetry_otlp::$exporter_type::builder()
                    .with_http()
                    .with_endpoint($config.signal_endpoint($signal_path))
                    .with_timeout($config.endpoint.timeout)
                    .with_protocol(protocol);
                if !headers.is_empty() {
                    builder = builder.with_headers(headers.clone());
                }
                builder.build().map_err(TelemetryError::$error_variant)?
            }
        }
    }};
}

fn build_tracer_provider(
    config: &AppConfig,
    resource: Resource,
) -> Result<SdkTracerProvider, TelemetryError> {
    let signal = &config.traces;
    let mut builder = SdkTracerProvider::builder().with_resource(resource);

    if signal.console {
        builder = builder.with_simple_exporter(opentelemetry_stdout::SpanExporter::default());
    }

    if signal.otlp {
        let exporter = build_otlp_exporter!(config, SpanExporter, "/v1/traces", TraceExporter);
        let batch_config = TraceBatchConfigBuilder::default()
            .with_max_queue_size(signal.batch.max_queue_size)
            .with_max_export_batch_size(signal.batch.max_export_batch_size)
            .with_scheduled_delay(signal.batch.scheduled_delay)
            .build();
        builder = builder.with_span_processor(
            BatchSpanProcessor::builder(exporter)
                .with_batch_config(batch_config)
                .build(),
        );
    }

    Ok(builder.build())
}

fn build_meter_provider(
    config: &AppConfig,
    resource: Resource,
) -> Result<SdkMeterProvider, TelemetryError> {
    let signal = &config.metrics;
    let mut builder = SdkMeterProvider::builder().with_resource(resource);

    if signal.console {
        let reader = PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(signal.batch.scheduled_delay)
            .build();
        builder = builder.with_reader(reader);
    }

    if signal.otlp {
        let exporter = build_otlp_exporter!(config, MetricExporter, "/v1/metrics", MetricExporter);
        let reader = PeriodicReader::builder(exporter)
            .with_interval(signal.batch.scheduled_delay)
            .build();
        builder = builder.with_reader(reader);
    }

    Ok(builder.build())
}

fn build_logger_provider(
    config: &AppConfig,
    resource: Resource,
) -> Result<SdkLoggerProvider, TelemetryError> {
    let signal = &config.logs;
    let mut builder = SdkLoggerProvider::builder().with_resource(resource);

    if signal.console {
        builder = builder.with_simple_exporter(opentelemetry_stdout::LogExporter::default());
    }

    if signal.otlp {
        let exporter = build_otlp_exporter!(config, LogExporter, "/v1/logs", LogExporter);
        let batch_config = LogBatchConfigBuilder::default()
            .with_max_queue_size(signal.batch.max_queue_size)
            .with_max_export_batch_size(signal.batch.max_export_batch_size)
            .with_scheduled_delay(signal.batch.scheduled_delay)
            .build();
        builder = builder.with_log_processor(
            BatchLogProcessor::builder(exporter)
                .with_batch_config(batch_config)
                .build(),
        );
    }

    Ok(builder.build())
}

fn is_application_event(metadata: &tracing::Metadata<'_>) -> bool {
    let target = metadata.target();
    !EXPORTER_TARGETS
        .iter()
        .any(|prefix| target.starts_with(prefix))
}

fn init_subscriber(logger_provider: Option<&SdkLoggerProvider>) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout belongs to the response body and the console exporters
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .without_time();

    let log_layer = logger_provider.map(|provider| {
        OpenTelemetryTracingBridge::new(provider).with_filter(filter_fn(is_application_event))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(log_layer)
        .try_init()?;

    Ok(())
}
