use anyhow::{Context, Result};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::SdkMeterProvider, Resource};
use std::time::Duration;
use tracing::info;

/// Dispatch metrics
pub struct DispatchMetrics {
    // Request outcomes
    pub requests: Counter<u64>,

    // Capability lifecycle
    pub actions_minted: Counter<u64>,
    pub sessions_created: Counter<u64>,

    // Forwarded handler calls
    pub handler_latency: Histogram<f64>,
}

impl DispatchMetrics {
    pub fn new(meter: &Meter) -> Self {
        let requests = meter
            .u64_counter("actiongate.dispatch.requests")
            .with_description("Dispatched requests by outcome")
            .build();

        let actions_minted = meter
            .u64_counter("actiongate.actions.minted")
            .with_description("Action tokens registered")
            .build();

        let sessions_created = meter
            .u64_counter("actiongate.sessions.created")
            .with_description("Sessions created through the create-session action")
            .build();

        let handler_latency = meter
            .f64_histogram("actiongate.handler.latency_ms")
            .with_description("Action service handle_event latency in milliseconds")
            .build();

        Self {
            requests,
            actions_minted,
            sessions_created,
            handler_latency,
        }
    }

    pub fn record_request(&self, outcome: &str) {
        self.requests
            .add(1, &[KeyValue::new("outcome", outcome.to_string())]);
    }

    pub fn record_action_minted(&self, target: &str) {
        self.actions_minted
            .add(1, &[KeyValue::new("target", target.to_string())]);
    }

    pub fn record_session_created(&self) {
        self.sessions_created.add(1, &[]);
    }

    pub fn record_handler_latency(&self, duration_ms: f64, handler: &str) {
        self.handler_latency.record(
            duration_ms,
            &[KeyValue::new("handler", handler.to_string())],
        );
    }
}

/// Install an OTLP/HTTP metrics pipeline and build the dispatch instruments.
pub fn init_telemetry(
    endpoint: &str,
    service_name: &str,
) -> Result<(SdkMeterProvider, DispatchMetrics)> {
    info!("Initializing OTLP telemetry: endpoint={}", endpoint);

    let export_config = opentelemetry_otlp::ExportConfig {
        endpoint: Some(endpoint.to_string()),
        timeout: Duration::from_secs(10),
        ..Default::default()
    };

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_export_config(export_config)
        .build()
        .context("building OTLP metric exporter")?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(
        exporter,
        opentelemetry_sdk::runtime::Tokio,
    )
    .with_interval(Duration::from_secs(30))
    .build();

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(provider.clone());

    let meter = global::meter("actiongate");
    let metrics = DispatchMetrics::new(&meter);

    info!("OTLP telemetry initialized");

    Ok((provider, metrics))
}

pub fn shutdown_telemetry(provider: SdkMeterProvider) -> Result<()> {
    info!("Shutting down telemetry");
    provider
        .shutdown()
        .context("shutting down meter provider")?;
    Ok(())
}
