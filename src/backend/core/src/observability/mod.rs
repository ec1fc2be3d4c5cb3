//! Observability: Distributed Tracing, Metrics, and Logging.

use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the observability stack.
///
/// `RUST_LOG` wins over the configured log level when set.
pub fn init(service_name: &str, config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    // Set up OpenTelemetry tracing if endpoint is provided
    let telemetry_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .with_trace_config(
                    opentelemetry_sdk::trace::config()
                        .with_resource(opentelemetry_sdk::Resource::new(vec![
                            opentelemetry::KeyValue::new("service.name", service_name.to_string()),
                        ])),
                )
                .install_batch(opentelemetry_sdk::runtime::Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let json_layer = config
        .json_logging
        .then(|| tracing_subscriber::fmt::layer().json());
    let pretty_layer = (!config.json_logging).then(|| tracing_subscriber::fmt::layer());

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry_layer)
        .with(json_layer)
        .with(pretty_layer)
        .try_init()?;

    Ok(())
}

/// Shutdown OpenTelemetry.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Metrics registry and helpers.
pub mod metrics {
    use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
    use std::time::Duration;

    /// Install the Prometheus recorder and register metric descriptions.
    ///
    /// The returned handle renders the exposition text for `/metrics`.
    pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        register_metrics();
        Ok(handle)
    }

    /// Register all metric descriptions.
    pub fn register_metrics() {
        // Counters
        describe_counter!(
            "portcullis_decisions_total",
            "Authorization decisions by result"
        );
        describe_counter!(
            "portcullis_sync_total",
            "Directory syncs by outcome"
        );
        describe_counter!(
            "portcullis_auth_failures_total",
            "Rejected authentications by reason"
        );
        describe_counter!(
            "portcullis_errors_total",
            "Errors by code and category"
        );

        // Gauges
        describe_gauge!(
            "portcullis_policy_grants",
            "Grants in the installed policy snapshot"
        );
        describe_gauge!(
            "portcullis_policy_assignments",
            "Role assignments in the installed policy snapshot"
        );

        // Histograms
        describe_histogram!(
            "portcullis_sync_duration_seconds",
            "Directory sync duration in seconds"
        );
    }

    /// Record the size of a newly installed snapshot.
    pub fn record_policy_size(grants: usize, assignments: usize) {
        gauge!("portcullis_policy_grants").set(grants as f64);
        gauge!("portcullis_policy_assignments").set(assignments as f64);
    }

    /// Record one authorization decision (`allow` or `deny`).
    pub fn record_decision(result: &'static str) {
        counter!("portcullis_decisions_total", "result" => result).increment(1);
    }

    /// Record a sync attempt.
    pub fn record_sync(outcome: &'static str, duration: Duration) {
        counter!("portcullis_sync_total", "outcome" => outcome).increment(1);
        if !duration.is_zero() {
            histogram!("portcullis_sync_duration_seconds", "outcome" => outcome)
                .record(duration.as_secs_f64());
        }
    }
}
