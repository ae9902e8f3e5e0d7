//! Operation metrics and tracing spans.
//!
//! With the `metrics` feature every model operation is counted and timed
//! through OpenTelemetry and exposed by a Prometheus exporter. With the
//! `tracing` feature each operation runs inside a span.
//!
//! The exporter registers with the default Prometheus registry, so
//! [`gather_text`] (or `prometheus::gather()`) sees the operation metrics.

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
    KeyValue,
};
#[cfg(feature = "metrics")]
use opentelemetry_prometheus::PrometheusExporter;
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics::SdkMeterProvider;

#[cfg(feature = "metrics")]
pub static METRICS: Lazy<TidemarkMetrics> = Lazy::new(TidemarkMetrics::init);

#[cfg(feature = "metrics")]
pub struct TidemarkMetrics {
    pub exporter: PrometheusExporter,
    pub operations_total: Counter<u64>,
    pub operation_errors_total: Counter<u64>,
    pub operation_duration: Histogram<f64>,
}

#[cfg(feature = "metrics")]
impl TidemarkMetrics {
    pub fn init() -> Self {
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(prometheus::default_registry().clone())
            .build()
            .expect("failed to build prometheus exporter");
        let provider = SdkMeterProvider::builder().with_reader(exporter.clone()).build();
        global::set_meter_provider(provider);
        let meter = global::meter("tidemark");

        let operations_total = meter.u64_counter("tidemark_operations_total")
            .with_description("Total model operations executed").build();

        let operation_errors_total = meter.u64_counter("tidemark_operation_errors_total")
            .with_description("Model operations that returned an error").build();

        let operation_duration = meter.f64_histogram("tidemark_operation_duration_seconds")
            .with_description("Duration of model operations").build();

        Self {
            exporter,
            operations_total,
            operation_errors_total,
            operation_duration,
        }
    }

    pub fn record_operation(&self, model: &str, method: &str, elapsed: std::time::Duration, ok: bool) {
        let attributes = [
            KeyValue::new("model", model.to_string()),
            KeyValue::new("method", method.to_string()),
        ];
        self.operations_total.add(1, &attributes);
        if !ok {
            self.operation_errors_total.add(1, &attributes);
        }
        self.operation_duration.record(elapsed.as_secs_f64(), &attributes);
    }
}

/// Render every registered metric in the Prometheus text format.
#[cfg(feature = "metrics")]
pub fn gather_text() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;

    Lazy::force(&METRICS);
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    /// Span wrapping one model operation.
    pub fn operation_span(model: &str, method: &str) -> tracing::Span {
        tracing::info_span!("tidemark.operation", model = %model, method = %method)
    }
}
