//! Prometheus metrics for the gateway.

use std::time::Duration;

use axum::http::StatusCode;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

pub struct Metrics {
    registry: Registry,
    http_requests: IntCounterVec,
    backend_duration: HistogramVec,
    backend_errors: IntCounterVec,
    stream_chunks: IntCounter,
    model_loaded: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("shim_http_requests_total", "HTTP requests by route and status"),
            &["endpoint", "status"],
        )?;
        let backend_duration = HistogramVec::new(
            HistogramOpts::new(
                "shim_backend_request_duration_seconds",
                "Latency of inference backend calls",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
            &["operation"],
        )?;
        let backend_errors = IntCounterVec::new(
            Opts::new("shim_backend_errors_total", "Failed inference backend calls"),
            &["operation", "code"],
        )?;
        let stream_chunks = IntCounter::new(
            "shim_stream_chunks_total",
            "Content chunks relayed to streaming clients",
        )?;
        let model_loaded = IntGauge::new("shim_model_loaded", "1 once the served model is loaded")?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(backend_duration.clone()))?;
        registry.register(Box::new(backend_errors.clone()))?;
        registry.register(Box::new(stream_chunks.clone()))?;
        registry.register(Box::new(model_loaded.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            backend_duration,
            backend_errors,
            stream_chunks,
            model_loaded,
        })
    }

    pub fn record_request(&self, endpoint: &str, status: StatusCode) {
        self.http_requests
            .with_label_values(&[endpoint, status.as_str()])
            .inc();
    }

    pub fn observe_backend(&self, operation: &str, elapsed: Duration) {
        self.backend_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_backend_error(&self, operation: &str, code: &str) {
        self.backend_errors.with_label_values(&[operation, code]).inc();
    }

    pub fn record_stream_chunk(&self) {
        self.stream_chunks.inc();
    }

    pub fn set_model_loaded(&self, loaded: bool) {
        self.model_loaded.set(i64::from(loaded));
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("/v1/chat/completions", StatusCode::OK);
        metrics.observe_backend("chat", Duration::from_millis(120));
        metrics.record_backend_error("pull", "backend_unavailable");
        metrics.set_model_loaded(true);

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"shim_http_requests_total{endpoint="/v1/chat/completions",status="200"} 1"#));
        assert!(text.contains("shim_backend_request_duration_seconds_count{operation=\"chat\"} 1"));
        assert!(text.contains(r#"shim_backend_errors_total{code="backend_unavailable",operation="pull"} 1"#));
        assert!(text.contains("shim_model_loaded 1"));
    }
}
