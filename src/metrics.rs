// Prometheus metrics registry and HTTP instrumentation

use crate::core::errors::AppError;
use axum::{extract::Request, middleware::Next, response::Response};
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;

/// Application metrics
///
/// One registry per process; handles are cheap to clone through the `Arc`.
pub struct Metrics {
    registry: Registry,
    /// HTTP requests by method, path template and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency by method and path template.
    pub http_request_duration_seconds: HistogramVec,
    /// Completed task attempts by kind and outcome (succeeded, failed, dead).
    pub tasks_processed_total: CounterVec,
    /// Current depth of each priority queue.
    pub tasks_queue_depth: GaugeVec,
}

impl Metrics {
    /// Create the registry and register all collectors
    pub fn new() -> Result<Arc<Self>, AppError> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )
        .map_err(|e| AppError::ConfigurationError(format!("Failed to create metric: {}", e)))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["method", "path"],
        )
        .map_err(|e| AppError::ConfigurationError(format!("Failed to create metric: {}", e)))?;

        let tasks_processed_total = CounterVec::new(
            Opts::new("tasks_processed_total", "Completed task attempts"),
            &["kind", "outcome"],
        )
        .map_err(|e| AppError::ConfigurationError(format!("Failed to create metric: {}", e)))?;

        let tasks_queue_depth = GaugeVec::new(
            Opts::new("tasks_queue_depth", "Tasks waiting per priority queue"),
            &["queue"],
        )
        .map_err(|e| AppError::ConfigurationError(format!("Failed to create metric: {}", e)))?;

        for collector in [
            Box::new(http_requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(http_request_duration_seconds.clone()),
            Box::new(tasks_processed_total.clone()),
            Box::new(tasks_queue_depth.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| AppError::ConfigurationError(format!("Failed to register metric: {}", e)))?;
        }

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            tasks_processed_total,
            tasks_queue_depth,
        }))
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, AppError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AppError::StateError(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| AppError::StateError(format!("Metrics output was not UTF-8: {}", e)))
    }

    /// Record a completed task attempt
    pub fn record_task(&self, kind: &str, outcome: &str) {
        self.tasks_processed_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Update the queue depth gauge for one priority queue
    pub fn set_queue_depth(&self, queue: &str, depth: u64) {
        self.tasks_queue_depth
            .with_label_values(&[queue])
            .set(depth as f64);
    }
}

/// Axum middleware that records request counts and latency
///
/// Uses the matched path template (e.g. `/v1/tasks/:id`) rather than the raw
/// URI, so ids don't explode label cardinality.
pub async fn track_metrics(
    axum::extract::State(metrics): axum::extract::State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let start = Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();
    metrics
        .http_requests_total
        .with_label_values(&[&method, &path, &status])
        .inc();
    metrics
        .http_request_duration_seconds
        .with_label_values(&[&method, &path])
        .observe(elapsed);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_metrics() {
        let metrics = Metrics::new().unwrap();

        metrics
            .http_requests_total
            .with_label_values(&["GET", "/health", "200"])
            .inc();
        metrics.record_task("echo", "succeeded");
        metrics.set_queue_depth("high", 3);

        let output = metrics.render().unwrap();
        assert!(output.contains("http_requests_total"));
        assert!(output.contains("tasks_processed_total"));
        assert!(output.contains("tasks_queue_depth"));
        assert!(output.contains("queue=\"high\""));
    }

    #[test]
    fn test_counter_increments() {
        let metrics = Metrics::new().unwrap();

        metrics.record_task("delay", "failed");
        metrics.record_task("delay", "failed");

        let value = metrics
            .tasks_processed_total
            .with_label_values(&["delay", "failed"])
            .get();
        assert_eq!(value as u64, 2);
    }
}
