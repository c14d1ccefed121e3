//! Prometheus metrics for the compose facade.
//!
//! One [`Metrics`] is built at startup and handed to the router state; every
//! series lives in its own registry rather than the process default.

use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    compose_requests: IntCounterVec,
    compose_errors: IntCounter,
    quota_rejections: IntCounter,
    http_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let compose_requests = IntCounterVec::new(
            Opts::new(
                "image_builder_compose_requests_total",
                "Compose requests by image type",
            ),
            &["image_type"],
        )?;
        let compose_errors = IntCounter::new(
            "image_builder_compose_errors_total",
            "Compose requests that failed with an internal error",
        )?;
        let quota_rejections = IntCounter::new(
            "image_builder_quota_rejections_total",
            "Compose requests rejected for exceeding the org quota",
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "image_builder_http_duration_seconds",
                "Time spent serving API requests",
            ),
            &["path"],
        )?;

        registry
            .register(Box::new(compose_requests.clone()))
            .context("Failed to register compose request counter")?;
        registry
            .register(Box::new(compose_errors.clone()))
            .context("Failed to register compose error counter")?;
        registry
            .register(Box::new(quota_rejections.clone()))
            .context("Failed to register quota rejection counter")?;
        registry
            .register(Box::new(http_duration.clone()))
            .context("Failed to register request duration histogram")?;

        Ok(Self {
            registry,
            compose_requests,
            compose_errors,
            quota_rejections,
            http_duration,
        })
    }

    pub fn compose_requested(&self, image_type: &str) {
        self.compose_requests.with_label_values(&[image_type]).inc();
    }

    pub fn compose_failed(&self) {
        self.compose_errors.inc();
    }

    pub fn quota_rejected(&self) {
        self.quota_rejections.inc();
    }

    pub fn observe_request(&self, path: &str, seconds: f64) {
        self.http_duration.with_label_values(&[path]).observe(seconds);
    }

    /// Text exposition format of every registered series.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics are not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_series() {
        let metrics = Metrics::new().unwrap();
        metrics.compose_requested("aws");
        metrics.compose_requested("aws");
        metrics.quota_rejected();
        metrics.observe_request("/composes", 0.02);

        let text = metrics.render().unwrap();
        assert!(text.contains("image_builder_compose_requests_total{image_type=\"aws\"} 2"));
        assert!(text.contains("image_builder_quota_rejections_total 1"));
        assert!(text.contains("image_builder_http_duration_seconds_count{path=\"/composes\"} 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.compose_failed();

        assert!(a.render().unwrap().contains("image_builder_compose_errors_total 1"));
        assert!(b.render().unwrap().contains("image_builder_compose_errors_total 0"));
    }
}
