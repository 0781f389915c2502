//! Prometheus metrics for monitoring folio.
//!
//! Covers lookup outcomes, cache effectiveness, queue pressure, upstream
//! latency and cover image writes.

use crate::lookup::CoalescingQueue;
use prometheus::{CounterVec, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// All metrics for the folio service
pub struct Metrics {
    pub registry: Registry,
    started_at: Instant,

    // Lookup metrics
    pub lookup_total: CounterVec,
    pub lookup_duration_seconds: HistogramVec,
    pub cache_requests_total: CounterVec,

    // Queue metrics
    pub queue_depth: Gauge,
    pub queue_in_flight: Gauge,
    pub queue_capacity: Gauge,
    pub queue_wait_seconds: Histogram,

    // Upstream metrics
    pub upstream_requests_total: CounterVec,
    pub upstream_request_duration_seconds: HistogramVec,

    // Asset metrics
    pub asset_writes_total: CounterVec,

    // System metrics
    pub uptime_seconds: Gauge,
}

impl Metrics {
    /// Create a new metrics registry with all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let lookup_total = CounterVec::new(
            Opts::new("folio_lookup_total", "Book lookups by how they were served"),
            &["outcome"],
        )?;
        registry.register(Box::new(lookup_total.clone()))?;

        let lookup_duration_seconds = HistogramVec::new(
            HistogramOpts::new("folio_lookup_duration_seconds", "End-to-end lookup duration")
                .buckets(vec![0.0005, 0.005, 0.05, 0.25, 1.0, 2.5, 5.0, 15.0, 30.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(lookup_duration_seconds.clone()))?;

        let cache_requests_total = CounterVec::new(
            Opts::new("folio_cache_requests_total", "Metadata cache reads"),
            &["result"],
        )?;
        registry.register(Box::new(cache_requests_total.clone()))?;

        let queue_depth = Gauge::with_opts(Opts::new(
            "folio_queue_depth",
            "Lookups waiting for the worker",
        ))?;
        registry.register(Box::new(queue_depth.clone()))?;

        let queue_in_flight = Gauge::with_opts(Opts::new(
            "folio_queue_in_flight",
            "Distinct identifiers queued or being fetched",
        ))?;
        registry.register(Box::new(queue_in_flight.clone()))?;

        let queue_capacity = Gauge::with_opts(Opts::new(
            "folio_queue_capacity",
            "Configured lookup queue capacity",
        ))?;
        registry.register(Box::new(queue_capacity.clone()))?;

        let queue_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "folio_queue_wait_seconds",
                "Time between admission and the worker picking a request up",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(queue_wait_seconds.clone()))?;

        let upstream_requests_total = CounterVec::new(
            Opts::new("folio_upstream_requests_total", "Catalog API requests"),
            &["status"],
        )?;
        registry.register(Box::new(upstream_requests_total.clone()))?;

        let upstream_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "folio_upstream_request_duration_seconds",
                "Catalog API request duration",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["status"],
        )?;
        registry.register(Box::new(upstream_request_duration_seconds.clone()))?;

        let asset_writes_total = CounterVec::new(
            Opts::new("folio_asset_writes_total", "Cover image persist attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(asset_writes_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "folio_uptime_seconds",
            "Time since process start",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry,
            started_at: Instant::now(),
            lookup_total,
            lookup_duration_seconds,
            cache_requests_total,
            queue_depth,
            queue_in_flight,
            queue_capacity,
            queue_wait_seconds,
            upstream_requests_total,
            upstream_request_duration_seconds,
            asset_writes_total,
            uptime_seconds,
        })
    }

    /// Record a finished lookup
    pub fn record_lookup(&self, outcome: &str, duration_secs: f64) {
        self.lookup_total.with_label_values(&[outcome]).inc();
        self.lookup_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn record_cache(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_requests_total.with_label_values(&[result]).inc();
    }

    pub fn record_queue_wait(&self, wait_secs: f64) {
        self.queue_wait_seconds.observe(wait_secs);
    }

    /// Record a catalog API request
    pub fn record_upstream_request(&self, status: &str, duration_secs: f64) {
        self.upstream_requests_total
            .with_label_values(&[status])
            .inc();
        self.upstream_request_duration_seconds
            .with_label_values(&[status])
            .observe(duration_secs);
    }

    pub fn record_asset_write(&self, outcome: &str) {
        self.asset_writes_total.with_label_values(&[outcome]).inc();
    }

    /// Update queue gauges
    pub fn update_queue_metrics(&self, queue: &CoalescingQueue) {
        self.queue_depth.set(queue.len() as f64);
        self.queue_in_flight.set(queue.in_flight() as f64);
        self.queue_capacity.set(queue.capacity() as f64);
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64());

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<Metrics>;

/// Create a shared metrics instance
pub fn create_metrics() -> anyhow::Result<SharedMetrics> {
    Ok(Arc::new(Metrics::new()?))
}
