//! Pipeline counters
//!
//! Each role owns its own `prometheus::Registry`; handles are passed into
//! the producer, consumer and API explicitly. Nothing touches the global
//! default registry.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::Result;

/// Stage label values for producer failures
pub const STAGE_ACQUIRE: &str = "acquire";
pub const STAGE_PUBLISH: &str = "publish";

/// Render a registry in Prometheus text exposition format
pub fn encode_registry(registry: &Registry) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

// =============================================================================
// Ingestion Metrics
// =============================================================================

/// Counters shared by the producer and consumer stages
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    inserted_rows: IntCounter,
    invalid_messages: IntCounter,
    requeued_messages: IntCounter,
    published: IntCounter,
    producer_failures: IntCounterVec,
}

impl PipelineMetrics {
    /// Create and register every pipeline counter on a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let inserted_rows = IntCounter::new("weather_inserted_rows", "Total rows inserted")?;
        let invalid_messages = IntCounter::new("weather_invalid_msg", "Total invalid messages")?;
        let requeued_messages = IntCounter::new(
            "weather_requeued_msg",
            "Total messages negatively acknowledged with requeue",
        )?;
        let published = IntCounter::new(
            "weather_published_total",
            "Total observations confirmed by the broker",
        )?;
        let producer_failures = IntCounterVec::new(
            Opts::new(
                "weather_producer_failures_total",
                "Total failed producer cycles",
            ),
            &["stage"],
        )?;

        registry.register(Box::new(inserted_rows.clone()))?;
        registry.register(Box::new(invalid_messages.clone()))?;
        registry.register(Box::new(requeued_messages.clone()))?;
        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(producer_failures.clone()))?;

        Ok(Self {
            registry,
            inserted_rows,
            invalid_messages,
            requeued_messages,
            published,
            producer_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Add rows actually written (0 for a suppressed duplicate)
    pub fn record_inserted(&self, rows: u64) {
        self.inserted_rows.inc_by(rows);
    }

    pub fn record_invalid(&self) {
        self.invalid_messages.inc();
    }

    pub fn record_requeued(&self) {
        self.requeued_messages.inc();
    }

    pub fn record_published(&self) {
        self.published.inc();
    }

    pub fn record_producer_failure(&self, stage: &str) {
        self.producer_failures.with_label_values(&[stage]).inc();
    }

    pub fn inserted_rows(&self) -> u64 {
        self.inserted_rows.get()
    }

    pub fn invalid_messages(&self) -> u64 {
        self.invalid_messages.get()
    }

    pub fn requeued_messages(&self) -> u64 {
        self.requeued_messages.get()
    }

    pub fn published(&self) -> u64 {
        self.published.get()
    }

    pub fn producer_failures(&self, stage: &str) -> u64 {
        self.producer_failures.with_label_values(&[stage]).get()
    }

    /// Text exposition of every pipeline counter
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_registry(&self.registry)
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics")
            .field("inserted_rows", &self.inserted_rows())
            .field("invalid_messages", &self.invalid_messages())
            .field("requeued_messages", &self.requeued_messages())
            .field("published", &self.published())
            .finish()
    }
}

// =============================================================================
// API Metrics
// =============================================================================

/// Request counters for the read/export API
#[derive(Clone)]
pub struct ApiMetrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: HistogramVec,
}

impl ApiMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("api_requests_total", "Total API requests"),
            &["endpoint", "method"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("api_request_duration_seconds", "API request duration"),
            &["endpoint"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            requests,
            duration,
        })
    }

    pub fn observe(&self, endpoint: &str, method: &str, seconds: f64) {
        self.requests.with_label_values(&[endpoint, method]).inc();
        self.duration.with_label_values(&[endpoint]).observe(seconds);
    }

    pub fn requests(&self, endpoint: &str, method: &str) -> u64 {
        self.requests.with_label_values(&[endpoint, method]).get()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_registry(&self.registry)
    }
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics").finish_non_exhaustive()
    }
}
