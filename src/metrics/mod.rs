//! Metrics module
//!
//! Prometheus counters for the ingestion pipeline and the read API.

mod pipeline;

pub use pipeline::{encode_registry, ApiMetrics, PipelineMetrics, STAGE_ACQUIRE, STAGE_PUBLISH};
