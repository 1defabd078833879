//! Weather Ingest - station observations into Postgres via RabbitMQ
//!
//! A producer polls one weather station, publishes each observation to a
//! durable AMQP topology, and a consumer validates and persists it
//! idempotently. A small read API serves the stored rows.
//!
//! # Architecture
//!
//! ```text
//! Station Source → Producer → weather.topic → weather.queue → Consumer → weather_logs
//!                                                                            │
//!                                                                      Query API
//! ```
//!
//! The producer and consumer never talk to each other; the broker is the
//! only coupling, and the consumer acknowledges a delivery only after the
//! row is committed.
//!
//! # Modules
//!
//! - [`adapters`] - Meteostat, simulated, AMQP, Postgres and in-memory adapters
//! - [`api`] - Read/export HTTP API
//! - [`broker`] - AMQP connection and topology
//! - [`consumer`] - Validation, persistence and acknowledgement protocol
//! - [`domain`] - Observation entity, validity table and ports
//! - [`error`] - Error types
//! - [`http`] - Shared HTTP/1 serving
//! - [`metrics`] - Prometheus counters
//! - [`producer`] - Poll-and-publish loop

pub mod adapters;
pub mod api;
pub mod broker;
pub mod consumer;
pub mod domain;
pub mod error;
pub mod http;
pub mod metrics;
pub mod producer;

// Re-export commonly used types
pub use consumer::{Consumer, Disposition, Outcome};
pub use domain::{LogQuery, Observation, ValidationError};
pub use error::{Error, Result};
pub use metrics::{ApiMetrics, PipelineMetrics};
pub use producer::{Producer, ProducerConfig, SourceKind};
