//! Error types for the weather ingestion pipeline

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the weather ingestion pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Station Source Errors
    // =========================================================================
    /// Station source connection error (network, timeout, TLS)
    #[error("Station source connection error: {0}")]
    SourceConnection(#[source] reqwest::Error),

    /// Station source returned a non-success status
    #[error("Station source request failed: {0}")]
    SourceRequest(String),

    /// Station source response could not be mapped to an observation
    #[error("Failed to parse station source response: {0}")]
    SourceResponseParse(String),

    // =========================================================================
    // Broker Errors
    // =========================================================================
    /// AMQP protocol or connection error
    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    /// Broker negatively confirmed a publish
    #[error("Broker rejected publish to {exchange} with routing key {routing_key}")]
    PublishNotConfirmed {
        exchange: String,
        routing_key: String,
    },

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // =========================================================================
    // Payload / Query Errors
    // =========================================================================
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message payload could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Invalid query parameter
    #[error("Invalid query parameter '{name}': {reason}")]
    InvalidQuery { name: String, reason: String },

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// CSV export error
    #[error("CSV export error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a query parameter rejection
    pub fn invalid_query(name: &str, reason: impl Into<String>) -> Self {
        Error::InvalidQuery {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Why a broker payload could not be turned into an observation
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Body is not a well-formed observation document
    #[error("malformed observation payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Message carries a schema type this consumer does not understand
    #[error("unsupported message type '{0}'")]
    UnsupportedType(String),
}
