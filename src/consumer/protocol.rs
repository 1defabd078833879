//! Per-message consumer protocol
//!
//! ```text
//!              ┌── decode fails / unexpected error ──▶ Malformed ──▶ nack(requeue)
//!   Received ──┼── invariant broken ──────────────────▶ Invalid   ──▶ nack(drop)
//!              └── all invariants hold ──▶ insert+commit ▶ Valid  ──▶ ack
//! ```
//!
//! The store write is committed before the disposition is returned, so an
//! ack is never sent for data that is not durable.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Observation, ObservationStore, ValidationError};
use crate::error::{DecodeError, Error};
use crate::metrics::PipelineMetrics;

/// What to tell the broker about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Positive acknowledgement
    Ack,
    /// Negative acknowledgement, message dropped
    Reject,
    /// Negative acknowledgement, message returned to the queue
    Requeue,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::Ack => write!(f, "ack"),
            Disposition::Reject => write!(f, "reject"),
            Disposition::Requeue => write!(f, "requeue"),
        }
    }
}

/// Terminal state of one handled delivery
#[derive(Debug)]
pub enum Outcome {
    /// Stored (or suppressed as duplicate when `rows == 0`)
    Valid { observation: Observation, rows: u64 },
    /// Decoded but broke a domain invariant
    Invalid {
        observation: Observation,
        reason: ValidationError,
    },
    /// Payload could not be decoded
    Malformed(DecodeError),
    /// Valid observation the store failed to persist
    PersistenceFailure {
        observation: Observation,
        error: Error,
    },
}

impl Outcome {
    pub fn disposition(&self) -> Disposition {
        match self {
            Outcome::Valid { .. } => Disposition::Ack,
            Outcome::Invalid { .. } => Disposition::Reject,
            Outcome::Malformed(_) | Outcome::PersistenceFailure { .. } => Disposition::Requeue,
        }
    }

    /// Label used in structured logs
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Valid { .. } => "valid",
            Outcome::Invalid { .. } => "invalid",
            Outcome::Malformed(_) => "malformed",
            Outcome::PersistenceFailure { .. } => "persistence_failure",
        }
    }
}

/// Validates deliveries and persists them idempotently
pub struct Consumer<S> {
    store: Arc<S>,
    metrics: PipelineMetrics,
}

impl<S: ObservationStore> Consumer<S> {
    pub fn new(store: Arc<S>, metrics: PipelineMetrics) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Run one delivery through the protocol and record its outcome.
    ///
    /// `message_type` is the AMQP `type` property, if present.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn handle(&self, payload: &[u8], message_type: Option<&str>) -> Outcome {
        let outcome = self.process(payload, message_type).await;
        self.record(&outcome);
        outcome
    }

    async fn process(&self, payload: &[u8], message_type: Option<&str>) -> Outcome {
        let observation = match Observation::decode(payload, message_type) {
            Ok(observation) => observation,
            Err(e) => return Outcome::Malformed(e),
        };

        if let Err(reason) = observation.validate() {
            return Outcome::Invalid {
                observation,
                reason,
            };
        }

        match self.store.insert(&observation).await {
            Ok(rows) => Outcome::Valid { observation, rows },
            Err(error) => Outcome::PersistenceFailure { observation, error },
        }
    }

    fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Valid { observation, rows } => {
                self.metrics.record_inserted(*rows);
                if *rows == 0 {
                    debug!(
                        station = %observation.station,
                        ts = %observation.timestamp,
                        outcome = outcome.label(),
                        "Duplicate observation suppressed"
                    );
                } else {
                    info!(
                        station = %observation.station,
                        ts = %observation.timestamp,
                        outcome = outcome.label(),
                        "Observation stored"
                    );
                }
            }
            Outcome::Invalid {
                observation,
                reason,
            } => {
                self.metrics.record_invalid();
                warn!(
                    station = %observation.station,
                    ts = %observation.timestamp,
                    outcome = outcome.label(),
                    "Rejecting invalid observation: {}",
                    reason
                );
            }
            Outcome::Malformed(e) => {
                self.metrics.record_requeued();
                error!(outcome = outcome.label(), "Requeueing undecodable message: {}", e);
            }
            Outcome::PersistenceFailure { observation, error } => {
                self.metrics.record_requeued();
                error!(
                    station = %observation.station,
                    ts = %observation.timestamp,
                    outcome = outcome.label(),
                    "Requeueing observation after store failure: {}",
                    error
                );
            }
        }
    }
}

impl<S> std::fmt::Debug for Consumer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("metrics", &self.metrics)
            .finish()
    }
}
