//! Domain Ports (Port/Adapter Pattern)
//!
//! The pipeline stages depend only on these traits. Infrastructure adapters
//! (Meteostat, AMQP, Postgres, in-memory) implement them.
//!
//! ```text
//!  StationSource ──▶ Producer ──▶ ObservationPublisher
//!                                        │ (broker)
//!                                        ▼
//!                     Consumer ──▶ ObservationStore ──▶ Query API
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::observation::Observation;
use crate::error::{Error, Result};

// =============================================================================
// Station Source Port
// =============================================================================

/// Supplies one observation per poll.
#[async_trait]
pub trait StationSource: Send + Sync {
    /// Acquire the most recent observation.
    async fn acquire(&self) -> Result<Observation>;

    /// Short strategy name for logs
    fn name(&self) -> &'static str;
}

// =============================================================================
// Publisher Port
// =============================================================================

/// Hands observations to the broker with durability requested.
#[async_trait]
pub trait ObservationPublisher: Send + Sync {
    /// Publish one observation, routed by its station.
    async fn publish(&self, observation: &Observation) -> Result<()>;
}

// =============================================================================
// Store Port
// =============================================================================

/// Relational store for observations, keyed on (station, timestamp).
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Insert, ignoring conflicts on (station, timestamp).
    ///
    /// Returns the number of rows actually written: 1 for a fresh row, 0 for a
    /// duplicate. The write is durable when this returns `Ok`.
    async fn insert(&self, observation: &Observation) -> Result<u64>;

    /// Filtered read, newest first.
    async fn query(&self, query: &LogQuery) -> Result<Vec<Observation>>;

    /// Total stored rows.
    async fn count(&self) -> Result<u64>;
}

// =============================================================================
// Query Value Object
// =============================================================================

/// Filter for reading stored observations.
#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub station: Option<String>,
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub end: Option<DateTime<Utc>>,
    limit: u32,
}

impl LogQuery {
    /// Default row limit for reads
    pub const DEFAULT_LIMIT: u32 = 1000;
    /// Hard upper bound on rows per read (also the CSV export cap)
    pub const MAX_LIMIT: u32 = 10_000;

    /// Unfiltered query with the default limit
    pub fn new() -> Self {
        Self {
            station: None,
            start: None,
            end: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn station(mut self, station: impl Into<String>) -> Self {
        self.station = Some(station.into());
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Set the row limit, which must lie in [1, MAX_LIMIT].
    pub fn with_limit(mut self, limit: u32) -> Result<Self> {
        if !(1..=Self::MAX_LIMIT).contains(&limit) {
            return Err(Error::invalid_query(
                "limit",
                format!("must be between 1 and {}", Self::MAX_LIMIT),
            ));
        }
        self.limit = limit;
        Ok(self)
    }

    /// Same filters at the export cap
    pub fn for_export(mut self) -> Self {
        self.limit = Self::MAX_LIMIT;
        self
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Returns true if the observation passes the station and time filters
    pub fn matches(&self, obs: &Observation) -> bool {
        self.station.as_deref().map_or(true, |s| obs.station == s)
            && self.start.map_or(true, |start| obs.timestamp >= start)
            && self.end.map_or(true, |end| obs.timestamp <= end)
    }
}

impl Default for LogQuery {
    fn default() -> Self {
        Self::new()
    }
}
