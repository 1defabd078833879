//! In-memory adapters
//!
//! A store and a broker that honour the same contracts as Postgres and
//! RabbitMQ closely enough to exercise the pipeline protocol in tests and
//! local dry runs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::broker::{topic_matches, BINDING_PATTERN, EXCHANGE, QUEUE};
use crate::consumer::Disposition;
use crate::domain::{
    LogQuery, Observation, ObservationPublisher, ObservationStore, MESSAGE_TYPE_V1,
};
use crate::error::{Error, Result};

// =============================================================================
// Store
// =============================================================================

/// Observation store keyed on (station, timestamp)
#[derive(Debug, Default)]
pub struct InMemoryObservationStore {
    rows: RwLock<BTreeMap<(String, DateTime<Utc>), Observation>>,
    fail_writes: AtomicBool,
    insert_attempts: AtomicU64,
}

impl InMemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail, simulating an unreachable database
    pub fn set_unavailable(&self, unavailable: bool) {
        self.fail_writes.store(unavailable, Ordering::SeqCst);
    }

    /// Number of insert statements executed, including duplicates
    pub fn insert_attempts(&self) -> u64 {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Every stored row, oldest first
    pub fn rows(&self) -> Vec<Observation> {
        let mut rows: Vec<_> = self.rows.read().values().cloned().collect();
        rows.sort_by_key(|o| o.timestamp);
        rows
    }
}

#[async_trait]
impl ObservationStore for InMemoryObservationStore {
    async fn insert(&self, observation: &Observation) -> Result<u64> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Internal("store unavailable".to_string()));
        }
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);

        let key = (observation.station.clone(), observation.timestamp);
        let mut rows = self.rows.write();
        if rows.contains_key(&key) {
            return Ok(0);
        }
        rows.insert(key, observation.clone());
        Ok(1)
    }

    async fn query(&self, query: &LogQuery) -> Result<Vec<Observation>> {
        let mut matched: Vec<Observation> = self
            .rows
            .read()
            .values()
            .filter(|o| query.matches(o))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(query.limit() as usize);
        Ok(matched)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.rows.read().len() as u64)
    }
}

// =============================================================================
// Broker
// =============================================================================

/// A message sitting in (or delivered from) an in-memory queue
#[derive(Debug, Clone, PartialEq)]
pub struct InMemoryDelivery {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub message_type: Option<String>,
    pub redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<InMemoryDelivery>,
    unacked: HashMap<u64, InMemoryDelivery>,
}

#[derive(Debug, Default)]
struct BrokerState {
    next_tag: u64,
    /// (exchange, queue, pattern)
    bindings: Vec<(String, String, String)>,
    queues: HashMap<String, QueueState>,
    unroutable: u64,
}

/// Topic-exchange broker with work-queue delivery and a fixed prefetch
#[derive(Debug)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    prefetch: usize,
}

impl InMemoryBroker {
    /// Broker with no queues and prefetch 1
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            prefetch: 1,
        }
    }

    /// Broker with the pipeline's queue bound to its exchange
    pub fn with_weather_topology() -> Self {
        let broker = Self::new();
        broker.bind(EXCHANGE, QUEUE, BINDING_PATTERN);
        broker
    }

    /// Declare `queue` (if needed) and bind it to `exchange` with `pattern`
    pub fn bind(&self, exchange: &str, queue: &str, pattern: &str) {
        let mut state = self.state.lock();
        state.queues.entry(queue.to_string()).or_default();
        state
            .bindings
            .push((exchange.to_string(), queue.to_string(), pattern.to_string()));
    }

    /// Route a raw message; returns how many queues received it
    pub fn publish_raw(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
        message_type: Option<&str>,
    ) -> usize {
        let mut state = self.state.lock();

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|(ex, _, pattern)| ex == exchange && topic_matches(pattern, routing_key))
            .map(|(_, queue, _)| queue.clone())
            .collect();

        if targets.is_empty() {
            state.unroutable += 1;
            return 0;
        }

        for queue in &targets {
            state.next_tag += 1;
            let message = InMemoryDelivery {
                delivery_tag: state.next_tag,
                routing_key: routing_key.to_string(),
                payload: payload.clone(),
                message_type: message_type.map(str::to_string),
                redelivered: false,
            };
            state
                .queues
                .entry(queue.clone())
                .or_default()
                .ready
                .push_back(message);
        }

        targets.len()
    }

    /// Deliver the next ready message, unless the prefetch window is full
    pub fn fetch(&self, queue: &str) -> Option<InMemoryDelivery> {
        let mut state = self.state.lock();
        let queue = state.queues.get_mut(queue)?;

        if queue.unacked.len() >= self.prefetch {
            return None;
        }

        let delivery = queue.ready.pop_front()?;
        queue.unacked.insert(delivery.delivery_tag, delivery.clone());
        Some(delivery)
    }

    /// Settle an outstanding delivery. Requeued messages go to the back.
    pub fn settle(&self, queue: &str, delivery_tag: u64, disposition: Disposition) -> Result<()> {
        let mut state = self.state.lock();
        let queue_state = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| Error::Internal(format!("unknown queue {}", queue)))?;

        let mut delivery = queue_state.unacked.remove(&delivery_tag).ok_or_else(|| {
            Error::Internal(format!("unknown delivery tag {} on {}", delivery_tag, queue))
        })?;

        if disposition == Disposition::Requeue {
            delivery.redelivered = true;
            queue_state.ready.push_back(delivery);
        }
        Ok(())
    }

    /// Return every unacked message to the queue, as on consumer disconnect
    pub fn disconnect_consumers(&self, queue: &str) {
        let mut state = self.state.lock();
        if let Some(queue_state) = state.queues.get_mut(queue) {
            let mut pending: Vec<_> = queue_state.unacked.drain().map(|(_, d)| d).collect();
            pending.sort_by_key(|d| d.delivery_tag);
            for mut delivery in pending.into_iter().rev() {
                delivery.redelivered = true;
                queue_state.ready.push_front(delivery);
            }
        }
    }

    /// Messages waiting for delivery
    pub fn ready_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet settled
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    /// Messages that matched no binding
    pub fn unroutable_count(&self) -> u64 {
        self.state.lock().unroutable
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObservationPublisher for InMemoryBroker {
    async fn publish(&self, observation: &Observation) -> Result<()> {
        let payload = observation.encode()?;
        self.publish_raw(
            EXCHANGE,
            &observation.station,
            payload,
            Some(MESSAGE_TYPE_V1),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs(station: &str, hour: u32) -> Observation {
        Observation {
            station: station.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            temperature: 5.2,
            relative_humidity: 80,
            pressure: 1012.0,
            wind_speed: 3,
            precipitation: 0.0,
        }
    }

    // =========================================================================
    // Store Tests
    // =========================================================================

    #[tokio::test]
    async fn test_duplicate_insert_affects_no_rows() {
        let store = InMemoryObservationStore::new();

        assert_eq!(store.insert(&obs("LEMD", 0)).await.unwrap(), 1);
        assert_eq!(store.insert(&obs("LEMD", 0)).await.unwrap(), 0);

        assert_eq!(store.len(), 1);
        assert_eq!(store.insert_attempts(), 2);
    }

    #[tokio::test]
    async fn test_same_instant_different_station_is_distinct() {
        let store = InMemoryObservationStore::new();

        store.insert(&obs("LEMD", 0)).await.unwrap();
        store.insert(&obs("LEBL", 0)).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_newest_first_with_limit() {
        let store = InMemoryObservationStore::new();
        for hour in 0..5 {
            store.insert(&obs("LEMD", hour)).await.unwrap();
        }

        let rows = store
            .query(&LogQuery::new().with_limit(2).unwrap())
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, obs("LEMD", 4).timestamp);
        assert_eq!(rows[1].timestamp, obs("LEMD", 3).timestamp);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_inserts() {
        let store = InMemoryObservationStore::new();
        store.set_unavailable(true);

        assert!(store.insert(&obs("LEMD", 0)).await.is_err());
        assert!(store.is_empty());
    }

    // =========================================================================
    // Broker Tests
    // =========================================================================

    #[test]
    fn test_station_key_routes_to_bound_queue() {
        let broker = InMemoryBroker::with_weather_topology();

        let routed = broker.publish_raw(EXCHANGE, "LEMD", b"{}".to_vec(), None);

        assert_eq!(routed, 1);
        assert_eq!(broker.ready_count(QUEUE), 1);
    }

    #[test]
    fn test_unbound_exchange_is_unroutable() {
        let broker = InMemoryBroker::with_weather_topology();

        let routed = broker.publish_raw("other.topic", "LEMD", b"{}".to_vec(), None);

        assert_eq!(routed, 0);
        assert_eq!(broker.unroutable_count(), 1);
    }

    #[test]
    fn test_prefetch_one_holds_single_message() {
        let broker = InMemoryBroker::with_weather_topology();
        broker.publish_raw(EXCHANGE, "LEMD", b"1".to_vec(), None);
        broker.publish_raw(EXCHANGE, "LEMD", b"2".to_vec(), None);

        let first = broker.fetch(QUEUE).unwrap();
        assert!(broker.fetch(QUEUE).is_none());

        broker.settle(QUEUE, first.delivery_tag, Disposition::Ack).unwrap();
        let second = broker.fetch(QUEUE).unwrap();
        assert_eq!(second.payload, b"2");
    }

    #[test]
    fn test_requeue_moves_message_behind_later_arrivals() {
        let broker = InMemoryBroker::with_weather_topology();
        broker.publish_raw(EXCHANGE, "LEMD", b"1".to_vec(), None);
        broker.publish_raw(EXCHANGE, "LEMD", b"2".to_vec(), None);

        let first = broker.fetch(QUEUE).unwrap();
        broker
            .settle(QUEUE, first.delivery_tag, Disposition::Requeue)
            .unwrap();

        assert_eq!(broker.fetch(QUEUE).unwrap().payload, b"2");
    }

    #[test]
    fn test_reject_drops_message() {
        let broker = InMemoryBroker::with_weather_topology();
        broker.publish_raw(EXCHANGE, "LEMD", b"1".to_vec(), None);

        let delivery = broker.fetch(QUEUE).unwrap();
        broker
            .settle(QUEUE, delivery.delivery_tag, Disposition::Reject)
            .unwrap();

        assert_eq!(broker.ready_count(QUEUE), 0);
        assert_eq!(broker.unacked_count(QUEUE), 0);
    }

    #[test]
    fn test_disconnect_returns_unacked_to_front() {
        let broker = InMemoryBroker::with_weather_topology();
        broker.publish_raw(EXCHANGE, "LEMD", b"1".to_vec(), None);
        broker.publish_raw(EXCHANGE, "LEMD", b"2".to_vec(), None);

        broker.fetch(QUEUE).unwrap();
        broker.disconnect_consumers(QUEUE);

        let redelivered = broker.fetch(QUEUE).unwrap();
        assert_eq!(redelivered.payload, b"1");
        assert!(redelivered.redelivered);
    }

    #[test]
    fn test_settle_unknown_tag_is_error() {
        let broker = InMemoryBroker::with_weather_topology();
        assert!(broker.settle(QUEUE, 99, Disposition::Ack).is_err());
    }

    #[tokio::test]
    async fn test_publish_observation_tags_message_type() {
        let broker = InMemoryBroker::with_weather_topology();

        broker.publish(&obs("LEMD", 0)).await.unwrap();

        let delivery = broker.fetch(QUEUE).unwrap();
        assert_eq!(delivery.routing_key, "LEMD");
        assert_eq!(delivery.message_type.as_deref(), Some(MESSAGE_TYPE_V1));
        assert_eq!(
            Observation::decode(&delivery.payload, delivery.message_type.as_deref()).unwrap(),
            obs("LEMD", 0)
        );
    }
}
