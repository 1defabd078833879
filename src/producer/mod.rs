//! Producer - poll, normalize, publish
//!
//! One observation per interval. A failed cycle (source or broker) is
//! logged and counted; the loop always sleeps and tries again.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::adapters::{MeteostatConfig, MeteostatSource, SimulatedSource};
use crate::domain::{Observation, ObservationPublisher, StationSource};
use crate::error::{Error, Result};
use crate::metrics::{PipelineMetrics, STAGE_ACQUIRE, STAGE_PUBLISH};

// =============================================================================
// Configuration
// =============================================================================

/// Which station source strategy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Meteostat when an API key is configured, simulated otherwise
    #[default]
    Auto,
    Meteostat,
    Simulated,
}

impl std::str::FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SourceKind::Auto),
            "meteostat" | "real" => Ok(SourceKind::Meteostat),
            "simulated" | "sim" => Ok(SourceKind::Simulated),
            other => Err(Error::Config(format!(
                "unknown source '{}' (expected auto, meteostat or simulated)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Auto => write!(f, "auto"),
            SourceKind::Meteostat => write!(f, "meteostat"),
            SourceKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// Configuration for the producer
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Station identifier (also the routing key)
    pub station: String,

    /// Pause between cycles
    pub interval: Duration,

    /// Source strategy
    pub source: SourceKind,

    /// RapidAPI key for the Meteostat source
    pub rapidapi_key: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            station: "LEMD".to_string(),
            interval: Duration::from_secs(60),
            source: SourceKind::Auto,
            rapidapi_key: String::new(),
        }
    }
}

impl ProducerConfig {
    /// Resolve `Auto` against the configured key
    pub fn effective_source(&self) -> SourceKind {
        match self.source {
            SourceKind::Auto if self.rapidapi_key.trim().is_empty() => SourceKind::Simulated,
            SourceKind::Auto => SourceKind::Meteostat,
            explicit => explicit,
        }
    }

    /// Build the station source this configuration selects
    pub fn build_source(&self) -> Result<Box<dyn StationSource>> {
        match self.effective_source() {
            SourceKind::Meteostat => {
                if self.rapidapi_key.trim().is_empty() {
                    return Err(Error::Config(
                        "meteostat source requires RAPIDAPI_KEY".to_string(),
                    ));
                }
                let source = MeteostatSource::new(MeteostatConfig {
                    api_key: self.rapidapi_key.clone(),
                    station: self.station.clone(),
                    ..Default::default()
                })?;
                Ok(Box::new(source))
            }
            _ => Ok(Box::new(SimulatedSource::new(self.station.clone()))),
        }
    }
}

// =============================================================================
// Producer
// =============================================================================

/// Polls a station source and publishes each observation
pub struct Producer {
    source: Box<dyn StationSource>,
    publisher: Arc<dyn ObservationPublisher>,
    metrics: PipelineMetrics,
    interval: Duration,
}

impl Producer {
    pub fn new(
        source: Box<dyn StationSource>,
        publisher: Arc<dyn ObservationPublisher>,
        metrics: PipelineMetrics,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            publisher,
            metrics,
            interval,
        }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// One acquire-then-publish cycle
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn run_once(&self) -> Result<Observation> {
        let observation = match self.source.acquire().await {
            Ok(observation) => observation,
            Err(e) => {
                self.metrics.record_producer_failure(STAGE_ACQUIRE);
                return Err(e);
            }
        };

        if let Err(e) = self.publisher.publish(&observation).await {
            self.metrics.record_producer_failure(STAGE_PUBLISH);
            return Err(e);
        }

        self.metrics.record_published();
        Ok(observation)
    }

    /// Cycle until `shutdown` fires; failures never end the loop
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Starting producer with source {} every {:?}",
            self.source.name(),
            self.interval
        );

        loop {
            match self.run_once().await {
                Ok(observation) => info!(
                    station = %observation.station,
                    ts = %observation.timestamp,
                    temp = observation.temperature,
                    rh = observation.relative_humidity,
                    pres = observation.pressure,
                    "Published observation"
                ),
                Err(e) => error!("Producer cycle failed: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Producer shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("source", &self.source.name())
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryBroker;
    use crate::broker::QUEUE;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSource;

    #[async_trait]
    impl StationSource for FailingSource {
        async fn acquire(&self) -> Result<Observation> {
            Err(Error::SourceRequest("status 503".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[derive(Default)]
    struct FailingPublisher {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl ObservationPublisher for FailingPublisher {
        async fn publish(&self, _observation: &Observation) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Internal("broker unavailable".to_string()))
        }
    }

    fn metrics() -> PipelineMetrics {
        PipelineMetrics::new().unwrap()
    }

    // =========================================================================
    // Configuration Tests
    // =========================================================================

    #[test]
    fn test_producer_config_default() {
        let config = ProducerConfig::default();

        assert_eq!(config.station, "LEMD");
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.source, SourceKind::Auto);
    }

    #[test]
    fn test_auto_source_resolution() {
        let without_key = ProducerConfig::default();
        assert_eq!(without_key.effective_source(), SourceKind::Simulated);

        let with_key = ProducerConfig {
            rapidapi_key: "key".to_string(),
            ..Default::default()
        };
        assert_eq!(with_key.effective_source(), SourceKind::Meteostat);

        let forced = ProducerConfig {
            rapidapi_key: "key".to_string(),
            source: SourceKind::Simulated,
            ..Default::default()
        };
        assert_eq!(forced.effective_source(), SourceKind::Simulated);
    }

    #[test]
    fn test_meteostat_without_key_is_config_error() {
        let config = ProducerConfig {
            source: SourceKind::Meteostat,
            ..Default::default()
        };
        assert!(matches!(config.build_source(), Err(Error::Config(_))));
    }

    #[test]
    fn test_build_source_names() {
        let simulated = ProducerConfig::default().build_source().unwrap();
        assert_eq!(simulated.name(), "simulated");

        let meteostat = ProducerConfig {
            rapidapi_key: "key".to_string(),
            ..Default::default()
        }
        .build_source()
        .unwrap();
        assert_eq!(meteostat.name(), "meteostat");
    }

    #[test]
    fn test_source_kind_parse() {
        assert_eq!("auto".parse::<SourceKind>().unwrap(), SourceKind::Auto);
        assert_eq!("REAL".parse::<SourceKind>().unwrap(), SourceKind::Meteostat);
        assert_eq!(
            "simulated".parse::<SourceKind>().unwrap(),
            SourceKind::Simulated
        );
        assert!("satellite".parse::<SourceKind>().is_err());
    }

    // =========================================================================
    // Cycle Tests
    // =========================================================================

    #[tokio::test]
    async fn test_run_once_publishes_routed_by_station() {
        let broker = Arc::new(InMemoryBroker::with_weather_topology());
        let producer = Producer::new(
            Box::new(SimulatedSource::with_seed("LEMD", 1)),
            broker.clone(),
            metrics(),
            Duration::from_secs(60),
        );

        let observation = producer.run_once().await.unwrap();

        assert_eq!(observation.station, "LEMD");
        assert_eq!(producer.metrics().published(), 1);
        let delivery = broker.fetch(QUEUE).unwrap();
        assert_eq!(delivery.routing_key, "LEMD");
    }

    #[tokio::test]
    async fn test_acquire_failure_is_counted_and_not_published() {
        let publisher = Arc::new(FailingPublisher::default());
        let producer = Producer::new(
            Box::new(FailingSource),
            publisher.clone(),
            metrics(),
            Duration::from_secs(60),
        );

        assert!(producer.run_once().await.is_err());
        assert_eq!(producer.metrics().producer_failures(STAGE_ACQUIRE), 1);
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_is_counted() {
        let producer = Producer::new(
            Box::new(SimulatedSource::new("LEMD")),
            Arc::new(FailingPublisher::default()),
            metrics(),
            Duration::from_secs(60),
        );

        assert!(producer.run_once().await.is_err());
        assert_eq!(producer.metrics().producer_failures(STAGE_PUBLISH), 1);
        assert_eq!(producer.metrics().published(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failures_until_shutdown() {
        let publisher = Arc::new(FailingPublisher::default());
        let producer = Arc::new(Producer::new(
            Box::new(SimulatedSource::new("LEMD")),
            publisher.clone(),
            metrics(),
            Duration::from_secs(60),
        ));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn({
            let producer = producer.clone();
            let shutdown = shutdown.clone();
            async move { producer.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(producer.metrics().producer_failures(STAGE_PUBLISH), 3);
    }
}
