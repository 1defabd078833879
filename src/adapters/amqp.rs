//! AMQP Publisher Adapter
//!
//! Implements the `ObservationPublisher` port on a long-lived broker
//! session. The session is opened lazily, declares the exchange, enables
//! publisher confirms, and is dropped after any failure so the next publish
//! reconnects.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::{BasicProperties, Channel};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::broker::topology::{self, PERSISTENT_DELIVERY};
use crate::broker::{AmqpSession, BrokerConfig, EXCHANGE};
use crate::domain::{Observation, ObservationPublisher, MESSAGE_TYPE_V1};
use crate::error::{Error, Result};

/// Properties stamped on every observation message
pub fn observation_properties() -> BasicProperties {
    BasicProperties::default()
        .with_delivery_mode(PERSISTENT_DELIVERY)
        .with_content_type("application/json".into())
        .with_kind(MESSAGE_TYPE_V1.into())
}

/// Publishes observations to the topic exchange, routed by station
pub struct AmqpPublisher {
    config: BrokerConfig,
    session: Mutex<Option<AmqpSession>>,
}

impl AmqpPublisher {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    async fn open_session(&self) -> Result<AmqpSession> {
        let session = AmqpSession::connect(&self.config).await?;
        topology::declare_exchange(session.channel()).await?;
        session
            .channel()
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(session)
    }

    /// Close the cached session, if any
    pub async fn close(&self) -> Result<()> {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AmqpPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpPublisher")
            .field("broker", &self.config.display_uri())
            .finish()
    }
}

async fn publish_on(channel: &Channel, observation: &Observation) -> Result<()> {
    let payload = observation.encode()?;

    let confirmation = channel
        .basic_publish(
            EXCHANGE,
            &observation.station,
            BasicPublishOptions::default(),
            &payload,
            observation_properties(),
        )
        .await?
        .await?;

    if confirmation.is_nack() {
        return Err(Error::PublishNotConfirmed {
            exchange: EXCHANGE.to_string(),
            routing_key: observation.station.clone(),
        });
    }
    Ok(())
}

#[async_trait]
impl ObservationPublisher for AmqpPublisher {
    #[instrument(skip(self, observation), fields(station = %observation.station))]
    async fn publish(&self, observation: &Observation) -> Result<()> {
        let mut guard = self.session.lock().await;

        if !guard.as_ref().is_some_and(AmqpSession::is_connected) {
            if guard.take().is_some() {
                debug!("Broker session lost, reconnecting");
            }
            *guard = Some(self.open_session().await?);
        }

        let session = guard
            .as_ref()
            .ok_or_else(|| Error::Internal("broker session unavailable".to_string()))?;

        let result = publish_on(session.channel(), observation).await;
        if let Err(e) = &result {
            warn!("Publish failed, dropping broker session: {}", e);
            *guard = None;
        }
        result
    }
}
