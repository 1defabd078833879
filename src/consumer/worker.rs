//! AMQP delivery loop
//!
//! Drives a [`Consumer`] from `weather.queue` with prefetch 1: one
//! unacknowledged message in flight, settled before the next is taken.

use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
};
use lapin::types::FieldTable;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::protocol::{Consumer, Disposition};
use crate::broker::topology::{self, QUEUE};
use crate::broker::AmqpSession;
use crate::domain::ObservationStore;
use crate::error::{Error, Result};

/// Maximum unacknowledged deliveries held by the consumer
pub const PREFETCH_COUNT: u16 = 1;

/// Consume until `shutdown` fires or the broker closes the stream.
#[instrument(skip_all)]
pub async fn run<S: ObservationStore>(
    consumer: &Consumer<S>,
    session: &AmqpSession,
    shutdown: CancellationToken,
) -> Result<()> {
    let channel = session.channel();

    topology::declare_consumer_topology(channel).await?;
    channel
        .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
        .await?;

    let consumer_tag = format!("weather-ingest-{}", Uuid::new_v4());
    let mut deliveries = channel
        .basic_consume(
            QUEUE,
            &consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(
        "Consumer {} ready on {} (prefetch {})",
        consumer_tag, QUEUE, PREFETCH_COUNT
    );

    loop {
        let delivery = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Consumer shutting down");
                break;
            }
            next = deliveries.next() => match next {
                Some(delivery) => delivery?,
                None => {
                    return Err(Error::Internal(
                        "delivery stream closed by broker".to_string(),
                    ))
                }
            },
        };

        let message_type = delivery.properties.kind().as_ref().map(|k| k.as_str());
        let outcome = consumer.handle(&delivery.data, message_type).await;
        let disposition = outcome.disposition();

        debug!(
            delivery_tag = delivery.delivery_tag,
            redelivered = delivery.redelivered,
            "Settling delivery with {}",
            disposition
        );
        settle(&delivery, disposition).await?;
    }

    if let Err(e) = channel
        .basic_cancel(&consumer_tag, BasicCancelOptions::default())
        .await
    {
        warn!("Failed to cancel consumer {}: {}", consumer_tag, e);
    }
    Ok(())
}

async fn settle(delivery: &Delivery, disposition: Disposition) -> Result<()> {
    match disposition {
        Disposition::Ack => delivery.acker.ack(BasicAckOptions::default()).await?,
        Disposition::Reject => {
            delivery
                .acker
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await?
        }
        Disposition::Requeue => {
            delivery
                .acker
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await?
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefetch_is_one() {
        assert_eq!(PREFETCH_COUNT, 1);
    }
}
